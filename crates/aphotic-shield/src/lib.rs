//! Aphotic shield: guarded allocation and access checking for programs
//! compiled by remniw with instrumentation enabled.
//!
//! Guarded allocations live in the slots of a [`GuardedPool`], separated by
//! guard spans and recorded in a [`GuardRegistry`]. Instrumented code asks
//! the registry about each load and store before performing it; an access
//! into the pool that is not wholly inside a live block is a [`Violation`],
//! which the C ABI layer turns into a report on stderr followed by `abort()`.
//!
//! ```
//! use aphotic_shield::{Access, GuardRegistry, ViolationKind};
//!
//! let registry = GuardRegistry::new(16);
//! registry.register(0x1000, 8);
//! assert!(registry.check(0x1000, 8, Access::Load).is_ok());
//! let err = registry.check(0x1008, 1, Access::Load).unwrap_err();
//! assert_eq!(err.kind, ViolationKind::BufferOverflow);
//! ```

pub mod allocator;
pub mod error;
pub mod ffi;
pub mod options;
pub mod pool;
pub mod registry;
pub mod report;

pub use allocator::Shield;
pub use error::{OptionsError, Violation, ViolationKind};
pub use options::ShieldOptions;
pub use pool::{GuardedPool, PoolLayout};
pub use registry::{Access, GuardRegistry, Region};

/// C symbols exported by [`ffi`] and called by instrumented code.
pub mod symbols {
    /// `void as_init(void)`
    pub const INIT: &str = "as_init";
    /// `void *as_alloc(size_t size)`
    pub const ALLOC: &str = "as_alloc";
    /// `void as_dealloc(void *ptr)`
    pub const DEALLOC: &str = "as_dealloc";
    /// `void as_check_load(const void *addr, size_t width)`
    pub const CHECK_LOAD: &str = "as_check_load";
    /// `void as_check_store(const void *addr, size_t width)`
    pub const CHECK_STORE: &str = "as_check_store";

    /// Every runtime entry point.
    pub const ALL: [&str; 5] = [INIT, ALLOC, DEALLOC, CHECK_LOAD, CHECK_STORE];
}
