#![allow(
    clippy::cast_possible_truncation, // intentional: 64-bit offsets narrowed into instruction fields
    clippy::cast_possible_wrap, // intentional: image offsets reinterpreted as signed pc distances
    clippy::cast_sign_loss, // intentional: signed immediates packed into instruction words
    clippy::missing_errors_doc // every fallible function returns crate::Error
)]

pub mod abi;
#[cfg(feature = "compiler")]
mod compile;
#[cfg(feature = "compiler")]
pub mod emit;
pub mod error;
#[cfg(feature = "compiler")]
pub mod frame;
pub mod ir;
#[cfg(feature = "compiler")]
pub mod isel;
#[cfg(feature = "compiler")]
pub mod regalloc;
pub mod riscv;

/// Test harness module for writing unit and integration tests.
///
/// This module is only available when running tests or when the
/// `test-harness` feature is enabled.
#[cfg(any(test, feature = "test-harness"))]
pub mod test_harness;

#[cfg(feature = "compiler")]
pub use compile::{CompileOptions, CompiledFunction, CompiledModule, Target, compile_module};
pub use error::{Error, Location, Result};
pub use ir::Module;
#[cfg(feature = "compiler")]
pub use regalloc::SpillStrategy;
