//! C ABI entry points called by instrumented code.
//!
//! The process-wide [`Shield`] is created on first use from
//! `APHOTIC_SHIELD_OPTIONS`; `as_init` only forces that to happen early.
//! Any violation ends the process through [`report::trap`].

#![allow(unsafe_code)]

use std::sync::OnceLock;

use crate::allocator::Shield;
use crate::options::ShieldOptions;
use crate::registry::Access;
use crate::report;

static SHIELD: OnceLock<Shield> = OnceLock::new();

/// The process-wide shield.
pub fn shield() -> &'static Shield {
    SHIELD.get_or_init(|| {
        let options = ShieldOptions::from_env().unwrap_or_else(|err| {
            tracing::warn!(%err, "ignoring {}", ShieldOptions::ENV_VAR);
            ShieldOptions::default()
        });
        if options.help {
            eprintln!("{}", ShieldOptions::help_text());
        }
        tracing::debug!(?options, "aphotic shield initialized");
        Shield::new(options)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn as_init() {
    shield();
}

#[unsafe(no_mangle)]
pub extern "C" fn as_alloc(size: usize) -> *mut u8 {
    let address = shield().alloc(size);
    std::ptr::with_exposed_provenance_mut(address as usize)
}

#[unsafe(no_mangle)]
pub extern "C" fn as_dealloc(ptr: *mut u8) {
    if let Err(violation) = shield().dealloc(ptr.addr() as u64) {
        report::trap(&violation);
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn as_check_load(addr: *const u8, width: usize) {
    check(addr, width, Access::Load);
}

#[unsafe(no_mangle)]
pub extern "C" fn as_check_store(addr: *const u8, width: usize) {
    check(addr, width, Access::Store);
}

fn check(addr: *const u8, width: usize, access: Access) {
    if let Err(violation) = shield().check(addr.addr() as u64, width as u64, access) {
        report::trap(&violation);
    }
}
