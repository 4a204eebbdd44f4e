use std::io::Write;

use crate::error::Violation;

pub const BANNER: &str = "*** APHOTIC-SHIELD detected a memory error ***";

/// The text written to stderr for a violation.
#[must_use]
pub fn format_report(violation: &Violation) -> String {
    format!("{BANNER}\n{violation}")
}

/// Report the violation on stderr and abort the process (SIGABRT).
pub fn trap(violation: &Violation) -> ! {
    tracing::error!(kind = ?violation.kind, address = violation.address, "memory error");
    let mut stderr = std::io::stderr().lock();
    let _ = writeln!(stderr, "{}", format_report(violation));
    let _ = stderr.flush();
    std::process::abort()
}
