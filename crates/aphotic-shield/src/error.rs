use std::fmt;

use thiserror::Error;

/// Class of memory error detected by the shield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    UseAfterFree,
    DoubleFree,
    InvalidFree,
    BufferOverflow,
    BufferUnderflow,
    Unknown,
}

impl ViolationKind {
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            ViolationKind::UseAfterFree => "Use After Free",
            ViolationKind::DoubleFree => "Double Free",
            ViolationKind::InvalidFree => "Invalid (Wild) Free",
            ViolationKind::BufferOverflow => "Buffer Overflow",
            ViolationKind::BufferUnderflow => "Buffer Underflow",
            ViolationKind::Unknown => "Unknown error",
        }
    }
}

/// A detected memory error. `Display` renders the report line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Violation {
    pub kind: ViolationKind,
    pub address: u64,
}

impl Violation {
    #[must_use]
    pub const fn new(kind: ViolationKind, address: u64) -> Self {
        Self { kind, address }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on address {:#x}", self.kind.description(), self.address)
    }
}

impl std::error::Error for Violation {}

/// Problems in `APHOTIC_SHIELD_OPTIONS`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionsError {
    #[error("unknown option `{0}`")]
    UnknownOption(String),

    #[error("option `{0}` needs a value (`{0}=...`)")]
    MissingValue(String),

    #[error("invalid value `{value}` for option `{name}`")]
    InvalidValue { name: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_lines() {
        let cases = [
            (ViolationKind::UseAfterFree, "Use After Free on address 0x1000"),
            (ViolationKind::DoubleFree, "Double Free on address 0x1000"),
            (ViolationKind::InvalidFree, "Invalid (Wild) Free on address 0x1000"),
            (ViolationKind::BufferOverflow, "Buffer Overflow on address 0x1000"),
            (ViolationKind::BufferUnderflow, "Buffer Underflow on address 0x1000"),
            (ViolationKind::Unknown, "Unknown error on address 0x1000"),
        ];
        for (kind, line) in cases {
            assert_eq!(Violation::new(kind, 0x1000).to_string(), line);
        }
    }
}
