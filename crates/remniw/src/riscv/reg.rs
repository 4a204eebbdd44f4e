use std::fmt;

/// One of the 32 RV64 integer registers (`x0`..`x31`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PReg(u8);

const ABI_NAMES: [&str; 32] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

impl PReg {
    /// # Panics
    /// In const context only, for `index >= 32`.
    #[must_use]
    pub const fn new(index: u8) -> Self {
        assert!(index < 32);
        Self(index)
    }

    /// Hardware register number, as encoded in instructions.
    #[must_use]
    pub const fn hw(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        ABI_NAMES[self.0 as usize]
    }

    /// Look a register up by ABI name (`fp` is accepted for `s0`) or `xN`.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        if name == "fp" {
            return Some(Self(8));
        }
        if let Some(index) = ABI_NAMES.iter().position(|n| *n == name) {
            return Some(Self(index as u8));
        }
        name.strip_prefix('x')
            .and_then(|n| n.parse::<u8>().ok())
            .filter(|n| *n < 32)
            .map(Self)
    }
}

impl fmt::Display for PReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
