//! Runtime configuration read from `APHOTIC_SHIELD_OPTIONS`.
//!
//! The variable holds `Name=value` pairs separated by `:`, `,` or
//! whitespace, e.g. `GuardSize=32:QuarantineSize=0`. Boolean options accept
//! `1`/`0`/`true`/`false`; a bare boolean name (`Help`) means true.

use crate::error::OptionsError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShieldOptions {
    /// Guard and check allocations at all.
    pub enabled: bool,
    /// Live guarded allocations beyond this fall back to plain allocation.
    pub max_simultaneous_allocations: usize,
    /// Bytes of guard span on each side of an allocation.
    pub guard_size: usize,
    /// Bytes of freed memory held back from reuse.
    pub quarantine_size: usize,
    /// Print the option summary on initialization.
    pub help: bool,
}

impl Default for ShieldOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            max_simultaneous_allocations: 16,
            guard_size: 16,
            quarantine_size: 1 << 20,
            help: false,
        }
    }
}

const HELP: &str = "\
APHOTIC_SHIELD_OPTIONS=Name=value[:Name=value...]
  Enabled=<bool>                     guard allocations and check accesses (default 1)
  MaxSimultaneousAllocations=<n>     live guarded allocations (default 16)
  GuardSize=<bytes>                  guard span on each side (default 16)
  QuarantineSize=<bytes>             freed bytes withheld from reuse (default 1048576)
  Help=<bool>                        print this summary";

impl ShieldOptions {
    pub const ENV_VAR: &'static str = "APHOTIC_SHIELD_OPTIONS";

    #[must_use]
    pub const fn help_text() -> &'static str {
        HELP
    }

    pub fn parse(text: &str) -> Result<Self, OptionsError> {
        let mut options = Self::default();
        let pairs = text
            .split(|c: char| c == ':' || c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty());
        for pair in pairs {
            let (name, value) = match pair.split_once('=') {
                Some((name, value)) => (name, Some(value)),
                None => (pair, None),
            };
            match name {
                "Enabled" => options.enabled = parse_bool(name, value)?,
                "Help" => options.help = parse_bool(name, value)?,
                "MaxSimultaneousAllocations" => {
                    options.max_simultaneous_allocations = parse_usize(name, value)?;
                }
                "GuardSize" => options.guard_size = parse_usize(name, value)?,
                "QuarantineSize" => options.quarantine_size = parse_usize(name, value)?,
                other => return Err(OptionsError::UnknownOption(other.to_string())),
            }
        }
        Ok(options)
    }

    /// Options from the environment; defaults when the variable is unset.
    pub fn from_env() -> Result<Self, OptionsError> {
        match std::env::var(Self::ENV_VAR) {
            Ok(text) => Self::parse(&text),
            Err(_) => Ok(Self::default()),
        }
    }
}

fn parse_bool(name: &str, value: Option<&str>) -> Result<bool, OptionsError> {
    match value {
        None | Some("1" | "true") => Ok(true),
        Some("0" | "false") => Ok(false),
        Some(other) => Err(OptionsError::InvalidValue {
            name: name.to_string(),
            value: other.to_string(),
        }),
    }
}

fn parse_usize(name: &str, value: Option<&str>) -> Result<usize, OptionsError> {
    let Some(value) = value else {
        return Err(OptionsError::MissingValue(name.to_string()));
    };
    value.parse().map_err(|_| OptionsError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    })
}
