use std::fmt;

use crate::ir::BlockId;

/// Where in the input module a compiler error was detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub function: String,
    pub block: Option<BlockId>,
    pub inst: Option<usize>,
}

impl Location {
    #[must_use]
    pub fn function(name: &str) -> Self {
        Self {
            function: name.to_string(),
            block: None,
            inst: None,
        }
    }

    #[must_use]
    pub fn block(name: &str, block: BlockId) -> Self {
        Self {
            function: name.to_string(),
            block: Some(block),
            inst: None,
        }
    }

    #[must_use]
    pub fn inst(name: &str, block: BlockId, inst: usize) -> Self {
        Self {
            function: name.to_string(),
            block: Some(block),
            inst: Some(inst),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "function `{}`", self.function)?;
        if let Some(block) = self.block {
            write!(f, ", block {block}")?;
        }
        if let Some(inst) = self.inst {
            write!(f, ", instruction #{inst}")?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed IR in {location}: {message}")]
    MalformedIr { location: Location, message: String },

    #[error("unsupported construct in {location}: {message}")]
    Unsupported { location: Location, message: String },

    #[error("register allocation invariant violated in `{function}`: {message}")]
    Allocation { function: String, message: String },

    #[error("unknown target `{0}` (supported: riscv64)")]
    UnknownTarget(String),

    #[error("IR serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("malformed object image: {0}")]
    ObjectFormat(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub(crate) fn malformed(location: Location, message: impl Into<String>) -> Self {
        Self::MalformedIr {
            location,
            message: message.into(),
        }
    }

    pub(crate) fn unsupported(location: Location, message: impl Into<String>) -> Self {
        Self::Unsupported {
            location,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
