use std::fmt::{self, Display};

/// Errors produced by model constructors and parsing routines.
#[derive(Debug)]
pub enum ModelError {
    InvalidRole(String),
    InvalidTimeframe(String),
    InvalidReadMode(String),
    InvalidTimestamp(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InvalidRole(s) => write!(f, "invalid role: {s}"),
            ModelError::InvalidTimeframe(s) => write!(f, "invalid timeframe: {s}"),
            ModelError::InvalidReadMode(s) => write!(f, "invalid read mode: {s}"),
            ModelError::InvalidTimestamp(s) => write!(f, "invalid timestamp: {s}"),
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
