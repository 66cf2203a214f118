use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// One entry in an archive directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub is_dir: bool,
}

/// Metadata for a single archive path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveStat {
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub is_dir: bool,
}

/// How `read_range` interprets the bytes it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadMode {
    Binary,
    Text,
}

impl fmt::Display for ReadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadMode::Binary => f.write_str("binary"),
            ReadMode::Text => f.write_str("text"),
        }
    }
}

impl FromStr for ReadMode {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "binary" => Ok(ReadMode::Binary),
            "text" => Ok(ReadMode::Text),
            other => Err(ModelError::InvalidReadMode(other.to_string())),
        }
    }
}
