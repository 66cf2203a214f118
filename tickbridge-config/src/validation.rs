use std::collections::HashSet;
use std::path::PathBuf;

use thiserror::Error;
use tickbridge_model::{Role, SymbolRecord};

use crate::models::BridgeConfig;

/// Configuration failures. Every variant maps to the stable error kind
/// `config-invalid`; the process keeps its previous configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Stable kind name for the control surface.
    pub fn kind(&self) -> &'static str {
        "config-invalid"
    }
}

/// Structural validation. Called on every load, including reloads, so a bad
/// edit never replaces a working table.
pub fn validate(config: &BridgeConfig) -> Result<(), ConfigError> {
    if config.server.listen.parse::<std::net::SocketAddr>().is_err() {
        return Err(ConfigError::Invalid(format!(
            "server.listen is not a socket address: {}",
            config.server.listen
        )));
    }

    if config.archive.root.as_os_str().is_empty() {
        return Err(ConfigError::Invalid("archive.root is not set".into()));
    }
    if !config.archive.root.is_absolute() {
        return Err(ConfigError::Invalid(format!(
            "archive.root must be absolute: {}",
            config.archive.root.display()
        )));
    }

    if config.archive.max_read_bytes == 0 {
        return Err(ConfigError::Invalid("archive.max_read_bytes must be positive".into()));
    }
    if config.hub.queue_depth == 0 {
        return Err(ConfigError::Invalid("hub.queue_depth must be positive".into()));
    }

    validate_symbols(&config.symbols)
}

/// Validation of the symbol table alone; the registry re-runs this before an
/// atomic swap.
pub fn validate_symbols(symbols: &[SymbolRecord]) -> Result<(), ConfigError> {
    if symbols.is_empty() {
        return Err(ConfigError::Invalid("no symbols configured".into()));
    }

    let mut seen = HashSet::new();
    for record in symbols {
        if record.identifier.as_str().is_empty() {
            return Err(ConfigError::Invalid("symbol with empty identifier".into()));
        }
        if !seen.insert(record.identifier.clone()) {
            return Err(ConfigError::Invalid(format!(
                "duplicate symbol identifier: {}",
                record.identifier
            )));
        }
        if record.timeframes.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "symbol {} has no timeframes",
                record.identifier
            )));
        }
        if record.expiration < record.rollover {
            return Err(ConfigError::Invalid(format!(
                "symbol {} expires before its rollover date",
                record.identifier
            )));
        }
    }

    // Every role that appears must stay bound: at most one record per
    // (role, rollover date), so successive records form an unambiguous chain.
    for role in Role::ALL {
        let mut rollovers = HashSet::new();
        for record in symbols.iter().filter(|r| r.role == role) {
            if !rollovers.insert(record.rollover) {
                return Err(ConfigError::Invalid(format!(
                    "role {role} has two records rolling over on {}",
                    record.rollover
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::BTreeSet;
    use tickbridge_model::{Symbol, Timeframe};

    fn record(id: &str, role: Role, rollover: (i32, u32, u32)) -> SymbolRecord {
        SymbolRecord {
            identifier: Symbol::from(id),
            role,
            asset_class: "index-future".into(),
            expiration: NaiveDate::from_ymd_opt(2026, 12, 31).unwrap(),
            rollover: NaiveDate::from_ymd_opt(rollover.0, rollover.1, rollover.2).unwrap(),
            priority: 1,
            timeframes: BTreeSet::from([Timeframe::Tick]),
            is_primary: role == Role::Primary,
        }
    }

    #[test]
    fn accepts_a_well_formed_table() {
        let symbols = vec![
            record("NQZ25", Role::Primary, (2025, 12, 15)),
            record("NQH26", Role::Primary, (2026, 3, 16)),
            record("ESZ25", Role::Secondary, (2025, 12, 15)),
        ];
        assert!(validate_symbols(&symbols).is_ok());
    }

    #[test]
    fn rejects_duplicate_identifiers() {
        let symbols = vec![
            record("NQZ25", Role::Primary, (2025, 12, 15)),
            record("NQZ25", Role::Secondary, (2025, 12, 15)),
        ];
        assert!(validate_symbols(&symbols).is_err());
    }

    #[test]
    fn rejects_ambiguous_rollover_chain() {
        let symbols = vec![
            record("NQZ25", Role::Primary, (2025, 12, 15)),
            record("NQH26", Role::Primary, (2025, 12, 15)),
        ];
        assert!(validate_symbols(&symbols).is_err());
    }

    #[test]
    fn rejects_empty_timeframes() {
        let mut bad = record("NQZ25", Role::Primary, (2025, 12, 15));
        bad.timeframes.clear();
        assert!(validate_symbols(&[bad]).is_err());
    }

    #[test]
    fn rejects_expiry_before_rollover() {
        let mut bad = record("NQZ25", Role::Primary, (2025, 12, 15));
        bad.expiration = NaiveDate::from_ymd_opt(2025, 12, 1).unwrap();
        assert!(validate_symbols(&[bad]).is_err());
    }
}
