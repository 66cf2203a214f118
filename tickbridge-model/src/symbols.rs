use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// A concrete contract identifier, e.g. `NQZ25`. Opaque; compares by equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(code: impl Into<String>) -> Self {
        Symbol(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(code: &str) -> Self {
        Symbol(code.to_string())
    }
}

impl From<String> for Symbol {
    fn from(code: String) -> Self {
        Symbol(code)
    }
}

/// A stable logical slot whose bound contract changes on rollover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Primary,
    Secondary,
    Tertiary,
    Quaternary,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Primary, Role::Secondary, Role::Tertiary, Role::Quaternary];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Primary => "primary",
            Role::Secondary => "secondary",
            Role::Tertiary => "tertiary",
            Role::Quaternary => "quaternary",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "primary" => Ok(Role::Primary),
            "secondary" => Ok(Role::Secondary),
            "tertiary" => Ok(Role::Tertiary),
            "quaternary" => Ok(Role::Quaternary),
            other => Err(ModelError::InvalidRole(other.to_string())),
        }
    }
}

/// Chart timeframes a symbol is streamed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "tick")]
    Tick,
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "30m")]
    ThirtyMinute,
    #[serde(rename = "daily")]
    Daily,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Tick => "tick",
            Timeframe::OneMinute => "1m",
            Timeframe::ThirtyMinute => "30m",
            Timeframe::Daily => "daily",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tick" => Ok(Timeframe::Tick),
            "1m" => Ok(Timeframe::OneMinute),
            "30m" => Ok(Timeframe::ThirtyMinute),
            "daily" => Ok(Timeframe::Daily),
            other => Err(ModelError::InvalidTimeframe(other.to_string())),
        }
    }
}

/// One configured contract: the registry's unit of truth.
///
/// Records are keyed by identifier. A role may have several records with
/// successive rollover dates; the registry binds the role to the record whose
/// rollover window covers the current date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub identifier: Symbol,
    pub role: Role,
    /// Free-form asset class tag, e.g. `index-future`.
    pub asset_class: String,
    pub expiration: NaiveDate,
    pub rollover: NaiveDate,
    pub priority: u8,
    pub timeframes: BTreeSet<Timeframe>,
    pub is_primary: bool,
}

impl SymbolRecord {
    /// Whether this record is still bound on the given date. On the rollover
    /// date itself the role already belongs to the successor.
    pub fn active_on(&self, date: NaiveDate) -> bool {
        date < self.rollover
    }

    pub fn wants(&self, timeframe: Timeframe) -> bool {
        self.timeframes.contains(&timeframe)
    }
}

/// An upcoming role rebinding, surfaced for monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloverAlert {
    pub role: Role,
    pub from: Symbol,
    pub to: Symbol,
    pub days_until: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_str() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("quinary".parse::<Role>().is_err());
    }

    #[test]
    fn timeframe_serde_names() {
        let tf: Timeframe = serde_json::from_str("\"1m\"").unwrap();
        assert_eq!(tf, Timeframe::OneMinute);
        assert_eq!(serde_json::to_string(&Timeframe::Tick).unwrap(), "\"tick\"");
    }

    #[test]
    fn record_activity_window() {
        let record = SymbolRecord {
            identifier: Symbol::from("NQZ25"),
            role: Role::Primary,
            asset_class: "index-future".into(),
            expiration: NaiveDate::from_ymd_opt(2025, 12, 19).unwrap(),
            rollover: NaiveDate::from_ymd_opt(2025, 12, 15).unwrap(),
            priority: 1,
            timeframes: BTreeSet::from([Timeframe::Tick]),
            is_primary: true,
        };
        assert!(record.active_on(NaiveDate::from_ymd_opt(2025, 12, 14).unwrap()));
        assert!(!record.active_on(NaiveDate::from_ymd_opt(2025, 12, 15).unwrap()));
    }
}
