//! The symbol registry: one source of truth for "which contract is bound to
//! which role right now".
//!
//! Readers get an atomically swapped immutable table, so the hot path (every
//! filesystem event, every subscription check) is a single `ArcSwap` load
//! with no locking and no I/O. Reloads validate the incoming table and swap
//! it whole; a rejected reload leaves the previous table untouched.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::info;

use tickbridge_config::validation::validate_symbols;
use tickbridge_model::{Role, RolloverAlert, Symbol, SymbolRecord};

/// Reload failures. The stable error kind is `config-invalid`.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid symbol table: {0}")]
    Invalid(String),
}

impl RegistryError {
    pub fn kind(&self) -> &'static str {
        "config-invalid"
    }
}

/// Immutable registry contents. Swapped as a unit on reload.
#[derive(Debug)]
struct RegistryTable {
    /// All configured records, in config order.
    records: Vec<SymbolRecord>,
    by_identifier: HashMap<Symbol, usize>,
}

impl RegistryTable {
    fn build(records: Vec<SymbolRecord>) -> Self {
        let by_identifier = records
            .iter()
            .enumerate()
            .map(|(idx, record)| (record.identifier.clone(), idx))
            .collect();
        Self {
            records,
            by_identifier,
        }
    }

    /// The record bound to `role` on `date`: the not-yet-rolled-over record
    /// with the earliest rollover, or the final record in the chain once all
    /// rollovers have passed.
    fn bound_record(&self, role: Role, date: NaiveDate) -> Option<&SymbolRecord> {
        let mut chain: Vec<&SymbolRecord> =
            self.records.iter().filter(|r| r.role == role).collect();
        chain.sort_by_key(|r| r.rollover);
        chain
            .iter()
            .find(|r| r.active_on(date))
            .or_else(|| chain.last())
            .copied()
    }

    fn successor(&self, role: Role, date: NaiveDate) -> Option<&SymbolRecord> {
        let mut chain: Vec<&SymbolRecord> =
            self.records.iter().filter(|r| r.role == role).collect();
        chain.sort_by_key(|r| r.rollover);
        let mut active_seen = false;
        for record in chain {
            if active_seen {
                return Some(record);
            }
            if record.active_on(date) {
                active_seen = true;
            }
        }
        None
    }
}

/// Process-wide, hot-reloadable role -> contract mapping.
#[derive(Debug)]
pub struct SymbolRegistry {
    table: ArcSwap<RegistryTable>,
    /// Bumped on every successful reload; the watcher polls this to refresh
    /// its pattern table cheaply.
    epoch: AtomicU64,
    /// Serializes writers. Readers never touch it.
    reload_lock: Mutex<()>,
}

impl SymbolRegistry {
    /// Build a registry from an initial validated symbol table.
    pub fn new(records: Vec<SymbolRecord>) -> Result<Self, RegistryError> {
        validate_symbols(&records).map_err(|err| RegistryError::Invalid(err.to_string()))?;
        Ok(Self {
            table: ArcSwap::from_pointee(RegistryTable::build(records)),
            epoch: AtomicU64::new(1),
            reload_lock: Mutex::new(()),
        })
    }

    /// The contract currently bound to `role`, from today's date and the
    /// configuration alone.
    pub fn current_identifier(&self, role: Role) -> Option<Symbol> {
        self.identifier_on(role, Utc::now().date_naive())
    }

    /// Deterministic binding for an explicit date. The time-driven core of
    /// [`SymbolRegistry::current_identifier`], split out for tests and alerts.
    pub fn identifier_on(&self, role: Role, date: NaiveDate) -> Option<Symbol> {
        self.table
            .load()
            .bound_record(role, date)
            .map(|r| r.identifier.clone())
    }

    /// The records active today: the bound record for every configured role.
    pub fn active_records(&self) -> Vec<SymbolRecord> {
        self.active_records_on(Utc::now().date_naive())
    }

    pub fn active_records_on(&self, date: NaiveDate) -> Vec<SymbolRecord> {
        let table = self.table.load();
        let mut active = Vec::new();
        for role in Role::ALL {
            if let Some(record) = table.bound_record(role, date) {
                active.push(record.clone());
            }
        }
        active
    }

    /// Whether `identifier` is bound to any role today.
    pub fn is_active(&self, identifier: &Symbol) -> bool {
        let date = Utc::now().date_naive();
        let table = self.table.load();
        Role::ALL
            .iter()
            .filter_map(|role| table.bound_record(*role, date))
            .any(|record| &record.identifier == identifier)
    }

    /// Full record lookup by identifier, active or not.
    pub fn record(&self, identifier: &Symbol) -> Option<SymbolRecord> {
        let table = self.table.load();
        table
            .by_identifier
            .get(identifier)
            .map(|idx| table.records[*idx].clone())
    }

    /// Upcoming role rebindings within `horizon_days`, for monitoring.
    pub fn rollover_alerts(&self, now: NaiveDate, horizon_days: i64) -> Vec<RolloverAlert> {
        let table = self.table.load();
        let mut alerts = Vec::new();
        for role in Role::ALL {
            let Some(current) = table.bound_record(role, now) else {
                continue;
            };
            let Some(next) = table.successor(role, now) else {
                continue;
            };
            let days_until = (current.rollover - now).num_days();
            if (0..=horizon_days).contains(&days_until) {
                alerts.push(RolloverAlert {
                    role,
                    from: current.identifier.clone(),
                    to: next.identifier.clone(),
                    days_until,
                });
            }
        }
        alerts
    }

    /// Atomically replace the table. Validation failures leave the previous
    /// table in place; two reloads with identical config are equivalent to
    /// one.
    pub fn reload(&self, records: Vec<SymbolRecord>) -> Result<(), RegistryError> {
        let _guard = self.reload_lock.lock();
        validate_symbols(&records).map_err(|err| RegistryError::Invalid(err.to_string()))?;

        let incoming = RegistryTable::build(records);
        let unchanged = {
            let current = self.table.load();
            current.records == incoming.records
        };
        self.table.store(Arc::new(incoming));
        if !unchanged {
            self.epoch.fetch_add(1, Ordering::Release);
            info!(epoch = self.epoch(), "symbol registry reloaded");
        }
        Ok(())
    }

    /// Monotone counter identifying the current table generation.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }
}
