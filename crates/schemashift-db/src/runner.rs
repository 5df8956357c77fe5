//! Applies and reverts migration units against a [`Store`], keeping the
//! ledger in the same transaction as each unit's schema changes.

use std::collections::HashSet;
use std::time::Instant;

use rusqlite::{Connection, Transaction};
use schemashift_common::{Error, Result};
use schemashift_config::{MigrationsConfig, TransactionMode};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::ledger::{AppliedMigration, Ledger};
use crate::migration::{MigrationSet, MigrationUnit, Revert};
use crate::schema::{SchemaHandle, check_foreign_keys};
use crate::store::Store;

/// Where a known unit stands relative to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    Pending,
    Applied,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    /// Ledger rows in application order.
    pub applied: Vec<AppliedMigration>,
    /// Known units not in the ledger, ascending.
    pub pending: Vec<String>,
    /// Ledger rows with no matching unit.
    pub orphaned: Vec<String>,
}

impl MigrationStatus {
    /// `None` means the id is neither known nor recorded.
    pub fn state_of(&self, id: &str) -> Option<MigrationState> {
        if self.applied.iter().any(|m| m.id == id) {
            Some(MigrationState::Applied)
        } else if self.pending.iter().any(|p| p == id) {
            Some(MigrationState::Pending)
        } else {
            None
        }
    }

    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyReport {
    pub applied: Vec<String>,
    /// Ledger size before the run.
    pub already_applied: usize,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    Applied,
    AlreadyApplied,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevertedUnit {
    pub id: String,
    /// Set when the unit had no structural inverse.
    pub notice: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RevertReport {
    pub reverted: Vec<RevertedUnit>,
    pub elapsed_ms: u128,
}

impl RevertReport {
    pub fn ids(&self) -> Vec<&str> {
        self.reverted.iter().map(|r| r.id.as_str()).collect()
    }

    pub fn notices(&self) -> impl Iterator<Item = (&str, &str)> {
        self.reverted
            .iter()
            .filter_map(|r| r.notice.as_deref().map(|n| (r.id.as_str(), n)))
    }
}

/// Brings a store's schema forward or back through a [`MigrationSet`].
///
/// Units are applied in ascending id order and reverted newest-first. Every
/// unit's DDL and its ledger write share one transaction, so the ledger never
/// disagrees with the schema.
pub struct Migrator<'a> {
    units: &'a MigrationSet,
    ledger: Ledger,
    mode: TransactionMode,
}

impl<'a> Migrator<'a> {
    pub fn new(units: &'a MigrationSet, config: &MigrationsConfig) -> Result<Self> {
        Ok(Self {
            units,
            ledger: Ledger::new(config.table.clone())?,
            mode: config.transaction_mode,
        })
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Compare the ledger with the known units. Read-only; the ledger table is
    /// not created if missing.
    pub fn status(&self, store: &Store) -> Result<MigrationStatus> {
        let applied = self.ledger.applied(store.connection())?;
        let applied_ids: HashSet<&str> = applied.iter().map(|m| m.id.as_str()).collect();

        let pending = self
            .units
            .ids()
            .filter(|id| !applied_ids.contains(id))
            .map(String::from)
            .collect();
        let orphaned = applied
            .iter()
            .filter(|m| !self.units.contains(&m.id))
            .map(|m| m.id.clone())
            .collect();

        Ok(MigrationStatus {
            applied,
            pending,
            orphaned,
        })
    }

    /// Apply every unit missing from the ledger, oldest id first. Stops at the
    /// first failure; that unit is rolled back and reported.
    pub fn apply_pending(&self, store: &mut Store) -> Result<ApplyReport> {
        self.apply_until(store, None)
    }

    /// Like [`apply_pending`](Self::apply_pending), but only units with
    /// `id <= target`.
    pub fn apply_to(&self, store: &mut Store, target: &str) -> Result<ApplyReport> {
        if !self.units.contains(target) {
            return Err(Error::UnknownMigration(target.to_string()));
        }
        self.apply_until(store, Some(target))
    }

    /// Apply a single unit. Already-applied units are reported without
    /// touching the schema; a unit is never applied ahead of an older pending one.
    pub fn apply_one(&self, store: &mut Store, id: &str) -> Result<ApplyOutcome> {
        let unit = self
            .units
            .get(id)
            .ok_or_else(|| Error::UnknownMigration(id.to_string()))?;

        if self.ledger.contains(store.connection(), id)? {
            info!("migration {id} is already applied");
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        let applied = self.applied_ids(store)?;
        if let Some(blocker) = self
            .units
            .iter()
            .take_while(|u| u.id() < id)
            .find(|u| !applied.contains(u.id()))
        {
            return Err(Error::Config(format!(
                "cannot apply {id} before pending migration {}",
                blocker.id()
            )));
        }

        self.ledger.ensure(store.connection())?;
        let mut outcomes =
            self.run_in_transactions(store, &[unit], |conn, unit| self.apply_step(conn, unit))?;
        if outcomes.first() == Some(&ApplyOutcome::Applied) {
            info!("applied migration {id}");
        }
        outcomes
            .pop()
            .ok_or_else(|| Error::Other(format!("no outcome recorded for {id}")))
    }

    /// Revert the `n` most recently applied units, newest first. `n` larger
    /// than the ledger reverts everything.
    pub fn revert_last(&self, store: &mut Store, n: usize) -> Result<RevertReport> {
        let applied = self.ledger.applied(store.connection())?;
        self.revert_newest(store, &applied, n)
    }

    /// Revert newest-first down to and including `target`.
    pub fn revert_to(&self, store: &mut Store, target: &str) -> Result<RevertReport> {
        if !self.units.contains(target) {
            return Err(Error::UnknownMigration(target.to_string()));
        }
        let applied = self.ledger.applied(store.connection())?;
        let position = applied
            .iter()
            .rposition(|m| m.id == target)
            .ok_or_else(|| Error::Config(format!("migration {target} is not applied")))?;
        self.revert_newest(store, &applied, applied.len() - position)
    }

    pub fn revert_all(&self, store: &mut Store) -> Result<RevertReport> {
        self.revert_last(store, usize::MAX)
    }

    fn apply_until(&self, store: &mut Store, target: Option<&str>) -> Result<ApplyReport> {
        let started = Instant::now();
        self.ledger.ensure(store.connection())?;
        let applied = self.applied_ids(store)?;

        let pending: Vec<&MigrationUnit> = self
            .units
            .iter()
            .filter(|u| !applied.contains(u.id()))
            .filter(|u| target.is_none_or(|t| u.id() <= t))
            .collect();

        let mut report = ApplyReport {
            already_applied: applied.len(),
            ..Default::default()
        };

        if pending.is_empty() {
            info!("schema is up to date ({} applied)", applied.len());
            report.elapsed_ms = started.elapsed().as_millis();
            return Ok(report);
        }

        info!("{} pending migration(s)", pending.len());
        let outcomes =
            self.run_in_transactions(store, &pending, |conn, unit| self.apply_step(conn, unit))?;

        for (unit, outcome) in pending.iter().zip(outcomes) {
            if outcome == ApplyOutcome::Applied {
                info!("applied migration {}", unit.id());
                report.applied.push(unit.id().to_string());
            }
        }
        report.elapsed_ms = started.elapsed().as_millis();
        Ok(report)
    }

    fn revert_newest(
        &self,
        store: &mut Store,
        applied: &[AppliedMigration],
        n: usize,
    ) -> Result<RevertReport> {
        let started = Instant::now();

        // Resolve every target up front so an unknown id aborts before any
        // transaction is opened.
        let targets = applied
            .iter()
            .rev()
            .take(n)
            .map(|m| {
                self.units
                    .get(&m.id)
                    .ok_or_else(|| Error::UnknownMigration(m.id.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        if targets.is_empty() {
            info!("nothing to revert");
            return Ok(RevertReport::default());
        }

        let reverted =
            self.run_in_transactions(store, &targets, |conn, unit| self.revert_step(conn, unit))?;
        for unit in &reverted {
            info!("reverted migration {}", unit.id);
        }

        Ok(RevertReport {
            reverted,
            elapsed_ms: started.elapsed().as_millis(),
        })
    }

    fn apply_step(&self, conn: &Connection, unit: &MigrationUnit) -> Result<ApplyOutcome> {
        // Another runner may have committed this unit since the ledger was read.
        if self.ledger.contains(conn, unit.id())? {
            warn!("migration {} was applied concurrently, skipping", unit.id());
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        info!("applying migration {}", unit.id());
        unit.apply(&SchemaHandle::new(conn))?;
        self.ledger.record(conn, unit.id())?;
        Ok(ApplyOutcome::Applied)
    }

    fn revert_step(&self, conn: &Connection, unit: &MigrationUnit) -> Result<RevertedUnit> {
        let notice = match unit.revert() {
            Revert::Reversible(revert) => {
                info!("reverting migration {}", unit.id());
                revert(&SchemaHandle::new(conn))?;
                None
            }
            Revert::NoticeOnly(message) => {
                warn!(
                    "migration {} cannot be reverted ({message}); removing its ledger entry only",
                    unit.id()
                );
                Some(message.clone())
            }
        };
        self.ledger.remove(conn, unit.id())?;
        Ok(RevertedUnit {
            id: unit.id().to_string(),
            notice,
        })
    }

    fn applied_ids(&self, store: &Store) -> Result<HashSet<String>> {
        Ok(self
            .ledger
            .applied(store.connection())?
            .into_iter()
            .map(|m| m.id)
            .collect())
    }

    /// Run `step` for each unit in order, one transaction per unit or one for
    /// the whole run depending on the configured mode. A failing step rolls
    /// back its transaction and ends the run.
    ///
    /// Foreign key enforcement is suspended for the duration so table rebuilds
    /// can drop referenced tables; each unit's changes must still pass
    /// `foreign_key_check` before they count.
    fn run_in_transactions<T>(
        &self,
        store: &mut Store,
        units: &[&MigrationUnit],
        step: impl Fn(&Connection, &MigrationUnit) -> Result<T>,
    ) -> Result<Vec<T>> {
        let checked = |conn: &Connection, unit: &MigrationUnit| -> Result<T> {
            let value = step(conn, unit)?;
            check_foreign_keys(conn)?;
            Ok(value)
        };

        store.with_foreign_keys_suspended(|store| {
            let mut out = Vec::with_capacity(units.len());

            match self.mode {
                TransactionMode::PerUnit => {
                    for &unit in units {
                        let tx = store.begin()?;
                        match checked(&tx, unit) {
                            Ok(value) => {
                                tx.commit().map_err(|e| {
                                    failed(unit, Error::Database(format!("commit failed: {e}")))
                                })?;
                                out.push(value);
                            }
                            Err(e) => {
                                abort(tx);
                                return Err(failed(unit, e));
                            }
                        }
                    }
                }
                TransactionMode::Batch => {
                    let tx = store.begin()?;
                    for &unit in units {
                        match checked(&tx, unit) {
                            Ok(value) => out.push(value),
                            Err(e) => {
                                abort(tx);
                                return Err(failed(unit, e));
                            }
                        }
                    }
                    tx.commit().map_err(|e| {
                        Error::Database(format!("failed to commit migration batch: {e}"))
                    })?;
                }
            }

            Ok(out)
        })
    }
}

fn failed(unit: &MigrationUnit, cause: Error) -> Error {
    let reason = cause.to_string();
    error!("migration {} failed and was rolled back: {reason}", unit.id());
    Error::MigrationFailed {
        id: unit.id().to_string(),
        reason,
    }
}

fn abort(tx: Transaction<'_>) {
    if let Err(e) = tx.rollback() {
        warn!("rollback failed: {e}");
    }
}
