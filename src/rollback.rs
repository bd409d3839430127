//! Rollback engine.
//!
//! Reverses applied migrations in descending version order — to a target
//! version or for N steps — re-running `down` bodies transactionally and
//! deleting ledger entries. Selection is by version, not by `applied_at`:
//! ledger insertion order and version order are kept consistent by the
//! executor. Shares the lock with forward runs.

use crate::definition::MigrationUnit;
use crate::error::{Direction, MigrateError};
use crate::executor::AppliedMigration;
use crate::files::FileStore;
use crate::ledger::Ledger;
use crate::lock::LockManager;
use crate::notify::{FailureEvent, Notifier};
use crate::store::StoreClient;

/// What to roll back. The CLI maps a bare integer to `Steps` and `--to V`
/// to `ToVersion`; neither given means one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackTarget {
    /// Roll back every applied version greater than this one.
    ToVersion(u64),
    /// Roll back the N most recently applied versions.
    Steps(usize),
}

impl Default for RollbackTarget {
    fn default() -> Self {
        RollbackTarget::Steps(1)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RollbackOptions {
    pub target: RollbackTarget,
    pub dry_run: bool,
}

#[derive(Debug, Default)]
pub struct RollbackOutcome {
    pub rolled_back: Vec<AppliedMigration>,
}

/// Versions to roll back, in rollback (descending) order, from the applied
/// history in ascending order.
pub fn select_rollback(applied: &[u64], target: &RollbackTarget) -> Vec<u64> {
    let mut descending: Vec<u64> = applied.iter().rev().copied().collect();
    match target {
        RollbackTarget::ToVersion(v) => descending.retain(|version| version > v),
        RollbackTarget::Steps(n) => descending.truncate(*n),
    }
    descending
}

pub struct RollbackEngine<'a> {
    store: &'a StoreClient,
    files: &'a FileStore,
    notifier: &'a Notifier,
}

impl<'a> RollbackEngine<'a> {
    pub fn new(store: &'a StoreClient, files: &'a FileStore, notifier: &'a Notifier) -> Self {
        Self {
            store,
            files,
            notifier,
        }
    }

    pub fn rollback(&self, options: &RollbackOptions) -> Result<RollbackOutcome, MigrateError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let lock = LockManager::new(self.store);

        let result = match lock.acquire(&run_id) {
            Ok(token) => {
                let outcome = self.run_locked(options);
                if let Err(e) = lock.release(token) {
                    eprintln!(
                        "  \x1b[33mWarning:\x1b[0m failed to release migration lock: {}",
                        e
                    );
                }
                outcome
            }
            Err(e) => Err(e),
        };

        if let Err(e) = &result {
            self.notifier
                .emit(&FailureEvent::new(run_id.as_str(), e.kind(), e.to_string()));
        }
        result
    }

    fn run_locked(&self, options: &RollbackOptions) -> Result<RollbackOutcome, MigrateError> {
        let ledger = Ledger::new(self.store);
        let applied = ledger.applied_versions()?;
        let selected = select_rollback(&applied, &options.target);

        if selected.is_empty() {
            println!("  No migrations to roll back");
            return Ok(RollbackOutcome::default());
        }

        if options.dry_run {
            println!("  Dry run; would roll back {} migration(s):", selected.len());
            for version in &selected {
                match self.files.find(*version)? {
                    Some(migration) => println!("    {}", migration.full_name()),
                    None => println!("    {:03} (definition file missing!)", version),
                }
            }
            return Ok(RollbackOutcome::default());
        }

        let mut rolled_back = Vec::new();

        for version in selected {
            // A deleted definition orphans the ledger entry; rolling it back
            // automatically is impossible
            let migration = self
                .files
                .find(version)?
                .ok_or_else(|| MigrateError::definition_missing(version))?;

            println!("  \x1b[33mRolling back\x1b[0m {}", migration.full_name());

            let session = self.store.begin_session()?;
            match migration.down(self.store, &session) {
                Ok(()) => {
                    self.store.commit_session(&session).map_err(|e| {
                        MigrateError::execution_failed(version, Direction::Down, e)
                    })?;
                }
                Err(e) => {
                    if let Err(abort_err) = self.store.abort_session(&session) {
                        eprintln!(
                            "  \x1b[33mWarning:\x1b[0m failed to abort session: {}",
                            abort_err
                        );
                    }
                    return Err(MigrateError::execution_failed(version, Direction::Down, e));
                }
            }

            ledger.remove(version)?;

            println!("  \x1b[32m   Reverted\x1b[0m {}", migration.full_name());

            rolled_back.push(AppliedMigration {
                version,
                name: migration.name.clone(),
            });
        }

        Ok(RollbackOutcome { rolled_back })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_is_one_step() {
        assert_eq!(RollbackTarget::default(), RollbackTarget::Steps(1));
    }

    #[test]
    fn test_one_step_picks_latest() {
        let selected = select_rollback(&[1, 2, 3], &RollbackTarget::Steps(1));
        assert_eq!(selected, vec![3]);
    }

    #[test]
    fn test_steps_beyond_history_rolls_back_everything() {
        let selected = select_rollback(&[1, 2], &RollbackTarget::Steps(10));
        assert_eq!(selected, vec![2, 1]);
    }

    #[test]
    fn test_to_version_is_exclusive_descending() {
        let selected = select_rollback(&[1, 2, 3, 5], &RollbackTarget::ToVersion(2));
        assert_eq!(selected, vec![5, 3]);
    }

    #[test]
    fn test_to_version_zero_rolls_back_everything() {
        let selected = select_rollback(&[1, 2, 3], &RollbackTarget::ToVersion(0));
        assert_eq!(selected, vec![3, 2, 1]);
    }

    #[test]
    fn test_to_version_at_head_selects_nothing() {
        let selected = select_rollback(&[1, 2, 3], &RollbackTarget::ToVersion(3));
        assert!(selected.is_empty());
    }

    #[test]
    fn test_empty_history_selects_nothing() {
        assert!(select_rollback(&[], &RollbackTarget::Steps(1)).is_empty());
        assert!(select_rollback(&[], &RollbackTarget::ToVersion(0)).is_empty());
    }
}
