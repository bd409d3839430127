//! Forward migration executor.
//!
//! One run: acquire the lock, compute the pending set, then for each pending
//! migration validate → snapshot → apply inside a transactional session →
//! record the ledger entry. The first failure aborts the run; migrations
//! already applied in the same run stay committed (they are atomic
//! individually, not as a batch). The lock is released on every exit path
//! and every fatal error produces one notification event.

use std::collections::HashSet;
use std::time::Instant;

use crate::backup::BackupService;
use crate::config::MigrateConfig;
use crate::definition::checksum;
use crate::error::{Direction, MigrateError};
use crate::files::FileStore;
use crate::ledger::{Ledger, LedgerEntry};
use crate::lock::LockManager;
use crate::notify::{FailureEvent, Notifier};
use crate::store::StoreClient;

#[derive(Debug, Clone)]
pub struct MigrateOptions {
    /// Only apply versions up to and including this one.
    pub target: Option<u64>,
    /// Plan and report without applying. Still takes the lock, so racing
    /// dry runs serialize like real ones.
    pub dry_run: bool,
    /// When false, skip the pre-migration snapshot (explicit opt-out).
    pub backup: bool,
}

impl Default for MigrateOptions {
    fn default() -> Self {
        Self {
            target: None,
            dry_run: false,
            backup: true,
        }
    }
}

/// One successfully applied migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMigration {
    pub version: u64,
    pub name: String,
}

#[derive(Debug, Default)]
pub struct MigrateOutcome {
    pub applied: Vec<AppliedMigration>,
    /// Pending migrations excluded by the target version.
    pub skipped: usize,
}

/// Pending versions in apply order, plus how many pending versions the
/// target excluded.
pub fn pending_set(
    versions: &[u64],
    applied: &HashSet<u64>,
    target: Option<u64>,
) -> (Vec<u64>, usize) {
    let mut pending = Vec::new();
    let mut skipped = 0;
    for &version in versions {
        if applied.contains(&version) {
            continue;
        }
        match target {
            Some(t) if version > t => skipped += 1,
            _ => pending.push(version),
        }
    }
    (pending, skipped)
}

pub struct Executor<'a> {
    store: &'a StoreClient,
    files: &'a FileStore,
    config: &'a MigrateConfig,
    notifier: &'a Notifier,
}

impl<'a> Executor<'a> {
    pub fn new(
        store: &'a StoreClient,
        files: &'a FileStore,
        config: &'a MigrateConfig,
        notifier: &'a Notifier,
    ) -> Self {
        Self {
            store,
            files,
            config,
            notifier,
        }
    }

    /// Apply all pending migrations (up to the target, if any).
    pub fn migrate(&self, options: &MigrateOptions) -> Result<MigrateOutcome, MigrateError> {
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

    fn run_locked(&self, options: &MigrateOptions) -> Result<MigrateOutcome, MigrateError> {
        let ledger = Ledger::new(self.store);
        let registry = self.files.registry()?;

        let applied: HashSet<u64> = ledger.applied_versions()?.into_iter().collect();
        let (pending, skipped) = pending_set(&registry.versions(), &applied, options.target);

        if pending.is_empty() {
            println!("  No pending migrations");
            return Ok(MigrateOutcome {
                applied: vec![],
                skipped,
            });
        }

        if options.dry_run {
            println!("  Dry run; would apply {} migration(s):", pending.len());
            for &version in &pending {
                if let Some(unit) = registry.get(version) {
                    println!("    {:03}_{}", version, unit.name());
                }
            }
            return Ok(MigrateOutcome {
                applied: vec![],
                skipped,
            });
        }

        let backup = BackupService::new(self.store, self.config);
        let mut applied_now = Vec::new();

        for version in pending {
            let unit = match registry.get(version) {
                Some(unit) => unit,
                None => continue,
            };

            println!("  \x1b[33mMigrating\x1b[0m {:03}_{}", version, unit.name());

            // Pre-flight check aborts the whole run before any write
            unit.validate(self.store)?;

            let backup_path = if options.backup {
                let path = backup.snapshot(version)?;
                Some(path.to_string_lossy().to_string())
            } else {
                None
            };

            let started = Instant::now();
            let session = self.store.begin_session()?;
            match unit.up(self.store, &session) {
                Ok(()) => {
                    self.store
                        .commit_session(&session)
                        .map_err(|e| MigrateError::execution_failed(version, Direction::Up, e))?;
                }
                Err(e) => {
                    if let Err(abort_err) = self.store.abort_session(&session) {
                        eprintln!(
                            "  \x1b[33mWarning:\x1b[0m failed to abort session: {}",
                            abort_err
                        );
                    }
                    return Err(MigrateError::execution_failed(version, Direction::Up, e));
                }
            }

            let entry = LedgerEntry {
                version,
                filename: unit.filename(),
                description: unit.description().map(|s| s.to_string()),
                applied_at: chrono::Utc::now().to_rfc3339(),
                duration_ms: started.elapsed().as_millis() as u64,
                backup_path,
                checksum: checksum(unit.source()),
            };
            ledger.record(&entry)?;

            println!("  \x1b[32m   Applied\x1b[0m {:03}_{}", version, unit.name());

            applied_now.push(AppliedMigration {
                version,
                name: unit.name().to_string(),
            });
        }

        Ok(MigrateOutcome {
            applied: applied_now,
            skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn applied(versions: &[u64]) -> HashSet<u64> {
        versions.iter().copied().collect()
    }

    #[test]
    fn test_pending_all_when_none_applied() {
        let (pending, skipped) = pending_set(&[1, 2, 3], &applied(&[]), None);
        assert_eq!(pending, vec![1, 2, 3]);
        assert_eq!(skipped, 0);
    }

    #[test]
    fn test_pending_excludes_applied() {
        let (pending, skipped) = pending_set(&[1, 2, 3], &applied(&[1, 2]), None);
        assert_eq!(pending, vec![3]);
        assert_eq!(skipped, 0);
    }

    #[test]
    fn test_target_filters_and_counts_skipped() {
        let (pending, skipped) = pending_set(&[1, 2, 3, 4], &applied(&[1]), Some(3));
        assert_eq!(pending, vec![2, 3]);
        assert_eq!(skipped, 1);
    }

    #[test]
    fn test_target_below_all_applied_is_empty_not_error() {
        let (pending, skipped) = pending_set(&[1, 2, 3], &applied(&[1, 2, 3]), Some(0));
        assert!(pending.is_empty());
        assert_eq!(skipped, 0);
    }

    #[test]
    fn test_target_equal_to_version_is_inclusive() {
        let (pending, skipped) = pending_set(&[1, 2, 3], &applied(&[]), Some(2));
        assert_eq!(pending, vec![1, 2]);
        assert_eq!(skipped, 1);
    }

    #[test]
    fn test_pending_preserves_ascending_order() {
        let (pending, _) = pending_set(&[1, 2, 5, 9], &applied(&[2]), None);
        assert_eq!(pending, vec![1, 5, 9]);
    }

    #[test]
    fn test_default_options_back_up_and_apply() {
        let options = MigrateOptions::default();
        assert!(options.backup);
        assert!(!options.dry_run);
        assert!(options.target.is_none());
    }
}
