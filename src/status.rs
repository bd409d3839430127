//! Migration status reporting.

use crate::definition::{checksum, MigrationUnit, ScriptMigration};
use crate::error::MigrateError;
use crate::files::FileStore;
use crate::ledger::{Ledger, LedgerEntry};
use crate::store::StoreClient;

/// Status of a single migration
#[derive(Debug, Clone)]
pub struct StatusEntry {
    pub version: u64,
    pub name: String,
    pub applied: bool,
    /// Applied, and the on-disk definition no longer hashes to the ledger's
    /// checksum.
    pub drifted: bool,
    /// Applied, but the definition file is gone (orphaned ledger entry).
    pub file_missing: bool,
}

/// Status of all migrations
#[derive(Debug)]
pub struct MigrationStatus {
    pub entries: Vec<StatusEntry>,
    pub applied_count: usize,
    pub pending_count: usize,
}

impl MigrationStatus {
    /// Pure merge of the file store and the ledger.
    pub fn compute(files: &[ScriptMigration], applied: &[LedgerEntry]) -> Self {
        let mut entries: Vec<StatusEntry> = files
            .iter()
            .map(|migration| {
                let ledger_entry = applied.iter().find(|e| e.version == migration.version);
                let drifted = ledger_entry
                    .map(|e| checksum(migration.source()) != e.checksum)
                    .unwrap_or(false);
                StatusEntry {
                    version: migration.version,
                    name: migration.name.clone(),
                    applied: ledger_entry.is_some(),
                    drifted,
                    file_missing: false,
                }
            })
            .collect();

        // Orphaned ledger entries still show up, flagged
        for entry in applied {
            if !files.iter().any(|m| m.version == entry.version) {
                entries.push(StatusEntry {
                    version: entry.version,
                    name: entry.filename.clone(),
                    applied: true,
                    drifted: false,
                    file_missing: true,
                });
            }
        }

        entries.sort_by_key(|e| e.version);

        let applied_count = entries.iter().filter(|e| e.applied).count();
        let pending_count = entries.iter().filter(|e| !e.applied).count();

        Self {
            entries,
            applied_count,
            pending_count,
        }
    }

    pub fn collect(store: &StoreClient, files: &FileStore) -> Result<Self, MigrateError> {
        let ledger = Ledger::new(store);
        Ok(Self::compute(&files.list()?, &ledger.applied()?))
    }
}

/// Print migration status in a nice format
pub fn print_status(status: &MigrationStatus) {
    println!();
    println!("  \x1b[1mDatabase Migrations\x1b[0m");
    println!();

    if status.entries.is_empty() {
        println!("  No migrations found.");
        println!();
        println!("  Create one with: \x1b[36msolidb-migrate create <name>\x1b[0m");
        println!();
        return;
    }

    println!("  {:7}  {:30}  {:10}", "Version", "Name", "Status");
    println!("  {:-<7}  {:-<30}  {:-<10}", "", "", "");

    for entry in &status.entries {
        let status_str = if entry.applied {
            "\x1b[32m   up   \x1b[0m"
        } else {
            "\x1b[33m  down  \x1b[0m"
        };

        let mut note = String::new();
        if entry.file_missing {
            note.push_str("  \x1b[31m(file missing)\x1b[0m");
        }
        if entry.drifted {
            note.push_str("  \x1b[33m(drifted)\x1b[0m");
        }

        println!(
            "  {:<7}  {:30}  {}{}",
            entry.version, entry.name, status_str, note
        );
    }

    println!();
    println!(
        "  \x1b[32m{}\x1b[0m applied, \x1b[33m{}\x1b[0m pending",
        status.applied_count, status.pending_count
    );
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    const BODY: &str = "[up]\ncreate_collection users\n[down]\ndrop_collection users\n";

    fn migration(version: u64, name: &str) -> ScriptMigration {
        ScriptMigration::parse(version, name, Path::new("m.sdbm"), BODY.as_bytes()).unwrap()
    }

    fn entry(version: u64, checksum: &str) -> LedgerEntry {
        LedgerEntry {
            version,
            filename: format!("{:03}_old.sdbm", version),
            description: None,
            applied_at: "2026-08-06T10:00:00+00:00".to_string(),
            duration_ms: 1,
            backup_path: None,
            checksum: checksum.to_string(),
        }
    }

    #[test]
    fn test_counts_applied_and_pending() {
        let files = vec![migration(1, "a"), migration(2, "b"), migration(3, "c")];
        let digest = checksum(BODY.as_bytes());
        let applied = vec![entry(1, &digest)];

        let status = MigrationStatus::compute(&files, &applied);
        assert_eq!(status.applied_count, 1);
        assert_eq!(status.pending_count, 2);
        assert!(status.entries[0].applied);
        assert!(!status.entries[0].drifted);
        assert!(!status.entries[1].applied);
    }

    #[test]
    fn test_drift_flagged() {
        let files = vec![migration(1, "a")];
        let applied = vec![entry(1, "stale-checksum")];

        let status = MigrationStatus::compute(&files, &applied);
        assert!(status.entries[0].applied);
        assert!(status.entries[0].drifted);
    }

    #[test]
    fn test_orphaned_entry_flagged_and_sorted() {
        let files = vec![migration(2, "b")];
        let applied = vec![entry(1, "x")];

        let status = MigrationStatus::compute(&files, &applied);
        assert_eq!(status.entries.len(), 2);
        assert_eq!(status.entries[0].version, 1);
        assert!(status.entries[0].file_missing);
        assert!(status.entries[0].applied);
        assert_eq!(status.entries[1].version, 2);
        assert!(!status.entries[1].applied);
        assert_eq!(status.applied_count, 1);
        assert_eq!(status.pending_count, 1);
    }

    #[test]
    fn test_empty_store_and_ledger() {
        let status = MigrationStatus::compute(&[], &[]);
        assert!(status.entries.is_empty());
        assert_eq!(status.applied_count, 0);
        assert_eq!(status.pending_count, 0);
    }
}
