//! Applied-migration ledger.
//!
//! One document per applied version in the `_migrations` collection, keyed by
//! the decimal version. The ledger is the source of truth for "what has run";
//! it is mutated only by this engine — the surrounding application must never
//! touch it.

use serde::{Deserialize, Serialize};

use crate::error::MigrateError;
use crate::store::StoreClient;

pub const LEDGER_COLLECTION: &str = "_migrations";

/// One row of applied history. Created exactly once per successful forward
/// application, deleted exactly once on successful rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub version: u64,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// RFC 3339, UTC.
    pub applied_at: String,
    pub duration_ms: u64,
    /// Absent when the run was started with backups disabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<String>,
    /// SHA-256 hex of the definition source at apply time.
    pub checksum: String,
}

pub struct Ledger<'a> {
    store: &'a StoreClient,
}

impl<'a> Ledger<'a> {
    pub fn new(store: &'a StoreClient) -> Self {
        Self { store }
    }

    /// All applied entries, ascending by version. Creates the ledger
    /// collection on first contact.
    pub fn applied(&self) -> Result<Vec<LedgerEntry>, MigrateError> {
        self.store.ensure_collection(LEDGER_COLLECTION)?;

        let query = format!("FOR m IN {} SORT m.version ASC RETURN m", LEDGER_COLLECTION);
        let rows = self.store.query(&query, None, None)?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let entry: LedgerEntry = serde_json::from_value(row).map_err(|e| {
                MigrateError::config(format!(
                    "unreadable ledger entry (was {} tampered with?): {}",
                    LEDGER_COLLECTION, e
                ))
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }

    pub fn applied_versions(&self) -> Result<Vec<u64>, MigrateError> {
        Ok(self.applied()?.iter().map(|e| e.version).collect())
    }

    /// Record a migration as applied.
    pub fn record(&self, entry: &LedgerEntry) -> Result<(), MigrateError> {
        let key = entry.version.to_string();
        let doc = serde_json::to_value(entry)
            .map_err(|e| MigrateError::config(format!("unserializable ledger entry: {}", e)))?;
        self.store
            .insert(LEDGER_COLLECTION, Some(&key), doc, None)?;
        Ok(())
    }

    /// Remove a migration record after its rollback committed.
    pub fn remove(&self, version: u64) -> Result<(), MigrateError> {
        self.store
            .delete(LEDGER_COLLECTION, &version.to_string(), None)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_entry() -> LedgerEntry {
        LedgerEntry {
            version: 3,
            filename: "003_seed_roles.sdbm".to_string(),
            description: Some("seed default roles".to_string()),
            applied_at: "2026-08-06T10:00:00+00:00".to_string(),
            duration_ms: 120,
            backup_path: Some("db/backups/backup_20260806100000_v3.json.gz".to_string()),
            checksum: "ab".repeat(32),
        }
    }

    #[test]
    fn test_entry_roundtrip() {
        let entry = sample_entry();
        let value = serde_json::to_value(&entry).unwrap();
        let back: LedgerEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back.version, entry.version);
        assert_eq!(back.filename, entry.filename);
        assert_eq!(back.checksum, entry.checksum);
        assert_eq!(back.backup_path, entry.backup_path);
    }

    #[test]
    fn test_entry_without_backup_or_description() {
        let json = serde_json::json!({
            "version": 1,
            "filename": "001_init.sdbm",
            "applied_at": "2026-08-06T10:00:00+00:00",
            "duration_ms": 5,
            "checksum": "00"
        });
        let entry: LedgerEntry = serde_json::from_value(json).unwrap();
        assert_eq!(entry.version, 1);
        assert!(entry.backup_path.is_none());
        assert!(entry.description.is_none());
    }

    #[test]
    fn test_serialized_entry_omits_empty_options() {
        let mut entry = sample_entry();
        entry.backup_path = None;
        entry.description = None;
        let value = serde_json::to_value(&entry).unwrap();
        assert!(value.get("backup_path").is_none());
        assert!(value.get("description").is_none());
    }

    #[test]
    fn test_tampered_row_is_rejected() {
        let json = serde_json::json!({ "version": "not-a-number" });
        assert!(serde_json::from_value::<LedgerEntry>(json).is_err());
    }
}
