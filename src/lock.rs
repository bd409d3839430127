//! Migration run lock.
//!
//! A single document with a fixed key in the `_migration_lock` collection;
//! its existence means a run is in progress. Acquisition is one atomic
//! insert — a uniqueness conflict means another run is active and surfaces
//! as `LockHeld`, never a blocking wait.
//!
//! This is a single-store mutex relying on the datastore's own atomicity for
//! one document. It is not a distributed consensus lease: a process killed
//! mid-run leaves the document behind, and the remedy is deleting it by hand
//! once the dead run is confirmed gone.

use crate::error::MigrateError;
use crate::store::StoreClient;

pub const LOCK_COLLECTION: &str = "_migration_lock";
pub const LOCK_KEY: &str = "migration_lock";

/// Proof of a held lock. Consumed by `release`, so a lock cannot be released
/// twice from the same acquisition.
#[derive(Debug)]
pub struct LockToken {
    run_id: String,
}

impl LockToken {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

pub struct LockManager<'a> {
    store: &'a StoreClient,
}

impl<'a> LockManager<'a> {
    pub fn new(store: &'a StoreClient) -> Self {
        Self { store }
    }

    /// Insert-if-absent on the fixed lock key. A uniqueness conflict
    /// translates to `LockHeld`; anything else propagates as a store error.
    pub fn acquire(&self, run_id: &str) -> Result<LockToken, MigrateError> {
        self.store.ensure_collection(LOCK_COLLECTION)?;

        let document = serde_json::json!({
            "locked_at": chrono::Utc::now().to_rfc3339(),
            "run_id": run_id,
            "pid": std::process::id(),
            "hostname": std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
        });

        match self.store.insert(LOCK_COLLECTION, Some(LOCK_KEY), document, None) {
            Ok(_) => Ok(LockToken {
                run_id: run_id.to_string(),
            }),
            Err(e) if e.is_conflict() => Err(MigrateError::LockHeld),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the lock document. Idempotent: an already-released lock (404)
    /// is a no-op success.
    pub fn release(&self, _token: LockToken) -> Result<(), MigrateError> {
        match self.store.delete(LOCK_COLLECTION, LOCK_KEY, None) {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
