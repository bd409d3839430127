//! solidb-migrate: versioned schema-migration engine for SoliDB.
//!
//! Applies, tracks, rolls back, backs up, and validates incremental changes
//! to a SoliDB database. Definitions live as `NNN_name.sdbm` files; applied
//! history lives in the `_migrations` collection of the same database; runs
//! are serialized by a single lock document.
//!
//! # Anatomy of a run
//!
//! ```text
//! acquire lock -> compute pending set -> for each pending migration:
//!     validate -> snapshot -> up (transactional) -> record ledger entry
//! -> release lock
//! ```
//!
//! The lock is released on every exit path; a failure aborts the run but
//! leaves the already-applied prefix committed and recorded.

pub mod backup;
pub mod config;
pub mod definition;
pub mod error;
pub mod executor;
pub mod files;
pub mod integrity;
pub mod ledger;
pub mod lock;
pub mod notify;
pub mod rollback;
pub mod status;
pub mod store;

pub use config::{DbConfig, MigrateConfig};
pub use error::MigrateError;
pub use executor::{Executor, MigrateOptions, MigrateOutcome};
pub use rollback::{RollbackEngine, RollbackOptions, RollbackTarget};
pub use store::StoreClient;
