//! Error types for the migration engine.
//!
//! Every error that aborts a run is surfaced through [`MigrateError`]; the
//! lock is always released before one of these reaches the caller.

use std::path::PathBuf;

use thiserror::Error;

use crate::store::StoreError;

/// Direction a migration body runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// Fatal and recoverable failures of the migration engine.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// Another run holds the migration lock. Never retried automatically.
    #[error("another migration run is active (lock is held)")]
    LockHeld,

    /// A pre-flight check rejected the run before any write happened.
    #[error("validation failed for migration {version}: {reason}")]
    ValidationFailed { version: u64, reason: String },

    /// An `up` or `down` body failed. Earlier migrations of the same run
    /// stay committed; the ledger reflects exactly what was applied.
    #[error("migration {version} failed during {direction}: {reason}")]
    ExecutionFailed {
        version: u64,
        direction: Direction,
        reason: String,
    },

    /// A ledger entry exists but its definition file is gone.
    #[error("no definition file found for applied migration {version}")]
    DefinitionMissing { version: u64 },

    /// The pre-migration snapshot could not be written.
    #[error("backup failed: {0}")]
    BackupFailed(String),

    /// A definition file could not be parsed into up/down bodies.
    #[error("malformed migration {}: {reason}", .path.display())]
    MalformedMigration { path: PathBuf, reason: String },

    /// Datastore-level failure (connection, HTTP, server error).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Filesystem failure outside the backup path.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Invalid configuration or CLI input.
    #[error("{0}")]
    Config(String),
}

impl MigrateError {
    pub fn validation_failed(version: u64, reason: impl Into<String>) -> Self {
        Self::ValidationFailed {
            version,
            reason: reason.into(),
        }
    }

    pub fn execution_failed(
        version: u64,
        direction: Direction,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::ExecutionFailed {
            version,
            direction,
            reason: reason.to_string(),
        }
    }

    pub fn definition_missing(version: u64) -> Self {
        Self::DefinitionMissing { version }
    }

    pub fn backup_failed(reason: impl std::fmt::Display) -> Self {
        Self::BackupFailed(reason.to_string())
    }

    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MalformedMigration {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    /// Short machine-readable tag used in failure notifications.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LockHeld => "lock_held",
            Self::ValidationFailed { .. } => "validation_failed",
            Self::ExecutionFailed { .. } => "migration_execution_failed",
            Self::DefinitionMissing { .. } => "definition_missing",
            Self::BackupFailed(_) => "backup_failed",
            Self::MalformedMigration { .. } => "malformed_migration",
            Self::Store(_) => "store_error",
            Self::Io(_) => "io_error",
            Self::Config(_) => "config_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_held_display() {
        let err = MigrateError::LockHeld;
        assert_eq!(
            err.to_string(),
            "another migration run is active (lock is held)"
        );
        assert_eq!(err.kind(), "lock_held");
    }

    #[test]
    fn test_execution_failed_display() {
        let err = MigrateError::execution_failed(7, Direction::Down, "boom");
        assert_eq!(err.to_string(), "migration 7 failed during down: boom");
        assert_eq!(err.kind(), "migration_execution_failed");
    }

    #[test]
    fn test_malformed_includes_path() {
        let err = MigrateError::malformed("db/migrations/003_bad.sdbm", "missing [up] section");
        assert!(err.to_string().contains("003_bad.sdbm"));
        assert!(err.to_string().contains("missing [up] section"));
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::Up.to_string(), "up");
        assert_eq!(Direction::Down.to_string(), "down");
    }
}
