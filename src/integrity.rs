//! Integrity validation and repair.
//!
//! `validate` is read-only: per-collection structural checks from the store,
//! background-built indexes surfaced as informational warnings, and two
//! engine-level checks against the ledger — orphaned entries (applied
//! version with no definition file) and checksum drift (definition changed
//! after it was applied). `repair` runs the store-level repair command; it
//! is destructive and blocking and is never invoked by migrate or rollback.

use serde_json::Value;

use crate::definition::{checksum, MigrationUnit, ScriptMigration};
use crate::error::MigrateError;
use crate::files::FileStore;
use crate::ledger::{Ledger, LedgerEntry};
use crate::store::StoreClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Worth surfacing, not worth failing on.
    Warning,
    /// A real inconsistency; the report is marked invalid.
    Error,
}

#[derive(Debug, Clone)]
pub struct Issue {
    pub severity: Severity,
    pub collection: Option<String>,
    pub message: String,
}

impl Issue {
    fn warning(collection: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            collection: collection.map(|c| c.to_string()),
            message: message.into(),
        }
    }

    fn error(collection: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            collection: collection.map(|c| c.to_string()),
            message: message.into(),
        }
    }
}

#[derive(Debug)]
pub struct IntegrityReport {
    pub valid: bool,
    pub issues: Vec<Issue>,
}

/// Engine-level findings: ledger entries against the definition files.
pub fn ledger_findings(entries: &[LedgerEntry], files: &[ScriptMigration]) -> Vec<Issue> {
    let mut issues = Vec::new();
    for entry in entries {
        match files.iter().find(|m| m.version == entry.version) {
            None => {
                issues.push(Issue::error(
                    None,
                    format!(
                        "applied migration {} ({}) has no definition file",
                        entry.version, entry.filename
                    ),
                ));
            }
            Some(migration) => {
                if checksum(migration.source()) != entry.checksum {
                    issues.push(Issue::warning(
                        None,
                        format!(
                            "definition of applied migration {} changed after it was applied (checksum drift)",
                            entry.version
                        ),
                    ));
                }
            }
        }
    }
    issues
}

/// Informational warnings for indexes created with a background build.
pub fn index_warnings(collection: &str, indexes: &[Value]) -> Vec<Issue> {
    indexes
        .iter()
        .filter(|index| {
            index
                .get("background")
                .and_then(|b| b.as_bool())
                .unwrap_or(false)
        })
        .map(|index| {
            let name = index
                .get("name")
                .and_then(|n| n.as_str())
                .unwrap_or("<unnamed>");
            Issue::warning(
                Some(collection),
                format!("index '{}' was built in the background", name),
            )
        })
        .collect()
}

pub struct IntegrityChecker<'a> {
    store: &'a StoreClient,
    files: &'a FileStore,
}

impl<'a> IntegrityChecker<'a> {
    pub fn new(store: &'a StoreClient, files: &'a FileStore) -> Self {
        Self { store, files }
    }

    /// Read-only pass over every collection plus the engine-level checks.
    pub fn validate(&self) -> Result<IntegrityReport, MigrateError> {
        let mut issues = Vec::new();

        for name in self.store.collection_names()? {
            let report = self.store.validate_collection(&name)?;
            let valid = report.get("valid").and_then(|v| v.as_bool()).unwrap_or(true);
            if !valid {
                let errors = report
                    .get("errors")
                    .and_then(|e| e.as_array())
                    .cloned()
                    .unwrap_or_default();
                if errors.is_empty() {
                    issues.push(Issue::error(Some(name.as_str()), "collection failed validation"));
                }
                for error in errors {
                    let message = error
                        .as_str()
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| error.to_string());
                    issues.push(Issue::error(Some(name.as_str()), message));
                }
            }

            issues.extend(index_warnings(&name, &self.store.list_indexes(&name)?));
        }

        let ledger = Ledger::new(self.store);
        issues.extend(ledger_findings(&ledger.applied()?, &self.files.list()?));

        let valid = !issues.iter().any(|i| i.severity == Severity::Error);
        Ok(IntegrityReport { valid, issues })
    }

    /// Store-level repair. Destructive; caller confirms intent.
    pub fn repair(&self) -> Result<Value, MigrateError> {
        Ok(self.store.repair_database()?)
    }
}

/// Render a report the way `status` renders its table.
pub fn print_report(report: &IntegrityReport) {
    println!();
    if report.issues.is_empty() {
        println!("  \x1b[32mAll collections valid\x1b[0m");
        println!();
        return;
    }

    for issue in &report.issues {
        let tag = match issue.severity {
            Severity::Warning => "\x1b[33mwarning\x1b[0m",
            Severity::Error => "\x1b[31m  error\x1b[0m",
        };
        match &issue.collection {
            Some(collection) => println!("  {}  [{}] {}", tag, collection, issue.message),
            None => println!("  {}  {}", tag, issue.message),
        }
    }

    println!();
    if report.valid {
        println!("  \x1b[32mValid\x1b[0m (warnings only)");
    } else {
        println!("  \x1b[31mInvalid\x1b[0m");
    }
    println!();
}
