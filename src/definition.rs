//! Migration definitions: the unit-of-work trait, the script file format,
//! and the version-keyed registry.
//!
//! Definition files are named `NNN_name.sdbm` and contain `[up]` and `[down]`
//! sections (plus an optional `[validate]` section) of directives:
//!
//! ```text
//! description = "create users collection and email index"
//!
//! [up]
//! create_collection users
//! create_index users idx_email email unique
//! query INSERT { role: "admin" } INTO roles
//!
//! [validate]
//! check RETURN LENGTH(FOR c IN roles RETURN c) > 0
//!
//! [down]
//! drop_index users idx_email
//! drop_collection users
//! ```
//!
//! Directives:
//! - `create_collection <name>` / `drop_collection <name>`
//! - `create_index <collection> <name> <field[,field...]> [unique] [sparse]`
//! - `drop_index <collection> <name>`
//! - `query <sdbql>` — raw SDBQL, runs inside the migration's transaction
//! - `check <sdbql>` — `[validate]` only; the first result must be truthy
//!
//! There is no dynamic code loading: file-backed definitions are parsed into
//! data, and embedding callers may register native [`MigrationUnit`]
//! implementations directly.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::MigrateError;
use crate::store::{Session, StoreClient};

fn bytes_to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// SHA-256 hex digest of a definition's source bytes. Stored in the ledger
/// at apply time and used for drift detection afterwards.
pub fn checksum(source: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source);
    bytes_to_hex(&hasher.finalize())
}

/// A versioned unit of forward and reverse schema/data change.
pub trait MigrationUnit {
    fn name(&self) -> &str;

    fn description(&self) -> Option<&str> {
        None
    }

    /// Display/ledger filename; file-backed units return the on-disk name.
    fn filename(&self) -> String {
        self.name().to_string()
    }

    /// Bytes the checksum is computed over.
    fn source(&self) -> &[u8];

    fn up(&self, store: &StoreClient, session: &Session) -> Result<(), MigrateError>;

    fn down(&self, store: &StoreClient, session: &Session) -> Result<(), MigrateError>;

    /// Optional pre-flight check, run before the backup is taken. A failure
    /// aborts the whole run before any write.
    fn validate(&self, _store: &StoreClient) -> Result<(), MigrateError> {
        Ok(())
    }
}

/// One parsed line of an `[up]` or `[down]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    CreateCollection(String),
    DropCollection(String),
    CreateIndex {
        collection: String,
        name: String,
        fields: Vec<String>,
        unique: bool,
        sparse: bool,
    },
    DropIndex {
        collection: String,
        name: String,
    },
    Query(String),
}

impl Directive {
    fn parse(line: &str) -> Result<Self, String> {
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((w, r)) => (w, r.trim()),
            None => (line, ""),
        };

        match word {
            "create_collection" => {
                let name = single_arg(rest, "create_collection")?;
                Ok(Directive::CreateCollection(name))
            }
            "drop_collection" => {
                let name = single_arg(rest, "drop_collection")?;
                Ok(Directive::DropCollection(name))
            }
            "create_index" => {
                let tokens: Vec<&str> = rest.split_whitespace().collect();
                if tokens.len() < 3 {
                    return Err(
                        "create_index needs <collection> <name> <fields> [unique] [sparse]"
                            .to_string(),
                    );
                }
                let mut unique = false;
                let mut sparse = false;
                for flag in &tokens[3..] {
                    match *flag {
                        "unique" => unique = true,
                        "sparse" => sparse = true,
                        other => {
                            return Err(format!("unknown create_index flag '{}'", other));
                        }
                    }
                }
                let fields: Vec<String> = tokens[2]
                    .split(',')
                    .filter(|f| !f.is_empty())
                    .map(|f| f.to_string())
                    .collect();
                if fields.is_empty() {
                    return Err("create_index needs at least one field".to_string());
                }
                Ok(Directive::CreateIndex {
                    collection: tokens[0].to_string(),
                    name: tokens[1].to_string(),
                    fields,
                    unique,
                    sparse,
                })
            }
            "drop_index" => {
                let tokens: Vec<&str> = rest.split_whitespace().collect();
                if tokens.len() != 2 {
                    return Err("drop_index needs <collection> <name>".to_string());
                }
                Ok(Directive::DropIndex {
                    collection: tokens[0].to_string(),
                    name: tokens[1].to_string(),
                })
            }
            "query" => {
                if rest.is_empty() {
                    return Err("query directive needs an SDBQL statement".to_string());
                }
                Ok(Directive::Query(rest.to_string()))
            }
            other => Err(format!("unknown directive '{}'", other)),
        }
    }

    fn run(&self, store: &StoreClient, session: &Session) -> Result<(), MigrateError> {
        match self {
            Directive::CreateCollection(name) => store.create_collection(name)?,
            Directive::DropCollection(name) => store.drop_collection(name)?,
            Directive::CreateIndex {
                collection,
                name,
                fields,
                unique,
                sparse,
            } => {
                store.create_index(collection, name, fields.clone(), *unique, *sparse)?;
            }
            Directive::DropIndex { collection, name } => store.drop_index(collection, name)?,
            Directive::Query(sdbql) => {
                store.query(sdbql, None, Some(session))?;
            }
        }
        Ok(())
    }
}

fn single_arg(rest: &str, directive: &str) -> Result<String, String> {
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    if tokens.len() != 1 {
        return Err(format!("{} needs exactly one argument", directive));
    }
    Ok(tokens[0].to_string())
}

/// A file-backed migration definition.
#[derive(Debug, Clone)]
pub struct ScriptMigration {
    pub version: u64,
    pub name: String,
    pub path: PathBuf,
    description: Option<String>,
    source: Vec<u8>,
    up: Vec<Directive>,
    down: Vec<Directive>,
    checks: Vec<String>,
}

#[derive(PartialEq)]
enum Section {
    None,
    Up,
    Down,
    Validate,
}

impl ScriptMigration {
    /// Parse a definition's source. `[up]` and `[down]` must both be present
    /// (they may be empty); anything else is a `MalformedMigration`.
    pub fn parse(
        version: u64,
        name: &str,
        path: &Path,
        source: &[u8],
    ) -> Result<Self, MigrateError> {
        let text = std::str::from_utf8(source)
            .map_err(|_| MigrateError::malformed(path, "not valid UTF-8"))?;

        let mut description = None;
        let mut up = Vec::new();
        let mut down = Vec::new();
        let mut checks = Vec::new();
        let mut seen_up = false;
        let mut seen_down = false;
        let mut section = Section::None;

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                section = match &line[1..line.len() - 1] {
                    "up" => {
                        seen_up = true;
                        Section::Up
                    }
                    "down" => {
                        seen_down = true;
                        Section::Down
                    }
                    "validate" => Section::Validate,
                    other => {
                        return Err(MigrateError::malformed(
                            path,
                            format!("unknown section [{}] at line {}", other, lineno + 1),
                        ));
                    }
                };
                continue;
            }

            match section {
                Section::None => {
                    // Top-matter: only `description = "..."` is recognized
                    if let Some((key, value)) = line.split_once('=') {
                        if key.trim() == "description" {
                            let value = value.trim().trim_matches('"').trim_matches('\'');
                            description = Some(value.to_string());
                            continue;
                        }
                    }
                    return Err(MigrateError::malformed(
                        path,
                        format!("unexpected line {} before any section", lineno + 1),
                    ));
                }
                Section::Up | Section::Down => {
                    let directive = Directive::parse(line).map_err(|reason| {
                        MigrateError::malformed(
                            path,
                            format!("line {}: {}", lineno + 1, reason),
                        )
                    })?;
                    if section == Section::Up {
                        up.push(directive);
                    } else {
                        down.push(directive);
                    }
                }
                Section::Validate => {
                    let (word, rest) = match line.split_once(char::is_whitespace) {
                        Some((w, r)) => (w, r.trim()),
                        None => (line, ""),
                    };
                    if word != "check" || rest.is_empty() {
                        return Err(MigrateError::malformed(
                            path,
                            format!("line {}: [validate] lines must be 'check <sdbql>'", lineno + 1),
                        ));
                    }
                    checks.push(rest.to_string());
                }
            }
        }

        if !seen_up {
            return Err(MigrateError::malformed(path, "missing [up] section"));
        }
        if !seen_down {
            return Err(MigrateError::malformed(path, "missing [down] section"));
        }

        Ok(Self {
            version,
            name: name.to_string(),
            path: path.to_path_buf(),
            description,
            source: source.to_vec(),
            up,
            down,
            checks,
        })
    }

    /// Full migration name for display
    pub fn full_name(&self) -> String {
        format!("{:03}_{}", self.version, self.name)
    }

    pub fn up_directives(&self) -> &[Directive] {
        &self.up
    }

    pub fn down_directives(&self) -> &[Directive] {
        &self.down
    }
}

fn is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(_) => true,
    }
}

impl MigrationUnit for ScriptMigration {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.full_name())
    }

    fn source(&self) -> &[u8] {
        &self.source
    }

    fn up(&self, store: &StoreClient, session: &Session) -> Result<(), MigrateError> {
        for directive in &self.up {
            directive.run(store, session)?;
        }
        Ok(())
    }

    fn down(&self, store: &StoreClient, session: &Session) -> Result<(), MigrateError> {
        for directive in &self.down {
            directive.run(store, session)?;
        }
        Ok(())
    }

    fn validate(&self, store: &StoreClient) -> Result<(), MigrateError> {
        for check in &self.checks {
            let results = store.query(check, None, None)?;
            let passed = results.first().map(is_truthy).unwrap_or(false);
            if !passed {
                return Err(MigrateError::validation_failed(
                    self.version,
                    format!("check returned falsy result: {}", check),
                ));
            }
        }
        Ok(())
    }
}

/// Migration units keyed by version, iterated in ascending order.
#[derive(Default)]
pub struct Registry {
    units: BTreeMap<u64, Box<dyn MigrationUnit>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        version: u64,
        unit: Box<dyn MigrationUnit>,
    ) -> Result<(), MigrateError> {
        if self.units.contains_key(&version) {
            return Err(MigrateError::config(format!(
                "duplicate migration version {}",
                version
            )));
        }
        self.units.insert(version, unit);
        Ok(())
    }

    pub fn get(&self, version: u64) -> Option<&dyn MigrationUnit> {
        self.units.get(&version).map(|u| u.as_ref())
    }

    pub fn versions(&self) -> Vec<u64> {
        self.units.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
description = "create users collection"

[up]
create_collection users
create_index users idx_email email unique

[validate]
check RETURN 1

[down]
drop_index users idx_email
drop_collection users
"#;

    #[test]
    fn test_parse_full_definition() {
        let m =
            ScriptMigration::parse(1, "create_users", Path::new("001_create_users.sdbm"), SAMPLE.as_bytes())
                .unwrap();
        assert_eq!(m.version, 1);
        assert_eq!(m.name, "create_users");
        assert_eq!(m.description(), Some("create users collection"));
        assert_eq!(m.up_directives().len(), 2);
        assert_eq!(m.down_directives().len(), 2);
        assert_eq!(m.checks.len(), 1);
        assert_eq!(m.full_name(), "001_create_users");
    }

    #[test]
    fn test_parse_index_directive() {
        let m =
            ScriptMigration::parse(1, "x", Path::new("001_x.sdbm"), SAMPLE.as_bytes()).unwrap();
        match &m.up_directives()[1] {
            Directive::CreateIndex {
                collection,
                name,
                fields,
                unique,
                sparse,
            } => {
                assert_eq!(collection, "users");
                assert_eq!(name, "idx_email");
                assert_eq!(fields, &vec!["email".to_string()]);
                assert!(unique);
                assert!(!sparse);
            }
            other => panic!("Expected CreateIndex, got {:?}", other),
        }
    }

    #[test]
    fn test_multi_field_index() {
        let d = Directive::parse("create_index users idx_name first_name,last_name sparse").unwrap();
        match d {
            Directive::CreateIndex { fields, unique, sparse, .. } => {
                assert_eq!(fields, vec!["first_name".to_string(), "last_name".to_string()]);
                assert!(!unique);
                assert!(sparse);
            }
            other => panic!("Expected CreateIndex, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_down_is_malformed() {
        let source = "[up]\ncreate_collection users\n";
        let err =
            ScriptMigration::parse(1, "x", Path::new("001_x.sdbm"), source.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("missing [down] section"));
    }

    #[test]
    fn test_missing_up_is_malformed() {
        let source = "[down]\ndrop_collection users\n";
        let err =
            ScriptMigration::parse(1, "x", Path::new("001_x.sdbm"), source.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("missing [up] section"));
    }

    #[test]
    fn test_unknown_directive_is_malformed() {
        let source = "[up]\nfrobnicate users\n[down]\n";
        let err =
            ScriptMigration::parse(1, "x", Path::new("001_x.sdbm"), source.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("unknown directive 'frobnicate'"));
    }

    #[test]
    fn test_empty_sections_are_allowed() {
        let source = "[up]\n[down]\n";
        let m = ScriptMigration::parse(1, "noop", Path::new("001_noop.sdbm"), source.as_bytes())
            .unwrap();
        assert!(m.up_directives().is_empty());
        assert!(m.down_directives().is_empty());
    }

    #[test]
    fn test_comments_are_ignored() {
        let source = "# header\n[up]\n# create things below\ncreate_collection users\n[down]\ndrop_collection users\n";
        let m = ScriptMigration::parse(1, "x", Path::new("001_x.sdbm"), source.as_bytes()).unwrap();
        assert_eq!(m.up_directives().len(), 1);
    }

    #[test]
    fn test_checksum_is_stable_hex() {
        let a = checksum(b"hello");
        let b = checksum(b"hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_eq!(
            a,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_ne!(checksum(b"hello"), checksum(b"hello "));
    }

    #[test]
    fn test_is_truthy() {
        assert!(is_truthy(&serde_json::json!(true)));
        assert!(is_truthy(&serde_json::json!(1)));
        assert!(is_truthy(&serde_json::json!("x")));
        assert!(!is_truthy(&serde_json::json!(false)));
        assert!(!is_truthy(&serde_json::json!(0)));
        assert!(!is_truthy(&serde_json::json!(null)));
        assert!(!is_truthy(&serde_json::json!("")));
        assert!(!is_truthy(&serde_json::json!([])));
    }

    #[test]
    fn test_registry_orders_by_version() {
        let mut registry = Registry::new();
        for version in [3u64, 1, 2] {
            let source = "[up]\n[down]\n";
            let m = ScriptMigration::parse(
                version,
                "m",
                Path::new("m.sdbm"),
                source.as_bytes(),
            )
            .unwrap();
            registry.register(version, Box::new(m)).unwrap();
        }
        assert_eq!(registry.versions(), vec![1, 2, 3]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_registry_rejects_duplicate_version() {
        let mut registry = Registry::new();
        let source = "[up]\n[down]\n";
        let m = ScriptMigration::parse(1, "a", Path::new("a.sdbm"), source.as_bytes()).unwrap();
        registry.register(1, Box::new(m.clone())).unwrap();
        let err = registry.register(1, Box::new(m)).unwrap_err();
        assert!(err.to_string().contains("duplicate migration version 1"));
    }
}
