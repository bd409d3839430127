//! Migration file store.
//!
//! Definitions live in one flat directory as `NNN_name.sdbm` files, ascending
//! integer versions. Files whose names don't match the convention, or whose
//! bodies don't parse, are skipped with a warning; they only become fatal
//! when a rollback needs that specific version.

use std::fs;
use std::path::{Path, PathBuf};

use crate::definition::{Registry, ScriptMigration};
use crate::error::MigrateError;

pub const MIGRATION_EXT: &str = "sdbm";

/// Parse migration info from a filename stem.
/// Expected format: NNN_name
pub fn parse_filename(stem: &str) -> Option<(u64, String)> {
    let (version, name) = stem.split_once('_')?;
    if version.is_empty() || !version.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let version: u64 = version.parse().ok()?;
    if name.is_empty() {
        return None;
    }
    Some((version, name.to_string()))
}

pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All parseable definitions, ascending by version. Non-conforming files
    /// are excluded with a warning, never a hard failure.
    pub fn list(&self) -> Result<Vec<ScriptMigration>, MigrateError> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }

        let mut migrations: Vec<ScriptMigration> = Vec::new();

        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .map(|ext| ext == MIGRATION_EXT)
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();

        for path in paths {
            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(s) => s,
                None => continue,
            };
            let (version, name) = match parse_filename(stem) {
                Some(parsed) => parsed,
                None => {
                    eprintln!(
                        "  \x1b[33mWarning:\x1b[0m skipping {} (expected NNN_name.{})",
                        path.display(),
                        MIGRATION_EXT
                    );
                    continue;
                }
            };

            if migrations.iter().any(|m| m.version == version) {
                eprintln!(
                    "  \x1b[33mWarning:\x1b[0m skipping {} (duplicate version {})",
                    path.display(),
                    version
                );
                continue;
            }

            match self.load_parsed(version, &name, &path) {
                Ok(migration) => migrations.push(migration),
                Err(e) => {
                    eprintln!("  \x1b[33mWarning:\x1b[0m skipping malformed migration: {}", e);
                }
            }
        }

        migrations.sort_by_key(|m| m.version);
        Ok(migrations)
    }

    /// Parse one definition file. Fails with `MalformedMigration` when the
    /// body is invalid.
    pub fn load(&self, path: &Path) -> Result<ScriptMigration, MigrateError> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| MigrateError::malformed(path, "unreadable filename"))?;
        let (version, name) = parse_filename(stem)
            .ok_or_else(|| MigrateError::malformed(path, "filename must be NNN_name"))?;
        self.load_parsed(version, &name, path)
    }

    fn load_parsed(
        &self,
        version: u64,
        name: &str,
        path: &Path,
    ) -> Result<ScriptMigration, MigrateError> {
        let source = fs::read(path)?;
        ScriptMigration::parse(version, name, path, &source)
    }

    /// Locate the definition for a specific version. `Ok(None)` means the
    /// file is gone; a present-but-unparseable file is an error here because
    /// callers (rollback) need its `down` body.
    pub fn find(&self, version: u64) -> Result<Option<ScriptMigration>, MigrateError> {
        if !self.dir.exists() {
            return Ok(None);
        }
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path
                .extension()
                .map(|ext| ext != MIGRATION_EXT)
                .unwrap_or(true)
            {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if let Some((v, name)) = parse_filename(stem) {
                    if v == version {
                        return self.load_parsed(version, &name, &path).map(Some);
                    }
                }
            }
        }
        Ok(None)
    }

    /// Next unused version: `max(existing) + 1`, or 1 for an empty store.
    /// Malformed bodies still reserve their version number.
    pub fn next_version(&self) -> Result<u64, MigrateError> {
        if !self.dir.exists() {
            return Ok(1);
        }
        let max = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().map(|e| e == MIGRATION_EXT).unwrap_or(false) {
                    path.file_stem()
                        .and_then(|s| s.to_str())
                        .and_then(parse_filename)
                        .map(|(v, _)| v)
                } else {
                    None
                }
            })
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    /// Generate a new definition file with stub sections and return its path.
    pub fn create(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<PathBuf, MigrateError> {
        fs::create_dir_all(&self.dir)?;

        let version = self.next_version()?;

        // Sanitize name
        let safe_name: String = name
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect();

        let filename = format!("{:03}_{}.{}", version, safe_name, MIGRATION_EXT);
        let filepath = self.dir.join(&filename);

        let description_line = match description {
            Some(d) => format!("description = \"{}\"\n\n", d.replace('"', "'")),
            None => String::new(),
        };

        let template = format!(
            r#"# Migration: {}
# Created: {}

{}[up]
# create_collection users
# create_index users idx_email email unique
# create_index users idx_name first_name,last_name sparse
# query INSERT {{ name: "value" }} INTO users

# [validate]
# check RETURN LENGTH(FOR c IN users RETURN c) == 0

[down]
# Reverse the changes made in [up]
# drop_index users idx_email
# drop_collection users
"#,
            name,
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            description_line
        );

        fs::write(&filepath, template)?;

        Ok(filepath)
    }

    /// Build the version-keyed registry from this directory.
    pub fn registry(&self) -> Result<Registry, MigrateError> {
        let mut registry = Registry::new();
        for migration in self.list()? {
            let version = migration.version;
            registry.register(version, Box::new(migration))?;
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::MigrationUnit;
    use pretty_assertions::assert_eq;

    fn write_migration(dir: &Path, filename: &str, body: &str) {
        fs::write(dir.join(filename), body).unwrap();
    }

    const VALID_BODY: &str = "[up]\ncreate_collection users\n[down]\ndrop_collection users\n";

    #[test]
    fn test_parse_filename() {
        assert_eq!(
            parse_filename("001_create_users"),
            Some((1, "create_users".to_string()))
        );
        assert_eq!(
            parse_filename("042_add_email_index"),
            Some((42, "add_email_index".to_string()))
        );
        assert_eq!(parse_filename("create_users"), None);
        assert_eq!(parse_filename("abc_create_users"), None);
        assert_eq!(parse_filename("001_"), None);
        assert_eq!(parse_filename("_users"), None);
    }

    #[test]
    fn test_list_empty_when_dir_missing() {
        let store = FileStore::new("/nonexistent/migrations");
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_list_sorted_by_version() {
        let tmp = tempfile::tempdir().unwrap();
        write_migration(tmp.path(), "010_third.sdbm", VALID_BODY);
        write_migration(tmp.path(), "002_second.sdbm", VALID_BODY);
        write_migration(tmp.path(), "001_first.sdbm", VALID_BODY);

        let store = FileStore::new(tmp.path());
        let versions: Vec<u64> = store.list().unwrap().iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 2, 10]);
    }

    #[test]
    fn test_list_skips_malformed_and_misnamed() {
        let tmp = tempfile::tempdir().unwrap();
        write_migration(tmp.path(), "001_good.sdbm", VALID_BODY);
        write_migration(tmp.path(), "002_broken.sdbm", "[up]\nno down section\n");
        write_migration(tmp.path(), "notes.sdbm", "not a migration");
        write_migration(tmp.path(), "003_other.txt", "wrong extension");

        let store = FileStore::new(tmp.path());
        let migrations = store.list().unwrap();
        assert_eq!(migrations.len(), 1);
        assert_eq!(migrations[0].version, 1);
    }

    #[test]
    fn test_find_present_and_absent() {
        let tmp = tempfile::tempdir().unwrap();
        write_migration(tmp.path(), "001_first.sdbm", VALID_BODY);

        let store = FileStore::new(tmp.path());
        assert!(store.find(1).unwrap().is_some());
        assert!(store.find(2).unwrap().is_none());
    }

    #[test]
    fn test_find_malformed_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        write_migration(tmp.path(), "001_bad.sdbm", "[up]\n");

        let store = FileStore::new(tmp.path());
        assert!(store.find(1).is_err());
    }

    #[test]
    fn test_create_assigns_next_version() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::new(tmp.path());

        let first = store.create("create users", None).unwrap();
        assert!(first.to_string_lossy().ends_with("001_create_users.sdbm"));

        let second = store.create("add-email!", Some("adds the email index")).unwrap();
        assert!(second.to_string_lossy().ends_with("002_add_email_.sdbm"));

        assert_eq!(store.next_version().unwrap(), 3);
    }

    #[test]
    fn test_created_scaffold_parses() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::new(tmp.path());

        let path = store.create("seed_roles", Some("seed default roles")).unwrap();
        let migration = store.load(&path).unwrap();
        assert_eq!(migration.version, 1);
        assert_eq!(migration.name, "seed_roles");
        assert_eq!(migration.description(), Some("seed default roles"));
        assert!(migration.up_directives().is_empty());
        assert!(migration.down_directives().is_empty());
    }

    #[test]
    fn test_create_after_gap_uses_max_plus_one() {
        let tmp = tempfile::tempdir().unwrap();
        write_migration(tmp.path(), "007_seven.sdbm", VALID_BODY);

        let store = FileStore::new(tmp.path());
        let path = store.create("eight", None).unwrap();
        assert!(path.to_string_lossy().ends_with("008_eight.sdbm"));
    }

    #[test]
    fn test_registry_from_directory() {
        let tmp = tempfile::tempdir().unwrap();
        write_migration(tmp.path(), "001_a.sdbm", VALID_BODY);
        write_migration(tmp.path(), "002_b.sdbm", VALID_BODY);

        let store = FileStore::new(tmp.path());
        let registry = store.registry().unwrap();
        assert_eq!(registry.versions(), vec![1, 2]);
    }

    #[test]
    fn test_checksum_tracks_file_content() {
        let tmp = tempfile::tempdir().unwrap();
        write_migration(tmp.path(), "001_a.sdbm", VALID_BODY);

        let store = FileStore::new(tmp.path());
        let before = crate::definition::checksum(store.find(1).unwrap().unwrap().source());

        write_migration(
            tmp.path(),
            "001_a.sdbm",
            "[up]\ncreate_collection accounts\n[down]\ndrop_collection accounts\n",
        );
        let after = crate::definition::checksum(store.find(1).unwrap().unwrap().source());
        assert_ne!(before, after);
    }
}
