//! Connection and engine configuration.
//!
//! Loaded from `.env` files and environment variables, with the same
//! precedence as the rest of the Soli tooling: the base `.env` first, then
//! `.env.{APP_ENV}` overriding it, and real environment variables winning
//! over both.

use std::fs;
use std::path::{Path, PathBuf};

/// Load a single .env file, setting variables that aren't already set
fn load_single_env_file(path: &Path) {
    if let Ok(content) = fs::read_to_string(path) {
        for line in content.lines() {
            let line = line.trim();
            // Skip comments and empty lines
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim();
                // Remove quotes if present
                let value = value.trim_matches('"').trim_matches('\'');
                // Only set if not already set in environment
                if std::env::var(key).is_err() {
                    std::env::set_var(key, value);
                }
            }
        }
    }
}

/// Load environment variables from .env files
///
/// Loading order:
/// 1. Load base `.env` file first
/// 2. If `APP_ENV` is set, load `.env.{APP_ENV}` to override values
fn load_env_file(app_path: &Path) {
    let env_file = app_path.join(".env");
    if env_file.exists() {
        load_single_env_file(&env_file);
    }

    if let Ok(app_env) = std::env::var("APP_ENV") {
        let env_specific = app_path.join(format!(".env.{}", app_env));
        if env_specific.exists() {
            load_single_env_file(&env_specific);
        }
    }
}

/// Configuration for database connection
#[derive(Clone)]
pub struct DbConfig {
    pub host: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl DbConfig {
    pub fn new(host: &str, database: &str) -> Self {
        Self {
            host: host.to_string(),
            database: database.to_string(),
            username: None,
            password: None,
        }
    }

    pub fn with_auth(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }
}

/// Full engine configuration: connection plus directories and backup policy.
#[derive(Clone)]
pub struct MigrateConfig {
    pub db: DbConfig,
    /// Directory holding `NNN_name.sdbm` definition files.
    pub migrations_dir: PathBuf,
    /// Directory snapshot artifacts are written to.
    pub backup_dir: PathBuf,
    /// When false, forward migrations run without a pre-migration snapshot.
    pub backup_enabled: bool,
    /// Gzip snapshot artifacts after writing them.
    pub compress_backups: bool,
    /// Snapshots older than this many days are removed by `cleanup`.
    pub retention_days: u32,
    /// Optional webhook fatal-failure events are POSTed to.
    pub webhook_url: Option<String>,
}

impl MigrateConfig {
    pub fn new(db: DbConfig, app_path: &Path) -> Self {
        Self {
            db,
            migrations_dir: app_path.join("db/migrations"),
            backup_dir: app_path.join("db/backups"),
            backup_enabled: true,
            compress_backups: true,
            retention_days: 14,
            webhook_url: None,
        }
    }

    /// Load config from .env files and environment variables.
    pub fn from_env(app_path: &Path) -> Self {
        // Load .env files first (won't override existing env vars)
        load_env_file(app_path);

        let host =
            std::env::var("SOLIDB_HOST").unwrap_or_else(|_| "http://localhost:6745".to_string());
        let database = std::env::var("SOLIDB_DATABASE").unwrap_or_else(|_| "default".to_string());
        let username = std::env::var("SOLIDB_USERNAME").ok();
        let password = std::env::var("SOLIDB_PASSWORD").ok();

        let mut db = DbConfig::new(&host, &database);
        if let (Some(u), Some(p)) = (username, password) {
            db = db.with_auth(&u, &p);
        }

        let mut config = Self::new(db, app_path);

        if let Ok(dir) = std::env::var("SOLIDB_MIGRATIONS_DIR") {
            config.migrations_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("SOLIDB_BACKUP_DIR") {
            config.backup_dir = PathBuf::from(dir);
        }
        if let Ok(days) = std::env::var("SOLIDB_BACKUP_RETENTION_DAYS") {
            if let Ok(days) = days.parse() {
                config.retention_days = days;
            }
        }
        config.webhook_url = std::env::var("SOLIDB_MIGRATE_WEBHOOK").ok();

        config
    }

    pub fn with_backup_enabled(mut self, enabled: bool) -> Self {
        self.backup_enabled = enabled;
        self
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress_backups = compress;
        self
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }
}
