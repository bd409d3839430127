//! Pre-migration snapshots.
//!
//! Before each forward migration every non-system collection is serialized —
//! documents, index definitions and counts — into a single JSON artifact,
//! optionally gzipped. The artifact is for manual disaster recovery; nothing
//! in this engine reads it back. Snapshot failure aborts the run unless
//! backups were explicitly disabled.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;

use crate::config::MigrateConfig;
use crate::error::MigrateError;
use crate::store::StoreClient;

const PAGE_SIZE: i64 = 500;
const STAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Deterministic artifact name from version + creation time.
pub fn backup_filename(version: u64, stamp: &str, compressed: bool) -> String {
    let suffix = if compressed { ".json.gz" } else { ".json" };
    format!("backup_{}_v{}{}", stamp, version, suffix)
}

/// Recover (creation time, version) from an artifact name. Anything that
/// doesn't match the convention is not ours to touch.
pub fn parse_backup_filename(name: &str) -> Option<(NaiveDateTime, u64)> {
    let rest = name.strip_prefix("backup_")?;
    let rest = rest
        .strip_suffix(".json.gz")
        .or_else(|| rest.strip_suffix(".json"))?;
    let (stamp, version) = rest.split_once("_v")?;
    let timestamp = NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).ok()?;
    let version: u64 = version.parse().ok()?;
    Some((timestamp, version))
}

pub struct BackupService<'a> {
    store: &'a StoreClient,
    dir: PathBuf,
    compress: bool,
    retention_days: u32,
}

impl<'a> BackupService<'a> {
    pub fn new(store: &'a StoreClient, config: &MigrateConfig) -> Self {
        Self {
            store,
            dir: config.backup_dir.clone(),
            compress: config.compress_backups,
            retention_days: config.retention_days,
        }
    }

    /// Serialize every non-system collection into one artifact and return
    /// its path. `prior_to_version` is the migration about to run.
    pub fn snapshot(&self, prior_to_version: u64) -> Result<PathBuf, MigrateError> {
        self.write_snapshot(prior_to_version)
            .map_err(MigrateError::backup_failed)
    }

    fn write_snapshot(&self, version: u64) -> Result<PathBuf, String> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| format!("cannot create {}: {}", self.dir.display(), e))?;

        let names: Vec<String> = self
            .store
            .collection_names()
            .map_err(|e| format!("cannot list collections: {}", e))?
            .into_iter()
            .filter(|name| !name.starts_with('_'))
            .collect();

        let mut collections = serde_json::Map::new();
        for name in names {
            collections.insert(name.clone(), self.dump_collection(&name)?);
        }

        let payload = serde_json::json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": version,
            "collections": collections,
        });

        let stamp = chrono::Local::now().format(STAMP_FORMAT).to_string();
        let plain_path = self.dir.join(backup_filename(version, &stamp, false));

        let file = File::create(&plain_path)
            .map_err(|e| format!("cannot create {}: {}", plain_path.display(), e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &payload)
            .map_err(|e| format!("cannot serialize snapshot: {}", e))?;
        writer
            .flush()
            .map_err(|e| format!("cannot write {}: {}", plain_path.display(), e))?;

        if self.compress {
            let gz_path = compress_file(&plain_path)
                .map_err(|e| format!("cannot compress {}: {}", plain_path.display(), e))?;
            // The intermediate goes only once the .gz is fully on disk
            fs::remove_file(&plain_path)
                .map_err(|e| format!("cannot remove {}: {}", plain_path.display(), e))?;
            Ok(gz_path)
        } else {
            Ok(plain_path)
        }
    }

    fn dump_collection(&self, name: &str) -> Result<Value, String> {
        let mut documents: Vec<Value> = Vec::new();
        let mut offset = 0;
        loop {
            let page = self
                .store
                .list(name, PAGE_SIZE, offset)
                .map_err(|e| format!("cannot read {}: {}", name, e))?;
            let page_len = page.len() as i64;
            documents.extend(page);
            if page_len < PAGE_SIZE {
                break;
            }
            offset += page_len;
        }

        let indexes = self
            .store
            .list_indexes(name)
            .map_err(|e| format!("cannot list indexes of {}: {}", name, e))?;

        let count = self
            .store
            .collection_stats(name)
            .ok()
            .and_then(|stats| stats.get("count").and_then(|c| c.as_u64()))
            .unwrap_or(documents.len() as u64);

        Ok(serde_json::json!({
            "documents": documents,
            "indexes": indexes,
            "count": count,
        }))
    }

    /// Delete artifacts older than the retention window, by the creation
    /// time embedded in the filename. The most recent artifact survives
    /// regardless of age. Returns what was removed.
    pub fn cleanup(&self) -> Result<Vec<PathBuf>, MigrateError> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }

        let mut artifacts: Vec<(NaiveDateTime, PathBuf)> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let path = entry.path();
                let name = path.file_name()?.to_str()?;
                let (timestamp, _) = parse_backup_filename(name)?;
                Some((timestamp, path))
            })
            .collect();

        // Newest first; index 0 is never deleted
        artifacts.sort_by(|a, b| b.0.cmp(&a.0));

        let cutoff =
            chrono::Local::now().naive_local() - chrono::Duration::days(self.retention_days as i64);

        let mut removed = Vec::new();
        for (timestamp, path) in artifacts.into_iter().skip(1) {
            if timestamp < cutoff {
                fs::remove_file(&path)?;
                removed.push(path);
            }
        }
        Ok(removed)
    }
}

fn compress_file(plain: &Path) -> io::Result<PathBuf> {
    let gz_path = PathBuf::from(format!("{}.gz", plain.display()));
    let input = File::open(plain)?;
    let output = File::create(&gz_path)?;
    let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::default());
    io::copy(&mut BufReader::new(input), &mut encoder)?;
    encoder.finish()?.flush()?;
    Ok(gz_path)
}
