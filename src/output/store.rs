//! Snapshot storage: one JSON blob per recorded request.
//!
//! Keys look like `snapshot_20240101_120000_123456_1a2b3c4d`: a UTC
//! timestamp down to the microsecond, then a random suffix. Keys issued by
//! one process are strictly increasing, so lexical order is recording order
//! and retention removes the oldest blobs.

use crate::report::schema::SnapshotEnvelope;
use crate::utils::config::{SCHEMA_VERSION, SNAPSHOT_PREFIX};
use crate::utils::error::StoreError;
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Key-value blob store for persisted snapshots
pub trait SnapshotStore: Send {
    fn put(&mut self, key: &str, envelope: &SnapshotEnvelope) -> Result<(), StoreError>;

    fn get(&self, key: &str) -> Result<SnapshotEnvelope, StoreError>;

    /// All keys, oldest first
    fn keys(&self) -> Result<Vec<String>, StoreError>;

    fn remove(&mut self, key: &str) -> Result<(), StoreError>;
}

/// Accept `snapshot_x` as well as the file name `snapshot_x.json`
pub fn normalize_key(key: &str) -> Result<String, StoreError> {
    let key = key.trim();
    let key = key.strip_suffix(".json").unwrap_or(key);

    if key.is_empty()
        || key.contains(|c| c == '/' || c == '\\')
        || key.contains("..")
        || !key.starts_with(SNAPSHOT_PREFIX)
    {
        return Err(StoreError::InvalidKey(key.to_string()));
    }

    Ok(key.to_string())
}

/// Last microsecond timestamp handed out by [`next_key_time`]
static LAST_KEY_MICROS: AtomicI64 = AtomicI64::new(i64::MIN);

/// Key for a snapshot recorded at `at`
pub fn snapshot_key(at: DateTime<Utc>) -> String {
    format!(
        "{}{}_{:08x}",
        SNAPSHOT_PREFIX,
        at.format("%Y%m%d_%H%M%S_%6f"),
        rand::random::<u32>()
    )
}

/// Current UTC time, bumped so each call is at least a microsecond past the last
fn next_key_time() -> DateTime<Utc> {
    let now = Utc::now().timestamp_micros();
    let previous = LAST_KEY_MICROS
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last.saturating_add(1)))
        })
        .unwrap_or(now);
    let micros = now.max(previous.saturating_add(1));

    Utc.timestamp_micros(micros).single().unwrap_or_else(Utc::now)
}

/// Directory-backed store; each key is a `<key>.json` file
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        Ok(self.dir.join(format!("{}.json", normalize_key(key)?)))
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn put(&mut self, key: &str, envelope: &SnapshotEnvelope) -> Result<(), StoreError> {
        let path = self.path_for(key)?;

        if !self.dir.exists() {
            debug!("Creating snapshot directory: {}", self.dir.display());
            fs::create_dir_all(&self.dir)?;
        }

        let writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer(writer, envelope)?;

        debug!("Snapshot written: {}", path.display());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<SnapshotEnvelope, StoreError> {
        let path = self.path_for(key)?;

        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(key) = name.strip_suffix(".json") {
                if key.starts_with(SNAPSHOT_PREFIX) {
                    keys.push(key.to_string());
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

/// Store kept in memory; clones share the same blobs
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    blobs: Arc<Mutex<BTreeMap<String, SnapshotEnvelope>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, SnapshotEnvelope>> {
        match self.blobs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl SnapshotStore for InMemoryStore {
    fn put(&mut self, key: &str, envelope: &SnapshotEnvelope) -> Result<(), StoreError> {
        let key = normalize_key(key)?;
        self.lock().insert(key, envelope.clone());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<SnapshotEnvelope, StoreError> {
        let key = normalize_key(key)?;
        self.lock()
            .get(&key)
            .cloned()
            .ok_or(StoreError::NotFound(key))
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock().keys().cloned().collect())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        let key = normalize_key(key)?;
        match self.lock().remove(&key) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(key)),
        }
    }
}

/// Delete the oldest blobs until at most `keep` remain
///
/// `current`, when given, is never removed; it counts toward `keep`.
/// Returns the number of blobs removed.
pub fn enforce_retention(
    store: &mut dyn SnapshotStore,
    keep: usize,
    current: Option<&str>,
) -> Result<usize, StoreError> {
    let keys = store.keys()?;
    if keys.len() <= keep {
        return Ok(0);
    }

    let excess = keys.len() - keep;
    let doomed: Vec<&String> = keys
        .iter()
        .filter(|key| Some(key.as_str()) != current)
        .take(excess)
        .collect();

    for key in &doomed {
        store.remove(key)?;
    }

    debug!("Retention removed {} snapshot(s)", doomed.len());
    Ok(doomed.len())
}

/// Persist one request's report and apply retention
///
/// # Arguments
/// * `store` - Destination store
/// * `data` - Sanitized report
/// * `time` - Unix seconds of the recording
/// * `max_records` - Number of blobs to keep
///
/// # Returns
/// The key the snapshot was stored under
///
/// # Errors
/// * `StoreError::Io` - Blob could not be written or old blobs removed
/// * `StoreError::Serialization` - Envelope could not be encoded
pub fn record_snapshot(
    store: &mut dyn SnapshotStore,
    data: Value,
    time: i64,
    max_records: usize,
) -> Result<String, StoreError> {
    let key = snapshot_key(next_key_time());
    let envelope = SnapshotEnvelope {
        version: SCHEMA_VERSION.to_string(),
        time,
        data,
    };

    store.put(&key, &envelope)?;
    enforce_retention(store, max_records, Some(&key))?;

    info!("Recorded request snapshot {}", key);
    Ok(key)
}

/// One line of the snapshot listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub key: String,
    /// Unix seconds
    pub time: i64,
    pub method: String,
    pub url: String,
    /// Milliseconds
    pub execution_time: f64,
    pub memory_used: String,
    pub query_count: u64,
}

impl SnapshotSummary {
    pub fn from_envelope(key: &str, envelope: &SnapshotEnvelope) -> Self {
        let data = &envelope.data;
        let text = |section: &str, field: &str, default: &str| {
            data[section][field].as_str().unwrap_or(default).to_string()
        };

        Self {
            key: key.to_string(),
            time: envelope.time,
            method: text("request", "method", "GET"),
            url: text("request", "url", "/"),
            execution_time: data["performance"]["execution_time"].as_f64().unwrap_or(0.0),
            memory_used: text("performance", "memory_used", "N/A"),
            query_count: data["database"]["query_count"].as_u64().unwrap_or(0),
        }
    }
}

/// Summaries of every stored snapshot, newest first
///
/// Blobs that cannot be read are skipped with a warning.
pub fn list_snapshots(store: &dyn SnapshotStore) -> Result<Vec<SnapshotSummary>, StoreError> {
    let mut summaries = Vec::new();

    for key in store.keys()?.iter().rev() {
        match store.get(key) {
            Ok(envelope) => summaries.push(SnapshotSummary::from_envelope(key, &envelope)),
            Err(e) => warn!("Skipping unreadable snapshot {}: {}", key, e),
        }
    }

    Ok(summaries)
}

pub fn load_snapshot(store: &dyn SnapshotStore, key: &str) -> Result<SnapshotEnvelope, StoreError> {
    store.get(&normalize_key(key)?)
}
