use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Host-provided local key/value store (the browser analogue is
/// `localStorage`). Persistence is best-effort: write failures are reported
/// to the caller, read failures discard the entry.
pub trait KeyValueStorage {
    fn read(&self, key: &str) -> Option<String>;
    fn write(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str);
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A single persisted field: value, write time, optional expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub value: Value,
    pub timestamp_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<u64>,
}

/// A persisted field whose shape may change over time. A version mismatch
/// on read discards the stored value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedEntry {
    pub version: u32,
    pub data: Value,
    pub timestamp_ms: u64,
}

/// Write `value` under `key`, optionally expiring after `ttl_ms`.
pub fn write_entry(
    storage: &dyn KeyValueStorage,
    key: &str,
    value: Value,
    ttl_ms: Option<u64>,
) -> Result<()> {
    let timestamp_ms = now_ms();
    let entry = StoredEntry {
        value,
        timestamp_ms,
        expires_at_ms: ttl_ms.map(|ttl| timestamp_ms + ttl),
    };
    storage.write(key, &serde_json::to_string(&entry)?)
}

/// Read the entry under `key`, discarding it if expired or unparseable.
pub fn read_entry(storage: &dyn KeyValueStorage, key: &str) -> Option<Value> {
    let raw = storage.read(key)?;
    let entry: StoredEntry = match serde_json::from_str(&raw) {
        Ok(entry) => entry,
        Err(err) => {
            tracing::warn!(key, error = %err, "discarding unparseable stored entry");
            storage.remove(key);
            return None;
        }
    };
    if let Some(expiry) = entry.expires_at_ms {
        if now_ms() >= expiry {
            storage.remove(key);
            return None;
        }
    }
    Some(entry.value)
}

/// Write `data` under `key` as a versioned entry.
pub fn write_versioned(
    storage: &dyn KeyValueStorage,
    key: &str,
    version: u32,
    data: Value,
) -> Result<()> {
    let entry = VersionedEntry {
        version,
        data,
        timestamp_ms: now_ms(),
    };
    storage.write(key, &serde_json::to_string(&entry)?)
}

/// Read the versioned entry under `key`.
///
/// Returns `None` (after discarding the stored value) when the entry is
/// missing, unparseable, or carries a different version — callers fall back
/// to their own default.
pub fn read_versioned(storage: &dyn KeyValueStorage, key: &str, version: u32) -> Option<Value> {
    let raw = storage.read(key)?;
    let entry: VersionedEntry = match serde_json::from_str(&raw) {
        Ok(entry) => entry,
        Err(err) => {
            tracing::warn!(key, error = %err, "discarding unparseable versioned entry");
            storage.remove(key);
            return None;
        }
    };
    if entry.version != version {
        tracing::info!(
            key,
            stored = entry.version,
            expected = version,
            "discarding stored entry with mismatched version"
        );
        storage.remove(key);
        return None;
    }
    Some(entry.data)
}

/// In-memory storage for tests and hosts without persistence.
#[derive(Default)]
pub struct MemoryStorage {
    map: RefCell<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.borrow().is_empty()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn read(&self, key: &str) -> Option<String> {
        self.map.borrow().get(key).cloned()
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.map.borrow_mut().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) {
        self.map.borrow_mut().remove(key);
    }
}

/// Write-through storage backed by a single JSON document on disk.
pub struct JsonFileStorage {
    path: PathBuf,
    map: RefCell<HashMap<String, String>>,
}

impl JsonFileStorage {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let map = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read storage file {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("invalid storage file {}", path.display()))?
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            map: RefCell::new(map),
        })
    }

    fn flush(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create storage directory {}", parent.display())
                })?;
            }
        }
        let raw = serde_json::to_string_pretty(&*self.map.borrow())?;
        fs::write(&self.path, raw)
            .with_context(|| format!("failed to write storage file {}", self.path.display()))
    }
}

impl KeyValueStorage for JsonFileStorage {
    fn read(&self, key: &str) -> Option<String> {
        self.map.borrow().get(key).cloned()
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.map.borrow_mut().insert(key.to_string(), value.to_string());
        self.flush()
    }

    fn remove(&self, key: &str) {
        self.map.borrow_mut().remove(key);
        if let Err(err) = self.flush() {
            tracing::warn!(key, error = %err, "failed to flush storage after remove");
        }
    }
}
