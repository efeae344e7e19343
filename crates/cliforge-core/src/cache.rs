use crate::error::CacheError;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::time::Duration;

/// One cached spec document plus bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub payload: Value,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, payload: Value) -> Self {
        Self {
            key: key.into(),
            created_at: Utc::now(),
            payload,
        }
    }
}

/// Byte-addressed cache for parsed OpenAPI documents
pub trait SpecCache: Send + Sync {
    /// Look up an entry; a miss is the `CacheError::Miss` sentinel
    fn get(&self, key: &str) -> Result<CacheEntry, CacheError>;

    fn set(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError>;

    fn invalidate(&self, key: &str) -> Result<(), CacheError>;

    fn clear(&self) -> Result<usize, CacheError>;

    /// Remove entries older than `ttl`; returns how many were removed
    fn prune(&self, ttl: Duration) -> Result<usize, CacheError>;
}

/// Content-addressed filename for a cache key
pub fn cache_file_name(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{}.json", hex::encode(hasher.finalize()))
}

/// File-backed spec cache under `<cache_home>/<app>/`
pub struct FileSpecCache {
    directory: PathBuf,
}

impl FileSpecCache {
    pub fn new(directory: PathBuf) -> Self {
        Self { directory }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.directory.join(cache_file_name(key))
    }
}

impl SpecCache for FileSpecCache {
    fn get(&self, key: &str) -> Result<CacheEntry, CacheError> {
        let path = self.entry_path(key);
        let raw = std::fs::read_to_string(&path).map_err(|_| CacheError::Miss(key.to_string()))?;
        let entry: CacheEntry =
            serde_json::from_str(&raw).map_err(|e| CacheError::Corrupted(e.to_string()))?;
        debug!("Cache hit for {}", key);
        Ok(entry)
    }

    fn set(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError> {
        std::fs::create_dir_all(&self.directory)
            .map_err(|e| CacheError::WriteFailed(e.to_string()))?;
        let serialized =
            serde_json::to_vec_pretty(&entry).map_err(|e| CacheError::WriteFailed(e.to_string()))?;
        std::fs::write(self.entry_path(key), serialized)
            .map_err(|e| CacheError::WriteFailed(e.to_string()))?;
        Ok(())
    }

    fn invalidate(&self, key: &str) -> Result<(), CacheError> {
        let path = self.entry_path(key);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| CacheError::WriteFailed(e.to_string()))?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        let entries = match std::fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(_) => return Ok(0),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if std::fs::remove_file(&path).is_ok() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    fn prune(&self, ttl: Duration) -> Result<usize, CacheError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(ttl)
                .map_err(|e| CacheError::WriteFailed(e.to_string()))?;
        let mut removed = 0;
        let entries = match std::fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(_) => return Ok(0),
        };
        for dir_entry in entries.flatten() {
            let path = dir_entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            let Ok(raw) = std::fs::read_to_string(&path) else {
                continue;
            };
            match serde_json::from_str::<CacheEntry>(&raw) {
                Ok(entry) if entry.created_at < cutoff => {
                    if std::fs::remove_file(&path).is_ok() {
                        removed += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    // Unreadable entries are treated as expired.
                    warn!("Removing corrupted cache entry {}: {}", path.display(), e);
                    if std::fs::remove_file(&path).is_ok() {
                        removed += 1;
                    }
                }
            }
        }
        Ok(removed)
    }
}
