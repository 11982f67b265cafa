//! Persistence Gateways
//!
//! Namespaced JSON storage used for failover snapshots. The core only needs
//! to save a document under a key, list what a namespace holds, load one
//! document back and delete documents it no longer retains.
//!
//! Callers in this crate treat every gateway failure as non-fatal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PersistenceError;

/// Result alias for gateway operations
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Extension of stored documents
const FILE_EXTENSION: &str = "json";

/// A stored document in a namespace listing
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntry {
    /// File name within the namespace
    pub filename: String,
    /// When the document was written
    pub timestamp: DateTime<Utc>,
}

/// Storage contract for persisted state
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Write `data` under `key` in `namespace`, overwriting any previous value
    async fn save(&self, namespace: &str, key: &str, data: &Value) -> PersistenceResult<()>;

    /// List documents in `namespace`. An unknown namespace is empty.
    async fn list(&self, namespace: &str) -> PersistenceResult<Vec<StoredEntry>>;

    /// Load a document by the file name returned from [`list`](Self::list)
    async fn load(&self, namespace: &str, filename: &str) -> PersistenceResult<Value>;

    /// Remove a document by the file name returned from [`list`](Self::list)
    async fn delete(&self, namespace: &str, filename: &str) -> PersistenceResult<()>;
}

fn not_found(namespace: &str, filename: &str) -> PersistenceError {
    PersistenceError::NotFound {
        namespace: namespace.to_string(),
        filename: filename.to_string(),
    }
}

fn check_filename(filename: &str) -> PersistenceResult<()> {
    if filename.contains(['/', '\\']) || filename.contains("..") {
        return Err(PersistenceError::Backend(format!(
            "invalid filename '{filename}'"
        )));
    }
    Ok(())
}

fn filename_for(key: &str) -> PersistenceResult<String> {
    if key.is_empty() || key.contains(['/', '\\']) || key.contains("..") {
        return Err(PersistenceError::Backend(format!("invalid key '{key}'")));
    }
    Ok(format!("{key}.{FILE_EXTENSION}"))
}

// ============================================================================
// In-Memory Gateway
// ============================================================================

/// Gateway that keeps documents in memory
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    namespaces: DashMap<String, HashMap<String, (DateTime<Utc>, Value)>>,
}

impl MemoryPersistence {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in `namespace`
    #[must_use]
    pub fn count(&self, namespace: &str) -> usize {
        self.namespaces.get(namespace).map_or(0, |ns| ns.len())
    }
}

#[async_trait]
impl PersistenceGateway for MemoryPersistence {
    async fn save(&self, namespace: &str, key: &str, data: &Value) -> PersistenceResult<()> {
        let filename = filename_for(key)?;
        self.namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(filename, (Utc::now(), data.clone()));
        Ok(())
    }

    async fn list(&self, namespace: &str) -> PersistenceResult<Vec<StoredEntry>> {
        let Some(ns) = self.namespaces.get(namespace) else {
            return Ok(Vec::new());
        };
        let mut entries: Vec<StoredEntry> = ns
            .iter()
            .map(|(filename, (timestamp, _))| StoredEntry {
                filename: filename.clone(),
                timestamp: *timestamp,
            })
            .collect();
        entries.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(entries)
    }

    async fn load(&self, namespace: &str, filename: &str) -> PersistenceResult<Value> {
        self.namespaces
            .get(namespace)
            .and_then(|ns| ns.get(filename).map(|(_, value)| value.clone()))
            .ok_or_else(|| not_found(namespace, filename))
    }

    async fn delete(&self, namespace: &str, filename: &str) -> PersistenceResult<()> {
        self.namespaces
            .get_mut(namespace)
            .and_then(|mut ns| ns.remove(filename))
            .map(|_| ())
            .ok_or_else(|| not_found(namespace, filename))
    }
}

// ============================================================================
// File Gateway
// ============================================================================

/// Gateway that writes one JSON file per document under `root/namespace/`
#[derive(Clone, Debug)]
pub struct FilePersistence {
    root: PathBuf,
}

impl FilePersistence {
    /// Store documents under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store documents in the platform data directory
    #[must_use]
    pub fn with_default_root() -> Self {
        Self::new(Self::default_root())
    }

    /// `$XDG_DATA_HOME/model-strategy` (or the platform equivalent), falling
    /// back to the temp directory
    #[must_use]
    pub fn default_root() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("model-strategy")
    }

    /// Root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, namespace: &str) -> PersistenceResult<PathBuf> {
        if namespace.is_empty() || namespace.contains(['/', '\\']) || namespace.contains("..") {
            return Err(PersistenceError::Backend(format!(
                "invalid namespace '{namespace}'"
            )));
        }
        Ok(self.root.join(namespace))
    }
}

#[async_trait]
impl PersistenceGateway for FilePersistence {
    async fn save(&self, namespace: &str, key: &str, data: &Value) -> PersistenceResult<()> {
        let dir = self.namespace_dir(namespace)?;
        let filename = filename_for(key)?;
        tokio::fs::create_dir_all(&dir).await?;

        let bytes = serde_json::to_vec_pretty(data)?;
        let path = dir.join(&filename);
        let tmp = dir.join(format!(".{filename}.tmp"));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(path = %path.display(), "Saved persisted document");
        Ok(())
    }

    async fn list(&self, namespace: &str) -> PersistenceResult<Vec<StoredEntry>> {
        let dir = self.namespace_dir(namespace)?;
        let mut reader = match tokio::fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if filename.starts_with('.') {
                continue;
            }
            let modified = entry.metadata().await?.modified()?;
            entries.push(StoredEntry {
                filename: filename.to_string(),
                timestamp: DateTime::<Utc>::from(modified),
            });
        }
        entries.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(entries)
    }

    async fn load(&self, namespace: &str, filename: &str) -> PersistenceResult<Value> {
        let dir = self.namespace_dir(namespace)?;
        check_filename(filename)?;
        let bytes = match tokio::fs::read(dir.join(filename)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(not_found(namespace, filename))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn delete(&self, namespace: &str, filename: &str) -> PersistenceResult<()> {
        let dir = self.namespace_dir(namespace)?;
        check_filename(filename)?;
        match tokio::fs::remove_file(dir.join(filename)).await {
            Ok(()) => {
                tracing::debug!(namespace, filename, "Deleted persisted document");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(not_found(namespace, filename))
            }
            Err(e) => Err(e.into()),
        }
    }
}
