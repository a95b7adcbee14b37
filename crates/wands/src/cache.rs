//! Local cache stores.
//!
//! A [`CacheStore`] holds payloads keyed by (filename, name). The
//! orchestrator asks it which names it can serve, loads those, and writes
//! back whatever it fetched remotely.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use axis_protocol::PayloadMap;
use axis_stream::Payload;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};

use crate::error::{WandsError, WandsResult};

/// Contract between the orchestrator and a local cache.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Split `names` into `(remote_list, local_list)`: names the cache lacks
    /// and names it holds. Together the lists partition `names`.
    async fn check_availability(
        &self,
        filename: &str,
        names: &[String],
    ) -> WandsResult<(Vec<String>, Vec<String>)>;

    /// Load the cached payloads for `names`, all of which must be present.
    async fn load(&self, filename: &str, names: &[String]) -> WandsResult<PayloadMap>;

    /// Persist `data` under `filename`, replacing entries with the same name.
    async fn write(&self, filename: &str, data: &PayloadMap) -> WandsResult<()>;

    /// Human-readable location of the store.
    fn location(&self) -> String;
}

fn split_by(names: &[String], held: impl Fn(&str) -> bool) -> (Vec<String>, Vec<String>) {
    names.iter().cloned().partition(|name| !held(name))
}

fn select(filename: &str, entries: &PayloadMap, names: &[String]) -> WandsResult<PayloadMap> {
    names
        .iter()
        .map(|name| {
            entries
                .get(name)
                .map(|payload| (name.clone(), payload.clone()))
                .ok_or_else(|| {
                    WandsError::Cache(format!("'{}' is not cached for '{}'", name, filename))
                })
        })
        .collect()
}

/// Cache held in process memory.
#[derive(Default)]
pub struct MemoryCacheStore {
    files: Mutex<HashMap<String, PayloadMap>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names cached for `filename`, sorted.
    pub fn cached_names(&self, filename: &str) -> Vec<String> {
        self.files
            .lock()
            .get(filename)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn check_availability(
        &self,
        filename: &str,
        names: &[String],
    ) -> WandsResult<(Vec<String>, Vec<String>)> {
        let files = self.files.lock();
        let entries = files.get(filename);
        Ok(split_by(names, |name| {
            entries.is_some_and(|e| e.contains_key(name))
        }))
    }

    async fn load(&self, filename: &str, names: &[String]) -> WandsResult<PayloadMap> {
        let files = self.files.lock();
        match files.get(filename) {
            Some(entries) => select(filename, entries, names),
            None if names.is_empty() => Ok(PayloadMap::new()),
            None => Err(WandsError::Cache(format!("nothing cached for '{}'", filename))),
        }
    }

    async fn write(&self, filename: &str, data: &PayloadMap) -> WandsResult<()> {
        let mut files = self.files.lock();
        let entries = files.entry(filename.to_string()).or_default();
        entries.extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

/// On-disk form of one filename's cached entries.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheDocument {
    filename: String,
    entries: BTreeMap<String, Payload>,
}

/// Cache stored as one JSON document per filename under a directory.
///
/// Documents are named by the SHA-256 of the filename and replaced
/// atomically, so readers never see a half-written document.
pub struct DirCacheStore {
    root: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl DirCacheStore {
    /// Open (creating if needed) a cache rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> WandsResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "Opened cache directory");

        Ok(Self {
            root,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the document holding `filename`'s entries.
    pub fn document_path(&self, filename: &str) -> PathBuf {
        let digest = Sha256::digest(filename.as_bytes());
        let name: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        self.root.join(format!("{}.json", name))
    }

    async fn read_document(&self, filename: &str) -> WandsResult<CacheDocument> {
        let path = self.document_path(filename);

        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CacheDocument {
                    filename: filename.to_string(),
                    entries: BTreeMap::new(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let document: CacheDocument = serde_json::from_slice(&raw)?;
        if document.filename != filename {
            return Err(WandsError::Cache(format!(
                "{} holds '{}', expected '{}'",
                path.display(),
                document.filename,
                filename
            )));
        }
        Ok(document)
    }

    async fn write_document(&self, document: &CacheDocument) -> WandsResult<()> {
        let path = self.document_path(&document.filename);
        let bytes = serde_json::to_vec(document)?;
        atomic_write(&path, &bytes).await
    }
}

/// Write `bytes` to a temp file next to `path`, then rename over it.
async fn atomic_write(path: &Path, bytes: &[u8]) -> WandsResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| WandsError::Cache(format!("{} has no parent", path.display())))?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| WandsError::Cache(format!("{} has no file name", path.display())))?;
    let tmp_path = dir.join(format!(".{}.tmp.{}", file_name, uuid::Uuid::new_v4().simple()));

    let result = async {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)
            .await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp_path, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e.into());
    }

    trace!(path = %path.display(), bytes = bytes.len(), "Cache document replaced");
    Ok(())
}

#[async_trait]
impl CacheStore for DirCacheStore {
    async fn check_availability(
        &self,
        filename: &str,
        names: &[String],
    ) -> WandsResult<(Vec<String>, Vec<String>)> {
        let document = self.read_document(filename).await?;
        Ok(split_by(names, |name| document.entries.contains_key(name)))
    }

    async fn load(&self, filename: &str, names: &[String]) -> WandsResult<PayloadMap> {
        if names.is_empty() {
            return Ok(PayloadMap::new());
        }
        let document = self.read_document(filename).await?;
        select(filename, &document.entries, names)
    }

    async fn write(&self, filename: &str, data: &PayloadMap) -> WandsResult<()> {
        // Serialize read-modify-write cycles so concurrent writers merge
        let _guard = self.write_lock.lock().await;

        let mut document = self.read_document(filename).await?;
        document
            .entries
            .extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.write_document(&document).await?;

        debug!(
            filename = %filename,
            written = data.len(),
            total = document.entries.len(),
            "Cache updated"
        );
        Ok(())
    }

    fn location(&self) -> String {
        self.root.display().to_string()
    }
}
