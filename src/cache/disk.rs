//! On-disk cache store that survives restarts.
//!
//! Layout: `<root>/<namespace>/<sha256(key)>.toml`, where the namespace
//! directory name is the URL-safe base64 of the namespace name. Entries are
//! written to a temporary file and renamed into place.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{CacheEntry, CacheStore};
use crate::error::{Error, Result};

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    key: String,
    status: u16,
    cached_at: DateTime<Utc>,
    /// Base64 of the response body.
    body: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

impl StoredEntry {
    fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            key: entry.key.clone(),
            status: entry.status,
            cached_at: entry.cached_at,
            body: BASE64.encode(&entry.body),
            headers: entry.headers.clone(),
        }
    }

    fn into_entry(self) -> Result<CacheEntry> {
        let body = BASE64
            .decode(self.body.as_bytes())
            .map_err(|e| invalid_data(format!("bad body encoding for {}: {e}", self.key)))?;
        Ok(CacheEntry {
            key: self.key,
            status: self.status,
            headers: self.headers,
            body: body.into(),
            cached_at: self.cached_at,
        })
    }
}

fn invalid_data(msg: String) -> Error {
    Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, msg))
}

/// Cache store persisted under a root directory.
#[derive(Debug, Clone)]
pub struct DiskCacheStore {
    root: PathBuf,
}

impl DiskCacheStore {
    /// Creates a store rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.root.join(URL_SAFE_NO_PAD.encode(namespace))
    }

    fn entry_path(&self, namespace: &str, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.namespace_dir(namespace)
            .join(format!("{digest:x}.toml"))
    }

    async fn read_entry(path: &Path) -> Result<CacheEntry> {
        let contents = tokio::fs::read_to_string(path).await?;
        let stored: StoredEntry = toml::from_str(&contents)?;
        stored.into_entry()
    }
}

#[async_trait]
impl CacheStore for DiskCacheStore {
    async fn put(&self, namespace: &str, entry: CacheEntry) -> Result<()> {
        let dir = self.namespace_dir(namespace);
        tokio::fs::create_dir_all(&dir).await?;

        let path = self.entry_path(namespace, &entry.key);
        let tmp_path = path.with_extension("toml.tmp");
        let toml_str = toml::to_string(&StoredEntry::from_entry(&entry))
            .map_err(|e| invalid_data(e.to_string()))?;

        tokio::fs::write(&tmp_path, toml_str).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>> {
        let path = self.entry_path(namespace, key);
        match Self::read_entry(&path).await {
            Ok(entry) => Ok(Some(entry)),
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn entries(&self, namespace: &str) -> Result<Vec<CacheEntry>> {
        let dir = self.namespace_dir(namespace);
        let mut read_dir = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        while let Some(item) = read_dir.next_entry().await? {
            let path = item.path();
            if path.extension().is_some_and(|ext| ext == "toml") {
                match Self::read_entry(&path).await {
                    Ok(entry) => entries.push(entry),
                    Err(e) => log::warn!("Skipping unreadable cache entry {}: {e}", path.display()),
                }
            }
        }
        Ok(entries)
    }

    async fn namespaces(&self) -> Result<Vec<String>> {
        let mut read_dir = match tokio::fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(item) = read_dir.next_entry().await? {
            if !item.file_type().await?.is_dir() {
                continue;
            }
            let encoded = item.file_name();
            let decoded = URL_SAFE_NO_PAD
                .decode(encoded.to_string_lossy().as_bytes())
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok());
            match decoded {
                Some(name) => names.push(name),
                None => log::debug!("Ignoring foreign directory {}", item.path().display()),
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<bool> {
        match tokio::fs::remove_dir_all(self.namespace_dir(namespace)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
