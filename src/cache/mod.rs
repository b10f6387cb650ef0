//! Named, persistent response caches.
//!
//! A store holds any number of namespaces (one per worker version); each
//! namespace maps request keys to stored responses. Only `GET` requests ever
//! match, mirroring the browser Cache API.

mod disk;
mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::network::{Request, Response, Served};

pub use disk::DiskCacheStore;
pub use memory::MemoryCacheStore;

/// A stored response under a request key.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
    pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Captures `response` for `key`.
    #[must_use]
    pub fn capture(key: &str, response: &Response) -> Self {
        Self {
            key: key.to_string(),
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
            cached_at: Utc::now(),
        }
    }

    /// Replays the entry as a response tagged as served from cache.
    #[must_use]
    pub fn to_response(&self) -> Response {
        Response {
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
            served: Served::Cache,
        }
    }
}

/// Storage for cache namespaces.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Stores (or replaces) an entry in `namespace`, creating it if needed.
    async fn put(&self, namespace: &str, entry: CacheEntry) -> Result<()>;

    /// Looks up `key` in `namespace`.
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>>;

    /// Lists the entries of `namespace` (empty if it does not exist).
    async fn entries(&self, namespace: &str) -> Result<Vec<CacheEntry>>;

    /// Lists the names of all namespaces.
    async fn namespaces(&self) -> Result<Vec<String>>;

    /// Removes a namespace and everything in it. Returns false if absent.
    async fn delete_namespace(&self, namespace: &str) -> Result<bool>;

    /// Stores several entries at once.
    async fn put_all(&self, namespace: &str, entries: Vec<CacheEntry>) -> Result<()> {
        for entry in entries {
            self.put(namespace, entry).await?;
        }
        Ok(())
    }

    /// Matches a request against `namespace`. Non-`GET` requests never match.
    async fn match_request(&self, namespace: &str, request: &Request) -> Result<Option<Response>> {
        if !request.is_get() {
            return Ok(None);
        }
        Ok(self
            .get(namespace, &request.key)
            .await?
            .map(|entry| entry.to_response()))
    }

    /// Lists the request keys held in `namespace`, sorted.
    async fn keys(&self, namespace: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries(namespace)
            .await?
            .into_iter()
            .map(|e| e.key)
            .collect();
        keys.sort();
        Ok(keys)
    }
}
