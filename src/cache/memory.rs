//! In-process cache store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CacheEntry, CacheStore};
use crate::error::Result;

/// Cache store kept in memory; contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    namespaces: RwLock<HashMap<String, HashMap<String, CacheEntry>>>,
}

impl MemoryCacheStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn put(&self, namespace: &str, entry: CacheEntry) -> Result<()> {
        self.namespaces
            .write()
            .await
            .entry(namespace.to_string())
            .or_default()
            .insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self
            .namespaces
            .read()
            .await
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .cloned())
    }

    async fn entries(&self, namespace: &str) -> Result<Vec<CacheEntry>> {
        Ok(self
            .namespaces
            .read()
            .await
            .get(namespace)
            .map(|ns| ns.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn namespaces(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.namespaces.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<bool> {
        Ok(self.namespaces.write().await.remove(namespace).is_some())
    }
}
