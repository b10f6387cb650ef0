//! The caching worker: precache on install, route every fetch by strategy.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt, stream};

use super::lifecycle::{ActivateContext, InstallContext, WorkerHooks};
use super::strategy::{FetchPolicy, InstallPolicy, ResponseSource};
use crate::cache::{CacheEntry, CacheStore};
use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::network::{Network, Request, Response};

/// Concurrent fetches while filling the cache.
const PRECACHE_CONCURRENCY: usize = 4;

/// Receives progress while the manifest is precached.
///
/// All methods have default no-op implementations.
pub trait InstallProgress: Send + Sync {
    /// Called once before any manifest fetch starts.
    fn on_start(&self, _total: usize) {}

    /// Called when a manifest entry has been fetched.
    fn on_fetched(&self, _url: &str, _bytes: usize) {}

    /// Called when a manifest entry could not be fetched.
    fn on_failed(&self, _url: &str, _error: &str) {}

    /// Called after every entry has been written to the cache.
    fn on_complete(&self, _cache_name: &str) {}
}

/// Progress sink that ignores all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl InstallProgress for NoProgress {}

/// Worker hooks implementing the configured caching strategy.
pub struct CachingWorker {
    config: WorkerConfig,
    policy: FetchPolicy,
    cache: Arc<dyn CacheStore>,
    network: Arc<dyn Network>,
    progress: Arc<dyn InstallProgress>,
}

impl CachingWorker {
    /// Creates a worker over the given cache and network.
    #[must_use]
    pub fn new(config: WorkerConfig, cache: Arc<dyn CacheStore>, network: Arc<dyn Network>) -> Self {
        Self {
            policy: config.fetch_policy(),
            config,
            cache,
            network,
            progress: Arc::new(NoProgress),
        }
    }

    /// Reports precache progress to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn InstallProgress>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &WorkerConfig {
        &self.config
    }

    #[must_use]
    pub const fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    /// Fetches the whole manifest, then stores it. Nothing is stored unless
    /// every entry was fetched with a success status.
    async fn precache(&self) -> Result<()> {
        let manifest = &self.config.manifest;
        self.progress.on_start(manifest.len());
        log::info!(
            "Precaching {} URL(s) into {}",
            manifest.len(),
            self.config.cache_name
        );

        let entries: Vec<CacheEntry> = stream::iter(manifest.iter().cloned())
            .map(|url| async move {
                let url = &url;
                let fetched = self.network.fetch(&Request::get(url.as_str())).await;
                let outcome = match fetched {
                    Ok(resp) if resp.is_success() => Ok(CacheEntry::capture(url, &resp)),
                    Ok(resp) => Err(format!("status {}", resp.status)),
                    Err(e) => Err(e.to_string()),
                };
                match outcome {
                    Ok(entry) => {
                        self.progress.on_fetched(url, entry.body.len());
                        Ok(entry)
                    }
                    Err(reason) => {
                        self.progress.on_failed(url, &reason);
                        Err(Error::CacheFill {
                            url: url.clone(),
                            reason,
                        })
                    }
                }
            })
            .buffered(PRECACHE_CONCURRENCY)
            .try_collect()
            .await?;

        self.cache.put_all(&self.config.cache_name, entries).await?;
        self.progress.on_complete(&self.config.cache_name);
        Ok(())
    }

    async fn from_cache(&self, request: &Request) -> Option<Response> {
        match self
            .cache
            .match_request(&self.config.cache_name, request)
            .await
        {
            Ok(hit) => hit,
            Err(e) => {
                log::warn!("Cache lookup for {} failed: {e}", request.key);
                None
            }
        }
    }

    async fn store(&self, request: &Request, response: &Response) {
        if !self.config.write_back || !request.is_get() || !response.is_success() {
            return;
        }
        let entry = CacheEntry::capture(&request.key, response);
        if let Err(e) = self.cache.put(&self.config.cache_name, entry).await {
            log::warn!("Could not cache {}: {e}", request.key);
        }
    }

    fn unavailable(request: &Request) -> Error {
        Error::ResourceUnavailable {
            url: request.key.clone(),
        }
    }
}

#[async_trait]
impl WorkerHooks for CachingWorker {
    async fn install(&self, ctx: &mut InstallContext) -> Result<()> {
        match self.config.strategy.install_policy() {
            InstallPolicy::Precache => self.precache().await,
            InstallPolicy::ImmediateClaim => {
                ctx.skip_waiting();
                Ok(())
            }
        }
    }

    async fn activate(&self, ctx: &mut ActivateContext) -> Result<()> {
        let stale: Vec<String> = self
            .cache
            .namespaces()
            .await?
            .into_iter()
            .filter(|name| *name != self.config.cache_name)
            .collect();

        if !stale.is_empty() {
            if self.config.purge_stale_caches {
                for name in &stale {
                    self.cache.delete_namespace(name).await?;
                    log::info!("Deleted stale cache {name}");
                }
            } else {
                log::warn!(
                    "Stale caches left in place: {} (set purge_stale_caches to remove)",
                    stale.join(", ")
                );
            }
        }

        if self.config.strategy.install_policy() == InstallPolicy::ImmediateClaim {
            ctx.claim_clients();
        }
        Ok(())
    }

    async fn fetch(&self, request: &Request) -> Result<Response> {
        let source = self.policy.route(request);
        log::debug!("{} {} routed {source:?}", request.method, request.key);

        match source {
            ResponseSource::CacheThenNetwork => {
                if let Some(hit) = self.from_cache(request).await {
                    return Ok(hit);
                }
                match self.network.fetch(request).await {
                    Ok(resp) => {
                        self.store(request, &resp).await;
                        Ok(resp)
                    }
                    Err(e) if e.is_network_failure() => {
                        log::debug!("Network failed for {}: {e}", request.key);
                        Err(Self::unavailable(request))
                    }
                    Err(e) => Err(e),
                }
            }
            ResponseSource::NetworkThenCache => match self.network.fetch(request).await {
                Ok(resp) => {
                    self.store(request, &resp).await;
                    Ok(resp)
                }
                Err(e) if e.is_network_failure() => {
                    log::debug!("Network failed for {}, trying cache: {e}", request.key);
                    self.from_cache(request)
                        .await
                        .ok_or_else(|| Self::unavailable(request))
                }
                Err(e) => Err(e),
            },
            ResponseSource::NetworkOnly => self.network.fetch(request).await.map_err(|e| {
                if e.is_network_failure() {
                    Self::unavailable(request)
                } else {
                    e
                }
            }),
        }
    }

    fn label(&self) -> String {
        format!("{} @ {}", self.config.strategy, self.config.cache_name)
    }
}
