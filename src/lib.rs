//! echonet - request caching and dispatch tooling for a small compute backend.
//!
//! The library emulates browser service-worker caching outside the browser:
//! a [`Registration`] tracks installing, waiting and active workers, and a
//! [`CachingWorker`] answers fetches from a [`CacheStore`] or the network
//! according to its [`CacheStrategy`]. Around that sit a status dashboard
//! poller ([`dashboard`]) and a task dispatcher ([`tasks`]).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use echonet::{
//!     CacheStrategy, CachingWorker, HttpNetwork, MemoryCacheStore, Registration, Request,
//!     WorkerConfig, WorkerHooks,
//! };
//!
//! # async fn example() -> echonet::Result<()> {
//! let config = WorkerConfig::new().with_strategy(CacheStrategy::PrecacheFirst);
//! let network = Arc::new(HttpNetwork::new("http://127.0.0.1:5000")?);
//! let worker = CachingWorker::new(config, Arc::new(MemoryCacheStore::new()), network);
//!
//! let mut registration = Registration::new();
//! registration.register(Arc::new(worker)).await?;
//!
//! // A page first seen after activation is controlled by the active worker.
//! if let Some(handler) = registration.handler_for("page-1").await {
//!     let response = handler.fetch(&Request::get("/")).await?;
//!     println!("{} bytes", response.body.len());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod cache;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod format;
pub mod network;
pub mod tasks;
pub mod worker;

#[cfg(feature = "server")]
pub mod server;

#[cfg(feature = "cli")]
pub mod cli;

// Re-export main types for convenience
pub use cache::{CacheEntry, CacheStore, DiskCacheStore, MemoryCacheStore};
pub use config::{AppConfig, DashboardConfig, ServerConfig, TaskConfig, WorkerConfig};
pub use error::{Error, Result};
pub use network::{HttpNetwork, Network, Request, Response};
pub use worker::{
    CacheStrategy, CachingWorker, InstallProgress, NoProgress, Registration, WorkerHooks,
    WorkerState, service_worker_js,
};
