//! Service worker emulation: lifecycle, client control and fetch routing.

pub mod caching;
pub mod clients;
pub mod lifecycle;
pub mod script;
pub mod strategy;

pub use caching::{CachingWorker, InstallProgress, NoProgress};
pub use clients::{Client, Clients};
pub use lifecycle::{
    ActivateContext, InstallContext, Registration, ServiceWorker, WorkerHooks, WorkerId,
    WorkerState,
};
pub use script::service_worker_js;
pub use strategy::{CacheStrategy, FetchPolicy, InstallPolicy, ResponseSource, TELEMETRY_PATHS};
