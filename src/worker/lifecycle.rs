//! Worker registration and the install/activate state machine.
//!
//! ```text
//! Installing ──ok──▶ Waiting ──▶ Activating ──▶ Active ──superseded──▶ Redundant
//!      │
//!      └──err──▶ Redundant
//! ```
//!
//! Behaviour is supplied through [`WorkerHooks`]; the registration only
//! drives state transitions and client control.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::clients::Clients;
use crate::error::{Error, Result};
use crate::network::{Request, Response};

/// Unique identifier for a worker version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WorkerId(Uuid);

impl WorkerId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0.simple().to_string();
        f.write_str(&s[..8])
    }
}

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Installing,
    /// Installed, waiting for the previous worker's pages to close.
    Waiting,
    Activating,
    /// Controlling pages and handling fetches.
    Active,
    /// Install failed or a newer worker took over.
    Redundant,
}

/// Directives available to an install hook.
#[derive(Debug, Default)]
pub struct InstallContext {
    skip_waiting: bool,
}

impl InstallContext {
    /// Activate as soon as install completes, without waiting for old pages.
    pub fn skip_waiting(&mut self) {
        self.skip_waiting = true;
    }

    #[must_use]
    pub const fn skips_waiting(&self) -> bool {
        self.skip_waiting
    }
}

/// Directives available to an activate hook.
#[derive(Debug, Default)]
pub struct ActivateContext {
    claim: bool,
}

impl ActivateContext {
    /// Take control of every open page once activation completes.
    pub fn claim_clients(&mut self) {
        self.claim = true;
    }

    #[must_use]
    pub const fn claims_clients(&self) -> bool {
        self.claim
    }
}

/// Handlers a worker registers for its lifecycle and interception events.
#[async_trait]
pub trait WorkerHooks: Send + Sync {
    /// Runs once while the worker is installing. An error aborts the install.
    async fn install(&self, ctx: &mut InstallContext) -> Result<()>;

    /// Runs once while the worker is activating.
    async fn activate(&self, ctx: &mut ActivateContext) -> Result<()>;

    /// Produces the response for an intercepted request.
    async fn fetch(&self, request: &Request) -> Result<Response>;

    /// Short label for logs and status output.
    fn label(&self) -> String {
        String::from("worker")
    }
}

/// One version of a worker.
pub struct ServiceWorker {
    id: WorkerId,
    state: WorkerState,
    hooks: Arc<dyn WorkerHooks>,
    skip_waiting: bool,
    state_changed_at: DateTime<Utc>,
}

impl fmt::Debug for ServiceWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceWorker")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("label", &self.hooks.label())
            .finish_non_exhaustive()
    }
}

impl ServiceWorker {
    /// Runs the install hook for a new worker.
    ///
    /// On success the worker is returned in the `Waiting` state.
    ///
    /// # Errors
    ///
    /// Propagates the install hook's error; the worker is discarded as redundant.
    pub async fn install(hooks: Arc<dyn WorkerHooks>) -> Result<Self> {
        let mut worker = Self {
            id: WorkerId::new(),
            state: WorkerState::Installing,
            hooks,
            skip_waiting: false,
            state_changed_at: Utc::now(),
        };
        log::info!("Installing worker {} ({})", worker.id, worker.hooks.label());

        let mut ctx = InstallContext::default();
        if let Err(e) = worker.hooks.install(&mut ctx).await {
            worker.set_state(WorkerState::Redundant);
            log::error!("Install of worker {} failed: {e}", worker.id);
            return Err(e);
        }

        worker.skip_waiting = ctx.skips_waiting();
        worker.set_state(WorkerState::Waiting);
        Ok(worker)
    }

    fn set_state(&mut self, state: WorkerState) {
        log::debug!("Worker {}: {:?} -> {:?}", self.id, self.state, state);
        self.state = state;
        self.state_changed_at = Utc::now();
    }

    #[must_use]
    pub const fn id(&self) -> WorkerId {
        self.id
    }

    #[must_use]
    pub const fn state(&self) -> WorkerState {
        self.state
    }

    #[must_use]
    pub const fn state_changed_at(&self) -> DateTime<Utc> {
        self.state_changed_at
    }

    #[must_use]
    pub fn hooks(&self) -> Arc<dyn WorkerHooks> {
        Arc::clone(&self.hooks)
    }

    #[must_use]
    pub fn label(&self) -> String {
        self.hooks.label()
    }
}

/// A registration: at most one waiting and one active worker, plus the pages
/// they control.
#[derive(Debug, Default)]
pub struct Registration {
    waiting: Option<ServiceWorker>,
    active: Option<ServiceWorker>,
    clients: Clients,
    client_idle_timeout: Option<Duration>,
}

impl Registration {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Closes clients idle for longer than `timeout` before each fetch, so a
    /// waiting worker can take over once old pages go away.
    #[must_use]
    pub fn with_client_idle_timeout(mut self, timeout: Duration) -> Self {
        self.client_idle_timeout = Some(timeout);
        self
    }

    /// Installs a worker and activates it if nothing holds it back.
    ///
    /// # Errors
    ///
    /// Returns the install error; the current active worker stays in place.
    pub async fn register(&mut self, hooks: Arc<dyn WorkerHooks>) -> Result<WorkerId> {
        let worker = ServiceWorker::install(hooks).await?;
        let id = worker.id();
        self.accept(worker).await;
        Ok(id)
    }

    /// Takes an already installed worker as the waiting worker.
    ///
    /// A previously waiting worker is superseded.
    pub async fn accept(&mut self, worker: ServiceWorker) {
        if let Some(mut stale) = self.waiting.replace(worker) {
            stale.set_state(WorkerState::Redundant);
            log::info!("Waiting worker {} superseded", stale.id);
        }
        self.try_activate().await;
    }

    /// Requests that the waiting worker activate now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if no worker is waiting.
    pub async fn skip_waiting(&mut self) -> Result<WorkerId> {
        let waiting = self
            .waiting
            .as_mut()
            .ok_or_else(|| Error::InvalidState("no worker is waiting".to_string()))?;
        waiting.skip_waiting = true;
        let id = waiting.id;
        self.try_activate().await;
        Ok(id)
    }

    /// Activates the waiting worker unless the active one still controls pages.
    ///
    /// Returns the id of the newly active worker, if a transition happened.
    pub async fn try_activate(&mut self) -> Option<WorkerId> {
        let waiting = self.waiting.as_ref()?;
        if let Some(active) = &self.active {
            let controlled = self.clients.controlled_by(active.id);
            if controlled > 0 && !waiting.skip_waiting {
                log::info!(
                    "Worker {} waiting: {controlled} page(s) still controlled by {}",
                    waiting.id,
                    active.id
                );
                return None;
            }
        }
        let worker = self.waiting.take()?;
        Some(self.activate(worker).await)
    }

    async fn activate(&mut self, mut worker: ServiceWorker) -> WorkerId {
        worker.set_state(WorkerState::Activating);

        let previous = self.active.take().map(|mut old| {
            old.set_state(WorkerState::Redundant);
            old.id
        });

        let mut ctx = ActivateContext::default();
        if let Err(e) = worker.hooks.activate(&mut ctx).await {
            // An activate failure does not keep the worker from taking over.
            log::warn!("Activate hook of worker {} failed: {e}", worker.id);
        }

        worker.set_state(WorkerState::Active);
        if let Some(old) = previous {
            let moved = self.clients.hand_over(old, worker.id);
            log::info!("Worker {} replaced {old}, took over {moved} page(s)", worker.id);
        }
        if ctx.claims_clients() {
            let claimed = self.clients.claim(worker.id);
            log::info!("Worker {} claimed {claimed} page(s)", worker.id);
        }
        log::info!("Worker {} active ({})", worker.id, worker.label());

        let id = worker.id;
        self.active = Some(worker);
        id
    }

    /// Registers activity from the page `client_key` and returns the hooks
    /// that should answer its requests.
    ///
    /// `None` means the page is uncontrolled and goes straight to the network.
    pub async fn handler_for(&mut self, client_key: &str) -> Option<Arc<dyn WorkerHooks>> {
        if let Some(timeout) = self.client_idle_timeout {
            let closed = self.clients.close_idle(timeout);
            if closed > 0 {
                log::debug!("Closed {closed} idle page(s)");
                self.try_activate().await;
            }
        }

        let active_id = self.active.as_ref().map(ServiceWorker::id);
        let controller = self.clients.touch(client_key, active_id).controller;
        match (&self.active, controller) {
            (Some(active), Some(id)) if active.id == id => Some(active.hooks()),
            _ => None,
        }
    }

    /// Closes a page; a waiting worker may activate as a result.
    pub async fn close_client(&mut self, client_key: &str) -> bool {
        let closed = self.clients.close(client_key);
        if closed {
            self.try_activate().await;
        }
        closed
    }

    #[must_use]
    pub const fn active(&self) -> Option<&ServiceWorker> {
        self.active.as_ref()
    }

    #[must_use]
    pub const fn waiting(&self) -> Option<&ServiceWorker> {
        self.waiting.as_ref()
    }

    #[must_use]
    pub const fn clients(&self) -> &Clients {
        &self.clients
    }
}
