//! Pages (clients) a worker may control.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::lifecycle::WorkerId;

/// An open page, identified by a caller-chosen key.
#[derive(Debug, Clone)]
pub struct Client {
    pub key: String,
    /// Worker currently controlling this page, if any.
    pub controller: Option<WorkerId>,
    pub last_seen: Instant,
}

/// Registry of open clients.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the client for `key`, opening it under `controller` if new.
    ///
    /// An existing client keeps its controller; only activation or claim
    /// changes it.
    pub fn touch(&mut self, key: &str, controller: Option<WorkerId>) -> &Client {
        let client = self.clients.entry(key.to_string()).or_insert_with(|| Client {
            key: key.to_string(),
            controller,
            last_seen: Instant::now(),
        });
        client.last_seen = Instant::now();
        client
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Client> {
        self.clients.get(key)
    }

    /// Closes a client. Returns false if it was not open.
    pub fn close(&mut self, key: &str) -> bool {
        self.clients.remove(key).is_some()
    }

    /// Closes clients not seen for longer than `max_idle`.
    pub fn close_idle(&mut self, max_idle: Duration) -> usize {
        let before = self.clients.len();
        self.clients
            .retain(|_, client| client.last_seen.elapsed() < max_idle);
        before - self.clients.len()
    }

    /// Number of clients controlled by `worker`.
    #[must_use]
    pub fn controlled_by(&self, worker: WorkerId) -> usize {
        self.clients
            .values()
            .filter(|c| c.controller == Some(worker))
            .count()
    }

    /// Moves every client controlled by `from` to `to`.
    pub fn hand_over(&mut self, from: WorkerId, to: WorkerId) -> usize {
        let mut moved = 0;
        for client in self.clients.values_mut() {
            if client.controller == Some(from) {
                client.controller = Some(to);
                moved += 1;
            }
        }
        moved
    }

    /// Puts every client under `worker`. Returns how many changed controller.
    pub fn claim(&mut self, worker: WorkerId) -> usize {
        let mut claimed = 0;
        for client in self.clients.values_mut() {
            if client.controller != Some(worker) {
                client.controller = Some(worker);
                claimed += 1;
            }
        }
        claimed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Client> {
        self.clients.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_keeps_existing_controller() {
        let mut clients = Clients::new();
        let a = WorkerId::new();
        let b = WorkerId::new();

        clients.touch("10.0.0.1", Some(a));
        let client = clients.touch("10.0.0.1", Some(b));
        assert_eq!(client.controller, Some(a));
        assert_eq!(clients.len(), 1);
    }

    #[test]
    fn claim_takes_uncontrolled_and_foreign_clients() {
        let mut clients = Clients::new();
        let old = WorkerId::new();
        let new = WorkerId::new();
        clients.touch("a", None);
        clients.touch("b", Some(old));
        clients.touch("c", Some(new));

        assert_eq!(clients.claim(new), 2);
        assert_eq!(clients.controlled_by(new), 3);
        assert_eq!(clients.controlled_by(old), 0);
    }

    #[test]
    fn hand_over_leaves_uncontrolled_alone() {
        let mut clients = Clients::new();
        let old = WorkerId::new();
        let new = WorkerId::new();
        clients.touch("a", None);
        clients.touch("b", Some(old));

        assert_eq!(clients.hand_over(old, new), 1);
        assert_eq!(clients.get("a").unwrap().controller, None);
        assert_eq!(clients.get("b").unwrap().controller, Some(new));
    }

    #[test]
    fn close_idle_removes_stale_clients() {
        let mut clients = Clients::new();
        clients.touch("a", None);
        assert_eq!(clients.close_idle(Duration::from_secs(60)), 0);
        assert_eq!(clients.close_idle(Duration::ZERO), 1);
        assert!(clients.is_empty());
    }
}
