//! Live-connection registry: lets the admission controller's blocklist and
//! the server's shutdown path reach running connection tasks directly.
//!
//! The original's `HttpWsServer` gets this for free by walking its own
//! `m_clients` map inside `BlockIP`
//! (`examples/original_source/src/HttpWsServer.cpp`); this crate's
//! single-owner-per-task connection model has no implicit equivalent, so
//! each accepted connection registers a cancellation handle here on accept
//! and removes it on CLOSED.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

/// Opaque handle identifying one connection's slot in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

/// The cancellation signal a connection task selects on. Resolves once the
/// registry cancels this connection's id, either because its IP was
/// blocked or the server is shutting down.
#[derive(Clone)]
pub struct Cancel(Arc<Notify>);

impl Cancel {
    pub async fn cancelled(&self) {
        self.0.notified().await;
    }
}

struct Entry {
    ip: IpAddr,
    notify: Arc<Notify>,
}

/// Tracks every live connection task.
#[derive(Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<ConnId, Entry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a newly accepted connection, returning its id and the
    /// cancellation signal its task should select on alongside its reads.
    pub fn register(&self, ip: IpAddr) -> (ConnId, Cancel) {
        let id = ConnId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let notify = Arc::new(Notify::new());
        self.entries
            .lock()
            .unwrap()
            .insert(id, Entry { ip, notify: notify.clone() });
        (id, Cancel(notify))
    }

    /// Removes a connection's registry entry once it reaches CLOSED.
    pub fn remove(&self, id: ConnId) {
        self.entries.lock().unwrap().remove(&id);
    }

    /// Signals every currently-registered connection from `ip` to close.
    /// Uses `Notify::notify_one`, which stores a permit when no task is
    /// currently waiting, so a connection that hasn't reached its next read
    /// yet still observes the cancellation on its very next attempt.
    pub fn cancel_ip(&self, ip: IpAddr) {
        let entries = self.entries.lock().unwrap();
        for entry in entries.values().filter(|e| e.ip == ip) {
            entry.notify.notify_one();
        }
    }

    /// Signals every currently-registered connection to close, regardless
    /// of IP — used by server shutdown.
    pub fn cancel_all(&self) {
        let entries = self.entries.lock().unwrap();
        for entry in entries.values() {
            entry.notify.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(n: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 0, 2, n))
    }

    #[tokio::test]
    async fn cancel_ip_wakes_only_matching_connections() {
        let registry = ConnectionRegistry::new();
        let (_id_a, cancel_a) = registry.register(ip(1));
        let (_id_b, cancel_b) = registry.register(ip(2));

        registry.cancel_ip(ip(1));

        tokio::time::timeout(std::time::Duration::from_millis(100), cancel_a.cancelled())
            .await
            .expect("matching connection must be cancelled");
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(20), cancel_b.cancelled())
                .await
                .is_err(),
            "non-matching connection must not be cancelled"
        );
    }

    #[tokio::test]
    async fn cancel_before_wait_is_not_lost() {
        let registry = ConnectionRegistry::new();
        let (_id, cancel) = registry.register(ip(5));
        registry.cancel_ip(ip(5));

        tokio::time::timeout(std::time::Duration::from_millis(100), cancel.cancelled())
            .await
            .expect("permit stored by notify_one must not be lost");
    }

    #[tokio::test]
    async fn cancel_all_wakes_every_connection() {
        let registry = ConnectionRegistry::new();
        let (_id_a, cancel_a) = registry.register(ip(1));
        let (_id_b, cancel_b) = registry.register(ip(2));

        registry.cancel_all();

        for cancel in [cancel_a, cancel_b] {
            tokio::time::timeout(std::time::Duration::from_millis(100), cancel.cancelled())
                .await
                .expect("cancel_all must wake every registered connection");
        }
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (id, _cancel) = registry.register(ip(9));
        registry.remove(id);
        registry.remove(id);
    }
}
