//! Shared, read-only state every connection task needs: the admission
//! controller, the embedder's callbacks, and the negotiable subprotocol
//! list. Kept as its own module so `server.rs` (which builds it) and
//! `connection.rs` (which reads it) don't need to depend on each other.

use std::net::IpAddr;
use std::sync::Arc;

use crate::admission::Admission;
use crate::callbacks::Handlers;
use crate::registry::ConnectionRegistry;

pub struct ConnectionContext {
    pub admission: Arc<Admission>,
    pub handlers: Arc<dyn Handlers>,
    pub server_protocols: Vec<String>,
    /// Live-connection registry backing `block_ip`'s "forcibly close
    /// existing connections from this IP" requirement (spec.md §4.F) and
    /// the server's shutdown cancellation (spec.md §5).
    pub registry: Arc<ConnectionRegistry>,
}

impl ConnectionContext {
    /// Fires [`Handlers::on_error`] and mirrors it as a `tracing::warn!`
    /// event, per SPEC_FULL.md §6: an embedder that hasn't wired up the
    /// callback still gets operational visibility through `tracing`.
    pub async fn report_error(&self, description: &str) {
        tracing::warn!(error = %description, "internal error");
        self.handlers.on_error(description).await;
    }

    /// Fires [`Handlers::on_security_violation`] and mirrors it as a
    /// `tracing::warn!` event carrying the client IP and reason as
    /// structured fields, per SPEC_FULL.md §6.
    pub async fn report_security_violation(&self, client_ip: IpAddr, reason: &str) {
        tracing::warn!(%client_ip, reason, "security violation");
        self.handlers.on_security_violation(client_ip, reason).await;
    }
}
