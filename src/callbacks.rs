//! The embedder callback interface: the six hooks an application
//! supplies to classify HTTP requests, handle WebSocket messages, and learn
//! about connection lifecycle and security events.
//!
//! Modeled as one trait rather than six free-standing function pointers —
//! the idiomatic Rust shape when several optional, shared-lifetime hook
//! points need to close over the same application state (an embedder holds
//! one `Arc<dyn Handlers>`, not six separate closures).

use async_trait::async_trait;

use crate::http::Request;

/// One complete HTTP request, handed to [`Handlers::on_http_request`].
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub request: Request,
    pub body: Vec<u8>,
    pub client_ip: std::net::IpAddr,
}

/// One complete WebSocket message, handed to
/// [`Handlers::on_websocket_message`].
#[derive(Debug, Clone)]
pub struct WebSocketMessage {
    pub opcode: crate::frame::OpCode,
    pub payload: Vec<u8>,
    pub client_ip: std::net::IpAddr,
}

/// The embedder callback interface. All methods are synchronous *on the
/// connection's task* — they may `await`, but the connection makes no
/// further progress until they return, preserving per-connection message
/// ordering.
///
/// Every method has a default no-op implementation; an embedder overrides
/// only the hooks it cares about.
#[async_trait]
pub trait Handlers: Send + Sync {
    /// Computes the response body for a classified HTTP request. If the
    /// returned bytes begin with `HTTP/`, they are written to the wire
    /// verbatim (the callback produced a full response); otherwise they are
    /// wrapped in a `200 OK` with a computed `Content-Length`.
    async fn on_http_request(&self, _request: HttpRequest) -> Vec<u8> {
        Vec::new()
    }

    /// Handles one complete, UTF-8-validated (if TEXT) WebSocket message.
    /// A `Some` return is sent back as a TEXT frame.
    async fn on_websocket_message(&self, _message: WebSocketMessage) -> Option<String> {
        None
    }

    /// Fired once admission succeeds, before the connection does anything
    /// else.
    async fn on_connect(&self, _client_ip: std::net::IpAddr) {}

    /// Fired once a connection reaches CLOSED.
    async fn on_disconnect(&self, _client_ip: std::net::IpAddr) {}

    /// Fired on any admission rejection or size-cap breach.
    async fn on_security_violation(&self, _client_ip: std::net::IpAddr, _reason: &str) {}

    /// Fired on any non-fatal internal error.
    async fn on_error(&self, _description: &str) {}
}

/// A [`Handlers`] implementation that does nothing, for servers that only
/// want the ambient `tracing` events.
pub struct NoopHandlers;

#[async_trait]
impl Handlers for NoopHandlers {}
