//! The handshake validator: parses an HTTP/1.1 request, checks
//! RFC 6455's mandatory headers, computes the accept key, and negotiates a
//! subprotocol.

use base64::Engine as _;
use sha1::{Digest, Sha1};

use crate::error::{GateError, Result};
use crate::http::{self, Request};

/// The RFC 6455 magic GUID concatenated with the client key before hashing.
const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Everything the handshake validator extracts from a client's upgrade
/// request.
#[derive(Debug, Clone)]
pub struct HandshakeInfo {
    pub host: Option<String>,
    pub origin: Option<String>,
    pub client_key: String,
    pub version: String,
    pub protocols: Vec<String>,
    pub extensions: Vec<String>,
    pub request: Request,
    /// Filled in by [`negotiate_protocol`] once the server's supported list
    /// is known.
    pub selected_protocol: Option<String>,
}

/// Runs RFC 6455's mandatory-header checklist against a full header block.
///
/// `raw` must already contain the CRLF-CRLF header terminator; the caller
/// (the connection state machine) detects that before calling this.
pub fn validate(raw: &str) -> Result<HandshakeInfo> {
    let request = http::parse_request(raw)
        .ok_or_else(|| GateError::HandshakeFailed("malformed request line".into()))?;

    if request.method != "GET" {
        return Err(GateError::HandshakeFailed(format!(
            "method must be GET, got {}",
            request.method
        )));
    }
    if request.version != "HTTP/1.1" {
        return Err(GateError::HandshakeFailed(format!(
            "version must be HTTP/1.1, got {}",
            request.version
        )));
    }

    let upgrade = request
        .headers
        .get("Upgrade")
        .ok_or_else(|| GateError::HandshakeFailed("missing Upgrade header".into()))?;
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(GateError::HandshakeFailed(format!(
            "Upgrade header must be websocket, got {upgrade}"
        )));
    }

    let connection = request
        .headers
        .get("Connection")
        .ok_or_else(|| GateError::HandshakeFailed("missing Connection header".into()))?;
    let has_upgrade_token = http::split_comma_list(connection)
        .iter()
        .any(|tok| tok.eq_ignore_ascii_case("upgrade"));
    if !has_upgrade_token {
        return Err(GateError::HandshakeFailed(
            "Connection header must contain Upgrade".into(),
        ));
    }

    let client_key = request
        .headers
        .get("Sec-WebSocket-Key")
        .ok_or_else(|| GateError::HandshakeFailed("missing Sec-WebSocket-Key".into()))?
        .trim()
        .to_string();
    if client_key.len() < 16 {
        return Err(GateError::HandshakeFailed(
            "Sec-WebSocket-Key too short".into(),
        ));
    }

    let version = request
        .headers
        .get("Sec-WebSocket-Version")
        .ok_or_else(|| GateError::HandshakeFailed("missing Sec-WebSocket-Version".into()))?
        .to_string();
    if version != "13" {
        return Err(GateError::HandshakeFailed(format!(
            "unsupported Sec-WebSocket-Version: {version}"
        )));
    }

    let host = request.headers.get("Host").map(str::to_string);
    if host.is_none() {
        return Err(GateError::HandshakeFailed("missing Host header".into()));
    }

    let origin = request.headers.get("Origin").map(str::to_string);
    let protocols = request
        .headers
        .get("Sec-WebSocket-Protocol")
        .map(http::split_comma_list)
        .unwrap_or_default();
    let extensions = request
        .headers
        .get("Sec-WebSocket-Extensions")
        .map(http::split_comma_list)
        .unwrap_or_default();

    Ok(HandshakeInfo {
        host,
        origin,
        client_key,
        version,
        protocols,
        extensions,
        request,
        selected_protocol: None,
    })
}

/// Computes `Sec-WebSocket-Accept` for `client_key` per RFC 6455 §1.3:
/// concatenate with the magic GUID, SHA-1 hash, base64-encode.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(digest)
}

/// Picks the first of the client's ordered subprotocols that also appears
/// in `server_supported`; client preference wins ties.
pub fn negotiate_protocol(client_requested: &[String], server_supported: &[String]) -> Option<String> {
    client_requested
        .iter()
        .find(|p| server_supported.iter().any(|s| s == *p))
        .cloned()
}

/// Builds the `101 Switching Protocols` response for a validated handshake.
pub fn build_101_response(info: &HandshakeInfo) -> String {
    let accept = accept_key(&info.client_key);
    let mut response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n"
    );
    if let Some(protocol) = &info.selected_protocol {
        response.push_str(&format!("Sec-WebSocket-Protocol: {protocol}\r\n"));
    }
    response.push_str("\r\n");
    response
}

/// Builds the `400 Bad Request` response for a failed handshake.
pub fn build_400_response(reason: &str) -> String {
    format!(
        "HTTP/1.1 400 Bad Request\r\n\
         Content-Type: text/plain; charset=UTF-8\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {reason}",
        reason.len()
    )
}
