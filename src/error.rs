//! Error taxonomy: every failure mode the crate can produce gets its own
//! variant, and the platform error number (when the failure originated in
//! the OS) rides along inside the wrapped [`std::io::Error`].

use std::io;

/// The crate-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("socket create failed: {0}")]
    SocketCreate(#[source] io::Error),

    #[error("socket bind failed: {0}")]
    SocketBind(#[source] io::Error),

    #[error("socket listen failed: {0}")]
    SocketListen(#[source] io::Error),

    #[error("socket accept failed: {0}")]
    SocketAccept(#[source] io::Error),

    #[error("socket connect failed: {0}")]
    SocketConnect(#[source] io::Error),

    #[error("socket send failed: {0}")]
    SocketSend(#[source] io::Error),

    #[error("socket receive failed: {0}")]
    SocketReceive(#[source] io::Error),

    #[error("socket set-option failed: {0}")]
    SocketSetOption(#[source] io::Error),

    #[error("socket getsockname failed: {0}")]
    SocketGetsocknameLike(#[source] io::Error),

    #[error("address parse failed: {0}")]
    AddressParse(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    #[error("websocket handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("websocket frame parse failed: {0}")]
    FrameParseFailed(&'static str),

    #[error("invalid websocket opcode: {0:#x}")]
    InvalidOpcode(u8),

    #[error("websocket payload too large")]
    PayloadTooLarge,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("invalid utf-8 in text message")]
    InvalidUtf8,

    #[error("security violation: {0}")]
    SecurityViolation(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl GateError {
    /// The platform error number, when this error wraps an OS error.
    /// `None` for errors with no underlying `errno`/`WSAGetLastError` value.
    pub fn platform_errno(&self) -> Option<i32> {
        match self {
            GateError::SocketCreate(e)
            | GateError::SocketBind(e)
            | GateError::SocketListen(e)
            | GateError::SocketAccept(e)
            | GateError::SocketConnect(e)
            | GateError::SocketSend(e)
            | GateError::SocketReceive(e)
            | GateError::SocketSetOption(e)
            | GateError::SocketGetsocknameLike(e)
            | GateError::Io(e) => e.raw_os_error(),
            _ => None,
        }
    }
}

/// The crate's `Result` alias.
pub type Result<T> = std::result::Result<T, GateError>;
