//! The platform socket layer and async I/O backend.
//!
//! Backed by `tokio::net` rather than hand-rolled per-platform FFI: tokio's
//! reactor already *is* a readiness-based async I/O backend. Socket-option
//! tuning (send/receive buffer size, keepalive)
//! that `tokio::net::TcpStream` doesn't expose directly goes through
//! `socket2::SockRef`, which borrows the existing tokio socket rather than
//! taking ownership of a second file descriptor.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use socket2::SockRef;
use tokio::net::{TcpListener, TcpStream};

use crate::error::{GateError, Result};

static SUBSYSTEM_REFCOUNT: AtomicUsize = AtomicUsize::new(0);
static SUBSYSTEM_START: OnceLock<std::time::Instant> = OnceLock::new();

/// The process-wide reference-counted init/teardown guard. Every live
/// [`Listener`] and [`Socket`] holds a clone; the count rising from zero
/// runs one-time process setup, falling to zero runs teardown.
///
/// There is no WSAStartup/WSACleanup equivalent to wrap when the transport
/// is already owned by the tokio runtime, so this guard's real job is a
/// single process-lifetime resource, acquired once and released once, that
/// the rest of the crate can depend on being initialized.
#[derive(Clone)]
pub struct SubsystemGuard(Arc<()>);

impl SubsystemGuard {
    pub fn acquire() -> Self {
        if SUBSYSTEM_REFCOUNT.fetch_add(1, Ordering::SeqCst) == 0 {
            SUBSYSTEM_START.get_or_init(std::time::Instant::now);
            tracing::debug!("socket subsystem initialized");
        }
        SubsystemGuard(Arc::new(()))
    }

    /// How long the subsystem has been initialized, or `None` before the
    /// first guard is acquired.
    pub fn uptime(&self) -> Option<std::time::Duration> {
        SUBSYSTEM_START.get().map(|start| start.elapsed())
    }
}

impl Drop for SubsystemGuard {
    fn drop(&mut self) {
        if SUBSYSTEM_REFCOUNT.fetch_sub(1, Ordering::SeqCst) == 1 {
            tracing::debug!("socket subsystem torn down");
        }
    }
}

/// Options applied to an accepted connection's socket.
#[derive(Debug, Clone, Copy)]
pub struct SocketOptions {
    pub keep_alive: bool,
    pub send_buffer_size: Option<usize>,
    pub receive_buffer_size: Option<usize>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        SocketOptions {
            keep_alive: true,
            send_buffer_size: None,
            receive_buffer_size: None,
        }
    }
}

fn apply_options(stream: &TcpStream, opts: &SocketOptions) -> Result<()> {
    stream
        .set_nodelay(true)
        .map_err(GateError::SocketSetOption)?;

    let sock_ref = SockRef::from(stream);
    sock_ref
        .set_keepalive(opts.keep_alive)
        .map_err(GateError::SocketSetOption)?;
    if let Some(size) = opts.send_buffer_size {
        sock_ref.set_send_buffer_size(size).map_err(GateError::SocketSetOption)?;
    }
    if let Some(size) = opts.receive_buffer_size {
        sock_ref
            .set_recv_buffer_size(size)
            .map_err(GateError::SocketSetOption)?;
    }
    Ok(())
}

/// A single owning socket handle: exactly one
/// owner, closed and deregistered from the subsystem on drop.
pub struct Socket {
    pub stream: TcpStream,
    peer: SocketAddr,
    _guard: SubsystemGuard,
}

impl Socket {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.stream
            .local_addr()
            .map_err(GateError::SocketGetsocknameLike)
    }
}

/// A bound, listening socket.
pub struct Listener {
    inner: TcpListener,
    options: SocketOptions,
    _guard: SubsystemGuard,
}

impl Listener {
    /// Creates, binds, and begins listening on `addr` in one step — the
    /// classic create/bind/listen sequence collapses naturally onto
    /// `TcpListener::bind`, which tokio itself implements as that sequence.
    pub async fn bind(addr: SocketAddr, options: SocketOptions) -> Result<Self> {
        let inner = TcpListener::bind(addr).await.map_err(GateError::SocketBind)?;
        Ok(Listener {
            inner,
            options,
            _guard: SubsystemGuard::acquire(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.local_addr().map_err(GateError::SocketGetsocknameLike)
    }

    /// Accepts one connection, applying the configured socket options.
    pub async fn accept(&self) -> Result<Socket> {
        let (stream, peer) = self.inner.accept().await.map_err(GateError::SocketAccept)?;
        apply_options(&stream, &self.options)?;
        Ok(Socket {
            stream,
            peer,
            _guard: self._guard.clone(),
        })
    }
}

/// Tests whether `addr` is currently free to bind.
pub async fn is_port_available(addr: SocketAddr) -> bool {
    TcpListener::bind(addr).await.is_ok()
}

/// Enumerates the process's local IPv4 and IPv6 addresses, for diagnostics
///. Best-effort: probes by opening a UDP socket toward a
/// well-known external address per interface family and reading back the
/// local address the kernel picked, which requires no elevated privileges
/// and no platform-specific interface-listing API.
pub fn enumerate_local_addresses() -> Vec<std::net::IpAddr> {
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, UdpSocket};

    let mut addrs = Vec::new();

    if let Ok(sock) = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)) {
        if sock.connect((Ipv4Addr::new(198, 51, 100, 1), 9)).is_ok() {
            if let Ok(local) = sock.local_addr() {
                addrs.push(IpAddr::V4(match local.ip() {
                    IpAddr::V4(v4) => v4,
                    IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
                }));
            }
        }
    }

    if let Ok(sock) = UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0)) {
        if sock.connect((Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1), 9)).is_ok() {
            if let Ok(local) = sock.local_addr() {
                addrs.push(local.ip());
            }
        }
    }

    addrs
}
