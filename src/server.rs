//! The server: a fluent [`Builder`] and the running [`Server`] handle it
//! produces.
//!
//! Translates the original's `HttpWsServer::Set*`/`On*` fluent API
//! (`examples/original_source/include/WebSocket/HttpWsServer.h`) into a
//! consuming Rust builder, and its `ServerLoop`/`HandleClient` split into an
//! accept loop that spawns one task per connection.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::JoinSet;

use crate::admission::{Admission, SecurityConfig};
use crate::callbacks::{Handlers, NoopHandlers};
use crate::context::ConnectionContext;
use crate::error::{GateError, Result};
use crate::socket::{Listener, SocketOptions};
use crate::{connection, socket};

/// How long [`Server::stop`] waits for in-flight connections to reach
/// CLOSED before abandoning them.
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// How often the housekeeping pass sweeps idle connections and stale rate
/// windows.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(1);

/// Consuming, fluent server builder, the Rust analogue of the
/// original's `HttpWsServer& Set*(...)`/`On*(...)` chain.
pub struct Builder {
    port: u16,
    bind_address: String,
    security_config: SecurityConfig,
    handlers: Arc<dyn Handlers>,
    server_protocols: Vec<String>,
    socket_options: SocketOptions,
}

impl Default for Builder {
    fn default() -> Self {
        Builder {
            port: 8080,
            bind_address: "127.0.0.1".to_string(),
            security_config: SecurityConfig::default(),
            handlers: Arc::new(NoopHandlers),
            server_protocols: Vec::new(),
            socket_options: SocketOptions::default(),
        }
    }
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn bind_address(mut self, address: impl Into<String>) -> Self {
        self.bind_address = address.into();
        self
    }

    pub fn security_config(mut self, config: SecurityConfig) -> Self {
        self.security_config = config;
        self
    }

    pub fn socket_options(mut self, options: SocketOptions) -> Self {
        self.socket_options = options;
        self
    }

    /// Registers the embedder's callback set, replacing any previous one.
    pub fn handlers(mut self, handlers: Arc<dyn Handlers>) -> Self {
        self.handlers = handlers;
        self
    }

    /// Sets the subprotocols this server can negotiate, in preference order.
    pub fn subprotocols(mut self, protocols: Vec<String>) -> Self {
        self.server_protocols = protocols;
        self
    }

    /// Binds the listening socket and returns a [`Server`] handle. Does not
    /// yet accept connections — call [`Server::run`] to start the accept
    /// loop.
    pub async fn build(self) -> Result<Server> {
        let addr = bind_addr(&self.bind_address, self.port)?;
        let listener = Listener::bind(addr, self.socket_options).await?;
        let admission = Arc::new(Admission::new(self.security_config));

        Ok(Server {
            listener: Arc::new(listener),
            context: Arc::new(ConnectionContext {
                admission,
                handlers: self.handlers,
                server_protocols: self.server_protocols,
                registry: Arc::new(crate::registry::ConnectionRegistry::new()),
            }),
            shutdown: Arc::new(Shutdown {
                stopping: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        })
    }
}

fn bind_addr(bind_address: &str, port: u16) -> Result<SocketAddr> {
    let ip: IpAddr = bind_address
        .parse()
        .map_err(|_| GateError::AddressParse(bind_address.to_string()))?;
    Ok(SocketAddr::new(ip, port))
}

struct Shutdown {
    stopping: AtomicBool,
    notify: Notify,
}

/// A running (or stopped) server handle. Cheap to clone in spirit — callers
/// hold the one instance [`Builder::build`] returns and call `run`/`stop`/
/// introspection methods on it from different tasks.
pub struct Server {
    listener: Arc<Listener>,
    context: Arc<ConnectionContext>,
    shutdown: Arc<Shutdown>,
}

impl Server {
    pub fn port(&self) -> Result<u16> {
        Ok(self.listener.local_addr()?.port())
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn connection_count(&self) -> usize {
        self.context.admission.connection_count()
    }

    pub fn connected_ips(&self) -> Vec<IpAddr> {
        self.context.admission.connected_ips()
    }

    pub fn blocked_ips(&self) -> Vec<IpAddr> {
        self.context.admission.blocked_ips()
    }

    /// Blocks `ip` and forcibly closes any connections it already has open,
    /// per spec.md §4.F ("adding an IP also forcibly closes any existing
    /// connections from that IP").
    pub fn block_ip(&self, ip: IpAddr) {
        self.context.admission.block_ip(ip);
        self.context.registry.cancel_ip(ip);
    }

    pub fn unblock_ip(&self, ip: IpAddr) {
        self.context.admission.unblock_ip(ip);
    }

    pub fn security_config(&self) -> &SecurityConfig {
        self.context.admission.config()
    }

    /// Requests a graceful shutdown:
    /// stop accepting new connections, let in-flight ones finish on their
    /// own within `grace`, then abandon whatever's left.
    pub fn request_stop(&self) {
        self.shutdown.stopping.store(true, Ordering::SeqCst);
        self.shutdown.notify.notify_waiters();
    }

    /// Runs the accept loop until [`Server::request_stop`] is called
    /// elsewhere, then waits up to `grace` for spawned connection tasks to
    /// finish before returning.
    pub async fn run(&self, grace: Duration) {
        let mut tasks = JoinSet::new();
        let mut housekeeping = tokio::time::interval(HOUSEKEEPING_INTERVAL);

        loop {
            tokio::select! {
                _ = self.shutdown.notify.notified() => {
                    tracing::info!("server stopping, marking in-flight connections for closing");
                    self.context.registry.cancel_all();
                    break;
                }
                _ = housekeeping.tick() => {
                    self.run_housekeeping();
                    while tasks.try_join_next().is_some() {}
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok(conn) => self.admit_and_spawn(conn, &mut tasks),
                        Err(e) => {
                            self.context.handlers.on_error(&e.to_string()).await;
                        }
                    }
                }
            }
        }

        let drained = tokio::time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            tracing::warn!("shutdown grace period elapsed, forcibly closing remaining connections");
            tasks.shutdown().await;
        }
    }

    /// Runs the accept loop forever (never stops on its own); convenience
    /// wrapper around [`Server::run`] using the default shutdown grace.
    pub async fn run_forever(&self) {
        self.run(DEFAULT_SHUTDOWN_GRACE).await;
    }

    fn admit_and_spawn(&self, conn: socket::Socket, tasks: &mut JoinSet<()>) {
        let client_ip = conn.peer_addr().ip();
        let now = Instant::now();

        match self.context.admission.admit(client_ip, now) {
            Ok(()) => {
                let ctx = self.context.clone();
                let (conn_id, cancel) = ctx.registry.register(client_ip);
                tasks.spawn(async move {
                    connection::run(conn, client_ip, ctx, conn_id, cancel).await;
                });
            }
            Err(rejection) => {
                let handlers = self.context.handlers.clone();
                let reason = rejection.reason();
                tokio::spawn(async move {
                    handlers.on_security_violation(client_ip, reason).await;
                });
                tracing::debug!(%client_ip, reason, "connection rejected by admission control");
            }
        }
    }

    fn run_housekeeping(&self) {
        let now = Instant::now();
        self.context.admission.sweep_stale_windows(now);
    }
}

/// Convenience entry point matching the original's constructor defaults
/// (`HttpWsServer(port = 8080, bindAddress = "127.0.0.1")`).
pub fn builder() -> Builder {
    Builder::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingHandlers {
        connects: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Handlers for CountingHandlers {
        async fn on_connect(&self, _client_ip: IpAddr) {
            self.connects.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_http_request(&self, _request: crate::callbacks::HttpRequest) -> Vec<u8> {
            b"<h1>hi</h1>".to_vec()
        }
    }

    #[tokio::test]
    async fn serves_one_plain_http_request() {
        let handlers = Arc::new(CountingHandlers {
            connects: AtomicUsize::new(0),
        });
        let server = Builder::new()
            .bind_address("127.0.0.1")
            .port(0)
            .handlers(handlers.clone())
            .build()
            .await
            .unwrap();

        let addr = server.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            server.run(Duration::from_millis(200)).await;
            server
        });

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();

        let mut response = Vec::new();
        let _ = tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut response))
            .await;
        let text = String::from_utf8_lossy(&response);
        assert!(text.contains("200 OK"));
        assert!(text.contains("<h1>hi</h1>"));

        assert_eq!(handlers.connects.load(Ordering::SeqCst), 1);
        drop(handle);
    }

    #[test]
    fn bind_addr_rejects_garbage_address() {
        assert!(bind_addr("not-an-ip", 80).is_err());
    }

    #[test]
    fn bind_addr_accepts_ipv6() {
        let addr = bind_addr("::1", 9001).unwrap();
        assert!(addr.is_ipv6());
        assert_eq!(addr.port(), 9001);
    }
}
