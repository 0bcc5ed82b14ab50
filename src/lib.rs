// Copyright 2023 Divy Srivastava <dj.srivastava23@gmail.com>
// Copyright 2026 Will Rnch <will@example.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! _wsgate_ is a standalone HTTP/1.1 + WebSocket (RFC 6455) server core with
//! built-in admission control: per-IP and global connection caps, a sliding
//! request-rate window, an IP blocklist, and idle-connection eviction.
//!
//! It owns the whole lifecycle from accepted TCP socket to classified
//! request: a connection either gets a plain HTTP response from your
//! [`Handlers::on_http_request`] callback, or is upgraded to a WebSocket and
//! its messages handed to [`Handlers::on_websocket_message`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use wsgate::{Builder, Handlers, HttpRequest, WebSocketMessage};
//!
//! struct Echo;
//!
//! #[async_trait::async_trait]
//! impl Handlers for Echo {
//!     async fn on_http_request(&self, _request: HttpRequest) -> Vec<u8> {
//!         b"<h1>hi</h1>".to_vec()
//!     }
//!
//!     async fn on_websocket_message(&self, message: WebSocketMessage) -> Option<String> {
//!         String::from_utf8(message.payload).ok()
//!     }
//! }
//!
//! # async fn run() -> wsgate::Result<()> {
//! let server = Builder::new()
//!     .port(8080)
//!     .handlers(Arc::new(Echo))
//!     .build()
//!     .await?;
//!
//! server.run(Duration::from_secs(5)).await;
//! # Ok(())
//! # }
//! ```

mod admission;
mod callbacks;
mod close;
mod connection;
mod context;
mod error;
mod fragment;
mod frame;
mod handshake;
mod http;
mod mask;
mod registry;
mod server;
mod socket;
mod utf8;

pub use admission::{Rejection, SecurityConfig};
pub use callbacks::{Handlers, HttpRequest, NoopHandlers, WebSocketMessage};
pub use close::CloseCode;
pub use error::{GateError, Result};
pub use frame::{parse as parse_frame, parse_with_limit as parse_frame_with_limit, Frame, OpCode, ParseOutcome, Payload};
pub use handshake::HandshakeInfo;
pub use http::{Headers, Request};
pub use server::{builder, Builder, Server};
pub use socket::SocketOptions;
