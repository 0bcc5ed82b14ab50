//! The connection state machine: owns one socket plus its
//! receive buffer and drives the
//! `ACCEPTED → RECEIVING → CLASSIFIED → HTTP_RESPONDING | WS_HANDSHAKING →
//! WS_OPEN → CLOSING → CLOSED` progression.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

use crate::callbacks::{HttpRequest, WebSocketMessage};
use crate::close::CloseCode;
use crate::context::ConnectionContext;
use crate::fragment::{ReassembleError, Reassembler};
use crate::frame::{self, Frame, OpCode, ParseOutcome, Payload};
use crate::registry::{Cancel, ConnId};
use crate::{handshake, http};

/// The state the connection record currently occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Accepted,
    Receiving,
    Classified,
    HttpResponding,
    WsHandshaking,
    WsOpen,
    Closing,
    Closed,
}

const READ_CHUNK: usize = 8 * 1024;

/// Drives one accepted socket through its whole lifecycle. Returns once the
/// connection reaches CLOSED; the caller (the server loop) is responsible
/// for releasing the admission slot it already holds by calling
/// [`crate::admission::Admission::release`] — this function does that
/// itself before returning, so callers must not release twice.
///
/// `conn_id`/`cancel` are this connection's registry handle (registered by
/// the caller before spawning): `cancel` is selected against every blocking
/// read so a `block_ip` or server shutdown elsewhere can force this
/// connection to CLOSING, and `conn_id` is deregistered once CLOSED is
/// reached.
pub async fn run(
    mut socket: crate::socket::Socket,
    client_ip: IpAddr,
    ctx: Arc<ConnectionContext>,
    conn_id: ConnId,
    cancel: Cancel,
) {
    let mut state = State::Accepted;
    let mut recv_buffer = BytesMut::with_capacity(READ_CHUNK);
    let mut reassembler = Reassembler::new();
    let mut is_websocket = false;
    let mut close_sent = false;
    let mut close_received = false;

    let config = ctx.admission.config().clone();
    let idle_timeout = if config.enable_connection_timeout {
        Some(config.connection_timeout)
    } else {
        None
    };
    let mut deadline = idle_timeout.map(|d| Instant::now() + d);

    ctx.handlers.on_connect(client_ip).await;
    state = State::Receiving;

    'outer: loop {
        match state {
            State::Receiving => {
                if http::find_header_terminator(&recv_buffer).is_none() {
                    match read_some(&mut socket, &mut recv_buffer, &mut deadline, idle_timeout, &cancel).await {
                        ReadOutcome::Data => {
                            ctx.admission.touch(client_ip, Instant::now());
                        }
                        ReadOutcome::PeerClosed => {
                            state = State::Closing;
                            continue 'outer;
                        }
                        ReadOutcome::Idle => {
                            tracing::debug!(%client_ip, "idle timeout while awaiting HTTP headers");
                            state = State::Closing;
                            continue 'outer;
                        }
                        ReadOutcome::Cancelled => {
                            tracing::debug!(%client_ip, "connection cancelled while awaiting HTTP headers");
                            state = State::Closing;
                            continue 'outer;
                        }
                        ReadOutcome::Error(e) => {
                            ctx.report_error(&e.to_string()).await;
                            state = State::Closing;
                            continue 'outer;
                        }
                    }

                    if http::find_header_terminator(&recv_buffer).is_none() {
                        if !ctx.admission.check_size(
                            client_ip,
                            recv_buffer.len(),
                            config.max_request_size,
                            config.enable_request_size_limit,
                        ) {
                            ctx.report_security_violation(client_ip, "request exceeds max_request_size")
                                .await;
                            state = State::Closing;
                        }
                        continue 'outer;
                    }
                }
                state = State::Classified;
            }

            State::Classified => {
                let term = http::find_header_terminator(&recv_buffer).unwrap();
                let header_block = String::from_utf8_lossy(&recv_buffer[..term]).into_owned();

                let is_ws = match http::parse_request(&header_block) {
                    Some(req) => {
                        let upgrade_ok = req
                            .headers
                            .get("Upgrade")
                            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
                        let connection_ok = req.headers.get("Connection").is_some_and(|v| {
                            http::split_comma_list(v)
                                .iter()
                                .any(|tok| tok.eq_ignore_ascii_case("upgrade"))
                        });
                        let has_key = req.headers.get("Sec-WebSocket-Key").is_some();
                        upgrade_ok && connection_ok && has_key
                    }
                    None => false,
                };

                state = if is_ws {
                    State::WsHandshaking
                } else {
                    State::HttpResponding
                };
            }

            State::HttpResponding => {
                let term = http::find_header_terminator(&recv_buffer).unwrap();
                let header_block = String::from_utf8_lossy(&recv_buffer[..term]).into_owned();
                let body = recv_buffer[term..].to_vec();

                let response_bytes = match http::parse_request(&header_block) {
                    Some(request) => {
                        let req = HttpRequest {
                            request,
                            body,
                            client_ip,
                        };
                        ctx.handlers.on_http_request(req).await
                    }
                    None => Vec::new(),
                };

                let wire = render_http_response(&response_bytes);
                if let Err(e) = socket.stream.write_all(&wire).await {
                    ctx.report_error(&e.to_string()).await;
                }
                let _ = socket.stream.flush().await;
                state = State::Closing;
            }

            State::WsHandshaking => {
                let term = http::find_header_terminator(&recv_buffer).unwrap();
                let header_block = String::from_utf8_lossy(&recv_buffer[..term]).into_owned();
                let leftover = recv_buffer.split_off(term);

                match handshake::validate(&header_block) {
                    Ok(mut info) => {
                        info.selected_protocol =
                            handshake::negotiate_protocol(&info.protocols, &ctx.server_protocols);
                        let response = handshake::build_101_response(&info);
                        if let Err(e) = socket.stream.write_all(response.as_bytes()).await {
                            ctx.report_error(&e.to_string()).await;
                            state = State::Closing;
                            continue 'outer;
                        }
                        is_websocket = true;
                        recv_buffer = leftover;
                        state = State::WsOpen;
                    }
                    Err(e) => {
                        tracing::debug!(%client_ip, error = %e, "websocket handshake failed");
                        let response = handshake::build_400_response(&e.to_string());
                        let _ = socket.stream.write_all(response.as_bytes()).await;
                        state = State::Closing;
                    }
                }
            }

            State::WsOpen => {
                let message_cap = ctx.admission.message_cap(client_ip);

                loop {
                    match frame::parse_with_limit(&recv_buffer, message_cap) {
                        ParseOutcome::Incomplete => break,
                        ParseOutcome::Oversize { declared_len } => {
                            tracing::debug!(%client_ip, declared_len, "declared frame length exceeds cap");
                            ctx.report_security_violation(client_ip, "frame exceeds max_message_size")
                                .await;
                            send_close(&mut socket, CloseCode::MESSAGE_TOO_BIG, b"").await;
                            close_sent = true;
                            state = State::Closing;
                            continue 'outer;
                        }
                        ParseOutcome::Invalid(reason) => {
                            tracing::debug!(%client_ip, reason, "malformed websocket frame");
                            send_close(&mut socket, CloseCode::PROTOCOL_ERROR, reason.as_bytes())
                                .await;
                            close_sent = true;
                            state = State::Closing;
                            continue 'outer;
                        }
                        ParseOutcome::Complete { frame, consumed } => {
                            let _ = recv_buffer.split_to(consumed);

                            if frame.rsv1 || frame.rsv2 || frame.rsv3 {
                                send_close(
                                    &mut socket,
                                    CloseCode::PROTOCOL_ERROR,
                                    b"reserved bits set",
                                )
                                .await;
                                close_sent = true;
                                state = State::Closing;
                                continue 'outer;
                            }

                            match dispatch_frame(
                                &mut socket,
                                &ctx,
                                &config,
                                client_ip,
                                frame,
                                &mut reassembler,
                                &mut close_received,
                            )
                            .await
                            {
                                FrameEffect::Continue => {}
                                FrameEffect::Close => {
                                    close_sent = true;
                                    state = State::Closing;
                                    continue 'outer;
                                }
                            }
                        }
                    }
                }

                match read_some(&mut socket, &mut recv_buffer, &mut deadline, idle_timeout, &cancel).await {
                    ReadOutcome::Data => {
                        ctx.admission.touch(client_ip, Instant::now());
                    }
                    ReadOutcome::PeerClosed => {
                        state = State::Closing;
                    }
                    ReadOutcome::Idle => {
                        tracing::debug!(%client_ip, "idle timeout in WS_OPEN");
                        state = State::Closing;
                    }
                    ReadOutcome::Cancelled => {
                        tracing::debug!(%client_ip, "connection cancelled in WS_OPEN");
                        state = State::Closing;
                    }
                    ReadOutcome::Error(e) => {
                        ctx.report_error(&e.to_string()).await;
                        state = State::Closing;
                    }
                }
            }

            State::Closing => {
                if is_websocket && !close_sent && !close_received {
                    send_close(&mut socket, CloseCode::NORMAL, b"").await;
                }
                let _ = socket.stream.shutdown().await;
                ctx.admission.release(client_ip);
                ctx.handlers.on_disconnect(client_ip).await;
                state = State::Closed;
            }

            State::Closed | State::Accepted => break 'outer,
        }
    }

    ctx.registry.remove(conn_id);
}

enum FrameEffect {
    Continue,
    Close,
}

async fn dispatch_frame(
    socket: &mut crate::socket::Socket,
    ctx: &Arc<ConnectionContext>,
    config: &crate::admission::SecurityConfig,
    client_ip: IpAddr,
    frame: Frame<'static>,
    reassembler: &mut Reassembler,
    close_received: &mut bool,
) -> FrameEffect {
    match frame.opcode {
        OpCode::Ping => {
            let pong = Frame::pong(frame.payload);
            let _ = socket.stream.write_all(&pong.generate()).await;
            FrameEffect::Continue
        }
        OpCode::Pong => FrameEffect::Continue,
        OpCode::Close => {
            *close_received = true;
            let code = close_code_from_payload(frame.payload.as_slice());
            send_close(socket, close_reply_code(code), b"").await;
            FrameEffect::Close
        }
        OpCode::Text | OpCode::Binary if frame.fin => {
            deliver_message(socket, ctx, client_ip, frame.opcode, frame.payload.into_owned()).await
        }
        OpCode::Text | OpCode::Binary => {
            match reassembler.begin(frame.opcode, frame.payload.as_slice()) {
                Ok(()) => FrameEffect::Continue,
                Err(_) => {
                    send_close(socket, CloseCode::PROTOCOL_ERROR, b"unexpected new message").await;
                    FrameEffect::Close
                }
            }
        }
        OpCode::Continuation if frame.fin => {
            match reassembler.append(frame.payload.as_slice(), config.max_message_size) {
                Ok(()) => {}
                Err(ReassembleError::TooLarge) => {
                    send_close(socket, CloseCode::MESSAGE_TOO_BIG, b"").await;
                    return FrameEffect::Close;
                }
                Err(_) => {
                    send_close(socket, CloseCode::PROTOCOL_ERROR, b"continuation without start")
                        .await;
                    return FrameEffect::Close;
                }
            }
            match reassembler.finish() {
                Ok((opcode, payload)) => deliver_message(socket, ctx, client_ip, opcode, payload).await,
                Err(_) => {
                    send_close(socket, CloseCode::PROTOCOL_ERROR, b"reassembly failed").await;
                    FrameEffect::Close
                }
            }
        }
        OpCode::Continuation => match reassembler.append(frame.payload.as_slice(), config.max_message_size) {
            Ok(()) => FrameEffect::Continue,
            Err(ReassembleError::TooLarge) => {
                send_close(socket, CloseCode::MESSAGE_TOO_BIG, b"").await;
                FrameEffect::Close
            }
            Err(_) => {
                send_close(socket, CloseCode::PROTOCOL_ERROR, b"continuation without start").await;
                FrameEffect::Close
            }
        },
    }
}

async fn deliver_message(
    socket: &mut crate::socket::Socket,
    ctx: &Arc<ConnectionContext>,
    client_ip: IpAddr,
    opcode: OpCode,
    payload: Vec<u8>,
) -> FrameEffect {
    if opcode == OpCode::Text && !crate::utf8::is_valid_utf8(&payload) {
        send_close(socket, CloseCode::INVALID_UTF8, b"invalid UTF-8").await;
        return FrameEffect::Close;
    }

    let reply = ctx
        .handlers
        .on_websocket_message(WebSocketMessage {
            opcode,
            payload,
            client_ip,
        })
        .await;

    if let Some(text) = reply {
        let frame = Frame::text(Payload::Owned(text.into_bytes()));
        let _ = socket.stream.write_all(&frame.generate()).await;
    }

    FrameEffect::Continue
}

fn close_code_from_payload(payload: &[u8]) -> CloseCode {
    if payload.len() >= 2 {
        CloseCode(u16::from_be_bytes([payload[0], payload[1]]))
    } else {
        CloseCode::NORMAL
    }
}

/// The code to mirror back for a received CLOSE frame: the peer's own code
/// if it's wire-legal, otherwise 1002 — a peer must not get its invalid or
/// reserved close code echoed back as if it were accepted.
fn close_reply_code(received: CloseCode) -> CloseCode {
    if received.is_allowed() {
        received
    } else {
        CloseCode::PROTOCOL_ERROR
    }
}

async fn send_close(socket: &mut crate::socket::Socket, code: CloseCode, reason: &[u8]) {
    let frame = Frame::close(code.0, reason);
    let _ = socket.stream.write_all(&frame.generate()).await;
}

enum ReadOutcome {
    Data,
    PeerClosed,
    Idle,
    Cancelled,
    Error(std::io::Error),
}

/// Reads one chunk off `socket`, selecting against `cancel` so a
/// `block_ip` call or server shutdown elsewhere can interrupt a blocked
/// read instead of waiting for the peer to send something.
async fn read_some(
    socket: &mut crate::socket::Socket,
    buffer: &mut BytesMut,
    deadline: &mut Option<Instant>,
    idle_timeout: Option<Duration>,
    cancel: &Cancel,
) -> ReadOutcome {
    let mut chunk = [0u8; READ_CHUNK];

    let read_fut = socket.stream.read(&mut chunk);
    let cancelled = cancel.cancelled();
    tokio::pin!(cancelled);

    let result = match *deadline {
        Some(when) => {
            let remaining = when.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return ReadOutcome::Idle;
            }
            tokio::select! {
                _ = &mut cancelled => return ReadOutcome::Cancelled,
                r = timeout(remaining, read_fut) => match r {
                    Ok(r) => r,
                    Err(_) => return ReadOutcome::Idle,
                },
            }
        }
        None => {
            tokio::select! {
                _ = &mut cancelled => return ReadOutcome::Cancelled,
                r = read_fut => r,
            }
        }
    };

    match result {
        Ok(0) => ReadOutcome::PeerClosed,
        Ok(n) => {
            buffer.extend_from_slice(&chunk[..n]);
            if let Some(d) = idle_timeout {
                *deadline = Some(Instant::now() + d);
            }
            ReadOutcome::Data
        }
        Err(e) => ReadOutcome::Error(e),
    }
}

/// Wraps an embedder's HTTP response: if it already begins
/// with `HTTP/` it is a full response produced by the callback and is sent
/// verbatim; otherwise it's a body that gets wrapped in a `200 OK`.
fn render_http_response(body: &[u8]) -> Vec<u8> {
    if body.starts_with(b"HTTP/") {
        return body.to_vec();
    }

    let header = format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: text/html; charset=UTF-8\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n",
        body.len()
    );
    let mut out = header.into_bytes();
    out.extend_from_slice(body);
    out
}
