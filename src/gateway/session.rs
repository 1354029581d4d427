//! One gateway websocket session.
//!
//! The session task owns the socket and its heartbeat clock. Lifecycle:
//! connect, read HELLO, start heartbeating at the advertised interval,
//! IDENTIFY (fresh) or RESUME (reconnect), then forward dispatches to the
//! observer until the socket drops. Transient failures reconnect forever
//! with capped backoff; fatal close codes surface through the ready
//! channel and stop the task.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{GatewayError, GatewayErrorKind};
use crate::observer::Publisher;

use super::payload::{
    heartbeat_frame, identify_frame, resume_frame, GatewayEvent, GatewayPayload, Hello, Opcode,
    DEFAULT_GATEWAY_URL,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = futures_util::stream::SplitSink<WsStream, WsMessage>;

/// Cap on the reconnect backoff.
const RECONNECT_CAP: Duration = Duration::from_secs(30);

/// How long to wait for the HELLO frame after connecting.
const HELLO_TIMEOUT: Duration = Duration::from_secs(15);

/// Configuration for one gateway session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Account token to identify with
    pub token: String,
    /// Whether the token is a bot token (affects nothing on the gateway
    /// wire, but labels diagnostics)
    pub is_bot: bool,
    /// Gateway URL; overridable for tests
    pub gateway_url: String,
}

impl SessionConfig {
    /// Session config against the production gateway.
    pub fn new(token: impl Into<String>, is_bot: bool) -> Self {
        Self {
            token: token.into(),
            is_bot,
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
        }
    }

    fn label(&self) -> &'static str {
        if self.is_bot {
            "bot"
        } else {
            "user"
        }
    }
}

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Opening the websocket
    Connecting,
    /// Waiting for READY after IDENTIFY
    Identifying,
    /// Live and dispatching
    Ready,
    /// Reconnecting with a RESUME
    Resuming,
    /// Permanently stopped
    Closed,
}

/// Readiness as observed through the handle.
#[derive(Debug, Clone)]
pub enum ReadyState {
    /// Not ready yet
    Pending,
    /// READY received; the session id authenticates interactions
    Ready {
        /// Gateway-assigned session id
        session_id: String,
    },
    /// The session failed fatally and will not reconnect
    Failed(GatewayErrorKind),
}

/// Spawns gateway session tasks.
pub struct GatewaySession;

impl GatewaySession {
    /// Spawn a session task. The task reconnects on transient failures
    /// until `parent` is cancelled or a fatal close code arrives.
    pub fn spawn(config: SessionConfig, publisher: Publisher, parent: &CancellationToken) -> GatewayHandle {
        let cancel = parent.child_token();
        let (ready_tx, ready_rx) = watch::channel(ReadyState::Pending);
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);

        let runtime = SessionRuntime {
            config,
            publisher,
            ready_tx,
            state_tx,
            cancel: cancel.clone(),
            session_id: None,
            resume_url: None,
            sequence: None,
        };
        let task = tokio::spawn(runtime.run());

        GatewayHandle {
            ready_rx,
            state_rx,
            cancel,
            task,
        }
    }
}

/// Handle to a running session task.
pub struct GatewayHandle {
    ready_rx: watch::Receiver<ReadyState>,
    state_rx: watch::Receiver<SessionState>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl GatewayHandle {
    /// Wait until the session is ready, returning its session id.
    ///
    /// # Errors
    ///
    /// [`GatewayErrorKind::ReadyTimeout`] if readiness does not arrive in
    /// `timeout`; the session's own fatal error if it failed first.
    pub async fn await_ready(&mut self, timeout: Duration) -> Result<String, GatewayError> {
        let deadline = Instant::now() + timeout;
        loop {
            match &*self.ready_rx.borrow() {
                ReadyState::Ready { session_id } => return Ok(session_id.clone()),
                ReadyState::Failed(kind) => return Err(GatewayError::new(kind.clone())),
                ReadyState::Pending => {}
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(GatewayError::new(GatewayErrorKind::ReadyTimeout(
                    timeout.as_secs(),
                )));
            }
            if tokio::time::timeout(remaining, self.ready_rx.changed())
                .await
                .is_err()
            {
                return Err(GatewayError::new(GatewayErrorKind::ReadyTimeout(
                    timeout.as_secs(),
                )));
            }
        }
    }

    /// Current session id, if the session is ready.
    pub fn session_id(&self) -> Option<String> {
        match &*self.ready_rx.borrow() {
            ReadyState::Ready { session_id } => Some(session_id.clone()),
            _ => None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Cancel the session and wait for its task to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

/// Why a driven connection ended.
enum Outcome {
    /// Try to resume with the stored session id and sequence
    Resume,
    /// Start over with a fresh IDENTIFY after a jittered delay
    Reidentify,
    /// Stop permanently
    Fatal(GatewayErrorKind),
    /// The client is shutting down
    Cancelled,
}

struct SessionRuntime {
    config: SessionConfig,
    publisher: Publisher,
    ready_tx: watch::Sender<ReadyState>,
    state_tx: watch::Sender<SessionState>,
    cancel: CancellationToken,
    session_id: Option<String>,
    resume_url: Option<String>,
    sequence: Option<u64>,
}

impl SessionRuntime {
    async fn run(mut self) {
        let mut backoff = Duration::from_secs(1);
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let resuming = self.session_id.is_some();
            self.state_tx.send_replace(if resuming {
                SessionState::Resuming
            } else {
                SessionState::Connecting
            });

            let url = if resuming {
                self.resume_url
                    .clone()
                    .unwrap_or_else(|| self.config.gateway_url.clone())
            } else {
                self.config.gateway_url.clone()
            };

            info!(session = self.config.label(), url = %url, resuming, "Connecting to gateway");

            match connect_async(&url).await {
                Ok((ws_stream, _)) => {
                    backoff = Duration::from_secs(1);
                    match self.drive(ws_stream, resuming).await {
                        Outcome::Resume => {
                            warn!(session = self.config.label(), "Gateway session ended, resuming");
                        }
                        Outcome::Reidentify => {
                            self.session_id = None;
                            self.resume_url = None;
                            self.sequence = None;
                            let delay = jittered_identify_delay();
                            warn!(
                                session = self.config.label(),
                                delay_ms = delay.as_millis() as u64,
                                "Session invalidated, re-identifying after delay"
                            );
                            tokio::select! {
                                _ = self.cancel.cancelled() => break,
                                _ = tokio::time::sleep(delay) => {}
                            }
                            continue;
                        }
                        Outcome::Fatal(kind) => {
                            error!(session = self.config.label(), error = %kind, "Fatal gateway close");
                            self.ready_tx.send_replace(ReadyState::Failed(kind));
                            break;
                        }
                        Outcome::Cancelled => break,
                    }
                }
                Err(e) => {
                    warn!(session = self.config.label(), error = %e, "Gateway connection failed");
                    // A failed resume target may be stale; fall back to
                    // the configured URL next round.
                    self.resume_url = None;
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = (backoff * 2).min(RECONNECT_CAP);
        }
        self.state_tx.send_replace(SessionState::Closed);
        debug!(session = self.config.label(), "Gateway task stopped");
    }

    /// Drive one live connection to completion.
    async fn drive(&mut self, ws_stream: WsStream, resuming: bool) -> Outcome {
        let (mut sink, mut stream) = ws_stream.split();

        let hello = match self.await_hello(&mut stream).await {
            Ok(hello) => hello,
            Err(outcome) => return outcome,
        };
        let interval = Duration::from_millis(hello.heartbeat_interval.max(1000));

        self.state_tx.send_replace(if resuming {
            SessionState::Resuming
        } else {
            SessionState::Identifying
        });

        let frame = match (&self.session_id, self.sequence, resuming) {
            (Some(session_id), Some(seq), true) => {
                resume_frame(&self.config.token, session_id, seq)
            }
            _ => identify_frame(&self.config.token),
        };
        if let Err(e) = sink.send(WsMessage::Text(frame.into())).await {
            warn!(session = self.config.label(), error = %e, "Failed to send identify/resume");
            return Outcome::Resume;
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // First tick is immediate; skip it.
        let mut last_ack = Instant::now();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return Outcome::Cancelled;
                }
                _ = ticker.tick() => {
                    if last_ack.elapsed() > interval * 2 {
                        warn!(session = self.config.label(), "Heartbeat ack overdue, resuming");
                        return Outcome::Resume;
                    }
                    let frame = heartbeat_frame(self.sequence);
                    if let Err(e) = sink.send(WsMessage::Text(frame.into())).await {
                        warn!(session = self.config.label(), error = %e, "Heartbeat send failed");
                        return Outcome::Resume;
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Some(outcome) = self.handle_frame(&mut sink, &text, &mut last_ack).await {
                            return outcome;
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        let code = frame.as_ref().map(|f| u16::from(f.code)).unwrap_or(1000);
                        if let Some(kind) = GatewayErrorKind::from_close_code(code) {
                            return Outcome::Fatal(kind);
                        }
                        info!(session = self.config.label(), code, "Gateway closed, will resume");
                        return Outcome::Resume;
                    }
                    Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {
                        // Handled by tungstenite.
                    }
                    Some(Ok(_)) => {
                        // Binary / raw frames are not part of the JSON encoding.
                    }
                    Some(Err(e)) => {
                        warn!(session = self.config.label(), error = %e, "Gateway receive error");
                        return Outcome::Resume;
                    }
                    None => {
                        info!(session = self.config.label(), "Gateway stream exhausted");
                        return Outcome::Resume;
                    }
                }
            }
        }
    }

    /// Wait for the HELLO frame that opens every connection.
    async fn await_hello(
        &mut self,
        stream: &mut futures_util::stream::SplitStream<WsStream>,
    ) -> Result<Hello, Outcome> {
        let deadline = tokio::time::sleep(HELLO_TIMEOUT);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Outcome::Cancelled),
                _ = &mut deadline => {
                    warn!(session = self.config.label(), "No HELLO within deadline");
                    return Err(Outcome::Resume);
                }
                frame = stream.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        let payload = match GatewayPayload::parse(&text) {
                            Ok(p) => p,
                            Err(e) => {
                                warn!(session = self.config.label(), error = %e, "Bad frame before HELLO");
                                continue;
                            }
                        };
                        if Opcode::from_u8(payload.op) == Some(Opcode::Hello) {
                            match serde_json::from_value::<Hello>(payload.d) {
                                Ok(hello) => return Ok(hello),
                                Err(e) => {
                                    warn!(session = self.config.label(), error = %e, "Malformed HELLO");
                                    return Err(Outcome::Resume);
                                }
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        let code = frame.as_ref().map(|f| u16::from(f.code)).unwrap_or(1000);
                        if let Some(kind) = GatewayErrorKind::from_close_code(code) {
                            return Err(Outcome::Fatal(kind));
                        }
                        return Err(Outcome::Resume);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => return Err(Outcome::Resume),
                }
            }
        }
    }

    /// Process one text frame. Returns `Some(outcome)` when the
    /// connection must end.
    async fn handle_frame(
        &mut self,
        sink: &mut WsSink,
        text: &str,
        last_ack: &mut Instant,
    ) -> Option<Outcome> {
        let payload = match GatewayPayload::parse(text) {
            Ok(p) => p,
            Err(e) => {
                warn!(session = self.config.label(), error = %e, "Undecodable gateway frame");
                return None;
            }
        };

        let Some(opcode) = Opcode::from_u8(payload.op) else {
            debug!(session = self.config.label(), op = payload.op, "Dropping unknown opcode");
            return None;
        };

        match opcode {
            Opcode::Dispatch => {
                if let Some(s) = payload.s {
                    self.sequence = Some(s);
                }
                let Some(t) = payload.t.as_deref() else {
                    return None;
                };
                match GatewayEvent::decode(t, payload.d) {
                    Ok(Some(GatewayEvent::Ready(ready))) => {
                        info!(
                            session = self.config.label(),
                            session_id = %ready.session_id,
                            "Gateway session ready"
                        );
                        self.session_id = Some(ready.session_id.clone());
                        self.resume_url = ready.resume_gateway_url.clone();
                        self.state_tx.send_replace(SessionState::Ready);
                        self.ready_tx.send_replace(ReadyState::Ready {
                            session_id: ready.session_id,
                        });
                    }
                    Ok(Some(GatewayEvent::Resumed)) => {
                        info!(session = self.config.label(), "Gateway session resumed");
                        self.state_tx.send_replace(SessionState::Ready);
                    }
                    Ok(Some(event)) => self.publisher.publish(event),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(session = self.config.label(), event = t, error = %e, "Dispatch decode failed");
                    }
                }
                None
            }
            Opcode::Heartbeat => {
                // Server requested an immediate heartbeat.
                let frame = heartbeat_frame(self.sequence);
                if let Err(e) = sink.send(WsMessage::Text(frame.into())).await {
                    warn!(session = self.config.label(), error = %e, "Requested heartbeat failed");
                    return Some(Outcome::Resume);
                }
                None
            }
            Opcode::HeartbeatAck => {
                *last_ack = Instant::now();
                None
            }
            Opcode::Reconnect => {
                info!(session = self.config.label(), "Server requested reconnect");
                Some(Outcome::Resume)
            }
            Opcode::InvalidSession => {
                let resumable = payload.d.as_bool().unwrap_or(false);
                Some(if resumable {
                    Outcome::Resume
                } else {
                    Outcome::Reidentify
                })
            }
            Opcode::Hello | Opcode::Identify | Opcode::Resume => {
                debug!(session = self.config.label(), op = payload.op, "Unexpected opcode mid-session");
                None
            }
        }
    }
}

/// Delay before a fresh IDENTIFY after INVALID_SESSION, 1–5 s uniform.
fn jittered_identify_delay() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(1_000..=5_000))
}
