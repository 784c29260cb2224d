//! Gateway (WebSocket) client for Spacebar.
//!
//! This module owns the WebSocket connection lifecycle:
//!   - connect → receive HELLO → send IDENTIFY (or RESUME)
//!   - background heartbeat task
//!   - sequence number + session_id tracking
//!   - automatic reconnect + RESUME on disconnect
//!
//! The bot consumes a stream of [`GatewayEvent`] values and never touches
//! `tokio_tungstenite` directly. Connection trouble is reported on the same
//! stream as `Disconnected` / `Reconnecting` / `ClientWarning` /
//! `ClientError` events.
//!
//! Reconnect backoff belongs to this client layer, as it would to any chat
//! client library the bot sits on. Provisioning never retries.

use std::sync::Arc;
use std::time::Duration;

use async_lock::Mutex;
use bitflags::bitflags;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::events::GatewayEvent;
use crate::tls;
use crate::types::{GatewayPayload, UpdatePresence};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const GATEWAY_QUERY: &str = "v=9&encoding=json";

/// Maximum number of consecutive reconnect attempts before giving up.
const MAX_RECONNECT_ATTEMPTS: u32 = 8;

const HELLO_TIMEOUT: Duration = Duration::from_secs(30);

bitflags! {
    /// Gateway intents bitmask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Intents: u32 {
        const GUILDS = 1;
        const GUILD_MEMBERS = 1 << 1;
        const GUILD_MESSAGES = 1 << 9;
        const MESSAGE_CONTENT = 1 << 15;
    }
}

// ---------------------------------------------------------------------------
// Configuration and errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway URL must start with ws:// or wss://, got {0:?}")]
    InvalidUrl(String),
    #[error("TLS setup failed: {0}")]
    Tls(#[from] rustls::Error),
    #[error("gateway driver has stopped")]
    Closed,
}

#[derive(Clone)]
pub struct GatewayConfig {
    pub token: String,
    /// `ws://` or `wss://` URL, without query string.
    pub url: String,
    pub intents: Intents,
    /// Skip certificate verification on `wss://`.
    pub allow_insecure_transport: bool,
}

impl GatewayConfig {
    /// Gateway URL for a deployment: the server URL with its leading `http`
    /// swapped for `ws` (so `https` becomes `wss`).
    pub fn url_for_server(server_url: &str) -> String {
        let trimmed = server_url.trim_end_matches('/');
        match trimmed.strip_prefix("http") {
            Some(rest) => format!("ws{}", rest),
            None => trimmed.to_string(),
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("token", &"<redacted>")
            .field("url", &self.url)
            .field("intents", &self.intents)
            .field("allow_insecure_transport", &self.allow_insecure_transport)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Internal session state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct SessionState {
    session_id: Option<String>,
    resume_gateway_url: Option<String>,
    sequence: Option<u64>,
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Handle to a running gateway connection.
///
/// Dropping the handle (or its `events` receiver) shuts the driver down.
pub struct GatewayHandle {
    sender: mpsc::Sender<serde_json::Value>,
    /// Typed events, in arrival order.
    pub events: async_channel::Receiver<GatewayEvent>,
    driver: tokio::task::JoinHandle<()>,
}

impl GatewayHandle {
    /// Set the bot's presence (op 3).
    pub async fn update_presence(&self, presence: &UpdatePresence) -> Result<(), GatewayError> {
        let payload = json!({ "op": 3, "d": presence });
        self.sender
            .send(payload)
            .await
            .map_err(|_| GatewayError::Closed)
    }
}

impl Drop for GatewayHandle {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Start the gateway driver and return a [`GatewayHandle`].
///
/// The driver runs on a spawned task and keeps reconnecting on its own until
/// the handle is dropped, the server rejects the token, or
/// `MAX_RECONNECT_ATTEMPTS` consecutive attempts fail.
pub fn connect(config: GatewayConfig) -> Result<GatewayHandle, GatewayError> {
    if !(config.url.starts_with("ws://") || config.url.starts_with("wss://")) {
        return Err(GatewayError::InvalidUrl(config.url));
    }
    let connector = Connector::Rustls(Arc::new(tls::client_config(
        config.allow_insecure_transport,
    )?));

    let (event_tx, event_rx) = async_channel::bounded::<GatewayEvent>(256);
    let (send_tx, send_rx) = mpsc::channel::<serde_json::Value>(64);

    let driver = tokio::spawn(gateway_driver(config, connector, event_tx, send_rx));

    Ok(GatewayHandle {
        sender: send_tx,
        events: event_rx,
        driver,
    })
}

// ---------------------------------------------------------------------------
// The main driver loop (runs in a spawned task)
// ---------------------------------------------------------------------------

async fn gateway_driver(
    config: GatewayConfig,
    connector: Connector,
    event_tx: async_channel::Sender<GatewayEvent>,
    mut send_rx: mpsc::Receiver<serde_json::Value>,
) {
    let session = Arc::new(Mutex::new(SessionState::default()));
    let mut reconnect_attempts: u32 = 0;

    loop {
        let url = {
            let s = session.lock().await;
            with_query(s.resume_gateway_url.as_deref().unwrap_or(&config.url))
        };

        info!(url = %url, "connecting to gateway");

        let ws_stream = match tokio_tungstenite::connect_async_tls_with_config(
            &url,
            None,
            false,
            Some(connector.clone()),
        )
        .await
        {
            Ok((ws, _)) => ws,
            Err(e) => {
                let reason = format!("failed to connect to gateway: {}", e);
                error!(error = %e, "failed to connect to gateway");
                notify(&event_tx, GatewayEvent::Disconnected { reason }).await;
                if !back_off(&event_tx, &mut reconnect_attempts).await {
                    return;
                }
                continue;
            }
        };

        info!("WebSocket connected");

        let (ws_write, mut ws_read) = ws_stream.split();
        let ws_write = Arc::new(Mutex::new(ws_write));

        // 1. HELLO
        let heartbeat_interval = match read_hello(&mut ws_read).await {
            Ok(interval) => interval,
            Err(e) => {
                warn!(error = %e, "failed to read HELLO from gateway");
                notify(&event_tx, GatewayEvent::ClientWarning(e)).await;
                if !back_off(&event_tx, &mut reconnect_attempts).await {
                    return;
                }
                continue;
            }
        };
        info!(interval_ms = heartbeat_interval, "received HELLO");

        // 2. IDENTIFY or RESUME
        let handshake = {
            let s = session.lock().await;
            match (&s.session_id, s.sequence) {
                (Some(session_id), Some(seq)) => json!({
                    "op": 6,
                    "d": { "token": config.token, "session_id": session_id, "seq": seq }
                }),
                _ => json!({
                    "op": 2,
                    "d": {
                        "token": config.token,
                        "properties": {
                            "os": std::env::consts::OS,
                            "browser": "hello-spacebar",
                            "device": "hello-spacebar"
                        },
                        "intents": config.intents.bits(),
                    }
                }),
            }
        };
        let resuming = handshake["op"] == 6;
        if let Err(e) = send_json(&ws_write, &handshake).await {
            warn!(error = %e, resuming, "failed to send handshake");
            notify(&event_tx, GatewayEvent::ClientWarning(e)).await;
            if !back_off(&event_tx, &mut reconnect_attempts).await {
                return;
            }
            continue;
        }
        info!(resuming, "sent {}", if resuming { "RESUME" } else { "IDENTIFY" });
        reconnect_attempts = 0;

        // 3. Heartbeat
        let heartbeat = tokio::spawn(heartbeat_loop(
            heartbeat_interval,
            Arc::clone(&ws_write),
            Arc::clone(&session),
        ));

        // 4. Read until the connection ends
        let reason = read_loop(&mut ws_read, &ws_write, &event_tx, &session, &mut send_rx).await;

        // 5. Cleanup, then decide whether to reconnect
        heartbeat.abort();
        {
            let mut w = ws_write.lock().await;
            let _ = w.send(WsMessage::Close(None)).await;
        }

        match reason {
            DisconnectReason::ShouldResume(why) => {
                notify(&event_tx, GatewayEvent::Disconnected { reason: why }).await;
            }
            DisconnectReason::ShouldReidentify(why) => {
                let mut s = session.lock().await;
                s.session_id = None;
                s.sequence = None;
                drop(s);
                notify(&event_tx, GatewayEvent::Disconnected { reason: why }).await;
            }
            DisconnectReason::Fatal(why) => {
                error!(reason = %why, "fatal gateway error, shutting down");
                notify(&event_tx, GatewayEvent::ClientError(why)).await;
                return;
            }
            DisconnectReason::EventChannelClosed => {
                info!("event channel closed, shutting down gateway driver");
                return;
            }
        }

        if !back_off(&event_tx, &mut reconnect_attempts).await {
            return;
        }
    }
}

#[derive(Debug)]
enum DisconnectReason {
    ShouldResume(String),
    ShouldReidentify(String),
    Fatal(String),
    EventChannelClosed,
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

async fn heartbeat_loop(
    interval_ms: u64,
    ws_write: Arc<Mutex<WsSink>>,
    session: Arc<Mutex<SessionState>>,
) {
    // First beat after `interval * jitter`, jitter ∈ [0, 1).
    let jitter = rand::random::<f64>();
    tokio::time::sleep(Duration::from_millis((interval_ms as f64 * jitter) as u64)).await;

    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
    loop {
        interval.tick().await;
        let seq = session.lock().await.sequence;
        if let Err(e) = send_json(&ws_write, &json!({ "op": 1, "d": seq })).await {
            warn!(error = %e, "heartbeat send failed, stopping heartbeat task");
            return;
        }
        debug!(seq = ?seq, "sent heartbeat");
    }
}

// ---------------------------------------------------------------------------
// Read loop
// ---------------------------------------------------------------------------

async fn read_loop(
    ws_read: &mut WsStream,
    ws_write: &Arc<Mutex<WsSink>>,
    event_tx: &async_channel::Sender<GatewayEvent>,
    session: &Arc<Mutex<SessionState>>,
    send_rx: &mut mpsc::Receiver<serde_json::Value>,
) -> DisconnectReason {
    loop {
        tokio::select! {
            biased;

            Some(payload) = send_rx.recv() => {
                if let Err(e) = send_json(ws_write, &payload).await {
                    warn!(error = %e, "failed to send payload on gateway");
                    notify(event_tx, GatewayEvent::ClientWarning(e)).await;
                }
            }

            msg = ws_read.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket read error");
                        return DisconnectReason::ShouldResume(format!("read error: {}", e));
                    }
                    None => return DisconnectReason::ShouldResume("stream ended".to_string()),
                };

                let text = match msg {
                    WsMessage::Text(text) => text,
                    WsMessage::Close(frame) => return close_reason(frame.map(|f| u16::from(f.code))),
                    // Ping/Pong/Binary
                    _ => continue,
                };

                let payload: GatewayPayload = match serde_json::from_str(&text) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(error = %e, "failed to parse gateway payload");
                        continue;
                    }
                };

                if let Some(s) = payload.s {
                    session.lock().await.sequence = Some(s);
                }

                let event = GatewayEvent::from_payload(payload);

                match &event {
                    GatewayEvent::Ready(ready) => {
                        let mut sess = session.lock().await;
                        sess.session_id = Some(ready.session_id.clone());
                        sess.resume_gateway_url = ready.resume_gateway_url.clone();
                        info!(session_id = %ready.session_id, user = %ready.user.tag(), "gateway READY");
                    }
                    GatewayEvent::HeartbeatRequest => {
                        let seq = session.lock().await.sequence;
                        if let Err(e) = send_json(ws_write, &json!({ "op": 1, "d": seq })).await {
                            warn!(error = %e, "failed to send requested heartbeat");
                        }
                    }
                    GatewayEvent::HeartbeatAck => debug!("heartbeat acknowledged"),
                    GatewayEvent::Reconnect => {
                        return DisconnectReason::ShouldResume("server requested reconnect".to_string());
                    }
                    GatewayEvent::InvalidSession(resumable) => {
                        warn!(resumable, "session invalidated");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                        let why = "session invalidated".to_string();
                        return if *resumable {
                            DisconnectReason::ShouldResume(why)
                        } else {
                            DisconnectReason::ShouldReidentify(why)
                        };
                    }
                    _ => {}
                }

                if event.is_internal() {
                    continue;
                }

                if event_tx.send(event).await.is_err() {
                    return DisconnectReason::EventChannelClosed;
                }
            }
        }
    }
}

fn close_reason(code: Option<u16>) -> DisconnectReason {
    warn!(close_code = ?code, "WebSocket closed by server");
    match code {
        Some(4004) => DisconnectReason::Fatal("authentication failed (close 4004)".to_string()),
        Some(4013) => DisconnectReason::Fatal("invalid intents (close 4013)".to_string()),
        Some(4014) => DisconnectReason::Fatal("disallowed intents (close 4014)".to_string()),
        Some(code @ (4007 | 4009)) => {
            DisconnectReason::ShouldReidentify(format!("session expired (close {})", code))
        }
        Some(code) => DisconnectReason::ShouldResume(format!("closed by server (close {})", code)),
        None => DisconnectReason::ShouldResume("closed by server".to_string()),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn with_query(url: &str) -> String {
    if url.contains("encoding=") {
        url.to_string()
    } else if url.contains('?') {
        format!("{}&{}", url, GATEWAY_QUERY)
    } else {
        format!("{}/?{}", url.trim_end_matches('/'), GATEWAY_QUERY)
    }
}

async fn read_hello(stream: &mut WsStream) -> Result<u64, String> {
    let msg = tokio::time::timeout(HELLO_TIMEOUT, stream.next())
        .await
        .map_err(|_| "timed out waiting for HELLO".to_string())?
        .ok_or_else(|| "stream ended before HELLO".to_string())?
        .map_err(|e| format!("WS error reading HELLO: {}", e))?;

    let WsMessage::Text(text) = msg else {
        return Err(format!("expected text message for HELLO, got {:?}", msg));
    };

    let payload: GatewayPayload =
        serde_json::from_str(&text).map_err(|e| format!("failed to parse HELLO: {}", e))?;
    hello_interval(&payload)
}

fn hello_interval(payload: &GatewayPayload) -> Result<u64, String> {
    if payload.op != 10 {
        return Err(format!("expected op 10 (HELLO), got op {}", payload.op));
    }
    payload
        .d
        .as_ref()
        .and_then(|d| d.get("heartbeat_interval"))
        .and_then(|v| v.as_u64())
        .ok_or_else(|| "HELLO missing heartbeat_interval".to_string())
}

async fn send_json(ws_write: &Arc<Mutex<WsSink>>, payload: &serde_json::Value) -> Result<(), String> {
    let text = serde_json::to_string(payload).map_err(|e| e.to_string())?;
    let mut w = ws_write.lock().await;
    w.send(WsMessage::Text(text))
        .await
        .map_err(|e| format!("WS send error: {}", e))
}

async fn notify(event_tx: &async_channel::Sender<GatewayEvent>, event: GatewayEvent) {
    let _ = event_tx.send(event).await;
}

/// Sleep before the next attempt. Returns `false` once attempts run out.
async fn back_off(event_tx: &async_channel::Sender<GatewayEvent>, attempts: &mut u32) -> bool {
    *attempts += 1;
    if *attempts > MAX_RECONNECT_ATTEMPTS {
        let why = format!("gave up after {} reconnect attempts", MAX_RECONNECT_ATTEMPTS);
        error!("{}", why);
        notify(event_tx, GatewayEvent::ClientError(why)).await;
        return false;
    }
    let delay = backoff_delay(*attempts);
    notify(
        event_tx,
        GatewayEvent::Reconnecting {
            attempt: *attempts,
            delay_ms: delay.as_millis() as u64,
        },
    )
    .await;
    tokio::time::sleep(delay).await;
    true
}

/// Exponential backoff with jitter, capped at 60 s.
fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = 1000u64 * 2u64.saturating_pow(attempt.min(6));
    let jitter = (rand::random::<f64>() * 0.5 + 0.75) * base_ms as f64;
    Duration::from_millis(jitter.min(60_000.0) as u64)
}
