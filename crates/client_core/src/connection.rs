use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use shared::{
    domain::SessionId,
    error::DecodeError,
    protocol::{ChannelMessage, OutboundMessage},
};
use thiserror::Error;
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
    time::timeout,
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    fallback::{proactive_fallback_reason, snapshot_frame, FallbackReason},
    state_store::ClientStateStore,
};

pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(3000);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
const BACKOFF_FACTOR: f64 = 1.5;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("invalid channel address: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("websocket handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),
}

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub url: String,
    pub token: Option<String>,
    pub session_id: Option<SessionId>,
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub max_reconnect_delay: Duration,
    pub connect_timeout: Duration,
    /// Host the client itself runs on; preview hosts skip the live channel.
    pub runtime_host: Option<String>,
}

impl ConnectionOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            session_id: None,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            max_reconnect_delay: DEFAULT_MAX_RECONNECT_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            runtime_host: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<SessionId>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_reconnect(mut self, interval: Duration, max_attempts: u32) -> Self {
        self.reconnect_interval = interval;
        self.max_reconnect_attempts = max_attempts;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

pub fn build_connect_url(
    base: &str,
    token: Option<&str>,
    session_id: Option<&SessionId>,
) -> Result<Url, ConnectError> {
    let mut url = Url::parse(base.trim())?;
    if token.is_some() || session_id.is_some() {
        let mut pairs = url.query_pairs_mut();
        if let Some(token) = token {
            pairs.append_pair("token", token);
        }
        if let Some(session_id) = session_id {
            pairs.append_pair("session_id", session_id.as_str());
        }
    }
    Ok(url)
}

fn redact_token(url: &Url) -> String {
    if !url.query_pairs().any(|(key, _)| key == "token") {
        return url.to_string();
    }
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| {
            let value = if key == "token" {
                "***".to_string()
            } else {
                value.into_owned()
            };
            (key.into_owned(), value)
        })
        .collect();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub factor: f64,
    pub min: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            factor: BACKOFF_FACTOR,
            min: base,
            max,
        }
    }

    pub fn from_options(options: &ConnectionOptions) -> Self {
        Self::new(options.reconnect_interval, options.max_reconnect_delay)
    }

    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let raw = self.base.as_millis() as f64 * self.factor.powi(exponent);
        let min = self.min.as_millis() as f64;
        let max = (self.max.as_millis() as f64).max(min);
        let clamped = if raw.is_finite() { raw.clamp(min, max) } else { max };
        Duration::from_millis(clamped.round() as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    Intentional,
    Unexpected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CloseDecision {
    Reconnect { attempt: u32, delay: Duration },
    Fallback { attempts: u32 },
    Stop,
}

/// Attempt bookkeeping for the reconnect policy, independent of any socket.
#[derive(Debug, Clone)]
pub struct ReconnectTracker {
    attempts: u32,
    max_attempts: u32,
    policy: BackoffPolicy,
}

impl ReconnectTracker {
    pub fn new(max_attempts: u32, policy: BackoffPolicy) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            policy,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn on_open(&mut self) {
        self.attempts = 0;
    }

    pub fn on_close(&mut self, kind: CloseKind) -> CloseDecision {
        if kind == CloseKind::Intentional {
            return CloseDecision::Stop;
        }
        if self.attempts < self.max_attempts {
            self.attempts += 1;
            CloseDecision::Reconnect {
                attempt: self.attempts,
                delay: self.policy.delay_for(self.attempts),
            }
        } else {
            CloseDecision::Fallback {
                attempts: self.attempts,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    #[default]
    Idle,
    Connecting,
    Connected,
    Fallback,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub phase: ConnectionPhase,
    pub connected: bool,
    pub using_fallback: bool,
    pub last_error: Option<String>,
    pub reconnect_attempts: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    pub raw: String,
    /// `None` when the frame failed to decode.
    pub message: Option<ChannelMessage>,
    pub received_at: DateTime<Utc>,
    /// Synthesized locally by fallback mode.
    pub synthetic: bool,
}

/// Latches `candidate` only if no session is known yet.
pub fn latch_session_id(current: &mut Option<SessionId>, candidate: SessionId) -> bool {
    if current.is_some() || candidate.as_str().is_empty() {
        return false;
    }
    *current = Some(candidate);
    true
}

pub struct ConnectionManager {
    options: ConnectionOptions,
    store: Arc<dyn ClientStateStore>,
    state: watch::Sender<ConnectionState>,
    session: watch::Sender<Option<SessionId>>,
    last_message: watch::Sender<Option<InboundFrame>>,
    frames: mpsc::UnboundedSender<InboundFrame>,
    outbound: watch::Sender<Option<mpsc::UnboundedSender<Message>>>,
    shutdown: watch::Sender<bool>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(
        options: ConnectionOptions,
        store: Arc<dyn ClientStateStore>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<InboundFrame>) {
        let (frames, frames_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::default());
        let (session, _) = watch::channel(options.session_id.clone());
        let (last_message, _) = watch::channel(None);
        let (outbound, _) = watch::channel(None);
        let (shutdown, _) = watch::channel(false);
        let manager = Arc::new(Self {
            options,
            store,
            state,
            session,
            last_message,
            frames,
            outbound,
            shutdown,
            driver: Mutex::new(None),
        });
        (manager, frames_rx)
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    pub fn is_using_fallback(&self) -> bool {
        self.state.borrow().using_fallback
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.borrow().clone()
    }

    pub fn subscribe_session(&self) -> watch::Receiver<Option<SessionId>> {
        self.session.subscribe()
    }

    pub fn last_message(&self) -> Option<InboundFrame> {
        self.last_message.borrow().clone()
    }

    /// Address another device can use to join the same session.
    pub fn share_url(&self) -> Option<String> {
        let session_id = self.session_id()?;
        build_connect_url(&self.options.url, None, Some(&session_id))
            .ok()
            .map(String::from)
    }

    /// Starts the connection lifecycle. A no-op while a driver is running or
    /// once fallback mode has been entered.
    pub async fn connect(self: &Arc<Self>) {
        let mut driver = self.driver.lock().await;
        if driver.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("connection: connect requested while already running");
            return;
        }
        if self.is_using_fallback() {
            debug!("connection: connect requested in fallback mode");
            return;
        }
        if let Some(reason) =
            proactive_fallback_reason(&self.options.url, self.options.runtime_host.as_deref())
        {
            self.enter_fallback(reason);
            return;
        }

        self.shutdown.send_replace(false);
        let shutdown = self.shutdown.subscribe();
        let manager = Arc::clone(self);
        *driver = Some(tokio::spawn(async move { manager.run(shutdown).await }));
    }

    /// Intentional close: suppresses reconnects and cancels pending timers.
    pub async fn disconnect(&self) {
        self.shutdown.send_replace(true);
        let handle = self.driver.lock().await.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    error!(error = %err, "connection: driver task failed");
                }
            }
        }
        self.outbound.send_replace(None);
        self.state.send_modify(|state| {
            state.connected = false;
            if !state.using_fallback {
                state.phase = ConnectionPhase::Closed;
            }
        });
    }

    /// Signals the driver to stop without waiting for it.
    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn send(&self, message: &OutboundMessage) -> bool {
        match serde_json::to_string(message) {
            Ok(text) => self.send_text(text),
            Err(err) => {
                error!(error = %err, "connection: failed to serialize outbound message");
                false
            }
        }
    }

    pub fn send_raw(&self, message: &serde_json::Value) -> bool {
        self.send_text(message.to_string())
    }

    fn send_text(&self, text: String) -> bool {
        if self.is_using_fallback() {
            info!(message = %text, "connection: fallback mode, outbound message not sent");
            return false;
        }
        let outbound = self.outbound.borrow();
        let Some(tx) = outbound.as_ref() else {
            warn!("connection: channel not open, outbound message dropped");
            return false;
        };
        if tx.send(Message::Text(text)).is_err() {
            warn!("connection: writer closed, outbound message dropped");
            return false;
        }
        true
    }

    fn connect_url(&self) -> Result<Url, ConnectError> {
        build_connect_url(
            &self.options.url,
            self.options.token.as_deref(),
            self.session_id().as_ref(),
        )
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut tracker = ReconnectTracker::new(
            self.options.max_reconnect_attempts,
            BackoffPolicy::from_options(&self.options),
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.state
                .send_modify(|state| state.phase = ConnectionPhase::Connecting);

            let url = match self.connect_url() {
                Ok(url) => url,
                Err(err) => {
                    self.enter_fallback(FallbackReason::InvalidUrl(err.to_string()));
                    return;
                }
            };
            info!(url = %redact_token(&url), "connection: attempting to connect");

            let attempt = tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => break,
                attempt = timeout(self.options.connect_timeout, connect_async(url.as_str())) => attempt,
            };

            let kind = match attempt {
                Err(_) => {
                    warn!(
                        timeout_ms = self.options.connect_timeout.as_millis() as u64,
                        "connection: connect attempt timed out"
                    );
                    self.enter_fallback(FallbackReason::ConnectTimeout);
                    return;
                }
                Ok(Err(err)) => {
                    let err = ConnectError::from(err);
                    warn!(error = %err, "connection: connect attempt failed");
                    self.record_disconnect(Some(err.to_string()));
                    CloseKind::Unexpected
                }
                Ok(Ok((socket, _))) => {
                    tracker.on_open();
                    self.run_session(socket, &mut shutdown).await
                }
            };

            match tracker.on_close(kind) {
                CloseDecision::Stop => break,
                CloseDecision::Reconnect { attempt, delay } => {
                    info!(
                        attempt,
                        max_attempts = self.options.max_reconnect_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "connection: scheduling reconnect"
                    );
                    self.state.send_modify(|state| {
                        state.phase = ConnectionPhase::Connecting;
                        state.reconnect_attempts = attempt;
                    });
                    tokio::select! {
                        _ = wait_for_shutdown(&mut shutdown) => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                CloseDecision::Fallback { attempts } => {
                    self.enter_fallback(FallbackReason::ReconnectExhausted { attempts });
                    return;
                }
            }
        }

        self.state.send_modify(|state| {
            state.connected = false;
            state.phase = ConnectionPhase::Closed;
        });
        info!("connection: closed");
    }

    async fn run_session(&self, socket: Socket, shutdown: &mut watch::Receiver<bool>) -> CloseKind {
        let (mut writer, mut reader) = socket.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        self.outbound.send_replace(Some(out_tx));
        self.mark_connected();
        info!("connection: established");

        let kind = loop {
            tokio::select! {
                _ = wait_for_shutdown(shutdown) => break CloseKind::Intentional,
                Some(message) = out_rx.recv() => {
                    if let Err(err) = writer.send(message).await {
                        warn!(error = %err, "connection: outbound send failed");
                        self.record_disconnect(Some(err.to_string()));
                        break CloseKind::Unexpected;
                    }
                }
                frame = reader.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        let decoded = ChannelMessage::decode(&text);
                        self.handle_frame(text, decoded).await;
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        let decoded = ChannelMessage::decode_bytes(&bytes);
                        let raw = String::from_utf8_lossy(&bytes).into_owned();
                        self.handle_frame(raw, decoded).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "connection: closed by peer");
                        self.record_disconnect(None);
                        break CloseKind::Unexpected;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(error = %err, "connection: receive failed");
                        self.record_disconnect(Some(err.to_string()));
                        break CloseKind::Unexpected;
                    }
                    None => {
                        self.record_disconnect(Some("stream ended".to_string()));
                        break CloseKind::Unexpected;
                    }
                },
            }
        };

        self.outbound.send_replace(None);
        if kind == CloseKind::Intentional {
            // Stop reading before closing so nothing reaches a torn-down consumer.
            drop(reader);
            if let Err(err) = writer.send(Message::Close(None)).await {
                debug!(error = %err, "connection: close frame not delivered");
            }
            let _ = writer.close().await;
        }
        kind
    }

    async fn handle_frame(&self, raw: String, decoded: Result<ChannelMessage, DecodeError>) {
        let message = match decoded {
            Ok(message) => Some(message),
            Err(err) => {
                warn!(error = %err, "connection: received undecodable frame");
                None
            }
        };

        if let Some(candidate) = message.as_ref().and_then(ChannelMessage::session) {
            if self.latch_session(candidate.clone()) {
                info!(session_id = %candidate, "connection: session established");
                if let Err(err) = self.store.save_session_id(&candidate).await {
                    warn!(error = %err, "connection: failed to persist session id");
                }
            } else if self.session_id().as_ref() != Some(&candidate) {
                debug!(session_id = %candidate, "connection: ignoring foreign session id");
            }
        }

        self.publish(InboundFrame {
            raw,
            message,
            received_at: Utc::now(),
            synthetic: false,
        });
    }

    fn latch_session(&self, candidate: SessionId) -> bool {
        self.session
            .send_if_modified(|current| latch_session_id(current, candidate))
    }

    fn publish(&self, frame: InboundFrame) {
        self.last_message.send_replace(Some(frame.clone()));
        if self.frames.send(frame).is_err() {
            debug!("connection: no frame consumer attached");
        }
    }

    fn mark_connected(&self) {
        self.state.send_modify(|state| {
            state.phase = ConnectionPhase::Connected;
            state.connected = true;
            state.last_error = None;
            state.reconnect_attempts = 0;
        });
    }

    fn record_disconnect(&self, error: Option<String>) {
        self.state.send_modify(|state| {
            state.connected = false;
            if error.is_some() {
                state.last_error = error;
            }
        });
    }

    fn enter_fallback(&self, reason: FallbackReason) {
        let entered = self.state.send_if_modified(|state| {
            if state.using_fallback {
                return false;
            }
            state.using_fallback = true;
            state.connected = false;
            state.phase = ConnectionPhase::Fallback;
            if matches!(
                reason,
                FallbackReason::ConnectTimeout
                    | FallbackReason::InvalidUrl(_)
                    | FallbackReason::ReconnectExhausted { .. }
            ) {
                state.last_error = Some(reason.to_string());
            }
            true
        });
        if !entered {
            return;
        }

        self.outbound.send_replace(None);
        info!(reason = %reason, "connection: switching to fallback mode");
        let raw = snapshot_frame(self.session_id().as_ref());
        let message = ChannelMessage::decode(&raw).ok();
        self.publish(InboundFrame {
            raw,
            message,
            received_at: Utc::now(),
            synthetic: true,
        });
    }
}

async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        // A dropped sender also ends the lifecycle.
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;
