use std::{future, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use shared::{
    domain::{LabelData, Quote, SessionId, ShippingStep},
    error::ServiceError,
    protocol::{LabelRequest, OutboundMessage, QuoteRequest, ToolName},
};
use tokio::{
    sync::{broadcast, mpsc, watch, Mutex},
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tracing::{debug, info, warn};

pub mod connection;
pub mod dispatcher;
pub mod durable_state_store;
pub mod fallback;
pub mod shipping_reducer;
pub mod state_store;
pub mod step_tracker;
pub mod throttle;

pub use connection::{
    ConnectionManager, ConnectionOptions, ConnectionPhase, ConnectionState, InboundFrame,
};
pub use dispatcher::Action;
pub use durable_state_store::DurableStateStore;
pub use shipping_reducer::ShippingState;
pub use state_store::{ClientStateStore, MemoryStateStore};
pub use step_tracker::{StepState, StepTracker};

use dispatcher::classify;
use throttle::NotifyThrottle;

pub const DEFAULT_NOTIFY_THROTTLE: Duration = Duration::from_millis(50);
const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Coalesced: at most one per throttle window, carrying the latest state.
    StateChanged(FeedSnapshot),
    ConnectionChanged(ConnectionState),
    SessionEstablished(SessionId),
    StepCompleted(ShippingStep),
    QuotesReady(Vec<Quote>),
    LabelReady(LabelData),
    ToolFailed {
        tool_name: Option<String>,
        tool_call_id: Option<String>,
        error: String,
    },
    Notification(String),
    ServerError(ServiceError),
}

/// Everything a renderer needs, as one consistent value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSnapshot {
    pub steps: StepState,
    pub shipping: ShippingState,
}

#[derive(Default)]
struct FeedState {
    steps: StepTracker,
    shipping: ShippingState,
}

impl FeedState {
    fn snapshot(&self) -> FeedSnapshot {
        FeedSnapshot {
            steps: self.steps.state().clone(),
            shipping: self.shipping.clone(),
        }
    }
}

/// State shared with the background tasks; never holds the client itself.
struct FeedShared {
    state: Mutex<FeedState>,
    snapshot: watch::Sender<FeedSnapshot>,
    events: broadcast::Sender<ClientEvent>,
}

impl FeedShared {
    /// Folds one frame into both state holders. Returns whether state changed.
    async fn fold(&self, frame: &InboundFrame) -> bool {
        let Some(message) = &frame.message else {
            debug!("feed: skipping undecodable frame");
            return false;
        };
        let actions = classify(message);

        let (completed, changed) = {
            let mut state = self.state.lock().await;
            let before = state.snapshot();
            let completed = state.steps.apply(&actions);
            let shipping = shipping_reducer::apply(&state.shipping, &actions);
            state.shipping = shipping;
            let after = state.snapshot();
            let changed = after != before;
            if changed {
                self.snapshot.send_replace(after);
            }
            (completed, changed)
        };

        for step in completed {
            info!(step = step.tag(), synthetic = frame.synthetic, "feed: step completed");
            self.emit(ClientEvent::StepCompleted(step));
        }
        for action in actions {
            let event = match action {
                Action::QuotesReceived(quotes) => ClientEvent::QuotesReady(quotes),
                Action::LabelReceived { label, .. } => ClientEvent::LabelReady(label),
                Action::ToolFailed {
                    tool_name,
                    tool_call_id,
                    error,
                } => ClientEvent::ToolFailed {
                    tool_name,
                    tool_call_id,
                    error,
                },
                Action::Notification(text) => ClientEvent::Notification(text),
                Action::ServiceError(error) => {
                    warn!(code = ?error.code, message = %error.message, "feed: service reported an error");
                    ClientEvent::ServerError(error)
                }
                _ => continue,
            };
            self.emit(event);
        }
        changed
    }

    fn notify_state_changed(&self) {
        let snapshot = self.snapshot.borrow().clone();
        self.emit(ClientEvent::StateChanged(snapshot));
    }

    fn emit(&self, event: ClientEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }
}

/// Wires the connection, the dispatcher and both reducers together.
pub struct ShippingFeedClient {
    connection: Arc<ConnectionManager>,
    store: Arc<dyn ClientStateStore>,
    shared: Arc<FeedShared>,
    tasks: Vec<JoinHandle<()>>,
}

impl ShippingFeedClient {
    /// The session comes from `options` first, then from the persisted store.
    pub async fn new(
        mut options: ConnectionOptions,
        store: Arc<dyn ClientStateStore>,
        throttle_window: Duration,
    ) -> Arc<Self> {
        if options.session_id.is_none() {
            match store.load_session_id().await {
                Ok(Some(session_id)) => {
                    info!(session_id = %session_id, "feed: resuming persisted session");
                    options.session_id = Some(session_id);
                }
                Ok(None) => {}
                Err(err) => warn!(error = %err, "feed: failed to load persisted session id"),
            }
        }

        let (connection, frames) = ConnectionManager::new(options, Arc::clone(&store));
        let (snapshot, _) = watch::channel(FeedSnapshot::default());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::new(FeedShared {
            state: Mutex::new(FeedState::default()),
            snapshot,
            events,
        });

        let tasks = vec![
            tokio::spawn(run_fold(
                Arc::clone(&shared),
                frames,
                NotifyThrottle::new(throttle_window),
            )),
            tokio::spawn(run_connection_watch(
                Arc::clone(&shared),
                connection.subscribe_state(),
                connection.subscribe_session(),
            )),
        ];

        Arc::new(Self {
            connection,
            store,
            shared,
            tasks,
        })
    }

    pub async fn connect(&self) {
        self.connection.connect().await;
    }

    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<FeedSnapshot> {
        self.shared.snapshot.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.connection.session_id()
    }

    pub fn session_share_url(&self) -> Option<String> {
        self.connection.share_url()
    }

    pub fn last_message(&self) -> Option<InboundFrame> {
        self.connection.last_message()
    }

    /// Manual override of the step marker; does not touch completion marks.
    pub async fn set_step(&self, step: ShippingStep) {
        let snapshot = {
            let mut state = self.shared.state.lock().await;
            state.steps.set_step(step);
            let snapshot = state.snapshot();
            self.shared.snapshot.send_replace(snapshot.clone());
            snapshot
        };
        self.shared.emit(ClientEvent::StateChanged(snapshot));
    }

    /// Returns whether the step was newly completed.
    pub async fn complete_step(&self, step: ShippingStep) -> bool {
        let (added, snapshot) = {
            let mut state = self.shared.state.lock().await;
            let added = state.steps.complete_step(step);
            let snapshot = state.snapshot();
            if !added.is_empty() {
                self.shared.snapshot.send_replace(snapshot.clone());
            }
            (added, snapshot)
        };
        if added.is_empty() {
            return false;
        }
        for step in added {
            self.shared.emit(ClientEvent::StepCompleted(step));
        }
        self.shared.emit(ClientEvent::StateChanged(snapshot));
        true
    }

    pub fn send_ping(&self) -> bool {
        self.connection
            .send(&OutboundMessage::ping(Utc::now().timestamp_millis()))
    }

    pub fn request_quotes(&self, request: &QuoteRequest) -> bool {
        self.send_tool_call(ToolName::GetShippingQuotes, serde_json::to_value(request))
    }

    pub fn request_label(&self, request: &LabelRequest) -> bool {
        self.send_tool_call(ToolName::CreateLabel, serde_json::to_value(request))
    }

    pub fn send_raw(&self, message: &Value) -> bool {
        self.connection.send_raw(message)
    }

    pub async fn sound_effects_enabled(&self) -> Result<bool> {
        self.store
            .sound_effects_enabled()
            .await
            .context("failed to read sound effects preference")
    }

    pub async fn set_sound_effects_enabled(&self, enabled: bool) -> Result<()> {
        self.store
            .set_sound_effects_enabled(enabled)
            .await
            .context("failed to store sound effects preference")
    }

    /// Flips the preference and returns the new value.
    pub async fn toggle_sound_effects(&self) -> Result<bool> {
        let enabled = !self.sound_effects_enabled().await?;
        self.set_sound_effects_enabled(enabled).await?;
        Ok(enabled)
    }

    fn send_tool_call(&self, tool: ToolName, parameters: serde_json::Result<Value>) -> bool {
        let parameters = match parameters {
            Ok(parameters) => parameters,
            Err(err) => {
                warn!(tool = tool.as_str(), error = %err, "feed: failed to encode tool parameters");
                return false;
            }
        };
        let session_id = self.session_id();
        self.connection.send(&OutboundMessage::tool_call(
            tool,
            parameters,
            session_id.as_ref(),
        ))
    }
}

impl Drop for ShippingFeedClient {
    fn drop(&mut self) {
        self.connection.request_shutdown();
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn run_fold(
    shared: Arc<FeedShared>,
    mut frames: mpsc::UnboundedReceiver<InboundFrame>,
    mut throttle: NotifyThrottle,
) {
    loop {
        let deadline = throttle.deadline();
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(frame) => {
                    if shared.fold(&frame).await {
                        throttle.mark_dirty(Instant::now());
                    }
                }
                None => {
                    if throttle.take() {
                        shared.notify_state_changed();
                    }
                    break;
                }
            },
            _ = sleep_until_deadline(deadline) => {
                if throttle.take() {
                    shared.notify_state_changed();
                }
            }
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}

async fn run_connection_watch(
    shared: Arc<FeedShared>,
    mut state: watch::Receiver<ConnectionState>,
    mut session: watch::Receiver<Option<SessionId>>,
) {
    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = state.borrow_and_update().clone();
                shared.emit(ClientEvent::ConnectionChanged(current));
            }
            changed = session.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = session.borrow_and_update().clone();
                if let Some(session_id) = current {
                    shared.emit(ClientEvent::SessionEstablished(session_id));
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
