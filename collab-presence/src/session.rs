//! Session store: the observable facade over connection state and the
//! collaborator registry.
//!
//! The store runs as a single tokio task that owns [`SessionState`]. The
//! [`SessionStore`] handle only sends commands to it, so every action
//! returns immediately and there is exactly one writer. Commands and
//! channel signals are handled one at a time, in arrival order; after each
//! mutation the new state is published on a `watch` channel.
//!
//! ```text
//!  SessionStore ──commands──► SessionTask ◄──signals── channel task
//!       ▲                         │
//!       └──── watch<SessionState> ┘──► SessionEvent (edits, lifecycle)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::{ClientConfig, StalePolicy};
use crate::connection::{
    ChannelAddress, ConnectionManager, Connector, Signal, WebSocketConnector,
};
use crate::protocol::{CollaborationEvent, CursorPosition, EventPayload, OutboundMessage};
use crate::registry::{self, CollaboratorRegistry};

/// Where the session is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPhase {
    /// Never connected, or explicitly disconnected
    #[default]
    Idle,
    Connecting,
    Connected,
    /// Channel closed without `disconnect()`
    Closed,
    /// Channel failed; see `connection_error`
    Errored,
}

/// Opaque handle of the live channel.
///
/// Assigned when the channel opens, not when the attempt starts: while
/// `Connecting`, [`SessionState::channel`] is still `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ChannelId(u64);

/// Snapshot of everything a consumer can observe.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub phase: ConnectionPhase,
    pub is_connected: bool,
    pub is_connecting: bool,
    pub connection_error: Option<String>,
    pub current_user_id: Option<String>,
    pub current_user_name: Option<String>,
    pub channel: Option<ChannelId>,
    pub collaborators: CollaboratorRegistry,
}

impl SessionState {
    /// Move to `phase`, keeping the two flags in step with it.
    fn set_phase(&mut self, phase: ConnectionPhase) {
        self.phase = phase;
        self.is_connected = phase == ConnectionPhase::Connected;
        self.is_connecting = phase == ConnectionPhase::Connecting;
    }
}

/// An edit received from a collaborator. Never merged here.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEdit {
    pub user_id: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

/// Notifications forwarded to the application alongside state snapshots.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Channel opened
    Connected,
    /// Channel closed without `disconnect()`
    Closed,
    /// Channel failed
    Failed(String),
    /// A collaborator's edit
    RemoteEdit(RemoteEdit),
}

enum Command {
    Connect(ChannelAddress),
    Disconnect,
    SendCursor(CursorPosition),
    SendEdit(Value),
    SetUserName(String),
    ClearError,
    Flush(oneshot::Sender<()>),
}

/// Handle to a running session.
///
/// Must be created inside a tokio runtime. Dropping the handle stops the
/// session task and closes any live channel.
pub struct SessionStore {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
    event_rx: Option<mpsc::Receiver<SessionEvent>>,
    events_claimed: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl SessionStore {
    /// Create a store that connects over WebSocket.
    pub fn new(config: ClientConfig) -> Self {
        let connector = Arc::new(WebSocketConnector::from_config(&config));
        Self::with_connector(config, connector)
    }

    /// Create a store over any connector.
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::default());
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        let events_claimed = Arc::new(AtomicBool::new(false));

        let task = SessionTask {
            policy: config.on_unexpected_close,
            connection: ConnectionManager::new(connector, signal_tx),
            state: state_tx,
            events: event_tx,
            events_claimed: events_claimed.clone(),
            commands: command_rx,
            signals: signal_rx,
        };

        Self {
            commands: command_tx,
            state: state_rx,
            event_rx: Some(event_rx),
            events_claimed,
            task: tokio::spawn(task.run()),
        }
    }

    /// Take the session event receiver (can only be called once).
    ///
    /// Events are only queued once the receiver has been taken; anything
    /// that happened before is not replayed.
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        let rx = self.event_rx.take()?;
        self.events_claimed.store(true, Ordering::Release);
        Some(rx)
    }

    /// Open a channel for `user_id` in `session_id`.
    ///
    /// Any existing channel or attempt is closed first; the last call wins.
    pub fn connect(
        &self,
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        display_name: impl Into<String>,
    ) {
        self.command(Command::Connect(ChannelAddress::new(
            session_id,
            user_id,
            display_name,
        )));
    }

    /// Close the channel and forget all collaborators.
    pub fn disconnect(&self) {
        self.command(Command::Disconnect);
    }

    /// Broadcast the local cursor. Dropped unless connected.
    pub fn send_cursor(&self, position: CursorPosition) {
        self.command(Command::SendCursor(position));
    }

    /// Broadcast an edit. Dropped unless connected.
    pub fn send_edit(&self, data: Value) {
        self.command(Command::SendEdit(data));
    }

    /// Rename the local user. Peers are not notified.
    pub fn set_user_name(&self, name: impl Into<String>) {
        self.command(Command::SetUserName(name.into()));
    }

    pub fn clear_error(&self) {
        self.command(Command::ClearError);
    }

    /// Resolves once every action issued before it has been applied.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Latest published state.
    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every published state.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Stop the session task, closing any live channel.
    pub async fn shutdown(self) {
        let Self { commands, task, .. } = self;
        drop(commands);
        let _ = task.await;
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            log::debug!("Session task is gone, dropping command");
        }
    }
}

/// The single writer of [`SessionState`].
struct SessionTask {
    policy: StalePolicy,
    connection: ConnectionManager,
    state: watch::Sender<SessionState>,
    events: mpsc::Sender<SessionEvent>,
    events_claimed: Arc<AtomicBool>,
    commands: mpsc::UnboundedReceiver<Command>,
    signals: mpsc::UnboundedReceiver<Signal>,
}

impl SessionTask {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(signal) = self.signals.recv() => self.handle_signal(signal),
            }
        }
        self.connection.close();
        log::debug!("Session task stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(address) => {
                if self.connection.close() {
                    log::info!("Replacing existing channel");
                }
                log::info!(
                    "Connecting to session {} as {}",
                    address.session_id,
                    address.user_id
                );
                let user_id = address.user_id.clone();
                let user_name = address.display_name.clone();
                self.connection.open(address);

                self.publish(|state| {
                    state.set_phase(ConnectionPhase::Connecting);
                    state.connection_error = None;
                    state.current_user_id = Some(user_id);
                    state.current_user_name = Some(user_name);
                    state.channel = None;
                });
            }

            Command::Disconnect => {
                if self.connection.close() {
                    log::info!("Disconnected");
                }
                self.publish(|state| {
                    state.set_phase(ConnectionPhase::Idle);
                    state.channel = None;
                    state.collaborators = CollaboratorRegistry::new();
                });
            }

            Command::SendCursor(position) => {
                self.transmit(OutboundMessage::cursor(&position));
            }

            Command::SendEdit(data) => {
                self.transmit(OutboundMessage::edit(data));
            }

            Command::SetUserName(name) => {
                self.publish(|state| state.current_user_name = Some(name));
            }

            Command::ClearError => {
                self.publish(|state| state.connection_error = None);
            }

            Command::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Opened { generation, sink } => {
                if !self.connection.install(generation, sink) {
                    log::debug!("Closed channel from superseded attempt {generation}");
                    return;
                }
                log::info!("Channel {generation} open");
                self.publish(|state| {
                    state.set_phase(ConnectionPhase::Connected);
                    state.channel = Some(ChannelId(generation));
                });
                self.emit(SessionEvent::Connected);
            }

            Signal::Message { generation, text } => {
                if self.connection.is_current(generation) {
                    self.handle_frame(&text);
                } else {
                    log::debug!("Ignoring frame from stale channel {generation}");
                }
            }

            Signal::Closed { generation } => {
                if !self.connection.release(generation) {
                    return;
                }
                log::info!("Channel {generation} closed");
                let clear = self.policy == StalePolicy::Clear;
                self.publish(|state| {
                    state.set_phase(ConnectionPhase::Closed);
                    state.channel = None;
                    if clear {
                        state.collaborators = CollaboratorRegistry::new();
                    }
                });
                self.emit(SessionEvent::Closed);
            }

            Signal::Failed { generation, reason } => {
                if !self.connection.release(generation) {
                    return;
                }
                log::warn!("Channel {generation} failed: {reason}");
                let clear = self.policy == StalePolicy::Clear;
                let error = reason.clone();
                self.publish(|state| {
                    state.set_phase(ConnectionPhase::Errored);
                    state.connection_error = Some(error);
                    state.channel = None;
                    if clear {
                        state.collaborators = CollaboratorRegistry::new();
                    }
                });
                self.emit(SessionEvent::Failed(reason));
            }
        }
    }

    /// Decode one inbound frame and reconcile it. Never fails.
    fn handle_frame(&mut self, text: &str) {
        let event = match CollaborationEvent::decode(text, Utc::now()) {
            Ok(event) => event,
            Err(e) => {
                log::warn!("Dropping inbound frame: {e}");
                return;
            }
        };

        if let EventPayload::Edit(data) = &event.payload {
            self.emit(SessionEvent::RemoteEdit(RemoteEdit {
                user_id: event.user_id.clone(),
                data: data.clone(),
                timestamp: event.seen_at(),
            }));
            return;
        }

        let changed = self.state.send_if_modified(|state| {
            let next = registry::apply(&event, &state.collaborators);
            if next == state.collaborators {
                return false;
            }
            state.collaborators = next;
            true
        });
        if !changed {
            log::debug!(
                "{} event for `{}` left the registry unchanged",
                event.kind,
                event.user_id
            );
        }
    }

    fn transmit(&self, message: OutboundMessage) {
        if !self.state.borrow().is_connected {
            log::debug!("Not connected, dropping outbound {}", message.event_kind);
            return;
        }
        let text = match message.encode() {
            Ok(text) => text,
            Err(e) => {
                log::warn!("Failed to encode outbound {}: {e}", message.event_kind);
                return;
            }
        };
        if let Err(e) = self.connection.send(text) {
            log::warn!("Failed to send {}: {e}", message.event_kind);
        }
    }

    /// Apply `mutate` and notify observers if anything changed.
    fn publish(&self, mutate: impl FnOnce(&mut SessionState)) {
        self.state.send_if_modified(|state| {
            let before = state.clone();
            mutate(state);
            *state != before
        });
    }

    fn emit(&self, event: SessionEvent) {
        if !self.events_claimed.load(Ordering::Acquire) {
            return;
        }
        if let Err(TrySendError::Full(_)) = self.events.try_send(event) {
            log::warn!("Session event buffer full, dropping event");
        }
    }
}
