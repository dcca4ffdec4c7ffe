//! Channel lifecycle for one session store.
//!
//! A [`Connector`] opens a [`Channel`] to the collaboration endpoint. The
//! [`ConnectionManager`] owns at most one channel (or in-flight attempt) at
//! a time and tags each attempt with a generation number. Every signal a
//! channel task reports carries that generation, so once a newer
//! `connect()` or a `disconnect()` bumps it, late signals from the old
//! channel are recognised and ignored.
//!
//! ```text
//!  connect()                     channel task (per generation)
//!     │                               │
//!     ▼                               ▼
//!  ConnectionManager::open ──► Connector::open ──► Signal::Opened
//!                                     │
//!                             Inbound frames ──► Signal::Message
//!                                     │
//!                       close / error ──► Signal::Closed / Signal::Failed
//! ```

mod mock;
mod websocket;

pub use mock::{MockConnector, MockPeer};
pub use websocket::WebSocketConnector;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Identity of a channel: one session/user pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelAddress {
    pub session_id: String,
    pub user_id: String,
    pub display_name: String,
}

impl ChannelAddress {
    pub fn new(
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }

    /// Endpoint URL: `{server_url}/{session}/{user}?name={display name}`.
    pub fn url(&self, server_url: &str) -> String {
        format!(
            "{}/{}/{}?name={}",
            server_url.trim_end_matches('/'),
            urlencoding::encode(&self.session_id),
            urlencoding::encode(&self.user_id),
            urlencoding::encode(&self.display_name),
        )
    }
}

/// A frame delivered by an open channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Text frame, not yet decoded
    Message(String),
    /// Channel closed (by either side)
    Closed,
    /// Channel failed at the transport level
    Failed(String),
}

/// Write half of an open channel.
pub trait ChannelSink: Send + Sync {
    /// Queue a text frame for transmission.
    fn send_text(&self, text: String) -> Result<(), TransportError>;

    /// Close the channel. Further sends fail.
    fn close(&self);
}

/// An open channel: a write half and a stream of inbound frames.
pub struct Channel {
    pub sink: Box<dyn ChannelSink>,
    pub inbound: mpsc::UnboundedReceiver<Inbound>,
}

/// Opens channels to the collaboration endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, address: &ChannelAddress) -> Result<Channel, TransportError>;
}

/// Transport-level failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("connection timeout")]
    Timeout,
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("not connected")]
    NotConnected,
    #[error("connection closed")]
    Closed,
}

/// Lifecycle report from a channel task.
pub(crate) enum Signal {
    Opened {
        generation: u64,
        sink: Box<dyn ChannelSink>,
    },
    Message {
        generation: u64,
        text: String,
    },
    Closed {
        generation: u64,
    },
    Failed {
        generation: u64,
        reason: String,
    },
}

struct ActiveChannel {
    generation: u64,
    /// `None` while the connector is still opening.
    sink: Option<Box<dyn ChannelSink>>,
    task: JoinHandle<()>,
}

/// Owns the (single) live channel of a session store.
pub(crate) struct ConnectionManager {
    connector: Arc<dyn Connector>,
    signals: mpsc::UnboundedSender<Signal>,
    generation: u64,
    active: Option<ActiveChannel>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, signals: mpsc::UnboundedSender<Signal>) -> Self {
        Self {
            connector,
            signals,
            generation: 0,
            active: None,
        }
    }

    /// Start a new connection attempt, closing any previous one first.
    ///
    /// Returns the generation assigned to the attempt.
    pub fn open(&mut self, address: ChannelAddress) -> u64 {
        self.close();
        let generation = self.generation;

        let connector = self.connector.clone();
        let signals = self.signals.clone();
        let task = tokio::spawn(drive_channel(connector, address, generation, signals));

        self.active = Some(ActiveChannel {
            generation,
            sink: None,
            task,
        });
        generation
    }

    /// Close the current channel or abandon the current attempt.
    ///
    /// Always invalidates the current generation. Returns `true` if there
    /// was something to close.
    pub fn close(&mut self) -> bool {
        self.generation += 1;
        let Some(active) = self.active.take() else {
            return false;
        };
        if let Some(sink) = &active.sink {
            sink.close();
        }
        active.task.abort();
        true
    }

    /// Whether `generation` is the live attempt.
    pub fn is_current(&self, generation: u64) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.generation == generation)
    }

    /// Attach the write half of a freshly opened channel.
    ///
    /// A sink from a superseded attempt is closed straight away and
    /// `false` is returned.
    pub fn install(&mut self, generation: u64, sink: Box<dyn ChannelSink>) -> bool {
        match self.active.as_mut() {
            Some(active) if active.generation == generation => {
                active.sink = Some(sink);
                true
            }
            _ => {
                sink.close();
                false
            }
        }
    }

    /// Forget the channel after it closed or failed on its own.
    pub fn release(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.active = None;
        true
    }

    /// Send a text frame over the live channel.
    pub fn send(&self, text: String) -> Result<(), TransportError> {
        match self.active.as_ref().and_then(|active| active.sink.as_ref()) {
            Some(sink) => sink.send_text(text),
            None => Err(TransportError::NotConnected),
        }
    }
}

/// Open one channel and relay its frames as signals until it ends.
async fn drive_channel(
    connector: Arc<dyn Connector>,
    address: ChannelAddress,
    generation: u64,
    signals: mpsc::UnboundedSender<Signal>,
) {
    let Channel { sink, mut inbound } = match connector.open(&address).await {
        Ok(channel) => channel,
        Err(e) => {
            let _ = signals.send(Signal::Failed {
                generation,
                reason: e.to_string(),
            });
            return;
        }
    };

    if signals.send(Signal::Opened { generation, sink }).is_err() {
        return;
    }

    while let Some(frame) = inbound.recv().await {
        let signal = match frame {
            Inbound::Message(text) => Signal::Message { generation, text },
            Inbound::Closed => Signal::Closed { generation },
            Inbound::Failed(reason) => Signal::Failed { generation, reason },
        };
        let terminal = !matches!(signal, Signal::Message { .. });
        if signals.send(signal).is_err() || terminal {
            return;
        }
    }

    let _ = signals.send(Signal::Closed { generation });
}
