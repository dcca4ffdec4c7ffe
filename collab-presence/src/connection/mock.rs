//! In-memory connector for tests and demos.
//!
//! Every `open()` creates a [`MockPeer`]: the far end of the channel. Tests
//! push inbound frames through it and inspect what the client sent, how
//! often the channel was closed, and whether it is still live.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{Channel, ChannelAddress, ChannelSink, Connector, Inbound, TransportError};

#[derive(Debug, Default)]
struct PeerState {
    sent: Vec<String>,
    close_count: usize,
    live: bool,
}

/// Server side of one mock channel.
#[derive(Debug, Clone)]
pub struct MockPeer {
    state: Arc<Mutex<PeerState>>,
    inbound: mpsc::UnboundedSender<Inbound>,
    address: ChannelAddress,
}

impl MockPeer {
    fn state(&self) -> MutexGuard<'_, PeerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver a text frame to the client.
    pub fn push(&self, text: impl Into<String>) {
        let _ = self.inbound.send(Inbound::Message(text.into()));
    }

    /// Deliver a JSON value as a text frame.
    pub fn push_json(&self, value: &serde_json::Value) {
        self.push(value.to_string());
    }

    /// Close the channel from the server side.
    pub fn close_remote(&self) {
        self.state().live = false;
        let _ = self.inbound.send(Inbound::Closed);
    }

    /// Fail the channel with a transport error.
    pub fn fail(&self, reason: impl Into<String>) {
        self.state().live = false;
        let _ = self.inbound.send(Inbound::Failed(reason.into()));
    }

    /// Frames the client sent, in order.
    pub fn sent(&self) -> Vec<String> {
        self.state().sent.clone()
    }

    /// Number of times the client closed this channel.
    pub fn close_count(&self) -> usize {
        self.state().close_count
    }

    pub fn is_live(&self) -> bool {
        self.state().live
    }

    pub fn address(&self) -> &ChannelAddress {
        &self.address
    }
}

struct MockSink {
    state: Arc<Mutex<PeerState>>,
}

impl MockSink {
    fn state(&self) -> MutexGuard<'_, PeerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ChannelSink for MockSink {
    fn send_text(&self, text: String) -> Result<(), TransportError> {
        let mut state = self.state();
        if !state.live {
            return Err(TransportError::Closed);
        }
        state.sent.push(text);
        Ok(())
    }

    fn close(&self) {
        let mut state = self.state();
        state.close_count += 1;
        state.live = false;
    }
}

impl Drop for MockSink {
    fn drop(&mut self) {
        self.state().live = false;
    }
}

#[derive(Debug, Default)]
struct MockInner {
    peers: Vec<MockPeer>,
    fail_next_open: Option<String>,
    max_live: usize,
}

/// Connector whose channels live in memory.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    inner: Arc<Mutex<MockInner>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, MockInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `open()` fail with the given reason.
    pub fn fail_next_open(&self, reason: impl Into<String>) {
        self.inner().fail_next_open = Some(reason.into());
    }

    /// The `index`-th channel ever opened.
    pub fn peer(&self, index: usize) -> Option<MockPeer> {
        self.inner().peers.get(index).cloned()
    }

    /// The most recently opened channel.
    pub fn last_peer(&self) -> Option<MockPeer> {
        self.inner().peers.last().cloned()
    }

    /// Number of successful opens.
    pub fn open_count(&self) -> usize {
        self.inner().peers.len()
    }

    /// Channels currently live.
    pub fn live_count(&self) -> usize {
        self.inner().peers.iter().filter(|p| p.is_live()).count()
    }

    /// Highest number of simultaneously live channels observed at open time.
    pub fn max_live(&self) -> usize {
        self.inner().max_live
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, address: &ChannelAddress) -> Result<Channel, TransportError> {
        let mut inner = self.inner();

        if let Some(reason) = inner.fail_next_open.take() {
            return Err(TransportError::ConnectionFailed(reason));
        }

        let state = Arc::new(Mutex::new(PeerState {
            live: true,
            ..PeerState::default()
        }));
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        inner.peers.push(MockPeer {
            state: state.clone(),
            inbound: in_tx,
            address: address.clone(),
        });
        let live = inner.peers.iter().filter(|p| p.is_live()).count();
        inner.max_live = inner.max_live.max(live);

        Ok(Channel {
            sink: Box::new(MockSink { state }),
            inbound: in_rx,
        })
    }
}
