//! WebSocket connector built on tokio-tungstenite.
//!
//! Each open channel runs two tasks, like the sync client it grew out of:
//! a writer draining an outgoing queue into the socket, and a reader
//! turning socket messages into [`Inbound`] frames.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use super::{Channel, ChannelAddress, ChannelSink, Connector, Inbound, TransportError};
use crate::config::ClientConfig;

/// Opens channels as WebSocket connections.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    server_url: String,
    connect_timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(server_url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            server_url: server_url.into(),
            connect_timeout,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.server_url.clone(), config.connect_timeout)
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

enum Outgoing {
    Text(String),
    Close,
}

struct WebSocketSink {
    outgoing: mpsc::UnboundedSender<Outgoing>,
}

impl ChannelSink for WebSocketSink {
    fn send_text(&self, text: String) -> Result<(), TransportError> {
        self.outgoing
            .send(Outgoing::Text(text))
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        let _ = self.outgoing.send(Outgoing::Close);
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, address: &ChannelAddress) -> Result<Channel, TransportError> {
        let url = address.url(&self.server_url);
        log::debug!("Opening WebSocket {url}");

        let (ws_stream, _) = tokio::time::timeout(
            self.connect_timeout,
            tokio_tungstenite::connect_async(url.as_str()),
        )
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outgoing>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Inbound>();

        // Writer task: ends on Close or once the sink is dropped, and
        // always sends a close frame on the way out.
        let failure_tx = in_tx.clone();
        tokio::spawn(async move {
            while let Some(outgoing) = out_rx.recv().await {
                match outgoing {
                    Outgoing::Text(text) => {
                        if let Err(e) = ws_writer.send(Message::Text(text.into())).await {
                            let _ = failure_tx.send(Inbound::Failed(e.to_string()));
                            return;
                        }
                    }
                    Outgoing::Close => break,
                }
            }
            let _ = ws_writer.close().await;
        });

        // Reader task
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                let frame = match msg {
                    Ok(Message::Text(text)) => Inbound::Message(text.to_string()),
                    Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => Inbound::Message(text),
                        Err(_) => {
                            log::warn!("Dropping non-UTF-8 binary frame ({} bytes)", data.len());
                            continue;
                        }
                    },
                    Ok(Message::Close(_)) => {
                        let _ = in_tx.send(Inbound::Closed);
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = in_tx.send(Inbound::Failed(e.to_string()));
                        return;
                    }
                };
                if in_tx.send(frame).is_err() {
                    return;
                }
            }
            let _ = in_tx.send(Inbound::Closed);
        });

        Ok(Channel {
            sink: Box::new(WebSocketSink { outgoing: out_tx }),
            inbound: in_rx,
        })
    }
}
