//! WebSocket channel opener.
//!
//! One text frame carries one JSON-RPC message. A writer task drains the
//! outbound queue into the sink; a reader task forwards text frames inbound
//! and ends the inbound stream when the server closes or the socket fails.

use blitz_core::transport::{Channel, ChannelOpener};
use blitz_types::error::TransportError;
use blitz_types::tool::TransportKind;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Frames buffered in each direction before senders wait.
const CHANNEL_CAPACITY: usize = 64;

pub struct WebSocketOpener {
    url: String,
}

impl WebSocketOpener {
    pub fn new(url: &str) -> Result<Self, TransportError> {
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(TransportError::Config(format!(
                "websocket url must start with ws:// or wss://, got '{url}'"
            )));
        }
        Ok(Self {
            url: url.to_string(),
        })
    }
}

impl ChannelOpener for WebSocketOpener {
    async fn open(&self) -> Result<Channel, TransportError> {
        let (socket, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::Connection {
                attempts: 1,
                message: format!("{}: {e}", self.url),
            })?;
        tracing::debug!(url = %self.url, "websocket handshake complete");

        let (mut sink, mut stream) = socket.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        let shutdown = CancellationToken::new();

        let writer_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_shutdown.cancelled() => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    frame = out_rx.recv() => match frame {
                        Some(text) => {
                            if let Err(e) = sink.send(Message::Text(text.into())).await {
                                tracing::warn!(error = %e, "websocket write failed");
                                break;
                            }
                        }
                        None => {
                            let _ = sink.close().await;
                            break;
                        }
                    },
                }
            }
        });

        let reader_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = reader_shutdown.cancelled() => break,
                    next = stream.next() => match next {
                        Some(Ok(Message::Text(text))) => {
                            if in_tx.send(text.as_str().to_string()).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                            Ok(text) => {
                                if in_tx.send(text).await.is_err() {
                                    break;
                                }
                            }
                            Err(_) => tracing::warn!(len = bytes.len(), "non-UTF-8 binary frame dropped"),
                        },
                        Some(Ok(Message::Close(frame))) => {
                            tracing::debug!(?frame, "websocket closed by server");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "websocket read failed");
                            break;
                        }
                        None => break,
                    },
                }
            }
        });

        Ok(Channel {
            outbound: out_tx,
            inbound: in_rx,
            shutdown,
        })
    }

    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}
