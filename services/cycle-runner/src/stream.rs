//! Account update stream
//!
//! Websocket subscription to order, position and balance updates. Updates
//! are forwarded to an mpsc channel and only ever logged by the runner.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::gateway::GatewayError;
use crate::types::AccountUpdate;

/// Channels subscribed on connect
const CHANNELS: [&str; 3] = ["balance", "order", "position"];

/// Buffered updates before the sender waits on the logger
const UPDATE_BUFFER: usize = 1024;

/// Delay between reconnect attempts
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Websocket subscriber for account updates
pub struct UpdateStream {
    url: String,
    api_key: String,
    reconnect_delay: Duration,
}

impl UpdateStream {
    pub fn new(url: &str, api_key: &str) -> Self {
        Self {
            url: url.to_string(),
            api_key: api_key.to_string(),
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    /// Connect and subscribe, then hand the connection to a background task.
    ///
    /// Fails if the first connection or subscription fails. Later disconnects
    /// are retried by the task until the receiver is dropped.
    pub async fn start(self) -> Result<mpsc::Receiver<AccountUpdate>, GatewayError> {
        let ws_stream = self.connect().await?;
        let (tx, rx) = mpsc::channel(UPDATE_BUFFER);
        tokio::spawn(async move {
            self.run(ws_stream, tx).await;
        });
        Ok(rx)
    }

    async fn run(self, mut ws_stream: WsStream, tx: mpsc::Sender<AccountUpdate>) {
        loop {
            match self.listen(ws_stream, &tx).await {
                Ok(()) => info!("Account update stream closed"),
                Err(e) => warn!("Account update stream error: {}", e),
            }

            ws_stream = loop {
                if tx.is_closed() {
                    debug!("Update receiver dropped, stopping stream");
                    return;
                }

                tokio::time::sleep(self.reconnect_delay).await;
                info!("Reconnecting account update stream...");

                match self.connect().await {
                    Ok(ws_stream) => break ws_stream,
                    Err(e) => warn!("Account update stream error: {}", e),
                }
            };
        }
    }

    async fn connect(&self) -> Result<WsStream, GatewayError> {
        let (mut ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| GatewayError::Transport(format!("WebSocket connection failed: {}", e)))?;

        info!("Connected to account update stream");

        ws_stream
            .send(Message::Text(self.subscribe_message().to_string()))
            .await
            .map_err(|e| GatewayError::Transport(format!("Failed to subscribe: {}", e)))?;

        info!("Subscribed to {} updates", CHANNELS.join("/"));
        Ok(ws_stream)
    }

    async fn listen(
        &self,
        ws_stream: WsStream,
        tx: &mpsc::Sender<AccountUpdate>,
    ) -> Result<(), GatewayError> {
        let (mut sink, mut reader) = ws_stream.split();

        while let Some(msg) = reader.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if let Some(update) = parse_update(&text) {
                        if tx.send(update).await.is_err() {
                            return Ok(());
                        }
                    }
                }
                Ok(Message::Ping(data)) => {
                    if let Err(e) = sink.send(Message::Pong(data)).await {
                        error!("Failed to send pong: {}", e);
                    }
                }
                Ok(Message::Close(_)) => {
                    info!("WebSocket closed by server");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    return Err(GatewayError::Transport(format!("WebSocket error: {}", e)));
                }
            }
        }

        Ok(())
    }

    fn subscribe_message(&self) -> Value {
        serde_json::json!({
            "method": "subscribe",
            "apiKey": self.api_key,
            "channels": CHANNELS,
        })
    }
}

/// Parse one stream message; non-update messages yield `None`
pub fn parse_update(text: &str) -> Option<AccountUpdate> {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!("Failed to parse stream message: {}", e);
            return None;
        }
    };

    let channel = value.get("channel").and_then(|c| c.as_str())?;
    if !CHANNELS.contains(&channel) {
        debug!("Ignoring message on channel {}", channel);
        return None;
    }

    match serde_json::from_value(value.clone()) {
        Ok(update) => Some(update),
        Err(e) => {
            warn!("Malformed {} update: {}", channel, e);
            None
        }
    }
}
