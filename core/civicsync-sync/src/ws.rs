//! WebSocket push transport.

use crate::channel::{PushConnection, PushConnector};
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

/// Connects push channels over `ws://` or `wss://`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl PushConnector for WsConnector {
    async fn connect(&self, url: &str) -> SyncResult<Box<dyn PushConnection>> {
        let (stream, response) = connect_async(url)
            .await
            .map_err(|e| SyncError::Network(format!("websocket connect to {url}: {e}")))?;
        debug!(%url, status = %response.status(), "websocket handshake complete");
        Ok(Box::new(WsConnection { stream }))
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PushConnection for WsConnection {
    async fn send(&mut self, text: String) -> SyncResult<()> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| SyncError::Network(e.to_string()))
    }

    async fn recv(&mut self) -> Option<SyncResult<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(e) => {
                        warn!("dropping binary push frame that is not UTF-8: {e}");
                        continue;
                    }
                },
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "websocket close frame");
                    return None;
                }
                // tungstenite answers pings itself
                Ok(_) => continue,
                Err(e) => return Some(Err(SyncError::Network(e.to_string()))),
            }
        }
    }
}
