//! Conexión websocket real (tokio-tungstenite).
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use log::debug;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::connector::{BuildLogConnection, Connector};
use crate::error::ConnectionError;
use crate::message::{BuildLogMessage, SubscribeRequest};

#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self { Self { url: url.into() } }
    pub fn url(&self) -> &str { &self.url }
}

#[async_trait]
impl Connector for WebSocketConnector {
    type Conn = WebSocketConnection;

    async fn connect(&self) -> Result<Self::Conn, ConnectionError> {
        debug!("connecting to build log stream at {}", self.url);
        let (ws, _) = connect_async(self.url.as_str()).await.map_err(|e| ConnectionError::Io(e.to_string()))?;
        Ok(WebSocketConnection { ws })
    }
}

pub struct WebSocketConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl BuildLogConnection for WebSocketConnection {
    async fn read_message(&mut self) -> Result<BuildLogMessage, ConnectionError> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => return BuildLogMessage::decode(&text),
                Some(Ok(Message::Binary(bytes))) => {
                    let text = String::from_utf8(bytes).map_err(|e| ConnectionError::Malformed(e.to_string()))?;
                    return BuildLogMessage::decode(&text);
                }
                Some(Ok(Message::Close(_))) | None => return Err(ConnectionError::Closed),
                // ping/pong los responde tungstenite
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(ConnectionError::Io(e.to_string())),
            }
        }
    }

    async fn send_request(&mut self, request: &SubscribeRequest) -> Result<(), ConnectionError> {
        let body = serde_json::to_string(request).map_err(|e| ConnectionError::Malformed(e.to_string()))?;
        self.ws.send(Message::Text(body)).await.map_err(|e| ConnectionError::Io(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        self.ws.close(None).await.map_err(|e| ConnectionError::Io(e.to_string()))
    }
}
