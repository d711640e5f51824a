use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use super::PushTransport;
use crate::error::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket feed of a dashboard page (`ws://host/ws/<page>/`).
pub struct WebSocketPush {
    url: String,
    stream: Option<WsStream>,
}

impl WebSocketPush {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PushTransport for WebSocketPush {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.close().await;
        let (stream, response) = connect_async(self.url.as_str()).await?;
        debug!(url = %self.url, status = %response.status(), "websocket handshake complete");
        self.stream = Some(stream);
        Ok(())
    }

    async fn next_message(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            let stream = self.stream.as_mut()?;
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text)),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => debug!("ignoring non UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "websocket closed by server");
                    self.stream = None;
                    return None;
                }
                // Pings are answered by tungstenite on the next read.
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    self.stream = None;
                    return Some(Err(err.into()));
                }
                None => {
                    self.stream = None;
                    return None;
                }
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(err) = stream.close(None).await {
                debug!(error = %err, "websocket close handshake failed");
            }
        }
    }
}
