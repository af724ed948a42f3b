//! WebSocket transport.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, trace};

use crate::utils::http_client::install_rustls_provider;
use crate::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens PubSub connections.
#[async_trait]
pub trait PubSubConnector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Box<dyn PubSubConnection>>;
}

/// An open text-frame connection.
#[async_trait]
pub trait PubSubConnection: Send {
    async fn send_text(&mut self, text: String) -> Result<()>;

    /// Next text frame, `None` once the peer closed the connection.
    ///
    /// Must be cancel safe.
    async fn recv_text(&mut self) -> Option<Result<String>>;

    async fn close(&mut self);
}

pub struct WsConnector {
    endpoint: String,
}

impl WsConnector {
    pub fn new(endpoint: impl Into<String>) -> Self {
        install_rustls_provider();
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl PubSubConnector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn PubSubConnection>> {
        debug!(endpoint = %self.endpoint, "Opening PubSub connection");
        let (stream, response) =
            tokio::time::timeout(CONNECT_TIMEOUT, connect_async(self.endpoint.as_str()))
                .await
                .map_err(|_| Error::transport(format!("connect to {} timed out", self.endpoint)))??;
        trace!(status = %response.status(), "WebSocket handshake complete");
        Ok(Box::new(WsConnection { stream }))
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PubSubConnection for WsConnection {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.stream.send(Message::text(text)).await?;
        Ok(())
    }

    async fn recv_text(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Binary(bytes)) => {
                    return Some(Ok(String::from_utf8_lossy(&bytes).into_owned()));
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "PubSub connection closed by server");
                    return None;
                }
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) {
        match tokio::time::timeout(CLOSE_TIMEOUT, self.stream.close(None)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => trace!(error = %e, "Error closing PubSub connection"),
            Err(_) => trace!("Timed out closing PubSub connection"),
        }
    }
}
