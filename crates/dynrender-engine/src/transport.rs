use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream,
    tungstenite::{Message as WsMessage, client::IntoClientRequest, http::HeaderValue},
};

use crate::error::{RenderError, RenderResult};

/// A text-frame duplex to the console proxy.
#[async_trait::async_trait]
pub trait ConsoleTransport: Send {
    async fn send_text(&mut self, text: String) -> RenderResult<()>;

    /// Next text frame, or `None` once the peer closed.
    ///
    /// Must be cancel-safe: dropping the future before it resolves loses no frame.
    async fn recv_text(&mut self) -> RenderResult<Option<String>>;
}

#[async_trait::async_trait]
pub trait ConsoleConnector: Send + Sync {
    async fn open(&self, socket_url: &str, origin: &str) -> RenderResult<Box<dyn ConsoleTransport>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

struct WsTransport {
    ws: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

#[async_trait::async_trait]
impl ConsoleConnector for WsConnector {
    async fn open(&self, socket_url: &str, origin: &str) -> RenderResult<Box<dyn ConsoleTransport>> {
        let mut req = socket_url
            .into_client_request()
            .map_err(|e| RenderError::session(format!("Invalid console socket URL: {e}")))?;
        // The console proxy rejects upgrades whose Origin is not the panel.
        let origin = HeaderValue::from_str(origin.trim().trim_end_matches('/'))
            .map_err(|e| RenderError::session(format!("Invalid panel origin: {e}")))?;
        req.headers_mut().insert("Origin", origin);

        let (ws, _) = tokio_tungstenite::connect_async(req)
            .await
            .map_err(|e| RenderError::session(format!("Unable to connect to the console: {e}")))?;
        Ok(Box::new(WsTransport { ws }))
    }
}

#[async_trait::async_trait]
impl ConsoleTransport for WsTransport {
    async fn send_text(&mut self, text: String) -> RenderResult<()> {
        self.ws
            .send(WsMessage::Text(text.into()))
            .await
            .map_err(|e| RenderError::session(format!("Unable to write to the console: {e}")))
    }

    async fn recv_text(&mut self) -> RenderResult<Option<String>> {
        while let Some(msg) = self.ws.next().await {
            let msg =
                msg.map_err(|e| RenderError::session(format!("Console connection error: {e}")))?;
            match msg {
                WsMessage::Text(text) => return Ok(Some(text.as_str().to_owned())),
                WsMessage::Close(_) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }
}
