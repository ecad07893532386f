//! WebSocket session to the venue.
//!
//! One authenticated socket per run. `receive` polls with a short budget so
//! the engine loop can interleave keepalives and strategy ticks; an idle
//! poll is not an error. All socket failures surface as `Error::Connect`,
//! which the strategy turns into a reconnect.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Poll budget for a single receive.
const RECEIVE_TIMEOUT: Duration = Duration::from_millis(100);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Inbound frame as seen by the gateway listen loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    /// The venue sent a close frame.
    Close,
    /// The stream ended without a close frame.
    Closed,
}

#[derive(Default)]
pub struct WsSession {
    ws: Option<WsStream>,
}

impl WsSession {
    pub fn new() -> Self {
        Self { ws: None }
    }

    pub fn is_connected(&self) -> bool {
        self.ws.is_some()
    }

    /// Open the socket and push the auth/subscribe frames.
    pub async fn connect(&mut self, url: &str, sub_params: &[Value]) -> Result<()> {
        let parsed = Url::parse(url)
            .map_err(|err| Error::Connect(format!("{url}: invalid url: {err}")))?;
        debug!(url = %parsed, "connecting websocket");

        let connect_result = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url)).await;
        let ws = match connect_result {
            Ok(Ok((ws, response))) => {
                debug!(status = ?response.status(), "websocket connected");
                ws
            }
            Ok(Err(err)) => return Err(Error::Connect(format!("{url}: failed to connect: {err}"))),
            Err(_) => return Err(Error::Connect(format!("{url}: connection timed out"))),
        };
        self.ws = Some(ws);

        for param in sub_params {
            self.send(param).await?;
        }
        Ok(())
    }

    pub async fn send(&mut self, params: &Value) -> Result<()> {
        let ws = self.stream()?;
        let payload = serde_json::to_string(params).map_err(Error::protocol)?;
        ws.send(Message::Text(payload))
            .await
            .map_err(|err| Error::Connect(format!("send failed: {err}")))
    }

    /// Yield the next inbound frame, or `None` when the poll budget expires
    /// with nothing to read. Ping/pong and binary frames are absorbed here.
    pub async fn receive(&mut self) -> Result<Option<Frame>> {
        let ws = self.stream()?;
        let msg = match tokio::time::timeout(RECEIVE_TIMEOUT, ws.next()).await {
            Err(_) => return Ok(None),
            Ok(None) => return Ok(Some(Frame::Closed)),
            Ok(Some(Err(err))) => {
                return Err(Error::Connect(format!("receive failed: {err}")))
            }
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(text) => Ok(Some(Frame::Text(text))),
            Message::Close(frame) => {
                warn!(?frame, "close frame received");
                Ok(Some(Frame::Close))
            }
            Message::Ping(_) | Message::Pong(_) => Ok(None),
            other => {
                debug!(?other, "ignoring non-text frame");
                Ok(None)
            }
        }
    }

    /// Low-cost keepalive.
    pub async fn ping(&mut self, payload: &str) -> Result<()> {
        let ws = self.stream()?;
        ws.send(Message::Ping(payload.as_bytes().to_vec()))
            .await
            .map_err(|err| Error::Connect(format!("ping failed: {err}")))
    }

    /// Best-effort teardown; the session can be reconnected afterwards.
    pub async fn close(&mut self) {
        if let Some(mut ws) = self.ws.take() {
            if let Err(err) = ws.close(None).await {
                warn!(%err, "failed to close websocket");
            }
        }
    }

    fn stream(&mut self) -> Result<&mut WsStream> {
        self.ws
            .as_mut()
            .ok_or_else(|| Error::Connect("websocket is not connected".to_string()))
    }
}
