//! WebSocket transport for the crisis chat client.
//!
//! `WsTransport` owns the write half of the connection and hands each new
//! read half to the caller through a channel, so the display loop keeps
//! working across reconnects while the session controller drives delivery
//! through the `MessageTransport` trait.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::protocol::{ClientEvent, Role};

use super::error::DeliveryFailure;
use super::session::{MessageTransport, OutboundMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type WsSink = SplitSink<WsStream, Message>;
pub type WsSource = SplitStream<WsStream>;

/// Identity claim presented on the WebSocket upgrade
#[derive(Debug, Clone)]
pub struct IdentityParams {
    pub participant_id: String,
    pub case_id: String,
    pub role: Role,
    pub display_name: String,
}

/// Append the identity claim to the server URL as query parameters
pub fn build_ws_url(base: &str, identity: &IdentityParams) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!(
        "{}{}participant_id={}&case_id={}&role={}&display_name={}",
        base,
        separator,
        urlencoding::encode(&identity.participant_id),
        urlencoding::encode(&identity.case_id),
        identity.role.as_str(),
        urlencoding::encode(&identity.display_name),
    )
}

/// WebSocket-backed message transport
pub struct WsTransport {
    url: String,
    writer: Mutex<Option<WsSink>>,
    readers: mpsc::UnboundedSender<WsSource>,
}

impl WsTransport {
    /// Create a transport for `url`; no connection is opened yet.
    ///
    /// Returns the transport and a receiver that yields the read half of
    /// every connection the transport opens, the initial one included. Call
    /// `reconnect` to establish the first connection.
    pub fn new(url: String) -> (Self, mpsc::UnboundedReceiver<WsSource>) {
        let (readers, reader_rx) = mpsc::unbounded_channel();
        (
            Self {
                url,
                writer: Mutex::new(None),
                readers,
            },
            reader_rx,
        )
    }

    /// Serialize and send one client event over the current connection
    pub async fn send_event(&self, event: &ClientEvent) -> Result<(), DeliveryFailure> {
        let json = serde_json::to_string(event)
            .map_err(|e| DeliveryFailure::Send(format!("failed to serialize event: {}", e)))?;

        let mut writer = self.writer.lock().await;
        let sink = writer.as_mut().ok_or(DeliveryFailure::NotConnected)?;
        if let Err(e) = sink.send(Message::Text(json.into())).await {
            // A failed sink is unusable; drop it so later sends report
            // NotConnected instead of erroring on a dead socket
            *writer = None;
            return Err(DeliveryFailure::Send(e.to_string()));
        }
        Ok(())
    }

    /// Close the connection politely, if one is open
    pub async fn close(&self) {
        let mut writer = self.writer.lock().await;
        if let Some(mut sink) = writer.take() {
            sink.send(Message::Close(None)).await.ok();
        }
    }
}

#[async_trait]
impl MessageTransport for WsTransport {
    async fn deliver(&self, message: OutboundMessage) -> Result<(), DeliveryFailure> {
        self.send_event(&ClientEvent::SendMessage {
            text: message.text,
            target_user_id: message.target_user_id,
        })
        .await
    }

    async fn reconnect(&self) -> Result<(), DeliveryFailure> {
        let (ws_stream, _response) = connect_async(&self.url)
            .await
            .map_err(|e| DeliveryFailure::Connect(e.to_string()))?;
        let (write, read) = ws_stream.split();

        *self.writer.lock().await = Some(write);
        self.readers
            .send(read)
            .map_err(|_| DeliveryFailure::Connect("display loop has shut down".to_string()))?;

        tracing::debug!("WebSocket connection established to {}", self.url);
        Ok(())
    }
}
