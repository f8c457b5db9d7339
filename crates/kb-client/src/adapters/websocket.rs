//! Duplex channel over tokio-tungstenite.

use crate::domain::TransportError;
use crate::ports::{ChannelConnector, FrameSink, FrameStream, HeaderMap};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};
use url::Url;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects with no limit on inbound message or frame size.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl ChannelConnector for WebSocketConnector {
    async fn connect(
        &self,
        url: &Url,
        headers: &HeaderMap,
    ) -> Result<(Arc<dyn FrameSink>, Box<dyn FrameStream>), TransportError> {
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Address(e.to_string()))?;
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| TransportError::Channel(e.to_string()))?;
            let value = HeaderValue::from_str(value).map_err(|e| TransportError::Channel(e.to_string()))?;
            request.headers_mut().insert(name, value);
        }

        let mut config = WebSocketConfig::default();
        config.max_message_size = None;
        config.max_frame_size = None;

        let (socket, _response) = connect_async_with_config(request, Some(config), false)
            .await
            .map_err(|e| TransportError::Channel(format!("{url}: {e}")))?;
        debug!(url = %url, "Channel connected");

        let (write, read) = socket.split();
        Ok((
            Arc::new(WebSocketSink {
                write: Mutex::new(write),
            }),
            Box::new(WebSocketFrames { read }),
        ))
    }
}

struct WebSocketSink {
    write: Mutex<SplitSink<Socket, Message>>,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send(&self, text: String) -> Result<(), TransportError> {
        self.write
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Channel(e.to_string()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.write
            .lock()
            .await
            .close()
            .await
            .map_err(|e| TransportError::Channel(e.to_string()))
    }
}

struct WebSocketFrames {
    read: SplitStream<Socket>,
}

#[async_trait]
impl FrameStream for WebSocketFrames {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        while let Some(message) = self.read.next().await {
            match message {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                // non-UTF-8 binary frames are dropped, the channel stays up
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(e) => warn!(len = bytes.len(), error = %e, "Skipping undecodable binary frame"),
                },
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Channel closed by peer");
                    return None;
                }
                Ok(other) => trace!(?other, "Skipping control frame"),
                Err(e) => return Some(Err(TransportError::Channel(e.to_string()))),
            }
        }
        None
    }
}
