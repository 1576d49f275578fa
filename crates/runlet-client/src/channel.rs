//! Transport channel: one persistent WebSocket connection.
//!
//! A [`Channel`] is owned by exactly one driver and carries discrete text
//! frames in both directions, delivered in the order received. Reconnection
//! is not automatic: a closed channel stays closed, and a caller wanting
//! retry constructs a new channel. That keeps the retry policy in the
//! caller's hands and this type small.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use runlet_core::errors::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection lifecycle of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// The handshake is in flight.
    Connecting,
    /// Frames can be sent and received.
    Open,
    /// Closed cleanly; the channel is dead.
    Closed,
    /// Failed mid-use; the channel is dead.
    Failed,
}

impl ChannelState {
    /// Lowercase name, for logs and error messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }
}

/// One persistent bidirectional connection to a runlet backend.
#[derive(Debug)]
pub struct Channel {
    ws: WsStream,
    state: ChannelState,
    url: String,
}

impl Channel {
    /// Dial `url` and complete the WebSocket handshake.
    ///
    /// The `Connecting` phase lives inside this call; on success the
    /// returned channel is `Open`.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        tracing::debug!(url, "opening channel");
        let (ws, _response) =
            connect_async(url)
                .await
                .map_err(|err| TransportError::Connect {
                    url: url.to_owned(),
                    reason: err.to_string(),
                })?;
        tracing::debug!(url, "channel open");
        Ok(Self {
            ws,
            state: ChannelState::Open,
            url: url.to_owned(),
        })
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Whether frames can currently be sent.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    /// The endpoint this channel was dialed to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one text frame.
    ///
    /// Fails with [`TransportError::NotOpen`] unless the channel is open; a
    /// failed send marks the channel `Failed`.
    pub async fn send(&mut self, text: &str) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen {
                state: self.state.as_str(),
            });
        }
        match self.ws.send(Message::Text(text.into())).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.state = ChannelState::Failed;
                Err(TransportError::Send(err.to_string()))
            }
        }
    }

    /// Receive the next inbound text frame, in arrival order.
    ///
    /// Pings are answered inline; binary frames are accepted if valid UTF-8.
    /// Returns `None` once the channel is closed or failed; `state()` tells
    /// which.
    pub async fn recv(&mut self) -> Option<String> {
        loop {
            if !self.is_open() {
                return None;
            }
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => return Some(text.as_str().to_owned()),
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => return Some(text.to_owned()),
                    Err(_) => {
                        tracing::warn!(len = data.len(), "skipping non-UTF8 binary frame");
                    }
                },
                Some(Ok(Message::Ping(payload))) => {
                    if self.ws.send(Message::Pong(payload)).await.is_err() {
                        self.state = ChannelState::Failed;
                        return None;
                    }
                }
                Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) => {
                    self.state = ChannelState::Closed;
                    return None;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::warn!(error = %err, "channel receive failed");
                    self.state = ChannelState::Failed;
                    return None;
                }
                None => {
                    self.state = ChannelState::Closed;
                    return None;
                }
            }
        }
    }

    /// Close the channel. Idempotent; always releases the connection.
    pub async fn close(&mut self) {
        if matches!(self.state, ChannelState::Open | ChannelState::Connecting) {
            let _ = self.ws.close(None).await;
            self.state = ChannelState::Closed;
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn connect_refused_is_transport_error() {
        // Port 1 is reserved and nothing listens on it.
        let err = Channel::connect("ws://127.0.0.1:1").await.unwrap_err();
        assert_matches!(err, TransportError::Connect { url, .. } if url == "ws://127.0.0.1:1");
    }

    #[test]
    fn state_names() {
        assert_eq!(ChannelState::Connecting.as_str(), "connecting");
        assert_eq!(ChannelState::Open.as_str(), "open");
        assert_eq!(ChannelState::Closed.as_str(), "closed");
        assert_eq!(ChannelState::Failed.as_str(), "failed");
    }
}
