//! Client connection
//!
//! `Connection` models one live WebSocket connection inside a subscriber
//! actor. It holds the sending side of a per-connection channel; the
//! transport's writer task drains the other side onto the socket.

use tokio::sync::mpsc::UnboundedSender;
use tungstenite::protocol::Message as WsMessage;
use tungstenite::protocol::frame::CloseFrame;
use tungstenite::protocol::frame::coding::CloseCode;

use crate::broker::ids::SessionId;
use crate::utils::{BrokerError, Result};

#[derive(Debug)]
pub struct Connection {
    pub session: SessionId,
    sender: UnboundedSender<WsMessage>,
}

impl Connection {
    pub fn new(session: SessionId, sender: UnboundedSender<WsMessage>) -> Self {
        Self { session, sender }
    }

    /// Queue a text frame. Fails once the writer side has gone away.
    pub fn send_text(&self, text: &str) -> Result<()> {
        self.sender
            .send(WsMessage::text(text))
            .map_err(|_| BrokerError::unreachable(format!("session/{}", self.session)))
    }

    /// Ask the writer to close the socket. Best effort: the socket may
    /// already be gone.
    pub fn close(&self, reason: &'static str) {
        let frame = CloseFrame {
            code: CloseCode::Error,
            reason: reason.into(),
        };
        let _ = self.sender.send(WsMessage::Close(Some(frame)));
    }
}
