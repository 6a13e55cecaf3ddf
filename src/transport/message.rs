//! Inbound frame decoding
//!
//! Clients speak a single message: a comma-separated list of topic names
//! that replaces their current interest. Text frames carry it directly;
//! binary frames are accepted when they hold valid UTF-8.

use tracing::warn;
use tungstenite::protocol::Message as WsMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// Raw topic list, not yet normalised.
    Topics(String),
    Close,
    /// Control frames and undecodable payloads.
    Ignored,
}

pub fn decode(frame: WsMessage) -> ClientFrame {
    match frame {
        WsMessage::Text(text) => ClientFrame::Topics(text.as_str().to_owned()),
        WsMessage::Binary(bytes) => match std::str::from_utf8(&bytes) {
            Ok(text) => ClientFrame::Topics(text.to_owned()),
            Err(e) => {
                warn!(len = bytes.len(), "ignoring binary frame that is not UTF-8: {e}");
                ClientFrame::Ignored
            }
        },
        WsMessage::Close(_) => ClientFrame::Close,
        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => ClientFrame::Ignored,
    }
}
