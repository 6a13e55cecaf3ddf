//! Message definitions for the broker
//!
//! - `TickerUpdate`: an item on the value ingress queue.
//! - `TopicValue`: the latest value a publisher holds for its topic.
//! - `PublishMessage`: what a publisher fans out and what clients receive,
//!   serialized as `{"id", "publisherId", "content": {"ticker", "value", "timestamp"}}`.
//! - `Payload`: the two things a distributor can carry.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::broker::ids::PublisherId;
use crate::broker::topic::Topic;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerUpdate {
    pub ticker: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicValue {
    pub ticker: Topic,
    pub value: f64,
    /// Milliseconds since UNIX epoch, set when the value enters the broker.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishMessage {
    pub id: Uuid,
    pub publisher_id: PublisherId,
    pub content: TopicValue,
}

impl PublishMessage {
    pub fn new(publisher_id: PublisherId, content: TopicValue) -> Self {
        Self {
            id: Uuid::new_v4(),
            publisher_id,
            content,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Payload {
    Value(PublishMessage),
    Heartbeat(PublisherId),
}

impl Payload {
    pub fn publisher(&self) -> PublisherId {
        match self {
            Payload::Value(message) => message.publisher_id,
            Payload::Heartbeat(publisher) => *publisher,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Value(_) => "value",
            Payload::Heartbeat(_) => "heartbeat",
        }
    }
}
