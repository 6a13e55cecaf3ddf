//! Interaction records
//!
//! One record per call between two components. Records are immutable once
//! written; the tracker only ever appends and prunes them.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::broker::ids::{DistributorId, PublisherId, SubscriberId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Queue,
    Publisher,
    Distributor,
    Subscriber,
    Websocket,
}

impl ComponentKind {
    /// Only broker actors get aggregated stats; queue and websocket ends are
    /// recorded as interactions only.
    pub fn has_stats(self) -> bool {
        matches!(
            self,
            ComponentKind::Publisher | ComponentKind::Distributor | ComponentKind::Subscriber
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Publish,
    DistributeMessage,
    DistributePing,
    Subscribe,
    Unsubscribe,
    Ping,
    Message,
    WebsocketConnect,
    WebsocketDisconnect,
}

impl Operation {
    pub const ALL: [Operation; 9] = [
        Operation::Publish,
        Operation::DistributeMessage,
        Operation::DistributePing,
        Operation::Subscribe,
        Operation::Unsubscribe,
        Operation::Ping,
        Operation::Message,
        Operation::WebsocketConnect,
        Operation::WebsocketDisconnect,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Publish => "publish",
            Operation::DistributeMessage => "distribute_message",
            Operation::DistributePing => "distribute_ping",
            Operation::Subscribe => "subscribe",
            Operation::Unsubscribe => "unsubscribe",
            Operation::Ping => "ping",
            Operation::Message => "message",
            Operation::WebsocketConnect => "websocket_connect",
            Operation::WebsocketDisconnect => "websocket_disconnect",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| format!("unknown operation '{s}'"))
    }
}

/// One side of an interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub kind: ComponentKind,
    pub id: String,
}

impl Endpoint {
    pub fn new(kind: ComponentKind, id: impl ToString) -> Self {
        Self {
            kind,
            id: id.to_string(),
        }
    }

    pub fn publisher(id: &PublisherId) -> Self {
        Self::new(ComponentKind::Publisher, id)
    }

    pub fn subscriber(id: &SubscriberId) -> Self {
        Self::new(ComponentKind::Subscriber, id)
    }

    pub fn distributor(id: &DistributorId) -> Self {
        Self::new(ComponentKind::Distributor, id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    pub id: Uuid,
    /// Milliseconds since UNIX epoch; stamped by the tracking handle.
    pub timestamp: i64,
    pub source_component: ComponentKind,
    pub source_id: String,
    pub target_component: ComponentKind,
    pub target_id: String,
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl Interaction {
    pub fn new(operation: Operation, source: Endpoint, target: Endpoint) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: 0,
            source_component: source.kind,
            source_id: source.id,
            target_component: target.kind,
            target_id: target.id,
            operation,
            data: None,
            duration: None,
            success: true,
            error: None,
            metadata: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration.as_millis() as u64);
        self
    }

    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.success = false;
        self.error = Some(error.to_string());
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), value);
        self
    }

    pub fn touches(&self, component_id: &str) -> bool {
        self.source_id == component_id || self.target_id == component_id
    }
}
