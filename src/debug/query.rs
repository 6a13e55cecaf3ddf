//! Read-only views served by the debug tracker.

use serde::{Deserialize, Serialize};

use crate::debug::interaction::{Interaction, Operation};
use crate::debug::stats::ComponentStat;

pub const DEFAULT_INTERACTION_LIMIT: usize = 100;
pub const DEFAULT_TIMELINE_MINUTES: u32 = 5;
pub const TIMELINE_LIMIT: usize = 500;
pub const RECENT_ERROR_SAMPLE: usize = 10;

/// Filters for the recent-interactions query. Newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InteractionQuery {
    pub limit: Option<usize>,
    pub component_id: Option<String>,
    pub operation: Option<Operation>,
    pub since: Option<i64>,
}

impl InteractionQuery {
    pub fn matches(&self, interaction: &Interaction) -> bool {
        self.component_id
            .as_deref()
            .is_none_or(|id| interaction.touches(id))
            && self.operation.is_none_or(|op| interaction.operation == op)
            && self.since.is_none_or(|since| interaction.timestamp >= since)
    }

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_INTERACTION_LIMIT)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFlow {
    pub operation: Operation,
    pub count: u64,
    /// Percent, 0..=100.
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub total_messages: u64,
    pub active_publishers: usize,
    pub active_distributors: usize,
    pub active_subscribers: usize,
    pub recent_errors: Vec<Interaction>,
    pub top_active_components: Vec<ComponentStat>,
    pub message_flow: Vec<MessageFlow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineBucket {
    /// Start of the minute, milliseconds since UNIX epoch.
    pub timestamp: i64,
    pub interactions: Vec<Interaction>,
}
