//! Aggregated per-component counters.

use serde::{Deserialize, Serialize};

use crate::debug::interaction::ComponentKind;

/// Which end of an interaction a component was on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Source,
    Target,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStat {
    pub component_id: String,
    pub component_type: ComponentKind,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub errors: u64,
    /// Milliseconds, averaged over every interaction that carried a duration.
    pub average_processing_time: f64,
    pub last_activity: i64,
    pub is_alive: bool,
}

/// `(average * count + sample) / (count + 1)`.
pub fn running_average(average: f64, count: u64, sample: f64) -> f64 {
    let count = count as f64;
    (average * count + sample) / (count + 1.0)
}

impl ComponentStat {
    pub fn new(component_id: impl Into<String>, component_type: ComponentKind, now: i64) -> Self {
        Self {
            component_id: component_id.into(),
            component_type,
            messages_sent: 0,
            messages_received: 0,
            errors: 0,
            average_processing_time: 0.0,
            last_activity: now,
            is_alive: true,
        }
    }

    pub fn total_messages(&self) -> u64 {
        self.messages_sent + self.messages_received
    }

    /// Folds one interaction into the counters and marks the component alive.
    pub fn record(&mut self, role: Role, success: bool, duration_ms: Option<u64>, now: i64) {
        if let Some(duration) = duration_ms {
            self.average_processing_time =
                running_average(self.average_processing_time, self.total_messages(), duration as f64);
        }
        match role {
            Role::Source => self.messages_sent += 1,
            Role::Target => self.messages_received += 1,
        }
        if !success {
            self.errors += 1;
        }
        self.last_activity = now;
        self.is_alive = true;
    }
}
