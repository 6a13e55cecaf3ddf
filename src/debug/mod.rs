//! The `debug` module records who talked to whom inside the broker.
//!
//! Components report [`interaction::Interaction`]s through a
//! [`tracking::TrackingHandle`]. A single [`tracker::DebugTracker`] actor
//! stores them, aggregates [`stats::ComponentStat`]s, and answers the
//! queries exposed over the debug HTTP API.

pub mod interaction;
pub mod query;
pub mod stats;
pub mod tracker;
pub mod tracking;

pub use interaction::{ComponentKind, Endpoint, Interaction, Operation};
pub use query::{InteractionQuery, Overview, TimelineBucket};
pub use stats::ComponentStat;
pub use tracker::{DebugTracker, TrackerHandle};
pub use tracking::TrackingHandle;
