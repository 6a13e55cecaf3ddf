//! The `broker` module is the pub/sub core.
//!
//! - [`publisher::Publisher`]: one actor per topic, owns subscribers and the
//!   latest value, drives heartbeats.
//! - [`subscriber::Subscriber`]: multiplexes client sessions, tracks
//!   publisher liveness and resubscribes when one goes quiet.
//! - [`distributor::Distributor`]: stateless batch fanout.
//! - [`engine::Broker`]: wires the actors, the timer and the debug tracker
//!   together.

pub mod distributor;
pub mod engine;
pub mod fanout;
pub mod ids;
pub mod message;
pub mod publisher;
pub mod subscriber;
pub mod topic;

pub use engine::Broker;
pub use ids::{DistributorId, PublisherId, SessionId, SubscriberId};
pub use message::{PublishMessage, TickerUpdate, TopicValue};
pub use topic::Topic;
