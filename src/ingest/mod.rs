//! The `ingest` module feeds values into the broker.
//!
//! - [`queue::IngestQueue`]: bounded queue with redelivery on failure.
//! - [`feed::TickerFeed`]: synthetic random-walk prices.

pub mod feed;
pub mod queue;

pub use feed::{SharedFeed, TickerFeed};
pub use queue::{IngestQueue, IngestStats, ValueSink};

#[cfg(test)]
mod tests;
