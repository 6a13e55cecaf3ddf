//! Synthetic ticker feed
//!
//! Random-walks a fixed basket of tickers and pushes each step into the
//! ingest queue. Useful for demos and smoke tests; off by default.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::broker::message::TickerUpdate;
use crate::ingest::queue::IngestQueue;
use crate::utils::Result;

pub const BASE_PRICES: [(&str, f64); 8] = [
    ("AAPL", 175.0),
    ("GOOGL", 2850.0),
    ("AMZN", 3200.0),
    ("MSFT", 420.0),
    ("TSLA", 240.0),
    ("NVDA", 875.0),
    ("META", 485.0),
    ("NFLX", 450.0),
];

/// Largest move per tick, as a fraction of the last price.
const MAX_MOVE: f64 = 0.02;

#[derive(Debug, Clone)]
pub struct TickerFeed {
    prices: Vec<(String, f64)>,
}

impl Default for TickerFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl TickerFeed {
    pub fn new() -> Self {
        Self {
            prices: BASE_PRICES
                .iter()
                .map(|(ticker, price)| (ticker.to_string(), *price))
                .collect(),
        }
    }

    pub fn prices(&self) -> &[(String, f64)] {
        &self.prices
    }

    /// Moves every price by up to ±2% and returns the new values, rounded
    /// to cents.
    pub fn tick(&mut self, rng: &mut impl Rng) -> Vec<TickerUpdate> {
        self.prices
            .iter_mut()
            .map(|(ticker, price)| {
                let change = *price * rng.random_range(-MAX_MOVE..=MAX_MOVE);
                *price = ((*price + change) * 100.0).round() / 100.0;
                TickerUpdate {
                    ticker: ticker.clone(),
                    value: *price,
                }
            })
            .collect()
    }
}

pub type SharedFeed = Arc<Mutex<TickerFeed>>;

/// One tick of `feed`, enqueued. Returns how many values went in.
pub async fn generate(feed: &SharedFeed, queue: &IngestQueue) -> Result<usize> {
    let batch = {
        let mut feed = feed.lock().unwrap_or_else(|e| e.into_inner());
        feed.tick(&mut rand::rng())
    };
    queue.enqueue_batch(batch).await
}

/// Ticks `feed` every `interval` until the queue goes away.
pub fn spawn(feed: SharedFeed, queue: IngestQueue, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match generate(&feed, &queue).await {
                Ok(count) => debug!(count, "synthetic batch enqueued"),
                Err(e) => {
                    warn!("feed stopped: {e}");
                    break;
                }
            }
        }
    })
}
