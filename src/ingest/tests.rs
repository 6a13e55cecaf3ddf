use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::mpsc;

use super::feed::{self, BASE_PRICES, SharedFeed, TickerFeed};
use super::queue::{IngestQueue, IngestStats, ValueSink};
use crate::actor::clock::ManualClock;
use crate::broker::Broker;
use crate::broker::message::TickerUpdate;
use crate::broker::topic::Topic;
use crate::config::{IngestSettings, Settings};
use crate::persistence::Persistence;
use crate::utils::{BrokerError, Result};

struct FlakySink {
    failures: u32,
    calls: AtomicU32,
}

impl FlakySink {
    fn failing(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl ValueSink for FlakySink {
    async fn deliver(&self, update: &TickerUpdate) -> Result<()> {
        if update.ticker.trim().is_empty() {
            return Err(BrokerError::InvalidRequest("empty ticker".into()));
        }
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            Err(BrokerError::unreachable("publisher/test"))
        } else {
            Ok(())
        }
    }
}

fn settings() -> IngestSettings {
    IngestSettings {
        buffer: 16,
        max_attempts: 3,
        retry_delay_ms: 5,
    }
}

fn update(ticker: &str, value: f64) -> TickerUpdate {
    TickerUpdate {
        ticker: ticker.to_string(),
        value,
    }
}

async fn wait_for_stats(queue: &IngestQueue, done: impl Fn(IngestStats) -> bool) -> IngestStats {
    for _ in 0..400 {
        let stats = queue.stats();
        if done(stats) {
            return stats;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("queue never settled: {:?}", queue.stats());
}

#[test]
fn test_feed_starts_from_base_prices() {
    let feed = TickerFeed::new();
    assert_eq!(feed.prices().len(), 8);
    assert_eq!(feed.prices()[0], ("AAPL".to_string(), 175.0));
    assert_eq!(feed.prices()[7], ("NFLX".to_string(), 450.0));
}

#[test]
fn test_feed_moves_at_most_two_percent_in_cents() {
    let mut feed = TickerFeed::new();
    let mut rng = StdRng::seed_from_u64(7);

    for _ in 0..20 {
        let before: Vec<f64> = feed.prices().iter().map(|(_, p)| *p).collect();
        let batch = feed.tick(&mut rng);
        assert_eq!(batch.len(), BASE_PRICES.len());
        for (old, new) in before.iter().zip(&batch) {
            assert!((new.value - old).abs() <= old * 0.02 + 0.005);
            let cents = new.value * 100.0;
            assert!((cents - cents.round()).abs() < 1e-6);
        }
    }
}

#[tokio::test]
async fn test_success_is_acknowledged() {
    let sink = FlakySink::failing(0);
    let (queue, _consumer) = IngestQueue::start(sink.clone(), settings());
    queue
        .enqueue_batch(vec![update("AAPL", 1.0), update("MSFT", 2.0)])
        .await
        .unwrap();

    let stats = wait_for_stats(&queue, |s| s.acked == 2).await;
    assert_eq!(stats.retried, 0);
    assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failure_is_redelivered() {
    let sink = FlakySink::failing(2);
    let (queue, _consumer) = IngestQueue::start(sink.clone(), settings());
    queue.enqueue(update("AAPL", 1.0)).await.unwrap();

    let stats = wait_for_stats(&queue, |s| s.acked == 1).await;
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.dropped, 0);
    assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    let sink = FlakySink::failing(u32::MAX);
    let (queue, _consumer) = IngestQueue::start(sink.clone(), settings());
    queue.enqueue(update("AAPL", 1.0)).await.unwrap();

    let stats = wait_for_stats(&queue, |s| s.dropped == 1).await;
    assert_eq!(stats.acked, 0);
    assert_eq!(stats.retried, 2);
    assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_unprocessable_value_is_not_retried() {
    let sink = FlakySink::failing(0);
    let (queue, _consumer) = IngestQueue::start(sink.clone(), settings());
    queue.enqueue(update("   ", 1.0)).await.unwrap();

    let stats = wait_for_stats(&queue, |s| s.dropped == 1).await;
    assert_eq!(stats.retried, 0);
}

#[tokio::test]
async fn test_feed_flows_through_broker_to_client() {
    let clock = ManualClock::new(1_700_000_000_000);
    let broker = Arc::new(
        Broker::start(
            Settings::default(),
            Persistence::temporary().unwrap(),
            Arc::new(clock),
        )
        .unwrap(),
    );
    let subscriber = broker.next_subscriber().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let session = subscriber.connect(tx).await.unwrap();
    subscriber.set_topics(session, "NVDA").unwrap();

    let nvda = broker.publisher(&Topic::parse("NVDA").unwrap()).unwrap();
    for _ in 0..400 {
        if !nvda.snapshot().await.unwrap().subscribers.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let (queue, _consumer) = IngestQueue::start(broker.clone(), settings());
    let shared: SharedFeed = Arc::new(std::sync::Mutex::new(TickerFeed::new()));
    let count = feed::generate(&shared, &queue).await.unwrap();
    assert_eq!(count, 8);

    let frame = rx.recv().await.unwrap();
    let text = frame.into_text().unwrap();
    let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(value["content"]["ticker"], "NVDA");
    wait_for_stats(&queue, |s| s.acked == 8).await;
}
