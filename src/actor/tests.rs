use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;

use super::clock::{Clock, ManualClock};
use super::timer::TimerService;
use super::{Actor, ActorRef, spawn};
use crate::utils::BrokerError;

enum CounterMessage {
    Add(u64),
    Get(oneshot::Sender<u64>),
    Stall(oneshot::Sender<()>),
}

struct Counter {
    total: u64,
}

#[async_trait]
impl Actor for Counter {
    type Message = CounterMessage;

    async fn started(&mut self) {
        self.total = 100;
    }

    async fn handle(&mut self, msg: CounterMessage) {
        match msg {
            CounterMessage::Add(n) => self.total += n,
            CounterMessage::Get(reply) => {
                let _ = reply.send(self.total);
            }
            CounterMessage::Stall(reply) => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                let _ = reply.send(());
            }
        }
    }
}

fn counter() -> ActorRef<CounterMessage> {
    spawn("counter", |_| Counter { total: 0 })
}

#[tokio::test]
async fn test_tell_then_ask_is_ordered() {
    let actor = counter();
    actor.tell(CounterMessage::Add(1)).unwrap();
    actor.tell(CounterMessage::Add(2)).unwrap();
    let total = actor
        .ask(CounterMessage::Get, Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(total, 103);
    assert_eq!(actor.name(), "counter");
}

#[tokio::test]
async fn test_requests_arrive_in_issue_order() {
    let actor = counter();
    let first = actor.request(CounterMessage::Get).unwrap();
    actor.tell(CounterMessage::Add(5)).unwrap();
    let second = actor.request(CounterMessage::Get).unwrap();

    let timeout = Duration::from_secs(1);
    assert_eq!(second.wait(timeout).await.unwrap(), 105);
    assert_eq!(first.wait(timeout).await.unwrap(), 100);
}

#[tokio::test]
async fn test_detached_ref_is_unreachable() {
    let actor: ActorRef<CounterMessage> = ActorRef::detached("gone");
    let err = actor.tell(CounterMessage::Add(1)).unwrap_err();
    assert!(matches!(err, BrokerError::Unreachable { ref target } if target == "gone"));

    let err = actor
        .ask(CounterMessage::Get, Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::Unreachable { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_ask_times_out() {
    let actor = counter();
    let err = actor
        .ask(CounterMessage::Stall, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::Timeout { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_timer_fires_once_and_can_be_rearmed() {
    let timers = TimerService::start();
    let fired = Arc::new(AtomicUsize::new(0));

    let counter = fired.clone();
    timers.arm("a", Duration::from_secs(10), move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert!(timers.is_armed("a"));

    tokio::time::sleep(Duration::from_secs(9)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(!timers.is_armed("a"));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rearm_replaces_and_disarm_cancels() {
    let timers = TimerService::start();
    let fired = Arc::new(AtomicUsize::new(0));

    for after in [5, 20] {
        let counter = fired.clone();
        timers.arm("a", Duration::from_secs(after), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    }
    let counter = fired.clone();
    timers.arm("b", Duration::from_secs(1), move || {
        counter.fetch_add(10, Ordering::SeqCst);
    });
    timers.disarm("b");
    timers.disarm("never-armed");
    assert_eq!(timers.armed_count(), 1);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_manual_clock() {
    let clock = ManualClock::new(1_000);
    clock.advance(Duration::from_secs(2));
    assert_eq!(clock.now_ms(), 3_000);
    clock.set(5);
    assert_eq!(clock.now_ms(), 5);
}
