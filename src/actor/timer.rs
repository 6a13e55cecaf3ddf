//! Single-deadline timers keyed by actor name.
//!
//! Each actor has at most one outstanding deadline. Arming again replaces
//! the previous deadline; firing removes it, and the actor re-arms from its
//! alarm handler if it wants another one. A single scheduler task owns a
//! min-heap of deadlines; replaced or disarmed entries stay in the heap and
//! are skipped by generation when they surface.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::trace;

type FireFn = Arc<dyn Fn() + Send + Sync>;

struct Entry {
    generation: u64,
    fire: FireFn,
}

#[derive(Default)]
struct Schedule {
    heap: BinaryHeap<Reverse<(Instant, u64, String)>>,
    entries: HashMap<String, Entry>,
    next_generation: u64,
}

struct Inner {
    schedule: Mutex<Schedule>,
    wake: Notify,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Schedule> {
        // A panicking fire callback never runs under this lock, so poisoning
        // can only come from a bug in this module; keep going with the data.
        self.schedule.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Clone)]
pub struct TimerService {
    inner: Arc<Inner>,
}

impl TimerService {
    /// Starts the scheduler loop. Must be called inside a tokio runtime.
    pub fn start() -> Self {
        let inner = Arc::new(Inner {
            schedule: Mutex::new(Schedule::default()),
            wake: Notify::new(),
        });
        tokio::spawn(scheduler(inner.clone()));
        Self { inner }
    }

    /// Arms (or re-arms) the deadline for `key` to fire after `after`.
    pub fn arm<F>(&self, key: &str, after: Duration, fire: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let deadline = Instant::now() + after;
        {
            let mut schedule = self.inner.lock();
            schedule.next_generation += 1;
            let generation = schedule.next_generation;
            schedule
                .heap
                .push(Reverse((deadline, generation, key.to_string())));
            schedule.entries.insert(
                key.to_string(),
                Entry {
                    generation,
                    fire: Arc::new(fire),
                },
            );
        }
        trace!(key, ?after, "timer armed");
        self.inner.wake.notify_one();
    }

    /// Disarming an unarmed key is a no-op.
    pub fn disarm(&self, key: &str) {
        if self.inner.lock().entries.remove(key).is_some() {
            trace!(key, "timer disarmed");
        }
    }

    pub fn is_armed(&self, key: &str) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    pub fn armed_count(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

enum Next {
    Idle,
    SleepUntil(Instant),
    Fire(Vec<FireFn>),
}

fn poll_due(inner: &Inner) -> Next {
    let now = Instant::now();
    let mut schedule = inner.lock();
    let mut due = Vec::new();

    while let Some(Reverse((deadline, generation, key))) = schedule.heap.peek().cloned() {
        let live = schedule
            .entries
            .get(&key)
            .is_some_and(|e| e.generation == generation);
        if !live {
            schedule.heap.pop();
            continue;
        }
        if deadline > now {
            if due.is_empty() {
                return Next::SleepUntil(deadline);
            }
            break;
        }
        schedule.heap.pop();
        if let Some(entry) = schedule.entries.remove(&key) {
            due.push(entry.fire);
        }
    }

    if due.is_empty() {
        Next::Idle
    } else {
        Next::Fire(due)
    }
}

async fn scheduler(inner: Arc<Inner>) {
    loop {
        match poll_due(&inner) {
            Next::Fire(due) => {
                for fire in due {
                    fire();
                }
            }
            Next::SleepUntil(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = inner.wake.notified() => {}
                }
            }
            Next::Idle => inner.wake.notified().await,
        }
    }
}
