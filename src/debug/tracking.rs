//! Where broker components report interactions.
//!
//! Reporting never blocks and never fails the caller. Events go into a
//! bounded broadcast channel; when the tracker falls behind, the oldest
//! unread events are the ones dropped.

use std::fmt::Display;
use std::future::Future;
use std::time::Instant;

use tokio::sync::broadcast;
use tracing::trace;

use crate::actor::clock::{self, SharedClock};
use crate::debug::interaction::Interaction;

#[derive(Clone)]
pub struct TrackingHandle {
    events: broadcast::Sender<Interaction>,
    clock: SharedClock,
}

impl TrackingHandle {
    pub fn new(capacity: usize, clock: SharedClock) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self { events, clock }
    }

    /// A handle nobody listens to. Used when debug tracking is switched off.
    pub fn disabled() -> Self {
        Self::new(1, clock::system())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Interaction> {
        self.events.subscribe()
    }

    /// Stamps `interaction` with the current time and queues it.
    pub fn record(&self, mut interaction: Interaction) {
        interaction.timestamp = self.clock.now_ms();
        if self.events.send(interaction).is_err() {
            trace!("no tracker listening, interaction discarded");
        }
    }

    /// Runs `work`, then records `interaction` with the elapsed time and the
    /// outcome. The result is handed back untouched.
    pub async fn timed<T, E, F>(&self, interaction: Interaction, work: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        let started = Instant::now();
        let result = work.await;
        let interaction = interaction.with_duration(started.elapsed());
        let interaction = match &result {
            Ok(_) => interaction,
            Err(e) => interaction.with_error(e),
        };
        self.record(interaction);
        result
    }
}

impl std::fmt::Debug for TrackingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingHandle")
            .field("listeners", &self.events.receiver_count())
            .finish()
    }
}
