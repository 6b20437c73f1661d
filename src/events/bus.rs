//! # Event bus for broadcasting engine events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`] that lets every part of the
//! engine (orchestrator, scheduler, task actors, lifecycle manager) publish without blocking.
//!
//! ## Architecture
//! ```text
//! Publishers (many):                    Consumers:
//!   Engine::run     ──┐
//!   Scheduler       ──┼──► Bus ──┬──► engine listener ──► SubscriberSet
//!   TaskActor       ──┤          └──► Engine::subscribe() receivers
//!   Lifecycle       ──┘
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks.
//! - **Bounded capacity**: one ring buffer shared by all receivers.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` oldest items.
//! - **No persistence**: events are lost if nobody is subscribed at send time.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for engine events.
///
/// Cheap to clone (internally holds an `Arc`-backed sender).
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (clamped to at least 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all active receivers; dropped when there are none.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a new receiver that observes events sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn receivers_only_see_later_events() {
        let bus = Bus::new(0);
        bus.publish(Event::new(EventKind::TaskStarting));

        let mut rx = bus.subscribe();
        bus.publish(Event::new(EventKind::TaskCompleted).with_task("a"));

        let ev = rx.recv().await.expect("event");
        assert_eq!(ev.kind, EventKind::TaskCompleted);
        assert_eq!(ev.task.as_deref(), Some("a"));
    }
}
