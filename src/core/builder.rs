use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;

use super::config::Config;
use super::engine::Engine;
use crate::events::Bus;
use crate::registry::Registry;
use crate::subscribers::{Subscribe, SubscriberSet};

/// Builder for constructing an [`Engine`] with optional features.
pub struct EngineBuilder<T> {
    registry: Registry<T>,
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl<T> EngineBuilder<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a new builder with the default configuration.
    pub fn new(registry: Registry<T>) -> Self {
        Self {
            registry,
            cfg: Config::default(),
            subscribers: Vec::new(),
        }
    }

    /// Replaces the configuration.
    pub fn with_config(mut self, cfg: Config) -> Self {
        self.cfg = cfg;
        self
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive engine events (task lifecycle, failures, disposal, ...) through
    /// dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the engine.
    ///
    /// With subscribers attached this spawns the fan-out listener, so it must then be called
    /// inside a Tokio runtime.
    pub fn build(self) -> Engine<T> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let engine = Engine::from_parts(self.registry, self.cfg, bus.clone());

        if !self.subscribers.is_empty() {
            let set = SubscriberSet::new(self.subscribers, bus.clone());
            subscriber_listener(bus, set, engine.core.token.clone());
        }
        engine
    }
}

/// Forwards bus events to the subscriber set until the engine shuts down.
fn subscriber_listener(bus: Bus, set: SubscriberSet, token: tokio_util::sync::CancellationToken) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                ev = rx.recv() => match ev {
                    Ok(ev) => set.emit(&ev),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                },
            }
        }
        set.shutdown().await;
    });
}
