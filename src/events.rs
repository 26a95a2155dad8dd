use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::sync::broadcast;

use crate::error::HalError;
use crate::gpio::{InterruptEvent, InterruptListener};

/// Listener that keeps a bounded per-pin history and republishes every event
/// on a broadcast channel.
pub struct EventBroadcaster {
    event_tx: broadcast::Sender<InterruptEvent>,
    event_history: RwLock<FxHashMap<String, VecDeque<InterruptEvent>>>,
    event_history_capacity: usize,
}

impl EventBroadcaster {
    pub fn new(broadcast_capacity: usize, event_history_capacity: usize) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(broadcast_capacity.max(1));
        Arc::new(Self {
            event_tx,
            event_history: RwLock::new(FxHashMap::default()),
            event_history_capacity,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InterruptEvent> {
        self.event_tx.subscribe()
    }

    /// Oldest first; `limit` keeps only the most recent events.
    pub fn events(&self, pin: &str, limit: Option<usize>) -> Vec<InterruptEvent> {
        let history = self.event_history.read();
        let Some(events) = history.get(pin) else {
            return Vec::new();
        };
        let skip = limit.map_or(0, |lim| events.len().saturating_sub(lim));
        events.iter().skip(skip).cloned().collect()
    }

    pub fn last_event(&self, pin: &str) -> Option<InterruptEvent> {
        self.event_history
            .read()
            .get(pin)
            .and_then(|d| d.back().cloned())
    }

    fn record(&self, event: &InterruptEvent) {
        if self.event_history_capacity == 0 {
            return;
        }
        let mut history = self.event_history.write();
        let events = history.entry(event.pin.clone()).or_default();
        while events.len() >= self.event_history_capacity {
            events.pop_front();
        }
        events.push_back(event.clone());
    }
}

impl InterruptListener for EventBroadcaster {
    fn interrupt_request(&self, event: &InterruptEvent) -> Result<(), HalError> {
        self.record(event);
        // no subscribers is not an error
        let _ = self.event_tx.send(event.clone());
        Ok(())
    }
}
