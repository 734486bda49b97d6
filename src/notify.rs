use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-tent broadcast of committed events. A message means "views of this
/// tent are stale, re-fetch".
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a tent's invalidations. Creates the channel if needed.
    pub fn subscribe(&self, tent_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(tent_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, tent_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&tent_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a tent's channel once its last subscriber is gone.
    pub fn prune(&self) {
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
