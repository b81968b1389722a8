use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;

/// Upward notifications about the device set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GatewayEvent {
    DeviceFound { path: String },
    DeviceLost { path: String },
}

impl GatewayEvent {
    pub fn path(&self) -> &str {
        match self {
            GatewayEvent::DeviceFound { path } | GatewayEvent::DeviceLost { path } => path,
        }
    }
}

#[derive(Clone, Default)]
pub struct GatewayEventBus {
    subscribers: Arc<Mutex<Vec<Sender<GatewayEvent>>>>,
}

impl GatewayEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<GatewayEvent> {
        let (tx, rx) = unbounded::<GatewayEvent>();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Sends `event` to every live subscriber, forgetting the ones that
    /// hung up.
    pub fn broadcast(&self, event: GatewayEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_reaches_every_subscriber() {
        let bus = GatewayEventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.broadcast(GatewayEvent::DeviceFound { path: "/dev/1".into() });

        assert_eq!(a.try_recv().unwrap().path(), "/dev/1");
        assert_eq!(b.try_recv().unwrap().path(), "/dev/1");
    }

    #[test]
    fn test_dropped_subscribers_are_forgotten() {
        let bus = GatewayEventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());

        bus.broadcast(GatewayEvent::DeviceLost { path: "/dev/1".into() });

        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(
            kept.try_recv().unwrap(),
            GatewayEvent::DeviceLost { path: "/dev/1".into() }
        );
    }
}
