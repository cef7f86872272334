//! Pub/sub event bus.
//!
//! Fan-out over crossbeam channels: every subscriber gets its own
//! unbounded channel and every post is cloned to all of them.
//! Subscribers that went away are pruned on the next post. Closing the
//! bus disconnects all subscriber channels, which is the shutdown
//! broadcast consumers observe as end-of-stream.

use crossbeam::channel::{unbounded, Receiver, Sender};
use std::sync::Mutex;

/// Multi-producer, multi-subscriber event bus.
pub struct Bus<T: Clone + Send> {
    subscribers: Mutex<Vec<Sender<T>>>,
}

impl<T: Clone + Send> Default for Bus<T> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Clone + Send> Bus<T> {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe; receives every event posted from now on.
    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = unbounded();
        self.subscribers
            .lock()
            .expect("bus lock poisoned")
            .push(tx);
        rx
    }

    /// Post an event to all current subscribers.
    pub fn post(&self, event: T) {
        self.subscribers
            .lock()
            .expect("bus lock poisoned")
            .retain(|sub| sub.send(event.clone()).is_ok());
    }

    /// Disconnect every subscriber.
    pub fn close(&self) {
        self.subscribers.lock().expect("bus lock poisoned").clear();
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("bus lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_subscribers_receive() {
        let bus = Bus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.post(7u64);
        assert_eq!(a.recv().unwrap(), 7);
        assert_eq!(b.recv().unwrap(), 7);
    }

    #[test]
    fn test_no_events_before_subscription() {
        let bus = Bus::new();
        bus.post(1u64);
        let late = bus.subscribe();
        bus.post(2u64);
        assert_eq!(late.recv().unwrap(), 2);
        assert!(late.try_recv().is_err());
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let bus = Bus::new();
        let keep = bus.subscribe();
        drop(bus.subscribe());
        bus.post(1u64);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(keep.recv().unwrap(), 1);
    }

    #[test]
    fn test_close_ends_streams() {
        let bus = Bus::new();
        let sub = bus.subscribe();
        bus.post(1u64);
        bus.close();
        assert_eq!(sub.recv().unwrap(), 1);
        assert!(sub.recv().is_err());
    }
}
