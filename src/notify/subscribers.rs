//! Live subscriber fan-out.
//!
//! Each subscriber owns a bounded channel. Delivery never waits: a message
//! that does not fit, or a receiver that is gone, detaches the subscriber.
//! A detached subscriber reconnects and pulls the full catalog.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use super::event::LiveMessage;

/// The receiving half handed to a new subscriber.
#[derive(Debug)]
pub struct Subscription {
    pub id: Uuid,
    pub receiver: mpsc::Receiver<LiveMessage>,
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub detached: usize,
}

#[derive(Debug)]
pub struct SubscriberRegistry {
    senders: Mutex<HashMap<Uuid, mpsc::Sender<LiveMessage>>>,
    buffer: usize,
}

impl SubscriberRegistry {
    /// `buffer` is the per-subscriber channel capacity (at least 1).
    pub fn new(buffer: usize) -> Self {
        Self {
            senders: Mutex::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = Uuid::new_v4();
        self.senders.lock().insert(id, tx);
        log::debug!("Live subscriber {} attached", id);
        Subscription { id, receiver: rx }
    }

    pub fn unsubscribe(&self, id: &Uuid) -> bool {
        self.senders.lock().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.senders.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.lock().is_empty()
    }

    /// Offer `message` to every subscriber.
    pub fn broadcast(&self, message: &LiveMessage) -> Delivery {
        let mut senders = self.senders.lock();
        let mut delivery = Delivery::default();
        let mut dead = Vec::new();

        for (id, sender) in senders.iter() {
            match sender.try_send(message.clone()) {
                Ok(()) => delivery.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    log::warn!("Live subscriber {} is not keeping up; detaching", id);
                    dead.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    log::debug!("Live subscriber {} went away", id);
                    dead.push(*id);
                }
            }
        }

        for id in &dead {
            senders.remove(id);
        }
        delivery.detached = dead.len();
        delivery
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_full_and_closed_subscribers_are_detached() {
        let registry = SubscriberRegistry::new(1);
        let mut healthy = registry.subscribe();
        let _stalled = registry.subscribe();
        let closed = registry.subscribe();
        drop(closed.receiver);

        let first = registry.broadcast(&LiveMessage::ping());
        assert_eq!(first, Delivery { delivered: 2, detached: 1 });

        // Drain the healthy one only; the stalled buffer is still full.
        healthy.receiver.recv().await.unwrap();
        let second = registry.broadcast(&LiveMessage::ping());
        assert_eq!(second, Delivery { delivered: 1, detached: 1 });
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let registry = SubscriberRegistry::new(4);
        let sub = registry.subscribe();
        assert!(registry.unsubscribe(&sub.id));
        assert!(!registry.unsubscribe(&sub.id));
        assert!(registry.is_empty());
    }
}
