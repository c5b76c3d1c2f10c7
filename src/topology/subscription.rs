//! Fan-out of cluster descriptions to waiting selectors.
//!
//! Every subscriber owns an independent single-slot channel. Publishing
//! overwrites whatever the subscriber has not read yet, so a slow reader can
//! skip versions but never blocks the publisher or grows a queue.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::error::TopologyError;
use crate::types::ClusterDescription;

#[derive(Debug, Default)]
struct RegistryState {
    closed: bool,
    next_id: u64,
    /// Highest description version delivered so far
    last_version: u64,
    senders: HashMap<u64, watch::Sender<Arc<ClusterDescription>>>,
}

/// Registry of live subscriptions, owned by the topology
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
}

impl SubscriptionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a subscription seeded with the value `current` returns.
    ///
    /// `current` runs under the registry lock, so a description stored before
    /// its publish started is either the seed or delivered afterwards.
    pub fn subscribe<F>(self: &Arc<Self>, current: F) -> Result<Subscription, TopologyError>
    where
        F: FnOnce() -> Arc<ClusterDescription>,
    {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TopologyError::SubscribeAfterClosed);
        }
        let id = state.next_id;
        state.next_id += 1;

        let (sender, receiver) = watch::channel(current());
        state.senders.insert(id, sender);
        debug!("Registered subscription {} ({} active)", id, state.senders.len());

        Ok(Subscription {
            id,
            receiver,
            registry: Arc::downgrade(self),
        })
    }

    pub fn unsubscribe(&self, id: u64) {
        let mut state = self.state.lock();
        if state.senders.remove(&id).is_some() {
            debug!("Removed subscription {} ({} active)", id, state.senders.len());
        }
    }

    /// Delivers `desc` to every subscriber, replacing any unread value.
    /// Descriptions older than one already delivered are dropped so that all
    /// subscribers observe versions in the order they were produced.
    pub fn publish(&self, desc: Arc<ClusterDescription>) {
        let mut state = self.state.lock();
        if state.closed || desc.version < state.last_version {
            return;
        }
        state.last_version = desc.version;
        for sender in state.senders.values() {
            sender.send_replace(desc.clone());
        }
    }

    /// Closes every subscription at once; later subscribes fail
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        // Dropping the senders wakes every waiting receiver
        state.senders.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Caller-owned feed of cluster descriptions.
///
/// Dropping the handle unregisters it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: watch::Receiver<Arc<ClusterDescription>>,
    registry: Weak<SubscriptionRegistry>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Most recent description, marking it as seen
    pub fn latest(&mut self) -> Arc<ClusterDescription> {
        self.receiver.borrow_and_update().clone()
    }

    /// True when a description newer than the last one seen is waiting.
    /// Always false once the registry has been closed.
    pub fn has_changed(&self) -> bool {
        self.receiver.has_changed().unwrap_or(false)
    }

    /// Waits for a description newer than the last one seen.
    ///
    /// Fails with [`TopologyError::SubscribeAfterClosed`] once the registry
    /// has been closed.
    pub async fn changed(&mut self) -> Result<Arc<ClusterDescription>, TopologyError> {
        self.receiver
            .changed()
            .await
            .map_err(|_| TopologyError::SubscribeAfterClosed)?;
        Ok(self.latest())
    }

    pub fn unsubscribe(self) {
        drop(self)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ClusterKind;

    fn desc(version: u64) -> Arc<ClusterDescription> {
        Arc::new(ClusterDescription { version, ..ClusterDescription::new(ClusterKind::Unknown) })
    }

    #[tokio::test]
    async fn test_subscription_is_seeded_with_current() {
        let registry = SubscriptionRegistry::new();
        let mut sub = registry.subscribe(|| desc(3)).unwrap();
        assert_eq!(sub.latest().version, 3);
    }

    #[tokio::test]
    async fn test_latest_value_wins() {
        let registry = SubscriptionRegistry::new();
        let mut sub = registry.subscribe(|| desc(0)).unwrap();
        sub.latest();

        registry.publish(desc(1));
        registry.publish(desc(2));
        let seen = sub.changed().await.unwrap();
        assert_eq!(seen.version, 2);
    }

    #[test]
    fn test_changed_stays_pending_until_publish() {
        let registry = SubscriptionRegistry::new();
        let mut sub = registry.subscribe(|| desc(0)).unwrap();
        let mut changed = tokio_test::task::spawn(sub.changed());
        tokio_test::assert_pending!(changed.poll());

        registry.publish(desc(1));
        assert!(changed.is_woken());
        let seen = tokio_test::assert_ready_ok!(changed.poll());
        assert_eq!(seen.version, 1);
    }

    #[tokio::test]
    async fn test_older_versions_are_not_delivered() {
        let registry = SubscriptionRegistry::new();
        let mut sub = registry.subscribe(|| desc(0)).unwrap();
        registry.publish(desc(5));
        registry.publish(desc(4));
        assert_eq!(sub.latest().version, 5);
    }

    #[tokio::test]
    async fn test_drop_unregisters() {
        let registry = SubscriptionRegistry::new();
        let a = registry.subscribe(|| desc(0)).unwrap();
        let b = registry.subscribe(|| desc(0)).unwrap();
        assert_eq!(registry.len(), 2);
        drop(a);
        b.unsubscribe();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_close_wakes_waiters_and_rejects_subscribers() {
        let registry = SubscriptionRegistry::new();
        let mut sub = registry.subscribe(|| desc(0)).unwrap();
        let waiter = tokio::spawn(async move { sub.changed().await });

        registry.close();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(TopologyError::SubscribeAfterClosed)));
        assert!(matches!(registry.subscribe(|| desc(0)), Err(TopologyError::SubscribeAfterClosed)));
    }
}
