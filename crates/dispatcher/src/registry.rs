//! SubscriberRegistry - fan-out to live output channels
//!
//! `broadcast` works on a snapshot of the current subscribers. A subscriber
//! whose send fails (or times out) is removed after the pass completes, so
//! the collection is never mutated while it is being iterated.

use std::sync::Arc;
use std::time::Duration;

use contracts::{ContractError, Subscriber};
use parking_lot::Mutex;
use slab::Slab;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use crate::metrics::{RegistryMetrics, RegistrySnapshot};

/// Slot index of a registered subscriber
pub type SubscriberId = usize;

type SharedSubscriber<M> = Arc<AsyncMutex<Box<dyn Subscriber<M>>>>;

struct Entry<M: Sync> {
    name: String,
    subscriber: SharedSubscriber<M>,
}

/// Registry of subscribers for one message type
pub struct SubscriberRegistry<M: Sync> {
    name: String,
    slots: Mutex<Slab<Entry<M>>>,
    send_timeout: Duration,
    metrics: RegistryMetrics,
}

impl<M: Sync + Send + 'static> SubscriberRegistry<M> {
    /// Default bound on a single send
    pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(2);

    pub fn new(name: impl Into<String>) -> Self {
        Self::with_send_timeout(name, Self::DEFAULT_SEND_TIMEOUT)
    }

    pub fn with_send_timeout(name: impl Into<String>, send_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            slots: Mutex::new(Slab::new()),
            send_timeout,
            metrics: RegistryMetrics::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a subscriber
    pub fn add<S: Subscriber<M> + 'static>(&self, subscriber: S) -> SubscriberId {
        self.add_boxed(Box::new(subscriber))
    }

    pub fn add_boxed(&self, subscriber: Box<dyn Subscriber<M>>) -> SubscriberId {
        let name = subscriber.name().to_string();
        let (id, count) = {
            let mut slots = self.slots.lock();
            let id = slots.insert(Entry {
                name: name.clone(),
                subscriber: Arc::new(AsyncMutex::new(subscriber)),
            });
            (id, slots.len())
        };
        observability::record_subscriber_count(&self.name, count);
        debug!(registry = %self.name, subscriber = %name, id, "Subscriber added");
        id
    }

    /// Remove and close a subscriber
    pub async fn remove(&self, id: SubscriberId) -> bool {
        let entry = {
            let mut slots = self.slots.lock();
            slots.try_remove(id)
        };
        match entry {
            Some(entry) => {
                observability::record_subscriber_count(&self.name, self.len());
                Self::close_entry(&self.name, entry).await;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Names of the current subscribers
    pub fn names(&self) -> Vec<String> {
        self.slots.lock().iter().map(|(_, e)| e.name.clone()).collect()
    }

    pub fn metrics(&self) -> RegistrySnapshot {
        self.metrics.snapshot()
    }

    /// Deliver `message` to every current subscriber
    ///
    /// Returns how many subscribers received it. Failed subscribers are
    /// removed once the pass is over.
    #[instrument(name = "registry_broadcast", skip(self, message), fields(registry = %self.name))]
    pub async fn broadcast(&self, message: &M) -> usize {
        let snapshot: Vec<(SubscriberId, String, SharedSubscriber<M>)> = self
            .slots
            .lock()
            .iter()
            .map(|(id, e)| (id, e.name.clone(), Arc::clone(&e.subscriber)))
            .collect();

        self.metrics.inc_broadcasts();
        if snapshot.is_empty() {
            return 0;
        }

        let mut delivered = 0;
        let mut failed = Vec::new();
        for (id, name, subscriber) in snapshot {
            match self.deliver(&name, &subscriber, message).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    self.metrics.inc_failures();
                    warn!(registry = %self.name, subscriber = %name, error = %e, "Send failed, dropping subscriber");
                    failed.push((id, subscriber));
                }
            }
        }

        self.metrics.add_deliveries(delivered as u64);
        self.remove_failed(failed).await;
        delivered
    }

    /// Deliver `message` to one subscriber
    ///
    /// Returns false when the subscriber is gone or its send failed (it is
    /// then removed).
    pub async fn send_to(&self, id: SubscriberId, message: &M) -> bool {
        let target = self
            .slots
            .lock()
            .get(id)
            .map(|e| (e.name.clone(), Arc::clone(&e.subscriber)));
        let Some((name, subscriber)) = target else {
            return false;
        };

        match self.deliver(&name, &subscriber, message).await {
            Ok(()) => {
                self.metrics.add_deliveries(1);
                true
            }
            Err(e) => {
                self.metrics.inc_failures();
                warn!(registry = %self.name, subscriber = %name, error = %e, "Direct send failed, dropping subscriber");
                self.remove_failed(vec![(id, subscriber)]).await;
                false
            }
        }
    }

    /// Close and drop every subscriber
    pub async fn close_all(&self) {
        let entries: Vec<Entry<M>> = self.slots.lock().drain().collect();
        for entry in entries {
            Self::close_entry(&self.name, entry).await;
        }
        observability::record_subscriber_count(&self.name, 0);
    }

    async fn deliver(
        &self,
        name: &str,
        subscriber: &SharedSubscriber<M>,
        message: &M,
    ) -> Result<(), ContractError> {
        let mut guard = subscriber.lock().await;
        match timeout(self.send_timeout, guard.send(message)).await {
            Ok(result) => result,
            Err(_) => Err(ContractError::subscriber_send(
                name,
                format!("send timed out after {} ms", self.send_timeout.as_millis()),
            )),
        }
    }

    async fn remove_failed(&self, failed: Vec<(SubscriberId, SharedSubscriber<M>)>) {
        if failed.is_empty() {
            return;
        }

        let removed: Vec<Entry<M>> = {
            let mut slots = self.slots.lock();
            failed
                .into_iter()
                .filter_map(|(id, subscriber)| {
                    // the slot may have been reused since the snapshot
                    let same = slots
                        .get(id)
                        .is_some_and(|e| Arc::ptr_eq(&e.subscriber, &subscriber));
                    if same {
                        Some(slots.remove(id))
                    } else {
                        None
                    }
                })
                .collect()
        };

        for entry in removed {
            self.metrics.inc_removals();
            observability::record_subscriber_removed(&self.name);
            Self::close_entry(&self.name, entry).await;
        }
        observability::record_subscriber_count(&self.name, self.len());
    }

    async fn close_entry(registry: &str, entry: Entry<M>) {
        let mut guard = entry.subscriber.lock().await;
        if let Err(e) = guard.close().await {
            debug!(registry = %registry, subscriber = %entry.name, error = %e, "Close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingSubscriber {
        name: String,
        received: Arc<AtomicU64>,
        fail: bool,
    }

    impl CountingSubscriber {
        fn new(name: &str, fail: bool) -> (Self, Arc<AtomicU64>) {
            let received = Arc::new(AtomicU64::new(0));
            (
                Self {
                    name: name.to_string(),
                    received: Arc::clone(&received),
                    fail,
                },
                received,
            )
        }
    }

    #[async_trait]
    impl Subscriber<u32> for CountingSubscriber {
        fn name(&self) -> &str {
            &self.name
        }

        async fn send(&mut self, _message: &u32) -> Result<(), ContractError> {
            if self.fail {
                return Err(ContractError::subscriber_send(&self.name, "peer gone"));
            }
            self.received.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    struct StalledSubscriber;

    #[async_trait]
    impl Subscriber<u32> for StalledSubscriber {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn send(&mut self, _message: &u32) -> Result<(), ContractError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failing_subscriber_removed() {
        let registry: SubscriberRegistry<u32> = SubscriberRegistry::new("messages");
        let (s1, c1) = CountingSubscriber::new("one", false);
        let (s2, c2) = CountingSubscriber::new("two", true);
        let (s3, c3) = CountingSubscriber::new("three", false);
        registry.add(s1);
        registry.add(s2);
        registry.add(s3);

        assert_eq!(registry.broadcast(&1).await, 2);
        assert_eq!(registry.len(), 2);

        assert_eq!(registry.broadcast(&2).await, 2);
        assert_eq!(c1.load(Ordering::Relaxed), 2);
        assert_eq!(c2.load(Ordering::Relaxed), 0);
        assert_eq!(c3.load(Ordering::Relaxed), 2);

        let m = registry.metrics();
        assert_eq!(m.removals, 1);
        assert_eq!(m.failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_subscriber_times_out() {
        let registry: SubscriberRegistry<u32> = SubscriberRegistry::with_send_timeout("video", Duration::from_millis(100));
        let (ok, count) = CountingSubscriber::new("ok", false);
        registry.add(StalledSubscriber);
        registry.add(ok);

        assert_eq!(registry.broadcast(&7).await, 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_send_to_and_remove() {
        let registry: SubscriberRegistry<u32> = SubscriberRegistry::new("messages");
        let (s1, c1) = CountingSubscriber::new("one", false);
        let id = registry.add(s1);

        assert!(registry.send_to(id, &5).await);
        assert_eq!(c1.load(Ordering::Relaxed), 1);

        assert!(registry.remove(id).await);
        assert!(!registry.remove(id).await);
        assert!(!registry.send_to(id, &5).await);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_close_all() {
        let registry: SubscriberRegistry<u32> = SubscriberRegistry::new("messages");
        registry.add(CountingSubscriber::new("a", false).0);
        registry.add(CountingSubscriber::new("b", false).0);
        assert_eq!(registry.names().len(), 2);
        registry.close_all().await;
        assert!(registry.is_empty());
    }
}
