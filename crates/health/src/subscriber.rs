//! Subscriber registry for health status fan-out.
//!
//! Subscribers are notified synchronously, in registration order, while
//! the registry lock is held.  Removing a subscriber therefore waits for
//! any in-progress publication to finish, and no notification reaches it
//! once removal has returned.  Callbacks must be short and must not call
//! back into the monitor's subscribe/unsubscribe API.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;

use crate::status::HealthStatus;

/// Receives every status published after registration.
pub trait HealthSubscriber: Send + Sync {
    fn on_status(&self, status: &HealthStatus);
}

impl<F> HealthSubscriber for F
where
    F: Fn(&HealthStatus) + Send + Sync,
{
    fn on_status(&self, status: &HealthStatus) {
        self(status)
    }
}

/// Forwards statuses into a bounded channel without ever waiting.
///
/// When the receiver lags and the channel is full the status is dropped;
/// the receiver can always read the latest one from the monitor.
#[derive(Debug, Clone)]
pub struct ChannelSubscriber {
    tx: mpsc::Sender<HealthStatus>,
}

impl ChannelSubscriber {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<HealthStatus>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl HealthSubscriber for ChannelSubscriber {
    fn on_status(&self, status: &HealthStatus) {
        match self.tx.try_send(status.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!("Health subscriber channel full, dropping status");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

pub type SubscriberId = u64;

#[derive(Default)]
struct Entries {
    next_id: SubscriberId,
    list: Vec<(SubscriberId, Arc<dyn HealthSubscriber>)>,
}

/// Ordered, non-owning (beyond the `Arc`) collection of subscribers.
#[derive(Default)]
pub(crate) struct SubscriberRegistry {
    entries: Mutex<Entries>,
}

impl SubscriberRegistry {
    pub(crate) fn register(&self, subscriber: Arc<dyn HealthSubscriber>) -> SubscriberId {
        let mut entries = self.lock();
        let id = entries.next_id;
        entries.next_id += 1;
        entries.list.push((id, subscriber));
        id
    }

    pub(crate) fn remove(&self, id: SubscriberId) -> bool {
        let mut entries = self.lock();
        let before = entries.list.len();
        entries.list.retain(|(entry_id, _)| *entry_id != id);
        entries.list.len() != before
    }

    /// Notify every subscriber in registration order.
    ///
    /// A panicking subscriber is logged and skipped; the others are still
    /// notified.
    pub(crate) fn publish(&self, status: &HealthStatus) {
        let entries = self.lock();
        for (id, subscriber) in &entries.list {
            let result = catch_unwind(AssertUnwindSafe(|| subscriber.on_status(status)));
            if result.is_err() {
                tracing::warn!(subscriber_id = id, "Health subscriber panicked");
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().list.len()
    }

    pub(crate) fn clear(&self) {
        self.lock().list.clear();
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Returned by [`HealthMonitor::subscribe`](crate::HealthMonitor::subscribe).
///
/// Dropping the handle leaves the subscription in place; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
#[derive(Debug)]
#[must_use = "keep the handle to be able to unsubscribe"]
pub struct UnsubscribeHandle {
    id: SubscriberId,
    registry: Weak<SubscriberRegistry>,
}

impl UnsubscribeHandle {
    pub(crate) fn new(id: SubscriberId, registry: &Arc<SubscriberRegistry>) -> Self {
        Self {
            id,
            registry: Arc::downgrade(registry),
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Remove the subscriber.  Returns `false` if it was already gone
    /// (e.g. the monitor was shut down).
    pub fn unsubscribe(self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.remove(self.id))
    }
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("subscribers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use promptr_core::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};

    use super::*;
    use crate::status::HealthState;

    fn status() -> HealthStatus {
        HealthStatus::unknown(CircuitBreaker::new(CircuitBreakerConfig::default()).snapshot())
    }

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, label: &'static str) -> Arc<dyn HealthSubscriber> {
        let log = Arc::clone(log);
        Arc::new(move |_: &HealthStatus| log.lock().unwrap().push(label))
    }

    #[test]
    fn notifies_in_registration_order() {
        let registry = SubscriberRegistry::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register(recorder(&log, "first"));
        registry.register(recorder(&log, "second"));
        registry.register(recorder(&log, "third"));

        registry.publish(&status());

        assert_eq!(*log.lock().unwrap(), ["first", "second", "third"]);
    }

    #[test]
    fn removed_subscriber_is_not_notified() {
        let registry = Arc::new(SubscriberRegistry::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        let id = registry.register(recorder(&log, "gone"));
        registry.register(recorder(&log, "kept"));

        assert!(UnsubscribeHandle::new(id, &registry).unsubscribe());
        registry.publish(&status());

        assert_eq!(*log.lock().unwrap(), ["kept"]);
        assert!(!registry.remove(id));
    }

    #[test]
    fn panicking_subscriber_does_not_stop_the_others() {
        let registry = SubscriberRegistry::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register(Arc::new(|_: &HealthStatus| panic!("subscriber bug")));
        registry.register(recorder(&log, "after"));

        registry.publish(&status());

        assert_eq!(*log.lock().unwrap(), ["after"]);
    }

    #[test]
    fn channel_subscriber_drops_when_full() {
        let (subscriber, mut rx) = ChannelSubscriber::channel(1);
        subscriber.on_status(&status());
        subscriber.on_status(&status());

        assert_eq!(rx.try_recv().unwrap().status, HealthState::Unknown);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unsubscribe_after_registry_dropped_returns_false() {
        let registry = Arc::new(SubscriberRegistry::default());
        let id = registry.register(Arc::new(|_: &HealthStatus| {}));
        let handle = UnsubscribeHandle::new(id, &registry);
        drop(registry);
        assert!(!handle.unsubscribe());
    }
}
