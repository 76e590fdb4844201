//! Lifecycle events and their fan-out to subscribers.
//!
//! The notifier is an explicit value owned by whoever owns the
//! [`ConnectionManager`](crate::manager::ConnectionManager) — there is no
//! process-global bus. Each subscriber gets its own unbounded channel and
//! drains it on an executor of its choosing, so publishing never blocks on a
//! slow consumer. Delivery is at-least-once within the process and not
//! durable across restarts.

use std::sync::{Arc, Mutex, PoisonError};

use async_channel::{Receiver, Sender, TrySendError};

/// A state transition in driver acquisition or connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    DriverDownloadStarted { database_type: String },
    DriverDownloadCompleted { database_type: String },
    DriverLoaded { database_type: String },
    ConnectionAdded { name: String },
    ConnectionFailed { name: String, reason: String },
    ConnectionClosed { name: String },
}

/// Publishes [`LifecycleEvent`]s to any number of subscribers.
///
/// Cloning is cheap; clones share the subscriber list.
#[derive(Debug, Clone, Default)]
pub struct LifecycleNotifier {
    subscribers: Arc<Mutex<Vec<Sender<LifecycleEvent>>>>,
}

impl LifecycleNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber and hand back its event channel.
    ///
    /// Dropping the receiver unsubscribes; the dead sender is pruned on the
    /// next publish.
    pub fn subscribe(&self) -> Receiver<LifecycleEvent> {
        let (tx, rx) = async_channel::unbounded();
        self.lock_subscribers().push(tx);
        rx
    }

    /// Deliver an event to every live subscriber.
    ///
    /// The channels are unbounded, so `try_send` cannot block or fail for a
    /// live receiver; closed channels are dropped from the list here.
    pub fn publish(&self, event: LifecycleEvent) {
        let mut subscribers = self.lock_subscribers();
        subscribers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Closed(_)) => false,
            Err(TrySendError::Full(_)) => true,
        });
    }

    /// Number of currently registered subscribers (including ones whose
    /// receiver has been dropped but not yet pruned).
    pub fn subscriber_count(&self) -> usize {
        self.lock_subscribers().len()
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, Vec<Sender<LifecycleEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers_is_a_noop() {
        let notifier = LifecycleNotifier::new();
        notifier.publish(LifecycleEvent::ConnectionAdded {
            name: "db1".to_string(),
        });
    }

    #[test]
    fn test_all_subscribers_receive_each_event() {
        let notifier = LifecycleNotifier::new();
        let rx1 = notifier.subscribe();
        let rx2 = notifier.subscribe();

        notifier.publish(LifecycleEvent::DriverLoaded {
            database_type: "sqlite".to_string(),
        });

        for rx in [rx1, rx2] {
            let event = rx.try_recv().expect("event delivered");
            assert_eq!(
                event,
                LifecycleEvent::DriverLoaded {
                    database_type: "sqlite".to_string()
                }
            );
        }
    }

    #[test]
    fn test_dropped_subscriber_is_pruned_on_publish() {
        let notifier = LifecycleNotifier::new();
        let rx1 = notifier.subscribe();
        let rx2 = notifier.subscribe();
        drop(rx2);
        assert_eq!(notifier.subscriber_count(), 2);

        notifier.publish(LifecycleEvent::ConnectionClosed {
            name: "db1".to_string(),
        });

        assert_eq!(notifier.subscriber_count(), 1);
        assert!(rx1.try_recv().is_ok());
    }

    #[test]
    fn test_events_delivered_in_publish_order() {
        let notifier = LifecycleNotifier::new();
        let rx = notifier.subscribe();

        notifier.publish(LifecycleEvent::DriverDownloadStarted {
            database_type: "postgres".to_string(),
        });
        notifier.publish(LifecycleEvent::DriverDownloadCompleted {
            database_type: "postgres".to_string(),
        });

        assert!(matches!(
            rx.try_recv().unwrap(),
            LifecycleEvent::DriverDownloadStarted { .. }
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            LifecycleEvent::DriverDownloadCompleted { .. }
        ));
    }
}
