//! Counter event notifications.
//!
//! The controller raises three events:
//!
//! - [`CounterEvent::Updated`] after every `get_value()`, successful or not
//! - [`CounterEvent::Timeout`] when a sample produced no value
//! - [`CounterEvent::Ready`] once when a polling loop exits
//!
//! # Execution context
//!
//! Observers run synchronously on the thread that raised the event: the
//! caller's thread for `get_value()`/`run_foreground()`, the worker thread for
//! `run_background()`. No controller lock is held while an observer runs, so
//! observers may call back into the controller. An observer that blocks stalls
//! the polling loop; hand work off to a channel ([`BroadcastObserver`]) if it
//! is slow.

use crate::measurement::MeasurementRecord;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;

/// What happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CounterEvent {
    /// A sample was taken.
    Updated,
    /// A sample yielded no value.
    Timeout,
    /// A polling loop finished.
    Ready,
}

/// Event plus the controller state observers typically need.
#[derive(Clone, Debug)]
pub struct CounterNotification {
    /// The event.
    pub event: CounterEvent,
    /// Current record at the time of the event.
    pub record: Arc<MeasurementRecord>,
    /// When the controller was created.
    pub init_time: DateTime<Utc>,
}

impl CounterNotification {
    /// Seconds between controller creation and the record's timestamp.
    pub fn seconds_since_init(&self) -> f64 {
        (self.record.timestamp - self.init_time)
            .num_microseconds()
            .map_or(f64::NAN, |us| us as f64 * 1.0e-6)
    }
}

/// Receives counter events.
pub trait CounterObserver: Send + Sync {
    /// Called on the thread that raised the event.
    fn on_event(&self, notification: &CounterNotification);
}

impl<F> CounterObserver for F
where
    F: Fn(&CounterNotification) + Send + Sync,
{
    fn on_event(&self, notification: &CounterNotification) {
        self(notification)
    }
}

/// Forwards notifications into a `tokio` broadcast channel.
///
/// Sending never blocks; events are dropped when nobody is subscribed and
/// lagging receivers lose the oldest events.
#[derive(Clone, Debug)]
pub struct BroadcastObserver {
    sender: broadcast::Sender<CounterNotification>,
}

impl BroadcastObserver {
    /// Channel holding up to `capacity` undelivered notifications.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// New receiver for notifications raised from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<CounterNotification> {
        self.sender.subscribe()
    }
}

impl CounterObserver for BroadcastObserver {
    fn on_event(&self, notification: &CounterNotification) {
        // No receivers is fine
        let _ = self.sender.send(notification.clone());
    }
}

/// Registered observers.
#[derive(Default)]
pub(crate) struct ObserverList {
    observers: RwLock<Vec<Arc<dyn CounterObserver>>>,
}

impl ObserverList {
    pub(crate) fn subscribe(&self, observer: Arc<dyn CounterObserver>) {
        self.observers.write().push(observer);
    }

    pub(crate) fn clear(&self) {
        self.observers.write().clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub(crate) fn notify(&self, notification: &CounterNotification) {
        // Snapshot so observers can subscribe or call back without deadlocking
        let observers: Vec<_> = self.observers.read().iter().cloned().collect();
        for observer in observers {
            observer.on_event(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn notification(event: CounterEvent) -> CounterNotification {
        let init_time = Utc::now() - chrono::Duration::seconds(2);
        CounterNotification {
            event,
            record: Arc::new(MeasurementRecord::parse("1 Hz")),
            init_time,
        }
    }

    #[test]
    fn test_closure_observer() {
        let hits = Arc::new(AtomicUsize::new(0));
        let list = ObserverList::default();
        let counter = Arc::clone(&hits);
        list.subscribe(Arc::new(move |n: &CounterNotification| {
            if n.event == CounterEvent::Timeout {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));
        list.notify(&notification(CounterEvent::Timeout));
        list.notify(&notification(CounterEvent::Updated));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_broadcast_observer() {
        let observer = BroadcastObserver::new(8);
        let mut rx = observer.subscribe();
        observer.on_event(&notification(CounterEvent::Ready));
        let received = rx.try_recv().unwrap();
        assert_eq!(received.event, CounterEvent::Ready);
        assert!(received.seconds_since_init() >= 2.0);
    }
}
