//! Event Dispatcher (spec §4.3, §5): a single broadcast point with
//! filtered subscriptions and one-shot `wait_for`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

use crate::env::Environment;
use crate::event::Event;

/// Dispatcher tuning (spec §5: "dispatcher = 100 newest; ... detached
/// after a threshold (implementation-defined; recommended 64 pending)").
#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// Central queue capacity; overflow drops the oldest queued event.
    pub queue_capacity: usize,
    /// Per-subscriber channel capacity before the subscriber is detached.
    pub subscriber_backlog: usize,
}

/// Central queue capacity (spec §5).
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
/// Per-subscriber backlog before detach (spec §5).
pub const DEFAULT_SUBSCRIBER_BACKLOG: usize = 64;

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            subscriber_backlog: DEFAULT_SUBSCRIBER_BACKLOG,
        }
    }
}

/// Opaque handle returned by [`Dispatcher::subscribe`].
pub type SubscriptionId = u64;

struct Subscriber {
    event_type: Option<String>,
    filters: HashMap<String, String>,
    sender: mpsc::Sender<Arc<Event>>,
}

struct Inner {
    subscribers: HashMap<SubscriptionId, Subscriber>,
    queue: VecDeque<Arc<Event>>,
}

/// A single logical broadcast point for [`Event`]s.
///
/// Subscriber registration and dispatch share one `Mutex`, which is what
/// gives `wait_for` its ordering guarantee: the subscription is inserted
/// before the registering call returns control to the caller, so no
/// `dispatch` between registration and the caller's await can be missed
/// (spec §4.3).
pub struct Dispatcher {
    inner: Arc<Mutex<Inner>>,
    config: DispatcherConfig,
    next_id: AtomicU64,
}

impl Dispatcher {
    /// Create a dispatcher with the given tuning.
    #[must_use]
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                subscribers: HashMap::new(),
                queue: VecDeque::with_capacity(config.queue_capacity),
            })),
            config,
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe to events matching `event_type` (`None` matches all) and
    /// `filters` (every entry must match the event's attribute map).
    ///
    /// Returns the subscription id and the receiver the caller polls for
    /// matching events.
    pub async fn subscribe(
        &self,
        event_type: Option<String>,
        filters: HashMap<String, String>,
    ) -> (SubscriptionId, mpsc::Receiver<Arc<Event>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.config.subscriber_backlog);
        let mut inner = self.inner.lock().await;
        inner.subscribers.insert(id, Subscriber { event_type, filters, sender });
        (id, receiver)
    }

    /// Remove a subscription. A no-op if `id` is unknown (already
    /// detached, or never existed).
    pub async fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.lock().await.subscribers.remove(&id);
    }

    /// Enqueue `event` and fan it out to every matching subscriber.
    ///
    /// Overflow beyond the central queue's capacity drops the oldest
    /// queued event and logs a warning (spec §5 queue policy). A
    /// subscriber whose own channel is full is detached with a logged
    /// warning rather than allowed to block dispatch (spec §4.3:
    /// "Callbacks MUST NOT block dispatch").
    pub async fn dispatch(&self, event: Event) {
        let event = Arc::new(event);
        let mut inner = self.inner.lock().await;

        if inner.queue.len() >= self.config.queue_capacity {
            inner.queue.pop_front();
            tracing::warn!("dispatcher queue full, dropped oldest event");
        }
        inner.queue.push_back(Arc::clone(&event));

        let mut detached = Vec::new();
        for (id, subscriber) in &inner.subscribers {
            if !event.matches(subscriber.event_type.as_deref(), &subscriber.filters) {
                continue;
            }
            if subscriber.sender.try_send(Arc::clone(&event)).is_err() {
                tracing::warn!(subscription_id = id, "subscriber backlog exceeded, detaching");
                detached.push(*id);
            }
        }
        for id in detached {
            inner.subscribers.remove(&id);
        }
    }

    /// Register a filtered one-shot subscription and wait for the first
    /// matching event, up to `timeout`.
    ///
    /// Registration happens synchronously before this function's first
    /// await point completes, so an event dispatched immediately after
    /// `wait_for` is called (even concurrently, before the caller's
    /// future is polled to completion) is guaranteed to be observed
    /// (spec §4.3).
    pub async fn wait_for<E: Environment>(
        &self,
        env: &E,
        event_type: Option<String>,
        filters: HashMap<String, String>,
        timeout: Duration,
    ) -> Option<Arc<Event>> {
        let (id, mut receiver) = self.subscribe(event_type, filters).await;
        let result = tokio::select! {
            received = receiver.recv() => received,
            () = env.sleep(timeout) => None,
        };
        self.unsubscribe(id).await;
        result
    }

    /// Number of events currently retained in the central queue.
    pub async fn queued_len(&self) -> usize {
        self.inner.lock().await.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::SystemEnvironment;
    use crate::event::ConnectionState;

    fn ready_event() -> Event {
        Event::ConnectionState { state: ConnectionState::Ready, reason: None }
    }

    #[tokio::test]
    async fn subscriber_receives_matching_event() {
        let dispatcher = Dispatcher::new(DispatcherConfig::default());
        let (_id, mut rx) = dispatcher
            .subscribe(Some("connection_state".to_string()), HashMap::new())
            .await;

        dispatcher.dispatch(ready_event()).await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type(), "connection_state");
    }

    #[tokio::test]
    async fn subscriber_filters_by_event_type() {
        let dispatcher = Dispatcher::new(DispatcherConfig::default());
        let (_id, mut rx) =
            dispatcher.subscribe(Some("sync_progress".to_string()), HashMap::new()).await;

        dispatcher.dispatch(ready_event()).await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let dispatcher = Dispatcher::new(DispatcherConfig::default());
        let (id, mut rx) = dispatcher.subscribe(None, HashMap::new()).await;
        dispatcher.unsubscribe(id).await;

        dispatcher.dispatch(ready_event()).await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn overflowing_subscriber_is_detached() {
        let config = DispatcherConfig { queue_capacity: 100, subscriber_backlog: 2 };
        let dispatcher = Dispatcher::new(config);
        let (id, _rx) = dispatcher.subscribe(None, HashMap::new()).await;

        for _ in 0..5 {
            dispatcher.dispatch(ready_event()).await;
        }

        // the channel receiver was never polled, so backlog fills and the
        // subscriber is detached; unsubscribe is then a no-op, not a panic
        dispatcher.unsubscribe(id).await;
    }

    #[tokio::test]
    async fn wait_for_observes_event_dispatched_right_after_registration() {
        let dispatcher = Arc::new(Dispatcher::new(DispatcherConfig::default()));
        let env = SystemEnvironment;

        let waiter = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                dispatcher
                    .wait_for(&env, Some("connection_state".to_string()), HashMap::new(), Duration::from_secs(1))
                    .await
            })
        };

        tokio::task::yield_now().await;
        dispatcher.dispatch(ready_event()).await;

        let result = waiter.await.unwrap();
        assert!(result.is_some());
    }

    #[tokio::test]
    async fn wait_for_times_out_with_no_matching_event() {
        let dispatcher = Dispatcher::new(DispatcherConfig::default());
        let env = SystemEnvironment;

        let result = dispatcher
            .wait_for(&env, Some("sync_progress".to_string()), HashMap::new(), Duration::from_millis(20))
            .await;

        assert!(result.is_none());
    }

    #[tokio::test]
    async fn queue_drops_oldest_on_overflow() {
        let config = DispatcherConfig { queue_capacity: 2, subscriber_backlog: 100 };
        let dispatcher = Dispatcher::new(config);

        for _ in 0..5 {
            dispatcher.dispatch(ready_event()).await;
        }

        assert_eq!(dispatcher.queued_len().await, 2);
    }
}
