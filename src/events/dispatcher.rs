//! Event dispatcher: a bounded queue drained by a single consumer task.
//!
//! For every event the consumer runs the typed handlers and delivers to
//! matching subscriptions concurrently, so a failing handler never holds up
//! subscribers. External push sinks are fed fire-and-forget afterwards.
//!
//! Backpressure is applied at two points:
//! - `publish` waits up to `publish_timeout_ms` for queue space, then fails
//!   with `QueueFull`. Events are never dropped silently at this boundary.
//! - a subscriber whose channel is full or closed is deactivated instead of
//!   holding up delivery to anyone else.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::registry::{SubscriptionHandle, SubscriptionRegistry};
use super::sink::PushSink;
use super::types::{CreateSubscriptionRequest, EventType, Subscription, TaskEvent};
use crate::config::EventSettings;
use crate::errors::{BoardError, SinkError};

/// Reacts to events of the types it was registered for.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, event: &TaskEvent) -> anyhow::Result<()>;
}

#[derive(Default)]
struct DispatcherMetrics {
    published: AtomicU64,
    processed: AtomicU64,
    delivered: AtomicU64,
    dropped_subscribers: AtomicU64,
    handler_failures: AtomicU64,
    sink_failures: AtomicU64,
}

/// Point-in-time copy of the dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    pub published: u64,
    pub processed: u64,
    pub delivered: u64,
    pub dropped_subscribers: u64,
    pub handler_failures: u64,
    pub sink_failures: u64,
    /// Events waiting in the queue.
    pub queued: usize,
}

struct Inner {
    queue: mpsc::Sender<TaskEvent>,
    registry: Arc<SubscriptionRegistry>,
    handlers: RwLock<HashMap<EventType, Vec<Arc<dyn EventHandler>>>>,
    sinks: RwLock<Vec<Arc<dyn PushSink>>>,
    metrics: DispatcherMetrics,
    settings: EventSettings,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<Inner>,
    workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl EventDispatcher {
    /// Spawn the consumer loop and the cleanup worker. Must be called from
    /// within a tokio runtime.
    pub fn start(registry: Arc<SubscriptionRegistry>, settings: EventSettings) -> Self {
        let (queue, rx) = mpsc::channel(settings.queue_size.max(1));
        let inner = Arc::new(Inner {
            queue,
            registry,
            handlers: RwLock::new(HashMap::new()),
            sinks: RwLock::new(Vec::new()),
            metrics: DispatcherMetrics::default(),
            settings,
            cancel: CancellationToken::new(),
        });

        let consumer = tokio::spawn(run_consumer(inner.clone(), rx));
        let cleaner = tokio::spawn(run_cleanup(inner.clone()));
        tracing::info!(
            queue_size = settings.queue_size,
            cleanup_interval_secs = settings.cleanup_interval_secs,
            "Event dispatcher started"
        );

        Self {
            inner,
            workers: Arc::new(Mutex::new(vec![consumer, cleaner])),
        }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.inner.registry
    }

    /// Enqueue an event, waiting for space up to the publish timeout.
    ///
    /// Having no matching subscribers is not an error.
    pub async fn publish(&self, event: TaskEvent) -> Result<(), BoardError> {
        if event.event_id.trim().is_empty() || event.task_id.trim().is_empty() {
            return Err(BoardError::validation("event and task ids are required"));
        }
        if event.event_type != event.data.event_type() {
            return Err(BoardError::validation(format!(
                "event type '{}' does not match its payload",
                event.event_type
            )));
        }
        if self.inner.cancel.is_cancelled() {
            return Err(BoardError::DispatcherStopped);
        }

        let timeout = self.inner.settings.publish_timeout();
        match self.inner.queue.send_timeout(event, timeout).await {
            Ok(()) => {
                self.inner.metrics.published.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(SendTimeoutError::Timeout(event)) => {
                tracing::warn!(
                    event_id = %event.event_id,
                    task_id = %event.task_id,
                    waited_ms = self.inner.settings.publish_timeout_ms,
                    "Event queue full"
                );
                Err(BoardError::QueueFull {
                    waited_ms: self.inner.settings.publish_timeout_ms,
                })
            }
            Err(SendTimeoutError::Closed(_)) => Err(BoardError::DispatcherStopped),
        }
    }

    pub async fn register_handler(&self, event_type: EventType, handler: Arc<dyn EventHandler>) {
        tracing::debug!(event_type = %event_type, handler = handler.name(), "Registered event handler");
        self.inner
            .handlers
            .write()
            .await
            .entry(event_type)
            .or_default()
            .push(handler);
    }

    pub async fn register_sink(&self, sink: Arc<dyn PushSink>) {
        tracing::debug!(sink = sink.name(), "Registered push sink");
        self.inner.sinks.write().await.push(sink);
    }

    pub async fn subscribe(
        &self,
        request: CreateSubscriptionRequest,
    ) -> Result<SubscriptionHandle, BoardError> {
        self.inner.registry.create(request).await
    }

    pub async fn unsubscribe(&self, subscription_id: &str) -> bool {
        self.inner.registry.delete(subscription_id).await
    }

    pub async fn list_by_user(&self, user_id: &str) -> Vec<Subscription> {
        self.inner.registry.list_by_user(user_id).await
    }

    pub fn stats(&self) -> DispatcherStats {
        let m = &self.inner.metrics;
        let queue = &self.inner.queue;
        DispatcherStats {
            published: m.published.load(Ordering::Relaxed),
            processed: m.processed.load(Ordering::Relaxed),
            delivered: m.delivered.load(Ordering::Relaxed),
            dropped_subscribers: m.dropped_subscribers.load(Ordering::Relaxed),
            handler_failures: m.handler_failures.load(Ordering::Relaxed),
            sink_failures: m.sink_failures.load(Ordering::Relaxed),
            queued: queue.max_capacity() - queue.capacity(),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.inner.cancel.is_cancelled()
    }

    /// Stop both workers. Events still queued are discarded.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Dispatcher worker ended abnormally");
            }
        }
        tracing::info!("Event dispatcher stopped");
    }
}

async fn run_consumer(inner: Arc<Inner>, mut rx: mpsc::Receiver<TaskEvent>) {
    loop {
        tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(event) => inner.process(event).await,
                None => break,
            },
        }
    }
    tracing::debug!(pending = rx.len(), "Event consumer stopped");
}

async fn run_cleanup(inner: Arc<Inner>) {
    let mut interval = tokio::time::interval(inner.settings.cleanup_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;
    loop {
        tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => break,
            _ = interval.tick() => {
                let removed = inner.registry.cleanup(Utc::now()).await;
                tracing::debug!(removed, "Subscription cleanup pass");
            }
        }
    }
}

impl Inner {
    async fn process(self: &Arc<Self>, event: TaskEvent) {
        let event = Arc::new(event);
        tokio::join!(self.run_handlers(&event), self.deliver(&event));
        self.forward_to_sinks(&event).await;
        self.metrics.processed.fetch_add(1, Ordering::Relaxed);
    }

    async fn run_handlers(&self, event: &TaskEvent) {
        let handlers = self
            .handlers
            .read()
            .await
            .get(&event.event_type)
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            if let Err(e) = handler.handle(event).await {
                self.metrics.handler_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    handler = handler.name(),
                    event_id = %event.event_id,
                    error = %e,
                    "Event handler failed"
                );
            }
        }
    }

    async fn deliver(&self, event: &Arc<TaskEvent>) {
        let matches = self.registry.matching(event).await;
        let mut delivered = Vec::with_capacity(matches.len());
        for m in matches {
            match m.sender.try_send(event.clone()) {
                Ok(()) => delivered.push(m.id),
                Err(err) => {
                    let reason = match err {
                        TrySendError::Full(_) => "channel full",
                        TrySendError::Closed(_) => "receiver dropped",
                    };
                    tracing::warn!(subscription_id = %m.id, reason, "Dropping subscriber");
                    self.registry.deactivate(&m.id).await;
                    self.metrics
                        .dropped_subscribers
                        .fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        self.metrics
            .delivered
            .fetch_add(delivered.len() as u64, Ordering::Relaxed);
        self.registry.touch(&delivered, Utc::now()).await;
    }

    async fn forward_to_sinks(self: &Arc<Self>, event: &Arc<TaskEvent>) {
        let sinks = self.sinks.read().await.clone();
        if sinks.is_empty() {
            return;
        }
        let payload = match serde_json::to_value(event.as_ref()) {
            Ok(payload) => Arc::new(payload),
            Err(e) => {
                tracing::error!(event_id = %event.event_id, error = %e, "Failed to serialize event for sinks");
                return;
            }
        };

        for sink in sinks {
            let inner = Arc::clone(self);
            let event = Arc::clone(event);
            let payload = Arc::clone(&payload);
            tokio::spawn(async move {
                match sink
                    .send_to_project(&event.project_id, event.event_type, &payload)
                    .await
                {
                    Ok(()) => {}
                    Err(SinkError::NoReceivers) => {
                        tracing::trace!(sink = sink.name(), "No push receivers connected");
                    }
                    Err(e) => {
                        inner.metrics.sink_failures.fetch_add(1, Ordering::Relaxed);
                        tracing::error!(
                            sink = sink.name(),
                            event_id = %event.event_id,
                            error = %e,
                            "Push sink failed"
                        );
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::models::{Project, TaskStatus};
    use crate::board::store::MemoryStore;
    use crate::config::SubscriptionSettings;
    use crate::events::types::EventData;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    async fn registry(settings: SubscriptionSettings) -> Arc<SubscriptionRegistry> {
        let store = Arc::new(MemoryStore::new());
        for user in ["alice", "bob", "carol"] {
            store.add_user(user).await;
        }
        for id in ["p1", "p2"] {
            store
                .add_project(Project {
                    id: id.into(),
                    name: id.to_uppercase(),
                    owner_id: "alice".into(),
                    member_ids: vec![],
                    is_private: false,
                })
                .await;
        }
        store
            .add_project(Project {
                id: "secret".into(),
                name: "Secret".into(),
                owner_id: "alice".into(),
                member_ids: vec![],
                is_private: true,
            })
            .await;
        Arc::new(SubscriptionRegistry::new(store.clone(), store, settings))
    }

    async fn dispatcher() -> EventDispatcher {
        EventDispatcher::start(
            registry(SubscriptionSettings::default()).await,
            EventSettings::default(),
        )
    }

    fn moved(project: &str) -> TaskEvent {
        TaskEvent::new(
            "t1",
            project,
            "alice",
            EventData::Moved {
                old_status: TaskStatus::Todo,
                new_status: TaskStatus::Developing,
                old_position: 1000,
                new_position: 2000,
            },
        )
    }

    fn sub_request(user: &str, project: Option<&str>) -> CreateSubscriptionRequest {
        CreateSubscriptionRequest {
            user_id: user.into(),
            project_id: project.map(String::from),
            event_types: vec![EventType::Moved],
            filters: HashMap::new(),
        }
    }

    async fn wait_processed(dispatcher: &EventDispatcher, count: u64) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while dispatcher.stats().processed < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("events were not processed in time");
    }

    struct CountingHandler {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        fn name(&self) -> &str {
            if self.fail { "failing" } else { "counting" }
        }

        async fn handle(&self, _event: &TaskEvent) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("handler exploded");
            }
            Ok(())
        }
    }

    struct GatedHandler {
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl EventHandler for GatedHandler {
        fn name(&self) -> &str {
            "gated"
        }

        async fn handle(&self, _event: &TaskEvent) -> anyhow::Result<()> {
            self.gate.acquire().await?.forget();
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        projects: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PushSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send_to_user(
            &self,
            _user_id: &str,
            _event_type: EventType,
            _payload: &serde_json::Value,
        ) -> Result<(), SinkError> {
            Ok(())
        }

        async fn send_to_project(
            &self,
            project_id: &str,
            _event_type: EventType,
            _payload: &serde_json::Value,
        ) -> Result<(), SinkError> {
            self.projects.lock().unwrap().push(project_id.to_string());
            Ok(())
        }

        async fn broadcast_to_all(
            &self,
            _event_type: EventType,
            _payload: &serde_json::Value,
        ) -> Result<(), SinkError> {
            Ok(())
        }

        fn active_connection_count(&self) -> usize {
            1
        }
    }

    #[tokio::test]
    async fn test_publish_rejects_malformed_events() {
        let dispatcher = dispatcher().await;
        let mut event = moved("p1");
        event.task_id.clear();
        assert!(matches!(
            dispatcher.publish(event).await,
            Err(BoardError::Validation(_))
        ));

        let mut event = moved("p1");
        event.event_type = EventType::Created;
        assert!(matches!(
            dispatcher.publish(event).await,
            Err(BoardError::Validation(_))
        ));
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_succeeds() {
        let dispatcher = dispatcher().await;
        dispatcher.publish(moved("p1")).await.unwrap();
        wait_processed(&dispatcher, 1).await;
        assert_eq!(dispatcher.stats().delivered, 0);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_delivery_respects_project_scope() {
        let dispatcher = dispatcher().await;
        let mut p1 = dispatcher.subscribe(sub_request("alice", Some("p1"))).await.unwrap();
        let mut global = dispatcher.subscribe(sub_request("bob", None)).await.unwrap();
        let p2 = dispatcher.subscribe(sub_request("carol", Some("p2"))).await.unwrap();

        dispatcher.publish(moved("p1")).await.unwrap();
        wait_processed(&dispatcher, 1).await;

        assert_eq!(p1.events.recv().await.unwrap().project_id, "p1");
        assert_eq!(global.events.recv().await.unwrap().project_id, "p1");

        let registry = dispatcher.registry();
        let p2_after = registry.get(&p2.subscription.id).await.unwrap();
        assert!(p2_after.last_activity.is_none());
        let p1_after = registry.get(&p1.subscription.id).await.unwrap();
        assert!(p1_after.last_activity.is_some());
        assert_eq!(dispatcher.stats().delivered, 2);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_unscoped_subscriber_misses_private_project() {
        let dispatcher = dispatcher().await;
        let mut outsider = dispatcher.subscribe(sub_request("bob", None)).await.unwrap();
        let mut owner = dispatcher.subscribe(sub_request("alice", None)).await.unwrap();

        dispatcher.publish(moved("secret")).await.unwrap();
        wait_processed(&dispatcher, 1).await;

        assert_eq!(owner.events.recv().await.unwrap().project_id, "secret");
        assert!(outsider.events.try_recv().is_err());
        let stored = dispatcher
            .registry()
            .get(&outsider.subscription.id)
            .await
            .unwrap();
        assert!(stored.last_activity.is_none());
        assert_eq!(dispatcher.stats().delivered, 1);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_block_others() {
        let dispatcher = dispatcher().await;
        let failing = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let counting = Arc::new(CountingHandler {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        dispatcher.register_handler(EventType::Moved, failing.clone()).await;
        dispatcher.register_handler(EventType::Moved, counting.clone()).await;
        dispatcher.register_handler(EventType::Created, counting.clone()).await;
        let mut sub = dispatcher.subscribe(sub_request("bob", None)).await.unwrap();

        dispatcher.publish(moved("p1")).await.unwrap();
        wait_processed(&dispatcher, 1).await;

        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
        assert!(sub.events.recv().await.is_some());
        assert_eq!(dispatcher.stats().handler_failures, 1);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_full_subscriber_is_dropped() {
        let settings = SubscriptionSettings {
            channel_capacity: 1,
            ..SubscriptionSettings::default()
        };
        let dispatcher = EventDispatcher::start(registry(settings).await, EventSettings::default());
        let mut slow = dispatcher.subscribe(sub_request("bob", None)).await.unwrap();

        dispatcher.publish(moved("p1")).await.unwrap();
        dispatcher.publish(moved("p1")).await.unwrap();
        wait_processed(&dispatcher, 2).await;

        let stored = dispatcher.registry().get(&slow.subscription.id).await.unwrap();
        assert!(!stored.active);
        assert!(slow.events.recv().await.is_some());
        assert!(slow.events.recv().await.is_none());
        assert_eq!(dispatcher.stats().dropped_subscribers, 1);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_dropped_receiver_deactivates_subscription() {
        let dispatcher = dispatcher().await;
        let handle = dispatcher.subscribe(sub_request("bob", None)).await.unwrap();
        let id = handle.subscription.id.clone();
        drop(handle);

        dispatcher.publish(moved("p1")).await.unwrap();
        wait_processed(&dispatcher, 1).await;
        assert!(!dispatcher.registry().get(&id).await.unwrap().active);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_publish_times_out_when_queue_full() {
        let settings = EventSettings {
            queue_size: 1,
            publish_timeout_ms: 50,
            ..EventSettings::default()
        };
        let dispatcher =
            EventDispatcher::start(registry(SubscriptionSettings::default()).await, settings);
        let gate = Arc::new(Semaphore::new(0));
        dispatcher
            .register_handler(EventType::Moved, Arc::new(GatedHandler { gate: gate.clone() }))
            .await;

        // First event parks the consumer, second fills the queue.
        dispatcher.publish(moved("p1")).await.unwrap();
        dispatcher.publish(moved("p1")).await.unwrap();
        let err = dispatcher.publish(moved("p1")).await.unwrap_err();
        assert!(matches!(err, BoardError::QueueFull { waited_ms: 50 }));
        assert_eq!(dispatcher.stats().published, 2);

        gate.add_permits(2);
        wait_processed(&dispatcher, 2).await;
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_sink_receives_processed_events() {
        let dispatcher = dispatcher().await;
        let sink = Arc::new(RecordingSink::default());
        dispatcher.register_sink(sink.clone()).await;

        dispatcher.publish(moved("p2")).await.unwrap();
        wait_processed(&dispatcher, 1).await;
        tokio::time::timeout(Duration::from_secs(1), async {
            while sink.projects.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(*sink.projects.lock().unwrap(), vec!["p2".to_string()]);
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_publish_after_shutdown_fails() {
        let dispatcher = dispatcher().await;
        dispatcher.shutdown().await;
        assert!(!dispatcher.is_running());
        assert!(matches!(
            dispatcher.publish(moved("p1")).await,
            Err(BoardError::DispatcherStopped)
        ));
    }

    #[tokio::test]
    async fn test_cleanup_worker_runs_on_interval() {
        let subs = SubscriptionSettings {
            timeout_secs: 0,
            ..SubscriptionSettings::default()
        };
        let events = EventSettings {
            cleanup_interval_secs: 1,
            ..EventSettings::default()
        };
        let dispatcher = EventDispatcher::start(registry(subs).await, events);
        let handle = dispatcher.subscribe(sub_request("bob", None)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1300)).await;
        assert!(dispatcher.registry().get(&handle.subscription.id).await.is_err());
        assert!(dispatcher.list_by_user("bob").await.is_empty());
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_zero_cleanup_interval_still_cleans() {
        let subs = SubscriptionSettings {
            timeout_secs: 0,
            ..SubscriptionSettings::default()
        };
        let events = EventSettings {
            cleanup_interval_secs: 0,
            ..EventSettings::default()
        };
        let dispatcher = EventDispatcher::start(registry(subs).await, events);
        let handle = dispatcher.subscribe(sub_request("bob", None)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1300)).await;
        assert!(dispatcher.registry().get(&handle.subscription.id).await.is_err());
        dispatcher.publish(moved("p1")).await.unwrap();
        wait_processed(&dispatcher, 1).await;
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn test_unsubscribe_delegates_to_registry() {
        let dispatcher = dispatcher().await;
        let handle = dispatcher.subscribe(sub_request("bob", None)).await.unwrap();
        assert_eq!(dispatcher.list_by_user("bob").await.len(), 1);
        assert!(dispatcher.unsubscribe(&handle.subscription.id).await);
        assert!(!dispatcher.unsubscribe(&handle.subscription.id).await);
        assert!(dispatcher.list_by_user("bob").await.is_empty());
        dispatcher.shutdown().await;
    }
}
