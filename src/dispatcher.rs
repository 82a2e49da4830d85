use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::envelope::Envelope;
use crate::error::DeliveryOutcome;
use crate::failures::FailureTracker;
use crate::storage::SubscriptionStore;
use crate::types::{ChatId, Subscription};
use crate::worker::{deliver_with_retry, DeliveryContext, Transport};

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Attempts per delivery, including the first.
    pub max_attempts: u32,
    /// Hard limit on one HTTP attempt.
    pub attempt_timeout: Duration,
    /// Linear backoff unit: attempt `k` is followed by a `k * unit` sleep.
    pub backoff_unit: Duration,
    /// Failure count at which deliveries are discarded pre-flight.
    pub max_failures: u32,
    /// Cooling-off window after which a failure count is forgotten.
    pub failure_ttl: Duration,
    pub failure_cache_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(10),
            backoff_unit: Duration::from_secs(1),
            max_failures: 5,
            failure_ttl: Duration::from_secs(10 * 60),
            failure_cache_capacity: 1_000,
        }
    }
}

/// Fans envelopes out to every subscription of a chat.
///
/// Each subscription is served by its own task with its own retry loop, so
/// one failing or discarded subscriber never delays another. Outcomes are
/// only observable through logs unless the caller keeps the returned
/// [`Deliveries`].
pub struct Dispatcher {
    ctx: Arc<DeliveryContext>,
    store: Arc<dyn SubscriptionStore>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// Dispatcher delivering over HTTP with a default `reqwest` client.
    #[cfg(feature = "http")]
    pub fn new(config: DispatcherConfig, store: Arc<dyn SubscriptionStore>) -> Self {
        let transport = Arc::new(crate::worker::HttpTransport::default());
        Self::with_transport(config, store, transport)
    }

    pub fn with_transport(
        config: DispatcherConfig,
        store: Arc<dyn SubscriptionStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let failures = FailureTracker::new(
            config.failure_cache_capacity,
            config.failure_ttl,
            config.max_failures,
        );
        Self::with_parts(config, store, transport, failures)
    }

    /// Full control over the failure bookkeeping, e.g. a cache on a test clock.
    pub fn with_parts(
        config: DispatcherConfig,
        store: Arc<dyn SubscriptionStore>,
        transport: Arc<dyn Transport>,
        failures: FailureTracker,
    ) -> Self {
        Self {
            ctx: Arc::new(DeliveryContext {
                transport,
                failures,
                config,
            }),
            store,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.ctx.config
    }

    pub fn failures(&self) -> &FailureTracker {
        &self.ctx.failures
    }

    /// Deliver `envelope` to every subscription of `chat_id`.
    ///
    /// Returns once the tasks are spawned. In-flight retries are abandoned on
    /// [`Dispatcher::shutdown`].
    pub async fn send_all(&self, chat_id: ChatId, envelope: Envelope) -> Deliveries {
        self.send_all_with_cancel(self.shutdown.child_token(), chat_id, envelope).await
    }

    /// Like [`Dispatcher::send_all`], abandoning retries when `cancel` fires.
    pub async fn send_all_with_cancel(
        &self,
        cancel: CancellationToken,
        chat_id: ChatId,
        envelope: Envelope,
    ) -> Deliveries {
        if !envelope.kind().is_outbound() {
            tracing::warn!(chat_id = %chat_id, kind = %envelope.kind(), "refusing to dispatch inbound-only envelope");
            return Deliveries::default();
        }

        let subscriptions = match self.store.list_for_chat(chat_id).await {
            Ok(subscriptions) => subscriptions,
            Err(err) => {
                tracing::error!(chat_id = %chat_id, error = %err, "could not load webhooks for chat");
                return Deliveries::default();
            }
        };

        let envelope = Arc::new(envelope);
        let handles = subscriptions
            .into_iter()
            .map(|subscription| self.spawn(cancel.clone(), chat_id, subscription, envelope.clone()))
            .collect();

        Deliveries { handles }
    }

    /// Deliver to a single subscription on its own task.
    pub fn send_async(
        &self,
        cancel: CancellationToken,
        subscription: Subscription,
        envelope: Envelope,
    ) -> JoinHandle<DeliveryOutcome> {
        let chat_id = subscription.chat_id;
        self.spawn(cancel, chat_id, subscription, Arc::new(envelope))
    }

    /// Deliver to a single subscription, waiting for the retry loop to finish.
    pub async fn send_with_retry(
        &self,
        cancel: &CancellationToken,
        subscription: &Subscription,
        envelope: &Envelope,
    ) -> DeliveryOutcome {
        deliver_with_retry(&self.ctx, cancel, subscription.chat_id, subscription, envelope).await
    }

    /// Dispatch a `test_webhook` envelope to every subscription of the chat.
    pub async fn send_test(&self, chat_id: ChatId, message: impl Into<String>) -> Deliveries {
        self.send_all(chat_id, Envelope::test(message)).await
    }

    /// Cancel every in-flight delivery started through this dispatcher.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    fn spawn(
        &self,
        cancel: CancellationToken,
        chat_id: ChatId,
        subscription: Subscription,
        envelope: Arc<Envelope>,
    ) -> JoinHandle<DeliveryOutcome> {
        let ctx = self.ctx.clone();
        tokio::spawn(async move {
            deliver_with_retry(&ctx, &cancel, chat_id, &subscription, &envelope).await
        })
    }
}

/// Handles to the delivery tasks spawned by one fan-out.
///
/// Dropping it detaches the tasks; they still run to completion.
#[derive(Debug, Default)]
pub struct Deliveries {
    handles: Vec<JoinHandle<DeliveryOutcome>>,
}

impl Deliveries {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every task. Tasks that panicked are logged and skipped.
    pub async fn join(self) -> Vec<DeliveryOutcome> {
        let mut outcomes = Vec::with_capacity(self.handles.len());
        for handle in self.handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => tracing::error!(error = %err, "webhook delivery task failed"),
            }
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BoundedCache;
    use crate::clock::MockClock;
    use crate::error::FailureReason;
    use crate::storage::InMemoryStore;
    use crate::worker::tests::ScriptedTransport;
    use crate::worker::OutboundRequest;
    use async_trait::async_trait;

    /// Fails for one URL, succeeds for the rest.
    struct SplitTransport {
        failing_url: String,
        calls: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for SplitTransport {
        async fn post(&self, request: &OutboundRequest) -> Result<u16, FailureReason> {
            self.calls.lock().unwrap().push(request.url.clone());
            if request.url == self.failing_url {
                Err(FailureReason::Network("connection refused".into()))
            } else {
                Ok(200)
            }
        }
    }

    fn config() -> DispatcherConfig {
        DispatcherConfig {
            max_attempts: 3,
            backoff_unit: Duration::from_secs(1),
            max_failures: 5,
            ..DispatcherConfig::default()
        }
    }

    async fn store_with(subs: &[Subscription]) -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        for sub in subs {
            store.insert(sub).await.unwrap();
        }
        store
    }

    #[tokio::test(start_paused = true)]
    async fn one_failing_subscription_does_not_affect_another() {
        let good = Subscription::new(ChatId(1), "https://good.example/hook", "secret-a");
        let bad = Subscription::new(ChatId(1), "https://bad.example/hook", "secret-b");
        let store = store_with(&[good.clone(), bad.clone()]).await;
        let transport = Arc::new(SplitTransport {
            failing_url: bad.url.clone(),
            calls: Default::default(),
        });
        let dispatcher = Dispatcher::with_transport(config(), store, transport.clone());

        let deliveries = dispatcher.send_all(ChatId(1), Envelope::test("hi")).await;
        assert_eq!(deliveries.len(), 2);
        let outcomes = deliveries.join().await;

        assert!(outcomes.contains(&DeliveryOutcome::Delivered { attempts: 1 }));
        assert!(outcomes.contains(&DeliveryOutcome::Failed(FailureReason::Network("connection refused".into()))));
        assert_eq!(dispatcher.failures().count(&good.id), 0);
        assert_eq!(dispatcher.failures().count(&bad.id), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn five_failures_then_sixth_attempt_is_discarded_without_network() {
        let sub = Subscription::new(ChatId(9), "https://down.example/hook", "secret");
        let store = store_with(&[sub.clone()]).await;
        let transport = Arc::new(ScriptedTransport::new(vec![Err(FailureReason::Status(500))]));
        let dispatcher = Dispatcher::with_transport(config(), store, transport.clone());
        let cancel = CancellationToken::new();

        let first = dispatcher.send_with_retry(&cancel, &sub, &Envelope::test("a")).await;
        assert_eq!(first, DeliveryOutcome::Failed(FailureReason::Status(500)));
        let second = dispatcher.send_with_retry(&cancel, &sub, &Envelope::test("b")).await;
        assert_eq!(second, DeliveryOutcome::Discarded);
        assert_eq!(transport.call_count(), 5);

        let third = dispatcher.send_with_retry(&cancel, &sub, &Envelope::test("c")).await;
        assert_eq!(third, DeliveryOutcome::Discarded);
        assert_eq!(transport.call_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn delivery_resumes_after_cooling_off() {
        let clock = MockClock::default();
        let ttl = Duration::from_secs(600);
        let cache = BoundedCache::new(16)
            .with_ttl(ttl)
            .with_clock(Arc::new(clock.clone()));
        let failures = FailureTracker::with_cache(Arc::new(cache), 5);

        let sub = Subscription::new(ChatId(9), "https://flaky.example/hook", "secret");
        let store = store_with(&[sub.clone()]).await;
        let mut script = vec![Err(FailureReason::Status(503)); 5];
        script.push(Ok(200));
        let transport = Arc::new(ScriptedTransport::new(script));
        let config = DispatcherConfig {
            max_attempts: 5,
            ..config()
        };
        let dispatcher = Dispatcher::with_parts(config, store, transport.clone(), failures);
        let cancel = CancellationToken::new();

        let first = dispatcher.send_with_retry(&cancel, &sub, &Envelope::test("a")).await;
        assert_eq!(first, DeliveryOutcome::Failed(FailureReason::Status(503)));
        assert_eq!(dispatcher.failures().count(&sub.id), 5);

        let second = dispatcher.send_with_retry(&cancel, &sub, &Envelope::test("b")).await;
        assert_eq!(second, DeliveryOutcome::Discarded);
        assert_eq!(transport.call_count(), 5);

        clock.advance(ttl + Duration::from_secs(1));

        let third = dispatcher.send_with_retry(&cancel, &sub, &Envelope::test("c")).await;
        assert_eq!(third, DeliveryOutcome::Delivered { attempts: 1 });
        assert_eq!(transport.call_count(), 6);
        assert_eq!(dispatcher.failures().count(&sub.id), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn send_all_returns_before_delivery_completes() {
        let sub = Subscription::new(ChatId(3), "https://slow.example/hook", "secret");
        let store = store_with(&[sub]).await;
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(200)]).with_delay(Duration::from_secs(5)));
        let dispatcher = Dispatcher::with_transport(config(), store, transport.clone());

        let started = tokio::time::Instant::now();
        let deliveries = dispatcher.send_all(ChatId(3), Envelope::test("x")).await;
        assert!(started.elapsed() < Duration::from_secs(5));

        let outcomes = deliveries.join().await;
        assert_eq!(outcomes, vec![DeliveryOutcome::Delivered { attempts: 1 }]);
    }

    #[tokio::test(start_paused = true)]
    async fn chat_without_subscriptions_spawns_nothing() {
        let store = store_with(&[]).await;
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(200)]));
        let dispatcher = Dispatcher::with_transport(config(), store, transport.clone());

        let deliveries = dispatcher.send_test(ChatId(1), "ping").await;

        assert!(deliveries.is_empty());
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn send_message_is_never_dispatched() {
        let sub = Subscription::new(ChatId(1), "https://a.example/hook", "secret");
        let store = store_with(&[sub]).await;
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(200)]));
        let dispatcher = Dispatcher::with_transport(config(), store, transport.clone());

        let envelope = Envelope::SendMessage(crate::envelope::SendMessagePayload {
            message: "hello".into(),
            user_name: None,
        });
        let deliveries = dispatcher.send_all(ChatId(1), envelope).await;

        assert!(deliveries.is_empty());
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_abandons_pending_retries() {
        let sub = Subscription::new(ChatId(1), "https://a.example/hook", "secret");
        let store = store_with(&[sub]).await;
        let transport = Arc::new(ScriptedTransport::new(vec![Err(FailureReason::Status(502))]));
        let dispatcher = Dispatcher::with_transport(config(), store, transport.clone());

        let deliveries = dispatcher.send_all(ChatId(1), Envelope::test("x")).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        dispatcher.shutdown();

        assert_eq!(deliveries.join().await, vec![DeliveryOutcome::Cancelled]);
        assert_eq!(transport.call_count(), 1);
        assert!(!dispatcher.is_running());
    }
}
