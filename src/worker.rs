use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::DispatcherConfig;
use crate::envelope::Envelope;
use crate::error::{DeliveryOutcome, FailureReason};
use crate::failures::FailureTracker;
use crate::signing::{build_signature_headers, SignatureHeaders};
use crate::types::{ChatId, Subscription};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

/// One signed POST to a subscriber.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub url: String,
    pub headers: SignatureHeaders,
    pub body: Vec<u8>,
    pub timeout: Duration,
}

/// Sends outbound requests and reports the response status.
///
/// Any status is returned as `Ok`; classification happens in the retry loop.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post(&self, request: &OutboundRequest) -> Result<u16, FailureReason>;
}

/// [`Transport`] backed by a shared `reqwest` client.
#[cfg(feature = "http")]
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, request: &OutboundRequest) -> Result<u16, FailureReason> {
        let mut builder = self
            .client
            .post(&request.url)
            .timeout(request.timeout)
            .header("Content-Type", "application/json")
            .body(request.body.clone());

        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }

        match builder.send().await {
            Ok(response) => Ok(response.status().as_u16()),
            Err(err) if err.is_timeout() => Err(FailureReason::Timeout),
            Err(err) => Err(FailureReason::Network(err.to_string())),
        }
    }
}

/// Shared state for every delivery task.
pub(crate) struct DeliveryContext {
    pub transport: std::sync::Arc<dyn Transport>,
    pub failures: FailureTracker,
    pub config: DispatcherConfig,
}

/// Deliver `envelope` to one subscription: sign, send, classify, retry.
///
/// Attempts are strictly sequential. After failed attempt `k` the task sleeps
/// `k * backoff_unit` before attempt `k + 1`. The failure threshold is checked
/// before every attempt, so a subscription that crosses it mid-loop stops
/// without further requests. Cancellation abandons the loop without recording
/// a failure.
pub(crate) async fn deliver_with_retry(
    ctx: &DeliveryContext,
    cancel: &CancellationToken,
    chat_id: ChatId,
    subscription: &Subscription,
    envelope: &Envelope,
) -> DeliveryOutcome {
    let body = match envelope.to_bytes() {
        Ok(body) => body,
        Err(err) => {
            ctx.failures.record_failure(&subscription.id);
            tracing::error!(chat_id = %chat_id, url = %subscription.url, error = %err, "could not serialize envelope");
            return DeliveryOutcome::Failed(FailureReason::Serialization(err.to_string()));
        }
    };

    let max_attempts = ctx.config.max_attempts.max(1);
    let mut last_failure = FailureReason::Timeout;

    for attempt in 1..=max_attempts {
        if ctx.failures.should_discard(&subscription.id) {
            metric_inc("webhook.delivery.discarded");
            tracing::info!(
                chat_id = %chat_id,
                attempt,
                url = %subscription.url,
                outcome = "discarded",
                "discarding webhook due to repeated failures"
            );
            return DeliveryOutcome::Discarded;
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return cancelled(chat_id, attempt, subscription),
            result = attempt_once(ctx, subscription, &body) => result,
        };

        match result {
            Ok(status) => {
                metric_inc("webhook.delivery.success");
                tracing::info!(
                    chat_id = %chat_id,
                    attempt,
                    url = %subscription.url,
                    status,
                    outcome = "delivered",
                    "webhook attempt"
                );
                return DeliveryOutcome::Delivered { attempts: attempt };
            }
            Err(reason) => {
                let failures = ctx.failures.record_failure(&subscription.id);
                metric_inc("webhook.delivery.failure");
                tracing::warn!(
                    chat_id = %chat_id,
                    attempt,
                    url = %subscription.url,
                    failures,
                    outcome = %reason,
                    "webhook attempt"
                );
                last_failure = reason;
            }
        }

        if attempt < max_attempts {
            let delay = ctx.config.backoff_unit.saturating_mul(attempt);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return cancelled(chat_id, attempt, subscription),
                _ = sleep(delay) => {}
            }
        }
    }

    metric_inc("webhook.delivery.failed");
    tracing::warn!(
        chat_id = %chat_id,
        url = %subscription.url,
        attempts = max_attempts,
        error = %last_failure,
        "giving up on webhook"
    );
    DeliveryOutcome::Failed(last_failure)
}

/// A single signed attempt, bounded by the per-attempt timeout.
async fn attempt_once(
    ctx: &DeliveryContext,
    subscription: &Subscription,
    body: &[u8],
) -> Result<u16, FailureReason> {
    let request = OutboundRequest {
        url: subscription.url.clone(),
        headers: build_signature_headers(subscription.secret.as_bytes(), body, Utc::now()),
        body: body.to_vec(),
        timeout: ctx.config.attempt_timeout,
    };

    let status = tokio::time::timeout(ctx.config.attempt_timeout, ctx.transport.post(&request))
        .await
        .map_err(|_| FailureReason::Timeout)??;

    if (200..300).contains(&status) {
        Ok(status)
    } else {
        Err(FailureReason::Status(status))
    }
}

fn cancelled(chat_id: ChatId, attempt: u32, subscription: &Subscription) -> DeliveryOutcome {
    metric_inc("webhook.delivery.cancelled");
    tracing::info!(
        chat_id = %chat_id,
        attempt,
        url = %subscription.url,
        outcome = "cancelled",
        "webhook attempt"
    );
    DeliveryOutcome::Cancelled
}
