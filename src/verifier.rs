//! Ordered checks applied to every inbound webhook call.
//!
//! Each step is an `axum` middleware and rejects with a JSON error that
//! stops the chain:
//!
//! 1. rate limit per webhook id (429)
//! 2. subscription lookup (400)
//! 3. body capture, buffered for downstream re-reads
//! 4. date header present (400)
//! 5. content hash matches the body (400)
//! 6. signature matches, compared in constant time (401)
//! 7. date within the replay window (401)
//! 8. any `data.event_id` belongs to the subscription's chat (400/403)

use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Path, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

use crate::error::VerificationError;
use crate::server::AppState;
use crate::signing::{
    content_hash, is_timestamp_fresh, parse_http_date, signature_matches, CONTENT_HASH_HEADER,
    DATE_HEADER, SIGNATURE_HEADER,
};
use crate::types::{Subscription, SubscriptionId};

#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Maximum accepted distance between the date header and now.
    pub replay_window: Duration,
    /// Largest body captured for hashing.
    pub max_body_bytes: usize,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            replay_window: Duration::from_secs(2 * 60),
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Request extension set once signature checks pass.
#[derive(Debug, Clone)]
pub struct VerifiedWebhook {
    pub subscription: Subscription,
    /// The exact bytes that were hashed and signed.
    pub body: Bytes,
}

impl IntoResponse for VerificationError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub async fn rate_limit(
    State(state): State<AppState>,
    Path(webhook_id): Path<String>,
    req: Request,
    next: Next,
) -> Result<Response, VerificationError> {
    if !state.limiter.allow(&webhook_id).await {
        tracing::warn!(webhook_id = %webhook_id, "inbound webhook rate limited");
        return Err(VerificationError::RateLimited);
    }
    Ok(next.run(req).await)
}

pub async fn verify_signature(
    State(state): State<AppState>,
    Path(webhook_id): Path<String>,
    req: Request,
    next: Next,
) -> Result<Response, VerificationError> {
    let id = SubscriptionId(webhook_id);
    let subscription = match state.subscriptions.get(&id).await {
        Ok(Some(subscription)) => subscription,
        Ok(None) => return Err(reject(&id, VerificationError::UnknownSubscription)),
        Err(err) => {
            tracing::error!(webhook_id = %id, error = %err, "subscription lookup failed");
            return Err(VerificationError::UnknownSubscription);
        }
    };

    let (parts, body) = req.into_parts();
    let body = axum::body::to_bytes(body, state.verifier.max_body_bytes)
        .await
        .map_err(|_| reject(&id, VerificationError::InvalidBody))?;

    check_signature(&parts.headers, &body, &subscription, &state.verifier)
        .map_err(|err| reject(&id, err))?;

    tracing::debug!(webhook_id = %id, chat_id = %subscription.chat_id, len = body.len(), "webhook verified");

    let mut req = Request::from_parts(parts, Body::from(body.clone()));
    req.extensions_mut().insert(VerifiedWebhook { subscription, body });
    Ok(next.run(req).await)
}

/// Steps 4 to 7 over already captured bytes.
pub fn check_signature(
    headers: &HeaderMap,
    body: &[u8],
    subscription: &Subscription,
    config: &VerifierConfig,
) -> Result<(), VerificationError> {
    let date = header(headers, DATE_HEADER).ok_or(VerificationError::MissingDate)?;

    let hash = content_hash(body);
    if header(headers, CONTENT_HASH_HEADER) != Some(hash.as_str()) {
        return Err(VerificationError::HashMismatch);
    }

    let signature = header(headers, SIGNATURE_HEADER).ok_or(VerificationError::MissingSignature)?;
    if !signature_matches(subscription.secret.as_bytes(), date, &hash, signature) {
        return Err(VerificationError::InvalidSignature);
    }

    let sent_at = parse_http_date(date).ok_or(VerificationError::InvalidDate)?;
    if !is_timestamp_fresh(sent_at, Utc::now(), config.replay_window) {
        return Err(VerificationError::StaleRequest);
    }

    Ok(())
}

pub async fn check_ownership(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, VerificationError> {
    let Some(verified) = req.extensions().get::<VerifiedWebhook>().cloned() else {
        return Err(VerificationError::UnknownSubscription);
    };
    let id = &verified.subscription.id;

    let envelope: Value = serde_json::from_slice(&verified.body)
        .map_err(|_| reject(id, VerificationError::InvalidPayload))?;

    if let Some(event_id) = envelope.get("data").and_then(|data| data.get("event_id")) {
        let Some(event_id) = event_id.as_str() else {
            return Err(reject(id, VerificationError::InvalidEventId));
        };

        let owner = match state.events.owning_chat(event_id).await {
            Ok(Some(owner)) => owner,
            Ok(None) => return Err(reject(id, VerificationError::InvalidEventId)),
            Err(err) => {
                tracing::error!(webhook_id = %id, error = %err, "failed to load event");
                return Err(VerificationError::InvalidEventId);
            }
        };

        if owner != verified.subscription.chat_id {
            tracing::warn!(
                webhook_id = %id,
                event_chat = %owner,
                expected_chat = %verified.subscription.chat_id,
                "webhook event chat does not match subscription"
            );
            return Err(VerificationError::Forbidden);
        }
    }

    Ok(next.run(req).await)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

fn reject(id: &SubscriptionId, err: VerificationError) -> VerificationError {
    tracing::warn!(webhook_id = %id, reason = %err, "rejected inbound webhook");
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::build_signature_headers;
    use crate::types::ChatId;
    use axum::http::HeaderValue;

    fn signed(sub: &Subscription, body: &[u8], at: chrono::DateTime<Utc>) -> HeaderMap {
        let signature = build_signature_headers(sub.secret.as_bytes(), body, at);
        let mut headers = HeaderMap::new();
        for (name, value) in signature.iter() {
            headers.insert(name, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    fn sub() -> Subscription {
        Subscription::new(ChatId(1), "https://example.com/hook", "0123456789abcdef0123456789abcdef")
    }

    const BODY: &[u8] = br#"{"type":"test_webhook","data":{"message":"x"}}"#;

    #[test]
    fn accepts_fresh_signed_request() {
        let sub = sub();
        let headers = signed(&sub, BODY, Utc::now());
        assert_eq!(check_signature(&headers, BODY, &sub, &VerifierConfig::default()), Ok(()));
    }

    #[test]
    fn correct_signature_with_old_date_is_stale() {
        let sub = sub();
        let headers = signed(&sub, BODY, Utc::now() - chrono::Duration::minutes(3));
        assert_eq!(
            check_signature(&headers, BODY, &sub, &VerifierConfig::default()),
            Err(VerificationError::StaleRequest)
        );
    }

    #[test]
    fn checks_run_in_order() {
        let sub = sub();
        let config = VerifierConfig::default();

        let mut headers = signed(&sub, BODY, Utc::now());
        headers.remove(DATE_HEADER);
        assert_eq!(check_signature(&headers, BODY, &sub, &config), Err(VerificationError::MissingDate));

        let headers = signed(&sub, BODY, Utc::now());
        assert_eq!(
            check_signature(&headers, b"{}", &sub, &config),
            Err(VerificationError::HashMismatch)
        );

        let mut headers = signed(&sub, BODY, Utc::now());
        headers.remove(SIGNATURE_HEADER);
        assert_eq!(check_signature(&headers, BODY, &sub, &config), Err(VerificationError::MissingSignature));

        let other = Subscription::new(ChatId(1), "https://example.com/hook", "another-secret-another-secret-xx");
        let headers = signed(&other, BODY, Utc::now());
        assert_eq!(check_signature(&headers, BODY, &sub, &config), Err(VerificationError::InvalidSignature));
    }

    #[test]
    fn unparsable_date_is_rejected_after_signature() {
        let sub = sub();
        let date = "sometime last week";
        let hash = content_hash(BODY);
        let mut headers = HeaderMap::new();
        headers.insert(DATE_HEADER, HeaderValue::from_static("sometime last week"));
        headers.insert(CONTENT_HASH_HEADER, HeaderValue::from_str(&hash).unwrap());
        let signature = crate::signing::sign_content_hash(sub.secret.as_bytes(), date, &hash);
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(&signature).unwrap());

        assert_eq!(
            check_signature(&headers, BODY, &sub, &VerifierConfig::default()),
            Err(VerificationError::InvalidDate)
        );
    }
}
