//! Inbound webhook surface.
//!
//! `POST /webhooks/{webhook_id}` runs the [`verifier`](crate::verifier)
//! chain, decodes the envelope and hands it to the business collaborators.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::routing::post;
use axum::{middleware, Extension, Json, Router};
use serde_json::{json, Value};
use tower::ServiceBuilder;

use crate::envelope::{Envelope, SendMessagePayload};
use crate::error::{EnvelopeError, HandlerError, VerificationError};
use crate::ratelimit::RateLimiter;
use crate::storage::{EventStore, SubscriptionStore};
use crate::types::{ChatId, Subscription, SubscriptionId};
use crate::verifier::{self, VerifiedWebhook, VerifierConfig};

/// Applies verified envelopes to the bot's own records.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, subscription: &Subscription, envelope: Envelope) -> Result<(), HandlerError>;
}

/// Posts text into a chat.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, chat_id: ChatId, thread_id: Option<i64>, text: &str) -> Result<(), HandlerError>;
}

#[derive(Clone)]
pub struct AppState {
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub events: Arc<dyn EventStore>,
    pub limiter: Arc<RateLimiter>,
    pub handler: Arc<dyn InboundHandler>,
    pub messenger: Arc<dyn Messenger>,
    pub verifier: VerifierConfig,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhooks/{webhook_id}", post(listen_webhook))
        .route_layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn_with_state(state.clone(), verifier::rate_limit))
                .layer(middleware::from_fn_with_state(state.clone(), verifier::verify_signature))
                .layer(middleware::from_fn_with_state(state.clone(), verifier::check_ownership)),
        )
        .with_state(state)
}

async fn listen_webhook(
    State(state): State<AppState>,
    Extension(verified): Extension<VerifiedWebhook>,
) -> Result<Json<Value>, VerificationError> {
    let subscription = &verified.subscription;

    let envelope = Envelope::decode(&verified.body).map_err(|err| {
        tracing::warn!(webhook_id = %subscription.id, error = %err, "could not decode inbound webhook");
        match err {
            EnvelopeError::Malformed(_) => VerificationError::InvalidPayload,
            EnvelopeError::Unsupported(kind) => VerificationError::UnsupportedType(kind),
        }
    })?;

    tracing::info!(
        webhook_id = %subscription.id,
        chat_id = %subscription.chat_id,
        kind = %envelope.kind(),
        "received webhook"
    );

    apply_envelope(state.handler.as_ref(), state.messenger.as_ref(), subscription, envelope).await?;

    Ok(Json(json!({ "message": "Webhook received." })))
}

/// Route one decoded envelope to the handler or the messenger.
pub async fn apply_envelope(
    handler: &dyn InboundHandler,
    messenger: &dyn Messenger,
    subscription: &Subscription,
    envelope: Envelope,
) -> Result<(), VerificationError> {
    let result = match envelope {
        Envelope::NewEvent(mut payload) => {
            if payload.chat_id == 0 {
                payload.chat_id = subscription.chat_id.0;
            }
            if payload.chat_id != subscription.chat_id.0 {
                tracing::warn!(
                    webhook_id = %subscription.id,
                    payload_chat = payload.chat_id,
                    expected_chat = %subscription.chat_id,
                    "new_event targets another chat"
                );
                return Err(VerificationError::Forbidden);
            }
            handler.handle(subscription, Envelope::NewEvent(payload)).await
        }
        Envelope::SendMessage(payload) => {
            let text = bot_message(&subscription.id, &payload);
            messenger
                .send(subscription.chat_id, subscription.thread_id, &text)
                .await
        }
        Envelope::TestWebhook(payload) => {
            tracing::info!(webhook_id = %subscription.id, text = %payload.message, "test webhook");
            Ok(())
        }
        other => handler.handle(subscription, other).await,
    };

    result.map_err(|err| {
        tracing::error!(webhook_id = %subscription.id, error = %err, "inbound webhook handler failed");
        VerificationError::from(err)
    })
}

/// `🤖[abc @user] text`, tagged with the first three characters of the webhook id.
pub fn bot_message(id: &SubscriptionId, payload: &SendMessagePayload) -> String {
    let prefix: String = id.as_str().chars().take(3).collect();
    let user = payload
        .user_name
        .as_deref()
        .map(|name| format!(" @{}", name))
        .unwrap_or_default();
    format!("🤖[{}{}] {}", prefix, user, payload.message)
}
