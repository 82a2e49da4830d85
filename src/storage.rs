use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::types::{ChatId, Subscription, SubscriptionId};

/// Persistence for registered subscriptions.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn get(&self, id: &SubscriptionId) -> Result<Option<Subscription>, StoreError>;
    async fn list_for_chat(&self, chat_id: ChatId) -> Result<Vec<Subscription>, StoreError>;
    async fn insert(&self, subscription: &Subscription) -> Result<(), StoreError>;
    /// Returns whether a subscription was removed.
    async fn delete(&self, id: &SubscriptionId) -> Result<bool, StoreError>;
}

/// Lookup of the chat that owns an event record.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn owning_chat(&self, event_id: &str) -> Result<Option<ChatId>, StoreError>;
}

/// In-memory storage for tests and lightweight deployments.
#[derive(Default)]
pub struct InMemoryStore {
    subscriptions: Mutex<HashMap<SubscriptionId, Subscription>>,
    events: Mutex<HashMap<String, ChatId>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_event(&self, event_id: impl Into<String>, chat_id: ChatId) {
        self.events.lock().await.insert(event_id.into(), chat_id);
    }
}

#[async_trait]
impl SubscriptionStore for InMemoryStore {
    async fn get(&self, id: &SubscriptionId) -> Result<Option<Subscription>, StoreError> {
        Ok(self.subscriptions.lock().await.get(id).cloned())
    }

    async fn list_for_chat(&self, chat_id: ChatId) -> Result<Vec<Subscription>, StoreError> {
        let guard = self.subscriptions.lock().await;
        let mut subscriptions: Vec<Subscription> = guard
            .values()
            .filter(|s| s.chat_id == chat_id)
            .cloned()
            .collect();
        subscriptions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(subscriptions)
    }

    async fn insert(&self, subscription: &Subscription) -> Result<(), StoreError> {
        self.subscriptions
            .lock()
            .await
            .insert(subscription.id.clone(), subscription.clone());
        Ok(())
    }

    async fn delete(&self, id: &SubscriptionId) -> Result<bool, StoreError> {
        Ok(self.subscriptions.lock().await.remove(id).is_some())
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    async fn owning_chat(&self, event_id: &str) -> Result<Option<ChatId>, StoreError> {
        Ok(self.events.lock().await.get(event_id).copied())
    }
}
