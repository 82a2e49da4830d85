use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a chat the bot lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Public identifier of a subscription, embedded in the inbound callback path.
///
/// This is a strongly-typed wrapper to avoid accidental mixing
/// of subscription IDs with other string identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub String);

impl SubscriptionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered external callback bound to a chat.
///
/// The secret is shared with the subscriber and signs traffic in both
/// directions.
#[derive(Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,

    /// Chat whose events are delivered to `url`.
    pub chat_id: ChatId,

    /// Forum topic inside the chat, when the subscription was created in one.
    pub thread_id: Option<i64>,

    pub url: String,

    pub secret: String,

    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn new(chat_id: ChatId, url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: SubscriptionId::generate(),
            chat_id,
            thread_id: None,
            url: url.into(),
            secret: secret.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = SubscriptionId(id.into());
        self
    }

    pub fn with_thread_id(mut self, thread_id: i64) -> Self {
        self.thread_id = Some(thread_id);
        self
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("chat_id", &self.chat_id)
            .field("thread_id", &self.thread_id)
            .field("url", &self.url)
            .field("secret", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_secret() {
        let sub = Subscription::new(ChatId(1), "https://example.com/hook", "topsecretvalue");
        let rendered = format!("{:?}", sub);

        assert!(!rendered.contains("topsecretvalue"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(SubscriptionId::generate(), SubscriptionId::generate());
    }
}
