use std::net::IpAddr;
use std::sync::Arc;

use axum::http::Uri;
use rand::RngCore;

use crate::error::RegistrationError;
use crate::storage::SubscriptionStore;
use crate::types::{ChatId, Subscription, SubscriptionId};

/// Random bytes behind a generated secret; hex doubles the length.
pub const GENERATED_SECRET_BYTES: usize = 32;

/// Hex-encoded secret of `bytes` random bytes.
pub fn generate_secret(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Absolute http(s) URL with a host.
pub fn is_valid_url(url: &str) -> bool {
    let Ok(uri) = url.parse::<Uri>() else {
        return false;
    };
    let scheme_ok = matches!(uri.scheme_str(), Some("http") | Some("https"));
    scheme_ok && uri.host().is_some_and(|host| !host.is_empty())
}

/// Loopback or private-range destination.
pub fn is_local_url(url: &str) -> bool {
    let Ok(uri) = url.parse::<Uri>() else {
        return false;
    };
    let Some(host) = uri.host() else {
        return false;
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');

    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }

    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => ip.is_loopback() || ip.is_private(),
        Ok(IpAddr::V6(ip)) => ip.is_loopback(),
        Err(_) => false,
    }
}

/// Creates and removes subscriptions.
pub struct Registry {
    store: Arc<dyn SubscriptionStore>,
    min_secret_len: usize,
    allow_local: bool,
}

impl Registry {
    pub fn new(store: Arc<dyn SubscriptionStore>, min_secret_len: usize, allow_local: bool) -> Self {
        Self {
            store,
            min_secret_len,
            allow_local,
        }
    }

    /// Register `url` for `chat_id` with a freshly generated secret.
    pub async fn register(
        &self,
        chat_id: ChatId,
        thread_id: Option<i64>,
        url: &str,
    ) -> Result<Subscription, RegistrationError> {
        let secret = generate_secret(GENERATED_SECRET_BYTES.max(self.min_secret_len.div_ceil(2)));
        self.register_with_secret(chat_id, thread_id, url, secret).await
    }

    pub async fn register_with_secret(
        &self,
        chat_id: ChatId,
        thread_id: Option<i64>,
        url: &str,
        secret: String,
    ) -> Result<Subscription, RegistrationError> {
        if !is_valid_url(url) {
            return Err(RegistrationError::InvalidUrl(url.to_string()));
        }
        if !self.allow_local && is_local_url(url) {
            return Err(RegistrationError::LocalUrl(url.to_string()));
        }
        if secret.len() < self.min_secret_len {
            return Err(RegistrationError::SecretTooShort {
                min: self.min_secret_len,
                actual: secret.len(),
            });
        }

        let mut subscription = Subscription::new(chat_id, url, secret);
        subscription.thread_id = thread_id;
        self.store.insert(&subscription).await?;

        tracing::info!(chat_id = %chat_id, subscription = %subscription.id, url, "webhook registered");
        Ok(subscription)
    }

    /// Returns whether the subscription existed.
    pub async fn unregister(&self, id: &SubscriptionId) -> Result<bool, RegistrationError> {
        let removed = self.store.delete(id).await?;
        if removed {
            tracing::info!(subscription = %id, "webhook unregistered");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;

    #[test]
    fn generated_secret_is_hex_of_requested_size() {
        let secret = generate_secret(32);
        assert_eq!(secret.len(), 64);
        assert!(secret.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(secret, generate_secret(32));
    }

    #[test]
    fn url_validation() {
        assert!(is_valid_url("https://example.com/hook"));
        assert!(is_valid_url("http://example.com:8080"));
        assert!(!is_valid_url("ftp://example.com"));
        assert!(!is_valid_url("/relative/path"));
        assert!(!is_valid_url("not a url"));
    }

    #[test]
    fn local_url_detection() {
        assert!(is_local_url("http://localhost:3000/hook"));
        assert!(is_local_url("http://127.0.0.1/hook"));
        assert!(is_local_url("http://[::1]:8080/hook"));
        assert!(is_local_url("http://10.1.2.3/hook"));
        assert!(is_local_url("http://172.20.0.1/hook"));
        assert!(is_local_url("http://192.168.1.10/hook"));
        assert!(!is_local_url("http://8.8.8.8/hook"));
        assert!(!is_local_url("https://example.com/hook"));
    }

    #[tokio::test]
    async fn register_persists_subscription_with_long_secret() {
        let store = Arc::new(InMemoryStore::new());
        let registry = Registry::new(store.clone(), 32, false);

        let sub = registry
            .register(ChatId(5), Some(11), "https://example.com/hook")
            .await
            .unwrap();

        assert!(sub.secret.len() >= 32);
        assert_eq!(sub.thread_id, Some(11));
        assert!(store.get(&sub.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn short_secret_is_rejected() {
        let registry = Registry::new(Arc::new(InMemoryStore::new()), 32, false);

        let err = registry
            .register_with_secret(ChatId(5), None, "https://example.com/hook", "short".into())
            .await
            .unwrap_err();

        assert_eq!(err, RegistrationError::SecretTooShort { min: 32, actual: 5 });
    }

    #[tokio::test]
    async fn local_url_needs_opt_in() {
        let store = Arc::new(InMemoryStore::new());
        let strict = Registry::new(store.clone(), 8, false);
        let relaxed = Registry::new(store, 8, true);

        assert!(matches!(
            strict.register(ChatId(1), None, "http://127.0.0.1:9000/hook").await,
            Err(RegistrationError::LocalUrl(_))
        ));
        assert!(relaxed.register(ChatId(1), None, "http://127.0.0.1:9000/hook").await.is_ok());
    }

    #[tokio::test]
    async fn unregister_removes() {
        let registry = Registry::new(Arc::new(InMemoryStore::new()), 8, false);
        let sub = registry.register(ChatId(1), None, "https://example.com/hook").await.unwrap();

        assert!(registry.unregister(&sub.id).await.unwrap());
        assert!(!registry.unregister(&sub.id).await.unwrap());
    }
}
