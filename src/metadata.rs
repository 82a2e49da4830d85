//! Memoization of board-game metadata lookups.
//!
//! The upstream client is a collaborator; only its result shape and the
//! caching around it live here. Lookups are idempotent, so the cache has no
//! TTL and only bounds memory.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cache::{BoundedCache, Cache};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameMetadata {
    pub name: Option<String>,
    pub url: Option<String>,
    pub image_url: Option<String>,
    pub max_players: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataError(pub String);

impl fmt::Display for MetadataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "metadata lookup failed: {}", self.0)
    }
}

impl std::error::Error for MetadataError {}

/// Upstream game metadata client.
#[async_trait]
pub trait MetadataLookup: Send + Sync {
    /// `fallback_name` is used when the upstream record has no name.
    async fn game_info(&self, id: i64, fallback_name: &str) -> Result<GameMetadata, MetadataError>;
}

/// [`MetadataLookup`] that answers from a bounded cache before asking upstream.
pub struct CachedMetadata<L> {
    lookup: L,
    cache: Arc<dyn Cache<String, GameMetadata>>,
}

impl<L: MetadataLookup> CachedMetadata<L> {
    pub fn new(lookup: L, capacity: usize) -> Self {
        Self::with_cache(lookup, Arc::new(BoundedCache::new(capacity)))
    }

    pub fn with_cache(lookup: L, cache: Arc<dyn Cache<String, GameMetadata>>) -> Self {
        Self { lookup, cache }
    }

    fn cache_key(id: i64) -> String {
        format!("bgg_info_{}", id)
    }
}

#[async_trait]
impl<L: MetadataLookup> MetadataLookup for CachedMetadata<L> {
    async fn game_info(&self, id: i64, fallback_name: &str) -> Result<GameMetadata, MetadataError> {
        let key = Self::cache_key(id);
        if let Some(info) = self.cache.get(&key) {
            return Ok(info);
        }

        let info = self.lookup.game_info(id, fallback_name).await?;

        if let Err(err) = self.cache.set(key, info.clone()) {
            tracing::warn!(game_id = id, error = %err, "failed to cache game metadata");
        }

        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingLookup {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl MetadataLookup for CountingLookup {
        async fn game_info(&self, id: i64, fallback_name: &str) -> Result<GameMetadata, MetadataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(MetadataError("upstream unavailable".into()));
            }
            Ok(GameMetadata {
                name: Some(fallback_name.to_string()),
                url: Some(format!("https://boardgamegeek.com/boardgame/{}", id)),
                image_url: None,
                max_players: Some(4),
            })
        }
    }

    #[tokio::test]
    async fn second_lookup_is_served_from_cache() {
        let cached = CachedMetadata::new(CountingLookup::default(), 10);

        let first = cached.game_info(13, "Catan").await.unwrap();
        let second = cached.game_info(13, "ignored").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(cached.lookup.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let cached = CachedMetadata::new(
            CountingLookup {
                fail: true,
                ..Default::default()
            },
            10,
        );

        assert!(cached.game_info(1, "x").await.is_err());
        assert!(cached.game_info(1, "x").await.is_err());
        assert_eq!(cached.lookup.calls.load(Ordering::SeqCst), 2);
    }

    struct RejectingCache;

    impl Cache<String, GameMetadata> for RejectingCache {
        fn get(&self, _key: &String) -> Option<GameMetadata> {
            None
        }

        fn set(&self, _key: String, _value: GameMetadata) -> Result<(), CacheError> {
            Err(CacheError::Poisoned)
        }
    }

    #[tokio::test]
    async fn cache_write_failure_still_returns_value() {
        let cached = CachedMetadata::with_cache(CountingLookup::default(), Arc::new(RejectingCache));

        let info = cached.game_info(7, "Azul").await.unwrap();

        assert_eq!(info.name.as_deref(), Some("Azul"));
    }
}
