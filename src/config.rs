//! Service configuration read from the process environment.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::dispatcher::DispatcherConfig;
use crate::error::ConfigError;
use crate::metadata::{CachedMetadata, MetadataLookup};
use crate::ratelimit::RateLimitConfig;
use crate::registry::Registry;
use crate::storage::SubscriptionStore;
use crate::verifier::VerifierConfig;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub http_timeout: Duration,
    pub http_max_attempts: u32,
    pub http_backoff_unit: Duration,
    pub failure_expiration: Duration,
    pub max_failure_attempts: u32,
    pub failure_cache_capacity: usize,
    pub metadata_cache_capacity: usize,
    pub rate_limit_rps: u32,
    pub rate_limit_burst: u32,
    pub rate_limit_idle_ttl: Duration,
    pub min_secret_length: usize,
    /// Accept loopback and private-range callback URLs.
    pub allow_local_webhooks: bool,
    pub max_body_bytes: usize,
    /// Callback registered at startup, if any.
    pub webhook_url: Option<String>,
    pub webhook_chat_id: i64,
}

impl Default for Config {
    fn default() -> Self {
        let dispatcher = DispatcherConfig::default();
        let limits = RateLimitConfig::default();
        let verifier = VerifierConfig::default();
        Self {
            port: 8080,
            http_timeout: dispatcher.attempt_timeout,
            http_max_attempts: dispatcher.max_attempts,
            http_backoff_unit: dispatcher.backoff_unit,
            failure_expiration: dispatcher.failure_ttl,
            max_failure_attempts: dispatcher.max_failures,
            failure_cache_capacity: dispatcher.failure_cache_capacity,
            metadata_cache_capacity: 1_000,
            rate_limit_rps: limits.refill_per_sec,
            rate_limit_burst: limits.burst,
            rate_limit_idle_ttl: limits.idle_ttl,
            min_secret_length: 32,
            allow_local_webhooks: false,
            max_body_bytes: verifier.max_body_bytes,
            webhook_url: None,
            webhook_chat_id: 0,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Ok(Self {
            port: number(&lookup, "PORT", defaults.port)?,
            http_timeout: duration(&lookup, "HTTP_TIMEOUT", defaults.http_timeout)?,
            http_max_attempts: positive(&lookup, "HTTP_MAX_ATTEMPT", defaults.http_max_attempts)?,
            http_backoff_unit: duration(&lookup, "HTTP_BACKOFF_UNIT", defaults.http_backoff_unit)?,
            failure_expiration: duration(&lookup, "FAILURE_EXPIRATION", defaults.failure_expiration)?,
            max_failure_attempts: positive(&lookup, "MAX_FAILURE_ATTEMPTS", defaults.max_failure_attempts)?,
            failure_cache_capacity: positive(&lookup, "FAILURE_CACHE_CAPACITY", defaults.failure_cache_capacity)?,
            metadata_cache_capacity: positive(&lookup, "METADATA_CACHE_CAPACITY", defaults.metadata_cache_capacity)?,
            rate_limit_rps: positive(&lookup, "RATE_LIMIT_RPS", defaults.rate_limit_rps)?,
            rate_limit_burst: positive(&lookup, "RATE_LIMIT_BURST", defaults.rate_limit_burst)?,
            rate_limit_idle_ttl: duration(&lookup, "RATE_LIMIT_IDLE_TTL", defaults.rate_limit_idle_ttl)?,
            min_secret_length: number(&lookup, "MIN_SECRET_LENGTH", defaults.min_secret_length)?,
            allow_local_webhooks: flag(&lookup, "ALLOW_LOCAL_WEBHOOKS", defaults.allow_local_webhooks)?,
            max_body_bytes: number(&lookup, "MAX_BODY_BYTES", defaults.max_body_bytes)?,
            webhook_url: lookup("WEBHOOK_URL").filter(|url| !url.trim().is_empty()),
            webhook_chat_id: number(&lookup, "WEBHOOK_CHAT_ID", defaults.webhook_chat_id)?,
        })
    }

    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            max_attempts: self.http_max_attempts,
            attempt_timeout: self.http_timeout,
            backoff_unit: self.http_backoff_unit,
            max_failures: self.max_failure_attempts,
            failure_ttl: self.failure_expiration,
            failure_cache_capacity: self.failure_cache_capacity,
        }
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            refill_per_sec: self.rate_limit_rps,
            burst: self.rate_limit_burst,
            idle_ttl: self.rate_limit_idle_ttl,
        }
    }

    pub fn verifier(&self) -> VerifierConfig {
        VerifierConfig {
            max_body_bytes: self.max_body_bytes,
            ..VerifierConfig::default()
        }
    }

    pub fn registry(&self, store: Arc<dyn SubscriptionStore>) -> Registry {
        Registry::new(store, self.min_secret_length, self.allow_local_webhooks)
    }

    pub fn metadata<L: MetadataLookup>(&self, lookup: L) -> CachedMetadata<L> {
        CachedMetadata::new(lookup, self.metadata_cache_capacity)
    }
}

fn number<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

/// A count that must be at least one.
fn positive<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Default + PartialEq,
{
    match lookup(key) {
        Some(value) => match value.trim().parse::<T>() {
            Ok(parsed) if parsed != T::default() => Ok(parsed),
            _ => Err(ConfigError::Invalid { key, value }),
        },
        None => Ok(default),
    }
}

fn duration<F>(lookup: &F, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => humantime::parse_duration(value.trim())
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

fn flag<F>(lookup: &F, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            _ => Err(ConfigError::Invalid { key, value }),
        },
        None => Ok(default),
    }
}
