//! Signed webhook exchange for a game-night chat bot.
//!
//! Chats register external HTTP callbacks. Domain events (event, game and
//! participant changes) are pushed to every subscription of the chat, and
//! subscribers may call back into the bot through a signed inbound endpoint.
//!
//! ## Guarantees
//! - Every message is signed with the subscription's shared secret
//! - Per-subscription isolation: one slow or failing callback never delays another
//! - Bounded retries, and a cooling-off period for repeatedly failing subscribers
//! - Bounded memory for every cache and rate-limit table
//!
//! ## Non-Guarantees
//! - Durability across restarts
//! - Exactly-once or ordered delivery
//! - Distributed coordination
//!
//! Outbound delivery starts at [`Dispatcher`]; the inbound endpoint is built
//! by [`server::router`].

mod cache;
mod clock;
mod config;
mod dispatcher;
mod error;
mod failures;
mod metadata;
mod observability;
mod ratelimit;
mod registry;
mod storage;
mod types;
mod worker;

pub mod envelope;
pub mod server;
pub mod signing;
pub mod verifier;

pub use cache::{BoundedCache, Cache};
pub use clock::{Clock, MockClock, SystemClock};
pub use config::Config;
pub use dispatcher::{Deliveries, Dispatcher, DispatcherConfig};
pub use envelope::{Envelope, EnvelopeKind};
pub use error::{
    CacheError,
    ConfigError,
    DeliveryOutcome,
    EnvelopeError,
    FailureReason,
    HandlerError,
    RegistrationError,
    StoreError,
    VerificationError,
};
pub use failures::FailureTracker;
pub use metadata::{CachedMetadata, GameMetadata, MetadataError, MetadataLookup};
pub use observability::init_tracing;
pub use ratelimit::{RateLimitConfig, RateLimiter, TokenBucket};
pub use registry::{generate_secret, is_local_url, is_valid_url, Registry, GENERATED_SECRET_BYTES};
pub use storage::{EventStore, InMemoryStore, SubscriptionStore};
pub use types::{ChatId, Subscription, SubscriptionId};
pub use worker::{OutboundRequest, Transport};

#[cfg(feature = "http")]
pub use worker::HttpTransport;
