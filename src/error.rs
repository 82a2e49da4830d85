use std::fmt;

use axum::http::StatusCode;

/// Final outcome of delivering one envelope to one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// A 2xx response was received on the given attempt.
    Delivered { attempts: u32 },

    /// The subscription was over its failure threshold; no request was sent.
    Discarded,

    /// Every attempt failed. Carries the last failure seen.
    Failed(FailureReason),

    /// The cancellation signal fired before delivery finished.
    Cancelled,
}

/// Why a single HTTP attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Timeout,
    Network(String),
    Status(u16),
    Serialization(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout =>
                write!(f, "request timed out"),
            FailureReason::Network(err) =>
                write!(f, "network error: {}", err),
            FailureReason::Status(code) =>
                write!(f, "webhook request failed with status: {}", code),
            FailureReason::Serialization(err) =>
                write!(f, "could not serialize envelope: {}", err),
        }
    }
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryOutcome::Delivered { attempts } =>
                write!(f, "delivered after {} attempt(s)", attempts),
            DeliveryOutcome::Discarded =>
                write!(f, "discarded due to repeated failures"),
            DeliveryOutcome::Failed(reason) =>
                write!(f, "failed: {}", reason),
            DeliveryOutcome::Cancelled =>
                write!(f, "cancelled"),
        }
    }
}

/// Rejection of an inbound webhook call.
///
/// Every variant maps to one HTTP status and one client-facing reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    RateLimited,
    UnknownSubscription,
    InvalidBody,
    MissingDate,
    HashMismatch,
    MissingSignature,
    InvalidSignature,
    InvalidDate,
    StaleRequest,
    InvalidPayload,
    InvalidEventId,
    Forbidden,
    UnsupportedType(String),
    Handler(String),
}

impl VerificationError {
    pub fn status(&self) -> StatusCode {
        match self {
            VerificationError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            VerificationError::UnknownSubscription
            | VerificationError::InvalidBody
            | VerificationError::MissingDate
            | VerificationError::HashMismatch
            | VerificationError::InvalidDate
            | VerificationError::InvalidPayload
            | VerificationError::InvalidEventId
            | VerificationError::UnsupportedType(_) => StatusCode::BAD_REQUEST,
            VerificationError::MissingSignature
            | VerificationError::InvalidSignature
            | VerificationError::StaleRequest => StatusCode::UNAUTHORIZED,
            VerificationError::Forbidden => StatusCode::FORBIDDEN,
            VerificationError::Handler(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for VerificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationError::RateLimited =>
                write!(f, "rate limit exceeded for webhook_id"),
            VerificationError::UnknownSubscription =>
                write!(f, "Invalid chat webhook ID"),
            VerificationError::InvalidBody =>
                write!(f, "invalid body"),
            VerificationError::MissingDate =>
                write!(f, "missing date"),
            VerificationError::HashMismatch =>
                write!(f, "hash mismatch"),
            VerificationError::MissingSignature =>
                write!(f, "missing signature"),
            VerificationError::InvalidSignature =>
                write!(f, "invalid signature"),
            VerificationError::InvalidDate =>
                write!(f, "invalid date"),
            VerificationError::StaleRequest =>
                write!(f, "request too old"),
            VerificationError::InvalidPayload =>
                write!(f, "Invalid webhook data"),
            VerificationError::InvalidEventId =>
                write!(f, "Invalid event ID"),
            VerificationError::Forbidden =>
                write!(f, "Forbidden"),
            VerificationError::UnsupportedType(_) =>
                write!(f, "Unhandled webhook type"),
            VerificationError::Handler(message) =>
                write!(f, "{}", message),
        }
    }
}

impl std::error::Error for VerificationError {}

/// Internal failure of a cache store. Callers log it and carry on uncached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    Poisoned,
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Poisoned => write!(f, "cache lock poisoned"),
        }
    }
}

impl std::error::Error for CacheError {}

/// Failure to decode an inbound envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Not a `{type, data}` object, or `data` does not fit the declared type.
    Malformed(String),

    /// The discriminator names no known event kind.
    Unsupported(String),
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvelopeError::Malformed(err) =>
                write!(f, "malformed envelope: {}", err),
            EnvelopeError::Unsupported(kind) =>
                write!(f, "unsupported envelope type: {}", kind),
        }
    }
}

impl std::error::Error for EnvelopeError {}

/// Errors surfaced by collaborator stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    Backend(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Backend(err) => write!(f, "store error: {}", err),
        }
    }
}

impl std::error::Error for StoreError {}

/// Failure reported by an inbound handler or messenger. The message is
/// returned to the caller as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError(pub String);

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for HandlerError {}

impl From<HandlerError> for VerificationError {
    fn from(err: HandlerError) -> Self {
        VerificationError::Handler(err.0)
    }
}

/// Errors returned when registering a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    InvalidUrl(String),
    LocalUrl(String),
    SecretTooShort {
        min: usize,
        actual: usize,
    },
    Store(StoreError),
}

impl fmt::Display for RegistrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationError::InvalidUrl(url) =>
                write!(f, "invalid webhook url: {}", url),
            RegistrationError::LocalUrl(url) =>
                write!(f, "local webhook urls are not allowed: {}", url),
            RegistrationError::SecretTooShort { min, actual } =>
                write!(f, "secret must be at least {} characters, got {}", min, actual),
            RegistrationError::Store(err) =>
                write!(f, "{}", err),
        }
    }
}

impl std::error::Error for RegistrationError {}

impl From<StoreError> for RegistrationError {
    fn from(err: StoreError) -> Self {
        RegistrationError::Store(err)
    }
}

/// Invalid service configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid {
        key: &'static str,
        value: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { key, value } =>
                write!(f, "invalid value for {}: {:?}", key, value),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_errors_map_to_status_classes() {
        assert_eq!(VerificationError::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(VerificationError::HashMismatch.status(), StatusCode::BAD_REQUEST);
        assert_eq!(VerificationError::StaleRequest.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(VerificationError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            VerificationError::UnsupportedType("nope".into()).to_string(),
            "Unhandled webhook type"
        );
    }
}
