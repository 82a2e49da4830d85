use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, NaiveDateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Header carrying the HTTP-date the request was signed at.
pub const DATE_HEADER: &str = "x-ms-date";

/// Header carrying `hex(SHA256(body))`.
pub const CONTENT_HASH_HEADER: &str = "x-ms-content-sha256";

/// Header carrying `base64(HMAC-SHA256(secret, date;hash))`.
pub const SIGNATURE_HEADER: &str = "x-bgnb-signature";

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

type HmacSha256 = Hmac<Sha256>;

/// Headers attached to one outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeaders {
    pub date: String,
    pub content_hash: String,
    pub signature: String,
}

impl SignatureHeaders {
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            (DATE_HEADER, self.date.as_str()),
            (CONTENT_HASH_HEADER, self.content_hash.as_str()),
            (SIGNATURE_HEADER, self.signature.as_str()),
        ]
        .into_iter()
    }
}

/// Sign `body` as of `now`.
pub fn build_signature_headers(secret: &[u8], body: &[u8], now: DateTime<Utc>) -> SignatureHeaders {
    let date = format_http_date(now);
    let content_hash = content_hash(body);
    let signature = sign_content_hash(secret, &date, &content_hash);

    SignatureHeaders {
        date,
        content_hash,
        signature,
    }
}

/// Hex-encoded SHA-256 of the raw body bytes.
pub fn content_hash(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// Canonical string: `timestamp;contentHash`.
pub fn string_to_sign(timestamp: &str, content_hash: &str) -> String {
    format!("{};{}", timestamp, content_hash)
}

/// Base64 HMAC-SHA256 signature over the canonical string for `body`.
pub fn compute_signature(secret: &[u8], body: &[u8], timestamp: &str) -> String {
    sign_content_hash(secret, timestamp, &content_hash(body))
}

/// Same as [`compute_signature`] when the body hash is already known.
pub fn sign_content_hash(secret: &[u8], timestamp: &str, content_hash: &str) -> String {
    // HMAC accepts keys of any length.
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return String::new();
    };
    mac.update(string_to_sign(timestamp, content_hash).as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

/// Recompute the signature and compare it to `signature` in constant time.
pub fn verify_signature(secret: &[u8], body: &[u8], timestamp: &str, signature: &str) -> bool {
    signature_matches(secret, timestamp, &content_hash(body), signature)
}

pub fn signature_matches(secret: &[u8], timestamp: &str, content_hash: &str, signature: &str) -> bool {
    if signature.is_empty() {
        return false;
    }
    let expected = sign_content_hash(secret, timestamp, content_hash);
    expected.as_bytes().ct_eq(signature.as_bytes()).into()
}

/// RFC 1123 date in GMT, e.g. `Mon, 02 Jan 2006 15:04:05 GMT`.
pub fn format_http_date(at: DateTime<Utc>) -> String {
    at.format(HTTP_DATE_FORMAT).to_string()
}

pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc2822(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, HTTP_DATE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// True when `sent_at` is within `window` of `now`, in either direction.
pub fn is_timestamp_fresh(sent_at: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    let skew = (now - sent_at).abs();
    match skew.to_std() {
        Ok(skew) => skew <= window,
        Err(_) => false,
    }
}
