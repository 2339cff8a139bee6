//! Local inspection of backend-issued access tokens.
//!
//! The edge does not hold the backend's signing key, so it cannot and does not
//! verify signatures. It only reads the `exp` claim to decide whether a visitor
//! looks authenticated; every real API call is still judged by the backend.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// The only claim the edge cares about.
#[derive(Debug, Clone, Deserialize)]
struct ExpiryClaims {
    exp: u64,
}

/// Errors that can occur while inspecting a token.
#[derive(Debug)]
pub enum JwtError {
    /// Header is not a decodable JWT header
    Header(jsonwebtoken::errors::Error),
    /// Token does not have three dot-separated segments
    Shape,
    /// Payload is not base64url JSON with a numeric `exp` claim
    Payload,
    /// System time error
    TimeError,
}

impl std::fmt::Display for JwtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JwtError::Header(e) => write!(f, "Malformed token header: {}", e),
            JwtError::Shape => write!(f, "Token is not a three-part JWT"),
            JwtError::Payload => write!(f, "Token payload has no usable exp claim"),
            JwtError::TimeError => write!(f, "System time error"),
        }
    }
}

impl std::error::Error for JwtError {}

/// Read the `exp` claim of a JWT without verifying its signature.
///
/// Works for any signing algorithm since no key is involved.
pub fn read_expiry(token: &str) -> Result<u64, JwtError> {
    jsonwebtoken::decode_header(token).map_err(JwtError::Header)?;

    let mut segments = token.split('.');
    let (Some(_), Some(payload), Some(_), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(JwtError::Shape);
    };

    let json = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| JwtError::Payload)?;
    let claims: ExpiryClaims = serde_json::from_slice(&json).map_err(|_| JwtError::Payload)?;

    Ok(claims.exp)
}

/// Current Unix time in seconds.
pub fn now_secs() -> Result<u64, JwtError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| JwtError::TimeError)
}

/// Whether `token` is a parseable access token whose expiry is after `now`.
/// Anything unparseable counts as not live.
pub fn is_live_at(token: &str, now: u64) -> bool {
    matches!(read_expiry(token), Ok(exp) if exp > now)
}
