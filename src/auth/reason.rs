//! Compact login diagnostic carried across a redirect in the `auth_reason` cookie.
//!
//! Encoded form is base64url (no padding) of the JSON object, bounded to
//! [`MAX_ENCODED_LEN`] characters so it is safe in both cookies and query strings.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

/// Upper bound on the encoded length.
pub const MAX_ENCODED_LEN: usize = 900;

/// Why a visitor was sent back to the login page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthReason {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(
        default,
        rename = "requestId",
        skip_serializing_if = "Option::is_none"
    )]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AuthReason {
    pub fn is_empty(&self) -> bool {
        self.code.is_none() && self.request_id.is_none() && self.message.is_none()
    }

    /// Whether this carries a machine-readable code or request id.
    /// Only such reasons come from an authoritative backend answer.
    pub fn is_actionable(&self) -> bool {
        self.code.is_some() || self.request_id.is_some()
    }

    /// Build a reason from a backend error body.
    ///
    /// Returns `None` unless the body is a JSON object carrying a string `code`
    /// and/or `requestId`.
    pub fn from_error_body(body: &[u8]) -> Option<Self> {
        let reason: AuthReason = serde_json::from_slice(body).ok()?;
        reason.is_actionable().then_some(reason)
    }

    /// Encode for transport. `None` when empty or over the length bound.
    pub fn encode(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let json = serde_json::to_vec(self).ok()?;
        let encoded = URL_SAFE_NO_PAD.encode(json);
        (encoded.len() <= MAX_ENCODED_LEN).then_some(encoded)
    }

    /// Strict inverse of [`encode`](Self::encode).
    ///
    /// Rejects anything outside `[A-Za-z0-9_-]`, longer than the bound, not valid
    /// JSON, or with none of the three fields set.
    pub fn decode(encoded: &str) -> Option<Self> {
        if !is_valid_encoding(encoded) {
            return None;
        }
        let json = URL_SAFE_NO_PAD.decode(encoded).ok()?;
        let reason: AuthReason = serde_json::from_slice(&json).ok()?;
        (!reason.is_empty()).then_some(reason)
    }

    /// Short human-readable line for the login page.
    pub fn summary(&self) -> String {
        let headline = self
            .message
            .clone()
            .unwrap_or_else(|| "Your session has ended. Please sign in again.".to_string());
        match (&self.code, &self.request_id) {
            (Some(code), Some(rid)) => format!("{} ({}, request id {})", headline, code, rid),
            (Some(code), None) => format!("{} ({})", headline, code),
            (None, Some(rid)) => format!("{} (request id {})", headline, rid),
            (None, None) => headline,
        }
    }
}

/// Whether `encoded` is within the bound and uses only the base64url alphabet.
pub fn is_valid_encoding(encoded: &str) -> bool {
    !encoded.is_empty()
        && encoded.len() <= MAX_ENCODED_LEN
        && encoded
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reason(code: Option<&str>, rid: Option<&str>, message: Option<&str>) -> AuthReason {
        AuthReason {
            code: code.map(str::to_string),
            request_id: rid.map(str::to_string),
            message: message.map(str::to_string),
        }
    }

    #[test]
    fn test_round_trip_partial_fields() {
        let cases = [
            reason(Some("AUTH_401_INVALID"), Some("req-123"), None),
            reason(None, Some("rid-1"), None),
            reason(None, None, Some("Session expired")),
            reason(Some("X"), Some("y"), Some("ünïcode message")),
        ];
        for case in cases {
            let encoded = case.encode().unwrap();
            assert!(is_valid_encoding(&encoded));
            assert_eq!(AuthReason::decode(&encoded), Some(case));
        }
    }

    #[test]
    fn test_json_field_names() {
        let encoded = reason(Some("AUTH_401_INVALID"), Some("req-123"), None)
            .encode()
            .unwrap();
        let json = URL_SAFE_NO_PAD.decode(encoded).unwrap();
        assert_eq!(
            String::from_utf8(json).unwrap(),
            r#"{"code":"AUTH_401_INVALID","requestId":"req-123"}"#
        );
    }

    #[test]
    fn test_empty_reason_not_encoded() {
        assert_eq!(AuthReason::default().encode(), None);
    }

    #[test]
    fn test_over_budget_is_omitted() {
        let big = reason(Some("C"), None, Some(&"m".repeat(1000)));
        assert_eq!(big.encode(), None);
    }

    #[test]
    fn test_decode_rejects_bad_charset_and_length() {
        assert_eq!(AuthReason::decode(""), None);
        assert_eq!(AuthReason::decode("abc=="), None);
        assert_eq!(AuthReason::decode("ab+/cd"), None);
        assert_eq!(AuthReason::decode("ab cd"), None);
        assert_eq!(AuthReason::decode(&"A".repeat(MAX_ENCODED_LEN + 1)), None);
    }

    #[test]
    fn test_decode_rejects_non_reason_payloads() {
        // "[]"
        assert_eq!(AuthReason::decode(&URL_SAFE_NO_PAD.encode("[]")), None);
        // "{}" has no fields
        assert_eq!(AuthReason::decode(&URL_SAFE_NO_PAD.encode("{}")), None);
        // wrong field type
        assert_eq!(
            AuthReason::decode(&URL_SAFE_NO_PAD.encode(r#"{"code":5}"#)),
            None
        );
    }

    #[test]
    fn test_from_error_body() {
        let body = br#"{"code":"AUTH_401_INVALID","requestId":"req-123","extra":true}"#;
        assert_eq!(
            AuthReason::from_error_body(body),
            Some(reason(Some("AUTH_401_INVALID"), Some("req-123"), None))
        );
        assert_eq!(AuthReason::from_error_body(br#"{"message":"nope"}"#), None);
        assert_eq!(AuthReason::from_error_body(b"not json"), None);
    }

    #[test]
    fn test_summary() {
        assert_eq!(
            reason(None, Some("rid-123"), Some("Session expired")).summary(),
            "Session expired (request id rid-123)"
        );
    }
}
