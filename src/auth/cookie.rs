//! Cookie parsing and the cookies the edge issues itself.
//!
//! Credential cookies (`access_token`, `refresh_token`) are only ever read here;
//! the backend sets and rotates them and the proxy relays its directives.

use axum::http::{HeaderMap, HeaderValue, header};

/// Cookie name for the access credential (short-lived, set by the backend).
pub const ACCESS_COOKIE_NAME: &str = "access_token";

/// Cookie name for the refresh credential (long-lived, set by the backend).
pub const REFRESH_COOKIE_NAME: &str = "refresh_token";

/// Cookie name for the return path stashed before a login redirect.
pub const RETURN_PATH_COOKIE_NAME: &str = "nx";

/// Cookie name for the one-shot login diagnostic.
pub const AUTH_REASON_COOKIE_NAME: &str = "auth_reason";

/// Lifetime of the `nx` cookie in seconds.
pub const RETURN_PATH_MAX_AGE: u64 = 300;

/// Lifetime of the `auth_reason` cookie in seconds.
pub const AUTH_REASON_MAX_AGE: u64 = 60;

/// Extract a cookie value from the Cookie header.
///
/// Empty values are reported as absent.
pub fn get_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    for cookie_header in headers.get_all(header::COOKIE) {
        let Ok(cookie_header) = cookie_header.to_str() else {
            continue;
        };
        for part in cookie_header.split(';') {
            let part = part.trim();
            if let Some((key, value)) = part.split_once('=') {
                if key.trim() == name {
                    let value = value.trim();
                    return (!value.is_empty()).then_some(value);
                }
            }
        }
    }
    None
}

/// Rebuild a Cookie header without the named cookie.
/// Returns `None` when nothing is left.
pub fn without_cookie(cookie_header: &str, name: &str) -> Option<String> {
    let kept: Vec<&str> = cookie_header
        .split(';')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .filter(|part| part.split_once('=').map(|(k, _)| k.trim()) != Some(name))
        .collect();
    (!kept.is_empty()).then(|| kept.join("; "))
}

/// Rebuild a Cookie header with the named cookie set to `value`.
/// The cookie is appended when it was not present.
pub fn replace_cookie_value(cookie_header: Option<&str>, name: &str, value: &str) -> String {
    let mut replaced = false;
    let mut parts: Vec<String> = Vec::new();
    for part in cookie_header.unwrap_or("").split(';').map(str::trim) {
        if part.is_empty() {
            continue;
        }
        match part.split_once('=') {
            Some((key, _)) if key.trim() == name => {
                if !replaced {
                    parts.push(format!("{}={}", name, value));
                    replaced = true;
                }
            }
            _ => parts.push(part.to_string()),
        }
    }
    if !replaced {
        parts.push(format!("{}={}", name, value));
    }
    parts.join("; ")
}

/// Builds the Set-Cookie lines the edge issues on its own behalf.
#[derive(Debug, Clone, Copy)]
pub struct EdgeCookies {
    pub secure: bool,
}

impl EdgeCookies {
    pub fn new(secure: bool) -> Self {
        Self { secure }
    }

    fn build(&self, name: &str, value: &str, max_age: u64) -> String {
        let secure = if self.secure { "; Secure" } else { "" };
        format!(
            "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}{}",
            name, value, max_age, secure
        )
    }

    /// `nx` cookie holding an already encoded return path.
    pub fn return_path(&self, encoded: &str) -> String {
        self.build(RETURN_PATH_COOKIE_NAME, encoded, RETURN_PATH_MAX_AGE)
    }

    /// `auth_reason` cookie holding an already encoded diagnostic.
    pub fn auth_reason(&self, encoded: &str) -> String {
        self.build(AUTH_REASON_COOKIE_NAME, encoded, AUTH_REASON_MAX_AGE)
    }

    /// Expire a cookie previously issued with `Path=/`.
    pub fn clear(&self, name: &str) -> String {
        self.build(name, "", 0)
    }
}

/// Append Set-Cookie lines to a header map, in order.
/// Lines that are not valid header values are dropped with a warning.
pub fn append_set_cookies<I, S>(headers: &mut HeaderMap, cookies: I)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    for cookie in cookies {
        match HeaderValue::from_str(cookie.as_ref()) {
            Ok(value) => {
                headers.append(header::SET_COOKIE, value);
            }
            Err(_) => tracing::warn!("Dropping Set-Cookie line with invalid characters"),
        }
    }
}
