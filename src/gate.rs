//! Authentication gate in front of every page.
//!
//! Each request is classified once, locally and without any network call:
//! pass it through, send it to the login page, or send it to the bootstrap
//! endpoint so a refresh can be attempted first. The gate also owns the
//! lifecycle of the `nx` (return path) and `auth_reason` cookies.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, Uri, header},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use tracing::debug;

use crate::auth::{
    ACCESS_COOKIE_NAME, AUTH_REASON_COOKIE_NAME, AuthReason, EdgeCookies, REFRESH_COOKIE_NAME,
    RETURN_PATH_COOKIE_NAME, append_set_cookies, decode_return_path, encode_return_path,
    get_cookie, sanitize_internal_path,
};
use crate::jwt;
use crate::routes::PublicRoutes;

/// Edge paths the gate and the bootstrap endpoint redirect between.
#[derive(Debug, Clone)]
pub struct AuthPaths {
    pub login_path: String,
    pub bootstrap_path: String,
    /// Where authenticated visitors go when no return path is stored.
    pub landing_path: String,
}

impl AuthPaths {
    fn is_login(&self, path: &str) -> bool {
        same_path(path, &self.login_path)
    }

    /// Sanitize a candidate return path. Anything pointing back at the login
    /// or bootstrap endpoints becomes the landing path.
    pub fn return_target(&self, candidate: &str) -> String {
        let target = sanitize_internal_path(candidate, &self.landing_path);
        let path_only = target.split(['?', '#']).next().unwrap_or("");
        if same_path(path_only, &self.login_path) || same_path(path_only, &self.bootstrap_path) {
            self.landing_path.clone()
        } else {
            target
        }
    }

    /// Decode the `nx` cookie into a redirect target, falling back to the landing path.
    pub fn stored_return_target(&self, headers: &HeaderMap) -> String {
        get_cookie(headers, RETURN_PATH_COOKIE_NAME)
            .and_then(decode_return_path)
            .map(|path| self.return_target(&path))
            .unwrap_or_else(|| self.landing_path.clone())
    }
}

fn same_path(a: &str, b: &str) -> bool {
    let trim = |p: &str| -> String {
        let t = p.trim_end_matches('/');
        if t.is_empty() { "/".to_string() } else { t.to_string() }
    };
    trim(a) == trim(b)
}

/// Shared state for [`auth_gate`].
pub struct GateState {
    pub public_routes: PublicRoutes,
    pub paths: AuthPaths,
    pub cookies: EdgeCookies,
}

/// One-shot login diagnostic handed to the page layer as a request extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginNotice(pub AuthReason);

/// Outcome of classifying one page request.
#[derive(Debug, PartialEq, Eq)]
pub enum GateDecision {
    /// Speculative request; passed through with no cookie changes.
    Prefetch,
    Pass {
        /// Set-Cookie lines appended to the page response.
        cookies: Vec<String>,
        notice: Option<LoginNotice>,
    },
    Redirect {
        location: String,
        cookies: Vec<String>,
    },
}

/// Whether the request is a browser or framework prefetch.
pub fn is_prefetch(headers: &HeaderMap) -> bool {
    if headers.contains_key("next-router-prefetch") {
        return true;
    }
    ["purpose", "sec-purpose", "x-purpose", "x-moz"]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.to_ascii_lowercase().contains("prefetch"))
}

/// Classify a page request. Pure: no I/O, `now` is the current UNIX time.
pub fn decide(state: &GateState, uri: &Uri, headers: &HeaderMap, now: u64) -> GateDecision {
    if is_prefetch(headers) {
        return GateDecision::Prefetch;
    }

    let cookies = &state.cookies;
    let paths = &state.paths;
    let path = uri.path();
    let authenticated =
        get_cookie(headers, ACCESS_COOKIE_NAME).is_some_and(|token| jwt::is_live_at(token, now));
    let has_return_path = get_cookie(headers, RETURN_PATH_COOKIE_NAME).is_some();

    if paths.is_login(path) {
        return decide_login(state, uri, headers, authenticated);
    }

    if state.public_routes.is_public(path) || authenticated {
        let mut set = Vec::new();
        if authenticated && has_return_path {
            set.push(cookies.clear(RETURN_PATH_COOKIE_NAME));
        }
        return GateDecision::Pass {
            cookies: set,
            notice: None,
        };
    }

    let current = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or(path);
    let return_path = paths.return_target(current);
    let set = vec![cookies.return_path(&encode_return_path(&return_path))];

    let location = if get_cookie(headers, REFRESH_COOKIE_NAME).is_some() {
        paths.bootstrap_path.clone()
    } else {
        paths.login_path.clone()
    };
    GateDecision::Redirect {
        location,
        cookies: set,
    }
}

fn decide_login(
    state: &GateState,
    uri: &Uri,
    headers: &HeaderMap,
    authenticated: bool,
) -> GateDecision {
    let cookies = &state.cookies;
    let paths = &state.paths;
    let reason_cookie = get_cookie(headers, AUTH_REASON_COOKIE_NAME);

    if authenticated {
        let mut set = vec![cookies.clear(RETURN_PATH_COOKIE_NAME)];
        if reason_cookie.is_some() {
            set.push(cookies.clear(AUTH_REASON_COOKIE_NAME));
        }
        return GateDecision::Redirect {
            location: paths.stored_return_target(headers),
            cookies: set,
        };
    }

    let mut next = None;
    let mut reason = None;
    if let Some(query) = uri.query() {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "next" if next.is_none() => next = Some(value.into_owned()),
                "reason" if reason.is_none() => reason = Some(value.into_owned()),
                _ => {}
            }
        }
    }

    if next.is_some() || reason.is_some() {
        let mut set = Vec::new();
        if let Some(next) = next {
            let return_path = paths.return_target(&next);
            set.push(cookies.return_path(&encode_return_path(&return_path)));
        }
        if let Some(reason) = reason.filter(|r| AuthReason::decode(r).is_some()) {
            set.push(cookies.auth_reason(&reason));
        }
        return GateDecision::Redirect {
            location: paths.login_path.clone(),
            cookies: set,
        };
    }

    match reason_cookie {
        Some(encoded) => GateDecision::Pass {
            cookies: vec![cookies.clear(AUTH_REASON_COOKIE_NAME)],
            notice: AuthReason::decode(encoded).map(LoginNotice),
        },
        None => GateDecision::Pass {
            cookies: Vec::new(),
            notice: None,
        },
    }
}

/// Middleware applying [`decide`] to every request it wraps.
pub async fn auth_gate(
    State(state): State<Arc<GateState>>,
    mut request: Request,
    next: Next,
) -> Response {
    // A clock before the epoch makes every access credential look expired.
    let now = jwt::now_secs().unwrap_or(u64::MAX);

    match decide(&state, request.uri(), request.headers(), now) {
        GateDecision::Prefetch => next.run(request).await,
        GateDecision::Pass { cookies, notice } => {
            if let Some(notice) = notice {
                request.extensions_mut().insert(notice);
            }
            let mut response = next.run(request).await;
            append_set_cookies(response.headers_mut(), &cookies);
            response
        }
        GateDecision::Redirect { location, cookies } => {
            debug!(path = %request.uri().path(), location = %location, "Gate redirect");
            let mut response = Redirect::temporary(&location).into_response();
            append_set_cookies(response.headers_mut(), &cookies);
            response
                .headers_mut()
                .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
            response
        }
    }
}
