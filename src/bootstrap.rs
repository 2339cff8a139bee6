//! Session bootstrap: turn a refresh credential into a live session before
//! sending the visitor back where they were going.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, header},
    response::{IntoResponse, Redirect, Response},
};
use tracing::{debug, info};

use crate::auth::{
    AUTH_REASON_COOKIE_NAME, EdgeCookies, REFRESH_COOKIE_NAME, RETURN_PATH_COOKIE_NAME,
    append_set_cookies, get_cookie,
};
use crate::gate::AuthPaths;
use crate::proxy::{RefreshContext, RefreshCoordinator};

pub struct BootstrapState {
    pub coordinator: Arc<RefreshCoordinator>,
    pub paths: AuthPaths,
    pub cookies: EdgeCookies,
}

fn redirect(location: &str, cookies: &[String]) -> Response {
    let mut response = Redirect::temporary(location).into_response();
    append_set_cookies(response.headers_mut(), cookies);
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

/// `GET <bootstrap-path>`.
pub async fn bootstrap_handler(
    State(state): State<Arc<BootstrapState>>,
    headers: HeaderMap,
) -> Response {
    let Some(refresh_token) = get_cookie(&headers, REFRESH_COOKIE_NAME) else {
        debug!("Bootstrap without refresh credential");
        return redirect(&state.paths.login_path, &[]);
    };

    let target = state.paths.stored_return_target(&headers);
    let ctx = RefreshContext::from_headers(&headers);
    let outcome = state
        .coordinator
        .refresh_once(Some(refresh_token), &ctx)
        .await;

    if outcome.is_ok() {
        info!(target = %target, "Session bootstrapped");
        let mut cookies = vec![state.cookies.clear(RETURN_PATH_COOKIE_NAME)];
        cookies.extend(outcome.cookies().iter().cloned());
        return redirect(&target, &cookies);
    }

    let mut cookies = outcome.cookies().to_vec();
    if let Some(encoded) = outcome.reason().and_then(|r| r.encode()) {
        cookies.push(state.cookies.auth_reason(&encoded));
    } else if get_cookie(&headers, AUTH_REASON_COOKIE_NAME).is_some() {
        cookies.push(state.cookies.clear(AUTH_REASON_COOKIE_NAME));
    }
    redirect(&state.paths.login_path, &cookies)
}
