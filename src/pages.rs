//! Pages served behind the authentication gate.
//!
//! With a frontend configured, page requests are relayed to it. Without one,
//! the edge answers the login path with a minimal built-in page and everything
//! else with 404.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use url::Url;

use crate::auth::EdgeCookies;
use crate::error::ProxyError;
use crate::gate::{AuthPaths, LoginNotice};
use crate::proxy::forward::{assemble_response, forwardable_headers};

/// Request header carrying the one-shot login diagnostic to the frontend.
pub const AUTH_REASON_HEADER: &str = "x-auth-reason";

/// Content Security Policy for the built-in login page (no scripts at all).
const LOGIN_CSP: &str = "default-src 'none'; style-src 'unsafe-inline'; form-action 'self'; frame-ancestors 'none'; base-uri 'none'";

/// HTML files should not be cached.
const NO_CACHE: &str = "no-cache";

pub struct PagesState {
    pub client: reqwest::Client,
    pub frontend: Option<Url>,
    pub paths: AuthPaths,
    /// Form action of the built-in login page.
    pub login_action: String,
    pub timeout: Duration,
    pub cookies: EdgeCookies,
}

/// Fallback handler for every page request that passed the gate.
pub async fn page_handler(
    State(state): State<Arc<PagesState>>,
    request: Request,
) -> Result<Response, ProxyError> {
    let notice = request.extensions().get::<LoginNotice>().cloned();

    if let Some(frontend) = &state.frontend {
        return relay_to_frontend(&state, frontend, request, notice).await;
    }

    let is_login = request.uri().path().trim_end_matches('/')
        == state.paths.login_path.trim_end_matches('/');
    if is_login && (request.method() == Method::GET || request.method() == Method::HEAD) {
        return Ok(login_page(&state.login_action, notice.as_ref()));
    }
    Ok(StatusCode::NOT_FOUND.into_response())
}

async fn relay_to_frontend(
    state: &PagesState,
    frontend: &Url,
    request: Request,
    notice: Option<LoginNotice>,
) -> Result<Response, ProxyError> {
    let method = request.method().clone();
    if method != Method::GET && method != Method::HEAD {
        return Ok(StatusCode::METHOD_NOT_ALLOWED.into_response());
    }

    let base = frontend.as_str().trim_end_matches('/');
    let url = match request.uri().path_and_query() {
        Some(pq) => format!("{}{}", base, pq.as_str()),
        None => format!("{}/", base),
    };

    let mut headers = forwardable_headers(request.headers());
    // The frontend renders the diagnostic; it must never arrive from the client.
    headers.remove(AUTH_REASON_HEADER);
    if let Some(encoded) = notice.and_then(|n| n.0.encode()) {
        if let Ok(value) = HeaderValue::from_str(&encoded) {
            headers.insert(AUTH_REASON_HEADER, value);
        }
    }

    let response = state
        .client
        .request(method, url)
        .headers(headers)
        .timeout(state.timeout)
        .send()
        .await
        .map_err(ProxyError::from_upstream)?;

    Ok(assemble_response(response, None, &state.cookies))
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Render the built-in login page.
pub fn login_page(action: &str, notice: Option<&LoginNotice>) -> Response {
    let notice = notice
        .map(|n| {
            format!(
                r#"<p class="notice" role="alert">{}</p>"#,
                escape_html(&n.0.summary())
            )
        })
        .unwrap_or_default();

    let body = format!(
        r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Sign in</title>
<style>body{{font-family:sans-serif;max-width:22rem;margin:4rem auto}}.notice{{color:#a40000}}label,input,button{{display:block;width:100%;margin-top:.5rem}}</style>
</head>
<body>
<h1>Sign in</h1>
{notice}
<form method="post" action="{action}">
<label>Email<input name="email" type="email" autocomplete="username" required></label>
<label>Password<input name="password" type="password" autocomplete="current-password" required></label>
<button type="submit">Sign in</button>
</form>
</body>
</html>
"#,
        notice = notice,
        action = escape_html(action),
    );

    (
        [
            (header::CONTENT_TYPE, "text/html; charset=utf-8"),
            (header::CACHE_CONTROL, NO_CACHE),
            (header::CONTENT_SECURITY_POLICY, LOGIN_CSP),
        ],
        body,
    )
        .into_response()
}
