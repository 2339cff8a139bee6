//! Forwarding browser API calls to the backend.
//!
//! Every request under the proxy prefix is relayed to the backend with the
//! access credential attached as a bearer token. A 401 from a refresh-eligible
//! endpoint triggers one coordinated refresh and, when the body can be
//! replayed, one retry.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::{Body, Bytes, HttpBody},
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    response::Response,
    routing::any,
};
use tracing::{debug, warn};

use super::backend::{BackendConfig, is_safe_suffix};
use super::refresh::{REQUEST_ID_HEADER, RefreshContext, RefreshCoordinator, RefreshOutcome};
use super::set_cookie::rewrite_all;
use crate::auth::{
    ACCESS_COOKIE_NAME, EdgeCookies, REFRESH_COOKIE_NAME, append_set_cookies, get_cookie,
    replace_cookie_value, without_cookie,
};
use crate::error::ProxyError;

/// Shared state for the forwarding handler.
pub struct ProxyState {
    pub client: reqwest::Client,
    pub backend: BackendConfig,
    pub coordinator: Arc<RefreshCoordinator>,
    /// Edge path prefix stripped before forwarding, e.g. `/api`.
    pub prefix: String,
    pub upstream_timeout: Duration,
    /// Largest body buffered so it can be sent twice.
    pub max_replay_body_bytes: usize,
    pub cookies: EdgeCookies,
}

/// Router forwarding `{prefix}/*` to the backend.
pub fn router(state: Arc<ProxyState>) -> Router {
    let route = format!("{}/{{*path}}", state.prefix);
    Router::new().route(&route, any(forward)).with_state(state)
}

/// Headers never copied between the two hops.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Whether `name` is a hop-by-hop header, including any listed in `Connection`.
pub(crate) fn is_hop_by_hop(name: &HeaderName, headers: &HeaderMap) -> bool {
    if HOP_BY_HOP.contains(&name.as_str()) {
        return true;
    }
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|listed| listed.trim().eq_ignore_ascii_case(name.as_str()))
}

/// Copy inbound headers minus hop-by-hop headers, `Host`, `Content-Length`
/// and any client-supplied `Authorization`.
pub(crate) fn forwardable_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in inbound {
        if is_hop_by_hop(name, inbound)
            || name == header::HOST
            || name == header::CONTENT_LENGTH
            || name == header::AUTHORIZATION
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

/// Request body prepared for a possible second send.
#[derive(Debug)]
pub enum ReplayableBody {
    /// GET/HEAD, or no body at all.
    Empty,
    /// Fully buffered; can be sent any number of times.
    Buffered(Bytes),
    /// Too large or of unknown length; can be sent once.
    Streaming(Option<Body>),
}

impl ReplayableBody {
    /// Buffer bodies of known length up to `max_bytes`; stream the rest.
    ///
    /// The length comes from `Content-Length`, else from the body's exact size
    /// hint. A body that is already at its end needs nothing replayed.
    pub async fn prepare(
        method: &Method,
        headers: &HeaderMap,
        body: Body,
        max_bytes: usize,
    ) -> Result<Self, ProxyError> {
        let hint = body.size_hint().exact();
        if method == Method::GET
            || method == Method::HEAD
            || body.is_end_stream()
            || hint == Some(0)
        {
            return Ok(ReplayableBody::Empty);
        }
        let declared = headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .or(hint);
        match declared {
            Some(len) if len <= max_bytes as u64 => {
                let bytes = axum::body::to_bytes(body, max_bytes)
                    .await
                    .map_err(|e| ProxyError::BodyRead(e.to_string()))?;
                Ok(ReplayableBody::Buffered(bytes))
            }
            _ => Ok(ReplayableBody::Streaming(Some(body))),
        }
    }

    /// Whether a retry can resend this body.
    pub fn is_replayable(&self) -> bool {
        !matches!(self, ReplayableBody::Streaming(_))
    }

    /// Body for the first send.
    fn first(&mut self) -> Option<reqwest::Body> {
        match self {
            ReplayableBody::Empty => None,
            ReplayableBody::Buffered(bytes) => Some(reqwest::Body::from(bytes.clone())),
            ReplayableBody::Streaming(body) => body
                .take()
                .map(|b| reqwest::Body::wrap_stream(b.into_data_stream())),
        }
    }

    /// Body for the retry, or `None` when the request cannot be replayed.
    fn retry(&self) -> Option<Option<reqwest::Body>> {
        match self {
            ReplayableBody::Empty => Some(None),
            ReplayableBody::Buffered(bytes) => Some(Some(reqwest::Body::from(bytes.clone()))),
            ReplayableBody::Streaming(_) => None,
        }
    }
}

/// Keep a well-formed inbound request id, otherwise mint one.
fn request_id(headers: &HeaderMap) -> HeaderValue {
    headers
        .get(REQUEST_ID_HEADER)
        .filter(|v| {
            v.to_str().is_ok_and(|s| {
                !s.is_empty()
                    && s.len() <= 128
                    && s.bytes()
                        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.')
            })
        })
        .cloned()
        .unwrap_or_else(|| {
            HeaderValue::from_str(&uuid::Uuid::new_v4().to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("unknown"))
        })
}

/// Set the bearer token and keep the forwarded access cookie in step with it.
fn with_access_credential(mut headers: HeaderMap, access_token: &str) -> HeaderMap {
    match HeaderValue::from_str(&format!("Bearer {}", access_token)) {
        Ok(value) => {
            headers.insert(header::AUTHORIZATION, value);
        }
        Err(_) => {
            warn!("Access credential is not a valid header value; not attaching it");
            headers.remove(header::AUTHORIZATION);
            return headers;
        }
    }
    let joined = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>()
        .join("; ");
    let current = (!joined.is_empty()).then_some(joined.as_str());
    let updated = replace_cookie_value(current, ACCESS_COOKIE_NAME, access_token);
    if let Ok(value) = HeaderValue::from_str(&updated) {
        headers.insert(header::COOKIE, value);
    }
    headers
}

/// Drop the refresh credential from the Cookie header.
fn without_refresh_cookie(mut headers: HeaderMap) -> HeaderMap {
    let rebuilt: Vec<Option<String>> = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(|v| without_cookie(v, REFRESH_COOKIE_NAME))
        .collect();
    headers.remove(header::COOKIE);
    for value in rebuilt.into_iter().flatten() {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.append(header::COOKIE, value);
        }
    }
    headers
}

async fn send(
    state: &ProxyState,
    method: &Method,
    url: &str,
    headers: HeaderMap,
    body: Option<reqwest::Body>,
) -> Result<reqwest::Response, ProxyError> {
    let mut request = state
        .client
        .request(method.clone(), url)
        .headers(headers)
        .timeout(state.upstream_timeout);
    if let Some(body) = body {
        request = request.body(body);
    }
    request.send().await.map_err(ProxyError::from_upstream)
}

/// Forward one request, refreshing and retrying once on a 401.
pub async fn forward(
    State(state): State<Arc<ProxyState>>,
    request: Request,
) -> Result<Response, ProxyError> {
    let (parts, body) = request.into_parts();

    let suffix = parts
        .uri
        .path()
        .strip_prefix(state.prefix.as_str())
        .unwrap_or("/");
    if !suffix.starts_with('/') || !is_safe_suffix(suffix) {
        return Err(ProxyError::BadTarget);
    }
    let url = state.backend.url_for(suffix, parts.uri.query());
    let refresh_eligible = state.backend.is_refresh_eligible(suffix);

    let mut headers = forwardable_headers(&parts.headers);
    if refresh_eligible {
        headers = without_refresh_cookie(headers);
    }
    let request_id = request_id(&parts.headers);
    headers.insert(REQUEST_ID_HEADER, request_id.clone());
    if let Some(access_token) = get_cookie(&parts.headers, ACCESS_COOKIE_NAME) {
        headers = with_access_credential(headers, access_token);
    }

    let mut body = ReplayableBody::prepare(
        &parts.method,
        &parts.headers,
        body,
        state.max_replay_body_bytes,
    )
    .await?;

    let mut response = send(&state, &parts.method, &url, headers.clone(), body.first()).await?;
    let mut refresh: Option<Arc<RefreshOutcome>> = None;

    if response.status() == StatusCode::UNAUTHORIZED && refresh_eligible {
        let ctx = RefreshContext::from_headers(&headers);
        let outcome = state
            .coordinator
            .refresh_once(get_cookie(&parts.headers, REFRESH_COOKIE_NAME), &ctx)
            .await;

        if let Some(access_token) = outcome.access_token() {
            match body.retry() {
                Some(retry_body) => {
                    let headers = with_access_credential(headers, access_token);
                    response = send(&state, &parts.method, &url, headers, retry_body).await?;
                }
                None => warn!(
                    request_id = ?request_id,
                    "Streaming body cannot be replayed; keeping the 401 and relaying rotated cookies"
                ),
            }
        }
        refresh = Some(outcome);
    }

    debug!(
        request_id = ?request_id,
        method = %parts.method,
        path = %suffix,
        status = %response.status(),
        refreshed = refresh.as_ref().is_some_and(|o| o.is_ok()),
        "Forwarded request"
    );

    Ok(assemble_response(response, refresh.as_deref(), &state.cookies))
}

/// Build the client response: status, headers and body from the backend, with
/// Set-Cookie replaced by refresh cookies first and the backend's own after.
pub fn assemble_response(
    response: reqwest::Response,
    refresh: Option<&RefreshOutcome>,
    cookies: &EdgeCookies,
) -> Response {
    let status = response.status();
    let upstream = response.headers();

    let mut headers = HeaderMap::new();
    for (name, value) in upstream {
        if name == header::SET_COOKIE
            || name == header::CONTENT_LENGTH
            || is_hop_by_hop(name, upstream)
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    let own_cookies = rewrite_all(
        upstream
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok()),
    );
    if let Some(outcome) = refresh {
        append_set_cookies(&mut headers, outcome.cookies());
    }
    append_set_cookies(&mut headers, &own_cookies);
    if let Some(encoded) = refresh.and_then(|o| o.reason()).and_then(|r| r.encode()) {
        append_set_cookies(&mut headers, [cookies.auth_reason(&encoded)]);
    }

    let mut out = Response::new(Body::from_stream(response.bytes_stream()));
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(
                HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_forwardable_headers_strip_list() {
        let inbound = headers(&[
            ("host", "edge.example"),
            ("connection", "keep-alive, x-drop-me"),
            ("content-length", "12"),
            ("authorization", "Bearer client-supplied"),
            ("x-drop-me", "1"),
            ("accept", "application/json"),
            ("cookie", "access_token=a"),
        ]);
        let out = forwardable_headers(&inbound);
        assert!(out.get("host").is_none());
        assert!(out.get("connection").is_none());
        assert!(out.get("content-length").is_none());
        assert!(out.get("authorization").is_none());
        assert!(out.get("x-drop-me").is_none());
        assert_eq!(out.get("accept").unwrap(), "application/json");
        assert_eq!(out.get("cookie").unwrap(), "access_token=a");
    }

    #[test]
    fn test_with_access_credential_updates_cookie() {
        let out = with_access_credential(
            headers(&[("cookie", "access_token=old; theme=dark")]),
            "new",
        );
        assert_eq!(out.get("authorization").unwrap(), "Bearer new");
        assert_eq!(out.get("cookie").unwrap(), "access_token=new; theme=dark");
    }

    #[test]
    fn test_with_access_credential_keeps_every_cookie_header() {
        let out = with_access_credential(
            headers(&[
                ("cookie", "theme=dark"),
                ("cookie", "access_token=old"),
                ("cookie", "csrftoken=xyz"),
            ]),
            "new",
        );
        let cookies: Vec<_> = out.get_all("cookie").iter().collect();
        assert_eq!(cookies, vec!["theme=dark; access_token=new; csrftoken=xyz"]);
    }

    #[test]
    fn test_refresh_cookie_removed() {
        let out = without_refresh_cookie(headers(&[(
            "cookie",
            "access_token=a; refresh_token=r",
        )]));
        assert_eq!(out.get("cookie").unwrap(), "access_token=a");

        let out = without_refresh_cookie(headers(&[("cookie", "refresh_token=r")]));
        assert!(out.get("cookie").is_none());
    }

    #[test]
    fn test_request_id_kept_or_minted() {
        let kept = request_id(&headers(&[("x-request-id", "rid-123")]));
        assert_eq!(kept, "rid-123");

        let minted = request_id(&headers(&[("x-request-id", "bad id with spaces")]));
        assert_ne!(minted, "bad id with spaces");
        assert_eq!(minted.len(), 36);
    }

    #[tokio::test]
    async fn test_get_body_is_empty_and_replayable() {
        let body = ReplayableBody::prepare(&Method::GET, &HeaderMap::new(), Body::from("x"), 10)
            .await
            .unwrap();
        assert!(matches!(body, ReplayableBody::Empty));
        assert!(body.is_replayable());
    }

    #[tokio::test]
    async fn test_small_body_is_buffered() {
        let mut body = ReplayableBody::prepare(
            &Method::POST,
            &headers(&[("content-length", "5")]),
            Body::from("hello"),
            1024,
        )
        .await
        .unwrap();
        assert!(body.is_replayable());
        assert!(body.first().is_some());
        assert!(matches!(body.retry(), Some(Some(_))));
    }

    fn chunked(data: &'static str) -> Body {
        Body::from_stream(futures::stream::iter([Ok::<_, std::io::Error>(Bytes::from(
            data,
        ))]))
    }

    #[tokio::test]
    async fn test_bodiless_delete_is_empty() {
        let body =
            ReplayableBody::prepare(&Method::DELETE, &HeaderMap::new(), Body::empty(), 1024)
                .await
                .unwrap();
        assert!(matches!(body, ReplayableBody::Empty));
        assert!(matches!(body.retry(), Some(None)));
    }

    #[tokio::test]
    async fn test_exact_size_hint_is_buffered_without_content_length() {
        let body =
            ReplayableBody::prepare(&Method::POST, &HeaderMap::new(), Body::from("hello"), 1024)
                .await
                .unwrap();
        assert!(matches!(body, ReplayableBody::Buffered(ref b) if b.as_ref() == b"hello"));
    }

    #[tokio::test]
    async fn test_unknown_length_body_streams_once() {
        let mut body =
            ReplayableBody::prepare(&Method::POST, &HeaderMap::new(), chunked("hello"), 1024)
                .await
                .unwrap();
        assert!(!body.is_replayable());
        assert!(body.first().is_some());
        assert!(body.first().is_none());
        assert!(body.retry().is_none());
    }

    #[tokio::test]
    async fn test_oversized_body_streams_once() {
        let body = ReplayableBody::prepare(
            &Method::PUT,
            &headers(&[("content-length", "5000")]),
            Body::from("x".repeat(5000)),
            1024,
        )
        .await
        .unwrap();
        assert!(!body.is_replayable());
    }
}
