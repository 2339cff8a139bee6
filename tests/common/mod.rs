#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request, StatusCode, header},
    response::{AppendHeaders, IntoResponse, Response},
    routing::{any, post},
};
use crowgate::{
    ServerConfig,
    proxy::BackendConfig,
    routes::{DEFAULT_PUBLIC_ROUTES, PublicRoutes},
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use url::Url;

pub const JWT_SECRET: &[u8] = b"mock-backend-secret";

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: u64,
}

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Access credential expiring `ttl_secs` from now (negative for already expired).
pub fn access_token(ttl_secs: i64) -> String {
    let exp = (now() as i64 + ttl_secs) as u64;
    jsonwebtoken::encode(
        &Header::default(),
        &Claims {
            sub: "user-1".to_string(),
            exp,
        },
        &EncodingKey::from_secret(JWT_SECRET),
    )
    .unwrap()
}

pub fn live_access_token() -> String {
    access_token(300)
}

pub fn expired_access_token() -> String {
    access_token(-300)
}

fn bearer_is_live(headers: &HeaderMap) -> bool {
    let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    else {
        return false;
    };
    jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(JWT_SECRET),
        &Validation::default(),
    )
    .is_ok()
}

/// How the mock refresh endpoint answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// 200 with rotated access and refresh cookies.
    Rotate,
    /// 401 with a diagnostic body and deletion cookies.
    Reject,
    /// 200 without any new access cookie.
    SuccessWithoutAccess,
    /// 500 whose body still looks like a diagnostic.
    ServerError,
}

pub struct MockState {
    pub refresh_mode: RefreshMode,
    pub refresh_delay: Duration,
    pub refresh_calls: AtomicUsize,
    pub resource_calls: AtomicUsize,
    /// Headers of every refresh call, in arrival order.
    pub refresh_requests: Mutex<Vec<HeaderMap>>,
    /// Headers of every resource call, in arrival order.
    pub resource_requests: Mutex<Vec<HeaderMap>>,
    /// Access credential the last successful refresh issued.
    pub issued_access: Mutex<Option<String>>,
}

impl MockState {
    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn resource_calls(&self) -> usize {
        self.resource_calls.load(Ordering::SeqCst)
    }

    pub fn last_refresh_headers(&self) -> HeaderMap {
        self.refresh_requests.lock().unwrap().last().cloned().unwrap()
    }

    pub fn resource_headers(&self) -> Vec<HeaderMap> {
        self.resource_requests.lock().unwrap().clone()
    }
}

/// Backend stand-in serving its API under `/v1`.
pub struct MockBackend {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
}

impl MockBackend {
    pub async fn start(refresh_mode: RefreshMode) -> Self {
        Self::start_with_delay(refresh_mode, Duration::ZERO).await
    }

    pub async fn start_with_delay(refresh_mode: RefreshMode, refresh_delay: Duration) -> Self {
        let state = Arc::new(MockState {
            refresh_mode,
            refresh_delay,
            refresh_calls: AtomicUsize::new(0),
            resource_calls: AtomicUsize::new(0),
            refresh_requests: Mutex::new(Vec::new()),
            resource_requests: Mutex::new(Vec::new()),
            issued_access: Mutex::new(None),
        });

        let app = Router::new()
            .route("/v1/auth/refresh", post(refresh))
            .route("/v1/{*path}", any(resource))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self { addr, state }
    }

    pub fn url(&self) -> Url {
        Url::parse(&format!("http://{}/v1", self.addr)).unwrap()
    }
}

async fn refresh(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    state.refresh_requests.lock().unwrap().push(headers);
    if !state.refresh_delay.is_zero() {
        tokio::time::sleep(state.refresh_delay).await;
    }

    match state.refresh_mode {
        RefreshMode::Rotate => {
            let access = live_access_token();
            *state.issued_access.lock().unwrap() = Some(access.clone());
            (
                StatusCode::OK,
                AppendHeaders([
                    (
                        header::SET_COOKIE,
                        format!(
                            "access_token={}; Domain=api.example.com; HttpOnly; SameSite=Lax; Max-Age=300",
                            access
                        ),
                    ),
                    (
                        header::SET_COOKIE,
                        "refresh_token=rotated-refresh; Domain=api.example.com; Path=/; HttpOnly; Max-Age=1209600"
                            .to_string(),
                    ),
                ]),
                Json(json!({ "ok": true })),
            )
                .into_response()
        }
        RefreshMode::Reject => (
            StatusCode::UNAUTHORIZED,
            AppendHeaders([
                (
                    header::SET_COOKIE,
                    "refresh_token=; Domain=api.example.com; Path=/; Max-Age=0",
                ),
                (header::SET_COOKIE, "tracking=abc; Path=/"),
            ]),
            Json(json!({
                "code": "AUTH_401_INVALID",
                "requestId": "req-123",
            })),
        )
            .into_response(),
        RefreshMode::ServerError => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(
                header::SET_COOKIE,
                "refresh_token=gone; Path=/; Expires=Sat, 01 Jan 2000 00:00:00 GMT",
            )],
            Json(json!({
                "code": "INTERNAL",
                "requestId": "req-500",
            })),
        )
            .into_response(),
        RefreshMode::SuccessWithoutAccess => (
            StatusCode::OK,
            [(header::SET_COOKIE, "tracking=abc; Path=/")],
            Json(json!({ "ok": true })),
        )
            .into_response(),
    }
}

/// Every other endpoint: 401 without a live bearer, otherwise an echo of the request.
async fn resource(State(state): State<Arc<MockState>>, request: Request<Body>) -> Response {
    state.resource_calls.fetch_add(1, Ordering::SeqCst);
    let (parts, body) = request.into_parts();
    state
        .resource_requests
        .lock()
        .unwrap()
        .push(parts.headers.clone());

    let body: Bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap_or_default();

    if !bearer_is_live(&parts.headers) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "code": "AUTH_401_EXPIRED" })),
        )
            .into_response();
    }

    let header_str = |name: header::HeaderName| {
        parts
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    (
        StatusCode::OK,
        [
            (header::SET_COOKIE, "seen=1; Domain=api.example.com; Secure"),
            (header::HeaderName::from_static("x-backend"), "mock"),
        ],
        Json(json!({
            "method": parts.method.as_str(),
            "path": parts.uri.path(),
            "query": parts.uri.query(),
            "body": String::from_utf8_lossy(&body),
            "authorization": header_str(header::AUTHORIZATION),
            "cookie": header_str(header::COOKIE),
            "requestId": header_str(header::HeaderName::from_static("x-request-id")),
        })),
    )
        .into_response()
}

/// Edge configuration pointed at `backend`.
pub fn test_config(backend: &Url) -> ServerConfig {
    ServerConfig {
        backend: BackendConfig::new(backend.clone()),
        proxy_prefix: "/api".to_string(),
        login_path: "/login".to_string(),
        bootstrap_path: "/auth/bootstrap".to_string(),
        landing_path: "/dashboard".to_string(),
        public_routes: PublicRoutes::new(DEFAULT_PUBLIC_ROUTES).unwrap(),
        frontend_url: None,
        secure_cookies: false,
        refresh_timeout: Duration::from_secs(5),
        upstream_timeout: Duration::from_secs(5),
        max_replay_body_bytes: 1024 * 1024,
        ip_extractor: None,
    }
}

/// Edge configuration whose backend is never reachable.
pub fn offline_config() -> ServerConfig {
    // Port 9 (discard) on loopback.
    test_config(&Url::parse("http://127.0.0.1:9/v1").unwrap())
}

/// Attach a client socket address the way `into_make_service_with_connect_info` does.
pub fn with_client_ip(mut request: Request<Body>) -> Request<Body> {
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));
    request
}

pub fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    with_client_ip(builder.body(Body::empty()).unwrap())
}

pub fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .collect()
}

/// Value of the first Set-Cookie line for `name`.
pub fn set_cookie_value(cookies: &[String], name: &str) -> Option<String> {
    cookies.iter().find_map(|c| {
        let (pair, _) = c.split_once(';').unwrap_or((c.as_str(), ""));
        let (n, v) = pair.split_once('=')?;
        (n.trim() == name).then(|| v.trim().to_string())
    })
}

/// Check if cookies contain a cookie being cleared (Max-Age=0)
pub fn has_cleared_cookie(cookies: &[String], name: &str) -> bool {
    cookies
        .iter()
        .any(|c| c.starts_with(&format!("{}=;", name)) && c.contains("Max-Age=0"))
}

pub fn location(response: &Response) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

pub async fn json_body(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
