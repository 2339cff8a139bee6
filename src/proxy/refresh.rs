//! Token refresh coordination (singleflight).
//!
//! Concurrent requests that hit an expired access token and share the same
//! refresh credential collapse into one call to the backend refresh endpoint.
//! Every caller of that attempt receives the same `Arc<RefreshOutcome>`.
//!
//! The registry is process-local. Several edge instances behind a load balancer
//! may each refresh the same credential once; this reduces refresh storms but
//! does not eliminate them across instances.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, error, info, warn};

use super::backend::BackendConfig;
use super::set_cookie::{find_cookie_value, is_deletion, rewrite_all};
use crate::auth::{ACCESS_COOKIE_NAME, AuthReason, REFRESH_COOKIE_NAME};

/// Longest refresh credential accepted for a refresh attempt.
const MAX_CREDENTIAL_LEN: usize = 8192;

/// Header used to correlate edge and backend logs.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// SHA-256 of a refresh credential. Used as the coordination key so raw
/// credentials never become map keys or log fields.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RefreshIdentity([u8; 32]);

impl RefreshIdentity {
    pub fn of(credential: &str) -> Self {
        Self(openssl::sha::sha256(credential.as_bytes()))
    }

    /// First 12 hex characters, for logs.
    pub fn short(&self) -> String {
        self.0[..6].iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Debug for RefreshIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RefreshIdentity({})", self.short())
    }
}

/// Result of one refresh attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Backend answered 2xx and rotated the access credential.
    Refreshed {
        access_token: String,
        /// Rewritten Set-Cookie lines, in backend order.
        cookies: Vec<String>,
    },
    /// Anything else. `cookies` holds only deletion directives.
    Failed {
        cookies: Vec<String>,
        reason: Option<AuthReason>,
    },
}

impl RefreshOutcome {
    fn failed() -> Self {
        RefreshOutcome::Failed {
            cookies: Vec::new(),
            reason: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, RefreshOutcome::Refreshed { .. })
    }

    pub fn access_token(&self) -> Option<&str> {
        match self {
            RefreshOutcome::Refreshed { access_token, .. } => Some(access_token),
            RefreshOutcome::Failed { .. } => None,
        }
    }

    pub fn cookies(&self) -> &[String] {
        match self {
            RefreshOutcome::Refreshed { cookies, .. } | RefreshOutcome::Failed { cookies, .. } => {
                cookies
            }
        }
    }

    pub fn reason(&self) -> Option<&AuthReason> {
        match self {
            RefreshOutcome::Refreshed { .. } => None,
            RefreshOutcome::Failed { reason, .. } => reason.as_ref(),
        }
    }
}

/// Request headers relayed on the refresh call for the backend's CSRF checks.
#[derive(Debug, Clone, Default)]
pub struct RefreshContext {
    pub origin: Option<HeaderValue>,
    pub referer: Option<HeaderValue>,
    pub request_id: Option<HeaderValue>,
}

impl RefreshContext {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            origin: headers.get(header::ORIGIN).cloned(),
            referer: headers.get(header::REFERER).cloned(),
            request_id: headers.get(REQUEST_ID_HEADER).cloned(),
        }
    }
}

type InflightRefresh = Shared<BoxFuture<'static, Arc<RefreshOutcome>>>;

struct InflightEntry {
    attempt: u64,
    refresh: InflightRefresh,
}

type Registry = Arc<Mutex<HashMap<RefreshIdentity, InflightEntry>>>;

/// Removes its registry entry when the refresh task ends, however it ends.
struct InflightGuard {
    registry: Registry,
    identity: RefreshIdentity,
    attempt: u64,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        if registry
            .get(&self.identity)
            .is_some_and(|entry| entry.attempt == self.attempt)
        {
            registry.remove(&self.identity);
        }
    }
}

/// Owns the in-flight refresh registry for the lifetime of the process.
pub struct RefreshCoordinator {
    client: reqwest::Client,
    backend: BackendConfig,
    timeout: Duration,
    registry: Registry,
    next_attempt: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(client: reqwest::Client, backend: BackendConfig, timeout: Duration) -> Self {
        Self {
            client,
            backend,
            timeout,
            registry: Arc::new(Mutex::new(HashMap::new())),
            next_attempt: AtomicU64::new(0),
        }
    }

    /// Refresh using `refresh_token`, joining an attempt already in flight for
    /// the same credential.
    ///
    /// A missing or unusable credential fails immediately without touching the
    /// network or the registry. Outcomes are never cached: once an attempt
    /// settles, the next call starts a new one.
    pub async fn refresh_once(
        &self,
        refresh_token: Option<&str>,
        ctx: &RefreshContext,
    ) -> Arc<RefreshOutcome> {
        let Some(token) = refresh_token.filter(|t| is_usable_credential(t)) else {
            return Arc::new(RefreshOutcome::failed());
        };
        let identity = RefreshIdentity::of(token);

        let refresh = {
            let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            match registry.get(&identity) {
                Some(entry) => {
                    debug!(identity = %identity.short(), "Joining in-flight refresh");
                    entry.refresh.clone()
                }
                None => {
                    let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed);
                    let refresh = self.spawn_refresh(identity.clone(), attempt, token, ctx);
                    registry.insert(
                        identity,
                        InflightEntry {
                            attempt,
                            refresh: refresh.clone(),
                        },
                    );
                    refresh
                }
            }
        };

        refresh.await
    }

    /// Number of refresh attempts currently in flight.
    pub fn inflight_len(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Run the network call on its own task so it finishes, and clears its
    /// registry entry, even if every waiter goes away.
    fn spawn_refresh(
        &self,
        identity: RefreshIdentity,
        attempt: u64,
        token: &str,
        ctx: &RefreshContext,
    ) -> InflightRefresh {
        let guard = InflightGuard {
            registry: self.registry.clone(),
            identity: identity.clone(),
            attempt,
        };
        let client = self.client.clone();
        let url = self.backend.refresh_url();
        let timeout = self.timeout;
        let token = token.to_string();
        let ctx = ctx.clone();

        let task = tokio::spawn(async move {
            let _guard = guard;
            info!(identity = %identity.short(), "Refreshing access credential");
            let outcome = call_refresh_endpoint(&client, &url, timeout, &token, &ctx).await;
            match &outcome {
                RefreshOutcome::Refreshed { .. } => {
                    info!(identity = %identity.short(), "Refresh succeeded")
                }
                RefreshOutcome::Failed { reason, .. } => warn!(
                    identity = %identity.short(),
                    code = reason.as_ref().and_then(|r| r.code.as_deref()).unwrap_or("-"),
                    "Refresh failed"
                ),
            }
            Arc::new(outcome)
        });

        async move {
            task.await.unwrap_or_else(|e| {
                error!(error = %e, "Refresh task did not complete");
                Arc::new(RefreshOutcome::failed())
            })
        }
        .boxed()
        .shared()
    }
}

fn is_usable_credential(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= MAX_CREDENTIAL_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_graphic() && b != b';' && b != b',' && b != b'"' && b != b'\\')
}

/// POST to the refresh endpoint with only the refresh cookie and classify the answer.
async fn call_refresh_endpoint(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
    token: &str,
    ctx: &RefreshContext,
) -> RefreshOutcome {
    let mut request = client
        .post(url)
        .timeout(timeout)
        .header(header::COOKIE, format!("{}={}", REFRESH_COOKIE_NAME, token))
        .header(header::CONTENT_TYPE, "application/json")
        .body("{}");
    if let Some(origin) = &ctx.origin {
        request = request.header(header::ORIGIN, origin.clone());
    }
    if let Some(referer) = &ctx.referer {
        request = request.header(header::REFERER, referer.clone());
    }
    if let Some(request_id) = &ctx.request_id {
        request = request.header(REQUEST_ID_HEADER, request_id.clone());
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, timed_out = e.is_timeout(), "Refresh request failed");
            return RefreshOutcome::failed();
        }
    };

    let status = response.status();
    let cookies = rewrite_all(
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok()),
    );

    if status.is_success() {
        if let Some(access_token) = find_cookie_value(&cookies, ACCESS_COOKIE_NAME) {
            return RefreshOutcome::Refreshed {
                access_token: access_token.to_string(),
                cookies,
            };
        }
        warn!(status = %status, "Refresh answered success without a new access credential");
        return RefreshOutcome::Failed {
            cookies: deletions_only(cookies),
            reason: None,
        };
    }

    // Only an authoritative rejection explains itself to the login page.
    let reason = if status == StatusCode::UNAUTHORIZED {
        match response.bytes().await {
            Ok(body) => AuthReason::from_error_body(&body),
            Err(e) => {
                debug!(error = %e, "Could not read refresh error body");
                None
            }
        }
    } else {
        warn!(status = %status, "Refresh endpoint answered neither success nor 401");
        None
    };
    RefreshOutcome::Failed {
        cookies: deletions_only(cookies),
        reason,
    }
}

fn deletions_only(cookies: Vec<String>) -> Vec<String> {
    cookies.into_iter().filter(|c| is_deletion(c)).collect()
}
