//! Rate limiting for the session bootstrap endpoint.
//!
//! Every bootstrap hit may cost a backend refresh call, so it is limited per
//! client IP with a token bucket.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{num::NonZeroU32, sync::Arc};
use tracing::debug;

use crate::auth::extract_client_ip;
use crate::cli::IpExtractor;
use crate::error::ProxyError;

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

const BOOTSTRAP_PER_SEC: u32 = 10;
const BOOTSTRAP_BURST: u32 = 20;

/// Rate limiting configuration for the bootstrap endpoint.
#[derive(Clone)]
pub struct RateLimitConfig {
    pub bootstrap: Arc<IpLimiter>,
    /// Trusted client IP header; the socket address is used when unset.
    pub ip_extractor: Option<IpExtractor>,
}

impl RateLimitConfig {
    /// Default limits: 10 requests per second per IP, bursts of 20.
    pub fn new(ip_extractor: Option<IpExtractor>) -> Self {
        Self::with_quota(BOOTSTRAP_PER_SEC, BOOTSTRAP_BURST, ip_extractor)
    }

    /// Custom limits. Zero values are raised to one.
    pub fn with_quota(per_second: u32, burst: u32, ip_extractor: Option<IpExtractor>) -> Self {
        let per_second = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
        Self {
            bootstrap: Arc::new(RateLimiter::keyed(
                Quota::per_second(per_second).allow_burst(burst),
            )),
            ip_extractor,
        }
    }
}

/// Middleware for rate limiting the bootstrap endpoint.
pub async fn rate_limit_bootstrap(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let ip = match extract_client_ip(&request, config.ip_extractor.as_ref()) {
        Ok(ip) => ip,
        Err(reason) => {
            debug!(reason, "Rejecting bootstrap request without client IP");
            return ProxyError::UnknownClient.into_response();
        }
    };

    match config.bootstrap.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => ProxyError::RateLimited.into_response(),
    }
}
