pub mod auth;
pub mod bootstrap;
pub mod cli;
pub mod error;
pub mod gate;
pub mod jwt;
pub mod pages;
pub mod proxy;
pub mod rate_limit;
pub mod routes;

use auth::EdgeCookies;
use axum::{Router, middleware, routing::get};
use bootstrap::{BootstrapState, bootstrap_handler};
use gate::{AuthPaths, GateState, auth_gate};
use pages::{PagesState, page_handler};
use proxy::{BackendConfig, ProxyState, RefreshCoordinator};
use rate_limit::{RateLimitConfig, rate_limit_bootstrap};
use routes::PublicRoutes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use url::Url;

pub struct ServerConfig {
    /// Backend API location and auth endpoint paths
    pub backend: BackendConfig,
    /// Edge path prefix forwarded to the backend (e.g., "/api")
    pub proxy_prefix: String,
    pub login_path: String,
    pub bootstrap_path: String,
    /// Default redirect target after authentication
    pub landing_path: String,
    /// Pages reachable without authentication
    pub public_routes: PublicRoutes,
    /// Frontend server for pages; a built-in login page is served when unset
    pub frontend_url: Option<Url>,
    /// Whether to set Secure flag on cookies issued by the edge
    pub secure_cookies: bool,
    pub refresh_timeout: Duration,
    pub upstream_timeout: Duration,
    pub max_replay_body_bytes: usize,
    /// IP extraction strategy for rate limiting (requires running behind a proxy)
    pub ip_extractor: Option<cli::IpExtractor>,
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Result<Router, reqwest::Error> {
    // Redirects from the backend or frontend are relayed to the browser, never followed.
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()?;

    let cookies = EdgeCookies::new(config.secure_cookies);
    let paths = AuthPaths {
        login_path: config.login_path.clone(),
        bootstrap_path: config.bootstrap_path.clone(),
        landing_path: config.landing_path.clone(),
    };
    let coordinator = Arc::new(RefreshCoordinator::new(
        client.clone(),
        config.backend.clone(),
        config.refresh_timeout,
    ));

    let proxy_routes = proxy::router(Arc::new(ProxyState {
        client: client.clone(),
        backend: config.backend.clone(),
        coordinator: coordinator.clone(),
        prefix: config.proxy_prefix.clone(),
        upstream_timeout: config.upstream_timeout,
        max_replay_body_bytes: config.max_replay_body_bytes,
        cookies,
    }));

    let rate_limit = Arc::new(RateLimitConfig::new(config.ip_extractor.clone()));
    let bootstrap_routes = Router::new()
        .route(&config.bootstrap_path, get(bootstrap_handler))
        .with_state(Arc::new(BootstrapState {
            coordinator,
            paths: paths.clone(),
            cookies,
        }))
        .layer(middleware::from_fn_with_state(rate_limit, rate_limit_bootstrap));

    let gate = Arc::new(GateState {
        public_routes: config.public_routes.clone(),
        paths: paths.clone(),
        cookies,
    });
    let pages = Arc::new(PagesState {
        client,
        frontend: config.frontend_url.clone(),
        login_action: format!(
            "{}/{}",
            config.proxy_prefix,
            config.backend.login_path.trim_start_matches('/')
        ),
        paths,
        timeout: config.upstream_timeout,
        cookies,
    });
    let page_routes = Router::new()
        .fallback(page_handler)
        .with_state(pages)
        .layer(middleware::from_fn_with_state(gate, auth_gate));

    Ok(Router::new()
        .merge(bootstrap_routes)
        .merge(proxy_routes)
        .fallback_service(page_routes))
}

/// Run the server on the given listener. This function blocks until the server exits.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config).map_err(std::io::Error::other)?;
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}

/// Start the server on the given port in a background task. Use port 0 to let the OS choose a random port.
/// Returns the actual address the server is listening on.
/// Note: For production use, prefer `run_server` directly in main.
pub async fn start_server(
    config: ServerConfig,
    port: u16,
) -> Result<(tokio::task::JoinHandle<()>, SocketAddr), std::io::Error> {
    let addr = format!("127.0.0.1:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = run_server(config, listener).await {
            tracing::error!(error = %e, "Server error");
        }
    });

    Ok((handle, local_addr))
}
