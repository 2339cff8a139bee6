//! CLI argument parsing, validation, and startup helpers.

use std::time::Duration;

use crate::ServerConfig;
use crate::auth::is_internal_path;
use crate::proxy::BackendConfig;
use crate::routes::{DEFAULT_PUBLIC_ROUTES, PublicRoutes};
use clap::Parser;
use tracing::error;
use url::Url;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

/// Trusted header carrying the client IP when running behind a reverse proxy.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientIpHeader {
    /// `X-Forwarded-For`, first hop
    XForwardedFor,
    /// `X-Real-IP`
    XRealIp,
    /// `CF-Connecting-IP`
    CfConnectingIp,
}

/// Reads the client IP from a trusted header.
#[derive(Clone, Debug)]
pub struct IpExtractor {
    pub header_name: &'static str,
    first_hop_only: bool,
}

impl IpExtractor {
    /// Extract and validate the IP from the header value.
    pub fn extract(&self, value: &str) -> Result<String, &'static str> {
        let candidate = if self.first_hop_only {
            value.split(',').next().unwrap_or("")
        } else {
            value
        };
        candidate
            .trim()
            .parse::<std::net::IpAddr>()
            .map(|ip| ip.to_string())
            .map_err(|_| "IP header does not contain a valid address")
    }
}

impl From<ClientIpHeader> for IpExtractor {
    fn from(header: ClientIpHeader) -> Self {
        match header {
            ClientIpHeader::XForwardedFor => Self {
                header_name: "x-forwarded-for",
                first_hop_only: true,
            },
            ClientIpHeader::XRealIp => Self {
                header_name: "x-real-ip",
                first_hop_only: false,
            },
            ClientIpHeader::CfConnectingIp => Self {
                header_name: "cf-connecting-ip",
                first_hop_only: false,
            },
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "crowgate",
    about = "Authenticating edge proxy between browsers and a token-based backend API"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "CROWGATE_PORT", default_value = "7300")]
    pub port: u16,

    /// Backend API base URL, e.g. "http://127.0.0.1:8000/v1"
    #[arg(long, env = "CROWGATE_BACKEND_URL", value_parser = validate_http_url)]
    pub backend_url: Url,

    /// Backend login endpoint, relative to the backend URL
    #[arg(long, env = "CROWGATE_BACKEND_LOGIN_PATH", default_value = "/auth/login", value_parser = validate_path)]
    pub backend_login_path: String,

    /// Backend refresh endpoint, relative to the backend URL
    #[arg(long, env = "CROWGATE_BACKEND_REFRESH_PATH", default_value = "/auth/refresh", value_parser = validate_path)]
    pub backend_refresh_path: String,

    /// Backend logout endpoint, relative to the backend URL
    #[arg(long, env = "CROWGATE_BACKEND_LOGOUT_PATH", default_value = "/auth/logout", value_parser = validate_path)]
    pub backend_logout_path: String,

    /// Edge path prefix forwarded to the backend
    #[arg(long, env = "CROWGATE_PROXY_PREFIX", default_value = "/api", value_parser = validate_prefix)]
    pub proxy_prefix: String,

    /// Login page path
    #[arg(long, env = "CROWGATE_LOGIN_PATH", default_value = "/login", value_parser = validate_path)]
    pub login_path: String,

    /// Session bootstrap endpoint path
    #[arg(long, env = "CROWGATE_BOOTSTRAP_PATH", default_value = "/auth/bootstrap", value_parser = validate_path)]
    pub bootstrap_path: String,

    /// Where authenticated visitors land when no return path is stored
    #[arg(long, env = "CROWGATE_LANDING_PATH", default_value = "/dashboard", value_parser = validate_landing_path)]
    pub landing_path: String,

    /// Route that needs no authentication (repeatable). Supports "/prefix/:path*" and "/prefix/:path+"
    #[arg(long = "public-route", env = "CROWGATE_PUBLIC_ROUTES", value_delimiter = ',')]
    pub public_routes: Vec<String>,

    /// Frontend server to relay page requests to. Without it a built-in login page is served
    #[arg(long, env = "CROWGATE_FRONTEND_URL", value_parser = validate_http_url)]
    pub frontend_url: Option<Url>,

    /// Public origin of the edge, e.g. "https://app.example.com". HTTPS enables secure cookies
    #[arg(long, env = "CROWGATE_PUBLIC_ORIGIN", value_parser = validate_http_url)]
    pub public_origin: Option<Url>,

    /// Set the Secure flag on cookies issued by the edge
    #[arg(long, env = "CROWGATE_SECURE_COOKIES")]
    pub secure_cookies: bool,

    /// Timeout for the backend refresh call, in seconds
    #[arg(long, env = "CROWGATE_REFRESH_TIMEOUT_SECS", default_value = "10")]
    pub refresh_timeout_secs: u64,

    /// Timeout for forwarded backend and frontend calls, in seconds
    #[arg(long, env = "CROWGATE_UPSTREAM_TIMEOUT_SECS", default_value = "30")]
    pub upstream_timeout_secs: u64,

    /// Largest request body buffered so it can be replayed after a refresh
    #[arg(long, env = "CROWGATE_MAX_REPLAY_BODY_BYTES", default_value = "1048576")]
    pub max_replay_body_bytes: usize,

    /// Take the client IP from this header instead of the socket (only behind a trusted proxy)
    #[arg(long, env = "CROWGATE_IP_HEADER")]
    pub ip_header: Option<ClientIpHeader>,

    /// Log output format
    #[arg(short, long, env = "CROWGATE_LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,
}

fn validate_path(s: &str) -> Result<String, String> {
    if !s.starts_with('/') {
        return Err(format!("Path must start with '/': {}", s));
    }

    if s.len() > 1 && s.ends_with('/') {
        return Err(format!("Path must not end with '/': {}", s));
    }

    if s.chars().any(|c| !c.is_ascii() || c.is_whitespace()) {
        return Err(format!("Path contains invalid characters: {}", s));
    }

    Ok(s.to_string())
}

fn validate_prefix(s: &str) -> Result<String, String> {
    let prefix = validate_path(s)?;
    if prefix == "/" {
        return Err("Proxy prefix must not be '/'".to_string());
    }
    if prefix.contains(['{', '}', ':', '*']) {
        return Err(format!("Proxy prefix contains route syntax: {}", s));
    }
    Ok(prefix)
}

fn validate_landing_path(s: &str) -> Result<String, String> {
    let path = validate_path(s)?;
    if !is_internal_path(&path) {
        return Err(format!("Landing path is not a safe internal path: {}", s));
    }
    Ok(path)
}

fn validate_http_url(s: &str) -> Result<Url, String> {
    let url = Url::parse(s).map_err(|e| format!("Invalid URL {}: {}", s, e))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(format!("URL must use http or https: {}", s));
    }
    if url.host_str().is_none() {
        return Err(format!("URL has no host: {}", s));
    }
    Ok(url)
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Build ServerConfig from validated arguments.
/// Returns None and logs an error if the public routes do not compile.
pub fn build_config(args: Args) -> Option<ServerConfig> {
    let public_routes = if args.public_routes.is_empty() {
        PublicRoutes::new(DEFAULT_PUBLIC_ROUTES)
    } else {
        PublicRoutes::new(&args.public_routes)
    };
    let public_routes = match public_routes {
        Ok(routes) => routes,
        Err(e) => {
            error!(error = %e, "Invalid public route");
            return None;
        }
    };

    let secure_cookies = args.secure_cookies
        || args
            .public_origin
            .as_ref()
            .is_some_and(|origin| origin.scheme() == "https");

    let backend = BackendConfig::new(args.backend_url)
        .with_login_path(args.backend_login_path)
        .with_refresh_path(args.backend_refresh_path)
        .with_logout_path(args.backend_logout_path);

    Some(ServerConfig {
        backend,
        proxy_prefix: args.proxy_prefix,
        login_path: args.login_path,
        bootstrap_path: args.bootstrap_path,
        landing_path: args.landing_path,
        public_routes,
        frontend_url: args.frontend_url,
        secure_cookies,
        refresh_timeout: Duration::from_secs(args.refresh_timeout_secs),
        upstream_timeout: Duration::from_secs(args.upstream_timeout_secs),
        max_replay_body_bytes: args.max_replay_body_bytes,
        ip_extractor: args.ip_header.map(IpExtractor::from),
    })
}
