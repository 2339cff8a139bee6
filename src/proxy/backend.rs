//! Where the backend lives and which of its endpoints are auth endpoints.

use url::Url;

/// Backend API location and its login/refresh/logout endpoint paths.
///
/// Endpoint paths are relative to `base_url`, e.g. `base_url` of
/// `http://127.0.0.1:8000/v1` and `refresh_path` of `/auth/refresh`.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: Url,
    pub login_path: String,
    pub refresh_path: String,
    pub logout_path: String,
}

impl BackendConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            login_path: "/auth/login".to_string(),
            refresh_path: "/auth/refresh".to_string(),
            logout_path: "/auth/logout".to_string(),
        }
    }

    #[must_use]
    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    #[must_use]
    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    #[must_use]
    pub fn with_logout_path(mut self, path: impl Into<String>) -> Self {
        self.logout_path = path.into();
        self
    }

    /// Absolute backend URL for a path suffix and optional raw query string.
    /// The suffix and query are passed through unmodified.
    pub fn url_for(&self, suffix: &str, query: Option<&str>) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        let suffix = suffix.trim_start_matches('/');
        match query {
            Some(q) if !q.is_empty() => format!("{}/{}?{}", base, suffix, q),
            _ => format!("{}/{}", base, suffix),
        }
    }

    pub fn refresh_url(&self) -> String {
        self.url_for(&self.refresh_path, None)
    }

    /// Whether `suffix` is one of the backend's own login/refresh/logout endpoints.
    pub fn is_auth_endpoint(&self, suffix: &str) -> bool {
        let suffix = normalize(suffix);
        [&self.login_path, &self.refresh_path, &self.logout_path]
            .iter()
            .any(|p| normalize(p) == suffix)
    }

    /// Whether a 401 from `suffix` may trigger a refresh-and-retry.
    pub fn is_refresh_eligible(&self, suffix: &str) -> bool {
        !self.is_auth_endpoint(suffix)
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    format!("/{}", trimmed)
}

/// Whether a forwarded path suffix stays below the backend base path.
/// Dot segments (plain or percent-encoded) are refused.
pub fn is_safe_suffix(suffix: &str) -> bool {
    suffix.split('/').all(|segment| {
        let lower = segment.to_ascii_lowercase().replace("%2e", ".");
        lower != "." && lower != ".."
    }) && !suffix.contains('\\')
}
