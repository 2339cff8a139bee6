//! Public route classification.
//!
//! Rules are either exact paths (`/login`) or glob-style prefixes:
//! - `/docs/:path*` matches `/docs` and anything below `/docs/`
//! - `/docs/:path+` matches only paths with at least one segment below `/docs/`
//!
//! A prefix never matches across its boundary: `/sample/:path*` does not match
//! `/sample-other`.

/// A single compiled public-route rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteRule {
    Exact(String),
    /// Prefix without trailing slash; `require_segment` is the `+` variant.
    Prefix {
        prefix: String,
        require_segment: bool,
    },
}

impl RouteRule {
    /// Compile a rule string. Rules must start with `/`.
    pub fn parse(rule: &str) -> Result<Self, String> {
        if !rule.starts_with('/') {
            return Err(format!("Public route must start with '/': {}", rule));
        }
        if rule.chars().any(|c| !c.is_ascii() || c.is_whitespace()) {
            return Err(format!("Public route contains invalid characters: {}", rule));
        }

        let (head, last) = rule.rsplit_once('/').unwrap_or(("", rule));
        if let Some(param) = last.strip_prefix(':') {
            let require_segment = match param.chars().last() {
                Some('*') => false,
                Some('+') => true,
                _ => return Err(format!("Unsupported route parameter in: {}", rule)),
            };
            let name = &param[..param.len() - 1];
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(format!("Invalid route parameter name in: {}", rule));
            }
            if head.contains(':') {
                return Err(format!("Only a trailing parameter is supported: {}", rule));
            }
            return Ok(RouteRule::Prefix {
                prefix: head.to_string(),
                require_segment,
            });
        }

        if rule.contains(':') {
            return Err(format!("Only a trailing parameter is supported: {}", rule));
        }
        Ok(RouteRule::Exact(trim_trailing_slash(rule).to_string()))
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            RouteRule::Exact(exact) => trim_trailing_slash(path) == exact,
            RouteRule::Prefix {
                prefix,
                require_segment,
            } => {
                if !*require_segment && path == prefix {
                    return true;
                }
                let Some(rest) = path
                    .strip_prefix(prefix.as_str())
                    .and_then(|rest| rest.strip_prefix('/'))
                else {
                    return false;
                };
                !*require_segment || !(rest.is_empty() || rest.starts_with('/'))
            }
        }
    }
}

fn trim_trailing_slash(path: &str) -> &str {
    if path.len() > 1 {
        path.strip_suffix('/').unwrap_or(path)
    } else {
        path
    }
}

/// The set of routes that do not require authentication.
#[derive(Debug, Clone, Default)]
pub struct PublicRoutes {
    rules: Vec<RouteRule>,
}

impl PublicRoutes {
    pub fn new<I, S>(rules: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rules = rules
            .into_iter()
            .map(|r| RouteRule::parse(r.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Whether `path` is public. Paths that are not absolute are never public.
    pub fn is_public(&self, path: &str) -> bool {
        if !path.starts_with('/') {
            return false;
        }
        self.rules.iter().any(|rule| rule.matches(path))
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }
}

/// Default public routes for a fresh deployment.
pub const DEFAULT_PUBLIC_ROUTES: &[&str] = &[
    "/",
    "/login",
    "/register",
    "/forgot-password",
    "/assets/:path*",
    "/public/:path*",
];

#[cfg(test)]
mod tests {
    use super::*;

    fn routes(rules: &[&str]) -> PublicRoutes {
        PublicRoutes::new(rules.iter().copied()).unwrap()
    }

    #[test]
    fn test_exact_match() {
        let r = routes(&["/", "/login"]);
        assert!(r.is_public("/"));
        assert!(r.is_public("/login"));
        assert!(r.is_public("/login/"));
        assert!(!r.is_public("/login/extra"));
        assert!(!r.is_public("/dashboard"));
    }

    #[test]
    fn test_star_prefix() {
        let r = routes(&["/sample/:path*"]);
        assert!(r.is_public("/sample"));
        assert!(r.is_public("/sample/"));
        assert!(r.is_public("/sample/a/b"));
        assert!(!r.is_public("/sample-other"));
        assert!(!r.is_public("/samples"));
    }

    #[test]
    fn test_plus_prefix_requires_segment() {
        let r = routes(&["/docs/:slug+"]);
        assert!(!r.is_public("/docs"));
        assert!(!r.is_public("/docs/"));
        assert!(!r.is_public("/docs//x"));
        assert!(r.is_public("/docs/intro"));
        assert!(r.is_public("/docs/intro/more"));
        assert!(!r.is_public("/docs-old/intro"));
    }

    #[test]
    fn test_root_star_matches_everything() {
        let r = routes(&["/:path*"]);
        assert!(r.is_public("/"));
        assert!(r.is_public("/anything/at/all"));
    }

    #[test]
    fn test_fail_closed_on_non_absolute_paths() {
        let r = routes(&["/:path*"]);
        assert!(!r.is_public(""));
        assert!(!r.is_public("login"));
    }

    #[test]
    fn test_rejects_bad_rules() {
        assert!(RouteRule::parse("login").is_err());
        assert!(RouteRule::parse("/a/:id").is_err());
        assert!(RouteRule::parse("/a/:id/b").is_err());
        assert!(RouteRule::parse("/a/:*").is_err());
        assert!(RouteRule::parse("/a b").is_err());
    }

    #[test]
    fn test_default_routes_compile() {
        let r = PublicRoutes::new(DEFAULT_PUBLIC_ROUTES.iter().copied()).unwrap();
        assert!(r.is_public("/assets/app.js"));
        assert!(!r.is_public("/dashboard"));
    }
}
