//! Route matching predicates.
//!
//! # Responsibilities
//! - Match host header (exact match, case-insensitive)
//! - Match path prefix (case-sensitive)
//! - Match allowed methods and the secure-channel requirement
//! - Combine conditions with AND semantics
//!
//! # Design Decisions
//! - Host matching is case-insensitive (per HTTP spec)
//! - Path matching is case-sensitive
//! - Empty condition = always matches (wildcard)
//! - No regex to guarantee O(n) matching

use axum::body::Body;
use axum::http::{Method, Request};
use serde::{Deserialize, Serialize};

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the request, arriving on a channel with the given
    /// security, matches this condition.
    fn matches(&self, req: &Request<Body>, is_secure: bool) -> bool;
}

/// Matches the Host header.
#[derive(Debug, Clone)]
pub struct HostMatcher {
    expected_host: String,
}

impl HostMatcher {
    /// Create a new host matcher.
    /// The host is normalized to lowercase for case-insensitive matching.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            expected_host: host.into().to_lowercase(),
        }
    }
}

impl Matcher for HostMatcher {
    fn matches(&self, req: &Request<Body>, _is_secure: bool) -> bool {
        req.headers()
            .get("host")
            .and_then(|h| h.to_str().ok())
            .map(|h| h.to_lowercase() == self.expected_host)
            .unwrap_or(false)
    }
}

/// Matches the request path prefix on a segment boundary: `/ws` claims
/// `/ws` and `/ws/chat` but not `/wsx`.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    /// Create a new path prefix matcher.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Matcher for PathPrefixMatcher {
    fn matches(&self, req: &Request<Body>, _is_secure: bool) -> bool {
        let Some(rest) = req.uri().path().strip_prefix(self.prefix.as_str()) else {
            return false;
        };
        rest.is_empty() || rest.starts_with('/') || self.prefix.ends_with('/')
    }
}

/// Matches an allow-list of methods. An empty list allows any method.
#[derive(Debug, Clone)]
pub struct MethodMatcher {
    methods: Vec<Method>,
}

impl MethodMatcher {
    pub fn new(methods: Vec<Method>) -> Self {
        Self { methods }
    }
}

impl Matcher for MethodMatcher {
    fn matches(&self, req: &Request<Body>, _is_secure: bool) -> bool {
        self.methods.is_empty() || self.methods.contains(req.method())
    }
}

/// Only matches requests that arrived over the secure channel.
#[derive(Debug, Clone, Copy)]
pub struct SecureMatcher;

impl Matcher for SecureMatcher {
    fn matches(&self, _req: &Request<Body>, is_secure: bool) -> bool {
        is_secure
    }
}

/// Combines multiple matchers with AND semantics.
#[derive(Debug)]
pub struct AndMatcher {
    matchers: Vec<Box<dyn Matcher>>,
}

impl AndMatcher {
    pub fn new(matchers: Vec<Box<dyn Matcher>>) -> Self {
        Self { matchers }
    }
}

impl Matcher for AndMatcher {
    fn matches(&self, req: &Request<Body>, is_secure: bool) -> bool {
        // All matchers must pass (AND)
        self.matchers.iter().all(|m| m.matches(req, is_secure))
    }
}

/// Declarative match conditions shared by the built-in routes.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RouteMatch {
    /// Path prefix; empty matches every path.
    pub path_prefix: String,
    /// Allowed methods by name; empty allows every method.
    pub methods: Vec<String>,
    /// Only match requests on the secure channel.
    pub require_secure: bool,
    /// Host header to match.
    pub host: Option<String>,
}

impl RouteMatch {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self {
            path_prefix: prefix.into(),
            ..Self::default()
        }
    }

    /// Compile the conditions into a matcher. Unknown method names are
    /// logged and skipped.
    pub fn compile(&self) -> AndMatcher {
        let mut matchers: Vec<Box<dyn Matcher>> = Vec::new();

        if !self.path_prefix.is_empty() {
            matchers.push(Box::new(PathPrefixMatcher::new(self.path_prefix.clone())));
        }
        if let Some(host) = &self.host {
            matchers.push(Box::new(HostMatcher::new(host.clone())));
        }
        if !self.methods.is_empty() {
            let methods = self
                .methods
                .iter()
                .filter_map(|m| match Method::from_bytes(m.to_ascii_uppercase().as_bytes()) {
                    Ok(method) => Some(method),
                    Err(_) => {
                        tracing::warn!(method = %m, "Ignoring invalid method in route config");
                        None
                    }
                })
                .collect();
            matchers.push(Box::new(MethodMatcher::new(methods)));
        }
        if self.require_secure {
            matchers.push(Box::new(SecureMatcher));
        }

        AndMatcher::new(matchers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::default()).unwrap()
    }

    #[test]
    fn test_host_matcher() {
        let matcher = HostMatcher::new("example.com");

        let req1 = Request::builder()
            .header("Host", "example.com")
            .body(Body::default())
            .unwrap();
        assert!(matcher.matches(&req1, false));

        let req2 = Request::builder()
            .header("Host", "EXAMPLE.COM")
            .body(Body::default())
            .unwrap();
        assert!(matcher.matches(&req2, false)); // Case insensitive

        let req3 = Request::builder()
            .header("Host", "other.com")
            .body(Body::default())
            .unwrap();
        assert!(!matcher.matches(&req3, false));
    }

    #[test]
    fn test_path_matcher() {
        let matcher = PathPrefixMatcher::new("/api");
        assert!(matcher.matches(&get("http://example.com/api/v1"), false));
        assert!(!matcher.matches(&get("http://example.com/images"), false));
    }

    #[test]
    fn test_path_matcher_respects_segment_boundary() {
        let matcher = PathPrefixMatcher::new("/ws");
        assert!(matcher.matches(&get("/ws"), false));
        assert!(matcher.matches(&get("/ws/chat"), false));
        assert!(!matcher.matches(&get("/wsx"), false));

        let trailing = PathPrefixMatcher::new("/static/");
        assert!(trailing.matches(&get("/static/app.js"), false));
        assert!(!trailing.matches(&get("/static"), false));

        assert!(PathPrefixMatcher::new("/").matches(&get("/anything"), false));
        assert!(PathPrefixMatcher::new("").matches(&get("/anything"), false));
    }

    #[test]
    fn test_method_matcher() {
        let matcher = MethodMatcher::new(vec![Method::POST]);
        let post = Request::builder()
            .method(Method::POST)
            .uri("/")
            .body(Body::default())
            .unwrap();
        assert!(matcher.matches(&post, false));
        assert!(!matcher.matches(&get("/"), false));

        assert!(MethodMatcher::new(Vec::new()).matches(&get("/"), false));
    }

    #[test]
    fn test_secure_matcher() {
        assert!(SecureMatcher.matches(&get("/"), true));
        assert!(!SecureMatcher.matches(&get("/"), false));
    }

    #[test]
    fn empty_route_match_is_wildcard() {
        let matcher = RouteMatch::default().compile();
        assert!(matcher.matches(&get("/anything"), false));
    }

    #[test]
    fn route_match_combines_conditions() {
        let matcher = RouteMatch {
            path_prefix: "/admin".into(),
            methods: vec!["get".into()],
            require_secure: true,
            host: None,
        }
        .compile();

        assert!(matcher.matches(&get("/admin/users"), true));
        assert!(!matcher.matches(&get("/admin/users"), false));
        assert!(!matcher.matches(&get("/public"), true));
    }
}
