//! Cookie value object.
//!
//! Tracks when a cookie was created so expiry can be judged against its
//! `Max-Age`. Cookies without a max-age are session cookies and never expire
//! by time.

use std::fmt;
use std::time::{Duration, SystemTime};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CookieError {
    #[error("cookie has no name=value pair")]
    MissingPair,

    #[error("cookie name is empty")]
    EmptyName,

    #[error("invalid Max-Age {0:?}")]
    InvalidMaxAge(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    name: String,
    value: String,
    domain: Option<String>,
    path: Option<String>,
    max_age: Option<Duration>,
    secure: bool,
    http_only: bool,
    created_at: SystemTime,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::created_at(name, value, SystemTime::now())
    }

    /// A cookie with an explicit creation time.
    pub fn created_at(name: impl Into<String>, value: impl Into<String>, created_at: SystemTime) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
            max_age: None,
            secure: false,
            http_only: false,
            created_at,
        }
    }

    /// Parse a `Set-Cookie` header value. Unknown attributes are ignored.
    pub fn parse(header: &str, created_at: SystemTime) -> Result<Self, CookieError> {
        let mut attributes = header.split(';').map(str::trim);
        let (name, value) = attributes
            .next()
            .and_then(|pair| pair.split_once('='))
            .ok_or(CookieError::MissingPair)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(CookieError::EmptyName);
        }

        let mut cookie = Self::created_at(name, value.trim().trim_matches('"'), created_at);
        for attribute in attributes {
            let (key, val) = attribute.split_once('=').unwrap_or((attribute, ""));
            match key.trim().to_ascii_lowercase().as_str() {
                "domain" => cookie.domain = Some(val.trim().trim_start_matches('.').to_string()),
                "path" => cookie.path = Some(val.trim().to_string()),
                "max-age" => {
                    let secs: i64 = val
                        .trim()
                        .parse()
                        .map_err(|_| CookieError::InvalidMaxAge(val.to_string()))?;
                    // Zero or negative means "expire now".
                    cookie.max_age = Some(Duration::from_secs(secs.max(0) as u64));
                }
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                _ => {}
            }
        }
        Ok(cookie)
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age
    }

    pub fn creation_time(&self) -> SystemTime {
        self.created_at
    }

    /// Time elapsed between creation and `now`; zero if `now` is earlier.
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.created_at).unwrap_or_default()
    }

    pub fn is_session(&self) -> bool {
        self.max_age.is_none()
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        match self.max_age {
            Some(max_age) => self.age(now) >= max_age,
            None => false,
        }
    }

    /// Same cookie slot: equal name and path, domain compared case-insensitively.
    pub fn matches(&self, other: &Cookie) -> bool {
        let same_domain = match (&self.domain, &other.domain) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            (None, None) => true,
            _ => false,
        };
        self.name == other.name && self.path == other.path && same_domain
    }
}

/// Formats as a `Set-Cookie` header value.
impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)?;
        if let Some(domain) = &self.domain {
            write!(f, "; Domain={domain}")?;
        }
        if let Some(path) = &self.path {
            write!(f, "; Path={path}")?;
        }
        if let Some(max_age) = self.max_age {
            write!(f, "; Max-Age={}", max_age.as_secs())?;
        }
        if self.secure {
            f.write_str("; Secure")?;
        }
        if self.http_only {
            f.write_str("; HttpOnly")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn expiry_follows_max_age() {
        let cookie = Cookie::created_at("sid", "abc", at(1_000)).with_max_age(Duration::from_secs(60));

        assert!(!cookie.is_session());
        assert_eq!(cookie.age(at(1_030)), Duration::from_secs(30));
        assert!(!cookie.is_expired(at(1_059)));
        assert!(cookie.is_expired(at(1_060)));
        assert_eq!(cookie.age(at(500)), Duration::ZERO);
    }

    #[test]
    fn session_cookies_never_expire() {
        let cookie = Cookie::created_at("sid", "abc", at(0));
        assert!(cookie.is_session());
        assert!(!cookie.is_expired(at(u32::MAX as u64)));
    }

    #[test]
    fn matching_ignores_value_and_domain_case() {
        let a = Cookie::new("sid", "1").with_domain("Example.com").with_path("/");
        let b = Cookie::new("sid", "2").with_domain("example.COM").with_path("/");
        let c = Cookie::new("sid", "1").with_domain("example.com").with_path("/app");

        assert!(a.matches(&b));
        assert!(!a.matches(&c));
        assert!(!a.matches(&Cookie::new("sid", "1")));
    }

    #[test]
    fn parse_and_display() {
        let cookie = Cookie::parse(
            "theme=dark; Domain=.example.com; Path=/; Max-Age=3600; Secure; HttpOnly; SameSite=Lax",
            at(0),
        )
        .unwrap();

        assert_eq!(cookie.name(), "theme");
        assert_eq!(cookie.value(), "dark");
        assert_eq!(cookie.domain(), Some("example.com"));
        assert_eq!(cookie.max_age(), Some(Duration::from_secs(3600)));
        assert_eq!(
            cookie.to_string(),
            "theme=dark; Domain=example.com; Path=/; Max-Age=3600; Secure; HttpOnly"
        );
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(Cookie::parse("novalue", at(0)), Err(CookieError::MissingPair));
        assert_eq!(Cookie::parse("=x", at(0)), Err(CookieError::EmptyName));
        assert!(matches!(
            Cookie::parse("a=b; Max-Age=soon", at(0)),
            Err(CookieError::InvalidMaxAge(_))
        ));
    }

    #[test]
    fn negative_max_age_is_already_expired() {
        let cookie = Cookie::parse("a=b; Max-Age=-1", at(10)).unwrap();
        assert!(cookie.is_expired(at(10)));
    }
}
