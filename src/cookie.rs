//! Cookie datatypes for the response cookie store.
//!
//! Only the subset the client needs: parse `Set-Cookie` values, stamp them
//! with the origin of the request that produced them, and render a `Cookie`
//! request header for a matching origin. No expiry eviction.

use std::fmt;

/// A single cookie, as received in a `Set-Cookie` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    name: String,
    value: String,
    domain: Option<String>,
    path: Option<String>,
    secure: bool,
    http_only: bool,
    origin_domain: String,
    origin_path: String,
}

impl Cookie {
    /// Parses a `Set-Cookie` header value. Attributes other than `Domain`,
    /// `Path`, `Secure` and `HttpOnly` are ignored. Returns `None` when the
    /// first segment is not a `name=value` pair.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut segments = raw.split(';');
        let (name, value) = segments.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }

        let mut cookie = Self {
            name: name.to_string(),
            value: value.trim().to_string(),
            domain: None,
            path: None,
            secure: false,
            http_only: false,
            origin_domain: String::new(),
            origin_path: String::new(),
        };

        for segment in segments {
            let segment = segment.trim();
            match segment.split_once('=') {
                Some((k, v)) if k.eq_ignore_ascii_case("domain") => {
                    cookie.domain = Some(v.trim().trim_start_matches('.').to_string());
                }
                Some((k, v)) if k.eq_ignore_ascii_case("path") => {
                    cookie.path = Some(v.trim().to_string());
                }
                None if segment.eq_ignore_ascii_case("secure") => cookie.secure = true,
                None if segment.eq_ignore_ascii_case("httponly") => cookie.http_only = true,
                _ => {}
            }
        }

        Some(cookie)
    }

    /// Stamps the cookie with the domain and path of the request it arrived
    /// on. A missing `Domain`/`Path` attribute falls back to the origin.
    pub(crate) fn set_origin(&mut self, domain: &str, path: &str) {
        self.origin_domain = domain.to_string();
        self.origin_path = path.to_string();
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Effective domain: the `Domain` attribute, or the origin domain.
    pub fn domain(&self) -> &str {
        self.domain.as_deref().unwrap_or(&self.origin_domain)
    }

    /// Effective path: the `Path` attribute, or the origin path.
    pub fn path(&self) -> &str {
        self.path.as_deref().unwrap_or(&self.origin_path)
    }

    #[inline]
    pub fn secure(&self) -> bool {
        self.secure
    }

    #[inline]
    pub fn http_only(&self) -> bool {
        self.http_only
    }

    fn matches(&self, domain: &str, path: &str, tls: bool) -> bool {
        if self.secure && !tls {
            return false;
        }
        let own = self.domain();
        let domain_ok = domain == own
            || (domain.len() > own.len()
                && domain.ends_with(own)
                && domain.as_bytes()[domain.len() - own.len() - 1] == b'.');
        let own_path = self.path();
        let path_ok = own_path.is_empty() || path.starts_with(own_path);
        domain_ok && path_ok
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// Cookie store keyed by (domain, path, name); later insertions replace
/// earlier ones with the same key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    cookies: Vec<Cookie>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, cookie: Cookie) {
        if let Some(existing) = self.cookies.iter_mut().find(|c| {
            c.name == cookie.name && c.domain() == cookie.domain() && c.path() == cookie.path()
        }) {
            *existing = cookie;
        } else {
            self.cookies.push(cookie);
        }
    }

    /// Merges `other` into `self`, replacing same-key cookies.
    pub fn update(&mut self, other: &CookieJar) {
        for cookie in &other.cookies {
            self.add(cookie.clone());
        }
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Cookie> {
        self.cookies.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Cookie> {
        self.cookies.iter().find(|c| c.name == name)
    }

    /// Renders the `Cookie` request-header value for a target origin, or
    /// `None` when nothing matches.
    pub fn header_value(&self, domain: &str, path: &str, tls: bool) -> Option<String> {
        let mut out = String::new();
        for cookie in self.cookies.iter().filter(|c| c.matches(domain, path, tls)) {
            if !out.is_empty() {
                out.push_str("; ");
            }
            out.push_str(&cookie.to_string());
        }
        (!out.is_empty()).then_some(out)
    }
}
