use std::cell::RefCell;
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use http::header::{
    HeaderMap, HeaderValue, ACCEPT_ENCODING, AUTHORIZATION, CONNECTION, CONTENT_LENGTH, COOKIE,
    HOST,
};
use http::{Method, Uri};

use crate::auth::Auth;
use crate::cookie::CookieJar;
use crate::error::{Error, ErrorKind};
use crate::key::Key;
use crate::response::Response;

/// Streaming body callback. Invoked with `Some(chunk)` for every body slice
/// as it arrives, then once with `None` and the final error (if any) when the
/// connection reaches a terminal state.
pub type BodyCallback = Rc<RefCell<dyn FnMut(Option<&[u8]>, Option<&Error>)>>;

/// Invoked exactly once with the assembled response at finalization.
pub type FinalCallback = Rc<RefCell<dyn FnMut(&Response)>>;

/// TLS material and verification policy for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsOptions {
    /// Verify the peer certificate chain. On by default; turning it off
    /// installs a verifier that accepts anything.
    pub always_verify_peer: bool,
    /// Directory of PEM files added to the trust roots.
    pub verify_path: Option<PathBuf>,
    /// Single PEM bundle added to the trust roots.
    pub verify_filename: Option<PathBuf>,
    /// Client certificate chain (PEM file), paired with `private_key_file`.
    pub certificate_file: Option<PathBuf>,
    /// Client private key (PEM file).
    pub private_key_file: Option<PathBuf>,
    /// Extra trust roots, inline PEM.
    pub ssl_certs: Option<String>,
    /// Client certificate chain and private key, inline PEM.
    pub ssl_auth: Option<(String, String)>,
}

impl Default for TlsOptions {
    fn default() -> Self {
        Self {
            always_verify_peer: true,
            verify_path: None,
            verify_filename: None,
            certificate_file: None,
            private_key_file: None,
            ssl_certs: None,
            ssl_auth: None,
        }
    }
}

/// A request under construction; after [`prepare`](Request::prepare) it is
/// the immutable description a connection runs against.
///
/// URL pieces set individually override the corresponding part of the full
/// `url` string; `prepare` assembles them, parses the auth literal, and
/// derives the wire headers (`Host`, `Connection`, `Authorization`,
/// `Content-Length`, `Cookie`, `Accept-Encoding`).
#[derive(Clone)]
pub struct Request {
    url: Option<String>,
    scheme: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    path: Option<String>,
    query: Option<String>,
    params: Vec<(String, String)>,

    uri: Uri,
    key: Option<Key>,

    method: Method,
    headers: HeaderMap,
    body: Option<Bytes>,
    auth: Option<Auth>,
    auth_literal: Option<String>,
    cookies: CookieJar,
    tls: TlsOptions,

    timeout: Duration,
    store_timeout: Duration,
    redirect: bool,
    redirect_limit: u32,
    keep_alive: bool,
    cache_redirects: bool,
    throw_on_error: bool,
    gzip: bool,

    body_callback: Option<BodyCallback>,
    final_callback: Option<FinalCallback>,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            url: None,
            scheme: None,
            host: None,
            port: None,
            path: None,
            query: None,
            params: Vec::new(),
            uri: Uri::from_static("/"),
            key: None,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            auth: None,
            auth_literal: None,
            cookies: CookieJar::new(),
            tls: TlsOptions::default(),
            timeout: Duration::from_secs(30),
            store_timeout: Duration::from_secs(60),
            redirect: true,
            redirect_limit: 10,
            keep_alive: false,
            cache_redirects: false,
            throw_on_error: false,
            gzip: false,
            body_callback: None,
            final_callback: None,
        }
    }
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    // ===== options =====

    pub fn url(&mut self, url: impl Into<String>) {
        self.url = Some(url.into());
    }

    pub fn scheme(&mut self, scheme: impl Into<String>) {
        self.scheme = Some(scheme.into());
    }

    pub fn host(&mut self, host: impl Into<String>) {
        self.host = Some(host.into());
    }

    pub fn port(&mut self, port: u16) {
        self.port = Some(port);
    }

    pub fn path(&mut self, path: impl Into<String>) {
        self.path = Some(path.into());
    }

    pub fn query(&mut self, query: impl Into<String>) {
        self.query = Some(query.into());
    }

    pub fn param(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.params.push((name.into(), value.into()));
    }

    pub fn method(&mut self, method: Method) {
        self.method = method;
    }

    pub fn header(&mut self, name: http::header::HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    pub fn headers(&mut self, headers: HeaderMap) {
        self.headers = headers;
    }

    pub fn body(&mut self, body: impl Into<Bytes>) {
        self.body = Some(body.into());
    }

    /// Credentials from a `login:password` literal; parsed at `prepare`.
    pub fn auth(&mut self, literal: impl Into<String>) {
        self.auth_literal = Some(literal.into());
    }

    pub fn auth_pair(&mut self, auth: Auth) {
        self.auth = Some(auth);
        self.auth_literal = None;
    }

    pub fn cookies(&mut self, cookies: CookieJar) {
        self.cookies = cookies;
    }

    pub fn timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn store_timeout(&mut self, store_timeout: Duration) {
        self.store_timeout = store_timeout;
    }

    pub fn redirect(&mut self, redirect: bool) {
        self.redirect = redirect;
    }

    pub fn redirect_count(&mut self, limit: u32) {
        self.redirect_limit = limit;
    }

    pub fn keep_alive(&mut self, keep_alive: bool) {
        self.keep_alive = keep_alive;
    }

    pub fn cache_redirects(&mut self, cache_redirects: bool) {
        self.cache_redirects = cache_redirects;
    }

    pub fn throw_on_error(&mut self, throw_on_error: bool) {
        self.throw_on_error = throw_on_error;
    }

    pub fn gzip(&mut self, gzip: bool) {
        self.gzip = gzip;
    }

    pub fn body_callback(&mut self, cb: impl FnMut(Option<&[u8]>, Option<&Error>) + 'static) {
        self.body_callback = Some(Rc::new(RefCell::new(cb)));
    }

    pub fn final_callback(&mut self, cb: impl FnMut(&Response) + 'static) {
        self.final_callback = Some(Rc::new(RefCell::new(cb)));
    }

    pub fn tls_mut(&mut self) -> &mut TlsOptions {
        &mut self.tls
    }

    // ===== prepare / encode =====

    /// Assembles the target URI from the URL string and piecewise overrides,
    /// parses the auth literal, and derives the wire headers. Must succeed
    /// before the request can be sent.
    pub fn prepare(&mut self) -> Result<(), Error> {
        let base: Option<Uri> = match &self.url {
            Some(url) => Some(
                url.parse()
                    .map_err(|e| Error::new(ErrorKind::Uri, format!("bad url {url:?}: {e}")))?,
            ),
            None => None,
        };

        let scheme = self
            .scheme
            .clone()
            .or_else(|| base.as_ref().and_then(|u| u.scheme_str().map(String::from)))
            .unwrap_or_else(|| "http".to_string());
        let host = self
            .host
            .clone()
            .or_else(|| base.as_ref().and_then(|u| u.host().map(String::from)))
            .ok_or_else(|| Error::new(ErrorKind::Uri, "missing host"))?;
        let port = self.port.or_else(|| base.as_ref().and_then(Uri::port_u16));
        let path = self
            .path
            .clone()
            .or_else(|| base.as_ref().map(|u| u.path().to_string()))
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "/".to_string());
        let mut query = self
            .query
            .clone()
            .or_else(|| base.as_ref().and_then(|u| u.query().map(String::from)))
            .unwrap_or_default();
        for (name, value) in &self.params {
            if !query.is_empty() {
                query.push('&');
            }
            query.push_str(name);
            query.push('=');
            query.push_str(value);
        }

        let mut assembled = format!("{scheme}://{host}");
        if let Some(port) = port {
            assembled.push_str(&format!(":{port}"));
        }
        assembled.push_str(&path);
        if !query.is_empty() {
            assembled.push('?');
            assembled.push_str(&query);
        }
        self.uri = assembled
            .parse()
            .map_err(|e| Error::new(ErrorKind::Uri, format!("bad url {assembled:?}: {e}")))?;

        // Validates the scheme and fixes the connection identity.
        let key = Key::try_from(&self.uri)?;

        if let Some(literal) = &self.auth_literal {
            self.auth = Some(literal.parse()?);
        }

        let host_header = match self.uri.port_u16() {
            Some(p) => format!("{host}:{p}"),
            None => host.clone(),
        };
        self.headers.insert(
            HOST,
            HeaderValue::from_str(&host_header)
                .map_err(|_| Error::new(ErrorKind::Uri, "invalid host header"))?,
        );

        // derived headers are owned by their options, so repeated prepares
        // (reuse, redirects, option toggles) stay consistent
        let connection = if self.keep_alive { "keep-alive" } else { "close" };
        self.headers
            .insert(CONNECTION, HeaderValue::from_static(connection));
        if self.gzip {
            self.headers
                .insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        } else {
            self.headers.remove(ACCEPT_ENCODING);
        }
        match &self.auth {
            Some(auth) => {
                self.headers.insert(
                    AUTHORIZATION,
                    HeaderValue::from_str(&auth.basic())
                        .map_err(|_| Error::new(ErrorKind::Auth, "invalid auth header"))?,
                );
            }
            None => {
                self.headers.remove(AUTHORIZATION);
            }
        }
        match &self.body {
            Some(body) => {
                self.headers
                    .insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
            }
            None => {
                self.headers.remove(CONTENT_LENGTH);
            }
        }
        match self
            .cookies
            .header_value(&host, &path, key.is_tls())
        {
            Some(value) => {
                self.headers.insert(
                    COOKIE,
                    HeaderValue::from_str(&value)
                        .map_err(|_| Error::new(ErrorKind::Uri, "invalid cookie header"))?,
                );
            }
            None => {
                self.headers.remove(COOKIE);
            }
        }

        self.key = Some(key);
        Ok(())
    }

    /// Rewrites the request at a new target and re-derives everything.
    /// Used for redirects and the cached-redirect skip.
    pub(crate) fn retarget(&mut self, uri: &Uri) -> Result<(), Error> {
        self.url = Some(uri.to_string());
        self.scheme = None;
        self.host = None;
        self.port = None;
        self.path = None;
        self.query = None;
        self.params.clear();
        self.prepare()
    }

    /// Serialized HTTP/1.1 request: request line, headers, blank line, body.
    pub(crate) fn encode(&self) -> Bytes {
        let body_len = self.body.as_ref().map_or(0, Bytes::len);
        let mut out = BytesMut::with_capacity(256 + body_len);
        out.extend_from_slice(self.method.as_str().as_bytes());
        out.extend_from_slice(b" ");
        let target = self
            .uri
            .path_and_query()
            .map_or("/", http::uri::PathAndQuery::as_str);
        out.extend_from_slice(target.as_bytes());
        out.extend_from_slice(b" HTTP/1.1\r\n");
        for (name, value) in &self.headers {
            out.extend_from_slice(name.as_str().as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");
        if let Some(body) = &self.body {
            out.extend_from_slice(body);
        }
        out.freeze()
    }

    // ===== accessors =====

    #[inline]
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Connection identity. Only present after a successful `prepare`.
    #[inline]
    pub(crate) fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    #[inline]
    pub fn method_ref(&self) -> &Method {
        &self.method
    }

    #[inline]
    pub fn headers_ref(&self) -> &HeaderMap {
        &self.headers
    }

    #[inline]
    pub fn body_ref(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    #[inline]
    pub fn auth_ref(&self) -> Option<&Auth> {
        self.auth.as_ref()
    }

    #[inline]
    pub fn cookies_ref(&self) -> &CookieJar {
        &self.cookies
    }

    #[inline]
    pub(crate) fn cookies_mut(&mut self) -> &mut CookieJar {
        &mut self.cookies
    }

    #[inline]
    pub fn tls(&self) -> &TlsOptions {
        &self.tls
    }

    #[inline]
    pub fn timeout_value(&self) -> Duration {
        self.timeout
    }

    #[inline]
    pub fn store_timeout_value(&self) -> Duration {
        self.store_timeout
    }

    #[inline]
    pub fn follows_redirects(&self) -> bool {
        self.redirect
    }

    #[inline]
    pub fn redirect_limit(&self) -> u32 {
        self.redirect_limit
    }

    #[inline]
    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    #[inline]
    pub fn caches_redirects(&self) -> bool {
        self.cache_redirects
    }

    #[inline]
    pub fn throws_on_error(&self) -> bool {
        self.throw_on_error
    }

    #[inline]
    pub(crate) fn body_callback_ref(&self) -> Option<&BodyCallback> {
        self.body_callback.as_ref()
    }

    #[inline]
    pub(crate) fn final_callback_ref(&self) -> Option<&FinalCallback> {
        self.final_callback.as_ref()
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("redirect", &self.redirect)
            .field("keep_alive", &self.keep_alive)
            .finish_non_exhaustive()
    }
}

/// Resolves a `Location` header against the current request URI. Absolute
/// URLs are taken as-is; an absolute path keeps scheme and authority; a
/// relative path is joined to the current path's directory.
pub(crate) fn resolve_location(current: &Uri, location: &str) -> Result<Uri, Error> {
    let bad = |e: &dyn fmt::Display| {
        Error::new(ErrorKind::Redirect, format!("bad Location {location:?}: {e}"))
    };

    if location.starts_with("http://") || location.starts_with("https://") {
        return location.parse().map_err(|e| bad(&e));
    }

    let scheme = current.scheme_str().unwrap_or("http");
    let authority = current
        .authority()
        .map(http::uri::Authority::as_str)
        .ok_or_else(|| bad(&"current url has no authority"))?;

    let path = if location.starts_with('/') {
        location.to_string()
    } else {
        let current_path = current.path();
        let dir = &current_path[..current_path.rfind('/').map_or(0, |i| i + 1)];
        format!("{dir}{location}")
    };

    format!("{scheme}://{authority}{path}")
        .parse()
        .map_err(|e: http::uri::InvalidUri| bad(&e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_from_full_url() {
        let mut req = Request::new();
        req.url("http://example.com:8080/things?a=1");
        req.prepare().unwrap();
        assert_eq!(req.uri().to_string(), "http://example.com:8080/things?a=1");
        assert_eq!(req.headers_ref()[HOST], "example.com:8080");
        assert_eq!(req.headers_ref()[CONNECTION], "close");
    }

    #[test]
    fn piecewise_overrides_replace_url_parts() {
        let mut req = Request::new();
        req.url("http://example.com/old");
        req.path("/new");
        req.port(81);
        req.prepare().unwrap();
        assert_eq!(req.uri().to_string(), "http://example.com:81/new");
    }

    #[test]
    fn params_are_appended_to_query() {
        let mut req = Request::new();
        req.url("http://h/p?x=0");
        req.param("y", "1");
        req.param("z", "2");
        req.prepare().unwrap();
        assert_eq!(req.uri().query(), Some("x=0&y=1&z=2"));
    }

    #[test]
    fn derived_headers() {
        let mut req = Request::new();
        req.url("http://h/");
        req.keep_alive(true);
        req.gzip(true);
        req.auth("u:p");
        req.body("hello");
        req.prepare().unwrap();
        let headers = req.headers_ref();
        assert_eq!(headers[CONNECTION], "keep-alive");
        assert_eq!(headers[ACCEPT_ENCODING], "gzip");
        assert_eq!(headers[CONTENT_LENGTH], "5");
        assert!(headers[AUTHORIZATION].to_str().unwrap().starts_with("Basic "));
    }

    #[test]
    fn missing_host_is_hard_error() {
        let mut req = Request::new();
        req.path("/only");
        assert_eq!(req.prepare().unwrap_err().kind(), ErrorKind::Uri);
    }

    #[test]
    fn encode_renders_request_line_and_body() {
        let mut req = Request::new();
        req.url("http://h/x?q=1");
        req.method(Method::POST);
        req.body("ab");
        req.prepare().unwrap();
        let wire = req.encode();
        let text = std::str::from_utf8(&wire).unwrap();
        assert!(text.starts_with("POST /x?q=1 HTTP/1.1\r\n"));
        assert!(text.contains("host: h\r\n") || text.contains("Host: h\r\n"));
        assert!(text.ends_with("\r\n\r\nab"));
    }

    #[test]
    fn retarget_rederives_host_and_cookie() {
        let mut req = Request::new();
        req.url("http://a/one");
        req.prepare().unwrap();
        req.retarget(&"http://b/two".parse().unwrap()).unwrap();
        assert_eq!(req.uri().to_string(), "http://b/two");
        assert_eq!(req.headers_ref()[HOST], "b");
    }

    #[test]
    fn resolve_location_variants() {
        let current: Uri = "http://h:81/dir/page?q=1".parse().unwrap();
        assert_eq!(
            resolve_location(&current, "http://other/x").unwrap().to_string(),
            "http://other/x"
        );
        assert_eq!(
            resolve_location(&current, "/abs").unwrap().to_string(),
            "http://h:81/abs"
        );
        assert_eq!(
            resolve_location(&current, "rel").unwrap().to_string(),
            "http://h:81/dir/rel"
        );
    }
}
