use std::rc::Rc;

use bytes::Bytes;
use http::header::{HeaderMap, CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{Uri, Version};

use crate::cookie::CookieJar;
use crate::error::Error;
use crate::request::Request;

pub(crate) fn is_redirect_status(status: u16) -> bool {
    matches!(status, 301 | 302 | 303)
}

/// A response, built up over the lifetime of its connection.
///
/// Every outcome produces a response: on transport or protocol failures the
/// status stays `0` and [`error`](Response::error) carries the phase that
/// failed. When the request followed redirects, [`redirects`](Response::redirects)
/// holds the chain that led here, oldest first.
#[derive(Debug, Clone)]
pub struct Response {
    request: Rc<Request>,
    version: Version,
    status: u16,
    reason: String,
    headers: HeaderMap,
    cookies: CookieJar,
    body: Bytes,
    error: Option<Error>,
    redirect_count: u32,
    redirects: Redirects,
}

impl Response {
    pub(crate) fn new(request: Rc<Request>) -> Self {
        Self {
            request,
            version: Version::HTTP_11,
            status: 0,
            reason: String::new(),
            headers: HeaderMap::new(),
            cookies: CookieJar::new(),
            body: Bytes::new(),
            error: None,
            redirect_count: 0,
            redirects: Redirects::default(),
        }
    }

    /// The request this response answers. After redirects, the request of
    /// the final hop.
    #[inline]
    pub fn request(&self) -> &Request {
        &self.request
    }

    #[inline]
    pub fn version(&self) -> Version {
        self.version
    }

    /// HTTP status code; `0` until a status line was parsed.
    #[inline]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Status-line reason phrase.
    #[inline]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First header value matching `name`, as UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Cookies collected from `Set-Cookie` headers, stamped with the origin
    /// of the request they arrived on.
    #[inline]
    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    /// Raw body bytes.
    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body decoded as UTF-8, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// The terminal error, if the connection failed.
    #[inline]
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Number of redirects followed to produce this response.
    #[inline]
    pub fn redirect_count(&self) -> u32 {
        self.redirect_count
    }

    #[inline]
    pub fn redirects(&self) -> &Redirects {
        &self.redirects
    }

    pub(crate) fn is_redirect(&self) -> bool {
        is_redirect_status(self.status)
    }

    pub(crate) fn connection_close(&self) -> bool {
        self.headers
            .get_all(CONNECTION)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .any(|v| v.eq_ignore_ascii_case("close"))
    }

    pub(crate) fn has_content_length(&self) -> bool {
        self.headers.contains_key(CONTENT_LENGTH)
    }

    pub(crate) fn declared_content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    }

    pub(crate) fn is_chunked(&self) -> bool {
        self.headers
            .get_all(TRANSFER_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|v| v.trim().eq_ignore_ascii_case("chunked"))
    }

    // ===== mutation from the connection =====

    pub(crate) fn set_status_line(&mut self, version: Version, status: u16, reason: String) {
        self.version = version;
        self.status = status;
        self.reason = reason;
    }

    pub(crate) fn set_headers(&mut self, headers: HeaderMap) {
        self.headers = headers;
    }

    pub(crate) fn cookies_mut(&mut self) -> &mut CookieJar {
        &mut self.cookies
    }

    pub(crate) fn set_body(&mut self, body: Bytes) {
        self.body = body;
    }

    pub(crate) fn set_error(&mut self, error: Error) {
        self.error = Some(error);
    }

    pub(crate) fn set_redirect_count(&mut self, count: u32) {
        self.redirect_count = count;
    }

    pub(crate) fn take_redirects(&mut self) -> Redirects {
        std::mem::take(&mut self.redirects)
    }

    pub(crate) fn set_redirects(&mut self, redirects: Redirects) {
        self.redirects = redirects;
    }
}

/// Ordered chain of responses that led to the current one, oldest first.
/// De-duplicated by request URI.
#[derive(Debug, Clone, Default)]
pub struct Redirects {
    chain: Vec<Response>,
}

impl Redirects {
    /// Appends a snapshot; a snapshot for an already-present URI is dropped.
    pub(crate) fn push(&mut self, mut response: Response) {
        let uri = response.request().uri();
        if self.chain.iter().any(|r| r.request().uri() == uri) {
            return;
        }
        // Snapshots carry no chain of their own.
        response.redirects = Redirects::default();
        self.chain.push(response);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Response> {
        self.chain.iter()
    }

    #[inline]
    pub fn first(&self) -> Option<&Response> {
        self.chain.first()
    }

    #[inline]
    pub fn last(&self) -> Option<&Response> {
        self.chain.last()
    }

    /// Cached-redirect lookup: when this chain started at `uri`, returns the
    /// final hop so a repeat request can go there directly.
    pub(crate) fn resolve(&self, uri: &Uri) -> Option<&Response> {
        let first = self.chain.first()?;
        (first.request().uri() == uri).then(|| self.chain.last())?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_for(url: &str) -> Response {
        let mut request = Request::new();
        request.url(url);
        request.prepare().unwrap();
        Response::new(Rc::new(request))
    }

    #[test]
    fn redirect_statuses() {
        assert!(is_redirect_status(301));
        assert!(is_redirect_status(302));
        assert!(is_redirect_status(303));
        assert!(!is_redirect_status(304));
        assert!(!is_redirect_status(200));
    }

    #[test]
    fn chain_dedupes_by_uri() {
        let mut chain = Redirects::default();
        chain.push(response_for("http://a/"));
        chain.push(response_for("http://b/"));
        chain.push(response_for("http://a/"));
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn chain_resolve_matches_first_entry() {
        let mut chain = Redirects::default();
        chain.push(response_for("http://a/"));
        chain.push(response_for("http://b/final"));

        let start: Uri = "http://a/".parse().unwrap();
        let hit = chain.resolve(&start).unwrap();
        assert_eq!(hit.request().uri().to_string(), "http://b/final");

        let miss: Uri = "http://c/".parse().unwrap();
        assert!(chain.resolve(&miss).is_none());
    }

    #[test]
    fn chunked_detection_handles_lists() {
        let mut resp = response_for("http://a/");
        let mut headers = HeaderMap::new();
        headers.insert(TRANSFER_ENCODING, "gzip, Chunked".parse().unwrap());
        resp.set_headers(headers);
        assert!(resp.is_chunked());
    }

    #[test]
    fn connection_close_detection() {
        let mut resp = response_for("http://a/");
        let mut headers = HeaderMap::new();
        headers.insert(CONNECTION, "Close".parse().unwrap());
        resp.set_headers(headers);
        assert!(resp.connection_close());
    }
}
