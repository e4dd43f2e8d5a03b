//! Session façade.
//!
//! A [`Session`] accumulates request options, decides whether a new exchange
//! may adopt the previous one's keep-alive socket, and exposes the verb
//! surface. `send` awaits the response; `send_async` hands back the future
//! so the caller can pipeline other work first.

use std::path::PathBuf;
use std::time::Duration;

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::Method;

use crate::auth::Auth;
use crate::conn::{Connection, ResponseFuture, ReuseSeed};
use crate::cookie::CookieJar;
use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::Response;

/// Accumulates options and runs requests, one connection at a time.
///
/// ```no_run
/// use monoio_requests::Session;
///
/// #[monoio::main(enable_timer = true)]
/// async fn main() -> Result<(), monoio_requests::Error> {
///     let mut session = Session::new();
///     session.url("http://httpbin.org/get").keep_alive(true);
///     let response = session.get().await?;
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
#[derive(Debug, Default)]
pub struct Session {
    request: Request,
    connection: Option<Connection>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    // ===== options =====

    pub fn url(&mut self, url: impl Into<String>) -> &mut Self {
        self.request.url(url);
        self
    }

    pub fn scheme(&mut self, scheme: impl Into<String>) -> &mut Self {
        self.request.scheme(scheme);
        self
    }

    pub fn host(&mut self, host: impl Into<String>) -> &mut Self {
        self.request.host(host);
        self
    }

    pub fn port(&mut self, port: u16) -> &mut Self {
        self.request.port(port);
        self
    }

    pub fn path(&mut self, path: impl Into<String>) -> &mut Self {
        self.request.path(path);
        self
    }

    pub fn query(&mut self, query: impl Into<String>) -> &mut Self {
        self.request.query(query);
        self
    }

    pub fn param(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.request.param(name, value);
        self
    }

    pub fn method(&mut self, method: Method) -> &mut Self {
        self.request.method(method);
        self
    }

    pub fn header(&mut self, name: HeaderName, value: HeaderValue) -> &mut Self {
        self.request.header(name, value);
        self
    }

    pub fn headers(&mut self, headers: HeaderMap) -> &mut Self {
        self.request.headers(headers);
        self
    }

    pub fn body(&mut self, body: impl Into<bytes::Bytes>) -> &mut Self {
        self.request.body(body);
        self
    }

    /// Credentials as a `login:password` literal, parsed when the request
    /// is prepared; a malformed literal fails the send.
    pub fn auth(&mut self, literal: impl Into<String>) -> &mut Self {
        self.request.auth(literal);
        self
    }

    pub fn auth_pair(&mut self, auth: Auth) -> &mut Self {
        self.request.auth_pair(auth);
        self
    }

    pub fn cookies(&mut self, cookies: CookieJar) -> &mut Self {
        self.request.cookies(cookies);
        self
    }

    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.request.timeout(timeout);
        self
    }

    pub fn store_timeout(&mut self, store_timeout: Duration) -> &mut Self {
        self.request.store_timeout(store_timeout);
        self
    }

    pub fn redirect(&mut self, redirect: bool) -> &mut Self {
        self.request.redirect(redirect);
        self
    }

    pub fn redirect_count(&mut self, limit: u32) -> &mut Self {
        self.request.redirect_count(limit);
        self
    }

    pub fn gzip(&mut self, gzip: bool) -> &mut Self {
        self.request.gzip(gzip);
        self
    }

    pub fn keep_alive(&mut self, keep_alive: bool) -> &mut Self {
        self.request.keep_alive(keep_alive);
        self
    }

    pub fn cache_redirects(&mut self, cache_redirects: bool) -> &mut Self {
        self.request.cache_redirects(cache_redirects);
        self
    }

    pub fn throw_on_error(&mut self, throw_on_error: bool) -> &mut Self {
        self.request.throw_on_error(throw_on_error);
        self
    }

    pub fn body_callback(
        &mut self,
        cb: impl FnMut(Option<&[u8]>, Option<&Error>) + 'static,
    ) -> &mut Self {
        self.request.body_callback(cb);
        self
    }

    pub fn final_callback(&mut self, cb: impl FnMut(&Response) + 'static) -> &mut Self {
        self.request.final_callback(cb);
        self
    }

    pub fn always_verify_peer(&mut self, verify: bool) -> &mut Self {
        self.request.tls_mut().always_verify_peer = verify;
        self
    }

    pub fn verify_path(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.request.tls_mut().verify_path = Some(path.into());
        self
    }

    pub fn verify_filename(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.request.tls_mut().verify_filename = Some(path.into());
        self
    }

    pub fn certificate_file(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.request.tls_mut().certificate_file = Some(path.into());
        self
    }

    pub fn private_key_file(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.request.tls_mut().private_key_file = Some(path.into());
        self
    }

    pub fn ssl_certs(&mut self, pem: impl Into<String>) -> &mut Self {
        self.request.tls_mut().ssl_certs = Some(pem.into());
        self
    }

    pub fn ssl_auth(&mut self, cert_pem: impl Into<String>, key_pem: impl Into<String>) -> &mut Self {
        self.request.tls_mut().ssl_auth = Some((cert_pem.into(), key_pem.into()));
        self
    }

    // ===== calls =====

    /// Starts the exchange and returns the future of its response. The
    /// session immediately tracks the new connection; a later `send` may
    /// adopt its socket.
    pub fn send_async(&mut self) -> ResponseFuture {
        if let Err(err) = self.prepare_pending() {
            return ResponseFuture::ready(Err(err));
        }
        let seed = self.take_reuse_seed();
        #[cfg(feature = "logging")]
        tracing::debug!(uri = %self.request.uri(), reused = seed.is_some(), "sending request");
        let (connection, future) = Connection::spawn(self.request.clone(), seed);
        self.connection = Some(connection);
        future
    }

    /// Starts the exchange and awaits the response.
    pub async fn send(&mut self) -> Result<Response> {
        self.send_async().await
    }

    pub async fn get(&mut self) -> Result<Response> {
        self.method(Method::GET).send().await
    }

    pub async fn post(&mut self) -> Result<Response> {
        self.method(Method::POST).send().await
    }

    pub async fn put(&mut self) -> Result<Response> {
        self.method(Method::PUT).send().await
    }

    pub async fn patch(&mut self) -> Result<Response> {
        self.method(Method::PATCH).send().await
    }

    pub async fn delete(&mut self) -> Result<Response> {
        self.method(Method::DELETE).send().await
    }

    pub async fn head(&mut self) -> Result<Response> {
        self.method(Method::HEAD).send().await
    }

    pub fn async_get(&mut self) -> ResponseFuture {
        self.method(Method::GET).send_async()
    }

    pub fn async_post(&mut self) -> ResponseFuture {
        self.method(Method::POST).send_async()
    }

    pub fn async_put(&mut self) -> ResponseFuture {
        self.method(Method::PUT).send_async()
    }

    pub fn async_patch(&mut self) -> ResponseFuture {
        self.method(Method::PATCH).send_async()
    }

    pub fn async_delete(&mut self) -> ResponseFuture {
        self.method(Method::DELETE).send_async()
    }

    pub fn async_head(&mut self) -> ResponseFuture {
        self.method(Method::HEAD).send_async()
    }

    /// True once the current connection's dispose timer has fired.
    pub fn is_expired(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::is_expired)
    }

    /// The connection behind the most recent `send`, if any.
    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    fn prepare_pending(&mut self) -> Result<()> {
        self.request.prepare()?;

        // replay a cached redirect chain: jump straight to its final hop
        if self.request.caches_redirects() {
            let cached = self
                .connection
                .as_ref()
                .and_then(Connection::response)
                .and_then(|prev| {
                    prev.redirects()
                        .resolve(self.request.uri())
                        .map(|hit| (hit.request().uri().clone(), hit.request().cookies_ref().clone()))
                });
            if let Some((target, cookies)) = cached {
                #[cfg(feature = "logging")]
                tracing::debug!(target = %target, "skipping cached redirect chain");
                self.request.cookies_mut().update(&cookies);
                self.request.retarget(&target)?;
            }
        }
        Ok(())
    }

    /// A parked socket from the previous exchange is adopted when it is
    /// still open and the new request targets the same host, port and
    /// protocol. Cookies gathered by the previous response carry over.
    fn take_reuse_seed(&mut self) -> Option<ReuseSeed> {
        let connection = self.connection.as_ref()?;
        let prev = connection.response()?;
        if prev.request().key()? != self.request.key()? {
            return None;
        }
        let stream = connection.take_parked()?;

        self.request.cookies_mut().update(prev.cookies());
        // re-derive the Cookie header with the merged jar
        self.request.prepare().ok()?;

        Some(ReuseSeed {
            stream,
            redirects: prev.redirects().clone(),
        })
    }
}
