//! The per-request connection.
//!
//! One [`Connection`] owns one protocol exchange: dial (or adopt a parked
//! keep-alive socket), write the request, read the response head and body,
//! then either follow a redirect on the same machine or finalize. The
//! machine runs as a single spawned task; the [`Connection`] handle the
//! session keeps only observes its state, reads the finished response, and
//! may take the parked stream for reuse. The future returned by
//! [`Connection::spawn`] is fulfilled exactly once, at the first terminal
//! transition.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use bytes::{Buf, BytesMut};
use http::header::{HeaderMap, SET_COOKIE};
use http::{Method, Uri};

use crate::connectors::{Connector, TcpConnector, TlsConnector};
use crate::cookie::Cookie;
use crate::error::{Error, ErrorKind, Result};
use crate::key::Key;
use crate::parse::{self, ChunkSize, HeaderBlock, StatusLine};
use crate::request::{resolve_location, Request};
use crate::response::{Redirects, Response};
use crate::stream::{is_socket_closed, Stream};

/// Protocol phase of a connection, including its terminal outcome.
///
/// Exactly one terminal transition happens per connection; after that, only
/// `Expired` (set by the dispose timer) may replace the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Init,
    Resolve,
    Connect,
    Handshake,
    Write,
    ReadStatus,
    ReadHeaders,
    ReadContentLength,
    ReadChunkHeader,
    ReadChunkData,
    ReadUntilEof,
    Success,
    ResolveError,
    ConnectError,
    HandshakeError,
    WriteError,
    ReadStatusError,
    ReadStatusDataError,
    ReadHeadersError,
    ReadContentLengthError,
    ReadChunkHeaderError,
    ReadChunkDataError,
    ReadUntilEofError,
    RedirectExhausted,
    RedirectError,
    Timeout,
    Expired,
}

impl State {
    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            State::Init
                | State::Resolve
                | State::Connect
                | State::Handshake
                | State::Write
                | State::ReadStatus
                | State::ReadHeaders
                | State::ReadContentLength
                | State::ReadChunkHeader
                | State::ReadChunkData
                | State::ReadUntilEof
        )
    }

    fn of_error(kind: ErrorKind) -> State {
        match kind {
            ErrorKind::Resolve => State::ResolveError,
            ErrorKind::Connect => State::ConnectError,
            ErrorKind::Handshake => State::HandshakeError,
            ErrorKind::Write => State::WriteError,
            ErrorKind::ReadStatus => State::ReadStatusError,
            ErrorKind::ReadStatusData => State::ReadStatusDataError,
            ErrorKind::ReadHeaders => State::ReadHeadersError,
            ErrorKind::ReadContentLength => State::ReadContentLengthError,
            ErrorKind::ReadChunkHeader => State::ReadChunkHeaderError,
            ErrorKind::ReadChunkData => State::ReadChunkDataError,
            ErrorKind::ReadUntilEof => State::ReadUntilEofError,
            ErrorKind::RedirectExhausted => State::RedirectExhausted,
            ErrorKind::Timeout => State::Timeout,
            // Url/auth failures can only surface mid-flight through a
            // redirect rewrite; anything else lands here too.
            ErrorKind::Redirect | ErrorKind::Uri | ErrorKind::Auth | ErrorKind::Canceled => {
                State::RedirectError
            }
        }
    }
}

struct Shared {
    state: State,
    response: Option<Response>,
    parked: Option<Stream>,
}

/// Handle to a started connection.
///
/// Cheap to clone; the session keeps one per in-flight or completed request.
#[derive(Clone)]
pub struct Connection {
    shared: Rc<RefCell<Shared>>,
}

/// What a follow-up request adopts from a finished keep-alive connection.
pub(crate) struct ReuseSeed {
    pub(crate) stream: Stream,
    pub(crate) redirects: Redirects,
}

impl Connection {
    /// Starts the machine for a prepared request and returns the handle
    /// together with the future of its response.
    pub(crate) fn spawn(request: Request, seed: Option<ReuseSeed>) -> (Connection, ResponseFuture) {
        let (tx, rx) = local_sync::oneshot::channel();
        let future = ResponseFuture { rx };

        let shared = Rc::new(RefCell::new(Shared {
            state: State::Init,
            response: None,
            parked: None,
        }));
        let connection = Connection {
            shared: shared.clone(),
        };

        let Some(key) = request.key().cloned() else {
            let _ = tx.send(Err(Error::new(ErrorKind::Uri, "request was not prepared")));
            return (connection, future);
        };

        let request = Rc::new(request);
        let mut response = Response::new(request.clone());
        let (stream, reused) = match seed {
            Some(seed) => {
                response.set_redirects(seed.redirects);
                (seed.stream, true)
            }
            None => (Stream::closed(), false),
        };

        let machine = Machine {
            request,
            response,
            key,
            stream,
            buf: BytesMut::new(),
            raw: BytesMut::new(),
            content_length: 0,
            reused,
            shared,
        };
        monoio::spawn(machine.run(tx));

        (connection, future)
    }

    #[inline]
    pub fn state(&self) -> State {
        self.shared.borrow().state
    }

    /// True once the dispose timer has fired; the response can no longer be
    /// read from this connection.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.state() == State::Expired
    }

    /// The finished response, until disposal.
    pub(crate) fn response(&self) -> Option<Response> {
        self.shared.borrow().response.clone()
    }

    /// Takes the parked keep-alive stream, if it is still usable.
    pub(crate) fn take_parked(&self) -> Option<Stream> {
        let mut shared = self.shared.borrow_mut();
        if shared.parked.as_ref().is_some_and(Stream::is_open) {
            shared.parked.take()
        } else {
            None
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Connection({:?})", self.state())
    }
}

/// Future of a response. Resolves exactly once, when the connection reaches
/// its terminal state.
pub struct ResponseFuture {
    rx: local_sync::oneshot::Receiver<Result<Response>>,
}

impl ResponseFuture {
    /// An already-resolved future, for failures that happen before any
    /// connection exists (bad URL, bad auth literal).
    pub(crate) fn ready(result: Result<Response>) -> Self {
        let (tx, rx) = local_sync::oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }
}

impl Future for ResponseFuture {
    type Output = Result<Response>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx).poll(cx).map(|recv| match recv {
            Ok(result) => result,
            Err(_) => Err(Error::canceled()),
        })
    }
}

enum Flow {
    Done,
    Rearm,
}

enum Step {
    Next,
    Restart,
}

struct Machine {
    request: Rc<Request>,
    response: Response,
    key: Key,
    stream: Stream,
    /// Receive buffer; parsed bytes are consumed from its front.
    buf: BytesMut,
    /// Accumulated body, moved into the response at finalization.
    raw: BytesMut,
    /// Scratch: declared body length, or the current chunk's payload size.
    content_length: u64,
    reused: bool,
    shared: Rc<RefCell<Shared>>,
}

impl Machine {
    async fn run(mut self, tx: local_sync::oneshot::Sender<Result<Response>>) {
        let timeout = self.request.timeout_value();
        let store_timeout = self.request.store_timeout_value();

        match monoio::time::timeout(timeout, self.drive()).await {
            Ok(()) => {}
            Err(_) => {
                #[cfg(feature = "logging")]
                tracing::debug!(?timeout, "request timed out");
                self.set_state(State::Timeout);
                self.response.set_error(Error::timeout());
            }
        }

        self.finish(tx);

        monoio::time::sleep(store_timeout).await;
        self.expire();
    }

    async fn drive(&mut self) {
        loop {
            match self.attempt().await {
                Ok(Flow::Done) => return,
                Ok(Flow::Rearm) => continue,
                Err(err) => {
                    self.fail(err);
                    return;
                }
            }
        }
    }

    /// One pass over the protocol phases. `Rearm` means the machine was
    /// reset (reuse restart or redirect) and wants another pass.
    async fn attempt(&mut self) -> Result<Flow> {
        if !(self.reused && self.stream.is_open()) {
            if self.reused {
                // the parked socket died while idle; dial fresh
                self.rearm(None)?;
            }
            self.establish().await?;
        }

        if let Step::Restart = self.write_request().await? {
            self.rearm(None)?;
            return Ok(Flow::Rearm);
        }
        if let Step::Restart = self.read_status().await? {
            self.rearm(None)?;
            return Ok(Flow::Rearm);
        }
        self.read_headers().await?;
        self.read_content().await?;
        self.complete()
    }

    async fn establish(&mut self) -> Result<()> {
        self.set_state(State::Resolve);
        let addrs = self.key.resolve()?;

        self.set_state(State::Connect);
        let tcp = TcpConnector::default()
            .connect(&addrs[..])
            .await
            .map_err(|e| Error::io(ErrorKind::Connect, e))?;

        self.set_state(State::Handshake);
        match self.key.server_name.clone() {
            Some(server_name) => {
                let connector = TlsConnector::from_options(self.request.tls())?;
                let tls = connector
                    .handshake(server_name, tcp)
                    .await
                    .map_err(|e| Error::new(ErrorKind::Handshake, e.to_string()))?;
                self.stream = Stream::tls(tls);
            }
            None => self.stream = Stream::tcp(tcp),
        }
        Ok(())
    }

    async fn write_request(&mut self) -> Result<Step> {
        self.set_state(State::Write);
        match self.stream.write_all(self.request.encode()).await {
            Ok(()) => Ok(Step::Next),
            Err(e) if is_socket_closed(&e) && self.reused && !self.is_terminal() => {
                #[cfg(feature = "logging")]
                tracing::debug!("reused socket closed by peer on write, restarting");
                Ok(Step::Restart)
            }
            Err(e) => Err(Error::io(ErrorKind::Write, e)),
        }
    }

    async fn read_status(&mut self) -> Result<Step> {
        self.set_state(State::ReadStatus);
        loop {
            match parse::parse_status_line(&self.buf) {
                StatusLine::Complete {
                    version,
                    code,
                    reason,
                    consumed,
                } => {
                    self.buf.advance(consumed);
                    self.response.set_status_line(version, code, reason);
                    return Ok(Step::Next);
                }
                StatusLine::Partial => match self.stream.read_some(&mut self.buf).await {
                    Ok(0) if self.reused && !self.is_terminal() => {
                        #[cfg(feature = "logging")]
                        tracing::debug!("reused socket closed by peer before status, restarting");
                        return Ok(Step::Restart);
                    }
                    Ok(0) => {
                        return Err(Error::new(
                            ErrorKind::ReadStatus,
                            "connection closed before status line",
                        ))
                    }
                    Ok(_) => {}
                    Err(e) if is_socket_closed(&e) && self.reused && !self.is_terminal() => {
                        return Ok(Step::Restart)
                    }
                    Err(e) => return Err(Error::io(ErrorKind::ReadStatus, e)),
                },
                StatusLine::Invalid => {
                    return Err(Error::new(ErrorKind::ReadStatusData, "bad status data"))
                }
            }
        }
    }

    async fn read_headers(&mut self) -> Result<()> {
        self.set_state(State::ReadHeaders);
        loop {
            match parse::parse_header_block(&self.buf) {
                HeaderBlock::Complete { headers, consumed } => {
                    self.buf.advance(consumed);
                    self.collect_cookies(&headers);
                    self.response.set_headers(headers);
                    return Ok(());
                }
                HeaderBlock::Partial => match self.stream.read_some(&mut self.buf).await {
                    Ok(0) => {
                        // EOF with a complete block would have parsed above
                        let msg = if self.buf.is_empty() {
                            "no headers"
                        } else {
                            "bad headers data"
                        };
                        return Err(Error::new(ErrorKind::ReadHeaders, msg));
                    }
                    Ok(_) => {}
                    Err(e) => return Err(Error::io(ErrorKind::ReadHeaders, e)),
                },
                HeaderBlock::Invalid => {
                    return Err(Error::new(ErrorKind::ReadHeaders, "bad headers data"))
                }
            }
        }
    }

    fn collect_cookies(&mut self, headers: &HeaderMap) {
        let domain = self.request.uri().host().unwrap_or_default().to_string();
        let path = self.request.uri().path().to_string();
        for value in headers.get_all(SET_COOKIE) {
            let Ok(value) = value.to_str() else { continue };
            if let Some(mut cookie) = Cookie::parse(value) {
                cookie.set_origin(&domain, &path);
                self.response.cookies_mut().add(cookie);
            }
        }
    }

    async fn read_content(&mut self) -> Result<()> {
        // these can never carry a body, whatever their framing headers say
        if self.request.method_ref() == &Method::HEAD
            || matches!(self.response.status(), 204 | 304)
        {
            return Ok(());
        }

        if self.response.has_content_length() {
            self.read_content_length().await
        } else if self.response.is_chunked() {
            self.read_chunks().await
        } else {
            self.read_until_eof().await
        }
    }

    async fn read_content_length(&mut self) -> Result<()> {
        self.set_state(State::ReadContentLength);
        let declared = self
            .response
            .declared_content_length()
            .ok_or_else(|| Error::new(ErrorKind::ReadContentLength, "bad content length"))?;
        self.content_length = declared;
        let declared = usize::try_from(declared)
            .map_err(|_| Error::new(ErrorKind::ReadContentLength, "content length too large"))?;

        if self.buf.len() < declared {
            match self.stream.read_at_least(&mut self.buf, declared).await {
                Ok(true) => {}
                Ok(false) => {
                    return Err(Error::new(
                        ErrorKind::ReadContentLength,
                        "connection closed before full body",
                    ))
                }
                Err(e) => return Err(Error::io(ErrorKind::ReadContentLength, e)),
            }
        }
        let body = self.buf.split_to(declared);
        self.push_body(&body);
        Ok(())
    }

    async fn read_chunks(&mut self) -> Result<()> {
        loop {
            self.set_state(State::ReadChunkHeader);
            let size = loop {
                match parse::parse_chunk_size(&self.buf) {
                    ChunkSize::Complete { size, consumed } => {
                        self.buf.advance(consumed);
                        break size;
                    }
                    ChunkSize::Partial => match self.stream.read_some(&mut self.buf).await {
                        Ok(0) => {
                            // EOF between chunks ends the message normally;
                            // inside a size line it does not
                            if self.buf.iter().all(|&b| b == b'\r' || b == b'\n') {
                                return Ok(());
                            }
                            return Err(Error::new(ErrorKind::ReadChunkHeader, "bad chunk header"));
                        }
                        Ok(_) => {}
                        Err(e) => return Err(Error::io(ErrorKind::ReadChunkHeader, e)),
                    },
                    ChunkSize::Invalid => {
                        return Err(Error::new(ErrorKind::ReadChunkHeader, "bad chunk header"))
                    }
                }
            };

            self.content_length = size;
            if size == 0 {
                // terminating chunk; trailers, if any, are dropped
                return Ok(());
            }

            self.set_state(State::ReadChunkData);
            let size = usize::try_from(size)
                .map_err(|_| Error::new(ErrorKind::ReadChunkData, "chunk too large"))?;
            if self.buf.len() < size {
                match self.stream.read_at_least(&mut self.buf, size).await {
                    Ok(true) => {}
                    Ok(false) => {
                        return Err(Error::new(
                            ErrorKind::ReadChunkData,
                            "connection closed inside chunk",
                        ))
                    }
                    Err(e) => return Err(Error::io(ErrorKind::ReadChunkData, e)),
                }
            }
            let payload = self.buf.split_to(size);
            self.push_body(&payload);
            // the payload's trailing CRLF is consumed by the next size line
        }
    }

    async fn read_until_eof(&mut self) -> Result<()> {
        self.set_state(State::ReadUntilEof);
        loop {
            match self.stream.read_some(&mut self.buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => return Err(Error::io(ErrorKind::ReadUntilEof, e)),
            }
        }
        let body = self.buf.split();
        self.push_body(&body);
        Ok(())
    }

    fn push_body(&mut self, data: &[u8]) {
        if let Some(cb) = self.request.body_callback_ref() {
            (&mut *cb.borrow_mut())(Some(data), None);
        } else {
            self.raw.extend_from_slice(data);
        }
    }

    /// A finished exchange either completes here or re-enters the loop as a
    /// redirect. A redirectable status with `redirect` enabled never becomes
    /// `Success` on the current target.
    fn complete(&mut self) -> Result<Flow> {
        if self.response.is_redirect() && self.request.follows_redirects() {
            self.perform_redirect()
        } else {
            self.set_state(State::Success);
            Ok(Flow::Done)
        }
    }

    fn perform_redirect(&mut self) -> Result<Flow> {
        if self.response.redirect_count() >= self.request.redirect_limit() {
            return Err(Error::new(ErrorKind::RedirectExhausted, "redirect exhausted"));
        }
        let location = self
            .response
            .header("location")
            .map(str::to_string)
            .ok_or_else(|| Error::new(ErrorKind::Redirect, "no Location"))?;
        let target = resolve_location(self.request.uri(), &location)?;
        #[cfg(feature = "logging")]
        tracing::debug!(location = %target, "following redirect");
        self.rearm(Some(target))?;
        Ok(Flow::Rearm)
    }

    /// Resets the machine for another pass: fresh stream, drained buffers,
    /// cleared scratch. With a target, also rewrites the request and swaps
    /// in a new response carrying the grown redirect chain.
    fn rearm(&mut self, redirect_to: Option<Uri>) -> Result<()> {
        if let Some(target) = redirect_to {
            let count = self.response.redirect_count() + 1;
            let mut chain = self.response.take_redirects();

            // snapshot the hop being left behind, with the body it read
            let mut hop = self.response.clone();
            hop.set_body(self.raw.split().freeze());
            chain.push(hop);

            let mut request = (*self.request).clone();
            request.cookies_mut().update(self.response.cookies());
            request
                .retarget(&target)
                .map_err(|e| Error::new(ErrorKind::Redirect, e.to_string()))?;
            self.request = Rc::new(request);
            self.key = self
                .request
                .key()
                .cloned()
                .ok_or_else(|| Error::new(ErrorKind::Redirect, "redirect target not prepared"))?;

            let mut response = Response::new(self.request.clone());
            response.set_redirect_count(count);
            response.set_redirects(chain);
            self.response = response;
        }

        self.stream = Stream::closed();
        self.reused = false;
        self.buf.clear();
        self.raw.clear();
        self.content_length = 0;
        Ok(())
    }

    fn fail(&mut self, err: Error) {
        #[cfg(feature = "logging")]
        tracing::debug!(kind = ?err.kind(), message = err.message(), "request failed");
        self.set_state(State::of_error(err.kind()));
        self.response.set_error(err);
    }

    /// Finalization: runs exactly once, after the driver returned or timed
    /// out. Fulfills the future and hands the stream and response over to
    /// the shared handle.
    fn finish(&mut self, tx: local_sync::oneshot::Sender<Result<Response>>) {
        if let Some(cb) = self.request.final_callback_ref() {
            (&mut *cb.borrow_mut())(&self.response);
        }

        let state = self.state();
        let keep = self.request.is_keep_alive()
            && state == State::Success
            && !self.response.connection_close()
            && self.stream.is_open();
        let stream = std::mem::replace(&mut self.stream, Stream::closed());
        let parked = if keep { Some(stream) } else { None };

        self.response.set_body(self.raw.split().freeze());

        // a followed redirect records its final hop in the chain
        if !self.response.redirects().is_empty() {
            let mut chain = self.response.take_redirects();
            chain.push(self.response.clone());
            self.response.set_redirects(chain);
        }

        if let Some(cb) = self.request.body_callback_ref() {
            (&mut *cb.borrow_mut())(None, self.response.error());
        }

        let result = match self.response.error() {
            Some(err) if self.request.throws_on_error() => Err(err.clone()),
            _ => Ok(self.response.clone()),
        };

        {
            let mut shared = self.shared.borrow_mut();
            shared.response = Some(self.response.clone());
            shared.parked = parked;
        }
        let _ = tx.send(result);
    }

    fn expire(&mut self) {
        let mut shared = self.shared.borrow_mut();
        if shared.state.is_terminal() {
            shared.state = State::Expired;
        }
        shared.parked = None;
        shared.response = None;
    }

    fn set_state(&self, state: State) {
        let mut shared = self.shared.borrow_mut();
        if !shared.state.is_terminal() || state == State::Expired {
            shared.state = state;
        }
    }

    #[inline]
    fn state(&self) -> State {
        self.shared.borrow().state
    }

    #[inline]
    fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROGRESS: [State; 11] = [
        State::Init,
        State::Resolve,
        State::Connect,
        State::Handshake,
        State::Write,
        State::ReadStatus,
        State::ReadHeaders,
        State::ReadContentLength,
        State::ReadChunkHeader,
        State::ReadChunkData,
        State::ReadUntilEof,
    ];

    #[test]
    fn progress_states_are_not_terminal() {
        for state in PROGRESS {
            assert!(!state.is_terminal(), "{state:?}");
        }
    }

    #[test]
    fn outcome_states_are_terminal() {
        for state in [
            State::Success,
            State::ResolveError,
            State::WriteError,
            State::ReadChunkDataError,
            State::RedirectExhausted,
            State::RedirectError,
            State::Timeout,
            State::Expired,
        ] {
            assert!(state.is_terminal(), "{state:?}");
        }
    }

    #[test]
    fn every_error_kind_maps_to_a_terminal_state() {
        for kind in [
            ErrorKind::Resolve,
            ErrorKind::Connect,
            ErrorKind::Handshake,
            ErrorKind::Write,
            ErrorKind::ReadStatus,
            ErrorKind::ReadStatusData,
            ErrorKind::ReadHeaders,
            ErrorKind::ReadContentLength,
            ErrorKind::ReadChunkHeader,
            ErrorKind::ReadChunkData,
            ErrorKind::ReadUntilEof,
            ErrorKind::RedirectExhausted,
            ErrorKind::Redirect,
            ErrorKind::Timeout,
        ] {
            assert!(State::of_error(kind).is_terminal(), "{kind:?}");
        }
    }

    #[test]
    fn ready_future_resolves_immediately() {
        let fut = ResponseFuture::ready(Err(Error::new(ErrorKind::Uri, "bad url")));
        let mut fut = std::pin::pin!(fut);
        let mut cx = Context::from_waker(std::task::Waker::noop());
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(Err(err)) => assert_eq!(err.kind(), ErrorKind::Uri),
            other => panic!("unexpected poll result: {other:?}"),
        }
    }
}
