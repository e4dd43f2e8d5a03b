//! Async HTTP/1.x client for the monoio runtime.
//!
//! A [`Session`] accumulates request options (URL, method, headers, body,
//! auth, cookies, TLS material, timeouts, redirect policy) and runs each
//! request on its own [`Connection`]: resolve, connect, TLS handshake,
//! write, then read status line, headers and body, framed by
//! `Content-Length`, chunked transfer encoding, or EOF. 301/302/303 responses are
//! chained on the same connection object, keep-alive sockets are parked and
//! adopted by the next request to the same origin, and every outcome
//! resolves the response future exactly once.
//!
//! # Example
//!
//! ```rust,ignore
//! use monoio_requests::Session;
//!
//! #[monoio::main(enable_timer = true)]
//! async fn main() -> Result<(), monoio_requests::Error> {
//!     let mut session = Session::new();
//!     session
//!         .url("https://example.com/data")
//!         .keep_alive(true)
//!         .redirect_count(5);
//!
//!     let response = session.get().await?;
//!     assert_eq!(response.status(), 200);
//!     println!("{}", response.text());
//!     Ok(())
//! }
//! ```
//!
//! # Outcomes
//!
//! Unless `throw_on_error` is set, the future resolves with a [`Response`]
//! for every outcome; failures carry their phase in
//! [`Response::error`]. With `throw_on_error`, failed exchanges resolve the
//! future with the [`Error`] itself.
//!
//! # Concurrency model
//!
//! One connection is one spawned task on the current monoio thread. All of
//! its I/O completions and timers run there, in order; nothing is shared
//! across threads and nothing locks. Run sessions on several threads by
//! running several monoio runtimes.

mod auth;
mod conn;
pub mod connectors;
mod cookie;
mod error;
mod key;
mod parse;
mod request;
mod response;
mod session;
mod stream;

pub use auth::Auth;
pub use conn::{Connection, ResponseFuture, State};
pub use cookie::{Cookie, CookieJar};
pub use error::{Error, ErrorKind, Result};
pub use key::Key;
pub use request::{Request, TlsOptions};
pub use response::{Redirects, Response};
pub use session::Session;
pub use stream::Stream;
