use std::io;

use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

/// One kind per terminal failure of the connection state machine, plus the
/// setup failures that can occur before a connection exists.
#[derive(ThisError, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    #[error("resolve error")]
    Resolve,
    #[error("connect error")]
    Connect,
    #[error("handshake error")]
    Handshake,
    #[error("write error")]
    Write,
    #[error("read status error")]
    ReadStatus,
    #[error("read status data error")]
    ReadStatusData,
    #[error("read headers error")]
    ReadHeaders,
    #[error("read content length error")]
    ReadContentLength,
    #[error("read chunk header error")]
    ReadChunkHeader,
    #[error("read chunk data error")]
    ReadChunkData,
    #[error("read until eof error")]
    ReadUntilEof,
    #[error("redirect exhausted")]
    RedirectExhausted,
    #[error("redirect error")]
    Redirect,
    #[error("timeout")]
    Timeout,
    /// The request URL could not be parsed or assembled.
    #[error("invalid url")]
    Uri,
    /// The `login:password` auth literal could not be parsed.
    #[error("invalid auth")]
    Auth,
    /// The connection task went away before fulfilling its future.
    #[error("canceled")]
    Canceled,
}

/// Error produced while preparing or running a request.
///
/// Carries the phase that failed and a human-readable message taken from the
/// underlying transport error, or a literal for logical failures. The kind is
/// stable; the message wording is not.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn io(kind: ErrorKind, err: io::Error) -> Self {
        Self::new(kind, err.to_string())
    }

    pub(crate) fn canceled() -> Self {
        Self::new(ErrorKind::Canceled, "connection dropped before completion")
    }

    pub(crate) fn timeout() -> Self {
        Self::new(ErrorKind::Timeout, "timeout")
    }

    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[inline]
    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }

    #[inline]
    pub fn is_redirect(&self) -> bool {
        matches!(self.kind, ErrorKind::Redirect | ErrorKind::RedirectExhausted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_kind_and_message() {
        let err = Error::new(ErrorKind::Resolve, "no such host");
        assert_eq!(err.to_string(), "resolve error: no such host");
        assert_eq!(err.kind(), ErrorKind::Resolve);
    }

    #[test]
    fn timeout_is_timeout() {
        assert!(Error::timeout().is_timeout());
        assert!(!Error::canceled().is_timeout());
    }
}
