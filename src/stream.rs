//! Unified transport stream over plain TCP or TLS.
//!
//! The connection state machine owns one `Stream` at a time and drives it
//! with whole-buffer writes and three read shapes: until a delimiter, until
//! a byte count, or one chunk at a time. Reads append into the caller's
//! buffer; a return of `false` (or `0`) means the peer closed before the
//! condition was met. The stream is movable between connection instances,
//! which is what keep-alive reuse does with it.

use std::io;

use bytes::BytesMut;
use monoio::io::{AsyncReadRent, AsyncWriteRentExt};
use monoio::net::TcpStream;

use crate::connectors::TlsStream;

/// Bytes reserved ahead of each read.
const READ_CHUNK: usize = 8 * 1024;

enum Io {
    Tcp(TcpStream),
    Tls(Box<TlsStream>),
    Closed,
}

pub struct Stream {
    io: Io,
    open: bool,
}

impl Stream {
    pub(crate) fn tcp(io: TcpStream) -> Self {
        Self {
            io: Io::Tcp(io),
            open: true,
        }
    }

    pub(crate) fn tls(io: TlsStream) -> Self {
        Self {
            io: Io::Tls(Box::new(io)),
            open: true,
        }
    }

    /// A stream with no transport behind it; every operation fails until a
    /// real one is put in its place.
    pub(crate) fn closed() -> Self {
        Self {
            io: Io::Closed,
            open: false,
        }
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.open
    }

    #[inline]
    pub fn is_tls(&self) -> bool {
        matches!(self.io, Io::Tls(_))
    }

    /// Drops the transport. The peer observes a close; nothing is flushed.
    pub(crate) fn close(&mut self) {
        self.io = Io::Closed;
        self.open = false;
    }

    pub(crate) async fn write_all(&mut self, data: bytes::Bytes) -> io::Result<()> {
        let (res, _) = match &mut self.io {
            Io::Tcp(s) => s.write_all(data).await,
            Io::Tls(s) => s.write_all(data).await,
            Io::Closed => return Err(not_connected()),
        };
        res.map(|_| ())
    }

    /// Reads until `delim` is somewhere in `buf`. Returns `false` when the
    /// peer closed first. Bytes already buffered are checked before any I/O.
    pub(crate) async fn read_until(&mut self, buf: &mut BytesMut, delim: &[u8]) -> io::Result<bool> {
        loop {
            if memchr::memmem::find(buf, delim).is_some() {
                return Ok(true);
            }
            if self.read_append(buf).await? == 0 {
                return Ok(false);
            }
        }
    }

    /// Reads until `buf` holds at least `n` bytes. Returns `false` when the
    /// peer closed first.
    pub(crate) async fn read_at_least(&mut self, buf: &mut BytesMut, n: usize) -> io::Result<bool> {
        while buf.len() < n {
            if self.read_append(buf).await? == 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// One read; `0` means end of stream.
    pub(crate) async fn read_some(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        self.read_append(buf).await
    }

    async fn read_append(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        if !self.open {
            return Ok(0);
        }
        buf.reserve(READ_CHUNK);
        let owned = std::mem::take(buf);
        let (res, owned) = match &mut self.io {
            Io::Tcp(s) => s.read(owned).await,
            Io::Tls(s) => s.read(owned).await,
            Io::Closed => (Err(not_connected()), owned),
        };
        *buf = owned;
        match res {
            Ok(0) => {
                self.open = false;
                Ok(0)
            }
            Ok(n) => Ok(n),
            // A truncated TLS close behaves like a clean EOF for framing
            // purposes; the machine decides whether the data was short.
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                self.open = false;
                Ok(0)
            }
            Err(e) => {
                self.open = false;
                Err(e)
            }
        }
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.io {
            Io::Tcp(_) => "Tcp",
            Io::Tls(_) => "Tls",
            Io::Closed => "Closed",
        };
        write!(f, "Stream({kind}, open: {})", self.open)
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "stream is closed")
}

/// Failure modes a dead keep-alive socket produces on the first write or
/// read. These trigger the one transparent restart of a reused connection.
pub(crate) fn is_socket_closed(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
    )
}

#[cfg(test)]
mod tests {
    use monoio::io::AsyncWriteRentExt;
    use monoio::net::{TcpListener, TcpStream};

    use super::*;

    async fn pair() -> (Stream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = monoio::spawn(async move { listener.accept().await.unwrap().0 });
        let client = TcpStream::connect(addr).await.unwrap();
        let server = accept.await;
        (Stream::tcp(client), server)
    }

    #[monoio::test(enable_timer = true)]
    async fn read_until_spans_split_writes() {
        let (mut stream, mut server) = pair().await;
        monoio::spawn(async move {
            let (res, _) = server.write_all(&b"hello "[..]).await;
            res.unwrap();
            monoio::time::sleep(std::time::Duration::from_millis(10)).await;
            let (res, _) = server.write_all(&b"world\r\ntail"[..]).await;
            res.unwrap();
            // keep the socket open long enough for the reader
            monoio::time::sleep(std::time::Duration::from_millis(50)).await;
        });

        let mut buf = BytesMut::new();
        assert!(stream.read_until(&mut buf, b"\r\n").await.unwrap());
        assert!(buf.starts_with(b"hello world\r\n"));
    }

    #[monoio::test(enable_timer = true)]
    async fn read_until_reports_eof() {
        let (mut stream, mut server) = pair().await;
        monoio::spawn(async move {
            let (res, _) = server.write_all(&b"no delimiter"[..]).await;
            res.unwrap();
            drop(server);
        });

        let mut buf = BytesMut::new();
        assert!(!stream.read_until(&mut buf, b"\r\n").await.unwrap());
        assert_eq!(&buf[..], b"no delimiter");
        assert!(!stream.is_open());
    }

    #[monoio::test(enable_timer = true)]
    async fn read_at_least_accumulates() {
        let (mut stream, mut server) = pair().await;
        monoio::spawn(async move {
            for chunk in [&b"ab"[..], b"cd", b"ef"] {
                let (res, _) = server.write_all(chunk).await;
                res.unwrap();
                monoio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
            monoio::time::sleep(std::time::Duration::from_millis(50)).await;
        });

        let mut buf = BytesMut::new();
        assert!(stream.read_at_least(&mut buf, 5).await.unwrap());
        assert!(buf.len() >= 5);
    }

    #[monoio::test(enable_timer = true)]
    async fn closed_stream_rejects_writes() {
        let mut stream = Stream::closed();
        let err = stream.write_all(bytes::Bytes::from_static(b"x")).await.unwrap_err();
        assert!(is_socket_closed(&err));
    }
}
