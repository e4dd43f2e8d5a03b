//! Incremental parsing of the response head.
//!
//! The connection state machine reads into one buffer and asks this module
//! for the next logical event: the status line, the header block, or a chunk
//! size line. Each function inspects the buffered prefix only; `Partial`
//! means more bytes are needed, and `consumed` tells the caller how much of
//! the buffer the event used. The header block itself is handed to
//! `httparse`; status and chunk-size lines are small enough to parse here.

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::Version;
use memchr::memmem;

/// Largest header count accepted in one response head.
const MAX_HEADERS: usize = 100;

pub(crate) fn find_crlf(buf: &[u8]) -> Option<usize> {
    memmem::find(buf, b"\r\n")
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum StatusLine {
    Complete {
        version: Version,
        code: u16,
        reason: String,
        consumed: usize,
    },
    /// No full line buffered yet.
    Partial,
    /// The buffered line is not an HTTP/1.x status line.
    Invalid,
}

pub(crate) fn parse_status_line(buf: &[u8]) -> StatusLine {
    let Some(end) = find_crlf(buf) else {
        return StatusLine::Partial;
    };
    let Ok(line) = std::str::from_utf8(&buf[..end]) else {
        return StatusLine::Invalid;
    };

    let Some(rest) = line.strip_prefix("HTTP/") else {
        return StatusLine::Invalid;
    };
    let mut parts = rest.splitn(3, ' ');
    let version = match parts.next() {
        Some("1.1") => Version::HTTP_11,
        Some("1.0") => Version::HTTP_10,
        Some("0.9") => Version::HTTP_09,
        _ => return StatusLine::Invalid,
    };
    let code = match parts.next().map(str::parse::<u16>) {
        Some(Ok(code)) if (100..=999).contains(&code) => code,
        _ => return StatusLine::Invalid,
    };
    let reason = parts.next().unwrap_or("").trim().to_string();

    StatusLine::Complete {
        version,
        code,
        reason,
        consumed: end + 2,
    }
}

#[derive(Debug)]
pub(crate) enum HeaderBlock {
    Complete { headers: HeaderMap, consumed: usize },
    /// The blank line terminating the block is not buffered yet.
    Partial,
    Invalid,
}

/// Parses the header block that follows the status line, ending with the
/// blank line. Repeated header names (notably `Set-Cookie`) are appended.
pub(crate) fn parse_header_block(buf: &[u8]) -> HeaderBlock {
    let mut parsed = [httparse::EMPTY_HEADER; MAX_HEADERS];
    match httparse::parse_headers(buf, &mut parsed) {
        Ok(httparse::Status::Complete((consumed, raw))) => {
            let mut headers = HeaderMap::with_capacity(raw.len());
            for header in raw {
                let Ok(name) = HeaderName::from_bytes(header.name.as_bytes()) else {
                    return HeaderBlock::Invalid;
                };
                let Ok(value) = HeaderValue::from_bytes(header.value) else {
                    return HeaderBlock::Invalid;
                };
                headers.append(name, value);
            }
            HeaderBlock::Complete { headers, consumed }
        }
        Ok(httparse::Status::Partial) => HeaderBlock::Partial,
        Err(_) => HeaderBlock::Invalid,
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ChunkSize {
    Complete { size: u64, consumed: usize },
    /// The size line is not fully buffered yet.
    Partial,
    Invalid,
}

/// Parses a chunk-size line (`<hex>[;extensions]\r\n`).
///
/// One leading CRLF is skipped: the trailing CRLF of the previous chunk's
/// payload is left in the buffer by the data phase and belongs to this line.
pub(crate) fn parse_chunk_size(buf: &[u8]) -> ChunkSize {
    let (buf, skipped) = match buf {
        [b'\r', b'\n', rest @ ..] => (rest, 2),
        [b'\r'] => return ChunkSize::Partial,
        other => (other, 0),
    };

    let Some(end) = find_crlf(buf) else {
        return ChunkSize::Partial;
    };
    let Ok(line) = std::str::from_utf8(&buf[..end]) else {
        return ChunkSize::Invalid;
    };
    let digits = line.split(';').next().unwrap_or("").trim();
    if digits.is_empty() {
        return ChunkSize::Invalid;
    }
    match u64::from_str_radix(digits, 16) {
        Ok(size) => ChunkSize::Complete {
            size,
            consumed: skipped + end + 2,
        },
        Err(_) => ChunkSize::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_line_ok() {
        match parse_status_line(b"HTTP/1.1 200 OK\r\nrest") {
            StatusLine::Complete {
                version,
                code,
                reason,
                consumed,
            } => {
                assert_eq!(version, Version::HTTP_11);
                assert_eq!(code, 200);
                assert_eq!(reason, "OK");
                assert_eq!(consumed, 17);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn status_line_without_reason() {
        match parse_status_line(b"HTTP/1.0 204\r\n") {
            StatusLine::Complete { code, reason, .. } => {
                assert_eq!(code, 204);
                assert_eq!(reason, "");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn status_line_partial_and_invalid() {
        assert_eq!(parse_status_line(b"HTTP/1.1 200"), StatusLine::Partial);
        assert_eq!(parse_status_line(b"ICY 200 OK\r\n"), StatusLine::Invalid);
        assert_eq!(parse_status_line(b"HTTP/1.1 banana\r\n"), StatusLine::Invalid);
    }

    #[test]
    fn header_block_complete() {
        let raw = b"Content-Length: 5\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\n\r\nbody";
        match parse_header_block(raw) {
            HeaderBlock::Complete { headers, consumed } => {
                assert_eq!(consumed, raw.len() - 4);
                assert_eq!(headers.get("content-length").unwrap(), "5");
                assert_eq!(
                    headers.get_all("set-cookie").iter().count(),
                    2,
                    "repeated headers must be kept"
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn header_block_empty() {
        match parse_header_block(b"\r\nhello") {
            HeaderBlock::Complete { headers, consumed } => {
                assert_eq!(consumed, 2);
                assert!(headers.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn header_block_partial() {
        assert!(matches!(
            parse_header_block(b"Content-Length: 5\r\n"),
            HeaderBlock::Partial
        ));
    }

    #[test]
    fn chunk_size_plain() {
        assert_eq!(
            parse_chunk_size(b"3\r\nabc"),
            ChunkSize::Complete {
                size: 3,
                consumed: 3
            }
        );
    }

    #[test]
    fn chunk_size_skips_previous_payload_crlf() {
        assert_eq!(
            parse_chunk_size(b"\r\n2\r\nde"),
            ChunkSize::Complete {
                size: 2,
                consumed: 5
            }
        );
    }

    #[test]
    fn chunk_size_with_extension() {
        assert_eq!(
            parse_chunk_size(b"1a;name=value\r\n"),
            ChunkSize::Complete {
                size: 0x1a,
                consumed: 15
            }
        );
    }

    #[test]
    fn chunk_size_partial_and_invalid() {
        assert_eq!(parse_chunk_size(b"3"), ChunkSize::Partial);
        assert_eq!(parse_chunk_size(b"\r"), ChunkSize::Partial);
        assert_eq!(parse_chunk_size(b"zz\r\n"), ChunkSize::Invalid);
        assert_eq!(parse_chunk_size(b"\r\n\r\n"), ChunkSize::Invalid);
    }
}
