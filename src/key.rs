use std::net::{SocketAddr, ToSocketAddrs};

use http::Uri;
use rustls::pki_types::ServerName;
use smol_str::SmolStr;

use crate::error::{Error, ErrorKind};

/// Identity of a connection target.
///
/// Two requests may share an underlying socket only when their keys are
/// equal: same host, same port, and both plain or both TLS.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Key {
    pub host: SmolStr,
    pub port: u16,
    pub server_name: Option<ServerName<'static>>,
}

impl Key {
    #[inline]
    pub fn is_tls(&self) -> bool {
        self.server_name.is_some()
    }

    /// Resolves the target to socket addresses, in resolver order.
    pub fn resolve(&self) -> Result<Vec<SocketAddr>, Error> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| Error::io(ErrorKind::Resolve, e))?
            .collect();
        if addrs.is_empty() {
            return Err(Error::new(ErrorKind::Resolve, "no resolve result"));
        }
        Ok(addrs)
    }
}

impl TryFrom<&Uri> for Key {
    type Error = Error;

    fn try_from(uri: &Uri) -> Result<Self, Self::Error> {
        let host = uri
            .host()
            .ok_or_else(|| Error::new(ErrorKind::Uri, "missing authority in url"))?;

        let tls = match uri.scheme_str() {
            Some("http") | None => false,
            Some("https") => true,
            Some(other) => {
                return Err(Error::new(
                    ErrorKind::Uri,
                    format!("unsupported scheme {other:?}"),
                ))
            }
        };
        let port = uri.port_u16().unwrap_or(if tls { 443 } else { 80 });

        let server_name = if tls {
            let name = ServerName::try_from(host.to_string())
                .map_err(|e| Error::new(ErrorKind::Uri, format!("invalid server name: {e}")))?;
            Some(name)
        } else {
            None
        };

        Ok(Self {
            host: SmolStr::new(host),
            port,
            server_name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_from_http_uri() {
        let uri: Uri = "http://example.com/path".parse().unwrap();
        let key = Key::try_from(&uri).unwrap();
        assert_eq!(key.host, "example.com");
        assert_eq!(key.port, 80);
        assert!(!key.is_tls());
    }

    #[test]
    fn key_from_https_uri_with_port() {
        let uri: Uri = "https://example.com:8443/".parse().unwrap();
        let key = Key::try_from(&uri).unwrap();
        assert_eq!(key.port, 8443);
        assert!(key.is_tls());
    }

    #[test]
    fn rejects_unknown_scheme() {
        let uri: Uri = "ftp://example.com/".parse().unwrap();
        let err = Key::try_from(&uri).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Uri);
    }

    #[test]
    fn keys_differ_between_plain_and_tls() {
        let plain = Key::try_from(&"http://h/".parse::<Uri>().unwrap()).unwrap();
        let tls = Key::try_from(&"https://h/".parse::<Uri>().unwrap()).unwrap();
        assert_ne!(plain, tls);
    }

    #[test]
    fn resolves_loopback() {
        let key = Key {
            host: SmolStr::new("127.0.0.1"),
            port: 80,
            server_name: None,
        };
        let addrs = key.resolve().unwrap();
        assert!(addrs.iter().any(|a| a.ip().is_loopback()));
    }
}
