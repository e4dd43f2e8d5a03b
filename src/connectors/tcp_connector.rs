use std::{io, net::SocketAddr};

use monoio::net::TcpStream;

use super::Connector;

/// Dials a resolved endpoint list in order; the first successful TCP connect
/// wins. Name resolution happens earlier (see [`Key::resolve`]), so a
/// failure here is a connect error, not a resolve error.
///
/// [`Key::resolve`]: crate::Key::resolve
#[derive(Default, Clone, Copy, Debug)]
pub struct TcpConnector {
    pub no_delay: bool,
}

impl Connector<&[SocketAddr]> for TcpConnector {
    type Connection = TcpStream;
    type Error = io::Error;

    async fn connect(&self, addrs: &[SocketAddr]) -> Result<Self::Connection, Self::Error> {
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(io) => {
                    if self.no_delay {
                        // ignore a failed nodelay, the connection still works
                        let _ = io.set_nodelay(true);
                    }
                    return Ok(io);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "no endpoints to connect")
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use monoio::net::TcpListener;

    use super::*;
    use crate::connectors::ConnectorExt;

    #[monoio::test(enable_timer = true)]
    async fn connects_to_first_reachable_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let good = listener.local_addr().unwrap();
        // a port nothing listens on, tried first
        let dead = {
            let probe = TcpListener::bind("127.0.0.1:0").unwrap();
            probe.local_addr().unwrap()
        };

        let connector = TcpConnector { no_delay: true };
        let stream = connector.connect(&[dead, good][..]).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap(), good);
    }

    #[monoio::test(enable_timer = true)]
    async fn empty_endpoint_list_fails() {
        let connector = TcpConnector::default();
        let err = connector.connect(&[][..]).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AddrNotAvailable);
    }

    #[monoio::test(enable_timer = true)]
    async fn connect_with_timeout_completes_in_time() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let connector = TcpConnector::default();
        let res = connector
            .connect_with_timeout(&[addr][..], Duration::from_secs(5))
            .await
            .expect("must not time out");
        assert!(res.is_ok());
    }
}
