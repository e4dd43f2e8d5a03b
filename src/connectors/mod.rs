//! Traits and building blocks for establishing transport connections.
//!
//! The [`Connector`] trait is the composable seam between "where to connect"
//! and "what came out of it": [`TcpConnector`] dials a resolved endpoint
//! list, [`TlsConnector`] upgrades an established TCP stream according to a
//! request's TLS options. [`ConnectorExt`] bounds any connector with a
//! deadline.

mod tcp_connector;
mod tls_connector;

use std::{future::Future, time::Duration};

pub use tcp_connector::TcpConnector;
pub use tls_connector::{TlsConnector, TlsStream};

/// Establishes a connection for a key describing the target.
pub trait Connector<K> {
    type Connection;
    type Error;

    fn connect(&self, key: K) -> impl Future<Output = Result<Self::Connection, Self::Error>>;
}

/// Adds a deadline to any [`Connector`]. Implemented for every connector.
pub trait ConnectorExt<K>: Connector<K> {
    fn connect_with_timeout(
        &self,
        key: K,
        timeout: Duration,
    ) -> impl Future<Output = Result<Result<Self::Connection, Self::Error>, monoio::time::error::Elapsed>>;
}

impl<K, T: Connector<K>> ConnectorExt<K> for T {
    #[inline]
    fn connect_with_timeout(
        &self,
        key: K,
        timeout: Duration,
    ) -> impl Future<Output = Result<Result<Self::Connection, Self::Error>, monoio::time::error::Elapsed>>
    {
        monoio::time::timeout(timeout, self.connect(key))
    }
}
