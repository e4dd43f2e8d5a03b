use std::fs;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use monoio::net::TcpStream;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::RootCertStore;

use crate::error::{Error, ErrorKind};
use crate::request::TlsOptions;

pub type TlsStream = monoio_rustls::ClientTlsStream<TcpStream>;

/// Upgrades an established TCP stream to TLS.
///
/// Built per request from its [`TlsOptions`]: trust roots come from
/// webpki-roots plus any PEM material given by `verify_filename`,
/// `verify_path` (a directory of PEM files) or inline `ssl_certs`; client
/// authentication from `certificate_file`/`private_key_file` or inline
/// `ssl_auth`. With `always_verify_peer` off, a verifier that accepts any
/// certificate is installed instead of the root store.
#[derive(Clone)]
pub struct TlsConnector {
    inner: monoio_rustls::TlsConnector,
}

impl TlsConnector {
    pub fn from_options(opts: &TlsOptions) -> Result<Self, Error> {
        let config = build_client_config(opts)?;
        Ok(Self {
            inner: config.into(),
        })
    }

    pub async fn handshake(
        &self,
        server_name: ServerName<'static>,
        io: TcpStream,
    ) -> Result<TlsStream, monoio_rustls::TlsError> {
        self.inner.connect(server_name, io).await
    }
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TlsConnector")
    }
}

fn build_client_config(opts: &TlsOptions) -> Result<rustls::ClientConfig, Error> {
    let bad = |what: &str, detail: String| {
        Error::new(ErrorKind::Handshake, format!("{what}: {detail}"))
    };

    let builder = rustls::ClientConfig::builder();

    let builder = if opts.always_verify_peer {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        if let Some(file) = &opts.verify_filename {
            let certs = read_pem_certs(file)?;
            roots.add_parsable_certificates(certs);
        }
        if let Some(dir) = &opts.verify_path {
            let entries =
                fs::read_dir(dir).map_err(|e| bad("verify path", e.to_string()))?;
            for entry in entries {
                let entry = entry.map_err(|e| bad("verify path", e.to_string()))?;
                if entry.path().is_file() {
                    roots.add_parsable_certificates(read_pem_certs(&entry.path())?);
                }
            }
        }
        if let Some(pem) = &opts.ssl_certs {
            roots.add_parsable_certificates(parse_pem_certs(pem.as_bytes())?);
        }
        builder.with_root_certificates(roots)
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerification::new()))
    };

    let client_auth = load_client_auth(opts)?;
    let config = match client_auth {
        Some((certs, key)) => builder
            .with_client_auth_cert(certs, key)
            .map_err(|e| bad("client auth", e.to_string()))?,
        None => builder.with_no_client_auth(),
    };
    Ok(config)
}

type ClientAuth = (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>);

fn load_client_auth(opts: &TlsOptions) -> Result<Option<ClientAuth>, Error> {
    let bad = |detail: String| Error::new(ErrorKind::Handshake, format!("client auth: {detail}"));

    if let (Some(cert_file), Some(key_file)) = (&opts.certificate_file, &opts.private_key_file) {
        let certs = read_pem_certs(cert_file)?;
        let key_data = fs::read(key_file).map_err(|e| bad(e.to_string()))?;
        let key = rustls_pemfile::private_key(&mut BufReader::new(key_data.as_slice()))
            .map_err(|e| bad(e.to_string()))?
            .ok_or_else(|| bad("no private key in file".to_string()))?;
        return Ok(Some((certs, key)));
    }

    if let Some((cert_pem, key_pem)) = &opts.ssl_auth {
        let certs = parse_pem_certs(cert_pem.as_bytes())?;
        let key = rustls_pemfile::private_key(&mut BufReader::new(key_pem.as_bytes()))
            .map_err(|e| bad(e.to_string()))?
            .ok_or_else(|| bad("no private key in pem".to_string()))?;
        return Ok(Some((certs, key)));
    }

    Ok(None)
}

fn read_pem_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, Error> {
    let data = fs::read(path).map_err(|e| {
        Error::new(
            ErrorKind::Handshake,
            format!("certificates {}: {e}", path.display()),
        )
    })?;
    parse_pem_certs(&data)
}

fn parse_pem_certs(data: &[u8]) -> Result<Vec<CertificateDer<'static>>, Error> {
    rustls_pemfile::certs(&mut BufReader::new(data))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| Error::new(ErrorKind::Handshake, format!("bad certificate pem: {e}")))
}

/// Accepts any server certificate. Installed when `always_verify_peer` is
/// turned off.
#[derive(Debug)]
struct NoVerification {
    provider: rustls::crypto::CryptoProvider,
}

impl NoVerification {
    fn new() -> Self {
        Self {
            provider: rustls::crypto::ring::default_provider(),
        }
    }
}

impl rustls::client::danger::ServerCertVerifier for NoVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_build() {
        let opts = TlsOptions::default();
        assert!(TlsConnector::from_options(&opts).is_ok());
    }

    #[test]
    fn no_verify_options_build() {
        let opts = TlsOptions {
            always_verify_peer: false,
            ..TlsOptions::default()
        };
        assert!(TlsConnector::from_options(&opts).is_ok());
    }

    #[test]
    fn missing_verify_file_is_handshake_error() {
        let opts = TlsOptions {
            verify_filename: Some("/definitely/not/here.pem".into()),
            ..TlsOptions::default()
        };
        let err = TlsConnector::from_options(&opts).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Handshake);
    }

    #[test]
    fn inline_garbage_certs_are_ignored_by_pem_parser() {
        // pemfile skips non-PEM content rather than failing
        let opts = TlsOptions {
            ssl_certs: Some("not a pem".to_string()),
            ..TlsOptions::default()
        };
        assert!(TlsConnector::from_options(&opts).is_ok());
    }
}
