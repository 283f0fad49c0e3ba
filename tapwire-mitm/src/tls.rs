//! TLS mediation material
//!
//! The proxy terminates client TLS with one pre-provisioned certificate and
//! key; it does not mint per-origin leaf certificates. Clients are expected
//! to trust the certificate out-of-band (test harnesses install it next to
//! the browser profile they launch).

use crate::error::{Error, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::{self, ServerConfig};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

/// The proxy-side server certificate and key, loaded once at construction.
#[derive(Clone)]
pub struct TlsIdentity {
  acceptor: TlsAcceptor,
}

impl TlsIdentity {
  /// Load a PEM certificate chain and PEM private key from disk.
  pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self> {
    let certs = Self::read_certs(cert_path)?;
    if certs.is_empty() {
      return Err(Error::tls_error(format!(
        "no certificate found in {}",
        cert_path.display()
      )));
    }
    let key = Self::read_key(key_path)?;
    let provider = rustls::crypto::CryptoProvider::get_default()
      .cloned()
      .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()));
    let config = ServerConfig::builder_with_provider(provider)
      .with_safe_default_protocol_versions()
      .map_err(|e| Error::tls_error(format!("invalid TLS versions: {e}")))?
      .with_no_client_auth()
      .with_single_cert(certs, key)
      .map_err(|e| Error::tls_error(format!("failed to create TLS config: {e}")))?;
    Ok(Self {
      acceptor: TlsAcceptor::from(Arc::new(config)),
    })
  }

  fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
      .map_err(|e| Error::tls_error(format!("cannot read {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
      .map(|result| {
        result.map_err(|e| Error::tls_error(format!("invalid certificate in {}: {e}", path.display())))
      })
      .collect()
  }

  fn read_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
      .map_err(|e| Error::tls_error(format!("cannot read {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
      .map_err(|e| Error::tls_error(format!("invalid private key in {}: {e}", path.display())))?
      .ok_or_else(|| Error::tls_error(format!("no private key found in {}", path.display())))
  }

  /// Perform the server-side handshake on an accepted client stream.
  ///
  /// A failed handshake closes the connection; no half-established tunnel
  /// is ever handed to the interceptor.
  pub(crate) async fn accept(&self, stream: TcpStream) -> Result<TlsStream<TcpStream>> {
    self
      .acceptor
      .accept(stream)
      .await
      .map_err(|e| Error::tls_error(format!("TLS handshake failed: {e}")))
  }
}
