//! TLS trust configuration
//!
//! Upstream connections verify origin certificates against the platform's
//! native roots. [`Certificate`] adds extra roots next to them (test
//! harnesses trust the throwaway certificates of local origins this way),
//! and `DisabledVerifier` backs the last-resort switch that turns
//! verification off entirely.

use std::io::Cursor;
use tokio_rustls::rustls::client::danger::{
  HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use tokio_rustls::rustls::crypto::CryptoProvider;
use tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio_rustls::rustls::{DigitallySignedStruct, Error as TlsError, RootCertStore, SignatureScheme};

/// An extra trust root for upstream TLS, held alongside the platform's
/// native roots.
#[derive(Clone, Debug)]
pub struct Certificate {
  der: Vec<CertificateDer<'static>>,
}

impl Certificate {
  /// Parse a PEM input holding one certificate or a bundle.
  ///
  /// Malformed or empty input fails here, at configuration time, rather
  /// than on the first connection.
  pub fn from_pem(pem: &[u8]) -> crate::Result<Certificate> {
    let der = rustls_pemfile::certs(&mut Cursor::new(pem))
      .collect::<std::result::Result<Vec<_>, _>>()
      .map_err(|err| crate::errors::builder(format!("invalid PEM certificate: {err}")))?;
    if der.is_empty() {
      return Err(crate::errors::builder("no certificate found in PEM input"));
    }
    Ok(Certificate { der })
  }

  /// Wrap a single binary DER encoded certificate.
  pub fn from_der(der: &[u8]) -> Certificate {
    Certificate {
      der: vec![CertificateDer::from(der.to_vec())],
    }
  }

  pub(crate) fn append_to(&self, roots: &mut RootCertStore) -> crate::Result<()> {
    for cert in &self.der {
      roots
        .add(cert.clone())
        .map_err(|err| crate::errors::builder(format!("unusable trust root: {err}")))?;
    }
    Ok(())
  }
}

/// Accepts any server certificate.
///
/// Installed only when the caller explicitly turns certificate
/// verification off; the advertised signature schemes come from the active
/// crypto provider rather than a fixed list.
#[derive(Debug)]
pub(crate) struct DisabledVerifier {
  schemes: Vec<SignatureScheme>,
}

impl DisabledVerifier {
  pub(crate) fn new(provider: &CryptoProvider) -> Self {
    Self {
      schemes: provider.signature_verification_algorithms.supported_schemes(),
    }
  }
}

impl ServerCertVerifier for DisabledVerifier {
  fn verify_server_cert(
    &self,
    _end_entity: &CertificateDer,
    _intermediates: &[CertificateDer],
    _server_name: &ServerName,
    _ocsp_response: &[u8],
    _now: UnixTime,
  ) -> Result<ServerCertVerified, TlsError> {
    Ok(ServerCertVerified::assertion())
  }

  fn verify_tls12_signature(
    &self,
    _message: &[u8],
    _cert: &CertificateDer,
    _dss: &DigitallySignedStruct,
  ) -> Result<HandshakeSignatureValid, TlsError> {
    Ok(HandshakeSignatureValid::assertion())
  }

  fn verify_tls13_signature(
    &self,
    _message: &[u8],
    _cert: &CertificateDer,
    _dss: &DigitallySignedStruct,
  ) -> Result<HandshakeSignatureValid, TlsError> {
    Ok(HandshakeSignatureValid::assertion())
  }

  fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
    self.schemes.clone()
  }
}
