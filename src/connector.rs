use crate::errors::Result;
use crate::socket::{MaybeTlsStream, Socket};
use crate::tls::{Certificate, DisabledVerifier};
use socket2::Socket as RawSocket;
use socket2::{Domain, Protocol, Type};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpSocket;
use tokio_rustls::rustls;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;

/// ConnectorBuilder
#[derive(Clone)]
pub struct ConnectorBuilder {
  certs_verification: bool,
  read_timeout: Option<Duration>,
  write_timeout: Option<Duration>,
  connect_timeout: Option<Duration>,
  nodelay: bool,
  keepalive: bool,
  certificate: Vec<Certificate>,
}

impl Default for ConnectorBuilder {
  fn default() -> Self {
    Self {
      certs_verification: true,
      read_timeout: Some(Duration::from_secs(30)),
      write_timeout: Some(Duration::from_secs(30)),
      connect_timeout: Some(Duration::from_secs(10)),
      nodelay: false,
      keepalive: false,
      certificate: vec![],
    }
  }
}

impl ConnectorBuilder {
  /// Controls the use of certificate validation.
  ///
  /// Defaults to `true`.
  ///
  /// # Warning
  ///
  /// You should think very carefully before using this method. If invalid certificates are trusted, *any*
  /// certificate for *any* site will be trusted for use. This includes expired certificates. This introduces
  /// significant vulnerabilities, and should only be used as a last resort.
  pub fn certs_verification(mut self, value: bool) -> ConnectorBuilder {
    self.certs_verification = value;
    self
  }
  /// Set that all sockets have `SO_NODELAY` set to the supplied value `nodelay`.
  ///
  /// Default is `false`.
  pub fn nodelay(mut self, value: bool) -> ConnectorBuilder {
    self.nodelay = value;
    self
  }
  /// Sets value for the `SO_KEEPALIVE` option on this socket.
  ///
  /// Default is `false`.
  pub fn keepalive(mut self, value: bool) -> ConnectorBuilder {
    self.keepalive = value;
    self
  }
  /// Adds certificates to the set of roots that the connector will trust,
  /// next to the platform's native roots.
  pub fn certificate(mut self, value: Vec<Certificate>) -> ConnectorBuilder {
    self.certificate = value;
    self
  }
  /// Adds one certificate to the set of trusted roots.
  pub fn add_certificate(mut self, value: Certificate) -> ConnectorBuilder {
    self.certificate.push(value);
    self
  }
  /// Enables a read timeout.
  ///
  /// The timeout applies to each read operation, and resets after a
  /// successful read.
  ///
  /// Default is 30 seconds.
  pub fn read_timeout(mut self, timeout: Option<Duration>) -> ConnectorBuilder {
    self.read_timeout = timeout;
    self
  }
  /// Enables a write timeout.
  ///
  /// The timeout applies to each write operation, and resets after a
  /// successful write.
  ///
  /// Default is 30 seconds.
  pub fn write_timeout(mut self, timeout: Option<Duration>) -> ConnectorBuilder {
    self.write_timeout = timeout;
    self
  }
  /// Set a timeout for only the connect phase.
  ///
  /// Default is 10 seconds.
  pub fn connect_timeout(mut self, timeout: Option<Duration>) -> ConnectorBuilder {
    self.connect_timeout = timeout;
    self
  }
}

impl ConnectorBuilder {
  /// Combine the configuration of this builder with a TLS client config to
  /// create a `Connector`.
  pub fn build(&self) -> Result<Connector> {
    let tls = {
      let mut root_cert_store = rustls::RootCertStore::empty();
      for cert in rustls_native_certs::load_native_certs().certs {
        // unusable platform certificates are skipped, not fatal
        let _ = root_cert_store.add(cert);
      }
      for cert in &self.certificate {
        cert.append_to(&mut root_cert_store)?;
      }
      let provider = rustls::crypto::CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| std::sync::Arc::new(rustls::crypto::ring::default_provider()));
      let config_builder = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|_| crate::errors::builder("invalid TLS versions"))?;
      let tls = if self.certs_verification {
        config_builder
          .with_root_certificates(root_cert_store)
          .with_no_client_auth()
      } else {
        config_builder
          .dangerous()
          .with_custom_certificate_verifier(std::sync::Arc::new(DisabledVerifier::new(&provider)))
          .with_no_client_auth()
      };
      TlsConnector::from(std::sync::Arc::new(tls))
    };
    let conn = Connector {
      connect_timeout: self.connect_timeout,
      nodelay: self.nodelay,
      keepalive: self.keepalive,
      read_timeout: self.read_timeout,
      write_timeout: self.write_timeout,
      tls,
    };
    Ok(conn)
  }
}

/// Connector
#[derive(Clone)]
pub struct Connector {
  connect_timeout: Option<Duration>,
  nodelay: bool,
  keepalive: bool,
  read_timeout: Option<Duration>,
  write_timeout: Option<Duration>,
  tls: TlsConnector,
}

impl Connector {
  /// Connect to a remote endpoint with addr
  pub async fn connect_with_addr<S: Into<SocketAddr>>(&self, addr: S) -> Result<Socket> {
    let addr = addr.into();
    let raw_socket = RawSocket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    raw_socket.set_nonblocking(true)?;
    let socket = TcpSocket::from_std_stream(raw_socket.into());
    if self.nodelay {
      socket.set_nodelay(self.nodelay)?;
    }
    if self.keepalive {
      socket.set_keepalive(self.keepalive)?;
    }
    let s = match self.connect_timeout {
      None => socket.connect(addr).await?,
      Some(timeout) => tokio::time::timeout(timeout, socket.connect(addr))
        .await
        .map_err(|x| crate::errors::new_io_error(std::io::ErrorKind::TimedOut, &x.to_string()))??,
    };
    Ok(Socket::new(
      MaybeTlsStream::Tcp(s),
      self.read_timeout,
      self.write_timeout,
    ))
  }
  /// Connect to a remote endpoint with a URI, upgrading to TLS for `https`.
  pub async fn connect_with_uri(&self, target: &http::Uri) -> Result<Socket> {
    let host = target
      .host()
      .ok_or_else(|| crate::errors::builder(format!("no host in uri: {}", target)))?;
    let port = target.port_u16().unwrap_or_else(|| {
      if target.scheme() == Some(&http::uri::Scheme::HTTPS) {
        443
      } else {
        80
      }
    });
    let mut last_err = None;
    let addrs = tokio::net::lookup_host((host, port)).await?;
    let mut socket = None;
    for addr in addrs {
      match self.connect_with_addr(addr).await {
        Ok(s) => {
          socket = Some(s);
          break;
        }
        Err(err) => last_err = Some(err),
      }
    }
    let socket = match socket {
      Some(s) => s,
      None => {
        return Err(last_err.unwrap_or_else(|| {
          crate::errors::new_io_error(
            std::io::ErrorKind::AddrNotAvailable,
            &format!("no address resolved for {}:{}", host, port),
          )
        }))
      }
    };
    if target.scheme() == Some(&http::uri::Scheme::HTTPS) {
      self.upgrade_to_tls(socket, host).await
    } else {
      Ok(socket)
    }
  }
  /// Perform a TLS client handshake over an established socket, with SNI set
  /// to `domain`.
  pub async fn upgrade_to_tls(&self, stream: Socket, domain: &str) -> Result<Socket> {
    let domain = ServerName::try_from(domain.to_owned())
      .map_err(|e| crate::errors::Error::Other(e.to_string()))?;
    let (read_timeout, write_timeout) = (stream.read_timeout, stream.write_timeout);
    let tcp = match stream.into_inner() {
      MaybeTlsStream::Tcp(tcp) => tcp,
      MaybeTlsStream::Rustls(_) => {
        return Err(crate::errors::builder("stream is already TLS"));
      }
    };
    let tls = self.tls.connect(domain, tcp).await?;
    Ok(Socket::new(tls.into(), read_timeout, write_timeout))
  }
}

impl Default for Connector {
  fn default() -> Self {
    ConnectorBuilder::default()
      .build()
      .expect("new default connector failure")
  }
}
