//! Proxy configuration and lifecycle
//!
//! A [`Proxy`] moves through *new* → *running* → *stopped*, one way.
//! `start` binds the listen socket and spawns the accept loop; `stop`
//! closes every live connection and then the socket. A stopped proxy
//! cannot be restarted.

use crate::connection::ConnectionRegistry;
use crate::error::{Error, Result};
use crate::interceptor::Interceptor;
use crate::server::{self, ProxyCore};
use crate::tls::TlsIdentity;
use socket2::{Domain, Protocol, Type};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tapwire::Client;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const DEFAULT_ADDRESS: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_BACKLOG: u32 = 128;
const DEFAULT_CERT_PATH: &str = ".tapwire-mitm/cert.pem";
const DEFAULT_KEY_PATH: &str = ".tapwire-mitm/key.pem";

/// Builder for [`Proxy`].
pub struct ProxyBuilder {
  address: String,
  port: u16,
  backlog: u32,
  cert_path: Option<PathBuf>,
  key_path: Option<PathBuf>,
  interceptor: Option<Interceptor>,
  client: Option<Client>,
}

impl Default for ProxyBuilder {
  fn default() -> Self {
    Self {
      address: DEFAULT_ADDRESS.to_string(),
      port: DEFAULT_PORT,
      backlog: DEFAULT_BACKLOG,
      cert_path: None,
      key_path: None,
      interceptor: None,
      client: None,
    }
  }
}

impl ProxyBuilder {
  /// Set the listen address. Default `127.0.0.1`.
  pub fn address(mut self, address: impl Into<String>) -> Self {
    self.address = address.into();
    self
  }
  /// Set the listen port. Default `8080`; `0` picks a free port, which
  /// [`Proxy::start`] reports back.
  pub fn port(mut self, port: u16) -> Self {
    self.port = port;
    self
  }
  /// Set the listen backlog. Default `128`.
  pub fn backlog(mut self, backlog: u32) -> Self {
    self.backlog = backlog;
    self
  }
  /// Set the PEM certificate and private key terminating client TLS inside
  /// mediated tunnels. Without an explicit pair, `.tapwire-mitm/cert.pem`
  /// and `.tapwire-mitm/key.pem` are used when present.
  pub fn tls_identity(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
    self.cert_path = Some(cert.into());
    self.key_path = Some(key.into());
    self
  }
  /// Install an interceptor; without one the proxy relays bytes untouched.
  pub fn interceptor(mut self, interceptor: Interceptor) -> Self {
    self.interceptor = Some(interceptor);
    self
  }
  /// Provide the upstream HTTP client the interceptor forwards through.
  ///
  /// Defaults to a keep-alive client with a 60 second timeout; tests point
  /// this at a client that trusts their throwaway origin certificates.
  pub fn client(mut self, client: Client) -> Self {
    self.client = Some(client);
    self
  }
  /// Build the proxy. TLS material is loaded now, not at `start`.
  pub fn build(self) -> Result<Proxy> {
    let identity = if self.interceptor.is_some() {
      match (&self.cert_path, &self.key_path) {
        (Some(cert), Some(key)) => Some(TlsIdentity::from_pem_files(cert, key)?),
        _ => {
          let cert = PathBuf::from(DEFAULT_CERT_PATH);
          let key = PathBuf::from(DEFAULT_KEY_PATH);
          if cert.exists() && key.exists() {
            Some(TlsIdentity::from_pem_files(&cert, &key)?)
          } else {
            // plain-HTTP interception still works; mediated tunnels will
            // be refused with a logged TLS error
            None
          }
        }
      }
    } else {
      None
    };
    let client = match self.client {
      Some(client) => client,
      None => Client::builder()
        .timeout(Some(Duration::from_secs(60)))
        .keepalive(true)
        .build()
        .map_err(|e| Error::proxy_error(format!("failed to build default client: {e}")))?,
    };
    Ok(Proxy {
      address: self.address,
      port: self.port,
      backlog: self.backlog,
      core: Arc::new(ProxyCore {
        registry: ConnectionRegistry::default(),
        interceptor: self.interceptor,
        identity,
        client,
      }),
      state: Mutex::new(State::New),
    })
  }
}

enum State {
  New,
  Running {
    accept_task: JoinHandle<()>,
    local_addr: SocketAddr,
  },
  Stopped,
}

/// The intercepting proxy.
///
/// ```no_run
/// use tapwire_mitm::{Interceptor, Proxy};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///   let proxy = Proxy::builder()
///     .port(8080)
///     .interceptor(Interceptor::passthrough())
///     .build()?;
///   proxy.start()?;
///   tokio::signal::ctrl_c().await?;
///   proxy.stop()?;
///   Ok(())
/// }
/// ```
pub struct Proxy {
  address: String,
  port: u16,
  backlog: u32,
  core: Arc<ProxyCore>,
  state: Mutex<State>,
}

impl Proxy {
  /// Creates a `ProxyBuilder` to configure a `Proxy`.
  pub fn builder() -> ProxyBuilder {
    ProxyBuilder::default()
  }

  /// Bind the listen socket (`SO_REUSEADDR`, configured backlog), spawn the
  /// accept loop and return the bound address. Callers may connect as soon
  /// as this returns.
  ///
  /// Errors with [`Error::AlreadyStarted`] on a running proxy and
  /// [`Error::Stopped`] on a stopped one; a bind failure leaves the proxy
  /// in its fresh state. Must be called within a Tokio runtime.
  pub fn start(&self) -> Result<SocketAddr> {
    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    match &*state {
      State::New => {}
      State::Running { .. } => return Err(Error::AlreadyStarted),
      State::Stopped => return Err(Error::Stopped),
    }
    let addr: SocketAddr = format!("{}:{}", self.address, self.port)
      .parse()
      .map_err(|e| Error::proxy_error(format!("invalid listen address: {e}")))?;
    let socket = socket2::Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(self.backlog as i32)?;
    socket.set_nonblocking(true)?;
    let listener = TcpListener::from_std(socket.into())?;
    let local_addr = listener.local_addr()?;
    let accept_task = tokio::spawn(server::accept_loop(listener, self.core.clone()));
    tracing::info!(%local_addr, "listening");
    *state = State::Running {
      accept_task,
      local_addr,
    };
    Ok(local_addr)
  }

  /// Close every live connection, then the listen socket.
  ///
  /// Idempotent once stopped; a never-started proxy goes straight to
  /// *stopped*.
  pub fn stop(&self) -> Result<()> {
    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    match std::mem::replace(&mut *state, State::Stopped) {
      State::Running {
        accept_task,
        local_addr,
      } => {
        self.core.registry.drain();
        accept_task.abort();
        tracing::info!(%local_addr, "stopped");
      }
      State::New | State::Stopped => {}
    }
    Ok(())
  }

  /// The bound address while running.
  pub fn local_addr(&self) -> Option<SocketAddr> {
    match &*self.state.lock().unwrap_or_else(PoisonError::into_inner) {
      State::Running { local_addr, .. } => Some(*local_addr),
      _ => None,
    }
  }

  /// Whether the proxy is in the *running* state.
  pub fn is_running(&self) -> bool {
    matches!(
      &*self.state.lock().unwrap_or_else(PoisonError::into_inner),
      State::Running { .. }
    )
  }

  /// Number of live client↔origin connections.
  pub fn connection_count(&self) -> usize {
    self.core.registry.len()
  }
}

impl Drop for Proxy {
  fn drop(&mut self) {
    let _ = self.stop();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn start_twice_is_an_error() {
    let proxy = Proxy::builder().port(0).build().unwrap();
    proxy.start().unwrap();
    assert!(matches!(proxy.start(), Err(Error::AlreadyStarted)));
    proxy.stop().unwrap();
  }

  #[tokio::test]
  async fn start_after_stop_is_an_error() {
    let proxy = Proxy::builder().port(0).build().unwrap();
    proxy.start().unwrap();
    proxy.stop().unwrap();
    assert!(matches!(proxy.start(), Err(Error::Stopped)));
  }

  #[tokio::test]
  async fn stop_is_idempotent() {
    let proxy = Proxy::builder().port(0).build().unwrap();
    proxy.start().unwrap();
    proxy.stop().unwrap();
    proxy.stop().unwrap();
    assert!(!proxy.is_running());
  }

  #[tokio::test]
  async fn local_addr_present_iff_running() {
    let proxy = Proxy::builder().port(0).build().unwrap();
    assert!(proxy.local_addr().is_none());
    let addr = proxy.start().unwrap();
    assert_eq!(proxy.local_addr(), Some(addr));
    proxy.stop().unwrap();
    assert!(proxy.local_addr().is_none());
  }

  #[tokio::test]
  async fn bind_failure_leaves_proxy_startable() {
    let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = holder.local_addr().unwrap().port();
    let proxy = Proxy::builder().port(port).build().unwrap();
    // SO_REUSEADDR still refuses an actively listening port
    assert!(proxy.start().is_err());
    drop(holder);
    assert!(proxy.start().is_ok());
    proxy.stop().unwrap();
  }
}
