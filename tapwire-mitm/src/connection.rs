//! Connection identity and the live-connection registry

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio::net::TcpStream;
use tokio::task::AbortHandle;

/// One client↔origin pairing: identity plus the two byte streams.
///
/// While the connection is open both streams belong exclusively to the task
/// relaying it; the registry only keeps a handle that can tear the task
/// down.
#[derive(Debug)]
pub struct Connection {
  host: String,
  port: u16,
  client: TcpStream,
  upstream: TcpStream,
}

impl Connection {
  /// Pair a client stream with an upstream stream for `host:port`.
  pub fn new(host: impl Into<String>, port: u16, client: TcpStream, upstream: TcpStream) -> Self {
    Self {
      host: host.into(),
      port,
      client,
      upstream,
    }
  }
  /// Origin host.
  pub fn host(&self) -> &str {
    &self.host
  }
  /// Origin port.
  pub fn port(&self) -> u16 {
    self.port
  }
  /// Registry key, `"host:port"`.
  pub fn key(&self) -> String {
    format!("{}:{}", self.host, self.port)
  }
  /// Take ownership of the paired streams, `(client, upstream)`.
  pub fn into_streams(self) -> (TcpStream, TcpStream) {
    (self.client, self.upstream)
  }
}

struct RegisteredConnection {
  abort: AbortHandle,
}

/// Live connections keyed by `"host:port"`.
///
/// An entry is present exactly while a relay task owns the paired streams;
/// removing it (directly or via [`drain`](ConnectionRegistry::drain)) aborts
/// the task, which drops and thereby closes both sockets.
#[derive(Default)]
pub struct ConnectionRegistry {
  inner: Mutex<HashMap<String, RegisteredConnection>>,
}

impl ConnectionRegistry {
  /// Register the relay task for `key`. A previous entry under the same
  /// key is closed first; the client reconnecting to the same origin is
  /// the expected cause.
  pub(crate) fn connect(&self, key: &str, abort: AbortHandle) {
    let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(previous) = inner.insert(key.to_string(), RegisteredConnection { abort }) {
      tracing::debug!(%key, "closing displaced connection");
      previous.abort.abort();
    }
  }

  /// Close and remove the connection for `key`, if present.
  pub(crate) fn disconnect(&self, key: &str) {
    let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(connection) = inner.remove(key) {
      connection.abort.abort();
    }
  }

  /// Close and remove every connection.
  pub(crate) fn drain(&self) {
    let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
    for (key, connection) in inner.drain() {
      tracing::debug!(%key, "closing connection");
      connection.abort.abort();
    }
  }

  /// Number of live connections.
  pub fn len(&self) -> usize {
    self
      .inner
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }

  /// Whether no connection is live.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Whether a connection for `key` is live.
  pub fn contains(&self, key: &str) -> bool {
    self
      .inner
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .contains_key(key)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  async fn parked_task() -> AbortHandle {
    let task = tokio::spawn(std::future::pending::<()>());
    task.abort_handle()
  }

  #[tokio::test]
  async fn reinsertion_displaces_previous_entry() {
    let registry = ConnectionRegistry::default();
    let first = tokio::spawn(std::future::pending::<()>());
    let first_abort = first.abort_handle();
    registry.connect("origin.test:443", first_abort);
    registry.connect("origin.test:443", parked_task().await);
    assert_eq!(registry.len(), 1);
    // the displaced task was aborted
    assert!(first.await.unwrap_err().is_cancelled());
  }

  #[tokio::test]
  async fn drain_aborts_everything() {
    let registry = ConnectionRegistry::default();
    let a = tokio::spawn(std::future::pending::<()>());
    let b = tokio::spawn(std::future::pending::<()>());
    registry.connect("a.test:80", a.abort_handle());
    registry.connect("b.test:80", b.abort_handle());
    registry.drain();
    assert!(registry.is_empty());
    assert!(a.await.unwrap_err().is_cancelled());
    assert!(b.await.unwrap_err().is_cancelled());
  }

  #[tokio::test]
  async fn disconnect_removes_single_entry() {
    let registry = ConnectionRegistry::default();
    registry.connect("a.test:80", parked_task().await);
    registry.connect("b.test:80", parked_task().await);
    registry.disconnect("a.test:80");
    assert!(!registry.contains("a.test:80"));
    assert!(registry.contains("b.test:80"));
  }
}
