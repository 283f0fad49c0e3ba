//! Error types for the proxy engine

use std::io;
use thiserror::Error;

/// Result type for proxy operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for proxy operations
#[derive(Error, Debug)]
pub enum Error {
  /// IO error
  #[error("IO error: {0}")]
  Io(io::Error),

  /// TLS error
  #[error("TLS error: {0}")]
  TlsError(String),

  /// HTTP error
  #[error("HTTP error: {0}")]
  HttpError(http::Error),

  /// Upstream client error
  #[error("client error: {0}")]
  ClientError(tapwire::Error),

  /// Proxy error
  #[error("proxy error: {0}")]
  ProxyError(String),

  /// Invalid request
  #[error("invalid request: {0}")]
  InvalidRequest(String),

  /// Connection error
  #[error("connection error: {0}")]
  ConnectionError(String),

  /// `start` called while the proxy is running
  #[error("proxy already started")]
  AlreadyStarted,

  /// `start` called after `stop`
  #[error("proxy stopped")]
  Stopped,
}

impl Error {
  /// Create a TLS error and log it
  pub fn tls_error(msg: impl Into<String>) -> Self {
    let error = Error::TlsError(msg.into());
    tracing::error!("TLS error: {}", error);
    error
  }

  /// Create a proxy error and log it
  pub fn proxy_error(msg: impl Into<String>) -> Self {
    let error = Error::ProxyError(msg.into());
    tracing::error!("proxy error: {}", error);
    error
  }

  /// Create an invalid request error and log it
  pub fn invalid_request(msg: impl Into<String>) -> Self {
    let error = Error::InvalidRequest(msg.into());
    tracing::error!("invalid request: {}", error);
    error
  }

  /// Create a connection error and log it
  pub fn connection_error(msg: impl Into<String>) -> Self {
    let error = Error::ConnectionError(msg.into());
    tracing::error!("connection error: {}", error);
    error
  }
}

impl From<io::Error> for Error {
  fn from(value: io::Error) -> Self {
    Error::Io(value)
  }
}

impl From<http::Error> for Error {
  fn from(value: http::Error) -> Self {
    Error::HttpError(value)
  }
}

impl From<tapwire::Error> for Error {
  fn from(value: tapwire::Error) -> Self {
    Error::ClientError(value)
  }
}
