//! client error
use std::io::ErrorKind;
use std::num::ParseIntError;
use thiserror::Error as ThisError;
/// A `Result` alias where the `Err` case is `tapwire::Error`.
pub type Result<T> = std::result::Result<T, Error>;
/// The errors that may occur when issuing a request.
#[derive(ThisError, Debug)]
pub enum Error {
  /// tls error
  #[error(transparent)]
  Tls(#[from] tokio_rustls::rustls::Error),
  /// io error
  #[error(transparent)]
  IO(#[from] std::io::Error),
  /// http::Error
  #[error(transparent)]
  Http(http::Error),
  /// ParseIntError
  #[error(transparent)]
  IntError(#[from] ParseIntError),
  /// unknown error
  #[error("{0}")]
  Other(String),
}

impl From<http::Error> for Error {
  fn from(value: http::Error) -> Self {
    Error::Http(value)
  }
}

impl From<http::header::InvalidHeaderValue> for Error {
  fn from(value: http::header::InvalidHeaderValue) -> Self {
    Error::Http(http::Error::from(value))
  }
}

impl From<http::uri::InvalidUri> for Error {
  fn from(value: http::uri::InvalidUri) -> Self {
    Error::Http(http::Error::from(value))
  }
}

pub(crate) fn new_io_error(error_kind: ErrorKind, msg: &str) -> Error {
  Error::IO(std::io::Error::new(error_kind, msg))
}

pub(crate) fn builder<E: Into<Box<dyn std::error::Error + Send + Sync>>>(e: E) -> Error {
  Error::Other(e.into().to_string())
}
