#![deny(missing_docs)]

//! # tapwire
//!
//! The `tapwire` crate provides a convenient, low-level HTTP/1.1
//! [`Client`].
//!
//! It is the upstream half of the `tapwire-mitm` intercepting proxy: it
//! issues exactly one request per connection, forwards headers verbatim
//! (hop-by-hop headers included) and performs no body decoding, so the
//! bytes an origin sends are the bytes the caller sees.
//!
//! - TLS to `https` origins via rustls, verified against the platform's
//!   native roots (extra roots can be added for test origins)
//! - Response metadata (version, status, reason phrase, headers) kept
//!   separate from the opaque body bytes
//! - No redirect handling, no cookie store, no caching
//!
//! ## Making a GET request
//!
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let resp = tapwire::Client::new()
//!   .get("http://httpbin.org/get")
//!   .send()
//!   .await?;
//! println!("body = {}", resp.text());
//! # Ok(())
//! # }
//! ```
//!
//! **NOTE**: If you plan to perform multiple requests, it is best to create
//! a [`Client`] and reuse it.

mod body;
mod client;
mod connector;
mod errors;
mod request;
mod response;
mod socket;
/// TLS material handling
pub mod tls;

pub use body::{Body, Framing};
pub use client::{Client, ClientBuilder};
pub use connector::{Connector, ConnectorBuilder};
pub use errors::{Error, Result};
pub use http::header;
pub use http::uri;
pub use http::Method;
pub use http::{StatusCode, Version};
pub use request::{Request, RequestBuilder};
pub use response::{Response, ResponseBuilder, ResponseConfig};
pub use socket::{MaybeTlsStream, Socket};
pub use tls::Certificate;

pub(crate) const CR_LF: &[u8] = &[13, 10];
pub(crate) const SPACE: &[u8] = &[32];
pub(crate) const COLON_SPACE: &[u8] = &[58, 32];
