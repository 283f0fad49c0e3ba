//! Intercepting HTTP/HTTPS proxy for browser-automation harnesses
//!
//! `tapwire-mitm` is an embeddable man-in-the-middle proxy: a browser under
//! automation is pointed at it, plain HTTP is forwarded, `CONNECT` tunnels
//! are established on demand, and with an [`Interceptor`] configured TLS is
//! terminated with a locally provisioned certificate so request and
//! response messages can be inspected and rewritten in flight.
//!
//! Rewriting is declarative: an interceptor bundles two [`Chain`]s (one per
//! direction), each an ordered list of [`Rule`]s addressing one message
//! [`Field`] with an [`Action`]. Upstream traffic is issued through the
//! [`tapwire`] client, which forwards headers verbatim and never decodes
//! bodies.
//!
//! # Example
//!
//! ```no_run
//! use tapwire_mitm::{Action, Chain, Field, Interceptor, Policy, Proxy, Rule};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!   let requests = Chain::new(Policy::Accept)
//!     .rule(Rule::new(Field::header("User-Agent"), Action::replace("tapwire")));
//!   let responses = Chain::new(Policy::Accept)
//!     .rule(Rule::new(Field::header("Server"), Action::Remove));
//!   let proxy = Proxy::builder()
//!     .port(8080)
//!     .tls_identity("certs/proxy.pem", "certs/proxy.key")
//!     .interceptor(Interceptor::new(requests, responses))
//!     .build()?;
//!   proxy.start()?;
//!   tokio::signal::ctrl_c().await?;
//!   proxy.stop()?;
//!   Ok(())
//! }
//! ```

mod connection;
mod error;
mod interceptor;
mod message;
mod proxy;
mod rule;
mod server;
mod tls;

pub use connection::{Connection, ConnectionRegistry};
pub use error::{Error, Result};
pub use interceptor::Interceptor;
pub use proxy::{Proxy, ProxyBuilder};
pub use rule::{
  Action, Chain, Field, FieldValue, Message, Policy, PredicateFn, Rule, TransformFn, Verdict,
};
pub use tls::TlsIdentity;
