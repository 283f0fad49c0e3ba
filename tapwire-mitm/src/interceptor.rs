//! Paired request/response rewrite chains
//!
//! An [`Interceptor`] bundles the two [`Chain`]s the dispatcher runs per
//! message. It is immutable once built; the embedder assembles the chains
//! up front and hands the interceptor to [`crate::ProxyBuilder`].

use crate::rule::{Chain, Verdict};
use tapwire::{Request, Response};

/// A request chain and a response chain, applied per message in flight.
#[derive(Clone, Debug, Default)]
pub struct Interceptor {
  request_chain: Chain,
  response_chain: Chain,
}

impl Interceptor {
  /// Bundle a request chain and a response chain.
  pub fn new(request_chain: Chain, response_chain: Chain) -> Interceptor {
    Interceptor {
      request_chain,
      response_chain,
    }
  }

  /// An interceptor whose chains are empty and accept everything.
  ///
  /// Traffic still gets decrypted and re-encrypted, but flows through
  /// unmodified; useful to observe TLS traffic without rewriting it.
  pub fn passthrough() -> Interceptor {
    Interceptor::default()
  }

  /// The chain run against outgoing requests.
  pub fn request_chain(&self) -> &Chain {
    &self.request_chain
  }

  /// The chain run against incoming responses.
  pub fn response_chain(&self) -> &Chain {
    &self.response_chain
  }

  /// Run the request chain against `request`, rewriting it in place.
  pub fn run_request(&self, request: &mut Request) -> Verdict {
    let verdict = self.request_chain.evaluate(request);
    tracing::debug!(method = %request.method(), uri = %request.uri(), ?verdict, "request chain");
    verdict
  }

  /// Run the response chain against `response`, rewriting it in place.
  ///
  /// Never invoked for a message whose request chain returned
  /// [`Verdict::Drop`].
  pub fn run_response(&self, response: &mut Response) -> Verdict {
    let verdict = self.response_chain.evaluate(response);
    tracing::debug!(status = %response.status_code(), ?verdict, "response chain");
    verdict
  }
}
