//! A proxy that stamps outgoing requests and scrubs the `Server` header.
//!
//! Point a browser at `http://127.0.0.1:8080` (and install the mediation
//! certificate if you want HTTPS rewritten too):
//!
//! ```text
//! cargo run --example rewrite_proxy
//! ```

use tapwire_mitm::{Action, Chain, Field, Interceptor, Policy, Proxy, Rule};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  tracing_subscriber::fmt::init();

  let requests = Chain::new(Policy::Accept)
    .rule(Rule::new(Field::header("X-Harness"), Action::replace("tapwire")))
    .rule(Rule::new(Field::Uri, Action::Log));
  let responses = Chain::new(Policy::Accept)
    .rule(Rule::new(Field::header("Server"), Action::Remove));

  let proxy = Proxy::builder()
    .port(8080)
    .interceptor(Interceptor::new(requests, responses))
    .build()?;
  let addr = proxy.start()?;
  println!("intercepting proxy listening on {addr}, ctrl-c to stop");
  tokio::signal::ctrl_c().await?;
  proxy.stop()?;
  Ok(())
}
