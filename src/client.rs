use crate::connector::{Connector, ConnectorBuilder};
use crate::response::{ResponseBuilder, ResponseConfig};
use crate::tls::Certificate;
use crate::{Request, RequestBuilder, Response};
use http::Method;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;

/// A `Client` to make requests with.
///
/// The client writes the serialized request on a fresh socket and parses
/// exactly one response off it. There is no redirect handling, no cookie
/// store and no content decoding; what the origin sends is what the caller
/// gets. To configure a `Client`, use `Client::builder()`.
///
/// # Examples
///
/// ```no_run
/// use tapwire::Client;
/// #
/// # async fn run() -> Result<(), tapwire::Error> {
/// let client = Client::new();
/// let resp = client.get("http://httpbin.org/").send().await?;
/// #   Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
  inner: Arc<ClientRef>,
}

struct ClientRef {
  connector: Connector,
  timeout: Option<Duration>,
}

impl Default for Client {
  fn default() -> Self {
    Self::new()
  }
}

impl Client {
  /// Constructs a new `Client`.
  ///
  /// # Panic
  ///
  /// This method panics if the TLS backend cannot be initialized. Use
  /// `Client::builder()` if you wish to handle the failure as an `Error`
  /// instead of panicking.
  pub fn new() -> Client {
    ClientBuilder::new().build().expect("Client::new()")
  }
  /// Creates a `ClientBuilder` to configure a `Client`.
  ///
  /// This is the same as `ClientBuilder::new()`.
  pub fn builder() -> ClientBuilder {
    ClientBuilder::new()
  }
  /// Convenience method to make a `GET` request to a URL.
  ///
  /// # Errors
  ///
  /// This method fails whenever the supplied `Uri` cannot be parsed.
  pub fn get<U>(&self, url: U) -> RequestBuilder
  where
    http::Uri: TryFrom<U>,
    <http::Uri as TryFrom<U>>::Error: Into<http::Error>,
  {
    self.request(Method::GET, url)
  }
  /// Convenience method to make a `POST` request to a URL.
  ///
  /// # Errors
  ///
  /// This method fails whenever the supplied `Uri` cannot be parsed.
  pub fn post<U>(&self, url: U) -> RequestBuilder
  where
    http::Uri: TryFrom<U>,
    <http::Uri as TryFrom<U>>::Error: Into<http::Error>,
  {
    self.request(Method::POST, url)
  }
  /// Convenience method to make a `HEAD` request to a URL.
  ///
  /// # Errors
  ///
  /// This method fails whenever the supplied `Uri` cannot be parsed.
  pub fn head<U>(&self, url: U) -> RequestBuilder
  where
    http::Uri: TryFrom<U>,
    <http::Uri as TryFrom<U>>::Error: Into<http::Error>,
  {
    self.request(Method::HEAD, url)
  }
  /// Start building a `Request` with the `Method` and `Uri`.
  ///
  /// Returns a `RequestBuilder`, which will allow setting headers and the
  /// request body before sending.
  ///
  /// # Errors
  ///
  /// This method fails whenever the supplied `Uri` cannot be parsed.
  pub fn request<U>(&self, method: Method, url: U) -> RequestBuilder
  where
    http::Uri: TryFrom<U>,
    <http::Uri as TryFrom<U>>::Error: Into<http::Error>,
  {
    RequestBuilder::new(
      self.clone(),
      http::request::Builder::new().method(method).uri(url),
    )
  }
  /// Executes a `Request`.
  ///
  /// A `Request` can be built manually with `Request::builder()` or obtained
  /// from a `RequestBuilder` with `RequestBuilder::build()`.
  ///
  /// # Errors
  ///
  /// This method fails if there was an error while connecting, sending the
  /// request, or reading the response.
  pub async fn execute(&self, request: Request) -> crate::Result<Response> {
    let mut socket = self.inner.connector.connect_with_uri(request.uri()).await?;
    let raw = request.to_raw();
    socket.write_all(&raw).await?;
    socket.flush().await?;
    let reader = BufReader::new(socket);
    let config = ResponseConfig::new(&request, self.inner.timeout);
    let mut response = ResponseBuilder::new(reader, config).build().await?;
    *response.uri_mut() = request.uri().clone();
    Ok(response)
  }
}

/// A `ClientBuilder` can be used to create a `Client` with custom
/// configuration.
#[derive(Clone)]
pub struct ClientBuilder {
  connector: ConnectorBuilder,
  timeout: Option<Duration>,
}

impl Default for ClientBuilder {
  fn default() -> Self {
    Self::new()
  }
}

impl ClientBuilder {
  /// Constructs a new `ClientBuilder`.
  ///
  /// This is the same as `Client::builder()`.
  pub fn new() -> ClientBuilder {
    ClientBuilder {
      connector: ConnectorBuilder::default(),
      timeout: Some(Duration::from_secs(30)),
    }
  }
  /// Set the per-read timeout used while consuming a response body.
  ///
  /// Default is 30 seconds; `None` disables it.
  pub fn timeout(mut self, timeout: Option<Duration>) -> ClientBuilder {
    self.timeout = timeout;
    self
  }
  /// Set a timeout for only the connect phase.
  pub fn connect_timeout(mut self, timeout: Option<Duration>) -> ClientBuilder {
    self.connector = self.connector.connect_timeout(timeout);
    self
  }
  /// Set that all sockets have `SO_NODELAY` set.
  pub fn nodelay(mut self, value: bool) -> ClientBuilder {
    self.connector = self.connector.nodelay(value);
    self
  }
  /// Sets `SO_KEEPALIVE` on the sockets the client opens.
  pub fn keepalive(mut self, value: bool) -> ClientBuilder {
    self.connector = self.connector.keepalive(value);
    self
  }
  /// Controls the use of certificate validation.
  ///
  /// # Warning
  ///
  /// Trusting invalid certificates introduces significant vulnerabilities;
  /// only disable verification against throwaway test origins.
  pub fn certs_verification(mut self, value: bool) -> ClientBuilder {
    self.connector = self.connector.certs_verification(value);
    self
  }
  /// Adds a certificate to the set of roots the client trusts, next to the
  /// platform's native roots.
  pub fn add_root_certificate(mut self, certificate: Certificate) -> ClientBuilder {
    self.connector = self.connector.add_certificate(certificate);
    self
  }
  /// Returns a `Client` that uses this `ClientBuilder` configuration.
  ///
  /// # Errors
  ///
  /// This method fails if the TLS backend cannot be initialized.
  pub fn build(self) -> crate::Result<Client> {
    let connector = self.connector.build()?;
    Ok(Client {
      inner: Arc::new(ClientRef {
        connector,
        timeout: self.timeout,
      }),
    })
  }
}
