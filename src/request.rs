use std::fmt::{Debug, Formatter};

use http::Request as HttpRequest;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Version};

use crate::body::Body;
use crate::{Client, Response, COLON_SPACE, CR_LF, SPACE};

/// A request which can be executed with `Client::execute()`.
#[derive(Default, Clone)]
pub struct Request {
  uri: http::Uri,
  version: Version,
  method: Method,
  headers: HeaderMap<HeaderValue>,
  body: Option<Body>,
}

impl Debug for Request {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Request")
      .field("uri", &self.uri)
      .field("version", &self.version)
      .field("method", &self.method)
      .field("headers", &self.headers)
      .field("body", &self.body)
      .finish()
  }
}

impl<T> From<HttpRequest<T>> for Request
where
  T: Into<Body>,
{
  fn from(value: HttpRequest<T>) -> Self {
    let (parts, body) = value.into_parts();
    let body = body.into();
    Self {
      uri: parts.uri,
      version: parts.version,
      method: parts.method,
      headers: parts.headers,
      body: if body.is_empty() { None } else { Some(body) },
    }
  }
}

impl Request {
  /// Serialize the request into HTTP/1.1 wire bytes (origin-form target).
  ///
  /// A `Host` header is added from the URI authority when absent, and a
  /// `Content-Length` header when a body is present without one.
  pub fn to_raw(&self) -> bytes::Bytes {
    let mut http_request = Vec::new();
    http_request.extend(self.method.as_str().as_bytes());
    http_request.extend(SPACE);
    http_request.extend(self.uri.path().as_bytes());
    if let Some(q) = self.uri.query() {
      http_request.extend(b"?");
      http_request.extend(q.as_bytes());
    }
    http_request.extend(SPACE);
    http_request.extend(format!("{:?}", self.version).as_bytes());
    http_request.extend(CR_LF);
    if self.headers.get(http::header::HOST).is_none() {
      http_request.extend(http::header::HOST.as_str().as_bytes());
      http_request.extend(COLON_SPACE);
      http_request.extend(if let Some(s) = self.uri.authority() {
        s.as_str().as_bytes()
      } else {
        &[]
      });
      http_request.extend(CR_LF);
    }
    let mut headers = self.headers.clone();
    if let Some(b) = self.body() {
      if !b.is_empty() {
        headers
          .entry(http::header::CONTENT_LENGTH)
          .or_insert(HeaderValue::from(b.len()));
      }
    }
    for (k, v) in headers.iter() {
      http_request.extend(k.as_str().as_bytes());
      http_request.extend(COLON_SPACE);
      http_request.extend(v.as_bytes());
      http_request.extend(CR_LF);
    }
    http_request.extend(CR_LF);
    if let Some(b) = self.body() {
      if !b.is_empty() {
        http_request.extend(b.as_ref());
      }
    }
    bytes::Bytes::from(http_request)
  }
  /// Creates a new builder-style object to manufacture a `Request`
  pub fn builder() -> http::request::Builder {
    http::request::Builder::new()
  }
}

impl Request {
  /// Get the HTTP method of this request.
  #[inline]
  pub fn method(&self) -> &Method {
    &self.method
  }
  /// Get a mutable reference to the HTTP method.
  #[inline]
  pub fn method_mut(&mut self) -> &mut Method {
    &mut self.method
  }
  /// Get the URI of this request.
  #[inline]
  pub fn uri(&self) -> &http::Uri {
    &self.uri
  }
  /// Get a mutable reference to the URI.
  #[inline]
  pub fn uri_mut(&mut self) -> &mut http::Uri {
    &mut self.uri
  }
  /// Get the headers of this request.
  #[inline]
  pub fn headers(&self) -> &HeaderMap {
    &self.headers
  }
  /// Get a mutable reference to the headers.
  #[inline]
  pub fn headers_mut(&mut self) -> &mut HeaderMap {
    &mut self.headers
  }
  /// Get the body of this request, if any.
  #[inline]
  pub fn body(&self) -> Option<&Body> {
    self.body.as_ref()
  }
  /// Get a mutable reference to the body.
  #[inline]
  pub fn body_mut(&mut self) -> &mut Option<Body> {
    &mut self.body
  }
  /// Returns the associated version.
  #[inline]
  pub fn version(&self) -> Version {
    self.version
  }
  /// Returns a mutable reference to the associated version.
  #[inline]
  pub fn version_mut(&mut self) -> &mut Version {
    &mut self.version
  }
}

/// A builder to construct the properties of a `Request`.
///
/// To construct a `RequestBuilder`, refer to the `Client` documentation.
#[must_use = "RequestBuilder does nothing until you 'send' it"]
pub struct RequestBuilder {
  client: Client,
  builder: http::request::Builder,
  body: Body,
}

impl RequestBuilder {
  /// Constructs a new request.
  pub fn new(client: Client, builder: http::request::Builder) -> RequestBuilder {
    RequestBuilder {
      client,
      builder,
      body: Default::default(),
    }
  }
  /// Set `uri` to this Request.
  pub fn uri<U: Into<http::Uri>>(mut self, uri: U) -> RequestBuilder {
    self.builder = self.builder.uri(uri);
    self
  }
  /// Add a `Header` to this Request.
  pub fn header<K, V>(mut self, key: K, value: V) -> RequestBuilder
  where
    HeaderName: TryFrom<K>,
    HeaderValue: TryFrom<V>,
    <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
    <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
  {
    self.builder = self.builder.header(key, value);
    self
  }
  /// Add a set of Headers to the existing ones on this Request.
  ///
  /// The headers will be merged in to any already set.
  pub fn headers(mut self, headers: HeaderMap) -> RequestBuilder {
    if let Some(header) = self.builder.headers_mut() {
      for (key, value) in headers {
        if let Some(key) = key {
          header.insert(key, value);
        }
      }
    }
    self
  }
  /// Set the request body.
  pub fn body<T: Into<Body>>(mut self, body: T) -> RequestBuilder {
    self.body = body.into();
    self
  }
  /// Build a `Request`, which can be inspected, modified and executed with
  /// `Client::execute()`.
  pub fn build(self) -> crate::Result<Request> {
    let r: Request = self
      .builder
      .body(self.body)
      .map_err(http::Error::from)?
      .into();
    Ok(r)
  }
  /// Constructs the Request and sends it to the target URL, returning a
  /// future Response.
  ///
  /// # Errors
  ///
  /// This method fails if there was an error while sending the request or
  /// reading the response.
  pub async fn send(self) -> crate::Result<Response> {
    let req: Request = self
      .builder
      .body(self.body)
      .map_err(http::Error::from)?
      .into();
    self.client.execute(req).await
  }
}
