use std::fmt::Debug;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use crate::body::{Body, Framing};
use crate::errors::{new_io_error, Error, Result};
use crate::{Request, COLON_SPACE, CR_LF, SPACE};
use bytes::Bytes;
use http::{Method, Response as HttpResponse};

/// A Response to a submitted `Request`.
///
/// The status line's reason phrase is kept verbatim so that proxies relaying
/// the response can reproduce (or rewrite) it independently of the code.
#[derive(Debug, Default, Clone)]
pub struct Response {
  version: http::Version,
  uri: http::Uri,
  status_code: http::StatusCode,
  reason: Option<String>,
  headers: http::HeaderMap<http::HeaderValue>,
  body: Option<Body>,
}

impl PartialEq for Response {
  fn eq(&self, other: &Self) -> bool {
    self.version == other.version
      && self.status_code == other.status_code
      && self.headers == other.headers
      && self.body.eq(&other.body)
  }
}

impl<T> From<HttpResponse<T>> for Response
where
  T: Into<Body>,
{
  fn from(value: HttpResponse<T>) -> Self {
    let (parts, body) = value.into_parts();
    let body = body.into();
    Self {
      version: parts.version,
      uri: Default::default(),
      status_code: parts.status,
      reason: None,
      headers: parts.headers,
      body: if body.is_empty() { None } else { Some(body) },
    }
  }
}

impl Response {
  /// Serialize the response into HTTP/1.1 wire bytes.
  pub fn to_raw(&self) -> Bytes {
    let mut http_response = Vec::new();
    http_response.extend(format!("{:?}", self.version).as_bytes());
    http_response.extend(SPACE);
    http_response.extend(self.status_code.as_str().as_bytes());
    http_response.extend(SPACE);
    http_response.extend(self.reason().as_bytes());
    http_response.extend(CR_LF);
    for (k, v) in self.headers.iter() {
      http_response.extend(k.as_str().as_bytes());
      http_response.extend(COLON_SPACE);
      http_response.extend(v.as_bytes());
      http_response.extend(CR_LF);
    }
    http_response.extend(CR_LF);
    if let Some(b) = self.body() {
      if !b.is_empty() {
        http_response.extend(b.as_ref());
      }
    }
    Bytes::from(http_response)
  }
  /// An HTTP response builder
  ///
  /// This type can be used to construct an instance of `Response` through a
  /// builder-like pattern.
  pub fn builder() -> http::response::Builder {
    http::response::Builder::new()
  }
}

impl Response {
  /// Get the response body decoded as UTF-8 (lossy).
  pub fn text(&self) -> String {
    match self.body() {
      Some(b) => String::from_utf8_lossy(b.as_ref()).to_string(),
      None => String::new(),
    }
  }
  /// Get the `StatusCode` of this `Response`.
  #[inline]
  pub fn status_code(&self) -> http::StatusCode {
    self.status_code
  }
  /// Get a mutable reference to the `StatusCode`.
  #[inline]
  pub fn status_code_mut(&mut self) -> &mut http::StatusCode {
    &mut self.status_code
  }
  /// Get the reason phrase from the status line.
  ///
  /// Falls back to the canonical reason of the status code when the origin
  /// sent none.
  pub fn reason(&self) -> &str {
    match &self.reason {
      Some(reason) => reason.as_str(),
      None => self.status_code.canonical_reason().unwrap_or(""),
    }
  }
  /// Get a mutable reference to the stored reason phrase.
  ///
  /// `None` means "use the canonical reason of the current status code".
  #[inline]
  pub fn reason_mut(&mut self) -> &mut Option<String> {
    &mut self.reason
  }
  /// Get the HTTP `Version` of this `Response`.
  #[inline]
  pub fn version(&self) -> http::Version {
    self.version
  }
  /// Get a mutable reference to the HTTP `Version`.
  #[inline]
  pub fn version_mut(&mut self) -> &mut http::Version {
    &mut self.version
  }
  /// Get the `Headers` of this `Response`.
  #[inline]
  pub fn headers(&self) -> &http::HeaderMap {
    &self.headers
  }
  /// Get a mutable reference to the `Headers` of this `Response`.
  #[inline]
  pub fn headers_mut(&mut self) -> &mut http::HeaderMap {
    &mut self.headers
  }
  /// Get the content-length of the response, if it is known.
  pub fn content_length(&self) -> Option<u64> {
    self
      .headers
      .get(http::header::CONTENT_LENGTH)
      .and_then(|x| x.to_str().ok()?.parse().ok())
  }
  /// Get the final `http::Uri` of this `Response`.
  #[inline]
  pub fn uri(&self) -> &http::Uri {
    &self.uri
  }
  #[inline]
  pub(crate) fn uri_mut(&mut self) -> &mut http::Uri {
    &mut self.uri
  }
  /// Get the full response body, if any.
  pub fn body(&self) -> Option<&Body> {
    self.body.as_ref()
  }
  /// Get a mutable reference to the body.
  pub fn body_mut(&mut self) -> &mut Option<Body> {
    &mut self.body
  }
}

/// A builder that parses a `Response` off a byte stream.
#[derive(Debug)]
pub struct ResponseBuilder<T: AsyncRead + AsyncReadExt> {
  builder: http::response::Builder,
  reader: BufReader<T>,
  config: ResponseConfig,
}

/// response config
#[derive(Debug, Default)]
pub struct ResponseConfig {
  method: Method,
  timeout: Option<Duration>,
}

impl ResponseConfig {
  /// new a response config
  pub fn new(request: &Request, timeout: Option<Duration>) -> Self {
    ResponseConfig {
      method: request.method().clone(),
      timeout,
    }
  }
}

impl<T: AsyncRead + Unpin + Sized> ResponseBuilder<T> {
  /// Constructs a new response builder over a buffered reader.
  pub fn new(reader: BufReader<T>, config: ResponseConfig) -> ResponseBuilder<T> {
    ResponseBuilder {
      builder: Default::default(),
      reader,
      config,
    }
  }
  /// Read one line, bounded by the configured timeout so a silent origin
  /// cannot park the caller forever.
  async fn read_line(&mut self, buf: &mut Vec<u8>) -> Result<usize> {
    let length = match self.config.timeout {
      None => self.reader.read_until(b'\n', buf).await?,
      Some(t) => tokio::time::timeout(t, self.reader.read_until(b'\n', buf))
        .await
        .map_err(|_| new_io_error(std::io::ErrorKind::TimedOut, "timed out reading response"))??,
    };
    Ok(length)
  }
  async fn parse_status_line(
    &mut self,
  ) -> Result<(http::Version, http::StatusCode, Option<String>)> {
    let mut line = Vec::new();
    let length = self.read_line(&mut line).await?;
    if length == 0 {
      return Err(new_io_error(
        std::io::ErrorKind::UnexpectedEof,
        "connection closed before status line",
      ));
    }
    let line = line.strip_suffix(CR_LF).unwrap_or(&line);
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let mut parts = line.splitn(3, |b| b == &b' ');
    let version = match parts.next() {
      Some(b"HTTP/0.9") => http::Version::HTTP_09,
      Some(b"HTTP/1.0") => http::Version::HTTP_10,
      Some(b"HTTP/1.1") => http::Version::HTTP_11,
      Some(b"HTTP/2.0") => http::Version::HTTP_2,
      Some(b"HTTP/3.0") => http::Version::HTTP_3,
      _ => {
        return Err(new_io_error(
          std::io::ErrorKind::InvalidData,
          "invalid http version",
        ));
      }
    };
    let status_code = match parts.next() {
      Some(vc) if !vc.is_empty() => {
        http::StatusCode::try_from(vc).map_err(|x| Error::Http(http::Error::from(x)))?
      }
      _ => {
        return Err(new_io_error(
          std::io::ErrorKind::InvalidData,
          "invalid http status code",
        ));
      }
    };
    let reason = parts
      .next()
      .filter(|r| !r.is_empty())
      .map(|r| String::from_utf8_lossy(r).trim_end().to_string());
    Ok((version, status_code, reason))
  }
  async fn read_headers(&mut self) -> http::HeaderMap {
    let mut headers = http::HeaderMap::new();
    let mut header_line = Vec::new();
    while let Ok(length) = self.read_line(&mut header_line).await {
      if length == 0 || header_line == b"\r\n" || header_line == b"\n" {
        break;
      }
      if let Ok((Some(k), Some(v))) = parse_header_line(&header_line) {
        headers.append(k, v);
      };
      header_line.clear();
    }
    headers
  }
  async fn read_body(&mut self, header: &http::HeaderMap) -> Result<(Vec<u8>, Framing)> {
    let mut body = Vec::new();
    if matches!(self.config.method, Method::HEAD) {
      return Ok((body, Framing::ContentLength));
    }
    if let Some(te) = header.get(http::header::TRANSFER_ENCODING) {
      if te.as_bytes().eq_ignore_ascii_case(b"chunked") {
        return Ok((self.read_chunked_body().await?, Framing::Chunked));
      }
    }
    let content_length: Option<u64> = header
      .get(http::header::CONTENT_LENGTH)
      .and_then(|x| x.to_str().ok()?.parse().ok());
    if content_length == Some(0) {
      return Ok((body, Framing::ContentLength));
    }
    let mut buffer = vec![0; 8192];
    let mut total_bytes_read = 0;
    let timeout = self.config.timeout;
    loop {
      let size = if let Some(to) = timeout {
        match tokio::time::timeout(to, self.reader.read(&mut buffer)).await {
          Ok(size) => size,
          Err(_) => break,
        }
      } else {
        self.reader.read(&mut buffer).await
      };
      match size {
        Ok(0) => break,
        Ok(n) => {
          body.extend_from_slice(&buffer[..n]);
          total_bytes_read += n;
        }
        Err(_err) => break,
      }
      if let Some(limit) = content_length {
        if total_bytes_read as u64 >= limit {
          break;
        }
      }
    }
    let framing = if content_length.is_some() {
      Framing::ContentLength
    } else {
      Framing::Close
    };
    Ok((body, framing))
  }

  async fn read_chunked_body(&mut self) -> Result<Vec<u8>> {
    let mut body: Vec<u8> = Vec::new();
    loop {
      let mut size_line = Vec::new();
      let length = self.reader.read_until(b'\n', &mut size_line).await?;
      if length == 0 {
        break;
      }
      let size_line = String::from_utf8_lossy(&size_line);
      let size_line = size_line.trim();
      // chunk extensions after ';' are ignored
      let size = size_line.split(';').next().unwrap_or_default();
      if size.is_empty() {
        continue;
      }
      let size = usize::from_str_radix(size, 16)?;
      if size == 0 {
        // trailer section up to the final empty line
        let mut trailer = Vec::new();
        while let Ok(n) = self.reader.read_until(b'\n', &mut trailer).await {
          if n == 0 || trailer == b"\r\n" || trailer == b"\n" {
            break;
          }
          trailer.clear();
        }
        break;
      }
      let mut chunk = vec![0; size];
      self.reader.read_exact(&mut chunk).await?;
      body.append(&mut chunk);
      let mut crlf = Vec::new();
      self.reader.read_until(b'\n', &mut crlf).await?;
    }
    Ok(body)
  }

  /// Build a `Response` by reading it off the stream.
  pub async fn build(mut self) -> Result<Response> {
    let (version, status_code, reason) = self.parse_status_line().await?;
    self.builder = self.builder.version(version).status(status_code);
    let header = self.read_headers().await;
    let (body, framing) = self.read_body(&header).await?;
    if let Some(h) = self.builder.headers_mut() {
      *h = header;
    }
    let resp = self.builder.body(body)?;
    let mut resp: Response = resp.into();
    *resp.reason_mut() = reason;
    if let Some(b) = resp.body_mut() {
      b.mark_framing(framing);
    }
    Ok(resp)
  }
}

pub(crate) fn parse_header_line(
  buffer: &[u8],
) -> Result<(Option<http::HeaderName>, Option<http::HeaderValue>)> {
  let mut k = None;
  let mut v = None;
  let buffer = buffer.strip_suffix(CR_LF).unwrap_or(buffer);
  let buffer = buffer.strip_suffix(b"\n").unwrap_or(buffer);
  for (index, h) in buffer.splitn(2, |s| s == &b':').enumerate() {
    let h = h.strip_prefix(SPACE).unwrap_or(h);
    match index {
      0 => match http::HeaderName::from_bytes(h) {
        Ok(hk) => k = Some(hk),
        Err(err) => {
          return Err(Error::Http(http::Error::from(err)));
        }
      },
      1 => match http::HeaderValue::from_bytes(h) {
        Ok(hv) => v = Some(hv),
        Err(err) => {
          return Err(Error::Http(http::Error::from(err)));
        }
      },
      _ => {}
    }
  }
  Ok((k, v))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Cursor;

  fn config() -> ResponseConfig {
    ResponseConfig::new(&Request::default(), None)
  }

  #[tokio::test]
  async fn parses_content_length_body() {
    let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
    let reader = BufReader::new(Cursor::new(raw.to_vec()));
    let resp = ResponseBuilder::new(reader, config()).build().await.unwrap();
    assert_eq!(resp.status_code(), http::StatusCode::OK);
    assert_eq!(resp.version(), http::Version::HTTP_11);
    assert_eq!(resp.reason(), "OK");
    assert_eq!(resp.text(), "hello");
  }

  #[tokio::test]
  async fn parses_chunked_body() {
    let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
    let reader = BufReader::new(Cursor::new(raw.to_vec()));
    let resp = ResponseBuilder::new(reader, config()).build().await.unwrap();
    assert_eq!(resp.text(), "hello world");
    assert_eq!(resp.body().unwrap().framing(), Framing::Chunked);
  }

  #[tokio::test]
  async fn close_delimited_body_is_marked() {
    let raw = b"HTTP/1.1 200 OK\r\n\r\nuntil eof";
    let reader = BufReader::new(Cursor::new(raw.to_vec()));
    let resp = ResponseBuilder::new(reader, config()).build().await.unwrap();
    assert_eq!(resp.text(), "until eof");
    assert_eq!(resp.body().unwrap().framing(), Framing::Close);
  }

  #[tokio::test]
  async fn keeps_custom_reason_phrase() {
    let raw = b"HTTP/1.1 503 Be Right Back\r\nContent-Length: 0\r\n\r\n";
    let reader = BufReader::new(Cursor::new(raw.to_vec()));
    let resp = ResponseBuilder::new(reader, config()).build().await.unwrap();
    assert_eq!(resp.reason(), "Be Right Back");
    let raw = resp.to_raw();
    assert!(String::from_utf8_lossy(&raw).starts_with("HTTP/1.1 503 Be Right Back\r\n"));
  }

  #[tokio::test]
  async fn rejects_garbage_status_line() {
    let raw = b"NOT-HTTP\r\n\r\n";
    let reader = BufReader::new(Cursor::new(raw.to_vec()));
    let result = ResponseBuilder::new(reader, config()).build().await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn repeated_headers_are_appended() {
    let raw = b"HTTP/1.1 200 OK\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\nContent-Length: 0\r\n\r\n";
    let reader = BufReader::new(Cursor::new(raw.to_vec()));
    let resp = ResponseBuilder::new(reader, config()).build().await.unwrap();
    let cookies: Vec<_> = resp.headers().get_all(http::header::SET_COOKIE).iter().collect();
    assert_eq!(cookies.len(), 2);
  }
}
