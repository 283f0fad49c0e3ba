//! Connection acceptance, HTTP dispatch and relaying
//!
//! One task per accepted connection. The task reads exactly one request,
//! then dispatches: `CONNECT` opens the upstream socket and enters tunnel
//! mode (raw byte copy, or TLS mediation plus interception when an
//! interceptor is configured); any other method forwards the request, raw
//! or through the interceptor.

use crate::connection::{Connection, ConnectionRegistry};
use crate::error::{Error, Result};
use crate::interceptor::Interceptor;
use crate::rule::Verdict;
use crate::tls::TlsIdentity;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method};
use std::net::SocketAddr;
use std::sync::Arc;
use tapwire::{Client, Framing, Request, Response};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};

const MAX_REQUEST_LINE: usize = 8 * 1024;
const MAX_HEADERS_SIZE: usize = 64 * 1024;
const TUNNEL_BUF_SIZE: usize = 8 * 1024;

/// Everything a connection task needs, shared behind one `Arc`.
pub(crate) struct ProxyCore {
  pub(crate) registry: ConnectionRegistry,
  pub(crate) interceptor: Option<Interceptor>,
  pub(crate) identity: Option<TlsIdentity>,
  pub(crate) client: Client,
}

/// Accept until the listen socket is closed. Accept errors are transient:
/// log and keep going.
pub(crate) async fn accept_loop(listener: TcpListener, core: Arc<ProxyCore>) {
  loop {
    match listener.accept().await {
      Ok((stream, peer_addr)) => {
        let core = core.clone();
        tokio::spawn(async move {
          if let Err(err) = handle_connection(stream, peer_addr, core).await {
            tracing::error!(peer = %peer_addr, %err, "connection handler failed");
          }
        });
      }
      Err(err) => {
        tracing::error!(%err, "failed to accept connection");
      }
    }
  }
}

async fn handle_connection(
  stream: TcpStream,
  peer_addr: SocketAddr,
  core: Arc<ProxyCore>,
) -> Result<()> {
  let mut reader = BufReader::new(stream);
  let head = match read_request_head(&mut reader).await? {
    Some(head) => head,
    None => {
      tracing::info!(peer = %peer_addr, "peer closed before sending a request");
      return Ok(());
    }
  };
  if head.method == Method::CONNECT {
    handle_connect(reader, head, core).await
  } else {
    handle_direct(reader, head, core).await
  }
}

/// `CONNECT host:port`: open the upstream socket, reply, tunnel.
async fn handle_connect(
  reader: BufReader<TcpStream>,
  head: RequestHead,
  core: Arc<ProxyCore>,
) -> Result<()> {
  let (host, port) = parse_host_port(&head.target)?;
  let mut client_stream = reader.into_inner();
  let upstream = match TcpStream::connect((host.as_str(), port)).await {
    Ok(upstream) => upstream,
    Err(err) => {
      tracing::error!(target = %head.target, %err, "upstream connect failed");
      client_stream
        .write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n")
        .await?;
      let _ = client_stream.shutdown().await;
      return Ok(());
    }
  };
  client_stream
    .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
    .await?;
  client_stream.flush().await?;
  let connection = Connection::new(host, port, client_stream, upstream);
  let key = connection.key();
  if core.interceptor.is_some() {
    let task_core = core.clone();
    run_registered(&core.registry, key, intercept_tunnel(connection, task_core)).await
  } else {
    run_registered(&core.registry, key, raw_tunnel(connection)).await
  }
}

/// Any other method: absolute-form target, forwarded raw or intercepted.
async fn handle_direct(
  mut reader: BufReader<TcpStream>,
  head: RequestHead,
  core: Arc<ProxyCore>,
) -> Result<()> {
  let body = read_message_body(&mut reader, &head.headers).await?;
  let request = build_direct_request(head, body)?;
  let (host, port) = host_port_from_uri(request.uri())?;
  let key = format!("{}:{}", host, port);
  let mut client_stream = reader.into_inner();
  if core.interceptor.is_some() {
    let task_core = core.clone();
    run_registered(&core.registry, key, async move {
      match forward_intercepted(request, &task_core).await? {
        Some(bytes) => {
          client_stream.write_all(&bytes).await?;
          client_stream.flush().await?;
        }
        None => {
          tracing::debug!("direct request dropped, closing without response");
        }
      }
      let _ = client_stream.shutdown().await;
      Ok(())
    })
    .await
  } else {
    let mut upstream = match TcpStream::connect((host.as_str(), port)).await {
      Ok(upstream) => upstream,
      Err(err) => {
        tracing::error!(%key, %err, "upstream connect failed");
        client_stream
          .write_all(b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 0\r\n\r\n")
          .await?;
        let _ = client_stream.shutdown().await;
        return Ok(());
      }
    };
    // replay the parsed request upstream, then splice the raw streams
    upstream.write_all(&request.to_raw()).await?;
    upstream.flush().await?;
    let connection = Connection::new(host, port, client_stream, upstream);
    run_registered(&core.registry, key, raw_tunnel(connection)).await
  }
}

/// Spawn `fut` as the relay task for `key`, tracked by the registry for the
/// lifetime of the connection.
async fn run_registered<F>(registry: &ConnectionRegistry, key: String, fut: F) -> Result<()>
where
  F: std::future::Future<Output = Result<()>> + Send + 'static,
{
  let task = tokio::spawn(fut);
  registry.connect(&key, task.abort_handle());
  let result = match task.await {
    Ok(result) => result,
    Err(err) if err.is_cancelled() => {
      tracing::debug!(%key, "connection closed by registry");
      Ok(())
    }
    Err(err) => Err(Error::connection_error(format!(
      "connection task failed: {err}"
    ))),
  };
  registry.disconnect(&key);
  result
}

/// Bidirectional byte copy with no framing. Each direction runs
/// independently; a closed or failed side shuts the peer down.
async fn raw_tunnel(connection: Connection) -> Result<()> {
  let key = connection.key();
  let (client, upstream) = connection.into_streams();
  let (client_read, client_write) = client.into_split();
  let (upstream_read, upstream_write) = upstream.into_split();
  let (sent, received) = tokio::join!(
    pump(client_read, upstream_write),
    pump(upstream_read, client_write),
  );
  tracing::debug!(%key, sent, received, "tunnel closed");
  Ok(())
}

async fn pump(mut read: OwnedReadHalf, mut write: OwnedWriteHalf) -> u64 {
  let mut buffer = vec![0u8; TUNNEL_BUF_SIZE];
  let mut total: u64 = 0;
  loop {
    match read.read(&mut buffer).await {
      Ok(0) => break,
      Ok(n) => {
        if write.write_all(&buffer[..n]).await.is_err() {
          break;
        }
        total += n as u64;
      }
      Err(_) => break,
    }
  }
  let _ = write.shutdown().await;
  total
}

/// Post-CONNECT interception: terminate client TLS with the configured
/// identity, then loop plaintext requests through the chains and the
/// upstream client until the tunnel closes or a chain drops.
async fn intercept_tunnel(connection: Connection, core: Arc<ProxyCore>) -> Result<()> {
  let identity = core
    .identity
    .as_ref()
    .ok_or_else(|| Error::tls_error("https interception requires a TLS certificate and key"))?;
  let host = connection.host().to_string();
  let port = connection.port();
  let (client_stream, upstream) = connection.into_streams();
  // reachability was probed at CONNECT time; the upstream TLS connection is
  // opened per request by the client
  drop(upstream);
  let tls_stream = identity.accept(client_stream).await?;
  let mut reader = BufReader::new(tls_stream);
  loop {
    let head = match read_request_head(&mut reader).await {
      Ok(Some(head)) => head,
      Ok(None) => {
        tracing::info!(%host, "client closed tunnel");
        break;
      }
      // an abrupt TCP close without close_notify is still a peer close
      Err(Error::Io(ref err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
        tracing::info!(%host, "client closed tunnel");
        break;
      }
      Err(err) => return Err(err),
    };
    let body = read_message_body(&mut reader, &head.headers).await?;
    let request = build_tunnel_request(head, body, &host, port)?;
    match forward_intercepted(request, &core).await? {
      Some(bytes) => {
        let stream = reader.get_mut();
        stream.write_all(&bytes).await?;
        stream.flush().await?;
      }
      None => break,
    }
  }
  Ok(())
}

/// Run the request chain, forward upstream, run the response chain.
///
/// Returns the serialized response to relay, or `None` when a chain dropped
/// the message and the connection should close without a response.
async fn forward_intercepted(mut request: Request, core: &ProxyCore) -> Result<Option<Bytes>> {
  let interceptor = core
    .interceptor
    .as_ref()
    .ok_or_else(|| Error::proxy_error("no interceptor configured"))?;
  if interceptor.run_request(&mut request) == Verdict::Drop {
    tracing::debug!(uri = %request.uri(), "request dropped by chain");
    return Ok(None);
  }
  let mut response = match core.client.execute(request).await {
    Ok(response) => response,
    Err(err) => {
      tracing::error!(%err, "upstream request failed");
      return Ok(Some(Bytes::from_static(
        b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 0\r\n\r\n",
      )));
    }
  };
  if interceptor.run_response(&mut response) == Verdict::Drop {
    return Ok(None);
  }
  normalize_relay_framing(&mut response);
  Ok(Some(response.to_raw()))
}

/// The upstream body was fully buffered (and possibly rewritten), so the
/// relayed response is always `Content-Length`-framed.
fn normalize_relay_framing(response: &mut Response) {
  if let Some(body) = response.body() {
    if body.framing() != Framing::ContentLength {
      tracing::debug!(
        len = body.len(),
        framing = ?body.framing(),
        "re-framing body with content-length"
      );
    }
  }
  response
    .headers_mut()
    .remove(http::header::TRANSFER_ENCODING);
  match response.body().map(|b| b.len()) {
    Some(len) => {
      response
        .headers_mut()
        .insert(http::header::CONTENT_LENGTH, HeaderValue::from(len));
    }
    None => {
      if response
        .headers()
        .contains_key(http::header::CONTENT_LENGTH)
      {
        response
          .headers_mut()
          .insert(http::header::CONTENT_LENGTH, HeaderValue::from(0usize));
      }
    }
  }
}

pub(crate) struct RequestHead {
  pub(crate) method: Method,
  pub(crate) target: String,
  pub(crate) version: http::Version,
  pub(crate) headers: HeaderMap,
}

/// Read one request line plus headers. `Ok(None)` means the peer closed
/// before sending anything, which is not an error.
pub(crate) async fn read_request_head<R>(
  reader: &mut BufReader<R>,
) -> Result<Option<RequestHead>>
where
  R: AsyncRead + Unpin,
{
  let mut request_line = Vec::new();
  let length = reader.read_until(b'\n', &mut request_line).await?;
  if length == 0 {
    return Ok(None);
  }
  if request_line.len() > MAX_REQUEST_LINE {
    return Err(Error::invalid_request("request line too long"));
  }
  let line = String::from_utf8_lossy(&request_line);
  let mut parts = line.split_whitespace();
  let (method, target, version) = match (parts.next(), parts.next(), parts.next()) {
    (Some(method), Some(target), Some(version)) => (method, target, version),
    _ => return Err(Error::invalid_request(format!("invalid request line: {}", line.trim_end()))),
  };
  let method = Method::from_bytes(method.as_bytes())
    .map_err(|_| Error::invalid_request(format!("invalid method: {method}")))?;
  let version = parse_request_version(version)?;
  let target = target.to_string();
  let headers = read_headers(reader).await?;
  Ok(Some(RequestHead {
    method,
    target,
    version,
    headers,
  }))
}

fn parse_request_version(version: &str) -> Result<http::Version> {
  match version {
    "HTTP/0.9" => Ok(http::Version::HTTP_09),
    "HTTP/1.0" => Ok(http::Version::HTTP_10),
    "HTTP/1.1" => Ok(http::Version::HTTP_11),
    other => Err(Error::invalid_request(format!(
      "unsupported http version: {other}"
    ))),
  }
}

/// Header values are kept verbatim; in particular `Date` is opaque, some
/// origins emit values that do not parse as RFC 822 dates.
async fn read_headers<R>(reader: &mut BufReader<R>) -> Result<HeaderMap>
where
  R: AsyncRead + Unpin,
{
  let mut headers = HeaderMap::new();
  let mut headers_acc = 0usize;
  let mut header_line = Vec::new();
  loop {
    let length = reader.read_until(b'\n', &mut header_line).await?;
    if length == 0 || header_line == b"\r\n" || header_line == b"\n" {
      break;
    }
    headers_acc += length;
    if headers_acc > MAX_HEADERS_SIZE {
      return Err(Error::invalid_request("headers size exceeds maximum allowed"));
    }
    let stripped = header_line
      .strip_suffix(b"\r\n")
      .or_else(|| header_line.strip_suffix(b"\n"))
      .unwrap_or(&header_line);
    if let Some(idx) = stripped.iter().position(|b| *b == b':') {
      let (name, value) = stripped.split_at(idx);
      let value = value[1..].strip_prefix(b" ").unwrap_or(&value[1..]);
      match (
        http::HeaderName::from_bytes(name),
        http::HeaderValue::from_bytes(value),
      ) {
        (Ok(name), Ok(value)) => {
          headers.append(name, value);
        }
        _ => {
          return Err(Error::invalid_request(format!(
            "malformed header line: {}",
            String::from_utf8_lossy(stripped)
          )));
        }
      }
    }
    header_line.clear();
  }
  Ok(headers)
}

/// Read a body sized by `Content-Length` or `Transfer-Encoding: chunked`;
/// absent both, the request carries no body.
pub(crate) async fn read_message_body<R>(
  reader: &mut BufReader<R>,
  headers: &HeaderMap,
) -> Result<Bytes>
where
  R: AsyncRead + Unpin,
{
  if let Some(te) = headers.get(http::header::TRANSFER_ENCODING) {
    let chunked = te
      .to_str()
      .map(|value| value.to_ascii_lowercase().contains("chunked"))
      .unwrap_or(false);
    if chunked {
      return read_chunked_body(reader).await;
    }
  }
  let content_length: usize = headers
    .get(http::header::CONTENT_LENGTH)
    .and_then(|value| value.to_str().ok()?.parse().ok())
    .unwrap_or(0);
  if content_length == 0 {
    return Ok(Bytes::new());
  }
  let mut body = vec![0u8; content_length];
  reader.read_exact(&mut body).await?;
  Ok(Bytes::from(body))
}

async fn read_chunked_body<R>(reader: &mut BufReader<R>) -> Result<Bytes>
where
  R: AsyncRead + Unpin,
{
  let mut body = Vec::new();
  loop {
    let mut size_line = Vec::new();
    let length = reader.read_until(b'\n', &mut size_line).await?;
    if length == 0 {
      break;
    }
    let size_line = String::from_utf8_lossy(&size_line);
    let size_line = size_line.trim();
    let size = size_line.split(';').next().unwrap_or_default();
    if size.is_empty() {
      continue;
    }
    let size = usize::from_str_radix(size, 16)
      .map_err(|_| Error::invalid_request(format!("invalid chunk size: {size}")))?;
    if size == 0 {
      let mut trailer = Vec::new();
      while let Ok(n) = reader.read_until(b'\n', &mut trailer).await {
        if n == 0 || trailer == b"\r\n" || trailer == b"\n" {
          break;
        }
        trailer.clear();
      }
      break;
    }
    let mut chunk = vec![0u8; size];
    reader.read_exact(&mut chunk).await?;
    body.append(&mut chunk);
    let mut crlf = Vec::new();
    reader.read_until(b'\n', &mut crlf).await?;
  }
  Ok(Bytes::from(body))
}

/// Build the upstream request for the plain-HTTP path. Absolute-form
/// targets are used as-is; origin-form targets are resolved against the
/// `Host` header.
fn build_direct_request(head: RequestHead, body: Bytes) -> Result<Request> {
  let uri: http::Uri = if head.target.starts_with("http://") || head.target.starts_with("https://")
  {
    head
      .target
      .parse()
      .map_err(|err| Error::invalid_request(format!("invalid request target: {err}")))?
  } else {
    let host = head
      .headers
      .get(http::header::HOST)
      .and_then(|value| value.to_str().ok())
      .ok_or_else(|| Error::invalid_request("relative target without Host header"))?;
    format!("http://{}{}", host, head.target)
      .parse()
      .map_err(|err| Error::invalid_request(format!("invalid request target: {err}")))?
  };
  assemble_request(head, uri, body)
}

/// Build the upstream request for one plaintext message read inside a
/// mediated tunnel: the target is resolved against the CONNECT authority
/// and the scheme is always `https`.
fn build_tunnel_request(head: RequestHead, body: Bytes, host: &str, port: u16) -> Result<Request> {
  let uri: http::Uri = if head.target.starts_with("http://") || head.target.starts_with("https://")
  {
    head
      .target
      .parse()
      .map_err(|err| Error::invalid_request(format!("invalid request target: {err}")))?
  } else {
    format!("https://{}:{}{}", host, port, head.target)
      .parse()
      .map_err(|err| Error::invalid_request(format!("invalid request target: {err}")))?
  };
  assemble_request(head, uri, body)
}

fn assemble_request(head: RequestHead, uri: http::Uri, body: Bytes) -> Result<Request> {
  let http_request = http::Request::builder()
    .method(head.method)
    .uri(uri)
    .version(head.version)
    .body(body.to_vec())?;
  let mut request: Request = http_request.into();
  *request.headers_mut() = head.headers;
  // the body was de-chunked while reading; keep the framing headers honest
  request
    .headers_mut()
    .remove(http::header::TRANSFER_ENCODING);
  match request.body().map(|b| b.len()) {
    Some(len) => {
      request
        .headers_mut()
        .insert(http::header::CONTENT_LENGTH, HeaderValue::from(len));
    }
    None => {
      request.headers_mut().remove(http::header::CONTENT_LENGTH);
    }
  }
  Ok(request)
}

/// Parse the authority-form `host:port` target of a CONNECT request.
fn parse_host_port(target: &str) -> Result<(String, u16)> {
  let (host, port) = target
    .rsplit_once(':')
    .ok_or_else(|| Error::invalid_request(format!("invalid CONNECT target: {target}")))?;
  if host.is_empty() {
    return Err(Error::invalid_request(format!(
      "invalid CONNECT target: {target}"
    )));
  }
  let port: u16 = port
    .parse()
    .map_err(|_| Error::invalid_request(format!("invalid port: {port}")))?;
  let host = host.trim_matches(|c| c == '[' || c == ']').to_string();
  Ok((host, port))
}

/// Derive host and port from an absolute URI; the port comes from the URI's
/// port component or the scheme default, never from the path.
fn host_port_from_uri(uri: &http::Uri) -> Result<(String, u16)> {
  let host = uri
    .host()
    .ok_or_else(|| Error::invalid_request(format!("no host in uri: {uri}")))?;
  let port = uri.port_u16().unwrap_or_else(|| {
    if uri.scheme() == Some(&http::uri::Scheme::HTTPS) {
      443
    } else {
      80
    }
  });
  Ok((host.to_string(), port))
}
