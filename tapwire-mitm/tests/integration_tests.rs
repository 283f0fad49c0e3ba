//! End-to-end tests driving the proxy over real sockets.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tapwire_mitm::{Action, Chain, Field, FieldValue, Interceptor, Policy, Proxy, Rule};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const SHORT: Duration = Duration::from_secs(5);

/// A one-shot plain-HTTP origin: accepts connections, records each request
/// head, answers with `response` and closes.
async fn spawn_origin(response: &'static [u8]) -> (std::net::SocketAddr, Arc<Mutex<Vec<String>>>) {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  let seen = Arc::new(Mutex::new(Vec::new()));
  let record = seen.clone();
  tokio::spawn(async move {
    loop {
      let Ok((mut socket, _)) = listener.accept().await else {
        break;
      };
      let record = record.clone();
      tokio::spawn(async move {
        let head = read_head(&mut socket).await;
        record.lock().unwrap().push(head);
        let _ = socket.write_all(response).await;
        let _ = socket.shutdown().await;
      });
    }
  });
  (addr, seen)
}

/// Read from `socket` until the end of the header section.
async fn read_head(socket: &mut TcpStream) -> String {
  let mut buf = Vec::new();
  let mut tmp = [0u8; 1024];
  loop {
    let n = match timeout(SHORT, socket.read(&mut tmp)).await {
      Ok(Ok(0)) | Err(_) => break,
      Ok(Ok(n)) => n,
      Ok(Err(_)) => break,
    };
    buf.extend_from_slice(&tmp[..n]);
    if buf.windows(4).any(|w| w == b"\r\n\r\n") {
      break;
    }
  }
  String::from_utf8_lossy(&buf).to_string()
}

/// Send one proxy-style request and collect everything until the peer
/// closes.
async fn roundtrip(proxy: std::net::SocketAddr, request: String) -> Vec<u8> {
  let mut stream = TcpStream::connect(proxy).await.unwrap();
  stream.write_all(request.as_bytes()).await.unwrap();
  let mut response = Vec::new();
  let _ = timeout(SHORT, stream.read_to_end(&mut response)).await;
  response
}

/// Registration happens on the relay task, a beat after the CONNECT reply;
/// poll briefly instead of racing it.
async fn wait_for_connections(proxy: &Proxy, expected: usize) {
  for _ in 0..100 {
    if proxy.connection_count() == expected {
      return;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  assert_eq!(proxy.connection_count(), expected);
}

#[tokio::test]
async fn plain_get_passes_through_unchanged() {
  let (origin, _) = spawn_origin(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello").await;
  let proxy = Proxy::builder().port(0).build().unwrap();
  let addr = proxy.start().unwrap();

  let response = roundtrip(
    addr,
    format!("GET http://{origin}/hello HTTP/1.1\r\nHost: {origin}\r\n\r\n"),
  )
  .await;
  assert_eq!(
    response,
    b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello"
  );
  proxy.stop().unwrap();
}

#[tokio::test]
async fn request_chain_rewrites_header_before_upstream() {
  let (origin, seen) = spawn_origin(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").await;
  let requests =
    Chain::new(Policy::Accept).rule(Rule::new(Field::header("User-Agent"), Action::replace("X")));
  let proxy = Proxy::builder()
    .port(0)
    .interceptor(Interceptor::new(requests, Chain::default()))
    .build()
    .unwrap();
  let addr = proxy.start().unwrap();

  let response = roundtrip(
    addr,
    format!("GET http://{origin}/ HTTP/1.1\r\nHost: {origin}\r\nUser-Agent: Mozilla\r\n\r\n"),
  )
  .await;
  let response = String::from_utf8_lossy(&response).to_string();
  assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
  assert!(response.ends_with("ok"), "{response}");

  let seen = seen.lock().unwrap();
  assert_eq!(seen.len(), 1);
  assert!(seen[0].contains("user-agent: X\r\n"), "{}", seen[0]);
  assert!(!seen[0].contains("Mozilla"), "{}", seen[0]);
  proxy.stop().unwrap();
}

#[tokio::test]
async fn connect_tunnel_relays_raw_bytes() {
  // toy origin speaking a non-HTTP protocol through the tunnel
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let origin = listener.local_addr().unwrap();
  tokio::spawn(async move {
    if let Ok((mut socket, _)) = listener.accept().await {
      let mut buf = [0u8; 4];
      if socket.read_exact(&mut buf).await.is_ok() && &buf == b"ping" {
        let _ = socket.write_all(b"pong").await;
      }
    }
  });

  let proxy = Proxy::builder().port(0).build().unwrap();
  let addr = proxy.start().unwrap();

  let mut stream = TcpStream::connect(addr).await.unwrap();
  stream
    .write_all(format!("CONNECT {origin} HTTP/1.1\r\nHost: {origin}\r\n\r\n").as_bytes())
    .await
    .unwrap();
  let mut header = [0u8; 39];
  timeout(SHORT, stream.read_exact(&mut header))
    .await
    .unwrap()
    .unwrap();
  assert_eq!(&header[..], b"HTTP/1.1 200 Connection Established\r\n\r\n");
  wait_for_connections(&proxy, 1).await;

  stream.write_all(b"ping").await.unwrap();
  let mut reply = [0u8; 4];
  timeout(SHORT, stream.read_exact(&mut reply))
    .await
    .unwrap()
    .unwrap();
  assert_eq!(&reply, b"pong");
  proxy.stop().unwrap();
}

#[tokio::test]
async fn failed_connect_target_yields_502() {
  // reserve a port, then free it so nothing listens there
  let unused = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
  let dead = unused.local_addr().unwrap();
  drop(unused);

  let proxy = Proxy::builder().port(0).build().unwrap();
  let addr = proxy.start().unwrap();

  let response = roundtrip(
    addr,
    format!("CONNECT {dead} HTTP/1.1\r\nHost: {dead}\r\n\r\n"),
  )
  .await;
  assert!(
    String::from_utf8_lossy(&response).starts_with("HTTP/1.1 502 "),
    "{}",
    String::from_utf8_lossy(&response)
  );
  proxy.stop().unwrap();
}

#[tokio::test]
async fn response_chain_rewrites_status() {
  let (origin, _) = spawn_origin(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").await;
  let responses =
    Chain::new(Policy::Accept).rule(Rule::new(Field::Status, Action::replace(418u16)));
  let proxy = Proxy::builder()
    .port(0)
    .interceptor(Interceptor::new(Chain::default(), responses))
    .build()
    .unwrap();
  let addr = proxy.start().unwrap();

  let response = roundtrip(
    addr,
    format!("GET http://{origin}/ HTTP/1.1\r\nHost: {origin}\r\n\r\n"),
  )
  .await;
  assert!(
    String::from_utf8_lossy(&response).starts_with("HTTP/1.1 418 I'm a teapot\r\n"),
    "{}",
    String::from_utf8_lossy(&response)
  );
  proxy.stop().unwrap();
}

#[tokio::test]
async fn transparent_interceptor_preserves_response_bytes() {
  let (origin, _) = spawn_origin(
    b"HTTP/1.1 203 Non-Authoritative Information\r\nX-Custom: kept\r\nContent-Length: 11\r\n\r\nraw \x01 bytes",
  )
  .await;
  let proxy = Proxy::builder()
    .port(0)
    .interceptor(Interceptor::passthrough())
    .build()
    .unwrap();
  let addr = proxy.start().unwrap();

  let response = roundtrip(
    addr,
    format!("GET http://{origin}/ HTTP/1.1\r\nHost: {origin}\r\n\r\n"),
  )
  .await;
  let text = String::from_utf8_lossy(&response).to_string();
  assert!(
    text.starts_with("HTTP/1.1 203 Non-Authoritative Information\r\n"),
    "{text}"
  );
  assert!(text.contains("x-custom: kept\r\n"), "{text}");
  assert!(response.ends_with(b"raw \x01 bytes"), "{text}");
  proxy.stop().unwrap();
}

#[tokio::test]
async fn dropped_request_closes_without_response_and_skips_upstream() {
  let (origin, seen) = spawn_origin(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").await;
  let requests = Chain::new(Policy::Accept).rule(
    Rule::new(Field::Uri, Action::Drop).when(|v: &FieldValue| v.as_text().contains("/blocked")),
  );
  let proxy = Proxy::builder()
    .port(0)
    .interceptor(Interceptor::new(requests, Chain::default()))
    .build()
    .unwrap();
  let addr = proxy.start().unwrap();

  // one client hits the drop rule, a concurrent one does not
  let blocked = roundtrip(
    addr,
    format!("GET http://{origin}/blocked HTTP/1.1\r\nHost: {origin}\r\n\r\n"),
  );
  let allowed = roundtrip(
    addr,
    format!("GET http://{origin}/fine HTTP/1.1\r\nHost: {origin}\r\n\r\n"),
  );
  let (blocked, allowed) = tokio::join!(blocked, allowed);

  assert!(blocked.is_empty(), "{}", String::from_utf8_lossy(&blocked));
  assert!(
    String::from_utf8_lossy(&allowed).starts_with("HTTP/1.1 200 OK\r\n"),
    "{}",
    String::from_utf8_lossy(&allowed)
  );
  let seen = seen.lock().unwrap();
  assert_eq!(seen.len(), 1, "upstream must not see the dropped request");
  assert!(seen[0].contains("GET /fine"), "{}", seen[0]);
  proxy.stop().unwrap();
}

#[tokio::test]
async fn concurrent_clients_get_their_own_responses_in_order() {
  // origin echoes the request path in the body
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let origin = listener.local_addr().unwrap();
  tokio::spawn(async move {
    loop {
      let Ok((mut socket, _)) = listener.accept().await else {
        break;
      };
      tokio::spawn(async move {
        let head = read_head(&mut socket).await;
        let path = head
          .split_whitespace()
          .nth(1)
          .unwrap_or("/missing")
          .to_string();
        let body = path.into_bytes();
        let reply = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n", body.len());
        let _ = socket.write_all(reply.as_bytes()).await;
        let _ = socket.write_all(&body).await;
        let _ = socket.shutdown().await;
      });
    }
  });

  let proxy = Proxy::builder()
    .port(0)
    .interceptor(Interceptor::passthrough())
    .build()
    .unwrap();
  let addr = proxy.start().unwrap();

  let mut clients = Vec::new();
  for client in 0..4 {
    clients.push(async move {
      let mut bodies = Vec::new();
      for sequence in 0..3 {
        let response = roundtrip(
          addr,
          format!(
            "GET http://{origin}/client{client}/seq{sequence} HTTP/1.1\r\nHost: {origin}\r\n\r\n"
          ),
        )
        .await;
        let text = String::from_utf8_lossy(&response).to_string();
        let body = text.split("\r\n\r\n").nth(1).unwrap_or("").to_string();
        bodies.push(body);
      }
      (client, bodies)
    });
  }
  let results = futures_join_all(clients).await;
  for (client, bodies) in results {
    let expected: Vec<String> = (0..3)
      .map(|sequence| format!("/client{client}/seq{sequence}"))
      .collect();
    assert_eq!(bodies, expected);
  }
  proxy.stop().unwrap();
}

/// Minimal join_all so the tests do not pull in a futures dependency.
async fn futures_join_all<F, T>(futures: Vec<F>) -> Vec<T>
where
  F: std::future::Future<Output = T> + Send + 'static,
  T: Send + 'static,
{
  let mut handles = Vec::new();
  for future in futures {
    handles.push(tokio::spawn(future));
  }
  let mut results = Vec::new();
  for handle in handles {
    results.push(handle.await.unwrap());
  }
  results
}

#[tokio::test]
async fn stop_closes_established_tunnels() {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let origin = listener.local_addr().unwrap();
  tokio::spawn(async move {
    if let Ok((mut socket, _)) = listener.accept().await {
      // hold the connection open until the far side goes away
      let mut buf = [0u8; 64];
      while matches!(socket.read(&mut buf).await, Ok(n) if n > 0) {}
    }
  });

  let proxy = Proxy::builder().port(0).build().unwrap();
  let addr = proxy.start().unwrap();

  let mut stream = TcpStream::connect(addr).await.unwrap();
  stream
    .write_all(format!("CONNECT {origin} HTTP/1.1\r\n\r\n").as_bytes())
    .await
    .unwrap();
  let mut header = [0u8; 39];
  timeout(SHORT, stream.read_exact(&mut header))
    .await
    .unwrap()
    .unwrap();
  wait_for_connections(&proxy, 1).await;

  proxy.stop().unwrap();

  // the tunnel sockets are gone: reads terminate instead of hanging
  let mut buf = [0u8; 16];
  let read = timeout(SHORT, stream.read(&mut buf)).await.unwrap();
  assert!(matches!(read, Ok(0) | Err(_)), "{read:?}");
  assert_eq!(proxy.connection_count(), 0);
}

mod tls_mediation {
  use super::*;
  use tokio_rustls::rustls::pki_types::{PrivatePkcs8KeyDer, ServerName};
  use tokio_rustls::rustls::{ClientConfig, RootCertStore, ServerConfig};
  use tokio_rustls::{TlsAcceptor, TlsConnector};

  struct TestCert {
    cert_pem: String,
    key_pem: String,
    cert_der: tokio_rustls::rustls::pki_types::CertificateDer<'static>,
    key_der: PrivatePkcs8KeyDer<'static>,
  }

  fn mint(host: &str) -> TestCert {
    let certified = rcgen::generate_simple_self_signed(vec![host.to_string()]).unwrap();
    TestCert {
      cert_pem: certified.cert.pem(),
      key_pem: certified.key_pair.serialize_pem(),
      cert_der: certified.cert.der().clone(),
      key_der: PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()),
    }
  }

  /// A TLS origin answering one request with a canned response.
  async fn spawn_tls_origin(cert: &TestCert, response: &'static [u8]) -> std::net::SocketAddr {
    let config = ServerConfig::builder()
      .with_no_client_auth()
      .with_single_cert(vec![cert.cert_der.clone()], cert.key_der.clone_key().into())
      .unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(config));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      loop {
        let Ok((socket, _)) = listener.accept().await else {
          break;
        };
        let acceptor = acceptor.clone();
        tokio::spawn(async move {
          let Ok(mut tls) = acceptor.accept(socket).await else {
            return;
          };
          let mut buf = Vec::new();
          let mut tmp = [0u8; 1024];
          loop {
            let Ok(n) = tls.read(&mut tmp).await else {
              return;
            };
            if n == 0 {
              return;
            }
            buf.extend_from_slice(&tmp[..n]);
            if buf.windows(4).any(|w| w == b"\r\n\r\n") {
              break;
            }
          }
          let _ = tls.write_all(response).await;
          let _ = tls.shutdown().await;
        });
      }
    });
    addr
  }

  #[tokio::test]
  async fn mediated_tunnel_rewrites_inside_tls() {
    let proxy_cert = mint("localhost");
    let origin_cert = mint("localhost");

    let dir = std::env::temp_dir().join(format!("tapwire-mitm-test-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let cert_path = dir.join("cert.pem");
    let key_path = dir.join("key.pem");
    std::fs::write(&cert_path, &proxy_cert.cert_pem).unwrap();
    std::fs::write(&key_path, &proxy_cert.key_pem).unwrap();

    let origin =
      spawn_tls_origin(&origin_cert, b"HTTP/1.1 200 OK\r\nContent-Length: 6\r\n\r\nsecret").await;

    // the upstream client must trust the origin's throwaway certificate
    let upstream_client = tapwire::Client::builder()
      .add_root_certificate(tapwire::Certificate::from_pem(origin_cert.cert_pem.as_bytes()).unwrap())
      .build()
      .unwrap();

    let requests = Chain::new(Policy::Accept)
      .rule(Rule::new(Field::header("X-Harness"), Action::replace("on")));
    let responses = Chain::new(Policy::Accept).rule(Rule::new(
      Field::Body,
      Action::transform(|value| Ok(FieldValue::Text(value.as_text().to_uppercase()))),
    ));
    let proxy = Proxy::builder()
      .port(0)
      .tls_identity(&cert_path, &key_path)
      .interceptor(Interceptor::new(requests, responses))
      .client(upstream_client)
      .build()
      .unwrap();
    let addr = proxy.start().unwrap();

    // CONNECT, then run TLS against the proxy's mediation certificate
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
      .write_all(format!("CONNECT localhost:{} HTTP/1.1\r\n\r\n", origin.port()).as_bytes())
      .await
      .unwrap();
    let mut header = [0u8; 39];
    timeout(SHORT, stream.read_exact(&mut header))
      .await
      .unwrap()
      .unwrap();
    assert_eq!(&header[..], b"HTTP/1.1 200 Connection Established\r\n\r\n");

    let mut roots = RootCertStore::empty();
    roots.add(proxy_cert.cert_der.clone()).unwrap();
    let config = ClientConfig::builder()
      .with_root_certificates(roots)
      .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));
    let mut tls = connector
      .connect(ServerName::try_from("localhost").unwrap(), stream)
      .await
      .expect("client handshake against the mediation certificate");

    tls
      .write_all(b"GET /secure HTTP/1.1\r\nHost: localhost\r\n\r\n")
      .await
      .unwrap();
    // the tunnel stays open for further requests, so read one framed
    // response rather than waiting for EOF
    let mut response = Vec::new();
    let mut tmp = [0u8; 1024];
    loop {
      let n = timeout(SHORT, tls.read(&mut tmp)).await.unwrap().unwrap();
      if n == 0 {
        break;
      }
      response.extend_from_slice(&tmp[..n]);
      if response.ends_with(b"SECRET") {
        break;
      }
    }
    let text = String::from_utf8_lossy(&response).to_string();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"), "{text}");
    assert!(text.contains("content-length: 6\r\n"), "{text}");
    assert!(text.ends_with("SECRET"), "{text}");

    proxy.stop().unwrap();
    let _ = std::fs::remove_dir_all(&dir);
  }

  #[tokio::test]
  async fn untrusting_client_fails_the_mediation_handshake() {
    let proxy_cert = mint("localhost");
    let dir = std::env::temp_dir().join(format!("tapwire-mitm-hs-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let cert_path = dir.join("cert.pem");
    let key_path = dir.join("key.pem");
    std::fs::write(&cert_path, &proxy_cert.cert_pem).unwrap();
    std::fs::write(&key_path, &proxy_cert.key_pem).unwrap();

    // the CONNECT-time reachability probe needs something listening
    let origin_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin = origin_listener.local_addr().unwrap();
    tokio::spawn(async move {
      let _held = origin_listener.accept().await;
      tokio::time::sleep(SHORT).await;
    });

    let proxy = Proxy::builder()
      .port(0)
      .tls_identity(&cert_path, &key_path)
      .interceptor(Interceptor::passthrough())
      .build()
      .unwrap();
    let addr = proxy.start().unwrap();

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
      .write_all(format!("CONNECT localhost:{} HTTP/1.1\r\n\r\n", origin.port()).as_bytes())
      .await
      .unwrap();
    let mut header = [0u8; 39];
    timeout(SHORT, stream.read_exact(&mut header))
      .await
      .unwrap()
      .unwrap();

    // an empty root store trusts nothing, so the handshake must fail
    let config = ClientConfig::builder()
      .with_root_certificates(RootCertStore::empty())
      .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));
    let handshake = connector
      .connect(ServerName::try_from("localhost").unwrap(), stream)
      .await;
    assert!(handshake.is_err());

    proxy.stop().unwrap();
    let _ = std::fs::remove_dir_all(&dir);
  }
}
