//! Client tests against a local origin.

use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// One-shot origin: records the raw request, answers with `response`.
async fn spawn_origin(response: &'static [u8]) -> (String, Arc<Mutex<Vec<u8>>>) {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  let seen = Arc::new(Mutex::new(Vec::new()));
  let record = seen.clone();
  tokio::spawn(async move {
    if let Ok((mut socket, _)) = listener.accept().await {
      let mut buf = Vec::new();
      let mut tmp = [0u8; 1024];
      loop {
        let Ok(n) = socket.read(&mut tmp).await else {
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
      *record.lock().unwrap() = buf;
      let _ = socket.write_all(response).await;
      let _ = socket.shutdown().await;
    }
  });
  (format!("http://{}", addr), seen)
}

#[tokio::test]
async fn get_parses_status_headers_and_body() {
  let (origin, _) =
    spawn_origin(b"HTTP/1.1 200 OK\r\nX-Origin: here\r\nContent-Length: 5\r\n\r\nhello").await;
  let resp = tapwire::Client::new()
    .get(format!("{origin}/hello"))
    .send()
    .await
    .unwrap();
  assert_eq!(resp.status_code(), tapwire::StatusCode::OK);
  assert_eq!(resp.version(), tapwire::Version::HTTP_11);
  assert_eq!(resp.headers().get("x-origin").unwrap(), "here");
  assert_eq!(resp.text(), "hello");
}

#[tokio::test]
async fn post_sends_body_with_content_length() {
  let (origin, seen) = spawn_origin(b"HTTP/1.1 204 No Content\r\n\r\n").await;
  let resp = tapwire::Client::new()
    .post(format!("{origin}/submit"))
    .header("X-Mark", "1")
    .body("payload")
    .send()
    .await
    .unwrap();
  assert_eq!(resp.status_code(), tapwire::StatusCode::NO_CONTENT);
  let raw = seen.lock().unwrap().clone();
  let text = String::from_utf8_lossy(&raw).to_string();
  assert!(text.starts_with("POST /submit HTTP/1.1\r\n"), "{text}");
  assert!(text.contains("content-length: 7\r\n"), "{text}");
  assert!(text.contains("x-mark: 1\r\n"), "{text}");
}

#[tokio::test]
async fn chunked_response_bodies_are_decoded() {
  let (origin, _) = spawn_origin(
    b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n7\r\nchunked\r\n5\r\n-body\r\n0\r\n\r\n",
  )
  .await;
  let resp = tapwire::Client::new()
    .get(origin)
    .send()
    .await
    .unwrap();
  assert_eq!(resp.text(), "chunked-body");
  assert_eq!(resp.body().unwrap().framing(), tapwire::Framing::Chunked);
}

#[tokio::test]
async fn custom_reason_phrase_is_kept() {
  let (origin, _) = spawn_origin(b"HTTP/1.1 404 Nope Not Here\r\nContent-Length: 0\r\n\r\n").await;
  let resp = tapwire::Client::new().get(origin).send().await.unwrap();
  assert_eq!(resp.status_code(), tapwire::StatusCode::NOT_FOUND);
  assert_eq!(resp.reason(), "Nope Not Here");
}

#[tokio::test]
async fn connect_error_is_surfaced() {
  // reserve a port, then free it so nothing listens there
  let unused = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
  let dead = unused.local_addr().unwrap();
  drop(unused);

  let result = tapwire::Client::new()
    .get(format!("http://{dead}/"))
    .send()
    .await;
  assert!(result.is_err());
}
