use bytes::Bytes;
use std::fmt;

/// How a message body was delimited on the wire.
///
/// Bodies are buffered whole and re-framed with a `Content-Length` when a
/// message is serialized again, so relaying code needs to know what the
/// original framing was.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Framing {
  /// Sized by a `Content-Length` header; also the framing of bodies built
  /// in memory
  #[default]
  ContentLength,
  /// Arrived in chunked transfer coding; the bytes here are already
  /// de-chunked
  Chunked,
  /// Delimited by the peer closing the connection
  Close,
}

/// An opaque message body plus the framing it had on the wire.
///
/// The bytes are never decoded: whatever the caller supplies goes out
/// verbatim, and whatever the origin sent comes back untouched.
#[derive(Clone, PartialEq)]
pub struct Body {
  bytes: Bytes,
  framing: Framing,
}

impl Body {
  /// Build an in-memory body; it is framed by `Content-Length` when sent.
  pub fn new(bytes: impl Into<Bytes>) -> Body {
    Body {
      bytes: bytes.into(),
      framing: Framing::ContentLength,
    }
  }
  pub(crate) fn mark_framing(&mut self, framing: Framing) {
    self.framing = framing;
  }
  /// How the body was delimited when it was read off the wire.
  pub fn framing(&self) -> Framing {
    self.framing
  }
  /// Number of body bytes.
  pub fn len(&self) -> usize {
    self.bytes.len()
  }
  /// Whether the body has no bytes.
  pub fn is_empty(&self) -> bool {
    self.bytes.is_empty()
  }
  /// Cheap handle to the body bytes.
  pub fn to_bytes(&self) -> Bytes {
    self.bytes.clone()
  }
  /// Copy the body into a fresh vector.
  pub fn to_vec(&self) -> Vec<u8> {
    self.bytes.to_vec()
  }
}

impl Default for Body {
  fn default() -> Self {
    Body::new(Bytes::new())
  }
}

impl AsRef<[u8]> for Body {
  fn as_ref(&self) -> &[u8] {
    &self.bytes
  }
}

impl From<Bytes> for Body {
  fn from(value: Bytes) -> Body {
    Body::new(value)
  }
}

impl From<Vec<u8>> for Body {
  fn from(value: Vec<u8>) -> Body {
    Body::new(value)
  }
}

impl From<String> for Body {
  fn from(value: String) -> Body {
    Body::new(value)
  }
}

impl From<&'static str> for Body {
  fn from(value: &'static str) -> Body {
    Body::new(value)
  }
}

impl From<&'static [u8]> for Body {
  fn from(value: &'static [u8]) -> Body {
    Body::new(value)
  }
}

impl fmt::Debug for Body {
  // bodies can be megabytes of binary; a summary beats a dump
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    f.debug_struct("Body")
      .field("len", &self.len())
      .field("framing", &self.framing)
      .finish()
  }
}

impl fmt::Display for Body {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match std::str::from_utf8(&self.bytes) {
      Ok(text) => f.write_str(text),
      Err(_) => write!(f, "<{} binary bytes>", self.len()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn in_memory_bodies_are_content_length_framed() {
    let body = Body::from("payload");
    assert_eq!(body.framing(), Framing::ContentLength);
    assert_eq!(body.len(), 7);
    assert!(!body.is_empty());
  }

  #[test]
  fn marked_framing_is_reported() {
    let mut body = Body::new("deadbeef");
    body.mark_framing(Framing::Chunked);
    assert_eq!(body.framing(), Framing::Chunked);
  }

  #[test]
  fn binary_bodies_display_as_a_summary() {
    let body = Body::from(vec![0xff, 0xfe, 0x01]);
    assert_eq!(body.to_string(), "<3 binary bytes>");
    assert_eq!(Body::from("plain").to_string(), "plain");
  }
}
