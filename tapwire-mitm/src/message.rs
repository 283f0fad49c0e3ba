//! Field projection for requests and responses
//!
//! A single get/set pair, implemented by pattern matching on [`Field`],
//! backs every rule in a chain. Fields a message does not carry (status on
//! a request, method on a response) project to `None` and reject writes.

use crate::error::Error;
use crate::rule::{Field, FieldValue, Message};
use bytes::Bytes;
use http::{HeaderName, HeaderValue, Method, Version};
use tapwire::{Body, Request, Response};

fn version_value(version: Version) -> FieldValue {
  FieldValue::Text(format!("{:?}", version))
}

fn parse_version(value: &FieldValue) -> crate::Result<Version> {
  match value.as_text().as_ref() {
    "HTTP/0.9" => Ok(Version::HTTP_09),
    "HTTP/1.0" => Ok(Version::HTTP_10),
    "HTTP/1.1" => Ok(Version::HTTP_11),
    "HTTP/2.0" => Ok(Version::HTTP_2),
    "HTTP/3.0" => Ok(Version::HTTP_3),
    other => Err(Error::InvalidRequest(format!(
      "invalid http version: {other}"
    ))),
  }
}

fn header_value(headers: &http::HeaderMap, name: &str) -> Option<FieldValue> {
  headers
    .get(name)
    .map(|value| FieldValue::Text(String::from_utf8_lossy(value.as_bytes()).to_string()))
}

fn parse_header(name: &str, value: FieldValue) -> crate::Result<(HeaderName, HeaderValue)> {
  let name = HeaderName::from_bytes(name.as_bytes())
    .map_err(|err| Error::InvalidRequest(format!("invalid header name {name}: {err}")))?;
  let value = HeaderValue::from_bytes(&value.into_bytes())
    .map_err(|err| Error::InvalidRequest(format!("invalid header value: {err}")))?;
  Ok((name, value))
}

fn body_value(body: Option<&Body>) -> Option<FieldValue> {
  body.map(|b| FieldValue::Data(b.to_bytes()))
}

fn appended_body(body: Option<&Body>, value: FieldValue) -> Bytes {
  let mut bytes = body.map(|b| b.to_vec()).unwrap_or_default();
  bytes.extend_from_slice(&value.into_bytes());
  Bytes::from(bytes)
}

impl Message for Request {
  fn get_field(&self, field: &Field) -> Option<FieldValue> {
    match field {
      Field::Method => Some(FieldValue::Text(self.method().to_string())),
      Field::Uri => Some(FieldValue::Text(self.uri().to_string())),
      Field::Version => Some(version_value(self.version())),
      Field::Header(name) => header_value(self.headers(), name),
      Field::Body => body_value(self.body()),
      Field::Status | Field::Reason => None,
    }
  }

  fn set_field(&mut self, field: &Field, value: FieldValue) -> crate::Result<()> {
    match field {
      Field::Method => {
        let method = Method::from_bytes(value.as_text().as_bytes())
          .map_err(|err| Error::InvalidRequest(format!("invalid method: {err}")))?;
        *self.method_mut() = method;
        Ok(())
      }
      Field::Uri => {
        let uri: http::Uri = value
          .as_text()
          .parse()
          .map_err(|err| Error::InvalidRequest(format!("invalid uri: {err}")))?;
        *self.uri_mut() = uri;
        Ok(())
      }
      Field::Version => {
        *self.version_mut() = parse_version(&value)?;
        Ok(())
      }
      Field::Header(name) => {
        let (name, value) = parse_header(name, value)?;
        self.headers_mut().insert(name, value);
        Ok(())
      }
      Field::Body => {
        // bodies are fully buffered, so framing headers follow the bytes
        let bytes = value.into_bytes();
        self.headers_mut().remove(http::header::TRANSFER_ENCODING);
        self
          .headers_mut()
          .insert(http::header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
        *self.body_mut() = if bytes.is_empty() {
          None
        } else {
          Some(Body::from(bytes))
        };
        Ok(())
      }
      Field::Status | Field::Reason => Err(Error::InvalidRequest(format!(
        "field {field} is not present on requests"
      ))),
    }
  }

  fn append_field(&mut self, field: &Field, value: FieldValue) -> crate::Result<()> {
    match field {
      Field::Header(name) => {
        let (name, value) = parse_header(name, value)?;
        self.headers_mut().append(name, value);
        Ok(())
      }
      Field::Body => {
        let bytes = appended_body(self.body(), value);
        self.set_field(&Field::Body, FieldValue::Data(bytes))
      }
      _ => self.set_field(field, value),
    }
  }

  fn remove_field(&mut self, field: &Field) {
    if let Field::Header(name) = field {
      self.headers_mut().remove(name.as_str());
    }
  }
}

impl Message for Response {
  fn get_field(&self, field: &Field) -> Option<FieldValue> {
    match field {
      Field::Status => Some(FieldValue::Text(self.status_code().as_str().to_string())),
      Field::Reason => Some(FieldValue::Text(self.reason().to_string())),
      Field::Version => Some(version_value(self.version())),
      Field::Header(name) => header_value(self.headers(), name),
      Field::Body => body_value(self.body()),
      Field::Method | Field::Uri => None,
    }
  }

  fn set_field(&mut self, field: &Field, value: FieldValue) -> crate::Result<()> {
    match field {
      Field::Status => {
        let code: u16 = value
          .as_text()
          .parse()
          .map_err(|err| Error::InvalidRequest(format!("invalid status: {err}")))?;
        let status = http::StatusCode::from_u16(code)
          .map_err(|err| Error::InvalidRequest(format!("invalid status: {err}")))?;
        *self.status_code_mut() = status;
        // the old reason no longer applies; fall back to the canonical one
        *self.reason_mut() = None;
        Ok(())
      }
      Field::Reason => {
        *self.reason_mut() = Some(value.as_text().to_string());
        Ok(())
      }
      Field::Version => {
        *self.version_mut() = parse_version(&value)?;
        Ok(())
      }
      Field::Header(name) => {
        let (name, value) = parse_header(name, value)?;
        self.headers_mut().insert(name, value);
        Ok(())
      }
      Field::Body => {
        let bytes = value.into_bytes();
        self.headers_mut().remove(http::header::TRANSFER_ENCODING);
        self
          .headers_mut()
          .insert(http::header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
        *self.body_mut() = if bytes.is_empty() {
          None
        } else {
          Some(Body::from(bytes))
        };
        Ok(())
      }
      Field::Method | Field::Uri => Err(Error::InvalidRequest(format!(
        "field {field} is not present on responses"
      ))),
    }
  }

  fn append_field(&mut self, field: &Field, value: FieldValue) -> crate::Result<()> {
    match field {
      Field::Header(name) => {
        let (name, value) = parse_header(name, value)?;
        self.headers_mut().append(name, value);
        Ok(())
      }
      Field::Body => {
        let bytes = appended_body(self.body(), value);
        self.set_field(&Field::Body, FieldValue::Data(bytes))
      }
      _ => self.set_field(field, value),
    }
  }

  fn remove_field(&mut self, field: &Field) {
    if let Field::Header(name) = field {
      self.headers_mut().remove(name.as_str());
    }
  }
}
