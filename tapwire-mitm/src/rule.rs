//! Declarative rewrite rules and the chain evaluator
//!
//! A [`Chain`] is an ordered list of [`Rule`]s plus a default [`Policy`].
//! Each rule addresses one part of an HTTP message (a [`Field`]), optionally
//! guards on its current value, and applies an [`Action`]. Evaluation walks
//! the rules in declaration order; the first rule that fires with a terminal
//! action decides the verdict, `Transform` and `Log` keep going.

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// The addressable parts of an HTTP message.
///
/// Requests project `Method`, `Uri`, `Version`, `Header` and `Body`;
/// responses project `Status`, `Reason`, `Version`, `Header` and `Body`.
/// A rule whose field is absent from the message it runs against simply
/// does not fire (except `Replace`/`Append`, which may create headers).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Field {
  /// Request method
  Method,
  /// Request URI
  Uri,
  /// Protocol version
  Version,
  /// A named header; lookup is case-insensitive
  Header(String),
  /// Message body
  Body,
  /// Response status code
  Status,
  /// Response reason phrase
  Reason,
}

impl Field {
  /// Address a header by name.
  pub fn header(name: impl Into<String>) -> Field {
    Field::Header(name.into())
  }
}

impl fmt::Display for Field {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Field::Method => write!(f, "method"),
      Field::Uri => write!(f, "uri"),
      Field::Version => write!(f, "version"),
      Field::Header(name) => write!(f, "header:{}", name),
      Field::Body => write!(f, "body"),
      Field::Status => write!(f, "status"),
      Field::Reason => write!(f, "reason"),
    }
  }
}

/// The projected value of a [`Field`].
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
  /// Textual fields: method, uri, version, headers, status, reason
  Text(String),
  /// Opaque fields: the body
  Data(Bytes),
}

impl FieldValue {
  /// View the value as text; opaque bytes are decoded lossily.
  pub fn as_text(&self) -> std::borrow::Cow<'_, str> {
    match self {
      FieldValue::Text(s) => std::borrow::Cow::Borrowed(s),
      FieldValue::Data(b) => String::from_utf8_lossy(b),
    }
  }
  /// Consume the value into raw bytes.
  pub fn into_bytes(self) -> Bytes {
    match self {
      FieldValue::Text(s) => Bytes::from(s),
      FieldValue::Data(b) => b,
    }
  }
}

impl fmt::Display for FieldValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_text())
  }
}

impl From<&str> for FieldValue {
  fn from(value: &str) -> Self {
    FieldValue::Text(value.to_string())
  }
}

impl From<String> for FieldValue {
  fn from(value: String) -> Self {
    FieldValue::Text(value)
  }
}

impl From<Bytes> for FieldValue {
  fn from(value: Bytes) -> Self {
    FieldValue::Data(value)
  }
}

impl From<Vec<u8>> for FieldValue {
  fn from(value: Vec<u8>) -> Self {
    FieldValue::Data(value.into())
  }
}

impl From<u16> for FieldValue {
  fn from(value: u16) -> Self {
    FieldValue::Text(value.to_string())
  }
}

/// User-supplied value transformation. Errors are logged and leave the
/// field unchanged.
pub type TransformFn =
  Arc<dyn Fn(FieldValue) -> std::result::Result<FieldValue, Box<dyn std::error::Error + Send + Sync>> + Send + Sync>;

/// Guard on the projected field value; the rule fires only when it returns
/// true.
pub type PredicateFn = Arc<dyn Fn(&FieldValue) -> bool + Send + Sync>;

/// What a rule does to its field once it fires.
#[derive(Clone)]
pub enum Action {
  /// Leave the field untouched and stop evaluating the chain
  Accept,
  /// Abort the message; no response is delivered
  Drop,
  /// Emit the current field value to the log and keep evaluating
  Log,
  /// Set the field to a literal value and stop evaluating
  Replace(FieldValue),
  /// Append to a repeatable field (headers, body); stops evaluating
  Append(FieldValue),
  /// Delete the field (headers only) and stop evaluating
  Remove,
  /// Rewrite the field through a function and keep evaluating
  Transform(TransformFn),
}

impl Action {
  /// Set the field to `value`.
  pub fn replace(value: impl Into<FieldValue>) -> Action {
    Action::Replace(value.into())
  }
  /// Append `value` to the field.
  pub fn append(value: impl Into<FieldValue>) -> Action {
    Action::Append(value.into())
  }
  /// Rewrite the field with `f`.
  pub fn transform<F>(f: F) -> Action
  where
    F: Fn(FieldValue) -> std::result::Result<FieldValue, Box<dyn std::error::Error + Send + Sync>>
      + Send
      + Sync
      + 'static,
  {
    Action::Transform(Arc::new(f))
  }
}

impl fmt::Debug for Action {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Action::Accept => write!(f, "Accept"),
      Action::Drop => write!(f, "Drop"),
      Action::Log => write!(f, "Log"),
      Action::Replace(v) => f.debug_tuple("Replace").field(v).finish(),
      Action::Append(v) => f.debug_tuple("Append").field(v).finish(),
      Action::Remove => write!(f, "Remove"),
      Action::Transform(_) => write!(f, "Transform(..)"),
    }
  }
}

/// The outcome of applying a rule, and of evaluating a whole chain.
///
/// `Continue` is only ever produced per-rule (by `Log` and `Transform`);
/// [`Chain::evaluate`] resolves to `Accept` or `Drop`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
  /// Proceed with the (possibly rewritten) message
  Accept,
  /// Abort the message
  Drop,
  /// Move on to the next rule
  Continue,
}

/// What a chain decides when no rule fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Policy {
  /// Let unmatched messages through
  Accept,
  /// Drop unmatched messages
  Drop,
}

impl From<Policy> for Verdict {
  fn from(value: Policy) -> Self {
    match value {
      Policy::Accept => Verdict::Accept,
      Policy::Drop => Verdict::Drop,
    }
  }
}

/// One rewrite rule: a field, an action, and an optional predicate.
#[derive(Clone)]
pub struct Rule {
  field: Field,
  action: Action,
  predicate: Option<PredicateFn>,
}

impl fmt::Debug for Rule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Rule")
      .field("field", &self.field)
      .field("action", &self.action)
      .field("predicate", &self.predicate.as_ref().map(|_| ".."))
      .finish()
  }
}

impl Rule {
  /// Create a rule applying `action` to `field`.
  pub fn new(field: Field, action: Action) -> Rule {
    Rule {
      field,
      action,
      predicate: None,
    }
  }
  /// Guard the rule on the current field value.
  pub fn when<F>(mut self, predicate: F) -> Rule
  where
    F: Fn(&FieldValue) -> bool + Send + Sync + 'static,
  {
    self.predicate = Some(Arc::new(predicate));
    self
  }
  /// The field this rule addresses.
  pub fn field(&self) -> &Field {
    &self.field
  }
  /// The action this rule applies.
  pub fn action(&self) -> &Action {
    &self.action
  }

  fn apply<M: Message>(&self, message: &mut M) -> Verdict {
    let value = match message.get_field(&self.field) {
      Some(value) => value,
      None => {
        // replace/append may create an absent header; everything else is
        // a no-op on a missing field
        return match &self.action {
          Action::Replace(v) => {
            self.set_logged(message, v.clone());
            Verdict::Accept
          }
          Action::Append(v) => {
            if let Err(err) = message.append_field(&self.field, v.clone()) {
              tracing::error!(field = %self.field, %err, "append failed");
            }
            Verdict::Accept
          }
          _ => Verdict::Continue,
        };
      }
    };
    if let Some(predicate) = &self.predicate {
      if !predicate.as_ref()(&value) {
        return Verdict::Continue;
      }
    }
    match &self.action {
      Action::Accept => Verdict::Accept,
      Action::Drop => Verdict::Drop,
      Action::Log => {
        tracing::info!(field = %self.field, %value, "chain log");
        Verdict::Continue
      }
      Action::Replace(v) => {
        self.set_logged(message, v.clone());
        Verdict::Accept
      }
      Action::Append(v) => {
        if let Err(err) = message.append_field(&self.field, v.clone()) {
          tracing::error!(field = %self.field, %err, "append failed");
        }
        Verdict::Accept
      }
      Action::Remove => {
        message.remove_field(&self.field);
        Verdict::Accept
      }
      Action::Transform(transform) => {
        match transform.as_ref()(value) {
          Ok(next) => self.set_logged(message, next),
          Err(err) => {
            // user error: the rule degrades to accept-without-modification
            tracing::error!(field = %self.field, %err, "transform failed, field left unchanged");
          }
        }
        Verdict::Continue
      }
    }
  }

  fn set_logged<M: Message>(&self, message: &mut M, value: FieldValue) {
    if let Err(err) = message.set_field(&self.field, value) {
      tracing::error!(field = %self.field, %err, "set failed, field left unchanged");
    }
  }
}

/// Field projection over an HTTP message.
///
/// Implemented for [`tapwire::Request`] and [`tapwire::Response`]; a field
/// a message does not carry projects to `None`.
pub trait Message {
  /// Read the current value of `field`, if present.
  fn get_field(&self, field: &Field) -> Option<FieldValue>;
  /// Overwrite `field` with `value`.
  fn set_field(&mut self, field: &Field, value: FieldValue) -> crate::Result<()>;
  /// Append `value` to a repeatable `field`; equivalent to `set_field` for
  /// single-valued fields.
  fn append_field(&mut self, field: &Field, value: FieldValue) -> crate::Result<()>;
  /// Delete `field` where that is meaningful (headers).
  fn remove_field(&mut self, field: &Field);
}

/// An ordered rule list with a default policy.
#[derive(Clone, Debug)]
pub struct Chain {
  rules: Vec<Rule>,
  default_policy: Policy,
}

impl Default for Chain {
  fn default() -> Self {
    Chain::new(Policy::Accept)
  }
}

impl Chain {
  /// Create an empty chain with the given default policy.
  pub fn new(default_policy: Policy) -> Chain {
    Chain {
      rules: Vec::new(),
      default_policy,
    }
  }
  /// Append a rule to the chain.
  pub fn rule(mut self, rule: Rule) -> Chain {
    self.rules.push(rule);
    self
  }
  /// Number of rules in the chain.
  pub fn len(&self) -> usize {
    self.rules.len()
  }
  /// Whether the chain has no rules.
  pub fn is_empty(&self) -> bool {
    self.rules.is_empty()
  }
  /// The verdict applied when no rule fires.
  pub fn default_policy(&self) -> Policy {
    self.default_policy
  }
  /// Run the chain against `message`, rewriting it in place.
  ///
  /// Rules fire in declaration order; later rules targeting the same field
  /// see the value as rewritten by earlier ones. Returns `Verdict::Accept`
  /// or `Verdict::Drop`, never `Verdict::Continue`.
  pub fn evaluate<M: Message>(&self, message: &mut M) -> Verdict {
    for rule in &self.rules {
      match rule.apply(message) {
        Verdict::Continue => continue,
        Verdict::Accept => return Verdict::Accept,
        Verdict::Drop => return Verdict::Drop,
      }
    }
    self.default_policy.into()
  }
}
