//! Ordered, typed property list attached to play requests.
//!
//! Keys and string values are capped in length; longer input is truncated
//! on write and the same truncation is applied to every lookup key.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maximum key length in bytes.
pub const MAX_KEY_LENGTH: usize = 32;

/// Maximum string value length in bytes.
pub const MAX_VALUE_LENGTH: usize = 512;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PropertyError {
  #[error("Property key must not be empty")]
  EmptyKey,
  #[error("Invalid integer value: {0:?}")]
  InvalidInteger(String),
  #[error("Invalid unsigned value: {0:?}")]
  InvalidUnsigned(String),
  #[error("Invalid boolean value: {0:?}")]
  InvalidBoolean(String),
}

/// Type tag of a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
  String,
  Integer,
  Unsigned,
  Boolean,
}

impl fmt::Display for ValueType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ValueType::String => "string",
      ValueType::Integer => "integer",
      ValueType::Unsigned => "unsigned",
      ValueType::Boolean => "boolean",
    };
    f.write_str(name)
  }
}

/// Typed property value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum PropertyValue {
  String(String),
  Integer(i32),
  Unsigned(u32),
  Boolean(bool),
}

impl PropertyValue {
  pub fn value_type(&self) -> ValueType {
    match self {
      PropertyValue::String(_) => ValueType::String,
      PropertyValue::Integer(_) => ValueType::Integer,
      PropertyValue::Unsigned(_) => ValueType::Unsigned,
      PropertyValue::Boolean(_) => ValueType::Boolean,
    }
  }
}

impl fmt::Display for PropertyValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PropertyValue::String(s) => f.write_str(s),
      PropertyValue::Integer(i) => write!(f, "{}", i),
      PropertyValue::Unsigned(u) => write!(f, "{}", u),
      PropertyValue::Boolean(b) => write!(f, "{}", b),
    }
  }
}

/// Insertion-ordered list of named, typed values.
///
/// Setting a key that is already present replaces its value (and type)
/// in place; the entry keeps its original position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyList {
  entries: Vec<(String, PropertyValue)>,
}

impl PropertyList {
  /// Create an empty property list.
  pub fn new() -> Self {
    Self::default()
  }

  /// Deep copy preserving order and types.
  pub fn copy(&self) -> Self {
    self.clone()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Store a typed value under `key`.
  pub fn set(&mut self, key: &str, value: PropertyValue) -> Result<(), PropertyError> {
    if key.is_empty() {
      return Err(PropertyError::EmptyKey);
    }

    let key = truncate_bytes(key, MAX_KEY_LENGTH);
    let value = match value {
      PropertyValue::String(s) => {
        PropertyValue::String(truncate_bytes(&s, MAX_VALUE_LENGTH).to_string())
      }
      other => other,
    };

    match self.entries.iter_mut().find(|(k, _)| k == key) {
      Some(entry) => {
        log::debug!("Replacing property {} ({} -> {})", key, entry.1.value_type(), value.value_type());
        entry.1 = value;
      }
      None => self.entries.push((key.to_string(), value)),
    }

    Ok(())
  }

  pub fn set_string(&mut self, key: &str, value: &str) -> Result<(), PropertyError> {
    self.set(key, PropertyValue::String(value.to_string()))
  }

  pub fn set_integer(&mut self, key: &str, value: i32) -> Result<(), PropertyError> {
    self.set(key, PropertyValue::Integer(value))
  }

  pub fn set_unsigned(&mut self, key: &str, value: u32) -> Result<(), PropertyError> {
    self.set(key, PropertyValue::Unsigned(value))
  }

  pub fn set_boolean(&mut self, key: &str, value: bool) -> Result<(), PropertyError> {
    self.set(key, PropertyValue::Boolean(value))
  }

  /// Parse `text` as `value_type` and store it under `key`.
  pub fn set_parsed(
    &mut self,
    key: &str,
    value_type: ValueType,
    text: &str,
  ) -> Result<(), PropertyError> {
    let value = match value_type {
      ValueType::String => PropertyValue::String(text.to_string()),
      ValueType::Integer => PropertyValue::Integer(parse_integer(text)?),
      ValueType::Unsigned => PropertyValue::Unsigned(parse_unsigned(text)?),
      ValueType::Boolean => PropertyValue::Boolean(parse_boolean(text)?),
    };
    self.set(key, value)
  }

  /// Look up the raw value stored under `key`.
  pub fn get(&self, key: &str) -> Option<&PropertyValue> {
    let key = truncate_bytes(key, MAX_KEY_LENGTH);
    self
      .entries
      .iter()
      .find(|(k, _)| k == key)
      .map(|(_, value)| value)
  }

  pub fn get_string(&self, key: &str) -> Option<&str> {
    match self.get(key)? {
      PropertyValue::String(s) => Some(s.as_str()),
      _ => None,
    }
  }

  pub fn get_integer(&self, key: &str) -> Option<i32> {
    match self.get(key)? {
      PropertyValue::Integer(i) => Some(*i),
      _ => None,
    }
  }

  pub fn get_unsigned(&self, key: &str) -> Option<u32> {
    match self.get(key)? {
      PropertyValue::Unsigned(u) => Some(*u),
      _ => None,
    }
  }

  pub fn get_boolean(&self, key: &str) -> Option<bool> {
    match self.get(key)? {
      PropertyValue::Boolean(b) => Some(*b),
      _ => None,
    }
  }

  /// Type of the value stored under `key`, `None` if the key is unknown.
  pub fn value_type(&self, key: &str) -> Option<ValueType> {
    self.get(key).map(PropertyValue::value_type)
  }

  /// Iterate entries in insertion order.
  pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
    self.entries.iter().map(|(k, v)| (k.as_str(), v))
  }

  pub fn for_each<F>(&self, mut visitor: F)
  where
    F: FnMut(&str, &PropertyValue),
  {
    for (key, value) in self.iter() {
      visitor(key, value);
    }
  }

  pub fn for_each_typed<F>(&self, mut visitor: F)
  where
    F: FnMut(&str, &PropertyValue, ValueType),
  {
    for (key, value) in self.iter() {
      visitor(key, value, value.value_type());
    }
  }

  /// Keys in insertion order.
  pub fn keys(&self) -> Vec<&str> {
    self.entries.iter().map(|(k, _)| k.as_str()).collect()
  }
}

impl<'a> IntoIterator for &'a PropertyList {
  type Item = (&'a str, &'a PropertyValue);
  type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a PropertyValue)> + 'a>;

  fn into_iter(self) -> Self::IntoIter {
    Box::new(self.iter())
  }
}

/// Parse a signed 32-bit decimal integer.
pub fn parse_integer(text: &str) -> Result<i32, PropertyError> {
  text
    .parse::<i32>()
    .map_err(|_| PropertyError::InvalidInteger(text.to_string()))
}

/// Parse an unsigned 32-bit decimal integer.
pub fn parse_unsigned(text: &str) -> Result<u32, PropertyError> {
  text
    .parse::<u32>()
    .map_err(|_| PropertyError::InvalidUnsigned(text.to_string()))
}

/// Parse `true`/`1` or `false`/`0`, ignoring ASCII case.
pub fn parse_boolean(text: &str) -> Result<bool, PropertyError> {
  if text.eq_ignore_ascii_case("true") || text == "1" {
    Ok(true)
  } else if text.eq_ignore_ascii_case("false") || text == "0" {
    Ok(false)
  } else {
    Err(PropertyError::InvalidBoolean(text.to_string()))
  }
}

/// Cut `text` to at most `max` bytes without splitting a character.
fn truncate_bytes(text: &str, max: usize) -> &str {
  if text.len() <= max {
    return text;
  }
  let mut end = max;
  while !text.is_char_boundary(end) {
    end -= 1;
  }
  &text[..end]
}
