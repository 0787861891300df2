//! Backend requests and their JSON line encoding.
//!
//! Calls carry a `request_id` that the backend echoes in its reply;
//! directives omit it. Signals are unsolicited and carry positional args.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{PlayReply, StatusSignal};
use crate::proplist::{PropertyList, PropertyValue};

/// Method surface of the feedback backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendRequest {
  /// Start an event; the reply carries the backend handle.
  Play {
    event: String,
    properties: Vec<(String, PropertyValue)>,
  },
  /// Stop an event by backend handle.
  Stop { handle: u32 },
  /// Pause (`pause = true`) or resume an event by backend handle.
  Pause { handle: u32, pause: bool },
}

impl BackendRequest {
  /// Play an event with optional properties.
  pub fn play(event: &str, properties: Option<&PropertyList>) -> Self {
    Self::Play {
      event: event.to_string(),
      properties: properties
        .map(|list| {
          list
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
        })
        .unwrap_or_default(),
    }
  }

  pub fn stop(handle: u32) -> Self {
    Self::Stop { handle }
  }

  pub fn pause(handle: u32, pause: bool) -> Self {
    Self::Pause { handle, pause }
  }

  pub fn method(&self) -> &'static str {
    match self {
      BackendRequest::Play { .. } => "Play",
      BackendRequest::Stop { .. } => "Stop",
      BackendRequest::Pause { .. } => "Pause",
    }
  }

  /// Build the wire command, with `request_id` for calls and `None` for directives.
  pub fn to_command(&self, request_id: Option<u64>) -> Result<WireCommand, serde_json::Error> {
    let command = match self {
      BackendRequest::Play { event, properties } => vec![
        self.method().into(),
        event.as_str().into(),
        serde_json::to_value(properties)?,
      ],
      BackendRequest::Stop { handle } => vec![self.method().into(), (*handle).into()],
      BackendRequest::Pause { handle, pause } => {
        vec![self.method().into(), (*handle).into(), (*pause).into()]
      }
    };
    Ok(WireCommand {
      command,
      request_id,
    })
  }

  /// Encode as a single JSON line (without the trailing newline).
  pub fn encode(&self, request_id: Option<u64>) -> Result<String, serde_json::Error> {
    serde_json::to_string(&self.to_command(request_id)?)
  }
}

/// Command as written to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireCommand {
  pub command: Vec<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub request_id: Option<u64>,
}

/// Reply from the backend for a call.
#[derive(Debug, Clone, Deserialize)]
pub struct WireReply {
  /// "success" or error message.
  pub error: String,
  /// Reply payload; the backend handle for `Play`.
  #[serde(default)]
  pub data: Option<Value>,
  /// Matching request ID.
  pub request_id: u64,
}

impl WireReply {
  pub fn is_success(&self) -> bool {
    self.error == "success"
  }

  /// Decode as the reply to a `Play` call.
  pub fn into_play_reply(self) -> PlayReply {
    if !self.is_success() {
      return PlayReply::Error(self.error);
    }
    match self.data.as_ref().and_then(Value::as_u64) {
      Some(handle) => match u32::try_from(handle) {
        Ok(handle) => PlayReply::Handle(handle),
        Err(_) => PlayReply::Malformed,
      },
      None => PlayReply::Malformed,
    }
  }
}

/// Signal emitted by the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct WireSignal {
  /// Signal name (e.g., "Status").
  pub signal: String,
  #[serde(default)]
  pub args: Vec<Value>,
}

impl WireSignal {
  /// Decode `(handle: u32, state: u32)` arguments.
  pub fn status(&self) -> Option<StatusSignal> {
    let [handle, state] = self.args.as_slice() else {
      return None;
    };
    let handle = u32::try_from(handle.as_u64()?).ok()?;
    let state = u32::try_from(state.as_u64()?).ok()?;
    Some(StatusSignal { handle, state })
  }
}

/// Message received from the backend (either reply or signal).
#[derive(Debug, Clone)]
pub enum WireMessage {
  Reply(WireReply),
  /// Carries a usable `request_id` but does not decode as a reply.
  MalformedReply { request_id: u64 },
  Signal(WireSignal),
}

impl WireMessage {
  /// Parse a JSON line from the backend.
  pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
    let value: Value = serde_json::from_str(line)?;
    if let Some(request_id) = value.get("request_id") {
      let Some(request_id) = request_id.as_u64() else {
        return Err(<serde_json::Error as serde::de::Error>::custom(
          "request_id is not an unsigned integer",
        ));
      };
      match serde_json::from_value(value) {
        Ok(reply) => Ok(WireMessage::Reply(reply)),
        Err(_) => Ok(WireMessage::MalformedReply { request_id }),
      }
    } else if value.get("signal").is_some() {
      Ok(WireMessage::Signal(serde_json::from_value(value)?))
    } else {
      Err(<serde_json::Error as serde::de::Error>::custom(
        "message is neither a reply nor a signal",
      ))
    }
  }
}
