//! Event states reported by the feedback backend.

use std::fmt;

/// State of a requested event, as carried by the backend's `Status` signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventState {
  /// The event could not be played (no resources, unknown event, rejected).
  Failed,
  /// The event finished, or was cancelled by a higher priority event.
  Completed,
  /// Playback started or continued.
  Playing,
  /// Playback was paused.
  Paused,
  /// A higher priority event is playing.
  Busy,
  /// The event will be played with a long tone.
  Long,
  /// The event will be played with a short tone.
  Short,
  /// A state code this library does not know about.
  Unknown(u32),
}

impl EventState {
  pub fn from_code(code: u32) -> Self {
    match code {
      0 => EventState::Failed,
      1 => EventState::Completed,
      2 => EventState::Playing,
      3 => EventState::Paused,
      4 => EventState::Busy,
      8 => EventState::Long,
      16 => EventState::Short,
      other => EventState::Unknown(other),
    }
  }

  pub fn code(self) -> u32 {
    match self {
      EventState::Failed => 0,
      EventState::Completed => 1,
      EventState::Playing => 2,
      EventState::Paused => 3,
      EventState::Busy => 1 << 2,
      EventState::Long => 1 << 3,
      EventState::Short => 1 << 4,
      EventState::Unknown(code) => code,
    }
  }

  /// Terminal states end tracking of the event.
  pub fn is_terminal(self) -> bool {
    matches!(self, EventState::Failed | EventState::Completed)
  }
}

impl From<u32> for EventState {
  fn from(code: u32) -> Self {
    EventState::from_code(code)
  }
}

impl fmt::Display for EventState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EventState::Failed => f.write_str("Failed"),
      EventState::Completed => f.write_str("Completed"),
      EventState::Playing => f.write_str("Playing"),
      EventState::Paused => f.write_str("Paused"),
      EventState::Busy => f.write_str("Busy"),
      EventState::Long => f.write_str("Long"),
      EventState::Short => f.write_str("Short"),
      EventState::Unknown(code) => write!(f, "Unknown({})", code),
    }
  }
}
