//! Events the backend has accepted and assigned a handle to.

use std::collections::{BTreeMap, HashMap};

use crate::EventId;

/// An acknowledged event, addressable by client id or backend handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveEvent {
  pub event_id: EventId,
  pub handle: u32,
  /// A Stop directive has already been sent for this handle.
  pub stopping: bool,
}

impl ActiveEvent {
  pub fn new(event_id: EventId, handle: u32) -> Self {
    Self {
      event_id,
      handle,
      stopping: false,
    }
  }

  /// Flag the event as stopping. Returns the handle the first time only.
  pub fn begin_stop(&mut self) -> Option<u32> {
    if self.stopping {
      return None;
    }
    self.stopping = true;
    Some(self.handle)
  }
}

/// Active events keyed by client id, with a lookup index by backend handle.
#[derive(Debug, Default)]
pub struct ActiveRegistry {
  events: BTreeMap<EventId, ActiveEvent>,
  by_handle: HashMap<u32, EventId>,
}

impl ActiveRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Track `event`. Handle zero means rejection and is never stored.
  ///
  /// The backend only reuses a handle after its previous event ended, so an
  /// event still holding the same handle is stale. It is removed and returned.
  pub fn insert(&mut self, event: ActiveEvent) -> Option<ActiveEvent> {
    if event.handle == 0 {
      return None;
    }

    let stale = match self.event_for_handle(event.handle) {
      Some(owner) if owner != event.event_id => self.remove(owner),
      _ => None,
    };
    if let Some(previous) = self.events.get(&event.event_id) {
      if previous.handle != event.handle {
        self.by_handle.remove(&previous.handle);
      }
    }

    self.by_handle.insert(event.handle, event.event_id);
    self.events.insert(event.event_id, event);
    stale
  }

  pub fn get(&self, event_id: EventId) -> Option<&ActiveEvent> {
    self.events.get(&event_id)
  }

  /// Client id of the event the backend knows as `handle`.
  pub fn event_for_handle(&self, handle: u32) -> Option<EventId> {
    self.by_handle.get(&handle).copied()
  }

  pub fn contains(&self, event_id: EventId) -> bool {
    self.events.contains_key(&event_id)
  }

  pub fn remove(&mut self, event_id: EventId) -> Option<ActiveEvent> {
    let event = self.events.remove(&event_id)?;
    if self.by_handle.get(&event.handle) == Some(&event_id) {
      self.by_handle.remove(&event.handle);
    }
    Some(event)
  }

  /// Remove every event, lowest client id first.
  pub fn drain(&mut self) -> Vec<ActiveEvent> {
    self.by_handle.clear();
    std::mem::take(&mut self.events).into_values().collect()
  }

  pub fn len(&self) -> usize {
    self.events.len()
  }

  pub fn is_empty(&self) -> bool {
    self.events.is_empty()
  }
}
