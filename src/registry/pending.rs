//! Play requests sent to the backend whose reply has not arrived yet.

use std::collections::{BTreeMap, HashMap};

use crate::transport::CallId;
use crate::EventId;

/// A play request waiting for its acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
  pub event_id: EventId,
  pub call: CallId,
  /// Set when `stop` is called before the acknowledgement arrives.
  pub cancel_requested: bool,
}

impl PendingRequest {
  pub fn new(event_id: EventId, call: CallId) -> Self {
    Self {
      event_id,
      call,
      cancel_requested: false,
    }
  }
}

/// Pending requests keyed by in-flight call, with a lookup index by event id.
#[derive(Debug, Default)]
pub struct PendingRegistry {
  requests: BTreeMap<CallId, PendingRequest>,
  by_event: HashMap<EventId, CallId>,
}

impl PendingRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, request: PendingRequest) {
    self.by_event.insert(request.event_id, request.call);
    self.requests.insert(request.call, request);
  }

  /// Remove and return the request waiting on `call`.
  pub fn take(&mut self, call: CallId) -> Option<PendingRequest> {
    let request = self.requests.remove(&call)?;
    self.by_event.remove(&request.event_id);
    Some(request)
  }

  #[cfg(test)]
  pub fn get(&self, event_id: EventId) -> Option<&PendingRequest> {
    self
      .by_event
      .get(&event_id)
      .and_then(|call| self.requests.get(call))
  }

  pub fn contains(&self, event_id: EventId) -> bool {
    self.by_event.contains_key(&event_id)
  }

  /// Mark `event_id` to be stopped as soon as its acknowledgement arrives.
  /// Returns false if no such request is pending.
  pub fn request_cancel(&mut self, event_id: EventId) -> bool {
    let Some(call) = self.by_event.get(&event_id) else {
      return false;
    };
    match self.requests.get_mut(call) {
      Some(request) => {
        request.cancel_requested = true;
        true
      }
      None => false,
    }
  }

  /// Remove every request, oldest call first.
  pub fn drain(&mut self) -> Vec<PendingRequest> {
    self.by_event.clear();
    std::mem::take(&mut self.requests).into_values().collect()
  }

  pub fn len(&self) -> usize {
    self.requests.len()
  }

  pub fn is_empty(&self) -> bool {
    self.requests.is_empty()
  }
}
