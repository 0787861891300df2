//! In-memory transport that records traffic, for client tests.

use std::sync::Arc;

use async_channel::Receiver;
use parking_lot::{Mutex, MutexGuard};

use crate::transport::{
  BackendRequest, CallId, Incoming, Transport, TransportBinding, TransportError,
};

#[derive(Debug, Default)]
pub struct Recorded {
  pub calls: Vec<(CallId, BackendRequest)>,
  pub directives: Vec<BackendRequest>,
  pub cancelled: Vec<CallId>,
  pub subscriptions: Vec<String>,
  /// Make `send_request` and `send_oneway` fail.
  pub reject_sends: bool,
  pub disconnected: bool,
  pub closed: bool,
  next_call: u64,
}

/// Cloneable handle; every clone observes the same recording.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransport {
  inner: Arc<Mutex<Recorded>>,
}

impl RecordingTransport {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn binding(&self) -> TransportBinding {
    TransportBinding::Custom(Box::new(self.clone()))
  }

  pub fn lock(&self) -> MutexGuard<'_, Recorded> {
    self.inner.lock()
  }

  /// Call id of the most recent `send_request`.
  pub fn last_call(&self) -> CallId {
    self.inner.lock().calls.last().map(|(call, _)| *call).expect("no calls sent")
  }

  pub fn directives(&self) -> Vec<BackendRequest> {
    self.inner.lock().directives.clone()
  }
}

impl Transport for RecordingTransport {
  fn send_request(&self, request: &BackendRequest) -> Result<CallId, TransportError> {
    let mut recorded = self.inner.lock();
    if recorded.reject_sends || recorded.disconnected {
      return Err(TransportError::Disconnected);
    }
    recorded.next_call += 1;
    let call = CallId(recorded.next_call);
    recorded.calls.push((call, request.clone()));
    Ok(call)
  }

  fn send_oneway(&self, request: &BackendRequest) -> Result<(), TransportError> {
    let mut recorded = self.inner.lock();
    if recorded.reject_sends || recorded.disconnected {
      return Err(TransportError::Disconnected);
    }
    recorded.directives.push(request.clone());
    Ok(())
  }

  fn cancel(&self, call: CallId) {
    self.inner.lock().cancelled.push(call);
  }

  fn subscribe(&self, signal: &str) -> Result<(), TransportError> {
    let mut recorded = self.inner.lock();
    if recorded.disconnected {
      return Err(TransportError::Disconnected);
    }
    recorded.subscriptions.push(signal.to_string());
    Ok(())
  }

  fn unsubscribe(&self, signal: &str) {
    self.inner.lock().subscriptions.retain(|s| s != signal);
  }

  fn incoming(&self) -> Option<Receiver<Incoming>> {
    None
  }

  fn is_connected(&self) -> bool {
    !self.inner.lock().disconnected
  }

  fn close(&self) {
    self.inner.lock().closed = true;
  }
}
