//! Feedback client: issues play requests and tracks each one until it ends.
//!
//! Every request starts out pending (sent, waiting for the backend's
//! acknowledgement) and becomes active once the backend assigns it a handle.
//! Status signals for active events are routed back to the caller's
//! callback; terminal states end tracking.

use async_channel::Receiver;
use thiserror::Error;

use crate::config::{ClientConfig, ConfigError};
use crate::proplist::PropertyList;
use crate::registry::{ActiveEvent, ActiveRegistry, PendingRegistry, PendingRequest};
use crate::state::EventState;
use crate::transport::{
  BackendRequest, CallId, Incoming, PlayReply, SocketTransport, StatusSignal, Transport,
  TransportBinding, TransportError, STATUS_SIGNAL,
};
use crate::EventId;

#[derive(Error, Debug)]
pub enum ClientError {
  #[error("Transport error: {0}")]
  Transport(#[from] TransportError),
  #[error("Configuration error: {0}")]
  Config(#[from] ConfigError),
  #[error("Event name must not be empty")]
  EmptyEventName,
  #[error("Transport is not connected")]
  NotConnected,
  #[error("Client has been destroyed")]
  Destroyed,
}

/// Notification callback, invoked with the client id and the new state.
pub type EventCallback = Box<dyn FnMut(EventId, EventState)>;

/// Client for a feedback backend.
///
/// All methods run on the caller's event loop. Replies and signals are fed
/// in through [`dispatch`](Self::dispatch) (or the `process_*` helpers), and
/// the callback runs synchronously from there.
pub struct FeedbackClient {
  transport: Option<Box<dyn Transport>>,
  callback: Option<EventCallback>,
  last_event_id: EventId,
  pending: PendingRegistry,
  active: ActiveRegistry,
}

impl FeedbackClient {
  /// Create a client on an existing transport and subscribe to status signals.
  pub fn create(binding: TransportBinding) -> Result<Self, ClientError> {
    let transport = binding.into_transport();
    if !transport.is_connected() {
      return Err(ClientError::NotConnected);
    }
    transport.subscribe(STATUS_SIGNAL)?;

    log::info!("Feedback client created");
    Ok(Self {
      transport: Some(transport),
      callback: None,
      last_event_id: 0,
      pending: PendingRegistry::new(),
      active: ActiveRegistry::new(),
    })
  }

  /// Connect to the backend socket named in `config` and create a client on it.
  pub async fn connect(config: &ClientConfig) -> Result<Self, ClientError> {
    config.validate()?;
    let path = config.socket_path.to_string_lossy();
    let socket =
      SocketTransport::connect(&path, config.connect_retries, config.call_timeout()).await?;
    Self::create(TransportBinding::Socket(socket))
  }

  /// Replace the notification callback.
  pub fn set_callback<F>(&mut self, callback: F)
  where
    F: FnMut(EventId, EventState) + 'static,
  {
    self.callback = Some(Box::new(callback));
  }

  pub fn clear_callback(&mut self) {
    self.callback = None;
  }

  fn transport(&self) -> Result<&dyn Transport, ClientError> {
    self.transport.as_deref().ok_or(ClientError::Destroyed)
  }

  fn allocate_event_id(&mut self) -> EventId {
    self.last_event_id = self.last_event_id.wrapping_add(1);
    if self.last_event_id == 0 {
      self.last_event_id = 1;
    }
    self.last_event_id
  }

  /// Request playback of `event`.
  ///
  /// Returns the client id as soon as the request is sent. The backend may
  /// still reject the event, which is reported as `Failed` via the callback.
  pub fn play(
    &mut self,
    event: &str,
    properties: Option<&PropertyList>,
  ) -> Result<EventId, ClientError> {
    self.transport()?;
    if event.is_empty() {
      return Err(ClientError::EmptyEventName);
    }

    let event_id = self.allocate_event_id();
    let request = BackendRequest::play(event, properties);
    let call = self.transport()?.send_request(&request).map_err(|e| {
      log::warn!("Failed to send play request for {}: {}", event, e);
      e
    })?;

    self.pending.insert(PendingRequest::new(event_id, call));
    log::debug!("Play {} sent as event {} (call {})", event, event_id, call);
    Ok(event_id)
  }

  /// Stop an event. Unknown ids are ignored.
  ///
  /// An event still waiting for its acknowledgement is stopped as soon as
  /// the backend handle arrives.
  pub fn stop(&mut self, event_id: EventId) {
    let Some(transport) = self.transport.as_deref() else {
      return;
    };

    if let Some(mut event) = self.active.remove(event_id) {
      log::debug!("Stopping event {} (handle {})", event_id, event.handle);
      send_stop(transport, &mut event);
      return;
    }

    if self.pending.request_cancel(event_id) {
      log::debug!("Event {} not acknowledged yet, stop deferred", event_id);
    }
  }

  /// Pause an active event.
  pub fn pause(&mut self, event_id: EventId) {
    self.send_pause(event_id, true);
  }

  /// Resume a paused event.
  pub fn resume(&mut self, event_id: EventId) {
    self.send_pause(event_id, false);
  }

  fn send_pause(&self, event_id: EventId, pause: bool) {
    let Some(transport) = self.transport.as_deref() else {
      return;
    };
    let Some(event) = self.active.get(event_id) else {
      log::debug!("Event {} is not active, ignoring pause={}", event_id, pause);
      return;
    };

    if let Err(e) = transport.send_oneway(&BackendRequest::pause(event.handle, pause)) {
      log::warn!("Failed to send pause={} for event {}: {}", pause, event_id, e);
    }
  }

  /// Handle a reply or signal delivered by the transport.
  pub fn dispatch(&mut self, message: Incoming) {
    if self.transport.is_none() {
      return;
    }
    match message {
      Incoming::Reply { call, reply } => self.handle_play_reply(call, reply),
      Incoming::Status(signal) => self.handle_status(signal),
    }
  }

  fn handle_play_reply(&mut self, call: CallId, reply: PlayReply) {
    let Some(request) = self.pending.take(call) else {
      log::debug!("Ignoring reply for unknown call {}", call);
      return;
    };
    let event_id = request.event_id;

    let handle = match reply {
      PlayReply::Handle(handle) if handle > 0 => handle,
      PlayReply::Handle(_) => {
        log::warn!("Backend rejected event {}", event_id);
        self.notify(event_id, EventState::Failed);
        return;
      }
      PlayReply::Malformed => {
        log::warn!("Malformed play reply for event {}", event_id);
        self.notify(event_id, EventState::Failed);
        return;
      }
      PlayReply::Error(e) => {
        log::warn!("Play failed for event {}: {}", event_id, e);
        self.notify(event_id, EventState::Failed);
        return;
      }
    };

    if request.cancel_requested {
      log::debug!("Event {} was stopped while pending, stopping handle {}", event_id, handle);
      if let Some(transport) = self.transport.as_deref() {
        send_stop(transport, &mut ActiveEvent::new(event_id, handle));
      }
      return;
    }

    log::debug!("Event {} active with handle {}", event_id, handle);
    if let Some(stale) = self.active.insert(ActiveEvent::new(event_id, handle)) {
      // Its terminal status was lost before the backend reused the handle.
      log::warn!(
        "Handle {} reassigned from event {} to event {}",
        handle,
        stale.event_id,
        event_id
      );
      self.notify(stale.event_id, EventState::Completed);
    }
  }

  fn handle_status(&mut self, signal: StatusSignal) {
    let Some(event_id) = self.active.event_for_handle(signal.handle) else {
      log::debug!("Ignoring status for unknown handle {}", signal.handle);
      return;
    };

    let state = EventState::from_code(signal.state);
    log::debug!("Event {} (handle {}) is {}", event_id, signal.handle, state);
    self.notify(event_id, state);

    if state.is_terminal() {
      self.active.remove(event_id);
    }
  }

  fn notify(&mut self, event_id: EventId, state: EventState) {
    if let Some(callback) = self.callback.as_mut() {
      callback(event_id, state);
    }
  }

  /// Queue of incoming transport messages, if the transport provides one.
  pub fn incoming(&self) -> Option<Receiver<Incoming>> {
    self.transport.as_ref().and_then(|t| t.incoming())
  }

  /// Dispatch every message already queued, without waiting.
  pub fn process_available(&mut self) -> usize {
    let Some(incoming) = self.incoming() else {
      return 0;
    };
    let mut handled = 0;
    while let Ok(message) = incoming.try_recv() {
      self.dispatch(message);
      handled += 1;
    }
    handled
  }

  /// Wait for the next incoming message and dispatch it.
  /// Returns false once the transport has no more messages to deliver.
  pub async fn process_next(&mut self) -> bool {
    let Some(incoming) = self.incoming() else {
      return false;
    };
    match incoming.recv().await {
      Ok(message) => {
        self.dispatch(message);
        true
      }
      Err(_) => false,
    }
  }

  pub fn is_pending(&self, event_id: EventId) -> bool {
    self.pending.contains(event_id)
  }

  pub fn is_active(&self, event_id: EventId) -> bool {
    self.active.contains(event_id)
  }

  /// Backend handle of an active event.
  pub fn backend_handle(&self, event_id: EventId) -> Option<u32> {
    self.active.get(event_id).map(|event| event.handle)
  }

  pub fn pending_count(&self) -> usize {
    self.pending.len()
  }

  pub fn active_count(&self) -> usize {
    self.active.len()
  }

  /// Stop every active event, cancel pending calls and release the transport.
  pub fn destroy(mut self) {
    self.shutdown();
  }

  fn shutdown(&mut self) {
    let Some(transport) = self.transport.take() else {
      return;
    };

    let active = self.active.drain();
    let pending = self.pending.drain();
    log::info!(
      "Destroying feedback client ({} active, {} pending)",
      active.len(),
      pending.len()
    );

    for mut event in active {
      send_stop(transport.as_ref(), &mut event);
    }
    for request in pending {
      transport.cancel(request.call);
    }

    transport.unsubscribe(STATUS_SIGNAL);
    transport.close();
  }
}

/// Send Stop for `event` unless one was already sent.
fn send_stop(transport: &dyn Transport, event: &mut ActiveEvent) {
  let Some(handle) = event.begin_stop() else {
    return;
  };
  if let Err(e) = transport.send_oneway(&BackendRequest::stop(handle)) {
    log::warn!("Failed to send stop for handle {}: {}", handle, e);
  }
}

impl Drop for FeedbackClient {
  fn drop(&mut self) {
    self.shutdown();
  }
}

impl std::fmt::Debug for FeedbackClient {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("FeedbackClient")
      .field("connected", &self.transport.is_some())
      .field("has_callback", &self.callback.is_some())
      .field("last_event_id", &self.last_event_id)
      .field("pending", &self.pending.len())
      .field("active", &self.active.len())
      .finish()
  }
}
