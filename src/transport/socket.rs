//! Stream socket binding to the feedback backend.
//!
//! Handles platform-specific socket/pipe connections.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::protocol::{BackendRequest, WireMessage};
use super::{CallId, Incoming, PlayReply, Transport, TransportError};

/// Connection state shared between the caller, reader and timers.
struct SocketState {
  /// Calls waiting for a reply, with their timeout task if one is armed.
  pending: HashMap<CallId, Option<JoinHandle<()>>>,
  subscriptions: HashSet<String>,
  next_call: u64,
  connected: bool,
}

impl SocketState {
  /// Forget a pending call. Returns false if it was already resolved or cancelled.
  fn resolve(&mut self, call: CallId) -> bool {
    match self.pending.remove(&call) {
      Some(timer) => {
        if let Some(timer) = timer {
          timer.abort();
        }
        true
      }
      None => false,
    }
  }
}

/// Writer channel message.
enum WriteMessage {
  Line(Vec<u8>),
  Close,
}

/// Connection to the backend over a local stream socket.
pub struct SocketTransport {
  state: Arc<Mutex<SocketState>>,
  write_tx: Sender<WriteMessage>,
  incoming_tx: Sender<Incoming>,
  incoming_rx: Receiver<Incoming>,
  call_timeout: Option<Duration>,
  runtime: Handle,
  shutdown: CancellationToken,
  _reader_handle: JoinHandle<()>,
  _writer_handle: JoinHandle<()>,
}

impl SocketTransport {
  /// Connect to the backend socket/pipe.
  ///
  /// Must be called from within a tokio runtime; the reader and writer tasks
  /// are spawned on it. `call_timeout` of `None` waits for replies indefinitely.
  pub async fn connect(
    path: &str,
    retry_count: u32,
    call_timeout: Option<Duration>,
  ) -> Result<Self, TransportError> {
    let mut last_error = None;

    for attempt in 0..retry_count.max(1) {
      if attempt > 0 {
        tokio::time::sleep(Duration::from_millis(100 * (attempt as u64 + 1))).await;
      }

      match Self::try_connect(path, call_timeout).await {
        Ok(transport) => {
          log::info!("Connected to feedback backend at {}", path);
          return Ok(transport);
        }
        Err(e) => {
          log::debug!("Backend connect attempt {} failed: {}", attempt + 1, e);
          last_error = Some(e);
        }
      }
    }

    Err(last_error.unwrap_or_else(|| TransportError::ConnectionFailed("Unknown error".into())))
  }

  #[cfg(windows)]
  async fn try_connect(path: &str, call_timeout: Option<Duration>) -> Result<Self, TransportError> {
    use tokio::net::windows::named_pipe::ClientOptions;

    let client = ClientOptions::new()
      .open(path)
      .map_err(|e| TransportError::ConnectionFailed(format!("Failed to open pipe: {}", e)))?;

    let (reader, writer) = tokio::io::split(client);
    Ok(Self::setup(reader, writer, call_timeout))
  }

  #[cfg(not(windows))]
  async fn try_connect(path: &str, call_timeout: Option<Duration>) -> Result<Self, TransportError> {
    use tokio::net::UnixStream;

    let stream = UnixStream::connect(path)
      .await
      .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

    let (reader, writer) = tokio::io::split(stream);
    Ok(Self::setup(reader, writer, call_timeout))
  }

  /// Build a transport over an already established reader/writer pair.
  pub fn setup<R, W>(reader: R, writer: W, call_timeout: Option<Duration>) -> Self
  where
    R: tokio::io::AsyncRead + Send + Unpin + 'static,
    W: tokio::io::AsyncWrite + Send + Unpin + 'static,
  {
    let state = Arc::new(Mutex::new(SocketState {
      pending: HashMap::new(),
      subscriptions: HashSet::new(),
      next_call: 1,
      connected: true,
    }));

    let (incoming_tx, incoming_rx) = async_channel::unbounded();
    let (write_tx, write_rx) = async_channel::unbounded::<WriteMessage>();
    let shutdown = CancellationToken::new();

    let reader_state = state.clone();
    let reader_tx = incoming_tx.clone();
    let reader_shutdown = shutdown.clone();
    let reader_handle = tokio::spawn(async move {
      Self::reader_loop(reader, reader_state, reader_tx, reader_shutdown).await;
    });

    let writer_handle = tokio::spawn(async move {
      Self::writer_loop(writer, write_rx).await;
    });

    Self {
      state,
      write_tx,
      incoming_tx,
      incoming_rx,
      call_timeout,
      runtime: Handle::current(),
      shutdown,
      _reader_handle: reader_handle,
      _writer_handle: writer_handle,
    }
  }

  async fn reader_loop<R: tokio::io::AsyncRead + Unpin>(
    reader: R,
    state: Arc<Mutex<SocketState>>,
    incoming_tx: Sender<Incoming>,
    shutdown: CancellationToken,
  ) {
    log::debug!("Backend reader loop started");
    let mut buf_reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
      buf.clear();
      let read = tokio::select! {
        _ = shutdown.cancelled() => {
          log::debug!("Backend reader shutdown requested");
          break;
        }
        read = buf_reader.read_until(b'\n', &mut buf) => read,
      };

      match read {
        Ok(0) => {
          log::info!("Backend connection closed");
          break;
        }
        Ok(_) => {
          // A garbled line is dropped; the connection stays usable.
          let line = match std::str::from_utf8(&buf) {
            Ok(line) => line,
            Err(e) => {
              log::warn!("Dropping backend line that is not UTF-8: {}", e);
              continue;
            }
          };
          let trimmed = line.trim();
          if trimmed.is_empty() {
            continue;
          }
          Self::handle_line(trimmed, &state, &incoming_tx);
        }
        Err(e) => {
          log::error!("Backend read error: {}", e);
          break;
        }
      }
    }

    // Whatever is still waiting will never get a reply.
    let orphaned: Vec<CallId> = {
      let mut state = state.lock();
      state.connected = false;
      let calls: Vec<CallId> = state.pending.keys().copied().collect();
      for call in &calls {
        state.resolve(*call);
      }
      calls
    };
    for call in orphaned {
      let _ = incoming_tx.try_send(Incoming::Reply {
        call,
        reply: PlayReply::Error("disconnected".to_string()),
      });
    }
  }

  fn handle_line(line: &str, state: &Mutex<SocketState>, incoming_tx: &Sender<Incoming>) {
    match WireMessage::parse(line) {
      Ok(WireMessage::Reply(reply)) => {
        let call = CallId(reply.request_id);
        if !state.lock().resolve(call) {
          log::debug!("Dropping reply for unknown or cancelled call {}", call);
          return;
        }
        log::debug!("Backend reply for call {}: {}", call, reply.error);
        let _ = incoming_tx.try_send(Incoming::Reply {
          call,
          reply: reply.into_play_reply(),
        });
      }
      Ok(WireMessage::MalformedReply { request_id }) => {
        let call = CallId(request_id);
        if !state.lock().resolve(call) {
          log::debug!("Dropping malformed reply for unknown or cancelled call {}", call);
          return;
        }
        log::warn!("Malformed backend reply for call {}: {}", call, line);
        let _ = incoming_tx.try_send(Incoming::Reply {
          call,
          reply: PlayReply::Malformed,
        });
      }
      Ok(WireMessage::Signal(signal)) => {
        if !state.lock().subscriptions.contains(&signal.signal) {
          return;
        }
        match signal.status() {
          Some(status) => {
            log::debug!("Backend signal {}: {:?}", signal.signal, status);
            let _ = incoming_tx.try_send(Incoming::Status(status));
          }
          None => log::warn!("Malformed {} signal: {:?}", signal.signal, signal.args),
        }
      }
      Err(e) => {
        log::warn!("Failed to parse backend message: {} - {}", e, line);
      }
    }
  }

  async fn writer_loop<W: tokio::io::AsyncWrite + Unpin>(
    mut writer: W,
    write_rx: Receiver<WriteMessage>,
  ) {
    log::debug!("Backend writer loop started");

    while let Ok(msg) = write_rx.recv().await {
      match msg {
        WriteMessage::Line(data) => {
          if let Err(e) = writer.write_all(&data).await {
            log::error!("Backend write error: {}", e);
            break;
          }
          if let Err(e) = writer.write_all(b"\n").await {
            log::error!("Backend write newline error: {}", e);
            break;
          }
          if let Err(e) = writer.flush().await {
            log::error!("Backend flush error: {}", e);
            break;
          }
        }
        WriteMessage::Close => {
          log::debug!("Backend writer closing");
          let _ = writer.shutdown().await;
          break;
        }
      }
    }
  }

  fn queue_line(&self, line: String) -> Result<(), TransportError> {
    self
      .write_tx
      .try_send(WriteMessage::Line(line.into_bytes()))
      .map_err(|_| TransportError::Disconnected)
  }

  fn arm_timeout(&self, call: CallId, timeout: Duration) -> JoinHandle<()> {
    let state = self.state.clone();
    let incoming_tx = self.incoming_tx.clone();
    self.runtime.spawn(async move {
      tokio::time::sleep(timeout).await;
      let expired = state.lock().pending.remove(&call).is_some();
      if expired {
        log::warn!("Backend call {} timed out after {:?}", call, timeout);
        let _ = incoming_tx.try_send(Incoming::Reply {
          call,
          reply: PlayReply::Error("timeout".to_string()),
        });
      }
    })
  }
}

impl Transport for SocketTransport {
  fn send_request(&self, request: &BackendRequest) -> Result<CallId, TransportError> {
    let call = {
      let mut state = self.state.lock();
      if !state.connected {
        return Err(TransportError::Disconnected);
      }
      let call = CallId(state.next_call);
      state.next_call += 1;
      state.pending.insert(call, None);
      call
    };

    let queued = request
      .encode(Some(call.0))
      .map_err(TransportError::from)
      .and_then(|line| {
        log::debug!("Sending backend call {}: {}", call, line);
        self.queue_line(line)
      });
    if let Err(e) = queued {
      self.state.lock().pending.remove(&call);
      return Err(e);
    }

    if let Some(timeout) = self.call_timeout {
      let timer = self.arm_timeout(call, timeout);
      let mut state = self.state.lock();
      match state.pending.get_mut(&call) {
        Some(slot) => *slot = Some(timer),
        None => timer.abort(),
      }
    }

    Ok(call)
  }

  fn send_oneway(&self, request: &BackendRequest) -> Result<(), TransportError> {
    if !self.state.lock().connected {
      return Err(TransportError::Disconnected);
    }
    let line = request.encode(None)?;
    log::debug!("Sending backend directive: {}", line);
    self.queue_line(line)
  }

  fn cancel(&self, call: CallId) {
    if self.state.lock().resolve(call) {
      log::debug!("Cancelled backend call {}", call);
    }
  }

  fn subscribe(&self, signal: &str) -> Result<(), TransportError> {
    let mut state = self.state.lock();
    if !state.connected {
      return Err(TransportError::Disconnected);
    }
    state.subscriptions.insert(signal.to_string());
    Ok(())
  }

  fn unsubscribe(&self, signal: &str) {
    self.state.lock().subscriptions.remove(signal);
  }

  fn incoming(&self) -> Option<Receiver<Incoming>> {
    Some(self.incoming_rx.clone())
  }

  fn is_connected(&self) -> bool {
    self.state.lock().connected
  }

  fn close(&self) {
    let _ = self.write_tx.try_send(WriteMessage::Close);
    self.write_tx.close();
    self.shutdown.cancel();
    let mut state = self.state.lock();
    state.connected = false;
    for (_, timer) in state.pending.drain() {
      if let Some(timer) = timer {
        timer.abort();
      }
    }
  }
}

impl Drop for SocketTransport {
  fn drop(&mut self) {
    if !self.shutdown.is_cancelled() {
      self.close();
    }
  }
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use crate::transport::protocol::WireCommand;
  use crate::transport::StatusSignal;
  use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
  use tokio::net::{UnixListener, UnixStream};

  fn socket_path() -> String {
    std::env::temp_dir()
      .join(format!("feedback-test-{}.sock", uuid::Uuid::new_v4()))
      .to_string_lossy()
      .into_owned()
  }

  async fn recv(rx: &Receiver<Incoming>) -> Incoming {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
      .await
      .expect("timed out waiting for incoming message")
      .expect("incoming channel closed")
  }

  async fn read_command(lines: &mut tokio::io::Lines<BufReader<UnixStream>>) -> WireCommand {
    let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
      .await
      .expect("timed out waiting for command")
      .unwrap()
      .expect("client closed connection");
    serde_json::from_str(&line).unwrap()
  }

  #[tokio::test]
  async fn test_call_reply_and_signal() {
    let path = socket_path();
    let listener = UnixListener::bind(&path).unwrap();

    let transport = SocketTransport::connect(&path, 3, None).await.unwrap();
    transport.subscribe("Status").unwrap();
    let incoming = transport.incoming().unwrap();

    let (stream, _) = listener.accept().await.unwrap();
    let (_read_half, mut write_half) = stream.into_split();

    let call = transport.send_request(&BackendRequest::play("sms", None)).unwrap();
    assert_eq!(call, CallId(1));

    let reply = format!(r#"{{"request_id":{},"error":"success","data":9}}"#, call.0);
    write_half.write_all(reply.as_bytes()).await.unwrap();
    write_half.write_all(b"\n").await.unwrap();
    write_half
      .write_all(b"{\"signal\":\"Status\",\"args\":[9,2]}\n")
      .await
      .unwrap();

    assert_eq!(
      recv(&incoming).await,
      Incoming::Reply {
        call,
        reply: PlayReply::Handle(9)
      }
    );
    assert_eq!(
      recv(&incoming).await,
      Incoming::Status(StatusSignal { handle: 9, state: 2 })
    );

    transport.close();
    let _ = std::fs::remove_file(&path);
  }

  #[tokio::test]
  async fn test_commands_written_in_order() {
    let path = socket_path();
    let listener = UnixListener::bind(&path).unwrap();

    let transport = SocketTransport::connect(&path, 3, None).await.unwrap();
    let (stream, _) = listener.accept().await.unwrap();
    let mut lines = BufReader::new(stream).lines();

    transport.send_request(&BackendRequest::play("ringtone", None)).unwrap();
    transport.send_oneway(&BackendRequest::pause(5, true)).unwrap();
    transport.send_oneway(&BackendRequest::stop(5)).unwrap();

    let play = read_command(&mut lines).await;
    assert_eq!(play.command[0], "Play");
    assert_eq!(play.request_id, Some(1));

    let pause = read_command(&mut lines).await;
    assert_eq!(
      serde_json::Value::from(pause.command),
      serde_json::json!(["Pause", 5, true])
    );
    assert_eq!(pause.request_id, None);

    let stop = read_command(&mut lines).await;
    assert_eq!(
      serde_json::Value::from(stop.command),
      serde_json::json!(["Stop", 5])
    );

    transport.close();
    let _ = std::fs::remove_file(&path);
  }

  #[tokio::test]
  async fn test_unsubscribed_signals_and_cancelled_replies_dropped() {
    let path = socket_path();
    let listener = UnixListener::bind(&path).unwrap();

    let transport = SocketTransport::connect(&path, 3, None).await.unwrap();
    let incoming = transport.incoming().unwrap();
    let (stream, _) = listener.accept().await.unwrap();
    let (_read_half, mut write_half) = stream.into_split();

    let cancelled = transport.send_request(&BackendRequest::play("sms", None)).unwrap();
    let kept = transport.send_request(&BackendRequest::play("sms", None)).unwrap();
    transport.cancel(cancelled);

    // Not subscribed yet, so this signal is filtered out.
    write_half
      .write_all(b"{\"signal\":\"Status\",\"args\":[1,1]}\n")
      .await
      .unwrap();
    let replies = format!(
      "{{\"request_id\":{},\"error\":\"success\",\"data\":1}}\n{{\"request_id\":{},\"error\":\"success\",\"data\":2}}\n",
      cancelled.0, kept.0
    );
    write_half.write_all(replies.as_bytes()).await.unwrap();

    assert_eq!(
      recv(&incoming).await,
      Incoming::Reply {
        call: kept,
        reply: PlayReply::Handle(2)
      }
    );
    assert!(incoming.try_recv().is_err());

    transport.close();
    let _ = std::fs::remove_file(&path);
  }

  #[tokio::test]
  async fn test_undecodable_reply_resolves_call() {
    let path = socket_path();
    let listener = UnixListener::bind(&path).unwrap();

    let transport = SocketTransport::connect(&path, 3, None).await.unwrap();
    let incoming = transport.incoming().unwrap();
    let (stream, _) = listener.accept().await.unwrap();
    let (_read_half, mut write_half) = stream.into_split();

    let call = transport.send_request(&BackendRequest::play("sms", None)).unwrap();
    let reply = format!("{{\"request_id\":{},\"data\":5}}\n", call.0);
    write_half.write_all(reply.as_bytes()).await.unwrap();

    assert_eq!(
      recv(&incoming).await,
      Incoming::Reply {
        call,
        reply: PlayReply::Malformed
      }
    );
    assert!(!transport.state.lock().pending.contains_key(&call));
    assert!(transport.is_connected());

    transport.close();
    let _ = std::fs::remove_file(&path);
  }

  #[tokio::test]
  async fn test_invalid_utf8_line_keeps_connection() {
    let path = socket_path();
    let listener = UnixListener::bind(&path).unwrap();

    let transport = SocketTransport::connect(&path, 3, None).await.unwrap();
    transport.subscribe("Status").unwrap();
    let incoming = transport.incoming().unwrap();
    let (stream, _) = listener.accept().await.unwrap();
    let (_read_half, mut write_half) = stream.into_split();

    let call = transport.send_request(&BackendRequest::play("sms", None)).unwrap();
    write_half
      .write_all(b"{\"signal\":\"Status\",\"args\":[1,2],\"x\":\"\xff\"}\n")
      .await
      .unwrap();
    let reply = format!("{{\"request_id\":{},\"error\":\"success\",\"data\":7}}\n", call.0);
    write_half.write_all(reply.as_bytes()).await.unwrap();

    assert_eq!(
      recv(&incoming).await,
      Incoming::Reply {
        call,
        reply: PlayReply::Handle(7)
      }
    );
    assert!(transport.is_connected());
    assert!(transport.send_request(&BackendRequest::play("sms", None)).is_ok());

    transport.close();
    let _ = std::fs::remove_file(&path);
  }

  #[tokio::test]
  async fn test_call_timeout() {
    let path = socket_path();
    let listener = UnixListener::bind(&path).unwrap();

    let transport = SocketTransport::connect(&path, 3, Some(Duration::from_millis(50)))
      .await
      .unwrap();
    let incoming = transport.incoming().unwrap();
    let (_stream, _) = listener.accept().await.unwrap();

    let call = transport.send_request(&BackendRequest::play("sms", None)).unwrap();
    assert_eq!(
      recv(&incoming).await,
      Incoming::Reply {
        call,
        reply: PlayReply::Error("timeout".to_string())
      }
    );

    transport.close();
    let _ = std::fs::remove_file(&path);
  }

  #[tokio::test]
  async fn test_disconnect_fails_pending_calls() {
    let path = socket_path();
    let listener = UnixListener::bind(&path).unwrap();

    let transport = SocketTransport::connect(&path, 3, None).await.unwrap();
    let incoming = transport.incoming().unwrap();
    let (stream, _) = listener.accept().await.unwrap();

    let call = transport.send_request(&BackendRequest::play("sms", None)).unwrap();
    drop(stream);

    assert_eq!(
      recv(&incoming).await,
      Incoming::Reply {
        call,
        reply: PlayReply::Error("disconnected".to_string())
      }
    );
    assert!(!transport.is_connected());
    assert!(matches!(
      transport.send_request(&BackendRequest::play("sms", None)),
      Err(TransportError::Disconnected)
    ));

    let _ = std::fs::remove_file(&path);
  }

  #[tokio::test]
  async fn test_connect_failure() {
    let path = socket_path();
    let result = SocketTransport::connect(&path, 1, None).await;
    assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
  }
}
