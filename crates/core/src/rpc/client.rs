use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use super::protocol::{ErrorObject, Request, encode_line};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ClientError {
  #[error("daemon is not running (no socket at {})", .0.display())]
  NotRunning(PathBuf),
  #[error("daemon is not accepting connections at {}", .0.display())]
  NotAccepting(PathBuf),
  #[error("io: {0}")]
  Io(#[from] io::Error),
  #[error("request `{method}` timed out after {}ms", .timeout.as_millis())]
  Timeout { method: String, timeout: Duration },
  #[error("connection to daemon closed")]
  ConnectionClosed,
  #[error("rpc error {code}: {message}")]
  Rpc {
    code: i64,
    message: String,
    data: Option<Value>,
  },
  #[error("json: {0}")]
  Json(#[from] serde_json::Error),
}

impl From<ErrorObject> for ClientError {
  fn from(e: ErrorObject) -> Self {
    ClientError::Rpc {
      code: e.code,
      message: e.message,
      data: e.data,
    }
  }
}

/// Server-initiated message without an id.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Notification {
  pub method: String,
  #[serde(default)]
  pub params: Value,
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, ClientError>>>>>;

/// Connection to the daemon. Requests may be issued concurrently.
pub struct IpcClient {
  writer: tokio::sync::Mutex<OwnedWriteHalf>,
  pending: Pending,
  next_id: AtomicU64,
  closed: Arc<AtomicBool>,
  notifications: Mutex<Option<mpsc::UnboundedReceiver<Notification>>>,
  reader: JoinHandle<()>,
}

impl IpcClient {
  pub async fn connect(socket_path: &Path) -> Result<Self, ClientError> {
    let stream = UnixStream::connect(socket_path)
      .await
      .map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => ClientError::NotRunning(socket_path.to_path_buf()),
        io::ErrorKind::ConnectionRefused => ClientError::NotAccepting(socket_path.to_path_buf()),
        _ => ClientError::Io(e),
      })?;
    let (read_half, write_half) = stream.into_split();
    let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
    let closed = Arc::new(AtomicBool::new(false));
    let (notify_tx, notify_rx) = mpsc::unbounded_channel();
    let reader = tokio::spawn(read_loop(read_half, pending.clone(), closed.clone(), notify_tx));
    Ok(Self {
      writer: tokio::sync::Mutex::new(write_half),
      pending,
      next_id: AtomicU64::new(1),
      closed,
      notifications: Mutex::new(Some(notify_rx)),
      reader,
    })
  }

  /// Send a request and wait up to `timeout` for its response.
  pub async fn request(&self, method: &str, params: Value, timeout: Duration) -> Result<Value, ClientError> {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let (tx, rx) = oneshot::channel();
    self.pending.lock().insert(id, tx);
    // The reader may have drained the map just before the insert
    if self.closed.load(Ordering::SeqCst) {
      self.pending.lock().remove(&id);
      return Err(ClientError::ConnectionClosed);
    }

    let line = encode_line(&Request::new(method, params, Some(Value::from(id))))?;
    if let Err(e) = self.write(&line).await {
      self.pending.lock().remove(&id);
      return Err(e);
    }

    match tokio::time::timeout(timeout, rx).await {
      Ok(Ok(result)) => result,
      Ok(Err(_)) => Err(ClientError::ConnectionClosed),
      Err(_) => {
        self.pending.lock().remove(&id);
        Err(ClientError::Timeout {
          method: method.to_string(),
          timeout,
        })
      }
    }
  }

  /// Like [`IpcClient::request`] with the default timeout and a typed result.
  pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ClientError> {
    let value = self.request(method, params, DEFAULT_TIMEOUT).await?;
    Ok(serde_json::from_value(value)?)
  }

  /// Fire-and-forget.
  pub async fn notify(&self, method: &str, params: Value) -> Result<(), ClientError> {
    let line = encode_line(&Request::new(method, params, None))?;
    self.write(&line).await
  }

  /// Inbound notifications. Can be taken once.
  pub fn take_notifications(&self) -> Option<mpsc::UnboundedReceiver<Notification>> {
    self.notifications.lock().take()
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::SeqCst)
  }

  async fn write(&self, line: &str) -> Result<(), ClientError> {
    if self.is_closed() {
      return Err(ClientError::ConnectionClosed);
    }
    let mut writer = self.writer.lock().await;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
  }
}

impl Drop for IpcClient {
  fn drop(&mut self) {
    self.reader.abort();
  }
}

#[derive(Deserialize)]
struct Incoming {
  #[serde(default)]
  id: Option<Value>,
  #[serde(default)]
  method: Option<String>,
  #[serde(default)]
  params: Value,
  #[serde(default)]
  result: Option<Value>,
  #[serde(default)]
  error: Option<ErrorObject>,
}

async fn read_loop(
  reader: OwnedReadHalf,
  pending: Pending,
  closed: Arc<AtomicBool>,
  notify_tx: mpsc::UnboundedSender<Notification>,
) {
  let mut lines = BufReader::new(reader).lines();
  while let Ok(Some(line)) = lines.next_line().await {
    let msg: Incoming = match serde_json::from_str(&line) {
      Ok(msg) => msg,
      Err(e) => {
        debug!(event = "ipc_client_bad_message", error = %e);
        continue;
      }
    };
    match (msg.id.as_ref().and_then(Value::as_u64), msg.method) {
      (Some(id), None) => {
        let waiter = pending.lock().remove(&id);
        if let Some(waiter) = waiter {
          let outcome = match msg.error {
            Some(error) => Err(error.into()),
            None => Ok(msg.result.unwrap_or(Value::Null)),
          };
          let _ = waiter.send(outcome);
        }
      }
      (None, Some(method)) if msg.id.is_none() => {
        let _ = notify_tx.send(Notification {
          method,
          params: msg.params,
        });
      }
      _ => {
        // Error responses to unparseable requests carry a null id
        if let Some(error) = msg.error {
          debug!(event = "ipc_client_uncorrelated_error", code = error.code, message = %error.message);
        }
      }
    }
  }

  closed.store(true, Ordering::SeqCst);
  let waiters: Vec<_> = pending.lock().drain().map(|(_, tx)| tx).collect();
  for waiter in waiters {
    let _ = waiter.send(Err(ClientError::ConnectionClosed));
  }
  debug!(event = "ipc_client_reader_stopped");
}
