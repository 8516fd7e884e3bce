use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::protocol::{
  ErrorObject, HandlerResult, Request, Response, codes, encode_line, parse_request,
};

/// Lines longer than this are answered with an invalid-request error and dropped.
const MAX_LINE_LENGTH: usize = 1024 * 1024;
/// How long a closing connection waits for in-flight responses.
const WRITER_DRAIN: Duration = Duration::from_secs(1);
/// Outbound lines buffered per client; a client that falls this far behind
/// on broadcasts is disconnected.
const CLIENT_QUEUE: usize = 256;

pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;
pub type Handler = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

/// Dropping the slot wakes the connection through `_evict`.
struct ClientSlot {
  tx: mpsc::Sender<String>,
  _evict: oneshot::Sender<()>,
}

enum Frame {
  Line(String),
  Invalid(ErrorObject),
  Eof,
}

struct ServerInner {
  socket_path: PathBuf,
  methods: Mutex<HashMap<String, Handler>>,
  clients: Mutex<HashMap<u64, ClientSlot>>,
  next_client: AtomicU64,
  shutdown: watch::Sender<bool>,
  accept_task: Mutex<Option<JoinHandle<()>>>,
}

/// Line-delimited JSON-RPC server on a Unix domain socket.
#[derive(Clone)]
pub struct IpcServer {
  inner: Arc<ServerInner>,
}

impl IpcServer {
  pub fn new(socket_path: impl Into<PathBuf>) -> Self {
    let (shutdown, _) = watch::channel(false);
    Self {
      inner: Arc::new(ServerInner {
        socket_path: socket_path.into(),
        methods: Mutex::new(HashMap::new()),
        clients: Mutex::new(HashMap::new()),
        next_client: AtomicU64::new(1),
        shutdown,
        accept_task: Mutex::new(None),
      }),
    }
  }

  pub fn socket_path(&self) -> &Path {
    &self.inner.socket_path
  }

  pub fn register_method<F, Fut>(&self, name: impl Into<String>, handler: F)
  where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
  {
    let handler: Handler = Arc::new(move |params: Value| -> HandlerFuture { Box::pin(handler(params)) });
    self.inner.methods.lock().insert(name.into(), handler);
  }

  pub fn register_methods(&self, methods: impl IntoIterator<Item = (String, Handler)>) {
    self.inner.methods.lock().extend(methods);
  }

  /// Bind the socket (owner-only permissions) and start accepting clients.
  pub fn start(&self) -> io::Result<()> {
    let path = &self.inner.socket_path;
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent)?;
    }
    match fs::remove_file(path) {
      Ok(()) => debug!(event = "ipc_stale_socket_removed", path = %path.display()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => return Err(e),
    }
    let listener = UnixListener::bind(path)?;
    {
      use std::os::unix::fs::PermissionsExt;
      fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    info!(event = "ipc_listening", socket = %path.display(), "ipc server listening");

    let server = self.clone();
    let mut shutdown_rx = self.inner.shutdown.subscribe();
    let task = tokio::spawn(async move {
      loop {
        tokio::select! {
          _ = stopped(&mut shutdown_rx) => break,
          res = listener.accept() => match res {
            Ok((stream, _addr)) => {
              let server = server.clone();
              tokio::spawn(async move { server.serve_connection(stream).await });
            }
            Err(e) => {
              error!(event = "ipc_accept_failed", error = %e, "accept error");
              break;
            }
          }
        }
      }
      debug!(event = "ipc_accept_loop_stopped");
    });
    *self.inner.accept_task.lock() = Some(task);
    Ok(())
  }

  /// Push a notification to every connected client.
  pub fn broadcast(&self, method: &str, params: Value) {
    let line = match encode_line(&Request::new(method, params, None)) {
      Ok(line) => line,
      Err(e) => {
        warn!(event = "ipc_broadcast_encode_failed", method, error = %e);
        return;
      }
    };
    let mut clients = self.inner.clients.lock();
    clients.retain(|id, slot| match slot.tx.try_send(line.clone()) {
      Ok(()) => true,
      Err(mpsc::error::TrySendError::Full(_)) => {
        warn!(event = "ipc_client_evicted", client = *id, method, "client queue full");
        false
      }
      Err(mpsc::error::TrySendError::Closed(_)) => false,
    });
    debug!(event = "ipc_broadcast", method, clients = clients.len());
  }

  pub fn client_count(&self) -> usize {
    self.inner.clients.lock().len()
  }

  /// Disconnect clients, stop accepting, and remove the socket file.
  pub async fn stop(&self) {
    self.inner.shutdown.send_replace(true);
    self.inner.clients.lock().clear();
    let task = self.inner.accept_task.lock().take();
    if let Some(task) = task {
      let _ = task.await;
    }
    match fs::remove_file(&self.inner.socket_path) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => warn!(event = "ipc_socket_remove_failed", error = %e),
    }
    info!(event = "ipc_stopped", socket = %self.inner.socket_path.display(), "ipc server stopped");
  }

  async fn serve_connection(&self, stream: UnixStream) {
    let client_id = self.inner.next_client.fetch_add(1, Ordering::Relaxed);
    let (reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<String>(CLIENT_QUEUE);
    let (evict, mut evicted) = oneshot::channel::<()>();
    self.inner.clients.lock().insert(
      client_id,
      ClientSlot {
        tx: tx.clone(),
        _evict: evict,
      },
    );
    debug!(event = "ipc_client_connected", client = client_id);

    let mut writer_task = tokio::spawn(async move {
      while let Some(line) = rx.recv().await {
        if writer.write_all(line.as_bytes()).await.is_err() {
          break;
        }
      }
      let _ = writer.shutdown().await;
    });

    let mut shutdown_rx = self.inner.shutdown.subscribe();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
      let frame = tokio::select! {
        _ = stopped(&mut shutdown_rx) => break,
        _ = &mut evicted => break,
        frame = read_frame(&mut reader, &mut buf) => match frame {
          Ok(frame) => frame,
          Err(e) => {
            debug!(event = "ipc_read_failed", client = client_id, error = %e);
            break;
          }
        }
      };
      let line = match frame {
        Frame::Eof => break,
        Frame::Line(line) if line.trim().is_empty() => continue,
        Frame::Line(line) => line,
        Frame::Invalid(error) => {
          debug!(event = "ipc_bad_frame", client = client_id, message = %error.message);
          if let Ok(out) = encode_line(&Response::failure(Value::Null, error)) {
            let _ = tx.send(out).await;
          }
          continue;
        }
      };
      // Each request runs on its own task so a slow handler never stalls the connection
      let server = self.clone();
      let tx = tx.clone();
      tokio::spawn(async move {
        if let Some(response) = server.dispatch(&line).await {
          match encode_line(&response) {
            Ok(out) => {
              let _ = tx.send(out).await;
            }
            Err(e) => warn!(event = "ipc_encode_failed", error = %e),
          }
        }
      });
    }

    self.inner.clients.lock().remove(&client_id);
    drop(tx);
    drop(reader);
    // The writer drains once in-flight handlers drop their senders
    if tokio::time::timeout(WRITER_DRAIN, &mut writer_task).await.is_err() {
      writer_task.abort();
    }
    debug!(event = "ipc_client_disconnected", client = client_id);
  }

  /// Handle one raw line. Returns the response to send, if any.
  pub async fn dispatch(&self, line: &str) -> Option<Response> {
    let request = match parse_request(line) {
      Ok(request) => request,
      Err((id, error)) => {
        debug!(event = "ipc_bad_request", code = error.code, message = %error.message);
        return Some(Response::failure(id, error));
      }
    };

    let handler = self.inner.methods.lock().get(&request.method).cloned();
    let Some(handler) = handler else {
      debug!(event = "ipc_unknown_method", method = %request.method);
      let id = request.id?;
      return Some(Response::failure(
        id,
        ErrorObject::new(
          codes::METHOD_NOT_FOUND,
          format!("method not found: {}", request.method),
        ),
      ));
    };

    let outcome = handler(request.params).await;
    if let Err(err) = &outcome {
      debug!(event = "ipc_handler_error", method = %request.method, error = %err);
    }
    let id = request.id?;
    Some(match outcome {
      Ok(result) => Response::success(id, result),
      Err(err) => Response::failure(id, err.to_error_object()),
    })
  }
}

async fn stopped(rx: &mut watch::Receiver<bool>) {
  // Also true for connections that subscribe after stop() already fired
  let _ = rx.wait_for(|stop| *stop).await;
}

/// Read one newline-terminated frame, never buffering more than
/// `MAX_LINE_LENGTH` bytes of it.
async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<Frame>
where
  R: AsyncBufRead + Unpin,
{
  buf.clear();
  let limit = MAX_LINE_LENGTH as u64 + 1;
  let n = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
  if n == 0 {
    return Ok(Frame::Eof);
  }
  if buf.last() == Some(&b'\n') {
    buf.pop();
  } else if n as u64 >= limit {
    discard_line(reader).await?;
    return Ok(Frame::Invalid(ErrorObject::new(
      codes::INVALID_REQUEST,
      "message too large",
    )));
  }
  if buf.last() == Some(&b'\r') {
    buf.pop();
  }
  match String::from_utf8(std::mem::take(buf)) {
    Ok(line) => Ok(Frame::Line(line)),
    Err(_) => Ok(Frame::Invalid(ErrorObject::new(
      codes::PARSE_ERROR,
      "parse error: invalid utf-8",
    ))),
  }
}

/// Skip input up to and including the next newline.
async fn discard_line<R>(reader: &mut R) -> io::Result<()>
where
  R: AsyncBufRead + Unpin,
{
  loop {
    let chunk = reader.fill_buf().await?;
    if chunk.is_empty() {
      return Ok(());
    }
    if let Some(pos) = chunk.iter().position(|b| *b == b'\n') {
      reader.consume(pos + 1);
      return Ok(());
    }
    let len = chunk.len();
    reader.consume(len);
  }
}
