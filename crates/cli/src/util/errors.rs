use std::path::Path;

use conductor_core::rpc::ClientError;

pub fn render_client_failure(action: &str, sock: &Path, err: &ClientError) -> String {
  match err {
    ClientError::NotRunning(_) | ClientError::NotAccepting(_) => format!(
      "{} failed: daemon not reachable at {}.",
      action,
      sock.display()
    ),
    ClientError::Rpc { message, .. } => format!("{action} failed: {message}"),
    _ => format!("{} failed: {}", action, err),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::path::PathBuf;

  #[test]
  fn unreachable_daemon_names_the_socket() {
    let sock = PathBuf::from("/tmp/c.sock");
    let msg = render_client_failure("submit", &sock, &ClientError::NotRunning(sock.clone()));
    assert_eq!(msg, "submit failed: daemon not reachable at /tmp/c.sock.");
  }

  #[test]
  fn rpc_errors_show_the_daemon_message() {
    let err = ClientError::Rpc {
      code: -32602,
      message: "task 9 not found".to_string(),
      data: None,
    };
    let msg = render_client_failure("get", &PathBuf::from("/x"), &err);
    assert_eq!(msg, "get failed: task 9 not found");
  }
}
