use std::path::Path;
use std::time::Duration;

use clap::Parser;
use cli::args::Cli;
use pretty_assertions::assert_eq;
use serde_json::Value;
use test_support::{TempConductor, poll_until};

async fn run(socket: &Path, argv: &[&str]) -> anyhow::Result<String> {
  yansi::disable();
  let mut full = vec!["conductor", "--socket", socket.to_str().unwrap()];
  full.extend_from_slice(argv);
  let cli = Cli::try_parse_from(full).expect("parses");
  let mut out = Vec::new();
  cli::execute(cli, &mut out).await?;
  Ok(String::from_utf8(out).unwrap())
}

async fn ok(socket: &Path, argv: &[&str]) -> String {
  run(socket, argv).await.expect("command succeeds")
}

#[tokio::test(flavor = "multi_thread")]
async fn stopped_daemon_is_reported_not_raised() {
  let td = tempfile::tempdir().unwrap();
  let sock = td.path().join("none.sock");
  assert_eq!(ok(&sock, &["daemon", "status"]).await, "daemon: stopped\n");
  assert_eq!(ok(&sock, &["daemon", "stop"]).await, "daemon: stopped\n");

  let err = run(&sock, &["ping"]).await.unwrap_err();
  assert_eq!(
    err.to_string(),
    format!("ping failed: daemon not reachable at {}.", sock.display())
  );
}

#[tokio::test(flavor = "multi_thread")]
async fn task_commands_round_trip() {
  let env = TempConductor::new();
  let handle = env.start().await;
  let sock = env.socket_path();

  let status = ok(&sock, &["daemon", "status"]).await;
  assert!(status.starts_with("daemon: running"));
  assert!(status.contains("health: ok"));
  assert_eq!(ok(&sock, &["ping"]).await, "pong\n");

  assert_eq!(ok(&sock, &["submit", "echo from cli"]).await, "queued task #1\n");
  let done = poll_until(Duration::from_secs(10), Duration::from_millis(25), || {
    let sock = sock.clone();
    async move {
      ok(&sock, &["list", "--state", "completed"])
        .await
        .contains("#1")
    }
  })
  .await;
  assert!(done, "task #1 never completed");

  let detail = ok(&sock, &["get", "1"]).await;
  assert!(detail.contains("result:    from cli"));
  assert!(detail.contains("output:\n  from cli"));

  let stats = ok(&sock, &["stats"]).await;
  assert_eq!(stats, "total 1: 0 queued, 0 running, 1 completed, 0 failed, 0 cancelled\n");

  let raw = ok(&sock, &["--json", "get", "1"]).await;
  let task: Value = serde_json::from_str(&raw).unwrap();
  assert_eq!(task["state"], "completed");

  assert_eq!(ok(&sock, &["cancel", "1"]).await, "task #1 is not queued or running\n");
  let err = run(&sock, &["get", "42"]).await.unwrap_err();
  assert_eq!(err.to_string(), "get failed: task 42 not found");
  let err = run(&sock, &["submit", "x", "--agent", "nobody"]).await.unwrap_err();
  assert!(err.to_string().contains("unknown agent"));

  assert_eq!(ok(&sock, &["chat", "echo hi"]).await, "chat queued as task #2\n");

  handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn automation_and_event_commands() {
  let env = TempConductor::new();
  env.write_rules(
    r#"
- id: on-build
  trigger: { type: build.finished }
  action: { type: agent, prompt: "echo built" }
  cooldownMs: 60000
"#,
  );
  let handle = env.start().await;
  let sock = env.socket_path();

  let status = ok(&sock, &["automation", "status"]).await;
  assert!(status.starts_with("automation: on (1 rules, 1 enabled)"));
  assert!(status.contains("[x] on-build  on build.finished  -> agent  (cooldown 60000ms)"));

  assert_eq!(ok(&sock, &["automation", "disable", "on-build"]).await, "rule `on-build` disabled\n");
  assert_eq!(ok(&sock, &["automation", "enable", "on-build"]).await, "rule `on-build` enabled\n");
  assert_eq!(ok(&sock, &["automation", "disable"]).await, "automation disabled\n");
  assert_eq!(ok(&sock, &["automation", "enable"]).await, "automation enabled\n");
  assert!(run(&sock, &["automation", "enable", "ghost"]).await.is_err());

  assert_eq!(ok(&sock, &["events", "dead-letters"]).await, "no dead letters\n");
  assert_eq!(
    ok(&sock, &["events", "publish", "build.finished", "--payload", r#"{"n":1}"#]).await,
    "published build.finished\n"
  );

  let logged = poll_until(Duration::from_secs(10), Duration::from_millis(25), || {
    let sock = sock.clone();
    async move { ok(&sock, &["automation", "log"]).await.contains("on-build") }
  })
  .await;
  assert!(logged, "rule execution never logged");
  let history = ok(&sock, &["events", "history", "--limit", "10"]).await;
  assert!(history.contains("cli  build.finished"));

  assert_eq!(ok(&sock, &["automation", "reload"]).await, "loaded 1 rules\n");

  handle.shutdown().await;
}
