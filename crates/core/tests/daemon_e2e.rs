use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use conductor_core::adapters::fs as fsutil;
use conductor_core::config::{ApprovalMode, LogLevel};
use conductor_core::daemon::{self, DaemonError};
use conductor_core::domain::task::{Task, TaskId, TaskState};
use conductor_core::logging;
use conductor_core::rpc::protocol::codes;
use conductor_core::rpc::{
  ClientError, DaemonStatus, Health, IpcClient, PingResult, SubmitResult, methods, notifications,
};
use conductor_core::store::{NewTask, TaskStats, TaskStore};
use serde_json::{Value, json};
use test_support::{TempConductor, poll_until};

static LOG_DIR: OnceLock<tempfile::TempDir> = OnceLock::new();

fn ensure_logging_once() -> PathBuf {
  let td = LOG_DIR.get_or_init(|| tempfile::tempdir().unwrap());
  let log_path = fsutil::logs_path(td.path());
  logging::init(&log_path, LogLevel::Debug).unwrap();
  log_path
}

async fn wait_for_state(client: &IpcClient, id: TaskId, state: TaskState) -> Task {
  let ok = poll_until(Duration::from_secs(10), Duration::from_millis(25), move || async move {
    let task: Task = client
      .call(methods::TASK_GET, json!({ "taskId": id }))
      .await
      .unwrap();
    task.state == state
  })
  .await;
  assert!(ok, "task {id} never reached {state}");
  client
    .call(methods::TASK_GET, json!({ "taskId": id }))
    .await
    .unwrap()
}

fn rpc_code(err: ClientError) -> i64 {
  match err {
    ClientError::Rpc { code, .. } => code,
    other => panic!("expected rpc error, got {other:?}"),
  }
}

#[tokio::test(flavor = "multi_thread")]
async fn status_submit_and_query_tasks() {
  let log_path = ensure_logging_once();
  let env = TempConductor::new();
  let handle = env.start().await;
  let client = env.connect().await;

  let status: DaemonStatus = client.call(methods::DAEMON_STATUS, Value::Null).await.unwrap();
  assert_eq!(status.pid, std::process::id());
  assert_eq!(status.health, Health::Ok);
  assert!(status.supervisor.accepting);
  assert_eq!(status.tasks, TaskStats::default());

  let ping: PingResult = client.call(methods::PING, Value::Null).await.unwrap();
  assert!(ping.pong);

  let submitted: SubmitResult = client
    .call(methods::TASK_SUBMIT, json!({ "prompt": "echo hello from agent" }))
    .await
    .unwrap();
  assert_eq!(submitted.state, TaskState::Queued);

  let done = wait_for_state(&client, submitted.task_id, TaskState::Completed).await;
  assert_eq!(done.result.as_deref(), Some("hello from agent"));
  assert_eq!(done.output, "hello from agent\n");
  assert!(done.pid.is_none());

  let listed: Vec<Task> = client
    .call(methods::TASK_LIST, json!({ "state": "completed" }))
    .await
    .unwrap();
  assert_eq!(listed.len(), 1);
  assert!(listed[0].output.is_empty(), "list omits captured output");

  let stats: TaskStats = client.call(methods::TASK_STATS, Value::Null).await.unwrap();
  assert_eq!(stats.total, 1);
  assert_eq!(stats.completed, 1);

  let missing = client
    .call::<Task>(methods::TASK_GET, json!({ "taskId": 999 }))
    .await
    .unwrap_err();
  assert_eq!(rpc_code(missing), codes::INVALID_PARAMS);
  let no_prompt = client
    .call::<Value>(methods::TASK_SUBMIT, json!({}))
    .await
    .unwrap_err();
  assert_eq!(rpc_code(no_prompt), codes::INVALID_PARAMS);
  let bad_agent = client
    .call::<Value>(methods::TASK_SUBMIT, json!({ "prompt": "x", "agent": "nobody" }))
    .await
    .unwrap_err();
  assert_eq!(rpc_code(bad_agent), codes::INVALID_PARAMS);
  let unknown = client.call::<Value>("task.teleport", Value::Null).await.unwrap_err();
  assert_eq!(rpc_code(unknown), codes::METHOD_NOT_FOUND);

  handle.shutdown().await;
  assert!(!env.socket_path().exists());
  // The task file survives the daemon
  let store = TaskStore::new(fsutil::tasks_path(&env.path()));
  store.initialize();
  assert_eq!(store.stats().completed, 1);

  tokio::time::sleep(Duration::from_millis(100)).await;
  let logs = std::fs::read_to_string(&log_path).unwrap_or_default();
  assert!(logs.contains("daemon_started"));
}

#[tokio::test(flavor = "multi_thread")]
async fn chat_messages_jump_the_queue_and_cancel_works() {
  let mut env = TempConductor::new();
  env.config.max_concurrency = 1;
  let handle = env.start().await;
  let client = env.connect().await;

  let blocker: SubmitResult = client
    .call(methods::TASK_SUBMIT, json!({ "prompt": "sleep 30" }))
    .await
    .unwrap();
  wait_for_state(&client, blocker.task_id, TaskState::Running).await;
  let plain: SubmitResult = client
    .call(methods::TASK_SUBMIT, json!({ "prompt": "echo plain" }))
    .await
    .unwrap();
  let chat: SubmitResult = client
    .call(methods::CHAT_SEND, json!({ "message": "echo chat" }))
    .await
    .unwrap();

  let status: DaemonStatus = client.call(methods::DAEMON_STATUS, Value::Null).await.unwrap();
  let queued: Vec<TaskId> = status.supervisor.queued_tasks.iter().map(|t| t.id).collect();
  assert_eq!(queued, vec![chat.task_id, plain.task_id]);
  assert_eq!(status.supervisor.queued_tasks[0].priority, 10);

  let cancelled: Value = client
    .call(methods::TASK_CANCEL, json!({ "taskId": blocker.task_id }))
    .await
    .unwrap();
  assert_eq!(cancelled, json!({ "cancelled": true }));
  wait_for_state(&client, blocker.task_id, TaskState::Cancelled).await;
  let chat_task = wait_for_state(&client, chat.task_id, TaskState::Completed).await;
  assert_eq!(chat_task.metadata.get("source"), Some(&json!("chat")));
  wait_for_state(&client, plain.task_id, TaskState::Completed).await;

  let again: Value = client
    .call(methods::TASK_CANCEL, json!({ "taskId": blocker.task_id }))
    .await
    .unwrap();
  assert_eq!(again, json!({ "cancelled": false }));

  handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn published_events_drive_rules_and_signals() {
  let env = TempConductor::new();
  env.write_rules(
    r#"
rules:
  - id: on-build
    trigger: { type: build.finished, source: ci }
    conditions:
      - { field: payload.status, operator: eq, value: ok }
    action: { type: agent, prompt: "echo built {{payload.target}}" }
  - id: announce
    trigger: { type: task.completed }
    conditions:
      - { field: payload.metadata.ruleId, operator: eq, value: on-build }
    action: { type: notify, message: "task {{payload.taskId}} finished", channel: ops }
  - id: broken
    trigger: {}
"#,
  );
  let handle = env.start().await;
  let client = env.connect().await;
  let mut notes = client.take_notifications().unwrap();

  let automation: Value = client.call(methods::AUTOMATION_STATUS, Value::Null).await.unwrap();
  assert_eq!(automation["ruleCount"], json!(2));

  let accepted: Value = client
    .call(
      methods::EVENTS_PUBLISH,
      json!({ "source": "ci", "type": "build.finished", "payload": { "status": "failed", "target": "x" } }),
    )
    .await
    .unwrap();
  assert_eq!(accepted, json!({ "accepted": true }));
  client
    .call::<Value>(
      methods::EVENTS_PUBLISH,
      json!({ "source": "ci", "type": "build.finished", "payload": { "status": "ok", "target": "web" } }),
    )
    .await
    .unwrap();

  let note = tokio::time::timeout(Duration::from_secs(10), async {
    loop {
      let note = notes.recv().await.expect("notification stream open");
      if note.method == notifications::AUTOMATION_SIGNAL {
        return note;
      }
    }
  })
  .await
  .expect("automation signal");
  assert_eq!(note.params["type"], json!("notify"));
  assert_eq!(note.params["ruleId"], json!("announce"));
  assert_eq!(note.params["channel"], json!("ops"));

  let tasks: Vec<Task> = client.call(methods::TASK_LIST, json!({})).await.unwrap();
  assert_eq!(tasks.len(), 1, "only the ok build starts an agent");
  assert_eq!(tasks[0].result.as_deref(), Some("built web"));
  assert_eq!(tasks[0].metadata.get("ruleId"), Some(&json!("on-build")));
  assert_eq!(
    note.params["message"],
    json!(format!("task {} finished", tasks[0].id))
  );

  let c = &client;
  let logged = poll_until(Duration::from_secs(5), Duration::from_millis(20), || async move {
    let log: Vec<Value> = c.call(methods::AUTOMATION_LOG, json!({ "limit": 10 })).await.unwrap();
    let rules: Vec<&str> = log.iter().filter_map(|r| r["ruleId"].as_str()).collect();
    rules == ["on-build", "announce"]
  })
  .await;
  assert!(logged, "execution log misses a rule run");

  let history: Vec<Value> = client
    .call(methods::EVENTS_HISTORY, json!({ "limit": 50 }))
    .await
    .unwrap();
  assert!(history.iter().any(|e| e["type"] == json!("build.finished")));
  assert!(history.iter().any(|e| e["type"] == json!("task.started")));
  let dead: Vec<Value> = client.call(methods::EVENTS_DEAD_LETTERS, Value::Null).await.unwrap();
  assert!(dead.is_empty());

  handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn rules_can_be_toggled_and_reloaded() {
  let env = TempConductor::new();
  env.write_rules("- { id: first, trigger: { type: a }, action: { type: notify, message: m } }\n");
  let handle = env.start().await;
  let client = env.connect().await;

  let off: Value = client
    .call(methods::AUTOMATION_DISABLE, json!({ "ruleId": "first" }))
    .await
    .unwrap();
  assert_eq!(off, json!({ "enabled": false, "ruleId": "first" }));
  let status: Value = client.call(methods::AUTOMATION_STATUS, Value::Null).await.unwrap();
  assert_eq!(status["enabledRules"], json!(0));

  let unknown = client
    .call::<Value>(methods::AUTOMATION_ENABLE, json!({ "ruleId": "ghost" }))
    .await
    .unwrap_err();
  assert_eq!(rpc_code(unknown), codes::INVALID_PARAMS);

  client.call::<Value>(methods::AUTOMATION_DISABLE, Value::Null).await.unwrap();
  let status: Value = client.call(methods::AUTOMATION_STATUS, Value::Null).await.unwrap();
  assert_eq!(status["enabled"], json!(false));
  client.call::<Value>(methods::AUTOMATION_ENABLE, json!({})).await.unwrap();

  env.write_rules(
    "- { id: first, trigger: { type: a }, action: { type: notify, message: m } }\n\
     - { id: second, trigger: { type: b }, action: { type: notify, message: m } }\n",
  );
  let report: Value = client.call(methods::AUTOMATION_RELOAD, Value::Null).await.unwrap();
  assert_eq!(report["loaded"], json!(2));
  let status: Value = client.call(methods::AUTOMATION_STATUS, Value::Null).await.unwrap();
  assert_eq!(status["enabled"], json!(true));
  assert_eq!(status["enabledRules"], json!(2));

  handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn approval_requests_are_answered_over_ipc() {
  let mut env = TempConductor::new();
  env.config.automation.approval = ApprovalMode::Ipc;
  env.write_rules(
    r#"
- id: gated
  trigger: { type: deploy.requested }
  requiresApproval: true
  action: { type: agent, prompt: "echo deploying {{payload.env}}" }
"#,
  );
  let handle = env.start().await;
  let operator = env.connect().await;
  let mut notes = operator.take_notifications().unwrap();
  let publisher = env.connect().await;

  let publish = |env_name: &'static str| {
    let publisher = &publisher;
    async move {
      publisher
        .call::<Value>(
          methods::EVENTS_PUBLISH,
          json!({ "source": "cli", "type": "deploy.requested", "payload": { "env": env_name } }),
        )
        .await
        .unwrap();
    }
  };
  publish("staging").await;

  let request = tokio::time::timeout(Duration::from_secs(5), async {
    loop {
      let note = notes.recv().await.expect("notification stream open");
      if note.method == notifications::APPROVAL_REQUESTED {
        return note.params;
      }
    }
  })
  .await
  .expect("approval request");
  assert_eq!(request["ruleId"], json!("gated"));
  assert_eq!(request["event"]["payload"]["env"], json!("staging"));

  let resolved: Value = operator
    .call(
      methods::AUTOMATION_APPROVE,
      json!({ "requestId": request["requestId"], "approved": true }),
    )
    .await
    .unwrap();
  assert_eq!(resolved, json!({ "resolved": true }));

  let client = &operator;
  let ok = poll_until(Duration::from_secs(10), Duration::from_millis(25), || async move {
    let tasks: Vec<Task> = client.call(methods::TASK_LIST, json!({})).await.unwrap();
    tasks.first().and_then(|t| t.result.clone()).as_deref() == Some("deploying staging")
  })
  .await;
  assert!(ok, "approved rule never ran");

  let stale: Value = operator
    .call(
      methods::AUTOMATION_APPROVE,
      json!({ "requestId": request["requestId"], "approved": true }),
    )
    .await
    .unwrap();
  assert_eq!(stale, json!({ "resolved": false }));

  handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn only_one_daemon_per_data_dir() {
  let env = TempConductor::new();
  let handle = env.start().await;

  let mut other = env.options();
  other.socket_path = env.path().join("other.sock");
  match daemon::start(env.config.clone(), other).await {
    Err(DaemonError::AlreadyRunning { lock }) => assert!(lock.ends_with("conductor.lock")),
    Err(e) => panic!("unexpected error: {e}"),
    Ok(_) => panic!("second daemon started"),
  }

  handle.shutdown().await;
  let again = env.start().await;
  again.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_rpc_stops_a_running_daemon() {
  let env = TempConductor::new();
  let handle = env.start().await;
  let runner = tokio::spawn(handle.run());
  let client = env.connect().await;

  let reply: Value = client
    .call(methods::DAEMON_SHUTDOWN, Value::Null)
    .await
    .unwrap();
  assert_eq!(reply, json!({ "stopping": true }));

  tokio::time::timeout(Duration::from_secs(10), runner)
    .await
    .expect("daemon stopped in time")
    .unwrap();
  assert!(!env.socket_path().exists());
  assert!(matches!(
    IpcClient::connect(&env.socket_path()).await,
    Err(ClientError::NotRunning(_))
  ));
}

#[tokio::test(flavor = "multi_thread")]
async fn restart_fails_tasks_orphaned_by_a_crash() {
  let env = TempConductor::new();
  let tasks_path = fsutil::tasks_path(&env.path());
  {
    let store = TaskStore::new(&tasks_path);
    store.initialize();
    let orphan = store.create_task(NewTask {
      prompt: "sleep 100".to_string(),
      ..Default::default()
    });
    store.start_task(orphan.id, 4_000_000).unwrap();
    store.create_task(NewTask {
      prompt: "echo resumed".to_string(),
      ..Default::default()
    });
    store.save();
  }

  let handle = env.start().await;
  let client = env.connect().await;
  let orphan: Task = client
    .call(methods::TASK_GET, json!({ "taskId": 1 }))
    .await
    .unwrap();
  assert_eq!(orphan.state, TaskState::Failed);
  assert!(orphan.pid.is_none());
  assert_eq!(orphan.error.as_deref(), Some("daemon restarted while task was running"));

  let resumed = wait_for_state(&client, TaskId(2), TaskState::Completed).await;
  assert_eq!(resumed.result.as_deref(), Some("resumed"));

  let fresh: SubmitResult = client
    .call(methods::TASK_SUBMIT, json!({ "prompt": "true" }))
    .await
    .unwrap();
  assert_eq!(fresh.task_id, TaskId(3));

  handle.shutdown().await;
}
