use std::path::PathBuf;

use clap::Parser;
use cli::args::{AutomationSubcommand, Cli, Commands, DaemonSubcommand, EventsSubcommand};
use conductor_core::domain::task::{TaskId, TaskState};
use pretty_assertions::assert_eq;
use serde_json::json;

fn parse(argv: &[&str]) -> Cli {
  let mut full = vec!["conductor"];
  full.extend_from_slice(argv);
  Cli::try_parse_from(full).expect("parses")
}

#[test]
fn global_flags_work_after_the_subcommand() {
  let cli = parse(&["list", "--socket", "/tmp/x.sock", "--json", "--state", "failed"]);
  assert_eq!(cli.socket, Some(PathBuf::from("/tmp/x.sock")));
  assert!(cli.json);
  match cli.command {
    Some(Commands::List(args)) => {
      assert_eq!(args.state, Some(TaskState::Failed));
      assert_eq!(args.limit, None);
    }
    other => panic!("unexpected: {other:?}"),
  }
}

#[test]
fn submit_accepts_negative_priority_and_agent() {
  let cli = parse(&["submit", "fix it", "--agent", "shell", "--priority", "-2"]);
  match cli.command {
    Some(Commands::Submit(args)) => {
      assert_eq!(args.prompt, "fix it");
      assert_eq!(args.agent.as_deref(), Some("shell"));
      assert_eq!(args.priority, Some(-2));
    }
    other => panic!("unexpected: {other:?}"),
  }
}

#[test]
fn task_ids_accept_a_hash_prefix() {
  match parse(&["cancel", "#12"]).command {
    Some(Commands::Cancel(args)) => assert_eq!(args.id, TaskId(12)),
    other => panic!("unexpected: {other:?}"),
  }
  assert!(Cli::try_parse_from(["conductor", "get", "twelve"]).is_err());
}

#[test]
fn unknown_state_is_rejected() {
  assert!(Cli::try_parse_from(["conductor", "list", "--state", "paused"]).is_err());
}

#[test]
fn daemon_and_automation_subcommands() {
  assert!(matches!(
    parse(&["daemon", "run"]).command,
    Some(Commands::Daemon(d)) if matches!(d.command, DaemonSubcommand::Run)
  ));
  match parse(&["automation", "disable", "on-build"]).command {
    Some(Commands::Automation(a)) => match a.command {
      AutomationSubcommand::Disable { rule } => assert_eq!(rule.as_deref(), Some("on-build")),
      other => panic!("unexpected: {other:?}"),
    },
    other => panic!("unexpected: {other:?}"),
  }
}

#[test]
fn events_publish_parses_json_payload() {
  match parse(&["events", "publish", "build.finished", "--payload", r#"{"status":"ok"}"#]).command {
    Some(Commands::Events(e)) => match e.command {
      EventsSubcommand::Publish { kind, source, payload } => {
        assert_eq!(kind, "build.finished");
        assert_eq!(source, "cli");
        assert_eq!(payload, Some(json!({ "status": "ok" })));
      }
      other => panic!("unexpected: {other:?}"),
    },
    other => panic!("unexpected: {other:?}"),
  }
  assert!(Cli::try_parse_from(["conductor", "events", "publish", "x", "--payload", "{oops"]).is_err());
}
