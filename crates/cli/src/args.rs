use std::path::PathBuf;

use clap::{Args as ClapArgs, CommandFactory, Parser, Subcommand};
use conductor_core::domain::task::{TaskId, TaskState};

#[derive(Debug, Parser)]
#[command(version, about = "Conductor CLI", long_about = None, bin_name = "conductor")]
pub struct Cli {
  /// Socket of the daemon to talk to (defaults to $CONDUCTOR_SOCKET or the runtime dir)
  #[arg(long, global = true, value_name = "PATH")]
  pub socket: Option<PathBuf>,
  /// Config file layered over the global config
  #[arg(long, global = true, value_name = "PATH")]
  pub config: Option<PathBuf>,
  /// Print raw JSON responses
  #[arg(long, global = true)]
  pub json: bool,
  #[command(subcommand)]
  pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
  /// Daemon related commands
  Daemon(DaemonArgs),
  /// Queue a prompt for an agent
  Submit(SubmitArgs),
  /// Cancel a queued or running task
  Cancel(TaskArgs),
  /// List tasks, newest first
  List(ListArgs),
  /// Show one task including its captured output
  Get(TaskArgs),
  /// Task counts per state
  Stats,
  /// Send a chat message (queued ahead of normal work)
  Chat(ChatArgs),
  /// Check that the daemon answers
  Ping,
  /// Inspect and toggle automation rules
  Automation(AutomationArgs),
  /// Publish and inspect events
  Events(EventsArgs),
}

#[derive(Debug, ClapArgs)]
pub struct DaemonArgs {
  #[command(subcommand)]
  pub command: DaemonSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum DaemonSubcommand {
  /// Show daemon status
  Status,
  /// Start the daemon in the background
  Start,
  /// Stop the daemon
  Stop,
  /// Run the daemon (foreground)
  Run,
}

#[derive(Debug, ClapArgs)]
pub struct SubmitArgs {
  /// Prompt handed to the agent
  pub prompt: String,
  /// Agent name from the config (defaults to `default_agent`)
  #[arg(long)]
  pub agent: Option<String>,
  /// Higher runs first
  #[arg(long, allow_negative_numbers = true)]
  pub priority: Option<i64>,
}

#[derive(Debug, ClapArgs)]
pub struct TaskArgs {
  /// Numeric task id
  #[arg(value_parser = parse_task_id)]
  pub id: TaskId,
}

#[derive(Debug, ClapArgs)]
pub struct ListArgs {
  /// Only tasks in this state (queued|running|completed|failed|cancelled)
  #[arg(long)]
  pub state: Option<TaskState>,
  #[arg(long)]
  pub agent: Option<String>,
  #[arg(long)]
  pub limit: Option<usize>,
}

#[derive(Debug, ClapArgs)]
pub struct ChatArgs {
  pub message: String,
}

#[derive(Debug, ClapArgs)]
pub struct AutomationArgs {
  #[command(subcommand)]
  pub command: AutomationSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum AutomationSubcommand {
  /// Show the engine switch and loaded rules
  Status,
  /// Enable the engine, or a single rule
  Enable { rule: Option<String> },
  /// Disable the engine, or a single rule
  Disable { rule: Option<String> },
  /// Show recent rule executions
  Log {
    #[arg(long)]
    limit: Option<usize>,
  },
  /// Re-read the rules file
  Reload,
}

#[derive(Debug, ClapArgs)]
pub struct EventsArgs {
  #[command(subcommand)]
  pub command: EventsSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum EventsSubcommand {
  /// Publish an event to the router
  Publish {
    /// Event type, e.g. `build.finished`
    #[arg(value_name = "TYPE")]
    kind: String,
    #[arg(long, default_value = "cli")]
    source: String,
    /// JSON payload
    #[arg(long, value_parser = parse_json)]
    payload: Option<serde_json::Value>,
  },
  /// Recently published events
  History {
    #[arg(long)]
    limit: Option<usize>,
  },
  /// Deliveries that failed after every retry
  DeadLetters,
}

fn parse_task_id(raw: &str) -> Result<TaskId, String> {
  raw
    .trim_start_matches('#')
    .parse::<u64>()
    .map(TaskId)
    .map_err(|_| format!("`{raw}` is not a task id"))
}

fn parse_json(raw: &str) -> Result<serde_json::Value, String> {
  serde_json::from_str(raw).map_err(|e| format!("invalid JSON: {e}"))
}

impl Cli {
  pub fn print_help_and_exit() {
    let mut cmd = Cli::command();
    let _ = cmd.print_help();
    println!();
  }
}
