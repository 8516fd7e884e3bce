use chrono::{DateTime, Local, Utc};
use conductor_core::automation::{ExecutionOutcome, ExecutionRecord};
use conductor_core::domain::event::{DeadLetterEntry, Event};
use conductor_core::domain::task::{Task, TaskState, preview};
use yansi::Paint;

const PROMPT_PREVIEW: usize = 60;

pub fn state_label(state: TaskState) -> String {
  let label = format!("{:<9}", state.as_str());
  match state {
    TaskState::Queued => label.yellow().to_string(),
    TaskState::Running => label.cyan().bold().to_string(),
    TaskState::Completed => label.green().to_string(),
    TaskState::Failed => label.red().to_string(),
    TaskState::Cancelled => label.dim().to_string(),
  }
}

pub fn time(ts: DateTime<Utc>) -> String {
  ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// `#12   running   claude   p10  fix the flaky test`
pub fn task_line(task: &Task) -> String {
  format!(
    "#{:<4} {} {:<8} p{:<3} {}",
    task.id,
    state_label(task.state),
    task.agent.as_deref().unwrap_or("-"),
    task.priority,
    task.prompt_preview(PROMPT_PREVIEW).replace('\n', " ")
  )
}

pub fn task_detail(task: &Task) -> String {
  let mut lines = vec![
    format!("task:      #{}", task.id),
    format!("state:     {}", state_label(task.state).trim_end()),
    format!("agent:     {}", task.agent.as_deref().unwrap_or("-")),
    format!("priority:  {}", task.priority),
    format!("created:   {}", time(task.created_at)),
  ];
  if let Some(ts) = task.started_at {
    lines.push(format!("started:   {}", time(ts)));
  }
  if let Some(ts) = task.completed_at {
    lines.push(format!("finished:  {}", time(ts)));
  }
  if let Some(pid) = task.pid {
    lines.push(format!("pid:       {pid}"));
  }
  lines.push(format!("prompt:    {}", task.prompt));
  if let Some(result) = &task.result {
    lines.push(format!("result:    {result}"));
  }
  if let Some(error) = &task.error {
    lines.push(format!("error:     {}", error.red()));
  }
  if !task.output.is_empty() {
    lines.push("output:".to_string());
    lines.extend(task.output.lines().map(|l| format!("  {l}")));
  }
  lines.join("\n")
}

pub fn outcome_label(outcome: ExecutionOutcome) -> String {
  match outcome {
    ExecutionOutcome::Executed => "executed".green().to_string(),
    ExecutionOutcome::SkippedNoApprover => "skipped (no approver)".yellow().to_string(),
    ExecutionOutcome::Denied => "denied".yellow().to_string(),
    ExecutionOutcome::Failed => "failed".red().to_string(),
    ExecutionOutcome::UnknownActionType => "unknown action".red().to_string(),
  }
}

pub fn execution_line(record: &ExecutionRecord) -> String {
  let mut line = format!(
    "{}  {}  {} ({}:{})  {}",
    time(record.timestamp),
    record.rule_id,
    record.action,
    record.event_type,
    record.event_source,
    outcome_label(record.outcome)
  );
  if let Some(id) = record.task_id {
    line.push_str(&format!("  task #{id}"));
  }
  if let Some(detail) = &record.detail {
    line.push_str(&format!("  {detail}"));
  }
  line
}

pub fn event_line(event: &Event) -> String {
  let payload = if event.payload.is_null() {
    String::new()
  } else {
    preview(&event.payload.to_string(), PROMPT_PREVIEW)
  };
  format!("{}  {}  {}  {}", time(event.timestamp), event.source, event.kind, payload)
    .trim_end()
    .to_string()
}

pub fn dead_letter_line(entry: &DeadLetterEntry) -> String {
  format!(
    "{}  {}  {}: {}",
    time(entry.timestamp),
    entry.handler_name,
    entry.event.kind,
    entry.error.red()
  )
}
