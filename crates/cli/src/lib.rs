//! Command line front end for the conductor daemon.
//!
//! Every command except `daemon run` is a thin IPC call; output is a short
//! human summary, or the raw JSON result with `--json`.

pub mod args;
mod commands;
mod util;

use std::io::{IsTerminal, Write};

use anyhow::Result;
use clap::Parser;

use args::{
  AutomationSubcommand, Cli, Commands, DaemonSubcommand, EventsSubcommand,
};
use commands::Ctx;

pub fn run() -> Result<()> {
  // If no additional args, show help and exit 0
  if std::env::args_os().len() == 1 {
    Cli::print_help_and_exit();
    return Ok(());
  }

  // Parse arguments; this will also handle --help/--version.
  let cli = Cli::parse();
  if !std::io::stdout().is_terminal() {
    yansi::disable();
  }
  let rt = tokio::runtime::Builder::new_multi_thread()
    .enable_io()
    .enable_time()
    .build()?;
  let mut out = std::io::stdout();
  rt.block_on(execute(cli, &mut out))
}

/// Run one parsed command, writing its report to `out`.
pub async fn execute(cli: Cli, out: &mut (dyn Write + Send)) -> Result<()> {
  let Some(command) = cli.command else {
    Cli::print_help_and_exit();
    return Ok(());
  };
  let ctx = Ctx::new(cli.socket, cli.config, cli.json)?;
  tracing::debug!(event = "cli_command", socket = %ctx.socket.display(), command = ?command);

  match command {
    Commands::Daemon(daemon) => match daemon.command {
      DaemonSubcommand::Status => commands::daemon::status(&ctx, out).await,
      DaemonSubcommand::Start => commands::daemon::start(&ctx, out).await,
      DaemonSubcommand::Stop => commands::daemon::stop(&ctx, out).await,
      DaemonSubcommand::Run => commands::daemon::run_foreground(&ctx, out).await,
    },
    Commands::Submit(args) => commands::tasks::submit(&ctx, out, args).await,
    Commands::Cancel(args) => commands::tasks::cancel(&ctx, out, args.id).await,
    Commands::List(args) => commands::tasks::list(&ctx, out, args).await,
    Commands::Get(args) => commands::tasks::get(&ctx, out, args.id).await,
    Commands::Stats => commands::tasks::stats(&ctx, out).await,
    Commands::Chat(args) => commands::tasks::chat(&ctx, out, args.message).await,
    Commands::Ping => commands::tasks::ping(&ctx, out).await,
    Commands::Automation(automation) => match automation.command {
      AutomationSubcommand::Status => commands::automation::status(&ctx, out).await,
      AutomationSubcommand::Enable { rule } => commands::automation::toggle(&ctx, out, true, rule).await,
      AutomationSubcommand::Disable { rule } => commands::automation::toggle(&ctx, out, false, rule).await,
      AutomationSubcommand::Log { limit } => commands::automation::log(&ctx, out, limit).await,
      AutomationSubcommand::Reload => commands::automation::reload(&ctx, out).await,
    },
    Commands::Events(events) => match events.command {
      EventsSubcommand::Publish { kind, source, payload } => {
        commands::events::publish(&ctx, out, source, kind, payload).await
      }
      EventsSubcommand::History { limit } => commands::events::history(&ctx, out, limit).await,
      EventsSubcommand::DeadLetters => commands::events::dead_letters(&ctx, out).await,
    },
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::{CommandFactory, error::ErrorKind};

  #[test]
  fn help_flag_triggers_displayhelp() {
    let err = Cli::try_parse_from(["conductor", "--help"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DisplayHelp);
  }

  #[test]
  fn version_flag_triggers_displayversion() {
    let err = Cli::try_parse_from(["conductor", "--version"]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DisplayVersion);
  }

  #[test]
  fn command_factory_builds() {
    Cli::command().debug_assert();
  }
}
