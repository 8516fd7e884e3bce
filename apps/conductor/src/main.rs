use yansi::Paint;

fn main() {
  // Initialize structured logging early
  let data_dir = conductor_core::config::resolve_data_dir()
    .unwrap_or_else(|_| std::path::PathBuf::from("."));
  let cfg = conductor_core::config::load(None).unwrap_or_default();
  let log_path = conductor_core::adapters::fs::logs_path(&data_dir);
  if let Err(e) = conductor_core::logging::init(&log_path, cfg.log_level) {
    eprintln!("logging disabled: {e}");
  }

  if let Err(e) = cli::run() {
    eprintln!("{}", format!("{e:#}").red());
    std::process::exit(1);
  }
}
