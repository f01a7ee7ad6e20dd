use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

const DEFAULT_FILTER: &str = "timestamp_goblin=info";

/// Filter directives: `RUST_LOG` wins, then the config file, then the default.
pub fn filter_directives(env: Option<String>, config: &Config) -> String {
  env
    .filter(|s| !s.trim().is_empty())
    .or_else(|| config.log_filter.clone())
    .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

/// Send logs to `<dir>/tsg.log` through a background writer. Keep the
/// returned guard alive until exit or buffered lines are lost.
pub fn init(dir: &Path, config: &Config) -> Result<WorkerGuard> {
  std::fs::create_dir_all(dir).with_context(|| format!("failed to create log dir {}", dir.display()))?;
  let directives = filter_directives(std::env::var("RUST_LOG").ok(), config);
  let filter = EnvFilter::try_new(&directives).with_context(|| format!("invalid log filter {directives:?}"))?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, "tsg.log"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .try_init()
    .map_err(|e| anyhow::anyhow!(e))
    .context("failed to install tracing subscriber")?;
  Ok(guard)
}
