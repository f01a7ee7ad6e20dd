use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use timestamp_goblin::config::{Config, project_dirs};
use timestamp_goblin::library::{Category, Library, LibraryItem, categorize, format_percent, watch_url};
use timestamp_goblin::logging;
use timestamp_goblin::store::{FileArea, Store, VideoStore};

// --- CLI ---

#[derive(Parser, Debug)]
#[command(name = "tsg", author, version = env!("CARGO_PKG_VERSION"), about, long_about = None)]
struct Args {
  /// Store file to use instead of the configured one
  #[arg(long, global = true)]
  store: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List saved videos, newest first
  List {
    /// Only show one category
    #[arg(short, long, value_enum)]
    category: Option<Category>,
    /// Don't cap each category at the display limit
    #[arg(short, long)]
    all: bool,
  },
  /// Show everything stored for one video
  Show { video_id: String },
  /// Forget a video's saved position
  Delete { video_id: String },
  /// Stop tracking a channel
  Ignore { channel: String },
  /// Resume tracking a channel
  Unignore { channel: String },
  /// List ignored channels
  Ignored,
  /// Turn tracking on
  Enable,
  /// Turn tracking off everywhere
  Disable,
  /// Tracking switch, store location and per-category totals
  Status,
  /// Print the link that resumes a video
  Open {
    video_id: String,
    /// Resume from the furthest point reached instead of the last one
    #[arg(short, long)]
    furthest: bool,
  },
  /// Show or change the saved settings
  Config {
    /// Store file used when --store is not given
    #[arg(long)]
    store_path: Option<PathBuf>,
    /// Log filter used when RUST_LOG is unset (empty to unset)
    #[arg(long)]
    log_filter: Option<String>,
    /// Forget every setting
    #[arg(long, conflicts_with_all = ["store_path", "log_filter"])]
    reset: bool,
  },
  /// Generate shell completions
  Completions { shell: Shell },
}

// --- Main ---

#[tokio::main]
async fn main() -> Result<()> {
  let args = Args::parse();
  if let Command::Completions { shell } = args.command {
    print_completions(shell);
    return Ok(());
  }

  let config = Config::load();
  let _guard = match project_dirs() {
    Some(dirs) => Some(logging::init(dirs.data_dir(), &config)?),
    None => None,
  };

  if let Command::Config { store_path, log_filter, reset } = args.command {
    let path = Config::path().context("could not determine a config location")?;
    return configure(&path, store_path, log_filter, reset);
  }

  let path = match args.store.or_else(|| config.store_path.clone()).or_else(FileArea::default_path) {
    Some(path) => path,
    None => bail!("could not determine a store location; pass --store"),
  };
  debug!(path = %path.display(), command = ?args.command, "cli: start");
  let store = Store::new(FileArea::new(path.clone()));

  run(&store, args.command, &path).await
}

async fn run(store: &impl VideoStore, command: Command, path: &std::path::Path) -> Result<()> {
  match command {
    Command::List { category, all } => {
      let library = load_library(store).await?;
      if library.is_empty() {
        println!("No saved videos yet.");
        return Ok(());
      }
      let categories = category.map_or(Category::ALL.to_vec(), |c| vec![c]);
      for (n, cat) in categories.into_iter().enumerate() {
        if n > 0 {
          println!();
        }
        let items: Vec<&LibraryItem> =
          if all { library.all().iter().filter(|i| i.category == cat).collect() } else { library.items(cat) };
        println!("{cat} ({})", library.counts().iter().find(|(c, _)| *c == cat).map_or(0, |(_, n)| *n));
        if items.is_empty() {
          println!("  No {cat} videos yet.");
        }
        for item in items {
          println!("  {}", format_item(item));
        }
      }
    }
    Command::Show { video_id } => {
      let Some(state) = store.get_video_state(&video_id).await? else {
        bail!("no saved position for {video_id}");
      };
      println!("video:    {video_id}");
      println!("title:    {}", state.title);
      println!("channel:  {}", state.channel);
      println!("last:     {:.1}s ({})", state.last_time, format_percent(state.last_time, state.duration));
      println!("furthest: {:.1}s ({})", state.furthest_time, format_percent(state.furthest_time, state.duration));
      if state.duration.is_finite() {
        println!("duration: {:.1}s", state.duration);
      } else {
        println!("duration: unknown");
      }
      println!("category: {}", categorize(state.last_time, state.duration));
      let updated = chrono::DateTime::from_timestamp_millis(state.updated_at)
        .map_or_else(|| state.updated_at.to_string(), |at| at.to_rfc3339());
      println!("updated:  {updated}");
    }
    Command::Delete { video_id } => {
      store.delete_video_state(&video_id).await?;
      info!(video_id = %video_id, "cli: deleted");
      println!("Deleted {video_id}");
    }
    Command::Ignore { channel } => {
      store.add_ignored_channel(&channel).await?;
      info!(channel = %channel, "cli: ignored channel");
      println!("Ignoring {}", channel.trim());
    }
    Command::Unignore { channel } => {
      store.remove_ignored_channel(&channel).await?;
      println!("No longer ignoring {}", channel.trim());
    }
    Command::Ignored => {
      let ignored = store.get_ignored_channels().await?;
      if ignored.is_empty() {
        println!("None");
      }
      for channel in ignored {
        println!("{channel}");
      }
    }
    Command::Enable | Command::Disable => {
      let enabled = matches!(command, Command::Enable);
      store.set_enabled(enabled).await?;
      info!(enabled, "cli: tracking switch");
      println!("Tracking {}", if enabled { "enabled" } else { "disabled" });
    }
    Command::Status => {
      let (enabled, ignored, records) =
        futures::try_join!(store.get_enabled(), store.get_ignored_channels(), store.get_all_video_states())?;
      let library = Library::build(records, &ignored);
      println!("tracking: {}", if enabled { "enabled" } else { "disabled" });
      println!("store:    {}", path.display());
      println!("ignored:  {} channel(s)", ignored.len());
      for (cat, count) in library.counts() {
        println!("{:<9} {count}", format!("{cat}:"));
      }
    }
    Command::Open { video_id, furthest } => {
      let state =
        store.get_video_state(&video_id).await?.with_context(|| format!("no saved position for {video_id}"))?;
      let time = if furthest { state.furthest_time } else { state.last_time };
      println!("{}", watch_url(&video_id, Some(time)));
    }
    Command::Completions { shell } => print_completions(shell),
    Command::Config { .. } => bail!("config is handled before the store is opened"),
  }
  Ok(())
}

/// Apply any changes to the settings file at `path`, then print what it holds.
fn configure(path: &Path, store_path: Option<PathBuf>, log_filter: Option<String>, reset: bool) -> Result<()> {
  let mut config = if reset { Config::default() } else { Config::load_from(path) };
  let changed = reset || store_path.is_some() || log_filter.is_some();
  if store_path.is_some() {
    config.store_path = store_path;
  }
  if let Some(filter) = log_filter {
    let filter = filter.trim().to_string();
    if !filter.is_empty() {
      tracing_subscriber::EnvFilter::try_new(&filter).with_context(|| format!("invalid log filter {filter:?}"))?;
    }
    config.log_filter = Some(filter).filter(|f| !f.is_empty());
  }
  if changed {
    config.save_to(path)?;
    info!(path = %path.display(), "cli: saved config");
  }

  println!("config:     {}", path.display());
  println!("store_path: {}", config.store_path.as_ref().map_or("(default)".into(), |p| p.display().to_string()));
  println!("log_filter: {}", config.log_filter.as_deref().unwrap_or("(default)"));
  Ok(())
}

fn print_completions(shell: Shell) {
  clap_complete::generate(shell, &mut Args::command(), "tsg", &mut std::io::stdout());
}

async fn load_library(store: &impl VideoStore) -> Result<Library> {
  let (records, ignored) = futures::try_join!(store.get_all_video_states(), store.get_ignored_channels())?;
  Ok(Library::build(records, &ignored))
}

fn format_item(item: &LibraryItem) -> String {
  format!(
    "{}  {}  [{}]  L: {} | F: {}",
    item.video_id(),
    item.title,
    item.channel,
    item.last_percent(),
    item.furthest_percent()
  )
}
