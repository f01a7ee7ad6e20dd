//! Tracking constants loaded from `constants.ron` at compile time.
//!
//! The RON file is embedded via `include_str!` so it's always available,
//! with no runtime file I/O. Parsed once on first access via `LazyLock`.

use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;

/// All tuneable tracking constants.
#[derive(Debug, Deserialize)]
pub struct Constants {
  // Playback tracking
  pub save_interval_secs: u64,
  pub min_resume_secs: f64,
  pub near_start_window_secs: f64,
  pub min_write_gap_ms: u64,
  pub locate_timeout_ms: u64,
  pub navigation_debounce_ms: u64,

  // Resume
  pub reapply_delay_ms: u64,
  pub reapply_tolerance_secs: f64,
  pub clamp_end_margin_secs: f64,

  // Library listing
  pub unfinished_buffer_secs: f64,
  pub max_list_items: usize,

  // Display fallbacks
  pub default_video_title: String,
  pub default_channel_name: String,
}

impl Constants {
  pub fn save_interval(&self) -> Duration {
    Duration::from_secs(self.save_interval_secs)
  }

  pub fn min_write_gap(&self) -> Duration {
    Duration::from_millis(self.min_write_gap_ms)
  }

  pub fn locate_timeout(&self) -> Duration {
    Duration::from_millis(self.locate_timeout_ms)
  }

  pub fn navigation_debounce(&self) -> Duration {
    Duration::from_millis(self.navigation_debounce_ms)
  }

  pub fn reapply_delay(&self) -> Duration {
    Duration::from_millis(self.reapply_delay_ms)
  }
}

static CONSTANTS: LazyLock<Constants> = LazyLock::new(|| {
  // Safety: the RON file is embedded at compile time; if it's malformed the first test run fails.
  ron::from_str(include_str!("../constants.ron")).expect("constants.ron must be valid RON (embedded at compile time)")
});

/// Returns a reference to the parsed tracking constants.
pub fn constants() -> &'static Constants {
  &CONSTANTS
}
