use std::sync::Arc;

use crate::constants::constants;
use crate::page::{Page, VideoElement};

const TITLE_SELECTORS: [&str; 3] =
  ["h1.title yt-formatted-string", "h1.ytd-watch-metadata yt-formatted-string", "h1.title"];

const CHANNEL_SELECTORS: [&str; 4] =
  ["ytd-channel-name a", "#owner-name a", "#text-container.ytd-channel-name", "ytd-video-owner-renderer a"];

/// Best-effort facts about the current page. Every lookup is synchronous and
/// may come back empty while the page is still rendering.
pub trait MetadataProvider: Send + Sync {
  /// The `v` query parameter, only on a watch page.
  fn video_id(&self) -> Option<String>;
  fn is_watch_page(&self) -> bool;
  fn video_title(&self) -> Option<String>;
  fn channel_name(&self) -> Option<String>;
  /// Live or otherwise unbounded media. Evaluated on every call.
  fn is_live(&self, video: &dyn VideoElement) -> bool;
}

/// [`MetadataProvider`] backed by the host page's URL and DOM.
pub struct PageMetadata {
  page: Arc<dyn Page>,
}

impl PageMetadata {
  pub fn new(page: Arc<dyn Page>) -> Self {
    Self { page }
  }

  fn pick_text(&self, selectors: &[&str]) -> Option<String> {
    selectors.iter().filter_map(|s| self.page.query_text(s)).map(|t| t.trim().to_string()).find(|t| !t.is_empty())
  }
}

impl MetadataProvider for PageMetadata {
  fn video_id(&self) -> Option<String> {
    if !self.is_watch_page() {
      return None;
    }
    self.page.location().query_pairs().find(|(k, _)| k == "v").map(|(_, v)| v.into_owned()).filter(|v| !v.is_empty())
  }

  fn is_watch_page(&self) -> bool {
    self.page.location().path() == "/watch"
  }

  fn video_title(&self) -> Option<String> {
    self.pick_text(&TITLE_SELECTORS).or_else(|| {
      let title = strip_site_suffix(&self.page.title()).trim().to_string();
      (!title.is_empty()).then_some(title)
    })
  }

  fn channel_name(&self) -> Option<String> {
    self.pick_text(&CHANNEL_SELECTORS)
  }

  fn is_live(&self, video: &dyn VideoElement) -> bool {
    video.duration() == f64::INFINITY || video.seekable_ranges() == 0
  }
}

/// Drop a trailing `" - YouTube"` from a document title. The separator needs
/// whitespace on both sides; trailing whitespace is tolerated.
fn strip_site_suffix(title: &str) -> &str {
  let trimmed = title.trim_end();
  let Some(rest) = trimmed.strip_suffix("YouTube") else { return title };
  let before_name = rest.trim_end();
  if before_name.len() == rest.len() {
    return title;
  }
  let Some(before_dash) = before_name.strip_suffix('-') else { return title };
  let head = before_dash.trim_end();
  if head.len() == before_dash.len() {
    return title;
  }
  head
}

/// Where to seek for a stored position: clamped just short of the end when
/// the duration is known, otherwise the raw stored time.
pub fn clamp_resume_target(t: f64, duration: f64) -> f64 {
  if !duration.is_finite() || duration <= 1.0 {
    return t;
  }
  let max_target = (duration - constants().clamp_end_margin_secs).max(0.0);
  t.max(0.0).min(max_target)
}
