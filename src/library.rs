//! The saved-video list: categories, progress labels and resume links.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::collections::BTreeSet;
use std::fmt;

use crate::constants::constants;
use crate::store::{VideoRecord, normalize_channel_name};

/// Everything except the characters a URI component may carry unescaped.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
  .remove(b'-')
  .remove(b'_')
  .remove(b'.')
  .remove(b'!')
  .remove(b'~')
  .remove(b'*')
  .remove(b'\'')
  .remove(b'(')
  .remove(b')');

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, clap::ValueEnum)]
pub enum Category {
  Unfinished,
  Unwatched,
  Finished,
}

impl Category {
  pub const ALL: [Category; 3] = [Category::Unfinished, Category::Unwatched, Category::Finished];

  pub fn label(self) -> &'static str {
    match self {
      Category::Unfinished => "unfinished",
      Category::Unwatched => "unwatched",
      Category::Finished => "finished",
    }
  }
}

impl fmt::Display for Category {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.label())
  }
}

/// Which list a record belongs in. Unknown length and barely-started videos
/// count as unwatched; anything within the buffer of the end is finished.
pub fn categorize(last_time: f64, duration: f64) -> Category {
  let c = constants();
  if !duration.is_finite() || last_time < c.min_resume_secs {
    return Category::Unwatched;
  }
  if last_time >= duration - c.unfinished_buffer_secs {
    return Category::Finished;
  }
  Category::Unfinished
}

pub fn format_percent(time: f64, duration: f64) -> String {
  if !duration.is_finite() || duration <= 0.0 {
    return "--%".to_string();
  }
  let pct = (time / duration * 100.0).round().clamp(0.0, 100.0) as i64;
  format!("{pct}%")
}

/// Link that opens the video, starting at `time` seconds when positive.
pub fn watch_url(video_id: &str, time: Option<f64>) -> String {
  let mut url = format!("https://www.youtube.com/watch?v={}", utf8_percent_encode(video_id, COMPONENT));
  if let Some(t) = time.filter(|t| *t > 0.0) {
    url.push_str(&format!("&t={}s", t.floor() as u64));
  }
  url
}

/// A record with its display defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryItem {
  pub record: VideoRecord,
  pub title: String,
  pub channel: String,
  pub category: Category,
}

impl LibraryItem {
  fn new(record: VideoRecord) -> Self {
    let c = constants();
    let title = if record.state.title.is_empty() { c.default_video_title.clone() } else { record.state.title.clone() };
    let channel =
      if record.state.channel.is_empty() { c.default_channel_name.clone() } else { record.state.channel.clone() };
    let category = categorize(record.state.last_time, record.state.duration);
    Self { record, title, channel, category }
  }

  pub fn video_id(&self) -> &str {
    &self.record.video_id
  }

  pub fn last_percent(&self) -> String {
    format_percent(self.record.state.last_time, self.record.state.duration)
  }

  pub fn furthest_percent(&self) -> String {
    format_percent(self.record.state.furthest_time, self.record.state.duration)
  }

  /// The placeholder channel can't be ignored.
  pub fn can_ignore(&self) -> bool {
    self.channel != constants().default_channel_name
  }
}

/// Saved videos minus ignored channels, newest first.
#[derive(Debug, Default)]
pub struct Library {
  items: Vec<LibraryItem>,
}

impl Library {
  pub fn build(records: Vec<VideoRecord>, ignored: &BTreeSet<String>) -> Self {
    let mut items: Vec<LibraryItem> = records
      .into_iter()
      .map(LibraryItem::new)
      .filter(|item| !ignored.contains(&normalize_channel_name(&item.channel)))
      .collect();
    items.sort_by(|a, b| b.record.state.updated_at.cmp(&a.record.state.updated_at));
    Self { items }
  }

  /// One category, capped at the display limit.
  pub fn items(&self, category: Category) -> Vec<&LibraryItem> {
    self.items.iter().filter(|i| i.category == category).take(constants().max_list_items).collect()
  }

  /// Every visible item regardless of category.
  pub fn all(&self) -> &[LibraryItem] {
    &self.items
  }

  pub fn find(&self, video_id: &str) -> Option<&LibraryItem> {
    self.items.iter().find(|i| i.video_id() == video_id)
  }

  /// Uncapped totals per category.
  pub fn counts(&self) -> [(Category, usize); 3] {
    Category::ALL.map(|cat| (cat, self.items.iter().filter(|i| i.category == cat).count()))
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::StoredVideoState;

  fn record(id: &str, t: f64, duration: f64, updated_at: i64, channel: &str) -> VideoRecord {
    VideoRecord {
      video_id: id.to_string(),
      state: StoredVideoState {
        last_time: t,
        furthest_time: t,
        updated_at,
        duration,
        title: format!("Video {id}"),
        channel: channel.to_string(),
      },
    }
  }

  #[test]
  fn categorizes_by_progress() {
    assert_eq!(categorize(30.0, f64::INFINITY), Category::Unwatched);
    assert_eq!(categorize(14.9, 100.0), Category::Unwatched);
    assert_eq!(categorize(15.0, 100.0), Category::Unfinished);
    assert_eq!(categorize(84.9, 100.0), Category::Unfinished);
    assert_eq!(categorize(85.0, 100.0), Category::Finished);
    // Short videos are finished as soon as they count as started.
    assert_eq!(categorize(16.0, 20.0), Category::Finished);
  }

  #[test]
  fn formats_percent() {
    assert_eq!(format_percent(30.0, 100.0), "30%");
    assert_eq!(format_percent(1.0, 3.0), "33%");
    assert_eq!(format_percent(2.0, 3.0), "67%");
    assert_eq!(format_percent(150.0, 100.0), "100%");
    assert_eq!(format_percent(-5.0, 100.0), "0%");
    assert_eq!(format_percent(10.0, f64::INFINITY), "--%");
    assert_eq!(format_percent(10.0, 0.0), "--%");
  }

  #[test]
  fn builds_watch_urls() {
    assert_eq!(watch_url("abc", None), "https://www.youtube.com/watch?v=abc");
    assert_eq!(watch_url("abc", Some(0.0)), "https://www.youtube.com/watch?v=abc");
    assert_eq!(watch_url("abc", Some(125.9)), "https://www.youtube.com/watch?v=abc&t=125s");
    assert_eq!(watch_url("a b&c", None), "https://www.youtube.com/watch?v=a%20b%26c");
    assert_eq!(watch_url("dQw4w9WgXcQ-_", Some(1.0)), "https://www.youtube.com/watch?v=dQw4w9WgXcQ-_&t=1s");
  }

  #[test]
  fn counts_each_category() {
    let library = Library::build(
      vec![record("a1", 30.0, 100.0, 1, "A"), record("b2", 0.0, 100.0, 2, "B"), record("c3", 95.0, 100.0, 3, "C")],
      &BTreeSet::new(),
    );
    assert_eq!(library.counts(), [(Category::Unfinished, 1), (Category::Unwatched, 1), (Category::Finished, 1)]);
    assert_eq!(library.items(Category::Unfinished)[0].video_id(), "a1");
    assert_eq!(library.items(Category::Finished)[0].last_percent(), "95%");
  }

  #[test]
  fn hides_ignored_channels() {
    let ignored = BTreeSet::from(["some channel".to_string(), "unknown channel".to_string()]);
    let library = Library::build(
      vec![
        record("a1", 30.0, 100.0, 1, "  Some Channel"),
        record("b2", 30.0, 100.0, 2, ""),
        record("c3", 30.0, 100.0, 3, "Other"),
      ],
      &ignored,
    );
    let ids: Vec<&str> = library.all().iter().map(|i| i.video_id()).collect();
    assert_eq!(ids, vec!["c3"]);
  }

  #[test]
  fn sorts_newest_first_and_caps() {
    let records = (0..25).map(|i| record(&format!("v{i}"), 30.0, 100.0, i, "A")).collect();
    let library = Library::build(records, &BTreeSet::new());

    let items = library.items(Category::Unfinished);
    assert_eq!(items.len(), 20);
    assert_eq!(items[0].video_id(), "v24");
    assert_eq!(items[19].video_id(), "v5");
    assert_eq!(library.counts()[0], (Category::Unfinished, 25));
  }

  #[test]
  fn applies_display_defaults() {
    let mut bare = record("x", 0.0, f64::INFINITY, 1, "");
    bare.state.title.clear();
    let library = Library::build(vec![bare], &BTreeSet::new());

    let item = library.find("x").unwrap();
    assert_eq!(item.title, "Untitled video");
    assert_eq!(item.channel, "Unknown channel");
    assert!(!item.can_ignore());
    assert_eq!(item.furthest_percent(), "--%");
  }
}
