#![cfg(test)]

//! Fakes for the host page and the persistence layer.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

use crate::page::{DocumentEvent, EventTarget, History, MediaEvent, Page, SharedVideo, VideoElement, WindowEvent};
use crate::store::{MemoryArea, Store, StoredVideoState, VideoRecord, VideoStore};

/// Scriptable page: tests move the location, insert elements and flip
/// visibility, and the fake fires the matching events.
pub struct FakePage {
  history: History,
  window: EventTarget<WindowEvent>,
  document: EventTarget<DocumentEvent>,
  hidden: AtomicBool,
  body: bool,
  video: Mutex<Option<SharedVideo>>,
  texts: Mutex<HashMap<String, String>>,
  title: Mutex<String>,
}

impl FakePage {
  pub fn new(url: &str) -> Arc<Self> {
    Self::build(url, true)
  }

  pub fn without_body(url: &str) -> Arc<Self> {
    Self::build(url, false)
  }

  fn build(url: &str, body: bool) -> Arc<Self> {
    Arc::new(Self {
      history: History::new(Url::parse(url).expect("fake page URL must parse")),
      window: EventTarget::new(),
      document: EventTarget::new(),
      hidden: AtomicBool::new(false),
      body,
      video: Mutex::new(None),
      texts: Mutex::new(HashMap::new()),
      title: Mutex::new(String::new()),
    })
  }

  /// Client-side navigation through the (possibly intercepted) pushState.
  pub fn navigate(&self, url: &str) {
    self.history.push_state(url).expect("fake navigation URL must parse");
  }

  /// Back/forward: the location moves without pushState, then popstate fires.
  pub fn pop_to(&self, url: &str) {
    let next = self.history.location().join(url).expect("fake popstate URL must parse");
    self.history.set_location(next);
    self.window.dispatch(WindowEvent::PopState);
  }

  pub fn insert_video(&self, video: SharedVideo) {
    *self.video.lock().unwrap() = Some(video);
    self.document.dispatch(DocumentEvent::Mutation);
  }

  /// An unrelated DOM change.
  pub fn mutate(&self) {
    self.document.dispatch(DocumentEvent::Mutation);
  }

  pub fn set_hidden(&self, hidden: bool) {
    self.hidden.store(hidden, Ordering::SeqCst);
    self.document.dispatch(DocumentEvent::VisibilityChange);
  }

  pub fn set_text(&self, selector: &str, text: &str) {
    self.texts.lock().unwrap().insert(selector.to_string(), text.to_string());
  }

  pub fn set_title(&self, title: &str) {
    *self.title.lock().unwrap() = title.to_string();
  }
}

impl Page for FakePage {
  fn history(&self) -> &History {
    &self.history
  }

  fn window(&self) -> &EventTarget<WindowEvent> {
    &self.window
  }

  fn document(&self) -> &EventTarget<DocumentEvent> {
    &self.document
  }

  fn is_hidden(&self) -> bool {
    self.hidden.load(Ordering::SeqCst)
  }

  fn has_body(&self) -> bool {
    self.body
  }

  fn query_video(&self) -> Option<SharedVideo> {
    self.video.lock().unwrap().clone()
  }

  fn query_text(&self, selector: &str) -> Option<String> {
    self.texts.lock().unwrap().get(selector).cloned()
  }

  fn title(&self) -> String {
    self.title.lock().unwrap().clone()
  }
}

/// Scriptable video element. Seeks made through [`VideoElement`] are
/// recorded; [`FakeVideo::force_time`] moves the playhead without recording,
/// as the player itself would.
pub struct FakeVideo {
  time: Mutex<f64>,
  duration: Mutex<f64>,
  paused: AtomicBool,
  seekable: AtomicUsize,
  events: EventTarget<MediaEvent>,
  seeks: Mutex<Vec<f64>>,
}

impl FakeVideo {
  /// A paused, seekable on-demand video.
  pub fn new(current_time: f64, duration: f64) -> Arc<Self> {
    Arc::new(Self {
      time: Mutex::new(current_time),
      duration: Mutex::new(duration),
      paused: AtomicBool::new(true),
      seekable: AtomicUsize::new(1),
      events: EventTarget::new(),
      seeks: Mutex::new(Vec::new()),
    })
  }

  pub fn live() -> Arc<Self> {
    let video = Self::new(0.0, f64::INFINITY);
    video.set_seekable_ranges(0);
    video
  }

  pub fn playing(current_time: f64, duration: f64) -> Arc<Self> {
    let video = Self::new(current_time, duration);
    video.paused.store(false, Ordering::SeqCst);
    video
  }

  pub fn play(&self) {
    self.paused.store(false, Ordering::SeqCst);
    self.events.dispatch(MediaEvent::Play);
  }

  pub fn pause(&self) {
    self.paused.store(true, Ordering::SeqCst);
    self.events.dispatch(MediaEvent::Pause);
  }

  pub fn force_time(&self, seconds: f64) {
    *self.time.lock().unwrap() = seconds;
  }

  pub fn set_duration(&self, seconds: f64) {
    *self.duration.lock().unwrap() = seconds;
  }

  pub fn set_seekable_ranges(&self, ranges: usize) {
    self.seekable.store(ranges, Ordering::SeqCst);
  }

  pub fn seeks(&self) -> Vec<f64> {
    self.seeks.lock().unwrap().clone()
  }
}

impl VideoElement for FakeVideo {
  fn current_time(&self) -> f64 {
    *self.time.lock().unwrap()
  }

  fn set_current_time(&self, seconds: f64) {
    *self.time.lock().unwrap() = seconds;
    self.seeks.lock().unwrap().push(seconds);
  }

  fn duration(&self) -> f64 {
    *self.duration.lock().unwrap()
  }

  fn paused(&self) -> bool {
    self.paused.load(Ordering::SeqCst)
  }

  fn seekable_ranges(&self) -> usize {
    self.seekable.load(Ordering::SeqCst)
  }

  fn events(&self) -> &EventTarget<MediaEvent> {
    &self.events
  }
}

/// In-memory store that records writes, can delay reads of video state to
/// open a race window, and can be told to fail.
pub struct RecordingStore {
  inner: Store<MemoryArea>,
  writes: Mutex<Vec<(String, StoredVideoState)>>,
  read_delay: Mutex<Duration>,
  failing: AtomicBool,
  failing_video_reads: AtomicBool,
}

impl RecordingStore {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      inner: Store::new(MemoryArea::new()),
      writes: Mutex::new(Vec::new()),
      read_delay: Mutex::new(Duration::ZERO),
      failing: AtomicBool::new(false),
      failing_video_reads: AtomicBool::new(false),
    })
  }

  /// Seed a record without it counting as a write.
  pub async fn seed(&self, video_id: &str, state: StoredVideoState) {
    self.inner.set_video_state(video_id, &state).await.unwrap();
  }

  pub fn writes(&self) -> Vec<(String, StoredVideoState)> {
    self.writes.lock().unwrap().clone()
  }

  pub fn set_read_delay(&self, delay: Duration) {
    *self.read_delay.lock().unwrap() = delay;
  }

  pub fn set_failing(&self, failing: bool) {
    self.failing.store(failing, Ordering::SeqCst);
  }

  /// Fail only `get_video_state`; settings reads keep working.
  pub fn set_failing_video_reads(&self, failing: bool) {
    self.failing_video_reads.store(failing, Ordering::SeqCst);
  }

  fn check(&self) -> Result<()> {
    if self.failing.load(Ordering::SeqCst) { Err(anyhow!("storage unavailable")) } else { Ok(()) }
  }
}

#[async_trait]
impl VideoStore for RecordingStore {
  async fn get_video_state(&self, video_id: &str) -> Result<Option<StoredVideoState>> {
    let delay = *self.read_delay.lock().unwrap();
    if !delay.is_zero() {
      tokio::time::sleep(delay).await;
    }
    self.check()?;
    if self.failing_video_reads.load(Ordering::SeqCst) {
      return Err(anyhow!("video state unavailable"));
    }
    self.inner.get_video_state(video_id).await
  }

  async fn set_video_state(&self, video_id: &str, state: &StoredVideoState) -> Result<()> {
    self.check()?;
    self.writes.lock().unwrap().push((video_id.to_string(), state.clone()));
    self.inner.set_video_state(video_id, state).await
  }

  async fn delete_video_state(&self, video_id: &str) -> Result<()> {
    self.check()?;
    self.inner.delete_video_state(video_id).await
  }

  async fn get_all_video_states(&self) -> Result<Vec<VideoRecord>> {
    self.check()?;
    self.inner.get_all_video_states().await
  }

  async fn get_ignored_channels(&self) -> Result<BTreeSet<String>> {
    self.check()?;
    self.inner.get_ignored_channels().await
  }

  async fn add_ignored_channel(&self, name: &str) -> Result<()> {
    self.inner.add_ignored_channel(name).await
  }

  async fn remove_ignored_channel(&self, name: &str) -> Result<()> {
    self.inner.remove_ignored_channel(name).await
  }

  async fn get_enabled(&self) -> Result<bool> {
    self.check()?;
    self.inner.get_enabled().await
  }

  async fn set_enabled(&self, enabled: bool) -> Result<()> {
    self.inner.set_enabled(enabled).await
  }
}

pub fn stored(t: f64, ft: f64, duration: f64) -> StoredVideoState {
  StoredVideoState {
    last_time: t,
    furthest_time: ft,
    updated_at: 1,
    duration,
    title: "Title".to_string(),
    channel: "Channel".to_string(),
  }
}
