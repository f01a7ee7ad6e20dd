//! Per-tab playback tracking.
//!
//! A session covers one video id, from the navigation that reached it to the
//! next navigation (or unload). It moves through locating the element,
//! resuming, then listening for play/pause/visibility while a periodic loop
//! saves the position.
//!
//! Every session takes a fresh generation number. Anything that resumes after
//! an await (element wait, store reads, timers) first checks its generation is
//! still the current one and silently does nothing otherwise. Only the element
//! wait is cancelled explicitly; everything else is made stale by the bump.

use std::sync::{Arc, Mutex, Weak};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::constants::constants;
use crate::locator::{self, Canceller};
use crate::metadata::{MetadataProvider, clamp_resume_target};
use crate::nav::{NavigationWatcher, Subscription, WatchOptions};
use crate::page::{DocumentEvent, Listener, ListenerId, MediaEvent, Page, SharedVideo, VideoElement, WindowEvent};
use crate::store::{StoredVideoState, VideoStore, normalize_channel_name};

/// Why a save or resume did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
  /// Tracking is switched off globally.
  Disabled,
  IgnoredChannel,
  /// Persistence failed; the operation is dropped.
  StoreError,
  /// A newer session started while this one was waiting.
  Superseded,
  NoRecord,
  BelowResumeThreshold,
  Live,
  PastNearStart,
  /// Nothing tracked, URL moved on, or the player isn't in a saveable state.
  NotSafe,
  RateLimited,
}

/// Decisions reported to an attached [`Diagnostics`] observer.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
  TornDown { generation: u64 },
  SessionStarted { video_id: String, generation: u64 },
  LocateFailed { video_id: String, error: String },
  Resumed { video_id: String, target: f64 },
  ResumeReapplied { video_id: String, target: f64 },
  ResumeSkipped { video_id: String, reason: SkipReason },
  Saved { video_id: String, reason: &'static str, state: StoredVideoState },
  SaveSkipped { reason: SkipReason },
}

/// Observer for tracker decisions, for debugging and tests.
pub trait Diagnostics: Send + Sync {
  fn record(&self, event: TrackerEvent);
}

/// Point-in-time view of the session state.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerSnapshot {
  pub generation: u64,
  pub active_video_id: Option<String>,
  pub has_video: bool,
  pub last_write_at: Option<Instant>,
  pub furthest_time: f64,
  pub saving: bool,
  pub reapply_pending: bool,
  pub locating: bool,
  pub listening: bool,
}

/// Listeners attached for the active session.
struct Attached {
  video: SharedVideo,
  element: Vec<ListenerId>,
  visibility: ListenerId,
}

#[derive(Default)]
struct Session {
  generation: u64,
  active_id: Option<String>,
  video: Option<SharedVideo>,
  last_write_at: Option<Instant>,
  furthest: f64,
  /// Whether `furthest` already accounts for the stored record.
  furthest_seeded: bool,
  save_loop: Option<JoinHandle<()>>,
  reapply: Option<JoinHandle<()>>,
  locator: Option<Canceller>,
  attached: Option<Attached>,
}

#[derive(Default)]
struct Lifecycle {
  installed: bool,
  navigation: Option<Subscription>,
  unload: Option<ListenerId>,
}

struct Inner {
  page: Arc<dyn Page>,
  meta: Arc<dyn MetadataProvider>,
  store: Arc<dyn VideoStore>,
  diagnostics: Option<Arc<dyn Diagnostics>>,
  session: Mutex<Session>,
  lifecycle: Mutex<Lifecycle>,
}

/// The playback tracking controller for one page.
///
/// Cloning yields another handle to the same controller. Requires a tokio
/// runtime; the tracker is written for a single cooperative thread but stays
/// sound on a multi-threaded runtime.
#[derive(Clone)]
pub struct Tracker {
  inner: Arc<Inner>,
}

impl Tracker {
  pub fn new(page: Arc<dyn Page>, meta: Arc<dyn MetadataProvider>, store: Arc<dyn VideoStore>) -> Self {
    Self::build(page, meta, store, None)
  }

  pub fn with_diagnostics(
    page: Arc<dyn Page>,
    meta: Arc<dyn MetadataProvider>,
    store: Arc<dyn VideoStore>,
    diagnostics: Arc<dyn Diagnostics>,
  ) -> Self {
    Self::build(page, meta, store, Some(diagnostics))
  }

  fn build(
    page: Arc<dyn Page>,
    meta: Arc<dyn MetadataProvider>,
    store: Arc<dyn VideoStore>,
    diagnostics: Option<Arc<dyn Diagnostics>>,
  ) -> Self {
    Self {
      inner: Arc::new(Inner {
        page,
        meta,
        store,
        diagnostics,
        session: Mutex::new(Session::default()),
        lifecycle: Mutex::new(Lifecycle::default()),
      }),
    }
  }

  /// Hook into the page: watch navigation, clean up on unload, and check the
  /// current URL once. Only the first call does anything.
  pub fn install(&self) -> bool {
    {
      let mut lifecycle = self.inner.lifecycle.lock().expect("lifecycle mutex poisoned");
      if lifecycle.installed {
        return false;
      }
      lifecycle.installed = true;

      let options = WatchOptions { debounce: constants().navigation_debounce(), navigate_finish: true };
      let watcher = NavigationWatcher::new(Arc::clone(&self.inner.page), options);
      let weak = Arc::downgrade(&self.inner);
      lifecycle.navigation = Some(watcher.subscribe(move || {
        if let Some(inner) = weak.upgrade() {
          inner.handle_navigation();
        }
      }));

      let on_unload = listener(&self.inner, Inner::on_before_unload);
      lifecycle.unload = Some(self.inner.page.window().add_listener(WindowEvent::BeforeUnload, on_unload));
    }
    info!("tracker: installed");
    self.inner.handle_navigation();
    true
  }

  /// React to a possible route change.
  pub fn handle_navigation(&self) {
    self.inner.handle_navigation();
  }

  /// Start a session for `video_id`. The returned task finishes once the
  /// session is active, abandoned, or superseded.
  pub fn init_for_video(&self, video_id: &str) -> JoinHandle<()> {
    self.inner.init_for_video(video_id)
  }

  /// Check for a stored position and seek to it. No-op unless `token` is
  /// still the current generation when the lookup returns.
  pub async fn try_resume(&self, video: &SharedVideo, video_id: &str, token: u64) {
    self.inner.try_resume(video, video_id, token).await;
  }

  /// Write the current position if it is safe and allowed to.
  pub async fn save_now(&self, reason: &'static str) {
    self.inner.save_now(reason).await;
  }

  /// Whether the bound element's position is worth persisting right now.
  pub fn is_safe_to_save(&self) -> bool {
    let video = self.inner.session().video.clone();
    video.is_some_and(|v| self.inner.is_safe_to_save(v.as_ref()))
  }

  pub fn start_saving_loop(&self) {
    self.inner.start_saving_loop();
  }

  pub fn stop_saving_loop(&self) {
    self.inner.stop_saving_loop();
  }

  /// End the current session. Safe to call with nothing active.
  pub fn teardown(&self) {
    self.inner.teardown();
  }

  pub fn generation(&self) -> u64 {
    self.inner.session().generation
  }

  pub fn snapshot(&self) -> TrackerSnapshot {
    let s = self.inner.session();
    TrackerSnapshot {
      generation: s.generation,
      active_video_id: s.active_id.clone(),
      has_video: s.video.is_some(),
      last_write_at: s.last_write_at,
      furthest_time: s.furthest,
      saving: s.save_loop.is_some(),
      reapply_pending: s.reapply.is_some(),
      locating: s.locator.is_some(),
      listening: s.attached.is_some(),
    }
  }

  #[cfg(test)]
  pub(crate) fn set_active(&self, video_id: Option<&str>, video: Option<SharedVideo>) {
    let mut s = self.inner.session();
    s.active_id = video_id.map(str::to_string);
    s.video = video;
  }

  #[cfg(test)]
  pub(crate) fn set_last_write_at(&self, at: Option<Instant>) {
    self.inner.session().last_write_at = at;
  }
}

/// Wrap an `Inner` method as an event listener that doesn't keep the tracker alive.
fn listener(inner: &Arc<Inner>, f: fn(&Arc<Inner>)) -> Listener {
  let weak: Weak<Inner> = Arc::downgrade(inner);
  Arc::new(move || {
    if let Some(inner) = weak.upgrade() {
      f(&inner);
    }
  })
}

impl Inner {
  fn session(&self) -> std::sync::MutexGuard<'_, Session> {
    self.session.lock().expect("session mutex poisoned")
  }

  /// Run `f` on the session only if `token` is still the current generation.
  fn with_current<R>(&self, token: u64, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
    let mut s = self.session();
    (s.generation == token).then(|| f(&mut s))
  }

  fn is_current(&self, token: u64) -> bool {
    self.session().generation == token
  }

  fn emit(&self, event: TrackerEvent) {
    if let Some(diagnostics) = &self.diagnostics {
      diagnostics.record(event);
    }
  }

  fn handle_navigation(self: &Arc<Self>) {
    let next = self.meta.video_id();
    {
      let s = self.session();
      debug!(next = ?next, active = ?s.active_id, "tracker: url change");
      if s.active_id == next {
        return;
      }
    }
    self.teardown();
    self.session().active_id = next.clone();
    if let Some(video_id) = next {
      self.init_for_video(&video_id);
    }
  }

  fn teardown(&self) {
    let (generation, save_loop, reapply, locator, attached) = {
      let mut s = self.session();
      s.generation += 1;
      s.video = None;
      s.active_id = None;
      s.last_write_at = None;
      s.furthest = 0.0;
      s.furthest_seeded = false;
      (s.generation, s.save_loop.take(), s.reapply.take(), s.locator.take(), s.attached.take())
    };
    if let Some(handle) = save_loop {
      handle.abort();
    }
    if let Some(handle) = reapply {
      handle.abort();
    }
    if let Some(locator) = locator {
      locator.cancel();
    }
    if let Some(attached) = attached {
      for id in attached.element {
        attached.video.events().remove_listener(id);
      }
      self.page.document().remove_listener(attached.visibility);
    }
    debug!(generation, "tracker: teardown");
    self.emit(TrackerEvent::TornDown { generation });
  }

  fn init_for_video(self: &Arc<Self>, video_id: &str) -> JoinHandle<()> {
    let handle = locator::locate(Arc::clone(&self.page), constants().locate_timeout());
    let token = {
      let mut s = self.session();
      s.generation += 1;
      s.locator = Some(handle.canceller());
      s.generation
    };
    info!(video_id = %video_id, token, "tracker: init");
    self.emit(TrackerEvent::SessionStarted { video_id: video_id.to_string(), generation: token });

    let inner = Arc::clone(self);
    let video_id = video_id.to_string();
    tokio::spawn(async move {
      let located = handle.result().await;
      if inner.with_current(token, |s| s.locator = None).is_none() {
        return;
      }
      let video = match located {
        Ok(video) => video,
        Err(e) => {
          debug!(video_id = %video_id, err = %e, "tracker: video wait failed");
          inner.emit(TrackerEvent::LocateFailed { video_id, error: e.to_string() });
          return;
        }
      };
      if inner.with_current(token, |s| s.video = Some(Arc::clone(&video))).is_none() {
        return;
      }

      inner.try_resume(&video, &video_id, token).await;
      if !inner.is_current(token) {
        return;
      }

      inner.attach_listeners(&video, token);
      if !video.paused() && !inner.page.is_hidden() {
        inner.start_saving_loop();
      }
    })
  }

  fn attach_listeners(self: &Arc<Self>, video: &SharedVideo, token: u64) {
    let events = video.events();
    let element = vec![
      events.add_listener(MediaEvent::Pause, listener(self, Inner::on_pause)),
      events.add_listener(MediaEvent::Play, listener(self, Inner::on_play)),
    ];
    let visibility =
      self.page.document().add_listener(DocumentEvent::VisibilityChange, listener(self, Inner::on_visibility_change));
    let attached = Attached { video: Arc::clone(video), element, visibility };

    let leftover = {
      let mut s = self.session();
      if s.generation == token {
        s.attached.replace(attached)
      } else {
        Some(attached)
      }
    };
    if let Some(stale) = leftover {
      for id in stale.element {
        stale.video.events().remove_listener(id);
      }
      self.page.document().remove_listener(stale.visibility);
    }
  }

  fn on_pause(self: &Arc<Self>) {
    let inner = Arc::clone(self);
    tokio::spawn(async move { inner.save_now("pause").await });
    self.stop_saving_loop();
  }

  fn on_play(self: &Arc<Self>) {
    self.start_saving_loop();
  }

  fn on_visibility_change(self: &Arc<Self>) {
    if self.page.is_hidden() {
      let inner = Arc::clone(self);
      tokio::spawn(async move { inner.save_now("hidden").await });
      self.stop_saving_loop();
    } else {
      let playing = self.session().video.as_ref().is_some_and(|v| !v.paused());
      if playing {
        self.start_saving_loop();
      }
    }
  }

  fn on_before_unload(self: &Arc<Self>) {
    self.teardown();
    let (navigation, unload) = {
      let mut lifecycle = self.lifecycle.lock().expect("lifecycle mutex poisoned");
      (lifecycle.navigation.take(), lifecycle.unload.take())
    };
    drop(navigation);
    if let Some(id) = unload {
      self.page.window().remove_listener(id);
    }
    debug!("tracker: unloaded");
  }

  fn start_saving_loop(self: &Arc<Self>) {
    let mut s = self.session();
    if s.save_loop.is_some() {
      return;
    }
    debug!("tracker: start saving loop");
    let weak = Arc::downgrade(self);
    let period = constants().save_interval();
    s.save_loop = Some(tokio::spawn(async move {
      let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
      loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else { break };
        // Detached so stopping the loop never cuts a write off halfway.
        tokio::spawn(async move { inner.save_now("interval").await });
      }
    }));
  }

  fn stop_saving_loop(&self) {
    if let Some(handle) = self.session().save_loop.take() {
      debug!("tracker: stop saving loop");
      handle.abort();
    }
  }

  fn is_safe_to_save(&self, video: &dyn VideoElement) -> bool {
    if !self.meta.is_watch_page() {
      return false;
    }
    if self.session().active_id.is_none() {
      return false;
    }
    if self.meta.is_live(video) {
      return false;
    }
    let t = video.current_time();
    t.is_finite() && t > 0.0
  }

  /// Read the global switch. A failed read counts as enabled.
  async fn tracking_enabled(&self) -> bool {
    match self.store.get_enabled().await {
      Ok(enabled) => enabled,
      Err(e) => {
        debug!(err = %e, "tracker: could not read enabled flag");
        true
      }
    }
  }

  async fn is_ignored_channel(&self, name: &str) -> anyhow::Result<bool> {
    let normalized = normalize_channel_name(name);
    if normalized.is_empty() {
      return Ok(false);
    }
    Ok(self.store.get_ignored_channels().await?.contains(&normalized))
  }

  async fn try_resume(self: &Arc<Self>, video: &SharedVideo, video_id: &str, token: u64) {
    let skip = |reason: SkipReason| {
      debug!(video_id = %video_id, ?reason, "tracker: not resuming");
      self.emit(TrackerEvent::ResumeSkipped { video_id: video_id.to_string(), reason });
    };

    if !self.tracking_enabled().await {
      return skip(SkipReason::Disabled);
    }
    let channel = self.meta.channel_name().unwrap_or_else(|| constants().default_channel_name.clone());
    match self.is_ignored_channel(&channel).await {
      Ok(false) => {}
      Ok(true) => return skip(SkipReason::IgnoredChannel),
      Err(e) => {
        debug!(err = %e, "tracker: ignore-list lookup failed");
        return skip(SkipReason::StoreError);
      }
    }

    let stored = match self.store.get_video_state(video_id).await {
      Ok(stored) => stored,
      Err(e) => {
        debug!(err = %e, "tracker: video state lookup failed");
        return skip(SkipReason::StoreError);
      }
    };
    let seeded = self.with_current(token, |s| {
      s.furthest = stored.as_ref().map_or(0.0, |state| state.furthest_time);
      s.furthest_seeded = true;
    });
    if seeded.is_none() {
      return skip(SkipReason::Superseded);
    }

    let c = constants();
    let Some(state) = stored else { return skip(SkipReason::NoRecord) };
    if state.last_time < c.min_resume_secs {
      return skip(SkipReason::BelowResumeThreshold);
    }
    if self.meta.is_live(video.as_ref()) {
      return skip(SkipReason::Live);
    }
    if video.current_time() > c.near_start_window_secs {
      return skip(SkipReason::PastNearStart);
    }

    let target = clamp_resume_target(state.last_time, video.duration());
    info!(video_id = %video_id, target, current = video.current_time(), "tracker: resume");
    video.set_current_time(target);
    self.emit(TrackerEvent::Resumed { video_id: video_id.to_string(), target });
    self.schedule_reapply(video, video_id, target, token);
  }

  /// One delayed check that the seek stuck; the player sometimes snaps back
  /// while the stream initialises. A single retry, never a loop.
  fn schedule_reapply(self: &Arc<Self>, video: &SharedVideo, video_id: &str, target: f64, token: u64) {
    let inner = Arc::clone(self);
    let video = Arc::clone(video);
    let video_id = video_id.to_string();
    let handle = tokio::spawn(async move {
      tokio::time::sleep(constants().reapply_delay()).await;
      let still_active = inner
        .with_current(token, |s| {
          s.reapply = None;
          s.active_id.as_deref() == Some(video_id.as_str())
        })
        .unwrap_or(false);
      if !still_active {
        return;
      }
      let current = video.current_time();
      if (current - target).abs() > constants().reapply_tolerance_secs {
        debug!(video_id = %video_id, target, current, "tracker: resume reapply");
        video.set_current_time(target);
        inner.emit(TrackerEvent::ResumeReapplied { video_id, target });
      }
    });

    let previous = {
      let mut s = self.session();
      if s.generation == token { s.reapply.replace(handle) } else { Some(handle) }
    };
    if let Some(previous) = previous {
      previous.abort();
    }
  }

  async fn save_now(self: &Arc<Self>, reason: &'static str) {
    let now = Instant::now();
    let skip = |why: SkipReason| {
      debug!(reason, why = ?why, "tracker: not saving");
      self.emit(TrackerEvent::SaveSkipped { reason: why });
    };

    let tracked = {
      let s = self.session();
      match (&s.active_id, &s.video) {
        (Some(id), Some(video)) => {
          Some((s.generation, id.clone(), Arc::clone(video), s.last_write_at, s.furthest_seeded))
        }
        _ => None,
      }
    };
    let Some((token, video_id, video, last_write_at, seeded)) = tracked else { return skip(SkipReason::NotSafe) };
    if self.meta.video_id().as_deref() != Some(video_id.as_str()) || !self.is_safe_to_save(video.as_ref()) {
      return skip(SkipReason::NotSafe);
    }
    let gap = constants().min_write_gap();
    if last_write_at.is_some_and(|last| now.saturating_duration_since(last) < gap) {
      return skip(SkipReason::RateLimited);
    }

    if !self.tracking_enabled().await {
      return skip(SkipReason::Disabled);
    }
    let title = self.meta.video_title().unwrap_or_else(|| constants().default_video_title.clone());
    let channel = self.meta.channel_name().unwrap_or_else(|| constants().default_channel_name.clone());
    match self.is_ignored_channel(&channel).await {
      Ok(false) => {}
      Ok(true) => return skip(SkipReason::IgnoredChannel),
      Err(e) => {
        debug!(err = %e, "tracker: ignore-list lookup failed");
        return skip(SkipReason::StoreError);
      }
    }

    // Resume never read the record (switched off, ignored, or the store
    // failed), so merge the stored furthest before the first write.
    let stored_furthest = if seeded {
      None
    } else {
      match self.store.get_video_state(&video_id).await {
        Ok(stored) => Some(stored.map_or(0.0, |state| state.furthest_time)),
        Err(e) => {
          debug!(err = %e, "tracker: video state lookup failed");
          return skip(SkipReason::StoreError);
        }
      }
    };

    let current_time = video.current_time();
    let committed = self.with_current(token, |s| {
      if s.active_id.as_deref() != Some(video_id.as_str()) {
        return Err(SkipReason::Superseded);
      }
      // Another save may have landed while this one was waiting on the store.
      if s.last_write_at.is_some_and(|last| now.saturating_duration_since(last) < gap) {
        return Err(SkipReason::RateLimited);
      }
      s.last_write_at = Some(now);
      if let Some(stored) = stored_furthest
        && !s.furthest_seeded
      {
        s.furthest = s.furthest.max(stored);
        s.furthest_seeded = true;
      }
      s.furthest = s.furthest.max(current_time);
      Ok(s.furthest)
    });
    let furthest = match committed {
      Some(Ok(furthest)) => furthest,
      Some(Err(why)) => return skip(why),
      None => return skip(SkipReason::Superseded),
    };

    let duration = video.duration();
    let state = StoredVideoState {
      last_time: current_time,
      furthest_time: furthest,
      updated_at: chrono::Utc::now().timestamp_millis(),
      duration: if duration.is_finite() && duration > 0.0 { duration } else { f64::INFINITY },
      title,
      channel,
    };
    debug!(video_id = %video_id, reason, t = state.last_time, ft = state.furthest_time, "tracker: save");
    match self.store.set_video_state(&video_id, &state).await {
      Ok(()) => self.emit(TrackerEvent::Saved { video_id, reason, state }),
      Err(e) => {
        warn!(video_id = %video_id, err = %e, "tracker: save failed");
        self.emit(TrackerEvent::SaveSkipped { reason: SkipReason::StoreError });
      }
    }
  }
}
