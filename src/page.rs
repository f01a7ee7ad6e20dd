//! Host page abstraction.
//!
//! The tracker never touches a real DOM. Everything it needs from the page
//! (location, the history entry points, event targets, the video element and
//! a handful of text lookups) goes through the [`Page`] and [`VideoElement`]
//! traits, which a browser binding or a test fake implements.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use url::Url;

/// Callback registered on an [`EventTarget`].
pub type Listener = Arc<dyn Fn() + Send + Sync>;

/// Shared handle to the page's video element. The page owns the element;
/// holders only keep it alive for the duration of a tracking session.
pub type SharedVideo = Arc<dyn VideoElement>;

/// Events fired on the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowEvent {
  /// Browser back/forward.
  PopState,
  /// The host app finished a client-side route transition.
  NavigateFinish,
  BeforeUnload,
}

/// Events fired on the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentEvent {
  VisibilityChange,
  /// Something in the body subtree was inserted or removed.
  Mutation,
}

/// The intercepted history entry point that changed the location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteMutation {
  Push,
  Replace,
}

/// Events fired on a video element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaEvent {
  Play,
  Pause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A listener registry keyed by event kind.
pub struct EventTarget<E> {
  next_id: AtomicU64,
  listeners: Mutex<Vec<(ListenerId, E, Listener)>>,
}

impl<E: Copy + PartialEq> EventTarget<E> {
  pub fn new() -> Self {
    Self { next_id: AtomicU64::new(1), listeners: Mutex::new(Vec::new()) }
  }

  pub fn add_listener(&self, kind: E, listener: Listener) -> ListenerId {
    let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
    self.listeners.lock().expect("listener registry mutex poisoned").push((id, kind, listener));
    id
  }

  /// Remove a listener. Returns `false` if it was already gone.
  pub fn remove_listener(&self, id: ListenerId) -> bool {
    let mut listeners = self.listeners.lock().expect("listener registry mutex poisoned");
    let before = listeners.len();
    listeners.retain(|(lid, _, _)| *lid != id);
    listeners.len() != before
  }

  /// Invoke every listener registered for `kind`.
  ///
  /// Listeners are snapshotted first, so a callback may add or remove
  /// listeners (including itself) without deadlocking.
  pub fn dispatch(&self, kind: E) {
    let snapshot: Vec<Listener> = self
      .listeners
      .lock()
      .expect("listener registry mutex poisoned")
      .iter()
      .filter(|(_, k, _)| *k == kind)
      .map(|(_, _, l)| Arc::clone(l))
      .collect();
    for listener in snapshot {
      listener();
    }
  }

  pub fn listener_count(&self, kind: E) -> usize {
    self.listeners.lock().expect("listener registry mutex poisoned").iter().filter(|(_, k, _)| *k == kind).count()
  }
}

impl<E: Copy + PartialEq> Default for EventTarget<E> {
  fn default() -> Self {
    Self::new()
  }
}

/// The page's session history: current location plus the two imperative
/// route-mutation entry points single-page apps call.
///
/// Interception is installed at most once per page lifetime and is never
/// removed; see [`History::patch`].
pub struct History {
  location: Mutex<Url>,
  patch: OnceLock<EventTarget<RouteMutation>>,
}

impl History {
  pub fn new(location: Url) -> Self {
    Self { location: Mutex::new(location), patch: OnceLock::new() }
  }

  pub fn location(&self) -> Url {
    self.location.lock().expect("history mutex poisoned").clone()
  }

  /// Push a new entry. `url` may be relative to the current location.
  pub fn push_state(&self, url: &str) -> Result<()> {
    self.mutate(url, RouteMutation::Push).context("pushState failed")
  }

  /// Replace the current entry. `url` may be relative to the current location.
  pub fn replace_state(&self, url: &str) -> Result<()> {
    self.mutate(url, RouteMutation::Replace).context("replaceState failed")
  }

  /// Move the location without going through the patched entry points,
  /// as the browser does on back/forward before firing `popstate`.
  pub fn set_location(&self, url: Url) {
    *self.location.lock().expect("history mutex poisoned") = url;
  }

  /// Intercept both entry points, returning the registry notified after each
  /// mutation. The interception is installed on the first call only; later
  /// calls return the same registry.
  pub(crate) fn patch(&self) -> &EventTarget<RouteMutation> {
    self.patch.get_or_init(EventTarget::new)
  }

  pub fn is_patched(&self) -> bool {
    self.patch.get().is_some()
  }

  fn mutate(&self, url: &str, kind: RouteMutation) -> Result<()> {
    {
      let mut location = self.location.lock().expect("history mutex poisoned");
      let next = location.join(url).with_context(|| format!("invalid history URL: {}", url))?;
      *location = next;
    }
    if let Some(patch) = self.patch.get() {
      patch.dispatch(kind);
    }
    Ok(())
  }
}

/// A `<video>` element as the tracker sees it.
pub trait VideoElement: Send + Sync {
  /// Playback position in seconds. May be NaN while the player initialises.
  fn current_time(&self) -> f64;
  fn set_current_time(&self, seconds: f64);
  /// Media duration in seconds; infinite for live streams, NaN when unknown.
  fn duration(&self) -> f64;
  fn paused(&self) -> bool;
  /// Number of seekable time ranges.
  fn seekable_ranges(&self) -> usize;
  fn events(&self) -> &EventTarget<MediaEvent>;
}

/// The document and window of the host page.
pub trait Page: Send + Sync {
  fn history(&self) -> &History;
  fn window(&self) -> &EventTarget<WindowEvent>;
  fn document(&self) -> &EventTarget<DocumentEvent>;
  fn is_hidden(&self) -> bool;
  /// Whether the document has a body that can be observed for mutations.
  fn has_body(&self) -> bool;
  /// The first video element in the document, if any.
  fn query_video(&self) -> Option<SharedVideo>;
  /// Text content of the first element matching `selector`, untrimmed.
  fn query_text(&self, selector: &str) -> Option<String>;
  /// The document title.
  fn title(&self) -> String;

  fn location(&self) -> Url {
    self.history().location()
  }
}

/// Element identity: two handles refer to the same element.
pub fn same_element(a: &SharedVideo, b: &SharedVideo) -> bool {
  std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;

  fn counter() -> (Arc<AtomicUsize>, Listener) {
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    (count, Arc::new(move || {
      c.fetch_add(1, Ordering::SeqCst);
    }))
  }

  #[test]
  fn dispatch_only_reaches_matching_kind() {
    let target = EventTarget::new();
    let (plays, on_play) = counter();
    let (pauses, on_pause) = counter();
    target.add_listener(MediaEvent::Play, on_play);
    target.add_listener(MediaEvent::Pause, on_pause);

    target.dispatch(MediaEvent::Play);
    target.dispatch(MediaEvent::Play);

    assert_eq!(plays.load(Ordering::SeqCst), 2);
    assert_eq!(pauses.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn removed_listener_is_not_called_and_removal_is_idempotent() {
    let target = EventTarget::new();
    let (count, listener) = counter();
    let id = target.add_listener(WindowEvent::PopState, listener);

    assert!(target.remove_listener(id));
    assert!(!target.remove_listener(id));
    target.dispatch(WindowEvent::PopState);

    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(target.listener_count(WindowEvent::PopState), 0);
  }

  #[test]
  fn listener_can_remove_itself_during_dispatch() {
    let target = Arc::new(EventTarget::new());
    let slot: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));
    let t = Arc::clone(&target);
    let s = Arc::clone(&slot);
    let id = target.add_listener(
      DocumentEvent::Mutation,
      Arc::new(move || {
        if let Some(id) = s.lock().unwrap().take() {
          t.remove_listener(id);
        }
      }),
    );
    *slot.lock().unwrap() = Some(id);

    target.dispatch(DocumentEvent::Mutation);
    assert_eq!(target.listener_count(DocumentEvent::Mutation), 0);
  }

  #[test]
  fn history_resolves_relative_urls_and_notifies_once_patched() {
    let history = History::new(Url::parse("https://www.youtube.com/").unwrap());
    let (pushes, on_push) = counter();
    let (replaces, on_replace) = counter();

    history.push_state("/watch?v=abc").unwrap();
    assert!(!history.is_patched());
    assert_eq!(history.location().query(), Some("v=abc"));

    history.patch().add_listener(RouteMutation::Push, on_push);
    history.patch().add_listener(RouteMutation::Replace, on_replace);
    history.push_state("/watch?v=def").unwrap();
    history.replace_state("/results?search_query=x").unwrap();

    assert_eq!(pushes.load(Ordering::SeqCst), 1);
    assert_eq!(replaces.load(Ordering::SeqCst), 1);
    assert_eq!(history.location().path(), "/results");
  }

  #[test]
  fn repeated_patch_returns_the_same_registry() {
    let history = History::new(Url::parse("https://www.youtube.com/").unwrap());
    let (count, listener) = counter();

    history.patch().add_listener(RouteMutation::Push, listener);
    let again = history.patch();
    assert_eq!(again.listener_count(RouteMutation::Push), 1);

    history.push_state("/watch?v=1").unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(history.is_patched());
  }

  #[test]
  fn invalid_history_url_is_an_error_and_keeps_location() {
    let history = History::new(Url::parse("https://www.youtube.com/watch?v=a").unwrap());
    assert!(history.push_state("http://[::1").is_err());
    assert_eq!(history.location().query(), Some("v=a"));
  }
}
