//! Client-side route change detection.
//!
//! Three signals mean "the route may have changed": the page's history entry
//! points being called, browser back/forward, and the host app's own
//! navigation-finished event. All of them feed one debounced handler.

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::debounce::Debouncer;
use crate::page::{Listener, ListenerId, Page, RouteMutation, WindowEvent};

#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
  /// Quiet period before the handler runs. Zero still coalesces a
  /// synchronous burst into one call.
  pub debounce: Duration,
  /// Also listen for the host app's navigation-finished event.
  pub navigate_finish: bool,
}

impl Default for WatchOptions {
  fn default() -> Self {
    Self { debounce: Duration::ZERO, navigate_finish: false }
  }
}

pub struct NavigationWatcher {
  page: Arc<dyn Page>,
  options: WatchOptions,
}

impl NavigationWatcher {
  pub fn new(page: Arc<dyn Page>, options: WatchOptions) -> Self {
    Self { page, options }
  }

  /// Start delivering route changes to `handler` until the returned
  /// subscription is dropped or unsubscribed.
  ///
  /// The history entry points are intercepted on the first subscription for
  /// a page and stay intercepted for the page's lifetime.
  pub fn subscribe(&self, handler: impl Fn() + Send + Sync + 'static) -> Subscription {
    let debounced = Debouncer::new(self.options.debounce, move |()| handler());
    let notify: Listener = {
      let d = debounced.clone();
      Arc::new(move || d.call(()))
    };

    let already_patched = self.page.history().is_patched();
    let patch = self.page.history().patch();
    if !already_patched {
      debug!("nav: history entry points intercepted");
    }
    let route_ids = vec![
      patch.add_listener(RouteMutation::Push, Arc::clone(&notify)),
      patch.add_listener(RouteMutation::Replace, Arc::clone(&notify)),
    ];

    let window = self.page.window();
    let mut window_ids = vec![window.add_listener(WindowEvent::PopState, Arc::clone(&notify))];
    if self.options.navigate_finish {
      window_ids.push(window.add_listener(WindowEvent::NavigateFinish, notify));
    }

    Subscription { page: Arc::clone(&self.page), route_ids, window_ids, debounced, active: true }
  }
}

/// Listeners added by one [`NavigationWatcher::subscribe`] call.
pub struct Subscription {
  page: Arc<dyn Page>,
  route_ids: Vec<ListenerId>,
  window_ids: Vec<ListenerId>,
  debounced: Debouncer<()>,
  active: bool,
}

impl Subscription {
  /// Remove every listener this subscription added and drop any pending
  /// notification. The history interception itself stays in place because
  /// other subscribers may rely on it. Safe to call more than once.
  pub fn unsubscribe(&mut self) {
    if !self.active {
      return;
    }
    self.active = false;
    let patch = self.page.history().patch();
    for id in self.route_ids.drain(..) {
      patch.remove_listener(id);
    }
    for id in self.window_ids.drain(..) {
      self.page.window().remove_listener(id);
    }
    self.debounced.cancel();
  }

  pub fn is_active(&self) -> bool {
    self.active
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.unsubscribe();
  }
}
