//! Waiting for the player's video element to show up.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::page::{DocumentEvent, ListenerId, Page, SharedVideo};

#[derive(Debug, Error)]
pub enum LocateError {
  #[error("timeout waiting for video after {0:?}")]
  Timeout(Duration),
  #[error("document body missing")]
  MissingRoot,
  #[error("video lookup cancelled")]
  Cancelled,
}

/// A pending [`locate`]. Await [`LocateHandle::result`] for the element;
/// [`LocateHandle::canceller`] hands out a way to stop it from elsewhere.
pub struct LocateHandle {
  rx: oneshot::Receiver<Result<SharedVideo, LocateError>>,
  shared: Arc<Shared>,
}

/// Stops a pending lookup. Cheap to clone; cancelling twice, or after the
/// lookup settled, does nothing.
#[derive(Clone)]
pub struct Canceller {
  shared: Arc<Shared>,
}

struct Shared {
  page: Arc<dyn Page>,
  state: Mutex<Waiting>,
}

#[derive(Default)]
struct Waiting {
  tx: Option<oneshot::Sender<Result<SharedVideo, LocateError>>>,
  observer: Option<ListenerId>,
  timer: Option<JoinHandle<()>>,
}

impl Shared {
  /// Settle once: stop observing, stop the timer, and deliver `outcome`.
  /// `None` settles without delivering anything (cancellation).
  fn settle(&self, outcome: Option<Result<SharedVideo, LocateError>>) {
    let (tx, observer, timer) = {
      let mut state = self.state.lock().expect("locator mutex poisoned");
      (state.tx.take(), state.observer.take(), state.timer.take())
    };
    let Some(tx) = tx else { return };
    if let Some(id) = observer {
      self.page.document().remove_listener(id);
    }
    if let Some(timer) = timer {
      timer.abort();
    }
    if let Some(outcome) = outcome {
      let _ = tx.send(outcome);
    }
  }

  fn is_settled(&self) -> bool {
    self.state.lock().expect("locator mutex poisoned").tx.is_none()
  }
}

/// Resolve to the page's video element, waiting up to `timeout` for the
/// player to insert one.
///
/// An element already in the document resolves immediately. Otherwise the
/// document body is observed for insertions; a document without a body fails
/// straight away. Must be called from within a tokio runtime.
pub fn locate(page: Arc<dyn Page>, timeout: Duration) -> LocateHandle {
  let (tx, rx) = oneshot::channel();
  let shared = Arc::new(Shared { page: Arc::clone(&page), state: Mutex::new(Waiting::default()) });

  if let Some(video) = page.query_video() {
    let _ = tx.send(Ok(video));
    return LocateHandle { rx, shared };
  }
  if !page.has_body() {
    let _ = tx.send(Err(LocateError::MissingRoot));
    return LocateHandle { rx, shared };
  }

  shared.state.lock().expect("locator mutex poisoned").tx = Some(tx);

  let weak = Arc::downgrade(&shared);
  let observer = page.document().add_listener(
    DocumentEvent::Mutation,
    Arc::new(move || {
      let Some(shared) = weak.upgrade() else { return };
      if let Some(video) = shared.page.query_video() {
        shared.settle(Some(Ok(video)));
      }
    }),
  );

  let weak = Arc::downgrade(&shared);
  let timer = tokio::spawn(async move {
    tokio::time::sleep(timeout).await;
    if let Some(shared) = weak.upgrade() {
      debug!(?timeout, "locator: timed out");
      // Detach our own handle first so settle() doesn't abort the running task.
      shared.state.lock().expect("locator mutex poisoned").timer.take();
      shared.settle(Some(Err(LocateError::Timeout(timeout))));
    }
  });

  {
    let mut state = shared.state.lock().expect("locator mutex poisoned");
    // A mutation listener may already have settled us synchronously; don't leak.
    if state.tx.is_none() {
      drop(state);
      page.document().remove_listener(observer);
      timer.abort();
    } else {
      state.observer = Some(observer);
      state.timer = Some(timer);
    }
  }

  LocateHandle { rx, shared }
}

impl LocateHandle {
  pub fn canceller(&self) -> Canceller {
    Canceller { shared: Arc::clone(&self.shared) }
  }

  pub fn cancel(&self) {
    self.shared.settle(None);
  }

  pub fn is_settled(&self) -> bool {
    self.shared.is_settled()
  }

  pub async fn result(self) -> Result<SharedVideo, LocateError> {
    self.rx.await.unwrap_or(Err(LocateError::Cancelled))
  }
}

impl Canceller {
  pub fn cancel(&self) {
    self.shared.settle(None);
  }
}
