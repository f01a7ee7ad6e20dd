use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Coalesces bursts of calls into one delayed call carrying the most recent
/// arguments. Every call cancels whatever is pending and schedules afresh.
///
/// A zero delay still defers the call to a spawned task, so a synchronous
/// burst of calls collapses into a single dispatch. Must be used from within
/// a tokio runtime.
pub struct Debouncer<T> {
  inner: Arc<Inner<T>>,
}

struct Inner<T> {
  delay: Duration,
  callback: Box<dyn Fn(T) + Send + Sync>,
  pending: Mutex<Pending>,
}

/// `seq` moves on every call and cancel. A task that wakes after being
/// replaced (abort raced with the wake on another worker) sees a newer
/// `seq` and stands down.
#[derive(Default)]
struct Pending {
  seq: u64,
  handle: Option<JoinHandle<()>>,
}

impl Pending {
  fn replace(&mut self) -> u64 {
    if let Some(handle) = self.handle.take() {
      handle.abort();
    }
    self.seq = self.seq.wrapping_add(1);
    self.seq
  }
}

impl<T> Inner<T> {
  /// Run the callback if `seq` is still the latest call. Returns whether it ran.
  fn fire_if_current(&self, seq: u64, args: T) -> bool {
    {
      let mut pending = self.pending.lock().expect("debounce mutex poisoned");
      if pending.seq != seq {
        return false;
      }
      pending.handle = None;
    }
    (self.callback)(args);
    true
  }
}

impl<T: Send + 'static> Debouncer<T> {
  pub fn new(delay: Duration, callback: impl Fn(T) + Send + Sync + 'static) -> Self {
    Self { inner: Arc::new(Inner { delay, callback: Box::new(callback), pending: Mutex::new(Pending::default()) }) }
  }

  pub fn call(&self, args: T) {
    let inner = Arc::clone(&self.inner);
    let mut pending = self.inner.pending.lock().expect("debounce mutex poisoned");
    let seq = pending.replace();
    pending.handle = Some(tokio::spawn(async move {
      tokio::time::sleep(inner.delay).await;
      inner.fire_if_current(seq, args);
    }));
  }

  /// Drop any pending call without running it.
  pub fn cancel(&self) {
    self.inner.pending.lock().expect("debounce mutex poisoned").replace();
  }

  pub fn is_pending(&self) -> bool {
    self.inner.pending.lock().expect("debounce mutex poisoned").handle.is_some()
  }
}

impl<T> Clone for Debouncer<T> {
  fn clone(&self) -> Self {
    Self { inner: Arc::clone(&self.inner) }
  }
}
