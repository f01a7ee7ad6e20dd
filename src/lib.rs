//! Remembers where each video was left off and resumes it on return, across
//! the single-page navigations of a video site.
//!
//! The host page (URL, history, DOM queries, media element) is abstracted by
//! [`page::Page`]; persistence by [`store::VideoStore`]. [`tracker::Tracker`]
//! wires them together.

pub mod config;
pub mod constants;
pub mod debounce;
pub mod library;
pub mod locator;
pub mod logging;
pub mod metadata;
pub mod nav;
pub mod page;
pub mod store;
pub mod tracker;

#[cfg(test)]
mod test_support;

pub use library::{Category, Library};
pub use metadata::{MetadataProvider, PageMetadata};
pub use page::{Page, VideoElement};
pub use store::{FileArea, MemoryArea, Store, StoredVideoState, VideoStore};
pub use tracker::{Tracker, TrackerEvent, TrackerSnapshot};
