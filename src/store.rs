//! Persisted playback positions, the ignored-channel list and the global
//! on/off switch, layered over a raw JSON key-value area.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

const VIDEO_KEY_PREFIX: &str = "ytp:";
const IGNORED_CHANNELS_KEY: &str = "ignoredChannels";
const ENABLED_KEY: &str = "enabled";

fn video_key(video_id: &str) -> String {
  format!("{}{}", VIDEO_KEY_PREFIX, video_id)
}

/// Trim and case-fold a channel name for ignore-list comparisons.
pub fn normalize_channel_name(name: &str) -> String {
  name.trim().to_lowercase()
}

/// What is remembered about one video.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredVideoState {
  /// Last observed position, seconds.
  #[serde(rename = "t")]
  pub last_time: f64,
  /// Furthest position ever observed, seconds.
  #[serde(rename = "ft")]
  pub furthest_time: f64,
  /// Epoch milliseconds of the write.
  #[serde(rename = "updatedAt")]
  pub updated_at: i64,
  /// Seconds; `f64::INFINITY` for live or unknown-length media.
  #[serde(serialize_with = "serialize_duration")]
  pub duration: f64,
  pub title: String,
  pub channel: String,
}

/// JSON has no infinity, so the unbounded sentinel goes out as `null`.
fn serialize_duration<S: Serializer>(duration: &f64, s: S) -> Result<S::Ok, S::Error> {
  if duration.is_finite() { s.serialize_some(duration) } else { s.serialize_none() }
}

/// Loosely-typed view of a stored record. `t` and `updatedAt` are required;
/// everything else has a fallback, including when it holds the wrong type.
#[derive(Deserialize)]
struct RawRecord {
  t: f64,
  #[serde(rename = "updatedAt")]
  updated_at: f64,
  ft: Option<Value>,
  duration: Option<Value>,
  title: Option<Value>,
  channel: Option<Value>,
}

fn text_or_empty(value: Option<&Value>) -> String {
  value.and_then(Value::as_str).unwrap_or_default().to_string()
}

impl StoredVideoState {
  /// Decode a stored value; anything malformed is treated as absent.
  pub fn from_value(value: &Value) -> Option<Self> {
    let raw: RawRecord = serde_json::from_value(value.clone()).ok()?;
    Some(Self {
      last_time: raw.t,
      furthest_time: raw.ft.as_ref().and_then(Value::as_f64).unwrap_or(raw.t),
      updated_at: raw.updated_at as i64,
      duration: raw.duration.as_ref().and_then(Value::as_f64).unwrap_or(f64::INFINITY),
      title: text_or_empty(raw.title.as_ref()),
      channel: text_or_empty(raw.channel.as_ref()),
    })
  }

  pub fn to_value(&self) -> Result<Value> {
    serde_json::to_value(self).context("Failed to encode video state")
  }
}

/// A stored record together with its video id, as listed by
/// [`VideoStore::get_all_video_states`].
#[derive(Debug, Clone, PartialEq)]
pub struct VideoRecord {
  pub video_id: String,
  pub state: StoredVideoState,
}

/// Raw JSON key-value storage, the shape of a browser extension's local
/// storage area.
#[async_trait]
pub trait StorageArea: Send + Sync {
  async fn get(&self, key: &str) -> Result<Option<Value>>;
  async fn get_all(&self) -> Result<Map<String, Value>>;
  async fn set(&self, key: &str, value: Value) -> Result<()>;
  async fn remove(&self, key: &str) -> Result<()>;
}

/// Everything the tracker and the list UI persist.
#[async_trait]
pub trait VideoStore: Send + Sync {
  async fn get_video_state(&self, video_id: &str) -> Result<Option<StoredVideoState>>;
  /// Replace whatever was stored for `video_id`.
  async fn set_video_state(&self, video_id: &str, state: &StoredVideoState) -> Result<()>;
  async fn delete_video_state(&self, video_id: &str) -> Result<()>;
  async fn get_all_video_states(&self) -> Result<Vec<VideoRecord>>;
  /// Normalized channel names.
  async fn get_ignored_channels(&self) -> Result<BTreeSet<String>>;
  async fn add_ignored_channel(&self, name: &str) -> Result<()>;
  async fn remove_ignored_channel(&self, name: &str) -> Result<()>;
  /// Global switch, on unless explicitly turned off.
  async fn get_enabled(&self) -> Result<bool>;
  async fn set_enabled(&self, enabled: bool) -> Result<()>;
}

/// [`VideoStore`] over any [`StorageArea`], namespacing video records under
/// `ytp:` so they never collide with settings keys.
pub struct Store<A> {
  area: A,
}

impl<A: StorageArea> Store<A> {
  pub fn new(area: A) -> Self {
    Self { area }
  }

  async fn write_ignored(&self, channels: &BTreeSet<String>) -> Result<()> {
    let value = serde_json::to_value(channels).context("Failed to encode ignored channels")?;
    self.area.set(IGNORED_CHANNELS_KEY, value).await
  }
}

#[async_trait]
impl<A: StorageArea> VideoStore for Store<A> {
  async fn get_video_state(&self, video_id: &str) -> Result<Option<StoredVideoState>> {
    let value = self.area.get(&video_key(video_id)).await?;
    Ok(value.as_ref().and_then(StoredVideoState::from_value))
  }

  async fn set_video_state(&self, video_id: &str, state: &StoredVideoState) -> Result<()> {
    self.area.set(&video_key(video_id), state.to_value()?).await
  }

  async fn delete_video_state(&self, video_id: &str) -> Result<()> {
    self.area.remove(&video_key(video_id)).await
  }

  async fn get_all_video_states(&self) -> Result<Vec<VideoRecord>> {
    let all = self.area.get_all().await?;
    Ok(
      all
        .iter()
        .filter_map(|(key, value)| {
          let video_id = key.strip_prefix(VIDEO_KEY_PREFIX)?;
          let state = StoredVideoState::from_value(value)?;
          Some(VideoRecord { video_id: video_id.to_string(), state })
        })
        .collect(),
    )
  }

  async fn get_ignored_channels(&self) -> Result<BTreeSet<String>> {
    let Some(value) = self.area.get(IGNORED_CHANNELS_KEY).await? else {
      return Ok(BTreeSet::new());
    };
    let names: Vec<Value> = match value {
      Value::Array(items) => items,
      other => {
        debug!(value = %other, "store: ignoring malformed ignored-channel list");
        return Ok(BTreeSet::new());
      }
    };
    Ok(names.iter().filter_map(Value::as_str).map(normalize_channel_name).filter(|n| !n.is_empty()).collect())
  }

  async fn add_ignored_channel(&self, name: &str) -> Result<()> {
    let normalized = normalize_channel_name(name);
    if normalized.is_empty() {
      return Ok(());
    }
    let mut channels = self.get_ignored_channels().await?;
    if channels.insert(normalized) {
      self.write_ignored(&channels).await?;
    }
    Ok(())
  }

  async fn remove_ignored_channel(&self, name: &str) -> Result<()> {
    let mut channels = self.get_ignored_channels().await?;
    if channels.remove(&normalize_channel_name(name)) {
      self.write_ignored(&channels).await?;
    }
    Ok(())
  }

  async fn get_enabled(&self) -> Result<bool> {
    Ok(self.area.get(ENABLED_KEY).await?.and_then(|v| v.as_bool()).unwrap_or(true))
  }

  async fn set_enabled(&self, enabled: bool) -> Result<()> {
    self.area.set(ENABLED_KEY, Value::Bool(enabled)).await
  }
}

/// In-process storage area.
#[derive(Default)]
pub struct MemoryArea {
  values: Mutex<HashMap<String, Value>>,
}

impl MemoryArea {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl StorageArea for MemoryArea {
  async fn get(&self, key: &str) -> Result<Option<Value>> {
    Ok(self.values.lock().expect("memory area mutex poisoned").get(key).cloned())
  }

  async fn get_all(&self) -> Result<Map<String, Value>> {
    let values = self.values.lock().expect("memory area mutex poisoned");
    Ok(values.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
  }

  async fn set(&self, key: &str, value: Value) -> Result<()> {
    self.values.lock().expect("memory area mutex poisoned").insert(key.to_string(), value);
    Ok(())
  }

  async fn remove(&self, key: &str) -> Result<()> {
    self.values.lock().expect("memory area mutex poisoned").remove(key);
    Ok(())
  }
}

/// Storage area persisted as one JSON object on disk. Writes go through a
/// temp file and a rename so a crash never leaves a half-written store.
pub struct FileArea {
  path: PathBuf,
  lock: AsyncMutex<()>,
}

impl FileArea {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into(), lock: AsyncMutex::new(()) }
  }

  /// `store.json` in the platform data directory.
  pub fn default_path() -> Option<PathBuf> {
    crate::config::project_dirs().map(|dirs| dirs.data_dir().join("store.json"))
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  async fn read(&self) -> Result<Map<String, Value>> {
    let content = match tokio::fs::read_to_string(&self.path).await {
      Ok(content) => content,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
      Err(e) => return Err(e).with_context(|| format!("Failed to read store {}", self.path.display())),
    };
    if content.trim().is_empty() {
      return Ok(Map::new());
    }
    serde_json::from_str(&content).with_context(|| format!("Store {} is not a JSON object", self.path.display()))
  }

  async fn write(&self, values: &Map<String, Value>) -> Result<()> {
    if let Some(dir) = self.path.parent() {
      tokio::fs::create_dir_all(dir).await.with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let content = serde_json::to_string_pretty(values).context("Failed to encode store")?;
    let tmp = self.path.with_extension("json.tmp");
    tokio::fs::write(&tmp, content).await.with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, &self.path).await.with_context(|| format!("Failed to replace {}", self.path.display()))
  }
}

#[async_trait]
impl StorageArea for FileArea {
  async fn get(&self, key: &str) -> Result<Option<Value>> {
    let _guard = self.lock.lock().await;
    Ok(self.read().await?.remove(key))
  }

  async fn get_all(&self) -> Result<Map<String, Value>> {
    let _guard = self.lock.lock().await;
    self.read().await
  }

  async fn set(&self, key: &str, value: Value) -> Result<()> {
    let _guard = self.lock.lock().await;
    let mut values = self.read().await?;
    values.insert(key.to_string(), value);
    self.write(&values).await
  }

  async fn remove(&self, key: &str) -> Result<()> {
    let _guard = self.lock.lock().await;
    let mut values = self.read().await?;
    if values.remove(key).is_some() {
      self.write(&values).await?;
    }
    Ok(())
  }
}
