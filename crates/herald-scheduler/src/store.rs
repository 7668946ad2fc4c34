//! Content repository and scheduler configuration store.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::{ChannelState, ChannelStatus, ContentItem, SchedulerConfig, SiteStatus, StoreError};

/// Filter for [`ContentRepository::find_many`].
#[derive(Debug, Clone, Default)]
pub struct ItemQuery {
    pub site_status: Option<SiteStatus>,
    /// Empty matches any channel status.
    pub channel_statuses: Vec<ChannelStatus>,
    /// Whether items with no channel state match a non-empty `channel_statuses`.
    pub include_absent: bool,
    pub published_to_channel_since: Option<DateTime<Utc>>,
    pub has_post_id: Option<bool>,
}

impl ItemQuery {
    /// Site-published items never touched or not yet shared.
    pub fn candidates() -> Self {
        Self {
            site_status: Some(SiteStatus::Published),
            channel_statuses: vec![ChannelStatus::NotShared],
            include_absent: true,
            ..Self::default()
        }
    }

    /// Items that went live on the channel at or after `since`.
    pub fn published_to_channel_since(since: DateTime<Utc>) -> Self {
        Self {
            channel_statuses: vec![ChannelStatus::Published],
            published_to_channel_since: Some(since),
            ..Self::default()
        }
    }

    /// Items the reconciliation sweep should check upstream.
    pub fn syncable() -> Self {
        Self {
            channel_statuses: vec![ChannelStatus::Published, ChannelStatus::Sharing],
            has_post_id: Some(true),
            ..Self::default()
        }
    }

    pub fn matches(&self, item: &ContentItem) -> bool {
        if let Some(status) = self.site_status {
            if item.status != status {
                return false;
            }
        }
        if !self.channel_statuses.is_empty() {
            let status_ok = match &item.channel {
                None => self.include_absent,
                Some(state) => self.channel_statuses.contains(&state.status),
            };
            if !status_ok {
                return false;
            }
        }
        if let Some(since) = self.published_to_channel_since {
            let recent = item
                .channel
                .as_ref()
                .and_then(|c| c.published_at)
                .is_some_and(|at| at >= since);
            if !recent {
                return false;
            }
        }
        if let Some(wanted) = self.has_post_id {
            let has = item.channel.as_ref().is_some_and(|c| c.post_id.is_some());
            if has != wanted {
                return false;
            }
        }
        true
    }
}

/// Storage for content items and their channel state.
#[async_trait]
pub trait ContentRepository: Send + Sync {
    async fn find_many(&self, query: &ItemQuery) -> Result<Vec<ContentItem>, StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<ContentItem>, StoreError>;

    /// Write `state` only if the stored status (absent reads as `NotShared`)
    /// equals `expected`. Returns whether the write happened.
    async fn compare_and_swap_channel_state(
        &self,
        id: &str,
        expected: ChannelStatus,
        state: ChannelState,
    ) -> Result<bool, StoreError>;
}

/// Storage for the singleton [`SchedulerConfig`].
#[async_trait]
pub trait SchedulerConfigStore: Send + Sync {
    async fn load_config(&self) -> Result<SchedulerConfig, StoreError>;

    async fn record_published(&self, at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Serialized form shared by both stores.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreData {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub items: Vec<ContentItem>,
}

impl StoreData {
    fn find_many(&self, query: &ItemQuery) -> Vec<ContentItem> {
        self.items
            .iter()
            .filter(|item| query.matches(item))
            .cloned()
            .collect()
    }

    fn find_by_id(&self, id: &str) -> Option<ContentItem> {
        self.items.iter().find(|item| item.id == id).cloned()
    }

    fn item_mut(&mut self, id: &str) -> Result<&mut ContentItem, StoreError> {
        self.items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    fn compare_and_swap(
        &mut self,
        id: &str,
        expected: ChannelStatus,
        state: ChannelState,
    ) -> Result<bool, StoreError> {
        let item = self.item_mut(id)?;
        if item.channel_status() != expected {
            return Ok(false);
        }
        item.channel = Some(state);
        Ok(true)
    }
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<StoreData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(data: StoreData) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Insert or replace an item.
    pub async fn upsert_item(&self, item: ContentItem) {
        let mut data = self.data.write().await;
        match data.items.iter_mut().find(|i| i.id == item.id) {
            Some(existing) => *existing = item,
            None => data.items.push(item),
        }
    }

    pub async fn set_config(&self, config: SchedulerConfig) {
        self.data.write().await.scheduler = config;
    }
}

#[async_trait]
impl ContentRepository for MemoryStore {
    async fn find_many(&self, query: &ItemQuery) -> Result<Vec<ContentItem>, StoreError> {
        Ok(self.data.read().await.find_many(query))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ContentItem>, StoreError> {
        Ok(self.data.read().await.find_by_id(id))
    }

    async fn compare_and_swap_channel_state(
        &self,
        id: &str,
        expected: ChannelStatus,
        state: ChannelState,
    ) -> Result<bool, StoreError> {
        self.data.write().await.compare_and_swap(id, expected, state)
    }
}

#[async_trait]
impl SchedulerConfigStore for MemoryStore {
    async fn load_config(&self) -> Result<SchedulerConfig, StoreError> {
        Ok(self.data.read().await.scheduler.clone())
    }

    async fn record_published(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.data.write().await.scheduler.last_published_at = Some(at);
        Ok(())
    }
}

/// Store backed by a JSON document. Nothing is cached between calls: each
/// one reads the file afresh and each change is written back atomically, so
/// the daemon and one-shot commands sharing the file see each other's edits.
pub struct JsonFileStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open `path`, starting empty if it does not exist yet. An unreadable
    /// or malformed file fails here rather than on the first tick.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let data = load(&path)?;
        debug!(path = %path.display(), items = data.items.len(), "opened state file");
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the document and persist it.
    pub async fn replace(&self, data: StoreData) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        self.persist(&data)
    }

    pub async fn set_config(&self, config: SchedulerConfig) -> Result<(), StoreError> {
        self.update(|data| {
            data.scheduler = config;
            Ok(())
        })
        .await
    }

    /// Insert or refresh site items. Channel state already on record is
    /// kept unless the incoming item carries its own. Returns how many
    /// items were new.
    pub async fn import_items(&self, items: Vec<ContentItem>) -> Result<usize, StoreError> {
        self.update(|data| {
            let mut added = 0;
            for mut item in items {
                match data.items.iter_mut().find(|existing| existing.id == item.id) {
                    Some(existing) => {
                        if item.channel.is_none() {
                            item.channel = existing.channel.take();
                        }
                        *existing = item;
                    }
                    None => {
                        data.items.push(item);
                        added += 1;
                    }
                }
            }
            Ok(added)
        })
        .await
    }

    async fn read<T>(&self, f: impl FnOnce(&StoreData) -> T) -> Result<T, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(f(&load(&self.path)?))
    }

    /// Apply `f` to the current document and write the result. Nothing is
    /// written when `f` fails.
    async fn update<T>(
        &self,
        f: impl FnOnce(&mut StoreData) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _guard = self.lock.lock().await;
        let mut data = load(&self.path)?;
        let out = f(&mut data)?;
        self.persist(&data)?;
        Ok(out)
    }

    fn persist(&self, data: &StoreData) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;
        let mut file = tempfile::NamedTempFile::new_in(&dir)?;
        file.write_all(serde_json::to_string_pretty(data)?.as_bytes())?;
        file.persist(&self.path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }
}

fn load(path: &Path) -> Result<StoreData, StoreError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(serde_json::from_str(&text)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoreData::default()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ContentRepository for JsonFileStore {
    async fn find_many(&self, query: &ItemQuery) -> Result<Vec<ContentItem>, StoreError> {
        self.read(|data| data.find_many(query)).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ContentItem>, StoreError> {
        self.read(|data| data.find_by_id(id)).await
    }

    async fn compare_and_swap_channel_state(
        &self,
        id: &str,
        expected: ChannelStatus,
        state: ChannelState,
    ) -> Result<bool, StoreError> {
        let _guard = self.lock.lock().await;
        let mut data = load(&self.path)?;
        let swapped = data.compare_and_swap(id, expected, state)?;
        if swapped {
            self.persist(&data)?;
        }
        Ok(swapped)
    }
}

#[async_trait]
impl SchedulerConfigStore for JsonFileStore {
    async fn load_config(&self) -> Result<SchedulerConfig, StoreError> {
        self.read(|data| data.scheduler.clone()).await
    }

    async fn record_published(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.update(|data| {
            data.scheduler.last_published_at = Some(at);
            Ok(())
        })
        .await
    }
}
