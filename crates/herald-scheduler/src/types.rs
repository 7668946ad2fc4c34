//! Content and scheduler types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Publication status of an item on the site itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteStatus {
    #[default]
    Draft,
    Scheduled,
    Published,
}

/// Where the raw cover photo for an item lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ImageRef {
    /// A file on the local filesystem.
    Path(std::path::PathBuf),
    /// An absolute URL, or a path relative to the site URL.
    Url(String),
}

/// A piece of site content that may be shared to the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub status: SiteStatus,
    pub category: String,
    /// When the item went live on the site.
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub evergreen: bool,
    pub title: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub image: Option<ImageRef>,
    /// Channel bookkeeping; absent until the item is first touched.
    #[serde(default)]
    pub channel: Option<ChannelState>,
}

impl ContentItem {
    /// A published item with no channel state.
    pub fn new(id: impl Into<String>, category: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: SiteStatus::Published,
            category: category.into(),
            published_at: Some(Utc::now()),
            evergreen: false,
            title: title.into(),
            summary: None,
            tags: Vec::new(),
            slug: None,
            image: None,
            channel: None,
        }
    }

    /// Channel status, treating absent state as `NotShared`.
    pub fn channel_status(&self) -> ChannelStatus {
        self.channel
            .as_ref()
            .map(|c| c.status)
            .unwrap_or(ChannelStatus::NotShared)
    }

    /// Channel state, materialising the initial state if absent.
    pub fn channel_state(&self) -> ChannelState {
        self.channel.clone().unwrap_or_default()
    }
}

/// Status of an item on the channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    #[default]
    NotShared,
    Sharing,
    Published,
    Error,
    Deleted,
}

impl ChannelStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotShared => "not_shared",
            Self::Sharing => "sharing",
            Self::Published => "published",
            Self::Error => "error",
            Self::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-item channel bookkeeping. Only the transitions in `lock` mutate it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelState {
    pub status: ChannelStatus,
    /// Non-null iff `status` is `Published`.
    pub post_id: Option<String>,
    pub permalink: Option<String>,
    pub last_error: Option<String>,
    pub attempt_count: u32,
    /// When the post went live on the channel.
    pub published_at: Option<DateTime<Utc>>,
    /// Non-null iff `status` is `Sharing`.
    pub lease_start: Option<DateTime<Utc>>,
}

/// Singleton scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub interval_minutes: u32,
    pub window_start_hour: u32,
    pub window_end_hour: u32,
    /// Zero disables the daily cap.
    pub max_per_day: u32,
    pub last_published_at: Option<DateTime<Utc>>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_minutes: 60,
            window_start_hour: 8,
            window_end_hour: 22,
            max_per_day: 10,
            last_published_at: None,
        }
    }
}
