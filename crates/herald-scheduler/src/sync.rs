//! Periodic reconciliation of local channel state with the platform.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream;
use herald_platform::PlatformClient;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::lock::PublicationLock;
use crate::publisher::ChannelSettings;
use crate::store::{ContentRepository, ItemQuery};
use crate::{ChannelStatus, ContentItem, PublishError};

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub batch_size: usize,
    /// Concurrent lookups within a batch.
    pub parallelism: usize,
    /// Pause between batches.
    pub batch_pause: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            batch_size: 5,
            parallelism: 3,
            batch_pause: Duration::from_secs(2),
        }
    }
}

/// Totals for one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub checked: usize,
    pub deleted: usize,
    pub permalink_updated: usize,
    /// `(item_id, message)` for items whose check failed.
    pub failures: Vec<(String, String)>,
}

enum ItemSync {
    Unchanged,
    Deleted,
    PermalinkUpdated,
}

pub struct SyncReconciler {
    repo: Arc<dyn ContentRepository>,
    platform: Arc<dyn PlatformClient>,
    channel: ChannelSettings,
    settings: SyncSettings,
}

impl SyncReconciler {
    pub fn new(
        repo: Arc<dyn ContentRepository>,
        platform: Arc<dyn PlatformClient>,
        channel: ChannelSettings,
        settings: SyncSettings,
    ) -> Self {
        Self {
            repo,
            platform,
            channel,
            settings,
        }
    }

    /// Check every item with a post id. One item failing does not stop the
    /// sweep; a credential that cannot be resolved does.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self) -> Result<SyncReport, PublishError> {
        let items = self.repo.find_many(&ItemQuery::syncable()).await?;
        let mut report = SyncReport::default();
        if items.is_empty() {
            debug!("nothing to reconcile");
            return Ok(report);
        }

        let token = self.channel.resolve_token(self.platform.as_ref()).await?;
        let batch_size = self.settings.batch_size.max(1);
        let batches: Vec<&[ContentItem]> = items.chunks(batch_size).collect();

        for (index, batch) in batches.iter().enumerate() {
            if index > 0 && !self.settings.batch_pause.is_zero() {
                tokio::time::sleep(self.settings.batch_pause).await;
            }

            let checks: Vec<_> = batch.iter().map(|item| self.check(item, &token)).collect();
            let results: Vec<(String, Result<ItemSync, PublishError>)> = stream::iter(checks)
                .buffer_unordered(self.settings.parallelism.max(1))
                .collect()
                .await;

            for (item_id, result) in results {
                report.checked += 1;
                match result {
                    Ok(ItemSync::Unchanged) => {}
                    Ok(ItemSync::Deleted) => report.deleted += 1,
                    Ok(ItemSync::PermalinkUpdated) => report.permalink_updated += 1,
                    Err(e) => {
                        warn!(item_id = %item_id, error = %e, "reconcile failed");
                        report.failures.push((item_id, e.to_string()));
                    }
                }
            }
        }

        info!(
            checked = report.checked,
            deleted = report.deleted,
            permalink_updated = report.permalink_updated,
            failed = report.failures.len(),
            "sync sweep complete"
        );
        Ok(report)
    }

    async fn check(&self, item: &ContentItem, token: &str) -> (String, Result<ItemSync, PublishError>) {
        (item.id.clone(), self.reconcile(item, token).await)
    }

    async fn reconcile(&self, item: &ContentItem, token: &str) -> Result<ItemSync, PublishError> {
        let state = item.channel_state();
        let Some(post_id) = state.post_id.as_deref() else {
            return Ok(ItemSync::Unchanged);
        };
        let lock = PublicationLock::new(self.repo.as_ref());

        match self.platform.get_post(post_id, token).await? {
            None if state.status == ChannelStatus::Published => {
                info!(item_id = %item.id, post_id, "post gone upstream, marking deleted");
                lock.mark_deleted(&item.id).await?;
                Ok(ItemSync::Deleted)
            }
            None => {
                debug!(item_id = %item.id, status = %state.status, "post missing for in-flight item");
                Ok(ItemSync::Unchanged)
            }
            Some(info) => match info.permalink {
                Some(permalink)
                    if state.status == ChannelStatus::Published
                        && state.permalink.as_deref() != Some(permalink.as_str()) =>
                {
                    debug!(item_id = %item.id, permalink = %permalink, "permalink changed");
                    lock.set_permalink(&item.id, &permalink).await?;
                    Ok(ItemSync::PermalinkUpdated)
                }
                _ => Ok(ItemSync::Unchanged),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::StubPlatform;
    use crate::ChannelState;
    use pretty_assertions::assert_eq;

    fn channel() -> ChannelSettings {
        ChannelSettings {
            channel_id: "chan".into(),
            access_token: "tok".into(),
            app_id: None,
            site_url: "https://site.test".into(),
            cover_dir: None,
            comments: false,
        }
    }

    fn published(id: &str, post_id: &str, permalink: &str) -> ContentItem {
        let mut item = ContentItem::new(id, "news", "t");
        item.channel = Some(ChannelState {
            status: ChannelStatus::Published,
            post_id: Some(post_id.into()),
            permalink: Some(permalink.into()),
            ..ChannelState::default()
        });
        item
    }

    fn reconciler(store: Arc<MemoryStore>, platform: Arc<StubPlatform>) -> SyncReconciler {
        SyncReconciler::new(
            store,
            platform,
            channel(),
            SyncSettings {
                batch_pause: Duration::ZERO,
                ..SyncSettings::default()
            },
        )
    }

    #[tokio::test]
    async fn test_sweep_reconciles_each_case() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_item(published("same", "P1", "https://social.test/P1")).await;
        store.upsert_item(published("moved", "P2", "https://social.test/old")).await;
        store.upsert_item(published("gone", "P3", "https://social.test/P3")).await;
        store.upsert_item(published("broken", "P4", "https://social.test/P4")).await;
        store.upsert_item(ContentItem::new("never", "news", "t")).await;

        let platform = Arc::new(StubPlatform::new("chan"));
        platform.insert_post("P1", Some("https://social.test/P1"));
        platform.insert_post("P2", Some("https://social.test/new"));
        platform.insert_post("P4", Some("https://social.test/P4"));
        platform.fail_lookups_for("P4");

        let report = reconciler(store.clone(), platform.clone()).sweep().await.unwrap();
        assert_eq!(report.checked, 4);
        assert_eq!(report.deleted, 1);
        assert_eq!(report.permalink_updated, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "broken");

        let gone = store.find_by_id("gone").await.unwrap().unwrap().channel_state();
        assert_eq!(gone.status, ChannelStatus::Deleted);
        assert_eq!(gone.post_id, None);

        let moved = store.find_by_id("moved").await.unwrap().unwrap().channel_state();
        assert_eq!(moved.permalink.as_deref(), Some("https://social.test/new"));

        let broken = store.find_by_id("broken").await.unwrap().unwrap().channel_state();
        assert_eq!(broken.status, ChannelStatus::Published);
    }

    #[tokio::test]
    async fn test_empty_sweep_skips_credentials() {
        let store = Arc::new(MemoryStore::new());
        let platform = Arc::new(StubPlatform::new("chan"));
        let report = reconciler(store, platform.clone()).sweep().await.unwrap();
        assert_eq!(report, SyncReport::default());
        assert!(platform.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_cover_every_item() {
        let store = Arc::new(MemoryStore::new());
        let platform = Arc::new(StubPlatform::new("chan"));
        for i in 0..12 {
            let post = format!("P{}", i);
            store.upsert_item(published(&format!("item-{}", i), &post, "x")).await;
            platform.insert_post(&post, Some("x"));
        }
        let reconciler = SyncReconciler::new(store, platform.clone(), channel(), SyncSettings::default());

        let report = reconciler.sweep().await.unwrap();
        assert_eq!(report.checked, 12);
        assert_eq!(platform.calls().len(), 12);
    }
}
