//! Publishing one item end to end.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use herald_platform::{PlatformClient, PlatformError, TokenResolver};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::caption::{build_caption, canonical_url, is_absolute_url, resolve_url};
use crate::comment::{CommentAnnotator, PromptPicker, SideEffect};
use crate::gate::GateEvaluator;
use crate::lock::PublicationLock;
use crate::pipeline::{ImageSource, PipelineOutcome, PublishContext, PublishPipeline};
use crate::store::{ContentRepository, SchedulerConfigStore};
use crate::story::StoryPublisher;
use crate::{ChannelState, ChannelStatus, ContentItem, ImageRef, PublishError, StoreError};

/// Where and as whom to publish.
#[derive(Clone)]
pub struct ChannelSettings {
    pub channel_id: String,
    /// Operator credential; resolved to a channel credential per attempt.
    pub access_token: String,
    /// Reject credentials issued to another app.
    pub app_id: Option<String>,
    pub site_url: String,
    /// Generated covers are cached here as `{item_id}.jpg`.
    pub cover_dir: Option<PathBuf>,
    pub comments: bool,
}

impl ChannelSettings {
    pub async fn resolve_token(&self, platform: &dyn PlatformClient) -> Result<String, PublishError> {
        let token = TokenResolver::new(platform)
            .with_expected_app(self.app_id.as_deref())
            .resolve(&self.access_token, &self.channel_id)
            .await?;
        Ok(token)
    }

    fn cover_path(&self, item_id: &str) -> Option<PathBuf> {
        let name: String = item_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.cover_dir.as_ref().map(|dir| dir.join(format!("{}.jpg", name)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishOutcome {
    pub item_id: String,
    pub post_id: String,
    pub permalink: Option<String>,
    pub strategy: &'static str,
    pub comment: SideEffect,
    pub story: SideEffect,
}

pub struct Publisher {
    repo: Arc<dyn ContentRepository>,
    config_store: Arc<dyn SchedulerConfigStore>,
    pipeline: PublishPipeline,
    comments: CommentAnnotator,
    stories: StoryPublisher,
    settings: ChannelSettings,
    prompt_history: Mutex<PromptPicker>,
    rng: Mutex<StdRng>,
}

impl Publisher {
    pub fn new(
        repo: Arc<dyn ContentRepository>,
        config_store: Arc<dyn SchedulerConfigStore>,
        pipeline: PublishPipeline,
        comments: CommentAnnotator,
        stories: StoryPublisher,
        settings: ChannelSettings,
    ) -> Self {
        Self {
            repo,
            config_store,
            pipeline,
            comments,
            stories,
            settings,
            prompt_history: Mutex::new(PromptPicker::new()),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Seed the prompt RNG.
    pub fn with_rng_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    pub fn settings(&self) -> &ChannelSettings {
        &self.settings
    }

    fn platform(&self) -> &dyn PlatformClient {
        self.pipeline.platform().as_ref()
    }

    /// Operator-requested publish. The enabled flag, window and interval do
    /// not apply, but the daily cap does unless `force` is set.
    #[tracing::instrument(skip(self, gate))]
    pub async fn publish_on_demand(
        &self,
        item_id: &str,
        gate: &GateEvaluator,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<PublishOutcome, PublishError> {
        if force {
            warn!("daily limit bypassed");
        } else {
            let config = self.config_store.load_config().await?;
            if gate
                .check_daily_limit(&config, self.repo.as_ref(), now)
                .await?
                .is_err()
            {
                return Err(PublishError::DailyLimitReached(config.max_per_day));
            }
        }
        self.publish_item(item_id, false, now).await
    }

    /// Publish an item. With `lease_held` the caller has already moved the
    /// item to `sharing`; otherwise the lease is taken here.
    #[tracing::instrument(skip(self))]
    pub async fn publish_item(
        &self,
        item_id: &str,
        lease_held: bool,
        now: DateTime<Utc>,
    ) -> Result<PublishOutcome, PublishError> {
        let lock = PublicationLock::new(self.repo.as_ref());
        let item = lock.acquire(item_id, now, lease_held).await?;

        let (outcome, token) = match self.publish_leased(&item).await {
            Ok(done) => done,
            Err(err) => {
                warn!(error = %err, "publish failed");
                if let Err(e) = lock.fail(item_id, &err.to_string()).await {
                    error!(error = %e, "failed to record publish failure");
                }
                return Err(err);
            }
        };

        let published_at = Utc::now().max(now);
        lock.complete(item_id, &outcome.post_id, outcome.permalink.as_deref(), published_at)
            .await?;
        if let Err(e) = self.config_store.record_published(published_at).await {
            error!(error = %e, "failed to record last publish time");
        }
        info!(post_id = %outcome.post_id, strategy = outcome.strategy, "item published");

        let link = canonical_url(&self.settings.site_url, &item);
        let comment = if self.settings.comments {
            let text = self.compose_comment(&link);
            self.comments.annotate(&outcome.post_id, &token, &text).await
        } else {
            SideEffect::Skipped
        };
        let story = self
            .stories
            .publish(&self.settings.channel_id, &token, &outcome.asset, Some(&link))
            .await;

        Ok(PublishOutcome {
            item_id: item_id.to_string(),
            post_id: outcome.post_id,
            permalink: outcome.permalink,
            strategy: outcome.strategy,
            comment,
            story,
        })
    }

    async fn publish_leased(&self, item: &ContentItem) -> Result<(PipelineOutcome, String), PublishError> {
        let caption = build_caption(item)?;
        let mut ctx = self.context(item, caption);
        self.pipeline.validate(&ctx)?;

        ctx.token = self.settings.resolve_token(self.platform()).await?;
        let outcome = self.pipeline.run(&ctx).await?;
        Ok((outcome, ctx.token))
    }

    fn context(&self, item: &ContentItem, caption: String) -> PublishContext {
        let site = &self.settings.site_url;
        let (reference_url, source) = match &item.image {
            Some(ImageRef::Path(path)) => (None, Some(ImageSource::Path(path.clone()))),
            Some(ImageRef::Url(url)) if is_absolute_url(url) => {
                (Some(url.clone()), Some(ImageSource::Url(url.clone())))
            }
            Some(ImageRef::Url(url)) => (None, Some(ImageSource::Url(resolve_url(site, url)))),
            None => (None, None),
        };
        PublishContext {
            item_id: item.id.clone(),
            title: item.title.clone(),
            caption,
            channel_id: self.settings.channel_id.clone(),
            token: String::new(),
            cover_path: self.settings.cover_path(&item.id),
            reference_url,
            source,
        }
    }

    fn compose_comment(&self, link: &str) -> String {
        let mut history = self.prompt_history.lock().unwrap_or_else(PoisonError::into_inner);
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        self.comments.compose(link, &mut history, &mut *rng)
    }

    /// Remove an item's post from the channel and mark it deleted.
    #[tracing::instrument(skip(self))]
    pub async fn delete_item(&self, item_id: &str) -> Result<ChannelState, PublishError> {
        let item = self
            .repo
            .find_by_id(item_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(item_id.to_string()))?;
        let state = item.channel_state();
        let post_id = match (state.status, state.post_id) {
            (ChannelStatus::Published, Some(post_id)) => post_id,
            (status, _) => {
                return Err(PublishError::Validation(format!(
                    "item {} is {}, not published",
                    item_id, status
                )));
            }
        };

        let token = self.settings.resolve_token(self.platform()).await?;
        match self.platform().delete_post(&post_id, &token).await {
            Ok(()) => info!(post_id = %post_id, "post deleted"),
            Err(PlatformError::NotFound(_)) => info!(post_id = %post_id, "post already gone upstream"),
            Err(e) => return Err(e.into()),
        }

        PublicationLock::new(self.repo.as_ref())
            .mark_deleted(item_id)
            .await
    }
}
