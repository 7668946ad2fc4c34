//! Wiring of stores, platform client and publishing components.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, Utc};
use miette::Result;
use tracing::{info, warn};

use herald_cover::{CoverComposer, CoverOptions};
use herald_platform::GraphClient;
use herald_scheduler::{
    CandidateSelector, ChannelSettings, CommentAnnotator, FallbackAsset, GateEvaluator,
    HttpImageFetcher, JsonFileStore, PipelineEnv, PipelineSettings, PublishPipeline, Publisher,
    StatusReport, StoryPublisher, StorySettings, SyncReconciler, SyncSettings, TierPolicy,
    collect_status,
};

use crate::ChannelArgs;

/// Delay before the single comment retry.
const COMMENT_BACKOFF: Duration = Duration::from_secs(2);

/// Timeout for image probes and downloads.
const FETCH_TIMEOUT: Duration = Duration::from_secs(20);

/// Everything a publishing command needs.
pub struct App {
    pub store: Arc<JsonFileStore>,
    pub platform: Arc<GraphClient>,
    pub publisher: Arc<Publisher>,
    pub selector: CandidateSelector,
    pub gate: GateEvaluator,
}

impl App {
    /// Open the state file and assemble the publisher. Misconfigured assets
    /// fail here, before anything is published.
    pub fn build(
        state_file: &Path,
        offset: FixedOffset,
        policy: TierPolicy,
        args: &ChannelArgs,
    ) -> Result<Self> {
        let store = Arc::new(crate::open_store(state_file)?);
        let platform = Arc::new(GraphClient::new(args.api_url.clone()));

        let composer = match &args.font {
            Some(path) => {
                let options = CoverOptions {
                    watermark: args.watermark.clone(),
                    ..CoverOptions::default()
                };
                let composer = CoverComposer::from_font_file(path, options)
                    .map_err(|e| miette::miette!("failed to load font {}: {}", path.display(), e))?;
                Some(Arc::new(composer))
            }
            None => {
                info!("no font configured, cover composition disabled");
                None
            }
        };

        let fallback = args
            .fallback_image
            .as_deref()
            .map(FallbackAsset::from_file)
            .transpose()
            .map_err(|e| miette::miette!("{}", e))?;

        let env = PipelineEnv {
            platform: platform.clone(),
            fetcher: Arc::new(HttpImageFetcher::new(FETCH_TIMEOUT)),
            composer,
            fallback,
        };
        let pipeline = PublishPipeline::new(
            env,
            PipelineSettings {
                step_timeout: Duration::from_secs(args.step_timeout_secs.max(1)),
            },
        );

        let publisher = Publisher::new(
            store.clone(),
            store.clone(),
            pipeline,
            CommentAnnotator::new(platform.clone(), COMMENT_BACKOFF),
            StoryPublisher::new(
                platform.clone(),
                StorySettings {
                    enabled: args.stories,
                    ..StorySettings::default()
                },
            ),
            channel_settings(args),
        );

        Ok(Self {
            store,
            platform,
            publisher: Arc::new(publisher),
            selector: CandidateSelector::new(policy, offset),
            gate: GateEvaluator::new(offset),
        })
    }

    pub fn reconciler(&self) -> SyncReconciler {
        SyncReconciler::new(
            self.store.clone(),
            self.platform.clone(),
            self.publisher.settings().clone(),
            SyncSettings::default(),
        )
    }

    /// Resolve the channel credential once so bad tokens show up at startup.
    pub async fn verify_credentials(&self) {
        match self.publisher.settings().resolve_token(self.platform.as_ref()).await {
            Ok(_) => info!(channel_id = %self.publisher.settings().channel_id, "channel credential ok"),
            Err(e) => warn!(error = %e, "channel credential check failed"),
        }
    }
}

fn channel_settings(args: &ChannelArgs) -> ChannelSettings {
    ChannelSettings {
        channel_id: args.channel_id.clone(),
        access_token: args.access_token.clone(),
        app_id: args.app_id.clone(),
        site_url: args.site_url.clone(),
        cover_dir: args.cover_dir.clone(),
        comments: args.comments,
    }
}

pub async fn status(store: JsonFileStore, offset: FixedOffset, policy: TierPolicy) -> Result<StatusReport> {
    collect_status(
        &store,
        &store,
        &CandidateSelector::new(policy, offset),
        &GateEvaluator::new(offset),
        Utc::now(),
    )
    .await
    .map_err(|e| miette::miette!("failed to collect status: {}", e))
}
