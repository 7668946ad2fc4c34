//! Ordered fallback chain of publish strategies.
//!
//! Each strategy prepares an image asset or declines; the pipeline posts the
//! first prepared asset. A strategy that fails, times out, or declines hands
//! over to the next one. Credential, permission and rate-limit errors stop
//! the chain, since every later strategy would hit the same wall.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use herald_cover::{CoverComposer, sniff_mime};
use herald_platform::{Asset, ErrorKind, PlatformClient, PlatformError, PostContent};
use tracing::{debug, info, warn};

use crate::PublishError;

/// Where the source photo for composition comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Path(PathBuf),
    /// Absolute URL, already resolved against the site.
    Url(String),
}

/// Everything one publish attempt needs.
#[derive(Clone)]
pub struct PublishContext {
    pub item_id: String,
    pub title: String,
    pub caption: String,
    pub channel_id: String,
    /// Channel-scoped credential.
    pub token: String,
    /// Location of the generated cover for this item.
    pub cover_path: Option<PathBuf>,
    /// Absolute image URL the platform may fetch itself.
    pub reference_url: Option<String>,
    pub source: Option<ImageSource>,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Budget for one strategy, including its upload.
    pub step_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(30),
        }
    }
}

/// Generic image used when nothing item-specific can be posted.
#[derive(Debug, Clone)]
pub struct FallbackAsset {
    data: Vec<u8>,
    file_name: String,
    mime_type: &'static str,
}

impl FallbackAsset {
    pub fn new(data: Vec<u8>, file_name: impl Into<String>) -> Result<Self, PublishError> {
        let file_name = file_name.into();
        if data.is_empty() {
            return Err(PublishError::Configuration(format!(
                "fallback image {} is empty",
                file_name
            )));
        }
        let mime_type = sniff_mime(&data).ok_or_else(|| {
            PublishError::Configuration(format!("fallback image {} is not a known image format", file_name))
        })?;
        Ok(Self {
            data,
            file_name,
            mime_type,
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, PublishError> {
        let data = std::fs::read(path).map_err(|e| {
            PublishError::Configuration(format!("cannot read fallback image {}: {}", path.display(), e))
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "fallback".to_string());
        Self::new(data, file_name)
    }

    pub fn asset(&self) -> Asset {
        Asset::Bytes {
            data: self.data.clone(),
            file_name: self.file_name.clone(),
            mime_type: self.mime_type.to_string(),
        }
    }
}

/// Fetches remote images for probing and composition.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Whether the URL answers a HEAD request successfully.
    async fn probe(&self, url: &str) -> bool;

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, PublishError>;
}

pub struct HttpImageFetcher {
    http: reqwest::Client,
}

impl HttpImageFetcher {
    pub fn new(timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { http }
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn probe(&self, url: &str) -> bool {
        match self.http.head(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(url, error = %e, "image probe failed");
                false
            }
        }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, PublishError> {
        let response = self.http.get(url).send().await.map_err(PlatformError::from)?;
        let status = response.status();
        if !status.is_success() {
            return Err(PublishError::Upstream {
                message: format!("fetching {} returned {}", url, status),
                hint: ErrorKind::Upstream.hint(),
            });
        }
        let bytes = response.bytes().await.map_err(PlatformError::from)?;
        Ok(bytes.to_vec())
    }
}

/// Shared collaborators for the strategies.
pub struct PipelineEnv {
    pub platform: Arc<dyn PlatformClient>,
    pub fetcher: Arc<dyn ImageFetcher>,
    pub composer: Option<Arc<CoverComposer>>,
    pub fallback: Option<FallbackAsset>,
}

/// One way of obtaining an image to post.
#[async_trait]
pub trait PublishStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// The asset to post, or `None` when this strategy does not apply.
    async fn prepare(
        &self,
        env: &PipelineEnv,
        ctx: &PublishContext,
    ) -> Result<Option<Asset>, PublishError>;
}

/// Upload a cover generated by an earlier attempt.
pub struct LocalCover;

#[async_trait]
impl PublishStrategy for LocalCover {
    fn name(&self) -> &'static str {
        "local_cover"
    }

    async fn prepare(
        &self,
        _env: &PipelineEnv,
        ctx: &PublishContext,
    ) -> Result<Option<Asset>, PublishError> {
        let Some(path) = &ctx.cover_path else {
            return Ok(None);
        };
        match tokio::fs::read(path).await {
            Ok(data) if !data.is_empty() => Ok(Some(Asset::jpeg(data, format!("{}.jpg", ctx.item_id)))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PublishError::Store(e.into())),
        }
    }
}

/// Let the platform fetch an absolute image URL, after checking it answers.
pub struct RemoteUrl;

#[async_trait]
impl PublishStrategy for RemoteUrl {
    fn name(&self) -> &'static str {
        "remote_url"
    }

    async fn prepare(
        &self,
        env: &PipelineEnv,
        ctx: &PublishContext,
    ) -> Result<Option<Asset>, PublishError> {
        let Some(url) = &ctx.reference_url else {
            return Ok(None);
        };
        if !env.fetcher.probe(url).await {
            debug!(url, "image URL not reachable");
            return Ok(None);
        }
        Ok(Some(Asset::Url(url.clone())))
    }
}

/// Compose a cover from the source photo; upload the raw photo if
/// composition fails.
pub struct ComposeFromSource;

impl ComposeFromSource {
    async fn source_bytes(env: &PipelineEnv, source: &ImageSource) -> Result<Vec<u8>, PublishError> {
        match source {
            ImageSource::Path(path) => tokio::fs::read(path)
                .await
                .map_err(|e| PublishError::Store(e.into())),
            ImageSource::Url(url) => env.fetcher.fetch(url).await,
        }
    }

    async fn compose(
        composer: Arc<CoverComposer>,
        source: Vec<u8>,
        ctx: &PublishContext,
    ) -> Result<Vec<u8>, String> {
        let title = ctx.title.clone();
        let cache = ctx.cover_path.clone();
        tokio::task::spawn_blocking(move || composer.compose(&source, &title, cache.as_deref()))
            .await
            .map_err(|e| e.to_string())?
            .map(|cover| cover.bytes)
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl PublishStrategy for ComposeFromSource {
    fn name(&self) -> &'static str {
        "compose_from_source"
    }

    async fn prepare(
        &self,
        env: &PipelineEnv,
        ctx: &PublishContext,
    ) -> Result<Option<Asset>, PublishError> {
        let Some(source) = &ctx.source else {
            return Ok(None);
        };
        let raw = Self::source_bytes(env, source).await?;

        if let Some(composer) = &env.composer {
            match Self::compose(Arc::clone(composer), raw.clone(), ctx).await {
                Ok(cover) => return Ok(Some(Asset::jpeg(cover, format!("{}.jpg", ctx.item_id)))),
                Err(e) => warn!(item_id = %ctx.item_id, error = %e, "cover composition failed, using raw image"),
            }
        }

        let mime_type = sniff_mime(&raw).ok_or_else(|| {
            PublishError::Validation(format!("source image for item {} is not a known image format", ctx.item_id))
        })?;
        Ok(Some(Asset::Bytes {
            data: raw,
            file_name: ctx.item_id.clone(),
            mime_type: mime_type.to_string(),
        }))
    }
}

/// The configured generic image.
pub struct GenericFallback;

#[async_trait]
impl PublishStrategy for GenericFallback {
    fn name(&self) -> &'static str {
        "generic_fallback"
    }

    async fn prepare(
        &self,
        env: &PipelineEnv,
        _ctx: &PublishContext,
    ) -> Result<Option<Asset>, PublishError> {
        Ok(env.fallback.as_ref().map(FallbackAsset::asset))
    }
}

/// Result of a successful pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub post_id: String,
    pub permalink: Option<String>,
    pub strategy: &'static str,
    /// What was posted, reused for the story.
    pub asset: Asset,
}

fn stops_chain(err: &PublishError) -> bool {
    matches!(
        err,
        PublishError::Credential { .. } | PublishError::Permission { .. } | PublishError::RateLimited { .. }
    )
}

pub struct PublishPipeline {
    env: PipelineEnv,
    strategies: Vec<Box<dyn PublishStrategy>>,
    settings: PipelineSettings,
}

impl PublishPipeline {
    /// Local cover, remote URL, composition, then the generic image.
    pub fn new(env: PipelineEnv, settings: PipelineSettings) -> Self {
        Self::with_strategies(
            env,
            settings,
            vec![
                Box::new(LocalCover),
                Box::new(RemoteUrl),
                Box::new(ComposeFromSource),
                Box::new(GenericFallback),
            ],
        )
    }

    pub fn with_strategies(
        env: PipelineEnv,
        settings: PipelineSettings,
        strategies: Vec<Box<dyn PublishStrategy>>,
    ) -> Self {
        Self {
            env,
            strategies,
            settings,
        }
    }

    pub fn platform(&self) -> &Arc<dyn PlatformClient> {
        &self.env.platform
    }

    /// Checks that need no network access.
    pub fn validate(&self, ctx: &PublishContext) -> Result<(), PublishError> {
        if ctx.caption.trim().is_empty() {
            return Err(PublishError::Validation(format!("item {} has an empty caption", ctx.item_id)));
        }
        let has_image = ctx.cover_path.is_some()
            || ctx.reference_url.is_some()
            || ctx.source.is_some()
            || self.env.fallback.is_some();
        if !has_image {
            return Err(PublishError::Validation(format!(
                "item {} has no image and no fallback image is configured",
                ctx.item_id
            )));
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, ctx), fields(item_id = %ctx.item_id))]
    pub async fn run(&self, ctx: &PublishContext) -> Result<PipelineOutcome, PublishError> {
        self.validate(ctx)?;

        let mut last_error = None;
        for strategy in &self.strategies {
            let name = strategy.name();
            let step = async {
                let Some(asset) = strategy.prepare(&self.env, ctx).await? else {
                    return Ok(None);
                };
                let content = PostContent {
                    caption: ctx.caption.clone(),
                    asset: asset.clone(),
                };
                let post_id = self
                    .env
                    .platform
                    .create_post(&ctx.channel_id, &ctx.token, &content)
                    .await?;
                Ok::<_, PublishError>(Some((post_id, asset)))
            };

            match tokio::time::timeout(self.settings.step_timeout, step).await {
                Err(_) => {
                    warn!(strategy = name, timeout = ?self.settings.step_timeout, "publish strategy timed out");
                    last_error = Some(PublishError::Upstream {
                        message: format!("{} timed out after {:?}", name, self.settings.step_timeout),
                        hint: ErrorKind::Upstream.hint(),
                    });
                }
                Ok(Ok(None)) => debug!(strategy = name, "publish strategy not applicable"),
                Ok(Ok(Some((post_id, asset)))) => {
                    let permalink = self.lookup_permalink(ctx, &post_id).await;
                    info!(strategy = name, post_id = %post_id, asset = %asset.describe(), "post created");
                    return Ok(PipelineOutcome {
                        post_id,
                        permalink,
                        strategy: name,
                        asset,
                    });
                }
                Ok(Err(err)) if stops_chain(&err) => return Err(err),
                Ok(Err(err)) => {
                    warn!(strategy = name, error = %err, "publish strategy failed");
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            PublishError::Validation(format!("no publish strategy applied to item {}", ctx.item_id))
        }))
    }

    /// Best effort; a post without a permalink is still a success.
    async fn lookup_permalink(&self, ctx: &PublishContext, post_id: &str) -> Option<String> {
        let lookup = self.env.platform.get_post(post_id, &ctx.token);
        match tokio::time::timeout(self.settings.step_timeout, lookup).await {
            Ok(Ok(Some(info))) => info.permalink,
            Ok(Ok(None)) => {
                warn!(post_id, "new post not found when looking up permalink");
                None
            }
            Ok(Err(e)) => {
                warn!(post_id, error = %e, "permalink lookup failed");
                None
            }
            Err(_) => {
                warn!(post_id, "permalink lookup timed out");
                None
            }
        }
    }
}
