//! Ephemeral story mirroring a published post.

use std::sync::Arc;

use herald_platform::{Asset, PlatformClient, PlatformError};
use tracing::{info, warn};

use crate::comment::SideEffect;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorySettings {
    pub enabled: bool,
    /// Attach the canonical article link to the story.
    pub attach_link: bool,
}

impl Default for StorySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            attach_link: true,
        }
    }
}

pub struct StoryPublisher {
    platform: Arc<dyn PlatformClient>,
    settings: StorySettings,
}

impl StoryPublisher {
    pub fn new(platform: Arc<dyn PlatformClient>, settings: StorySettings) -> Self {
        Self { platform, settings }
    }

    /// Upload the asset unpublished, then promote it. Failures are reported,
    /// never propagated.
    #[tracing::instrument(skip(self, token, asset, link))]
    pub async fn publish(
        &self,
        channel_id: &str,
        token: &str,
        asset: &Asset,
        link: Option<&str>,
    ) -> SideEffect {
        if !self.settings.enabled {
            return SideEffect::Skipped;
        }
        let link = link.filter(|_| self.settings.attach_link);
        match self.upload_and_promote(channel_id, token, asset, link).await {
            Ok(story_id) => {
                info!(story_id = %story_id, "story published");
                SideEffect::Done(story_id)
            }
            Err(e) => {
                warn!(error = %e, "story publish failed");
                SideEffect::Failed(e.to_string())
            }
        }
    }

    async fn upload_and_promote(
        &self,
        channel_id: &str,
        token: &str,
        asset: &Asset,
        link: Option<&str>,
    ) -> Result<String, PlatformError> {
        let object_id = self
            .platform
            .upload_unpublished_asset(channel_id, token, asset)
            .await?;
        self.platform
            .promote_to_story(channel_id, token, &object_id, link)
            .await
    }
}
