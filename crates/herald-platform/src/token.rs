//! Resolution of a session credential into a channel-scoped credential.

use tracing::{debug, info};

use crate::{PlatformClient, PlatformError};

/// Turns whatever credential the operator configured into one that can
/// publish to a specific channel.
pub struct TokenResolver<'a> {
    client: &'a dyn PlatformClient,
    expected_app_id: Option<&'a str>,
}

impl<'a> TokenResolver<'a> {
    pub fn new(client: &'a dyn PlatformClient) -> Self {
        Self {
            client,
            expected_app_id: None,
        }
    }

    /// Also reject credentials issued to a different app.
    pub fn with_expected_app(mut self, app_id: Option<&'a str>) -> Self {
        self.expected_app_id = app_id;
        self
    }

    /// Resolve `token` into a validated credential for `channel_id`.
    #[tracing::instrument(skip(self, token))]
    pub async fn resolve(&self, token: &str, channel_id: &str) -> Result<String, PlatformError> {
        let info = self.client.introspect_credential(token).await?;
        if !info.valid {
            return Err(PlatformError::InvalidCredential(
                "configured credential failed introspection".to_string(),
            ));
        }
        self.check_app(info.app_id.as_deref())?;

        if info.subject_id.as_deref() == Some(channel_id) {
            debug!("configured credential is already channel-scoped");
            return Ok(token.to_string());
        }

        let channels = self.client.list_channels(token).await?;
        let channel = channels
            .into_iter()
            .find(|c| c.id == channel_id)
            .ok_or_else(|| {
                PlatformError::PermissionDenied(format!(
                    "credential subject {} cannot manage channel {}",
                    info.subject_id.as_deref().unwrap_or("<unknown>"),
                    channel_id
                ))
            })?;
        let scoped = channel.credential.ok_or_else(|| {
            PlatformError::PermissionDenied(format!(
                "channel {} listed without a scoped credential",
                channel_id
            ))
        })?;

        let scoped_info = self.client.introspect_credential(&scoped).await?;
        if !scoped_info.valid {
            return Err(PlatformError::InvalidCredential(format!(
                "scoped credential for channel {} failed introspection",
                channel_id
            )));
        }
        if scoped_info.subject_id.as_deref() != Some(channel_id) {
            return Err(PlatformError::InvalidCredential(format!(
                "scoped credential belongs to {} instead of channel {}",
                scoped_info.subject_id.as_deref().unwrap_or("<unknown>"),
                channel_id
            )));
        }
        self.check_app(scoped_info.app_id.as_deref())?;

        info!(channel_id, "resolved channel-scoped credential");
        Ok(scoped)
    }

    fn check_app(&self, app_id: Option<&str>) -> Result<(), PlatformError> {
        match self.expected_app_id {
            Some(expected) if app_id != Some(expected) => {
                Err(PlatformError::InvalidCredential(format!(
                    "credential issued to app {} instead of {}",
                    app_id.unwrap_or("<unknown>"),
                    expected
                )))
            }
            _ => Ok(()),
        }
    }
}
