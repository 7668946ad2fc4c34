//! Platform request and response types.

use serde::{Deserialize, Serialize};

/// An image to attach to a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Asset {
    /// Raw bytes uploaded as a multipart file part.
    Bytes {
        data: Vec<u8>,
        file_name: String,
        mime_type: String,
    },
    /// A public URL the platform fetches itself.
    Url(String),
}

impl Asset {
    /// A JPEG byte asset.
    pub fn jpeg(data: Vec<u8>, file_name: impl Into<String>) -> Self {
        Self::Bytes {
            data,
            file_name: file_name.into(),
            mime_type: "image/jpeg".to_string(),
        }
    }

    /// Short description for logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Bytes {
                data, file_name, ..
            } => format!("{} ({} bytes)", file_name, data.len()),
            Self::Url(url) => url.clone(),
        }
    }
}

/// Content of a new post.
#[derive(Debug, Clone)]
pub struct PostContent {
    pub caption: String,
    pub asset: Asset,
}

/// Existence and location of a published post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostInfo {
    pub id: String,
    #[serde(rename = "permalink_url")]
    pub permalink: Option<String>,
}

/// Result of credential introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialInfo {
    pub valid: bool,
    /// The user or channel the credential acts as.
    pub subject_id: Option<String>,
    pub app_id: Option<String>,
}

/// A channel the credential's subject can manage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedChannel {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Channel-scoped credential, absent when the subject lacks a task grant.
    #[serde(rename = "access_token", default)]
    pub credential: Option<String>,
}
