//! Platform client trait and its Graph-style HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{Asset, CredentialInfo, ManagedChannel, PlatformError, PostContent, PostInfo};

/// Operations the scheduler needs from the publishing platform.
///
/// Every call takes the credential explicitly because the channel-scoped
/// credential is resolved per publish attempt.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Create a post on the channel, returning the post id.
    async fn create_post(
        &self,
        channel_id: &str,
        token: &str,
        content: &PostContent,
    ) -> Result<String, PlatformError>;

    /// Comment on a post, returning the comment id.
    async fn create_comment(
        &self,
        post_id: &str,
        token: &str,
        text: &str,
    ) -> Result<String, PlatformError>;

    /// Look up a post. `Ok(None)` means it no longer exists upstream.
    async fn get_post(&self, post_id: &str, token: &str)
    -> Result<Option<PostInfo>, PlatformError>;

    /// Delete a post.
    async fn delete_post(&self, post_id: &str, token: &str) -> Result<(), PlatformError>;

    /// Describe a credential: validity, subject and issuing app.
    async fn introspect_credential(&self, token: &str) -> Result<CredentialInfo, PlatformError>;

    /// List the channels the credential's subject can manage.
    async fn list_channels(&self, token: &str) -> Result<Vec<ManagedChannel>, PlatformError>;

    /// Upload an image without publishing it, returning the object id.
    async fn upload_unpublished_asset(
        &self,
        channel_id: &str,
        token: &str,
        asset: &Asset,
    ) -> Result<String, PlatformError>;

    /// Turn an uploaded object into an ephemeral story, returning the story id.
    async fn promote_to_story(
        &self,
        channel_id: &str,
        token: &str,
        object_id: &str,
        link: Option<&str>,
    ) -> Result<String, PlatformError>;
}

/// HTTP client for a Graph-style publishing API.
pub struct GraphClient {
    http: Client,
    api_url: String,
}

impl GraphClient {
    /// Create a new client for the given API base URL.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_timeout(api_url, Duration::from_secs(30))
    }

    /// Create a client whose requests give up after `timeout`.
    pub fn with_timeout(api_url: impl Into<String>, timeout: Duration) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .expect("failed to build HTTP client");

        Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Get the API base URL.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_url, path)
    }

    fn photo_form(
        asset: &Asset,
        token: &str,
        caption: Option<&str>,
        published: bool,
    ) -> Result<Form, PlatformError> {
        let mut form = Form::new().text("access_token", token.to_string());
        if let Some(caption) = caption {
            form = form.text("caption", caption.to_string());
        }
        if !published {
            form = form.text("published", "false");
        }
        form = match asset {
            Asset::Bytes {
                data,
                file_name,
                mime_type,
            } => {
                let part = Part::bytes(data.clone())
                    .file_name(file_name.clone())
                    .mime_str(mime_type)?;
                form.part("source", part)
            }
            Asset::Url(url) => form.text("url", url.clone()),
        };
        Ok(form)
    }

    /// Handle HTTP response and parse JSON.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, PlatformError> {
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            return Err(PlatformError::RateLimited { retry_after_secs });
        }

        if !status.is_success() {
            let text = response.text().await.map_err(|e| {
                PlatformError::InvalidResponse(format!(
                    "request failed ({}): failed to read response: {}",
                    status, e
                ))
            })?;

            if let Ok(envelope) = serde_json::from_str::<GraphErrorEnvelope>(&text) {
                let err = envelope.error;
                // Code 100 / subcode 33: the object was removed or never existed.
                if status == reqwest::StatusCode::NOT_FOUND
                    || (err.code == 100 && err.error_subcode == Some(33))
                {
                    return Err(PlatformError::NotFound(err.message));
                }
                return Err(PlatformError::Api {
                    code: err.code,
                    message: err.message,
                });
            }

            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(PlatformError::NotFound(text));
            }

            return Err(PlatformError::InvalidResponse(format!(
                "request failed ({}): {}",
                status, text
            )));
        }

        let body = response.json().await?;
        Ok(body)
    }
}

#[async_trait]
impl PlatformClient for GraphClient {
    async fn create_post(
        &self,
        channel_id: &str,
        token: &str,
        content: &PostContent,
    ) -> Result<String, PlatformError> {
        let form = Self::photo_form(&content.asset, token, Some(&content.caption), true)?;
        let response = self
            .http
            .post(self.url(&format!("{}/photos", channel_id)))
            .multipart(form)
            .send()
            .await?;

        let created: CreatedObject = self.handle_response(response).await?;
        let post_id = created.post_or_object_id("post")?;
        debug!(channel_id, post_id = %post_id, asset = %content.asset.describe(), "created post");
        Ok(post_id)
    }

    async fn create_comment(
        &self,
        post_id: &str,
        token: &str,
        text: &str,
    ) -> Result<String, PlatformError> {
        let response = self
            .http
            .post(self.url(&format!("{}/comments", post_id)))
            .form(&[("message", text), ("access_token", token)])
            .send()
            .await?;

        let created: CreatedObject = self.handle_response(response).await?;
        let comment_id = created.object_id("comment")?;
        debug!(post_id, comment_id = %comment_id, "created comment");
        Ok(comment_id)
    }

    async fn get_post(
        &self,
        post_id: &str,
        token: &str,
    ) -> Result<Option<PostInfo>, PlatformError> {
        let response = self
            .http
            .get(self.url(post_id))
            .query(&[("fields", "id,permalink_url"), ("access_token", token)])
            .send()
            .await?;

        match self.handle_response::<PostInfo>(response).await {
            Ok(info) => Ok(Some(info)),
            Err(PlatformError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn delete_post(&self, post_id: &str, token: &str) -> Result<(), PlatformError> {
        let response = self
            .http
            .delete(self.url(post_id))
            .query(&[("access_token", token)])
            .send()
            .await?;

        let result: SuccessFlag = self.handle_response(response).await?;
        if !result.success {
            return Err(PlatformError::InvalidResponse(format!(
                "delete of {} was not acknowledged",
                post_id
            )));
        }
        debug!(post_id, "deleted post");
        Ok(())
    }

    async fn introspect_credential(&self, token: &str) -> Result<CredentialInfo, PlatformError> {
        let response = self
            .http
            .get(self.url("debug_token"))
            .query(&[("input_token", token), ("access_token", token)])
            .send()
            .await?;

        let envelope: DataEnvelope<DebugToken> = self.handle_response(response).await?;
        let data = envelope.data;
        Ok(CredentialInfo {
            valid: data.is_valid,
            // Channel-scoped credentials report the channel as profile_id.
            subject_id: data.profile_id.or(data.user_id),
            app_id: data.app_id,
        })
    }

    async fn list_channels(&self, token: &str) -> Result<Vec<ManagedChannel>, PlatformError> {
        let mut channels = Vec::new();
        let mut next = Some(self.url("me/accounts?limit=100"));

        while let Some(url) = next {
            let response = self
                .http
                .get(&url)
                .query(&[("access_token", token)])
                .send()
                .await?;

            let page: Page<ManagedChannel> = self.handle_response(response).await?;
            channels.extend(page.data);
            next = page.paging.and_then(|p| p.next);
        }

        debug!(count = channels.len(), "listed manageable channels");
        Ok(channels)
    }

    async fn upload_unpublished_asset(
        &self,
        channel_id: &str,
        token: &str,
        asset: &Asset,
    ) -> Result<String, PlatformError> {
        let form = Self::photo_form(asset, token, None, false)?;
        let response = self
            .http
            .post(self.url(&format!("{}/photos", channel_id)))
            .multipart(form)
            .send()
            .await?;

        let created: CreatedObject = self.handle_response(response).await?;
        let object_id = created.object_id("unpublished asset")?;
        debug!(channel_id, object_id = %object_id, "uploaded unpublished asset");
        Ok(object_id)
    }

    async fn promote_to_story(
        &self,
        channel_id: &str,
        token: &str,
        object_id: &str,
        link: Option<&str>,
    ) -> Result<String, PlatformError> {
        let mut params = vec![("photo_id", object_id), ("access_token", token)];
        if let Some(link) = link {
            params.push(("link", link));
        }

        let response = self
            .http
            .post(self.url(&format!("{}/photo_stories", channel_id)))
            .form(&params)
            .send()
            .await?;

        let created: CreatedObject = self.handle_response(response).await?;
        let story_id = created.post_or_object_id("story")?;
        debug!(channel_id, story_id = %story_id, "published story");
        Ok(story_id)
    }
}

/// Graph error response format.
#[derive(Debug, Deserialize)]
struct GraphErrorEnvelope {
    error: GraphError,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    message: String,
    code: i64,
    #[serde(default)]
    error_subcode: Option<i64>,
}

/// Creation response. Photo and story endpoints may answer with only one
/// of the two ids.
#[derive(Debug, Deserialize)]
struct CreatedObject {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    post_id: Option<String>,
}

impl CreatedObject {
    fn object_id(self, what: &str) -> Result<String, PlatformError> {
        self.id
            .or(self.post_id)
            .ok_or_else(|| PlatformError::InvalidResponse(format!("{} created without an id", what)))
    }

    fn post_or_object_id(self, what: &str) -> Result<String, PlatformError> {
        self.post_id
            .or(self.id)
            .ok_or_else(|| PlatformError::InvalidResponse(format!("{} created without an id", what)))
    }
}

#[derive(Debug, Deserialize)]
struct SuccessFlag {
    success: bool,
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct DebugToken {
    is_valid: bool,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    profile_id: Option<String>,
    #[serde(default)]
    app_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    data: Vec<T>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct Paging {
    #[serde(default)]
    next: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn graph_error(code: i64, subcode: Option<i64>, message: &str) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "message": message,
                "type": "OAuthException",
                "code": code,
                "error_subcode": subcode,
            }
        })
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = GraphClient::new("https://graph.example.com/v19.0/");
        assert_eq!(client.api_url(), "https://graph.example.com/v19.0");
    }

    #[tokio::test]
    async fn test_create_post_multipart() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/page-1/photos"))
            .and(body_string_contains("name=\"source\""))
            .and(body_string_contains("Hello caption"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "photo-9",
                "post_id": "page-1_post-9"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = GraphClient::new(mock_server.uri());
        let content = PostContent {
            caption: "Hello caption".to_string(),
            asset: Asset::jpeg(vec![0xFF, 0xD8, 0xFF], "cover.jpg"),
        };
        let post_id = client
            .create_post("page-1", "tok", &content)
            .await
            .unwrap();

        assert_eq!(post_id, "page-1_post-9");
    }

    #[tokio::test]
    async fn test_create_post_by_url_falls_back_to_object_id() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/page-1/photos"))
            .and(body_string_contains("https://cdn.example.com/a.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "photo-10"
            })))
            .mount(&mock_server)
            .await;

        let client = GraphClient::new(mock_server.uri());
        let content = PostContent {
            caption: "c".to_string(),
            asset: Asset::Url("https://cdn.example.com/a.jpg".to_string()),
        };
        let post_id = client
            .create_post("page-1", "tok", &content)
            .await
            .unwrap();

        assert_eq!(post_id, "photo-10");
    }

    #[tokio::test]
    async fn test_api_error_maps_to_kind() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/page-1/photos"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(graph_error(190, None, "token expired")),
            )
            .mount(&mock_server)
            .await;

        let client = GraphClient::new(mock_server.uri());
        let content = PostContent {
            caption: "c".to_string(),
            asset: Asset::Url("https://cdn.example.com/a.jpg".to_string()),
        };
        let err = client
            .create_post("page-1", "tok", &content)
            .await
            .unwrap_err();

        assert!(matches!(err, PlatformError::Api { code: 190, .. }));
        assert_eq!(err.kind(), ErrorKind::Credential);
    }

    #[tokio::test]
    async fn test_rate_limited() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/post-1/comments"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "60"))
            .mount(&mock_server)
            .await;

        let client = GraphClient::new(mock_server.uri());
        let err = client
            .create_comment("post-1", "tok", "hi")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PlatformError::RateLimited {
                retry_after_secs: Some(60)
            }
        ));
    }

    #[tokio::test]
    async fn test_get_post_returns_permalink() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/post-1"))
            .and(query_param("fields", "id,permalink_url"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "post-1",
                "permalink_url": "https://social.example.com/post-1"
            })))
            .mount(&mock_server)
            .await;

        let client = GraphClient::new(mock_server.uri());
        let info = client.get_post("post-1", "tok").await.unwrap();

        assert_eq!(
            info,
            Some(PostInfo {
                id: "post-1".to_string(),
                permalink: Some("https://social.example.com/post-1".to_string()),
            })
        );
    }

    #[tokio::test]
    async fn test_get_post_missing_object_is_none() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/post-gone"))
            .respond_with(ResponseTemplate::new(400).set_body_json(graph_error(
                100,
                Some(33),
                "Object does not exist",
            )))
            .mount(&mock_server)
            .await;

        let client = GraphClient::new(mock_server.uri());
        assert_eq!(client.get_post("post-gone", "tok").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_post_other_errors_propagate() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/post-1"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&mock_server)
            .await;

        let client = GraphClient::new(mock_server.uri());
        let err = client.get_post("post-1", "tok").await.unwrap_err();
        assert!(matches!(err, PlatformError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_introspect_prefers_profile_id() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/debug_token"))
            .and(query_param("input_token", "page-tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": {
                    "is_valid": true,
                    "user_id": "user-1",
                    "profile_id": "page-1",
                    "app_id": "app-7"
                }
            })))
            .mount(&mock_server)
            .await;

        let client = GraphClient::new(mock_server.uri());
        let info = client.introspect_credential("page-tok").await.unwrap();

        assert_eq!(
            info,
            CredentialInfo {
                valid: true,
                subject_id: Some("page-1".to_string()),
                app_id: Some("app-7".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_list_channels() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/me/accounts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"id": "page-1", "name": "One", "access_token": "tok-1"},
                    {"id": "page-2", "name": "Two"}
                ]
            })))
            .mount(&mock_server)
            .await;

        let client = GraphClient::new(mock_server.uri());
        let channels = client.list_channels("user-tok").await.unwrap();

        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].credential.as_deref(), Some("tok-1"));
        assert_eq!(channels[1].credential, None);
    }

    #[tokio::test]
    async fn test_delete_post_requires_ack() {
        let mock_server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/post-1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"success": false})),
            )
            .mount(&mock_server)
            .await;

        let client = GraphClient::new(mock_server.uri());
        let err = client.delete_post("post-1", "tok").await.unwrap_err();
        assert!(matches!(err, PlatformError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_story_flow() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/page-1/photos"))
            .and(body_string_contains("published"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "obj-1"})),
            )
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(path("/page-1/photo_stories"))
            .and(body_string_contains("photo_id=obj-1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"post_id": "story-1"})),
            )
            .mount(&mock_server)
            .await;

        let client = GraphClient::new(mock_server.uri());
        let asset = Asset::jpeg(vec![1, 2, 3], "cover.jpg");
        let object_id = client
            .upload_unpublished_asset("page-1", "tok", &asset)
            .await
            .unwrap();
        let story_id = client
            .promote_to_story("page-1", "tok", &object_id, None)
            .await
            .unwrap();

        assert_eq!(object_id, "obj-1");
        assert_eq!(story_id, "story-1");
    }

    #[tokio::test]
    async fn test_story_without_any_id_is_invalid_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/page-1/photo_stories"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"success": true})),
            )
            .mount(&mock_server)
            .await;

        let client = GraphClient::new(mock_server.uri());
        let err = client
            .promote_to_story("page-1", "tok", "obj-1", Some("https://site.test/a"))
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::InvalidResponse(_)));
    }
}
