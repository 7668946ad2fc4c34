//! In-memory platform and fetcher doubles for unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use herald_platform::{
    CredentialInfo, ManagedChannel, PlatformClient, PlatformError, PostContent, PostInfo,
};

use crate::PublishError;
use crate::pipeline::ImageFetcher;

pub(crate) fn png_bytes() -> Vec<u8> {
    let mut bytes = Vec::new();
    image::RgbImage::from_pixel(4, 4, image::Rgb([90, 120, 200]))
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

#[derive(Default)]
struct StubState {
    calls: Vec<String>,
    post_errors: VecDeque<PlatformError>,
    post_delays: VecDeque<Duration>,
    posts: HashMap<String, PostInfo>,
    get_post_errors: HashSet<String>,
    comment_failures: usize,
    story_fails: bool,
    next_id: usize,
}

/// Records every call. The credential introspects as the channel itself.
pub(crate) struct StubPlatform {
    channel_id: String,
    state: Mutex<StubState>,
}

impl StubPlatform {
    pub(crate) fn new(channel_id: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            state: Mutex::new(StubState::default()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn post_count(&self) -> usize {
        self.calls().iter().filter(|c| c.starts_with("create_post")).count()
    }

    pub(crate) fn fail_next_post(&self, err: PlatformError) {
        self.state.lock().unwrap().post_errors.push_back(err);
    }

    pub(crate) fn delay_next_post(&self, delay: Duration) {
        self.state.lock().unwrap().post_delays.push_back(delay);
    }

    pub(crate) fn fail_comments(&self, times: usize) {
        self.state.lock().unwrap().comment_failures = times;
    }

    pub(crate) fn fail_stories(&self) {
        self.state.lock().unwrap().story_fails = true;
    }

    pub(crate) fn insert_post(&self, id: &str, permalink: Option<&str>) {
        self.state.lock().unwrap().posts.insert(
            id.to_string(),
            PostInfo {
                id: id.to_string(),
                permalink: permalink.map(str::to_string),
            },
        );
    }

    pub(crate) fn fail_lookups_for(&self, id: &str) {
        self.state.lock().unwrap().get_post_errors.insert(id.to_string());
    }

    pub(crate) fn has_post(&self, id: &str) -> bool {
        self.state.lock().unwrap().posts.contains_key(id)
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl PlatformClient for StubPlatform {
    async fn create_post(
        &self,
        channel_id: &str,
        _token: &str,
        content: &PostContent,
    ) -> Result<String, PlatformError> {
        self.record(format!("create_post:{}:{}", channel_id, content.asset.describe()));
        let delay = self.state.lock().unwrap().post_delays.pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.post_errors.pop_front() {
            return Err(err);
        }
        state.next_id += 1;
        let id = format!("P{}", state.next_id);
        state.posts.insert(
            id.clone(),
            PostInfo {
                id: id.clone(),
                permalink: Some(format!("https://social.test/{}", id)),
            },
        );
        Ok(id)
    }

    async fn create_comment(
        &self,
        post_id: &str,
        _token: &str,
        text: &str,
    ) -> Result<String, PlatformError> {
        self.record(format!("comment:{}:{}", post_id, text));
        let mut state = self.state.lock().unwrap();
        if state.comment_failures > 0 {
            state.comment_failures -= 1;
            return Err(PlatformError::Api {
                code: 2,
                message: "temporarily unavailable".into(),
            });
        }
        Ok(format!("{}_c", post_id))
    }

    async fn get_post(&self, post_id: &str, _token: &str) -> Result<Option<PostInfo>, PlatformError> {
        self.record(format!("get_post:{}", post_id));
        let state = self.state.lock().unwrap();
        if state.get_post_errors.contains(post_id) {
            return Err(PlatformError::Api {
                code: 1,
                message: "lookup failed".into(),
            });
        }
        Ok(state.posts.get(post_id).cloned())
    }

    async fn delete_post(&self, post_id: &str, _token: &str) -> Result<(), PlatformError> {
        self.record(format!("delete_post:{}", post_id));
        match self.state.lock().unwrap().posts.remove(post_id) {
            Some(_) => Ok(()),
            None => Err(PlatformError::NotFound(post_id.to_string())),
        }
    }

    async fn introspect_credential(&self, _token: &str) -> Result<CredentialInfo, PlatformError> {
        Ok(CredentialInfo {
            valid: true,
            subject_id: Some(self.channel_id.clone()),
            app_id: Some("app".into()),
        })
    }

    async fn list_channels(&self, _token: &str) -> Result<Vec<ManagedChannel>, PlatformError> {
        Ok(Vec::new())
    }

    async fn upload_unpublished_asset(
        &self,
        channel_id: &str,
        _token: &str,
        asset: &herald_platform::Asset,
    ) -> Result<String, PlatformError> {
        self.record(format!("upload_unpublished:{}:{}", channel_id, asset.describe()));
        Ok("U1".into())
    }

    async fn promote_to_story(
        &self,
        channel_id: &str,
        _token: &str,
        object_id: &str,
        link: Option<&str>,
    ) -> Result<String, PlatformError> {
        self.record(format!("story:{}:{}:{}", channel_id, object_id, link.unwrap_or("-")));
        if self.state.lock().unwrap().story_fails {
            return Err(PlatformError::PermissionDenied("stories not allowed".into()));
        }
        Ok("S1".into())
    }
}

/// Fetcher with a fixed set of reachable URLs and downloadable images.
#[derive(Default)]
pub(crate) struct StubFetcher {
    reachable: HashSet<String>,
    images: HashMap<String, Vec<u8>>,
}

impl StubFetcher {
    pub(crate) fn reachable(mut self, url: &str) -> Self {
        self.reachable.insert(url.to_string());
        self
    }

    pub(crate) fn with_image(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.images.insert(url.to_string(), bytes);
        self
    }
}

#[async_trait]
impl ImageFetcher for StubFetcher {
    async fn probe(&self, url: &str) -> bool {
        self.reachable.contains(url)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, PublishError> {
        self.images
            .get(url)
            .cloned()
            .ok_or_else(|| PublishError::Upstream {
                message: format!("{} not found", url),
                hint: "check the image URL",
            })
    }
}
