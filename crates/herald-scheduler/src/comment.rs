//! Follow-up comment with the article link.

use std::sync::Arc;
use std::time::Duration;

use herald_platform::PlatformClient;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, warn};

/// Result of a best-effort follow-up action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result", content = "detail")]
pub enum SideEffect {
    /// Id of the created object.
    Done(String),
    Failed(String),
    Skipped,
}

/// Lead-ins placed before the article link.
pub const DEFAULT_PROMPTS: &[&str] = &[
    "Read the full story here:",
    "Full article:",
    "More details on our site:",
    "Get the whole story:",
    "Continue reading:",
    "The complete report:",
    "Read more:",
    "All the details here:",
    "Find out more:",
    "Dig deeper:",
    "Here is the full piece:",
    "Want the full picture?",
    "The rest of the story:",
    "Keep reading on our site:",
    "Read on:",
    "Full coverage here:",
    "Everything you need to know:",
    "See the full article:",
    "Catch the full story:",
    "Get all the facts:",
    "Learn more:",
    "Full breakdown here:",
    "Open the article:",
    "More on this story:",
    "The full write-up:",
    "Click through for more:",
    "Details and analysis:",
    "Read the full report:",
    "Our full coverage:",
    "Explore the story:",
];

/// Chooses prompts uniformly without repeating the previous pick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PromptPicker {
    last: Option<usize>,
}

impl PromptPicker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index into a pool of `len` prompts. `len` must be non-zero.
    pub fn pick<R: Rng + ?Sized>(&mut self, len: usize, rng: &mut R) -> usize {
        let index = match self.last {
            Some(last) if len > 1 && last < len => {
                let i = rng.gen_range(0..len - 1);
                if i >= last { i + 1 } else { i }
            }
            _ => rng.gen_range(0..len),
        };
        self.last = Some(index);
        index
    }
}

pub struct CommentAnnotator {
    platform: Arc<dyn PlatformClient>,
    prompts: Vec<String>,
    retries: usize,
    backoff: Duration,
}

impl CommentAnnotator {
    pub fn new(platform: Arc<dyn PlatformClient>, backoff: Duration) -> Self {
        Self {
            platform,
            prompts: DEFAULT_PROMPTS.iter().map(|p| p.to_string()).collect(),
            retries: 2,
            backoff,
        }
    }

    pub fn with_prompts(mut self, prompts: Vec<String>) -> Self {
        if !prompts.is_empty() {
            self.prompts = prompts;
        }
        self
    }

    /// Comment text for `url`, advancing `picker`.
    pub fn compose<R: Rng + ?Sized>(&self, url: &str, picker: &mut PromptPicker, rng: &mut R) -> String {
        let prompt = &self.prompts[picker.pick(self.prompts.len(), rng)];
        format!("{} {}", prompt, url)
    }

    /// Post `text` under the post, retrying with a fixed pause. Never fails
    /// the caller.
    #[tracing::instrument(skip(self, token, text))]
    pub async fn annotate(&self, post_id: &str, token: &str, text: &str) -> SideEffect {
        let mut attempt = 0;
        loop {
            match self.platform.create_comment(post_id, token, text).await {
                Ok(id) => {
                    debug!(comment_id = %id, "comment posted");
                    return SideEffect::Done(id);
                }
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    warn!(error = %e, attempt, "comment failed, retrying");
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) => {
                    warn!(error = %e, "comment failed, giving up");
                    return SideEffect::Failed(e.to_string());
                }
            }
        }
    }
}
