//! Scheduling and publishing of site content to a social channel.
//!
//! Each tick the [`Scheduler`] runs the [`GateEvaluator`] checks, asks the
//! [`CandidateSelector`] for the best eligible item, takes its publication
//! lease and hands it to the [`Publisher`]. The publisher walks the
//! [`PublishPipeline`] fallback chain and then adds the best-effort link
//! comment and story. A separate [`SyncReconciler`] sweep keeps local
//! channel state in line with what still exists upstream.
//!
//! Channel state only moves through the transitions in [`lock`]:
//!
//! ```text
//! not_shared -> sharing -> published -> deleted
//!                  |  ^
//!                  v  |
//!                 error
//! ```

pub mod caption;
pub mod comment;
mod error;
pub mod gate;
pub mod lock;
pub mod pipeline;
pub mod publisher;
mod scheduler;
pub mod selector;
pub mod store;
pub mod story;
pub mod sync;
mod types;

#[cfg(test)]
mod testing;

pub use comment::{CommentAnnotator, PromptPicker, SideEffect};
pub use error::{InvalidTransition, PublishError, StoreError};
pub use gate::{GateEvaluator, GateRejection};
pub use lock::{LEASE_TTL_MINUTES, Lease, PublicationLock, is_expired};
pub use pipeline::{
    FallbackAsset, HttpImageFetcher, ImageFetcher, PipelineEnv, PipelineSettings, PublishPipeline,
};
pub use publisher::{ChannelSettings, PublishOutcome, Publisher};
pub use scheduler::{Scheduler, StatusReport, TickOutcome, collect_status, tick_interval};
pub use selector::{CandidateSelector, CategoryFilter, Freshness, Tier, TierPolicy};
pub use store::{ContentRepository, ItemQuery, JsonFileStore, MemoryStore, SchedulerConfigStore, StoreData};
pub use story::{StoryPublisher, StorySettings};
pub use sync::{SyncReconciler, SyncReport, SyncSettings};
pub use types::{
    ChannelState, ChannelStatus, ContentItem, ImageRef, SchedulerConfig, SiteStatus,
};
