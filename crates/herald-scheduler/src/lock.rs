//! Per-item publication lease.
//!
//! An item is leased by moving its channel status to `sharing` with a
//! `lease_start` timestamp. The move is a compare-and-swap against the
//! repository, so two evaluators racing for the same item cannot both win.
//! A lease older than [`LEASE_TTL_MINUTES`] is considered abandoned and is
//! turned into an `error` state before anything else looks at the item.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::error::InvalidTransition;
use crate::store::{ContentRepository, ItemQuery};
use crate::{ChannelState, ChannelStatus, ContentItem, PublishError, StoreError};

pub const LEASE_TTL_MINUTES: i64 = 10;

/// Attempts at a conditional write before giving up on a contended item.
const CAS_RETRIES: usize = 3;

pub fn lease_ttl() -> Duration {
    Duration::minutes(LEASE_TTL_MINUTES)
}

/// The part of [`ChannelState`] the lease logic looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub state: ChannelStatus,
    pub lease_start: Option<DateTime<Utc>>,
}

/// A `sharing` lease is expired once it is older than `ttl`. A `sharing`
/// state without a start time can never be renewed, so it counts as expired.
pub fn is_expired(lease: &Lease, ttl: Duration, now: DateTime<Utc>) -> bool {
    if lease.state != ChannelStatus::Sharing {
        return false;
    }
    match lease.lease_start {
        Some(start) => now - start > ttl,
        None => true,
    }
}

impl ChannelState {
    pub fn lease(&self) -> Lease {
        Lease {
            state: self.status,
            lease_start: self.lease_start,
        }
    }

    /// `not_shared | error -> sharing`.
    pub fn begin_attempt(&mut self, now: DateTime<Utc>) -> Result<(), InvalidTransition> {
        match self.status {
            ChannelStatus::NotShared | ChannelStatus::Error => {
                self.status = ChannelStatus::Sharing;
                self.lease_start = Some(now);
                self.attempt_count += 1;
                Ok(())
            }
            from => Err(InvalidTransition {
                from,
                action: "start publishing",
            }),
        }
    }

    /// `sharing -> published`. Also accepted from `error` so a success that
    /// lands after its lease was expired is still recorded.
    pub fn complete(
        &mut self,
        post_id: String,
        permalink: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), InvalidTransition> {
        match self.status {
            ChannelStatus::Sharing | ChannelStatus::Error => {
                self.status = ChannelStatus::Published;
                self.post_id = Some(post_id);
                self.permalink = permalink;
                self.published_at = Some(now);
                self.lease_start = None;
                self.last_error = None;
                Ok(())
            }
            from => Err(InvalidTransition {
                from,
                action: "complete",
            }),
        }
    }

    /// `sharing -> error`. On an already failed item only the message changes.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), InvalidTransition> {
        match self.status {
            ChannelStatus::Sharing | ChannelStatus::Error => {
                self.status = ChannelStatus::Error;
                self.last_error = Some(message.into());
                self.lease_start = None;
                Ok(())
            }
            from => Err(InvalidTransition { from, action: "fail" }),
        }
    }

    /// Expire a stale lease. Returns whether anything changed.
    pub fn expire(&mut self, now: DateTime<Utc>, ttl: Duration) -> bool {
        if !is_expired(&self.lease(), ttl, now) {
            return false;
        }
        self.status = ChannelStatus::Error;
        self.last_error = Some(format!(
            "publish lease expired after {} minutes",
            ttl.num_minutes()
        ));
        self.lease_start = None;
        true
    }

    /// `published -> deleted`.
    pub fn mark_deleted(&mut self) -> Result<(), InvalidTransition> {
        match self.status {
            ChannelStatus::Published => {
                self.status = ChannelStatus::Deleted;
                self.post_id = None;
                self.permalink = None;
                Ok(())
            }
            from => Err(InvalidTransition {
                from,
                action: "delete",
            }),
        }
    }

    pub fn set_permalink(&mut self, permalink: String) -> Result<(), InvalidTransition> {
        match self.status {
            ChannelStatus::Published => {
                self.permalink = Some(permalink);
                Ok(())
            }
            from => Err(InvalidTransition {
                from,
                action: "update the permalink of",
            }),
        }
    }
}

/// Repository-backed lease operations.
pub struct PublicationLock<'a> {
    repo: &'a dyn ContentRepository,
    ttl: Duration,
}

impl<'a> PublicationLock<'a> {
    pub fn new(repo: &'a dyn ContentRepository) -> Self {
        Self {
            repo,
            ttl: lease_ttl(),
        }
    }

    async fn load(&self, item_id: &str) -> Result<ContentItem, PublishError> {
        self.repo
            .find_by_id(item_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(item_id.to_string()).into())
    }

    /// Take the lease on an item, or confirm it when `lease_held` says the
    /// caller already moved it to `sharing`. Returns the item with its
    /// updated channel state.
    #[tracing::instrument(skip(self))]
    pub async fn acquire(
        &self,
        item_id: &str,
        now: DateTime<Utc>,
        lease_held: bool,
    ) -> Result<ContentItem, PublishError> {
        let mut item = self.load(item_id).await?;
        let mut state = item.channel_state();

        if state.expire(now, self.ttl) {
            warn!(item_id, "publish lease expired, marking item as failed");
            let swapped = self
                .repo
                .compare_and_swap_channel_state(item_id, ChannelStatus::Sharing, state.clone())
                .await?;
            if !swapped {
                return Err(PublishError::InProgress(item_id.to_string()));
            }
        }

        if lease_held {
            if state.status != ChannelStatus::Sharing {
                return Err(PublishError::Validation(format!(
                    "no publish lease held on item {}",
                    item_id
                )));
            }
            item.channel = Some(state);
            return Ok(item);
        }

        match state.status {
            ChannelStatus::Published => Err(PublishError::AlreadyPublished(item_id.to_string())),
            ChannelStatus::Sharing => Err(PublishError::InProgress(item_id.to_string())),
            expected => {
                state.begin_attempt(now)?;
                let swapped = self
                    .repo
                    .compare_and_swap_channel_state(item_id, expected, state.clone())
                    .await?;
                if !swapped {
                    debug!(item_id, "lost the race for the publish lease");
                    return Err(PublishError::InProgress(item_id.to_string()));
                }
                debug!(item_id, attempt = state.attempt_count, "publish lease acquired");
                item.channel = Some(state);
                Ok(item)
            }
        }
    }

    /// Expire every stale lease. Returns how many were expired.
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let query = ItemQuery {
            channel_statuses: vec![ChannelStatus::Sharing],
            ..ItemQuery::default()
        };
        let mut expired = 0;
        for item in self.repo.find_many(&query).await? {
            let mut state = item.channel_state();
            if !state.expire(now, self.ttl) {
                continue;
            }
            if self
                .repo
                .compare_and_swap_channel_state(&item.id, ChannelStatus::Sharing, state)
                .await?
            {
                warn!(item_id = %item.id, "publish lease expired, marking item as failed");
                expired += 1;
            }
        }
        Ok(expired)
    }

    pub async fn complete(
        &self,
        item_id: &str,
        post_id: &str,
        permalink: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ChannelState, PublishError> {
        self.transition(item_id, |state| {
            state.complete(post_id.to_string(), permalink.map(str::to_string), now)
        })
        .await
    }

    pub async fn fail(&self, item_id: &str, message: &str) -> Result<ChannelState, PublishError> {
        self.transition(item_id, |state| state.fail(message)).await
    }

    pub async fn mark_deleted(&self, item_id: &str) -> Result<ChannelState, PublishError> {
        self.transition(item_id, |state| state.mark_deleted()).await
    }

    pub async fn set_permalink(
        &self,
        item_id: &str,
        permalink: &str,
    ) -> Result<ChannelState, PublishError> {
        self.transition(item_id, |state| state.set_permalink(permalink.to_string()))
            .await
    }

    /// Apply `apply` to the stored state with a conditional write, retrying
    /// when another writer changed the status in between.
    async fn transition<F>(&self, item_id: &str, apply: F) -> Result<ChannelState, PublishError>
    where
        F: Fn(&mut ChannelState) -> Result<(), InvalidTransition> + Send + Sync,
    {
        for _ in 0..CAS_RETRIES {
            let item = self.load(item_id).await?;
            let expected = item.channel_status();
            let mut state = item.channel_state();
            apply(&mut state)?;
            if self
                .repo
                .compare_and_swap_channel_state(item_id, expected, state.clone())
                .await?
            {
                return Ok(state);
            }
            debug!(item_id, "channel state changed concurrently, retrying");
        }
        Err(PublishError::InProgress(item_id.to_string()))
    }
}
