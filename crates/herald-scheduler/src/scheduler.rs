//! Periodic publish driver.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::gate::{GateEvaluator, GateRejection};
use crate::lock::PublicationLock;
use crate::publisher::{PublishOutcome, Publisher};
use crate::selector::CandidateSelector;
use crate::store::{ContentRepository, ItemQuery, SchedulerConfigStore};
use crate::PublishError;

/// Shortest tick interval.
pub const MIN_TICK_SECS: u64 = 60;

/// Longest tick interval.
pub const MAX_TICK_SECS: u64 = 120;

pub fn tick_interval(secs: u64) -> Duration {
    Duration::from_secs(secs.clamp(MIN_TICK_SECS, MAX_TICK_SECS))
}

/// What a single tick did.
#[derive(Debug)]
pub enum TickOutcome {
    /// The previous tick was still running.
    Overlapping,
    Gated(GateRejection),
    /// No eligible item.
    Idle,
    /// Another evaluator got to the selected item first.
    Contended { item_id: String },
    Published(PublishOutcome),
    Failed { item_id: String, error: String },
}

/// Snapshot for operators.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub enabled: bool,
    /// `open`, or the name of the first failing gate check.
    pub gate: String,
    pub published_today: usize,
    pub last_published_at: Option<DateTime<Utc>>,
    pub next_candidate: Option<String>,
    pub next_candidate_tier: Option<usize>,
    /// Item counts by channel status.
    pub channel_statuses: BTreeMap<String, usize>,
}

/// Clears the running flag when the tick ends, however it ends.
struct TickGuard<'a>(&'a AtomicBool);

impl<'a> TickGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Scheduler {
    repo: Arc<dyn ContentRepository>,
    config_store: Arc<dyn SchedulerConfigStore>,
    selector: CandidateSelector,
    gate: GateEvaluator,
    publisher: Arc<Publisher>,
    tick_interval: Duration,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new(
        repo: Arc<dyn ContentRepository>,
        config_store: Arc<dyn SchedulerConfigStore>,
        selector: CandidateSelector,
        gate: GateEvaluator,
        publisher: Arc<Publisher>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            repo,
            config_store,
            selector,
            gate,
            publisher,
            tick_interval,
            running: AtomicBool::new(false),
        }
    }

    /// Expire stale leases, evaluate the gate, select, lease and publish.
    #[tracing::instrument(skip(self))]
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickOutcome, PublishError> {
        let Some(_guard) = TickGuard::try_acquire(&self.running) else {
            debug!("previous tick still running");
            return Ok(TickOutcome::Overlapping);
        };

        let lock = PublicationLock::new(self.repo.as_ref());
        lock.expire_stale(now).await?;

        let config = self.config_store.load_config().await?;
        if let Err(rejection) = self.gate.evaluate(&config, self.repo.as_ref(), now).await? {
            return Ok(TickOutcome::Gated(rejection));
        }

        let Some(selection) = self.selector.next_candidate(self.repo.as_ref(), now).await? else {
            debug!("no eligible items");
            return Ok(TickOutcome::Idle);
        };
        let item_id = selection.item.id;
        debug!(item_id = %item_id, tier = selection.tier, "selected candidate");

        match lock.acquire(&item_id, now, false).await {
            Ok(_) => {}
            Err(e) if e.is_duplicate_guard() => {
                debug!(item_id = %item_id, reason = %e, "candidate taken by another evaluator");
                return Ok(TickOutcome::Contended { item_id });
            }
            Err(e) => return Err(e),
        }

        match self.publisher.publish_item(&item_id, true, now).await {
            Ok(outcome) => Ok(TickOutcome::Published(outcome)),
            Err(e) => Ok(TickOutcome::Failed {
                item_id,
                error: e.to_string(),
            }),
        }
    }

    async fn run_tick(&self) {
        match self.tick(Utc::now()).await {
            Ok(TickOutcome::Published(outcome)) => info!(
                item_id = %outcome.item_id,
                post_id = %outcome.post_id,
                strategy = outcome.strategy,
                "tick published item"
            ),
            Ok(TickOutcome::Failed { item_id, error }) => {
                warn!(item_id = %item_id, error = %error, "tick failed to publish item")
            }
            Ok(other) => debug!(outcome = ?other, "tick finished"),
            Err(e) => error!(error = %e, "tick aborted"),
        }
    }

    /// Tick on a fixed interval until shutdown. Each tick runs in its own
    /// task; a tick that starts while another is running does nothing.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        info!(interval = ?self.tick_interval, "scheduler starting");

        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("scheduler received shutdown signal");
                        break;
                    }
                }
                _ = interval.tick() => {
                    let this = Arc::clone(&self);
                    tokio::spawn(async move { this.run_tick().await });
                }
            }
        }

        info!("scheduler shut down gracefully");
    }

    pub async fn status(&self, now: DateTime<Utc>) -> Result<StatusReport, PublishError> {
        collect_status(
            self.repo.as_ref(),
            self.config_store.as_ref(),
            &self.selector,
            &self.gate,
            now,
        )
        .await
    }
}

/// Snapshot of what the next tick would see, without side effects.
pub async fn collect_status(
    repo: &dyn ContentRepository,
    config_store: &dyn SchedulerConfigStore,
    selector: &CandidateSelector,
    gate: &GateEvaluator,
    now: DateTime<Utc>,
) -> Result<StatusReport, PublishError> {
    let config = config_store.load_config().await?;
    let gate_state = match gate.evaluate(&config, repo, now).await? {
        Ok(()) => "open".to_string(),
        Err(rejection) => rejection.to_string(),
    };
    let published_today = gate.daily_count(repo, now).await?;
    let next = selector.next_candidate(repo, now).await?;

    let mut channel_statuses = BTreeMap::new();
    for item in repo.find_many(&ItemQuery::default()).await? {
        *channel_statuses
            .entry(item.channel_status().as_str().to_string())
            .or_insert(0) += 1;
    }

    Ok(StatusReport {
        enabled: config.enabled,
        gate: gate_state,
        published_today,
        last_published_at: config.last_published_at,
        next_candidate_tier: next.as_ref().map(|s| s.tier),
        next_candidate: next.map(|s| s.item.id),
        channel_statuses,
    })
}
