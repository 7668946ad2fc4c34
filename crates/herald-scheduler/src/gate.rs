//! Ordered, short-circuiting eligibility checks run before every tick.

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use tracing::debug;

use crate::store::{ContentRepository, ItemQuery};
use crate::{SchedulerConfig, StoreError};

/// Why a tick was not allowed to publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateRejection {
    Disabled,
    OutsideTimeWindow,
    DailyLimitReached,
    IntervalNotReached,
}

impl GateRejection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::OutsideTimeWindow => "outside_time_window",
            Self::DailyLimitReached => "daily_limit_reached",
            Self::IntervalNotReached => "interval_not_reached",
        }
    }
}

impl std::fmt::Display for GateRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Start of the local day containing `now`, in UTC.
pub fn local_midnight(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    now.with_timezone(&offset)
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| midnight.and_local_timezone(offset).single())
        .map(|midnight| midnight.with_timezone(&Utc))
        .unwrap_or(now)
}

/// Whether `hour` is inside `[start, end)`. Wraps past midnight when
/// `start > end`; `start == end` means the whole day.
pub fn hour_in_window(hour: u32, start: u32, end: u32) -> bool {
    if start == end {
        true
    } else if start < end {
        start <= hour && hour < end
    } else {
        hour >= start || hour < end
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GateEvaluator {
    offset: FixedOffset,
}

impl GateEvaluator {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Items that went live on the channel since local midnight.
    pub async fn daily_count(
        &self,
        repo: &dyn ContentRepository,
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let since = local_midnight(now, self.offset);
        let items = repo.find_many(&ItemQuery::published_to_channel_since(since)).await?;
        Ok(items.len())
    }

    /// Run the checks in order, stopping at the first failure. The daily
    /// count is only queried once the cheaper checks have passed.
    #[tracing::instrument(skip(self, config, repo))]
    pub async fn evaluate(
        &self,
        config: &SchedulerConfig,
        repo: &dyn ContentRepository,
        now: DateTime<Utc>,
    ) -> Result<Result<(), GateRejection>, StoreError> {
        if let Err(rejection) = self.check_enabled(config).and_then(|_| self.check_window(config, now)) {
            debug!(%rejection, "gate closed");
            return Ok(Err(rejection));
        }

        if let Err(rejection) = self.check_daily_limit(config, repo, now).await? {
            debug!(%rejection, "gate closed");
            return Ok(Err(rejection));
        }

        let result = check_interval(config, now);
        if let Err(rejection) = result {
            debug!(%rejection, "gate closed");
        }
        Ok(result)
    }

    /// The daily cap on its own. Manual publishes answer to it too.
    pub async fn check_daily_limit(
        &self,
        config: &SchedulerConfig,
        repo: &dyn ContentRepository,
        now: DateTime<Utc>,
    ) -> Result<Result<(), GateRejection>, StoreError> {
        if config.max_per_day == 0 {
            return Ok(Ok(()));
        }
        let count = self.daily_count(repo, now).await?;
        Ok(check_quota(config, count))
    }

    fn check_enabled(&self, config: &SchedulerConfig) -> Result<(), GateRejection> {
        if config.enabled {
            Ok(())
        } else {
            Err(GateRejection::Disabled)
        }
    }

    fn check_window(&self, config: &SchedulerConfig, now: DateTime<Utc>) -> Result<(), GateRejection> {
        let hour = now.with_timezone(&self.offset).hour();
        if hour_in_window(hour, config.window_start_hour, config.window_end_hour) {
            Ok(())
        } else {
            Err(GateRejection::OutsideTimeWindow)
        }
    }
}

fn check_quota(config: &SchedulerConfig, count: usize) -> Result<(), GateRejection> {
    if config.max_per_day > 0 && count >= config.max_per_day as usize {
        Err(GateRejection::DailyLimitReached)
    } else {
        Ok(())
    }
}

fn check_interval(config: &SchedulerConfig, now: DateTime<Utc>) -> Result<(), GateRejection> {
    match config.last_published_at {
        Some(last) if (now - last).num_minutes() < config.interval_minutes as i64 => {
            Err(GateRejection::IntervalNotReached)
        }
        _ => Ok(()),
    }
}
