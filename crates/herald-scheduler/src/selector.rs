//! Priority-tiered candidate selection.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::gate::local_midnight;
use crate::store::{ContentRepository, ItemQuery};
use crate::{ChannelStatus, ContentItem, PublishError, SiteStatus, StoreError};

/// Which categories a tier covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryFilter {
    /// Any of the listed categories.
    Named(Vec<String>),
    /// A category no tier of the policy names.
    Other,
    /// Evergreen items of any category.
    Evergreen,
}

/// How recently an item must have gone live on the site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// Since local midnight.
    Today,
    WithinHours(u32),
    Unbounded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    pub category: CategoryFilter,
    pub freshness: Freshness,
}

impl Tier {
    pub fn new(category: CategoryFilter, freshness: Freshness) -> Self {
        Self {
            category,
            freshness,
        }
    }
}

/// Ordered tier list. Product policy, so it is loaded rather than hardcoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPolicy {
    pub tiers: Vec<Tier>,
}

impl Default for TierPolicy {
    fn default() -> Self {
        let named = |c: &str| CategoryFilter::Named(vec![c.to_string()]);
        Self {
            tiers: vec![
                Tier::new(named("news"), Freshness::Today),
                Tier::new(named("news"), Freshness::WithinHours(48)),
                Tier::new(named("news"), Freshness::WithinHours(7 * 24)),
                Tier::new(named("markets"), Freshness::WithinHours(3 * 24)),
                Tier::new(named("markets"), Freshness::WithinHours(7 * 24)),
                Tier::new(named("guides"), Freshness::WithinHours(7 * 24)),
                Tier::new(CategoryFilter::Other, Freshness::WithinHours(5 * 24)),
                Tier::new(CategoryFilter::Evergreen, Freshness::Unbounded),
            ],
        }
    }
}

impl TierPolicy {
    /// Load a policy from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, PublishError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PublishError::Configuration(format!("cannot read policy {}: {}", path.display(), e))
        })?;
        let policy: Self = serde_json::from_str(&text).map_err(|e| {
            PublishError::Configuration(format!("invalid policy {}: {}", path.display(), e))
        })?;
        if policy.tiers.is_empty() {
            return Err(PublishError::Configuration(format!(
                "policy {} has no tiers",
                path.display()
            )));
        }
        Ok(policy)
    }

    fn named_categories(&self) -> HashSet<String> {
        self.tiers
            .iter()
            .filter_map(|t| match &t.category {
                CategoryFilter::Named(names) => Some(names.iter().map(|n| n.to_lowercase())),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

/// A candidate and the tier it was selected from.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub tier: usize,
    pub item: ContentItem,
}

/// Picks the next item to publish.
#[derive(Debug, Clone)]
pub struct CandidateSelector {
    policy: TierPolicy,
    named: HashSet<String>,
    offset: FixedOffset,
}

impl CandidateSelector {
    pub fn new(policy: TierPolicy, offset: FixedOffset) -> Self {
        let named = policy.named_categories();
        Self {
            policy,
            named,
            offset,
        }
    }

    pub fn policy(&self) -> &TierPolicy {
        &self.policy
    }

    /// Site-published and never shared (absent state counts as not shared).
    pub fn is_candidate(item: &ContentItem) -> bool {
        item.status == SiteStatus::Published && item.channel_status() == ChannelStatus::NotShared
    }

    /// Whether `item` falls in `tier` at `now`, ignoring candidacy.
    pub fn tier_matches(&self, tier: &Tier, item: &ContentItem, now: DateTime<Utc>) -> bool {
        let category_ok = match &tier.category {
            CategoryFilter::Named(names) => names.iter().any(|n| n.eq_ignore_ascii_case(&item.category)),
            CategoryFilter::Other => !self.named.contains(&item.category.to_lowercase()),
            CategoryFilter::Evergreen => item.evergreen,
        };
        if !category_ok {
            return false;
        }

        match tier.freshness {
            Freshness::Unbounded => true,
            Freshness::Today => item
                .published_at
                .is_some_and(|at| at >= local_midnight(now, self.offset)),
            Freshness::WithinHours(hours) => item
                .published_at
                .is_some_and(|at| at >= now - Duration::hours(hours as i64)),
        }
    }

    /// Index of the first tier `item` qualifies for, if it is a candidate.
    pub fn tier_of(&self, item: &ContentItem, now: DateTime<Utc>) -> Option<usize> {
        if !Self::is_candidate(item) {
            return None;
        }
        self.policy
            .tiers
            .iter()
            .position(|tier| self.tier_matches(tier, item, now))
    }

    /// Single-item check used outside of batch scheduling.
    pub fn is_eligible(&self, item: &ContentItem, now: DateTime<Utc>) -> bool {
        self.tier_of(item, now).is_some()
    }

    /// Oldest match from the first non-empty tier.
    pub fn select<'a>(&self, items: &'a [ContentItem], now: DateTime<Utc>) -> Option<(usize, &'a ContentItem)> {
        for (index, tier) in self.policy.tiers.iter().enumerate() {
            let oldest = items
                .iter()
                .filter(|item| Self::is_candidate(item) && self.tier_matches(tier, item, now))
                .min_by(|a, b| (a.published_at, &a.id).cmp(&(b.published_at, &b.id)));
            if let Some(item) = oldest {
                return Some((index, item));
            }
        }
        None
    }

    /// Query the repository and select the next candidate.
    pub async fn next_candidate(
        &self,
        repo: &dyn ContentRepository,
        now: DateTime<Utc>,
    ) -> Result<Option<Selection>, StoreError> {
        let items = repo.find_many(&ItemQuery::candidates()).await?;
        Ok(self.select(&items, now).map(|(tier, item)| Selection {
            tier,
            item: item.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChannelState;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 15, 0, 0).unwrap()
    }

    fn item(id: &str, category: &str, hours_ago: i64) -> ContentItem {
        let mut item = ContentItem::new(id, category, format!("Title {}", id));
        item.published_at = Some(now() - Duration::hours(hours_ago));
        item
    }

    fn selector() -> CandidateSelector {
        CandidateSelector::new(TierPolicy::default(), utc())
    }

    #[test]
    fn test_today_beats_older_news() {
        let items = vec![item("old", "news", 30), item("fresh", "news", 2)];
        let (tier, chosen) = selector().select(&items, now()).unwrap();
        assert_eq!(tier, 0);
        assert_eq!(chosen.id, "fresh");
    }

    #[test]
    fn test_oldest_first_within_tier() {
        let items = vec![item("b", "news", 1), item("a", "news", 3), item("c", "news", 2)];
        let (_, chosen) = selector().select(&items, now()).unwrap();
        assert_eq!(chosen.id, "a");
    }

    #[test]
    fn test_tie_broken_by_id() {
        let items = vec![item("z", "news", 3), item("m", "news", 3)];
        let (_, chosen) = selector().select(&items, now()).unwrap();
        assert_eq!(chosen.id, "m");
    }

    #[test]
    fn test_tiers_are_not_merged() {
        // Older markets item loses to a news item from yesterday.
        let items = vec![item("m", "markets", 10), item("n", "news", 40)];
        let (tier, chosen) = selector().select(&items, now()).unwrap();
        assert_eq!(tier, 1);
        assert_eq!(chosen.id, "n");
    }

    #[test]
    fn test_other_category_window() {
        let sel = selector();
        assert_eq!(sel.tier_of(&item("x", "travel", 4 * 24), now()), Some(6));
        assert_eq!(sel.tier_of(&item("y", "travel", 6 * 24), now()), None);
        // Named categories never fall through to the "other" tier.
        assert_eq!(sel.tier_of(&item("z", "guides", 8 * 24), now()), None);
    }

    #[test]
    fn test_evergreen_is_unbounded() {
        let mut old = item("e", "guides", 400 * 24);
        old.evergreen = true;
        assert_eq!(selector().tier_of(&old, now()), Some(7));
    }

    #[test]
    fn test_non_candidates_are_ineligible() {
        let sel = selector();
        let mut draft = item("d", "news", 1);
        draft.status = SiteStatus::Draft;
        assert!(!sel.is_eligible(&draft, now()));

        let mut errored = item("e", "news", 1);
        errored.channel = Some(ChannelState {
            status: ChannelStatus::Error,
            ..ChannelState::default()
        });
        assert!(!sel.is_eligible(&errored, now()));

        let mut explicit = item("n", "news", 1);
        explicit.channel = Some(ChannelState::default());
        assert!(sel.is_eligible(&explicit, now()));
    }

    #[test]
    fn test_today_uses_local_midnight() {
        // 15:00 UTC is 00:30 the next day at +09:30.
        let offset = FixedOffset::east_opt(9 * 3600 + 1800).unwrap();
        let sel = CandidateSelector::new(TierPolicy::default(), offset);
        let recent = item("r", "news", 1);
        assert_eq!(sel.tier_of(&recent, now()), Some(1));
    }

    #[test]
    fn test_policy_json_shape() {
        let policy: TierPolicy = serde_json::from_value(serde_json::json!({
            "tiers": [
                {"category": {"named": ["sport"]}, "freshness": "today"},
                {"category": "other", "freshness": {"within_hours": 12}},
                {"category": "evergreen", "freshness": "unbounded"}
            ]
        }))
        .unwrap();
        assert_eq!(policy.tiers.len(), 3);
        assert_eq!(policy.tiers[1].freshness, Freshness::WithinHours(12));
    }

    #[test]
    fn test_policy_file_errors_are_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let missing = TierPolicy::from_json_file(&dir.path().join("nope.json"));
        assert!(matches!(missing, Err(PublishError::Configuration(_))));

        let empty = dir.path().join("empty.json");
        std::fs::write(&empty, r#"{"tiers": []}"#).unwrap();
        assert!(matches!(
            TierPolicy::from_json_file(&empty),
            Err(PublishError::Configuration(_))
        ));
    }

    fn arb_item() -> impl Strategy<Value = ContentItem> {
        (
            "[a-f]{1,3}",
            prop_oneof![
                Just("news"),
                Just("markets"),
                Just("guides"),
                Just("travel"),
                Just("NEWS")
            ],
            0i64..(12 * 24),
            any::<bool>(),
            prop_oneof![
                Just(None),
                Just(Some(ChannelStatus::NotShared)),
                Just(Some(ChannelStatus::Error)),
                Just(Some(ChannelStatus::Published)),
            ],
            prop_oneof![4 => Just(SiteStatus::Published), 1 => Just(SiteStatus::Draft)],
        )
            .prop_map(|(id, category, hours, evergreen, channel, status)| {
                let mut item = item(&id, category, hours);
                item.evergreen = evergreen;
                item.status = status;
                item.channel = channel.map(|status| ChannelState {
                    status,
                    ..ChannelState::default()
                });
                item
            })
    }

    fn unique(items: Vec<ContentItem>) -> Vec<ContentItem> {
        let mut seen = HashSet::new();
        items
            .into_iter()
            .filter(|i| seen.insert(i.id.clone()))
            .collect()
    }

    proptest! {
        // Never return a lower tier while a higher tier has an eligible item.
        #[test]
        fn selection_respects_tier_priority(items in prop::collection::vec(arb_item(), 0..30)) {
            let sel = selector();
            let best = items.iter().filter_map(|i| sel.tier_of(i, now())).min();
            let chosen = sel.select(&items, now()).map(|(tier, _)| tier);
            prop_assert_eq!(chosen, best);
        }

        // is_eligible equals the set the selector can reach by draining it.
        #[test]
        fn eligibility_matches_reachable_set(items in prop::collection::vec(arb_item(), 0..30)) {
            let sel = selector();
            let mut remaining = unique(items);
            let eligible: HashSet<String> = remaining
                .iter()
                .filter(|i| sel.is_eligible(i, now()))
                .map(|i| i.id.clone())
                .collect();

            let mut reachable = HashSet::new();
            while let Some((_, chosen)) = sel.select(&remaining, now()) {
                let id = chosen.id.clone();
                remaining.retain(|i| i.id != id);
                reachable.insert(id);
            }

            prop_assert_eq!(reachable, eligible);
        }
    }
}
