//! Campaign-level availability statistics.

use raffle_alloc_core::{AllocationError, CampaignId, ShardStore, StateCounts, StoreError};
use std::sync::Arc;

/// Point-in-time statistics for one campaign.
///
/// Computed from the cached per-shard counters, so a snapshot costs one
/// counter read per shard instead of a bitmap scan. Under concurrency the
/// snapshot may lag individual operations by design; the three counts
/// always sum to the campaign total.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CampaignStats {
    /// Total ticket numbers in the campaign
    pub total: u64,
    /// Numbers currently available
    pub available: u64,
    /// Numbers currently held by active reservations
    pub reserved: u64,
    /// Numbers sold
    pub sold: u64,
    /// Whole-percent share of numbers still available
    pub percent_available: u8,
    /// Whole-percent share of numbers sold
    pub percent_complete: u8,
}

impl CampaignStats {
    fn from_counts(counts: StateCounts) -> Self {
        let total = counts.total();
        Self {
            total,
            available: counts.available,
            reserved: counts.reserved,
            sold: counts.sold,
            percent_available: percent_of(counts.available, total),
            percent_complete: percent_of(counts.sold, total),
        }
    }
}

/// Rounded whole-percent share, 0 for an empty total.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn percent_of(part: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    ((part as f64 / total as f64) * 100.0).round() as u8
}

/// Aggregates shard counters into [`CampaignStats`].
#[derive(Clone)]
pub struct StatsAggregator {
    shards: Arc<dyn ShardStore>,
}

impl StatsAggregator {
    /// Creates an aggregator over the given shard store
    #[must_use]
    pub fn new(shards: Arc<dyn ShardStore>) -> Self {
        Self { shards }
    }

    /// Snapshot of the campaign's per-state counts and sell-through.
    ///
    /// # Errors
    ///
    /// - `AllocationError::CampaignNotFound` if never initialized
    /// - `AllocationError::Storage` on store failure
    pub async fn campaign_stats(
        &self,
        campaign_id: CampaignId,
    ) -> Result<CampaignStats, AllocationError> {
        let counts = self.shards.counts(campaign_id).await.map_err(|error| match error {
            StoreError::CampaignNotFound(id) => AllocationError::CampaignNotFound(id),
            other => AllocationError::Storage(other),
        })?;
        Ok(CampaignStats::from_counts(counts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentages_round_to_whole_numbers() {
        let stats = CampaignStats::from_counts(StateCounts {
            available: 1,
            reserved: 1,
            sold: 1,
        });
        assert_eq!(stats.total, 3);
        assert_eq!(stats.percent_available, 33);
        assert_eq!(stats.percent_complete, 33);

        let sold_out = CampaignStats::from_counts(StateCounts {
            available: 0,
            reserved: 0,
            sold: 250,
        });
        assert_eq!(sold_out.percent_available, 0);
        assert_eq!(sold_out.percent_complete, 100);
    }

    #[test]
    fn empty_total_yields_zero_percentages() {
        let stats = CampaignStats::from_counts(StateCounts::default());
        assert_eq!(stats.percent_available, 0);
        assert_eq!(stats.percent_complete, 0);
    }
}
