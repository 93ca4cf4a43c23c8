//! Shard routing and per-campaign shard metadata.
//!
//! A campaign's numbers are partitioned into fixed-size contiguous shards.
//! Routing a number to its shard is pure arithmetic (no I/O); the meta
//! record carries the partition geometry plus the running aggregate
//! availability maintained transactionally alongside shard mutations.

use crate::types::{CampaignId, TicketNumber};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordinal of a shard within its campaign, 0-based and stable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShardIndex(u32);

impl ShardIndex {
    /// Creates a `ShardIndex`
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw ordinal
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ShardIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shard holding `number` under the given partition size. Pure function.
#[must_use]
pub const fn shard_for(number: TicketNumber, shard_size: u32) -> ShardIndex {
    ShardIndex::new(number.value() / shard_size)
}

/// Number of shards needed to cover `total_numbers`.
#[must_use]
pub const fn shard_count(total_numbers: u32, shard_size: u32) -> u32 {
    total_numbers.div_ceil(shard_size)
}

/// `(start, len)` of the number range covered by `index`.
///
/// The final shard may be shorter than `shard_size` when the total is not
/// a multiple of it.
#[must_use]
pub const fn shard_bounds(index: ShardIndex, shard_size: u32, total_numbers: u32) -> (u32, u32) {
    let start = index.value() * shard_size;
    let remaining = total_numbers - start;
    let len = if remaining < shard_size { remaining } else { shard_size };
    (start, len)
}

/// Per-campaign partition geometry and running availability.
///
/// One record per campaign, created at initialization and never resized.
/// `total_available` moves in the same storage transaction as the shard
/// mutation that changes it, so it never drifts from the per-shard
/// counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardMeta {
    /// Campaign this meta belongs to
    pub campaign_id: CampaignId,
    /// Numbers per shard (final shard may be shorter)
    pub shard_size: u32,
    /// Count of shards in the campaign
    pub shard_count: u32,
    /// Total ticket numbers in the campaign
    pub total_numbers: u32,
    /// Sum of all shards' available counters
    pub total_available: u64,
}

impl ShardMeta {
    /// Meta for a freshly initialized campaign (everything available)
    #[must_use]
    pub const fn new(campaign_id: CampaignId, total_numbers: u32, shard_size: u32) -> Self {
        Self {
            campaign_id,
            shard_size,
            shard_count: shard_count(total_numbers, shard_size),
            total_numbers,
            total_available: total_numbers as u64,
        }
    }

    /// Whether `number` is inside this campaign's `0..total_numbers` range
    #[must_use]
    pub const fn contains(&self, number: TicketNumber) -> bool {
        number.value() < self.total_numbers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_is_zero_based_division() {
        assert_eq!(shard_for(TicketNumber::new(0), 1000), ShardIndex::new(0));
        assert_eq!(shard_for(TicketNumber::new(999), 1000), ShardIndex::new(0));
        assert_eq!(shard_for(TicketNumber::new(1000), 1000), ShardIndex::new(1));
        assert_eq!(shard_for(TicketNumber::new(123_456), 1000), ShardIndex::new(123));
    }

    #[test]
    fn shard_count_rounds_up() {
        assert_eq!(shard_count(1000, 1000), 1);
        assert_eq!(shard_count(1001, 1000), 2);
        assert_eq!(shard_count(100_000, 4096), 25);
    }

    #[test]
    fn final_shard_is_truncated() {
        // 2500 numbers at shard size 1000: shards of 1000, 1000, 500.
        assert_eq!(shard_bounds(ShardIndex::new(0), 1000, 2500), (0, 1000));
        assert_eq!(shard_bounds(ShardIndex::new(1), 1000, 2500), (1000, 1000));
        assert_eq!(shard_bounds(ShardIndex::new(2), 1000, 2500), (2000, 500));
    }

    #[test]
    fn meta_covers_exactly_the_campaign_range() {
        let meta = ShardMeta::new(CampaignId::new(), 2500, 1000);
        assert_eq!(meta.shard_count, 3);
        assert_eq!(meta.total_available, 2500);
        assert!(meta.contains(TicketNumber::new(2499)));
        assert!(!meta.contains(TicketNumber::new(2500)));
    }
}
