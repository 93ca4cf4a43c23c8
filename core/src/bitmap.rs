//! Two-bit packed state bitmap for one shard of a campaign's numbers.
//!
//! Each ticket number takes two bits (`Available = 00`, `Reserved = 01`,
//! `Sold = 10`), four numbers per byte. A single-bit bitmap cannot hold
//! three states, so the encoding is fixed at two bits; `0b11` is invalid
//! and only ever observed when rehydrating corrupted storage.
//!
//! The shard caches one counter per state and adjusts it inside
//! [`BitmapShard::try_set_state`], the sole mutation primitive. The
//! counters therefore never drift from the packed bits: `available +
//! reserved + sold == len` is an invariant checked by property tests.

use crate::error::ShardError;
use crate::shard::ShardIndex;
use crate::types::{StateCounts, TicketNumber, TicketState};

/// Bit-packing layout helpers, shared with durable adapters that perform
/// the CAS server-side (byte index, shift and mask arithmetic must match
/// this module exactly).
pub mod encoding {
    /// Numbers stored per byte (two bits each)
    pub const STATES_PER_BYTE: u32 = 4;

    /// Bytes needed to store `len` numbers
    #[must_use]
    pub const fn packed_len(len: u32) -> usize {
        len.div_ceil(STATES_PER_BYTE) as usize
    }

    /// Byte holding the state of the shard-relative `offset`
    #[must_use]
    pub const fn byte_index(offset: u32) -> usize {
        (offset / STATES_PER_BYTE) as usize
    }

    /// Left shift of the two state bits within their byte
    #[must_use]
    pub const fn shift(offset: u32) -> u32 {
        (offset % STATES_PER_BYTE) * 2
    }

    /// Byte mask selecting the two state bits for `offset`
    #[must_use]
    pub const fn mask(offset: u32) -> u8 {
        0b11 << shift(offset)
    }
}

/// Fixed-size bit-array segment covering a contiguous range of one
/// campaign's ticket numbers.
///
/// Covers numbers `start..start + len`. All state mutation goes through
/// [`try_set_state`](Self::try_set_state), whose compare-and-swap
/// semantics are what higher layers compose into race-free reservations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitmapShard {
    index: ShardIndex,
    start: u32,
    len: u32,
    states: Vec<u8>,
    available: u32,
    reserved: u32,
    sold: u32,
}

impl BitmapShard {
    /// Creates a shard with every number `Available`.
    #[must_use]
    pub fn new_available(index: ShardIndex, start: u32, len: u32) -> Self {
        Self {
            index,
            start,
            len,
            states: vec![0u8; encoding::packed_len(len)],
            available: len,
            reserved: 0,
            sold: 0,
        }
    }

    /// Rehydrates a shard from persisted parts.
    ///
    /// # Errors
    ///
    /// Returns `ShardError::CorruptState` (via a length/count check) when
    /// the packed payload does not match `len` or the counters do not sum
    /// to `len`.
    pub fn from_parts(
        index: ShardIndex,
        start: u32,
        len: u32,
        states: Vec<u8>,
        counts: StateCounts,
    ) -> Result<Self, ShardError> {
        let first = TicketNumber::new(start);
        if states.len() != encoding::packed_len(len) {
            return Err(ShardError::CorruptState {
                number: first,
                bits: 0b11,
            });
        }
        if counts.total() != u64::from(len) {
            return Err(ShardError::CorruptState {
                number: first,
                bits: 0b11,
            });
        }
        #[allow(clippy::cast_possible_truncation)] // counts sum to len: u32
        Ok(Self {
            index,
            start,
            len,
            states,
            available: counts.available as u32,
            reserved: counts.reserved as u32,
            sold: counts.sold as u32,
        })
    }

    /// Shard ordinal within its campaign
    #[must_use]
    pub const fn index(&self) -> ShardIndex {
        self.index
    }

    /// First number covered
    #[must_use]
    pub const fn start(&self) -> u32 {
        self.start
    }

    /// Last number covered
    #[must_use]
    pub const fn end(&self) -> u32 {
        self.start + self.len - 1
    }

    /// Count of numbers covered
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.len
    }

    /// Whether the shard covers zero numbers
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether `number` falls inside this shard's range
    #[must_use]
    pub const fn contains(&self, number: TicketNumber) -> bool {
        number.value() >= self.start && number.value() < self.start + self.len
    }

    /// Packed state bytes, for persistence
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.states
    }

    /// Cached count of `Available` numbers, O(1)
    #[must_use]
    pub const fn count_available(&self) -> u32 {
        self.available
    }

    /// Cached count of `Reserved` numbers, O(1)
    #[must_use]
    pub const fn count_reserved(&self) -> u32 {
        self.reserved
    }

    /// Cached count of `Sold` numbers, O(1)
    #[must_use]
    pub const fn count_sold(&self) -> u32 {
        self.sold
    }

    /// All three cached counters
    #[must_use]
    pub const fn counts(&self) -> StateCounts {
        StateCounts {
            available: self.available as u64,
            reserved: self.reserved as u64,
            sold: self.sold as u64,
        }
    }

    /// Current state of `number`, O(1).
    ///
    /// # Errors
    ///
    /// - `ShardError::OutOfRange` if `number` is outside `[start, end]`
    /// - `ShardError::CorruptState` if the stored bits decode to `0b11`
    pub fn get(&self, number: TicketNumber) -> Result<TicketState, ShardError> {
        let offset = self.offset_of(number)?;
        self.state_at(offset).ok_or(ShardError::CorruptState {
            number,
            bits: self.raw_bits(offset),
        })
    }

    /// Atomically transition `number` from `from` to `to`.
    ///
    /// Compare-and-swap semantics: returns `Ok(false)` without mutating
    /// anything if the current state is not `from`. On success the bit
    /// pair and the two affected counters change together.
    ///
    /// # Errors
    ///
    /// - `ShardError::OutOfRange` if `number` is outside `[start, end]`
    /// - `ShardError::CorruptState` if the stored bits decode to `0b11`
    pub fn try_set_state(
        &mut self,
        number: TicketNumber,
        from: TicketState,
        to: TicketState,
    ) -> Result<bool, ShardError> {
        let offset = self.offset_of(number)?;
        let Some(current) = self.state_at(offset) else {
            return Err(ShardError::CorruptState {
                number,
                bits: self.raw_bits(offset),
            });
        };
        if current != from {
            return Ok(false);
        }

        let byte = encoding::byte_index(offset);
        self.states[byte] =
            (self.states[byte] & !encoding::mask(offset)) | (to.bits() << encoding::shift(offset));
        *self.counter_mut(from) -= 1;
        *self.counter_mut(to) += 1;
        Ok(true)
    }

    /// Available numbers in ascending order, capped at `limit`.
    ///
    /// Recomputed from current state on every call; a shard mutation
    /// invalidates any previously returned list.
    #[must_use]
    pub fn scan_available(&self, limit: usize) -> Vec<TicketNumber> {
        if self.available == 0 || limit == 0 {
            return Vec::new();
        }
        let mut found = Vec::with_capacity(limit.min(self.available as usize));
        for offset in 0..self.len {
            if self.raw_bits(offset) == TicketState::Available.bits() {
                found.push(TicketNumber::new(self.start + offset));
                if found.len() == limit {
                    break;
                }
            }
        }
        found
    }

    /// First available number at or after the shard-relative `offset`,
    /// wrapping around the end of the shard.
    ///
    /// Random selection picks a uniform `offset` and takes the next
    /// available bit from there, so hot campaigns do not pile onto the
    /// lowest numbers.
    #[must_use]
    pub fn next_available_on_or_after(&self, offset: u32) -> Option<TicketNumber> {
        if self.available == 0 || self.len == 0 {
            return None;
        }
        let origin = offset % self.len;
        for step in 0..self.len {
            let probe = (origin + step) % self.len;
            if self.raw_bits(probe) == TicketState::Available.bits() {
                return Some(TicketNumber::new(self.start + probe));
            }
        }
        None
    }

    fn offset_of(&self, number: TicketNumber) -> Result<u32, ShardError> {
        if self.contains(number) {
            Ok(number.value() - self.start)
        } else {
            Err(ShardError::OutOfRange {
                number,
                start: self.start,
                end: self.end(),
            })
        }
    }

    fn raw_bits(&self, offset: u32) -> u8 {
        (self.states[encoding::byte_index(offset)] & encoding::mask(offset))
            >> encoding::shift(offset)
    }

    fn state_at(&self, offset: u32) -> Option<TicketState> {
        TicketState::from_bits(self.raw_bits(offset))
    }

    const fn counter_mut(&mut self, state: TicketState) -> &mut u32 {
        match state {
            TicketState::Available => &mut self.available,
            TicketState::Reserved => &mut self.reserved,
            TicketState::Sold => &mut self.sold,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn shard(len: u32) -> BitmapShard {
        BitmapShard::new_available(ShardIndex::new(0), 0, len)
    }

    /// Recount states from the packed bits, bypassing the cached counters.
    fn recount(shard: &BitmapShard) -> StateCounts {
        let mut counts = StateCounts::default();
        for offset in 0..shard.len() {
            match shard.get(TicketNumber::new(shard.start() + offset)).unwrap() {
                TicketState::Available => counts.available += 1,
                TicketState::Reserved => counts.reserved += 1,
                TicketState::Sold => counts.sold += 1,
            }
        }
        counts
    }

    #[test]
    fn new_shard_is_all_available() {
        let shard = shard(10);
        assert_eq!(shard.count_available(), 10);
        assert_eq!(shard.scan_available(100).len(), 10);
        for n in 0..10 {
            assert_eq!(shard.get(TicketNumber::new(n)).unwrap(), TicketState::Available);
        }
    }

    #[test]
    fn cas_succeeds_once_per_state() {
        let mut shard = shard(8);
        let n = TicketNumber::new(3);

        assert!(shard
            .try_set_state(n, TicketState::Available, TicketState::Reserved)
            .unwrap());
        // Second attempt loses: the number is no longer available.
        assert!(!shard
            .try_set_state(n, TicketState::Available, TicketState::Reserved)
            .unwrap());
        assert_eq!(shard.get(n).unwrap(), TicketState::Reserved);
        assert_eq!(shard.count_available(), 7);
        assert_eq!(shard.count_reserved(), 1);
    }

    #[test]
    fn failed_cas_mutates_nothing() {
        let mut shard = shard(4);
        let n = TicketNumber::new(2);
        let before = shard.clone();

        assert!(!shard
            .try_set_state(n, TicketState::Reserved, TicketState::Sold)
            .unwrap());
        assert_eq!(shard, before);
    }

    #[test]
    fn out_of_range_number_is_rejected() {
        let mut shard = BitmapShard::new_available(ShardIndex::new(2), 200, 100);
        let low = TicketNumber::new(199);
        let high = TicketNumber::new(300);

        assert!(matches!(shard.get(low), Err(ShardError::OutOfRange { .. })));
        assert!(matches!(
            shard.try_set_state(high, TicketState::Available, TicketState::Reserved),
            Err(ShardError::OutOfRange { .. })
        ));
        assert_eq!(shard.get(TicketNumber::new(200)).unwrap(), TicketState::Available);
        assert_eq!(shard.get(TicketNumber::new(299)).unwrap(), TicketState::Available);
    }

    #[test]
    fn wrapping_scan_finds_the_only_available_number() {
        let mut shard = shard(10);
        for n in 0..10 {
            if n != 2 {
                shard
                    .try_set_state(TicketNumber::new(n), TicketState::Available, TicketState::Reserved)
                    .unwrap();
            }
        }

        // From every starting offset the scan must land on number 2.
        for offset in 0..10 {
            assert_eq!(
                shard.next_available_on_or_after(offset),
                Some(TicketNumber::new(2))
            );
        }
    }

    #[test]
    fn wrapping_scan_returns_none_when_exhausted() {
        let mut shard = shard(3);
        for n in 0..3 {
            shard
                .try_set_state(TicketNumber::new(n), TicketState::Available, TicketState::Reserved)
                .unwrap();
        }
        assert_eq!(shard.next_available_on_or_after(1), None);
    }

    #[test]
    fn scan_available_respects_limit_and_order() {
        let mut shard = shard(16);
        shard
            .try_set_state(TicketNumber::new(0), TicketState::Available, TicketState::Reserved)
            .unwrap();

        let found = shard.scan_available(3);
        assert_eq!(
            found,
            vec![TicketNumber::new(1), TicketNumber::new(2), TicketNumber::new(3)]
        );
    }

    #[test]
    fn from_parts_round_trips() {
        let mut original = shard(9);
        original
            .try_set_state(TicketNumber::new(4), TicketState::Available, TicketState::Reserved)
            .unwrap();
        original
            .try_set_state(TicketNumber::new(4), TicketState::Reserved, TicketState::Sold)
            .unwrap();

        let rebuilt = BitmapShard::from_parts(
            original.index(),
            original.start(),
            original.len(),
            original.as_bytes().to_vec(),
            original.counts(),
        )
        .unwrap();
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn from_parts_rejects_mismatched_payload() {
        let result = BitmapShard::from_parts(
            ShardIndex::new(0),
            0,
            8,
            vec![0u8; 1], // 8 numbers need 2 bytes
            StateCounts { available: 8, reserved: 0, sold: 0 },
        );
        assert!(result.is_err());

        let result = BitmapShard::from_parts(
            ShardIndex::new(0),
            0,
            8,
            vec![0u8; 2],
            StateCounts { available: 5, reserved: 0, sold: 0 },
        );
        assert!(result.is_err());
    }

    proptest! {
        /// Counters never drift from the packed bits, whatever transition
        /// sequence is applied, and the three states always partition the
        /// shard.
        #[test]
        fn counters_match_bits_after_any_transition_sequence(
            transitions in prop::collection::vec(
                (0u32..64, 0u8..3, 0u8..3),
                0..200,
            )
        ) {
            let mut shard = shard(64);
            for (offset, from, to) in transitions {
                let from = TicketState::from_bits(from).unwrap();
                let to = TicketState::from_bits(to).unwrap();
                let _ = shard.try_set_state(TicketNumber::new(offset), from, to);

                let counts = recount(&shard);
                prop_assert_eq!(counts, shard.counts());
                prop_assert_eq!(counts.total(), 64);
            }
        }

        /// A wrapping scan from any offset finds an available number
        /// exactly when one exists.
        #[test]
        fn wrapping_scan_agrees_with_counter(
            reserved in prop::collection::btree_set(0u32..32, 0..32),
            offset in 0u32..32,
        ) {
            let mut shard = shard(32);
            for &n in &reserved {
                shard.try_set_state(
                    TicketNumber::new(n),
                    TicketState::Available,
                    TicketState::Reserved,
                ).unwrap();
            }

            let hit = shard.next_available_on_or_after(offset);
            prop_assert_eq!(hit.is_some(), shard.count_available() > 0);
            if let Some(number) = hit {
                prop_assert_eq!(shard.get(number).unwrap(), TicketState::Available);
            }
        }
    }
}
