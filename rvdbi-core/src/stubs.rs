//! Stub regions (spec §4.5, behind the `stub-regions` Cargo feature):
//! shared trampoline blocks planted inside the code cache at a roughly
//! fixed instruction-count interval, so that a short direct `JAL` from
//! anywhere in the cache can always reach one instead of needing the
//! full load-immediate-plus-`jalr` sequence this engine's exit sequences
//! use by default (`allocator::Allocator::jump_to_trampoline`).
//!
//! `EngineConfig::stub_regions` (a plain runtime bool, not only the
//! Cargo feature) is what the planner actually branches on, so its
//! placement logic is unit-testable regardless of which feature set the
//! crate was built with.

use rvdbi_isa::encode::fits_jal_range;

/// Tracks how many guest instructions have been translated since the
/// last stub was planted, and decides when the next one is due.
pub struct StubPlanner {
    interval: usize,
    since_last_stub: usize,
    planted: Vec<u64>,
}

impl StubPlanner {
    pub fn new(interval: usize) -> Self {
        StubPlanner {
            interval,
            since_last_stub: 0,
            planted: Vec::new(),
        }
    }

    /// Record that `count` more guest instructions were translated.
    pub fn record_instructions(&mut self, count: usize) {
        self.since_last_stub += count;
    }

    /// Whether the planner wants a new stub planted before translation
    /// continues (spec: "~1024 instructions with tolerance" — tolerance
    /// here simply means the check happens at block boundaries, so the
    /// actual spacing is interval..interval+max_block_len).
    pub fn due(&self) -> bool {
        self.since_last_stub >= self.interval
    }

    /// Record that a stub was planted at `cache_address`, resetting the
    /// instruction counter.
    pub fn record_planted(&mut self, cache_address: u64) {
        self.planted.push(cache_address);
        self.since_last_stub = 0;
    }

    /// The nearest already-planted stub reachable from `from_address` by
    /// a direct `JAL`, if any.
    pub fn nearest_reachable(&self, from_address: u64) -> Option<u64> {
        self.planted
            .iter()
            .copied()
            .filter(|&addr| fits_jal_range(addr as i64 - from_address as i64))
            .min_by_key(|&addr| (addr as i64 - from_address as i64).unsigned_abs())
    }

    pub fn planted_count(&self) -> usize {
        self.planted.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_due_until_interval_reached() {
        let mut planner = StubPlanner::new(1024);
        planner.record_instructions(1000);
        assert!(!planner.due());
        planner.record_instructions(24);
        assert!(planner.due());
    }

    #[test]
    fn planting_resets_the_counter() {
        let mut planner = StubPlanner::new(10);
        planner.record_instructions(10);
        assert!(planner.due());
        planner.record_planted(0x1000);
        assert!(!planner.due());
        assert_eq!(planner.planted_count(), 1);
    }

    #[test]
    fn nearest_reachable_excludes_out_of_range_stubs() {
        let mut planner = StubPlanner::new(10);
        planner.record_planted(0x1000);
        planner.record_planted(0x10_0000_0000);
        let nearest = planner.nearest_reachable(0x1010);
        assert_eq!(nearest, Some(0x1000));
    }

    #[test]
    fn nearest_reachable_is_none_when_every_stub_is_out_of_range() {
        let mut planner = StubPlanner::new(10);
        planner.record_planted(0x10_0000_0000);
        assert_eq!(planner.nearest_reachable(0x1000), None);
    }
}
