//! The exit-link table (spec §4.4): records where an unlinked exit
//! sequence lives in the cache so that, once its guest target is
//! eventually materialized, the dispatcher (or trace linker) can rewrite
//! that exit into a direct cache-to-cache branch instead of a full
//! context switch. Each pending site is linked at most once — draining
//! is monotonic, never re-visited once resolved.

use std::collections::{HashMap, HashSet};

use rvdbi_isa::encode::{fits_jal_range, jal, nop};

/// A single unresolved exit waiting on `target` to materialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingLink {
    /// Guest address this exit wants to reach.
    pub target: u64,
    /// Cache address the patched branch instruction itself lives at
    /// (needed to compute a PC-relative displacement at patch time).
    pub site_address: u64,
    /// Length, in words, of the sub-sequence being patched in place —
    /// bounds how many trailing `nop`s pad the patch out to its
    /// original size.
    pub len_words: usize,
}

/// Build the bytes that link `site_address` directly to `resolved_addr`:
/// a direct `jal` followed by enough `nop`s to fill out the original
/// sub-sequence length, so the patch never grows the block. Returns
/// `None` when the displacement doesn't fit a `JAL`'s range (spec §7
/// "Trace-link range overflow... fall back to context switch", i.e. just
/// leave the existing exit sequence in place).
pub fn build_link_patch(site_address: u64, len_words: usize, resolved_addr: u64) -> Option<Vec<u32>> {
    let displacement = resolved_addr as i64 - site_address as i64;
    if !fits_jal_range(displacement) {
        return None;
    }
    let mut words = Vec::with_capacity(len_words);
    words.push(jal(0, displacement as i32));
    for _ in 1..len_words {
        words.push(nop());
    }
    Some(words)
}

#[derive(Default)]
pub struct ExitLinkTable {
    /// Guest address -> cache address, for every block materialized so
    /// far in this cache epoch.
    materialized: HashMap<u64, u64>,
    /// Guest target address -> exit sites still waiting on it.
    pending: HashMap<u64, Vec<PendingLink>>,
    /// Site addresses already patched into a direct branch — backpatching
    /// is monotone, at most once per site (spec §4.4).
    linked: HashSet<u64>,
}

impl ExitLinkTable {
    pub fn new() -> Self {
        ExitLinkTable {
            materialized: HashMap::new(),
            pending: HashMap::new(),
            linked: HashSet::new(),
        }
    }

    pub fn is_linked(&self, site_address: u64) -> bool {
        self.linked.contains(&site_address)
    }

    pub fn mark_linked(&mut self, site_address: u64) {
        self.linked.insert(site_address);
    }

    /// Cache address a guest address is already materialized at, if any.
    pub fn resolved(&self, guest_address: u64) -> Option<u64> {
        self.materialized.get(&guest_address).copied()
    }

    /// Record that `target` now has translated code at `cache_address`,
    /// returning every exit site that was waiting on it so the caller
    /// can backpatch them. The target is removed from the pending set;
    /// later exits toward the same target consult `resolved` directly
    /// instead of re-entering the pending queue.
    pub fn materialize(&mut self, target: u64, cache_address: u64) -> Vec<PendingLink> {
        self.materialized.insert(target, cache_address);
        self.pending.remove(&target).unwrap_or_default()
    }

    /// Register a not-yet-resolvable exit as waiting on `target`.
    pub fn record_pending(&mut self, link: PendingLink) {
        self.pending.entry(link.target).or_default().push(link);
    }

    pub fn pending_count(&self, target: u64) -> usize {
        self.pending.get(&target).map_or(0, Vec::len)
    }

    /// Forget every recorded link, in lockstep with a code-cache flush.
    pub fn clear(&mut self) {
        self.materialized.clear();
        self.pending.clear();
        self.linked.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn materialize_before_any_pending_link_leaves_nothing_to_drain() {
        let mut elt = ExitLinkTable::new();
        let drained = elt.materialize(0x400, 0x1000);
        assert!(drained.is_empty());
        assert_eq!(elt.resolved(0x400), Some(0x1000));
    }

    #[test]
    fn pending_link_is_drained_exactly_once_on_materialization() {
        let mut elt = ExitLinkTable::new();
        let link = PendingLink {
            target: 0x400,
            site_address: 0x2000,
            len_words: 4,
        };
        elt.record_pending(link);
        assert_eq!(elt.pending_count(0x400), 1);

        let drained = elt.materialize(0x400, 0x1000);
        assert_eq!(drained, vec![link]);
        assert_eq!(elt.pending_count(0x400), 0);

        // a second materialization call (should not happen in practice,
        // but must not resurrect the already-drained site)
        let drained_again = elt.materialize(0x400, 0x1000);
        assert!(drained_again.is_empty());
    }

    #[test]
    fn clear_forgets_both_maps() {
        let mut elt = ExitLinkTable::new();
        elt.materialize(0x400, 0x1000);
        elt.record_pending(PendingLink {
            target: 0x800,
            site_address: 0,
            len_words: 1,
        });
        elt.mark_linked(0x2000);
        elt.clear();
        assert_eq!(elt.resolved(0x400), None);
        assert_eq!(elt.pending_count(0x800), 0);
        assert!(!elt.is_linked(0x2000));
    }

    #[test]
    fn build_link_patch_fills_remaining_words_with_nops() {
        let patch = build_link_patch(0x1000, 3, 0x1100).unwrap();
        assert_eq!(patch.len(), 3);
        assert_eq!(patch[1], rvdbi_isa::encode::nop());
        assert_eq!(patch[2], rvdbi_isa::encode::nop());
    }

    #[test]
    fn build_link_patch_refuses_an_out_of_range_displacement() {
        assert!(build_link_patch(0, 1, 0x10_0000_0000).is_none());
    }
}
