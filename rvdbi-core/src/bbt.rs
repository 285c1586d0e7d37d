//! The basic-block table (spec §3): maps a guest leader address to the
//! descriptor of the translated block materialized for it. Backed by a
//! pooled slab arena so block ids stay stable and cheap to hand out
//! across a run, mirroring the arena-allocation style the teacher uses
//! for its compiled-module metadata.

use std::collections::HashMap;

use rvdbi_isa::Mnemonic;
use slab::Slab;

/// How a translated block ends, and what guest address(es) control may
/// transfer to next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    /// A conditional branch: two statically known successors. Carries
    /// the original branch condition and operand registers so the exit
    /// sequence can re-test it rather than re-deriving the outcome.
    CondBranch {
        taken: u64,
        not_taken: u64,
        mnemonic: Mnemonic,
        rs1: u8,
        rs2: u8,
    },
    /// An unconditional direct jump (JAL, or a compressed equivalent) to
    /// a statically known guest address. `rd`/`link` carry the
    /// transparency fixup for JAL's own link-register writeback (spec
    /// §4.2): when `rd != 0`, the exit sequence must write the guest's
    /// original return address into `rd` before transferring control,
    /// since the instruction itself never survives translation.
    DirectJump { target: u64, rd: u8, link: u64 },
    /// An indirect jump (JALR) whose target is only known at run time.
    /// `rs1`/`imm` are the source register and immediate the exit
    /// sequence re-evaluates to compute `(rs1+imm)&~1`, since JALR itself
    /// never survives translation as a real instruction. `rd`/`link` are
    /// the same link-register fixup as `DirectJump`.
    IndirectJump { rs1: u8, imm: i64, rd: u8, link: u64 },
    /// An ECALL boundary; control always returns via the syscall shim to
    /// the instruction following the ECALL.
    Syscall { resume: u64 },
    /// The block was cut short by a callback-bearing instruction rather
    /// than a genuine control-flow terminator (spec §4.3 segmentation).
    /// `next` is the guest address execution falls through to. `cause`
    /// identifies the instrumented instruction when this very block's
    /// own last instruction is what forced the cut (as opposed to the
    /// *following* block being cut short in anticipation of one) — the
    /// dispatcher uses it to fire the matching RUNTIME instruction-level
    /// callback exactly once per dynamic execution of that instruction.
    Segmented {
        next: u64,
        cause: Option<(Mnemonic, u32)>,
    },
}

impl Terminator {
    /// Whether trace linking can ever apply to an exit through this
    /// terminator (spec §4.4: indirect jumps and syscalls always fall
    /// back to a full context switch).
    pub fn is_linkable(&self) -> bool {
        matches!(
            self,
            Terminator::CondBranch { .. } | Terminator::DirectJump { .. } | Terminator::Segmented { .. }
        )
    }

    pub fn static_targets(&self) -> Vec<u64> {
        match *self {
            Terminator::CondBranch { taken, not_taken, .. } => vec![taken, not_taken],
            Terminator::DirectJump { target, .. } => vec![target],
            Terminator::IndirectJump { .. } => vec![],
            Terminator::Syscall { resume } => vec![resume],
            Terminator::Segmented { next, .. } => vec![next],
        }
    }
}

/// Where, within a materialized block's cache bytes, a linkable exit's
/// `store_pc_and_jump` sub-sequence lives (spec §4.4). Populated by the
/// allocator at translation time; consulted by the trace linker to
/// patch a direct branch in once `target` is itself materialized.
#[derive(Debug, Clone, Copy)]
pub struct LinkSite {
    /// Guest address this exit sub-sequence currently routes to the
    /// dispatcher for.
    pub target: u64,
    /// Cache address of the sub-sequence's first instruction.
    pub site_address: u64,
    /// Length, in 32-bit words, of the sub-sequence — the patch must
    /// not exceed this or it would clobber whatever follows.
    pub len_words: usize,
}

/// A materialized block's descriptor.
#[derive(Debug, Clone)]
pub struct CachedBlock {
    pub id: usize,
    /// Guest address of the block's first instruction (the leader).
    pub guest_start: u64,
    /// Guest address one past the block's last translated instruction.
    pub guest_end: u64,
    /// Entry point of the translated code inside the code cache.
    pub cache_address: u64,
    /// Length in bytes of the translated code for this block.
    pub cache_length: usize,
    /// Number of guest instructions translated into this block.
    pub instruction_count: usize,
    pub terminator: Terminator,
    /// For a segmented block, the guest address of the logical block
    /// this segment was cut from (itself, for a non-segmented block) —
    /// preserves attribution for per-block callbacks (spec §4.3).
    pub basic_block_address: u64,
    /// Linkable exit sub-sequences this block's tail contains, for the
    /// trace linker to patch once their targets materialize (spec §4.4).
    pub link_sites: Vec<LinkSite>,
}

impl CachedBlock {
    pub fn is_segmented(&self) -> bool {
        matches!(self.terminator, Terminator::Segmented { .. })
    }
}

#[derive(Default)]
pub struct BasicBlockTable {
    slab: Slab<CachedBlock>,
    by_guest_start: HashMap<u64, usize>,
    /// Segment continuation -> logical block origin (spec §4.2
    /// segmentation: "basic_block_address records the enclosing logical
    /// block's start so per-BB callbacks can still attribute
    /// correctly"). Populated whenever a block's own terminator is
    /// `Segmented`; consulted when materializing the continuation so it
    /// inherits the same attribution rather than starting a fresh one.
    segment_origin: HashMap<u64, u64>,
}

impl BasicBlockTable {
    pub fn new() -> Self {
        BasicBlockTable {
            slab: Slab::new(),
            by_guest_start: HashMap::new(),
            segment_origin: HashMap::new(),
        }
    }

    /// Record that materializing `next` should attribute to `origin`
    /// rather than to `next` itself.
    pub fn record_continuation(&mut self, next: u64, origin: u64) {
        self.segment_origin.insert(next, origin);
    }

    /// The logical block address a given leader should attribute to:
    /// the recorded origin of a segment continuation, or the leader
    /// itself if it was never chained from one.
    pub fn origin_for(&self, guest_address: u64) -> u64 {
        self.segment_origin.get(&guest_address).copied().unwrap_or(guest_address)
    }

    pub fn insert(&mut self, mut block: CachedBlock) -> usize {
        let guest_start = block.guest_start;
        let entry = self.slab.vacant_entry();
        let id = entry.key();
        block.id = id;
        entry.insert(block);
        self.by_guest_start.insert(guest_start, id);
        id
    }

    pub fn get(&self, id: usize) -> Option<&CachedBlock> {
        self.slab.get(id)
    }

    pub fn lookup(&self, guest_address: u64) -> Option<&CachedBlock> {
        self.by_guest_start
            .get(&guest_address)
            .and_then(|id| self.slab.get(*id))
    }

    pub fn contains(&self, guest_address: u64) -> bool {
        self.by_guest_start.contains_key(&guest_address)
    }

    pub fn len(&self) -> usize {
        self.slab.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slab.is_empty()
    }

    /// Drop every materialized block's metadata, in lockstep with a
    /// code-cache flush (spec §4.1).
    pub fn clear(&mut self) {
        self.slab.clear();
        self.by_guest_start.clear();
        self.segment_origin.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(guest_start: u64) -> CachedBlock {
        CachedBlock {
            id: 0,
            guest_start,
            guest_end: guest_start + 4,
            cache_address: 0x1000,
            cache_length: 4,
            instruction_count: 1,
            terminator: Terminator::DirectJump { target: 0x2000, rd: 0, link: 0 },
            basic_block_address: guest_start,
            link_sites: Vec::new(),
        }
    }

    #[test]
    fn insert_then_lookup_round_trips() {
        let mut table = BasicBlockTable::new();
        let id = table.insert(sample(0x400));
        let found = table.lookup(0x400).unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.cache_address, 0x1000);
    }

    #[test]
    fn clear_drops_everything() {
        let mut table = BasicBlockTable::new();
        table.insert(sample(0x400));
        table.insert(sample(0x404));
        assert_eq!(table.len(), 2);
        table.clear();
        assert!(table.is_empty());
        assert!(table.lookup(0x400).is_none());
    }

    #[test]
    fn indirect_and_syscall_terminators_are_not_linkable() {
        assert!(!Terminator::IndirectJump { rs1: 5, imm: 0, rd: 0, link: 0 }.is_linkable());
        assert!(!Terminator::Syscall { resume: 8 }.is_linkable());
        assert!(Terminator::DirectJump { target: 4, rd: 0, link: 0 }.is_linkable());
    }

    #[test]
    fn segment_continuation_chains_back_to_the_logical_origin() {
        let mut table = BasicBlockTable::new();
        table.record_continuation(0x410, 0x400);
        assert_eq!(table.origin_for(0x410), 0x400);
        assert_eq!(table.origin_for(0x999), 0x999);
    }

    #[test]
    fn clear_forgets_segment_continuations_too() {
        let mut table = BasicBlockTable::new();
        table.record_continuation(0x410, 0x400);
        table.clear();
        assert_eq!(table.origin_for(0x410), 0x410);
    }
}
