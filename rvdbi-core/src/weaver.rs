//! The inline weaver (spec §4.6): accumulates raw instruction words
//! contributed by ALLOCATOR-mode callbacks and splices them into a
//! block's translation at the right point. There are exactly four
//! ordered buffers — block-scope and instruction-scope, each split into
//! a pre- and post-phase — and weaving is purely "emit buffer contents
//! verbatim before/after the corresponding translated code".

use rvdbi_isa::encode::load_immediate_sequence;

/// Where, relative to the code a callback is attached to, injected
/// instructions run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Pre,
    Post,
}

#[derive(Default)]
pub struct InlineWeaver {
    bb_pre: Vec<u32>,
    bb_post: Vec<u32>,
    insn_pre: Vec<u32>,
    insn_post: Vec<u32>,
}

impl InlineWeaver {
    pub fn new() -> Self {
        InlineWeaver::default()
    }

    fn buffer_mut(&mut self, is_block_scope: bool, phase: Phase) -> &mut Vec<u32> {
        match (is_block_scope, phase) {
            (true, Phase::Pre) => &mut self.bb_pre,
            (true, Phase::Post) => &mut self.bb_post,
            (false, Phase::Pre) => &mut self.insn_pre,
            (false, Phase::Post) => &mut self.insn_post,
        }
    }

    pub fn buffer(&self, is_block_scope: bool, phase: Phase) -> &[u32] {
        match (is_block_scope, phase) {
            (true, Phase::Pre) => &self.bb_pre,
            (true, Phase::Post) => &self.bb_post,
            (false, Phase::Pre) => &self.insn_pre,
            (false, Phase::Post) => &self.insn_post,
        }
    }

    /// Append raw instruction words to the given buffer.
    pub fn append(&mut self, is_block_scope: bool, phase: Phase, words: &[u32]) {
        self.buffer_mut(is_block_scope, phase).extend_from_slice(words);
    }

    /// Append the canonical multi-instruction load-immediate sequence
    /// that materializes `value` into `reg` (spec §4.6's "canonical
    /// load-immediate helper"), for callbacks that need to pass a
    /// constant argument into injected code.
    pub fn append_load_immediate(&mut self, is_block_scope: bool, phase: Phase, reg: u8, value: u64) {
        let words = load_immediate_sequence(reg, value);
        self.append(is_block_scope, phase, &words);
    }

    pub fn clear(&mut self) {
        self.bb_pre.clear();
        self.bb_post.clear();
        self.insn_pre.clear();
        self.insn_post.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.bb_pre.is_empty()
            && self.bb_post.is_empty()
            && self.insn_pre.is_empty()
            && self.insn_post.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_stay_independent() {
        let mut weaver = InlineWeaver::new();
        weaver.append(true, Phase::Pre, &[1, 2]);
        weaver.append(true, Phase::Post, &[3]);
        weaver.append(false, Phase::Pre, &[4]);
        weaver.append(false, Phase::Post, &[5, 6]);

        assert_eq!(weaver.buffer(true, Phase::Pre), &[1, 2]);
        assert_eq!(weaver.buffer(true, Phase::Post), &[3]);
        assert_eq!(weaver.buffer(false, Phase::Pre), &[4]);
        assert_eq!(weaver.buffer(false, Phase::Post), &[5, 6]);
    }

    #[test]
    fn load_immediate_helper_appends_a_nonempty_sequence() {
        let mut weaver = InlineWeaver::new();
        weaver.append_load_immediate(false, Phase::Pre, 5, 0xdeadbeef);
        assert!(!weaver.buffer(false, Phase::Pre).is_empty());
    }

    #[test]
    fn clear_empties_every_buffer() {
        let mut weaver = InlineWeaver::new();
        weaver.append(true, Phase::Pre, &[1]);
        weaver.clear();
        assert!(weaver.is_empty());
    }
}
