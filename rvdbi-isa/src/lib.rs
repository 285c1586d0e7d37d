//! Decoder and encoder for the rv64gc instruction set.
//!
//! This crate is deliberately mechanical: it converts a 16- or 32-bit
//! instruction word into a structured [`Decoded`] record, and the inverse.
//! Everything interesting about guest-program behavior lives above this
//! crate, in `rvdbi-core`'s allocator.

mod decode;
pub mod encode;
mod fields;
mod format;
mod mnemonic;

pub use decode::{decode, DecodeError};
pub use encode::*;
pub use format::Format;
pub use mnemonic::Mnemonic;

/// A decoded instruction, compressed or not.
///
/// Compressed (`C*`) instructions are expanded into the same shape as their
/// 32-bit equivalents so the allocator can treat both uniformly; `len`
/// records whether the original encoding was 2 or 4 bytes, which is what
/// matters for PC arithmetic and cache sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    pub mnemonic: Mnemonic,
    pub format: Format,
    pub len: u8,
    pub rd: u8,
    pub rs1: u8,
    pub rs2: u8,
    pub rs3: u8,
    pub imm: i64,
    pub funct3: u8,
    pub funct7: u8,
    pub aq: bool,
    pub rl: bool,
    /// User-assignable group tag, defaulted from the mnemonic's natural
    /// group (e.g. "branch", "load", "alu") but re-assignable by callers
    /// that register per-group callbacks.
    pub group: u32,
}

impl Decoded {
    /// Whether this instruction ends a basic block by spec definition
    /// (control-flow transfer or syscall/breakpoint), independent of any
    /// instrumentation-forced segmentation.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self.mnemonic,
            Mnemonic::Beq
                | Mnemonic::Bne
                | Mnemonic::Blt
                | Mnemonic::Bge
                | Mnemonic::Bltu
                | Mnemonic::Bgeu
                | Mnemonic::Jal
                | Mnemonic::Jalr
                | Mnemonic::Ecall
                | Mnemonic::Ebreak
        )
    }

    pub fn is_branch(&self) -> bool {
        matches!(
            self.mnemonic,
            Mnemonic::Beq | Mnemonic::Bne | Mnemonic::Blt | Mnemonic::Bge | Mnemonic::Bltu | Mnemonic::Bgeu
        )
    }

    pub fn is_direct_jump(&self) -> bool {
        matches!(self.mnemonic, Mnemonic::Jal)
    }

    pub fn is_indirect_jump(&self) -> bool {
        matches!(self.mnemonic, Mnemonic::Jalr)
    }

    pub fn is_syscall(&self) -> bool {
        matches!(self.mnemonic, Mnemonic::Ecall)
    }

    pub fn is_auipc(&self) -> bool {
        matches!(self.mnemonic, Mnemonic::Auipc)
    }

    /// True for JAL/JALR, whose `rd` writeback must carry the guest return
    /// address rather than whatever a naive re-execution from the cache
    /// would compute.
    pub fn writes_link_register(&self) -> bool {
        matches!(self.mnemonic, Mnemonic::Jal | Mnemonic::Jalr) && self.rd != 0
    }
}

pub const XLEN: u32 = 64;

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_word(word: u32) -> Decoded {
        decode(&word.to_le_bytes()).expect("decode")
    }

    #[test]
    fn decodes_addi() {
        // addi a0, a1, -1  => opcode=0010011 funct3=000
        let word = encode_i_test(0b0010011, 10, 0b000, 11, -1);
        let d = decode_word(word);
        assert_eq!(d.mnemonic, Mnemonic::Addi);
        assert_eq!(d.rd, 10);
        assert_eq!(d.rs1, 11);
        assert_eq!(d.imm, -1);
        assert_eq!(d.len, 4);
    }

    #[test]
    fn decodes_jal_and_round_trips_offset() {
        let offset = -4096i32;
        let word = jal(1, offset);
        let d = decode_word(word);
        assert_eq!(d.mnemonic, Mnemonic::Jal);
        assert_eq!(d.rd, 1);
        assert_eq!(d.imm, offset as i64);
        assert!(d.is_direct_jump());
        assert!(d.writes_link_register());
    }

    #[test]
    fn decodes_ecall_as_terminator() {
        let d = decode_word(ecall());
        assert!(d.is_syscall());
        assert!(d.is_terminator());
    }

    #[test]
    fn compressed_c_j_expands_to_jal_with_len_2() {
        // c.j with a small forward offset: funct3=101 quadrant=01, imm bits encode +4? use 0
        // encode manually: choose offset 2 (smallest nonzero even offset representable)
        // bit layout per decode_compressed: imm bits packed from specific word bits.
        // Simplest: craft word for offset=0 is degenerate (infinite loop) but still decodable.
        let word: u16 = 0b101_00000000000_01; // funct3=101, quadrant=01, all imm bits 0
        let d = decode(&word.to_le_bytes()).expect("decode compressed");
        assert_eq!(d.mnemonic, Mnemonic::Jal);
        assert_eq!(d.len, 2);
        assert_eq!(d.imm, 0);
    }

    #[test]
    fn load_immediate_round_trips_via_simulation() {
        for value in [
            0u64,
            1,
            0xdead_beefu64,
            u64::MAX,
            0x8000_0000_0000_0000,
            0x1234_5678_9abc_def0,
            (-1i64) as u64,
        ] {
            let words = load_immediate_sequence(5, value);
            assert!(!words.is_empty());
            let simulated = simulate_li(&words);
            assert_eq!(simulated, value, "mismatch for {value:#x}");
        }
    }

    proptest::proptest! {
        /// spec §8 PC fidelity, narrowed to the primitive every AUIPC/JAL/JALR
        /// fixup in `rvdbi-core`'s allocator is built from: whatever 64-bit
        /// value `load_immediate_sequence` is asked to materialize, the
        /// `addi`/`slli` sequence it emits must reconstruct bit-for-bit.
        #[test]
        fn load_immediate_sequence_round_trips_for_any_value(value: u64) {
            let words = load_immediate_sequence(5, value);
            proptest::prop_assert!(!words.is_empty());
            proptest::prop_assert_eq!(simulate_li(&words), value);
        }
    }

    /// Minimal interpreter for the `addi`/`slli` sequences
    /// [`load_immediate_sequence`] produces, used only to check the helper's
    /// own correctness in tests.
    fn simulate_li(words: &[u32]) -> u64 {
        let mut reg: i64 = 0;
        for &w in words {
            let opcode = w & 0x7f;
            let funct3 = (w >> 12) & 0x7;
            let imm12 = ((w as i32) >> 20) as i64; // sign-extended I-type immediate
            assert_eq!(opcode, 0b0010011, "simulator only handles OP-IMM");
            match funct3 {
                0b000 => reg = reg.wrapping_add(imm12),
                0b001 => reg <<= imm12 & 0x3f,
                _ => panic!("unexpected funct3 in li sequence"),
            }
        }
        reg as u64
    }

    fn encode_i_test(opcode: u32, rd: u8, funct3: u8, rs1: u8, imm: i32) -> u32 {
        encode_i(opcode, rd, funct3, rs1, imm)
    }
}
