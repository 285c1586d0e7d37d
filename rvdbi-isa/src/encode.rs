//! Format-assembly functions and per-mnemonic helpers that produce
//! instruction words. Used by the allocator for transparency fixups, by
//! the dispatcher/trace-linker for exit sequences and linked branches, and
//! by the inline weaver for load-immediate expansions.

const OP_LUI: u32 = 0b0110111;
const OP_AUIPC: u32 = 0b0010111;
const OP_JAL: u32 = 0b1101111;
const OP_JALR: u32 = 0b1100111;
const OP_BRANCH: u32 = 0b1100011;
const OP_LOAD: u32 = 0b0000011;
const OP_STORE: u32 = 0b0100011;
const OP_IMM: u32 = 0b0010011;
const OP_REG: u32 = 0b0110011;
const OP_SYSTEM: u32 = 0b1110011;

pub fn encode_r(opcode: u32, rd: u8, funct3: u8, rs1: u8, rs2: u8, funct7: u8) -> u32 {
    opcode & 0x7f
        | (rd as u32 & 0x1f) << 7
        | (funct3 as u32 & 0x7) << 12
        | (rs1 as u32 & 0x1f) << 15
        | (rs2 as u32 & 0x1f) << 20
        | (funct7 as u32 & 0x7f) << 25
}

pub fn encode_i(opcode: u32, rd: u8, funct3: u8, rs1: u8, imm12: i32) -> u32 {
    opcode & 0x7f
        | (rd as u32 & 0x1f) << 7
        | (funct3 as u32 & 0x7) << 12
        | (rs1 as u32 & 0x1f) << 15
        | ((imm12 as u32) & 0xfff) << 20
}

pub fn encode_s(opcode: u32, funct3: u8, rs1: u8, rs2: u8, imm12: i32) -> u32 {
    let imm = imm12 as u32;
    opcode & 0x7f
        | (imm & 0x1f) << 7
        | (funct3 as u32 & 0x7) << 12
        | (rs1 as u32 & 0x1f) << 15
        | (rs2 as u32 & 0x1f) << 20
        | ((imm >> 5) & 0x7f) << 25
}

pub fn encode_b(opcode: u32, funct3: u8, rs1: u8, rs2: u8, imm13: i32) -> u32 {
    let imm = imm13 as u32;
    opcode & 0x7f
        | ((imm >> 11) & 0x1) << 7
        | ((imm >> 1) & 0xf) << 8
        | (funct3 as u32 & 0x7) << 12
        | (rs1 as u32 & 0x1f) << 15
        | (rs2 as u32 & 0x1f) << 20
        | ((imm >> 5) & 0x3f) << 25
        | ((imm >> 12) & 0x1) << 31
}

pub fn encode_u(opcode: u32, rd: u8, imm20: i32) -> u32 {
    opcode & 0x7f | (rd as u32 & 0x1f) << 7 | (imm20 as u32 & 0xfffff) << 12
}

pub fn encode_j(opcode: u32, rd: u8, imm21: i32) -> u32 {
    let imm = imm21 as u32;
    opcode & 0x7f
        | (rd as u32 & 0x1f) << 7
        | ((imm >> 12) & 0xff) << 12
        | ((imm >> 11) & 0x1) << 20
        | ((imm >> 1) & 0x3ff) << 21
        | ((imm >> 20) & 0x1) << 31
}

pub fn nop() -> u32 {
    addi(0, 0, 0)
}

pub fn addi(rd: u8, rs1: u8, imm: i32) -> u32 {
    encode_i(OP_IMM, rd, 0b000, rs1, imm)
}

pub fn ori(rd: u8, rs1: u8, imm: i32) -> u32 {
    encode_i(OP_IMM, rd, 0b110, rs1, imm)
}

pub fn slli(rd: u8, rs1: u8, shamt: u32) -> u32 {
    encode_i(OP_IMM, rd, 0b001, rs1, (shamt & 0x3f) as i32)
}

pub fn lui(rd: u8, imm20: i32) -> u32 {
    encode_u(OP_LUI, rd, imm20)
}

pub fn auipc(rd: u8, imm20: i32) -> u32 {
    encode_u(OP_AUIPC, rd, imm20)
}

pub fn jal(rd: u8, offset: i32) -> u32 {
    encode_j(OP_JAL, rd, offset)
}

pub fn jalr(rd: u8, rs1: u8, offset: i32) -> u32 {
    encode_i(OP_JALR, rd, 0b000, rs1, offset)
}

pub fn branch(mnemonic: crate::Mnemonic, rs1: u8, rs2: u8, offset: i32) -> u32 {
    use crate::Mnemonic::*;
    let funct3 = match mnemonic {
        Beq => 0b000,
        Bne => 0b001,
        Blt => 0b100,
        Bge => 0b101,
        Bltu => 0b110,
        Bgeu => 0b111,
        _ => panic!("not a branch mnemonic: {mnemonic:?}"),
    };
    encode_b(OP_BRANCH, funct3, rs1, rs2, offset)
}

pub fn ld(rd: u8, rs1: u8, offset: i32) -> u32 {
    encode_i(OP_LOAD, rd, 0b011, rs1, offset)
}

pub fn sd(rs1: u8, rs2: u8, offset: i32) -> u32 {
    encode_s(OP_STORE, 0b011, rs1, rs2, offset)
}

pub fn ecall() -> u32 {
    encode_i(OP_SYSTEM, 0, 0b000, 0, 0)
}

/// `csrrs rd, csr, x0` — read-only CSR fetch, used to sample `cycle`/`time`.
pub fn csrrs(rd: u8, csr: u16, rs1: u8) -> u32 {
    encode_r(OP_SYSTEM, rd, 0b010, rs1, (csr & 0x1f) as u8, (csr >> 5) as u8)
}

pub fn add(rd: u8, rs1: u8, rs2: u8) -> u32 {
    encode_r(OP_REG, rd, 0b000, rs1, rs2, 0b0000000)
}

/// Whether `offset` (byte displacement) fits the signed 21-bit `JAL` range.
pub fn fits_jal_range(offset: i64) -> bool {
    (-(1 << 20)..(1 << 20)).contains(&offset) && offset % 2 == 0
}

/// Whether `offset` fits the signed 13-bit `B`-format range.
pub fn fits_branch_range(offset: i64) -> bool {
    (-(1 << 12)..(1 << 12)).contains(&offset) && offset % 2 == 0
}

/// The canonical multi-instruction load-immediate sequence for a 64-bit
/// value, per spec §4.6. Peels off the low 12 bits (rounded to the nearest
/// representable `addi` immediate) at a time, recording each chunk, then
/// emits from the most-significant chunk down as `addi`-then-`slli`-then-
/// `addi` — the same "shift in 12 bits, fold in the remainder" pattern the
/// `li` pseudo-instruction expands to, just unrolled iteratively instead of
/// optimized for instruction count.
pub fn load_immediate_sequence(reg: u8, value: u64) -> Vec<u32> {
    let mut val = value as i64;
    let mut chunks: Vec<i64> = Vec::new();
    loop {
        if (-2048..2048).contains(&val) {
            chunks.push(val);
            break;
        }
        let mut lo12 = val & 0xfff;
        if lo12 >= 2048 {
            lo12 -= 4096;
        }
        chunks.push(lo12);
        val = (val - lo12) >> 12;
    }

    let mut words = Vec::with_capacity(chunks.len() * 2);
    let top = *chunks.last().expect("at least one chunk");
    words.push(addi(reg, 0, top as i32));
    for &c in chunks.iter().rev().skip(1) {
        words.push(slli(reg, reg, 12));
        if c != 0 {
            words.push(addi(reg, reg, c as i32));
        }
    }
    words
}
