//! Raw bit-field layouts for the base 32-bit instruction formats.
//!
//! These mirror the RISC-V ISA manual's field tables directly; sign
//! extension and format-specific immediate reassembly happen in
//! [`crate::decode`].

use bitfield_struct::bitfield;

#[bitfield(u32)]
pub struct RType {
    #[bits(7)]
    pub opcode: u8,
    #[bits(5)]
    pub rd: u8,
    #[bits(3)]
    pub funct3: u8,
    #[bits(5)]
    pub rs1: u8,
    #[bits(5)]
    pub rs2: u8,
    #[bits(7)]
    pub funct7: u8,
}

#[bitfield(u32)]
pub struct IType {
    #[bits(7)]
    pub opcode: u8,
    #[bits(5)]
    pub rd: u8,
    #[bits(3)]
    pub funct3: u8,
    #[bits(5)]
    pub rs1: u8,
    #[bits(12)]
    pub imm11_0: u16,
}

#[bitfield(u32)]
pub struct SType {
    #[bits(7)]
    pub opcode: u8,
    #[bits(5)]
    pub imm4_0: u8,
    #[bits(3)]
    pub funct3: u8,
    #[bits(5)]
    pub rs1: u8,
    #[bits(5)]
    pub rs2: u8,
    #[bits(7)]
    pub imm11_5: u8,
}

#[bitfield(u32)]
pub struct BType {
    #[bits(7)]
    pub opcode: u8,
    #[bits(1)]
    pub imm11: u8,
    #[bits(4)]
    pub imm4_1: u8,
    #[bits(3)]
    pub funct3: u8,
    #[bits(5)]
    pub rs1: u8,
    #[bits(5)]
    pub rs2: u8,
    #[bits(6)]
    pub imm10_5: u8,
    #[bits(1)]
    pub imm12: u8,
}

#[bitfield(u32)]
pub struct UType {
    #[bits(7)]
    pub opcode: u8,
    #[bits(5)]
    pub rd: u8,
    #[bits(20)]
    pub imm31_12: u32,
}

#[bitfield(u32)]
pub struct JType {
    #[bits(7)]
    pub opcode: u8,
    #[bits(5)]
    pub rd: u8,
    #[bits(8)]
    pub imm19_12: u8,
    #[bits(1)]
    pub imm11: u8,
    #[bits(10)]
    pub imm10_1: u16,
    #[bits(1)]
    pub imm20: u8,
}

#[bitfield(u32)]
pub struct RAmoType {
    #[bits(7)]
    pub opcode: u8,
    #[bits(5)]
    pub rd: u8,
    #[bits(3)]
    pub funct3: u8,
    #[bits(5)]
    pub rs1: u8,
    #[bits(5)]
    pub rs2: u8,
    #[bits(1)]
    pub rl: bool,
    #[bits(1)]
    pub aq: bool,
    #[bits(5)]
    pub funct5: u8,
}

/// Sign-extend a `bits`-wide two's-complement value held in the low bits
/// of `value` to `i64`.
pub fn sext(value: u32, bits: u32) -> i64 {
    let shift = 32 - bits;
    (((value << shift) as i32) >> shift) as i64
}
