use crate::fields::{sext, BType, IType, JType, RAmoType, RType, SType, UType};
use crate::format::Format;
use crate::mnemonic::Mnemonic;
use crate::Decoded;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unknown 32-bit opcode {opcode:#09b} (word {word:#010x})")]
    UnknownOpcode { word: u32, opcode: u8 },
    #[error("unknown compressed opcode (quadrant {quadrant}, word {word:#06x})")]
    UnknownCompressed { word: u16, quadrant: u8 },
}

/// Decode one instruction from the guest byte stream at `bytes[0..]`.
/// Dispatches to the 16-bit compressed decoder when the low two bits of
/// the first half-word are not `11`, otherwise reads a full 32-bit word.
pub fn decode(bytes: &[u8]) -> Result<Decoded, DecodeError> {
    let lo = u16::from_le_bytes([bytes[0], bytes[1]]);
    if lo & 0b11 != 0b11 {
        decode_compressed(lo)
    } else {
        let word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        decode32(word)
    }
}

fn decode32(word: u32) -> Result<Decoded, DecodeError> {
    let opcode = (word & 0x7f) as u8;
    let funct3 = ((word >> 12) & 0x7) as u8;
    let funct7 = ((word >> 25) & 0x7f) as u8;

    macro_rules! base {
        ($mn:expr, $fmt:expr) => {
            Ok(Decoded {
                mnemonic: $mn,
                format: $fmt,
                len: 4,
                rd: 0,
                rs1: 0,
                rs2: 0,
                rs3: 0,
                imm: 0,
                funct3,
                funct7,
                aq: false,
                rl: false,
                group: $mn.natural_group(),
            })
        };
    }

    match opcode {
        0b0110111 => {
            let f = UType::from(word);
            base!(Mnemonic::Lui, Format::U).map(|mut d| {
                d.rd = f.rd();
                d.imm = ((f.imm31_12() as i64) << 12) as i32 as i64;
                d
            })
        }
        0b0010111 => {
            let f = UType::from(word);
            base!(Mnemonic::Auipc, Format::U).map(|mut d| {
                d.rd = f.rd();
                d.imm = ((f.imm31_12() as i64) << 12) as i32 as i64;
                d
            })
        }
        0b1101111 => {
            let f = JType::from(word);
            let raw = (f.imm20() as u32) << 20
                | (f.imm19_12() as u32) << 12
                | (f.imm11() as u32) << 11
                | (f.imm10_1() as u32) << 1;
            base!(Mnemonic::Jal, Format::J).map(|mut d| {
                d.rd = f.rd();
                d.imm = sext(raw, 21);
                d
            })
        }
        0b1100111 if funct3 == 0 => {
            let f = IType::from(word);
            base!(Mnemonic::Jalr, Format::I).map(|mut d| {
                d.rd = f.rd();
                d.rs1 = f.rs1();
                d.imm = sext(f.imm11_0() as u32, 12);
                d
            })
        }
        0b1100011 => {
            let f = BType::from(word);
            let raw = (f.imm12() as u32) << 12
                | (f.imm11() as u32) << 11
                | (f.imm10_5() as u32) << 5
                | (f.imm4_1() as u32) << 1;
            let mn = match funct3 {
                0b000 => Mnemonic::Beq,
                0b001 => Mnemonic::Bne,
                0b100 => Mnemonic::Blt,
                0b101 => Mnemonic::Bge,
                0b110 => Mnemonic::Bltu,
                0b111 => Mnemonic::Bgeu,
                _ => return Err(DecodeError::UnknownOpcode { word, opcode }),
            };
            base!(mn, Format::B).map(|mut d| {
                d.rs1 = f.rs1();
                d.rs2 = f.rs2();
                d.imm = sext(raw, 13);
                d
            })
        }
        0b0000011 => {
            let f = IType::from(word);
            let mn = match funct3 {
                0b000 => Mnemonic::Lb,
                0b001 => Mnemonic::Lh,
                0b010 => Mnemonic::Lw,
                0b011 => Mnemonic::Ld,
                0b100 => Mnemonic::Lbu,
                0b101 => Mnemonic::Lhu,
                0b110 => Mnemonic::Lwu,
                _ => return Err(DecodeError::UnknownOpcode { word, opcode }),
            };
            base!(mn, Format::I).map(|mut d| {
                d.rd = f.rd();
                d.rs1 = f.rs1();
                d.imm = sext(f.imm11_0() as u32, 12);
                d
            })
        }
        0b0100011 => {
            let f = SType::from(word);
            let raw = (f.imm11_5() as u32) << 5 | (f.imm4_0() as u32);
            let mn = match funct3 {
                0b000 => Mnemonic::Sb,
                0b001 => Mnemonic::Sh,
                0b010 => Mnemonic::Sw,
                0b011 => Mnemonic::Sd,
                _ => return Err(DecodeError::UnknownOpcode { word, opcode }),
            };
            base!(mn, Format::S).map(|mut d| {
                d.rs1 = f.rs1();
                d.rs2 = f.rs2();
                d.imm = sext(raw, 12);
                d
            })
        }
        0b0010011 | 0b0011011 => {
            let f = IType::from(word);
            let is_w = opcode == 0b0011011;
            let shamt_bits = if is_w { 5 } else { 6 };
            let shamt = (f.imm11_0() as u32) & ((1 << shamt_bits) - 1);
            let top7 = (f.imm11_0() as u32) >> shamt_bits;
            let mn = match (is_w, funct3) {
                (false, 0b000) => Mnemonic::Addi,
                (false, 0b010) => Mnemonic::Slti,
                (false, 0b011) => Mnemonic::Sltiu,
                (false, 0b100) => Mnemonic::Xori,
                (false, 0b110) => Mnemonic::Ori,
                (false, 0b111) => Mnemonic::Andi,
                (false, 0b001) => Mnemonic::Slli,
                (false, 0b101) if top7 == 0 => Mnemonic::Srli,
                (false, 0b101) => Mnemonic::Srai,
                (true, 0b000) => Mnemonic::Addiw,
                (true, 0b001) => Mnemonic::Slliw,
                (true, 0b101) if top7 == 0 => Mnemonic::Srliw,
                (true, 0b101) => Mnemonic::Sraiw,
                _ => return Err(DecodeError::UnknownOpcode { word, opcode }),
            };
            let is_shift = matches!(
                mn,
                Mnemonic::Slli
                    | Mnemonic::Srli
                    | Mnemonic::Srai
                    | Mnemonic::Slliw
                    | Mnemonic::Srliw
                    | Mnemonic::Sraiw
            );
            base!(mn, Format::I).map(|mut d| {
                d.rd = f.rd();
                d.rs1 = f.rs1();
                d.imm = if is_shift {
                    shamt as i64
                } else {
                    sext(f.imm11_0() as u32, 12)
                };
                d
            })
        }
        0b0110011 | 0b0111011 => {
            let f = RType::from(word);
            let is_w = opcode == 0b0111011;
            let is_muldiv = funct7 == 0b0000001;
            let mn = match (is_w, is_muldiv, funct3, funct7) {
                (false, false, 0b000, 0b0000000) => Mnemonic::Add,
                (false, false, 0b000, 0b0100000) => Mnemonic::Sub,
                (false, false, 0b001, _) => Mnemonic::Sll,
                (false, false, 0b010, _) => Mnemonic::Slt,
                (false, false, 0b011, _) => Mnemonic::Sltu,
                (false, false, 0b100, _) => Mnemonic::Xor,
                (false, false, 0b101, 0b0000000) => Mnemonic::Srl,
                (false, false, 0b101, 0b0100000) => Mnemonic::Sra,
                (false, false, 0b110, _) => Mnemonic::Or,
                (false, false, 0b111, _) => Mnemonic::And,
                (false, true, 0b000, _) => Mnemonic::Mul,
                (false, true, 0b001, _) => Mnemonic::Mulh,
                (false, true, 0b010, _) => Mnemonic::Mulhsu,
                (false, true, 0b011, _) => Mnemonic::Mulhu,
                (false, true, 0b100, _) => Mnemonic::Div,
                (false, true, 0b101, _) => Mnemonic::Divu,
                (false, true, 0b110, _) => Mnemonic::Rem,
                (false, true, 0b111, _) => Mnemonic::Remu,
                (true, false, 0b000, 0b0000000) => Mnemonic::Addw,
                (true, false, 0b000, 0b0100000) => Mnemonic::Subw,
                (true, false, 0b001, _) => Mnemonic::Sllw,
                (true, false, 0b101, 0b0000000) => Mnemonic::Srlw,
                (true, false, 0b101, 0b0100000) => Mnemonic::Sraw,
                (true, true, 0b000, _) => Mnemonic::Mulw,
                (true, true, 0b100, _) => Mnemonic::Divw,
                (true, true, 0b101, _) => Mnemonic::Divuw,
                (true, true, 0b110, _) => Mnemonic::Remw,
                (true, true, 0b111, _) => Mnemonic::Remuw,
                _ => return Err(DecodeError::UnknownOpcode { word, opcode }),
            };
            base!(mn, Format::R).map(|mut d| {
                d.rd = f.rd();
                d.rs1 = f.rs1();
                d.rs2 = f.rs2();
                d
            })
        }
        0b0001111 => {
            let mn = if funct3 == 0b001 {
                Mnemonic::FenceI
            } else {
                Mnemonic::Fence
            };
            base!(mn, Format::I)
        }
        0b1110011 if funct3 == 0 => {
            let f = IType::from(word);
            let mn = match f.imm11_0() {
                0 => Mnemonic::Ecall,
                1 => Mnemonic::Ebreak,
                _ => return Err(DecodeError::UnknownOpcode { word, opcode }),
            };
            base!(mn, Format::I)
        }
        0b0101111 => {
            // AMO/LR/SC: not individually named (the A extension is out of
            // this engine's modeled subset) but the aq/rl-bearing format is
            // still decoded so the allocator can at least see register use.
            let f = RAmoType::from(word);
            base!(Mnemonic::Unknown, Format::RAmo).map(|mut d| {
                d.rd = f.rd();
                d.rs1 = f.rs1();
                d.rs2 = f.rs2();
                d.aq = f.aq();
                d.rl = f.rl();
                d
            })
        }
        // LOAD-FP
        0b0000111 => {
            let f = IType::from(word);
            let mn = match funct3 {
                0b010 => Mnemonic::Flw,
                0b011 => Mnemonic::Fld,
                _ => return Err(DecodeError::UnknownOpcode { word, opcode }),
            };
            base!(mn, Format::I).map(|mut d| {
                d.rd = f.rd();
                d.rs1 = f.rs1();
                d.imm = sext(f.imm11_0() as u32, 12);
                d
            })
        }
        // STORE-FP
        0b0100111 => {
            let f = SType::from(word);
            let raw = (f.imm11_5() as u32) << 5 | (f.imm4_0() as u32);
            let mn = match funct3 {
                0b010 => Mnemonic::Fsw,
                0b011 => Mnemonic::Fsd,
                _ => return Err(DecodeError::UnknownOpcode { word, opcode }),
            };
            base!(mn, Format::S).map(|mut d| {
                d.rs1 = f.rs1();
                d.rs2 = f.rs2();
                d.imm = sext(raw, 12);
                d
            })
        }
        // FMADD / FMSUB / FNMSUB / FNMADD (R4 format): the word's top 7
        // bits that an ordinary R-type would call `funct7` instead pack
        // `rs3`(5) then `fmt`(2, 00=S 01=D); kept verbatim in `funct7` so
        // re-encoding needs no extra bookkeeping, and split out into
        // `rs3`/fmt for classification.
        0b1000011 | 0b1000111 | 0b1001011 | 0b1001111 => {
            let f = RType::from(word);
            let rs3 = f.funct7() >> 2;
            let fmt = f.funct7() & 0x3;
            let mn = match (opcode, fmt) {
                (0b1000011, 0) => Mnemonic::FmaddS,
                (0b1000011, 1) => Mnemonic::FmaddD,
                (0b1000111, 0) => Mnemonic::FmsubS,
                (0b1000111, 1) => Mnemonic::FmsubD,
                (0b1001011, 0) => Mnemonic::FnmsubS,
                (0b1001011, 1) => Mnemonic::FnmsubD,
                (0b1001111, 0) => Mnemonic::FnmaddS,
                (0b1001111, 1) => Mnemonic::FnmaddD,
                _ => return Err(DecodeError::UnknownOpcode { word, opcode }),
            };
            base!(mn, Format::R4).map(|mut d| {
                d.rd = f.rd();
                d.rs1 = f.rs1();
                d.rs2 = f.rs2();
                d.rs3 = rs3;
                d
            })
        }
        // OP-FP: funct7's top 5 bits are `funct5` (the operation), its
        // bottom 2 are `fmt` (00=S 01=D), same packing convention as R4.
        0b1010011 => {
            let f = RType::from(word);
            let funct5 = funct7 >> 2;
            let fmt = funct7 & 0x3;
            let mn = match (funct5, fmt, funct3) {
                (0b00000, 0, _) => Mnemonic::FaddS,
                (0b00000, 1, _) => Mnemonic::FaddD,
                (0b00001, 0, _) => Mnemonic::FsubS,
                (0b00001, 1, _) => Mnemonic::FsubD,
                (0b00010, 0, _) => Mnemonic::FmulS,
                (0b00010, 1, _) => Mnemonic::FmulD,
                (0b00011, 0, _) => Mnemonic::FdivS,
                (0b00011, 1, _) => Mnemonic::FdivD,
                (0b01011, 0, _) => Mnemonic::FsqrtS,
                (0b01011, 1, _) => Mnemonic::FsqrtD,
                (0b00100, 0, 0b000) => Mnemonic::FsgnjS,
                (0b00100, 0, 0b001) => Mnemonic::FsgnjnS,
                (0b00100, 0, 0b010) => Mnemonic::FsgnjxS,
                (0b00100, 1, 0b000) => Mnemonic::FsgnjD,
                (0b00100, 1, 0b001) => Mnemonic::FsgnjnD,
                (0b00100, 1, 0b010) => Mnemonic::FsgnjxD,
                (0b00101, 0, 0b000) => Mnemonic::FminS,
                (0b00101, 0, 0b001) => Mnemonic::FmaxS,
                (0b00101, 1, 0b000) => Mnemonic::FminD,
                (0b00101, 1, 0b001) => Mnemonic::FmaxD,
                (0b11000, 0, _) => match f.rs2() {
                    0b00000 => Mnemonic::FcvtWS,
                    0b00001 => Mnemonic::FcvtWuS,
                    0b00010 => Mnemonic::FcvtLS,
                    0b00011 => Mnemonic::FcvtLuS,
                    _ => return Err(DecodeError::UnknownOpcode { word, opcode }),
                },
                (0b11000, 1, _) => match f.rs2() {
                    0b00000 => Mnemonic::FcvtWD,
                    0b00001 => Mnemonic::FcvtWuD,
                    0b00010 => Mnemonic::FcvtLD,
                    0b00011 => Mnemonic::FcvtLuD,
                    _ => return Err(DecodeError::UnknownOpcode { word, opcode }),
                },
                (0b11010, 0, _) => match f.rs2() {
                    0b00000 => Mnemonic::FcvtSW,
                    0b00001 => Mnemonic::FcvtSWu,
                    0b00010 => Mnemonic::FcvtSL,
                    0b00011 => Mnemonic::FcvtSLu,
                    _ => return Err(DecodeError::UnknownOpcode { word, opcode }),
                },
                (0b11010, 1, _) => match f.rs2() {
                    0b00000 => Mnemonic::FcvtDW,
                    0b00001 => Mnemonic::FcvtDWu,
                    0b00010 => Mnemonic::FcvtDL,
                    0b00011 => Mnemonic::FcvtDLu,
                    _ => return Err(DecodeError::UnknownOpcode { word, opcode }),
                },
                (0b01000, 0, _) if f.rs2() == 0b00001 => Mnemonic::FcvtSD,
                (0b01000, 1, _) if f.rs2() == 0b00000 => Mnemonic::FcvtDS,
                (0b11100, 0, 0b000) => Mnemonic::FmvXW,
                (0b11100, 0, 0b001) => Mnemonic::FclassS,
                (0b11100, 1, 0b000) => Mnemonic::FmvXD,
                (0b11100, 1, 0b001) => Mnemonic::FclassD,
                (0b11110, 0, 0b000) => Mnemonic::FmvWX,
                (0b11110, 1, 0b000) => Mnemonic::FmvDX,
                (0b10100, 0, 0b010) => Mnemonic::FeqS,
                (0b10100, 0, 0b001) => Mnemonic::FltS,
                (0b10100, 0, 0b000) => Mnemonic::FleS,
                (0b10100, 1, 0b010) => Mnemonic::FeqD,
                (0b10100, 1, 0b001) => Mnemonic::FltD,
                (0b10100, 1, 0b000) => Mnemonic::FleD,
                _ => return Err(DecodeError::UnknownOpcode { word, opcode }),
            };
            base!(mn, Format::R).map(|mut d| {
                d.rd = f.rd();
                d.rs1 = f.rs1();
                d.rs2 = f.rs2();
                d
            })
        }
        _ => Err(DecodeError::UnknownOpcode { word, opcode }),
    }
}

/// Decode a 16-bit compressed instruction, expanding it into the same
/// [`Decoded`] shape as its base-ISA equivalent. Only the RVC forms a
/// Newlib-linked rv64gc binary commonly emits are modeled; anything else
/// reports [`DecodeError::UnknownCompressed`] (fatal per the allocator's
/// unknown-opcode handling).
fn decode_compressed(word: u16) -> Result<Decoded, DecodeError> {
    let quadrant = word & 0b11;
    let funct3 = (word >> 13) & 0b111;

    let rd_rs1_wide = |w: u16| -> u8 { (((w >> 7) & 0x7) + 8) as u8 };
    let rs2_wide = |w: u16| -> u8 { (((w >> 2) & 0x7) + 8) as u8 };
    let full_rd = |w: u16| -> u8 { ((w >> 7) & 0x1f) as u8 };
    let full_rs2 = |w: u16| -> u8 { ((w >> 2) & 0x1f) as u8 };

    macro_rules! d {
        ($mn:expr, $fmt:expr) => {
            Decoded {
                mnemonic: $mn,
                format: $fmt,
                len: 2,
                rd: 0,
                rs1: 0,
                rs2: 0,
                rs3: 0,
                imm: 0,
                funct3: funct3 as u8,
                funct7: 0,
                aq: false,
                rl: false,
                group: $mn.natural_group(),
            }
        };
    }

    match (quadrant, funct3) {
        // C.ADDI4SPN
        (0b00, 0b000) if word != 0 => {
            let nzuimm = (((word >> 5) & 0x1) as u32) << 3
                | (((word >> 6) & 0x1) as u32) << 2
                | (((word >> 7) & 0xf) as u32) << 6
                | (((word >> 11) & 0x3) as u32) << 4;
            let mut r = d!(Mnemonic::Addi, Format::I);
            r.rd = rs2_wide(word);
            r.rs1 = 2; // sp
            r.imm = nzuimm as i64;
            Ok(r)
        }
        // C.LW
        (0b00, 0b010) => {
            let off = (((word >> 5) & 1) as u32) << 6
                | (((word >> 6) & 1) as u32) << 2
                | (((word >> 10) & 0x7) as u32) << 3;
            let mut r = d!(Mnemonic::Lw, Format::I);
            r.rd = rs2_wide(word);
            r.rs1 = rd_rs1_wide(word);
            r.imm = off as i64;
            Ok(r)
        }
        // C.LD
        (0b00, 0b011) => {
            let off = (((word >> 5) & 0x3) as u32) << 6 | (((word >> 10) & 0x7) as u32) << 3;
            let mut r = d!(Mnemonic::Ld, Format::I);
            r.rd = rs2_wide(word);
            r.rs1 = rd_rs1_wide(word);
            r.imm = off as i64;
            Ok(r)
        }
        // C.SW
        (0b00, 0b110) => {
            let off = (((word >> 5) & 1) as u32) << 6
                | (((word >> 6) & 1) as u32) << 2
                | (((word >> 10) & 0x7) as u32) << 3;
            let mut r = d!(Mnemonic::Sw, Format::S);
            r.rs1 = rd_rs1_wide(word);
            r.rs2 = rs2_wide(word);
            r.imm = off as i64;
            Ok(r)
        }
        // C.SD
        (0b00, 0b111) => {
            let off = (((word >> 5) & 0x3) as u32) << 6 | (((word >> 10) & 0x7) as u32) << 3;
            let mut r = d!(Mnemonic::Sd, Format::S);
            r.rs1 = rd_rs1_wide(word);
            r.rs2 = rs2_wide(word);
            r.imm = off as i64;
            Ok(r)
        }
        // C.ADDI (incl. C.NOP when rd==0)
        (0b01, 0b000) => {
            let raw = (((word >> 12) & 1) as u32) << 5 | (((word >> 2) & 0x1f) as u32);
            let mut r = d!(Mnemonic::Addi, Format::I);
            r.rd = full_rd(word);
            r.rs1 = full_rd(word);
            r.imm = sext(raw, 6);
            Ok(r)
        }
        // C.ADDIW
        (0b01, 0b001) => {
            let raw = (((word >> 12) & 1) as u32) << 5 | (((word >> 2) & 0x1f) as u32);
            let mut r = d!(Mnemonic::Addiw, Format::I);
            r.rd = full_rd(word);
            r.rs1 = full_rd(word);
            r.imm = sext(raw, 6);
            Ok(r)
        }
        // C.LI
        (0b01, 0b010) => {
            let raw = (((word >> 12) & 1) as u32) << 5 | (((word >> 2) & 0x1f) as u32);
            let mut r = d!(Mnemonic::Addi, Format::I);
            r.rd = full_rd(word);
            r.rs1 = 0;
            r.imm = sext(raw, 6);
            Ok(r)
        }
        // C.ADDI16SP / C.LUI
        (0b01, 0b011) => {
            let rd = full_rd(word);
            if rd == 2 {
                let raw = (((word >> 12) & 1) as u32) << 9
                    | (((word >> 6) & 1) as u32) << 4
                    | (((word >> 5) & 1) as u32) << 6
                    | (((word >> 3) & 0x3) as u32) << 7
                    | (((word >> 2) & 1) as u32) << 5;
                let mut r = d!(Mnemonic::Addi, Format::I);
                r.rd = 2;
                r.rs1 = 2;
                r.imm = sext(raw, 10);
                Ok(r)
            } else {
                let raw = (((word >> 12) & 1) as u32) << 17 | (((word >> 2) & 0x1f) as u32) << 12;
                let mut r = d!(Mnemonic::Lui, Format::U);
                r.rd = rd;
                r.imm = sext(raw, 18);
                Ok(r)
            }
        }
        // C.SRLI / C.SRAI / C.ANDI / C.SUB / C.XOR / C.OR / C.AND / C.SUBW / C.ADDW
        (0b01, 0b100) => {
            let sub_op = (word >> 10) & 0x3;
            let rd = rd_rs1_wide(word);
            match sub_op {
                0b00 | 0b01 => {
                    let shamt = (((word >> 12) & 1) as u32) << 5 | (((word >> 2) & 0x1f) as u32);
                    let mut r = d!(
                        if sub_op == 0 {
                            Mnemonic::Srli
                        } else {
                            Mnemonic::Srai
                        },
                        Format::I
                    );
                    r.rd = rd;
                    r.rs1 = rd;
                    r.imm = shamt as i64;
                    Ok(r)
                }
                0b10 => {
                    let raw = (((word >> 12) & 1) as u32) << 5 | (((word >> 2) & 0x1f) as u32);
                    let mut r = d!(Mnemonic::Andi, Format::I);
                    r.rd = rd;
                    r.rs1 = rd;
                    r.imm = sext(raw, 6);
                    Ok(r)
                }
                0b11 => {
                    let funct2 = (word >> 5) & 0x3;
                    let is_word = (word >> 12) & 1 == 1;
                    let mn = match (is_word, funct2) {
                        (false, 0b00) => Mnemonic::Sub,
                        (false, 0b01) => Mnemonic::Xor,
                        (false, 0b10) => Mnemonic::Or,
                        (false, 0b11) => Mnemonic::And,
                        (true, 0b00) => Mnemonic::Subw,
                        (true, 0b01) => Mnemonic::Addw,
                        _ => return Err(DecodeError::UnknownCompressed { word, quadrant: 1 }),
                    };
                    let mut r = d!(mn, Format::R);
                    r.rd = rd;
                    r.rs1 = rd;
                    r.rs2 = rs2_wide(word);
                    Ok(r)
                }
                _ => unreachable!(),
            }
        }
        // C.J
        (0b01, 0b101) => {
            let raw = (((word >> 12) & 1) as u32) << 11
                | (((word >> 11) & 1) as u32) << 4
                | (((word >> 9) & 0x3) as u32) << 8
                | (((word >> 8) & 1) as u32) << 10
                | (((word >> 7) & 1) as u32) << 6
                | (((word >> 6) & 1) as u32) << 7
                | (((word >> 3) & 0x7) as u32) << 1
                | (((word >> 2) & 1) as u32) << 5;
            let mut r = d!(Mnemonic::Jal, Format::J);
            r.rd = 0;
            r.imm = sext(raw, 12);
            Ok(r)
        }
        // C.BEQZ / C.BNEZ
        (0b01, 0b110) | (0b01, 0b111) => {
            let raw = (((word >> 12) & 1) as u32) << 8
                | (((word >> 5) & 0x3) as u32) << 3
                | (((word >> 2) & 0x1) as u32) << 5
                | (((word >> 10) & 0x3) as u32) << 1
                | (((word >> 3) & 0x3) as u32) << 6;
            let mut r = d!(
                if funct3 == 0b110 {
                    Mnemonic::Beq
                } else {
                    Mnemonic::Bne
                },
                Format::B
            );
            r.rs1 = rd_rs1_wide(word);
            r.rs2 = 0;
            r.imm = sext(raw, 9);
            Ok(r)
        }
        // C.SLLI
        (0b10, 0b000) => {
            let shamt = (((word >> 12) & 1) as u32) << 5 | (((word >> 2) & 0x1f) as u32);
            let mut r = d!(Mnemonic::Slli, Format::I);
            r.rd = full_rd(word);
            r.rs1 = full_rd(word);
            r.imm = shamt as i64;
            Ok(r)
        }
        // C.LWSP
        (0b10, 0b010) => {
            let off = (((word >> 12) & 1) as u32) << 5
                | (((word >> 4) & 0x7) as u32) << 2
                | (((word >> 2) & 0x3) as u32) << 6;
            let mut r = d!(Mnemonic::Lw, Format::I);
            r.rd = full_rd(word);
            r.rs1 = 2;
            r.imm = off as i64;
            Ok(r)
        }
        // C.LDSP
        (0b10, 0b011) => {
            let off = (((word >> 12) & 1) as u32) << 5
                | (((word >> 5) & 0x3) as u32) << 3
                | (((word >> 2) & 0x7) as u32) << 6;
            let mut r = d!(Mnemonic::Ld, Format::I);
            r.rd = full_rd(word);
            r.rs1 = 2;
            r.imm = off as i64;
            Ok(r)
        }
        // C.JR / C.MV / C.EBREAK / C.JALR / C.ADD
        (0b10, 0b100) => {
            let bit12 = (word >> 12) & 1;
            let rd = full_rd(word);
            let rs2 = full_rs2(word);
            if bit12 == 0 {
                if rs2 == 0 {
                    let mut r = d!(Mnemonic::Jalr, Format::I);
                    r.rd = 0;
                    r.rs1 = rd;
                    r.imm = 0;
                    Ok(r)
                } else {
                    let mut r = d!(Mnemonic::Add, Format::R);
                    r.rd = rd;
                    r.rs1 = 0;
                    r.rs2 = rs2;
                    Ok(r)
                }
            } else if rd == 0 && rs2 == 0 {
                Ok(d!(Mnemonic::Ebreak, Format::I))
            } else if rs2 == 0 {
                let mut r = d!(Mnemonic::Jalr, Format::I);
                r.rd = 1;
                r.rs1 = rd;
                r.imm = 0;
                Ok(r)
            } else {
                let mut r = d!(Mnemonic::Add, Format::R);
                r.rd = rd;
                r.rs1 = rd;
                r.rs2 = rs2;
                Ok(r)
            }
        }
        // C.SWSP
        (0b10, 0b110) => {
            let off = (((word >> 9) & 0xf) as u32) << 2 | (((word >> 7) & 0x3) as u32) << 6;
            let mut r = d!(Mnemonic::Sw, Format::S);
            r.rs1 = 2;
            r.rs2 = full_rs2(word);
            r.imm = off as i64;
            Ok(r)
        }
        // C.SDSP
        (0b10, 0b111) => {
            let off = (((word >> 10) & 0x7) as u32) << 3 | (((word >> 7) & 0x7) as u32) << 6;
            let mut r = d!(Mnemonic::Sd, Format::S);
            r.rs1 = 2;
            r.rs2 = full_rs2(word);
            r.imm = off as i64;
            Ok(r)
        }
        _ => Err(DecodeError::UnknownCompressed { word, quadrant: quadrant as u8 }),
    }
}
