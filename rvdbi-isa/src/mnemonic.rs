/// Mnemonic identifier for every instruction this engine needs to reason
/// about: the control-flow/syscall terminators that drive basic-block
/// splitting, and the integer/M-extension ALU, load/store, and upper-
/// immediate instructions the allocator must pass through (with
/// transparency fixups for `AUIPC`/`JAL`/`JALR`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Mnemonic {
    // Control flow
    Beq,
    Bne,
    Blt,
    Bge,
    Bltu,
    Bgeu,
    Jal,
    Jalr,
    Ecall,
    Ebreak,

    // Upper immediate / PC-relative
    Lui,
    Auipc,

    // Integer register-immediate
    Addi,
    Slti,
    Sltiu,
    Xori,
    Ori,
    Andi,
    Slli,
    Srli,
    Srai,

    // Integer register-register
    Add,
    Sub,
    Sll,
    Slt,
    Sltu,
    Xor,
    Srl,
    Sra,
    Or,
    And,

    // RV64I word-sized variants
    Addiw,
    Slliw,
    Srliw,
    Sraiw,
    Addw,
    Subw,
    Sllw,
    Srlw,
    Sraw,

    // Loads / stores
    Lb,
    Lh,
    Lw,
    Ld,
    Lbu,
    Lhu,
    Lwu,
    Sb,
    Sh,
    Sw,
    Sd,

    // M extension
    Mul,
    Mulh,
    Mulhsu,
    Mulhu,
    Div,
    Divu,
    Rem,
    Remu,
    Mulw,
    Divw,
    Divuw,
    Remw,
    Remuw,

    Fence,
    FenceI,

    // F/D extension: loads, stores, fused multiply-add
    Flw,
    Fld,
    Fsw,
    Fsd,
    FmaddS,
    FmaddD,
    FmsubS,
    FmsubD,
    FnmsubS,
    FnmsubD,
    FnmaddS,
    FnmaddD,

    // F/D extension: arithmetic
    FaddS,
    FaddD,
    FsubS,
    FsubD,
    FmulS,
    FmulD,
    FdivS,
    FdivD,
    FsqrtS,
    FsqrtD,
    FsgnjS,
    FsgnjnS,
    FsgnjxS,
    FsgnjD,
    FsgnjnD,
    FsgnjxD,
    FminS,
    FmaxS,
    FminD,
    FmaxD,

    // F/D extension: conversion and cross-format move
    FcvtWS,
    FcvtWuS,
    FcvtLS,
    FcvtLuS,
    FcvtWD,
    FcvtWuD,
    FcvtLD,
    FcvtLuD,
    FcvtSW,
    FcvtSWu,
    FcvtSL,
    FcvtSLu,
    FcvtDW,
    FcvtDWu,
    FcvtDL,
    FcvtDLu,
    FcvtSD,
    FcvtDS,
    FmvXW,
    FmvWX,
    FmvXD,
    FmvDX,
    FclassS,
    FclassD,

    // F/D extension: comparison
    FeqS,
    FltS,
    FleS,
    FeqD,
    FltD,
    FleD,

    /// Anything the decoder cannot classify (reserved encodings, or
    /// extensions this engine does not model: A/V/...). The allocator
    /// treats this as a fatal unknown-opcode error per spec §7.
    Unknown,
}

impl Mnemonic {
    /// Natural per-type group tag, used as the default `group` for
    /// per-instruction-group callback registration before a user overrides
    /// it.
    pub fn natural_group(self) -> u32 {
        use Mnemonic::*;
        match self {
            Beq | Bne | Blt | Bge | Bltu | Bgeu => 1, // branch
            Jal | Jalr => 2,                          // jump
            Ecall | Ebreak => 3,                      // syscall/trap
            Lui | Auipc => 4,                          // upper-immediate
            Addi | Slti | Sltiu | Xori | Ori | Andi | Slli | Srli | Srai | Addiw | Slliw
            | Srliw | Sraiw => 5, // alu-imm
            Add | Sub | Sll | Slt | Sltu | Xor | Srl | Sra | Or | And | Addw | Subw | Sllw
            | Srlw | Sraw => 6, // alu-reg
            Lb | Lh | Lw | Ld | Lbu | Lhu | Lwu => 7,  // load
            Sb | Sh | Sw | Sd => 8,                    // store
            Mul | Mulh | Mulhsu | Mulhu | Div | Divu | Rem | Remu | Mulw | Divw | Divuw
            | Remw | Remuw => 9, // muldiv
            Fence | FenceI => 10,
            Flw | Fld => 11,   // fp-load
            Fsw | Fsd => 12,   // fp-store
            FmaddS | FmaddD | FmsubS | FmsubD | FnmsubS | FnmsubD | FnmaddS | FnmaddD => 13, // fp-fma
            FaddS | FaddD | FsubS | FsubD | FmulS | FmulD | FdivS | FdivD | FsqrtS | FsqrtD
            | FsgnjS | FsgnjnS | FsgnjxS | FsgnjD | FsgnjnD | FsgnjxD | FminS | FmaxS | FminD
            | FmaxD => 14, // fp-alu
            FcvtWS | FcvtWuS | FcvtLS | FcvtLuS | FcvtWD | FcvtWuD | FcvtLD | FcvtLuD | FcvtSW
            | FcvtSWu | FcvtSL | FcvtSLu | FcvtDW | FcvtDWu | FcvtDL | FcvtDLu | FcvtSD
            | FcvtDS => 15, // fp-convert
            FmvXW | FmvWX | FmvXD | FmvDX => 16, // fp-move
            FclassS | FclassD | FeqS | FltS | FleS | FeqD | FltD | FleD => 17, // fp-classify/compare
            Unknown => 0,
        }
    }
}
