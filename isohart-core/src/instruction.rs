use crate::hart::csr::CsrSpecifier;
use crate::registers::Specifier;
use crate::Xlen;
use std::fmt;
use thiserror::Error;

/// Longest instruction encoding, in bytes, that the fetch unit will ever report.
pub const MAX_INSN_LENGTH: u64 = 8;

/// Data structure that can hold any supported instruction in its decoded form.
///
/// This is the closed set of instruction handlers a hart can dispatch to. The handler for an
/// instruction is chosen once, at decode time, and cached together with the raw encoding.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Instruction {
    OpImm {
        op: RegImmOp,
        dest: Specifier,
        src: Specifier,
        immediate: i32,
    },
    OpShiftImm {
        op: RegShiftImmOp,
        dest: Specifier,
        src: Specifier,
        shift_amount: u32,
    },
    /// RV64 only.
    OpImm32 {
        op: RegImm32Op,
        dest: Specifier,
        src: Specifier,
        immediate: i32,
    },
    Auipc {
        dest: Specifier,
        immediate: i32,
    },
    Lui {
        dest: Specifier,
        immediate: i32,
    },
    Op {
        op: RegRegOp,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    },
    /// RV64 only.
    Op32 {
        op: RegReg32Op,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    },
    Jal {
        dest: Specifier,
        offset: i32,
    },
    Jalr {
        dest: Specifier,
        base: Specifier,
        offset: i32,
    },
    Branch {
        condition: BranchCondition,
        src1: Specifier,
        src2: Specifier,
        offset: i32,
    },
    Load {
        width: LoadWidth,
        dest: Specifier,
        base: Specifier,
        offset: i32,
    },
    Store {
        width: StoreWidth,
        src: Specifier,
        base: Specifier,
        offset: i32,
    },
    LoadFp {
        width: FpWidth,
        dest: Specifier,
        base: Specifier,
        offset: i32,
    },
    StoreFp {
        width: FpWidth,
        src: Specifier,
        base: Specifier,
        offset: i32,
    },
    LoadReserved {
        width: AmoWidth,
        dest: Specifier,
        addr: Specifier,
    },
    StoreConditional {
        width: AmoWidth,
        dest: Specifier,
        addr: Specifier,
        src: Specifier,
    },
    Amo {
        op: AmoOp,
        width: AmoWidth,
        dest: Specifier,
        addr: Specifier,
        src: Specifier,
    },
    Csr {
        op: CsrOp,
        dest: Specifier,
        csr: CsrSpecifier,
        src: Specifier,
    },
    CsrImm {
        op: CsrOp,
        dest: Specifier,
        csr: CsrSpecifier,
        immediate: u32,
    },
    Fence {
        predecessor: FenceOrderCombination,
        successor: FenceOrderCombination,
    },
    FenceI,
    Ecall,
    Ebreak,
    Sret,
    Mret,
    Dret,
    Wfi,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegImmOp {
    Addi,
    Slti,
    Sltiu,
    Xori,
    Ori,
    Andi,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegShiftImmOp {
    Slli,
    Srli,
    Srai,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegImm32Op {
    Addiw,
    Slliw,
    Srliw,
    Sraiw,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegRegOp {
    Add,
    Slt,
    Sltu,
    And,
    Or,
    Xor,
    Sll,
    Srl,
    Sub,
    Sra,
    Mul,
    Mulh,
    Mulhsu,
    Mulhu,
    Div,
    Divu,
    Rem,
    Remu,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegReg32Op {
    Addw,
    Subw,
    Sllw,
    Srlw,
    Sraw,
    Mulw,
    Divw,
    Divuw,
    Remw,
    Remuw,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BranchCondition {
    Beq,
    Bne,
    Blt,
    Bltu,
    Bge,
    Bgeu,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LoadWidth {
    Lb,
    Lh,
    Lw,
    Ld,
    Lbu,
    Lhu,
    Lwu,
}

impl LoadWidth {
    /// Number of bytes read from memory.
    pub fn size(self) -> u64 {
        match self {
            Self::Lb | Self::Lbu => 1,
            Self::Lh | Self::Lhu => 2,
            Self::Lw | Self::Lwu => 4,
            Self::Ld => 8,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StoreWidth {
    Sb,
    Sh,
    Sw,
    Sd,
}

impl StoreWidth {
    /// Number of bytes written to memory.
    pub fn size(self) -> u64 {
        match self {
            Self::Sb => 1,
            Self::Sh => 2,
            Self::Sw => 4,
            Self::Sd => 8,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FpWidth {
    Single,
    Double,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AmoWidth {
    Word,
    Doubleword,
}

impl AmoWidth {
    pub fn size(self) -> u64 {
        match self {
            Self::Word => 4,
            Self::Doubleword => 8,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AmoOp {
    Swap,
    Add,
    Xor,
    And,
    Or,
    Min,
    Max,
    Minu,
    Maxu,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CsrOp {
    /// Atomic Read/Write.
    ReadWrite,
    /// Atomic Read and Set Bits.
    ReadSet,
    /// Atomic Read and Clear Bits.
    ReadClear,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FenceOrderCombination {
    pub device_input: bool,
    pub device_output: bool,
    pub memory_reads: bool,
    pub memory_writes: bool,
}

/// Whether a memory operand is read or written.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AccessKind {
    Load,
    Store,
}

/// Register-relative memory operand of a load, store, or atomic instruction.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryOperand {
    pub kind: AccessKind,
    pub base: Specifier,
    pub offset: i32,
}

impl Instruction {
    /// Decodes a 32-bit instruction for a hart of width `xlen`.
    ///
    /// Encodings that only exist on RV64 (e.g. `ld`, `addiw`) are rejected on RV32.
    pub fn decode(raw_instruction: u32, xlen: Xlen) -> Result<Self, DecodeError> {
        if instruction_length(raw_instruction as u16) != 4 {
            return Err(DecodeError::UnsupportedLength);
        }
        let rv64 = xlen != Xlen::Rv32;
        let rv64_only = |instruction: Self| match rv64 {
            true => Ok(instruction),
            false => Err(DecodeError::Rv64Only),
        };
        match opcode(raw_instruction).ok_or(DecodeError::UnsupportedOpcode)? {
            Opcode::OpImm => match i_funct(raw_instruction) {
                Some(op) => Ok(Self::OpImm {
                    op,
                    dest: rd(raw_instruction),
                    src: rs1(raw_instruction),
                    immediate: i_imm(raw_instruction),
                }),
                None => {
                    let op = i_shfunct(raw_instruction).ok_or(DecodeError::IllegalInstruction)?;
                    let shift_amount = shamt(raw_instruction);
                    if !rv64 && shift_amount > 31 {
                        return Err(DecodeError::IllegalInstruction);
                    }
                    Ok(Self::OpShiftImm {
                        op,
                        dest: rd(raw_instruction),
                        src: rs1(raw_instruction),
                        shift_amount,
                    })
                }
            },
            Opcode::OpImm32 => {
                let op = i32_funct(raw_instruction).ok_or(DecodeError::IllegalInstruction)?;
                let immediate = match op {
                    RegImm32Op::Addiw => i_imm(raw_instruction),
                    _ => shamt(raw_instruction) as i32,
                };
                rv64_only(Self::OpImm32 {
                    op,
                    dest: rd(raw_instruction),
                    src: rs1(raw_instruction),
                    immediate,
                })
            }
            Opcode::Auipc => Ok(Self::Auipc {
                dest: rd(raw_instruction),
                immediate: u_imm(raw_instruction),
            }),
            Opcode::Lui => Ok(Self::Lui {
                dest: rd(raw_instruction),
                immediate: u_imm(raw_instruction),
            }),
            Opcode::Op => match r_funct(raw_instruction) {
                Some(op) => Ok(Self::Op {
                    op,
                    dest: rd(raw_instruction),
                    src1: rs1(raw_instruction),
                    src2: rs2(raw_instruction),
                }),
                None => Err(DecodeError::IllegalInstruction),
            },
            Opcode::Op32 => match r32_funct(raw_instruction) {
                Some(op) => rv64_only(Self::Op32 {
                    op,
                    dest: rd(raw_instruction),
                    src1: rs1(raw_instruction),
                    src2: rs2(raw_instruction),
                }),
                None => Err(DecodeError::IllegalInstruction),
            },
            Opcode::Jal => Ok(Self::Jal {
                dest: rd(raw_instruction),
                offset: j_imm(raw_instruction),
            }),
            Opcode::Jalr => match funct3(raw_instruction) {
                0b000 => Ok(Self::Jalr {
                    dest: rd(raw_instruction),
                    base: rs1(raw_instruction),
                    offset: i_imm(raw_instruction),
                }),
                _ => Err(DecodeError::IllegalInstruction),
            },
            Opcode::Branch => match b_funct(raw_instruction) {
                Some(condition) => Ok(Self::Branch {
                    condition,
                    src1: rs1(raw_instruction),
                    src2: rs2(raw_instruction),
                    offset: b_imm(raw_instruction),
                }),
                None => Err(DecodeError::IllegalInstruction),
            },
            Opcode::Load => {
                let width = i_width(raw_instruction).ok_or(DecodeError::IllegalInstruction)?;
                let instruction = Self::Load {
                    width,
                    dest: rd(raw_instruction),
                    base: rs1(raw_instruction),
                    offset: i_imm(raw_instruction),
                };
                match width {
                    LoadWidth::Ld | LoadWidth::Lwu => rv64_only(instruction),
                    _ => Ok(instruction),
                }
            }
            Opcode::Store => {
                let width = s_width(raw_instruction).ok_or(DecodeError::IllegalInstruction)?;
                let instruction = Self::Store {
                    width,
                    src: rs2(raw_instruction),
                    base: rs1(raw_instruction),
                    offset: s_imm(raw_instruction),
                };
                match width {
                    StoreWidth::Sd => rv64_only(instruction),
                    _ => Ok(instruction),
                }
            }
            Opcode::LoadFp => match fp_width(raw_instruction) {
                Some(width) => Ok(Self::LoadFp {
                    width,
                    dest: rd(raw_instruction),
                    base: rs1(raw_instruction),
                    offset: i_imm(raw_instruction),
                }),
                None => Err(DecodeError::IllegalInstruction),
            },
            Opcode::StoreFp => match fp_width(raw_instruction) {
                Some(width) => Ok(Self::StoreFp {
                    width,
                    src: rs2(raw_instruction),
                    base: rs1(raw_instruction),
                    offset: s_imm(raw_instruction),
                }),
                None => Err(DecodeError::IllegalInstruction),
            },
            Opcode::Amo => {
                let width = match funct3(raw_instruction) {
                    0b010 => AmoWidth::Word,
                    0b011 if rv64 => AmoWidth::Doubleword,
                    0b011 => return Err(DecodeError::Rv64Only),
                    _ => return Err(DecodeError::IllegalInstruction),
                };
                let dest = rd(raw_instruction);
                let addr = rs1(raw_instruction);
                let src = rs2(raw_instruction);
                match funct5(raw_instruction) {
                    0b00010 if src == Specifier::X0 => Ok(Self::LoadReserved { width, dest, addr }),
                    0b00011 => Ok(Self::StoreConditional {
                        width,
                        dest,
                        addr,
                        src,
                    }),
                    funct5 => match amo_funct(funct5) {
                        Some(op) => Ok(Self::Amo {
                            op,
                            width,
                            dest,
                            addr,
                            src,
                        }),
                        None => Err(DecodeError::IllegalInstruction),
                    },
                }
            }
            Opcode::MiscMem => match funct3(raw_instruction) {
                0b000 => {
                    // Reserved `fm`, `rs1`, and `rd` values are treated as a normal fence for
                    // forward compatibility, and so is FENCE.TSO.
                    let predecessor = FenceOrderCombination {
                        device_input: (raw_instruction >> 27) & 0b1 == 1,
                        device_output: (raw_instruction >> 26) & 0b1 == 1,
                        memory_reads: (raw_instruction >> 25) & 0b1 == 1,
                        memory_writes: (raw_instruction >> 24) & 0b1 == 1,
                    };
                    let successor = FenceOrderCombination {
                        device_input: (raw_instruction >> 23) & 0b1 == 1,
                        device_output: (raw_instruction >> 22) & 0b1 == 1,
                        memory_reads: (raw_instruction >> 21) & 0b1 == 1,
                        memory_writes: (raw_instruction >> 20) & 0b1 == 1,
                    };
                    Ok(Self::Fence {
                        predecessor,
                        successor,
                    })
                }
                0b001 => Ok(Self::FenceI),
                _ => Err(DecodeError::IllegalInstruction),
            },
            Opcode::System => {
                let csr = (raw_instruction >> 20) as CsrSpecifier;
                let dest = rd(raw_instruction);
                match funct3(raw_instruction) {
                    0b000 => i_sys(raw_instruction).ok_or(DecodeError::IllegalInstruction),
                    0b001 => Ok(Self::Csr {
                        op: CsrOp::ReadWrite,
                        dest,
                        csr,
                        src: rs1(raw_instruction),
                    }),
                    0b010 => Ok(Self::Csr {
                        op: CsrOp::ReadSet,
                        dest,
                        csr,
                        src: rs1(raw_instruction),
                    }),
                    0b011 => Ok(Self::Csr {
                        op: CsrOp::ReadClear,
                        dest,
                        csr,
                        src: rs1(raw_instruction),
                    }),
                    0b101 => Ok(Self::CsrImm {
                        op: CsrOp::ReadWrite,
                        dest,
                        csr,
                        immediate: u32::from(rs1(raw_instruction)),
                    }),
                    0b110 => Ok(Self::CsrImm {
                        op: CsrOp::ReadSet,
                        dest,
                        csr,
                        immediate: u32::from(rs1(raw_instruction)),
                    }),
                    0b111 => Ok(Self::CsrImm {
                        op: CsrOp::ReadClear,
                        dest,
                        csr,
                        immediate: u32::from(rs1(raw_instruction)),
                    }),
                    _ => Err(DecodeError::IllegalInstruction),
                }
            }
        }
    }

    /// Returns the memory operand of load, store, and atomic instructions.
    ///
    /// Store-conditional and read-modify-write atomics count as stores. Their effective address is
    /// the base register alone.
    pub fn memory_operand(&self) -> Option<MemoryOperand> {
        let (kind, base, offset) = match *self {
            Self::Load { base, offset, .. } | Self::LoadFp { base, offset, .. } => {
                (AccessKind::Load, base, offset)
            }
            Self::Store { base, offset, .. } | Self::StoreFp { base, offset, .. } => {
                (AccessKind::Store, base, offset)
            }
            Self::LoadReserved { addr, .. } => (AccessKind::Load, addr, 0),
            Self::StoreConditional { addr, .. } | Self::Amo { addr, .. } => {
                (AccessKind::Store, addr, 0)
            }
            _ => return None,
        };
        Some(MemoryOperand { kind, base, offset })
    }
}

/// Returns the length in bytes of the instruction whose lowest 16-bit parcel is `low_parcel`.
///
/// > The base RISC-V ISA has fixed-length 32-bit instructions that must be naturally aligned on
/// > 32-bit boundaries. However, the standard RISC-V encoding scheme is designed to support ISA
/// > extensions with variable-length instructions.
pub fn instruction_length(low_parcel: u16) -> u8 {
    if low_parcel & 0b11 != 0b11 {
        2
    } else if low_parcel & 0b1_1100 != 0b1_1100 {
        4
    } else if low_parcel & 0b11_1111 == 0b01_1111 {
        6
    } else {
        MAX_INSN_LENGTH as u8
    }
}

#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
pub enum DecodeError {
    #[error("instruction has unsupported opcode")]
    UnsupportedOpcode,
    #[error("illegal instruction")]
    IllegalInstruction,
    #[error("instruction is only defined for RV64")]
    Rv64Only,
    #[error("only 32-bit instruction encodings are supported")]
    UnsupportedLength,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::OpImm {
                op,
                dest,
                src,
                immediate,
            } => {
                let name = match op {
                    RegImmOp::Addi => "addi",
                    RegImmOp::Slti => "slti",
                    RegImmOp::Sltiu => "sltiu",
                    RegImmOp::Xori => "xori",
                    RegImmOp::Ori => "ori",
                    RegImmOp::Andi => "andi",
                };
                write!(f, "{name} {dest}, {src}, {immediate}")
            }
            Self::OpShiftImm {
                op,
                dest,
                src,
                shift_amount,
            } => {
                let name = match op {
                    RegShiftImmOp::Slli => "slli",
                    RegShiftImmOp::Srli => "srli",
                    RegShiftImmOp::Srai => "srai",
                };
                write!(f, "{name} {dest}, {src}, {shift_amount}")
            }
            Self::OpImm32 {
                op,
                dest,
                src,
                immediate,
            } => {
                let name = match op {
                    RegImm32Op::Addiw => "addiw",
                    RegImm32Op::Slliw => "slliw",
                    RegImm32Op::Srliw => "srliw",
                    RegImm32Op::Sraiw => "sraiw",
                };
                write!(f, "{name} {dest}, {src}, {immediate}")
            }
            Self::Auipc { dest, immediate } => {
                write!(f, "auipc {dest}, {:#x}", (immediate as u32) >> 12)
            }
            Self::Lui { dest, immediate } => {
                write!(f, "lui {dest}, {:#x}", (immediate as u32) >> 12)
            }
            Self::Op {
                op,
                dest,
                src1,
                src2,
            } => {
                let name = match op {
                    RegRegOp::Add => "add",
                    RegRegOp::Slt => "slt",
                    RegRegOp::Sltu => "sltu",
                    RegRegOp::And => "and",
                    RegRegOp::Or => "or",
                    RegRegOp::Xor => "xor",
                    RegRegOp::Sll => "sll",
                    RegRegOp::Srl => "srl",
                    RegRegOp::Sub => "sub",
                    RegRegOp::Sra => "sra",
                    RegRegOp::Mul => "mul",
                    RegRegOp::Mulh => "mulh",
                    RegRegOp::Mulhsu => "mulhsu",
                    RegRegOp::Mulhu => "mulhu",
                    RegRegOp::Div => "div",
                    RegRegOp::Divu => "divu",
                    RegRegOp::Rem => "rem",
                    RegRegOp::Remu => "remu",
                };
                write!(f, "{name} {dest}, {src1}, {src2}")
            }
            Self::Op32 {
                op,
                dest,
                src1,
                src2,
            } => {
                let name = match op {
                    RegReg32Op::Addw => "addw",
                    RegReg32Op::Subw => "subw",
                    RegReg32Op::Sllw => "sllw",
                    RegReg32Op::Srlw => "srlw",
                    RegReg32Op::Sraw => "sraw",
                    RegReg32Op::Mulw => "mulw",
                    RegReg32Op::Divw => "divw",
                    RegReg32Op::Divuw => "divuw",
                    RegReg32Op::Remw => "remw",
                    RegReg32Op::Remuw => "remuw",
                };
                write!(f, "{name} {dest}, {src1}, {src2}")
            }
            Self::Jal { dest, offset } => write!(f, "jal {dest}, pc {}", Signed(offset)),
            Self::Jalr { dest, base, offset } => write!(f, "jalr {dest}, {offset}({base})"),
            Self::Branch {
                condition,
                src1,
                src2,
                offset,
            } => {
                let name = match condition {
                    BranchCondition::Beq => "beq",
                    BranchCondition::Bne => "bne",
                    BranchCondition::Blt => "blt",
                    BranchCondition::Bltu => "bltu",
                    BranchCondition::Bge => "bge",
                    BranchCondition::Bgeu => "bgeu",
                };
                write!(f, "{name} {src1}, {src2}, pc {}", Signed(offset))
            }
            Self::Load {
                width,
                dest,
                base,
                offset,
            } => {
                let name = match width {
                    LoadWidth::Lb => "lb",
                    LoadWidth::Lh => "lh",
                    LoadWidth::Lw => "lw",
                    LoadWidth::Ld => "ld",
                    LoadWidth::Lbu => "lbu",
                    LoadWidth::Lhu => "lhu",
                    LoadWidth::Lwu => "lwu",
                };
                write!(f, "{name} {dest}, {offset}({base})")
            }
            Self::Store {
                width,
                src,
                base,
                offset,
            } => {
                let name = match width {
                    StoreWidth::Sb => "sb",
                    StoreWidth::Sh => "sh",
                    StoreWidth::Sw => "sw",
                    StoreWidth::Sd => "sd",
                };
                write!(f, "{name} {src}, {offset}({base})")
            }
            Self::LoadFp {
                width,
                dest,
                base,
                offset,
            } => {
                let name = match width {
                    FpWidth::Single => "flw",
                    FpWidth::Double => "fld",
                };
                write!(f, "{name} f{}, {offset}({base})", u8::from(dest))
            }
            Self::StoreFp {
                width,
                src,
                base,
                offset,
            } => {
                let name = match width {
                    FpWidth::Single => "fsw",
                    FpWidth::Double => "fsd",
                };
                write!(f, "{name} f{}, {offset}({base})", u8::from(src))
            }
            Self::LoadReserved { width, dest, addr } => {
                write!(f, "lr.{} {dest}, ({addr})", amo_suffix(width))
            }
            Self::StoreConditional {
                width,
                dest,
                addr,
                src,
            } => write!(f, "sc.{} {dest}, {src}, ({addr})", amo_suffix(width)),
            Self::Amo {
                op,
                width,
                dest,
                addr,
                src,
            } => {
                let name = match op {
                    AmoOp::Swap => "amoswap",
                    AmoOp::Add => "amoadd",
                    AmoOp::Xor => "amoxor",
                    AmoOp::And => "amoand",
                    AmoOp::Or => "amoor",
                    AmoOp::Min => "amomin",
                    AmoOp::Max => "amomax",
                    AmoOp::Minu => "amominu",
                    AmoOp::Maxu => "amomaxu",
                };
                write!(f, "{name}.{} {dest}, {src}, ({addr})", amo_suffix(width))
            }
            Self::Csr { op, dest, csr, src } => {
                let name = match op {
                    CsrOp::ReadWrite => "csrrw",
                    CsrOp::ReadSet => "csrrs",
                    CsrOp::ReadClear => "csrrc",
                };
                write!(f, "{name} {dest}, {csr:#05x}, {src}")
            }
            Self::CsrImm {
                op,
                dest,
                csr,
                immediate,
            } => {
                let name = match op {
                    CsrOp::ReadWrite => "csrrwi",
                    CsrOp::ReadSet => "csrrsi",
                    CsrOp::ReadClear => "csrrci",
                };
                write!(f, "{name} {dest}, {csr:#05x}, {immediate}")
            }
            Self::Fence { .. } => f.write_str("fence"),
            Self::FenceI => f.write_str("fence.i"),
            Self::Ecall => f.write_str("ecall"),
            Self::Ebreak => f.write_str("ebreak"),
            Self::Sret => f.write_str("sret"),
            Self::Mret => f.write_str("mret"),
            Self::Dret => f.write_str("dret"),
            Self::Wfi => f.write_str("wfi"),
        }
    }
}

/// Formats a pc-relative offset as `+ 8` or `- 8`.
struct Signed(i32);

impl fmt::Display for Signed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 < 0 {
            true => write!(f, "- {}", self.0.unsigned_abs()),
            false => write!(f, "+ {}", self.0),
        }
    }
}

fn amo_suffix(width: AmoWidth) -> &'static str {
    match width {
        AmoWidth::Word => "w",
        AmoWidth::Doubleword => "d",
    }
}

/// Returns the 7-bit *opcode* value of the instruction, or `None` if it isn't supported.
fn opcode(raw_instruction: u32) -> Option<Opcode> {
    #[allow(clippy::unusual_byte_groupings)]
    match raw_instruction & 0x7F {
        0b00_000_11 => Some(Opcode::Load),
        0b00_001_11 => Some(Opcode::LoadFp),
        // custom-0
        0b00_011_11 => Some(Opcode::MiscMem),
        0b00_100_11 => Some(Opcode::OpImm),
        0b00_101_11 => Some(Opcode::Auipc),
        0b00_110_11 => Some(Opcode::OpImm32),
        // 48b
        0b01_000_11 => Some(Opcode::Store),
        0b01_001_11 => Some(Opcode::StoreFp),
        // custom-1
        0b01_011_11 => Some(Opcode::Amo),
        0b01_100_11 => Some(Opcode::Op),
        0b01_101_11 => Some(Opcode::Lui),
        0b01_110_11 => Some(Opcode::Op32),
        // 64b
        // MADD, MSUB, NMSUB, NMADD, OP-FP are not supported.
        0b11_000_11 => Some(Opcode::Branch),
        0b11_001_11 => Some(Opcode::Jalr),
        // reserved
        0b11_011_11 => Some(Opcode::Jal),
        0b11_100_11 => Some(Opcode::System),
        _ => None,
    }
}

/// Returns the 5-bit *rd* value for R-type, I-type, U-type, J-type instructions.
fn rd(raw_instruction: u32) -> Specifier {
    Specifier::from_u5(((raw_instruction >> 7) & 0x1F) as u8)
}

/// Returns the 5-bit *rs1* value for R-type, I-type, S-type, B-type instructions.
fn rs1(raw_instruction: u32) -> Specifier {
    Specifier::from_u5(((raw_instruction >> 15) & 0x1F) as u8)
}

/// Returns the 5-bit *rs2* value for R-type, S-type, B-type instructions.
fn rs2(raw_instruction: u32) -> Specifier {
    Specifier::from_u5(((raw_instruction >> 20) & 0x1F) as u8)
}

fn i_funct(raw_instruction: u32) -> Option<RegImmOp> {
    match funct3(raw_instruction) {
        0b000 => Some(RegImmOp::Addi),
        0b010 => Some(RegImmOp::Slti),
        0b011 => Some(RegImmOp::Sltiu),
        0b100 => Some(RegImmOp::Xori),
        0b110 => Some(RegImmOp::Ori),
        0b111 => Some(RegImmOp::Andi),
        _ => None,
    }
}

fn i_shfunct(raw_instruction: u32) -> Option<RegShiftImmOp> {
    // Bits 31:26 select the shift kind; bit 25 is part of the 6-bit shift amount on RV64.
    match (raw_instruction >> 26, funct3(raw_instruction)) {
        (0b000000, 0b001) => Some(RegShiftImmOp::Slli),
        (0b000000, 0b101) => Some(RegShiftImmOp::Srli),
        (0b010000, 0b101) => Some(RegShiftImmOp::Srai),
        _ => None,
    }
}

fn i32_funct(raw_instruction: u32) -> Option<RegImm32Op> {
    match (funct7(raw_instruction), funct3(raw_instruction)) {
        (_, 0b000) => Some(RegImm32Op::Addiw),
        (0b0000000, 0b001) => Some(RegImm32Op::Slliw),
        (0b0000000, 0b101) => Some(RegImm32Op::Srliw),
        (0b0100000, 0b101) => Some(RegImm32Op::Sraiw),
        _ => None,
    }
}

fn i_sys(raw_instruction: u32) -> Option<Instruction> {
    if u8::from(rd(raw_instruction)) != 0 || u8::from(rs1(raw_instruction)) != 0 {
        return None;
    }
    match raw_instruction >> 20 {
        0x000 => Some(Instruction::Ecall),
        0x001 => Some(Instruction::Ebreak),
        0x102 => Some(Instruction::Sret),
        0x105 => Some(Instruction::Wfi),
        0x302 => Some(Instruction::Mret),
        0x7B2 => Some(Instruction::Dret),
        _ => None,
    }
}

fn i_width(raw_instruction: u32) -> Option<LoadWidth> {
    match funct3(raw_instruction) {
        0b000 => Some(LoadWidth::Lb),
        0b001 => Some(LoadWidth::Lh),
        0b010 => Some(LoadWidth::Lw),
        0b011 => Some(LoadWidth::Ld),
        0b100 => Some(LoadWidth::Lbu),
        0b101 => Some(LoadWidth::Lhu),
        0b110 => Some(LoadWidth::Lwu),
        _ => None,
    }
}

fn s_width(raw_instruction: u32) -> Option<StoreWidth> {
    match funct3(raw_instruction) {
        0b000 => Some(StoreWidth::Sb),
        0b001 => Some(StoreWidth::Sh),
        0b010 => Some(StoreWidth::Sw),
        0b011 => Some(StoreWidth::Sd),
        _ => None,
    }
}

fn fp_width(raw_instruction: u32) -> Option<FpWidth> {
    match funct3(raw_instruction) {
        0b010 => Some(FpWidth::Single),
        0b011 => Some(FpWidth::Double),
        _ => None,
    }
}

fn r_funct(raw_instruction: u32) -> Option<RegRegOp> {
    match (funct7(raw_instruction), funct3(raw_instruction)) {
        (0b0000000, 0b000) => Some(RegRegOp::Add),
        (0b0000000, 0b001) => Some(RegRegOp::Sll),
        (0b0000000, 0b010) => Some(RegRegOp::Slt),
        (0b0000000, 0b011) => Some(RegRegOp::Sltu),
        (0b0000000, 0b100) => Some(RegRegOp::Xor),
        (0b0000000, 0b101) => Some(RegRegOp::Srl),
        (0b0000000, 0b110) => Some(RegRegOp::Or),
        (0b0000000, 0b111) => Some(RegRegOp::And),
        (0b0100000, 0b000) => Some(RegRegOp::Sub),
        (0b0100000, 0b101) => Some(RegRegOp::Sra),
        (0b0000001, 0b000) => Some(RegRegOp::Mul),
        (0b0000001, 0b001) => Some(RegRegOp::Mulh),
        (0b0000001, 0b010) => Some(RegRegOp::Mulhsu),
        (0b0000001, 0b011) => Some(RegRegOp::Mulhu),
        (0b0000001, 0b100) => Some(RegRegOp::Div),
        (0b0000001, 0b101) => Some(RegRegOp::Divu),
        (0b0000001, 0b110) => Some(RegRegOp::Rem),
        (0b0000001, 0b111) => Some(RegRegOp::Remu),
        _ => None,
    }
}

fn r32_funct(raw_instruction: u32) -> Option<RegReg32Op> {
    match (funct7(raw_instruction), funct3(raw_instruction)) {
        (0b0000000, 0b000) => Some(RegReg32Op::Addw),
        (0b0100000, 0b000) => Some(RegReg32Op::Subw),
        (0b0000000, 0b001) => Some(RegReg32Op::Sllw),
        (0b0000000, 0b101) => Some(RegReg32Op::Srlw),
        (0b0100000, 0b101) => Some(RegReg32Op::Sraw),
        (0b0000001, 0b000) => Some(RegReg32Op::Mulw),
        (0b0000001, 0b100) => Some(RegReg32Op::Divw),
        (0b0000001, 0b101) => Some(RegReg32Op::Divuw),
        (0b0000001, 0b110) => Some(RegReg32Op::Remw),
        (0b0000001, 0b111) => Some(RegReg32Op::Remuw),
        _ => None,
    }
}

fn b_funct(raw_instruction: u32) -> Option<BranchCondition> {
    match funct3(raw_instruction) {
        0b000 => Some(BranchCondition::Beq),
        0b001 => Some(BranchCondition::Bne),
        0b100 => Some(BranchCondition::Blt),
        0b101 => Some(BranchCondition::Bge),
        0b110 => Some(BranchCondition::Bltu),
        0b111 => Some(BranchCondition::Bgeu),
        _ => None,
    }
}

fn amo_funct(funct5: u8) -> Option<AmoOp> {
    match funct5 {
        0b00000 => Some(AmoOp::Add),
        0b00001 => Some(AmoOp::Swap),
        0b00100 => Some(AmoOp::Xor),
        0b01000 => Some(AmoOp::Or),
        0b01100 => Some(AmoOp::And),
        0b10000 => Some(AmoOp::Min),
        0b10100 => Some(AmoOp::Max),
        0b11000 => Some(AmoOp::Minu),
        0b11100 => Some(AmoOp::Maxu),
        _ => None,
    }
}

/// Returns the 3-bit *funct3* value for R-type, I-type, S-type, B-type instructions.
fn funct3(raw_instruction: u32) -> u8 {
    ((raw_instruction >> 12) & 0b111) as u8
}

/// Returns the 7-bit *funct7* value for R-type instructions.
fn funct7(raw_instruction: u32) -> u8 {
    (raw_instruction >> 25) as u8
}

/// Returns the 5-bit *funct5* value of AMO instructions (ignoring the `aq` and `rl` bits).
fn funct5(raw_instruction: u32) -> u8 {
    (raw_instruction >> 27) as u8
}

/// Returns the 6-bit *shamt* value for shift-immediate instructions.
///
/// On RV32 and for the `*w` variants, only the low 5 bits are valid.
fn shamt(raw_instruction: u32) -> u32 {
    (raw_instruction >> 20) & 0x3F
}

/// Returns the 12-bit I-immediate sign-extended to 32 bits.
fn i_imm(raw_instruction: u32) -> i32 {
    raw_instruction as i32 >> 20
}

/// Returns the 12-bit S-immediate sign-extended to 32 bits.
fn s_imm(raw_instruction: u32) -> i32 {
    let imm_11_5 = (raw_instruction & 0xFE00_0000) as i32 >> 20;
    let imm_4_0 = ((raw_instruction >> 7) & 0x1F) as i32;
    imm_11_5 | imm_4_0
}

/// Returns the 13-bit B-immediate sign-extended to 32 bits.
fn b_imm(raw_instruction: u32) -> i32 {
    let imm_12 = raw_instruction & 0x8000_0000;
    let imm_10_5 = raw_instruction & 0x7E00_0000;
    let imm_4_1 = raw_instruction & 0x0000_0F00;
    let imm_11 = raw_instruction & 0x0000_0080;
    (imm_12 | (imm_11 << 23) | (imm_10_5 >> 1) | (imm_4_1 << 12)) as i32 >> 19
}

/// Returns the signed 32-bit U-immediate.
fn u_imm(raw_instruction: u32) -> i32 {
    (raw_instruction & 0xFFFF_F000) as i32
}

/// Returns the 21-bit J-immediate sign-extended to 32 bits.
fn j_imm(raw_instruction: u32) -> i32 {
    let imm_20 = raw_instruction & 0x8000_0000;
    let imm_10_1 = raw_instruction & 0x7FE0_0000;
    let imm_11 = raw_instruction & 0x0010_0000;
    let imm_19_12 = raw_instruction & 0x000F_F000;
    (imm_20 | (imm_19_12 << 11) | (imm_11 << 2) | (imm_10_1 >> 9)) as i32 >> 11
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Opcode {
    OpImm,
    OpImm32,
    Auipc,
    Lui,
    Op,
    Op32,
    Jal,
    Jalr,
    Branch,
    Load,
    Store,
    LoadFp,
    StoreFp,
    Amo,
    MiscMem,
    System,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::asm;

    fn x(index: u8) -> Specifier {
        Specifier::from_u5(index)
    }

    #[test]
    fn test_i_imm() {
        assert_eq!(0, i_imm(0x0000_0000));
        assert_eq!(-1, i_imm(0xFFF0_0000));
        assert_eq!(2047, i_imm(2047 << 20));
        assert_eq!(-2048, i_imm(0x8000_0000));
        assert_eq!(-42, i_imm((-42_i32 << 20) as u32));
        // Check other bits are ignored
        assert_eq!(0, i_imm(0x000F_FFFF));
        assert_eq!(-1, i_imm(0xFFF1_2345));
    }

    #[test]
    fn test_s_imm() {
        assert_eq!(0x50, s_imm(asm::sw(x(1), x(2), 0x50)));
        assert_eq!(-4, s_imm(asm::sw(x(1), x(2), -4)));
        assert_eq!(-2048, s_imm(asm::sd(x(1), x(2), -2048)));
        assert_eq!(2047, s_imm(asm::sb(x(31), x(31), 2047)));
    }

    #[test]
    fn test_b_and_j_imm() {
        assert_eq!(-8, b_imm(asm::beq(x(1), x(2), -8)));
        assert_eq!(4094, b_imm(asm::bne(x(1), x(2), 4094)));
        assert_eq!(-1_048_576, j_imm(asm::jal(x(1), -1_048_576)));
        assert_eq!(2048, j_imm(asm::jal(x(0), 2048)));
    }

    #[test]
    fn test_decode_base() {
        assert_eq!(
            Ok(Instruction::OpImm {
                op: RegImmOp::Addi,
                dest: x(1),
                src: x(0),
                immediate: 5
            }),
            Instruction::decode(asm::addi(x(1), x(0), 5), Xlen::Rv32)
        );
        assert_eq!(
            Ok(Instruction::Store {
                width: StoreWidth::Sw,
                src: x(5),
                base: x(6),
                offset: 0x50
            }),
            Instruction::decode(asm::sw(x(5), x(6), 0x50), Xlen::Rv64)
        );
    }

    #[test]
    fn test_decode_rv64_only() {
        let ld = asm::ld(x(1), x(2), 8);
        assert_eq!(Err(DecodeError::Rv64Only), Instruction::decode(ld, Xlen::Rv32));
        assert!(Instruction::decode(ld, Xlen::Rv64).is_ok());

        // slli with shamt 32 is only legal on RV64.
        let slli = asm::slli(x(1), x(1), 32);
        assert_eq!(
            Err(DecodeError::IllegalInstruction),
            Instruction::decode(slli, Xlen::Rv32)
        );
        assert_eq!(
            Ok(Instruction::OpShiftImm {
                op: RegShiftImmOp::Slli,
                dest: x(1),
                src: x(1),
                shift_amount: 32
            }),
            Instruction::decode(slli, Xlen::Rv64)
        );
    }

    #[test]
    fn test_decode_atomics() {
        assert_eq!(
            Ok(Instruction::LoadReserved {
                width: AmoWidth::Word,
                dest: x(3),
                addr: x(4)
            }),
            Instruction::decode(asm::lr_w(x(3), x(4)), Xlen::Rv32)
        );
        assert_eq!(
            Ok(Instruction::StoreConditional {
                width: AmoWidth::Word,
                dest: x(3),
                addr: x(4),
                src: x(5)
            }),
            Instruction::decode(asm::sc_w(x(3), x(5), x(4)), Xlen::Rv32)
        );
        assert_eq!(
            Ok(Instruction::Amo {
                op: AmoOp::Add,
                width: AmoWidth::Word,
                dest: x(3),
                addr: x(4),
                src: x(5)
            }),
            Instruction::decode(asm::amoadd_w(x(3), x(5), x(4)), Xlen::Rv32)
        );
    }

    #[test]
    fn test_decode_system() {
        assert_eq!(Ok(Instruction::Ecall), Instruction::decode(asm::ECALL, Xlen::Rv64));
        assert_eq!(Ok(Instruction::Ebreak), Instruction::decode(asm::EBREAK, Xlen::Rv64));
        assert_eq!(Ok(Instruction::Mret), Instruction::decode(asm::MRET, Xlen::Rv64));
        assert_eq!(Ok(Instruction::Dret), Instruction::decode(asm::DRET, Xlen::Rv64));
        assert_eq!(
            Ok(Instruction::Csr {
                op: CsrOp::ReadSet,
                dest: x(10),
                csr: 0xB02,
                src: x(0)
            }),
            Instruction::decode(asm::csrrs(x(10), 0xB02, x(0)), Xlen::Rv64)
        );
    }

    #[test]
    fn test_decode_rejects_compressed() {
        assert_eq!(
            Err(DecodeError::UnsupportedLength),
            Instruction::decode(0x0000_4501, Xlen::Rv64)
        );
        assert_eq!(2, instruction_length(0x4501));
        assert_eq!(4, instruction_length(0x0013));
        assert_eq!(6, instruction_length(0x001F));
        assert_eq!(8, instruction_length(0x003F));
    }

    #[test]
    fn test_memory_operand() {
        let store = Instruction::decode(asm::sw(x(5), x(6), -8), Xlen::Rv32).unwrap();
        assert_eq!(
            Some(MemoryOperand {
                kind: AccessKind::Store,
                base: x(6),
                offset: -8
            }),
            store.memory_operand()
        );
        let sc = Instruction::decode(asm::sc_w(x(3), x(5), x(4)), Xlen::Rv32).unwrap();
        assert_eq!(
            Some(MemoryOperand {
                kind: AccessKind::Store,
                base: x(4),
                offset: 0
            }),
            sc.memory_operand()
        );
        let lr = Instruction::decode(asm::lr_w(x(3), x(4)), Xlen::Rv32).unwrap();
        assert_eq!(Some(AccessKind::Load), lr.memory_operand().map(|m| m.kind));
        assert_eq!(None, Instruction::Ecall.memory_operand());
    }

    #[test]
    fn test_disassembly() {
        let decode = |raw| Instruction::decode(raw, Xlen::Rv64).unwrap().to_string();
        assert_eq!("addi x1, x0, 5", decode(asm::addi(x(1), x(0), 5)));
        assert_eq!("sw x5, 80(x6)", decode(asm::sw(x(5), x(6), 80)));
        assert_eq!("beq x1, x2, pc - 8", decode(asm::beq(x(1), x(2), -8)));
        assert_eq!("csrrw x0, 0x7c0, x1", decode(asm::csrrw(x(0), 0x7C0, x(1))));
        assert_eq!("amoadd.w x3, x5, (x4)", decode(asm::amoadd_w(x(3), x(5), x(4))));
    }
}
