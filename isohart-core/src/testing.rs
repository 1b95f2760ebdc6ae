//! Helpers shared by the unit tests: an assembler for the handful of instructions the tests use,
//! and a hart with RAM preloaded with a program.

use crate::hart::Config;
use crate::resources::ram::Ram;
use crate::Hart;
use std::ops::{Deref, DerefMut};

pub mod asm {
    //! Encoders for single instructions. Immediates are taken as signed values and truncated to
    //! their field.

    use crate::hart::csr::CsrSpecifier;
    use crate::registers::Specifier;

    pub const NOP: u32 = 0x0000_0013;
    pub const ECALL: u32 = 0x0000_0073;
    pub const EBREAK: u32 = 0x0010_0073;
    pub const SRET: u32 = 0x1020_0073;
    pub const MRET: u32 = 0x3020_0073;
    pub const WFI: u32 = 0x1050_0073;
    pub const DRET: u32 = 0x7B20_0073;
    pub const FENCE_I: u32 = 0x0000_100F;

    pub fn x(index: u8) -> Specifier {
        Specifier::from_u5(index)
    }

    fn reg(specifier: Specifier) -> u32 {
        u32::from(specifier)
    }

    fn r_type(funct7: u32, rs2: Specifier, rs1: Specifier, funct3: u32, rd: Specifier, opcode: u32) -> u32 {
        funct7 << 25 | reg(rs2) << 20 | reg(rs1) << 15 | funct3 << 12 | reg(rd) << 7 | opcode
    }

    fn i_type(imm: i32, rs1: Specifier, funct3: u32, rd: Specifier, opcode: u32) -> u32 {
        ((imm as u32) & 0xFFF) << 20 | reg(rs1) << 15 | funct3 << 12 | reg(rd) << 7 | opcode
    }

    fn s_type(imm: i32, rs2: Specifier, rs1: Specifier, funct3: u32) -> u32 {
        let imm = imm as u32;
        (imm >> 5 & 0x7F) << 25
            | reg(rs2) << 20
            | reg(rs1) << 15
            | funct3 << 12
            | (imm & 0x1F) << 7
            | 0b010_0011
    }

    fn b_type(offset: i32, rs1: Specifier, rs2: Specifier, funct3: u32) -> u32 {
        let imm = offset as u32;
        (imm >> 12 & 1) << 31
            | (imm >> 5 & 0x3F) << 25
            | reg(rs2) << 20
            | reg(rs1) << 15
            | funct3 << 12
            | (imm >> 1 & 0xF) << 8
            | (imm >> 11 & 1) << 7
            | 0b110_0011
    }

    pub fn addi(rd: Specifier, rs1: Specifier, imm: i32) -> u32 {
        i_type(imm, rs1, 0b000, rd, 0b001_0011)
    }

    pub fn slli(rd: Specifier, rs1: Specifier, shamt: u32) -> u32 {
        i_type(shamt as i32, rs1, 0b001, rd, 0b001_0011)
    }

    pub fn srli(rd: Specifier, rs1: Specifier, shamt: u32) -> u32 {
        i_type(shamt as i32, rs1, 0b101, rd, 0b001_0011)
    }

    pub fn srai(rd: Specifier, rs1: Specifier, shamt: u32) -> u32 {
        i_type((0x400 | shamt) as i32, rs1, 0b101, rd, 0b001_0011)
    }

    /// `imm` is the value loaded into `rd`, its low 12 bits are ignored.
    pub fn lui(rd: Specifier, imm: u32) -> u32 {
        imm & 0xFFFF_F000 | reg(rd) << 7 | 0b011_0111
    }

    pub fn add(rd: Specifier, rs1: Specifier, rs2: Specifier) -> u32 {
        r_type(0, rs2, rs1, 0b000, rd, 0b011_0011)
    }

    pub fn slt(rd: Specifier, rs1: Specifier, rs2: Specifier) -> u32 {
        r_type(0, rs2, rs1, 0b010, rd, 0b011_0011)
    }

    pub fn sltu(rd: Specifier, rs1: Specifier, rs2: Specifier) -> u32 {
        r_type(0, rs2, rs1, 0b011, rd, 0b011_0011)
    }

    pub fn mulh(rd: Specifier, rs1: Specifier, rs2: Specifier) -> u32 {
        r_type(1, rs2, rs1, 0b001, rd, 0b011_0011)
    }

    pub fn mulhu(rd: Specifier, rs1: Specifier, rs2: Specifier) -> u32 {
        r_type(1, rs2, rs1, 0b011, rd, 0b011_0011)
    }

    pub fn div(rd: Specifier, rs1: Specifier, rs2: Specifier) -> u32 {
        r_type(1, rs2, rs1, 0b100, rd, 0b011_0011)
    }

    pub fn rem(rd: Specifier, rs1: Specifier, rs2: Specifier) -> u32 {
        r_type(1, rs2, rs1, 0b110, rd, 0b011_0011)
    }

    pub fn divw(rd: Specifier, rs1: Specifier, rs2: Specifier) -> u32 {
        r_type(1, rs2, rs1, 0b100, rd, 0b011_1011)
    }

    pub fn jal(rd: Specifier, offset: i32) -> u32 {
        let imm = offset as u32;
        (imm >> 20 & 1) << 31
            | (imm >> 1 & 0x3FF) << 21
            | (imm >> 11 & 1) << 20
            | (imm >> 12 & 0xFF) << 12
            | reg(rd) << 7
            | 0b110_1111
    }

    pub fn jalr(rd: Specifier, rs1: Specifier, offset: i32) -> u32 {
        i_type(offset, rs1, 0b000, rd, 0b110_0111)
    }

    pub fn beq(rs1: Specifier, rs2: Specifier, offset: i32) -> u32 {
        b_type(offset, rs1, rs2, 0b000)
    }

    pub fn bne(rs1: Specifier, rs2: Specifier, offset: i32) -> u32 {
        b_type(offset, rs1, rs2, 0b001)
    }

    pub fn blt(rs1: Specifier, rs2: Specifier, offset: i32) -> u32 {
        b_type(offset, rs1, rs2, 0b100)
    }

    pub fn bltu(rs1: Specifier, rs2: Specifier, offset: i32) -> u32 {
        b_type(offset, rs1, rs2, 0b110)
    }

    pub fn lb(rd: Specifier, base: Specifier, offset: i32) -> u32 {
        i_type(offset, base, 0b000, rd, 0b000_0011)
    }

    pub fn lw(rd: Specifier, base: Specifier, offset: i32) -> u32 {
        i_type(offset, base, 0b010, rd, 0b000_0011)
    }

    pub fn ld(rd: Specifier, base: Specifier, offset: i32) -> u32 {
        i_type(offset, base, 0b011, rd, 0b000_0011)
    }

    pub fn lbu(rd: Specifier, base: Specifier, offset: i32) -> u32 {
        i_type(offset, base, 0b100, rd, 0b000_0011)
    }

    pub fn lwu(rd: Specifier, base: Specifier, offset: i32) -> u32 {
        i_type(offset, base, 0b110, rd, 0b000_0011)
    }

    pub fn sb(src: Specifier, base: Specifier, offset: i32) -> u32 {
        s_type(offset, src, base, 0b000)
    }

    pub fn sh(src: Specifier, base: Specifier, offset: i32) -> u32 {
        s_type(offset, src, base, 0b001)
    }

    pub fn sw(src: Specifier, base: Specifier, offset: i32) -> u32 {
        s_type(offset, src, base, 0b010)
    }

    pub fn sd(src: Specifier, base: Specifier, offset: i32) -> u32 {
        s_type(offset, src, base, 0b011)
    }

    pub fn fld(rd: Specifier, base: Specifier, offset: i32) -> u32 {
        i_type(offset, base, 0b011, rd, 0b000_0111)
    }

    pub fn lr_w(rd: Specifier, rs1: Specifier) -> u32 {
        r_type(0b00010 << 2, x(0), rs1, 0b010, rd, 0b010_1111)
    }

    pub fn sc_w(rd: Specifier, rs2: Specifier, rs1: Specifier) -> u32 {
        r_type(0b00011 << 2, rs2, rs1, 0b010, rd, 0b010_1111)
    }

    pub fn amoadd_w(rd: Specifier, rs2: Specifier, rs1: Specifier) -> u32 {
        r_type(0, rs2, rs1, 0b010, rd, 0b010_1111)
    }

    fn csr_type(rd: Specifier, csr: CsrSpecifier, rs1: Specifier, funct3: u32) -> u32 {
        u32::from(csr) << 20 | reg(rs1) << 15 | funct3 << 12 | reg(rd) << 7 | 0b111_0011
    }

    pub fn csrrw(rd: Specifier, csr: CsrSpecifier, rs1: Specifier) -> u32 {
        csr_type(rd, csr, rs1, 0b001)
    }

    pub fn csrrs(rd: Specifier, csr: CsrSpecifier, rs1: Specifier) -> u32 {
        csr_type(rd, csr, rs1, 0b010)
    }

    pub fn csrrc(rd: Specifier, csr: CsrSpecifier, rs1: Specifier) -> u32 {
        csr_type(rd, csr, rs1, 0b011)
    }
}

/// A hart with `0x10000` bytes of RAM at [`TestHart::BASE`], where it starts executing.
#[derive(Debug)]
pub struct TestHart(Hart<Ram>);

impl TestHart {
    pub const BASE: u64 = 0x8000_0000;
    const RAM_SIZE: usize = 0x10000;

    pub fn config(isa: &str, modes: &str) -> Config {
        Config {
            isa: String::from(isa),
            privilege_modes: String::from(modes),
            reset_vector: Self::BASE,
            ..Config::default()
        }
    }

    pub fn with_config(config: Config, code: &[u32]) -> Self {
        let mut ram = Ram::new(Self::BASE, Self::RAM_SIZE).unwrap();
        let bytes: Vec<u8> = code.iter().flat_map(|word| word.to_le_bytes()).collect();
        assert!(ram.load(Self::BASE, &bytes));
        Self(Hart::new(0, config, ram).unwrap())
    }

    pub fn with_isa(isa: &str, modes: &str, code: &[u32]) -> Self {
        Self::with_config(Self::config(isa, modes), code)
    }

    pub fn rv64(code: &[u32]) -> Self {
        Self::with_isa("rv64imafd", "msu", code)
    }

    pub fn rv32(code: &[u32]) -> Self {
        Self::with_isa("rv32imafd", "msu", code)
    }

    pub fn rv32_with_modes(code: &[u32], modes: &str) -> Self {
        Self::with_isa("rv32imafd", modes, code)
    }
}

impl Deref for TestHart {
    type Target = Hart<Ram>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for TestHart {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

#[cfg(test)]
mod tests {
    use super::asm::*;

    #[test]
    fn test_known_encodings() {
        assert_eq!(0x0050_0093, addi(x(1), x(0), 5));
        assert_eq!(0x0020_81B3, add(x(3), x(1), x(2)));
        assert_eq!(0x00B5_2823, sw(x(11), x(10), 16));
        assert_eq!(0x0000_006F, jal(x(0), 0));
        assert_eq!(0xFE00_9EE3, bne(x(1), x(0), -4));
        assert_eq!(0x3400_2173, csrrs(x(2), 0x340, x(0)));
    }
}
