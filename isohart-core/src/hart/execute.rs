//! Semantics of the individual instructions.
//!
//! Every instruction evaluates to its next `pc`, or to one of [`PC_SERIALIZE_BEFORE`] and
//! [`PC_SERIALIZE_AFTER`]. Only the dispatch loop writes the `pc` register for regular
//! instructions.

use super::{
    csr, Exception, ExecutionError, FsState, Hart, RegisterWrite, Trap, PC_SERIALIZE_AFTER,
    PC_SERIALIZE_BEFORE,
};
use crate::hart::csr::CsrSpecifier;
use crate::instruction::{
    AmoOp, AmoWidth, BranchCondition, CsrOp, FpWidth, Instruction, LoadWidth, RegImm32Op,
    RegImmOp, RegReg32Op, RegRegOp, RegShiftImmOp, StoreWidth,
};
use crate::registers::{FRegister, Specifier};
use crate::system_bus::SystemBus;
use crate::{Alignment, PrivilegeLevel};

pub(super) type ExecutionResult = Result<u64, ExecutionError>;

#[derive(Debug)]
pub(super) struct Executor<'h, B: SystemBus> {
    pub hart: &'h mut Hart<B>,
    /// Address of the executing instruction.
    pub pc: u64,
    /// Raw encoding of the executing instruction, the trap value of illegal instruction traps.
    pub bits: u32,
    /// Length of the executing instruction in bytes.
    pub length: u8,
}

impl<'h, B: SystemBus> Executor<'h, B> {
    pub fn execute(&mut self, instruction: Instruction) -> ExecutionResult {
        match instruction {
            Instruction::OpImm {
                op,
                dest,
                src,
                immediate,
            } => self.op_imm(op, dest, src, immediate),
            Instruction::OpShiftImm {
                op,
                dest,
                src,
                shift_amount,
            } => self.op_shift_imm(op, dest, src, shift_amount),
            Instruction::OpImm32 {
                op,
                dest,
                src,
                immediate,
            } => self.op_imm_32(op, dest, src, immediate),
            Instruction::Auipc { dest, immediate } => self.auipc(dest, immediate),
            Instruction::Lui { dest, immediate } => self.lui(dest, immediate),
            Instruction::Op {
                op,
                dest,
                src1,
                src2,
            } => self.op(op, dest, src1, src2),
            Instruction::Op32 {
                op,
                dest,
                src1,
                src2,
            } => self.op_32(op, dest, src1, src2),
            Instruction::Jal { dest, offset } => self.jal(dest, offset),
            Instruction::Jalr { dest, base, offset } => self.jalr(dest, base, offset),
            Instruction::Branch {
                condition,
                src1,
                src2,
                offset,
            } => self.branch(condition, src1, src2, offset),
            Instruction::Load {
                width,
                dest,
                base,
                offset,
            } => self.load(width, dest, base, offset),
            Instruction::Store {
                width,
                src,
                base,
                offset,
            } => self.store(width, src, base, offset),
            Instruction::LoadFp {
                width,
                dest,
                base,
                offset,
            } => self.load_fp(width, dest, base, offset),
            Instruction::StoreFp {
                width,
                src,
                base,
                offset,
            } => self.store_fp(width, src, base, offset),
            Instruction::LoadReserved { width, dest, addr } => {
                self.load_reserved(width, dest, addr)
            }
            Instruction::StoreConditional {
                width,
                dest,
                addr,
                src,
            } => self.store_conditional(width, dest, addr, src),
            Instruction::Amo {
                op,
                width,
                dest,
                addr,
                src,
            } => self.amo(op, width, dest, addr, src),
            Instruction::Csr { op, dest, csr, src } => {
                let value = self.x(src);
                self.csr_op(op, dest, csr, value, src != Specifier::X0)
            }
            Instruction::CsrImm {
                op,
                dest,
                csr,
                immediate,
            } => self.csr_op(op, dest, csr, u64::from(immediate), immediate != 0),
            // Memory accesses are performed in order, so fences have nothing to wait for.
            Instruction::Fence { .. } => Ok(self.npc()),
            Instruction::FenceI => self.fence_i(),
            Instruction::Ecall => self.ecall(),
            Instruction::Ebreak => self.ebreak(),
            Instruction::Sret => self.sret(),
            Instruction::Mret => self.mret(),
            Instruction::Dret => self.dret(),
            Instruction::Wfi => self.wfi(),
        }
    }

    fn op_imm(
        &mut self,
        op: RegImmOp,
        dest: Specifier,
        src: Specifier,
        immediate: i32,
    ) -> ExecutionResult {
        let s = self.x(src);
        let imm = immediate as i64 as u64;
        let value = match op {
            RegImmOp::Addi => s.wrapping_add(imm),
            RegImmOp::Slti => (self.signed(s) < i64::from(immediate)) as u64,
            RegImmOp::Sltiu => (self.unsigned(s) < self.unsigned(imm)) as u64,
            RegImmOp::Xori => s ^ imm,
            RegImmOp::Ori => s | imm,
            RegImmOp::Andi => s & imm,
        };
        self.set_x(dest, value);
        Ok(self.npc())
    }

    /// The decoder guarantees `shift_amount < XLEN`.
    fn op_shift_imm(
        &mut self,
        op: RegShiftImmOp,
        dest: Specifier,
        src: Specifier,
        shift_amount: u32,
    ) -> ExecutionResult {
        let s = self.x(src);
        let value = match op {
            RegShiftImmOp::Slli => s << shift_amount,
            RegShiftImmOp::Srli => self.unsigned(s) >> shift_amount,
            RegShiftImmOp::Srai => (self.signed(s) >> shift_amount) as u64,
        };
        self.set_x(dest, value);
        Ok(self.npc())
    }

    fn op_imm_32(
        &mut self,
        op: RegImm32Op,
        dest: Specifier,
        src: Specifier,
        immediate: i32,
    ) -> ExecutionResult {
        let s = self.x(src) as u32;
        let shamt = immediate as u32 & 0x1F;
        let value = match op {
            RegImm32Op::Addiw => s.wrapping_add(immediate as u32),
            RegImm32Op::Slliw => s << shamt,
            RegImm32Op::Srliw => s >> shamt,
            RegImm32Op::Sraiw => ((s as i32) >> shamt) as u32,
        };
        self.set_x(dest, value as i32 as u64);
        Ok(self.npc())
    }

    /// > AUIPC (add upper immediate to pc) is used to build pc-relative addresses and uses the
    /// > U-type format. AUIPC forms a 32-bit offset from the U-immediate, filling in the lowest
    /// > 12 bits with zeros, adds this offset to the address of the AUIPC instruction, then places
    /// > the result in register rd.
    fn auipc(&mut self, dest: Specifier, immediate: i32) -> ExecutionResult {
        let offset = (immediate & !0xFFF) as i64;
        self.set_x(dest, self.pc.wrapping_add_signed(offset));
        Ok(self.npc())
    }

    fn lui(&mut self, dest: Specifier, immediate: i32) -> ExecutionResult {
        self.set_x(dest, (immediate & !0xFFF) as i64 as u64);
        Ok(self.npc())
    }

    fn op(
        &mut self,
        op: RegRegOp,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    ) -> ExecutionResult {
        if is_mul_div(op) {
            self.require_extension('m')?;
        }
        let (s1, s2) = (self.x(src1), self.x(src2));
        let xlen = self.hart.xlen();
        let shamt = (s2 & u64::from(xlen.bits() - 1)) as u32;
        let (signed1, signed2) = (self.signed(s1), self.signed(s2));
        let (unsigned1, unsigned2) = (self.unsigned(s1), self.unsigned(s2));
        let high = |product: i128| (product >> xlen.bits()) as u64;
        let value = match op {
            RegRegOp::Add => s1.wrapping_add(s2),
            RegRegOp::Sub => s1.wrapping_sub(s2),
            RegRegOp::Slt => (self.signed(s1) < self.signed(s2)) as u64,
            RegRegOp::Sltu => (self.unsigned(s1) < self.unsigned(s2)) as u64,
            RegRegOp::And => s1 & s2,
            RegRegOp::Or => s1 | s2,
            RegRegOp::Xor => s1 ^ s2,
            RegRegOp::Sll => s1 << shamt,
            RegRegOp::Srl => self.unsigned(s1) >> shamt,
            RegRegOp::Sra => (signed1 >> shamt) as u64,
            // > MUL performs an XLEN-bit×XLEN-bit multiplication of rs1 by rs2 and places the
            // > lower XLEN bits in the destination register. MULH, MULHU, and MULHSU perform the
            // > same multiplication but return the upper XLEN bits of the full 2×XLEN-bit
            // > product.
            RegRegOp::Mul => s1.wrapping_mul(s2),
            RegRegOp::Mulh => high(i128::from(signed1) * i128::from(signed2)),
            RegRegOp::Mulhsu => high(i128::from(signed1) * i128::from(unsigned2)),
            RegRegOp::Mulhu => {
                ((u128::from(unsigned1) * u128::from(unsigned2)) >> xlen.bits()) as u64
            }
            // > The quotient of division by zero has all bits set, and the remainder of division
            // > by zero equals the dividend.
            RegRegOp::Div => match signed2 {
                0 => u64::MAX,
                _ => signed1.wrapping_div(signed2) as u64,
            },
            RegRegOp::Divu => unsigned1.checked_div(unsigned2).unwrap_or(u64::MAX),
            RegRegOp::Rem => match signed2 {
                0 => s1,
                _ => signed1.wrapping_rem(signed2) as u64,
            },
            RegRegOp::Remu => unsigned1.checked_rem(unsigned2).unwrap_or(s1),
        };
        self.set_x(dest, value);
        Ok(self.npc())
    }

    fn op_32(
        &mut self,
        op: RegReg32Op,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    ) -> ExecutionResult {
        if !matches!(
            op,
            RegReg32Op::Addw
                | RegReg32Op::Subw
                | RegReg32Op::Sllw
                | RegReg32Op::Srlw
                | RegReg32Op::Sraw
        ) {
            self.require_extension('m')?;
        }
        let (s1, s2) = (self.x(src1) as u32, self.x(src2) as u32);
        let shamt = s2 & 0x1F;
        let value = match op {
            RegReg32Op::Addw => s1.wrapping_add(s2),
            RegReg32Op::Subw => s1.wrapping_sub(s2),
            RegReg32Op::Sllw => s1 << shamt,
            RegReg32Op::Srlw => s1 >> shamt,
            RegReg32Op::Sraw => ((s1 as i32) >> shamt) as u32,
            RegReg32Op::Mulw => s1.wrapping_mul(s2),
            RegReg32Op::Divw => match s2 {
                0 => u32::MAX,
                _ => (s1 as i32).wrapping_div(s2 as i32) as u32,
            },
            RegReg32Op::Divuw => s1.checked_div(s2).unwrap_or(u32::MAX),
            RegReg32Op::Remw => match s2 {
                0 => s1,
                _ => (s1 as i32).wrapping_rem(s2 as i32) as u32,
            },
            RegReg32Op::Remuw => s1.checked_rem(s2).unwrap_or(s1),
        };
        self.set_x(dest, value as i32 as u64);
        Ok(self.npc())
    }

    /// > The jump and link (JAL) instruction uses the J-type format, where the J-immediate encodes
    /// > a signed offset in multiples of 2 bytes. The offset is sign-extended and added to the
    /// > address of the jump instruction to form the jump target address.
    fn jal(&mut self, dest: Specifier, offset: i32) -> ExecutionResult {
        let target = self.jump_target(self.pc.wrapping_add_signed(offset as i64))?;
        self.set_x(dest, self.npc());
        Ok(target)
    }

    /// > The target address is obtained by adding the sign-extended 12-bit I-immediate to the
    /// > register rs1, then setting the least-significant bit of the result to zero.
    fn jalr(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        // `base` is read before `dest` is written, they may be the same register.
        let target = self.x(base).wrapping_add_signed(offset as i64) & !1;
        let target = self.jump_target(target)?;
        self.set_x(dest, self.npc());
        Ok(target)
    }

    fn branch(
        &mut self,
        condition: BranchCondition,
        src1: Specifier,
        src2: Specifier,
        offset: i32,
    ) -> ExecutionResult {
        let (s1, s2) = (self.x(src1), self.x(src2));
        let taken = match condition {
            BranchCondition::Beq => s1 == s2,
            BranchCondition::Bne => s1 != s2,
            BranchCondition::Blt => self.signed(s1) < self.signed(s2),
            BranchCondition::Bltu => self.unsigned(s1) < self.unsigned(s2),
            BranchCondition::Bge => self.signed(s1) >= self.signed(s2),
            BranchCondition::Bgeu => self.unsigned(s1) >= self.unsigned(s2),
        };
        match taken {
            true => Ok(self.jump_target(self.pc.wrapping_add_signed(offset as i64))?),
            false => Ok(self.npc()),
        }
    }

    fn load(
        &mut self,
        width: LoadWidth,
        dest: Specifier,
        base: Specifier,
        offset: i32,
    ) -> ExecutionResult {
        let address = self.effective_address(base, offset);
        let mut mmu = self.hart.mmu();
        let value = match width {
            LoadWidth::Lb => mmu.load_u8(address)? as i8 as u64,
            LoadWidth::Lh => mmu.load_u16(address)? as i16 as u64,
            LoadWidth::Lw => mmu.load_u32(address)? as i32 as u64,
            LoadWidth::Ld => mmu.load_u64(address)?,
            LoadWidth::Lbu => u64::from(mmu.load_u8(address)?),
            LoadWidth::Lhu => u64::from(mmu.load_u16(address)?),
            LoadWidth::Lwu => u64::from(mmu.load_u32(address)?),
        };
        self.set_x(dest, value);
        Ok(self.npc())
    }

    fn store(
        &mut self,
        width: StoreWidth,
        src: Specifier,
        base: Specifier,
        offset: i32,
    ) -> ExecutionResult {
        let address = self.effective_address(base, offset);
        let value = self.x(src);
        let mut mmu = self.hart.mmu();
        match width {
            StoreWidth::Sb => mmu.store_u8(address, value as u8)?,
            StoreWidth::Sh => mmu.store_u16(address, value as u16)?,
            StoreWidth::Sw => mmu.store_u32(address, value as u32)?,
            StoreWidth::Sd => mmu.store_u64(address, value)?,
        }
        Ok(self.npc())
    }

    fn load_fp(
        &mut self,
        width: FpWidth,
        dest: Specifier,
        base: Specifier,
        offset: i32,
    ) -> ExecutionResult {
        self.require_fp(width)?;
        let address = self.effective_address(base, offset);
        let mut mmu = self.hart.mmu();
        let value = match width {
            FpWidth::Single => FRegister::Single(mmu.load_u32(address)?),
            FpWidth::Double => FRegister::Double(mmu.load_u64(address)?),
        };
        let state = &mut self.hart.state;
        state.registers.set_f(dest, value);
        state.status.set_fs(FsState::Dirty);
        state.last_write = Some(RegisterWrite::F(dest, value));
        Ok(self.npc())
    }

    fn store_fp(
        &mut self,
        width: FpWidth,
        src: Specifier,
        base: Specifier,
        offset: i32,
    ) -> ExecutionResult {
        self.require_fp(width)?;
        let address = self.effective_address(base, offset);
        let value = self.hart.state.registers.f(src);
        let mut mmu = self.hart.mmu();
        match width {
            FpWidth::Single => mmu.store_u32(address, value.single())?,
            FpWidth::Double => mmu.store_u64(address, value.double())?,
        }
        Ok(self.npc())
    }

    /// > LR.W loads a word from the address in rs1, places the sign-extended value in rd, and
    /// > registers a reservation set, a set of bytes that subsumes the bytes in the addressed
    /// > word.
    fn load_reserved(
        &mut self,
        width: AmoWidth,
        dest: Specifier,
        addr: Specifier,
    ) -> ExecutionResult {
        self.require_extension('a')?;
        let address = self.effective_address(addr, 0);
        if !is_naturally_aligned(address, width.size()) {
            return Err(Trap::new(Exception::LoadAddressMisaligned, address).into());
        }
        let mut mmu = self.hart.mmu();
        let value = match width {
            AmoWidth::Word => mmu.load_u32(address)? as i32 as u64,
            AmoWidth::Doubleword => mmu.load_u64(address)?,
        };
        self.hart.state.load_reservation = Some(address);
        self.set_x(dest, value);
        Ok(self.npc())
    }

    /// > SC.W conditionally writes a word in rs2 to the address in rs1: the SC.W succeeds only if
    /// > the reservation is still valid and the reservation set contains the bytes being written.
    /// > If the SC.W succeeds, the instruction writes the word in rs2 to memory, and it writes zero
    /// > to rd. If the SC.W fails, the instruction does not write to memory, and it writes a
    /// > nonzero value to rd. Regardless of success or failure, executing an SC.W instruction
    /// > invalidates any reservation held by this hart.
    fn store_conditional(
        &mut self,
        width: AmoWidth,
        dest: Specifier,
        addr: Specifier,
        src: Specifier,
    ) -> ExecutionResult {
        self.require_extension('a')?;
        let address = self.effective_address(addr, 0);
        if !is_naturally_aligned(address, width.size()) {
            return Err(Trap::new(Exception::StoreOrAmoAddressMisaligned, address).into());
        }
        let reserved = self.hart.state.load_reservation == Some(address);
        if reserved {
            let value = self.x(src);
            let mut mmu = self.hart.mmu();
            match width {
                AmoWidth::Word => mmu.store_u32(address, value as u32)?,
                AmoWidth::Doubleword => mmu.store_u64(address, value)?,
            }
        }
        self.hart.yield_load_reservation();
        self.set_x(dest, u64::from(!reserved));
        Ok(self.npc())
    }

    fn amo(
        &mut self,
        op: AmoOp,
        width: AmoWidth,
        dest: Specifier,
        addr: Specifier,
        src: Specifier,
    ) -> ExecutionResult {
        self.require_extension('a')?;
        let address = self.effective_address(addr, 0);
        let operand = self.x(src);
        let mut mmu = self.hart.mmu();
        let old = match width {
            AmoWidth::Word => {
                let operand = operand as u32;
                let old = mmu.amo_u32(address, |value| match op {
                    AmoOp::Swap => operand,
                    AmoOp::Add => value.wrapping_add(operand),
                    AmoOp::Xor => value ^ operand,
                    AmoOp::And => value & operand,
                    AmoOp::Or => value | operand,
                    AmoOp::Min => (value as i32).min(operand as i32) as u32,
                    AmoOp::Max => (value as i32).max(operand as i32) as u32,
                    AmoOp::Minu => value.min(operand),
                    AmoOp::Maxu => value.max(operand),
                })?;
                old as i32 as u64
            }
            AmoWidth::Doubleword => mmu.amo_u64(address, |value| match op {
                AmoOp::Swap => operand,
                AmoOp::Add => value.wrapping_add(operand),
                AmoOp::Xor => value ^ operand,
                AmoOp::And => value & operand,
                AmoOp::Or => value | operand,
                AmoOp::Min => (value as i64).min(operand as i64) as u64,
                AmoOp::Max => (value as i64).max(operand as i64) as u64,
                AmoOp::Minu => value.min(operand),
                AmoOp::Maxu => value.max(operand),
            })?,
        };
        self.set_x(dest, old);
        Ok(self.npc())
    }

    /// Shared by the register and immediate forms of the Zicsr instructions.
    ///
    /// > For both CSRRS and CSRRC, if rs1=x0, then the instruction will not write to the CSR at
    /// > all, and so shall not cause any of the side effects that might otherwise occur on a CSR
    /// > write.
    ///
    /// Every CSR write serializes the hart, and the counters can only be accessed in a serialized
    /// state.
    fn csr_op(
        &mut self,
        op: CsrOp,
        dest: Specifier,
        csr: CsrSpecifier,
        operand: u64,
        has_operand: bool,
    ) -> ExecutionResult {
        if csr::is_counter(csr) {
            if !self.hart.state.serialized {
                return Ok(PC_SERIALIZE_BEFORE);
            }
            self.hart.state.serialized = false;
        }

        let old = self.hart.read_csr(csr, self.bits)?;
        let write = match op {
            CsrOp::ReadWrite => Some((operand, u64::MAX)),
            CsrOp::ReadSet => has_operand.then_some((u64::MAX, operand)),
            CsrOp::ReadClear => has_operand.then_some((0, operand)),
        };
        if let Some((value, mask)) = write {
            self.hart.write_csr(csr, value, mask, self.bits)?;
        }
        self.set_x(dest, old);

        match write {
            Some(_) => Ok(self.serialize(self.npc())),
            None => Ok(self.npc()),
        }
    }

    fn fence_i(&mut self) -> ExecutionResult {
        self.hart.icache.flush();
        Ok(self.npc())
    }

    fn ecall(&mut self) -> ExecutionResult {
        Err(Trap::exception(Exception::environment_call_from(self.hart.state.prv)).into())
    }

    /// > Used by debuggers to cause control to be transferred back to a debugging environment. It
    /// > generates a breakpoint exception and performs no other operation.
    fn ebreak(&mut self) -> ExecutionResult {
        Err(Trap::new(Exception::Breakpoint, self.pc).into())
    }

    fn sret(&mut self) -> ExecutionResult {
        let state = &self.hart.state;
        let allowed = self.hart.isa.supports_privilege(PrivilegeLevel::Supervisor)
            && match state.prv {
                PrivilegeLevel::Machine => true,
                PrivilegeLevel::Supervisor => !state.status.tsr(),
                PrivilegeLevel::User => false,
            };
        if !allowed {
            return Err(self.illegal_instruction());
        }

        let target = self.hart.state.trap.read_sepc();
        let status = &mut self.hart.state.status;
        let previous = status.spp();
        status.set_sie(status.spie());
        status.set_spie(true);
        status.set_spp(PrivilegeLevel::User);
        self.hart.set_privilege(previous);
        Ok(self.serialize(target))
    }

    fn mret(&mut self) -> ExecutionResult {
        if self.hart.state.prv != PrivilegeLevel::Machine {
            return Err(self.illegal_instruction());
        }

        let target = self.hart.state.trap.read_mepc();
        let least = self.hart.legalize_privilege(PrivilegeLevel::User);
        let status = &mut self.hart.state.status;
        let previous = status.mpp();
        status.set_mie(status.mpie());
        status.set_mpie(true);
        status.set_mpp(least);
        self.hart.set_privilege(previous);
        Ok(self.serialize(target))
    }

    /// Leaves Debug Mode. Only legal while halted.
    fn dret(&mut self) -> ExecutionResult {
        if !self.hart.halted() {
            return Err(self.illegal_instruction());
        }
        let step = self.hart.state.dcsr.step();
        self.hart.resume(step);
        Ok(PC_SERIALIZE_AFTER)
    }

    /// Waiting for an interrupt is implemented as a no-op that ends the current `step` call.
    ///
    /// > When TW=0, the WFI instruction may execute in lower privilege modes when not prevented for
    /// > some other reason. When TW=1, then if WFI is executed in any less-privileged mode, and it
    /// > does not complete within an implementation-specific, bounded time limit, the WFI
    /// > instruction causes an illegal instruction exception.
    fn wfi(&mut self) -> ExecutionResult {
        let required = match self.hart.state.status.tw() {
            true => PrivilegeLevel::Machine,
            false => PrivilegeLevel::Supervisor,
        };
        if self.hart.state.prv < required {
            return Err(self.illegal_instruction());
        }
        Ok(self.serialize(self.npc()))
    }

    /// Writes `target` to `pc` and makes the instruction end the current `step` call.
    fn serialize(&mut self, target: u64) -> u64 {
        let target = self.hart.xlen().mask(target);
        *self.hart.state.registers.pc_mut() = target;
        PC_SERIALIZE_AFTER
    }

    fn npc(&self) -> u64 {
        self.hart
            .xlen()
            .mask(self.pc.wrapping_add(u64::from(self.length)))
    }

    /// Checks the alignment of a jump or taken branch.
    ///
    /// > The JAL and JALR instructions will generate an instruction-address-misaligned exception
    /// > if the target address is not aligned to a four-byte boundary.
    fn jump_target(&self, target: u64) -> Result<u64, Trap> {
        let target = self.hart.xlen().mask(target);
        if target & 0b10 != 0 && !self.hart.supports_extension('c') {
            return Err(Trap::new(Exception::InstructionAddressMisaligned, target));
        }
        Ok(target)
    }

    fn effective_address(&self, base: Specifier, offset: i32) -> u64 {
        self.hart.effective_address(base, offset)
    }

    fn x(&self, specifier: Specifier) -> u64 {
        self.hart.state.registers.x(specifier)
    }

    /// Writes `x` register `dest`, sign-extending `value` from XLEN bits.
    fn set_x(&mut self, dest: Specifier, value: u64) {
        let value = self.hart.xlen().sext(value);
        self.hart.state.registers.set_x(dest, value);
        if dest != Specifier::X0 {
            self.hart.state.last_write = Some(RegisterWrite::X(dest, value));
        }
    }

    /// Interprets the low XLEN bits of `value` as a signed number.
    fn signed(&self, value: u64) -> i64 {
        self.hart.xlen().sext(value) as i64
    }

    /// Interprets the low XLEN bits of `value` as an unsigned number.
    fn unsigned(&self, value: u64) -> u64 {
        self.hart.xlen().mask(value)
    }

    fn require_extension(&self, extension: char) -> Result<(), Trap> {
        match self.hart.supports_extension(extension) {
            true => Ok(()),
            false => Err(Trap::illegal_instruction(self.bits)),
        }
    }

    /// Floating-point instructions need the extension of their width, and the FP unit turned on.
    fn require_fp(&self, width: FpWidth) -> Result<(), Trap> {
        let extension = match width {
            FpWidth::Single => 'f',
            FpWidth::Double => 'd',
        };
        self.require_extension(extension)?;
        match self.hart.state.status.fs() {
            FsState::Off => Err(Trap::illegal_instruction(self.bits)),
            _ => Ok(()),
        }
    }

    fn illegal_instruction(&self) -> ExecutionError {
        Trap::illegal_instruction(self.bits).into()
    }
}

fn is_mul_div(op: RegRegOp) -> bool {
    matches!(
        op,
        RegRegOp::Mul
            | RegRegOp::Mulh
            | RegRegOp::Mulhsu
            | RegRegOp::Mulhu
            | RegRegOp::Div
            | RegRegOp::Divu
            | RegRegOp::Rem
            | RegRegOp::Remu
    )
}

fn is_naturally_aligned(address: u64, size: u64) -> bool {
    Alignment::natural_for_size(size).is_some_and(|alignment| alignment.is_aligned(address))
}

impl<B: SystemBus> Hart<B> {
    /// Computes `x[base] + offset`, wrapped to XLEN bits.
    pub(super) fn effective_address(&self, base: Specifier, offset: i32) -> u64 {
        self.xlen()
            .mask(self.state.registers.x(base).wrapping_add_signed(offset as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hart::DebugCause;
    use crate::testing::{asm, TestHart};
    use asm::x;

    #[test]
    fn test_arithmetic() {
        let mut hart = TestHart::rv64(&[
            asm::addi(x(1), x(0), -5),
            asm::addi(x(2), x(0), 3),
            asm::add(x(3), x(1), x(2)),
            asm::sltu(x(4), x(2), x(1)),
            asm::slt(x(5), x(2), x(1)),
            asm::srai(x(6), x(1), 1),
            asm::srli(x(7), x(1), 60),
            asm::lui(x(8), 0x8000_0000),
        ]);
        hart.step(8);
        let registers = hart.registers();
        assert_eq!(-5i64 as u64, registers.x(x(1)));
        assert_eq!(-2i64 as u64, registers.x(x(3)));
        assert_eq!(1, registers.x(x(4)));
        assert_eq!(0, registers.x(x(5)));
        assert_eq!(-3i64 as u64, registers.x(x(6)));
        assert_eq!(0xF, registers.x(x(7)));
        assert_eq!(0xFFFF_FFFF_8000_0000, registers.x(x(8)));
    }

    #[test]
    fn test_rv32_results_are_sign_extended() {
        let mut hart = TestHart::rv32(&[
            asm::lui(x(1), 0x8000_0000),
            asm::addi(x(2), x(1), -1),
            asm::srli(x(3), x(1), 31),
        ]);
        hart.step(3);
        assert_eq!(0xFFFF_FFFF_8000_0000, hart.registers().x(x(1)));
        assert_eq!(0x7FFF_FFFF, hart.registers().x(x(2)));
        assert_eq!(1, hart.registers().x(x(3)));
    }

    #[test]
    fn test_mul_div_edge_cases() {
        let mut hart = TestHart::rv64(&[
            asm::addi(x(1), x(0), 7),
            asm::div(x(2), x(1), x(0)),
            asm::rem(x(3), x(1), x(0)),
            asm::addi(x(4), x(0), -1),
            asm::mulh(x(5), x(4), x(4)),
            asm::mulhu(x(6), x(4), x(4)),
            asm::divw(x(7), x(1), x(4)),
        ]);
        hart.step(7);
        let registers = hart.registers();
        assert_eq!(u64::MAX, registers.x(x(2)));
        assert_eq!(7, registers.x(x(3)));
        assert_eq!(0, registers.x(x(5)));
        assert_eq!(u64::MAX - 1, registers.x(x(6)));
        assert_eq!(-7i64 as u64, registers.x(x(7)));
    }

    #[test]
    fn test_mul_requires_m() {
        let mut hart = TestHart::with_isa("rv64i", "msu", &[asm::div(x(2), x(1), x(0))]);
        hart.step(1);
        assert_eq!(Exception::ILLEGAL_INSTRUCTION, hart.get_csr(csr::MCAUSE).unwrap());
        assert_eq!(
            u64::from(asm::div(x(2), x(1), x(0))),
            hart.get_csr(csr::MTVAL).unwrap()
        );
    }

    #[test]
    fn test_jumps_link_and_check_alignment() {
        let mut hart = TestHart::rv64(&[
            asm::jal(x(1), 8),
            asm::addi(x(5), x(0), 1),
            asm::jalr(x(1), x(1), 6),
        ]);
        hart.step(2);
        assert_eq!(TestHart::BASE + 4, hart.registers().x(x(1)));
        // x1 + 6 = BASE + 10, which is not 4-byte aligned without C.
        assert_eq!(
            Exception::INSTRUCTION_ADDRESS_MISALIGNED,
            hart.get_csr(csr::MCAUSE).unwrap()
        );
        assert_eq!(TestHart::BASE + 10, hart.get_csr(csr::MTVAL).unwrap());
        assert_eq!(TestHart::BASE + 8, hart.get_csr(csr::MEPC).unwrap());
        assert_eq!(0, hart.registers().x(x(5)));
        // The faulting jalr did not write its link register.
        assert_eq!(TestHart::BASE + 4, hart.registers().x(x(1)));
    }

    #[test]
    fn test_branches() {
        let mut hart = TestHart::rv64(&[
            asm::addi(x(1), x(0), -1),
            asm::bltu(x(0), x(1), 8),
            asm::addi(x(2), x(0), 1),
            asm::blt(x(0), x(1), 8),
            asm::addi(x(3), x(0), 1),
        ]);
        hart.step(4);
        assert_eq!(0, hart.registers().x(x(2)));
        assert_eq!(1, hart.registers().x(x(3)));
        assert_eq!(TestHart::BASE + 20, hart.registers().pc());
    }

    #[test]
    fn test_loads_and_stores() {
        let data = TestHart::BASE + 0x800;
        let mut hart = TestHart::rv64(&[
            asm::addi(x(1), x(0), -2),
            asm::sd(x(1), x(10), 0),
            asm::lb(x(2), x(10), 0),
            asm::lbu(x(3), x(10), 0),
            asm::lwu(x(4), x(10), 4),
            asm::sh(x(0), x(10), 2),
            asm::ld(x(5), x(10), 0),
        ]);
        hart.state_mut().registers.set_x(x(10), data);
        hart.step(7);
        let registers = hart.registers();
        assert_eq!(-2i64 as u64, registers.x(x(2)));
        assert_eq!(0xFE, registers.x(x(3)));
        assert_eq!(0xFFFF_FFFF, registers.x(x(4)));
        assert_eq!(0xFFFF_FFFF_0000_FFFE, registers.x(x(5)));
    }

    #[test]
    fn test_misaligned_load_traps() {
        let mut hart = TestHart::rv64(&[asm::lw(x(1), x(10), 2)]);
        hart.state_mut().registers.set_x(x(10), TestHart::BASE + 0x800);
        hart.step(1);
        assert_eq!(Exception::LOAD_ADDRESS_MISALIGNED, hart.get_csr(csr::MCAUSE).unwrap());
        assert_eq!(TestHart::BASE + 0x802, hart.get_csr(csr::MTVAL).unwrap());
    }

    #[test]
    fn test_lr_sc() {
        let data = TestHart::BASE + 0x800;
        let mut hart = TestHart::rv64(&[
            asm::lr_w(x(1), x(10)),
            asm::addi(x(1), x(1), 1),
            asm::sc_w(x(2), x(1), x(10)),
            asm::sc_w(x(3), x(1), x(10)),
        ]);
        hart.state_mut().registers.set_x(x(10), data);
        hart.bus_mut().load(data, &41u32.to_le_bytes());
        hart.step(4);
        assert_eq!(0, hart.registers().x(x(2)));
        // The reservation was consumed by the first sc.w.
        assert_eq!(1, hart.registers().x(x(3)));
        assert_eq!(None, hart.state().load_reservation);
        assert_eq!(42, hart.mmu().load_u32(data).unwrap());
    }

    #[test]
    fn test_amo() {
        let data = TestHart::BASE + 0x800;
        let mut hart = TestHart::rv64(&[
            asm::addi(x(1), x(0), -3),
            asm::amoadd_w(x(2), x(1), x(10)),
        ]);
        hart.state_mut().registers.set_x(x(10), data);
        hart.bus_mut().load(data, &0x8000_0000u32.to_le_bytes());
        hart.step(2);
        assert_eq!(0xFFFF_FFFF_8000_0000, hart.registers().x(x(2)));
        assert_eq!(0x7FFF_FFFD, hart.mmu().load_u32(data).unwrap());
    }

    #[test]
    fn test_amo_must_be_aligned() {
        let mut hart = TestHart::rv64(&[asm::amoadd_w(x(2), x(1), x(10))]);
        hart.state_mut().registers.set_x(x(10), TestHart::BASE + 0x802);
        hart.step(1);
        assert_eq!(
            Exception::STORE_OR_AMO_ADDRESS_MISALIGNED,
            hart.get_csr(csr::MCAUSE).unwrap()
        );
    }

    #[test]
    fn test_csr_ops() {
        let mut hart = TestHart::rv64(&[
            asm::addi(x(1), x(0), 0x5),
            asm::csrrw(x(2), csr::MSCRATCH, x(1)),
            asm::csrrs(x(3), csr::MSCRATCH, x(0)),
            asm::csrrc(x(0), csr::MSCRATCH, x(1)),
        ]);
        hart.set_csr(csr::MSCRATCH, 0xF0).unwrap();
        // Each CSR write ends the call.
        hart.step(10);
        hart.step(10);
        assert_eq!(0xF0, hart.registers().x(x(2)));
        assert_eq!(0x5, hart.registers().x(x(3)));
        assert_eq!(0, hart.get_csr(csr::MSCRATCH).unwrap());
        assert_eq!(TestHart::BASE + 16, hart.registers().pc());
    }

    #[test]
    fn test_csr_write_ends_step() {
        let mut hart = TestHart::rv64(&[
            asm::csrrw(x(0), csr::MSCRATCH, x(0)),
            asm::addi(x(1), x(0), 1),
        ]);
        hart.step(10);
        assert_eq!(TestHart::BASE + 4, hart.registers().pc());
        assert_eq!(1, hart.get_csr(csr::MINSTRET).unwrap());
        assert_eq!(0, hart.registers().x(x(1)));
    }

    #[test]
    fn test_mret_restores_privilege() {
        let mut hart = TestHart::rv64(&[asm::MRET]);
        hart.set_csr(csr::MEPC, 0x8000_0100).unwrap();
        hart.state_mut().status.set_mpp(PrivilegeLevel::User);
        hart.state_mut().status.set_mpie(true);
        hart.step(1);
        assert_eq!(PrivilegeLevel::User, hart.privilege());
        assert_eq!(0x8000_0100, hart.registers().pc());
        assert!(hart.state().status.mie());
        assert_eq!(PrivilegeLevel::User, hart.state().status.mpp());
    }

    #[test]
    fn test_mret_is_illegal_below_machine_mode() {
        let mut hart = TestHart::rv64(&[asm::MRET]);
        hart.set_privilege(PrivilegeLevel::Supervisor);
        hart.step(1);
        assert_eq!(PrivilegeLevel::Machine, hart.privilege());
        assert_eq!(Exception::ILLEGAL_INSTRUCTION, hart.get_csr(csr::MCAUSE).unwrap());
        assert_eq!(u64::from(asm::MRET), hart.get_csr(csr::MTVAL).unwrap());
    }

    #[test]
    fn test_sret_honours_tsr() {
        let mut hart = TestHart::rv64(&[asm::SRET]);
        // TSR
        hart.set_csr(csr::MSTATUS, 1 << 22).unwrap();
        hart.set_privilege(PrivilegeLevel::Supervisor);
        hart.step(1);
        assert_eq!(Exception::ILLEGAL_INSTRUCTION, hart.get_csr(csr::MCAUSE).unwrap());
    }

    #[test]
    fn test_wfi_requires_supervisor_mode() {
        let mut hart = TestHart::rv64(&[asm::WFI]);
        hart.step(1);
        assert_eq!(TestHart::BASE + 4, hart.registers().pc());

        let mut hart = TestHart::rv64(&[asm::WFI]);
        hart.set_privilege(PrivilegeLevel::User);
        hart.step(1);
        assert_eq!(Exception::ILLEGAL_INSTRUCTION, hart.get_csr(csr::MCAUSE).unwrap());
    }

    #[test]
    fn test_dret_outside_debug_mode_is_illegal() {
        let mut hart = TestHart::rv64(&[asm::DRET]);
        hart.step(1);
        assert_eq!(Exception::ILLEGAL_INSTRUCTION, hart.get_csr(csr::MCAUSE).unwrap());
        assert_eq!(DebugCause::None, hart.state().dcsr.cause());
    }

    #[test]
    fn test_fp_load_needs_fs() {
        let data = TestHart::BASE + 0x800;
        let mut hart = TestHart::rv64(&[asm::fld(x(1), x(10), 0), asm::fld(x(1), x(10), 0)]);
        hart.state_mut().registers.set_x(x(10), data);
        hart.bus_mut().load(data, &1.5f64.to_bits().to_le_bytes());
        hart.step(1);
        assert_eq!(
            FRegister::Double(1.5f64.to_bits()),
            hart.registers().f(x(1))
        );
        assert_eq!(FsState::Dirty, hart.state().status.fs());

        hart.state_mut().status.set_fs(FsState::Off);
        hart.step(1);
        assert_eq!(Exception::ILLEGAL_INSTRUCTION, hart.get_csr(csr::MCAUSE).unwrap());
    }

    #[test]
    fn test_ecall_cause_follows_privilege() {
        let mut hart = TestHart::rv64(&[asm::ECALL]);
        hart.set_privilege(PrivilegeLevel::Supervisor);
        hart.step(1);
        assert_eq!(
            Exception::ENVIRONMENT_CALL_FROM_S_MODE,
            hart.get_csr(csr::MCAUSE).unwrap()
        );
    }

    #[test]
    fn test_ebreak_tval_is_pc() {
        let mut hart = TestHart::rv64(&[asm::EBREAK]);
        hart.step(1);
        assert_eq!(Exception::BREAKPOINT, hart.get_csr(csr::MCAUSE).unwrap());
        assert_eq!(TestHart::BASE, hart.get_csr(csr::MTVAL).unwrap());
    }

    #[test]
    fn test_undecodable_instruction_traps_with_bits() {
        let mut hart = TestHart::rv64(&[0xFFFF_FFFF]);
        hart.step(1);
        assert_eq!(Exception::ILLEGAL_INSTRUCTION, hart.get_csr(csr::MCAUSE).unwrap());
        assert_eq!(0xFFFF_FFFF, hart.get_csr(csr::MTVAL).unwrap());
    }
}
