//! Control and Status Register access.
//!
//! Part of the "Zicsr" extension.
//!
//! > RISC-V defines a separate address space of 4096 Control and Status registers associated with
//! > each hart.
//!
//! CSR instructions go through [`Hart::read_csr`] and [`Hart::write_csr`], which check the
//! privilege level, Debug Mode and the counter-enable registers. The host uses
//! [`Hart::get_csr`] and [`Hart::set_csr`], which bypass those checks.

use super::csr::{self, CsrSpecifier};
use super::status::FsState;
use super::trap::{Exception, Trap};
use super::{Counteren, DebugCause, Hart};
use crate::monitor::{ProtectedRegion, RegionIndex};
use crate::system_bus::SystemBus;
use crate::{PrivilegeLevel, Xlen};

impl<B: SystemBus> Hart<B> {
    /// Reads a CSR as the host would, without any access checks.
    ///
    /// Non-existent CSRs (including those of unsupported extensions) raise an illegal instruction
    /// trap.
    pub fn get_csr(&self, specifier: CsrSpecifier) -> Result<u64, Trap> {
        self.csr_value(specifier)
            .ok_or(Trap::exception(Exception::IllegalInstruction))
    }

    /// Writes a CSR as the host would, without access checks other than rejecting read-only and
    /// non-existent CSRs.
    pub fn set_csr(&mut self, specifier: CsrSpecifier, value: u64) -> Result<(), Trap> {
        if csr::is_read_only(specifier) || !self.update_csr(specifier, value, u64::MAX) {
            return Err(Trap::exception(Exception::IllegalInstruction));
        }
        Ok(())
    }

    /// Reads a CSR on behalf of the instruction `bits`.
    pub(super) fn read_csr(&self, specifier: CsrSpecifier, bits: u32) -> Result<u64, Trap> {
        self.check_csr_access(specifier, false, bits)?;
        self.csr_value(specifier)
            .ok_or(Trap::illegal_instruction(bits))
    }

    /// Writes the bits of a CSR selected by `mask` on behalf of the instruction `bits`.
    ///
    /// The instruction writing a counter retires after the write, so the written value is
    /// compensated for that.
    pub(super) fn write_csr(
        &mut self,
        specifier: CsrSpecifier,
        value: u64,
        mask: u64,
        bits: u32,
    ) -> Result<(), Trap> {
        self.check_csr_access(specifier, true, bits)?;
        if !self.update_csr(specifier, value, mask) {
            return Err(Trap::illegal_instruction(bits));
        }
        if matches!(
            specifier,
            csr::MINSTRET | csr::MCYCLE | csr::MINSTRETH | csr::MCYCLEH
        ) {
            self.state.minstret = self.state.minstret.wrapping_sub(1);
        }
        Ok(())
    }

    fn check_csr_access(
        &self,
        specifier: CsrSpecifier,
        write: bool,
        bits: u32,
    ) -> Result<(), Trap> {
        let illegal = Trap::illegal_instruction(bits);
        if !csr::is_valid(specifier) {
            return Err(illegal);
        }
        if self.state.prv < csr::required_privilege_level(specifier) {
            return Err(illegal);
        }
        if write && csr::is_read_only(specifier) {
            return Err(illegal);
        }
        if csr::is_debug_mode_only(specifier) && !self.halted() {
            return Err(illegal);
        }
        if matches!(specifier, csr::FFLAGS | csr::FRM | csr::FCSR)
            && self.state.status.fs() == FsState::Off
        {
            return Err(illegal);
        }
        if !self.counter_accessible(specifier) {
            return Err(illegal);
        }
        Ok(())
    }

    /// Checks `mcounteren` and `scounteren` for accesses to the unprivileged counters.
    ///
    /// > When the CY, TM, IR, or HPMn bit in the mcounteren register is clear, attempts to read the
    /// > cycle, time, instret, or hpmcountern register while executing in S-mode or U-mode will
    /// > cause an illegal instruction exception.
    fn counter_accessible(&self, specifier: CsrSpecifier) -> bool {
        let enabled = |counteren: &Counteren| match specifier {
            csr::CYCLE | csr::CYCLEH => counteren.cy(),
            csr::INSTRET | csr::INSTRETH => counteren.ir(),
            _ => true,
        };
        let control = &self.state.control;
        match self.state.prv {
            PrivilegeLevel::Machine => true,
            PrivilegeLevel::Supervisor => enabled(&control.mcounteren),
            PrivilegeLevel::User => {
                enabled(&control.mcounteren)
                    && (!self.isa.supports_privilege(PrivilegeLevel::Supervisor)
                        || enabled(&control.scounteren))
            }
        }
    }

    /// Returns the value of a CSR, or `None` if it does not exist on this hart.
    fn csr_value(&self, specifier: CsrSpecifier) -> Option<u64> {
        let state = &self.state;
        let xlen = self.xlen();
        let has_s = self.isa.supports_privilege(PrivilegeLevel::Supervisor);
        let has_u = self.isa.supports_privilege(PrivilegeLevel::User);
        let has_f = self.isa.supports('f');
        let rv32 = xlen == Xlen::Rv32;
        let mideleg = state.control.mideleg.read();

        let value = match specifier {
            csr::FFLAGS if has_f => state.fflags as u64,
            csr::FRM if has_f => state.frm as u64,
            csr::FCSR if has_f => ((state.frm as u64) << 5) | state.fflags as u64,
            csr::CYCLE | csr::INSTRET | csr::MCYCLE | csr::MINSTRET => state.minstret,
            csr::CYCLEH | csr::INSTRETH | csr::MCYCLEH | csr::MINSTRETH if rv32 => {
                state.minstret >> 32
            }

            csr::SSTATUS if has_s => state.status.read_sstatus(xlen),
            csr::SIE if has_s => state.interrupts.read_sie(mideleg),
            csr::STVEC if has_s => state.control.stvec.read(),
            csr::SCOUNTEREN if has_s => state.control.scounteren.read() as u64,
            csr::SSCRATCH if has_s => state.trap.read_sscratch(),
            csr::SEPC if has_s => state.trap.read_sepc(),
            csr::SCAUSE if has_s => state.trap.scause.read(xlen),
            csr::STVAL if has_s => state.trap.read_stval(),
            csr::SIP if has_s => state.interrupts.read_sip(mideleg),
            csr::SATP if has_s => state.satp,

            csr::MVENDORID | csr::MARCHID | csr::MIMPID => 0,
            csr::MHARTID => self.id,
            csr::MSTATUS => state.status.read_mstatus(xlen),
            csr::MISA => self.isa.misa(),
            csr::MEDELEG if has_s => state.control.medeleg.read(),
            csr::MIDELEG if has_s => mideleg,
            csr::MIE => state.interrupts.read_mie(),
            csr::MTVEC => state.control.mtvec.read(),
            csr::MCOUNTEREN if has_u => state.control.mcounteren.read() as u64,
            csr::MSCRATCH => state.trap.read_mscratch(),
            csr::MEPC => state.trap.read_mepc(),
            csr::MCAUSE => state.trap.mcause.read(xlen),
            csr::MTVAL => state.trap.read_mtval(),
            csr::MIP => state.interrupts.read_mip(),

            csr::TSELECT => state.triggers.read_tselect(),
            csr::TDATA1 => state.triggers.read_tdata1(xlen),
            csr::TDATA2 => state.triggers.read_tdata2(),
            csr::TDATA3 => 0,
            csr::DCSR => state.dcsr.read() as u64,
            csr::DPC => state.dpc,
            csr::DSCRATCH => state.dscratch,

            csr::ISOLATION_SW => self.monitor.enable_word(),
            csr::PCODE_REGION0..=csr::PCODE_REGION3 => {
                self.monitor.region(region_index(specifier)?).encode() as u64
            }
            _ => return None,
        };
        Some(xlen.mask(value))
    }

    /// Writes the bits of a CSR selected by `mask`. Returns `false` if the CSR does not exist on
    /// this hart. Read-only CSRs exist but ignore writes.
    fn update_csr(&mut self, specifier: CsrSpecifier, value: u64, mask: u64) -> bool {
        // Check existence first, so that no state changes for unknown CSRs.
        if self.csr_value(specifier).is_none() {
            return false;
        }
        let xlen = self.xlen();
        let value = xlen.mask(value);
        let mask = xlen.mask(mask);
        let isa = &self.isa;
        let state = &mut self.state;
        let mideleg = state.control.mideleg.read();
        let rv32 = xlen == Xlen::Rv32;

        match specifier {
            csr::FFLAGS => {
                state.fflags = masked(state.fflags as u64, value, mask & 0x1F) as u8;
                state.status.set_fs(FsState::Dirty);
            }
            csr::FRM => {
                state.frm = masked(state.frm as u64, value, mask & 0x7) as u8;
                state.status.set_fs(FsState::Dirty);
            }
            csr::FCSR => {
                let fcsr = ((state.frm as u64) << 5) | state.fflags as u64;
                let fcsr = masked(fcsr, value, mask & 0xFF);
                state.fflags = (fcsr & 0x1F) as u8;
                state.frm = (fcsr >> 5) as u8;
                state.status.set_fs(FsState::Dirty);
            }
            csr::MCYCLE | csr::MINSTRET if rv32 => {
                state.minstret = masked(state.minstret, value, mask & 0xFFFF_FFFF);
            }
            csr::MCYCLE | csr::MINSTRET => {
                state.minstret = masked(state.minstret, value, mask);
            }
            csr::MCYCLEH | csr::MINSTRETH => {
                state.minstret = masked(state.minstret, value << 32, mask << 32);
            }

            csr::SSTATUS => state.status.write_sstatus(value, mask, isa),
            csr::SIE => state.interrupts.write_sie(value, mask, mideleg),
            csr::STVEC => state.control.stvec.write(value, mask),
            csr::SCOUNTEREN => state.control.scounteren.write(value as u32, mask as u32),
            csr::SSCRATCH => state.trap.write_sscratch(value, mask),
            csr::SEPC => state.trap.write_sepc(value, mask),
            csr::SCAUSE => state.trap.scause.write(value, mask, xlen),
            csr::STVAL => state.trap.write_stval(value, mask),
            csr::SIP => state.interrupts.write_sip(value, mask, mideleg),
            csr::SATP => state.satp = masked(state.satp, value, mask),

            csr::MSTATUS => state.status.write_mstatus(value, mask, isa),
            csr::MEDELEG => state.control.medeleg.write(value, mask),
            csr::MIDELEG => state.control.mideleg.write(value, mask),
            csr::MIE => state.interrupts.write_mie(value, mask),
            csr::MTVEC => state.control.mtvec.write(value, mask),
            csr::MCOUNTEREN => state.control.mcounteren.write(value as u32, mask as u32),
            csr::MSCRATCH => state.trap.write_mscratch(value, mask),
            csr::MEPC => state.trap.write_mepc(value, mask),
            csr::MCAUSE => state.trap.mcause.write(value, mask, xlen),
            csr::MTVAL => state.trap.write_mtval(value, mask),
            csr::MIP => state.interrupts.write_mip(value, mask),

            csr::TSELECT => {
                let tselect = masked(state.triggers.read_tselect(), value, mask);
                state.triggers.write_tselect(tselect);
            }
            csr::TDATA1 => {
                let halted = state.dcsr.cause() != DebugCause::None;
                let tdata1 = masked(state.triggers.read_tdata1(xlen), value, mask);
                if state.triggers.write_tdata1(tdata1, xlen, halted) {
                    self.icache.flush();
                }
            }
            csr::TDATA2 => {
                let halted = state.dcsr.cause() != DebugCause::None;
                let tdata2 = masked(state.triggers.read_tdata2(), value, mask);
                if state.triggers.write_tdata2(tdata2, halted) {
                    self.icache.flush();
                }
            }
            csr::DCSR => {
                let dcsr = masked(state.dcsr.read() as u64, value, mask) as u32;
                state.dcsr.write(dcsr, |level| isa.supports_privilege(level));
            }
            csr::DPC => state.dpc = masked(state.dpc, value, mask) & !1,
            csr::DSCRATCH => state.dscratch = masked(state.dscratch, value, mask),

            csr::ISOLATION_SW => {
                let enable_word = masked(self.monitor.enable_word(), value, mask);
                self.monitor.set_enable_word(enable_word);
            }
            csr::PCODE_REGION0..=csr::PCODE_REGION3 => {
                if let Some(index) = region_index(specifier) {
                    let old = self.monitor.region(index).encode() as u64;
                    let region = ProtectedRegion::decode(masked(old, value, mask) as u32);
                    // Locked regions ignore writes.
                    self.monitor.set_region(index, region);
                }
            }
            // Read-only CSRs, TDATA3 and misa are WARL with a single legal value.
            _ => {}
        }
        true
    }
}

fn masked(old: u64, value: u64, mask: u64) -> u64 {
    old & !mask | value & mask
}

fn region_index(specifier: CsrSpecifier) -> Option<RegionIndex> {
    RegionIndex::new(specifier.checked_sub(csr::PCODE_REGION0)? as usize)
}
