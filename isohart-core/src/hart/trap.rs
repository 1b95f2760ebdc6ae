use super::debug::DebugCause;
use super::Hart;
use crate::system_bus::SystemBus;
use crate::{PrivilegeLevel, Xlen};
use log::debug;
use std::fmt;
use thiserror::Error;

/// A synchronous exception or a delivered interrupt, together with its trap value.
///
/// > We use the term trap to refer to the transfer of control to a trap handler caused by either an
/// > exception or an interrupt.
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
#[error("{cause} (tval {tval:#x})")]
pub struct Trap {
    pub cause: TrapCause,
    /// Value written to `mtval`/`stval`. Zero when the cause has no trap value.
    pub tval: u64,
}

impl Trap {
    pub fn new(cause: impl Into<TrapCause>, tval: u64) -> Self {
        Self {
            cause: cause.into(),
            tval,
        }
    }

    pub fn exception(exception: Exception) -> Self {
        Self::new(exception, 0)
    }

    pub fn interrupt(interrupt: Interrupt) -> Self {
        Self::new(interrupt, 0)
    }

    pub fn illegal_instruction(bits: u32) -> Self {
        Self::new(Exception::IllegalInstruction, bits as u64)
    }

    pub fn is_breakpoint(&self) -> bool {
        self.cause == TrapCause::Exception(Exception::Breakpoint)
    }
}

impl From<Exception> for Trap {
    fn from(value: Exception) -> Self {
        Self::exception(value)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TrapCause {
    Exception(Exception),
    Interrupt(Interrupt),
}

impl TrapCause {
    /// Returns the exception code, without the interrupt bit.
    pub fn code(&self) -> u64 {
        match self {
            Self::Exception(exception) => exception.code(),
            Self::Interrupt(interrupt) => interrupt.code(),
        }
    }

    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Interrupt(_))
    }
}

impl fmt::Display for TrapCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exception(exception) => write!(f, "exception {exception:?}"),
            Self::Interrupt(interrupt) => write!(f, "interrupt {interrupt:?}"),
        }
    }
}

impl From<Exception> for TrapCause {
    fn from(value: Exception) -> Self {
        Self::Exception(value)
    }
}

impl From<Interrupt> for TrapCause {
    fn from(value: Interrupt) -> Self {
        Self::Interrupt(value)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Exception {
    /// Instruction address is not on a two-byte aligned boundary in memory.
    InstructionAddressMisaligned,
    InstructionAccessFault,
    /// Generic exception used to communicate one of many possible scenarios:
    ///
    /// - Attempt to decode a reserved or unsupported instruction.
    /// - Attempt to access a non-existent CSR.
    /// - Attempt to access a CSR without the appropriate privilege level.
    /// - Attempt to write to a read-only CSR.
    IllegalInstruction,
    Breakpoint,
    LoadAddressMisaligned,
    LoadAccessFault,
    StoreOrAmoAddressMisaligned,
    StoreOrAmoAccessFault,
    EnvironmentCallFromUMode,
    EnvironmentCallFromSMode,
    EnvironmentCallFromMMode,
    InstructionPageFault,
    LoadPageFault,
    StoreOrAmoPageFault,
}

impl Exception {
    pub const INSTRUCTION_ADDRESS_MISALIGNED: u64 = 0;
    pub const INSTRUCTION_ACCESS_FAULT: u64 = 1;
    pub const ILLEGAL_INSTRUCTION: u64 = 2;
    pub const BREAKPOINT: u64 = 3;
    pub const LOAD_ADDRESS_MISALIGNED: u64 = 4;
    pub const LOAD_ACCESS_FAULT: u64 = 5;
    pub const STORE_OR_AMO_ADDRESS_MISALIGNED: u64 = 6;
    pub const STORE_OR_AMO_ACCESS_FAULT: u64 = 7;
    pub const ENVIRONMENT_CALL_FROM_U_MODE: u64 = 8;
    pub const ENVIRONMENT_CALL_FROM_S_MODE: u64 = 9;
    pub const ENVIRONMENT_CALL_FROM_M_MODE: u64 = 11;
    pub const INSTRUCTION_PAGE_FAULT: u64 = 12;
    pub const LOAD_PAGE_FAULT: u64 = 13;
    pub const STORE_OR_AMO_PAGE_FAULT: u64 = 15;

    /// Returns the exception code (cause) for this exception.
    pub fn code(&self) -> u64 {
        match self {
            Self::InstructionAddressMisaligned => Self::INSTRUCTION_ADDRESS_MISALIGNED,
            Self::InstructionAccessFault => Self::INSTRUCTION_ACCESS_FAULT,
            Self::IllegalInstruction => Self::ILLEGAL_INSTRUCTION,
            Self::Breakpoint => Self::BREAKPOINT,
            Self::LoadAddressMisaligned => Self::LOAD_ADDRESS_MISALIGNED,
            Self::LoadAccessFault => Self::LOAD_ACCESS_FAULT,
            Self::StoreOrAmoAddressMisaligned => Self::STORE_OR_AMO_ADDRESS_MISALIGNED,
            Self::StoreOrAmoAccessFault => Self::STORE_OR_AMO_ACCESS_FAULT,
            Self::EnvironmentCallFromUMode => Self::ENVIRONMENT_CALL_FROM_U_MODE,
            Self::EnvironmentCallFromSMode => Self::ENVIRONMENT_CALL_FROM_S_MODE,
            Self::EnvironmentCallFromMMode => Self::ENVIRONMENT_CALL_FROM_M_MODE,
            Self::InstructionPageFault => Self::INSTRUCTION_PAGE_FAULT,
            Self::LoadPageFault => Self::LOAD_PAGE_FAULT,
            Self::StoreOrAmoPageFault => Self::STORE_OR_AMO_PAGE_FAULT,
        }
    }

    /// Returns the environment call exception raised by `ecall` from privilege level `level`.
    pub fn environment_call_from(level: PrivilegeLevel) -> Self {
        match level {
            PrivilegeLevel::User => Self::EnvironmentCallFromUMode,
            PrivilegeLevel::Supervisor => Self::EnvironmentCallFromSMode,
            PrivilegeLevel::Machine => Self::EnvironmentCallFromMMode,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Interrupt {
    SupervisorSoftwareInterrupt,
    MachineSoftwareInterrupt,
    SupervisorTimerInterrupt,
    MachineTimerInterrupt,
    SupervisorExternalInterrupt,
    MachineExternalInterrupt,
}

impl Interrupt {
    /// All interrupts, from highest to lowest priority.
    ///
    /// > Multiple simultaneous interrupts destined for M-mode are handled in the following
    /// > decreasing priority order: MEI, MSI, MTI, SEI, SSI, STI.
    pub const PRIORITY_ORDER: [Self; 6] = [
        Self::MachineExternalInterrupt,
        Self::MachineSoftwareInterrupt,
        Self::MachineTimerInterrupt,
        Self::SupervisorExternalInterrupt,
        Self::SupervisorSoftwareInterrupt,
        Self::SupervisorTimerInterrupt,
    ];

    /// Returns the exception code (cause) for this interrupt.
    pub fn code(&self) -> u64 {
        match self {
            Self::SupervisorSoftwareInterrupt => 1,
            Self::MachineSoftwareInterrupt => 3,
            Self::SupervisorTimerInterrupt => 5,
            Self::MachineTimerInterrupt => 7,
            Self::SupervisorExternalInterrupt => 9,
            Self::MachineExternalInterrupt => 11,
        }
    }
}

/// Trap handling CSRs of both M-mode and S-mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrapRegisters {
    mscratch: u64,
    mepc: u64,
    pub mcause: Cause,
    mtval: u64,

    sscratch: u64,
    sepc: u64,
    pub scause: Cause,
    stval: u64,
}

impl Default for TrapRegisters {
    fn default() -> Self {
        Self::new()
    }
}

impl TrapRegisters {
    pub fn new() -> Self {
        Self {
            mscratch: 0,
            mepc: 0,
            mcause: Cause::new(),
            mtval: 0,

            sscratch: 0,
            sepc: 0,
            scause: Cause::new(),
            stval: 0,
        }
    }

    pub fn read_mscratch(&self) -> u64 {
        self.mscratch
    }

    pub fn write_mscratch(&mut self, value: u64, mask: u64) {
        self.mscratch = self.mscratch & !mask | value & mask;
    }

    pub fn read_mepc(&self) -> u64 {
        self.mepc
    }

    pub fn write_mepc(&mut self, value: u64, mask: u64) {
        // Bit 0 of an epc register is always zero.
        self.mepc = (self.mepc & !mask | value & mask) & !0b1;
    }

    pub fn read_mtval(&self) -> u64 {
        self.mtval
    }

    pub fn write_mtval(&mut self, value: u64, mask: u64) {
        self.mtval = self.mtval & !mask | value & mask;
    }

    pub fn read_sscratch(&self) -> u64 {
        self.sscratch
    }

    pub fn write_sscratch(&mut self, value: u64, mask: u64) {
        self.sscratch = self.sscratch & !mask | value & mask;
    }

    pub fn read_sepc(&self) -> u64 {
        self.sepc
    }

    pub fn write_sepc(&mut self, value: u64, mask: u64) {
        self.sepc = (self.sepc & !mask | value & mask) & !0b1;
    }

    pub fn read_stval(&self) -> u64 {
        self.stval
    }

    pub fn write_stval(&mut self, value: u64, mask: u64) {
        self.stval = self.stval & !mask | value & mask;
    }
}

/// The mcause and scause registers.
///
/// > The mcause register is an MXLEN-bit read-write register. When a trap is taken into M-mode,
/// > mcause is written with a code indicating the event that caused the trap. The Interrupt bit in
/// > the mcause register is set if the trap was caused by an interrupt.
///
/// The interrupt bit is stored separately, so the register reads correctly for any XLEN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cause {
    interrupt: bool,
    code: u64,
}

impl Default for Cause {
    fn default() -> Self {
        Self::new()
    }
}

impl Cause {
    pub fn new() -> Self {
        Self {
            interrupt: false,
            code: 0,
        }
    }

    pub fn read(&self, xlen: Xlen) -> u64 {
        let interrupt_bit = xlen.bits().min(64) - 1;
        (self.interrupt as u64) << interrupt_bit | self.code
    }

    pub fn write(&mut self, value: u64, mask: u64, xlen: Xlen) {
        let interrupt_bit = xlen.bits().min(64) - 1;
        let new_value = self.read(xlen) & !mask | value & mask;
        self.interrupt = (new_value >> interrupt_bit) & 1 == 1;
        self.code = new_value & ((1 << interrupt_bit) - 1);
    }

    pub fn set(&mut self, cause: &TrapCause) {
        self.interrupt = cause.is_interrupt();
        self.code = cause.code();
    }
}

impl<B: SystemBus> Hart<B> {
    /// Delivers `trap`, raised by the instruction at `epc`.
    ///
    /// While halted, control goes back into the debug ROM. A breakpoint with the matching
    /// `dcsr.ebreak*` bit set enters debug mode. Any other trap is delegated to S-mode when the
    /// hart is not in M-mode and the cause is delegated, and handled in M-mode otherwise.
    ///
    /// > By default, all traps at any privilege level are handled in machine mode, though a
    /// > machine-mode handler can redirect traps back to the appropriate level with the MRET
    /// > instruction. To increase performance, implementations can provide individual read/write
    /// > bits within medeleg and mideleg to indicate that certain exceptions and interrupts should
    /// > be processed directly by a lower privilege level.
    pub(super) fn take_trap(&mut self, trap: Trap, epc: u64) {
        debug!(
            target: "isohart::trap",
            "hart {}: {} at {epc:#x} in {}-mode",
            self.id,
            trap,
            self.state.prv
        );

        if self.halted() {
            // The debug ROM raised the trap, jump back into it.
            let target = match trap.is_breakpoint() {
                true => self.config.debug_rom_entry,
                false => self.config.debug_rom_exception,
            };
            *self.state.registers.pc_mut() = target;
            return;
        }

        if trap.is_breakpoint() && self.state.dcsr.ebreak(self.state.prv) {
            *self.state.registers.pc_mut() = epc;
            self.enter_debug_mode(DebugCause::SoftwareBreakpoint);
            return;
        }

        let xlen = self.xlen();
        let delegate = self.state.prv <= PrivilegeLevel::Supervisor
            && match trap.cause {
                TrapCause::Exception(exception) => {
                    self.state.control.medeleg.should_delegate(exception)
                }
                TrapCause::Interrupt(interrupt) => {
                    self.state.control.mideleg.should_delegate(interrupt)
                }
            };

        let state = &mut self.state;
        if delegate {
            let pc = state.control.stvec.trap_target(&trap.cause);
            state.trap.write_sepc(epc, u64::MAX);
            state.trap.scause.set(&trap.cause);
            state.trap.write_stval(trap.tval, u64::MAX);
            let sie = state.status.sie();
            state.status.set_spie(sie);
            state.status.set_spp(state.prv);
            state.status.set_sie(false);
            state.prv = PrivilegeLevel::Supervisor;
            *state.registers.pc_mut() = xlen.mask(pc);
        } else {
            let pc = state.control.mtvec.trap_target(&trap.cause);
            state.trap.write_mepc(epc, u64::MAX);
            state.trap.mcause.set(&trap.cause);
            state.trap.write_mtval(trap.tval, u64::MAX);
            let mie = state.status.mie();
            state.status.set_mpie(mie);
            state.status.set_mpp(state.prv);
            state.status.set_mie(false);
            state.prv = PrivilegeLevel::Machine;
            *state.registers.pc_mut() = xlen.mask(pc);
        }

        self.yield_load_reservation();
    }
}
