use bitvec::{field::BitField, order::Lsb0, view::BitView};
use log::debug;

use super::Hart;
use crate::system_bus::SystemBus;
use crate::{PrivilegeLevel, RawPrivilegeLevel};

/// Reason the hart entered Debug Mode, as reported in `dcsr.cause`.
///
/// [`DebugCause::None`] is only ever reported while the hart is running.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum DebugCause {
    #[default]
    None = 0,
    /// An `ebreak` instruction was executed with the matching `dcsr.ebreak*` bit set.
    SoftwareBreakpoint = 1,
    /// A trigger with action "enter Debug Mode" fired.
    HardwareBreakpoint = 2,
    /// The debugger requested a halt.
    DebugInterrupt = 3,
    /// A single step completed.
    Step = 4,
    /// The hart halted out of reset.
    Halt = 5,
}

impl DebugCause {
    fn from_u3(value: u8) -> Self {
        match value {
            1 => Self::SoftwareBreakpoint,
            2 => Self::HardwareBreakpoint,
            3 => Self::DebugInterrupt,
            4 => Self::Step,
            5 => Self::Halt,
            _ => Self::None,
        }
    }
}

/// Progress of a single step requested by the debugger.
///
/// A step goes `Stepping -> Stepped -> None`: the slow path marks the step as `Stepped` as soon as
/// it starts fetching the instruction, and re-enters Debug Mode once that instruction is done.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum SingleStep {
    #[default]
    None,
    Stepping,
    Stepped,
}

/// Debug Control and Status register.
///
/// > Upon entry to debug mode, dpc is updated with the virtual address of the next instruction to
/// > be executed. [...] The prv field of dcsr contains the privilege level the hart was operating
/// > in when Debug Mode was entered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dcsr {
    prv: PrivilegeLevel,
    step: bool,
    ebreakm: bool,
    ebreakh: bool,
    ebreaks: bool,
    ebreaku: bool,
    halt: bool,
    cause: DebugCause,
}

impl Default for Dcsr {
    fn default() -> Self {
        Self::new()
    }
}

impl Dcsr {
    /// Version of the external debug support.
    const XDEBUGVER: u32 = 4;

    pub fn new() -> Self {
        Self {
            prv: PrivilegeLevel::Machine,
            step: false,
            ebreakm: false,
            ebreakh: false,
            ebreaks: false,
            ebreaku: false,
            halt: false,
            cause: DebugCause::None,
        }
    }

    pub fn read(&self) -> u32 {
        let mut value = 0u32;
        let bits = value.view_bits_mut::<Lsb0>();
        bits[idx::XDEBUGVER..].store_le(Self::XDEBUGVER);
        bits.set(idx::EBREAKM, self.ebreakm);
        bits.set(idx::EBREAKH, self.ebreakh);
        bits.set(idx::EBREAKS, self.ebreaks);
        bits.set(idx::EBREAKU, self.ebreaku);
        bits[idx::CAUSE..idx::CAUSE + 3].store_le(self.cause as u8);
        bits.set(idx::HALT, self.halt);
        bits.set(idx::STEP, self.step);
        bits[idx::PRV..idx::PRV + 2].store_le(self.prv.as_u2());
        value
    }

    /// Writes the register. `xdebugver` and `cause` are read-only. A `prv` value of a reserved or
    /// unsupported privilege level is ignored.
    pub fn write(&mut self, value: u32, supported: impl Fn(PrivilegeLevel) -> bool) {
        let bits = value.view_bits::<Lsb0>();
        self.ebreakm = bits[idx::EBREAKM];
        self.ebreakh = bits[idx::EBREAKH];
        self.ebreaks = bits[idx::EBREAKS];
        self.ebreaku = bits[idx::EBREAKU];
        self.halt = bits[idx::HALT];
        self.step = bits[idx::STEP];
        let raw = RawPrivilegeLevel::from_u2(bits[idx::PRV..idx::PRV + 2].load_le());
        if let Ok(prv) = PrivilegeLevel::try_from(raw) {
            if supported(prv) {
                self.prv = prv;
            }
        }
    }

    pub fn prv(&self) -> PrivilegeLevel {
        self.prv
    }

    pub fn step(&self) -> bool {
        self.step
    }

    pub fn halt(&self) -> bool {
        self.halt
    }

    pub fn set_halt(&mut self, value: bool) {
        self.halt = value;
    }

    pub fn cause(&self) -> DebugCause {
        self.cause
    }

    /// Returns `true` if `ebreak` executed in privilege level `level` enters Debug Mode.
    pub fn ebreak(&self, level: PrivilegeLevel) -> bool {
        match level {
            PrivilegeLevel::Machine => self.ebreakm,
            PrivilegeLevel::Supervisor => self.ebreaks,
            PrivilegeLevel::User => self.ebreaku,
        }
    }

    /// Restores a cause code, e.g. when a debugger writes back a saved state.
    pub fn set_cause_code(&mut self, code: u8) {
        self.cause = DebugCause::from_u3(code & 0b111);
    }
}

mod idx {
    //! Bit indices for the fields of the dcsr register.

    /// Start of the 4-bit xdebugver field.
    pub const XDEBUGVER: usize = 28;
    pub const EBREAKM: usize = 15;
    pub const EBREAKH: usize = 14;
    pub const EBREAKS: usize = 13;
    pub const EBREAKU: usize = 12;
    /// Start of the 3-bit cause field.
    pub const CAUSE: usize = 6;
    pub const HALT: usize = 3;
    pub const STEP: usize = 2;
    /// Start of the 2-bit prv field.
    pub const PRV: usize = 0;
}

impl<B: SystemBus> Hart<B> {
    /// Returns `true` while the hart is halted in Debug Mode.
    pub fn halted(&self) -> bool {
        self.state.dcsr.cause != DebugCause::None
    }

    /// Requests the hart to halt. The request is sampled once at the start of the next
    /// [`step`](Self::step) call.
    pub fn set_halt_request(&mut self, value: bool) {
        self.halt_request = value;
    }

    /// Attaches or detaches a debugger. While attached, execution uses the slow path and every
    /// executed instruction is traced.
    pub fn set_debug(&mut self, value: bool) {
        self.debug = value;
    }

    /// Halts the hart, saving the current pc and privilege level.
    ///
    /// > 1. dcsr.cause is updated.
    /// > 2. dcsr.prv is set to the current privilege mode.
    /// > 3. dpc is set to the next instruction that should be executed.
    /// > 4. The hart enters Debug Mode.
    /// > 5. The hart starts executing the Program Buffer or debug ROM.
    pub(super) fn enter_debug_mode(&mut self, cause: DebugCause) {
        let state = &mut self.state;
        debug!(
            target: "isohart::debug",
            "hart {}: entering debug mode ({cause:?}) at {:#x}",
            self.id,
            state.registers.pc()
        );
        state.dcsr.cause = cause;
        state.dcsr.prv = state.prv;
        state.prv = PrivilegeLevel::Machine;
        state.dpc = state.registers.pc();
        *state.registers.pc_mut() = self.config.debug_rom_entry;
    }

    /// Leaves Debug Mode, continuing at `dpc` in the saved privilege level. When `step` is set,
    /// the hart halts again after one instruction.
    pub fn resume(&mut self, step: bool) {
        let state = &mut self.state;
        debug!(
            target: "isohart::debug",
            "hart {}: resuming at {:#x} (step: {step})",
            self.id,
            state.dpc
        );
        *state.registers.pc_mut() = state.dpc;
        state.prv = state.dcsr.prv;
        state.dcsr.cause = DebugCause::None;
        state.single_step = match step {
            true => SingleStep::Stepping,
            false => SingleStep::None,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hart::csr;
    use crate::testing::{asm, TestHart};

    #[test]
    fn test_dcsr_layout() {
        let mut dcsr = Dcsr::new();
        assert_eq!(0x4000_0003, dcsr.read());
        dcsr.write((1 << 15) | (1 << 12) | (1 << 2), |_| true);
        assert!(dcsr.ebreak(PrivilegeLevel::Machine));
        assert!(dcsr.ebreak(PrivilegeLevel::User));
        assert!(!dcsr.ebreak(PrivilegeLevel::Supervisor));
        assert!(dcsr.step());
        assert_eq!(PrivilegeLevel::User, dcsr.prv());
        // cause is read-only
        dcsr.write(0b111 << 6, |_| true);
        assert_eq!(DebugCause::None, dcsr.cause());
    }

    #[test]
    fn test_dcsr_prv_is_warl() {
        let mut dcsr = Dcsr::new();
        dcsr.write(0b10, |_| true);
        assert_eq!(PrivilegeLevel::Machine, dcsr.prv());
        dcsr.write(0b01, |level| level == PrivilegeLevel::Machine);
        assert_eq!(PrivilegeLevel::Machine, dcsr.prv());
    }

    #[test]
    fn test_halt_request_enters_debug_mode() {
        let mut hart = TestHart::rv64(&[asm::addi(asm::x(1), asm::x(0), 1)]);
        hart.set_halt_request(true);
        hart.step(10);
        assert!(hart.halted());
        assert_eq!(DebugCause::DebugInterrupt, hart.state().dcsr.cause());
        assert_eq!(TestHart::BASE, hart.state().dpc);
        assert_eq!(0x800, hart.state().registers.pc());
        assert_eq!(0, hart.state().registers.x(asm::x(1)));
        assert_eq!(0, hart.get_csr(csr::MINSTRET).unwrap());
    }

    #[test]
    fn test_resume_restores_privilege() {
        let mut hart = TestHart::rv64(&[asm::addi(asm::x(1), asm::x(0), 1)]);
        hart.set_privilege(PrivilegeLevel::User);
        hart.set_halt_request(true);
        hart.step(1);
        assert_eq!(PrivilegeLevel::Machine, hart.privilege());
        assert_eq!(PrivilegeLevel::User, hart.state().dcsr.prv());

        hart.resume(false);
        assert!(!hart.halted());
        assert_eq!(PrivilegeLevel::User, hart.privilege());
        assert_eq!(TestHart::BASE, hart.state().registers.pc());
        hart.step(1);
        assert_eq!(1, hart.state().registers.x(asm::x(1)));
    }

    #[test]
    fn test_ebreak_enters_debug_mode_when_enabled() {
        let mut hart = TestHart::rv64(&[asm::EBREAK]);
        hart.state_mut().dcsr.write(1 << 15, |_| true);
        hart.step(1);
        assert_eq!(DebugCause::SoftwareBreakpoint, hart.state().dcsr.cause());
        assert_eq!(TestHart::BASE, hart.state().dpc);
    }
}
