//! Provides a simulatable RISC-V hart implementation.

mod control;
mod cs_registers;
pub mod csr;
mod debug;
mod execute;
mod icache;
mod interrupts;
mod mmu;
mod status;
mod step;
mod trap;
mod trigger;

use crate::isa::{Isa, IsaError};
use crate::log_sink::LogSink;
use crate::monitor::IsolationMonitor;
use crate::registers::{FRegister, Registers, Specifier};
use crate::system_bus::SystemBus;
use crate::{PrivilegeLevel, Xlen};
use std::collections::BTreeMap;
use std::ops::Range;
use thiserror::Error;

pub use control::{Control, Counteren, Medeleg, Mideleg, Tvec, VectorMode};
pub use debug::{Dcsr, DebugCause, SingleStep};
pub use icache::{InsnFetch, ICACHE_ENTRIES};
pub use interrupts::{Interrupts, Mip};
pub use status::{FsState, Status};
pub use trap::{Cause, Exception, Interrupt, Trap, TrapCause, TrapRegisters};
pub use trigger::{
    MatchMode, Mcontrol, Timing, Trigger, TriggerAction, TriggerBank, TriggerMatched,
    TriggerOperation, TRIGGER_COUNT,
};

use icache::Icache;
use step::Trace;

/// Returned by an instruction in place of its next `pc` when it must run in a serialized state
/// and the hart is not in one. The instruction is executed again once the hart has serialized.
pub const PC_SERIALIZE_BEFORE: u64 = 3;

/// Returned by an instruction in place of its next `pc` when it has already written `pc` itself
/// and changed state that the rest of the current `step` call must not run ahead of.
pub const PC_SERIALIZE_AFTER: u64 = 5;

/// Static configuration of a hart.
#[derive(Debug, Clone)]
pub struct Config {
    /// ISA string, e.g. `rv64imafd` or `rv32gc`.
    pub isa: String,
    /// Supported privilege modes besides M, e.g. `msu`.
    pub privilege_modes: String,
    /// Address to which the hart's `pc` register is reset.
    pub reset_vector: u64,
    /// If `true`, non-naturally-aligned memory accesses are supported.
    /// If `false`, they will generate an address-misaligned exception.
    pub support_misaligned_memory_access: bool,
    /// Address the hart jumps to when entering Debug Mode.
    pub debug_rom_entry: u64,
    /// Address the hart jumps to when an exception occurs in Debug Mode.
    pub debug_rom_exception: u64,
    /// Addresses of the debug memory. A `step` call returns as soon as `pc` lands in here, so the
    /// debugger can take over.
    pub debug_window: Range<u64>,
    /// Halt the hart (enter Debug Mode) right after it comes out of reset. Only applies to the first
    /// reset.
    pub halt_on_reset: bool,
    /// Emit a line for every retired instruction that wrote a register, on log target
    /// `isohart::commit`.
    pub commit_log: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            isa: String::from("rv64imafd"),
            privilege_modes: String::from("msu"),
            reset_vector: 0x1000,
            support_misaligned_memory_access: false,
            debug_rom_entry: 0x800,
            debug_rom_exception: 0x808,
            debug_window: 0x0..0x1000,
            halt_on_reset: false,
            commit_log: false,
        }
    }
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum ConfigError {
    #[error("invalid ISA: {0}")]
    Isa(#[from] IsaError),
    #[error("{0} harts are not supported")]
    UnsupportedXlen(Xlen),
}

/// Error raised while fetching or executing an instruction.
///
/// Neither variant is fatal: the dispatch loop delivers traps, and handles trigger matches
/// according to the trigger's action.
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
pub enum ExecutionError {
    #[error(transparent)]
    Trap(#[from] Trap),
    #[error(transparent)]
    TriggerMatched(#[from] TriggerMatched),
}

impl From<Exception> for ExecutionError {
    fn from(value: Exception) -> Self {
        Self::Trap(value.into())
    }
}

/// Register written by the instruction that is retiring, kept for the commit log.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegisterWrite {
    X(Specifier, u64),
    F(Specifier, FRegister),
}

/// Architectural state of a hart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct State {
    pub prv: PrivilegeLevel,
    pub registers: Registers,
    pub status: Status,
    pub control: Control,
    pub trap: TrapRegisters,
    pub interrupts: Interrupts,
    /// Retired instruction counter, also read through `cycle`, `mcycle` and `instret`.
    pub minstret: u64,
    pub fflags: u8,
    pub frm: u8,
    /// Only stored: address translation is always the identity.
    pub satp: u64,
    /// Whether the counters account for all retired instructions.
    pub serialized: bool,
    pub dcsr: Dcsr,
    pub dpc: u64,
    pub dscratch: u64,
    pub single_step: SingleStep,
    pub triggers: TriggerBank,
    pub load_reservation: Option<u64>,
    pub last_write: Option<RegisterWrite>,
}

impl State {
    fn new(reset_vector: u64) -> Self {
        Self {
            prv: PrivilegeLevel::Machine,
            registers: Registers::new(reset_vector),
            status: Status::new(),
            control: Control::new(),
            trap: TrapRegisters::new(),
            interrupts: Interrupts::new(),
            minstret: 0,
            fflags: 0,
            frm: 0,
            satp: 0,
            serialized: false,
            dcsr: Dcsr::new(),
            dpc: 0,
            dscratch: 0,
            single_step: SingleStep::None,
            triggers: TriggerBank::new(),
            load_reservation: None,
            last_write: None,
        }
    }
}

/// A RISC-V hart, connected to a system bus.
///
/// > From the perspective of software running in a given execution environment, a hart is a
/// > resource that autonomously fetches and executes RISC-V instructions within that execution
/// > environment.
///
/// The hart executes instructions in batches through [`step`](Self::step). Between `step` calls
/// the host may inspect and modify all state, attach a debugger, or raise interrupts.
#[derive(Debug)]
pub struct Hart<B: SystemBus> {
    id: u64,
    config: Config,
    isa: Isa,
    state: State,
    bus: B,
    icache: Icache,
    monitor: IsolationMonitor,
    /// Trigger that matched a memory access after it was performed. While set, memory accesses
    /// are not checked against the triggers.
    matched_trigger: Option<TriggerMatched>,
    debug: bool,
    halt_request: bool,
    halt_on_reset: bool,
    histogram: Option<BTreeMap<u64, u64>>,
    trace: Trace,
}

impl<B: SystemBus> Hart<B> {
    /// Creates a hart with identifier `id` (its `mhartid`) and brings it out of reset.
    pub fn new(id: u64, config: Config, bus: B) -> Result<Self, ConfigError> {
        let isa = Isa::parse(&config.isa, &config.privilege_modes)?;
        if isa.xlen() == Xlen::Rv128 {
            return Err(ConfigError::UnsupportedXlen(isa.xlen()));
        }
        let mut hart = Self {
            id,
            state: State::new(config.reset_vector),
            halt_on_reset: config.halt_on_reset,
            config,
            isa,
            bus,
            icache: Icache::new(),
            monitor: IsolationMonitor::new(id),
            matched_trigger: None,
            debug: false,
            halt_request: false,
            histogram: None,
            trace: Trace::new(),
        };
        hart.reset();
        Ok(hart)
    }

    /// Force this hart to its reset state.
    ///
    /// The isolation monitor is not affected, see [`IsolationMonitor::reset`].
    pub fn reset(&mut self) {
        let mut state = State::new(self.config.reset_vector);
        if self.isa.flen() > 0 {
            state.status.set_fs(FsState::Initial);
        }
        state.dcsr.set_halt(std::mem::take(&mut self.halt_on_reset));
        self.state = state;
        self.icache.flush();
        self.matched_trigger = None;
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Provide a read-only view of this hart's configuration.
    ///
    /// It is not possible to modify the configuration after creation.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn isa(&self) -> &Isa {
        &self.isa
    }

    pub fn privilege(&self) -> PrivilegeLevel {
        self.state.prv
    }

    /// Switches to privilege level `prv`, or to the closest supported one.
    pub fn set_privilege(&mut self, prv: PrivilegeLevel) {
        self.state.prv = self.legalize_privilege(prv);
    }

    fn legalize_privilege(&self, prv: PrivilegeLevel) -> PrivilegeLevel {
        if self.isa.supports_privilege(prv) {
            prv
        } else if self.isa.supports_privilege(PrivilegeLevel::User) {
            PrivilegeLevel::User
        } else {
            PrivilegeLevel::Machine
        }
    }

    pub fn xlen(&self) -> Xlen {
        self.isa.xlen()
    }

    /// Width of the floating-point registers in bits: `128`, `64`, `32`, or `0` without FP
    /// support.
    pub fn flen(&self) -> u32 {
        self.isa.flen()
    }

    /// Returns `true` if the (case-insensitive) extension letter is supported.
    pub fn supports_extension(&self, extension: char) -> bool {
        self.isa.supports(extension)
    }

    /// Drops the reservation made by a load-reserved instruction, if any.
    pub fn yield_load_reservation(&mut self) {
        self.state.load_reservation = None;
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Mutable access to all architectural state. Changing the trigger configuration this way
    /// does not flush the instruction cache, use the trigger CSRs for that.
    pub fn state_mut(&mut self) -> &mut State {
        &mut self.state
    }

    pub fn registers(&self) -> &Registers {
        &self.state.registers
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Mutable access to the system bus. Flushes the instruction cache, since the caller may
    /// change the code.
    pub fn bus_mut(&mut self) -> &mut B {
        self.icache.flush();
        &mut self.bus
    }

    /// Enables or disables the histogram of executed instructions. Disabling discards it.
    pub fn set_histogram(&mut self, enabled: bool) {
        self.histogram = enabled.then(BTreeMap::new);
    }

    /// Returns the number of times each `pc` retired an instruction, if the histogram is enabled.
    pub fn histogram(&self) -> Option<&BTreeMap<u64, u64>> {
        self.histogram.as_ref()
    }

    pub fn isolation(&self) -> &IsolationMonitor {
        &self.monitor
    }

    pub fn isolation_mut(&mut self) -> &mut IsolationMonitor {
        &mut self.monitor
    }

    /// Replaces the sink the isolation monitor writes to.
    pub fn set_log_sink(&mut self, sink: Box<dyn LogSink>) {
        self.monitor.set_sink(sink);
    }

    /// Returns the index of the trigger that fires for `operation`, or `None`. Triggers never
    /// fire while halted.
    pub fn trigger_match(
        &self,
        operation: TriggerOperation,
        address: u64,
        data: u64,
    ) -> Option<usize> {
        if self.halted() {
            return None;
        }
        self.state
            .triggers
            .matches(operation, address, data, self.state.prv, self.xlen())
    }
}
