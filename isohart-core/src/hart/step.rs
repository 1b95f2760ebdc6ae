//! The fetch/decode/execute loop.

use super::execute::Executor;
use super::icache::{InsnFetch, ICACHE_ENTRIES};
use super::{
    DebugCause, Exception, ExecutionError, Hart, RegisterWrite, SingleStep, Trap, TriggerAction,
    TriggerMatched, PC_SERIALIZE_AFTER, PC_SERIALIZE_BEFORE,
};
use crate::instruction::MAX_INSN_LENGTH;
use crate::monitor::MemoryAccess;
use crate::system_bus::SystemBus;
use crate::PrivilegeLevel;
use log::{debug, info};

/// What the loop does after an instruction evaluated to its next `pc`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Advance {
    /// The instruction retired, keep going.
    Retired,
    /// The instruction did not execute. The hart is now serialized, and the instruction is
    /// executed again by the next batch.
    SerializeBefore,
    /// The instruction retired and the `step` call ends.
    SerializeAfter,
}

/// How a batch of instructions ended, when it did not raise.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum BatchEnd {
    /// Continue with a new batch if instructions are left.
    Continue,
    /// End the `step` call.
    Stop,
}

impl Advance {
    fn batch_end(self) -> Option<BatchEnd> {
        match self {
            Self::Retired => None,
            Self::SerializeBefore => Some(BatchEnd::Continue),
            Self::SerializeAfter => Some(BatchEnd::Stop),
        }
    }
}

/// Disassembly trace of the instructions executed while a debugger is attached. Consecutive
/// executions of the same instruction are collapsed into a count.
#[derive(Debug, Clone)]
pub(super) struct Trace {
    last_pc: Option<u64>,
    last_bits: u32,
    executions: u64,
}

impl Trace {
    pub fn new() -> Self {
        Self {
            last_pc: None,
            last_bits: 0,
            executions: 1,
        }
    }

    fn record(&mut self, hart_id: u64, pc: u64, fetch: &InsnFetch) {
        if self.last_pc == Some(pc) && self.last_bits == fetch.bits {
            self.executions += 1;
            return;
        }
        if self.executions != 1 {
            info!(
                target: "isohart::trace",
                "hart {hart_id}: executed {} times",
                self.executions
            );
        }
        info!(
            target: "isohart::trace",
            "hart {hart_id}: {pc:#018x} ({:#010x}) {}",
            fetch.bits,
            fetch.disassemble()
        );
        self.last_pc = Some(pc);
        self.last_bits = fetch.bits;
        self.executions = 1;
    }
}

impl<B: SystemBus> Hart<B> {
    /// Executes up to `n` instructions.
    ///
    /// The call ends early when a trap is taken, when an instruction serializes the hart (CSR
    /// writes, `mret`, `sret`, `dret`, and `wfi`), and when the hart enters Debug Mode. Pending
    /// halt requests and `dcsr.halt` are sampled once, on entry.
    pub fn step(&mut self, n: u64) {
        if !self.halted() {
            if self.halt_request {
                self.halt_request = false;
                self.enter_debug_mode(DebugCause::DebugInterrupt);
                return;
            }
            if self.state.dcsr.halt() {
                self.enter_debug_mode(DebugCause::Halt);
                return;
            }
        }

        let mut n = n;
        while n > 0 {
            let mut instret = 0;
            let result = self.run_batch(n, &mut instret);
            let end = match result {
                Ok(end) => end,
                Err(ExecutionError::Trap(trap)) => {
                    self.deliver_trap(trap);
                    BatchEnd::Stop
                }
                Err(ExecutionError::TriggerMatched(matched)) => {
                    self.handle_trigger(matched, &mut instret)
                }
            };
            self.state.minstret = self.state.minstret.wrapping_add(instret);
            if end == BatchEnd::Stop {
                break;
            }
            n -= instret.min(n);
        }
    }

    /// Takes `trap` at the current `pc`, which still holds the address of the instruction that
    /// raised it.
    fn deliver_trap(&mut self, trap: Trap) {
        let epc = self.state.registers.pc();
        self.take_trap(trap, epc);
        if self.state.single_step == SingleStep::Stepped {
            self.state.single_step = SingleStep::None;
            self.enter_debug_mode(DebugCause::Step);
        }
    }

    /// Completes the instruction a latched trigger interrupted, then performs the trigger's
    /// action.
    fn handle_trigger(&mut self, matched: TriggerMatched, instret: &mut u64) -> BatchEnd {
        debug!(
            target: "isohart::trigger",
            "hart {}: {matched}",
            self.id
        );
        let mut end = BatchEnd::Continue;
        if self.matched_trigger.is_some() {
            // The access that matched has not been performed. Memory instructions are
            // idempotent, so execute the instruction again, this time without matching.
            match self.execute_at_pc() {
                Ok(npc) => {
                    if self.advance_pc(npc, instret) == Advance::SerializeAfter {
                        end = BatchEnd::Stop;
                    }
                }
                Err(ExecutionError::Trap(trap)) => {
                    self.matched_trigger = None;
                    self.deliver_trap(trap);
                    return BatchEnd::Stop;
                }
                Err(ExecutionError::TriggerMatched(_)) => {}
            }
            self.matched_trigger = None;
        }

        match matched.action {
            TriggerAction::DebugMode => {
                self.enter_debug_mode(DebugCause::HardwareBreakpoint);
                BatchEnd::Stop
            }
            TriggerAction::DebugException => {
                let epc = self.state.registers.pc();
                self.take_trap(Trap::new(Exception::Breakpoint, matched.address), epc);
                end
            }
        }
    }

    fn execute_at_pc(&mut self) -> Result<u64, ExecutionError> {
        let pc = self.state.registers.pc();
        let fetch = self.mmu().load_insn(pc)?;
        self.execute_insn(pc, fetch)
    }

    fn run_batch(&mut self, n: u64, instret: &mut u64) -> Result<BatchEnd, ExecutionError> {
        if let Some(interrupt) = self.pending_interrupt() {
            return Err(Trap::interrupt(interrupt).into());
        }
        if self.slow_path() {
            self.run_slow(n, instret)
        } else {
            self.run_fast(n, instret)
        }
    }

    fn slow_path(&self) -> bool {
        self.debug || self.state.single_step != SingleStep::None || self.halted()
    }

    /// Fetches every instruction from memory, and stops to enter or stay in Debug Mode.
    fn run_slow(&mut self, n: u64, instret: &mut u64) -> Result<BatchEnd, ExecutionError> {
        while *instret < n {
            if self.state.single_step == SingleStep::Stepping {
                self.state.single_step = SingleStep::Stepped;
            }

            let pc = self.state.registers.pc();
            let fetch = self.mmu().load_insn(pc)?;
            if self.debug && !self.state.serialized {
                self.trace.record(self.id, pc, &fetch);
            }
            let npc = self.execute_insn(pc, fetch)?;
            let advance = self.advance_pc(npc, instret);

            if self.state.single_step == SingleStep::Stepped && advance != Advance::SerializeBefore
            {
                self.state.single_step = SingleStep::None;
                self.enter_debug_mode(DebugCause::Step);
                return Ok(BatchEnd::Stop);
            }
            if let Some(end) = advance.batch_end() {
                return Ok(end);
            }
            // One instruction at a time while halted, and wait for the debugger once it jumps to
            // debug memory.
            if self.halted()
                || self
                    .config
                    .debug_window
                    .contains(&self.state.registers.pc())
            {
                return Ok(BatchEnd::Stop);
            }
        }
        Ok(BatchEnd::Continue)
    }

    /// Executes straight-line runs of instructions out of consecutive icache slots.
    ///
    /// A run starts at the slot `pc` maps to, and continues into the next slot as long as that
    /// slot holds the next instruction. When it does not, and the last instruction did not jump,
    /// the next instruction is fetched into that slot so the next pass through this code can
    /// follow it.
    fn run_fast(&mut self, n: u64, instret: &mut u64) -> Result<BatchEnd, ExecutionError> {
        'batch: while *instret < n {
            let mut pc = self.state.registers.pc();
            let mut slot = self.access_icache(pc)?;
            let npc = loop {
                let fetch = self.icache.get(slot);
                let npc = self.execute_insn(pc, fetch)?;
                if slot == ICACHE_ENTRIES - 1 {
                    break npc;
                }
                slot += 1;
                if self.state.triggers.any_execute() || self.icache.lookup(slot, npc).is_none() {
                    if let Some(end) = self.advance_pc(npc, instret).batch_end() {
                        return Ok(end);
                    }
                    let straight_line = npc > pc && npc <= pc.wrapping_add(MAX_INSN_LENGTH);
                    if straight_line && !self.state.triggers.any_execute() {
                        self.refill_icache(npc, slot)?;
                    }
                    continue 'batch;
                }
                if *instret + 1 == n {
                    break npc;
                }
                *instret += 1;
                *self.state.registers.pc_mut() = npc;
                pc = npc;
            };
            if let Some(end) = self.advance_pc(npc, instret).batch_end() {
                return Ok(end);
            }
        }
        Ok(BatchEnd::Continue)
    }

    /// Commits the next `pc` an instruction evaluated to.
    ///
    /// # Panics
    ///
    /// Panics if `npc` is odd without being one of the serialization markers.
    fn advance_pc(&mut self, npc: u64, instret: &mut u64) -> Advance {
        match npc {
            PC_SERIALIZE_BEFORE => {
                self.state.serialized = true;
                Advance::SerializeBefore
            }
            PC_SERIALIZE_AFTER => {
                *instret += 1;
                Advance::SerializeAfter
            }
            _ if npc & 1 != 0 => panic!("instruction evaluated to invalid pc {npc:#x}"),
            _ => {
                *self.state.registers.pc_mut() = npc;
                *instret += 1;
                Advance::Retired
            }
        }
    }

    /// Executes a single fetched instruction and returns its next `pc`.
    ///
    /// Instructions that complete are reported to the isolation monitor, and those that retire
    /// are counted in the histogram and written to the commit log.
    fn execute_insn(&mut self, pc: u64, fetch: InsnFetch) -> Result<u64, ExecutionError> {
        let prv = self.state.prv;
        // The operand is computed up front, since the instruction may overwrite its base
        // register.
        let access = match (&fetch.instruction, self.monitor.is_enabled()) {
            (Ok(instruction), true) => instruction
                .memory_operand()
                .map(|operand| (operand.kind, self.effective_address(operand.base, operand.offset))),
            _ => None,
        };

        let instruction = fetch
            .instruction
            .map_err(|_| Trap::illegal_instruction(fetch.bits))?;
        let npc = Executor {
            hart: self,
            pc,
            bits: fetch.bits,
            length: fetch.length,
        }
        .execute(instruction)?;

        let valid = npc & 1 == 0;
        let last_write = self.state.last_write.take();
        if valid {
            if let (true, Some(write)) = (self.config.commit_log, last_write) {
                self.log_commit(prv, pc, &fetch, write);
            }
            if let Some(histogram) = &mut self.histogram {
                *histogram.entry(pc).or_default() += 1;
            }
        }

        if let Some((kind, address)) = access {
            let access = MemoryAccess {
                kind,
                address,
                pc,
                prv,
                bits: fetch.bits,
                valid,
            };
            self.monitor.check(&access, || fetch.disassemble());
        }
        Ok(npc)
    }

    fn log_commit(&self, prv: PrivilegeLevel, pc: u64, fetch: &InsnFetch, write: RegisterWrite) {
        let xlen = self.xlen().bits();
        let (kind, rd, value) = match write {
            RegisterWrite::X(rd, value) => ('x', rd, format_value(xlen, u128::from(value))),
            RegisterWrite::F(rd, value) => ('f', rd, format_value(self.flen(), value.quad())),
        };
        info!(
            target: "isohart::commit",
            "{} {} ({}) {kind}{:2} {value}",
            prv.as_u2(),
            format_value(xlen, u128::from(pc)),
            format_value(u32::from(fetch.length) * 8, u128::from(fetch.bits)),
            u8::from(rd)
        );
    }
}

/// Formats the low `width` bits of `value` as zero-padded hex.
///
/// # Panics
///
/// Panics if `width` is not 16, 32, 64, or 128.
fn format_value(width: u32, value: u128) -> String {
    match width {
        16 => format!("{:#06x}", value as u16),
        32 => format!("{:#010x}", value as u32),
        64 => format!("{:#018x}", value as u64),
        128 => format!("{value:#034x}"),
        _ => panic!("cannot format a {width}-bit value"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hart::{csr, MatchMode, Mcontrol, Timing, Trigger};
    use crate::log_sink::{LogChannel, MemoryLog};
    use crate::testing::{asm, TestHart};
    use asm::x;

    /// Offset of the trap handler, an endless loop, in programs built by [`with_handler`].
    const HANDLER: u64 = 0x100;

    fn with_handler(code: &[u32]) -> TestHart {
        let mut program = code.to_vec();
        program.resize(HANDLER as usize / 4, asm::NOP);
        program.push(asm::jal(x(0), 0));
        let mut hart = TestHart::rv64(&program);
        hart.set_csr(csr::MTVEC, TestHart::BASE + HANDLER).unwrap();
        hart
    }

    fn data_trigger(address: u64, action: TriggerAction) -> Trigger {
        Trigger {
            mcontrol: Mcontrol {
                timing: Timing::After,
                action,
                match_mode: MatchMode::Equal,
                m: true,
                store: true,
                ..Mcontrol::default()
            },
            tdata2: address,
        }
    }

    #[test]
    fn test_three_instructions() {
        let mut hart = TestHart::rv64(&[
            asm::addi(x(1), x(0), 5),
            asm::addi(x(2), x(1), 7),
            asm::add(x(3), x(1), x(2)),
        ]);
        hart.step(3);
        assert_eq!(5, hart.registers().x(x(1)));
        assert_eq!(12, hart.registers().x(x(2)));
        assert_eq!(17, hart.registers().x(x(3)));
        assert_eq!(TestHart::BASE + 12, hart.registers().pc());
        assert_eq!(3, hart.state().minstret);
    }

    #[test]
    fn test_step_zero_does_nothing() {
        let mut hart = TestHart::rv64(&[asm::addi(x(1), x(0), 5)]);
        hart.step(0);
        assert_eq!(TestHart::BASE, hart.registers().pc());
        assert_eq!(0, hart.state().minstret);
    }

    #[test]
    fn test_step_stops_after_n() {
        let program = [asm::addi(x(1), x(1), 1); 16];
        let mut hart = TestHart::rv64(&program);
        hart.step(5);
        assert_eq!(5, hart.registers().x(x(1)));
        assert_eq!(TestHart::BASE + 20, hart.registers().pc());
        hart.step(5);
        assert_eq!(10, hart.registers().x(x(1)));
        assert_eq!(10, hart.state().minstret);
    }

    /// A loop summing 1..=10, with a backwards branch and a load/store pair.
    fn loop_program() -> Vec<u32> {
        vec![
            asm::addi(x(1), x(0), 10),
            asm::addi(x(2), x(0), 0),
            asm::add(x(2), x(2), x(1)),
            asm::sd(x(2), x(10), 0),
            asm::ld(x(3), x(10), 0),
            asm::addi(x(1), x(1), -1),
            asm::bne(x(1), x(0), -16),
            asm::addi(x(4), x(0), 1),
        ]
    }

    #[test]
    fn test_fast_and_slow_paths_agree() {
        let data = TestHart::BASE + 0x800;
        let mut fast = TestHart::rv64(&loop_program());
        let mut slow = TestHart::rv64(&loop_program());
        fast.state_mut().registers.set_x(x(10), data);
        slow.state_mut().registers.set_x(x(10), data);
        slow.set_debug(true);

        for n in [1, 3, 7, 100] {
            fast.step(n);
            slow.step(n);
            assert_eq!(fast.state(), slow.state(), "after step({n})");
        }
        assert_eq!(55, fast.registers().x(x(2)));
        assert_eq!(1, fast.registers().x(x(4)));
    }

    #[test]
    fn test_icache_sees_code_changes_through_bus_mut() {
        let mut hart = TestHart::rv64(&[asm::addi(x(1), x(0), 1), asm::jal(x(0), -4)]);
        hart.step(2);
        assert_eq!(1, hart.registers().x(x(1)));

        let patched = asm::addi(x(1), x(0), 2);
        hart.bus_mut().load(TestHart::BASE, &patched.to_le_bytes());
        hart.step(1);
        assert_eq!(2, hart.registers().x(x(1)));
    }

    #[test]
    fn test_fence_i_flushes_icache() {
        let mut hart = TestHart::rv64(&[
            asm::addi(x(1), x(0), 1),
            asm::sw(x(5), x(10), 0),
            asm::FENCE_I,
            asm::jal(x(0), -12),
        ]);
        // Overwrite the first instruction after it has been cached.
        hart.state_mut().registers.set_x(x(10), TestHart::BASE);
        hart.state_mut()
            .registers
            .set_x(x(5), u64::from(asm::addi(x(1), x(0), 7)));
        hart.step(5);
        assert_eq!(7, hart.registers().x(x(1)));
        assert_eq!(TestHart::BASE + 4, hart.registers().pc());
    }

    #[test]
    fn test_single_step() {
        let mut hart = TestHart::rv64(&[
            asm::addi(x(1), x(0), 1),
            asm::addi(x(2), x(0), 2),
        ]);
        hart.set_halt_request(true);
        hart.step(1);
        assert!(hart.halted());
        assert_eq!(DebugCause::DebugInterrupt, hart.state().dcsr.cause());

        hart.resume(true);
        hart.step(100);
        assert_eq!(1, hart.registers().x(x(1)));
        assert_eq!(0, hart.registers().x(x(2)));
        assert_eq!(DebugCause::Step, hart.state().dcsr.cause());
        assert_eq!(TestHart::BASE + 4, hart.state().dpc);
        assert_eq!(1, hart.state().minstret);
    }

    #[test]
    fn test_single_step_over_counter_read() {
        let mut hart = TestHart::rv64(&[
            asm::csrrs(x(1), csr::MINSTRET, x(0)),
            asm::addi(x(2), x(0), 2),
        ]);
        hart.set_csr(csr::MINSTRET, 9).unwrap();
        hart.set_halt_request(true);
        hart.step(1);
        hart.resume(true);
        hart.step(100);
        // The first attempt only serialized the hart, the instruction then retired in the same
        // call.
        assert_eq!(9, hart.registers().x(x(1)));
        assert_eq!(0, hart.registers().x(x(2)));
        assert_eq!(DebugCause::Step, hart.state().dcsr.cause());
        assert_eq!(TestHart::BASE + 4, hart.state().dpc);
        assert_eq!(10, hart.state().minstret);
    }

    #[test]
    fn test_single_step_into_trap() {
        let mut hart = TestHart::rv64(&[asm::ECALL]);
        hart.set_csr(csr::MTVEC, 0x8000_0100).unwrap();
        hart.set_halt_request(true);
        hart.step(1);
        hart.resume(true);
        hart.step(1);
        assert_eq!(DebugCause::Step, hart.state().dcsr.cause());
        assert_eq!(0x8000_0100, hart.state().dpc);
        assert_eq!(0, hart.state().minstret);
    }

    #[test]
    fn test_halted_hart_runs_one_instruction_per_step() {
        let mut program = vec![asm::NOP; 0x80];
        program.extend([asm::addi(x(5), x(5), 1), asm::addi(x(5), x(5), 1)]);
        let config = crate::hart::Config {
            debug_rom_entry: TestHart::BASE + 0x200,
            ..TestHart::config("rv64imafd", "msu")
        };
        let mut hart = TestHart::with_config(config, &program);
        hart.set_halt_request(true);
        hart.step(1);
        assert_eq!(TestHart::BASE + 0x200, hart.registers().pc());

        hart.step(10);
        assert!(hart.halted());
        assert_eq!(1, hart.registers().x(x(5)));
        assert_eq!(TestHart::BASE + 0x204, hart.registers().pc());
        hart.step(10);
        assert_eq!(2, hart.registers().x(x(5)));
    }

    #[test]
    fn test_slow_path_returns_in_debug_window() {
        let mut program = vec![asm::addi(x(1), x(0), 1), asm::jal(x(0), 0xFC)];
        program.resize(0x40, asm::NOP);
        program.extend([asm::NOP; 4]);
        let config = crate::hart::Config {
            debug_window: TestHart::BASE + 0x100..TestHart::BASE + 0x200,
            ..TestHart::config("rv64imafd", "msu")
        };
        let mut hart = TestHart::with_config(config, &program);
        hart.set_debug(true);
        hart.step(100);
        assert!(!hart.halted());
        assert_eq!(TestHart::BASE + 0x100, hart.registers().pc());
        assert_eq!(2, hart.state().minstret);

        // Inside the window, every call runs a single instruction.
        hart.step(100);
        assert_eq!(TestHart::BASE + 0x104, hart.registers().pc());
        assert_eq!(3, hart.state().minstret);
    }

    #[test]
    #[should_panic(expected = "invalid pc")]
    fn test_advance_rejects_odd_pc() {
        let mut hart = TestHart::rv64(&[]);
        let mut instret = 0;
        hart.advance_pc(7, &mut instret);
    }

    #[test]
    fn test_advance_pc_sentinels() {
        let mut hart = TestHart::rv64(&[]);
        let mut instret = 0;
        assert_eq!(
            Advance::SerializeBefore,
            hart.advance_pc(PC_SERIALIZE_BEFORE, &mut instret)
        );
        assert!(hart.state().serialized);
        assert_eq!(0, instret);
        assert_eq!(
            Advance::SerializeAfter,
            hart.advance_pc(PC_SERIALIZE_AFTER, &mut instret)
        );
        assert_eq!(TestHart::BASE, hart.registers().pc());
        assert_eq!(
            Advance::Retired,
            hart.advance_pc(TestHart::BASE + 8, &mut instret)
        );
        assert_eq!(TestHart::BASE + 8, hart.registers().pc());
        assert_eq!(2, instret);
    }

    #[test]
    fn test_counter_read_serializes() {
        let mut hart = TestHart::rv64(&[
            asm::addi(x(1), x(0), 1),
            asm::addi(x(1), x(0), 2),
            asm::csrrs(x(2), csr::INSTRET, x(0)),
        ]);
        hart.step(3);
        assert_eq!(2, hart.registers().x(x(2)));
        assert_eq!(3, hart.state().minstret);
        assert!(!hart.state().serialized);
    }

    #[test]
    fn test_minstret_write_is_compensated() {
        let mut hart = TestHart::rv64(&[
            asm::addi(x(1), x(0), 100),
            asm::csrrw(x(0), csr::MINSTRET, x(1)),
        ]);
        hart.step(2);
        assert_eq!(100, hart.state().minstret);
    }

    #[test]
    fn test_store_trigger_restarts_instruction() {
        let data = TestHart::BASE + 0x800;
        let mut hart = with_handler(&[
            asm::addi(x(1), x(0), 7),
            asm::sw(x(1), x(10), 0),
            asm::addi(x(2), x(0), 1),
        ]);
        hart.state_mut().registers.set_x(x(10), data);
        hart.state_mut()
            .triggers
            .set(0, data_trigger(data, TriggerAction::DebugException));
        hart.step(2);

        // The store completed exactly once, then the breakpoint was taken after it.
        assert_eq!(7, hart.mmu().load_u32(data).unwrap());
        assert_eq!(Exception::BREAKPOINT, hart.get_csr(csr::MCAUSE).unwrap());
        assert_eq!(data, hart.get_csr(csr::MTVAL).unwrap());
        assert_eq!(TestHart::BASE + 8, hart.get_csr(csr::MEPC).unwrap());
        assert_eq!(None, hart.matched_trigger);
        assert_eq!(2, hart.state().minstret);
        assert_eq!(0, hart.registers().x(x(2)));
    }

    #[test]
    fn test_amo_trigger_enters_debug_mode() {
        let data = TestHart::BASE + 0x800;
        let mut hart = TestHart::rv64(&[
            asm::addi(x(1), x(0), 1),
            asm::amoadd_w(x(2), x(1), x(10)),
        ]);
        hart.state_mut().registers.set_x(x(10), data);
        hart.bus_mut().load(data, &41u32.to_le_bytes());
        hart.state_mut()
            .triggers
            .set(0, data_trigger(data, TriggerAction::DebugMode));
        hart.step(10);

        assert_eq!(42, hart.mmu().load_u32(data).unwrap());
        assert_eq!(41, hart.registers().x(x(2)));
        assert_eq!(DebugCause::HardwareBreakpoint, hart.state().dcsr.cause());
        assert_eq!(TestHart::BASE + 8, hart.state().dpc);
    }

    #[test]
    fn test_execute_trigger_fires_before() {
        let mut hart = with_handler(&[asm::addi(x(1), x(0), 1), asm::addi(x(2), x(0), 2)]);
        hart.set_csr(csr::TDATA1, (2 << 60) | (1 << 6) | (1 << 2)).unwrap();
        hart.set_csr(csr::TDATA2, TestHart::BASE + 4).unwrap();
        hart.step(10);
        assert_eq!(1, hart.registers().x(x(1)));
        assert_eq!(0, hart.registers().x(x(2)));
        assert_eq!(Exception::BREAKPOINT, hart.get_csr(csr::MCAUSE).unwrap());
        assert_eq!(TestHart::BASE + 4, hart.get_csr(csr::MEPC).unwrap());
    }

    #[test]
    fn test_monitor_logs_interior_stores() {
        let log = MemoryLog::new();
        let mut hart = TestHart::rv64(&[
            asm::sw(x(0), x(10), 0x050),
            asm::sw(x(0), x(10), 0),
            asm::sw(x(0), x(10), 0x100),
        ]);
        hart.set_log_sink(Box::new(log.clone()));
        hart.set_csr(csr::ISOLATION_SW, 1).unwrap();
        hart.isolation_mut().watch(TestHart::BASE + 0x1000, 0x100);
        hart.state_mut()
            .registers
            .set_x(x(10), TestHart::BASE + 0x1000);
        hart.step(3);

        let lines = log.channel(LogChannel::Isolation);
        assert_eq!(2, lines.len());
        assert_eq!(
            format!(
                "[mem check]: STORE! There is store instruction {:x} < [{:x}] < {:x} @ {:x} (3)",
                TestHart::BASE + 0x1000,
                TestHart::BASE + 0x1050,
                TestHart::BASE + 0x1100,
                TestHart::BASE
            ),
            lines[0]
        );
        assert!(lines[1].starts_with(&format!("Seon::{:x}::", TestHart::BASE)));
        assert!(lines[1].ends_with("::1"));
        assert_eq!(1, hart.isolation().counters().stores);
    }

    #[test]
    fn test_monitor_uses_base_before_execution() {
        let log = MemoryLog::new();
        let mut hart = TestHart::rv64(&[asm::lw(x(10), x(10), 0x50)]);
        hart.set_log_sink(Box::new(log.clone()));
        hart.set_csr(csr::ISOLATION_SW, 1).unwrap();
        hart.isolation_mut().set_watch_loads(true);
        hart.isolation_mut().watch(TestHart::BASE + 0x1000, 0x100);
        hart.state_mut()
            .registers
            .set_x(x(10), TestHart::BASE + 0x1000);
        hart.step(1);
        assert_eq!(1, hart.isolation().counters().loads);
    }

    #[test]
    fn test_monitor_disabled() {
        let log = MemoryLog::new();
        let mut hart = TestHart::rv64(&[asm::sw(x(0), x(10), 0x050)]);
        hart.set_log_sink(Box::new(log.clone()));
        hart.isolation_mut().watch(TestHart::BASE + 0x1000, 0x100);
        hart.state_mut()
            .registers
            .set_x(x(10), TestHart::BASE + 0x1000);
        hart.step(1);
        assert!(log.channel(LogChannel::Isolation).is_empty());
    }

    #[test]
    fn test_trace_collapses_repeats() {
        let mut trace = Trace::new();
        let fetch = InsnFetch {
            instruction: crate::instruction::Instruction::decode(asm::NOP, crate::Xlen::Rv64),
            bits: asm::NOP,
            length: 4,
        };
        trace.record(0, 0x100, &fetch);
        trace.record(0, 0x100, &fetch);
        trace.record(0, 0x100, &fetch);
        assert_eq!(3, trace.executions);
        trace.record(0, 0x104, &fetch);
        assert_eq!(1, trace.executions);
        assert_eq!(Some(0x104), trace.last_pc);
    }

    #[test]
    fn test_format_value() {
        assert_eq!("0x0013", format_value(16, 0x13));
        assert_eq!("0x00000013", format_value(32, 0x1_0000_0013));
        assert_eq!("0x0000000080000000", format_value(64, 0x8000_0000));
        assert_eq!(
            "0x0000000000000001ffffffffffffffff",
            format_value(128, (1 << 64) | u128::from(u64::MAX))
        );
    }

    #[test]
    #[should_panic]
    fn test_format_value_rejects_other_widths() {
        format_value(48, 0);
    }

    #[test]
    fn test_commit_log_does_not_disturb_execution() {
        let config = crate::hart::Config {
            commit_log: true,
            ..TestHart::config("rv64imafd", "msu")
        };
        let mut hart = TestHart::with_config(config, &[asm::addi(x(1), x(0), 1)]);
        hart.step(1);
        assert_eq!(None, hart.state().last_write);
        assert_eq!(1, hart.registers().x(x(1)));
    }
}
