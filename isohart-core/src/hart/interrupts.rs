use bitvec::{array::BitArray, order::Lsb0};

use super::trap::Interrupt;
use super::Hart;
use crate::system_bus::SystemBus;
use crate::PrivilegeLevel;

/// Bit masks of the fields of the mip and mie registers.
pub struct Mip;

impl Mip {
    pub const SSIP: u64 = 1 << 1;
    pub const MSIP: u64 = 1 << 3;
    pub const STIP: u64 = 1 << 5;
    pub const MTIP: u64 = 1 << 7;
    pub const SEIP: u64 = 1 << 9;
    pub const MEIP: u64 = 1 << 11;

    /// Interrupts destined for S-mode, which are the only ones that can be delegated.
    pub const SUPERVISOR_INTERRUPTS: u64 = Self::SSIP | Self::STIP | Self::SEIP;
    /// All implemented interrupts.
    pub const ALL_INTERRUPTS: u64 =
        Self::SUPERVISOR_INTERRUPTS | Self::MSIP | Self::MTIP | Self::MEIP;
}

/// The mip and mie registers, and their S-mode views sip and sie.
///
/// > The mip register is an MXLEN-bit read/write register containing information on pending
/// > interrupts, while mie is the corresponding MXLEN-bit read/write register containing interrupt
/// > enable bits.
///
/// Only the supervisor-level pending bits are writable by software. The machine-level ones are
/// driven by the platform through [`Hart::set_interrupt_pending`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interrupts {
    mip: BitArray<[u64; 1], Lsb0>,
    mie: BitArray<[u64; 1], Lsb0>,
}

impl Default for Interrupts {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupts {
    pub fn new() -> Self {
        Self {
            mip: BitArray::new([0x0000_0000]),
            mie: BitArray::new([0x0000_0000]),
        }
    }

    pub fn read_mip(&self) -> u64 {
        self.mip.data[0]
    }

    pub fn write_mip(&mut self, value: u64, mask: u64) {
        let mask = mask & Mip::SUPERVISOR_INTERRUPTS;
        self.mip.data[0] = self.mip.data[0] & !mask | value & mask;
    }

    pub fn read_mie(&self) -> u64 {
        self.mie.data[0]
    }

    pub fn write_mie(&mut self, value: u64, mask: u64) {
        let mask = mask & Mip::ALL_INTERRUPTS;
        self.mie.data[0] = self.mie.data[0] & !mask | value & mask;
    }

    /// Reads sip, which only shows the delegated interrupts.
    pub fn read_sip(&self, mideleg: u64) -> u64 {
        self.read_mip() & mideleg
    }

    pub fn write_sip(&mut self, value: u64, mask: u64, mideleg: u64) {
        // Only SSIP is writable through sip.
        self.write_mip(value, mask & mideleg & Mip::SSIP);
    }

    /// Reads sie, which only shows the delegated interrupts.
    pub fn read_sie(&self, mideleg: u64) -> u64 {
        self.read_mie() & mideleg
    }

    pub fn write_sie(&mut self, value: u64, mask: u64, mideleg: u64) {
        self.write_mie(value, mask & mideleg);
    }

    pub fn is_pending(&self, interrupt: Interrupt) -> bool {
        self.mip[interrupt.code() as usize]
    }

    pub fn is_enabled(&self, interrupt: Interrupt) -> bool {
        self.mie[interrupt.code() as usize]
    }

    /// Sets or clears the pending bit of `interrupt`, regardless of software writability.
    pub fn set_pending(&mut self, interrupt: Interrupt, value: bool) {
        self.mip.set(interrupt.code() as usize, value);
    }
}

impl<B: SystemBus> Hart<B> {
    /// Signals whether `interrupt` is pending, as an interrupt controller would.
    pub fn set_interrupt_pending(&mut self, interrupt: Interrupt, pending: bool) {
        self.state.interrupts.set_pending(interrupt, pending);
    }

    /// Returns the highest-priority interrupt that is both pending and enabled, and that the
    /// current privilege level allows to be taken. Never returns an interrupt while halted.
    ///
    /// > An interrupt i will trap to M-mode if all of the following are true: (a) either the current
    /// > privilege mode is M and the MIE bit in the mstatus register is set, or the current
    /// > privilege mode has less privilege than M-mode; (b) bit i is set in both mip and mie; and
    /// > (c) if register mideleg exists, bit i is not set in mideleg.
    pub(super) fn pending_interrupt(&self) -> Option<Interrupt> {
        if self.halted() {
            return None;
        }
        let state = &self.state;
        let m_enabled = state.prv < PrivilegeLevel::Machine || state.status.mie();
        let s_enabled = state.prv < PrivilegeLevel::Supervisor
            || (state.prv == PrivilegeLevel::Supervisor && state.status.sie());
        Interrupt::PRIORITY_ORDER.into_iter().find(|&interrupt| {
            if !state.interrupts.is_pending(interrupt) || !state.interrupts.is_enabled(interrupt) {
                return false;
            }
            match state.control.mideleg.should_delegate(interrupt) {
                true => s_enabled,
                false => m_enabled,
            }
        })
    }
}
