//! Debug triggers of type 2 (`mcontrol`): address/data match triggers.
//!
//! > Triggers can cause a breakpoint exception, entry into Debug Mode, or a trace action without
//! > having to execute a special instruction. This makes them invaluable when debugging code from
//! > ROM. They can trigger on execution of instructions at a given memory address, or on the
//! > address/data in loads/stores.

use bitvec::{field::BitField, order::Lsb0, view::BitView};
use thiserror::Error;

use crate::{PrivilegeLevel, Xlen};

/// Number of triggers implemented by every hart.
pub const TRIGGER_COUNT: usize = 4;

const_assert!(TRIGGER_COUNT > 0);

/// Value of the `type` field of an address/data match trigger.
const MCONTROL_TYPE: u8 = 2;

/// Kind of event a trigger is checked against.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TriggerOperation {
    Execute,
    Load,
    Store,
}

/// Comparison a trigger performs between the selected value and `tdata2`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum MatchMode {
    /// Matches when the value equals `tdata2`.
    #[default]
    Equal = 0,
    /// Matches when the top bits of the value equal the top bits of `tdata2`, ignoring as many low
    /// bits as `tdata2` has trailing ones.
    Napot = 1,
    /// Matches when the value is greater than or equal to `tdata2`.
    GreaterEqual = 2,
    /// Matches when the value is less than `tdata2`.
    LessThan = 3,
    /// The upper half of `tdata2` is a mask for the lower half of the value.
    MaskLow = 4,
    /// The upper half of `tdata2` is a mask for the upper half of the value.
    MaskHigh = 5,
}

impl MatchMode {
    /// Unsupported encodings are legalized to [`MatchMode::Equal`].
    fn from_u4(value: u8) -> Self {
        match value {
            1 => Self::Napot,
            2 => Self::GreaterEqual,
            3 => Self::LessThan,
            4 => Self::MaskLow,
            5 => Self::MaskHigh,
            _ => Self::Equal,
        }
    }
}

/// What happens when a trigger fires.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum TriggerAction {
    /// Raise a breakpoint exception.
    #[default]
    DebugException = 0,
    /// Enter Debug Mode.
    DebugMode = 1,
}

impl TriggerAction {
    /// Unsupported encodings (the trace actions) are legalized to
    /// [`TriggerAction::DebugException`].
    fn from_u6(value: u8) -> Self {
        match value {
            1 => Self::DebugMode,
            _ => Self::DebugException,
        }
    }
}

/// Whether a trigger fires before or after the operation it matched has taken effect.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum Timing {
    #[default]
    Before,
    After,
}

/// Signal raised when a trigger fires.
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
#[error("trigger {index} matched on {operation:?} at {address:#x}")]
pub struct TriggerMatched {
    pub index: usize,
    pub operation: TriggerOperation,
    pub address: u64,
    pub data: u64,
    pub action: TriggerAction,
}

/// Match control fields of a trigger (`tdata1` with `type` = 2).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct Mcontrol {
    /// Only Debug Mode can write this trigger's registers.
    pub dmode: bool,
    /// Compare against the data instead of the address.
    pub select: bool,
    pub timing: Timing,
    pub action: TriggerAction,
    /// The next trigger only fires if this one matches as well.
    pub chain: bool,
    pub match_mode: MatchMode,
    pub m: bool,
    pub h: bool,
    pub s: bool,
    pub u: bool,
    pub execute: bool,
    pub store: bool,
    pub load: bool,
}

impl Mcontrol {
    /// Encodes the fields as `tdata1` for a hart of width `xlen`.
    pub fn encode(&self, xlen: Xlen) -> u64 {
        let xlen = xlen.bits().min(64) as usize;
        let mut value = 0u64;
        let bits = value.view_bits_mut::<Lsb0>();
        bits[xlen - 4..xlen].store_le(MCONTROL_TYPE);
        bits.set(xlen - 5, self.dmode);
        bits[xlen - 11..xlen - 5].store_le(xlen as u8 - 1);
        bits.set(idx::SELECT, self.select);
        bits.set(idx::TIMING, self.timing == Timing::After);
        bits[idx::ACTION..idx::ACTION + 6].store_le(self.action as u8);
        bits.set(idx::CHAIN, self.chain);
        bits[idx::MATCH..idx::MATCH + 4].store_le(self.match_mode as u8);
        bits.set(idx::M, self.m);
        bits.set(idx::H, self.h);
        bits.set(idx::S, self.s);
        bits.set(idx::U, self.u);
        bits.set(idx::EXECUTE, self.execute);
        bits.set(idx::STORE, self.store);
        bits.set(idx::LOAD, self.load);
        value
    }

    /// Decodes a `tdata1` value, legalizing unsupported encodings. The `type` and `maskmax` fields
    /// are read-only and ignored.
    pub fn decode(value: u64, xlen: Xlen) -> Self {
        let xlen = xlen.bits().min(64) as usize;
        let bits = value.view_bits::<Lsb0>();
        let execute = bits[idx::EXECUTE];
        Self {
            dmode: bits[xlen - 5],
            select: bits[idx::SELECT],
            // Execute triggers always fire before the instruction executes.
            timing: match bits[idx::TIMING] && !execute {
                true => Timing::After,
                false => Timing::Before,
            },
            action: TriggerAction::from_u6(bits[idx::ACTION..idx::ACTION + 6].load_le()),
            chain: bits[idx::CHAIN],
            match_mode: MatchMode::from_u4(bits[idx::MATCH..idx::MATCH + 4].load_le()),
            m: bits[idx::M],
            h: bits[idx::H],
            s: bits[idx::S],
            u: bits[idx::U],
            execute,
            store: bits[idx::STORE],
            load: bits[idx::LOAD],
        }
    }

    fn enabled_for(&self, operation: TriggerOperation, prv: PrivilegeLevel) -> bool {
        let operation_enabled = match operation {
            TriggerOperation::Execute => self.execute,
            TriggerOperation::Load => self.load,
            TriggerOperation::Store => self.store,
        };
        let privilege_enabled = match prv {
            PrivilegeLevel::Machine => self.m,
            PrivilegeLevel::Supervisor => self.s,
            PrivilegeLevel::User => self.u,
        };
        operation_enabled && privilege_enabled
    }
}

mod idx {
    //! Bit indices of the XLEN-independent fields of `mcontrol`.

    pub const SELECT: usize = 19;
    pub const TIMING: usize = 18;
    /// Start of the 6-bit action field.
    pub const ACTION: usize = 12;
    pub const CHAIN: usize = 11;
    /// Start of the 4-bit match field.
    pub const MATCH: usize = 7;
    pub const M: usize = 6;
    pub const H: usize = 5;
    pub const S: usize = 4;
    pub const U: usize = 3;
    pub const EXECUTE: usize = 2;
    pub const STORE: usize = 1;
    pub const LOAD: usize = 0;
}

/// A single trigger: its match control and its comparison value.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct Trigger {
    pub mcontrol: Mcontrol,
    pub tdata2: u64,
}

impl Trigger {
    /// Compares `value` (already truncated to XLEN) against `tdata2`.
    fn compare(&self, value: u64, xlen: Xlen) -> bool {
        let tdata2 = self.tdata2;
        let half = xlen.bits().min(64) / 2;
        match self.mcontrol.match_mode {
            MatchMode::Equal => value == tdata2,
            MatchMode::Napot => {
                let ones = tdata2.trailing_ones();
                let mask = match ones >= 64 {
                    true => 0,
                    false => !((1u64 << ones) - 1),
                };
                value & mask == tdata2 & mask
            }
            MatchMode::GreaterEqual => value >= tdata2,
            MatchMode::LessThan => value < tdata2,
            MatchMode::MaskLow => {
                let mask = tdata2 >> half;
                value & mask == tdata2 & mask
            }
            MatchMode::MaskHigh => {
                let mask = tdata2 >> half;
                (value >> half) & mask == tdata2 & mask
            }
        }
    }
}

/// The trigger module of a hart, accessed through `tselect`, `tdata1` and `tdata2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerBank {
    tselect: usize,
    triggers: [Trigger; TRIGGER_COUNT],
}

impl Default for TriggerBank {
    fn default() -> Self {
        Self::new()
    }
}

impl TriggerBank {
    /// Creates a bank of disabled triggers.
    pub fn new() -> Self {
        Self {
            tselect: 0,
            triggers: [Trigger::default(); TRIGGER_COUNT],
        }
    }

    /// Returns the index of the trigger that fires for `operation` on `address`/`data` in
    /// privilege level `prv`, or `None`.
    ///
    /// Triggers are checked in order. A trigger with `chain` set only lets the next trigger fire
    /// if it matched itself; when a chained trigger does not match, the rest of its chain is
    /// skipped, up to and including the first trigger that does not have `chain` set.
    ///
    /// The caller is responsible for not matching while the hart is halted.
    pub fn matches(
        &self,
        operation: TriggerOperation,
        address: u64,
        data: u64,
        prv: PrivilegeLevel,
        xlen: Xlen,
    ) -> Option<usize> {
        let mut chain_ok = true;
        for (index, trigger) in self.triggers.iter().enumerate() {
            let mcontrol = &trigger.mcontrol;
            if !chain_ok {
                // The trigger ending the broken chain is skipped as well.
                chain_ok = !mcontrol.chain;
                continue;
            }

            let value = match mcontrol.select {
                true => data,
                false => address,
            };
            if !mcontrol.enabled_for(operation, prv) || !trigger.compare(xlen.mask(value), xlen) {
                chain_ok = !mcontrol.chain;
                continue;
            }

            if !mcontrol.chain {
                return Some(index);
            }
        }
        None
    }

    /// Returns `true` if any trigger is set up to match instruction fetches.
    pub fn any_execute(&self) -> bool {
        self.triggers
            .iter()
            .any(|trigger| trigger.mcontrol.execute)
    }

    /// Returns the trigger with index `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= TRIGGER_COUNT`.
    pub fn get(&self, index: usize) -> &Trigger {
        &self.triggers[index]
    }

    /// Overwrites the trigger with index `index`, bypassing `dmode` protection.
    ///
    /// # Panics
    ///
    /// Panics if `index >= TRIGGER_COUNT`.
    pub fn set(&mut self, index: usize, trigger: Trigger) {
        self.triggers[index] = trigger;
    }

    pub fn read_tselect(&self) -> u64 {
        self.tselect as u64
    }

    /// Selects a trigger. Indices of non-existent triggers are ignored.
    pub fn write_tselect(&mut self, value: u64) {
        if let Ok(index) = usize::try_from(value) {
            if index < TRIGGER_COUNT {
                self.tselect = index;
            }
        }
    }

    pub fn read_tdata1(&self, xlen: Xlen) -> u64 {
        self.triggers[self.tselect].mcontrol.encode(xlen)
    }

    /// Writes `tdata1` of the selected trigger. Returns `false` if the write was ignored because
    /// the trigger belongs to Debug Mode and `debug_mode` is not set.
    pub fn write_tdata1(&mut self, value: u64, xlen: Xlen, debug_mode: bool) -> bool {
        let trigger = &mut self.triggers[self.tselect];
        if trigger.mcontrol.dmode && !debug_mode {
            return false;
        }
        let mut mcontrol = Mcontrol::decode(value, xlen);
        mcontrol.dmode &= debug_mode;
        trigger.mcontrol = mcontrol;
        true
    }

    pub fn read_tdata2(&self) -> u64 {
        self.triggers[self.tselect].tdata2
    }

    /// Writes `tdata2` of the selected trigger, with the same protection as
    /// [`write_tdata1`](Self::write_tdata1).
    pub fn write_tdata2(&mut self, value: u64, debug_mode: bool) -> bool {
        let trigger = &mut self.triggers[self.tselect];
        if trigger.mcontrol.dmode && !debug_mode {
            return false;
        }
        trigger.tdata2 = value;
        true
    }
}
