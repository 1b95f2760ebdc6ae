//! Memory isolation monitor.
//!
//! Watches the memory accesses of retiring instructions against a list of address ranges, and
//! logs every access that falls strictly inside one of them. Only stores are watched by default.
//!
//! Besides the watched ranges, the monitor holds the protected code regions that are configured
//! through the custom `pcode` CSRs. Once all regions are locked, accesses into a valid region are
//! counted as faults.

use crate::instruction::AccessKind;
use crate::log_sink::{LogChannel, LogSink};
use crate::PrivilegeLevel;
use bitvec::{field::BitField, order::Lsb0, view::BitView};
use log::{error, warn};
use std::fmt;
use std::io;

/// Number of protected regions.
pub const REGION_COUNT: usize = 4;

const_assert!(REGION_COUNT <= u8::MAX as usize);

/// Index of a protected region, in `0..REGION_COUNT`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RegionIndex(u8);

impl RegionIndex {
    pub fn new(index: usize) -> Option<Self> {
        (index < REGION_COUNT).then_some(Self(index as u8))
    }

    pub fn iter_all() -> impl Iterator<Item = Self> {
        (0..REGION_COUNT as u8).map(Self)
    }
}

impl From<RegionIndex> for usize {
    fn from(value: RegionIndex) -> Self {
        value.0 as usize
    }
}

impl fmt::Display for RegionIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "region{}", self.0)
    }
}

/// A protected code region.
///
/// The region covers the addresses whose bits `31:24`, and the bits `23:14` selected by `mask`,
/// equal those of `base << 12`.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct ProtectedRegion {
    /// 20-bit base, in units of 4 KiB.
    pub base: u32,
    /// 10-bit mask over address bits `23:14`.
    pub mask: u32,
    pub valid: bool,
    pub lock: bool,
}

impl ProtectedRegion {
    /// Packs the region as `base[19:0] | mask[29:20] | valid[30] | lock[31]`.
    pub fn encode(&self) -> u32 {
        let mut value = 0u32;
        let bits = value.view_bits_mut::<Lsb0>();
        bits[idx::BASE..idx::MASK].store_le(self.base);
        bits[idx::MASK..idx::VALID].store_le(self.mask);
        bits.set(idx::VALID, self.valid);
        bits.set(idx::LOCK, self.lock);
        value
    }

    pub fn decode(value: u32) -> Self {
        let bits = value.view_bits::<Lsb0>();
        Self {
            base: bits[idx::BASE..idx::MASK].load_le(),
            mask: bits[idx::MASK..idx::VALID].load_le(),
            valid: bits[idx::VALID],
            lock: bits[idx::LOCK],
        }
    }

    /// Returns `true` if the region is active and `address` lies in it. Only the low 32 bits of
    /// `address` are compared.
    fn contains(&self, address: u64) -> bool {
        let select = (0xFF << 24) | (self.mask << 14);
        self.valid && self.lock && self.base << 12 == address as u32 & select
    }
}

mod idx {
    //! Bit indices for the fields of a packed protected region.

    pub const BASE: usize = 0;
    pub const MASK: usize = 20;
    pub const VALID: usize = 30;
    pub const LOCK: usize = 31;
}

/// An address range `[base, base + length)` watched for accesses.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct WatchedRange {
    pub base: u64,
    pub length: u64,
}

impl WatchedRange {
    /// First address past the range. Wraps to `0` for a range ending at the top of the address
    /// space.
    pub fn end(&self) -> u64 {
        self.base.wrapping_add(self.length)
    }

    /// Returns `true` if `address` lies strictly between the bounds of the range. The first
    /// address of the range is not considered inside. A range may extend up to the top of the
    /// address space.
    pub fn contains_strictly(&self, address: u64) -> bool {
        self.base < address && address - self.base < self.length
    }
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct Counters {
    pub loads: u64,
    pub stores: u64,
    pub faults: u64,
}

/// A memory access by a retiring instruction, as seen by the monitor.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryAccess {
    pub kind: AccessKind,
    /// Effective address, computed before the instruction executed.
    pub address: u64,
    pub pc: u64,
    pub prv: PrivilegeLevel,
    pub bits: u32,
    /// `false` if the instruction did not complete normally (it asked to be serialized).
    pub valid: bool,
}

#[derive(Debug)]
pub struct IsolationMonitor {
    hart_id: u64,
    enable_word: u64,
    watch_loads: bool,
    regions: [ProtectedRegion; REGION_COUNT],
    ranges: Vec<WatchedRange>,
    counters: Counters,
    sink: Box<dyn LogSink>,
}

impl IsolationMonitor {
    /// Creates a disabled monitor that discards its output.
    pub fn new(hart_id: u64) -> Self {
        Self {
            hart_id,
            enable_word: 0,
            watch_loads: false,
            regions: [ProtectedRegion::default(); REGION_COUNT],
            ranges: Vec::new(),
            counters: Counters::default(),
            sink: Box::new(io::sink()),
        }
    }

    pub fn set_sink(&mut self, sink: Box<dyn LogSink>) {
        self.sink = sink;
    }

    /// Returns the enable word. The monitor only checks accesses while it is non-zero.
    pub fn enable_word(&self) -> u64 {
        self.enable_word
    }

    pub fn set_enable_word(&mut self, value: u64) {
        self.enable_word = value;
    }

    pub fn is_enabled(&self) -> bool {
        self.enable_word != 0
    }

    pub fn watch_loads(&self) -> bool {
        self.watch_loads
    }

    /// Also check loads, not only stores.
    pub fn set_watch_loads(&mut self, value: bool) {
        self.watch_loads = value;
    }

    /// Starts watching `[base, base + length)`. Ranges are not checked for overlap, and may end
    /// at the top of the address space.
    pub fn watch(&mut self, base: u64, length: u64) {
        self.ranges.push(WatchedRange { base, length });
        let line = format!(
            "[watch]: range {} {:x} + {:x}",
            self.ranges.len() - 1,
            base,
            length
        );
        self.append(LogChannel::Module, &line);
    }

    pub fn ranges(&self) -> &[WatchedRange] {
        &self.ranges
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn region(&self, index: RegionIndex) -> ProtectedRegion {
        self.regions[usize::from(index)]
    }

    /// Replaces a protected region. Returns `false` (and changes nothing) if the region is
    /// locked.
    pub fn set_region(&mut self, index: RegionIndex, region: ProtectedRegion) -> bool {
        let slot = &mut self.regions[usize::from(index)];
        if slot.lock {
            return false;
        }
        *slot = region;
        true
    }

    /// Returns `true` once every protected region is locked.
    pub fn regions_locked(&self) -> bool {
        self.regions.iter().all(|region| region.lock)
    }

    /// Returns `true` if `address` lies in a protected region. Regions only take effect once all
    /// of them are locked.
    pub fn in_protected_region(&self, address: u64) -> bool {
        self.regions_locked() && self.regions.iter().any(|region| region.contains(address))
    }

    /// Forgets all watched ranges and clears the counters.
    pub fn reset(&mut self) {
        self.ranges.clear();
        self.counters = Counters::default();
        self.append(LogChannel::Module, "[reset]: watched ranges cleared");
    }

    /// Checks a retiring memory access. `disassemble` is only called if the access is logged.
    pub fn check(&mut self, access: &MemoryAccess, disassemble: impl FnOnce() -> String) {
        if !self.is_enabled() || (access.kind == AccessKind::Load && !self.watch_loads) {
            return;
        }

        let kind = match access.kind {
            AccessKind::Load => "load",
            AccessKind::Store => "store",
        };

        if self.in_protected_region(access.address) {
            self.counters.faults += 1;
            let line = format!(
                "[pcode]: {kind} of {:x} in protected region @ {:x} ({:x})",
                access.address,
                access.pc,
                access.prv.as_u2()
            );
            warn!(target: "isohart::isolation", "hart {}: {line}", self.hart_id);
            self.append(LogChannel::Module, &line);
        }

        let Some(range) = self
            .ranges
            .iter()
            .find(|range| range.contains_strictly(access.address))
            .copied()
        else {
            return;
        };

        let shout = match access.kind {
            AccessKind::Load => {
                self.counters.loads += 1;
                "LOAD!"
            }
            AccessKind::Store => {
                self.counters.stores += 1;
                "STORE!"
            }
        };
        let line = format!(
            "[mem check]: {shout} There is {kind} instruction {:x} < [{:x}] < {:x} @ {:x} ({:x})",
            range.base,
            access.address,
            range.end(),
            access.pc,
            access.prv.as_u2()
        );
        warn!(target: "isohart::isolation", "hart {}: {line}", self.hart_id);
        self.append(LogChannel::Isolation, &line);

        let line = format!(
            "Seon::{:x}::{:x}::{}::{:x}",
            access.pc,
            access.bits,
            disassemble(),
            access.valid as u8
        );
        self.append(LogChannel::Isolation, &line);
    }

    fn append(&mut self, channel: LogChannel, line: &str) {
        if let Err(err) = self.sink.append(channel, line) {
            error!(
                target: "isohart::isolation",
                "hart {}: cannot write to {channel:?} log: {err}",
                self.hart_id
            );
        }
    }
}
