use bitvec::{field::BitField, order::Lsb0, view::BitView};

use crate::isa::Isa;
use crate::{PrivilegeLevel, RawPrivilegeLevel, Xlen};

// Fields of mstatus that software can write.
const MSTATUS_WRITE_MASK: u64 = (1 << idx::SIE)
    | (1 << idx::MIE)
    | (1 << idx::SPIE)
    | (1 << idx::MPIE)
    | (1 << idx::SPP)
    | (0b11 << idx::MPP)
    | (0b11 << idx::FS)
    | (1 << idx::MPRV)
    | (1 << idx::SUM)
    | (1 << idx::MXR)
    | (1 << idx::TVM)
    | (1 << idx::TW)
    | (1 << idx::TSR);

// Mask to be applied to mstatus to get sstatus (excluding SD and UXL, which are computed).
const SSTATUS_MASK: u64 = (1 << idx::SIE)
    | (1 << idx::SPIE)
    | (1 << idx::SPP)
    | (0b11 << idx::FS)
    | (1 << idx::SUM)
    | (1 << idx::MXR);

/// Provides the mstatus and sstatus registers.
///
/// > The mstatus register is an MXLEN-bit read/write register [...]. The mstatus register keeps
/// > track of and controls the hart’s current operating state. A restricted view of mstatus appears
/// > as the sstatus register in the S-level ISA.
///
/// The SD, UXL and SXL fields are not stored, but computed on read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    mstatus: u64,
}

impl Default for Status {
    fn default() -> Self {
        Self::new()
    }
}

/// Encoding of the FS (floating-point unit status) field.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FsState {
    Off = 0,
    Initial = 1,
    Clean = 2,
    Dirty = 3,
}

impl Status {
    pub fn new() -> Self {
        Self {
            mstatus: 0x0000_0000,
        }
    }

    /// Returns `true` if the MIE (M-mode Interrupt Enable) bit is set.
    pub fn mie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::MIE]
    }

    /// Sets the MIE (M-mode Interrupt Enable) bit to `value`.
    pub fn set_mie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::MIE, value);
    }

    /// Returns `true` if the SIE (S-mode Interrupt Enable) bit is set.
    pub fn sie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::SIE]
    }

    /// Sets the SIE (S-mode Interrupt Enable) bit to `value`.
    pub fn set_sie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::SIE, value);
    }

    /// Returns `true` if the MPIE (M-mode Previous Interrupt Enable) bit is set.
    pub fn mpie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::MPIE]
    }

    /// Sets the MPIE (M-mode Previous Interrupt Enable) bit to `value`.
    pub fn set_mpie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::MPIE, value);
    }

    /// Returns `true` if the SPIE (S-mode Previous Interrupt Enable) bit is set.
    pub fn spie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::SPIE]
    }

    /// Sets the SPIE (S-mode Previous Interrupt Enable) bit to `value`.
    pub fn set_spie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::SPIE, value);
    }

    /// Returns the privilege level encoded by the MPP (M-mode Previous Privilege level) field.
    ///
    /// The MPP field is **WARL**, and never holds the reserved level.
    pub fn mpp(&self) -> PrivilegeLevel {
        let raw = RawPrivilegeLevel::from_u2(
            self.mstatus.view_bits::<Lsb0>()[idx::MPP..(idx::MPP + 2)].load_le(),
        );
        PrivilegeLevel::try_from(raw).unwrap_or(PrivilegeLevel::User)
    }

    /// Sets the MPP (M-mode Previous Privilege level) field to `value`.
    pub fn set_mpp(&mut self, value: PrivilegeLevel) {
        self.mstatus.view_bits_mut::<Lsb0>()[idx::MPP..(idx::MPP + 2)].store_le(value.as_u2());
    }

    /// Returns the privilege level encoded by the SPP (S-mode Previous Privilege level) field.
    pub fn spp(&self) -> PrivilegeLevel {
        match self.mstatus.view_bits::<Lsb0>()[idx::SPP] {
            false => PrivilegeLevel::User,
            true => PrivilegeLevel::Supervisor,
        }
    }

    /// Sets the SPP (S-mode Previous Privilege level) field to `value`.
    ///
    /// The SPP field is **WARL**, so M-mode is ignored.
    pub fn set_spp(&mut self, value: PrivilegeLevel) {
        if value <= PrivilegeLevel::Supervisor {
            let bit = value != PrivilegeLevel::User;
            self.mstatus.view_bits_mut::<Lsb0>().set(idx::SPP, bit);
        }
    }

    /// Returns `true` if the TSR (Trap SRET) bit is set.
    pub fn tsr(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::TSR]
    }

    /// Returns `true` if the TW (Timeout Wait) bit is set.
    pub fn tw(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::TW]
    }

    /// Returns the state of the floating-point unit (FS field).
    pub fn fs(&self) -> FsState {
        match self.mstatus.view_bits::<Lsb0>()[idx::FS..(idx::FS + 2)].load_le::<u8>() {
            0 => FsState::Off,
            1 => FsState::Initial,
            2 => FsState::Clean,
            _ => FsState::Dirty,
        }
    }

    /// Sets the FS field to `value`.
    pub fn set_fs(&mut self, value: FsState) {
        self.mstatus.view_bits_mut::<Lsb0>()[idx::FS..(idx::FS + 2)].store_le(value as u8);
    }

    /// Reads mstatus as seen by software on a hart of width `xlen`.
    pub fn read_mstatus(&self, xlen: Xlen) -> u64 {
        let mut value = self.mstatus;
        if xlen != Xlen::Rv32 {
            // UXL and SXL are hardwired to the hart's width.
            value |= (xlen.mxl() << idx::UXL) | (xlen.mxl() << idx::SXL);
        }
        value | self.sd(xlen)
    }

    /// Writes the bits of mstatus selected by `mask`. Fields that are not writable, and WARL
    /// fields written with unsupported values, keep their old value.
    pub fn write_mstatus(&mut self, value: u64, mask: u64, isa: &Isa) {
        let old_mpp = self.mpp();
        let mask = mask & MSTATUS_WRITE_MASK;
        self.mstatus = self.mstatus & !mask | value & mask;

        let raw_mpp = RawPrivilegeLevel::from_u2(((self.mstatus >> idx::MPP) & 0b11) as u8);
        match PrivilegeLevel::try_from(raw_mpp) {
            Ok(mpp) if isa.supports_privilege(mpp) => {}
            _ => self.set_mpp(old_mpp),
        }
        if !isa.supports_privilege(PrivilegeLevel::Supervisor) {
            self.mstatus &= !((1 << idx::SPP) | (1 << idx::SIE) | (1 << idx::SPIE));
        }
        if isa.flen() == 0 {
            self.set_fs(FsState::Off);
        }
    }

    /// Reads the sstatus view.
    pub fn read_sstatus(&self, xlen: Xlen) -> u64 {
        let mut value = self.mstatus & SSTATUS_MASK;
        if xlen != Xlen::Rv32 {
            value |= xlen.mxl() << idx::UXL;
        }
        value | self.sd(xlen)
    }

    /// Writes the sstatus view.
    pub fn write_sstatus(&mut self, value: u64, mask: u64, isa: &Isa) {
        self.write_mstatus(value, mask & SSTATUS_MASK, isa);
    }

    /// The SD bit summarizes whether the FS field is dirty.
    fn sd(&self, xlen: Xlen) -> u64 {
        match self.fs() {
            FsState::Dirty => 1 << (xlen.bits().min(64) - 1),
            _ => 0,
        }
    }
}

mod idx {
    //! Bit indices for the fields of the mstatus register.

    pub const SIE: usize = 1;
    pub const MIE: usize = 3;
    pub const SPIE: usize = 5;
    pub const MPIE: usize = 7;
    pub const SPP: usize = 8;
    /// Start of the 2-bit MPP field.
    pub const MPP: usize = 11;
    /// Start of the 2-bit FS field.
    pub const FS: usize = 13;
    pub const MPRV: usize = 17;
    pub const SUM: usize = 18;
    pub const MXR: usize = 19;
    pub const TVM: usize = 20;
    pub const TW: usize = 21;
    pub const TSR: usize = 22;
    /// Start of the 2-bit UXL field (RV64 only).
    pub const UXL: usize = 32;
    /// Start of the 2-bit SXL field (RV64 only).
    pub const SXL: usize = 34;
}
