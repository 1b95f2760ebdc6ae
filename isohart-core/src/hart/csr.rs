//! Specifiers for all supported CSRs.
//! The hypervisor extension is not supported.

use crate::RawPrivilegeLevel;

/// General 12-bit value representing a CSR specifier. Note that this can hold any 12-bit value,
/// even if the value represents an unsupported or non-existent CSR.
pub type CsrSpecifier = u16;

//
// Unprivileged floating-point CSRs (`0x001..=0x003`).
//
/// Floating-point accrued exceptions.
pub const FFLAGS: CsrSpecifier = 0x001;
/// Floating-point dynamic rounding mode.
pub const FRM: CsrSpecifier = 0x002;
/// Floating-point CSR ([`FRM`] + [`FFLAGS`]).
pub const FCSR: CsrSpecifier = 0x003;

//
// Unprivileged counters/timers (`0xC00..=0xC1F`, `0xC80..=0xC9F`).
//
/// Cycle counter for RDCYCLE instruction.
pub const CYCLE: CsrSpecifier = 0xC00;
/// Instructions-retired counter for RDINSTRET instruction.
pub const INSTRET: CsrSpecifier = 0xC02;
/// Upper 32 bits of [`CYCLE`], RV32 only.
pub const CYCLEH: CsrSpecifier = 0xC80;
/// Upper 32 bits of [`INSTRET`], RV32 only.
pub const INSTRETH: CsrSpecifier = 0xC82;

//
// Supervisor trap setup.
//
/// Supervisor status register.
pub const SSTATUS: CsrSpecifier = 0x100;
/// Supervisor interrupt-enable register.
pub const SIE: CsrSpecifier = 0x104;
/// Supervisor trap handler base address.
pub const STVEC: CsrSpecifier = 0x105;
/// Supervisor counter enable.
pub const SCOUNTEREN: CsrSpecifier = 0x106;

//
// Supervisor trap handling.
//
/// Scratch register for supervisor trap handlers.
pub const SSCRATCH: CsrSpecifier = 0x140;
/// Supervisor exception program counter.
pub const SEPC: CsrSpecifier = 0x141;
/// Supervisor trap cause.
pub const SCAUSE: CsrSpecifier = 0x142;
/// Supervisor bad address or instruction.
pub const STVAL: CsrSpecifier = 0x143;
/// Supervisor interrupt pending.
pub const SIP: CsrSpecifier = 0x144;

/// Supervisor address translation and protection.
pub const SATP: CsrSpecifier = 0x180;

//
// Machine information registers.
//
/// Vendor ID.
pub const MVENDORID: CsrSpecifier = 0xF11;
/// Architecture ID.
pub const MARCHID: CsrSpecifier = 0xF12;
/// Implementation ID.
pub const MIMPID: CsrSpecifier = 0xF13;
/// Hardware thread ID.
pub const MHARTID: CsrSpecifier = 0xF14;

//
// Machine trap setup.
//
/// Machine status register.
pub const MSTATUS: CsrSpecifier = 0x300;
/// ISA and extensions.
pub const MISA: CsrSpecifier = 0x301;
/// Machine exception delegation register.
pub const MEDELEG: CsrSpecifier = 0x302;
/// Machine interrupt delegation register.
pub const MIDELEG: CsrSpecifier = 0x303;
/// Machine interrupt-enable register.
pub const MIE: CsrSpecifier = 0x304;
/// Machine trap-handler base address.
pub const MTVEC: CsrSpecifier = 0x305;
/// Machine counter enable.
pub const MCOUNTEREN: CsrSpecifier = 0x306;

//
// Machine trap handling.
//
/// Scratch register for machine trap handlers.
pub const MSCRATCH: CsrSpecifier = 0x340;
/// Machine exception program counter.
pub const MEPC: CsrSpecifier = 0x341;
/// Machine trap cause.
pub const MCAUSE: CsrSpecifier = 0x342;
/// Machine bad address or instruction.
pub const MTVAL: CsrSpecifier = 0x343;
/// Machine interrupt pending.
pub const MIP: CsrSpecifier = 0x344;

//
// Machine counters/timers.
//
/// Machine cycle counter.
pub const MCYCLE: CsrSpecifier = 0xB00;
/// Machine instructions-retired counter.
pub const MINSTRET: CsrSpecifier = 0xB02;
/// Upper 32 bits of [`MCYCLE`], RV32 only.
pub const MCYCLEH: CsrSpecifier = 0xB80;
/// Upper 32 bits of [`MINSTRET`], RV32 only.
pub const MINSTRETH: CsrSpecifier = 0xB82;

//
// Debug/Trace registers (shared with Debug Mode).
//
/// Debug/Trace trigger register select.
pub const TSELECT: CsrSpecifier = 0x7A0;
/// First Debug/Trace trigger data register.
pub const TDATA1: CsrSpecifier = 0x7A1;
/// Second Debug/Trace trigger data register.
pub const TDATA2: CsrSpecifier = 0x7A2;
/// Third Debug/Trace trigger data register.
pub const TDATA3: CsrSpecifier = 0x7A3;

//
// Debug Mode registers.
//
/// Debug control and status register.
pub const DCSR: CsrSpecifier = 0x7B0;
/// Debug PC.
pub const DPC: CsrSpecifier = 0x7B1;
/// Debug scratch register.
pub const DSCRATCH: CsrSpecifier = 0x7B2;

//
// Custom machine-mode isolation monitor registers (`0x7C0..=0x7C4`).
//
/// Isolation monitor enable word. Scanning is disabled while this is zero.
pub const ISOLATION_SW: CsrSpecifier = 0x7C0;
/// First protected region descriptor.
pub const PCODE_REGION0: CsrSpecifier = 0x7C1;
/// Last protected region descriptor.
pub const PCODE_REGION3: CsrSpecifier = 0x7C4;

/// Returns `true` if the specifier fits in 12 bits.
pub fn is_valid(specifier: CsrSpecifier) -> bool {
    specifier < 1 << 12
}

/// Returns `true` if this CSR only supports read access.
///
/// Requires [`is_valid(specifier)`](is_valid), otherwise the return value is undefined.
pub fn is_read_only(specifier: CsrSpecifier) -> bool {
    // The top two bits of a CSR specifier indicate whether the CSR is read-only (0b11) or
    // read/write (0b00, 0b01, 0b10)
    specifier >> 10 == 0b11
}

/// Returns the minimum required privilege level to access this CSR.
///
/// Requires [`is_valid(specifier)`](is_valid), otherwise the return value is undefined.
///
/// Note that this returns a [`RawPrivilegeLevel`], meaning the minimum required privilege level
/// may be a reserved level. This still has a defined meaning: only higher privilege levels are
/// allowed to access the CSR.
pub fn required_privilege_level(specifier: CsrSpecifier) -> RawPrivilegeLevel {
    // Bits `9:8` indicate the minimum required privilege level
    RawPrivilegeLevel::from_u2(((specifier >> 8) & 0b11) as u8)
}

/// Returns `true` for CSRs that are only accessible in Debug Mode (`0x7B0..=0x7BF`).
pub fn is_debug_mode_only(specifier: CsrSpecifier) -> bool {
    (0x7B0..=0x7BF).contains(&specifier)
}

/// Returns `true` for the retired-instruction and cycle counters, in any of their aliases.
///
/// Instructions accessing these must run in a serialized state, so that all previously retired
/// instructions have been accounted for.
pub fn is_counter(specifier: CsrSpecifier) -> bool {
    matches!(
        specifier,
        CYCLE | INSTRET | CYCLEH | INSTRETH | MCYCLE | MINSTRET | MCYCLEH | MINSTRETH
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_bits() {
        assert!(is_read_only(MHARTID));
        assert!(is_read_only(INSTRET));
        assert!(!is_read_only(MINSTRET));
        assert_eq!(RawPrivilegeLevel::Machine, required_privilege_level(MSTATUS));
        assert_eq!(RawPrivilegeLevel::Supervisor, required_privilege_level(SATP));
        assert_eq!(RawPrivilegeLevel::User, required_privilege_level(CYCLE));
        assert_eq!(RawPrivilegeLevel::Machine, required_privilege_level(ISOLATION_SW));
    }

    #[test]
    fn test_classification() {
        assert!(is_debug_mode_only(DCSR));
        assert!(is_debug_mode_only(DSCRATCH));
        assert!(!is_debug_mode_only(TSELECT));
        assert!(is_counter(MINSTRETH));
        assert!(!is_counter(MSTATUS));
        assert!(!is_valid(0x1000));
    }
}
