//! General purpose and floating-point registers.

use core::fmt;
use std::fmt::Formatter;

/// The number of `x` (and `f`) registers available (indices start at `0` for `x0`).
pub const LEN: u8 = 32;

/// Canonical quiet NaN of the single-precision format.
pub const CANONICAL_NAN_SINGLE: u32 = 0x7FC0_0000;

/// Canonical quiet NaN of the double-precision format.
pub const CANONICAL_NAN_DOUBLE: u64 = 0x7FF8_0000_0000_0000;

/// A RISC-V hart's general purpose and floating-point registers, and its program counter.
///
/// There are 32 `x` registers, named `x0` up to `x31`, held in 64-bit containers regardless of
/// the hart's XLEN. The register `x0` (aka `zero`) is always zero. Writes to it are ignored.
///
/// > Register x0 is hardwired with all bits equal to 0. General purpose registers x1–x31 hold
/// > values that various instructions interpret as a collection of Boolean values, or as two’s
/// > complement signed binary integers or unsigned binary integers.
///
/// The 32 `f` registers are width-tagged, see [`FRegister`].
///
/// It is not possible to get a mutable reference to an `x` register, since that would allow
/// unchecked writes to register `x0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registers {
    x_registers: [u64; LEN as usize],
    f_registers: [FRegister; LEN as usize],
    pc: u64,
}

impl Default for Registers {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Registers {
    /// Returns a fresh set of all-zero registers, with `pc` set to `initial_pc`.
    pub fn new(initial_pc: u64) -> Self {
        Self {
            x_registers: [0; LEN as usize],
            f_registers: [FRegister::default(); LEN as usize],
            pc: initial_pc,
        }
    }

    /// Returns the value of an `x` register.
    pub fn x(&self, specifier: Specifier) -> u64 {
        self.x_registers[usize::from(specifier)]
    }

    /// Sets the value of an `x` register.
    ///
    /// Writes to register `x0` are ignored.
    pub fn set_x(&mut self, specifier: Specifier, value: u64) {
        self.replace_x(specifier, value);
    }

    /// Replaces the value of an `x` register, returning its old value.
    ///
    /// Writes to register `x0` are ignored.
    pub fn replace_x(&mut self, specifier: Specifier, value: u64) -> u64 {
        if specifier.0 == 0 {
            0 // Ignore writes to register `x0`
        } else {
            std::mem::replace(&mut self.x_registers[specifier.0 as usize], value)
        }
    }

    /// Returns the value of an `f` register, with its storage width.
    pub fn f(&self, specifier: Specifier) -> FRegister {
        self.f_registers[usize::from(specifier)]
    }

    /// Sets the value of an `f` register. Unlike `x0`, `f0` is an ordinary register.
    pub fn set_f(&mut self, specifier: Specifier, value: FRegister) {
        self.f_registers[usize::from(specifier)] = value;
    }

    /// Returns the value of the `pc` register.
    pub fn pc(&self) -> u64 {
        self.pc
    }

    /// Returns a mutable reference to the `pc` register value.
    pub fn pc_mut(&mut self) -> &mut u64 {
        &mut self.pc
    }
}

/// Value of a floating-point register, tagged with the width it was last written with.
///
/// > When multiple floating-point precisions are supported, then valid values of narrower n-bit
/// > types, n<FLEN, are represented in the lower n bits of an FLEN-bit NaN value, in a process
/// > termed NaN-boxing. The upper bits of a valid NaN-boxed value must be all 1s.
///
/// Reading a narrower value out of a wider register that is not properly NaN-boxed yields the
/// canonical NaN of the narrower format.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FRegister {
    Single(u32),
    Double(u64),
    Quad(u128),
}

impl Default for FRegister {
    fn default() -> Self {
        Self::Double(0)
    }
}

impl FRegister {
    /// Returns the storage width in bits.
    pub fn width(self) -> u32 {
        match self {
            Self::Single(_) => 32,
            Self::Double(_) => 64,
            Self::Quad(_) => 128,
        }
    }

    /// Reads the register as a single-precision bit pattern.
    pub fn single(self) -> u32 {
        match self {
            Self::Single(value) => value,
            Self::Double(value) if value >> 32 == 0xFFFF_FFFF => value as u32,
            Self::Quad(value) if value >> 32 == u128::MAX >> 32 => value as u32,
            _ => CANONICAL_NAN_SINGLE,
        }
    }

    /// Reads the register as a double-precision bit pattern, NaN-boxing narrower values.
    pub fn double(self) -> u64 {
        match self {
            Self::Single(value) => 0xFFFF_FFFF_0000_0000 | value as u64,
            Self::Double(value) => value,
            Self::Quad(value) if value >> 64 == u64::MAX as u128 => value as u64,
            Self::Quad(_) => CANONICAL_NAN_DOUBLE,
        }
    }

    /// Reads the full 128-bit contents, NaN-boxing narrower values.
    pub fn quad(self) -> u128 {
        match self {
            Self::Single(value) => (u128::MAX << 32) | value as u128,
            Self::Double(value) => (u128::MAX << 64) | value as u128,
            Self::Quad(value) => value,
        }
    }
}

/// An `x` or `f` register specifier. Can take values in the range `0..LEN`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Specifier(u8);

impl Specifier {
    /// Register `x0`, a.k.a. register `zero`, always returns `0` on read, and ignores any writes.
    pub const X0: Self = Specifier(0);

    /// Create a register specifier from its index, returning `None` if `index > 31`.
    pub fn new<U: TryInto<u8>>(index: U) -> Option<Self> {
        let index = index.try_into().ok()?;
        (index < LEN).then_some(Self(index))
    }

    /// Convert a 5-bit value into a register specifier.
    /// Panics if the value doesn't fit in 5 bits (`0..=31`).
    pub fn from_u5(value_u5: u8) -> Self {
        const_assert_eq!(LEN, 32);
        if value_u5 > 31 {
            panic!("out of range u5 used");
        }
        Self(value_u5)
    }

    /// Return an iterator over all register specifier, starting at x0 up to x31.
    pub fn iter_all() -> impl Iterator<Item = Self> {
        (0..LEN).map(Self)
    }
}

impl From<Specifier> for u8 {
    fn from(value: Specifier) -> Self {
        value.0
    }
}

impl From<Specifier> for u32 {
    fn from(value: Specifier) -> Self {
        value.0 as u32
    }
}

impl From<Specifier> for usize {
    fn from(value: Specifier) -> Self {
        value.0 as usize
    }
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_to_zero() {
        let mut registers = Registers::default();
        assert_eq!(0, registers.x(Specifier::X0));
        registers.set_x(Specifier::X0, 0xDEAD_BEEF);
        assert_eq!(0, registers.x(Specifier::X0));
        assert_eq!(0, registers.pc());
    }

    #[test]
    fn test_write_to_pc() {
        let mut registers = Registers::new(0x1000);
        assert_eq!(0x1000, registers.pc());
        *registers.pc_mut() = 0xFFFF_FFFF_DEAD_BEEF;
        assert_eq!(0xFFFF_FFFF_DEAD_BEEF, registers.pc());
        assert_eq!(0, registers.x(Specifier::X0));
    }

    #[test]
    fn test_replace_x() {
        let mut registers = Registers::default();
        for i in 1..LEN {
            assert_eq!(0, registers.replace_x(Specifier::from_u5(i), i as u64));
        }
        assert_eq!(0, registers.replace_x(Specifier::X0, 1));
        for i in 1..LEN {
            assert_eq!(
                i as u64,
                registers.replace_x(Specifier::from_u5(i), i as u64 + 1)
            );
        }
        for i in 1..LEN {
            assert_eq!(i as u64 + 1, registers.x(Specifier::from_u5(i)));
        }
    }

    #[test]
    fn test_f0_is_writable() {
        let mut registers = Registers::default();
        registers.set_f(Specifier::X0, FRegister::Single(0x3F80_0000));
        assert_eq!(FRegister::Single(0x3F80_0000), registers.f(Specifier::X0));
    }

    #[test]
    fn test_nan_boxing() {
        let one = FRegister::Single(0x3F80_0000);
        assert_eq!(0xFFFF_FFFF_3F80_0000, one.double());
        assert_eq!(0x3F80_0000, FRegister::Double(one.double()).single());

        // Not NaN-boxed, so reads as canonical NaN.
        assert_eq!(
            CANONICAL_NAN_SINGLE,
            FRegister::Double(0x3FF0_0000_0000_0000).single()
        );
        assert_eq!(CANONICAL_NAN_DOUBLE, FRegister::Quad(1).double());
        assert_eq!(0x3F80_0000, FRegister::Quad(one.quad()).single());
        assert_eq!(128, FRegister::Quad(0).width());
    }

    #[test]
    fn test_specifier_bounds() {
        assert_eq!(Some(Specifier::from_u5(31)), Specifier::new(31));
        assert_eq!(None, Specifier::new(32));
        assert_eq!(None, Specifier::new(-1));
        assert_eq!(32, Specifier::iter_all().count());
    }
}
