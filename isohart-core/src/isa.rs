//! ISA string parsing.
//!
//! Accepts strings such as `rv32imac`, `RV64GC` or `rv64imafd_zicsr_zifencei`. Multi-letter
//! extensions after an underscore are accepted and ignored.

use crate::{PrivilegeLevel, Xlen};
use thiserror::Error;

/// Single-letter extensions this parser recognizes.
const KNOWN_EXTENSIONS: &str = "iemafdqcbvkhjlnpt";

/// Parsed description of the instruction set a hart implements.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Isa {
    xlen: Xlen,
    /// Bit `n` is set for extension letter `'a' + n`.
    extensions: u32,
}

impl Isa {
    /// Parses an ISA string together with a string of supported privilege modes (e.g. `"msu"`).
    ///
    /// Machine mode is always supported, regardless of `modes`.
    pub fn parse(isa: &str, modes: &str) -> Result<Self, IsaError> {
        let lower = isa.to_ascii_lowercase();
        let (xlen, rest) = if let Some(rest) = lower.strip_prefix("rv32") {
            (Xlen::Rv32, rest)
        } else if let Some(rest) = lower.strip_prefix("rv64") {
            (Xlen::Rv64, rest)
        } else if let Some(rest) = lower.strip_prefix("rv128") {
            (Xlen::Rv128, rest)
        } else {
            return Err(IsaError::BadPrefix(isa.to_owned()));
        };

        let single_letters = rest.split('_').next().unwrap_or("");
        let mut letters = single_letters.chars();
        let mut extensions = 0;
        match letters.next() {
            Some('i') => extensions |= bit('i'),
            Some('e') => extensions |= bit('e'),
            Some('g') => extensions |= bits("imafd"),
            Some(c) => return Err(IsaError::MissingBase(c)),
            None => return Err(IsaError::MissingBase(' ')),
        }
        for c in letters {
            if c == 'g' {
                extensions |= bits("imafd");
            } else if KNOWN_EXTENSIONS.contains(c) {
                extensions |= bit(c);
            } else {
                return Err(IsaError::UnknownExtension(c));
            }
        }

        for mode in modes.to_ascii_lowercase().chars() {
            match mode {
                'm' => {}
                's' | 'u' => extensions |= bit(mode),
                _ => return Err(IsaError::UnknownPrivilegeMode(mode)),
            }
        }

        let isa = Self { xlen, extensions };
        if isa.supports('d') && !isa.supports('f') {
            return Err(IsaError::MissingDependency('d', 'f'));
        }
        if isa.supports('q') && !isa.supports('d') {
            return Err(IsaError::MissingDependency('q', 'd'));
        }
        if isa.supports('s') && !isa.supports('u') {
            return Err(IsaError::MissingDependency('s', 'u'));
        }
        Ok(isa)
    }

    pub fn xlen(&self) -> Xlen {
        self.xlen
    }

    /// Returns `true` if the extension named by the (case-insensitive) letter `extension` is
    /// supported. `S` and `U` report support for the corresponding privilege modes.
    pub fn supports(&self, extension: char) -> bool {
        let letter = extension.to_ascii_lowercase();
        letter.is_ascii_lowercase() && self.extensions & bit(letter) != 0
    }

    /// Returns `true` if the hart can run in privilege level `level`.
    pub fn supports_privilege(&self, level: PrivilegeLevel) -> bool {
        match level {
            PrivilegeLevel::Machine => true,
            PrivilegeLevel::Supervisor => self.supports('s'),
            PrivilegeLevel::User => self.supports('u'),
        }
    }

    /// Width of the floating-point registers, derived from the widest supported FP extension.
    /// Returns `0` when no FP extension is supported.
    pub fn flen(&self) -> u32 {
        if self.supports('q') {
            128
        } else if self.supports('d') {
            64
        } else if self.supports('f') {
            32
        } else {
            0
        }
    }

    /// Returns the reset value of `misa` for this ISA.
    pub fn misa(&self) -> u64 {
        let mxl_shift = match self.xlen {
            Xlen::Rv32 => 30,
            Xlen::Rv64 | Xlen::Rv128 => 62,
        };
        (self.xlen.mxl() << mxl_shift) | self.extensions as u64
    }
}

fn bit(letter: char) -> u32 {
    1 << (letter as u32 - 'a' as u32)
}

fn bits(letters: &str) -> u32 {
    letters.chars().map(bit).fold(0, |acc, b| acc | b)
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum IsaError {
    #[error("ISA string {0:?} does not start with `rv32`, `rv64` or `rv128`")]
    BadPrefix(String),
    #[error("ISA string must start with a base ISA (`i`, `e` or `g`), found {0:?}")]
    MissingBase(char),
    #[error("unsupported extension `{0}`")]
    UnknownExtension(char),
    #[error("unsupported privilege mode `{0}`")]
    UnknownPrivilegeMode(char),
    #[error("extension `{0}` requires extension `{1}`")]
    MissingDependency(char, char),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_general_purpose() {
        let isa = Isa::parse("RV64GC", "msu").unwrap();
        assert_eq!(Xlen::Rv64, isa.xlen());
        for letter in "imafdcIMAFDC".chars() {
            assert!(isa.supports(letter), "{letter}");
        }
        assert!(!isa.supports('q'));
        assert_eq!(64, isa.flen());
        assert!(isa.supports_privilege(PrivilegeLevel::Supervisor));
    }

    #[test]
    fn test_parse_multi_letter_suffix() {
        let isa = Isa::parse("rv32imaf_zicsr_zifencei", "m").unwrap();
        assert_eq!(Xlen::Rv32, isa.xlen());
        assert_eq!(32, isa.flen());
        assert!(!isa.supports('u'));
        assert!(!isa.supports_privilege(PrivilegeLevel::User));
    }

    #[test]
    fn test_flen() {
        assert_eq!(0, Isa::parse("rv64ima", "m").unwrap().flen());
        assert_eq!(128, Isa::parse("rv64imafdq", "m").unwrap().flen());
    }

    #[test]
    fn test_misa() {
        let isa = Isa::parse("rv32i", "mu").unwrap();
        assert_eq!((1 << 30) | (1 << 8) | (1 << 20), isa.misa());
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            Err(IsaError::BadPrefix("x86".to_owned())),
            Isa::parse("x86", "m")
        );
        assert_eq!(Err(IsaError::MissingBase('m')), Isa::parse("rv64m", "m"));
        assert_eq!(Err(IsaError::UnknownExtension('x')), Isa::parse("rv64ix", "m"));
        assert_eq!(
            Err(IsaError::MissingDependency('d', 'f')),
            Isa::parse("rv64id", "m")
        );
        assert_eq!(
            Err(IsaError::MissingDependency('s', 'u')),
            Isa::parse("rv64i", "ms")
        );
        assert_eq!(
            Err(IsaError::UnknownPrivilegeMode('h')),
            Isa::parse("rv64i", "mh")
        );
    }
}
