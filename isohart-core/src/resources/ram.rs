use crate::bus::Bus;
use crate::system_bus::{AccessType, SystemBus};
use std::ops::RangeInclusive;

/// Byte-based RAM implementation with support for misaligned memory access.
///
/// The RAM occupies the continuous address range `base..=base + len - 1`. Accesses that fall
/// (partially) outside of that range are not accepted on the system bus.
///
/// This can be categorized as *main memory* according to the types of memory resources defined by
/// the RISC-V spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ram {
    base: u64,
    data: Vec<u8>,
}

impl Ram {
    /// Create a new zero-initialized RAM resource that can hold `size` bytes, starting at
    /// address `base`.
    ///
    /// `size` must be at least one, and the range must not wrap around the address space.
    /// If `size` does not satisfy these conditions, `None` is returned and nothing is allocated.
    pub fn new(base: u64, size: usize) -> Option<Self> {
        let size_u64 = u64::try_from(size).ok()?;
        base.checked_add(size_u64.checked_sub(1)?)?;
        Some(Self {
            base,
            data: vec![0; size],
        })
    }

    /// Returns the size expressed in bytes. Guaranteed to be at least one.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns the address range of the continuous region of bytes stored in this RAM unit.
    pub fn range(&self) -> RangeInclusive<u64> {
        self.base..=self.base + (self.data.len() as u64 - 1)
    }

    /// Force RAM back to its reset state, which is all-zeros.
    pub fn reset(&mut self) {
        self.data.fill(0);
    }

    /// Copies `bytes` into RAM starting at `address`. Returns `false` (and copies nothing) if
    /// the bytes do not fit.
    pub fn load(&mut self, address: u64, bytes: &[u8]) -> bool {
        match self.offset(address, bytes.len()) {
            Some(offset) => {
                self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
                true
            }
            None => false,
        }
    }

    /// Returns the offset into `self.data` of `address`, if `size` bytes from there are stored in
    /// this RAM unit.
    fn offset(&self, address: u64, size: usize) -> Option<usize> {
        let offset = usize::try_from(address.checked_sub(self.base)?).ok()?;
        (offset.checked_add(size)? <= self.data.len()).then_some(offset)
    }

    /// Reads a range of bytes from RAM into `buf`. Does not have side effects.
    ///
    /// Elements in `buf` corresponding to addresses that are not stored in this RAM unit are left
    /// untouched.
    fn read_into(&self, buf: &mut [u8], address: u64) {
        for (i, byte) in buf.iter_mut().enumerate() {
            if let Some(offset) = address
                .checked_add(i as u64)
                .and_then(|address| self.offset(address, 1))
            {
                *byte = self.data[offset];
            }
        }
    }
}

impl Bus for Ram {
    fn read(&mut self, buf: &mut [u8], address: u64) {
        self.read_into(buf, address);
    }

    fn write(&mut self, address: u64, buf: &[u8]) {
        for (i, byte) in buf.iter().enumerate() {
            if let Some(offset) = address
                .checked_add(i as u64)
                .and_then(|address| self.offset(address, 1))
            {
                self.data[offset] = *byte;
            }
        }
    }
}

impl SystemBus for Ram {
    fn accepts(&self, address: u64, size: usize, _access_type: AccessType) -> bool {
        self.offset(address, size).is_some()
    }
}
