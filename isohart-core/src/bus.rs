//! Defines a generalization of a TileLink-like bus interface.

use std::fmt::Debug;

/// A generalization of a TileLink-like bus interface, without the hardware details.
///
/// Implementors of this trait should see it as the TileLink *slave* interface they are exposing,
/// while this interfaces serves as the TileLink *master* interface to callers of this trait.
///
/// Accesses can be made for any `(address, size)` pair. Addresses are 64 bits wide, and the size
/// of an access is the length of the passed buffer.
///
/// Similar to the hardware bus protocols, the slaves implementing this interface must declare which
/// `(address, size)` pairs it supports (see [`SystemBus`](crate::system_bus::SystemBus)).
/// Although the slave can set arbitrary requirements, all `(address, size)` input pairs should be
/// handled without panics. An access that was not declared as supported may leave the simulated
/// state undefined, but must remain deterministic.
///
/// The system expects little-endian byte ordering of all slave devices, and provides little-endian
/// ordering to all master devices.
pub trait Bus: Debug {
    /// Invoke a read access for `address` with size `buf.len()`, writing the result to `buf`.
    ///
    /// Note that a read with `buf.len() == 0` still performs the side effects of a read to
    /// `address`, but just cannot return any value.
    fn read(&mut self, buf: &mut [u8], address: u64);

    /// Invoke a write access for `address` with size `buf.len()`, reading the data from `buf`.
    fn write(&mut self, address: u64, buf: &[u8]);
}
