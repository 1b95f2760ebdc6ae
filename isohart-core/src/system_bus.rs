use crate::bus::Bus;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AccessType {
    /// Regular reads.
    Read,
    /// Regular writes.
    Write,
    /// Instruction fetches.
    Execute,
}

/// The bus a hart is connected to. Every access is checked with [`accepts`](Self::accepts)
/// first; rejected accesses raise an access-fault exception instead of reaching the bus.
pub trait SystemBus: Bus {
    fn accepts(&self, address: u64, size: usize, access_type: AccessType) -> bool;
}
