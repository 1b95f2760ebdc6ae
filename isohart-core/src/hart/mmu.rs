use super::icache::{Icache, InsnFetch};
use super::{
    Exception, ExecutionError, Hart, Timing, Trap, TrapCause, TriggerMatched, TriggerOperation,
};
use crate::instruction::{instruction_length, Instruction};
use crate::system_bus::{AccessType, SystemBus};
use crate::Alignment;

macro_rules! access_fns {
    ( $( $load_fn:ident, $store_fn:ident, $amo_fn:ident => $u:ident ),* $(,)? ) => {
        $(
            /// Loads a little-endian value from `address`.
            ///
            /// The load triggers are checked against the loaded value, after the bus access.
            pub fn $load_fn(&mut self, address: u64) -> Result<$u, ExecutionError> {
                let mut buf = [0u8; std::mem::size_of::<$u>()];
                self.load(&mut buf, address)?;
                Ok($u::from_le_bytes(buf))
            }

            /// Stores `value` little-endian at `address`.
            ///
            /// The store triggers are checked before the bus access, so a matching trigger
            /// prevents the store.
            pub fn $store_fn(&mut self, address: u64, value: $u) -> Result<(), ExecutionError> {
                self.store(address, &value.to_le_bytes())
            }

            /// Atomically replaces the value at `address` by `f` applied to it, returning the old
            /// value.
            ///
            /// AMOs must be naturally aligned, and faults on the load half are reported as store
            /// faults.
            pub fn $amo_fn(
                &mut self,
                address: u64,
                f: impl FnOnce($u) -> $u,
            ) -> Result<$u, ExecutionError> {
                let size = std::mem::size_of::<$u>() as u64;
                if !Alignment::natural_for_size(size)
                    .is_some_and(|alignment| alignment.is_aligned(address))
                {
                    return Err(Trap::new(Exception::StoreOrAmoAddressMisaligned, address).into());
                }
                let old = self.$load_fn(address).map_err(load_fault_as_store_fault)?;
                self.$store_fn(address, f(old))?;
                Ok(old)
            }
        )*
    };
}

/// Access wrapper around the system bus to address it as memory from the hart's point of view.
///
/// Every access is checked for alignment (unless misaligned accesses are supported) and against
/// [`SystemBus::accepts`], and matched against the hart's triggers. Address translation is the
/// identity.
#[derive(Debug)]
pub(super) struct Mmu<'h, B: SystemBus> {
    hart: &'h mut Hart<B>,
}

impl<'h, B: SystemBus> Mmu<'h, B> {
    access_fns! {
        load_u8, store_u8, amo_u8 => u8,
        load_u16, store_u16, amo_u16 => u16,
        load_u32, store_u32, amo_u32 => u32,
        load_u64, store_u64, amo_u64 => u64,
    }

    /// Fetches and decodes the instruction at `pc`.
    ///
    /// > Instructions are stored in memory as a sequence of 16-bit little-endian parcels,
    /// > regardless of memory system endianness. Parcels forming one instruction are stored at
    /// > increasing halfword addresses, with the lowest-addressed parcel holding the
    /// > lowest-numbered bits in the instruction specification.
    ///
    /// Only the first two parcels are fetched. Longer encodings are not supported, and fail to
    /// decode.
    pub fn load_insn(&mut self, pc: u64) -> Result<InsnFetch, ExecutionError> {
        let low = self.fetch_parcel(pc)?;
        let length = instruction_length(low);
        let mut bits = u32::from(low);
        if length >= 4 {
            let high = self.fetch_parcel(self.hart.xlen().mask(pc.wrapping_add(2)))?;
            bits |= u32::from(high) << 16;
        }
        let fetch = InsnFetch {
            instruction: Instruction::decode(bits, self.hart.xlen()),
            bits,
            length,
        };

        // Execute triggers always fire before the instruction, and never latch.
        if let Some(index) = self
            .hart
            .trigger_match(TriggerOperation::Execute, pc, u64::from(bits))
        {
            return Err(self
                .trigger_matched(index, TriggerOperation::Execute, pc, u64::from(bits))
                .into());
        }
        Ok(fetch)
    }

    fn fetch_parcel(&mut self, address: u64) -> Result<u16, Trap> {
        self.check_access(address, 2, AccessType::Execute)?;
        let mut buf = [0u8; 2];
        self.hart.bus.read(&mut buf, address);
        Ok(u16::from_le_bytes(buf))
    }

    fn load(&mut self, buf: &mut [u8], address: u64) -> Result<(), ExecutionError> {
        self.check_access(address, buf.len(), AccessType::Read)?;
        self.hart.bus.read(buf, address);
        let mut data = [0u8; 8];
        data[..buf.len()].copy_from_slice(buf);
        self.check_trigger(TriggerOperation::Load, address, u64::from_le_bytes(data))?;
        Ok(())
    }

    fn store(&mut self, address: u64, buf: &[u8]) -> Result<(), ExecutionError> {
        self.check_access(address, buf.len(), AccessType::Write)?;
        let mut data = [0u8; 8];
        data[..buf.len()].copy_from_slice(buf);
        self.check_trigger(TriggerOperation::Store, address, u64::from_le_bytes(data))?;
        self.hart.bus.write(address, buf);
        Ok(())
    }

    /// Performs the necessary checks for an access at `address` of `size` bytes.
    fn check_access(
        &self,
        address: u64,
        size: usize,
        access_type: AccessType,
    ) -> Result<(), Trap> {
        let (misaligned, access_fault) = match access_type {
            AccessType::Read => (
                Exception::LoadAddressMisaligned,
                Exception::LoadAccessFault,
            ),
            AccessType::Write => (
                Exception::StoreOrAmoAddressMisaligned,
                Exception::StoreOrAmoAccessFault,
            ),
            AccessType::Execute => (
                Exception::InstructionAddressMisaligned,
                Exception::InstructionAccessFault,
            ),
        };

        if !self.hart.config.support_misaligned_memory_access
            && !Alignment::natural_for_size(size as u64)
                .map(|alignment| alignment.is_aligned(address))
                // If `size` is not a power of two, then the access is always considered unaligned
                .unwrap_or(false)
        {
            return Err(Trap::new(misaligned, address));
        }

        if self.hart.bus.accepts(address, size, access_type) {
            Ok(())
        } else {
            Err(Trap::new(access_fault, address))
        }
    }

    /// Matches a data access against the triggers. Skipped while a match is latched, so that the
    /// instruction that caused it can be executed again to completion.
    fn check_trigger(
        &mut self,
        operation: TriggerOperation,
        address: u64,
        data: u64,
    ) -> Result<(), TriggerMatched> {
        if self.hart.matched_trigger.is_some() {
            return Ok(());
        }
        let Some(index) = self.hart.trigger_match(operation, address, data) else {
            return Ok(());
        };
        let matched = self.trigger_matched(index, operation, address, data);
        if self.hart.state.triggers.get(index).mcontrol.timing == Timing::After {
            self.hart.matched_trigger = Some(matched);
        }
        Err(matched)
    }

    fn trigger_matched(
        &self,
        index: usize,
        operation: TriggerOperation,
        address: u64,
        data: u64,
    ) -> TriggerMatched {
        TriggerMatched {
            index,
            operation,
            address,
            data,
            action: self.hart.state.triggers.get(index).mcontrol.action,
        }
    }
}

fn load_fault_as_store_fault(error: ExecutionError) -> ExecutionError {
    match error {
        ExecutionError::Trap(Trap {
            cause: TrapCause::Exception(Exception::LoadAccessFault),
            tval,
        }) => Trap::new(Exception::StoreOrAmoAccessFault, tval).into(),
        ExecutionError::Trap(Trap {
            cause: TrapCause::Exception(Exception::LoadAddressMisaligned),
            tval,
        }) => Trap::new(Exception::StoreOrAmoAddressMisaligned, tval).into(),
        other => other,
    }
}

impl<B: SystemBus> Hart<B> {
    pub(super) fn mmu(&mut self) -> Mmu<'_, B> {
        Mmu { hart: self }
    }

    /// Returns the icache slot holding the instruction at `pc`, fetching it on a miss.
    ///
    /// While an execute trigger is enabled the instruction is fetched every time, so that the
    /// trigger is checked on every execution.
    pub(super) fn access_icache(&mut self, pc: u64) -> Result<usize, ExecutionError> {
        let slot = Icache::index(pc);
        if self.state.triggers.any_execute() || self.icache.lookup(slot, pc).is_none() {
            self.refill_icache(pc, slot)?;
        }
        Ok(slot)
    }

    /// Fetches the instruction at `pc` into `slot`.
    pub(super) fn refill_icache(
        &mut self,
        pc: u64,
        slot: usize,
    ) -> Result<InsnFetch, ExecutionError> {
        let fetch = self.mmu().load_insn(pc)?;
        self.icache.fill(slot, pc, fetch);
        Ok(fetch)
    }
}
