use bitvec::{field::BitField, order::Lsb0, view::BitView};

use super::interrupts::Mip;
use super::trap::{Exception, Interrupt, TrapCause};

/// Trap setup registers that select where traps go: the trap vectors, the delegation registers
/// and the counter-enable registers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    pub mtvec: Tvec,
    pub medeleg: Medeleg,
    pub mideleg: Mideleg,
    pub mcounteren: Counteren,

    pub stvec: Tvec,
    pub scounteren: Counteren,
}

impl Default for Control {
    fn default() -> Self {
        Self::new()
    }
}

impl Control {
    pub fn new() -> Self {
        Self {
            mtvec: Tvec::new(),
            medeleg: Medeleg::new(),
            mideleg: Mideleg::new(),
            mcounteren: Counteren::new(),
            stvec: Tvec::new(),
            scounteren: Counteren::new(),
        }
    }
}

/// Trap Vector Base Address Register (mtvec and stvec).
///
/// > The mtvec register is an MXLEN-bit WARL read/write register that holds trap vector
/// > configuration, consisting of a vector base address (BASE) and a vector mode (MODE).
///
/// > When MODE=Direct, all traps into machine mode cause the pc to be set to the address in the
/// > BASE field. When MODE=Vectored, all synchronous exceptions into machine mode cause the pc to
/// > be set to the address in the BASE field, whereas interrupts cause the pc to be set to the
/// > address in the BASE field plus four times the interrupt cause number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tvec(u64);

impl Default for Tvec {
    fn default() -> Self {
        Self::new()
    }
}

impl Tvec {
    pub fn new() -> Self {
        Self(0x0000_0000)
    }

    pub fn read(&self) -> u64 {
        self.0
    }

    pub fn write(&mut self, value: u64, mask: u64) {
        let new_value = self.0 & !mask | value & mask;
        if new_value & 0b11 >= 2 {
            // Reserved MODE. This is a WARL register, so keep the old (legal) value.
        } else {
            self.0 = new_value;
        }
    }

    /// Returns the vector base address (stored in BASE field).
    pub fn base(&self) -> u64 {
        self.0.view_bits::<Lsb0>()[2..].load_le::<u64>() << 2
    }

    /// Returns the vector mode (stored in MODE field).
    pub fn mode(&self) -> VectorMode {
        match self.0.view_bits::<Lsb0>()[0] {
            false => VectorMode::Direct,
            true => VectorMode::Vectored,
        }
    }

    /// Returns the address a trap with cause `cause` jumps to.
    pub fn trap_target(&self, cause: &TrapCause) -> u64 {
        match (self.mode(), cause) {
            (VectorMode::Vectored, TrapCause::Interrupt(interrupt)) => {
                self.base().wrapping_add(4 * interrupt.code())
            }
            _ => self.base(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorMode {
    Direct,
    Vectored,
}

/// The medeleg register is **WARL**.
///
/// Environment calls from M-mode can never be delegated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Medeleg(u64);

impl Default for Medeleg {
    fn default() -> Self {
        Self::new()
    }
}

impl Medeleg {
    #[allow(clippy::identity_op)]
    const DELEGATABLE_EXCEPTIONS_MASK: u64 = 0
        | (1 << Exception::INSTRUCTION_ADDRESS_MISALIGNED)
        | (1 << Exception::INSTRUCTION_ACCESS_FAULT)
        | (1 << Exception::ILLEGAL_INSTRUCTION)
        | (1 << Exception::BREAKPOINT)
        | (1 << Exception::LOAD_ADDRESS_MISALIGNED)
        | (1 << Exception::LOAD_ACCESS_FAULT)
        | (1 << Exception::STORE_OR_AMO_ADDRESS_MISALIGNED)
        | (1 << Exception::STORE_OR_AMO_ACCESS_FAULT)
        | (1 << Exception::ENVIRONMENT_CALL_FROM_U_MODE)
        | (1 << Exception::ENVIRONMENT_CALL_FROM_S_MODE)
        | (1 << Exception::INSTRUCTION_PAGE_FAULT)
        | (1 << Exception::LOAD_PAGE_FAULT)
        | (1 << Exception::STORE_OR_AMO_PAGE_FAULT);

    pub fn new() -> Self {
        Self(0x0000_0000)
    }

    pub fn read(&self) -> u64 {
        self.0
    }

    pub fn write(&mut self, value: u64, mask: u64) {
        let mask = mask & Self::DELEGATABLE_EXCEPTIONS_MASK;
        self.0 = self.0 & !mask | value & mask;
    }

    pub fn should_delegate(&self, exception: Exception) -> bool {
        self.0 & (1 << exception.code()) != 0
    }
}

/// The mideleg register is **WARL**. Only S-level interrupts can be delegated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mideleg(u64);

impl Default for Mideleg {
    fn default() -> Self {
        Self::new()
    }
}

impl Mideleg {
    const DELEGATABLE_INTERRUPTS_MASK: u64 = Mip::SUPERVISOR_INTERRUPTS;

    pub fn new() -> Self {
        Self(0x0000_0000)
    }

    pub fn read(&self) -> u64 {
        self.0
    }

    pub fn write(&mut self, value: u64, mask: u64) {
        let mask = mask & Self::DELEGATABLE_INTERRUPTS_MASK;
        self.0 = self.0 & !mask | value & mask;
    }

    pub fn should_delegate(&self, interrupt: Interrupt) -> bool {
        self.0 & (1 << interrupt.code()) != 0
    }
}

/// Counter-Enable register (mcounteren and scounteren).
///
/// All fields of the register are **WARL**.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counteren(u32);

impl Default for Counteren {
    fn default() -> Self {
        Self::new()
    }
}

impl Counteren {
    // Bit indices for the fields of the counter-enable register.
    // Indices 3 -> 31 map to HPM3 -> HPM31, which are not implemented.
    const CY: usize = 0;
    const TM: usize = 1;
    const IR: usize = 2;

    pub fn new() -> Self {
        Self(0x0000_0000)
    }

    pub fn read(&self) -> u32 {
        self.0
    }

    pub fn write(&mut self, value: u32, mask: u32) {
        let mask = mask & 0b111;
        self.0 = self.0 & !mask | value & mask;
    }

    pub fn cy(&self) -> bool {
        self.0.view_bits::<Lsb0>()[Self::CY]
    }

    pub fn tm(&self) -> bool {
        self.0.view_bits::<Lsb0>()[Self::TM]
    }

    pub fn ir(&self) -> bool {
        self.0.view_bits::<Lsb0>()[Self::IR]
    }
}
