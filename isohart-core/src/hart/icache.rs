use crate::instruction::{DecodeError, Instruction};

/// Number of slots in the decoded-instruction cache.
pub const ICACHE_ENTRIES: usize = 1024;

const_assert!(ICACHE_ENTRIES.is_power_of_two());

/// An instruction as fetched from memory: its raw encoding, its length in bytes, and the result of
/// decoding it.
///
/// Decoding failures are kept rather than raised at fetch time, so that the illegal-instruction
/// exception is raised when (and only if) the instruction is executed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct InsnFetch {
    pub instruction: Result<Instruction, DecodeError>,
    pub bits: u32,
    pub length: u8,
}

impl InsnFetch {
    /// Returns the disassembly of the instruction, or `unknown` if it could not be decoded.
    pub fn disassemble(&self) -> String {
        match &self.instruction {
            Ok(instruction) => instruction.to_string(),
            Err(_) => String::from("unknown"),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct IcacheEntry {
    /// Address of the cached instruction, `None` for an empty slot.
    tag: Option<u64>,
    fetch: InsnFetch,
}

impl IcacheEntry {
    const EMPTY: Self = Self {
        tag: None,
        fetch: InsnFetch {
            instruction: Err(DecodeError::IllegalInstruction),
            bits: 0,
            length: 0,
        },
    };
}

/// Direct-mapped cache of decoded instructions, indexed by `pc`.
///
/// Straight-line code is stored in consecutive slots, so the dispatch loop can walk the table
/// instead of looking up every `pc`. As a consequence, an instruction may live in a slot other than
/// the one [`index`](Self::index) maps its address to: only the first instruction of a run is
/// guaranteed to be found through a lookup.
#[derive(Debug, Clone)]
pub struct Icache {
    entries: Vec<IcacheEntry>,
}

impl Default for Icache {
    fn default() -> Self {
        Self::new()
    }
}

impl Icache {
    pub fn new() -> Self {
        Self {
            entries: vec![IcacheEntry::EMPTY; ICACHE_ENTRIES],
        }
    }

    /// Returns the slot an instruction at `pc` is looked up in.
    pub fn index(pc: u64) -> usize {
        ((pc / 2) % ICACHE_ENTRIES as u64) as usize
    }

    /// Returns the cached fetch in `slot` if it holds the instruction at `pc`.
    pub fn lookup(&self, slot: usize, pc: u64) -> Option<InsnFetch> {
        let entry = &self.entries[slot];
        (entry.tag == Some(pc)).then_some(entry.fetch)
    }

    /// Returns the fetch stored in `slot`, regardless of its tag.
    ///
    /// # Panics
    ///
    /// Panics if `slot >= ICACHE_ENTRIES`.
    pub fn get(&self, slot: usize) -> InsnFetch {
        self.entries[slot].fetch
    }

    /// Stores `fetch` as the instruction at `pc` in `slot`.
    pub fn fill(&mut self, slot: usize, pc: u64, fetch: InsnFetch) {
        self.entries[slot] = IcacheEntry {
            tag: Some(pc),
            fetch,
        };
    }

    /// Empties every slot.
    pub fn flush(&mut self) {
        self.entries.fill(IcacheEntry::EMPTY);
    }
}
