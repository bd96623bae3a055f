//! Word-addressed VM memory: RAM, ROM (the program store), and the label
//! table.
//!
//! Addresses are 16 bits wide. RAM occupies `[0, RAM_SIZE)` and is
//! read-write; ROM occupies `[ROM_BASE, ROM_BASE + ROM_SIZE)`, is read-only,
//! and holds decoded instructions rather than data words. Addresses outside
//! both regions fail.

use crate::error::VmError;
use log::debug;
use mcl_asm::{Inst, Listing};
use std::collections::HashMap;

/// RAM size in 16-bit words.
pub const RAM_SIZE: usize = 0x8000;
/// First ROM address.
pub const ROM_BASE: u16 = 0x8000;
/// ROM size in instruction slots.
pub const ROM_SIZE: usize = 0x4000;

/// The memory management unit.
pub struct Memory {
    ram: Box<[u16]>,
    program: Vec<Inst>,
    labels: HashMap<String, u16>,
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory {
    /// Create a memory with zeroed RAM and an empty program.
    pub fn new() -> Self {
        Self {
            ram: vec![0; RAM_SIZE].into_boxed_slice(),
            program: Vec::new(),
            labels: HashMap::new(),
        }
    }

    /// Load a program into ROM, replacing any previous program and labels.
    pub fn load_program(&mut self, listing: Listing) -> Result<(), VmError> {
        if listing.insts.len() > ROM_SIZE {
            return Err(VmError::ProgramTooLarge {
                len: listing.insts.len(),
                capacity: ROM_SIZE,
            });
        }
        debug!(
            "loading program: {} instructions, {} labels",
            listing.insts.len(),
            listing.labels.len()
        );
        self.program = listing.insts;
        self.labels = listing.labels;
        Ok(())
    }

    /// Read a word. ROM addresses read as zero (ROM holds instructions, not
    /// data).
    pub fn read(&self, addr: u16) -> Result<u16, VmError> {
        if (addr as usize) < RAM_SIZE {
            Ok(self.ram[addr as usize])
        } else if (addr as usize) < ROM_BASE as usize + ROM_SIZE {
            Ok(0)
        } else {
            Err(VmError::InvalidReadAddress(addr))
        }
    }

    /// Write a word to RAM.
    pub fn write(&mut self, addr: u16, value: u16) -> Result<(), VmError> {
        if (addr as usize) < RAM_SIZE {
            self.ram[addr as usize] = value;
            Ok(())
        } else if (addr as usize) < ROM_BASE as usize + ROM_SIZE {
            Err(VmError::ReadOnlyMemory(addr))
        } else {
            Err(VmError::InvalidWriteAddress(addr))
        }
    }

    /// Fetch the instruction at a program counter, or `None` past the end of
    /// the program.
    pub fn fetch(&self, pc: u16) -> Option<&Inst> {
        self.program.get(pc as usize)
    }

    /// Resolve a label to its address. `name` also matches a `func_name`
    /// entry, so callers may refer to either `main` or `func_main`.
    pub fn resolve_label(&self, name: &str) -> Result<u16, VmError> {
        if let Some(&addr) = self.labels.get(name) {
            return Ok(addr);
        }
        if let Some(&addr) = self.labels.get(&format!("func_{name}")) {
            return Ok(addr);
        }
        Err(VmError::UndefinedLabel(name.to_string()))
    }

    /// The label table.
    pub fn labels(&self) -> &HashMap<String, u16> {
        &self.labels
    }

    /// Number of loaded instructions.
    pub fn program_len(&self) -> usize {
        self.program.len()
    }

    /// Zero all of RAM.
    pub fn clear_ram(&mut self) {
        self.ram.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcl_asm::parse_listing;

    #[test]
    fn ram_read_write() {
        let mut mem = Memory::new();
        mem.write(0x1234, 0xBEEF).unwrap();
        assert_eq!(mem.read(0x1234).unwrap(), 0xBEEF);
        assert_eq!(mem.read(0x7FFF).unwrap(), 0);
    }

    #[test]
    fn rom_is_read_only_and_reads_zero() {
        let mut mem = Memory::new();
        assert_eq!(mem.read(ROM_BASE).unwrap(), 0);
        assert_eq!(
            mem.write(ROM_BASE, 1),
            Err(VmError::ReadOnlyMemory(ROM_BASE))
        );
    }

    #[test]
    fn out_of_region_addresses_fail() {
        let mut mem = Memory::new();
        assert_eq!(mem.read(0xC000), Err(VmError::InvalidReadAddress(0xC000)));
        assert_eq!(
            mem.write(0xFFFF, 1),
            Err(VmError::InvalidWriteAddress(0xFFFF))
        );
    }

    #[test]
    fn func_label_fallback() {
        let mut mem = Memory::new();
        mem.load_program(parse_listing("func_main: HALT").unwrap())
            .unwrap();
        assert_eq!(mem.resolve_label("func_main").unwrap(), 0);
        assert_eq!(mem.resolve_label("main").unwrap(), 0);
        assert!(matches!(
            mem.resolve_label("missing"),
            Err(VmError::UndefinedLabel(_))
        ));
    }
}
