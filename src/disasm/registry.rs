use std::io;

use crate::container::InstructionSet;
use crate::disasm::{DisasmError, Disassembler};

pub enum Backend {
    Iced(super::iced::IcedDisassembler),
    Cap(super::capstone::CapstoneDisassembler),
}

impl Disassembler for Backend {
    fn instruction_set(&self) -> InstructionSet {
        match self {
            Backend::Iced(d) => d.instruction_set(),
            Backend::Cap(d) => d.instruction_set(),
        }
    }

    fn dump_range(&self, out: &mut dyn io::Write, code: &[u8], base: u64) -> io::Result<()> {
        match self {
            Backend::Iced(d) => d.dump_range(out, code, base),
            Backend::Cap(d) => d.dump_range(out, code, base),
        }
    }
}

/// Select a disassembler backend for the given instruction set.
pub fn for_instruction_set(instruction_set: InstructionSet) -> Result<Backend, DisasmError> {
    match instruction_set {
        InstructionSet::X86 | InstructionSet::X86_64 => {
            super::iced::IcedDisassembler::new(instruction_set).map(Backend::Iced)
        }
        InstructionSet::Arm | InstructionSet::Thumb2 | InstructionSet::Mips => {
            super::capstone::CapstoneDisassembler::new(instruction_set).map(Backend::Cap)
        }
        InstructionSet::None => Err(DisasmError::UnsupportedInstructionSet(instruction_set)),
    }
}
