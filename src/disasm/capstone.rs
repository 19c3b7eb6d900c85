//! Capstone-backed listings for arm, thumb2 and mips.

use std::io;

use capstone::{Arch, Capstone, Endian, Mode, NO_EXTRA_MODE};

use crate::container::InstructionSet;
use crate::disasm::{write_raw_byte, DisasmError, Disassembler, LISTING_INDENT};

pub struct CapstoneDisassembler {
    cs: Capstone,
    instruction_set: InstructionSet,
}

fn cs_arch_mode(instruction_set: InstructionSet) -> Option<(Arch, Mode)> {
    match instruction_set {
        InstructionSet::Arm => Some((Arch::ARM, Mode::Arm)),
        InstructionSet::Thumb2 => Some((Arch::ARM, Mode::Thumb)),
        InstructionSet::Mips => Some((Arch::MIPS, Mode::Mips32)),
        InstructionSet::None
        | InstructionSet::X86
        | InstructionSet::X86_64 => None,
    }
}

impl CapstoneDisassembler {
    pub fn new(instruction_set: InstructionSet) -> Result<Self, DisasmError> {
        let (arch, mode) = cs_arch_mode(instruction_set)
            .ok_or(DisasmError::UnsupportedInstructionSet(instruction_set))?;
        let cs = Capstone::new_raw(arch, mode, NO_EXTRA_MODE, Some(Endian::Little))
            .map_err(|e| DisasmError::Backend(e.to_string()))?;
        Ok(Self {
            cs,
            instruction_set,
        })
    }
}

impl Disassembler for CapstoneDisassembler {
    fn instruction_set(&self) -> InstructionSet {
        self.instruction_set
    }

    fn dump_range(&self, out: &mut dyn io::Write, code: &[u8], base: u64) -> io::Result<()> {
        let mut offset = 0usize;
        while offset < code.len() {
            let addr = base + offset as u64;
            let decoded = self
                .cs
                .disasm_all(&code[offset..], addr)
                .ok()
                .filter(|insns| !insns.is_empty());
            match decoded {
                Some(insns) => {
                    let mut consumed = 0usize;
                    for insn in insns.iter() {
                        let mnemonic = insn.mnemonic().unwrap_or("??");
                        match insn.op_str().filter(|s| !s.is_empty()) {
                            Some(ops) => writeln!(
                                out,
                                "{}{:#010x}: {} {}",
                                LISTING_INDENT,
                                insn.address(),
                                mnemonic,
                                ops
                            )?,
                            None => writeln!(
                                out,
                                "{}{:#010x}: {}",
                                LISTING_INDENT,
                                insn.address(),
                                mnemonic
                            )?,
                        }
                        consumed += insn.bytes().len();
                    }
                    offset += consumed;
                }
                None => {
                    // Data in the middle of a code region; emit it and retry
                    // on the next byte so trailing instructions still decode.
                    write_raw_byte(out, addr, code[offset])?;
                    offset += 1;
                }
            }
        }
        Ok(())
    }
}
