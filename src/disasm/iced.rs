//! iced-x86-backed listings for x86 and x86_64.

use std::io;

use iced_x86::{Decoder, DecoderOptions, Formatter, Instruction, IntelFormatter};

use crate::container::InstructionSet;
use crate::disasm::{write_raw_byte, DisasmError, Disassembler, LISTING_INDENT};

pub struct IcedDisassembler {
    bitness: u32,
    instruction_set: InstructionSet,
}

impl IcedDisassembler {
    pub fn new(instruction_set: InstructionSet) -> Result<Self, DisasmError> {
        let bitness = match instruction_set {
            InstructionSet::X86 => 32,
            InstructionSet::X86_64 => 64,
            other => return Err(DisasmError::UnsupportedInstructionSet(other)),
        };
        Ok(Self {
            bitness,
            instruction_set,
        })
    }
}

impl Disassembler for IcedDisassembler {
    fn instruction_set(&self) -> InstructionSet {
        self.instruction_set
    }

    fn dump_range(&self, out: &mut dyn io::Write, code: &[u8], base: u64) -> io::Result<()> {
        let mut decoder = Decoder::with_ip(self.bitness, code, base, DecoderOptions::NONE);
        let mut formatter = IntelFormatter::new();
        let mut instruction = Instruction::default();
        let mut text = String::new();
        while decoder.can_decode() {
            let position = decoder.position();
            decoder.decode_out(&mut instruction);
            if instruction.is_invalid() {
                write_raw_byte(out, base + position as u64, code[position])?;
                if decoder.set_position(position + 1).is_err() {
                    break;
                }
                decoder.set_ip(base + position as u64 + 1);
                continue;
            }
            text.clear();
            formatter.format(&instruction, &mut text);
            writeln!(out, "{}{:#010x}: {}", LISTING_INDENT, instruction.ip(), text)?;
        }
        Ok(())
    }
}
