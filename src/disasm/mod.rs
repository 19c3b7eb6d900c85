//! Disassembly engines and their registry.
//!
//! The dumpers consume disassembly as an opaque capability: a trait that
//! renders a byte range as a text listing. Backends:
//! - iced-x86 for x86/x86_64
//! - capstone for arm/thumb2/mips

pub mod capstone;
pub mod iced;
pub mod registry;

use std::io;

use thiserror::Error;

use crate::container::InstructionSet;

pub use registry::{for_instruction_set, Backend};

/// Errors raised when constructing a disassembly backend.
#[derive(Debug, Error)]
pub enum DisasmError {
    #[error("no disassembler backend for instruction set {0}")]
    UnsupportedInstructionSet(InstructionSet),
    #[error("backend error: {0}")]
    Backend(String),
}

/// A disassembly capability: renders `code`, located at `base` in the
/// container's address space, as indented listing lines.
///
/// Implementations must be deterministic; the report contract is that
/// dumping the same container twice produces identical text.
pub trait Disassembler {
    fn instruction_set(&self) -> InstructionSet;

    fn dump_range(&self, out: &mut dyn io::Write, code: &[u8], base: u64) -> io::Result<()>;
}

/// Listing indentation shared by all backends.
pub(crate) const LISTING_INDENT: &str = "\t\t\t";

/// Render one undecodable byte as data and let the caller resume after it.
pub(crate) fn write_raw_byte(out: &mut dyn io::Write, addr: u64, byte: u8) -> io::Result<()> {
    writeln!(out, "{}{:#010x}: .byte {:#04x}", LISTING_INDENT, addr, byte)
}
