//! Container report: header fields, then every dex entry, class and method
//! in index order.

use std::io::Write;

use tracing::warn;

use crate::container::tables::{physical_slot, GcMap, MappingTable, PhysicalSlot, VmapTable};
use crate::container::{Container, DexEntry, MethodEntry, OffsetIndex};
use crate::disasm::Disassembler;
use crate::dump::render::{ascii_version, pretty_method, spill_mask_names};
use crate::error::Result;

/// Dumps one container to a writer.
///
/// Construction decodes nothing beyond what [`Container`] already holds; it
/// builds the offset index used to size the regions the method records
/// point at.
pub struct ContainerDumper<'a> {
    container: &'a Container,
    disassembler: &'a dyn Disassembler,
    path_prefix: Option<&'a str>,
    offsets: OffsetIndex,
}

impl<'a> ContainerDumper<'a> {
    pub fn new(
        container: &'a Container,
        disassembler: &'a dyn Disassembler,
        path_prefix: Option<&'a str>,
    ) -> Self {
        ContainerDumper {
            container,
            disassembler,
            path_prefix,
            offsets: OffsetIndex::build(container),
        }
    }

    pub fn container(&self) -> &Container {
        self.container
    }

    pub fn instruction_set(&self) -> crate::container::InstructionSet {
        self.container.instruction_set()
    }

    /// Inferred byte size of the region starting at `offset`, or `None`
    /// when the offset lies outside the container. Offset 0 means "not
    /// present" in method records and sizes to 0.
    pub fn size_of(&self, offset: u32) -> u64 {
        if offset == 0 {
            return 0;
        }
        u64::from(self.offsets.size_of(offset).unwrap_or(0))
    }

    /// Find the method record for `method_index` of the class named by
    /// `descriptor`, searching every dex entry. Used by the snapshot dumper
    /// to tie reflective method objects back to their compiled code.
    pub fn method_entry(&self, descriptor: &str, method_index: u32) -> Option<MethodEntry> {
        for entry in self.container.dex_entries() {
            let payload = match entry.open_payload() {
                Ok(payload) => payload,
                Err(_) => continue,
            };
            let Some(class_def_index) = payload.find_class_def(descriptor) else {
                continue;
            };
            let class = match entry.class_entry(&payload, class_def_index) {
                Ok(class) => class,
                Err(err) => {
                    warn!(descriptor, %err, "unreadable class entry during method lookup");
                    continue;
                }
            };
            if let Some(method) = class.method(method_index) {
                return Some(*method);
            }
        }
        None
    }

    /// Write the full container report.
    pub fn dump(&self, out: &mut dyn Write) -> Result<()> {
        let header = self.container.header();

        writeln!(out, "MAGIC:")?;
        out.write_all(&header.magic)?;
        writeln!(out, "{}", ascii_version(&header.version))?;
        writeln!(out)?;

        writeln!(out, "CHECKSUM:")?;
        writeln!(out, "{:#010x}", header.checksum)?;
        writeln!(out)?;

        writeln!(out, "INSTRUCTION SET:")?;
        writeln!(out, "{}", header.instruction_set)?;
        writeln!(out)?;

        writeln!(out, "DEX FILE COUNT:")?;
        writeln!(out, "{}", header.dex_file_count)?;
        writeln!(out)?;

        writeln!(out, "EXECUTABLE OFFSET:")?;
        writeln!(out, "{:#010x}", header.executable_offset)?;
        writeln!(out)?;

        writeln!(out, "SNAPSHOT CHECKSUM:")?;
        writeln!(out, "{:#010x}", header.snapshot_checksum)?;
        writeln!(out)?;

        writeln!(out, "SNAPSHOT LOCATION:")?;
        match self.path_prefix {
            Some(prefix) => writeln!(
                out,
                "{} ({}{})",
                header.snapshot_location, prefix, header.snapshot_location
            )?,
            None => writeln!(out, "{}", header.snapshot_location)?,
        }
        writeln!(out)?;

        writeln!(out, "BEGIN:")?;
        writeln!(out, "{:#010x}", 0)?;
        writeln!(out)?;

        writeln!(out, "END:")?;
        writeln!(out, "{:#010x}", self.container.len())?;
        writeln!(out)?;

        for entry in self.container.dex_entries() {
            self.dump_dex_entry(out, &entry)?;
        }
        Ok(())
    }

    fn dump_dex_entry(&self, out: &mut dyn Write, entry: &DexEntry<'_>) -> Result<()> {
        writeln!(out, "DEX FILE:")?;
        writeln!(out, "location: {}", entry.location())?;
        writeln!(out, "checksum: {:#010x}", entry.checksum())?;
        let payload = match entry.open_payload() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(location = entry.location(), %err, "dex payload failed to open");
                writeln!(out, "NOT FOUND")?;
                writeln!(out)?;
                return Ok(());
            }
        };
        for class_def_index in 0..payload.class_count() {
            let class_def = payload
                .class_def(class_def_index)
                .ok_or_else(|| bad_index(class_def_index))?;
            let class = entry.class_entry(&payload, class_def_index)?;
            writeln!(
                out,
                "{}: {} (type_idx={}) ({})",
                class_def_index, class_def.descriptor, class_def.type_idx, class.status
            )?;
            for (i, method) in class.methods().iter().enumerate() {
                let def = &class_def.methods()[i];
                writeln!(
                    out,
                    "\t{}: {}",
                    i,
                    pretty_method(&class_def.descriptor, &def.name, &def.signature)
                )?;
                self.dump_method(out, method)?;
            }
        }
        writeln!(out)?;
        Ok(())
    }

    fn dump_method(&self, out: &mut dyn Write, method: &MethodEntry) -> Result<()> {
        writeln!(out, "\t\tframe_size_in_bytes: {}", method.frame_size)?;
        writeln!(
            out,
            "\t\tcore_spill_mask: {:#010x}{}",
            method.core_spill_mask,
            spill_mask_names(method.core_spill_mask, false)
        )?;
        writeln!(
            out,
            "\t\tfp_spill_mask: {:#010x}{}",
            method.fp_spill_mask,
            spill_mask_names(method.fp_spill_mask, true)
        )?;

        let code_offset = method.code_offset_adjusted(self.instruction_set());

        write_region_header(out, "mapping_table", method.mapping_table_offset)?;
        if method.mapping_table_offset != 0 && code_offset != 0 {
            self.dump_mapping_table(out, method.mapping_table_offset, code_offset)?;
        }

        write_region_header(out, "vmap_table", method.vmap_table_offset)?;
        if method.vmap_table_offset != 0 {
            self.dump_vmap_table(out, method)?;
        }

        write_region_header(out, "gc_map", method.gc_map_offset)?;
        if method.gc_map_offset != 0 && code_offset != 0 {
            self.dump_gc_map(out, method.gc_map_offset, code_offset)?;
        }

        if method.code_offset == 0 {
            writeln!(out, "\t\tCODE: (not present)")?;
        } else {
            writeln!(
                out,
                "\t\tCODE: {:#010x} (size={})",
                code_offset, method.code_size
            )?;
            self.dump_code(out, code_offset, u64::from(method.code_size))?;
        }

        if method.invoke_stub_offset == 0 {
            writeln!(out, "\t\tINVOKE STUB: (not present)")?;
        } else {
            let size = self.size_of(method.invoke_stub_offset);
            writeln!(
                out,
                "\t\tINVOKE STUB: {:#010x} (size={})",
                method.invoke_stub_offset, size
            )?;
            self.dump_code(out, method.invoke_stub_offset, size)?;
        }
        Ok(())
    }

    fn dump_mapping_table(&self, out: &mut dyn Write, offset: u32, code_offset: u32) -> Result<()> {
        let table = MappingTable::parse(self.container.bytes(), offset)?;
        if table.is_empty() {
            return Ok(());
        }
        write!(out, "\t\t{{")?;
        let mut section_start = true;
        for (i, pair) in table.entries().enumerate() {
            if !section_start {
                write!(out, ", ")?;
            }
            section_start = false;
            write!(
                out,
                "{:#010x} -> {:#06x}",
                code_offset.wrapping_add(pair.native_pc_offset),
                pair.dex_pc
            )?;
            if pair.ends_pc_to_dex_section && i + 1 < table.len() {
                write!(out, "}}\n\t\t{{")?;
                section_start = true;
            }
        }
        writeln!(out, "}}")?;
        Ok(())
    }

    fn dump_vmap_table(&self, out: &mut dyn Write, method: &MethodEntry) -> Result<()> {
        let table = VmapTable::parse(self.container.bytes(), method.vmap_table_offset)?;
        if table.is_empty() {
            return Ok(());
        }
        write!(out, "\t\t\t")?;
        for (i, vreg) in table.entries().enumerate() {
            if i > 0 {
                write!(out, ", ")?;
            }
            let slot = physical_slot(i, method.core_spill_mask, method.fp_spill_mask)?;
            match slot {
                PhysicalSlot::Core(r) => write!(out, "v{}/r{}", vreg, r)?,
                PhysicalSlot::Fp(r) => write!(out, "v{}/fr{}", vreg, r)?,
            }
        }
        writeln!(out)?;
        Ok(())
    }

    fn dump_gc_map(&self, out: &mut dyn Write, offset: u32, code_offset: u32) -> Result<()> {
        let map = GcMap::parse(self.container.bytes(), offset)?;
        for entry in map.entries() {
            write!(
                out,
                "\t\t\t{:#010x}",
                code_offset.wrapping_add(u32::from(entry.native_pc_offset))
            )?;
            for reg in entry.live_registers() {
                write!(out, "  v{}", reg)?;
            }
            writeln!(out)?;
        }
        Ok(())
    }

    fn dump_code(&self, out: &mut dyn Write, offset: u32, size: u64) -> Result<()> {
        match self.container.region(offset, size as u32) {
            Some(code) => self
                .disassembler
                .dump_range(out, code, u64::from(offset))?,
            None => {
                warn!(offset, size, "code region runs past the end of the container");
                writeln!(out, "\t\t\t<code range out of bounds>")?;
            }
        }
        Ok(())
    }
}

fn write_region_header(out: &mut dyn Write, name: &str, offset: u32) -> std::io::Result<()> {
    if offset == 0 {
        writeln!(out, "\t\t{}: (not present)", name)
    } else {
        writeln!(out, "\t\t{}: {:#010x}", name, offset)
    }
}

fn bad_index(index: u32) -> crate::error::CofferError {
    crate::container::ContainerError::BadClassIndex(index).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::InstructionSet;
    use crate::disasm;

    // Builders shared with the integration tests live in tests/common; the
    // unit tests here exercise formatting paths that do not need a full
    // container.

    struct NullDisasm;

    impl Disassembler for NullDisasm {
        fn instruction_set(&self) -> InstructionSet {
            InstructionSet::X86
        }

        fn dump_range(
            &self,
            out: &mut dyn std::io::Write,
            code: &[u8],
            _base: u64,
        ) -> std::io::Result<()> {
            writeln!(out, "\t\t\t<{} bytes>", code.len())
        }
    }

    fn tiny_container() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(b"ccd\n004\0");
        data.extend_from_slice(&0xcafe_f00du32.to_le_bytes()); // checksum
        data.extend_from_slice(&3u32.to_le_bytes()); // x86
        data.extend_from_slice(&0u32.to_le_bytes()); // dex file count
        data.extend_from_slice(&0u32.to_le_bytes()); // executable offset
        data.extend_from_slice(&0u32.to_le_bytes()); // snapshot checksum
        data.extend_from_slice(&4u32.to_le_bytes());
        data.extend_from_slice(b"boot");
        data
    }

    #[test]
    fn header_sections_render_in_order() {
        let container = Container::from_bytes(tiny_container()).unwrap();
        let dumper = ContainerDumper::new(&container, &NullDisasm, None);
        let mut out = Vec::new();
        dumper.dump(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        let sections = [
            "MAGIC:", "CHECKSUM:", "INSTRUCTION SET:", "DEX FILE COUNT:",
            "EXECUTABLE OFFSET:", "SNAPSHOT CHECKSUM:", "SNAPSHOT LOCATION:",
            "BEGIN:", "END:",
        ];
        let mut last = 0;
        for section in sections {
            let pos = text[last..].find(section).expect(section) + last;
            last = pos;
        }
        assert!(text.contains("0xcafef00d"));
        assert!(text.contains("x86"));
        assert!(text.contains("BEGIN:\n0x00000000"));
    }

    #[test]
    fn path_prefix_annotates_snapshot_location() {
        let container = Container::from_bytes(tiny_container()).unwrap();
        let dumper = ContainerDumper::new(&container, &NullDisasm, Some("/prefix"));
        let mut out = Vec::new();
        dumper.dump(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("boot (/prefixboot)"));
    }

    #[test]
    fn size_of_treats_zero_offset_as_absent() {
        let container = Container::from_bytes(tiny_container()).unwrap();
        let dumper = ContainerDumper::new(&container, &NullDisasm, None);
        assert_eq!(dumper.size_of(0), 0);
    }

    #[test]
    fn backend_selection_matches_container() {
        let container = Container::from_bytes(tiny_container()).unwrap();
        let backend = disasm::for_instruction_set(container.instruction_set()).unwrap();
        assert_eq!(backend.instruction_set(), InstructionSet::X86);
    }
}
