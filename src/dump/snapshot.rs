//! Snapshot report: header, labelled roots, container resolution, the heap
//! walk and the closing statistics block.

use std::io::Write;

use tracing::warn;

use crate::container::{ClassStatus, Container};
use crate::disasm::{self, Backend};
use crate::dump::container::ContainerDumper;
use crate::dump::render::{ascii_version, component_descriptor, pretty_descriptor};
use crate::dump::stats::StatsEngine;
use crate::error::Result;
use crate::snapshot::{
    align_object, ArrayRecord, ClassRecord, MethodFlags, MethodRecord, ObjectKind, ObjectRecord,
    Snapshot, SnapshotError, CONTAINER_LOCATION_ROOT, ROOT_LABELS,
};

/// Dumps one snapshot to a writer, pulling region sizes and compiled-code
/// locations out of the matching container.
pub struct SnapshotDumper<'a> {
    snapshot: &'a Snapshot,
    path_prefix: Option<&'a str>,
    /// Containers of any boot snapshots, consulted after the primary when a
    /// method's declaring class lives in a shared dependency.
    boot_containers: &'a [Container],
}

impl<'a> SnapshotDumper<'a> {
    pub fn new(
        snapshot: &'a Snapshot,
        path_prefix: Option<&'a str>,
        boot_containers: &'a [Container],
    ) -> Self {
        SnapshotDumper {
            snapshot,
            path_prefix,
            boot_containers,
        }
    }

    /// The container location recorded in the snapshot's root table, if the
    /// slot holds a string.
    pub fn container_location(snapshot: &Snapshot) -> Option<String> {
        let root = *snapshot.roots().get(CONTAINER_LOCATION_ROOT)?;
        if root == 0 {
            return None;
        }
        snapshot.string_at(root)
    }

    /// Filesystem path for a recorded container location.
    pub fn container_path(location: &str, path_prefix: Option<&str>) -> String {
        match path_prefix {
            Some(prefix) => format!("{}{}", prefix, location),
            None => location.to_string(),
        }
    }

    /// Write the full snapshot report.
    pub fn dump(&mut self, out: &mut dyn Write) -> Result<()> {
        let header = self.snapshot.header();

        writeln!(out, "MAGIC:")?;
        out.write_all(&header.magic)?;
        writeln!(out, "{}", ascii_version(&header.version))?;
        writeln!(out)?;

        writeln!(out, "BASE:")?;
        writeln!(out, "{:#010x}", header.base)?;
        writeln!(out)?;

        writeln!(out, "CONTAINER CHECKSUM:")?;
        writeln!(out, "{:#010x}", header.container_checksum)?;
        writeln!(out)?;

        writeln!(out, "OBJECTS BEGIN:")?;
        writeln!(out, "{:#010x}", header.objects_offset)?;
        writeln!(out)?;

        writeln!(out, "OBJECTS END:")?;
        writeln!(out, "{:#010x}", header.objects_end)?;
        writeln!(out)?;

        writeln!(out, "ROOTS:")?;
        for (label, &root) in ROOT_LABELS.iter().zip(self.snapshot.roots()) {
            writeln!(out, "{}: {:#010x}", label, root)?;
            if root == 0 {
                continue;
            }
            let record = self.snapshot.object(root)?;
            if let ObjectKind::Array(array) = &record.kind {
                let class = class_record(self.snapshot, record.class_ref)?;
                let component = component_descriptor(class.descriptor);
                for (i, slot) in array.elements().enumerate() {
                    writeln!(
                        out,
                        "\t{}: {}",
                        i,
                        pretty_value(self.snapshot, slot, component)?
                    )?;
                }
            }
        }
        writeln!(out)?;

        writeln!(out, "CONTAINER LOCATION:")?;
        let Some(location) = Self::container_location(self.snapshot) else {
            warn!("snapshot has no container location root");
            writeln!(out, "NOT FOUND")?;
            return Ok(());
        };
        let path = Self::container_path(&location, self.path_prefix);
        if self.path_prefix.is_some() {
            writeln!(out, "{} ({})", location, path)?;
        } else {
            writeln!(out, "{}", location)?;
        }
        let container = match Container::open(&path) {
            Ok(container) => container,
            Err(err) => {
                warn!(path, %err, "container named by the snapshot failed to open");
                writeln!(out, "NOT FOUND")?;
                return Ok(());
            }
        };
        writeln!(out)?;

        let backend = disasm::for_instruction_set(container.instruction_set())?;
        let primary = ContainerDumper::new(&container, &backend, self.path_prefix);
        let boot_backends: Vec<Backend> = self
            .boot_containers
            .iter()
            .map(|c| disasm::for_instruction_set(c.instruction_set()))
            .collect::<std::result::Result<_, _>>()?;
        let boot_dumpers: Vec<ContainerDumper<'_>> = self
            .boot_containers
            .iter()
            .zip(boot_backends.iter())
            .map(|(c, b)| ContainerDumper::new(c, b, None))
            .collect();
        let mut dumpers: Vec<&ContainerDumper<'_>> = vec![&primary];
        dumpers.extend(boot_dumpers.iter());

        let mut stats = StatsEngine::new();
        stats.file_bytes = self.snapshot.len() as u64;
        stats.header_bytes = self.snapshot.header_bytes() as u64;
        stats.container_file_bytes = container.len() as u64;

        writeln!(out, "OBJECTS:")?;
        {
            let mut walker = HeapWalker {
                snapshot: self.snapshot,
                dumpers: &dumpers,
                stats: &mut stats,
            };
            for item in self.snapshot.objects() {
                let record = item?;
                walker.visit(out, &record)?;
            }
        }
        stats.alignment_bytes +=
            self.snapshot.len() as u64 - u64::from(header.objects_end);
        writeln!(out)?;

        stats.dump(out)?;
        writeln!(out)?;

        // The report closes with the referenced container in full.
        primary.dump(out)?;
        Ok(())
    }
}

/// Resolve a reference to its class record.
fn class_record(snapshot: &Snapshot, class_ref: u32) -> Result<ClassRecord<'_>> {
    let record = snapshot.object(class_ref)?;
    match record.kind {
        ObjectKind::Class(class) => Ok(class),
        _ => Err(SnapshotError::BadObjectRef(class_ref).into()),
    }
}

/// One-line rendition of the object a reference points at.
fn pretty_ref(snapshot: &Snapshot, reference: u32, declared: &str) -> Result<String> {
    if reference == 0 {
        return Ok(format!("null   {}", pretty_descriptor(declared)));
    }
    let record = snapshot.object(reference)?;
    Ok(match &record.kind {
        ObjectKind::String(s) => format!("{:#010x}   string \"{}\"", reference, s),
        ObjectKind::Class(class) => {
            format!("{:#010x}   class {}", reference, pretty_descriptor(class.descriptor))
        }
        ObjectKind::Field(field) => {
            let declaring = class_record(snapshot, field.declaring_ref)?;
            format!(
                "{:#010x}   field {}.{}",
                reference,
                pretty_descriptor(declaring.descriptor),
                field.name
            )
        }
        ObjectKind::Method(method) => {
            let declaring = class_record(snapshot, method.declaring_ref)?;
            format!(
                "{:#010x}   method {}.{}",
                reference,
                pretty_descriptor(declaring.descriptor),
                method.name
            )
        }
        ObjectKind::Object | ObjectKind::Array(_) => {
            let class = class_record(snapshot, record.class_ref)?;
            format!("{:#010x}   {}", reference, pretty_descriptor(class.descriptor))
        }
    })
}

/// Render a raw 64-bit slot according to the descriptor it was declared as.
fn pretty_value(snapshot: &Snapshot, raw: u64, descriptor: &str) -> Result<String> {
    Ok(match descriptor.as_bytes().first() {
        Some(b'J') => format!("{} ({:#x})", raw as i64, raw),
        Some(b'D') => {
            let value = f64::from_bits(raw);
            format!("{} (raw {:#018x})", value, raw)
        }
        Some(b'F') => {
            let value = f32::from_bits(raw as u32);
            format!("{} (raw {:#010x})", value, raw as u32)
        }
        Some(b'Z') | Some(b'B') | Some(b'S') | Some(b'C') | Some(b'I') => {
            format!("{} ({:#x})", raw as u32 as i32, raw as u32)
        }
        Some(b'L') | Some(b'[') => pretty_ref(snapshot, raw as u32, descriptor)?,
        _ => format!("{:#x}", raw),
    })
}

/// Per-object rendering and accounting state for the heap walk.
struct HeapWalker<'w> {
    snapshot: &'w Snapshot,
    dumpers: &'w [&'w ContainerDumper<'w>],
    stats: &'w mut StatsEngine,
}

impl<'w> HeapWalker<'w> {
    fn visit(&mut self, out: &mut dyn Write, record: &ObjectRecord<'_>) -> Result<()> {
        let class = class_record(self.snapshot, record.class_ref)?;

        match &record.kind {
            ObjectKind::Object => {
                writeln!(
                    out,
                    "{:#010x}: {}",
                    record.offset,
                    pretty_descriptor(class.descriptor)
                )?;
            }
            ObjectKind::Class(c) => {
                writeln!(
                    out,
                    "{:#010x}: class \"{}\" ({})",
                    record.offset,
                    pretty_descriptor(c.descriptor),
                    ClassStatus::from(c.status)
                )?;
            }
            ObjectKind::Array(array) => {
                writeln!(
                    out,
                    "{:#010x}: {} length:{}",
                    record.offset,
                    pretty_descriptor(class.descriptor),
                    array.length
                )?;
            }
            ObjectKind::String(s) => {
                writeln!(out, "{:#010x}: string \"{}\"", record.offset, s)?;
            }
            ObjectKind::Field(field) => {
                let declaring = class_record(self.snapshot, field.declaring_ref)?;
                writeln!(
                    out,
                    "{:#010x}: field {}.{}",
                    record.offset,
                    pretty_descriptor(declaring.descriptor),
                    field.name
                )?;
            }
            ObjectKind::Method(method) => {
                let declaring = class_record(self.snapshot, method.declaring_ref)?;
                writeln!(
                    out,
                    "{:#010x}: method {}.{}",
                    record.offset,
                    pretty_descriptor(declaring.descriptor),
                    method.name
                )?;
            }
        }

        // A class record's field table declares instance layout; only
        // instances carry the matching value slots.
        if !matches!(record.kind, ObjectKind::Class(_)) {
            self.dump_instance_fields(out, record, &class)?;
        }
        match &record.kind {
            ObjectKind::Array(array) => {
                self.dump_array(out, array, class.descriptor)?;
            }
            ObjectKind::Class(c) => {
                for field in &c.fields {
                    writeln!(
                        out,
                        "\tdeclares {} {}",
                        pretty_descriptor(field.type_descriptor),
                        field.name
                    )?;
                }
            }
            ObjectKind::Method(method) => {
                self.dump_method(out, method, record.byte_len as u64)?;
            }
            _ => {}
        }

        self.stats.update(class.descriptor, record.byte_len as u64);
        self.stats.object_bytes += record.byte_len as u64;
        self.stats.alignment_bytes +=
            (align_object(record.byte_len) - record.byte_len) as u64;
        Ok(())
    }

    /// Instance fields, inherited declarations first, in slot order.
    fn dump_instance_fields(
        &mut self,
        out: &mut dyn Write,
        record: &ObjectRecord<'_>,
        class: &ClassRecord<'_>,
    ) -> Result<()> {
        let mut chain = vec![class.clone()];
        let mut super_ref = class.super_ref;
        while super_ref != 0 {
            let ancestor = class_record(self.snapshot, super_ref)?;
            super_ref = ancestor.super_ref;
            chain.push(ancestor);
        }
        chain.reverse();

        let mut slot = 0usize;
        for ancestor in &chain {
            for field in &ancestor.fields {
                let Some(&value) = record.field_values.get(slot) else {
                    warn!(
                        offset = record.offset,
                        "object carries fewer field slots than its class declares"
                    );
                    return Ok(());
                };
                writeln!(
                    out,
                    "\t{}: {}",
                    field.name,
                    pretty_value(self.snapshot, value, field.type_descriptor)?
                )?;
                slot += 1;
            }
        }
        Ok(())
    }

    /// Array elements with run-length compression over equal values.
    fn dump_array(
        &mut self,
        out: &mut dyn Write,
        array: &ArrayRecord<'_>,
        class_descriptor: &str,
    ) -> Result<()> {
        let component = component_descriptor(class_descriptor);
        let mut i = 0u32;
        while i < array.length {
            let value = array.element(i);
            let mut j = i + 1;
            while j < array.length && array.element(j) == value {
                j += 1;
            }
            let rendered = pretty_value(self.snapshot, value, component)?;
            if j - i > 1 {
                writeln!(out, "\t{} to {}: {}", i, j - 1, rendered)?;
            } else {
                writeln!(out, "\t{}: {}", i, rendered)?;
            }
            i = j;
        }
        Ok(())
    }

    fn find_method(
        &self,
        descriptor: &str,
        method_index: u32,
    ) -> Option<(&'w ContainerDumper<'w>, crate::container::MethodEntry)> {
        self.dumpers.iter().find_map(|dumper| {
            dumper
                .method_entry(descriptor, method_index)
                .map(|entry| (*dumper, entry))
        })
    }

    /// Code location and space accounting for one reflective method object.
    fn dump_method(
        &mut self,
        out: &mut dyn Write,
        method: &MethodRecord<'_>,
        object_bytes: u64,
    ) -> Result<()> {
        if method.flags.is_intrinsic() {
            return Ok(());
        }
        let declaring = class_record(self.snapshot, method.declaring_ref)?;
        let Some((dumper, entry)) = self.find_method(declaring.descriptor, method.method_index)
        else {
            warn!(
                descriptor = declaring.descriptor,
                method = method.name,
                "method object has no container record"
            );
            return Ok(());
        };
        let code_offset = entry.code_offset_adjusted(dumper.instruction_set());

        if method.flags.contains(MethodFlags::NATIVE) {
            let stub = self.stats.account_region(entry.invoke_stub_offset, dumper);
            if stub.first_occurrence {
                self.stats.managed_to_native_code_bytes += stub.bytes;
            }
            let code = self.stats.account_code(code_offset, u64::from(entry.code_size));
            if code.first_occurrence {
                self.stats.native_to_managed_code_bytes += code.bytes;
            }
            if entry.code_offset != 0 {
                writeln!(out, "\tCONTAINER CODE: {:#010x}", code_offset)?;
            }
            return Ok(());
        }

        let gc_map = self.stats.account_region(entry.gc_map_offset, dumper);
        if gc_map.first_occurrence {
            self.stats.gc_map_bytes += gc_map.bytes;
        }
        let mapping = self.stats.account_region(entry.mapping_table_offset, dumper);
        if mapping.first_occurrence {
            self.stats.pc_mapping_table_bytes += mapping.bytes;
        }
        let vmap = self.stats.account_region(entry.vmap_table_offset, dumper);
        if vmap.first_occurrence {
            self.stats.vmap_table_bytes += vmap.bytes;
        }
        let stub = self.stats.account_region(entry.invoke_stub_offset, dumper);
        if stub.first_occurrence {
            self.stats.native_to_managed_code_bytes += stub.bytes;
        }

        let dex_bytes = method.insns_bytes();
        self.stats.dex_instruction_bytes += dex_bytes;

        let code = self.stats.account_code(code_offset, u64::from(entry.code_size));
        if code.first_occurrence {
            self.stats.managed_code_bytes += code.bytes;
            let is_class_initializer = method
                .flags
                .contains(MethodFlags::CONSTRUCTOR | MethodFlags::STATIC);
            if is_class_initializer {
                self.stats.class_initializer_code_bytes += code.bytes;
            } else if method.flags.contains(MethodFlags::CONSTRUCTOR) && dex_bytes > 4000 {
                self.stats.large_initializer_code_bytes += code.bytes;
            } else if dex_bytes > 16000 {
                self.stats.large_method_code_bytes += code.bytes;
            }
        }
        self.stats.managed_code_bytes_ignoring_deduplication += u64::from(entry.code_size);

        if entry.code_offset != 0 {
            writeln!(
                out,
                "\tCONTAINER CODE: {:#010x}-{:#010x}",
                code_offset,
                code_offset + entry.code_size
            )?;
        }
        writeln!(
            out,
            "\tSIZE: Dex Instructions={} GC={} Mapping={}",
            dex_bytes, gc_map.bytes, mapping.bytes
        )?;

        let total = object_bytes
            + dex_bytes
            + gc_map.bytes
            + mapping.bytes
            + vmap.bytes
            + stub.bytes
            + u64::from(entry.code_size);
        let expansion = if dex_bytes == 0 {
            0.0
        } else {
            entry.code_size as f64 / dex_bytes as f64
        };
        self.stats.compute_outliers(
            format!(
                "{}.{}",
                pretty_descriptor(declaring.descriptor),
                method.name
            ),
            total,
            expansion,
        );
        Ok(())
    }
}
