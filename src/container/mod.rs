//! Compiled-code container decoding.
//!
//! A container is an immutable byte range holding a header, an ordered list
//! of dex entries (each with an embedded class-index payload), per-class
//! method records, and the raw code/table regions those records point at.
//! Decoding never writes and never verifies checksums; they are surfaced
//! verbatim for the report.

pub mod offsets;
pub mod payload;
pub mod tables;
pub mod types;

use std::path::Path;

use tracing::debug;

use crate::io::{IOLimits, SafeReader};

pub use offsets::OffsetIndex;
pub use payload::{ClassDef, DexPayload, MethodDef};
pub use types::{
    ByteCursor, ClassStatus, ContainerError, InstructionSet, Result, CONTAINER_MAGIC,
    CONTAINER_VERSION,
};

/// Decoded container header fields, rendered verbatim by the dumper.
#[derive(Debug, Clone)]
pub struct ContainerHeader {
    pub magic: [u8; 4],
    pub version: [u8; 4],
    pub checksum: u32,
    pub instruction_set: InstructionSet,
    pub dex_file_count: u32,
    pub executable_offset: u32,
    pub snapshot_checksum: u32,
    pub snapshot_location: String,
}

/// Per-entry metadata decoded from the container's dex entry table.
#[derive(Debug, Clone)]
struct DexEntryMeta {
    location: String,
    checksum: u32,
    payload_offset: u32,
    class_offsets: Vec<u32>,
}

#[derive(Debug)]
enum Backing {
    Mapped(SafeReader),
    Owned(Vec<u8>),
}

impl Backing {
    fn bytes(&self) -> &[u8] {
        match self {
            Backing::Mapped(reader) => reader.bytes(),
            Backing::Owned(data) => data,
        }
    }
}

/// An opened, decoded container.
#[derive(Debug)]
pub struct Container {
    backing: Backing,
    header: ContainerHeader,
    entries: Vec<DexEntryMeta>,
}

impl Container {
    /// Open and decode a container file through the bounded reader.
    pub fn open<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
        let reader = SafeReader::open(path.as_ref(), IOLimits::default())?;
        debug!(path = %path.as_ref().display(), size = reader.size(), "opened container");
        Ok(Self::decode(Backing::Mapped(reader))?)
    }

    /// Decode a container from an in-memory byte buffer.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::decode(Backing::Owned(data))
    }

    fn decode(backing: Backing) -> Result<Self> {
        let data = backing.bytes();
        let mut cur = ByteCursor::new(data);
        let magic: [u8; 4] = cur.read_bytes(4)?.try_into().expect("fixed width");
        if &magic != CONTAINER_MAGIC {
            return Err(ContainerError::InvalidMagic);
        }
        let version: [u8; 4] = cur.read_bytes(4)?.try_into().expect("fixed width");
        if &version != CONTAINER_VERSION {
            return Err(ContainerError::UnsupportedVersion);
        }
        let checksum = cur.read_u32()?;
        let instruction_set = InstructionSet::from_u32(cur.read_u32()?)?;
        let dex_file_count = cur.read_u32()?;
        let executable_offset = cur.read_u32()?;
        let snapshot_checksum = cur.read_u32()?;
        let snapshot_location = cur.read_str32()?.to_string();

        let mut entries = Vec::with_capacity(dex_file_count as usize);
        for _ in 0..dex_file_count {
            let location = cur.read_str32()?.to_string();
            let checksum = cur.read_u32()?;
            let payload_offset = cur.read_u32()?;
            let class_count = cur.read_u32()?;
            let mut class_offsets = Vec::with_capacity(class_count as usize);
            for _ in 0..class_count {
                class_offsets.push(cur.read_u32()?);
            }
            entries.push(DexEntryMeta {
                location,
                checksum,
                payload_offset,
                class_offsets,
            });
        }

        let header = ContainerHeader {
            magic,
            version,
            checksum,
            instruction_set,
            dex_file_count,
            executable_offset,
            snapshot_checksum,
            snapshot_location,
        };
        Ok(Container {
            backing,
            header,
            entries,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        self.backing.bytes()
    }

    /// Total container length; offsets live in `[0, len)`.
    pub fn len(&self) -> usize {
        self.backing.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    pub fn instruction_set(&self) -> InstructionSet {
        self.header.instruction_set
    }

    pub fn dex_entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn dex_entry(&self, index: usize) -> Option<DexEntry<'_>> {
        self.entries.get(index).map(|meta| DexEntry {
            container: self,
            meta,
        })
    }

    pub fn dex_entries(&self) -> impl Iterator<Item = DexEntry<'_>> {
        self.entries.iter().map(move |meta| DexEntry {
            container: self,
            meta,
        })
    }

    /// Slice a region out of the container, or `None` when out of range.
    pub fn region(&self, offset: u32, size: u32) -> Option<&[u8]> {
        let start = offset as usize;
        let end = start.checked_add(size as usize)?;
        self.backing.bytes().get(start..end)
    }
}

/// One dex entry: a location/checksum pair plus the lazily opened payload.
pub struct DexEntry<'c> {
    container: &'c Container,
    meta: &'c DexEntryMeta,
}

impl<'c> DexEntry<'c> {
    pub fn location(&self) -> &str {
        &self.meta.location
    }

    pub fn checksum(&self) -> u32 {
        self.meta.checksum
    }

    pub fn payload_offset(&self) -> u32 {
        self.meta.payload_offset
    }

    /// Decode the embedded payload. Failure here is recoverable at the dump
    /// level: the entry renders as NOT FOUND and the dump moves on.
    pub fn open_payload(&self) -> Result<DexPayload> {
        let payload = DexPayload::parse(self.container.bytes(), self.meta.payload_offset)?;
        if payload.class_count() != self.meta.class_offsets.len() as u32 {
            return Err(ContainerError::ClassCountMismatch {
                header: self.meta.class_offsets.len() as u32,
                payload: payload.class_count(),
            });
        }
        Ok(payload)
    }

    /// Decode the class entry at `class_def_index`, using the payload for
    /// the method count.
    pub fn class_entry(&self, payload: &DexPayload, class_def_index: u32) -> Result<ClassEntry> {
        let offset = *self
            .meta
            .class_offsets
            .get(class_def_index as usize)
            .ok_or(ContainerError::BadClassIndex(class_def_index))?;
        let class_def = payload
            .class_def(class_def_index)
            .ok_or(ContainerError::BadClassIndex(class_def_index))?;
        let mut cur = ByteCursor::at(self.container.bytes(), offset as usize)?;
        let status = ClassStatus::from(cur.read_i32()?);
        let mut methods = Vec::with_capacity(class_def.methods().len());
        for _ in 0..class_def.methods().len() {
            methods.push(MethodEntry {
                frame_size: cur.read_u32()?,
                core_spill_mask: cur.read_u32()?,
                fp_spill_mask: cur.read_u32()?,
                mapping_table_offset: cur.read_u32()?,
                vmap_table_offset: cur.read_u32()?,
                gc_map_offset: cur.read_u32()?,
                code_offset: cur.read_u32()?,
                code_size: cur.read_u32()?,
                invoke_stub_offset: cur.read_u32()?,
            });
        }
        Ok(ClassEntry { status, methods })
    }
}

/// A class's status tag and its method records, direct methods first.
#[derive(Debug, Clone)]
pub struct ClassEntry {
    pub status: ClassStatus,
    methods: Vec<MethodEntry>,
}

impl ClassEntry {
    pub fn methods(&self) -> &[MethodEntry] {
        &self.methods
    }

    pub fn method(&self, index: u32) -> Option<&MethodEntry> {
        self.methods.get(index as usize)
    }
}

/// One method record. Code size is explicit; the four auxiliary regions are
/// sized through the offset index. A zero offset means "not present".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodEntry {
    pub frame_size: u32,
    pub core_spill_mask: u32,
    pub fp_spill_mask: u32,
    pub mapping_table_offset: u32,
    pub vmap_table_offset: u32,
    pub gc_map_offset: u32,
    pub code_offset: u32,
    pub code_size: u32,
    pub invoke_stub_offset: u32,
}

impl MethodEntry {
    /// Code offset with any instruction-set mode tag stripped.
    pub fn code_offset_adjusted(&self, instruction_set: InstructionSet) -> u32 {
        instruction_set.adjust_code_offset(self.code_offset)
    }
}
