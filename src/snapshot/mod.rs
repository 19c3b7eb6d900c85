//! Heap snapshot decoding.
//!
//! A snapshot is a memory-mappable object-graph image: a header, a fixed
//! root table, and a region of back-to-back object records. The walk is a
//! linear scan of that region; the file mapping is immutable, so the view is
//! quiesced by construction.

pub mod object;

use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::io::{IOLimits, SafeReader};

pub use object::{
    align_object, ArrayRecord, ClassRecord, FieldDesc, FieldRecord, MethodFlags, MethodRecord,
    ObjectKind, ObjectRecord, OBJECT_ALIGNMENT,
};

/// Snapshot decoding errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("invalid snapshot magic")]
    InvalidMagic,
    #[error("unsupported snapshot version")]
    UnsupportedVersion,
    #[error("truncated at {offset:#x}, needed {needed} bytes")]
    Truncated { offset: usize, needed: usize },
    #[error("root table has {found} slots, label table has {expected}")]
    RootCountMismatch { expected: usize, found: usize },
    #[error("object reference {0:#x} is outside the object region")]
    BadObjectRef(u32),
    #[error("unknown object kind tag {0}")]
    BadKind(u8),
    #[error("string at {offset:#x} is not UTF-8")]
    InvalidString { offset: usize },
}

pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Snapshot magic number
pub const SNAPSHOT_MAGIC: &[u8; 4] = b"hsn\n";
/// Snapshot format version
pub const SNAPSHOT_VERSION: &[u8; 4] = b"001\0";

/// Descriptive labels for the fixed root slots, one per slot, in slot order.
pub const ROOT_LABELS: &[&str] = &[
    "resolution_stub_array",
    "resolution_method",
    "callee_save_method",
    "refs_only_save_method",
    "refs_and_args_save_method",
    "container_location",
    "dex_caches",
    "class_roots",
];

/// Index of the root slot that names the matching container's location.
pub const CONTAINER_LOCATION_ROOT: usize = 5;

/// Decoded snapshot header fields.
#[derive(Debug, Clone)]
pub struct SnapshotHeader {
    pub magic: [u8; 4],
    pub version: [u8; 4],
    pub base: u32,
    pub container_checksum: u32,
    pub roots_offset: u32,
    pub root_count: u32,
    pub objects_offset: u32,
    pub objects_end: u32,
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

/// An opened, validated snapshot.
#[derive(Debug)]
pub struct Snapshot {
    backing: Backing,
    header: SnapshotHeader,
    roots: Vec<u32>,
}

impl Snapshot {
    /// Open and decode a snapshot file through the bounded reader.
    pub fn open<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
        let reader = SafeReader::open(path.as_ref(), IOLimits::default())?;
        debug!(path = %path.as_ref().display(), size = reader.size(), "opened snapshot");
        Ok(Self::decode(Backing::Mapped(reader))?)
    }

    /// Decode a snapshot from an in-memory byte buffer.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::decode(Backing::Owned(data))
    }

    fn decode(backing: Backing) -> Result<Self> {
        let data = backing.bytes();
        let need = |offset: usize, n: usize| -> Result<&[u8]> {
            data.get(offset..offset + n)
                .ok_or(SnapshotError::Truncated { offset, needed: n })
        };
        let read_u32 = |offset: usize| -> Result<u32> {
            Ok(u32::from_le_bytes(need(offset, 4)?.try_into().expect("fixed width")))
        };

        let magic: [u8; 4] = need(0, 4)?.try_into().expect("fixed width");
        if &magic != SNAPSHOT_MAGIC {
            return Err(SnapshotError::InvalidMagic);
        }
        let version: [u8; 4] = need(4, 4)?.try_into().expect("fixed width");
        if &version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion);
        }
        let header = SnapshotHeader {
            magic,
            version,
            base: read_u32(8)?,
            container_checksum: read_u32(12)?,
            roots_offset: read_u32(16)?,
            root_count: read_u32(20)?,
            objects_offset: read_u32(24)?,
            objects_end: read_u32(28)?,
        };

        // The label table is fixed; a slot-count mismatch means this build
        // cannot describe the snapshot and nothing it reports can be trusted.
        if header.root_count as usize != ROOT_LABELS.len() {
            return Err(SnapshotError::RootCountMismatch {
                expected: ROOT_LABELS.len(),
                found: header.root_count as usize,
            });
        }
        if header.objects_end as usize > data.len() || header.objects_offset > header.objects_end {
            return Err(SnapshotError::Truncated {
                offset: header.objects_offset as usize,
                needed: 0,
            });
        }

        let mut roots = Vec::with_capacity(header.root_count as usize);
        for i in 0..header.root_count as usize {
            roots.push(read_u32(header.roots_offset as usize + i * 4)?);
        }

        Ok(Snapshot {
            backing,
            header,
            roots,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        self.backing.bytes()
    }

    pub fn len(&self) -> usize {
        self.backing.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn header(&self) -> &SnapshotHeader {
        &self.header
    }

    /// Root object references, one per label slot; 0 is a null root.
    pub fn roots(&self) -> &[u32] {
        &self.roots
    }

    /// True when `offset` lies inside the snapshot's object region.
    pub fn contains(&self, offset: u32) -> bool {
        offset >= self.header.objects_offset && offset < self.header.objects_end
    }

    /// Decode the object referenced by `offset`. Fails on references outside
    /// the object region.
    pub fn object(&self, offset: u32) -> Result<ObjectRecord<'_>> {
        if !self.contains(offset) {
            return Err(SnapshotError::BadObjectRef(offset));
        }
        ObjectRecord::parse(self.bytes(), offset)
    }

    /// Resolve an object reference to its string value, if it is a string.
    pub fn string_at(&self, offset: u32) -> Option<String> {
        match self.object(offset).ok()?.kind {
            ObjectKind::String(s) => Some(s.to_string()),
            _ => None,
        }
    }

    /// Linear walk over every object record in the region, in address
    /// order. A decode failure mid-walk surfaces as an error item; the walk
    /// cannot continue past it.
    pub fn objects(&self) -> ObjectWalk<'_> {
        ObjectWalk {
            snapshot: self,
            next: self.header.objects_offset,
            failed: false,
        }
    }

    /// Bytes before the object region: header, root table, padding.
    pub fn header_bytes(&self) -> usize {
        self.header.objects_offset as usize
    }
}

/// Iterator over the snapshot's object region.
pub struct ObjectWalk<'a> {
    snapshot: &'a Snapshot,
    next: u32,
    failed: bool,
}

impl<'a> Iterator for ObjectWalk<'a> {
    type Item = Result<ObjectRecord<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next >= self.snapshot.header.objects_end {
            return None;
        }
        match ObjectRecord::parse(self.snapshot.bytes(), self.next) {
            Ok(record) => {
                self.next += align_object(record.byte_len) as u32;
                Some(Ok(record))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}
