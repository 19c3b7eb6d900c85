//! Embedded dex payload decoding.
//!
//! Each dex entry in the container points at an embedded class-index payload
//! describing the classes and methods the surrounding method records are
//! aligned with. The payload is metadata only; compiled code and tables live
//! in the container proper.

use crate::container::types::{
    ByteCursor, ContainerError, Result, PAYLOAD_MAGIC, PAYLOAD_VERSION,
};

/// One method definition: name, signature descriptor and the size of its
/// source instructions in 16-bit code units.
#[derive(Debug, Clone)]
pub struct MethodDef {
    pub name: String,
    pub signature: String,
    pub insns_code_units: u32,
}

impl MethodDef {
    /// Source instruction bytes (two bytes per code unit).
    pub fn insns_bytes(&self) -> u64 {
        u64::from(self.insns_code_units) * 2
    }
}

/// One class definition with its direct methods followed by virtual methods.
#[derive(Debug, Clone)]
pub struct ClassDef {
    pub type_idx: u32,
    pub descriptor: String,
    direct_count: u32,
    methods: Vec<MethodDef>,
}

impl ClassDef {
    /// All methods, direct first then virtual, index-aligned with the
    /// container's method records for this class.
    pub fn methods(&self) -> &[MethodDef] {
        &self.methods
    }

    pub fn direct_count(&self) -> u32 {
        self.direct_count
    }
}

/// A fully decoded embedded payload.
#[derive(Debug, Clone)]
pub struct DexPayload {
    pub checksum: u32,
    classes: Vec<ClassDef>,
}

impl DexPayload {
    /// Decode a payload from `data` starting at `offset`. A bad magic or a
    /// truncated record means the payload "fails to open"; callers treat
    /// that as recoverable.
    pub fn parse(data: &[u8], offset: u32) -> Result<Self> {
        let mut cur = ByteCursor::at(data, offset as usize)?;
        if cur.read_bytes(4)? != PAYLOAD_MAGIC {
            return Err(ContainerError::InvalidMagic);
        }
        if cur.read_bytes(4)? != PAYLOAD_VERSION {
            return Err(ContainerError::UnsupportedVersion);
        }
        let checksum = cur.read_u32()?;
        let class_defs_size = cur.read_u32()?;
        let mut classes = Vec::with_capacity(class_defs_size as usize);
        for _ in 0..class_defs_size {
            let type_idx = cur.read_u32()?;
            let descriptor = cur.read_str16()?.to_string();
            let direct_count = cur.read_u32()?;
            let virtual_count = cur.read_u32()?;
            let total = direct_count as usize + virtual_count as usize;
            let mut methods = Vec::with_capacity(total);
            for _ in 0..total {
                let name = cur.read_str16()?.to_string();
                let signature = cur.read_str16()?.to_string();
                let insns_code_units = cur.read_u32()?;
                methods.push(MethodDef {
                    name,
                    signature,
                    insns_code_units,
                });
            }
            classes.push(ClassDef {
                type_idx,
                descriptor,
                direct_count,
                methods,
            });
        }
        Ok(DexPayload { checksum, classes })
    }

    pub fn class_count(&self) -> u32 {
        self.classes.len() as u32
    }

    pub fn class_def(&self, index: u32) -> Option<&ClassDef> {
        self.classes.get(index as usize)
    }

    /// Locate a class definition index by its type descriptor.
    pub fn find_class_def(&self, descriptor: &str) -> Option<u32> {
        self.classes
            .iter()
            .position(|c| c.descriptor == descriptor)
            .map(|i| i as u32)
    }
}
