//! Object record decoding for the snapshot's object region.
//!
//! Every live object is one self-describing record. The category set is
//! closed, so classification is a tagged sum rather than open-ended type
//! inspection.

use bitflags::bitflags;

use crate::snapshot::{Result, SnapshotError};

/// Object records are padded to this alignment inside the region; the
/// padding is accounted separately from object bytes.
pub const OBJECT_ALIGNMENT: usize = 8;

/// Round `n` up to the object alignment.
pub fn align_object(n: usize) -> usize {
    (n + OBJECT_ALIGNMENT - 1) & !(OBJECT_ALIGNMENT - 1)
}

bitflags! {
    /// Access/dispatch flags carried by reflective method objects.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodFlags: u32 {
        const NATIVE = 1 << 0;
        const ABSTRACT = 1 << 1;
        const STATIC = 1 << 2;
        const CONSTRUCTOR = 1 << 3;
        const CALLEE_SAVE = 1 << 4;
        const RESOLUTION = 1 << 5;
    }
}

impl MethodFlags {
    /// Intrinsic methods carry no compiled code and no tables.
    pub fn is_intrinsic(&self) -> bool {
        self.intersects(MethodFlags::ABSTRACT | MethodFlags::CALLEE_SAVE | MethodFlags::RESOLUTION)
    }
}

/// One instance-field declaration from a class record.
#[derive(Debug, Clone, Copy)]
pub struct FieldDesc<'a> {
    pub name: &'a str,
    pub type_descriptor: &'a str,
}

/// Class object payload: descriptor, status, super reference and the fields
/// this class declares (not inherited ones).
#[derive(Debug, Clone)]
pub struct ClassRecord<'a> {
    pub descriptor: &'a str,
    pub status: i32,
    pub super_ref: u32,
    pub fields: Vec<FieldDesc<'a>>,
}

/// Array object payload; element slots are interpreted through the
/// component type of the array's class descriptor.
#[derive(Debug, Clone, Copy)]
pub struct ArrayRecord<'a> {
    data: &'a [u8],
    elems_start: usize,
    pub length: u32,
}

impl<'a> ArrayRecord<'a> {
    /// Raw 64-bit slot for element `i`.
    pub fn element(&self, i: u32) -> u64 {
        let start = self.elems_start + i as usize * 8;
        u64::from_le_bytes(self.data[start..start + 8].try_into().expect("validated"))
    }

    pub fn elements(&self) -> impl Iterator<Item = u64> + 'a {
        let this = *self;
        (0..self.length).map(move |i| this.element(i))
    }
}

/// Reflective field object payload.
#[derive(Debug, Clone, Copy)]
pub struct FieldRecord<'a> {
    pub name: &'a str,
    pub type_descriptor: &'a str,
    pub declaring_ref: u32,
}

/// Reflective method object payload.
#[derive(Debug, Clone, Copy)]
pub struct MethodRecord<'a> {
    pub name: &'a str,
    pub declaring_ref: u32,
    pub flags: MethodFlags,
    /// Index into the declaring class's container method records.
    pub method_index: u32,
    pub insns_code_units: u32,
}

impl MethodRecord<'_> {
    pub fn insns_bytes(&self) -> u64 {
        u64::from(self.insns_code_units) * 2
    }
}

/// Closed classification of a live object.
#[derive(Debug, Clone)]
pub enum ObjectKind<'a> {
    Object,
    Class(ClassRecord<'a>),
    Array(ArrayRecord<'a>),
    String(&'a str),
    Field(FieldRecord<'a>),
    Method(MethodRecord<'a>),
}

impl ObjectKind<'_> {
    pub fn tag_name(&self) -> &'static str {
        match self {
            ObjectKind::Object => "object",
            ObjectKind::Class(_) => "class",
            ObjectKind::Array(_) => "array",
            ObjectKind::String(_) => "string",
            ObjectKind::Field(_) => "field",
            ObjectKind::Method(_) => "method",
        }
    }
}

/// One decoded object record.
#[derive(Debug, Clone)]
pub struct ObjectRecord<'a> {
    /// Snapshot offset of the record; doubles as the object's identity.
    pub offset: u32,
    pub class_ref: u32,
    /// Flattened instance-field slots, root-to-leaf declaration order.
    pub field_values: Vec<u64>,
    pub kind: ObjectKind<'a>,
    /// Unpadded record length; this is the object's byte size for stats.
    pub byte_len: usize,
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(SnapshotError::Truncated {
                offset: self.pos,
                needed: n,
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    fn read_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn read_str16(&mut self) -> Result<&'a str> {
        let offset = self.pos;
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes).map_err(|_| SnapshotError::InvalidString { offset })
    }
}

impl<'a> ObjectRecord<'a> {
    /// Decode the object record at `offset` within the snapshot bytes.
    pub fn parse(data: &'a [u8], offset: u32) -> Result<Self> {
        let mut cur = Cursor {
            data,
            pos: offset as usize,
        };
        let start = cur.pos;
        let tag = cur.read_u8()?;
        let class_ref = cur.read_u32()?;
        let value_count = cur.read_u16()? as usize;
        let mut field_values = Vec::with_capacity(value_count);
        for _ in 0..value_count {
            field_values.push(cur.read_u64()?);
        }
        let kind = match tag {
            0 => ObjectKind::Object,
            1 => {
                let descriptor = cur.read_str16()?;
                let status = cur.read_i32()?;
                let super_ref = cur.read_u32()?;
                let field_count = cur.read_u16()? as usize;
                let mut fields = Vec::with_capacity(field_count);
                for _ in 0..field_count {
                    fields.push(FieldDesc {
                        name: cur.read_str16()?,
                        type_descriptor: cur.read_str16()?,
                    });
                }
                ObjectKind::Class(ClassRecord {
                    descriptor,
                    status,
                    super_ref,
                    fields,
                })
            }
            2 => {
                let length = cur.read_u32()?;
                let elems_start = cur.pos;
                cur.take(length as usize * 8)?;
                ObjectKind::Array(ArrayRecord {
                    data,
                    elems_start,
                    length,
                })
            }
            3 => ObjectKind::String(cur.read_str16()?),
            4 => ObjectKind::Field(FieldRecord {
                name: cur.read_str16()?,
                type_descriptor: cur.read_str16()?,
                declaring_ref: cur.read_u32()?,
            }),
            5 => ObjectKind::Method(MethodRecord {
                name: cur.read_str16()?,
                declaring_ref: cur.read_u32()?,
                flags: MethodFlags::from_bits_truncate(cur.read_u32()?),
                method_index: cur.read_u32()?,
                insns_code_units: cur.read_u32()?,
            }),
            other => return Err(SnapshotError::BadKind(other)),
        };
        Ok(ObjectRecord {
            offset,
            class_ref,
            field_values,
            kind,
            byte_len: cur.pos - start,
        })
    }
}
