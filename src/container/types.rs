//! Core container types, errors and the little-endian record cursor.

use thiserror::Error;

/// Container decoding errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContainerError {
    #[error("invalid container magic")]
    InvalidMagic,
    #[error("unsupported container version")]
    UnsupportedVersion,
    #[error("truncated at {offset:#x}, needed {needed} bytes")]
    Truncated { offset: usize, needed: usize },
    #[error("unsupported instruction set tag: {0}")]
    UnsupportedInstructionSet(u32),
    #[error("string at {offset:#x} is not UTF-8")]
    InvalidString { offset: usize },
    #[error("class count {header} in entry header does not match payload ({payload})")]
    ClassCountMismatch { header: u32, payload: u32 },
    #[error("class definition index {0} out of range")]
    BadClassIndex(u32),
    #[error("malformed table: {0}")]
    MalformedTable(String),
}

pub type Result<T> = std::result::Result<T, ContainerError>;

/// Container magic number
pub const CONTAINER_MAGIC: &[u8; 4] = b"ccd\n";
/// Container format version
pub const CONTAINER_VERSION: &[u8; 4] = b"004\0";
/// Embedded dex payload magic number
pub const PAYLOAD_MAGIC: &[u8; 4] = b"dex\n";
/// Embedded dex payload version
pub const PAYLOAD_VERSION: &[u8; 4] = b"001\0";

/// Instruction set the container's code was compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionSet {
    None,
    Arm,
    /// Mixed 16/32-bit encodings; code addresses carry a mode tag in bit 0.
    Thumb2,
    X86,
    X86_64,
    Mips,
}

impl InstructionSet {
    pub fn from_u32(val: u32) -> Result<Self> {
        match val {
            0 => Ok(InstructionSet::None),
            1 => Ok(InstructionSet::Arm),
            2 => Ok(InstructionSet::Thumb2),
            3 => Ok(InstructionSet::X86),
            4 => Ok(InstructionSet::X86_64),
            5 => Ok(InstructionSet::Mips),
            _ => Err(ContainerError::UnsupportedInstructionSet(val)),
        }
    }

    /// True when the low bit of a code address is an encoding-mode tag
    /// rather than part of the address.
    pub fn has_mode_bit(&self) -> bool {
        matches!(self, InstructionSet::Thumb2)
    }

    /// Strip the encoding-mode tag from a code offset, when present.
    pub fn adjust_code_offset(&self, offset: u32) -> u32 {
        if self.has_mode_bit() {
            offset & !0x1
        } else {
            offset
        }
    }
}

impl std::fmt::Display for InstructionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            InstructionSet::None => "none",
            InstructionSet::Arm => "arm",
            InstructionSet::Thumb2 => "thumb2",
            InstructionSet::X86 => "x86",
            InstructionSet::X86_64 => "x86_64",
            InstructionSet::Mips => "mips",
        };
        write!(f, "{}", name)
    }
}

/// Compilation status tag recorded for every class entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassStatus {
    Error,
    NotReady,
    Loaded,
    Resolved,
    Verifying,
    RetryVerificationAtRuntime,
    Verified,
    Initializing,
    Initialized,
    Unknown(i32),
}

impl From<i32> for ClassStatus {
    fn from(val: i32) -> Self {
        match val {
            -1 => ClassStatus::Error,
            0 => ClassStatus::NotReady,
            1 => ClassStatus::Loaded,
            2 => ClassStatus::Resolved,
            3 => ClassStatus::Verifying,
            4 => ClassStatus::RetryVerificationAtRuntime,
            5 => ClassStatus::Verified,
            6 => ClassStatus::Initializing,
            7 => ClassStatus::Initialized,
            other => ClassStatus::Unknown(other),
        }
    }
}

impl std::fmt::Display for ClassStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassStatus::Error => write!(f, "Error"),
            ClassStatus::NotReady => write!(f, "NotReady"),
            ClassStatus::Loaded => write!(f, "Loaded"),
            ClassStatus::Resolved => write!(f, "Resolved"),
            ClassStatus::Verifying => write!(f, "Verifying"),
            ClassStatus::RetryVerificationAtRuntime => write!(f, "RetryVerificationAtRuntime"),
            ClassStatus::Verified => write!(f, "Verified"),
            ClassStatus::Initializing => write!(f, "Initializing"),
            ClassStatus::Initialized => write!(f, "Initialized"),
            ClassStatus::Unknown(v) => write!(f, "Unknown({})", v),
        }
    }
}

/// Sequential little-endian reader over a raw byte range.
///
/// The container and payload formats interleave fixed-width words with
/// variable-length strings, so decoding is cursor-driven rather than
/// offset-table driven.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn at(data: &'a [u8], pos: usize) -> Result<Self> {
        if pos > data.len() {
            return Err(ContainerError::Truncated {
                offset: pos,
                needed: 0,
            });
        }
        Ok(Self { data, pos })
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(ContainerError::Truncated {
                offset: self.pos,
                needed: n,
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    /// Read a u16-length-prefixed UTF-8 string.
    pub fn read_str16(&mut self) -> Result<&'a str> {
        let offset = self.pos;
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes).map_err(|_| ContainerError::InvalidString { offset })
    }

    /// Read a u32-length-prefixed UTF-8 string.
    pub fn read_str32(&mut self) -> Result<&'a str> {
        let offset = self.pos;
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes).map_err(|_| ContainerError::InvalidString { offset })
    }
}
