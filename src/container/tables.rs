//! Decoders for the three per-method auxiliary tables.
//!
//! All three decoders are lazy views over a raw byte range inside the
//! container: construction validates the header words only, and entries are
//! produced by iteration.

use crate::container::types::{ByteCursor, ContainerError, Result};

/// One native-pc / dex-pc correspondence pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingEntry {
    pub native_pc_offset: u32,
    pub dex_pc: u32,
    /// True on the final pair of the native-to-source half; consumers use
    /// this to split the two halves in output.
    pub ends_pc_to_dex_section: bool,
}

/// Bidirectional native-pc <-> source-line table.
///
/// Layout: `length` (total u32 words of pair data), `pc_to_dex_entries`
/// (words in the first half), then `length / 2` pairs.
#[derive(Debug, Clone)]
pub struct MappingTable<'a> {
    data: &'a [u8],
    start: usize,
    length: u32,
    pc_to_dex_entries: u32,
}

impl<'a> MappingTable<'a> {
    pub fn parse(data: &'a [u8], offset: u32) -> Result<Self> {
        let mut cur = ByteCursor::at(data, offset as usize)?;
        let length = cur.read_u32()?;
        let pc_to_dex_entries = cur.read_u32()?;
        if length % 2 != 0 {
            return Err(ContainerError::MalformedTable(format!(
                "mapping table length {} is not an even word count",
                length
            )));
        }
        // Validate the pair region up front so iteration cannot run off the
        // container.
        let start = cur.position();
        ByteCursor::at(data, start)?.read_bytes(length as usize * 4)?;
        Ok(MappingTable {
            data,
            start,
            length,
            pc_to_dex_entries,
        })
    }

    pub fn len(&self) -> usize {
        (self.length / 2) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn entries(&self) -> impl Iterator<Item = MappingEntry> + 'a {
        let data = self.data;
        let start = self.start;
        let boundary = self.pc_to_dex_entries;
        (0..self.len()).map(move |i| {
            let mut cur = ByteCursor::at(data, start + i * 8).expect("validated in parse");
            let native_pc_offset = cur.read_u32().expect("validated in parse");
            let dex_pc = cur.read_u32().expect("validated in parse");
            MappingEntry {
                native_pc_offset,
                dex_pc,
                ends_pc_to_dex_section: (i as u32 + 1) * 2 == boundary,
            }
        })
    }
}

/// Physical location a virtual register was promoted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicalSlot {
    Core(u32),
    Fp(u32),
}

/// Register-promotion ("vmap") table: an ordered list of virtual-register
/// ids. The physical slot of entry `i` is not stored; it is the position of
/// the `i+1`-th set bit in the concatenation of the core spill mask (16 bit
/// positions) and the fp spill mask (positions 16 and up).
#[derive(Debug, Clone)]
pub struct VmapTable<'a> {
    data: &'a [u8],
    start: usize,
    count: u16,
}

impl<'a> VmapTable<'a> {
    pub fn parse(data: &'a [u8], offset: u32) -> Result<Self> {
        let mut cur = ByteCursor::at(data, offset as usize)?;
        let count = cur.read_u16()?;
        let start = cur.position();
        ByteCursor::at(data, start)?.read_bytes(count as usize * 2)?;
        Ok(VmapTable { data, start, count })
    }

    pub fn len(&self) -> usize {
        self.count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Virtual-register id stored at entry `i`.
    pub fn vreg(&self, i: usize) -> u16 {
        let mut cur = ByteCursor::at(self.data, self.start + i * 2).expect("validated in parse");
        cur.read_u16().expect("validated in parse")
    }

    pub fn entries(&self) -> impl Iterator<Item = u16> + '_ {
        (0..self.len()).map(move |i| self.vreg(i))
    }
}

/// Resolve the physical slot of vmap entry `index`.
///
/// The scan consumes the core mask completely before consulting the fp
/// mask; fp bit `r` sits at position `16 + r`. Exhausting both masks before
/// the requested entry is reached means the table disagrees with the spill
/// masks.
pub fn physical_slot(index: usize, core_mask: u32, fp_mask: u32) -> Result<PhysicalSlot> {
    let wanted = index + 1;
    let mut matches = 0usize;
    for position in 0..48u32 {
        let bit_set = if position < 16 {
            core_mask & (1 << position) != 0
        } else {
            fp_mask & (1 << (position - 16)) != 0
        };
        if bit_set {
            matches += 1;
            if matches == wanted {
                return Ok(if position < 16 {
                    PhysicalSlot::Core(position)
                } else {
                    PhysicalSlot::Fp(position - 16)
                });
            }
        }
    }
    Err(ContainerError::MalformedTable(format!(
        "vmap entry {} exceeds the {} spilled registers",
        index,
        matches
    )))
}

/// One gc-map entry: the registers holding live references at a native pc.
#[derive(Debug, Clone, Copy)]
pub struct GcMapEntry<'a> {
    pub native_pc_offset: u16,
    bitmap: &'a [u8],
}

impl<'a> GcMapEntry<'a> {
    /// Virtual registers whose bit is set in this entry's bitmap.
    pub fn live_registers(&self) -> impl Iterator<Item = u32> + 'a {
        let bitmap = self.bitmap;
        (0..bitmap.len() as u32 * 8).filter(move |reg| {
            bitmap[(reg / 8) as usize] >> (reg % 8) & 0x01 != 0
        })
    }
}

/// Native-pc to live-reference-registers map.
///
/// Layout: `num_entries`, `reg_width` (bitmap bytes per entry), then
/// `num_entries` records of a u16 native pc offset plus the bitmap. Entries
/// are stored pre-sorted by native pc; the decoder does not sort.
#[derive(Debug, Clone)]
pub struct GcMap<'a> {
    data: &'a [u8],
    start: usize,
    num_entries: u16,
    reg_width: u16,
}

impl<'a> GcMap<'a> {
    pub fn parse(data: &'a [u8], offset: u32) -> Result<Self> {
        let mut cur = ByteCursor::at(data, offset as usize)?;
        let num_entries = cur.read_u16()?;
        let reg_width = cur.read_u16()?;
        let start = cur.position();
        let stride = 2 + reg_width as usize;
        ByteCursor::at(data, start)?.read_bytes(num_entries as usize * stride)?;
        Ok(GcMap {
            data,
            start,
            num_entries,
            reg_width,
        })
    }

    pub fn len(&self) -> usize {
        self.num_entries as usize
    }

    pub fn is_empty(&self) -> bool {
        self.num_entries == 0
    }

    /// Bitmap width in bytes; registers per entry is eight times this.
    pub fn reg_width(&self) -> u16 {
        self.reg_width
    }

    pub fn entries(&self) -> impl Iterator<Item = GcMapEntry<'a>> + 'a {
        let data = self.data;
        let start = self.start;
        let width = self.reg_width as usize;
        let stride = 2 + width;
        (0..self.len()).map(move |i| {
            let mut cur = ByteCursor::at(data, start + i * stride).expect("validated in parse");
            let native_pc_offset = cur.read_u16().expect("validated in parse");
            let bitmap = cur.read_bytes(width).expect("validated in parse");
            GcMapEntry {
                native_pc_offset,
                bitmap,
            }
        })
    }
}
