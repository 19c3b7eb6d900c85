//! Sorted index of region-start offsets within the container.
//!
//! Most variable-size regions in the container (mapping tables, vmap tables,
//! gc maps, invoke stubs) carry no length field. What the format does
//! guarantee is that every region is immediately followed by the start of
//! some other region, so a sorted set of all region starts lets us infer the
//! length of any region as the distance to the next higher start. A sentinel
//! equal to the container's total length makes the final region resolve
//! without a special case.

use std::collections::BTreeSet;
use std::ops::Bound;

use crate::container::{Container, InstructionSet};

/// Write-once, read-many index of known region starts.
#[derive(Debug, Default)]
pub struct OffsetIndex {
    offsets: BTreeSet<u32>,
    len: u32,
}

impl OffsetIndex {
    /// Collect every region start the container knows about: each embedded
    /// payload header, each method's code offset (mode-adjusted) and its four
    /// auxiliary region offsets, plus the end-of-container sentinel.
    pub fn build(container: &Container) -> Self {
        let mut index = OffsetIndex {
            offsets: BTreeSet::new(),
            len: container.len() as u32,
        };
        let instruction_set = container.instruction_set();
        for dex_entry in container.dex_entries() {
            let payload = match dex_entry.open_payload() {
                Ok(payload) => payload,
                Err(_) => continue,
            };
            index.offsets.insert(dex_entry.payload_offset());
            for class_index in 0..payload.class_count() {
                let Ok(class_entry) = dex_entry.class_entry(&payload, class_index) else {
                    continue;
                };
                for method in class_entry.methods() {
                    index.insert_method(instruction_set, method);
                }
            }
        }
        index.offsets.insert(index.len);
        index
    }

    fn insert_method(
        &mut self,
        instruction_set: InstructionSet,
        method: &crate::container::MethodEntry,
    ) {
        // Zero offsets mean "not present" and never start a region.
        for offset in [
            instruction_set.adjust_code_offset(method.code_offset),
            method.mapping_table_offset,
            method.vmap_table_offset,
            method.gc_map_offset,
            method.invoke_stub_offset,
        ] {
            if offset != 0 {
                self.offsets.insert(offset);
            }
        }
    }

    /// Size of the region starting at `offset`, or `None` when the offset is
    /// outside the container.
    pub fn size_of(&self, offset: u32) -> Option<u32> {
        if offset >= self.len {
            return None;
        }
        let next = self
            .offsets
            .range((Bound::Excluded(offset), Bound::Unbounded))
            .next()
            .copied()
            // The sentinel guarantees a successor for every in-range offset.
            .unwrap_or(self.len);
        Some(next - offset)
    }

    #[cfg(test)]
    fn from_raw(offsets: impl IntoIterator<Item = u32>, len: u32) -> Self {
        let mut set: BTreeSet<u32> = offsets.into_iter().collect();
        set.insert(len);
        OffsetIndex { offsets: set, len }
    }
}
