//! Shared fixture builders for the integration tests.
//!
//! Tests assemble containers and snapshots in memory, write them to temp
//! files when a path is needed, and assert on the rendered report text.

#![allow(dead_code)]

/// x86 `xor eax, eax; ret`, a convenient deterministic code fixture.
pub const X86_XOR_RET: &[u8] = &[0x31, 0xC0, 0xC3];

fn push_str16(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u16).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn push_str32(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

/// Encode a mapping table: `pairs` of (native_pc_offset, dex_pc), with the
/// first `pc_to_dex_pairs` pairs forming the native-to-source half.
pub fn mapping_table_bytes(pairs: &[(u32, u32)], pc_to_dex_pairs: usize) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&((pairs.len() * 2) as u32).to_le_bytes());
    out.extend_from_slice(&((pc_to_dex_pairs * 2) as u32).to_le_bytes());
    for &(native, dex) in pairs {
        out.extend_from_slice(&native.to_le_bytes());
        out.extend_from_slice(&dex.to_le_bytes());
    }
    out
}

pub fn vmap_table_bytes(vregs: &[u16]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(vregs.len() as u16).to_le_bytes());
    for &vreg in vregs {
        out.extend_from_slice(&vreg.to_le_bytes());
    }
    out
}

/// Encode a gc map from (native_pc_offset, live_bitmap) entries; every
/// bitmap must be `reg_width` bytes.
pub fn gc_map_bytes(reg_width: u16, entries: &[(u16, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    out.extend_from_slice(&reg_width.to_le_bytes());
    for &(native, bitmap) in entries {
        assert_eq!(bitmap.len(), reg_width as usize);
        out.extend_from_slice(&native.to_le_bytes());
        out.extend_from_slice(bitmap);
    }
    out
}

/// Source of a method's code region: fresh bytes, or the same region as a
/// previously emitted method (deduplicated code).
#[derive(Clone)]
pub enum CodeRef {
    Bytes(Vec<u8>),
    /// Global emission index of the method whose code this one shares.
    SameAs(usize),
}

#[derive(Clone)]
pub struct MethodFixture {
    pub name: String,
    pub signature: String,
    pub insns_code_units: u32,
    pub frame_size: u32,
    pub core_spill_mask: u32,
    pub fp_spill_mask: u32,
    pub code: CodeRef,
    pub mapping_table: Vec<u8>,
    pub vmap_table: Vec<u8>,
    pub gc_map: Vec<u8>,
    /// Share the gc map of the method at this flattened emission index
    /// instead of emitting `gc_map`.
    pub gc_map_same_as: Option<usize>,
    pub invoke_stub: Vec<u8>,
}

impl MethodFixture {
    pub fn new(name: &str, signature: &str) -> Self {
        MethodFixture {
            name: name.to_string(),
            signature: signature.to_string(),
            insns_code_units: 4,
            frame_size: 32,
            core_spill_mask: 0,
            fp_spill_mask: 0,
            code: CodeRef::Bytes(X86_XOR_RET.to_vec()),
            mapping_table: Vec::new(),
            vmap_table: Vec::new(),
            gc_map: Vec::new(),
            gc_map_same_as: None,
            invoke_stub: Vec::new(),
        }
    }
}

pub struct ClassFixture {
    pub type_idx: u32,
    pub descriptor: String,
    pub status: i32,
    pub direct: Vec<MethodFixture>,
    pub virtuals: Vec<MethodFixture>,
}

impl ClassFixture {
    pub fn new(descriptor: &str, type_idx: u32, status: i32) -> Self {
        ClassFixture {
            type_idx,
            descriptor: descriptor.to_string(),
            status,
            direct: Vec::new(),
            virtuals: Vec::new(),
        }
    }

    fn methods(&self) -> impl Iterator<Item = &MethodFixture> {
        self.direct.iter().chain(self.virtuals.iter())
    }
}

pub struct DexFixture {
    pub location: String,
    pub checksum: u32,
    pub classes: Vec<ClassFixture>,
}

impl DexFixture {
    pub fn new(location: &str, checksum: u32) -> Self {
        DexFixture {
            location: location.to_string(),
            checksum,
            classes: Vec::new(),
        }
    }
}

pub struct ContainerBuilder {
    pub checksum: u32,
    pub instruction_set: u32,
    pub executable_offset: u32,
    pub snapshot_checksum: u32,
    pub snapshot_location: String,
    pub dex_files: Vec<DexFixture>,
}

impl ContainerBuilder {
    /// An x86 container with no dex entries; push into `dex_files` to grow.
    pub fn x86() -> Self {
        ContainerBuilder {
            checksum: 0xcafe_f00d,
            instruction_set: 3,
            executable_offset: 0,
            snapshot_checksum: 0,
            snapshot_location: "boot.hs".to_string(),
            dex_files: Vec::new(),
        }
    }

    pub fn build(&self) -> Vec<u8> {
        // Fixed-size header plus the entry table; region offsets are
        // assigned past it.
        let mut header_len = 4 + 4 + 4 * 5 + 4 + self.snapshot_location.len();
        for dex in &self.dex_files {
            header_len += 4 + dex.location.len() + 4 + 4 + 4 + 4 * dex.classes.len();
        }

        // First pass: lay out the data section and record offsets.
        struct MethodOffsets {
            code: u32,
            code_size: u32,
            mapping: u32,
            vmap: u32,
            gc: u32,
            stub: u32,
        }
        let mut data = Vec::new();
        let mut payload_offsets = Vec::new();
        let mut class_offsets: Vec<Vec<u32>> = Vec::new();
        let mut emitted_code: Vec<(u32, u32)> = Vec::new();
        let mut emitted_gc: Vec<u32> = Vec::new();
        let base = header_len as u32;

        for dex in &self.dex_files {
            let payload = Self::payload_bytes(dex);
            payload_offsets.push(base + data.len() as u32);
            data.extend_from_slice(&payload);

            // Regions first, then the class entries referencing them.
            let mut per_class_methods: Vec<Vec<MethodOffsets>> = Vec::new();
            for class in &dex.classes {
                let mut methods = Vec::new();
                for method in class.methods() {
                    let (code, code_size) = match &method.code {
                        CodeRef::Bytes(bytes) => {
                            let offset = base + data.len() as u32;
                            data.extend_from_slice(bytes);
                            emitted_code.push((offset, bytes.len() as u32));
                            (offset, bytes.len() as u32)
                        }
                        CodeRef::SameAs(index) => emitted_code[*index],
                    };
                    let mut place = |bytes: &[u8]| -> u32 {
                        if bytes.is_empty() {
                            return 0;
                        }
                        let offset = base + data.len() as u32;
                        data.extend_from_slice(bytes);
                        offset
                    };
                    let mapping = place(&method.mapping_table);
                    let vmap = place(&method.vmap_table);
                    let gc = match method.gc_map_same_as {
                        Some(index) => emitted_gc[index],
                        None => place(&method.gc_map),
                    };
                    let stub = place(&method.invoke_stub);
                    emitted_gc.push(gc);
                    methods.push(MethodOffsets {
                        code,
                        code_size,
                        mapping,
                        vmap,
                        gc,
                        stub,
                    });
                }
                per_class_methods.push(methods);
            }

            let mut offsets = Vec::new();
            for (class, methods) in dex.classes.iter().zip(&per_class_methods) {
                offsets.push(base + data.len() as u32);
                data.extend_from_slice(&(class.status).to_le_bytes());
                for (method, off) in class.methods().zip(methods) {
                    for word in [
                        method.frame_size,
                        method.core_spill_mask,
                        method.fp_spill_mask,
                        off.mapping,
                        off.vmap,
                        off.gc,
                        off.code,
                        off.code_size,
                        off.stub,
                    ] {
                        data.extend_from_slice(&word.to_le_bytes());
                    }
                }
            }
            class_offsets.push(offsets);
        }

        // Second pass: header and entry table, then the data section.
        let mut out = Vec::with_capacity(header_len + data.len());
        out.extend_from_slice(b"ccd\n");
        out.extend_from_slice(b"004\0");
        out.extend_from_slice(&self.checksum.to_le_bytes());
        out.extend_from_slice(&self.instruction_set.to_le_bytes());
        out.extend_from_slice(&(self.dex_files.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.executable_offset.to_le_bytes());
        out.extend_from_slice(&self.snapshot_checksum.to_le_bytes());
        push_str32(&mut out, &self.snapshot_location);
        for (i, dex) in self.dex_files.iter().enumerate() {
            push_str32(&mut out, &dex.location);
            out.extend_from_slice(&dex.checksum.to_le_bytes());
            out.extend_from_slice(&payload_offsets[i].to_le_bytes());
            out.extend_from_slice(&(dex.classes.len() as u32).to_le_bytes());
            for offset in &class_offsets[i] {
                out.extend_from_slice(&offset.to_le_bytes());
            }
        }
        assert_eq!(out.len(), header_len);
        out.extend_from_slice(&data);
        out
    }

    fn payload_bytes(dex: &DexFixture) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(b"dex\n");
        out.extend_from_slice(b"001\0");
        out.extend_from_slice(&dex.checksum.to_le_bytes());
        out.extend_from_slice(&(dex.classes.len() as u32).to_le_bytes());
        for class in &dex.classes {
            out.extend_from_slice(&class.type_idx.to_le_bytes());
            push_str16(&mut out, &class.descriptor);
            out.extend_from_slice(&(class.direct.len() as u32).to_le_bytes());
            out.extend_from_slice(&(class.virtuals.len() as u32).to_le_bytes());
            for method in class.methods() {
                push_str16(&mut out, &method.name);
                push_str16(&mut out, &method.signature);
                out.extend_from_slice(&method.insns_code_units.to_le_bytes());
            }
        }
        out
    }
}

/// A field or array-element slot: raw bits, or a reference to another
/// object by builder id.
#[derive(Clone, Copy)]
pub enum Slot {
    Raw(u64),
    Ref(Option<usize>),
}

enum ObjKind {
    Object,
    Class {
        descriptor: String,
        status: i32,
        super_id: Option<usize>,
        fields: Vec<(String, String)>,
    },
    Array {
        elements: Vec<Slot>,
    },
    Str(String),
    Field {
        name: String,
        type_descriptor: String,
        declaring_id: usize,
    },
    Method {
        name: String,
        declaring_id: usize,
        flags: u32,
        method_index: u32,
        insns_code_units: u32,
    },
}

struct ObjFixture {
    class_id: usize,
    values: Vec<Slot>,
    kind: ObjKind,
}

pub struct SnapshotBuilder {
    pub base: u32,
    pub container_checksum: u32,
    roots: [Option<usize>; 8],
    objects: Vec<ObjFixture>,
}

pub const ROOT_CONTAINER_LOCATION: usize = 5;
pub const ROOT_DEX_CACHES: usize = 6;
pub const ROOT_CLASS_ROOTS: usize = 7;

impl SnapshotBuilder {
    pub fn new() -> Self {
        SnapshotBuilder {
            base: 0x7000_0000,
            container_checksum: 0xcafe_f00d,
            roots: [None; 8],
            objects: Vec::new(),
        }
    }

    /// Add a class record. Its own `class_ref` points at itself unless a
    /// metaclass is supplied through `reclass`.
    pub fn add_class(
        &mut self,
        descriptor: &str,
        status: i32,
        super_id: Option<usize>,
        fields: &[(&str, &str)],
    ) -> usize {
        let id = self.objects.len();
        self.objects.push(ObjFixture {
            class_id: id,
            values: Vec::new(),
            kind: ObjKind::Class {
                descriptor: descriptor.to_string(),
                status,
                super_id,
                fields: fields
                    .iter()
                    .map(|(n, t)| (n.to_string(), t.to_string()))
                    .collect(),
            },
        });
        id
    }

    /// Point an existing record at a different class.
    pub fn reclass(&mut self, id: usize, class_id: usize) {
        self.objects[id].class_id = class_id;
    }

    pub fn add_object(&mut self, class_id: usize, values: &[Slot]) -> usize {
        let id = self.objects.len();
        self.objects.push(ObjFixture {
            class_id,
            values: values.to_vec(),
            kind: ObjKind::Object,
        });
        id
    }

    pub fn add_array(&mut self, class_id: usize, elements: &[Slot]) -> usize {
        let id = self.objects.len();
        self.objects.push(ObjFixture {
            class_id,
            values: Vec::new(),
            kind: ObjKind::Array {
                elements: elements.to_vec(),
            },
        });
        id
    }

    pub fn add_string(&mut self, class_id: usize, value: &str) -> usize {
        let id = self.objects.len();
        self.objects.push(ObjFixture {
            class_id,
            values: Vec::new(),
            kind: ObjKind::Str(value.to_string()),
        });
        id
    }

    pub fn add_field(
        &mut self,
        class_id: usize,
        name: &str,
        type_descriptor: &str,
        declaring_id: usize,
    ) -> usize {
        let id = self.objects.len();
        self.objects.push(ObjFixture {
            class_id,
            values: Vec::new(),
            kind: ObjKind::Field {
                name: name.to_string(),
                type_descriptor: type_descriptor.to_string(),
                declaring_id,
            },
        });
        id
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_method(
        &mut self,
        class_id: usize,
        name: &str,
        declaring_id: usize,
        flags: u32,
        method_index: u32,
        insns_code_units: u32,
    ) -> usize {
        let id = self.objects.len();
        self.objects.push(ObjFixture {
            class_id,
            values: Vec::new(),
            kind: ObjKind::Method {
                name: name.to_string(),
                declaring_id,
                flags,
                method_index,
                insns_code_units,
            },
        });
        id
    }

    pub fn set_root(&mut self, slot: usize, id: usize) {
        self.roots[slot] = Some(id);
    }

    fn record_len(obj: &ObjFixture) -> usize {
        let common = 1 + 4 + 2 + 8 * obj.values.len();
        common
            + match &obj.kind {
                ObjKind::Object => 0,
                ObjKind::Class {
                    descriptor, fields, ..
                } => {
                    2 + descriptor.len()
                        + 4
                        + 4
                        + 2
                        + fields
                            .iter()
                            .map(|(n, t)| 2 + n.len() + 2 + t.len())
                            .sum::<usize>()
                }
                ObjKind::Array { elements } => 4 + 8 * elements.len(),
                ObjKind::Str(s) => 2 + s.len(),
                ObjKind::Field {
                    name,
                    type_descriptor,
                    ..
                } => 2 + name.len() + 2 + type_descriptor.len() + 4,
                ObjKind::Method { name, .. } => 2 + name.len() + 4 + 4 + 4 + 4,
            }
    }

    pub fn build(&self) -> Vec<u8> {
        const HEADER_LEN: usize = 32;
        const ROOTS_LEN: usize = 8 * 4;
        let objects_offset = HEADER_LEN + ROOTS_LEN;

        // Assign aligned offsets, then encode with refs resolved.
        let mut offsets = Vec::with_capacity(self.objects.len());
        let mut cursor = objects_offset;
        for obj in &self.objects {
            offsets.push(cursor as u32);
            let len = Self::record_len(obj);
            cursor += (len + 7) & !7;
        }
        let objects_end = cursor;

        let resolve = |id: Option<usize>| -> u32 { id.map(|i| offsets[i]).unwrap_or(0) };
        let slot = |s: &Slot| -> u64 {
            match s {
                Slot::Raw(raw) => *raw,
                Slot::Ref(id) => u64::from(resolve(*id)),
            }
        };

        let mut out = Vec::with_capacity(objects_end);
        out.extend_from_slice(b"hsn\n");
        out.extend_from_slice(b"001\0");
        out.extend_from_slice(&self.base.to_le_bytes());
        out.extend_from_slice(&self.container_checksum.to_le_bytes());
        out.extend_from_slice(&(HEADER_LEN as u32).to_le_bytes());
        out.extend_from_slice(&8u32.to_le_bytes());
        out.extend_from_slice(&(objects_offset as u32).to_le_bytes());
        out.extend_from_slice(&(objects_end as u32).to_le_bytes());
        for root in &self.roots {
            out.extend_from_slice(&resolve(*root).to_le_bytes());
        }

        for (i, obj) in self.objects.iter().enumerate() {
            assert_eq!(out.len(), offsets[i] as usize);
            let tag: u8 = match &obj.kind {
                ObjKind::Object => 0,
                ObjKind::Class { .. } => 1,
                ObjKind::Array { .. } => 2,
                ObjKind::Str(_) => 3,
                ObjKind::Field { .. } => 4,
                ObjKind::Method { .. } => 5,
            };
            out.push(tag);
            out.extend_from_slice(&offsets[obj.class_id].to_le_bytes());
            out.extend_from_slice(&(obj.values.len() as u16).to_le_bytes());
            for value in &obj.values {
                out.extend_from_slice(&slot(value).to_le_bytes());
            }
            match &obj.kind {
                ObjKind::Object => {}
                ObjKind::Class {
                    descriptor,
                    status,
                    super_id,
                    fields,
                } => {
                    push_str16(&mut out, descriptor);
                    out.extend_from_slice(&status.to_le_bytes());
                    out.extend_from_slice(&resolve(*super_id).to_le_bytes());
                    out.extend_from_slice(&(fields.len() as u16).to_le_bytes());
                    for (name, type_descriptor) in fields {
                        push_str16(&mut out, name);
                        push_str16(&mut out, type_descriptor);
                    }
                }
                ObjKind::Array { elements } => {
                    out.extend_from_slice(&(elements.len() as u32).to_le_bytes());
                    for element in elements {
                        out.extend_from_slice(&slot(element).to_le_bytes());
                    }
                }
                ObjKind::Str(s) => push_str16(&mut out, s),
                ObjKind::Field {
                    name,
                    type_descriptor,
                    declaring_id,
                } => {
                    push_str16(&mut out, name);
                    push_str16(&mut out, type_descriptor);
                    out.extend_from_slice(&offsets[*declaring_id].to_le_bytes());
                }
                ObjKind::Method {
                    name,
                    declaring_id,
                    flags,
                    method_index,
                    insns_code_units,
                } => {
                    push_str16(&mut out, name);
                    out.extend_from_slice(&offsets[*declaring_id].to_le_bytes());
                    out.extend_from_slice(&flags.to_le_bytes());
                    out.extend_from_slice(&method_index.to_le_bytes());
                    out.extend_from_slice(&insns_code_units.to_le_bytes());
                }
            }
            // Alignment padding up to the next record.
            while out.len() % 8 != 0 {
                out.push(0);
            }
        }
        assert_eq!(out.len(), objects_end);
        out
    }
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        SnapshotBuilder::new()
    }
}
