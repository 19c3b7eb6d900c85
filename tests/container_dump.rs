//! End-to-end container dump tests over in-memory fixtures.

mod common;

use coffer::container::Container;
use coffer::disasm;
use coffer::dump::ContainerDumper;

use common::{
    gc_map_bytes, mapping_table_bytes, vmap_table_bytes, ClassFixture, CodeRef, ContainerBuilder,
    DexFixture, MethodFixture, X86_XOR_RET,
};

fn demo_container() -> ContainerBuilder {
    let mut builder = ContainerBuilder::x86();
    let mut dex = DexFixture::new("/system/framework/classes.dex", 0x1234_5678);
    let mut class = ClassFixture::new("Ldemo/Demo;", 7, 5);

    let mut init = MethodFixture::new("<init>", "()V");
    init.frame_size = 64;
    init.core_spill_mask = 0b0110;
    init.fp_spill_mask = 0b0001;
    init.vmap_table = vmap_table_bytes(&[1, 2, 3]);
    init.mapping_table = mapping_table_bytes(&[(0, 0), (8, 3), (3, 8)], 2);
    init.gc_map = gc_map_bytes(1, &[(0, &[0b0000_0011])]);
    init.invoke_stub = X86_XOR_RET.to_vec();
    class.direct.push(init);

    let mut bare = MethodFixture::new("run", "()I");
    bare.code = CodeRef::Bytes(vec![0xC3]);
    class.virtuals.push(bare);

    dex.classes.push(class);
    builder.dex_files.push(dex);
    builder
}

fn dump(container: &Container) -> String {
    let backend = disasm::for_instruction_set(container.instruction_set()).unwrap();
    let dumper = ContainerDumper::new(container, &backend, None);
    let mut out = Vec::new();
    dumper.dump(&mut out).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn header_and_dex_sections_render() {
    let container = Container::from_bytes(demo_container().build()).unwrap();
    let text = dump(&container);

    assert!(text.contains("MAGIC:\nccd\n004\n"));
    assert!(text.contains("CHECKSUM:\n0xcafef00d"));
    assert!(text.contains("INSTRUCTION SET:\nx86"));
    assert!(text.contains("DEX FILE COUNT:\n1"));
    assert!(text.contains("DEX FILE:\nlocation: /system/framework/classes.dex"));
    assert!(text.contains("checksum: 0x12345678"));
    assert!(text.contains("0: Ldemo/Demo; (type_idx=7) (Verified)"));
}

#[test]
fn method_blocks_render_in_fixed_order() {
    let container = Container::from_bytes(demo_container().build()).unwrap();
    let text = dump(&container);

    let init_at = text.find("\t0: demo.Demo.<init>()V").unwrap();
    let run_at = text.find("\t1: demo.Demo.run()I").unwrap();
    assert!(init_at < run_at);

    let block = &text[init_at..run_at];
    let order = [
        "frame_size_in_bytes: 64",
        "core_spill_mask: 0x00000006 (r1, r2)",
        "fp_spill_mask: 0x00000001 (fr0)",
        "mapping_table: 0x",
        "vmap_table: 0x",
        "gc_map: 0x",
        "CODE: 0x",
        "INVOKE STUB: 0x",
    ];
    let mut last = 0;
    for needle in order {
        let pos = block[last..].find(needle).expect(needle) + last;
        last = pos;
    }
}

#[test]
fn vmap_scan_consumes_core_mask_before_fp() {
    let container = Container::from_bytes(demo_container().build()).unwrap();
    let text = dump(&container);
    assert!(text.contains("\t\t\tv1/r1, v2/r2, v3/fr0"));
}

#[test]
fn mapping_table_splits_at_the_section_boundary() {
    let container = Container::from_bytes(demo_container().build()).unwrap();
    let text = dump(&container);
    // Two native-to-source pairs, then the source-to-native half on its own
    // line. Native pcs are code-relative.
    let first_half = text
        .lines()
        .find(|l| l.contains(" -> 0x0000,"))
        .expect("mapping table line");
    assert!(first_half.trim_start().starts_with('{'));
    assert!(first_half.trim_end().ends_with('}'));
    assert!(first_half.contains(" -> 0x0003}"));
    let second_half = text
        .lines()
        .find(|l| l.contains(" -> 0x0008"))
        .expect("second half line");
    assert_ne!(first_half, second_half);
    // The boundary replaces the separator; no dangling comma opens the
    // source-to-native half.
    assert!(second_half.trim_start().starts_with("{0x"));
    assert!(!text.contains("{,"));
}

#[test]
fn gc_map_lines_list_live_registers() {
    let container = Container::from_bytes(demo_container().build()).unwrap();
    let text = dump(&container);
    assert!(text.contains("  v0  v1\n"));
}

#[test]
fn absent_regions_render_markers() {
    let container = Container::from_bytes(demo_container().build()).unwrap();
    let text = dump(&container);
    // The bare method has no tables and no stub.
    let run_at = text.find("\t1: demo.Demo.run()I").unwrap();
    let block = &text[run_at..];
    assert!(block.contains("mapping_table: (not present)"));
    assert!(block.contains("vmap_table: (not present)"));
    assert!(block.contains("gc_map: (not present)"));
    assert!(block.contains("INVOKE STUB: (not present)"));
    assert!(block.contains("CODE: 0x"));
}

#[test]
fn code_disassembles_through_the_backend() {
    let container = Container::from_bytes(demo_container().build()).unwrap();
    let text = dump(&container);
    assert!(text.contains("xor eax,eax") || text.contains("xor eax, eax"));
    assert!(text.contains("ret"));
}

#[test]
fn invoke_stub_size_comes_from_the_offset_index() {
    let container = Container::from_bytes(demo_container().build()).unwrap();
    let text = dump(&container);
    // The stub is the 3-byte fixture and the next indexed region starts
    // right after it.
    assert!(text.contains("INVOKE STUB: 0x") && text.contains("(size=3)"));
}

#[test]
fn unopenable_payload_is_not_fatal() {
    let mut builder = demo_container();
    let mut second = DexFixture::new("/system/framework/extra.dex", 0x9abc_def0);
    second
        .classes
        .push(ClassFixture::new("Lextra/Only;", 1, 7));
    builder.dex_files.push(second);
    let mut bytes = builder.build();

    // Corrupt the first embedded payload's magic.
    let pos = bytes
        .windows(4)
        .position(|w| w == b"dex\n")
        .expect("payload magic");
    bytes[pos] = b'x';

    let container = Container::from_bytes(bytes).unwrap();
    let text = dump(&container);
    assert!(text.contains("location: /system/framework/classes.dex\nchecksum: 0x12345678\nNOT FOUND"));
    // The second entry still dumps fully.
    assert!(text.contains("0: Lextra/Only; (type_idx=1) (Initialized)"));
}

#[test]
fn repeat_dumps_are_byte_identical() {
    let container = Container::from_bytes(demo_container().build()).unwrap();
    assert_eq!(dump(&container), dump(&container));
}

#[test]
fn open_reads_the_same_bytes_as_from_bytes() {
    let bytes = demo_container().build();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("demo.cc");
    std::fs::write(&path, &bytes).unwrap();

    let mapped = Container::open(&path).unwrap();
    let owned = Container::from_bytes(bytes).unwrap();
    assert_eq!(dump(&mapped), dump(&owned));
}
