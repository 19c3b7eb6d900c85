//! Pure text helpers shared by the container and snapshot dumpers.
//!
//! Field order and section headers are the output contract; downstream
//! tooling scrapes this text, so helpers here must stay deterministic.

/// Human-readable form of a type descriptor.
///
/// `Ljava/lang/Object;` renders as `java.lang.Object`, `[I` as `int[]`,
/// primitive descriptors as their keyword. Unknown descriptors pass through
/// unchanged.
pub fn pretty_descriptor(descriptor: &str) -> String {
    let mut dims = 0;
    let mut rest = descriptor;
    while let Some(stripped) = rest.strip_prefix('[') {
        dims += 1;
        rest = stripped;
    }
    let base = match rest {
        "V" => "void".to_string(),
        "Z" => "boolean".to_string(),
        "B" => "byte".to_string(),
        "S" => "short".to_string(),
        "C" => "char".to_string(),
        "I" => "int".to_string(),
        "J" => "long".to_string(),
        "F" => "float".to_string(),
        "D" => "double".to_string(),
        _ => match rest.strip_prefix('L').and_then(|s| s.strip_suffix(';')) {
            Some(name) => name.replace('/', "."),
            None => rest.to_string(),
        },
    };
    let mut out = base;
    for _ in 0..dims {
        out.push_str("[]");
    }
    out
}

/// Strip one array dimension from a descriptor, for element typing.
pub fn component_descriptor(descriptor: &str) -> &str {
    descriptor.strip_prefix('[').unwrap_or(descriptor)
}

/// Human-readable method name: `class.name` plus the raw signature.
pub fn pretty_method(class_descriptor: &str, name: &str, signature: &str) -> String {
    format!("{}.{}{}", pretty_descriptor(class_descriptor), name, signature)
}

/// Version word rendered as its printable prefix, dropping NUL padding.
pub fn ascii_version(version: &[u8; 4]) -> String {
    version
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect()
}

/// Byte size with the largest exactly-dividing unit.
pub fn pretty_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB && bytes % GB == 0 {
        format!("{}GB", bytes / GB)
    } else if bytes >= MB && bytes % MB == 0 {
        format!("{}MB", bytes / MB)
    } else if bytes >= KB && bytes % KB == 0 {
        format!("{}KB", bytes / KB)
    } else {
        format!("{}B", bytes)
    }
}

/// Decoded register list for a spill mask: ` (r5, r6, r14)`, or empty for a
/// zero mask.
pub fn spill_mask_names(mask: u32, is_float: bool) -> String {
    if mask == 0 {
        return String::new();
    }
    let prefix = if is_float { "fr" } else { "r" };
    let names: Vec<String> = (0..32)
        .filter(|bit| mask & (1 << bit) != 0)
        .map(|bit| format!("{}{}", prefix, bit))
        .collect();
    format!(" ({})", names.join(", "))
}
