//! Space accounting for the snapshot report.
//!
//! Counters are fed during the heap walk and rendered once at the end.
//! Region accounting is identity-keyed by container offset so deduplicated
//! code is counted once; a parallel counter keeps the pre-dedup total for
//! the expansion figure.

use std::collections::{BTreeMap, HashSet};
use std::io::Write;

use crate::dump::container::ContainerDumper;
use crate::dump::render::{pretty_descriptor, pretty_size};

/// Methods whose source is larger than this count as large initializers or
/// large methods in the breakdown.
const LARGE_INITIALIZER_DEX_BYTES: u64 = 4000;
const LARGE_METHOD_DEX_BYTES: u64 = 16000;

/// Per-descriptor byte and instance tally.
#[derive(Debug, Default, Clone, Copy)]
pub struct SizeAndCount {
    pub bytes: u64,
    pub count: u64,
}

/// Result of charging one container region. `bytes` is always the region's
/// full size; dedup-aware counters add it only on the first occurrence.
#[derive(Debug, Clone, Copy)]
pub struct RegionAccount {
    pub bytes: u64,
    /// False when the same offset was charged before; dedup hit.
    pub first_occurrence: bool,
}

/// Accumulates snapshot and container space statistics.
#[derive(Debug, Default)]
pub struct StatsEngine {
    pub container_file_bytes: u64,
    pub file_bytes: u64,
    pub header_bytes: u64,
    pub object_bytes: u64,
    pub alignment_bytes: u64,

    pub managed_code_bytes: u64,
    pub managed_code_bytes_ignoring_deduplication: u64,
    pub managed_to_native_code_bytes: u64,
    pub native_to_managed_code_bytes: u64,

    pub class_initializer_code_bytes: u64,
    pub large_initializer_code_bytes: u64,
    pub large_method_code_bytes: u64,

    pub gc_map_bytes: u64,
    pub pc_mapping_table_bytes: u64,
    pub vmap_table_bytes: u64,

    pub dex_instruction_bytes: u64,

    // Deterministic report order; descriptors sort lexicographically.
    sizes_and_counts: BTreeMap<String, SizeAndCount>,
    seen_regions: HashSet<u32>,

    method_names: Vec<String>,
    method_sizes: Vec<u64>,
    method_expansions: Vec<f64>,
}

impl StatsEngine {
    pub fn new() -> Self {
        StatsEngine::default()
    }

    /// Charge the container region at `offset`, sized through the dumper's
    /// offset index.
    pub fn account_region(&mut self, offset: u32, dumper: &ContainerDumper<'_>) -> RegionAccount {
        if offset == 0 {
            return RegionAccount {
                bytes: 0,
                first_occurrence: false,
            };
        }
        RegionAccount {
            bytes: dumper.size_of(offset),
            first_occurrence: self.seen_regions.insert(offset),
        }
    }

    /// Charge a code region whose size is explicit in its method record.
    pub fn account_code(&mut self, offset: u32, size: u64) -> RegionAccount {
        if offset == 0 {
            return RegionAccount {
                bytes: 0,
                first_occurrence: false,
            };
        }
        RegionAccount {
            bytes: size,
            first_occurrence: self.seen_regions.insert(offset),
        }
    }

    /// Tally one object instance of `descriptor` occupying `bytes`.
    pub fn update(&mut self, descriptor: &str, bytes: u64) {
        let entry = self
            .sizes_and_counts
            .entry(descriptor.to_string())
            .or_default();
        entry.bytes += bytes;
        entry.count += 1;
    }

    /// Record one method's storage footprint and code expansion for the
    /// outlier report.
    pub fn compute_outliers(&mut self, name: String, total_size: u64, expansion: f64) {
        self.method_names.push(name);
        self.method_sizes.push(total_size);
        self.method_expansions.push(expansion);
    }

    fn percent_of(part: u64, whole: u64) -> f64 {
        if whole == 0 {
            0.0
        } else {
            part as f64 * 100.0 / whole as f64
        }
    }

    /// Render the STATS block, then the outlier sweeps.
    pub fn dump(&mut self, out: &mut dyn Write) -> std::io::Result<()> {
        writeln!(out, "STATS:")?;
        writeln!(out, "\tfile_bytes = {}", pretty_size(self.file_bytes))?;
        writeln!(out)?;

        writeln!(out, "\tfile_bytes = header_bytes + object_bytes + alignment_bytes")?;
        writeln!(
            out,
            "\theader_bytes    = {:8} ({:3.0}% of file_bytes)",
            self.header_bytes,
            Self::percent_of(self.header_bytes, self.file_bytes)
        )?;
        writeln!(
            out,
            "\tobject_bytes    = {:8} ({:3.0}% of file_bytes)",
            self.object_bytes,
            Self::percent_of(self.object_bytes, self.file_bytes)
        )?;
        writeln!(
            out,
            "\talignment_bytes = {:8} ({:3.0}% of file_bytes)",
            self.alignment_bytes,
            Self::percent_of(self.alignment_bytes, self.file_bytes)
        )?;
        writeln!(out)?;

        writeln!(out, "\tobject_bytes breakdown:")?;
        for (descriptor, sac) in &self.sizes_and_counts {
            let per_instance = if sac.count == 0 {
                0.0
            } else {
                sac.bytes as f64 / sac.count as f64
            };
            writeln!(
                out,
                "\t{:>32} {:8} bytes {:6} instances ({:4.0} bytes/instance) {:3.0}% of object_bytes",
                pretty_descriptor(descriptor),
                sac.bytes,
                sac.count,
                per_instance,
                Self::percent_of(sac.bytes, self.object_bytes)
            )?;
        }
        writeln!(out)?;

        writeln!(
            out,
            "\tmanaged_code_bytes           = {:8} ({:3.0}% of container file bytes)",
            self.managed_code_bytes,
            Self::percent_of(self.managed_code_bytes, self.container_file_bytes)
        )?;
        writeln!(
            out,
            "\tmanaged_to_native_code_bytes = {:8} ({:3.0}% of container file bytes)",
            self.managed_to_native_code_bytes,
            Self::percent_of(self.managed_to_native_code_bytes, self.container_file_bytes)
        )?;
        writeln!(
            out,
            "\tnative_to_managed_code_bytes = {:8} ({:3.0}% of container file bytes)",
            self.native_to_managed_code_bytes,
            Self::percent_of(self.native_to_managed_code_bytes, self.container_file_bytes)
        )?;
        writeln!(out)?;

        writeln!(
            out,
            "\tclass_initializer_code_bytes = {:8} ({:3.0}% of managed code bytes)",
            self.class_initializer_code_bytes,
            Self::percent_of(self.class_initializer_code_bytes, self.managed_code_bytes)
        )?;
        writeln!(
            out,
            "\tlarge_initializer_code_bytes = {:8} ({:3.0}% of managed code bytes)",
            self.large_initializer_code_bytes,
            Self::percent_of(self.large_initializer_code_bytes, self.managed_code_bytes)
        )?;
        writeln!(
            out,
            "\tlarge_method_code_bytes      = {:8} ({:3.0}% of managed code bytes)",
            self.large_method_code_bytes,
            Self::percent_of(self.large_method_code_bytes, self.managed_code_bytes)
        )?;
        writeln!(out)?;

        writeln!(
            out,
            "\tgc_map_bytes           = {:7} ({:3.0}% of container file bytes)",
            self.gc_map_bytes,
            Self::percent_of(self.gc_map_bytes, self.container_file_bytes)
        )?;
        writeln!(
            out,
            "\tpc_mapping_table_bytes = {:7} ({:3.0}% of container file bytes)",
            self.pc_mapping_table_bytes,
            Self::percent_of(self.pc_mapping_table_bytes, self.container_file_bytes)
        )?;
        writeln!(
            out,
            "\tvmap_table_bytes       = {:7} ({:3.0}% of container file bytes)",
            self.vmap_table_bytes,
            Self::percent_of(self.vmap_table_bytes, self.container_file_bytes)
        )?;
        writeln!(out)?;

        writeln!(
            out,
            "\tdex_instruction_bytes = {}",
            self.dex_instruction_bytes
        )?;
        let expansion = if self.dex_instruction_bytes == 0 {
            0.0
        } else {
            self.managed_code_bytes as f64 / self.dex_instruction_bytes as f64
        };
        let expansion_ignoring_dedup = if self.dex_instruction_bytes == 0 {
            0.0
        } else {
            self.managed_code_bytes_ignoring_deduplication as f64
                / self.dex_instruction_bytes as f64
        };
        writeln!(
            out,
            "\tmanaged_code_bytes expansion = {:.2} (ignoring deduplication {:.2})",
            expansion, expansion_ignoring_dedup
        )?;
        writeln!(out)?;

        self.dump_outliers(out)
    }

    /// Methods whose storage or code expansion stand out from the norm,
    /// swept from 100 standard deviations down to 1.
    fn dump_outliers(&mut self, out: &mut dyn Write) -> std::io::Result<()> {
        let n = self.method_sizes.len();
        if n < 2 {
            return Ok(());
        }

        let size_sum: u128 = self.method_sizes.iter().map(|&s| u128::from(s)).sum();
        let size_sum_squared: u128 = self
            .method_sizes
            .iter()
            .map(|&s| u128::from(s) * u128::from(s))
            .sum();
        let size_mean = (size_sum / n as u128) as u64;
        let size_variance =
            (size_sum_squared - size_sum * u128::from(size_mean)) / (n as u128 - 1);

        let expansion_sum: f64 = self.method_expansions.iter().sum();
        let expansion_sum_squared: f64 =
            self.method_expansions.iter().map(|&e| e * e).sum();
        let expansion_mean = expansion_sum / n as f64;
        let expansion_variance =
            (expansion_sum_squared - expansion_sum * expansion_mean) / (n as f64 - 1.0);

        // Size sweep. Reported methods are zeroed so a lower threshold does
        // not repeat them; past 20 lines the sweep jumps to the 1 sigma pass
        // and counts the rest as skipped.
        let mut dumped_values = 0usize;
        let mut skipped_values = 0usize;
        let mut i = 100u128;
        while i > 0 {
            let threshold = i * i * size_variance;
            let mut first = true;
            for j in 0..n {
                let cur_size = self.method_sizes[j];
                if cur_size <= size_mean {
                    continue;
                }
                let deviation = u128::from(cur_size - size_mean);
                if deviation * deviation <= threshold {
                    continue;
                }
                if dumped_values > 20 {
                    if i == 1 {
                        skipped_values += 1;
                    } else {
                        i = 2;
                        break;
                    }
                } else {
                    if first {
                        writeln!(
                            out,
                            "\nBig methods (size > {} standard deviations the norm):",
                            i
                        )?;
                        first = false;
                    }
                    writeln!(
                        out,
                        "\t{} requires storage of {}",
                        self.method_names[j],
                        pretty_size(cur_size)
                    )?;
                    self.method_sizes[j] = 0;
                    dumped_values += 1;
                }
            }
            i -= 1;
        }
        if skipped_values > 0 {
            writeln!(
                out,
                "\t... skipped {} methods with size > 1 standard deviation from the norm",
                skipped_values
            )?;
        }

        // Expansion sweep, same shape over a shorter ratio ladder.
        dumped_values = 0;
        skipped_values = 0;
        let mut i = 10u32;
        while i > 0 {
            let threshold = f64::from(i * i) * expansion_variance;
            let mut first = true;
            for j in 0..n {
                let cur = self.method_expansions[j];
                if cur <= expansion_mean {
                    continue;
                }
                let deviation = cur - expansion_mean;
                if deviation * deviation <= threshold {
                    continue;
                }
                if dumped_values > 20 {
                    if i == 1 {
                        skipped_values += 1;
                    } else {
                        i = 2;
                        break;
                    }
                } else {
                    if first {
                        writeln!(
                            out,
                            "\nLarge expansion methods (size > {} standard deviations the norm):",
                            i
                        )?;
                        first = false;
                    }
                    writeln!(
                        out,
                        "\t{} expanded code by {:.2}",
                        self.method_names[j], cur
                    )?;
                    self.method_expansions[j] = 0.0;
                    dumped_values += 1;
                }
            }
            i -= 1;
        }
        if skipped_values > 0 {
            writeln!(
                out,
                "\t... skipped {} methods with expansion > 1 standard deviation from the norm",
                skipped_values
            )?;
        }
        writeln!(out)?;
        Ok(())
    }
}
