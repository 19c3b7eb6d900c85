//! cofferdump: dump the contents of a container or a heap snapshot as text.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use coffer::container::Container;
use coffer::disasm;
use coffer::dump::{ContainerDumper, SnapshotDumper};
use coffer::snapshot::Snapshot;

#[derive(Parser, Debug)]
#[command(
    name = "cofferdump",
    version,
    about = "Dump containers and heap snapshots as text reports"
)]
struct Args {
    /// Container file to dump
    #[arg(long, value_name = "FILE", conflicts_with = "snapshot", required_unless_present = "snapshot")]
    container: Option<PathBuf>,

    /// Snapshot file to dump
    #[arg(long, value_name = "FILE")]
    snapshot: Option<PathBuf>,

    /// Boot snapshot whose container is loaded first, for methods declared
    /// in shared dependencies
    #[arg(long, value_name = "FILE", requires = "snapshot")]
    boot_snapshot: Vec<PathBuf>,

    /// Prefix prepended to recorded artifact locations before opening them
    #[arg(long, value_name = "PREFIX")]
    path_prefix: Option<String>,

    /// Write the report to a file instead of stdout
    #[arg(long, value_name = "FILE")]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    coffer::logging::init_tracing();
    let args = Args::parse();

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path)
                .with_context(|| format!("creating output file {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    if let Some(path) = &args.container {
        let container = Container::open(path)
            .with_context(|| format!("opening container {}", path.display()))?;
        info!(path = %path.display(), "dumping container");
        let backend = disasm::for_instruction_set(container.instruction_set())?;
        let dumper = ContainerDumper::new(&container, &backend, args.path_prefix.as_deref());
        dumper.dump(&mut out)?;
    } else if let Some(path) = &args.snapshot {
        let mut boot_containers = Vec::new();
        for boot_path in &args.boot_snapshot {
            let boot = Snapshot::open(boot_path)
                .with_context(|| format!("opening boot snapshot {}", boot_path.display()))?;
            let location = SnapshotDumper::container_location(&boot).with_context(|| {
                format!(
                    "boot snapshot {} has no container location root",
                    boot_path.display()
                )
            })?;
            let container_path =
                SnapshotDumper::container_path(&location, args.path_prefix.as_deref());
            let container = Container::open(&container_path)
                .with_context(|| format!("opening boot container {}", container_path))?;
            info!(path = container_path, "loaded boot container");
            boot_containers.push(container);
        }

        let snapshot = Snapshot::open(path)
            .with_context(|| format!("opening snapshot {}", path.display()))?;
        info!(path = %path.display(), "dumping snapshot");
        let mut dumper =
            SnapshotDumper::new(&snapshot, args.path_prefix.as_deref(), &boot_containers);
        dumper.dump(&mut out)?;
    }

    out.flush().context("flushing report")?;
    Ok(())
}
