//! coffer: forensic decoder and reporter for compiled-code containers and
//! heap snapshots.
//!
//! The crate reads two related artifact kinds and renders deterministic text
//! reports over them:
//! - a *container*: compiled code plus per-method metadata, keyed by the dex
//!   payloads it embeds;
//! - a *snapshot*: a memory-mappable image of a live object graph whose
//!   reflective method objects point back into a container.
//!
//! Decoding is strictly read-only. Checksums are surfaced, never verified.
//!
//! ```no_run
//! use coffer::container::Container;
//! use coffer::disasm;
//! use coffer::dump::ContainerDumper;
//!
//! # fn main() -> coffer::Result<()> {
//! let container = Container::open("boot.cc")?;
//! let backend = disasm::for_instruction_set(container.instruction_set())?;
//! let dumper = ContainerDumper::new(&container, &backend, None);
//! dumper.dump(&mut std::io::stdout().lock())?;
//! # Ok(())
//! # }
//! ```

pub mod container;
pub mod disasm;
pub mod dump;
pub mod error;
pub mod io;
pub mod logging;
pub mod snapshot;

pub use container::Container;
pub use dump::{ContainerDumper, SnapshotDumper};
pub use error::{CofferError, Result};
pub use snapshot::Snapshot;
