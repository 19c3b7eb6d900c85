//! Report generation over decoded containers and snapshots.

pub mod container;
pub mod render;
pub mod snapshot;
pub mod stats;

pub use container::ContainerDumper;
pub use snapshot::SnapshotDumper;
pub use stats::{RegionAccount, SizeAndCount, StatsEngine};
