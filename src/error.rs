//! Error types for the coffer dump tooling.
//!
//! This module provides the crate-level error enum using thiserror. The
//! decoding modules keep their own local error enums and convert into this
//! one at the dumper boundary.

use thiserror::Error;

/// Main error type for coffer operations.
#[derive(Debug, Error)]
pub enum CofferError {
    /// Container decoding errors
    #[error("Container error: {0}")]
    Container(#[from] crate::container::ContainerError),

    /// Snapshot decoding errors
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] crate::snapshot::SnapshotError),

    /// Disassembly errors
    #[error("Disassembly error: {0}")]
    Disasm(#[from] crate::disasm::DisasmError),

    /// Bounded reader errors
    #[error("Read error: {0}")]
    Read(#[from] crate::io::IoError),

    /// Fatal configuration errors (argument conflicts, label/root mismatch)
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for coffer operations
pub type Result<T> = std::result::Result<T, CofferError>;
