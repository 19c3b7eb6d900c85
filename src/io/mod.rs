//! Bounded and safe I/O utilities for artifact analysis.
//!
//! This module provides a `SafeReader` for accessing container and snapshot
//! files in a safe, efficient, and ergonomic way. It uses memory-mapping for
//! performance and enforces a size limit so a malformed path cannot drag the
//! tool into mapping something absurd.

pub mod error;

use crate::io::error::Result;
use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub use error::IoError;

/// Defines the resource limits for I/O operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IOLimits {
    /// The absolute maximum file size that can be opened.
    pub max_file_size: u64,
}

impl Default for IOLimits {
    fn default() -> Self {
        Self {
            max_file_size: 1024 * 1024 * 1024, // 1GB
        }
    }
}

/// A safe, bounded file reader that memory-maps the whole artifact.
///
/// Containers and snapshots are decoded in place from the mapping; the
/// mapping is never written through, so repeated dumps of the same file see
/// identical bytes.
#[derive(Debug)]
pub struct SafeReader {
    path: PathBuf,
    mmap: Mmap,
    file_size: u64,
}

impl SafeReader {
    /// Opens a file, memory-maps it, and wraps it in a `SafeReader`.
    ///
    /// Fails if the file is empty or exceeds `limits.max_file_size`.
    pub fn open<P: AsRef<Path>>(path: P, limits: IOLimits) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let metadata = file.metadata()?;
        let file_size = metadata.len();

        debug!(
            path = %path.display(),
            size = file_size,
            limits.max_file_size = limits.max_file_size,
            "Opening file for safe reading"
        );

        if file_size > limits.max_file_size {
            warn!(
                path = %path.display(),
                size = file_size,
                limit = limits.max_file_size,
                "File is too large"
            );
            return Err(IoError::FileTooLarge {
                limit: limits.max_file_size,
                found: file_size,
            });
        }
        if file_size == 0 {
            return Err(IoError::EmptyFile);
        }

        // Safety: the mapping is read-only and the file is held open for the
        // lifetime of the reader.
        let mmap = unsafe { Mmap::map(&file)? };

        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            file_size,
        })
    }

    /// The full mapped byte range of the artifact.
    pub fn bytes(&self) -> &[u8] {
        &self.mmap
    }

    /// File size in bytes.
    pub fn size(&self) -> u64 {
        self.file_size
    }

    /// Path the reader was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
