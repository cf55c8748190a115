#![forbid(unsafe_code)]
//! Error types for e2s.
//!
//! # Error Taxonomy
//!
//! e2s uses a two-layer error model:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Parsing | `ParseError` | `e2s-types` | Byte-level decoding failures (short slices, bad magic) |
//! | Runtime | `E2sError` | `e2s-error` (this crate) | User-facing errors for the CLI and library callers |
//!
//! `e2s-error` does not depend on `e2s-types`; the `ParseError → E2sError`
//! conversion lives in `e2s-core`, which sees both. The mapping is:
//!
//! | ParseError Variant | E2sError Variant |
//! |--------------------|------------------|
//! | `InvalidMagic` | `NotExt2` |
//! | `InvalidField` on a geometry field | `InvalidGeometry` |
//! | `InsufficientData` / `IntegerConversion` | `Corruption { block, detail }` |
//!
//! ## Exit codes
//!
//! Every variant maps to exactly one process exit code via
//! [`E2sError::exit_code`]. The mapping has no wildcard arm.
//!
//! | Variant | Exit code |
//! |---------|-----------|
//! | `Usage` | 1 |
//! | `Io` | 1 |
//! | `ImageUnreadable` | 1 |
//! | `InvalidGeometry` | 1 |
//! | `Corruption` | 1 |
//! | `NotExt2` | 2 |
//!
//! Anomalies inside otherwise readable metadata (free inode slots, deleted
//! directory entries, empty pointer slots) are not errors at all; the
//! traversal skips them.

use std::path::PathBuf;
use thiserror::Error;

/// Exit code for usage errors and unreadable images.
pub const EXIT_USAGE_OR_IO: i32 = 1;
/// Exit code for an image whose superblock magic is wrong.
pub const EXIT_CORRUPTED: i32 = 2;

/// Unified error type for e2s operations.
#[derive(Debug, Error)]
pub enum E2sError {
    /// Wrong command-line invocation.
    #[error("{0}")]
    Usage(String),

    /// Operating system I/O error (wraps `std::io::Error`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The image path could not be opened or inspected.
    #[error("cannot open image {}: {source}", path.display())]
    ImageUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Superblock magic mismatch: not an ext2 image.
    #[error("corrupted file system.")]
    NotExt2,

    /// Superblock geometry makes block/group arithmetic impossible.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Metadata the report depends on could not be decoded.
    ///
    /// The `block` field names the block being read (0 when the failing
    /// read is not block-addressed, e.g. the superblock region).
    #[error("corrupt metadata at block {block}: {detail}")]
    Corruption { block: u64, detail: String },
}

impl E2sError {
    /// Process exit code for this error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_)
            | Self::Io(_)
            | Self::ImageUnreadable { .. }
            | Self::InvalidGeometry(_)
            | Self::Corruption { .. } => EXIT_USAGE_OR_IO,
            Self::NotExt2 => EXIT_CORRUPTED,
        }
    }
}

/// Result alias using `E2sError`.
pub type Result<T> = std::result::Result<T, E2sError>;
