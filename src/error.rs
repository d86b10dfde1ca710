//! Error taxonomy for parsing, address translation, editing, and building.

use std::io;
use thiserror::Error;

/// Result type alias for peforge operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while decoding raw bytes into a [`crate::Binary`].
///
/// Header-level corruption aborts the whole parse; a malformed data
/// directory does not (the directory is degraded to absent instead).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The file does not start with the `MZ` magic.
    #[error("invalid DOS magic {0:#06x} (expected 'MZ')")]
    BadDosMagic(u16),
    /// `e_lfanew` does not point at a `PE\0\0` signature.
    #[error("invalid PE signature {0:#010x} (expected 'PE\\0\\0')")]
    BadPeSignature(u32),
    /// The optional header magic is neither PE32 nor PE32+.
    #[error("invalid optional header magic {0:#06x}")]
    BadOptionalMagic(u16),
    /// A field read would run past the end of the input buffer.
    #[error("truncated input: need {needed} bytes at offset {offset:#x}, buffer holds {available}")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    /// A header field is inconsistent with the rest of the image.
    #[error("malformed header: {0}")]
    Malformed(&'static str),
}

/// Errors raised by RVA/VA/offset translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AddressError {
    /// No section (nor the header region) maps the address.
    #[error("rva {0:#x} is not mapped by any section")]
    Unmapped(u32),
    /// The address maps to zero-fill padding past the section's raw data.
    #[error("rva {0:#x} lies beyond its section's raw data (no file backing)")]
    NoFileBacking(u32),
    /// A virtual address below the preferred image base.
    #[error("va {0:#x} is below the image base")]
    BelowImageBase(u64),
}

/// Errors raised by the structural editors on [`crate::Binary`].
///
/// Editors fail fast: on error the binary is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    /// No section carries the requested name.
    #[error("section `{0}` not found")]
    SectionNotFound(String),
    /// No imported library carries the requested name.
    #[error("library `{0}` not found")]
    LibraryNotFound(String),
    /// The library exists but does not import the requested function.
    #[error("function `{0}` not found")]
    FunctionNotFound(String),
    /// A handle obtained before the last structural mutation was reused.
    #[error("stale handle: the binary was structurally modified")]
    StaleHandle,
    /// An editor argument is out of range for the format.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The binary cannot accept this edit in its current state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
}

/// Errors raised while serializing a [`crate::Binary`] back to bytes.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The laid-out image would violate a structural invariant.
    #[error("inconsistent image: {0}")]
    Inconsistent(String),
    /// Writing the produced bytes failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Top-level error type unifying the taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error(transparent)]
    Edit(#[from] EditError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Io(#[from] io::Error),
}
