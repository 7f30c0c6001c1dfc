//! Error types for epub-compat
//!
//! Only package-level load failures surface to callers as errors. Everything
//! that goes wrong after the archive opens is recorded as a finding instead.

use std::fmt;

/// Fatal error that prevents a validation run from producing a report.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidateError {
    /// The input path does not exist.
    NotFound(String),
    /// The input is not a readable ZIP container.
    NotAnArchive(ZipError),
    /// I/O error while opening the input (description only, since
    /// `std::io::Error` is not `Clone`).
    Io(String),
}

impl fmt::Display for ValidateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidateError::NotFound(path) => write!(f, "File '{}' does not exist", path),
            ValidateError::NotAnArchive(kind) => {
                write!(f, "Not a valid ZIP/EPUB file: {}", kind)
            }
            ValidateError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for ValidateError {}

/// Error raised while interpreting package documents.
///
/// Never returned from the public entry points; the run converts it into a
/// general issue.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum EpubError {
    /// XML parsing error in a package document.
    Parse(String),
    /// Structurally unusable package (e.g. no rootfile).
    InvalidEpub(String),
}

impl fmt::Display for EpubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EpubError::Parse(msg) => write!(f, "Parse error: {}", msg),
            EpubError::InvalidEpub(msg) => write!(f, "Invalid EPUB: {}", msg),
        }
    }
}

impl std::error::Error for EpubError {}

/// ZIP-specific error variants
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ZipErrorKind {
    /// File not found in archive
    FileNotFound,
    /// Invalid ZIP format
    InvalidFormat,
    /// Unsupported compression method
    UnsupportedCompression,
    /// Decompression failed
    DecompressError,
    /// CRC32 mismatch
    CrcMismatch,
    /// I/O error during ZIP operations
    IoError,
    /// File exceeds maximum allowed size
    FileTooLarge,
    /// ZIP64 structures are present but unsupported
    UnsupportedZip64,
}

/// Public ZIP error type alias used across the crate API.
pub type ZipError = ZipErrorKind;

impl fmt::Display for ZipErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZipErrorKind::FileNotFound => write!(f, "file not found in archive"),
            ZipErrorKind::InvalidFormat => write!(f, "invalid ZIP format"),
            ZipErrorKind::UnsupportedCompression => write!(f, "unsupported compression method"),
            ZipErrorKind::DecompressError => write!(f, "decompression failed"),
            ZipErrorKind::CrcMismatch => write!(f, "CRC32 checksum mismatch"),
            ZipErrorKind::IoError => write!(f, "I/O error"),
            ZipErrorKind::FileTooLarge => write!(f, "file too large"),
            ZipErrorKind::UnsupportedZip64 => write!(f, "ZIP64 is not supported"),
        }
    }
}

impl std::error::Error for ZipErrorKind {}
