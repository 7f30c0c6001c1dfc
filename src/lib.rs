//! epub-compat -- Static EPUB structure and reader-compatibility checker
//!
//! Opens an EPUB archive, builds its package model and reports structural
//! errors together with rendering hazards for specific reading systems
//! (Apple Books, PocketBook, Kindle, Kobo, InkBook, Android readers and
//! desktop readers). Nothing is rendered; every check is static.
//!
//! # Features
//!
//! - `async` -- `tokio`-based file entry point
//! - `cli` -- the `epub-compat` command-line binary
//!
//! # Example
//!
//! ```no_run
//! let report = epub_compat::validate_epub_file("book.epub")?;
//! println!("{}", report);
//! if !report.is_clean() {
//!     eprintln!("{} issues", report.content_issue_count());
//! }
//! # Ok::<(), epub_compat::ValidateError>(())
//! ```

#![warn(missing_docs)]
#![deny(clippy::large_enum_variant, clippy::large_stack_arrays, clippy::redundant_clone)]
#![warn(
    clippy::box_collection,
    clippy::needless_collect,
    clippy::map_clone,
    clippy::implicit_clone,
    clippy::inefficient_to_string
)]

/// Declare a lazily compiled, crate-visible regular expression.
macro_rules! regex {
    ($name:ident, $re:expr) => {
        pub(crate) static $name: ::std::sync::LazyLock<::regex::Regex> =
            ::std::sync::LazyLock::new(|| ::regex::Regex::new($re).unwrap());
    };
}

pub mod error;
pub mod finding;
pub mod opf;
pub mod package;
pub mod platform;
pub mod report;
pub mod scan;
pub mod structure;
pub mod validate;
pub mod zip;

#[cfg(feature = "async")]
pub mod async_api;

// Re-export key types for convenience
#[cfg(feature = "async")]
pub use async_api::{validate_epub_file_async, validate_epub_file_async_with_options};
pub use error::{EpubError, ValidateError, ZipError, ZipErrorKind};
pub use finding::{Finding, FindingCode, Findings, Platform, Severity};
pub use opf::{Manifest, ManifestItem, Metadata, PackageModel, Spine, SpineItem};
pub use report::{report_file_path, CriticalSummary, Report, ReportInfo};
pub use validate::{
    validate_epub_file, validate_epub_file_with_options, validate_epub_reader,
    validate_epub_reader_with_options, ValidationOptions,
};
pub use zip::{EpubArchive, ZipLimits};
