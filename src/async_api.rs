//! Optional async entry point.
//!
//! This module is available with the `async` feature.

use std::io::{Cursor, ErrorKind};
use std::path::Path;

use crate::error::ValidateError;
use crate::report::Report;
use crate::validate::{validate_epub_reader_with_options, ValidationOptions};

/// Read an EPUB file asynchronously and validate it.
///
/// The whole file is read into memory before validation starts.
pub async fn validate_epub_file_async<P: AsRef<Path>>(path: P) -> Result<Report, ValidateError> {
    validate_epub_file_async_with_options(path, ValidationOptions::default()).await
}

/// Read an EPUB file asynchronously and validate it with options.
pub async fn validate_epub_file_async_with_options<P: AsRef<Path>>(
    path: P,
    options: ValidationOptions,
) -> Result<Report, ValidateError> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        ErrorKind::NotFound => ValidateError::NotFound(path.display().to_string()),
        _ => ValidateError::Io(e.to_string()),
    })?;
    validate_epub_reader_with_options(Cursor::new(bytes), options)
}
