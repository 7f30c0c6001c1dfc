//! Content scanners for markup, style sheets, images and fonts.
//!
//! Each scanner consumes manifest items and appends to the run's
//! [`Findings`]; none of them mutate the manifest.

pub mod font;
pub mod hazard;
pub mod image;
pub mod markup;
pub mod style;

use std::io::{Read, Seek};

use crate::error::ZipError;
use crate::finding::{FindingCode, Findings, Platform};
use crate::opf::Manifest;
use crate::package::{Package, Resource};

/// A markup content document decoded for scanning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Document {
    /// Resolved archive path.
    pub href: String,
    /// Content decoded as UTF-8, invalid sequences replaced.
    pub text: String,
}

impl Document {
    /// Create a document from its path and text.
    pub fn new(href: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            text: text.into(),
        }
    }
}

/// Read every markup content document declared in the manifest.
///
/// Absent documents are issues and unreadable ones are warnings; both are
/// left out of the result. A manifest without any markup item is an issue.
pub fn load_documents<F: Read + Seek>(
    package: &mut Package<F>,
    manifest: &Manifest,
    findings: &mut Findings,
) -> Result<Vec<Document>, ZipError> {
    let mut documents = Vec::new();
    let mut declared = 0usize;

    for item in manifest.markup_items() {
        declared += 1;
        match package.read_resource(&item.href)? {
            Resource::Found(bytes) => documents.push(Document::new(
                item.href.clone(),
                String::from_utf8_lossy(&bytes).into_owned(),
            )),
            Resource::Missing => findings.issue(
                Platform::General,
                FindingCode::ResourceMissing,
                format!("Referenced file not found: '{}'", item.href),
            ),
            Resource::Unreadable(err) => findings.warning(
                Platform::General,
                FindingCode::ResourceUnreadable,
                format!("Error reading '{}': {}", item.href, err),
            ),
        }
    }

    if declared == 0 {
        findings.issue(
            Platform::General,
            FindingCode::NoContentDocuments,
            "No content files found in manifest",
        );
    }
    log::debug!(
        "[SCAN] loaded {}/{} content documents",
        documents.len(),
        declared
    );
    Ok(documents)
}

/// Oversized margin: issue on PocketBook, warning on InkBook.
pub(crate) fn report_large_margin(
    href: &str,
    line_num: usize,
    value: f64,
    unit: &str,
    findings: &mut Findings,
) {
    findings.issue(
        Platform::PocketBook,
        FindingCode::LargeMargin,
        format!(
            "{} (line {}): Large margin value ({}{}) breaks text layout on PocketBook - causes mixed/unreadable pages. Use smaller values (max 2em) or move to CSS file",
            href, line_num, value, unit
        ),
    );
    findings.warning(
        Platform::InkBook,
        FindingCode::LargeMargin,
        format!(
            "{} (line {}): Large margin value ({}{}) may break layout on InkBook",
            href, line_num, value, unit
        ),
    );
}
