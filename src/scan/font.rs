//! Embedded font scanner.

use std::io::{Read, Seek};

use crate::error::ZipError;
use crate::finding::{FindingCode, Findings, Platform};
use crate::opf::{Manifest, ManifestItem};
use crate::package::{Package, Resource};

/// Media types declared for embedded fonts.
pub const FONT_MEDIA_TYPES: &[&str] = &[
    "application/vnd.ms-opentype",
    "application/x-font-ttf",
    "application/x-font-truetype",
    "application/x-font-otf",
    "application/font-woff",
    "font/ttf",
    "font/otf",
    "font/woff",
    "font/woff2",
];

const FONT_EXTENSIONS: &[&str] = &[".ttf", ".otf", ".woff", ".woff2"];

/// Font container format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FontFormat {
    /// TrueType outlines (`0x00010000` or `true`).
    TrueType,
    /// CFF-flavoured OpenType (`OTTO`).
    OpenType,
    /// WOFF 1.0 (`wOFF`).
    Woff,
    /// WOFF 2.0 (`wOF2`).
    Woff2,
}

impl FontFormat {
    /// Identify a font from its first four bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match bytes.get(..4)? {
            b"wOFF" => Some(FontFormat::Woff),
            b"wOF2" => Some(FontFormat::Woff2),
            b"OTTO" => Some(FontFormat::OpenType),
            b"\x00\x01\x00\x00" | b"true" => Some(FontFormat::TrueType),
            _ => None,
        }
    }

    /// Returns `true` for the web-font wrappers.
    pub fn is_woff(self) -> bool {
        matches!(self, FontFormat::Woff | FontFormat::Woff2)
    }
}

/// Returns `true` if the item is an embedded font by media type or extension.
pub fn is_font(item: &ManifestItem) -> bool {
    let href = item.href.to_ascii_lowercase();
    FONT_MEDIA_TYPES.contains(&item.media_type.as_str())
        || FONT_EXTENSIONS.iter().any(|ext| href.ends_with(ext))
}

fn declared_woff(item: &ManifestItem) -> bool {
    item.href.to_ascii_lowercase().contains(".woff") || item.media_type.contains("woff")
}

/// Scan embedded fonts and return how many were declared.
pub fn scan_fonts<F: Read + Seek>(
    package: &mut Package<F>,
    manifest: &Manifest,
    findings: &mut Findings,
) -> Result<usize, ZipError> {
    let mut font_count = 0;

    for item in manifest.items().iter().filter(|item| is_font(item)) {
        font_count += 1;
        let href = item.href.as_str();

        let sniffed = match package.read_resource(href)? {
            Resource::Found(bytes) => FontFormat::sniff(&bytes),
            Resource::Missing => {
                findings.issue(
                    Platform::General,
                    FindingCode::ResourceMissing,
                    format!(
                        "Missing font: '{}' (declared in manifest but file not found)",
                        href
                    ),
                );
                continue;
            }
            Resource::Unreadable(err) => {
                findings.warning(
                    Platform::General,
                    FindingCode::ResourceUnreadable,
                    format!("Error reading font '{}': {}", href, err),
                );
                None
            }
        };

        if declared_woff(item) || sniffed.is_some_and(FontFormat::is_woff) {
            findings.warning(
                Platform::Kindle,
                FindingCode::WoffFont,
                format!("WOFF font '{}' not supported on older Kindle devices", href),
            );
            findings.warning(
                Platform::PocketBook,
                FindingCode::WoffFont,
                format!("WOFF font '{}' may not be supported on all PocketBook models", href),
            );
        }
    }

    log::debug!("[SCAN] fonts: {}", font_count);
    Ok(font_count)
}
