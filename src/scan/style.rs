//! Style-sheet scanner.
//!
//! Comments are blanked first, then every line is run through the shared
//! hazard vocabulary. Absolute positioning is reported once per sheet.

use std::io::{Read, Seek};

use crate::error::ZipError;
use crate::finding::{FindingCode, Findings, Platform};
use crate::opf::Manifest;
use crate::package::{Package, Resource};
use crate::scan::hazard::{self, Hazard};
use crate::scan::report_large_margin;

/// Media type of CSS style sheets.
pub const CSS_MEDIA_TYPE: &str = "text/css";

const EXCERPT_CHARS: usize = 50;

/// Scan one style sheet's text.
pub fn scan_stylesheet(href: &str, css: &str, margin_threshold: f64, findings: &mut Findings) {
    let clean = hazard::strip_block_comments(css);

    if hazard::has_absolute_position(&clean) {
        findings.warning(
            Platform::General,
            FindingCode::AbsolutePosition,
            format!(
                "{}: Absolute positioning detected (may break reflowable layout)",
                href
            ),
        );
    }

    for (idx, line) in clean.lines().enumerate() {
        let line_num = idx + 1;
        for found in hazard::line_hazards(line, margin_threshold) {
            match found {
                Hazard::Transform => {
                    let excerpt: String = line.trim().chars().take(EXCERPT_CHARS).collect();
                    let msg = format!(
                        "{} (line {}): CSS transform detected (stops rendering on PocketBook/InkBook): {}...",
                        href, line_num, excerpt
                    );
                    findings.issue(Platform::PocketBook, FindingCode::CssTransform, msg.clone());
                    findings.issue(Platform::InkBook, FindingCode::CssTransform, msg);
                }
                Hazard::LargeMargin { value, unit } => {
                    report_large_margin(href, line_num, value, &unit, findings);
                }
                Hazard::FixedPosition => findings.warning(
                    Platform::PocketBook,
                    FindingCode::FixedPosition,
                    format!("{} (line {}): Fixed positioning not supported", href, line_num),
                ),
                Hazard::ViewportUnits => findings.warning(
                    Platform::PocketBook,
                    FindingCode::ViewportUnits,
                    format!(
                        "{} (line {}): Viewport units may not work correctly",
                        href, line_num
                    ),
                ),
                Hazard::AbsolutePosition => {}
            }
        }
    }
}

/// Scan every style sheet in the manifest and return how many were declared.
pub fn scan_stylesheets<F: Read + Seek>(
    package: &mut Package<F>,
    manifest: &Manifest,
    margin_threshold: f64,
    findings: &mut Findings,
) -> Result<usize, ZipError> {
    let mut css_count = 0;
    for item in manifest.items() {
        if item.media_type != CSS_MEDIA_TYPE {
            continue;
        }
        css_count += 1;
        match package.read_resource(&item.href)? {
            Resource::Found(bytes) => {
                let css = String::from_utf8_lossy(&bytes);
                scan_stylesheet(&item.href, &css, margin_threshold, findings);
            }
            Resource::Missing => findings.issue(
                Platform::General,
                FindingCode::ResourceMissing,
                format!("Referenced file not found: '{}'", item.href),
            ),
            Resource::Unreadable(err) => findings.issue(
                Platform::General,
                FindingCode::ResourceUnreadable,
                format!("Could not parse CSS file '{}': {}", item.href, err),
            ),
        }
    }
    log::debug!("[SCAN] style sheets: {}", css_count);
    Ok(css_count)
}
