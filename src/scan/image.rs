//! Image scanner: byte size, pixel dimensions and format hazards.
//!
//! Pixel dimensions come from a minimal header read (PNG IHDR, JPEG SOF);
//! no image library is involved and a failed decode only means the
//! dimensions are unknown.

use std::io::{Read, Seek};

use crate::error::ZipError;
use crate::finding::{FindingCode, Findings, Platform};
use crate::opf::{Manifest, ManifestItem};
use crate::package::{Package, Resource};
use crate::scan::Document;
use crate::validate::ValidationOptions;

/// Media types counted and scanned as images.
pub const IMAGE_MEDIA_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/svg+xml",
    "image/webp",
];

/// Edge length above which an image counts as high resolution.
pub const HIGH_RES_EDGE: u32 = 2000;

const PNG_SIGNATURE: &[u8; 8] = b"\x89PNG\r\n\x1a\n";

/// Counters gathered while scanning images.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImageStats {
    /// Manifest items with an image media type.
    pub image_count: usize,
    /// Images over [`HIGH_RES_EDGE`] on either axis but within the hard limit.
    pub high_res_images: usize,
}

/// Returns `true` for media types handled by this scanner.
pub fn is_image_media_type(media_type: &str) -> bool {
    IMAGE_MEDIA_TYPES.contains(&media_type)
}

/// Pixel dimensions `(width, height)` for PNG and JPEG data.
pub fn image_dimensions(bytes: &[u8], media_type: &str) -> Option<(u32, u32)> {
    match media_type {
        "image/png" => png_dimensions(bytes),
        "image/jpeg" => jpeg_dimensions(bytes),
        _ => None,
    }
}

/// PNG stores width and height as big-endian `u32` at offsets 16..24.
pub fn png_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    if bytes.len() < 24 || &bytes[..8] != PNG_SIGNATURE {
        return None;
    }
    let width = u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
    let height = u32::from_be_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
    nonzero(width, height)
}

/// Scan for a baseline, extended or progressive SOF marker and read the
/// big-endian height/width pair that follows its length and precision.
pub fn jpeg_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    let mut i = 0usize;
    while i + 9 <= bytes.len() {
        if bytes[i] == 0xFF && matches!(bytes[i + 1], 0xC0..=0xC2) {
            let height = u16::from_be_bytes([bytes[i + 5], bytes[i + 6]]);
            let width = u16::from_be_bytes([bytes[i + 7], bytes[i + 8]]);
            return nonzero(u32::from(width), u32::from(height));
        }
        i += 1;
    }
    None
}

fn nonzero(width: u32, height: u32) -> Option<(u32, u32)> {
    (width > 0 && height > 0).then_some((width, height))
}

fn megabytes(bytes: usize) -> f64 {
    bytes as f64 / 1024.0 / 1024.0
}

/// Scan every image declared in the manifest.
///
/// Missing images are additionally traced back to every markup document
/// that mentions their file name.
pub fn scan_images<F: Read + Seek>(
    package: &mut Package<F>,
    manifest: &Manifest,
    documents: &[Document],
    options: &ValidationOptions,
    findings: &mut Findings,
) -> Result<ImageStats, ZipError> {
    let mut stats = ImageStats::default();
    let mut missing: Vec<&ManifestItem> = Vec::new();

    for item in manifest.items() {
        if !is_image_media_type(&item.media_type) {
            continue;
        }
        stats.image_count += 1;
        let href = item.href.as_str();

        let bytes = match package.read_resource(href)? {
            Resource::Found(bytes) => bytes,
            Resource::Missing => {
                findings.issue(
                    Platform::General,
                    FindingCode::ImageMissing,
                    format!(
                        "Missing image: '{}' (declared in manifest but file not found)",
                        href
                    ),
                );
                missing.push(item);
                continue;
            }
            Resource::Unreadable(err) => {
                findings.warning(
                    Platform::General,
                    FindingCode::ResourceUnreadable,
                    format!("Error reading image '{}': {}", href, err),
                );
                continue;
            }
        };

        if bytes.len() > options.image_large_bytes {
            findings.warning(
                Platform::General,
                FindingCode::ImageVeryLarge,
                format!(
                    "Large image '{}' ({:.1}MB) - consider optimizing",
                    href,
                    megabytes(bytes.len())
                ),
            );
        } else if bytes.len() > options.image_warn_bytes {
            findings.warning(
                Platform::General,
                FindingCode::ImageLarge,
                format!(
                    "Image '{}' ({:.1}MB) - consider optimizing for better performance",
                    href,
                    megabytes(bytes.len())
                ),
            );
        }

        if let Some((width, height)) = image_dimensions(&bytes, &item.media_type) {
            if width > options.image_max_width || height > options.image_max_height {
                findings.warning(
                    Platform::General,
                    FindingCode::ImageDimensions,
                    format!(
                        "Very large image dimensions '{}' ({}x{}px) - consider if this resolution is necessary for e-readers",
                        href, width, height
                    ),
                );
            } else if width > HIGH_RES_EDGE || height > HIGH_RES_EDGE {
                stats.high_res_images += 1;
            }
        }

        match item.media_type.as_str() {
            "image/svg+xml" => {
                findings.warning(
                    Platform::PocketBook,
                    FindingCode::SvgImage,
                    format!("SVG image '{}' may have limited support on PocketBook", href),
                );
                findings.warning(
                    Platform::Kindle,
                    FindingCode::SvgImage,
                    format!("SVG image '{}' not supported on older Kindle devices", href),
                );
            }
            "image/gif" => findings.warning(
                Platform::Kindle,
                FindingCode::GifImage,
                format!("GIF image '{}' - Kindle converts to grayscale", href),
            ),
            _ => {}
        }
    }

    for doc in documents {
        for item in &missing {
            if doc.text.contains(item.file_name()) || doc.text.contains(&item.href) {
                findings.issue(
                    Platform::General,
                    FindingCode::ImageReferenceMissing,
                    format!("File '{}' references missing image '{}'", doc.href, item.href),
                );
            }
        }
    }

    log::debug!(
        "[SCAN] images: {} declared, {} missing, {} high-res",
        stats.image_count,
        missing.len(),
        stats.high_res_images
    );
    Ok(stats)
}


#[cfg(test)]
mod tests {
    use super::test_images::{jpeg, png};
    use super::*;
    use crate::finding::Severity;
    use crate::zip::test_support::build_zip;
    use crate::zip::EpubArchive;
    use std::io::Cursor;

    fn item(id: &str, href: &str, media_type: &str) -> ManifestItem {
        ManifestItem {
            id: id.into(),
            href: href.into(),
            media_type: media_type.into(),
            properties: Vec::new(),
        }
    }

    fn scan(
        files: &[(&str, &[u8])],
        items: Vec<ManifestItem>,
        documents: &[Document],
        options: ValidationOptions,
    ) -> (ImageStats, Findings) {
        let archive = EpubArchive::open(Cursor::new(build_zip(files))).unwrap();
        let mut package = Package::new(archive);
        let mut manifest = Manifest::default();
        for item in items {
            manifest.insert(item);
        }
        let mut findings = Findings::new();
        let stats =
            scan_images(&mut package, &manifest, documents, &options, &mut findings).unwrap();
        (stats, findings)
    }

    #[test]
    fn png_dimensions_from_header() {
        assert_eq!(png_dimensions(&png(640, 480)), Some((640, 480)));
        assert_eq!(image_dimensions(&png(1, 2), "image/png"), Some((1, 2)));
    }

    #[test]
    fn png_rejects_bad_signature_and_short_input() {
        let mut bytes = png(10, 10);
        bytes[1] = b'X';
        assert_eq!(png_dimensions(&bytes), None);
        assert_eq!(png_dimensions(&png(10, 10)[..20]), None);
    }

    #[test]
    fn jpeg_dimensions_from_sof() {
        assert_eq!(jpeg_dimensions(&jpeg(1200, 1600)), Some((1200, 1600)));
        assert_eq!(image_dimensions(&jpeg(3, 4), "image/jpeg"), Some((3, 4)));
    }

    #[test]
    fn jpeg_progressive_marker() {
        let mut bytes = jpeg(800, 600);
        let sof = bytes.iter().position(|b| *b == 0xC0).unwrap();
        bytes[sof] = 0xC2;
        assert_eq!(jpeg_dimensions(&bytes), Some((800, 600)));
    }

    #[test]
    fn undecodable_images_have_no_dimensions() {
        assert_eq!(jpeg_dimensions(b"\xFF\xD8garbage"), None);
        assert_eq!(image_dimensions(&png(5, 5), "image/gif"), None);
    }

    #[test]
    fn oversized_dimensions_warn_and_high_res_is_counted() {
        let huge = png(4000, 3000);
        let high = png(2500, 1000);
        let (stats, findings) = scan(
            &[("huge.png", huge.as_slice()), ("high.png", high.as_slice())],
            vec![
                item("a", "huge.png", "image/png"),
                item("b", "high.png", "image/png"),
            ],
            &[],
            ValidationOptions::default(),
        );
        assert_eq!(stats.image_count, 2);
        assert_eq!(stats.high_res_images, 1);
        assert_eq!(findings.count_code(FindingCode::ImageDimensions), 1);
    }

    #[test]
    fn byte_size_thresholds() {
        let data = vec![0u8; 64];
        let options = ValidationOptions::default()
            .with_image_warn_bytes(16)
            .with_image_large_bytes(32);
        let (_, findings) = scan(
            &[("a.png", data.as_slice())],
            vec![item("a", "a.png", "image/png")],
            &[],
            options,
        );
        assert_eq!(findings.count_code(FindingCode::ImageVeryLarge), 1);
        assert_eq!(findings.count_code(FindingCode::ImageLarge), 0);
    }

    #[test]
    fn svg_and_gif_warnings() {
        let (_, findings) = scan(
            &[("a.svg", b"<svg/>"), ("b.gif", b"GIF89a")],
            vec![
                item("a", "a.svg", "image/svg+xml"),
                item("b", "b.gif", "image/gif"),
            ],
            &[],
            ValidationOptions::default(),
        );
        assert_eq!(
            findings.count_where(FindingCode::SvgImage, Platform::PocketBook, Severity::Warning),
            1
        );
        assert_eq!(
            findings.count_where(FindingCode::SvgImage, Platform::Kindle, Severity::Warning),
            1
        );
        assert_eq!(
            findings.count_where(FindingCode::GifImage, Platform::Kindle, Severity::Warning),
            1
        );
    }

    #[test]
    fn missing_image_traced_to_referencing_documents() {
        let docs = vec![
            Document::new("OEBPS/a.xhtml", r#"<img src="../Images/pic.png"/>"#),
            Document::new("OEBPS/b.xhtml", "<p>no pictures</p>"),
            Document::new("OEBPS/c.xhtml", r#"<img src="pic.png"/>"#),
        ];
        let (stats, findings) = scan(
            &[],
            vec![item("p", "Images/pic.png", "image/png")],
            &docs,
            ValidationOptions::default(),
        );
        assert_eq!(stats.image_count, 1);
        assert_eq!(findings.count_code(FindingCode::ImageMissing), 1);
        assert_eq!(findings.count_code(FindingCode::ImageReferenceMissing), 2);
    }
}
