//! Validation run orchestration.
//!
//! A run opens the archive, builds the package model and drives every
//! checker over it, collecting findings into one [`Report`]. Only failures to
//! open the input surface as errors; everything after that is a finding.

use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use crate::error::{ValidateError, ZipError};
use crate::finding::{FindingCode, Findings, Platform};
use crate::opf::{parse_package_document, PackageModel};
use crate::package::{Package, Resource};
use crate::platform::{apply_platform_rules, check_package_size};
use crate::report::{Report, ReportInfo};
use crate::scan::font::scan_fonts;
use crate::scan::image::scan_images;
use crate::scan::markup::scan_document;
use crate::scan::style::scan_stylesheets;
use crate::scan::load_documents;
use crate::structure::{
    check_cover, check_duplicate_ids, check_links, check_manifest, check_metadata,
    check_navigation, check_spine_linear, check_spine_references, ContentIndex,
};
use crate::zip::{EpubArchive, ZipLimits};

const MIB: usize = 1024 * 1024;

/// Thresholds and limits for validation runs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ValidationOptions {
    /// Margin or padding above this many em/rem is flagged.
    pub large_margin_em: f64,
    /// More inline `style` attributes than this in one document is flagged.
    pub inline_style_threshold: usize,
    /// Image size warning threshold in bytes.
    pub image_warn_bytes: usize,
    /// Image size issue threshold in bytes.
    pub image_large_bytes: usize,
    /// Maximum image width in pixels.
    pub image_max_width: u32,
    /// Maximum image height in pixels.
    pub image_max_height: u32,
    /// Minimum cover width in pixels.
    pub cover_min_width: u32,
    /// Minimum cover height in pixels.
    pub cover_min_height: u32,
    /// Package size that triggers a general slowdown warning.
    pub package_warn_bytes: u64,
    /// Package size above the Kindle e-mail delivery limit.
    pub kindle_delivery_bytes: u64,
    /// Optional ZIP safety limits used while reading archive entries.
    pub zip_limits: Option<ZipLimits>,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            large_margin_em: 5.0,
            inline_style_threshold: 10,
            image_warn_bytes: 2 * MIB,
            image_large_bytes: 5 * MIB,
            image_max_width: 3000,
            image_max_height: 4000,
            cover_min_width: 300,
            cover_min_height: 400,
            package_warn_bytes: 100 * MIB as u64,
            kindle_delivery_bytes: 650 * MIB as u64,
            zip_limits: None,
        }
    }
}

impl ValidationOptions {
    /// Set the margin threshold in em/rem.
    pub fn with_large_margin_em(mut self, value: f64) -> Self {
        self.large_margin_em = value;
        self
    }

    /// Set the inline style density threshold.
    pub fn with_inline_style_threshold(mut self, value: usize) -> Self {
        self.inline_style_threshold = value;
        self
    }

    /// Set the image size warning threshold.
    pub fn with_image_warn_bytes(mut self, value: usize) -> Self {
        self.image_warn_bytes = value;
        self
    }

    /// Set the image size issue threshold.
    pub fn with_image_large_bytes(mut self, value: usize) -> Self {
        self.image_large_bytes = value;
        self
    }

    /// Set the maximum image dimensions.
    pub fn with_image_max_dimensions(mut self, width: u32, height: u32) -> Self {
        self.image_max_width = width;
        self.image_max_height = height;
        self
    }

    /// Set the minimum cover dimensions.
    pub fn with_cover_min_dimensions(mut self, width: u32, height: u32) -> Self {
        self.cover_min_width = width;
        self.cover_min_height = height;
        self
    }

    /// Set the general package size warning threshold.
    pub fn with_package_warn_bytes(mut self, value: u64) -> Self {
        self.package_warn_bytes = value;
        self
    }

    /// Set the Kindle delivery size limit.
    pub fn with_kindle_delivery_bytes(mut self, value: u64) -> Self {
        self.kindle_delivery_bytes = value;
        self
    }

    /// Set ZIP safety limits.
    pub fn with_zip_limits(mut self, limits: ZipLimits) -> Self {
        self.zip_limits = Some(limits);
        self
    }
}

/// Validate an EPUB from a filesystem path.
pub fn validate_epub_file<P: AsRef<Path>>(path: P) -> Result<Report, ValidateError> {
    validate_epub_file_with_options(path, ValidationOptions::default())
}

/// Validate an EPUB from a filesystem path with explicit options.
pub fn validate_epub_file_with_options<P: AsRef<Path>>(
    path: P,
    options: ValidationOptions,
) -> Result<Report, ValidateError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ValidateError::NotFound(path.display().to_string()));
    }
    let file = File::open(path).map_err(|e| ValidateError::Io(e.to_string()))?;
    validate_epub_reader_with_options(file, options)
}

/// Validate an EPUB from any `Read + Seek` reader.
pub fn validate_epub_reader<R: Read + Seek>(reader: R) -> Result<Report, ValidateError> {
    validate_epub_reader_with_options(reader, ValidationOptions::default())
}

/// Validate an EPUB from any `Read + Seek` reader with explicit options.
pub fn validate_epub_reader_with_options<R: Read + Seek>(
    reader: R,
    options: ValidationOptions,
) -> Result<Report, ValidateError> {
    let archive = EpubArchive::open_with_limits(reader, options.zip_limits).map_err(|err| {
        match err {
            ZipError::IoError => ValidateError::Io(err.to_string()),
            other => ValidateError::NotAnArchive(other),
        }
    })?;
    let mut package = Package::new(archive);
    log::debug!(
        "[VALIDATE] archive opened: {} bytes, {} entries",
        package.size(),
        package.entry_count()
    );

    let mut info = ReportInfo::new(package.size(), package.entry_count());
    let mut findings = Findings::new();
    if let Err(err) = run(&mut package, &options, &mut info, &mut findings) {
        log::warn!("[VALIDATE] run aborted: {}", err);
        findings.issue(
            Platform::General,
            FindingCode::InternalError,
            format!("Error processing EPUB: {}", err),
        );
    }
    log::debug!("[VALIDATE] {} findings", findings.len());
    Ok(Report::new(info, findings))
}

fn run<R: Read + Seek>(
    package: &mut Package<R>,
    options: &ValidationOptions,
    info: &mut ReportInfo,
    findings: &mut Findings,
) -> Result<(), ZipError> {
    package.check_mimetype(findings)?;
    package.check_container(findings);
    let Some(opf_path) = package.locate_package_document(findings)? else {
        return Ok(());
    };

    let model = match package.read_resource(&opf_path)? {
        Resource::Found(bytes) => match parse_package_document(&bytes, &opf_path) {
            Ok(model) => model,
            Err(err) => {
                findings.issue(
                    Platform::General,
                    FindingCode::PackageDocumentUnparseable,
                    format!("Error parsing package document '{}': {}", opf_path, err),
                );
                return Ok(());
            }
        },
        Resource::Missing => {
            findings.issue(
                Platform::General,
                FindingCode::PackageDocumentMissing,
                format!("Package document '{}' not found in archive", opf_path),
            );
            return Ok(());
        }
        Resource::Unreadable(err) => {
            findings.issue(
                Platform::General,
                FindingCode::PackageDocumentUnparseable,
                format!("Error parsing package document '{}': {}", opf_path, err),
            );
            return Ok(());
        }
    };
    fill_metadata(info, &model);

    check_metadata(&model.metadata, findings);
    check_spine_linear(&model.spine, findings);
    check_manifest(&model.manifest, findings);

    let documents = load_documents(package, &model.manifest, findings)?;
    for document in &documents {
        scan_document(document, options, findings);
    }

    let images = scan_images(package, &model.manifest, &documents, options, findings)?;
    info.image_count = images.image_count;
    info.high_res_images = images.high_res_images;
    info.css_count = scan_stylesheets(package, &model.manifest, options.large_margin_em, findings)?;
    info.font_count = scan_fonts(package, &model.manifest, findings)?;

    package.check_encryption(findings)?;
    check_package_size(package.size(), options, findings);

    check_navigation(&model, findings);
    check_spine_references(&model, findings);
    let index = ContentIndex::build(&documents);
    check_duplicate_ids(&index, findings);
    check_links(&index, &model.manifest, findings);
    check_cover(package, &model, options, findings)?;

    apply_platform_rules(&model, findings);
    Ok(())
}

fn fill_metadata(info: &mut ReportInfo, model: &PackageModel) {
    let metadata = &model.metadata;
    if let Some(title) = &metadata.title {
        info.title = title.clone();
    }
    if let Some(author) = &metadata.author {
        info.author = author.clone();
    }
    info.version = metadata.version_or_unknown().to_string();
    info.language = metadata.language.clone();
}
