//! Platform rule engine.
//!
//! Maps package-level predicates (metadata properties, manifest media types
//! and property tokens, package size) onto per-reader findings that the
//! content scanners do not produce themselves.

use crate::finding::{FindingCode, Findings, Platform};
use crate::opf::{ManifestItem, PackageModel};
use crate::validate::ValidationOptions;

/// Media types treated as embedded audio or video.
pub const AUDIO_VIDEO_MEDIA_TYPES: &[&str] =
    &["audio/mpeg", "audio/mp4", "video/mp4", "video/h264"];

fn is_audio_video(item: &ManifestItem) -> bool {
    AUDIO_VIDEO_MEDIA_TYPES.contains(&item.media_type.as_str())
}

fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0
}

/// Package size thresholds: a general slowdown warning and the Kindle
/// e-mail delivery limit.
pub fn check_package_size(size: u64, options: &ValidationOptions, findings: &mut Findings) {
    if size > options.package_warn_bytes {
        findings.warning(
            Platform::General,
            FindingCode::PackageTooLarge,
            format!(
                "Large file size ({:.1}MB) may cause performance issues",
                megabytes(size)
            ),
        );
    }
    if size > options.kindle_delivery_bytes {
        findings.issue(
            Platform::Kindle,
            FindingCode::KindleDeliveryLimit,
            format!(
                "File too large for Kindle email delivery ({:.1}MB > {:.0}MB limit)",
                megabytes(size),
                megabytes(options.kindle_delivery_bytes)
            ),
        );
    }
}

/// Apply every platform rule, one reader family at a time.
pub fn apply_platform_rules(model: &PackageModel, findings: &mut Findings) {
    pc_reader(model, findings);
    apple_books(model, findings);
    pocketbook(model, findings);
    kindle(model, findings);
    kobo(model, findings);
    inkbook(model, findings);
    android(model, findings);
}

fn pc_reader(model: &PackageModel, findings: &mut Findings) {
    if model.metadata.is_fixed_layout() {
        findings.warning(
            Platform::PcReader,
            FindingCode::FixedLayout,
            "Fixed layout EPUB - may not reflow text properly",
        );
    }
}

fn vendor_properties<'a>(
    model: &'a PackageModel,
    prefix: &'a str,
) -> impl Iterator<Item = &'a str> + 'a {
    model
        .metadata
        .properties
        .iter()
        .map(|(property, _)| property.as_str())
        .filter(move |property| property.starts_with(prefix))
}

fn apple_books(model: &PackageModel, findings: &mut Findings) {
    for property in vendor_properties(model, "ibooks:") {
        findings.warning(
            Platform::AppleBooks,
            FindingCode::AppleExtension,
            format!(
                "iBooks-specific feature detected: {} (not portable to other readers)",
                property
            ),
        );
    }
    for item in model.manifest.with_property("scripted") {
        findings.warning(
            Platform::AppleBooks,
            FindingCode::ScriptedContent,
            format!("Scripted content in '{}' - Apple Books specific", item.href),
        );
    }
}

fn pocketbook(model: &PackageModel, findings: &mut Findings) {
    for item in model
        .manifest
        .with_property("mathml")
        .filter(|item| item.is_markup())
    {
        findings.warning(
            Platform::PocketBook,
            FindingCode::MathMl,
            format!(
                "MathML content in '{}' may have limited support on PocketBook",
                item.href
            ),
        );
    }
}

fn kindle(model: &PackageModel, findings: &mut Findings) {
    for item in model.manifest.items().iter().filter(|item| is_audio_video(item)) {
        findings.issue(
            Platform::Kindle,
            FindingCode::AudioVideo,
            format!(
                "Audio/Video content '{}' not supported on Kindle (requires conversion)",
                item.href
            ),
        );
    }
    findings.warning(
        Platform::Kindle,
        FindingCode::ComplexTables,
        "Complex tables may not render well - verify after conversion to MOBI/AZW3",
    );
    findings.issue(
        Platform::Kindle,
        FindingCode::ConversionRequired,
        "Kindle devices require conversion from EPUB to MOBI/AZW3 format",
    );
}

fn kobo(model: &PackageModel, findings: &mut Findings) {
    for property in vendor_properties(model, "kobo:") {
        findings.warning(
            Platform::Kobo,
            FindingCode::KoboExtension,
            format!(
                "Kobo-specific feature detected: {} (not portable to other readers)",
                property
            ),
        );
    }
}

fn inkbook(model: &PackageModel, findings: &mut Findings) {
    for item in model
        .manifest
        .items()
        .iter()
        .filter(|item| item.media_type == "image/svg+xml")
    {
        findings.warning(
            Platform::InkBook,
            FindingCode::SvgImage,
            format!("SVG image '{}' may have limited support on InkBook", item.href),
        );
    }
    if model.metadata.is_fixed_layout() {
        findings.warning(
            Platform::InkBook,
            FindingCode::FixedLayout,
            "Fixed layout may not work correctly on InkBook",
        );
    }
}

fn android(model: &PackageModel, findings: &mut Findings) {
    for item in model.manifest.items().iter().filter(|item| is_audio_video(item)) {
        findings.warning(
            Platform::Android,
            FindingCode::AudioVideo,
            format!(
                "Audio/Video content '{}' - support varies by Android reader app",
                item.href
            ),
        );
    }
    for item in model.manifest.with_property("mathml") {
        findings.warning(
            Platform::Android,
            FindingCode::MathMl,
            format!(
                "MathML content in '{}' may not display correctly in all Android EPUB readers",
                item.href
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::Severity;
    use crate::opf::parse_package_document;

    fn model(meta: &str, items: &str) -> PackageModel {
        let opf = format!(
            r#"<package version="3.0"><metadata>{}</metadata><manifest>{}</manifest><spine/></package>"#,
            meta, items
        );
        parse_package_document(opf.as_bytes(), "content.opf").unwrap()
    }

    fn run(model: &PackageModel) -> Findings {
        let mut findings = Findings::new();
        apply_platform_rules(model, &mut findings);
        findings
    }

    #[test]
    fn kindle_standing_notices_always_present() {
        let findings = run(&model("", ""));
        assert_eq!(findings.len(), 2);
        assert!(findings.all().iter().all(|f| f.code.is_standing()));
        assert_eq!(
            findings.count_where(
                FindingCode::ConversionRequired,
                Platform::Kindle,
                Severity::Issue
            ),
            1
        );
        assert_eq!(
            findings.count_where(FindingCode::ComplexTables, Platform::Kindle, Severity::Warning),
            1
        );
    }

    #[test]
    fn fixed_layout_warns_pc_and_inkbook() {
        let findings = run(&model(
            r#"<meta property="rendition:layout">pre-paginated</meta>"#,
            "",
        ));
        assert_eq!(
            findings.count_where(FindingCode::FixedLayout, Platform::PcReader, Severity::Warning),
            1
        );
        assert_eq!(
            findings.count_where(FindingCode::FixedLayout, Platform::InkBook, Severity::Warning),
            1
        );

        let reflowable = run(&model(
            r#"<meta property="rendition:layout">reflowable</meta>"#,
            "",
        ));
        assert_eq!(reflowable.count_code(FindingCode::FixedLayout), 0);
    }

    #[test]
    fn vendor_meta_properties() {
        let findings = run(&model(
            r#"<meta property="ibooks:specified-fonts">true</meta><meta property="kobo:fixed">x</meta>"#,
            "",
        ));
        assert_eq!(findings.count_code(FindingCode::AppleExtension), 1);
        assert_eq!(findings.count_code(FindingCode::KoboExtension), 1);
    }

    #[test]
    fn manifest_property_rules() {
        let findings = run(&model(
            "",
            r#"<item id="a" href="a.xhtml" media-type="application/xhtml+xml" properties="scripted mathml"/>
               <item id="v" href="v.mp4" media-type="video/mp4"/>
               <item id="s" href="s.svg" media-type="image/svg+xml"/>"#,
        ));
        assert_eq!(findings.count_code(FindingCode::ScriptedContent), 1);
        let count = |code, platform, severity| findings.count_where(code, platform, severity);
        assert_eq!(count(FindingCode::MathMl, Platform::PocketBook, Severity::Warning), 1);
        assert_eq!(count(FindingCode::MathMl, Platform::Android, Severity::Warning), 1);
        assert_eq!(count(FindingCode::AudioVideo, Platform::Kindle, Severity::Issue), 1);
        assert_eq!(count(FindingCode::AudioVideo, Platform::Android, Severity::Warning), 1);
        assert_eq!(count(FindingCode::SvgImage, Platform::InkBook, Severity::Warning), 1);
    }

    #[test]
    fn package_size_thresholds() {
        let options = ValidationOptions::default();
        let mut findings = Findings::new();
        check_package_size(10 * 1024 * 1024, &options, &mut findings);
        assert!(findings.is_empty());

        check_package_size(700 * 1024 * 1024, &options, &mut findings);
        assert_eq!(findings.count_code(FindingCode::PackageTooLarge), 1);
        assert_eq!(
            findings.count_where(
                FindingCode::KindleDeliveryLimit,
                Platform::Kindle,
                Severity::Issue
            ),
            1
        );
        assert!(findings.all()[1].message.contains("> 650MB limit"));
    }
}
