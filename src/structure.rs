//! Structural and cross-reference checks.
//!
//! Metadata, spine and navigation checks work on the package model alone.
//! Identifier and link checks use a tolerant attribute scan of the content
//! documents, so they still produce results for documents that fail the
//! strict well-formedness pass.

use std::collections::{HashMap, HashSet};
use std::io::{Read, Seek};

use crate::error::ZipError;
use crate::finding::{FindingCode, Findings, Platform};
use crate::opf::{
    parent_dir, percent_decode, resolve_href, Manifest, ManifestItem, Metadata, PackageModel,
    Spine, NCX_MEDIA_TYPE,
};
use crate::package::{Package, Resource};
use crate::scan::image::{image_dimensions, is_image_media_type};
use crate::scan::Document;
use crate::validate::ValidationOptions;

regex!(LANGUAGE_TAG, r"^[a-z]{2,3}(-[A-Z]{2,4})?(-[a-z]{4})?$");
regex!(
    ID_ATTRIBUTE,
    r#"(?i)\s(?:xml:)?id\s*=\s*(?:"([^"]*)"|'([^']*)')"#
);
regex!(
    HREF_ATTRIBUTE,
    r#"(?i)\s(?:xlink:)?href\s*=\s*(?:"([^"]*)"|'([^']*)')"#
);
regex!(URI_SCHEME, r"^[A-Za-z][A-Za-z0-9+.\-]*:");

/// Files named in a duplicate-id message before it is truncated.
const DUPLICATE_ID_FILES_SHOWN: usize = 3;

/// Language metadata: missing is an issue, malformed is a warning.
pub fn check_metadata(metadata: &Metadata, findings: &mut Findings) {
    match metadata.language.as_deref() {
        None => findings.issue(
            Platform::General,
            FindingCode::LanguageMissing,
            "Missing dc:language metadata (REQUIRED by EPUB specification - EPUB 3.3 \u{a7} 4.2.2)",
        ),
        Some(lang) if !LANGUAGE_TAG.is_match(lang) => findings.warning(
            Platform::General,
            FindingCode::LanguageInvalid,
            format!(
                "Invalid language code '{}' - should be BCP 47 format (e.g., 'en', 'en-US')",
                lang
            ),
        ),
        Some(_) => {}
    }
}

/// Spine `linear` attributes other than `yes`/`no`.
pub fn check_spine_linear(spine: &Spine, findings: &mut Findings) {
    for item in spine.items.iter().filter(|item| !item.has_valid_linear()) {
        findings.issue(
            Platform::General,
            FindingCode::SpineLinearInvalid,
            format!(
                "Invalid linear attribute '{}' in spine itemref '{}' (must be 'yes' or 'no')",
                item.linear, item.idref
            ),
        );
    }
}

/// Manifest identifiers declared more than once.
pub fn check_manifest(manifest: &Manifest, findings: &mut Findings) {
    for id in manifest.duplicate_ids() {
        findings.issue(
            Platform::General,
            FindingCode::ManifestIdDuplicate,
            format!("Duplicate manifest item id '{}' - identifiers must be unique", id),
        );
    }
}

/// Version-dependent navigation document requirement.
pub fn check_navigation(model: &PackageModel, findings: &mut Findings) {
    let version = model.metadata.version_or_unknown();
    if version.starts_with('2') {
        let has_ncx = model
            .manifest
            .items()
            .iter()
            .any(|item| item.media_type == NCX_MEDIA_TYPE);
        if !has_ncx {
            findings.issue(
                Platform::General,
                FindingCode::NcxMissing,
                "Missing toc.ncx file (required in EPUB 2.0 - EPUB 2.0.1 \u{a7} 2.4.1)",
            );
        }
    } else if version.starts_with('3') {
        match model.manifest.with_property("nav").count() {
            0 => findings.issue(
                Platform::General,
                FindingCode::NavMissing,
                "Missing navigation document with properties='nav' (required in EPUB 3 - EPUB 3.3 \u{a7} 5.4)",
            ),
            1 => {}
            n => findings.issue(
                Platform::General,
                FindingCode::NavAmbiguous,
                format!("Multiple navigation documents declared ({}) - only one allowed", n),
            ),
        }
    }
}

/// Every spine itemref must name a manifest item. One issue per entry.
pub fn check_spine_references(model: &PackageModel, findings: &mut Findings) {
    for item in &model.spine.items {
        if model.manifest.get(&item.idref).is_none() {
            findings.issue(
                Platform::General,
                FindingCode::SpineItemUnresolved,
                format!(
                    "Spine references non-existent manifest item: '{}' (EPUB 3.3 \u{a7} 4.3)",
                    item.idref
                ),
            );
        }
    }
}

/// Identifiers and outgoing links of one content document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DocumentIndex {
    /// Resolved archive path.
    pub href: String,
    /// Distinct `id` / `xml:id` values.
    pub ids: HashSet<String>,
    /// Raw `href` values in document order.
    pub links: Vec<String>,
}

impl DocumentIndex {
    /// Tolerant attribute scan; works on malformed markup.
    pub fn scan(doc: &Document) -> Self {
        Self {
            href: doc.href.clone(),
            ids: attribute_values(&ID_ATTRIBUTE, &doc.text).collect(),
            links: attribute_values(&HREF_ATTRIBUTE, &doc.text).collect(),
        }
    }
}

fn attribute_values<'a>(
    pattern: &'a regex::Regex,
    text: &'a str,
) -> impl Iterator<Item = String> + 'a {
    pattern.captures_iter(text).filter_map(|caps| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_string())
    })
}

/// Identifier and link index over all loaded content documents.
#[derive(Clone, Debug, Default)]
pub struct ContentIndex {
    documents: Vec<DocumentIndex>,
}

impl ContentIndex {
    /// Index every document, preserving manifest order.
    pub fn build(documents: &[Document]) -> Self {
        Self {
            documents: documents.iter().map(DocumentIndex::scan).collect(),
        }
    }

    /// Indexed documents.
    pub fn documents(&self) -> &[DocumentIndex] {
        &self.documents
    }

    /// Lookup by resolved href.
    pub fn get(&self, href: &str) -> Option<&DocumentIndex> {
        self.documents.iter().find(|doc| doc.href == href)
    }
}

/// An identifier in two or more documents is one issue naming the files.
pub fn check_duplicate_ids(index: &ContentIndex, findings: &mut Findings) {
    let mut owners: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();
    for doc in index.documents() {
        let mut ids: Vec<&str> = doc.ids.iter().map(String::as_str).collect();
        ids.sort_unstable();
        for id in ids {
            let files = owners.entry(id).or_default();
            if files.is_empty() {
                order.push(id);
            }
            files.push(&doc.href);
        }
    }

    for id in order {
        let files = &owners[id];
        if files.len() < 2 {
            continue;
        }
        let shown = files
            .iter()
            .take(DUPLICATE_ID_FILES_SHOWN)
            .copied()
            .collect::<Vec<_>>()
            .join(", ");
        let more = if files.len() > DUPLICATE_ID_FILES_SHOWN {
            "..."
        } else {
            ""
        };
        findings.issue(
            Platform::General,
            FindingCode::DuplicateId,
            format!(
                "Duplicate ID '{}' found in multiple files: {}{} (XML 1.0 \u{a7} 3.3.1)",
                id, shown, more
            ),
        );
    }
}

/// Resolve every internal link against the manifest and target identifiers.
pub fn check_links(index: &ContentIndex, manifest: &Manifest, findings: &mut Findings) {
    let manifest_hrefs = manifest.href_set();

    for doc in index.documents() {
        let base = parent_dir(&doc.href);
        for link in &doc.links {
            let link = link.trim();
            if link.is_empty() || URI_SCHEME.is_match(link) {
                continue;
            }

            let (path, fragment) = match link.split_once('#') {
                Some((path, fragment)) => (path, percent_decode(fragment)),
                None => (link, String::new()),
            };
            let path = path.split('?').next().unwrap_or(path);

            if path.is_empty() {
                if !fragment.is_empty() && !doc.ids.contains(&fragment) {
                    findings.issue(
                        Platform::General,
                        FindingCode::BrokenLink,
                        format!(
                            "{}: Broken link to '#{}' (ID not found in same file)",
                            doc.href, fragment
                        ),
                    );
                }
                continue;
            }

            let target = resolve_href(base, path);
            if !manifest_hrefs.contains(target.as_str()) {
                findings.issue(
                    Platform::General,
                    FindingCode::BrokenLink,
                    format!(
                        "{}: Broken link to '{}' (file not found in manifest)",
                        doc.href, link
                    ),
                );
                continue;
            }

            if fragment.is_empty() {
                continue;
            }
            if let Some(target_doc) = index.get(&target) {
                if !target_doc.ids.contains(&fragment) {
                    findings.warning(
                        Platform::General,
                        FindingCode::BrokenFragment,
                        format!(
                            "{}: Link to '{}' - fragment ID '{}' not found in target",
                            doc.href, link, fragment
                        ),
                    );
                }
            }
        }
    }
}

/// Items designated as the cover: `cover-image` properties, or the EPUB 2
/// `<meta name="cover">` fallback when no property is present.
pub fn cover_items(model: &PackageModel) -> Vec<&ManifestItem> {
    let designated: Vec<&ManifestItem> = model.manifest.with_property("cover-image").collect();
    if !designated.is_empty() {
        return designated;
    }
    model
        .metadata
        .cover_meta
        .as_deref()
        .and_then(|id| model.manifest.get(id))
        .into_iter()
        .collect()
}

/// Cover designation count and minimum usable resolution.
///
/// A missing designation is only reported when the package has images.
pub fn check_cover<F: Read + Seek>(
    package: &mut Package<F>,
    model: &PackageModel,
    options: &ValidationOptions,
    findings: &mut Findings,
) -> Result<(), ZipError> {
    let covers = cover_items(model);
    match covers.as_slice() {
        [] => {
            let has_images = model
                .manifest
                .items()
                .iter()
                .any(|item| is_image_media_type(&item.media_type));
            if has_images {
                findings.warning(
                    Platform::General,
                    FindingCode::CoverMissing,
                    "No cover image designated with properties='cover-image' in manifest (EPUB 3.3 \u{a7} 3.2)",
                );
            }
        }
        [cover] => {
            if let Resource::Found(bytes) = package.read_resource(&cover.href)? {
                if let Some((width, height)) = image_dimensions(&bytes, &cover.media_type) {
                    if width < options.cover_min_width || height < options.cover_min_height {
                        findings.warning(
                            Platform::General,
                            FindingCode::CoverTooSmall,
                            format!(
                                "Cover image dimensions ({}x{}px) too small - recommend minimum 1000x1400px for quality",
                                width, height
                            ),
                        );
                    }
                }
            }
        }
        many => findings.issue(
            Platform::General,
            FindingCode::CoverAmbiguous,
            format!(
                "Multiple cover images declared ({} items) - only one allowed",
                many.len()
            ),
        ),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::Severity;
    use crate::opf::{parse_package_document, SpineItem};
    use crate::scan::image::test_images::png;
    use crate::zip::test_support::build_zip;
    use crate::zip::EpubArchive;
    use std::io::Cursor;

    fn model(version: &str, items: &str, spine: &str) -> PackageModel {
        let opf = format!(
            r#"<package version="{}"><metadata><dc:language xmlns:dc="http://purl.org/dc/elements/1.1/">en</dc:language></metadata><manifest>{}</manifest><spine>{}</spine></package>"#,
            version, items, spine
        );
        parse_package_document(opf.as_bytes(), "OEBPS/content.opf").unwrap()
    }

    #[test]
    fn language_rules() {
        let mut findings = Findings::new();
        check_metadata(&Metadata::default(), &mut findings);
        assert_eq!(findings.count_code(FindingCode::LanguageMissing), 1);

        let cases = [
            ("en", true),
            ("en-US", true),
            ("zh-Hant", false),
            ("sr-RS-latn", true),
            ("English", false),
        ];
        for (lang, ok) in cases {
            let mut findings = Findings::new();
            let meta = Metadata {
                language: Some(lang.into()),
                ..Metadata::default()
            };
            check_metadata(&meta, &mut findings);
            assert_eq!(findings.is_empty(), ok, "{}", lang);
            if !ok {
                assert_eq!(findings.all()[0].severity, Severity::Warning);
            }
        }
    }

    #[test]
    fn invalid_linear_values() {
        let spine = Spine {
            items: vec![
                SpineItem { idref: "a".into(), linear: "yes".into() },
                SpineItem { idref: "b".into(), linear: "true".into() },
            ],
        };
        let mut findings = Findings::new();
        check_spine_linear(&spine, &mut findings);
        assert_eq!(findings.count_code(FindingCode::SpineLinearInvalid), 1);
    }

    #[test]
    fn spine_issue_per_unresolved_entry() {
        let model = model(
            "3.0",
            r#"<item id="a" href="a.xhtml" media-type="application/xhtml+xml"/>"#,
            r#"<itemref idref="a"/><itemref idref="x"/><itemref idref="y"/><itemref idref="x"/>"#,
        );
        let mut findings = Findings::new();
        check_spine_references(&model, &mut findings);
        assert_eq!(findings.count_code(FindingCode::SpineItemUnresolved), 3);
    }

    #[test]
    fn epub3_navigation_requirements() {
        let nav = r#"<item id="n" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>"#;
        let nav2 = r#"<item id="m" href="nav2.xhtml" media-type="application/xhtml+xml" properties="nav"/>"#;

        let mut findings = Findings::new();
        check_navigation(&model("3.0", nav, ""), &mut findings);
        assert!(findings.is_empty());

        check_navigation(&model("3.0", "", ""), &mut findings);
        assert_eq!(findings.count_code(FindingCode::NavMissing), 1);

        check_navigation(&model("3.0", &format!("{}{}", nav, nav2), ""), &mut findings);
        assert_eq!(findings.count_code(FindingCode::NavAmbiguous), 1);
    }

    #[test]
    fn nav_property_is_token_matched() {
        let items = r#"<item id="n" href="x.xhtml" media-type="application/xhtml+xml" properties="navigation-ish"/>"#;
        let mut findings = Findings::new();
        check_navigation(&model("3.0", items, ""), &mut findings);
        assert_eq!(findings.count_code(FindingCode::NavMissing), 1);
    }

    #[test]
    fn epub2_requires_ncx() {
        let mut findings = Findings::new();
        check_navigation(&model("2.0", "", ""), &mut findings);
        assert_eq!(findings.count_code(FindingCode::NcxMissing), 1);

        let mut findings = Findings::new();
        let ncx = r#"<item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>"#;
        check_navigation(&model("2.0", ncx, ""), &mut findings);
        assert!(findings.is_empty());
    }

    #[test]
    fn duplicate_id_across_documents_names_both_files() {
        let docs = vec![
            Document::new("OEBPS/a.xhtml", r#"<p id="intro">a</p><p id="x">"#),
            Document::new("OEBPS/b.xhtml", r#"<div id='intro'>b</div>"#),
            Document::new("OEBPS/c.xhtml", r#"<p id="c">"#),
        ];
        let mut findings = Findings::new();
        check_duplicate_ids(&ContentIndex::build(&docs), &mut findings);
        assert_eq!(findings.len(), 1);
        let msg = &findings.all()[0].message;
        assert!(msg.contains("'intro'"));
        assert!(msg.contains("OEBPS/a.xhtml, OEBPS/b.xhtml"), "{}", msg);
    }

    #[test]
    fn same_id_twice_in_one_document_is_not_a_cross_document_duplicate() {
        let docs = vec![Document::new("a.xhtml", r#"<p id="x"/><p id="x"/>"#)];
        let mut findings = Findings::new();
        check_duplicate_ids(&ContentIndex::build(&docs), &mut findings);
        assert!(findings.is_empty());
    }

    #[test]
    fn link_resolution() {
        let model = model(
            "3.0",
            r#"<item id="a" href="Text/a.xhtml" media-type="application/xhtml+xml"/>
               <item id="b" href="Text/b%20c.xhtml" media-type="application/xhtml+xml"/>
               <item id="s" href="Styles/s.css" media-type="text/css"/>"#,
            "",
        );
        let docs = vec![
            Document::new(
                "OEBPS/Text/a.xhtml",
                r##"<link href="../Styles/s.css"/>
<a href="#top">x</a> <a href="#gone">x</a>
<a href="b%20c.xhtml#sec">x</a> <a href="b%20c.xhtml#nope">x</a>
<a href="missing.xhtml">x</a> <a href="https://example.com">x</a>
<a href="mailto:a@b.c">x</a> <a href="tel:123">x</a>
<p id="top"/>"##,
            ),
            Document::new("OEBPS/Text/b c.xhtml", r#"<h1 id="sec">b</h1>"#),
        ];
        let mut findings = Findings::new();
        check_links(&ContentIndex::build(&docs), &model.manifest, &mut findings);

        assert_eq!(
            findings.count_where(FindingCode::BrokenLink, Platform::General, Severity::Issue),
            2
        );
        assert_eq!(
            findings.count_where(FindingCode::BrokenFragment, Platform::General, Severity::Warning),
            1
        );
        let messages: Vec<_> = findings.all().iter().map(|f| f.message.as_str()).collect();
        assert!(messages[0].contains("'#gone'"));
        assert!(messages[1].contains("fragment ID 'nope'"));
        assert!(messages[2].contains("'missing.xhtml'"));
    }

    fn cover_run(items: &str, files: &[(&str, &[u8])]) -> Findings {
        let model = model("3.0", items, "");
        let archive = EpubArchive::open(Cursor::new(build_zip(files))).unwrap();
        let mut package = Package::new(archive);
        let mut findings = Findings::new();
        check_cover(&mut package, &model, &ValidationOptions::default(), &mut findings).unwrap();
        findings
    }

    #[test]
    fn cover_checks() {
        let small = png(200, 300);
        let good = png(1600, 2400);

        let findings = cover_run(
            r#"<item id="c" href="c.png" media-type="image/png" properties="cover-image"/>"#,
            &[("OEBPS/c.png", small.as_slice())],
        );
        assert_eq!(findings.count_code(FindingCode::CoverTooSmall), 1);

        let findings = cover_run(
            r#"<item id="c" href="c.png" media-type="image/png" properties="cover-image"/>"#,
            &[("OEBPS/c.png", good.as_slice())],
        );
        assert!(findings.is_empty());

        let findings = cover_run(
            r#"<item id="c" href="c.png" media-type="image/png" properties="cover-image"/>
               <item id="d" href="d.png" media-type="image/png" properties="cover-image"/>"#,
            &[],
        );
        assert_eq!(findings.count_code(FindingCode::CoverAmbiguous), 1);

        let findings = cover_run(
            r#"<item id="i" href="i.png" media-type="image/png"/>"#,
            &[],
        );
        assert_eq!(findings.count_code(FindingCode::CoverMissing), 1);

        assert!(cover_run("", &[]).is_empty());
    }
}
