//! Markup (XHTML/HTML) content scanner.
//!
//! Two independent passes run over each document: a strict quick-xml pass
//! that only reports well-formedness, and tolerant text scans (entities,
//! scripts, inline styles, layout hazards) that never depend on the strict
//! pass succeeding.

use std::collections::HashSet;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::finding::{FindingCode, Findings, Platform};
use crate::scan::hazard::{self, Hazard};
use crate::scan::{report_large_margin, Document};
use crate::validate::ValidationOptions;

regex!(DOCTYPE, r"(?is)<!DOCTYPE[^>\[]*(?:\[.*?\])?\s*>");
regex!(ENTITY_DECL, r"<!ENTITY\s+([^\s%]+)");
regex!(SCRIPT_TAG, r"(?i)<script[>\s]");
regex!(ATTR_ENTITY, r"&([^;&\s]*);");

/// Named HTML entities that XHTML does not predeclare, with their code points.
pub const HTML_ENTITIES: &[(&str, u32)] = &[
    ("nbsp", 160),
    ("ndash", 8211),
    ("mdash", 8212),
    ("hellip", 8230),
    ("rsquo", 8217),
    ("lsquo", 8216),
    ("rdquo", 8221),
    ("ldquo", 8220),
    ("copy", 169),
    ("reg", 174),
    ("trade", 8482),
];

/// DTD and entity-set identifiers that declare the HTML entities.
pub const ENTITY_DTD_MARKERS: &[&str] = &[
    "xhtml1-strict.dtd",
    "xhtml1-transitional.dtd",
    "xhtml11.dtd",
    "xhtml-lat1.ent",
    "xhtml-special.ent",
    "xhtml-symbol.ent",
];

const PREDEFINED_ENTITIES: &[&str] = &["lt", "gt", "amp", "quot", "apos"];

const CONTEXT_CHARS: usize = 80;

/// Run every markup check over one document.
pub fn scan_document(doc: &Document, options: &ValidationOptions, findings: &mut Findings) {
    let reported = scan_entities(doc, findings);
    check_well_formed(doc, &reported, findings);

    let without_comments = hazard::strip_markup_comments(&doc.text);
    if SCRIPT_TAG.is_match(&without_comments) {
        findings.warning(
            Platform::General,
            FindingCode::ScriptTag,
            format!(
                "JavaScript found in '{}' (limited support on e-readers)",
                doc.href
            ),
        );
    }

    let inline_styles = doc.text.matches("style=").count();
    if inline_styles > options.inline_style_threshold {
        findings.warning(
            Platform::Kindle,
            FindingCode::InlineStyles,
            format!(
                "Extensive inline styles ({} instances) in '{}' may not render correctly on older Kindles - consider moving to CSS",
                inline_styles, doc.href
            ),
        );
    }

    scan_layout(&doc.href, &without_comments, options.large_margin_em, findings);
}

/// The `<!DOCTYPE ...>` declaration, if present.
fn doctype(text: &str) -> Option<&str> {
    DOCTYPE.find(text).map(|m| m.as_str())
}

/// Returns `true` if the DOCTYPE pulls in the HTML entity declarations.
pub fn declares_html_entities(text: &str) -> bool {
    doctype(text).is_some_and(|decl| ENTITY_DTD_MARKERS.iter().any(|marker| decl.contains(marker)))
}

/// Report each problematic entity once, at its first line.
///
/// Returns the names reported so the strict pass can skip them.
pub fn scan_entities(doc: &Document, findings: &mut Findings) -> HashSet<&'static str> {
    let mut reported = HashSet::new();
    if declares_html_entities(&doc.text) {
        return reported;
    }
    for (idx, line) in doc.text.lines().enumerate() {
        for &(name, code) in HTML_ENTITIES {
            if reported.contains(name) || !line.contains(&format!("&{};", name)) {
                continue;
            }
            reported.insert(name);
            findings.issue(
                Platform::AppleBooks,
                FindingCode::UndeclaredEntity,
                format!(
                    "{} (line {}): Undeclared entity '{}' - Replace &{}; with &#{}; or add proper DOCTYPE",
                    doc.href,
                    idx + 1,
                    name,
                    name,
                    code
                ),
            );
        }
    }
    reported
}

/// Why a document is not well-formed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XmlDefect {
    /// Byte offset of the failure.
    pub position: usize,
    /// Parser description.
    pub detail: String,
    /// Entity name when the failure is an undefined entity reference.
    pub undefined_entity: Option<String>,
}

impl XmlDefect {
    fn new(position: usize, detail: impl Into<String>) -> Self {
        Self {
            position,
            detail: detail.into(),
            undefined_entity: None,
        }
    }

    fn undefined_entity(position: usize, name: &str) -> Self {
        Self {
            position,
            detail: format!("undefined entity '&{};'", name),
            undefined_entity: Some(name.to_string()),
        }
    }
}

/// Entity context taken from the DOCTYPE.
#[derive(Default)]
struct EntityScope {
    external_subset: bool,
    declared: HashSet<String>,
}

impl EntityScope {
    fn from_doctype(decl: &str) -> Self {
        let head = decl.split('[').next().unwrap_or(decl);
        Self {
            external_subset: head.contains("PUBLIC") || head.contains("SYSTEM"),
            declared: ENTITY_DECL
                .captures_iter(decl)
                .map(|caps| caps[1].to_string())
                .collect(),
        }
    }

    fn check(&self, name: &str, position: usize) -> Result<(), XmlDefect> {
        if let Some(reference) = name.strip_prefix('#') {
            let value = match reference.strip_prefix('x') {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => reference.parse::<u32>().ok(),
            };
            return match value.and_then(char::from_u32) {
                Some(_) => Ok(()),
                None => Err(XmlDefect::new(
                    position,
                    format!("invalid character reference '&{};'", name),
                )),
            };
        }
        if PREDEFINED_ENTITIES.contains(&name)
            || self.declared.contains(name)
            || self.external_subset
        {
            return Ok(());
        }
        Err(XmlDefect::undefined_entity(position, name))
    }
}

/// Strict XML well-formedness pass.
///
/// Checks element nesting, duplicate attributes, duplicate ids within the
/// document, entity references and a single root element.
pub fn well_formedness(text: &str) -> Result<(), XmlDefect> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut reader = Reader::from_str(text);
    reader.config_mut().check_comments = true;

    let mut scope = EntityScope::default();
    let mut open: Vec<String> = Vec::new();
    let mut ids: HashSet<String> = HashSet::new();
    let mut root_seen = false;

    loop {
        let position = reader.buffer_position() as usize;
        match reader.read_event() {
            Ok(Event::DocType(e)) => {
                let decl = String::from_utf8_lossy(&e).into_owned();
                scope = EntityScope::from_doctype(&decl);
            }
            Ok(Event::Start(e)) => {
                check_element(&e, position, root_seen && open.is_empty(), &scope, &mut ids)?;
                root_seen = true;
                open.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
            }
            Ok(Event::Empty(e)) => {
                check_element(&e, position, root_seen && open.is_empty(), &scope, &mut ids)?;
                root_seen = true;
            }
            Ok(Event::End(_)) => {
                open.pop();
            }
            Ok(Event::Text(e)) => {
                if open.is_empty() && !e.iter().all(u8::is_ascii_whitespace) {
                    return Err(XmlDefect::new(position, "text outside the root element"));
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if open.is_empty() {
                    return Err(XmlDefect::new(position, "reference outside the root element"));
                }
                let name = e
                    .decode()
                    .map_err(|err| XmlDefect::new(position, format!("{:?}", err)))?;
                scope.check(&name, position)?;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(XmlDefect::new(reader.error_position() as usize, e.to_string()));
            }
            _ => {}
        }
    }

    let end = text.len();
    if let Some(name) = open.last() {
        return Err(XmlDefect::new(end, format!("unclosed element '<{}>'", name)));
    }
    if !root_seen {
        return Err(XmlDefect::new(end, "no element found"));
    }
    Ok(())
}

fn check_element(
    e: &BytesStart<'_>,
    position: usize,
    after_root: bool,
    scope: &EntityScope,
    ids: &mut HashSet<String>,
) -> Result<(), XmlDefect> {
    if after_root {
        return Err(XmlDefect::new(position, "junk after document element"));
    }
    for attr in e.attributes() {
        let attr = attr.map_err(|err| XmlDefect::new(position, err.to_string()))?;
        let value = String::from_utf8_lossy(&attr.value);
        for caps in ATTR_ENTITY.captures_iter(&value) {
            scope.check(&caps[1], position)?;
        }
        if attr.key.local_name().as_ref() == b"id" && !ids.insert(value.to_string()) {
            return Err(XmlDefect::new(
                position,
                format!("duplicate id '{}' in document", value),
            ));
        }
    }
    Ok(())
}

/// Record a well-formedness issue unless the entity scan already covered it.
fn check_well_formed(doc: &Document, reported: &HashSet<&'static str>, findings: &mut Findings) {
    let Err(defect) = well_formedness(&doc.text) else {
        return;
    };
    if let Some(name) = defect.undefined_entity.as_deref() {
        if reported.contains(name) {
            return;
        }
    }

    let text = doc.text.strip_prefix('\u{feff}').unwrap_or(&doc.text);
    let upto = defect.position.min(text.len());
    let line_num = text.as_bytes()[..upto].iter().filter(|b| **b == b'\n').count() + 1;
    let context: String = text
        .lines()
        .nth(line_num - 1)
        .unwrap_or("")
        .trim()
        .chars()
        .take(CONTEXT_CHARS)
        .collect();

    let mut message = format!(
        "{} (line {}): XML Parsing Error: {}",
        doc.href, line_num, defect.detail
    );
    if !context.is_empty() {
        message.push_str(&format!(" - near: {}", context));
    }
    findings.issue(Platform::General, FindingCode::XmlParse, message);
}

/// Per-line layout hazards inside markup (inline styles and `<style>` blocks).
fn scan_layout(href: &str, text: &str, margin_threshold: f64, findings: &mut Findings) {
    for (idx, line) in text.lines().enumerate() {
        let line_num = idx + 1;
        for found in hazard::line_hazards(line, margin_threshold) {
            let (code, note) = match found {
                Hazard::AbsolutePosition => (
                    FindingCode::AbsolutePosition,
                    "Absolute positioning may cause layout issues",
                ),
                Hazard::FixedPosition => {
                    (FindingCode::FixedPosition, "Fixed positioning not supported")
                }
                Hazard::ViewportUnits => (
                    FindingCode::ViewportUnits,
                    "Viewport units may not work correctly",
                ),
                Hazard::Transform => (
                    FindingCode::CssTransform,
                    "CSS transforms may not be supported",
                ),
                Hazard::LargeMargin { value, unit } => {
                    report_large_margin(href, line_num, value, &unit, findings);
                    continue;
                }
            };
            findings.warning(
                Platform::PocketBook,
                code,
                format!("{} (line {}): {}", href, line_num, note),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::Severity;

    const XHTML_HEAD: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<!DOCTYPE html>\n";

    fn doc(body: &str) -> Document {
        Document::new(
            "OEBPS/ch1.xhtml",
            format!(
                "{}<html xmlns=\"http://www.w3.org/1999/xhtml\"><head><title>t</title></head>\n<body>\n{}\n</body></html>",
                XHTML_HEAD, body
            ),
        )
    }

    fn scan(doc: &Document) -> Findings {
        let mut findings = Findings::new();
        scan_document(doc, &ValidationOptions::default(), &mut findings);
        findings
    }

    #[test]
    fn clean_document_has_no_findings() {
        let findings = scan(&doc("<p id=\"a\">Hello &amp; &#160; &#x2014;</p>"));
        assert!(findings.is_empty(), "{:?}", findings);
    }

    #[test]
    fn entity_reported_once_per_document_at_first_line() {
        let findings = scan(&doc("<p>a&nbsp;b</p>\n<p>&nbsp;&nbsp;</p>\n<p>&mdash;</p>"));
        assert_eq!(
            findings.count_where(
                FindingCode::UndeclaredEntity,
                Platform::AppleBooks,
                Severity::Issue
            ),
            2
        );
        let first = &findings.all()[0];
        assert!(first.message.contains("(line 5)"), "{}", first.message);
        assert!(first.message.contains("Replace &nbsp; with &#160;"));
        // strict-pass failure on the same entity is not repeated
        assert_eq!(findings.count_code(FindingCode::XmlParse), 0);
    }

    #[test]
    fn entity_declaring_doctype_suppresses_entity_findings() {
        let text = "<?xml version=\"1.0\"?>\n<!DOCTYPE html PUBLIC \"-//W3C//DTD XHTML 1.1//EN\" \"http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd\">\n<html><body><p>&nbsp;&copy;</p></body></html>";
        let findings = scan(&Document::new("a.xhtml", text));
        assert!(findings.is_empty(), "{:?}", findings);
    }

    #[test]
    fn unknown_entity_outside_table_is_a_parse_issue() {
        let findings = scan(&doc("<p>&eacute;</p>"));
        assert_eq!(findings.count_code(FindingCode::UndeclaredEntity), 0);
        assert_eq!(findings.count_code(FindingCode::XmlParse), 1);
    }

    #[test]
    fn internal_subset_entity_is_declared() {
        let text = "<!DOCTYPE html [ <!ENTITY eacute \"&#233;\"> ]>\n<html><body>&eacute;</body></html>";
        assert!(well_formedness(text).is_ok());
    }

    #[test]
    fn mismatched_tag_reports_line_and_context() {
        let findings = scan(&doc("<p>one\n<b>two</p>"));
        assert_eq!(findings.len(), 1);
        let msg = &findings.all()[0].message;
        assert!(msg.starts_with("OEBPS/ch1.xhtml (line 6): XML Parsing Error:"), "{}", msg);
        assert!(msg.contains("<b>two</p>"), "{}", msg);
    }

    #[test]
    fn duplicate_id_within_document_is_well_formedness_issue() {
        let findings = scan(&doc("<p id=\"x\">a</p><p id=\"x\">b</p>"));
        assert_eq!(findings.count_code(FindingCode::XmlParse), 1);
        assert!(findings.all()[0].message.contains("duplicate id 'x'"));
    }

    #[test]
    fn structural_defects() {
        assert!(well_formedness("<a><b></b>").is_err());
        assert!(well_formedness("<a/><b/>").is_err());
        assert!(well_formedness("<a x=\"1\" x=\"2\"/>").is_err());
        assert!(well_formedness("").is_err());
        assert!(well_formedness("\u{feff}<a/>").is_ok());
    }

    #[test]
    fn commented_script_is_ignored() {
        let findings = scan(&doc("<!-- <script>alert(1)</script> -->"));
        assert_eq!(findings.count_code(FindingCode::ScriptTag), 0);
        let findings = scan(&doc("<script type=\"text/javascript\">var a;</script>"));
        assert_eq!(
            findings.count_where(FindingCode::ScriptTag, Platform::General, Severity::Warning),
            1
        );
    }

    #[test]
    fn inline_style_density_above_threshold() {
        let body = "<span style=\"color:red\">x</span>".repeat(11);
        let findings = scan(&doc(&body));
        assert_eq!(
            findings.count_where(FindingCode::InlineStyles, Platform::Kindle, Severity::Warning),
            1
        );
        let body = "<span style=\"color:red\">x</span>".repeat(10);
        assert_eq!(scan(&doc(&body)).count_code(FindingCode::InlineStyles), 0);
    }

    #[test]
    fn inline_layout_hazards() {
        let findings = scan(&doc(
            "<div style=\"margin: 6em\">a</div>\n<div style=\"transform: rotate(5deg)\">b</div>\n<p style=\"text-transform: uppercase; margin: 2em\">c</p>",
        ));
        assert_eq!(
            findings.count_where(FindingCode::LargeMargin, Platform::PocketBook, Severity::Issue),
            1
        );
        assert_eq!(
            findings.count_where(FindingCode::LargeMargin, Platform::InkBook, Severity::Warning),
            1
        );
        assert_eq!(
            findings.count_where(
                FindingCode::CssTransform,
                Platform::PocketBook,
                Severity::Warning
            ),
            1
        );
        assert_eq!(findings.len(), 3);
    }
}
