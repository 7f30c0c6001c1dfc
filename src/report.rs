//! Report compiler: info block, critical summary and text rendering.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::finding::{Finding, FindingCode, Findings, Platform, Severity};

const RULE_WIDTH: usize = 70;

/// Suffix appended to the input's stem for the saved report.
pub const REPORT_FILE_SUFFIX: &str = "_validation_report.txt";

/// Package facts shown at the top of the report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportInfo {
    /// First `dc:title`, or `"Unknown"`.
    pub title: String,
    /// First `dc:creator`, or `"Unknown"`.
    pub author: String,
    /// Package `version` attribute, or `"Unknown"`.
    pub version: String,
    /// Trimmed `dc:language`, if declared.
    pub language: Option<String>,
    /// Archive size in bytes.
    pub file_size: u64,
    /// Number of archive entries.
    pub file_count: usize,
    /// Image manifest items.
    pub image_count: usize,
    /// Images above 2000px on an axis but within the hard limit.
    pub high_res_images: usize,
    /// Style sheet manifest items.
    pub css_count: usize,
    /// Embedded fonts.
    pub font_count: usize,
}

impl ReportInfo {
    /// Info block for an archive that has not been inspected yet.
    pub fn new(file_size: u64, file_count: usize) -> Self {
        Self {
            title: "Unknown".into(),
            author: "Unknown".into(),
            version: "Unknown".into(),
            language: None,
            file_size,
            file_count,
            image_count: 0,
            high_res_images: 0,
            css_count: 0,
            font_count: 0,
        }
    }

    /// Archive size in MiB with two decimals.
    pub fn file_size_mb(&self) -> String {
        format!("{:.2}", self.file_size as f64 / 1024.0 / 1024.0)
    }
}

/// Most severe problems, grouped by the reader family they stop.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CriticalSummary {
    /// Problems that keep Apple Books from loading the book.
    pub apple_books: Vec<String>,
    /// Problems that stop PocketBook rendering early.
    pub pocketbook: Vec<String>,
    /// Problems that affect every reader.
    pub general: Vec<String>,
}

impl CriticalSummary {
    /// Derive the summary from finding codes.
    pub fn from_findings(findings: &Findings) -> Self {
        let mut summary = Self::default();

        if findings.count_where(
            FindingCode::UndeclaredEntity,
            Platform::AppleBooks,
            Severity::Issue,
        ) > 0
        {
            summary
                .apple_books
                .push("HTML entity errors prevent full rendering".into());
        }

        let transforms =
            findings.count_where(FindingCode::CssTransform, Platform::PocketBook, Severity::Issue);
        if transforms > 0 {
            summary.pocketbook.push(format!(
                "CSS transforms ({} found) STOP rendering after ~20 pages",
                transforms
            ));
        }
        let margins =
            findings.count_where(FindingCode::LargeMargin, Platform::PocketBook, Severity::Issue);
        if margins > 0 {
            summary.pocketbook.push(format!(
                "Large margin values ({} found) cause mixed/unreadable text layout",
                margins
            ));
        }

        let parse_errors =
            findings.count_where(FindingCode::XmlParse, Platform::General, Severity::Issue);
        if parse_errors > 0 {
            summary.general.push(format!(
                "XML parsing errors ({}) affect all readers",
                parse_errors
            ));
        }

        summary
    }

    /// Total number of critical entries.
    pub fn len(&self) -> usize {
        self.apple_books.len() + self.pocketbook.len() + self.general.len()
    }

    /// Returns `true` if nothing is critical.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of one validation run. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Report {
    info: ReportInfo,
    findings: Findings,
    critical_summary: CriticalSummary,
}

impl Report {
    /// Compile the report; the critical summary is derived here.
    pub fn new(info: ReportInfo, findings: Findings) -> Self {
        let critical_summary = CriticalSummary::from_findings(&findings);
        Self {
            info,
            findings,
            critical_summary,
        }
    }

    /// Package facts.
    pub fn info(&self) -> &ReportInfo {
        &self.info
    }

    /// Every finding in recording order.
    pub fn findings(&self) -> &Findings {
        &self.findings
    }

    /// Derived critical summary.
    pub fn critical_summary(&self) -> &CriticalSummary {
        &self.critical_summary
    }

    /// Issues for one platform.
    pub fn issues(&self, platform: Platform) -> Vec<&Finding> {
        self.findings.filter(platform, Severity::Issue).collect()
    }

    /// Warnings for one platform.
    pub fn warnings(&self, platform: Platform) -> Vec<&Finding> {
        self.findings.filter(platform, Severity::Warning).collect()
    }

    /// Issues across all platforms.
    pub fn issue_count(&self) -> usize {
        self.findings.count(Severity::Issue)
    }

    /// Warnings across all platforms.
    pub fn warning_count(&self) -> usize {
        self.findings.count(Severity::Warning)
    }

    fn content_count(&self, severity: Severity) -> usize {
        self.findings
            .all()
            .iter()
            .filter(|f| f.severity == severity && !f.code.is_standing())
            .count()
    }

    /// Issues excluding the package-independent standing notices.
    pub fn content_issue_count(&self) -> usize {
        self.content_count(Severity::Issue)
    }

    /// Warnings excluding the package-independent standing notices.
    pub fn content_warning_count(&self) -> usize {
        self.content_count(Severity::Warning)
    }

    /// Returns `true` if the package itself produced no findings.
    pub fn is_clean(&self) -> bool {
        self.content_issue_count() == 0 && self.content_warning_count() == 0
    }

    /// Render the human-readable report.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

/// Writes finding lines, printing each explanation note once.
struct FindingWriter<'a, 'b> {
    f: &'a mut fmt::Formatter<'b>,
    shown: HashSet<&'static str>,
}

impl FindingWriter<'_, '_> {
    fn section(&mut self, name: &str, issues: &[&Finding], warnings: &[&Finding]) -> fmt::Result {
        if issues.is_empty() && warnings.is_empty() {
            return Ok(());
        }
        writeln!(self.f)?;
        writeln!(self.f, "--- {} ---", name.to_uppercase())?;
        for finding in issues {
            writeln!(self.f, "  [ERROR] {}", finding.message)?;
            self.explain(finding.code)?;
        }
        for finding in warnings {
            writeln!(self.f, "  [WARN]  {}", finding.message)?;
            self.explain(finding.code)?;
        }
        Ok(())
    }

    fn explain(&mut self, code: FindingCode) -> fmt::Result {
        if let Some(note) = code.explanation() {
            if self.shown.insert(note) {
                writeln!(self.f, "     [INFO] {}", note)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(RULE_WIDTH);
        let info = &self.info;

        writeln!(f)?;
        writeln!(f, "{}", rule)?;
        writeln!(f, "EPUB VALIDATION REPORT")?;
        writeln!(f, "{}", rule)?;
        writeln!(f)?;
        writeln!(f, "[TITLE]   {}", info.title)?;
        writeln!(f, "[AUTHOR]  {}", info.author)?;
        writeln!(f, "[VERSION] {}", info.version)?;
        if let Some(language) = &info.language {
            writeln!(f, "[LANG]    {}", language)?;
        }
        writeln!(f, "[SIZE]    {} MB", info.file_size_mb())?;
        writeln!(f, "[FILES]   {}", info.file_count)?;
        writeln!(f, "[IMAGES]  {}", info.image_count)?;
        if info.high_res_images > 0 {
            writeln!(f, "[HI-RES]  {}", info.high_res_images)?;
        }
        writeln!(f, "[CSS]     {}", info.css_count)?;
        if info.font_count > 0 {
            writeln!(f, "[FONTS]   {}", info.font_count)?;
        }

        let mut writer = FindingWriter {
            f: &mut *f,
            shown: HashSet::new(),
        };
        for platform in Platform::REPORT_ORDER {
            writer.section(
                platform.display_name(),
                &self.issues(platform),
                &self.warnings(platform),
            )?;
        }
        writer.section(
            Platform::General.display_name(),
            &self.issues(Platform::General),
            &self.warnings(Platform::General),
        )?;

        let critical = &self.critical_summary;
        if !critical.is_empty() {
            writeln!(f)?;
            writeln!(f, "{}", rule)?;
            writeln!(f, "CRITICAL ISSUES - REQUIRE IMMEDIATE ATTENTION")?;
            writeln!(f, "{}", rule)?;
            if !critical.apple_books.is_empty() {
                writeln!(f)?;
                writeln!(f, "APPLE BOOKS - Book Cannot Load Properly:")?;
                for line in &critical.apple_books {
                    writeln!(f, "   [CRITICAL] {}", line)?;
                }
            }
            if !critical.pocketbook.is_empty() {
                writeln!(f)?;
                writeln!(f, "POCKETBOOK - Rendering Stops Early:")?;
                for line in &critical.pocketbook {
                    writeln!(f, "   [CRITICAL] {}", line)?;
                }
                writeln!(f, "   [SUGGESTION] Remove CSS transform properties from stylesheet")?;
                writeln!(f, "   [NOTE] InkBook readers have similar CSS transform issues")?;
            }
            if !critical.general.is_empty() {
                writeln!(f)?;
                writeln!(f, "GENERAL - Affects Multiple Readers:")?;
                for line in &critical.general {
                    writeln!(f, "   [CRITICAL] {}", line)?;
                }
            }
        }

        writeln!(f)?;
        writeln!(f, "{}", rule)?;
        writeln!(
            f,
            "SUMMARY: {} issues, {} warnings",
            self.issue_count(),
            self.warning_count()
        )?;
        if !critical.is_empty() {
            writeln!(
                f,
                "         {} CRITICAL issues requiring immediate fixes",
                critical.len()
            )?;
        }
        writeln!(f, "{}", rule)
    }
}

/// Sibling report path: `<dir>/<stem>_validation_report.txt`.
pub fn report_file_path(epub_path: &Path) -> PathBuf {
    let stem = epub_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "epub".into());
    epub_path.with_file_name(format!("{}{}", stem, REPORT_FILE_SUFFIX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Report {
        let mut findings = Findings::new();
        findings.issue(
            Platform::AppleBooks,
            FindingCode::UndeclaredEntity,
            "a.xhtml (line 3): Undeclared entity 'nbsp'",
        );
        findings.issue(
            Platform::AppleBooks,
            FindingCode::UndeclaredEntity,
            "b.xhtml (line 9): Undeclared entity 'nbsp'",
        );
        findings.issue(
            Platform::PocketBook,
            FindingCode::CssTransform,
            "s.css (line 2): CSS transform",
        );
        findings.warning(Platform::InkBook, FindingCode::LargeMargin, "x.xhtml (line 1): margin");
        findings.issue(
            Platform::General,
            FindingCode::XmlParse,
            "c.xhtml (line 4): XML Parsing Error",
        );
        findings.issue(Platform::Kindle, FindingCode::ConversionRequired, "convert");
        let mut info = ReportInfo::new(3 * 1024 * 1024, 12);
        info.title = "Book".into();
        Report::new(info, findings)
    }

    #[test]
    fn critical_summary_from_codes() {
        let report = sample();
        let critical = report.critical_summary();
        assert_eq!(critical.apple_books, vec!["HTML entity errors prevent full rendering"]);
        assert_eq!(
            critical.pocketbook,
            vec!["CSS transforms (1 found) STOP rendering after ~20 pages"]
        );
        assert_eq!(critical.general, vec!["XML parsing errors (1) affect all readers"]);
        assert_eq!(critical.len(), 3);
    }

    #[test]
    fn explanation_printed_once() {
        let text = sample().render();
        let note = FindingCode::UndeclaredEntity.explanation().unwrap();
        assert_eq!(text.matches(note).count(), 1);
        assert!(text.contains("[TITLE]   Book"));
        assert!(text.contains("[SIZE]    3.00 MB"));
        assert!(!text.contains("[FONTS]"));
    }

    #[test]
    fn sections_in_platform_order_then_general() {
        let text = sample().render();
        let apple = text.find("--- APPLE BOOKS ---").unwrap();
        let pocketbook = text.find("--- POCKETBOOK ---").unwrap();
        let inkbook = text.find("--- INKBOOK ---").unwrap();
        let kindle = text.find("--- KINDLE ---").unwrap();
        let general = text.find("--- GENERAL ---").unwrap();
        assert!(apple < pocketbook && pocketbook < inkbook && inkbook < kindle && kindle < general);
        assert!(!text.contains("--- KOBO ---"));
        assert!(text.contains("SUMMARY: 5 issues, 1 warnings"));
        assert!(text.contains("3 CRITICAL issues requiring immediate fixes"));
    }

    #[test]
    fn standing_notices_do_not_count_as_content() {
        let mut findings = Findings::new();
        findings.issue(Platform::Kindle, FindingCode::ConversionRequired, "convert");
        findings.warning(Platform::Kindle, FindingCode::ComplexTables, "tables");
        let report = Report::new(ReportInfo::new(0, 0), findings);
        assert_eq!(report.issue_count(), 1);
        assert_eq!(report.content_issue_count(), 0);
        assert!(report.is_clean());
        assert!(report.critical_summary().is_empty());
        assert!(!report.render().contains("CRITICAL ISSUES"));
    }

    #[test]
    fn report_path_next_to_input() {
        assert_eq!(
            report_file_path(Path::new("/books/My Book.epub")),
            PathBuf::from("/books/My Book_validation_report.txt")
        );
        assert_eq!(
            report_file_path(Path::new("book.epub")),
            PathBuf::from("book_validation_report.txt")
        );
    }
}
