//! Findings: the append-only record of everything a validation run reports.
//!
//! Every finding carries a [`FindingCode`] assigned where it is raised. The
//! critical summary and the explanation footnotes switch on that code; the
//! rendered message text is for humans only.

use std::fmt;

/// Reader family a finding applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Platform {
    /// Desktop readers (Calibre, Adobe Digital Editions, ...).
    PcReader,
    /// Apple Books on iOS/macOS.
    AppleBooks,
    /// PocketBook e-ink readers.
    PocketBook,
    /// Kindle devices (require conversion from EPUB).
    Kindle,
    /// Kobo e-ink readers.
    Kobo,
    /// InkBook e-ink readers.
    InkBook,
    /// General-purpose Android reading apps.
    Android,
    /// Applies to every reading system.
    General,
}

impl Platform {
    /// Platform sections in report order. `General` is rendered separately.
    pub const REPORT_ORDER: [Platform; 7] = [
        Platform::PcReader,
        Platform::AppleBooks,
        Platform::Kobo,
        Platform::PocketBook,
        Platform::InkBook,
        Platform::Kindle,
        Platform::Android,
    ];

    /// Stable machine-readable tag.
    pub fn tag(self) -> &'static str {
        match self {
            Platform::PcReader => "pc_reader",
            Platform::AppleBooks => "apple_books",
            Platform::PocketBook => "pocketbook",
            Platform::Kindle => "kindle",
            Platform::Kobo => "kobo",
            Platform::InkBook => "inkbook",
            Platform::Android => "android",
            Platform::General => "general",
        }
    }

    /// Human-readable section name.
    pub fn display_name(self) -> &'static str {
        match self {
            Platform::PcReader => "PC Reader",
            Platform::AppleBooks => "Apple Books",
            Platform::PocketBook => "PocketBook",
            Platform::Kindle => "Kindle",
            Platform::Kobo => "Kobo",
            Platform::InkBook => "InkBook",
            Platform::Android => "Android Readers",
            Platform::General => "General",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Severity of a finding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Breaks the book, or a required part of it, on the target.
    Issue,
    /// May degrade rendering or portability.
    Warning,
}

/// What a finding is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum FindingCode {
    // -- container --
    /// No `mimetype` entry in the archive.
    MimetypeMissing,
    /// `mimetype` is unreadable or not `application/epub+zip`.
    MimetypeInvalid,
    /// `META-INF/container.xml` is absent.
    ContainerMissing,
    /// `container.xml` is malformed or unreadable.
    ContainerUnparseable,
    /// The rootfile named by the container is absent.
    PackageDocumentMissing,
    /// The package document could not be read or parsed.
    PackageDocumentUnparseable,
    /// `META-INF/encryption.xml` declares encryption.
    Drm,
    /// The archive exceeds the general size warning threshold.
    PackageTooLarge,
    // -- package model --
    /// No `dc:language` element.
    LanguageMissing,
    /// `dc:language` is not a BCP 47 tag.
    LanguageInvalid,
    /// An itemref `linear` attribute other than `yes` or `no`.
    SpineLinearInvalid,
    /// Two manifest items share an id.
    ManifestIdDuplicate,
    /// The manifest declares no markup documents.
    NoContentDocuments,
    // -- structure / cross references --
    /// A spine itemref names no manifest item.
    SpineItemUnresolved,
    /// EPUB 2 package without an NCX.
    NcxMissing,
    /// EPUB 3 package without a navigation document.
    NavMissing,
    /// More than one item carries the `nav` property.
    NavAmbiguous,
    /// An element id reused across documents.
    DuplicateId,
    /// An internal link targets a file that does not exist.
    BrokenLink,
    /// An internal link targets an id that does not exist.
    BrokenFragment,
    /// Images exist but none is designated as the cover.
    CoverMissing,
    /// More than one item carries the `cover-image` property.
    CoverAmbiguous,
    /// The cover image is below the minimum dimensions.
    CoverTooSmall,
    // -- resources --
    /// A declared resource other than an image is absent from the archive.
    ResourceMissing,
    /// An entry exists but could not be read.
    ResourceUnreadable,
    /// A declared image is absent from the archive.
    ImageMissing,
    /// A document refers to an image that is missing.
    ImageReferenceMissing,
    // -- markup --
    /// A markup document is not well-formed.
    XmlParse,
    /// An HTML named entity that XML does not declare.
    UndeclaredEntity,
    /// A `<script>` element in a markup document.
    ScriptTag,
    /// Inline `style` attributes above the density threshold.
    InlineStyles,
    // -- layout hazards (markup and style sheets) --
    /// `position: absolute`.
    AbsolutePosition,
    /// `position: fixed`.
    FixedPosition,
    /// Margin or padding at or above the em/rem threshold.
    LargeMargin,
    /// Viewport-relative lengths.
    ViewportUnits,
    /// The `transform` property.
    CssTransform,
    // -- images --
    /// Image above the size warning threshold.
    ImageLarge,
    /// Image above the size issue threshold.
    ImageVeryLarge,
    /// Image wider or taller than the configured maximum.
    ImageDimensions,
    /// An SVG image.
    SvgImage,
    /// A GIF image.
    GifImage,
    // -- fonts --
    /// A WOFF or WOFF2 font.
    WoffFont,
    // -- platform rules --
    /// Pre-paginated rendition.
    FixedLayout,
    /// `ibooks:` vendor metadata.
    AppleExtension,
    /// `kobo:` vendor metadata.
    KoboExtension,
    /// Items with the `scripted` property.
    ScriptedContent,
    /// Items with the `mathml` property.
    MathMl,
    /// Audio or video resources.
    AudioVideo,
    /// Standing notice that Kindle needs a format conversion.
    ConversionRequired,
    /// Standing notice about table rendering on Kindle.
    ComplexTables,
    /// The archive exceeds the Kindle e-mail delivery limit.
    KindleDeliveryLimit,
    // -- run --
    /// The run stopped early on an unexpected read failure.
    InternalError,
}

impl FindingCode {
    /// Notices attached independent of package content.
    pub fn is_standing(self) -> bool {
        matches!(
            self,
            FindingCode::ConversionRequired | FindingCode::ComplexTables
        )
    }

    /// Reference note printed under the first finding carrying this code
    /// (or a code sharing the same note).
    pub fn explanation(self) -> Option<&'static str> {
        use FindingCode::*;
        let note = match self {
            UndeclaredEntity => "Reference: HTML entities like &nbsp; must be declared in XML/XHTML. Use &#160; instead. See: https://www.w3.org/TR/xhtml1/dtds.html#a_dtd_Special_pre",
            CssTransform => "Reference: CSS transform property (rotate, scale, translate - NOT text-transform) causes rendering engines to crash on some e-ink readers (PocketBook, InkBook).",
            XmlParse => "Reference: EPUB content must be valid XML/XHTML. Malformed XML causes parsing failures on strict readers like Apple Books. EPUB 3.3 § 2.3",
            AbsolutePosition => "Reference: Absolute positioning breaks the reflowable nature of EPUBs and causes overlapping text on different screen sizes.",
            ViewportUnits => "Reference: Viewport units (vw, vh) are not consistently supported across all e-reader rendering engines.",
            ImageMissing | ImageReferenceMissing => "Reference: All resources listed in the OPF manifest must exist in the EPUB package. Check if file exists or manifest declares wrong path. EPUB 3.3 § 3.3",
            InlineStyles => "Reference: Inline styles are difficult to override by user settings and may not be supported by all reading systems.",
            ScriptTag | ScriptedContent => "Reference: Scripting is often disabled for security or performance on e-readers. See EPUB 3.2 Spec § 2.4.",
            FixedLayout => "Reference: Fixed layout books do not allow text resizing and are often incompatible with small e-ink screens. EPUB 3.3 § 6.2",
            MimetypeMissing | MimetypeInvalid => "Reference: The mimetype file must be the first file in the ZIP archive and contain exactly 'application/epub+zip'. EPUB OCF 3.0 § 3.3",
            ContainerMissing | ContainerUnparseable => "Reference: META-INF/container.xml is required to locate the OPF file. EPUB OCF 3.0 § 3.5.1",
            Drm => "Reference: Encrypted EPUBs require specific reader support and may limit distribution options. EPUB OCF 3.0 § 4",
            SvgImage => "Reference: SVG support varies; some e-readers convert to raster or have limited support. EPUB 3.3 § 3.4.4",
            WoffFont => "Reference: OpenType/TrueType fonts have wider support than WOFF/WOFF2. EPUB 3.3 § 3.4.3",
            MathMl => "Reference: MathML support requires MathML-capable reading system. EPUB 3.3 § 6.3",
            LargeMargin => "Note: Empirical finding on PocketBook readers - margins >5em cause rendering glitches and mixed text layout.",
            NcxMissing => "Reference: EPUB 2.0.1 requires NCX file for navigation. EPUB 2.0.1 § 2.4.1",
            NavMissing | NavAmbiguous => "Reference: EPUB 3 requires navigation document with properties='nav'. EPUB 3.3 § 5.4",
            LanguageMissing | LanguageInvalid => "Reference: Language metadata is REQUIRED in EPUB. Use BCP 47 codes (e.g., 'en', 'en-US'). EPUB 3.3 § 4.2.2",
            SpineItemUnresolved => "Reference: All spine itemrefs must reference valid manifest items. EPUB 3.3 § 4.3",
            DuplicateId => "Reference: XML IDs must be unique across all documents. XML 1.0 § 3.3.1, EPUB 3.3 § 3.3.2",
            BrokenLink | BrokenFragment => "Reference: All internal links must reference valid files and IDs. EPUB 3.3 § 3.3.2",
            CoverMissing | CoverAmbiguous | CoverTooSmall => "Reference: Cover image should be designated with properties='cover-image' in manifest. EPUB 3.3 § 3.2",
            _ => return None,
        };
        Some(note)
    }
}

/// One reported problem.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Finding {
    /// Classification assigned where the finding was raised.
    pub code: FindingCode,
    /// Issue or warning.
    pub severity: Severity,
    /// Reader family the finding targets.
    pub platform: Platform,
    /// Human-readable description, may embed a path and line number.
    pub message: String,
}

/// Append-only finding collection for a single validation run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Findings {
    entries: Vec<Finding>,
}

impl Findings {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an issue.
    pub fn issue(&mut self, platform: Platform, code: FindingCode, message: impl Into<String>) {
        self.push(Severity::Issue, platform, code, message.into());
    }

    /// Record a warning.
    pub fn warning(&mut self, platform: Platform, code: FindingCode, message: impl Into<String>) {
        self.push(Severity::Warning, platform, code, message.into());
    }

    fn push(&mut self, severity: Severity, platform: Platform, code: FindingCode, message: String) {
        log::debug!("[FINDING] {:?} {} {:?}: {}", severity, platform, code, message);
        self.entries.push(Finding {
            code,
            severity,
            platform,
            message,
        });
    }

    /// All findings in the order they were recorded.
    pub fn all(&self) -> &[Finding] {
        &self.entries
    }

    /// Findings for one platform and severity, in recording order.
    pub fn filter(
        &self,
        platform: Platform,
        severity: Severity,
    ) -> impl Iterator<Item = &Finding> + '_ {
        self.entries
            .iter()
            .filter(move |f| f.platform == platform && f.severity == severity)
    }

    /// Number of findings at this severity across all platforms.
    pub fn count(&self, severity: Severity) -> usize {
        self.entries.iter().filter(|f| f.severity == severity).count()
    }

    /// Number of findings with this code (any platform, any severity).
    pub fn count_code(&self, code: FindingCode) -> usize {
        self.entries.iter().filter(|f| f.code == code).count()
    }

    /// Number of findings matching code, platform and severity.
    pub fn count_where(&self, code: FindingCode, platform: Platform, severity: Severity) -> usize {
        self.entries
            .iter()
            .filter(|f| f.code == code && f.platform == platform && f.severity == severity)
            .count()
    }

    /// Returns `true` if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of findings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
