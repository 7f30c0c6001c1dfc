//! Package document (OPF) model builder
//!
//! SAX-style quick-xml pass over the package document producing metadata,
//! manifest and spine. Manifest hrefs are resolved against the package
//! document's directory and normalized; the resolved path is the canonical
//! name of a resource everywhere else in the crate.

use std::collections::HashSet;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::EpubError;

/// Media types treated as markup content documents.
pub const MARKUP_MEDIA_TYPES: &[&str] = &["application/xhtml+xml", "text/html"];

/// Media type of the EPUB 2 navigation control file.
pub const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";

/// Package-level metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    /// First `dc:title`, if any.
    pub title: Option<String>,
    /// First `dc:creator`, if any.
    pub author: Option<String>,
    /// First `dc:language`, trimmed. `None` when absent or empty.
    pub language: Option<String>,
    /// `version` attribute of `<package>`.
    pub version: Option<String>,
    /// `<meta property="...">` entries as (property, value) in document order.
    pub properties: Vec<(String, String)>,
    /// Manifest id named by an EPUB 2 `<meta name="cover" content="...">`.
    pub cover_meta: Option<String>,
}

impl Metadata {
    /// Value of the `rendition:layout` meta property, if declared.
    pub fn rendition_layout(&self) -> Option<&str> {
        self.properties
            .iter()
            .find(|(prop, _)| prop == "rendition:layout")
            .map(|(_, value)| value.as_str())
    }

    /// Returns `true` for fixed-layout (pre-paginated) packages.
    pub fn is_fixed_layout(&self) -> bool {
        self.rendition_layout() == Some("pre-paginated")
    }

    /// Declared version string, or `"Unknown"`.
    pub fn version_or_unknown(&self) -> &str {
        self.version.as_deref().unwrap_or("Unknown")
    }
}

/// A single manifest entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestItem {
    /// Manifest identifier.
    pub id: String,
    /// Archive path: href resolved against the package directory and normalized.
    pub href: String,
    /// Declared media type (empty when the attribute is missing).
    pub media_type: String,
    /// Whitespace-separated `properties` tokens.
    pub properties: Vec<String>,
}

impl ManifestItem {
    /// Returns `true` if the item carries the given property token.
    pub fn has_property(&self, property: &str) -> bool {
        self.properties.iter().any(|p| p == property)
    }

    /// Returns `true` for XHTML/HTML content documents.
    pub fn is_markup(&self) -> bool {
        MARKUP_MEDIA_TYPES.contains(&self.media_type.as_str())
    }

    /// Final path segment of `href`.
    pub fn file_name(&self) -> &str {
        self.href.rsplit('/').next().unwrap_or(&self.href)
    }
}

/// Declared resources, in document order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Manifest {
    items: Vec<ManifestItem>,
    duplicate_ids: Vec<String>,
}

impl Manifest {
    /// Add an item. A repeated identifier is kept out of the lookup and
    /// recorded in [`Manifest::duplicate_ids`].
    pub fn insert(&mut self, item: ManifestItem) {
        if self.get(&item.id).is_some() {
            self.duplicate_ids.push(item.id);
            return;
        }
        self.items.push(item);
    }

    /// Lookup by identifier.
    pub fn get(&self, id: &str) -> Option<&ManifestItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// All unique items in document order.
    pub fn items(&self) -> &[ManifestItem] {
        &self.items
    }

    /// Identifiers that appeared more than once.
    pub fn duplicate_ids(&self) -> &[String] {
        &self.duplicate_ids
    }

    /// Markup content documents.
    pub fn markup_items(&self) -> impl Iterator<Item = &ManifestItem> {
        self.items.iter().filter(|item| item.is_markup())
    }

    /// Items carrying a property token.
    pub fn with_property<'a>(
        &'a self,
        property: &'a str,
    ) -> impl Iterator<Item = &'a ManifestItem> {
        self.items.iter().filter(move |item| item.has_property(property))
    }

    /// Set of all resolved hrefs.
    pub fn href_set(&self) -> HashSet<&str> {
        self.items.iter().map(|item| item.href.as_str()).collect()
    }

    /// Number of unique items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the manifest is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A spine `<itemref>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpineItem {
    /// Referenced manifest id.
    pub idref: String,
    /// `linear` attribute verbatim (`"yes"` when omitted).
    pub linear: String,
}

impl SpineItem {
    /// Returns `true` if `linear` is `yes` or `no`.
    pub fn has_valid_linear(&self) -> bool {
        matches!(self.linear.as_str(), "yes" | "no")
    }
}

/// Reading order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Spine {
    /// Itemrefs in document order.
    pub items: Vec<SpineItem>,
}

/// Everything parsed out of the package document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PackageModel {
    /// Archive path of the package document.
    pub opf_path: String,
    /// Package metadata.
    pub metadata: Metadata,
    /// Declared resources.
    pub manifest: Manifest,
    /// Reading order.
    pub spine: Spine,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    None,
    Metadata,
    Manifest,
    Spine,
}

/// Metadata element whose text content is being collected.
#[derive(Clone, Copy, PartialEq, Eq)]
enum TextTarget {
    Title,
    Creator,
    Language,
    Meta,
}

/// Parse a package document.
///
/// `opf_path` is the archive path the document was read from; manifest hrefs
/// are resolved relative to its directory.
pub fn parse_package_document(content: &[u8], opf_path: &str) -> Result<PackageModel, EpubError> {
    // Text is left untrimmed so pieces around entity references keep their
    // spacing; the joined value is trimmed when stored.
    let mut reader = Reader::from_reader(content);

    let base = parent_dir(opf_path);
    let mut model = PackageModel {
        opf_path: opf_path.to_string(),
        ..PackageModel::default()
    };
    let mut saw_package = false;
    let mut section = Section::None;
    let mut target: Option<TextTarget> = None;
    let mut text = String::new();
    let mut meta_property: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = local_name(&e)?;
                match name.as_str() {
                    "package" => {
                        saw_package = true;
                        model.metadata.version = attribute(&reader, &e, "version")?;
                    }
                    "metadata" => section = Section::Metadata,
                    "manifest" => section = Section::Manifest,
                    "spine" => section = Section::Spine,
                    _ => {}
                }
                handle_element(&reader, &e, &name, section, &base, &mut model)?;
                if section == Section::Metadata {
                    target = match name.as_str() {
                        "title" => Some(TextTarget::Title),
                        "creator" => Some(TextTarget::Creator),
                        "language" => Some(TextTarget::Language),
                        "meta" => {
                            meta_property = attribute(&reader, &e, "property")?;
                            meta_property.as_ref().map(|_| TextTarget::Meta)
                        }
                        _ => None,
                    };
                    text.clear();
                }
            }
            Ok(Event::Empty(e)) => {
                let name = local_name(&e)?;
                handle_element(&reader, &e, &name, section, &base, &mut model)?;
                if section == Section::Metadata && name == "meta" {
                    let property = attribute(&reader, &e, "property")?;
                    let content = attribute(&reader, &e, "content")?;
                    if let (Some(property), Some(content)) = (property, content) {
                        model.metadata.properties.push((property, content));
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if target.is_some() {
                    let decoded = reader
                        .decoder()
                        .decode(&e)
                        .map_err(|e| EpubError::Parse(format!("Decode error: {:?}", e)))?;
                    text.push_str(&decoded);
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if target.is_some() {
                    let name = e
                        .decode()
                        .map_err(|e| EpubError::Parse(format!("Decode error: {:?}", e)))?;
                    let entity = format!("&{};", name);
                    // Unknown entities are kept verbatim in metadata text.
                    match quick_xml::escape::unescape(&entity) {
                        Ok(resolved) => text.push_str(&resolved),
                        Err(_) => text.push_str(&entity),
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if let Some(t) = target.take() {
                    store_text(&mut model.metadata, t, meta_property.take(), text.trim());
                    text.clear();
                }
                match name.as_str() {
                    "metadata" | "manifest" | "spine" => section = Section::None,
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(EpubError::Parse(format!(
                    "XML parse error at byte {}: {}",
                    reader.error_position(),
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    if !saw_package {
        return Err(EpubError::InvalidEpub(
            "package document has no <package> root".into(),
        ));
    }

    log::debug!(
        "[OPF] {}: {} manifest items, {} spine items, version {}",
        opf_path,
        model.manifest.len(),
        model.spine.items.len(),
        model.metadata.version_or_unknown()
    );
    Ok(model)
}

/// Handle attribute-only elements shared by Start and Empty events.
fn handle_element(
    reader: &Reader<&[u8]>,
    e: &BytesStart<'_>,
    name: &str,
    section: Section,
    base: &str,
    model: &mut PackageModel,
) -> Result<(), EpubError> {
    match (section, name) {
        (Section::Manifest, "item") => {
            let id = attribute(reader, e, "id")?.unwrap_or_default();
            let Some(href) = attribute(reader, e, "href")? else {
                return Ok(());
            };
            let media_type = attribute(reader, e, "media-type")?.unwrap_or_default();
            let properties = attribute(reader, e, "properties")?
                .map(|p| p.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default();
            model.manifest.insert(ManifestItem {
                id,
                href: resolve_href(base, &href),
                media_type,
                properties,
            });
        }
        (Section::Spine, "itemref") => {
            if let Some(idref) = attribute(reader, e, "idref")? {
                let linear = attribute(reader, e, "linear")?.unwrap_or_else(|| "yes".into());
                model.spine.items.push(SpineItem { idref, linear });
            }
        }
        (Section::Metadata, "meta") => {
            if attribute(reader, e, "name")?.as_deref() == Some("cover") {
                model.metadata.cover_meta = attribute(reader, e, "content")?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn store_text(metadata: &mut Metadata, target: TextTarget, property: Option<String>, text: &str) {
    if text.is_empty() {
        return;
    }
    match target {
        TextTarget::Title if metadata.title.is_none() => metadata.title = Some(text.to_string()),
        TextTarget::Creator if metadata.author.is_none() => {
            metadata.author = Some(text.to_string())
        }
        TextTarget::Language if metadata.language.is_none() => {
            metadata.language = Some(text.to_string())
        }
        TextTarget::Meta => {
            if let Some(property) = property {
                metadata.properties.push((property, text.to_string()));
            }
        }
        _ => {}
    }
}

fn local_name(e: &BytesStart<'_>) -> Result<String, EpubError> {
    std::str::from_utf8(e.local_name().as_ref())
        .map(str::to_string)
        .map_err(|e| EpubError::Parse(format!("Decode error: {:?}", e)))
}

/// Value of an attribute matched by local name.
fn attribute(
    reader: &Reader<&[u8]>,
    e: &BytesStart<'_>,
    key: &str,
) -> Result<Option<String>, EpubError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| EpubError::Parse(format!("Attr error: {:?}", e)))?;
        if attr.key.local_name().as_ref() != key.as_bytes() {
            continue;
        }
        let value = reader
            .decoder()
            .decode(&attr.value)
            .map_err(|e| EpubError::Parse(format!("Decode error: {:?}", e)))?;
        return Ok(Some(value.into_owned()));
    }
    Ok(None)
}

/// Directory part of an archive path (`""` at the root).
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Join `href` onto `base_dir` and normalize the result.
///
/// Absolute hrefs (leading `/`) are taken from the archive root. The href is
/// percent-decoded first.
pub fn resolve_href(base_dir: &str, href: &str) -> String {
    let href = percent_decode(href);
    if let Some(rooted) = href.strip_prefix('/') {
        return normalize_path(rooted);
    }
    if base_dir.is_empty() {
        normalize_path(&href)
    } else {
        normalize_path(&format!("{}/{}", base_dir, href))
    }
}

/// Collapse empty and `.` segments and resolve `..` without escaping the root.
pub fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

/// Decode `%XX` escapes; malformed escapes are kept literally.
pub fn percent_decode(input: &str) -> String {
    if !input.contains('%') {
        return input.to_string();
    }
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(value) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(value);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
