//! Package loader: container-level checks and resource access.
//!
//! Owns the opened archive for the whole run. Baseline artifacts
//! (`mimetype`, `META-INF/container.xml`) are checked here, and the package
//! document path is located through the container's rootfile reference.

use std::io::{Read, Seek};

use quick_xml::events::Event;
use quick_xml::reader::Reader;

use crate::error::{EpubError, ZipError};
use crate::finding::{FindingCode, Findings, Platform};
use crate::zip::EpubArchive;

/// Required content of the `mimetype` entry.
pub const EPUB_MIMETYPE: &str = "application/epub+zip";

/// Path of the OCF container descriptor.
pub const CONTAINER_PATH: &str = "META-INF/container.xml";

/// Path of the OCF encryption descriptor.
pub const ENCRYPTION_PATH: &str = "META-INF/encryption.xml";

/// Outcome of reading one declared resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    /// Entry present and decoded.
    Found(Vec<u8>),
    /// No entry with that name in the archive.
    Missing,
    /// Entry present but could not be read (bad CRC, over the size cap, ...).
    Unreadable(ZipError),
}

/// An opened EPUB package.
pub struct Package<F: Read + Seek> {
    archive: EpubArchive<F>,
}

impl<F: Read + Seek> Package<F> {
    /// Wrap an opened archive.
    pub fn new(archive: EpubArchive<F>) -> Self {
        Self { archive }
    }

    /// Total size of the underlying archive in bytes.
    pub fn size(&self) -> u64 {
        self.archive.size()
    }

    /// Number of archive entries.
    pub fn entry_count(&self) -> usize {
        self.archive.len()
    }

    /// Read a declared resource.
    ///
    /// Only an I/O failure of the underlying reader is returned as an error;
    /// every per-entry failure is classified in [`Resource`].
    pub fn read_resource(&mut self, name: &str) -> Result<Resource, ZipError> {
        match self.archive.read(name) {
            Ok(bytes) => Ok(Resource::Found(bytes)),
            Err(ZipError::FileNotFound) => Ok(Resource::Missing),
            Err(ZipError::IoError) => Err(ZipError::IoError),
            Err(err) => {
                log::warn!("[ZIP] entry '{}' unreadable: {}", name, err);
                Ok(Resource::Unreadable(err))
            }
        }
    }

    /// Check the `mimetype` entry. Records at most one issue.
    pub fn check_mimetype(&mut self, findings: &mut Findings) -> Result<(), ZipError> {
        match self.archive.read_mimetype() {
            Ok(bytes) => {
                let value = String::from_utf8_lossy(&bytes);
                let value = value.trim();
                if value != EPUB_MIMETYPE {
                    findings.issue(
                        Platform::General,
                        FindingCode::MimetypeInvalid,
                        format!(
                            "Invalid mimetype: '{}' (should be '{}')",
                            value, EPUB_MIMETYPE
                        ),
                    );
                }
                Ok(())
            }
            Err(ZipError::FileNotFound) => {
                findings.issue(
                    Platform::General,
                    FindingCode::MimetypeMissing,
                    "Missing 'mimetype' file",
                );
                Ok(())
            }
            Err(ZipError::IoError) => Err(ZipError::IoError),
            Err(err) => {
                findings.issue(
                    Platform::General,
                    FindingCode::MimetypeInvalid,
                    format!("Invalid mimetype: entry could not be read ({})", err),
                );
                Ok(())
            }
        }
    }

    /// Check that the container descriptor exists.
    pub fn check_container(&mut self, findings: &mut Findings) -> bool {
        let present = self.archive.contains(CONTAINER_PATH);
        if !present {
            findings.issue(
                Platform::General,
                FindingCode::ContainerMissing,
                "Missing 'META-INF/container.xml' file",
            );
        }
        present
    }

    /// Locate the package document through the container descriptor.
    ///
    /// Returns `None` after recording why the path could not be found.
    pub fn locate_package_document(
        &mut self,
        findings: &mut Findings,
    ) -> Result<Option<String>, ZipError> {
        let located = match self.read_resource(CONTAINER_PATH)? {
            Resource::Found(bytes) => match parse_container_xml(&bytes) {
                Ok(path) => path,
                Err(err) => {
                    findings.issue(
                        Platform::General,
                        FindingCode::ContainerUnparseable,
                        format!("Error parsing container.xml: {}", err),
                    );
                    None
                }
            },
            Resource::Unreadable(err) => {
                findings.issue(
                    Platform::General,
                    FindingCode::ContainerUnparseable,
                    format!("Error parsing container.xml: {}", err),
                );
                None
            }
            Resource::Missing => None,
        };

        let located = located
            .map(|path| path.trim_start_matches('/').to_string())
            .filter(|path| !path.is_empty());
        if located.is_none() {
            findings.issue(
                Platform::General,
                FindingCode::PackageDocumentMissing,
                "Could not find OPF file",
            );
        }
        log::debug!("[OPF] package document: {:?}", located);
        Ok(located)
    }

    /// Report the presence of an encryption descriptor.
    pub fn check_encryption(&mut self, findings: &mut Findings) -> Result<(), ZipError> {
        if let Resource::Found(bytes) = self.read_resource(ENCRYPTION_PATH)? {
            let text = String::from_utf8_lossy(&bytes).to_lowercase();
            if text.contains("encryption") {
                findings.issue(
                    Platform::General,
                    FindingCode::Drm,
                    "DRM/Encryption detected - may not be readable on all devices",
                );
            }
        }
        Ok(())
    }
}

/// Parse `container.xml` and return the first rootfile `full-path`.
pub fn parse_container_xml(content: &[u8]) -> Result<Option<String>, EpubError> {
    let mut reader = Reader::from_reader(content);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut elements = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"rootfile" {
                    for attr in e.attributes() {
                        let attr =
                            attr.map_err(|e| EpubError::Parse(format!("Attr error: {:?}", e)))?;
                        if attr.key.local_name().as_ref() == b"full-path" {
                            let value = reader
                                .decoder()
                                .decode(&attr.value)
                                .map_err(|e| EpubError::Parse(format!("Decode error: {:?}", e)))?
                                .to_string();
                            return Ok(Some(value));
                        }
                    }
                }
                elements += 1;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(EpubError::Parse(format!("XML parse error: {:?}", e))),
            _ => {}
        }
        buf.clear();
    }

    if elements == 0 {
        return Err(EpubError::Parse("no root element".into()));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finding::Severity;
    use crate::zip::test_support::build_zip;
    use std::io::Cursor;

    const CONTAINER: &[u8] = br#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

    fn package(files: &[(&str, &[u8])]) -> Package<Cursor<Vec<u8>>> {
        let archive = EpubArchive::open(Cursor::new(build_zip(files))).unwrap();
        Package::new(archive)
    }

    #[test]
    fn parse_container_finds_rootfile() {
        assert_eq!(
            parse_container_xml(CONTAINER).unwrap().as_deref(),
            Some("OEBPS/content.opf")
        );
    }

    #[test]
    fn parse_container_without_rootfile() {
        let xml = br#"<container><rootfiles/></container>"#;
        assert_eq!(parse_container_xml(xml).unwrap(), None);
    }

    #[test]
    fn parse_container_malformed() {
        assert!(parse_container_xml(b"<container><rootfiles></container>").is_err());
    }

    #[test]
    fn mimetype_ok_after_trimming() {
        let mut pkg = package(&[("mimetype", b"application/epub+zip\n")]);
        let mut findings = Findings::new();
        pkg.check_mimetype(&mut findings).unwrap();
        assert!(findings.is_empty());
    }

    #[test]
    fn mimetype_missing_is_one_issue() {
        let mut pkg = package(&[(CONTAINER_PATH, CONTAINER)]);
        let mut findings = Findings::new();
        pkg.check_mimetype(&mut findings).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings.all()[0].code, FindingCode::MimetypeMissing);
        assert_eq!(findings.all()[0].severity, Severity::Issue);
    }

    #[test]
    fn mimetype_wrong_value_is_one_issue() {
        let mut pkg = package(&[("mimetype", b"application/zip")]);
        let mut findings = Findings::new();
        pkg.check_mimetype(&mut findings).unwrap();
        assert_eq!(findings.len(), 1);
        assert!(findings.all()[0].message.contains("'application/zip'"));
    }

    #[test]
    fn missing_container_records_two_issues() {
        let mut pkg = package(&[("mimetype", b"application/epub+zip")]);
        let mut findings = Findings::new();
        assert!(!pkg.check_container(&mut findings));
        assert_eq!(pkg.locate_package_document(&mut findings).unwrap(), None);
        assert_eq!(findings.count_code(FindingCode::ContainerMissing), 1);
        assert_eq!(findings.count_code(FindingCode::PackageDocumentMissing), 1);
    }

    #[test]
    fn unparseable_container_is_reported() {
        let mut pkg = package(&[(CONTAINER_PATH, b"<container><oops></container>")]);
        let mut findings = Findings::new();
        assert_eq!(pkg.locate_package_document(&mut findings).unwrap(), None);
        assert_eq!(findings.count_code(FindingCode::ContainerUnparseable), 1);
        assert!(findings.all()[0].message.starts_with("Error parsing container.xml"));
    }

    #[test]
    fn locate_package_document_path() {
        let mut pkg = package(&[(CONTAINER_PATH, CONTAINER)]);
        let mut findings = Findings::new();
        assert_eq!(
            pkg.locate_package_document(&mut findings).unwrap().as_deref(),
            Some("OEBPS/content.opf")
        );
        assert!(findings.is_empty());
    }

    #[test]
    fn encryption_descriptor_is_drm_issue() {
        let mut pkg = package(&[(
            ENCRYPTION_PATH,
            b"<encryption xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\"/>",
        )]);
        let mut findings = Findings::new();
        pkg.check_encryption(&mut findings).unwrap();
        assert_eq!(findings.count_code(FindingCode::Drm), 1);
    }

    #[test]
    fn read_resource_classifies() {
        let mut pkg = package(&[("a.txt", b"hi")]);
        assert_eq!(pkg.read_resource("a.txt").unwrap(), Resource::Found(b"hi".to_vec()));
        assert_eq!(pkg.read_resource("b.txt").unwrap(), Resource::Missing);
    }
}
