//! ZIP container reader for EPUB packages
//!
//! Parses the central directory once and reads individual entries on demand.
//! Supports stored and DEFLATE entries (via miniz_oxide) with CRC32
//! verification. ZIP64 archives are rejected.

use std::io::{Read, Seek, SeekFrom};

pub use crate::error::ZipError;

/// Local file header signature (little-endian)
const SIG_LOCAL_FILE_HEADER: u32 = 0x04034b50;
/// Central directory entry signature (little-endian)
const SIG_CD_ENTRY: u32 = 0x02014b50;
/// End of central directory signature (little-endian)
const SIG_EOCD: u32 = 0x06054b50;
/// ZIP64 end of central directory locator signature (little-endian)
const SIG_ZIP64_EOCD_LOCATOR: u32 = 0x07064b50;
/// Minimum EOCD record size in bytes
const EOCD_MIN_SIZE: usize = 22;
/// Maximum EOCD search window (EOCD + max comment length)
const MAX_EOCD_SCAN: usize = EOCD_MIN_SIZE + u16::MAX as usize;
/// Fixed part of a local file header
const LOCAL_HEADER_LEN: u64 = 30;

const METHOD_STORED: u16 = 0;
const METHOD_DEFLATED: u16 = 8;

/// Runtime-configurable ZIP safety limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ZipLimits {
    /// Maximum compressed or uncompressed size allowed for a single entry read.
    pub max_file_read_size: usize,
    /// Maximum allowed size for the `mimetype` entry.
    pub max_mimetype_size: usize,
    /// Fail on central directory inconsistencies instead of truncating.
    pub strict: bool,
    /// Maximum bytes scanned from file tail while searching for EOCD.
    pub max_eocd_scan: usize,
}

impl ZipLimits {
    /// Create explicit ZIP limits.
    pub fn new(max_file_read_size: usize, max_mimetype_size: usize) -> Self {
        Self {
            max_file_read_size,
            max_mimetype_size,
            strict: false,
            max_eocd_scan: MAX_EOCD_SCAN,
        }
    }

    /// Enable or disable strict ZIP parsing behavior.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Set a cap for EOCD tail scan bytes.
    pub fn with_max_eocd_scan(mut self, max_eocd_scan: usize) -> Self {
        self.max_eocd_scan = max_eocd_scan.max(EOCD_MIN_SIZE);
        self
    }
}

#[derive(Clone, Copy, Debug)]
struct Eocd {
    cd_offset: u64,
    cd_size: u32,
    num_entries: u16,
    zip64: bool,
}

/// Central directory record for one archive member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Entry name as stored in the archive.
    pub name: String,
    /// Compression method (0=stored, 8=deflated)
    pub method: u16,
    /// Compressed size in bytes
    pub compressed_size: u32,
    /// Uncompressed size in bytes
    pub uncompressed_size: u32,
    /// Offset to local file header
    pub local_header_offset: u32,
    /// CRC32 checksum
    pub crc32: u32,
}

/// Random-access reader over a ZIP container.
pub struct EpubArchive<F: Read + Seek> {
    file: F,
    entries: Vec<ArchiveEntry>,
    size: u64,
    limits: Option<ZipLimits>,
}

impl<F: Read + Seek> EpubArchive<F> {
    /// Open a ZIP container and parse its central directory.
    pub fn open(file: F) -> Result<Self, ZipError> {
        Self::open_with_limits(file, None)
    }

    /// Open a ZIP container with explicit runtime limits.
    pub fn open_with_limits(mut file: F, limits: Option<ZipLimits>) -> Result<Self, ZipError> {
        let size = file.seek(SeekFrom::End(0)).map_err(|_| ZipError::IoError)?;
        let max_scan = limits
            .map(|l| l.max_eocd_scan.min(MAX_EOCD_SCAN))
            .unwrap_or(MAX_EOCD_SCAN);
        let eocd = find_eocd(&mut file, size, max_scan)?;
        if eocd.zip64 {
            return Err(ZipError::UnsupportedZip64);
        }
        let strict = limits.is_some_and(|l| l.strict);

        file.seek(SeekFrom::Start(eocd.cd_offset))
            .map_err(|_| ZipError::IoError)?;
        let mut directory = vec![0u8; eocd.cd_size as usize];
        file.read_exact(&mut directory).map_err(read_error)?;

        let mut entries = Vec::with_capacity(eocd.num_entries as usize);
        let mut cursor = 0usize;
        for _ in 0..eocd.num_entries {
            match parse_cd_entry(&directory, cursor) {
                Some((entry, next)) => {
                    entries.push(entry);
                    cursor = next;
                }
                None if strict => return Err(ZipError::InvalidFormat),
                None => {
                    log::warn!(
                        "[ZIP] Central directory truncated after {} of {} entries",
                        entries.len(),
                        eocd.num_entries
                    );
                    break;
                }
            }
        }

        log::debug!(
            "[ZIP] Parsed {} central directory entries (offset {})",
            entries.len(),
            eocd.cd_offset
        );

        Ok(Self {
            file,
            entries,
            size,
            limits,
        })
    }

    /// Total archive size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of entries in the central directory.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the archive has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by name.
    ///
    /// Exact matches win; otherwise the lookup is case-insensitive and
    /// ignores a leading `/` on either side.
    pub fn find(&self, name: &str) -> Option<&ArchiveEntry> {
        let wanted = name.strip_prefix('/').unwrap_or(name);
        self.entries
            .iter()
            .find(|e| e.name == wanted)
            .or_else(|| {
                self.entries.iter().find(|e| {
                    let stored = e.name.strip_prefix('/').unwrap_or(&e.name);
                    stored.eq_ignore_ascii_case(wanted)
                })
            })
    }

    /// Returns `true` if an entry with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Read and decompress an entry by name.
    pub fn read(&mut self, name: &str) -> Result<Vec<u8>, ZipError> {
        let entry = self.find(name).cloned().ok_or(ZipError::FileNotFound)?;
        self.read_entry(&entry)
    }

    /// Read the `mimetype` entry, honoring `max_mimetype_size`.
    pub fn read_mimetype(&mut self) -> Result<Vec<u8>, ZipError> {
        let entry = self
            .find("mimetype")
            .cloned()
            .ok_or(ZipError::FileNotFound)?;
        if let Some(limits) = self.limits {
            if entry.uncompressed_size as usize > limits.max_mimetype_size {
                return Err(ZipError::FileTooLarge);
            }
        }
        self.read_entry(&entry)
    }

    /// Read and decompress a specific entry.
    pub fn read_entry(&mut self, entry: &ArchiveEntry) -> Result<Vec<u8>, ZipError> {
        if let Some(limits) = self.limits {
            if entry.uncompressed_size as usize > limits.max_file_read_size
                || entry.compressed_size as usize > limits.max_file_read_size
            {
                return Err(ZipError::FileTooLarge);
            }
        }

        let data_offset = self.data_offset(entry)?;
        if data_offset.saturating_add(entry.compressed_size as u64) > self.size {
            return Err(ZipError::InvalidFormat);
        }
        self.file
            .seek(SeekFrom::Start(data_offset))
            .map_err(|_| ZipError::IoError)?;
        let mut raw = vec![0u8; entry.compressed_size as usize];
        self.file.read_exact(&mut raw).map_err(read_error)?;

        let data = match entry.method {
            METHOD_STORED => raw,
            METHOD_DEFLATED => miniz_oxide::inflate::decompress_to_vec_with_limit(
                &raw,
                entry.uncompressed_size as usize,
            )
            .map_err(|_| ZipError::DecompressError)?,
            _ => return Err(ZipError::UnsupportedCompression),
        };

        if entry.crc32 != 0 && crc32fast::hash(&data) != entry.crc32 {
            return Err(ZipError::CrcMismatch);
        }
        Ok(data)
    }

    /// Offset of the entry's data, past the local header and its
    /// variable-length fields.
    fn data_offset(&mut self, entry: &ArchiveEntry) -> Result<u64, ZipError> {
        let offset = entry.local_header_offset as u64;
        if offset + LOCAL_HEADER_LEN > self.size {
            return Err(ZipError::InvalidFormat);
        }
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|_| ZipError::IoError)?;
        let mut header = [0u8; LOCAL_HEADER_LEN as usize];
        self.file.read_exact(&mut header).map_err(read_error)?;
        if read_u32_le(&header, 0) != SIG_LOCAL_FILE_HEADER {
            return Err(ZipError::InvalidFormat);
        }
        let name_len = read_u16_le(&header, 26) as u64;
        let extra_len = read_u16_le(&header, 28) as u64;
        Ok(offset + LOCAL_HEADER_LEN + name_len + extra_len)
    }
}

/// A short read means the archive lies about its own layout; anything else
/// is a failure of the underlying reader.
fn read_error(err: std::io::Error) -> ZipError {
    match err.kind() {
        std::io::ErrorKind::UnexpectedEof => ZipError::InvalidFormat,
        _ => ZipError::IoError,
    }
}

fn find_eocd<F: Read + Seek>(file: &mut F, size: u64, max_scan: usize) -> Result<Eocd, ZipError> {
    if size < EOCD_MIN_SIZE as u64 {
        return Err(ZipError::InvalidFormat);
    }
    let scan_len = size.min(max_scan.max(EOCD_MIN_SIZE) as u64) as usize;
    let scan_base = size - scan_len as u64;
    let mut tail = vec![0u8; scan_len];
    file.seek(SeekFrom::Start(scan_base))
        .map_err(|_| ZipError::IoError)?;
    file.read_exact(&mut tail).map_err(read_error)?;

    for i in (0..=scan_len - EOCD_MIN_SIZE).rev() {
        if read_u32_le(&tail, i) != SIG_EOCD {
            continue;
        }
        let num_entries = read_u16_le(&tail, i + 10);
        let cd_size = read_u32_le(&tail, i + 12);
        let cd_offset = read_u32_le(&tail, i + 16) as u64;
        let comment_len = read_u16_le(&tail, i + 20) as u64;
        let eocd_pos = scan_base + i as u64;
        // A signature inside the comment does not end exactly at EOF.
        if eocd_pos + EOCD_MIN_SIZE as u64 + comment_len != size {
            continue;
        }

        let cd_end = cd_offset
            .checked_add(cd_size as u64)
            .ok_or(ZipError::InvalidFormat)?;
        if cd_end > eocd_pos {
            return Err(ZipError::InvalidFormat);
        }

        let sentinel =
            num_entries == u16::MAX || cd_size == u32::MAX || cd_offset == u32::MAX as u64;
        let locator = if eocd_pos >= 20 {
            file.seek(SeekFrom::Start(eocd_pos - 20))
                .map_err(|_| ZipError::IoError)?;
            let mut sig = [0u8; 4];
            file.read_exact(&mut sig).map_err(read_error)?;
            u32::from_le_bytes(sig) == SIG_ZIP64_EOCD_LOCATOR
        } else {
            false
        };

        return Ok(Eocd {
            cd_offset,
            cd_size,
            num_entries,
            zip64: sentinel || locator,
        });
    }

    Err(ZipError::InvalidFormat)
}

/// Parse one central directory record starting at `at`, returning the entry
/// and the offset of the following record.
fn parse_cd_entry(directory: &[u8], at: usize) -> Option<(ArchiveEntry, usize)> {
    const FIXED: usize = 46;
    if at + FIXED > directory.len() || read_u32_le(directory, at) != SIG_CD_ENTRY {
        return None;
    }
    let name_len = read_u16_le(directory, at + 28) as usize;
    let extra_len = read_u16_le(directory, at + 30) as usize;
    let comment_len = read_u16_le(directory, at + 32) as usize;
    let name_start = at + FIXED;
    let next = name_start + name_len + extra_len + comment_len;
    if next > directory.len() {
        return None;
    }

    let entry = ArchiveEntry {
        name: String::from_utf8_lossy(&directory[name_start..name_start + name_len]).into_owned(),
        method: read_u16_le(directory, at + 10),
        crc32: read_u32_le(directory, at + 16),
        compressed_size: read_u32_le(directory, at + 20),
        uncompressed_size: read_u32_le(directory, at + 24),
        local_header_offset: read_u32_le(directory, at + 42),
    };
    Some((entry, next))
}

fn read_u16_le(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn read_u32_le(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}
