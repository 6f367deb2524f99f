//! Single-root file container.
//!
//! File layout:
//! ```text
//! +----------------------+ 0
//! | FileHeader (24)      |
//! +----------------------+ 24
//! | Nodes (8-aligned)    |  refs are byte offsets from the start of file
//! +----------------------+ len - 24
//! | FileFooter (24)      |
//! +----------------------+
//! ```

use strata_common::{Ref, Result, StrataError};

/// File mnemonic stored in the header.
pub const MNEMONIC: [u8; 4] = *b"T-DB";

/// On-disk format version.
pub const FORMAT_VERSION: [u8; 2] = [2, 0];

/// Magic cookie closing a well-formed footer.
pub const FOOTER_MAGIC_COOKIE: u64 = 0x3034_1252_37E5_26C8;

/// File header.
///
/// Layout (24 bytes):
/// - top_ref: 2 x 8 bytes (slot selected by select_bit)
/// - mnemonic: 4 bytes ("T-DB")
/// - version: 2 bytes
/// - reserved: 1 byte
/// - select_bit: 1 byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// Two top-ref slots.
    pub top_ref: [u64; 2],
    /// File mnemonic.
    pub mnemonic: [u8; 4],
    /// Format version.
    pub version: [u8; 2],
    /// Reserved for future use.
    pub reserved: u8,
    /// Which top-ref slot is current.
    pub select_bit: u8,
}

impl FileHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 24;

    /// Creates a header pointing at `top_ref`.
    pub fn new(top_ref: Ref) -> Self {
        Self {
            top_ref: [top_ref as u64, 0],
            mnemonic: MNEMONIC,
            version: FORMAT_VERSION,
            reserved: 0,
            select_bit: 0,
        }
    }

    /// Returns the current top ref.
    pub fn current_top_ref(&self) -> Ref {
        self.top_ref[(self.select_bit & 1) as usize] as Ref
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..8].copy_from_slice(&self.top_ref[0].to_le_bytes());
        buf[8..16].copy_from_slice(&self.top_ref[1].to_le_bytes());
        buf[16..20].copy_from_slice(&self.mnemonic);
        buf[20..22].copy_from_slice(&self.version);
        buf[22] = self.reserved;
        buf[23] = self.select_bit;
        buf
    }

    /// Deserializes from bytes.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(StrataError::InvalidDatabase(format!(
                "file too small for header: {} bytes",
                buf.len()
            )));
        }
        let header = Self {
            top_ref: [read_u64(&buf[0..8]), read_u64(&buf[8..16])],
            mnemonic: [buf[16], buf[17], buf[18], buf[19]],
            version: [buf[20], buf[21]],
            reserved: buf[22],
            select_bit: buf[23],
        };
        if header.mnemonic != MNEMONIC {
            return Err(StrataError::InvalidDatabase(format!(
                "bad mnemonic {:?}",
                header.mnemonic
            )));
        }
        if header.version != FORMAT_VERSION {
            return Err(StrataError::InvalidDatabase(format!(
                "unsupported format version {}.{}",
                header.version[0], header.version[1]
            )));
        }
        Ok(header)
    }
}

/// File footer.
///
/// Layout (24 bytes):
/// - top_ref: 8 bytes
/// - checksum: 4 bytes (crc32 of the node region)
/// - reserved: 4 bytes
/// - magic_cookie: 8 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFooter {
    /// Ref of the root node.
    pub top_ref: u64,
    /// Checksum of the node region.
    pub checksum: u32,
    /// Magic cookie.
    pub magic_cookie: u64,
}

impl FileFooter {
    /// Size of the footer in bytes.
    pub const SIZE: usize = 24;

    /// Creates a footer for a node region.
    pub fn new(top_ref: Ref, nodes: &[u8]) -> Self {
        Self {
            top_ref: top_ref as u64,
            checksum: crc32fast::hash(nodes),
            magic_cookie: FOOTER_MAGIC_COOKIE,
        }
    }

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..8].copy_from_slice(&self.top_ref.to_le_bytes());
        buf[8..12].copy_from_slice(&self.checksum.to_le_bytes());
        buf[16..24].copy_from_slice(&self.magic_cookie.to_le_bytes());
        buf
    }

    /// Deserializes from bytes.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(StrataError::InvalidDatabase("truncated footer".to_string()));
        }
        let footer = Self {
            top_ref: read_u64(&buf[0..8]),
            checksum: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            magic_cookie: read_u64(&buf[16..24]),
        };
        if footer.magic_cookie != FOOTER_MAGIC_COOKIE {
            return Err(StrataError::InvalidDatabase(format!(
                "bad footer cookie {:#x}",
                footer.magic_cookie
            )));
        }
        Ok(footer)
    }
}

/// Validates a complete file image and returns its top ref.
///
/// The node region must checksum to the footer value, and the top ref must
/// point inside it (0 is allowed for an empty image).
pub fn validate_image(buf: &[u8]) -> Result<Ref> {
    if buf.len() < FileHeader::SIZE + FileFooter::SIZE || buf.len() % 8 != 0 {
        return Err(StrataError::InvalidDatabase(format!(
            "bad file size {}",
            buf.len()
        )));
    }
    let header = FileHeader::from_bytes(buf)?;
    let footer_start = buf.len() - FileFooter::SIZE;
    let footer = FileFooter::from_bytes(&buf[footer_start..])?;

    let nodes = &buf[FileHeader::SIZE..footer_start];
    let actual = crc32fast::hash(nodes);
    if actual != footer.checksum {
        return Err(StrataError::ChecksumMismatch {
            expected: footer.checksum,
            actual,
        });
    }

    let top_ref = footer.top_ref as Ref;
    if header.current_top_ref() != top_ref {
        return Err(StrataError::InvalidDatabase(format!(
            "header top ref {} disagrees with footer {}",
            header.current_top_ref(),
            top_ref
        )));
    }
    if top_ref != 0 && (top_ref < FileHeader::SIZE || top_ref >= footer_start || top_ref % 8 != 0)
    {
        return Err(StrataError::InvalidDatabase(format!(
            "top ref {top_ref} out of range"
        )));
    }
    Ok(top_ref)
}

/// Frames a node region into a complete file image.
///
/// `nodes` must start at file offset 24 and be 8-aligned in length.
pub fn frame_image(nodes: &[u8], top_ref: Ref) -> Vec<u8> {
    debug_assert!(nodes.len() % 8 == 0);
    let mut out = Vec::with_capacity(FileHeader::SIZE + nodes.len() + FileFooter::SIZE);
    out.extend_from_slice(&FileHeader::new(top_ref).to_bytes());
    out.extend_from_slice(nodes);
    out.extend_from_slice(&FileFooter::new(top_ref, nodes).to_bytes());
    out
}

fn read_u64(buf: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[..8]);
    u64::from_le_bytes(bytes)
}
