//! # Tar Header Codec
//!
//! Builds the 512-byte GNU tar header describing one filesystem object, plus
//! the `././@LongLink` extension headers used when a name or a link target
//! does not fit the 100-byte embedded fields.
//!
//! The full header of an entry is laid out as
//!
//! 1. long-link extension (typeflag `K`) followed by the link text, if needed,
//! 2. long-path extension (typeflag `L`) followed by the path text, if needed,
//! 3. the core header block.
//!
//! Extension texts are NUL terminated and padded to a block boundary, so an
//! extension occupies `1 + ceil((len + 1) / 512)` blocks.

use serde::{Deserialize, Serialize};

use crate::common::{round_up_to_block, FileKind, FileStat, BLOCK_SIZE};

const BLOCK: usize = BLOCK_SIZE as usize;

/// Width of the embedded name and linkname fields.
pub const NAME_FIELD_LEN: usize = 100;

/// Name used by GNU tar for its long name/link pseudo entries.
const LONG_LINK_NAME: &[u8] = b"././@LongLink";

// Field offsets of the GNU header.
const NAME: (usize, usize) = (0, 100);
const MODE: (usize, usize) = (100, 8);
const UID: (usize, usize) = (108, 8);
const GID: (usize, usize) = (116, 8);
const SIZE: (usize, usize) = (124, 12);
const MTIME: (usize, usize) = (136, 12);
const CHKSUM: (usize, usize) = (148, 8);
const TYPEFLAG: usize = 156;
const LINKNAME: (usize, usize) = (157, 100);
const MAGIC: (usize, usize) = (257, 8);
const DEVMAJOR: (usize, usize) = (329, 8);
const DEVMINOR: (usize, usize) = (337, 8);
const ATIME: (usize, usize) = (345, 12);
const CTIME: (usize, usize) = (357, 12);

/// How much header each entry gets.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum HeaderStyle {
    /// No header at all: entries are raw concatenated content.
    None,
    /// Standard GNU header with the modification time.
    #[default]
    Simple,
    /// Also fills the GNU access and change time fields.
    Full,
}

/// Number of blocks a long name/link extension needs for `text`, or 0 if
/// the text fits the embedded field.
pub fn extension_blocks(text_len: usize) -> u64 {
    if text_len <= NAME_FIELD_LEN {
        0
    } else {
        1 + round_up_to_block(text_len as u64 + 1) / BLOCK_SIZE
    }
}

/// The name stored in the archive: directories carry a trailing slash.
pub fn stored_name(tarpath: &[u8], kind: FileKind) -> Vec<u8> {
    let mut name = tarpath.to_vec();
    if kind == FileKind::Directory && !name.ends_with(b"/") {
        name.push(b'/');
    }
    name
}

/// One 512-byte header block.
#[derive(Clone)]
pub struct TarHeader {
    block: [u8; BLOCK],
}

impl Default for TarHeader {
    fn default() -> Self {
        Self { block: [0u8; BLOCK] }
    }
}

impl std::fmt::Debug for TarHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TarHeader")
            .field("typeflag", &(self.block[TYPEFLAG] as char))
            .field("checksum", &self.checksum())
            .finish()
    }
}

impl TarHeader {
    /// Builds the core header for an object. `name` is the stored name (see
    /// [`stored_name`]); only its first 100 bytes land in the block.
    pub fn new(stat: &FileStat, name: &[u8], link: Option<&[u8]>, hard_link: bool, full: bool) -> Self {
        let mut th = TarHeader::default();
        th.set_bytes(NAME, name);
        th.set_octal(MODE, (stat.mode & 0o7777) as i64);
        th.set_octal(UID, stat.uid as i64);
        th.set_octal(GID, stat.gid as i64);
        let content = if stat.is_regular() && !hard_link { stat.size } else { 0 };
        th.set_octal(SIZE, content as i64);
        th.set_octal(MTIME, stat.mtime.sec);
        th.block[TYPEFLAG] = typeflag(stat.kind, hard_link);
        if let Some(link) = link {
            th.set_bytes(LINKNAME, link);
        }
        th.set_gnu_magic();
        if stat.kind.is_device() {
            th.set_octal(DEVMAJOR, stat.rdev_major as i64);
            th.set_octal(DEVMINOR, stat.rdev_minor as i64);
        }
        if full {
            th.set_octal(ATIME, stat.atime.sec);
            th.set_octal(CTIME, stat.ctime.sec);
        }
        th.calculate_checksum();
        th
    }

    /// A `././@LongLink` pseudo header announcing `text_len` bytes of long
    /// name (`b'L'`) or long link (`b'K'`) text.
    pub fn long_link(typeflag: u8, text_len: usize) -> Self {
        let mut th = TarHeader::default();
        th.set_bytes(NAME, LONG_LINK_NAME);
        th.set_octal(MODE, 0o644);
        th.set_octal(UID, 0);
        th.set_octal(GID, 0);
        th.set_octal(SIZE, text_len as i64 + 1);
        th.set_octal(MTIME, 0);
        th.block[TYPEFLAG] = typeflag;
        th.set_gnu_magic();
        th.calculate_checksum();
        th
    }

    pub fn as_bytes(&self) -> &[u8; BLOCK] {
        &self.block
    }

    pub fn typeflag(&self) -> u8 {
        self.block[TYPEFLAG]
    }

    /// Stored checksum value, parsed back from the octal field.
    pub fn checksum(&self) -> u32 {
        let field = &self.block[CHKSUM.0..CHKSUM.0 + CHKSUM.1];
        field
            .iter()
            .take_while(|b| (b'0'..=b'7').contains(b))
            .fold(0u32, |acc, b| acc * 8 + (b - b'0') as u32)
    }

    /// Replaces the modification time and refreshes the checksum.
    pub fn set_mtime(&mut self, sec: i64) {
        self.set_octal(MTIME, sec);
        self.calculate_checksum();
    }

    /// Unsigned byte sum of the block, the checksum field counted as spaces.
    pub fn compute_checksum(&self) -> u32 {
        self.block
            .iter()
            .enumerate()
            .map(|(i, &b)| {
                if (CHKSUM.0..CHKSUM.0 + CHKSUM.1).contains(&i) {
                    b' ' as u32
                } else {
                    b as u32
                }
            })
            .sum()
    }

    fn calculate_checksum(&mut self) {
        let sum = self.compute_checksum();
        let text = format!("{:06o}\0 ", sum);
        self.block[CHKSUM.0..CHKSUM.0 + CHKSUM.1].copy_from_slice(text.as_bytes());
    }

    fn set_gnu_magic(&mut self) {
        self.block[MAGIC.0..MAGIC.0 + MAGIC.1].copy_from_slice(b"ustar  \0");
    }

    fn set_bytes(&mut self, (off, len): (usize, usize), value: &[u8]) {
        let n = value.len().min(len);
        self.block[off..off + n].copy_from_slice(&value[..n]);
    }

    /// Octal, NUL terminated. Values that do not fit (or are negative) use
    /// the GNU base-256 encoding.
    fn set_octal(&mut self, (off, len): (usize, usize), value: i64) {
        let field = &mut self.block[off..off + len];
        let digits = len - 1;
        if value >= 0 && (value as u64) < 1u64 << (3 * digits as u32) {
            let text = format!("{:0width$o}\0", value, width = digits);
            field.copy_from_slice(text.as_bytes());
        } else {
            let bytes = value.to_be_bytes();
            let fill = if value < 0 { 0xff } else { 0x00 };
            for b in field.iter_mut() {
                *b = fill;
            }
            let tail = len.min(bytes.len());
            field[len - tail..].copy_from_slice(&bytes[bytes.len() - tail..]);
            field[0] = if value < 0 { 0xff } else { 0x80 };
        }
    }
}

fn typeflag(kind: FileKind, hard_link: bool) -> u8 {
    if hard_link {
        return b'1';
    }
    match kind {
        FileKind::Regular | FileKind::Socket => b'0',
        FileKind::Symlink => b'2',
        FileKind::CharDevice => b'3',
        FileKind::BlockDevice => b'4',
        FileKind::Directory => b'5',
        FileKind::Fifo => b'6',
    }
}

/// Block accounting of one entry's header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeaderLayout {
    pub long_path_blocks: u64,
    pub long_link_blocks: u64,
}

impl HeaderLayout {
    pub fn new(name: &[u8], link: Option<&[u8]>) -> Self {
        Self {
            long_path_blocks: extension_blocks(name.len()),
            long_link_blocks: link.map_or(0, |l| extension_blocks(l.len())),
        }
    }

    /// Total header bytes: core block plus extension blocks.
    pub fn size(&self) -> u64 {
        (1 + self.long_path_blocks + self.long_link_blocks) * BLOCK_SIZE
    }
}

/// Header bytes an entry needs under `style`.
pub fn header_size(name: &[u8], link: Option<&[u8]>, style: HeaderStyle) -> u64 {
    match style {
        HeaderStyle::None => 0,
        HeaderStyle::Simple | HeaderStyle::Full => HeaderLayout::new(name, link).size(),
    }
}

/// Renders the complete header (extensions first, core last). The result is
/// exactly [`header_size`] bytes long.
pub fn render(stat: &FileStat, name: &[u8], link: Option<&[u8]>, hard_link: bool, style: HeaderStyle) -> Vec<u8> {
    if style == HeaderStyle::None {
        return Vec::new();
    }
    let layout = HeaderLayout::new(name, link);
    let mut out = Vec::with_capacity(layout.size() as usize);

    if let (Some(link), true) = (link, layout.long_link_blocks > 0) {
        push_extension(&mut out, b'K', link, layout.long_link_blocks);
    }
    if layout.long_path_blocks > 0 {
        push_extension(&mut out, b'L', name, layout.long_path_blocks);
    }
    let core = TarHeader::new(stat, name, link, hard_link, style == HeaderStyle::Full);
    out.extend_from_slice(core.as_bytes());

    debug_assert_eq!(out.len() as u64, layout.size());
    out
}

fn push_extension(out: &mut Vec<u8>, typeflag: u8, text: &[u8], blocks: u64) {
    let start = out.len();
    out.extend_from_slice(TarHeader::long_link(typeflag, text.len()).as_bytes());
    out.extend_from_slice(text);
    out.resize(start + (blocks * BLOCK_SIZE) as usize, 0);
}
