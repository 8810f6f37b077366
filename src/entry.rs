//! # Entries
//!
//! An [`Entry`] is one filesystem object mapped into a shard. It knows its
//! stat record, where its content comes from, its link state and the exact
//! byte layout it occupies inside its shard:
//!
//! ```text
//! | extension headers | core header | content | zero padding |
//! |<------ header_size ------------>|
//! |<------------------ blocked_size -------------------------->|
//! ```
//!
//! Entries live in an arena (see [`crate::tree`]) and refer to each other,
//! and to their shard, through [`EntryId`] and [`ShardId`] indices.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use tracing::debug;

use crate::common::{round_up_to_block, FileKind, FileStat, BLOCK_SIZE};
use crate::error::{Result, ShardError};
use crate::fingerprint::{self, Fingerprint};
use crate::fsx;
use crate::header::{self, HeaderStyle};
use crate::shard::ShardId;

/// Index of an entry in its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(pub(crate) usize);

impl EntryId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Where the bytes of a regular file come from.
#[derive(Debug, Clone)]
pub enum Content {
    /// Read from the entry's absolute path on every serve call.
    Disk,
    /// Supplied in memory, e.g. for a generated catalog.
    Virtual(Arc<[u8]>),
}

/// Link state of an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Link {
    None,
    /// Destination of a symbolic link, read once at discovery.
    Symlink(PathBuf),
    /// A hard link to `target` (a tree path). `text` is what goes into the
    /// header; it starts out equal to `target` and is rewritten relative to
    /// the shard root by the hard-link resolver.
    Hard { target: PathBuf, text: PathBuf },
}

/// One filesystem object destined for a shard.
#[derive(Debug)]
pub struct Entry {
    abspath: PathBuf,
    path: PathBuf,
    tarpath: PathBuf,
    stat: FileStat,
    style: HeaderStyle,
    link: Link,
    content: Content,

    header_size: u64,
    blocked_size: u64,
    pub(crate) children_size: u64,
    pub(crate) offset: u64,

    pub(crate) parent: Option<EntryId>,
    pub(crate) children: Vec<EntryId>,
    pub(crate) shard: Option<ShardId>,
    pub(crate) storage_root: bool,

    fingerprint: OnceLock<Fingerprint>,
}

impl Entry {
    /// Creates an on-disk entry. `path` is the object's path relative to the
    /// scanned origin; it doubles as the tarpath until a shard root is chosen.
    pub fn new(abspath: PathBuf, path: PathBuf, mut stat: FileStat, symlink: Option<PathBuf>, style: HeaderStyle) -> Self {
        let link = match symlink {
            Some(dest) if stat.is_symlink() => {
                stat.size = fsx::path_bytes(&dest).len() as u64;
                Link::Symlink(dest)
            }
            _ => Link::None,
        };
        let mut entry = Entry {
            abspath,
            tarpath: path.clone(),
            path,
            stat,
            style,
            link,
            content: Content::Disk,
            header_size: 0,
            blocked_size: 0,
            children_size: 0,
            offset: 0,
            parent: None,
            children: Vec::new(),
            shard: None,
            storage_root: false,
            fingerprint: OnceLock::new(),
        };
        entry.update_sizes();
        entry.children_size = entry.blocked_size;
        debug!("entry {} added, blocked size {}", entry.path.display(), entry.blocked_size);
        entry
    }

    /// Creates a regular file whose content is `bytes`. The declared size in
    /// `stat` must equal the buffer length.
    pub fn new_virtual(path: PathBuf, mut stat: FileStat, bytes: Arc<[u8]>, style: HeaderStyle) -> Result<Self> {
        stat.kind = FileKind::Regular;
        if stat.size != bytes.len() as u64 {
            return Err(ShardError::VirtualSizeMismatch {
                path,
                declared: stat.size,
                actual: bytes.len() as u64,
            });
        }
        let mut entry = Entry::new(PathBuf::new(), path, stat, None, style);
        entry.content = Content::Virtual(bytes);
        Ok(entry)
    }

    pub fn abspath(&self) -> &Path {
        &self.abspath
    }

    /// Path relative to the scanned origin.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path relative to the root of the shard the entry lives in.
    pub fn tarpath(&self) -> &Path {
        &self.tarpath
    }

    pub fn stat(&self) -> &FileStat {
        &self.stat
    }

    pub fn kind(&self) -> FileKind {
        self.stat.kind
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self.content, Content::Virtual(_))
    }

    pub fn is_hard_link(&self) -> bool {
        matches!(self.link, Link::Hard { .. })
    }

    pub fn header_style(&self) -> HeaderStyle {
        self.style
    }

    pub fn header_size(&self) -> u64 {
        self.header_size
    }

    pub fn blocked_size(&self) -> u64 {
        self.blocked_size
    }

    pub fn children_size(&self) -> u64 {
        self.children_size
    }

    /// Offset of the first header byte inside the shard.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn parent(&self) -> Option<EntryId> {
        self.parent
    }

    pub fn children(&self) -> &[EntryId] {
        &self.children
    }

    pub fn shard(&self) -> Option<ShardId> {
        self.shard
    }

    pub fn is_storage_root(&self) -> bool {
        self.storage_root
    }

    /// Number of content bytes stored after the header.
    pub fn content_len(&self) -> u64 {
        if self.stat.is_regular() && !self.is_hard_link() {
            self.stat.size
        } else {
            0
        }
    }

    /// The name as stored in the archive (directories end in `/`).
    pub fn stored_name(&self) -> Vec<u8> {
        header::stored_name(&fsx::path_bytes(&self.tarpath), self.stat.kind)
    }

    /// Link text written into the header, if any.
    pub fn link_text(&self) -> Option<Vec<u8>> {
        match &self.link {
            Link::None => None,
            Link::Symlink(dest) => Some(fsx::path_bytes(dest)),
            Link::Hard { text, .. } => Some(fsx::path_bytes(text)),
        }
    }

    /// Recomputes header and blocked sizes from the current tarpath and link.
    pub(crate) fn update_sizes(&mut self) {
        let name = self.stored_name();
        let link = self.link_text();
        self.header_size = header::header_size(&name, link.as_deref(), self.style);
        self.blocked_size = round_up_to_block(self.header_size + self.content_len());

        assert!(self.header_size <= self.blocked_size && self.blocked_size % BLOCK_SIZE == 0);
        assert!(
            !self.is_hard_link() || self.blocked_size == self.header_size,
            "hard link {} carries content",
            self.path.display()
        );
    }

    /// Makes the tarpath relative to `root` (a tree path) and invalidates
    /// everything derived from the old tarpath.
    pub(crate) fn calculate_tarpath(&mut self, root: &Path) -> Result<()> {
        let tarpath = self
            .path
            .strip_prefix(root)
            .map_err(|_| ShardError::StripPrefix {
                prefix: root.to_path_buf(),
                path: self.path.clone(),
            })?
            .to_path_buf();
        if tarpath != self.tarpath {
            self.tarpath = tarpath;
            self.fingerprint = OnceLock::new();
            self.update_sizes();
        }
        Ok(())
    }

    /// Turns this entry into a hard link to `target` (a tree path). The
    /// entry keeps its stat record but no longer stores content.
    pub(crate) fn rewrite_into_hard_link(&mut self, target: PathBuf) {
        debug!("{} is a hard link to {}", self.path.display(), target.display());
        self.link = Link::Hard {
            text: target.clone(),
            target,
        };
        self.update_sizes();
    }

    /// Replaces the text of a hard link. No-op for other entries.
    pub(crate) fn set_hard_link_text(&mut self, new_text: PathBuf) {
        if let Link::Hard { text, .. } = &mut self.link {
            *text = new_text;
            self.update_sizes();
        }
    }

    /// Path-size-mtime digest, computed once.
    pub fn fingerprint(&self) -> &Fingerprint {
        self.fingerprint.get_or_init(|| {
            fingerprint::fingerprint(&fsx::path_bytes(&self.tarpath), self.stat.size as i64, self.stat.mtime)
        })
    }

    /// The complete header bytes (extensions first, core last).
    pub fn render_header(&self) -> Vec<u8> {
        let name = self.stored_name();
        let link = self.link_text();
        header::render(&self.stat, &name, link.as_deref(), self.is_hard_link(), self.style)
    }

    /// Copies bytes of this entry's region of the shard into `buf`, starting
    /// `from` bytes after the entry's first header byte.
    ///
    /// Exactly `min(buf.len(), blocked_size - from)` bytes are produced. The
    /// source file, if any, is opened and closed within the call. `shard`
    /// only labels errors.
    pub fn serve(&self, buf: &mut [u8], from: u64, shard: &str) -> Result<usize> {
        if from >= self.blocked_size || buf.is_empty() {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(self.blocked_size - from) as usize;
        let buf = &mut buf[..want];
        let mut pos = from;
        let mut done = 0usize;

        if pos < self.header_size {
            let hdr = self.render_header();
            let n = (want as u64).min(self.header_size - pos) as usize;
            buf[..n].copy_from_slice(&hdr[pos as usize..pos as usize + n]);
            done += n;
            pos += n as u64;
        }

        let content_end = self.header_size + self.content_len();
        if done < want && pos < content_end {
            let off = pos - self.header_size;
            let n = ((want - done) as u64).min(content_end - pos) as usize;
            let dst = &mut buf[done..done + n];
            match &self.content {
                Content::Virtual(bytes) => {
                    dst.copy_from_slice(&bytes[off as usize..off as usize + n]);
                }
                Content::Disk => self.read_content(dst, off, shard)?,
            }
            done += n;
        }

        // Everything left lies in the padding region.
        buf[done..].fill(0);
        Ok(want)
    }

    fn read_content(&self, dst: &mut [u8], off: u64, shard: &str) -> Result<()> {
        let unreadable = |source| ShardError::UnreadableSource {
            source,
            path: self.abspath.clone(),
            shard: shard.to_string(),
            offset: off,
        };
        let file = File::open(&self.abspath).map_err(unreadable)?;
        let got = fsx::read_at(&file, dst, off).map_err(unreadable)?;
        if got != dst.len() {
            return Err(ShardError::ShortRead {
                path: self.abspath.clone(),
                shard: shard.to_string(),
                offset: off,
                expected: dst.len(),
                got,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Timespec;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn stat(kind: FileKind, size: u64) -> FileStat {
        FileStat::synthetic(kind, 0o400, size, Timespec::new(3600, 0))
    }

    fn disk_entry(content: &[u8]) -> (NamedTempFile, Entry) {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(content).unwrap();
        let entry = Entry::new(
            tmp.path().to_path_buf(),
            PathBuf::from("testing"),
            stat(FileKind::Regular, content.len() as u64),
            None,
            HeaderStyle::Simple,
        );
        (tmp, entry)
    }

    #[test]
    fn file_of_745_bytes_takes_two_blocks() {
        let content: Vec<u8> = (0..745u32).map(|i| (i % 251) as u8 + 1).collect();
        let (_tmp, entry) = disk_entry(&content);
        assert_eq!(entry.header_size(), 512);
        assert_eq!(entry.blocked_size(), 1024);

        let mut buf = vec![0xAAu8; 1024];
        assert_eq!(entry.serve(&mut buf, 0, "s01.tar").unwrap(), 1024);
        assert_eq!(&buf[..512], &entry.render_header()[..]);
        assert_eq!(&buf[512..512 + 745], &content[..]);
        assert!(buf[512 + 745..].iter().all(|&b| b == 0));
    }

    #[test]
    fn serve_length_is_bounded_by_blocked_size() {
        let (_tmp, entry) = disk_entry(b"hello");
        let mut buf = vec![0u8; 4096];
        for from in [0u64, 1, 511, 512, 516, 517, 1023] {
            let n = entry.serve(&mut buf, from, "s01.tar").unwrap();
            assert_eq!(n as u64, 1024 - from);
        }
        assert_eq!(entry.serve(&mut buf, 1024, "s01.tar").unwrap(), 0);
        assert_eq!(entry.serve(&mut buf[..3], 510, "s01.tar").unwrap(), 3);
    }

    #[test]
    fn sweeping_reproduces_a_single_read() {
        let content: Vec<u8> = (0..3000u32).map(|i| (i * 7 % 256) as u8).collect();
        let (_tmp, entry) = disk_entry(&content);
        let total = entry.blocked_size() as usize;

        let mut whole = vec![0u8; total];
        entry.serve(&mut whole, 0, "m01.tar").unwrap();

        for step in [1usize, 7, 100, 511, 512, 513, 2048] {
            let mut swept = Vec::with_capacity(total);
            let mut from = 0u64;
            let mut chunk = vec![0u8; step];
            while (from as usize) < total {
                let n = entry.serve(&mut chunk, from, "m01.tar").unwrap();
                assert_eq!(n, step.min(total - from as usize));
                swept.extend_from_slice(&chunk[..n]);
                from += n as u64;
            }
            assert_eq!(swept, whole, "step {step}");
        }
    }

    #[test]
    fn symlink_reports_destination_length_and_no_content() {
        let entry = Entry::new(
            PathBuf::from("/nowhere/link"),
            PathBuf::from("link"),
            stat(FileKind::Symlink, 0),
            Some(PathBuf::from("target")),
            HeaderStyle::Simple,
        );
        assert_eq!(entry.stat().size, "target".len() as u64);
        assert_eq!(entry.content_len(), 0);
        assert_eq!(entry.blocked_size(), entry.header_size());
        assert_eq!(entry.blocked_size(), 512);

        // Never touches the filesystem.
        let mut buf = vec![0u8; 512];
        assert_eq!(entry.serve(&mut buf, 0, "s01.tar").unwrap(), 512);
        assert_eq!(buf[156], b'2');
        assert_eq!(&buf[157..163], b"target");
    }

    #[test]
    fn hard_link_occupies_one_block() {
        let (_tmp, mut entry) = disk_entry(&[7u8; 5000]);
        assert_eq!(entry.blocked_size(), 512 + 5120);
        entry.rewrite_into_hard_link(PathBuf::from("a/original"));
        assert!(entry.is_hard_link());
        assert_eq!(entry.blocked_size(), BLOCK_SIZE);
        assert_eq!(entry.content_len(), 0);
    }

    #[test]
    fn long_hard_link_text_keeps_its_extension_blocks() {
        let (_tmp, mut entry) = disk_entry(&[7u8; 100]);
        let target = PathBuf::from("t/".repeat(100));
        entry.rewrite_into_hard_link(target);
        assert_eq!(entry.header_size(), 3 * 512);
        assert_eq!(entry.blocked_size(), entry.header_size());
        assert_eq!(entry.render_header().len() as u64, entry.header_size());
        assert_eq!(entry.content_len(), 0);
    }

    #[test]
    fn long_path_grows_header_by_extension_blocks() {
        let long = PathBuf::from("d/".repeat(60) + "file");
        let entry = Entry::new(PathBuf::new(), long, stat(FileKind::Regular, 0), None, HeaderStyle::Simple);
        assert_eq!(header::extension_blocks(entry.stored_name().len()), 2);
        assert_eq!(entry.header_size(), 3 * 512);
        assert_eq!(entry.blocked_size(), 3 * 512);
    }

    #[test]
    fn virtual_content_is_served_from_memory() {
        let bytes: Arc<[u8]> = Arc::from(&b"catalog bytes"[..]);
        let entry = Entry::new_virtual(
            PathBuf::from("index"),
            stat(FileKind::Regular, 13),
            bytes,
            HeaderStyle::None,
        )
        .unwrap();
        assert_eq!(entry.header_size(), 0);
        assert_eq!(entry.blocked_size(), 512);
        let mut buf = vec![1u8; 600];
        assert_eq!(entry.serve(&mut buf, 0, "r01").unwrap(), 512);
        assert_eq!(&buf[..13], b"catalog bytes");
        assert!(buf[13..512].iter().all(|&b| b == 0));
    }

    #[test]
    fn virtual_size_must_match_buffer() {
        let bytes: Arc<[u8]> = Arc::from(&b"abc"[..]);
        let err = Entry::new_virtual(PathBuf::from("x"), stat(FileKind::Regular, 4), bytes, HeaderStyle::Simple);
        assert!(matches!(err, Err(ShardError::VirtualSizeMismatch { declared: 4, actual: 3, .. })));
    }

    #[test]
    fn unreadable_source_is_an_error_not_zeroes() {
        let entry = Entry::new(
            PathBuf::from("/definitely/not/here"),
            PathBuf::from("gone"),
            stat(FileKind::Regular, 10),
            None,
            HeaderStyle::Simple,
        );
        let mut buf = vec![0u8; 1024];
        // The header alone is still producible.
        assert_eq!(entry.serve(&mut buf[..512], 0, "s01.tar").unwrap(), 512);
        let err = entry.serve(&mut buf, 0, "s01.tar").unwrap_err();
        assert!(matches!(err, ShardError::UnreadableSource { ref shard, offset: 0, .. } if shard == "s01.tar"));
    }

    #[test]
    fn shrunken_file_is_a_short_read() {
        let (tmp, entry) = disk_entry(&[1u8; 100]);
        std::fs::write(tmp.path(), [1u8; 40]).unwrap();
        let mut buf = vec![0u8; 1024];
        let err = entry.serve(&mut buf, 0, "s01.tar").unwrap_err();
        assert!(matches!(err, ShardError::ShortRead { expected: 100, got: 40, .. }));
    }

    #[test]
    fn identical_identity_gives_identical_fingerprint() {
        // Different files on disk, same tarpath/size/mtime: the fingerprint
        // cannot tell them apart.
        let (_a, first) = disk_entry(b"AAAA");
        let (_b, second) = disk_entry(b"BBBB");
        assert_ne!(first.abspath(), second.abspath());
        assert_eq!(first.fingerprint(), second.fingerprint());
    }

    #[test]
    fn moving_the_tarpath_resets_the_fingerprint() {
        let mut entry = Entry::new(
            PathBuf::new(),
            PathBuf::from("a/b/c"),
            stat(FileKind::Regular, 0),
            None,
            HeaderStyle::Simple,
        );
        let before = *entry.fingerprint();
        entry.calculate_tarpath(Path::new("a")).unwrap();
        assert_eq!(entry.tarpath(), Path::new("b/c"));
        assert_ne!(before, *entry.fingerprint());
        assert!(entry.calculate_tarpath(Path::new("x")).is_err());
    }
}
