//! # Catalog Codec
//!
//! Each storage root gets a catalog describing every entry stored in its
//! shards. A catalog is a sequence of records; fields are separated by NUL
//! and every record ends with `\n` followed by a NUL:
//!
//! ```text
//! -rw-r--r--\01000/1000\0745\02017-07-14 04:40.00\0001500000000.000000000\0...\0<hex>\n\0
//! ```
//!
//! The fields, in order: permission string, `uid/gid`, size (or
//! `major,minor` for devices), local date/time, mtime, atime, ctime,
//! tarpath, link, shard name, content offset, content hash (always `0`) and
//! the fingerprint as 64 hex digits.

use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, Local};

use crate::archive::Archive;
use crate::common::{FileKind, Timespec};
use crate::entry::{Entry, EntryId, Link};
use crate::error::{Result, ShardError};
use crate::fingerprint::{self, Fingerprint};
use crate::fsx;
use crate::header;

pub const SEPARATOR: u8 = 0;

/// Name of the catalog file written next to a storage root's shards.
pub const CATALOG_NAME: &str = "tarshard.idx";

const FIELD_COUNT: usize = 13;

const FIELD_NAMES: [&str; FIELD_COUNT] = [
    "permissions",
    "uid/gid",
    "size",
    "datetime",
    "mtime",
    "atime",
    "ctime",
    "tarpath",
    "link",
    "shard",
    "offset",
    "content hash",
    "fingerprint",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogLink {
    None,
    Symlink(PathBuf),
    Hard(PathBuf),
}

/// One decoded catalog record. The human-readable date is derived from
/// `mtime` and not stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRecord {
    pub kind: FileKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub rdev_major: u32,
    pub rdev_minor: u32,
    pub mtime: Timespec,
    pub atime: Timespec,
    pub ctime: Timespec,
    pub tarpath: PathBuf,
    pub link: CatalogLink,
    pub shard: String,
    pub offset: u64,
    pub content_hash: String,
    pub fingerprint: Fingerprint,
}

impl CatalogRecord {
    /// Describes `entry`, stored in the shard named `shard`.
    pub fn from_entry(entry: &Entry, shard: &str) -> Self {
        let st = entry.stat();
        let link = match entry.link() {
            Link::None => CatalogLink::None,
            Link::Symlink(dest) => CatalogLink::Symlink(dest.clone()),
            Link::Hard { text, .. } => CatalogLink::Hard(text.clone()),
        };
        CatalogRecord {
            kind: st.kind,
            mode: st.mode,
            uid: st.uid,
            gid: st.gid,
            size: if st.kind.is_device() { 0 } else { st.size },
            rdev_major: st.rdev_major,
            rdev_minor: st.rdev_minor,
            mtime: st.mtime,
            atime: st.atime,
            ctime: st.ctime,
            tarpath: entry.tarpath().to_path_buf(),
            link,
            shard: shard.to_string(),
            offset: entry.offset() + entry.header_size(),
            content_hash: "0".to_string(),
            fingerprint: *entry.fingerprint(),
        }
    }

    fn size_field(&self) -> String {
        if self.kind.is_device() {
            format!("{},{}", self.rdev_major, self.rdev_minor)
        } else {
            self.size.to_string()
        }
    }

    fn stored_name(&self) -> Vec<u8> {
        header::stored_name(&fsx::path_bytes(&self.tarpath), self.kind)
    }

    fn link_field(&self) -> Vec<u8> {
        let (prefix, target) = match &self.link {
            CatalogLink::None => return Vec::new(),
            CatalogLink::Symlink(t) => (&b" -> "[..], t),
            CatalogLink::Hard(t) => (&b" link to "[..], t),
        };
        let mut out = prefix.to_vec();
        out.extend_from_slice(&fsx::path_bytes(target));
        out
    }

    /// Appends the encoded record to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        let mut push = |field: &[u8]| {
            out.extend_from_slice(field);
            out.push(SEPARATOR);
        };
        push(permission_string(self.kind, self.mode).as_bytes());
        push(format!("{}/{}", self.uid, self.gid).as_bytes());
        push(self.size_field().as_bytes());
        push(format_datetime(self.mtime).as_bytes());
        push(format_timespec(self.mtime).as_bytes());
        push(format_timespec(self.atime).as_bytes());
        push(format_timespec(self.ctime).as_bytes());
        push(&self.stored_name());
        push(&self.link_field());
        push(self.shard.as_bytes());
        push(self.offset.to_string().as_bytes());
        push(self.content_hash.as_bytes());
        let mut last = fingerprint::to_hex(&self.fingerprint).into_bytes();
        last.push(b'\n');
        push(&last);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    /// Decodes a single record, including its trailing separator.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut records = parse_catalog(bytes)?.records;
        match (records.pop(), records.is_empty()) {
            (Some(r), true) => Ok(r),
            _ => Err(ShardError::Catalog {
                record: 0,
                field: FIELD_NAMES[0],
                reason: "expected exactly one record".into(),
            }),
        }
    }

    fn decode_fields(fields: &[&[u8]], record: usize) -> Result<Self> {
        let text = |i: usize| field_str(fields, record, i);

        let (kind, mode) = parse_permission(text(0)?).ok_or_else(|| bad(record, 0, "unknown permission string"))?;

        let (uid, gid) = text(1)?
            .split_once('/')
            .and_then(|(u, g)| Some((u.parse::<u32>().ok()?, g.parse::<u32>().ok()?)))
            .ok_or_else(|| bad(record, 1, "expected uid/gid"))?;

        let (size, rdev_major, rdev_minor) = if kind.is_device() {
            let (maj, min) = text(2)?
                .split_once(',')
                .and_then(|(a, b)| Some((a.parse::<u32>().ok()?, b.parse::<u32>().ok()?)))
                .ok_or_else(|| bad(record, 2, "expected major,minor"))?;
            (0, maj, min)
        } else {
            let size = text(2)?.parse::<u64>().map_err(|_| bad(record, 2, "expected a number"))?;
            (size, 0, 0)
        };

        if fields[3].is_empty() {
            return Err(bad(record, 3, "empty"));
        }
        let mtime = parse_timespec(text(4)?).ok_or_else(|| bad(record, 4, "expected seconds.nanoseconds"))?;
        let atime = parse_timespec(text(5)?).ok_or_else(|| bad(record, 5, "expected seconds.nanoseconds"))?;
        let ctime = parse_timespec(text(6)?).ok_or_else(|| bad(record, 6, "expected seconds.nanoseconds"))?;

        let name = fields[7].strip_suffix(b"/").unwrap_or(fields[7]);
        if name.is_empty() {
            return Err(bad(record, 7, "empty"));
        }
        let tarpath = fsx::path_from_bytes(name);

        let link = parse_link(fields[8]).ok_or_else(|| bad(record, 8, "expected ' -> target' or ' link to target'"))?;

        let shard = text(9)?.to_string();
        if shard.is_empty() {
            return Err(bad(record, 9, "empty"));
        }
        let offset = text(10)?.parse::<u64>().map_err(|_| bad(record, 10, "expected a number"))?;
        let content_hash = text(11)?.to_string();
        if content_hash.is_empty() {
            return Err(bad(record, 11, "empty"));
        }

        let hex = text(12)?
            .strip_suffix('\n')
            .ok_or_else(|| bad(record, 12, "record not terminated by a newline"))?;
        let fingerprint = fingerprint::from_hex(hex).ok_or_else(|| bad(record, 12, "expected 64 hex digits"))?;

        Ok(CatalogRecord {
            kind,
            mode,
            uid,
            gid,
            size,
            rdev_major,
            rdev_minor,
            mtime,
            atime,
            ctime,
            tarpath,
            link,
            shard,
            offset,
            content_hash,
            fingerprint,
        })
    }

    /// One `tar tv` style line.
    pub fn listing_line(&self) -> String {
        let mut line = format!(
            "{} {}/{} {:>10} {} {}",
            permission_string(self.kind, self.mode),
            self.uid,
            self.gid,
            self.size_field(),
            format_datetime(self.mtime),
            String::from_utf8_lossy(&self.stored_name()),
        );
        match &self.link {
            CatalogLink::None => {}
            CatalogLink::Symlink(t) => {
                let _ = write!(line, " -> {}", t.display());
            }
            CatalogLink::Hard(t) => {
                let _ = write!(line, " link to {}", t.display());
            }
        }
        line
    }
}

fn bad(record: usize, field: usize, reason: &str) -> ShardError {
    ShardError::Catalog {
        record,
        field: FIELD_NAMES[field],
        reason: reason.to_string(),
    }
}

fn field_str<'a>(fields: &[&'a [u8]], record: usize, i: usize) -> Result<&'a str> {
    std::str::from_utf8(fields[i]).map_err(|_| bad(record, i, "not valid UTF-8"))
}

fn parse_link(field: &[u8]) -> Option<CatalogLink> {
    if field.is_empty() {
        return Some(CatalogLink::None);
    }
    if let Some(t) = field.strip_prefix(b" -> ").filter(|t| !t.is_empty()) {
        return Some(CatalogLink::Symlink(fsx::path_from_bytes(t)));
    }
    if let Some(t) = field.strip_prefix(b" link to ").filter(|t| !t.is_empty()) {
        return Some(CatalogLink::Hard(fsx::path_from_bytes(t)));
    }
    None
}

/// `%012d.%09d`
pub fn format_timespec(ts: Timespec) -> String {
    format!("{:012}.{:09}", ts.sec, ts.nsec)
}

pub fn parse_timespec(s: &str) -> Option<Timespec> {
    let (sec, nsec) = s.split_once('.')?;
    let nsec: i64 = nsec.parse().ok()?;
    if !(0..1_000_000_000).contains(&nsec) {
        return None;
    }
    Some(Timespec::new(sec.parse().ok()?, nsec))
}

/// `%Y-%m-%d %H:%M.%S` in local time.
pub fn format_datetime(ts: Timespec) -> String {
    match DateTime::from_timestamp(ts.sec, 0) {
        Some(utc) => utc.with_timezone(&Local).format("%Y-%m-%d %H:%M.%S").to_string(),
        None => "????-??-?? ??:??.??".to_string(),
    }
}

/// `ls -l` style permission string, e.g. `drwxr-xr-x` or `-rwsr-x--T`.
pub fn permission_string(kind: FileKind, mode: u32) -> String {
    let type_char = match kind {
        FileKind::Regular => '-',
        FileKind::Directory => 'd',
        FileKind::Symlink => 'l',
        FileKind::CharDevice => 'c',
        FileKind::BlockDevice => 'b',
        FileKind::Fifo => 'p',
        FileKind::Socket => 's',
    };
    let mut s = String::with_capacity(10);
    s.push(type_char);
    let special = [(0o4000, 's', 'S'), (0o2000, 's', 'S'), (0o1000, 't', 'T')];
    for (i, (bit, on, off)) in special.iter().enumerate() {
        let shift = 6 - 3 * i as u32;
        let rwx = (mode >> shift) & 0o7;
        s.push(if rwx & 0o4 != 0 { 'r' } else { '-' });
        s.push(if rwx & 0o2 != 0 { 'w' } else { '-' });
        let x = rwx & 0o1 != 0;
        s.push(match (mode & bit != 0, x) {
            (true, true) => *on,
            (true, false) => *off,
            (false, true) => 'x',
            (false, false) => '-',
        });
    }
    s
}

/// Inverse of [`permission_string`].
pub fn parse_permission(s: &str) -> Option<(FileKind, u32)> {
    let b = s.as_bytes();
    if b.len() != 10 {
        return None;
    }
    let kind = match b[0] {
        b'-' => FileKind::Regular,
        b'd' => FileKind::Directory,
        b'l' => FileKind::Symlink,
        b'c' => FileKind::CharDevice,
        b'b' => FileKind::BlockDevice,
        b'p' => FileKind::Fifo,
        b's' => FileKind::Socket,
        _ => return None,
    };
    let special = [(0o4000u32, b's', b'S'), (0o2000, b's', b'S'), (0o1000, b't', b'T')];
    let mut mode = 0u32;
    for (i, (bit, on, off)) in special.iter().enumerate() {
        let shift = 6 - 3 * i as u32;
        let chunk = &b[1 + 3 * i..4 + 3 * i];
        match chunk[0] {
            b'r' => mode |= 0o4 << shift,
            b'-' => {}
            _ => return None,
        }
        match chunk[1] {
            b'w' => mode |= 0o2 << shift,
            b'-' => {}
            _ => return None,
        }
        match chunk[2] {
            b'x' => mode |= 0o1 << shift,
            c if c == *on => mode |= bit | (0o1 << shift),
            c if c == *off => mode |= bit,
            b'-' => {}
            _ => return None,
        }
    }
    Some((kind, mode))
}

/// The catalog of one storage root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    pub records: Vec<CatalogRecord>,
}

impl Catalog {
    /// Collects every entry stored in a shard of `root`, sorted by tarpath.
    pub fn for_root(archive: &Archive, root: EntryId) -> Self {
        let mut records: Vec<CatalogRecord> = archive
            .shards_of(root)
            .into_iter()
            .flat_map(|sid| {
                let shard = archive.shard(sid);
                let name = shard.name();
                shard
                    .entries()
                    .iter()
                    .map(move |id| CatalogRecord::from_entry(archive.entry(*id), &name))
                    .collect::<Vec<_>>()
            })
            .collect();
        records.sort_by(|a, b| a.tarpath.cmp(&b.tarpath));
        Catalog { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for r in &self.records {
            r.encode_into(&mut out);
        }
        out
    }

    pub fn to_listing(&self) -> String {
        let mut out = String::new();
        for r in &self.records {
            out.push_str(&r.listing_line());
            out.push('\n');
        }
        out
    }
}

/// Decodes a whole catalog buffer.
pub fn parse_catalog(bytes: &[u8]) -> Result<Catalog> {
    let tokens: Vec<&[u8]> = bytes.split(|b| *b == SEPARATOR).collect();
    // Every record ends with a separator, so the final token is always empty.
    let (last, body) = match tokens.split_last() {
        Some(parts) => parts,
        None => return Ok(Catalog::default()),
    };
    if !last.is_empty() {
        return Err(bad(body.len() / FIELD_COUNT, body.len() % FIELD_COUNT, "truncated record"));
    }
    if body.len() % FIELD_COUNT != 0 {
        return Err(bad(body.len() / FIELD_COUNT, body.len() % FIELD_COUNT, "missing"));
    }
    let records = body
        .chunks(FIELD_COUNT)
        .enumerate()
        .map(|(i, fields)| CatalogRecord::decode_fields(fields, i))
        .collect::<Result<Vec<_>>>()?;
    Ok(Catalog { records })
}
