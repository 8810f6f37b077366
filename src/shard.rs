//! Shards: independently producible tar streams.
//!
//! Every storage root owns a handful of shards, named by a one-letter class
//! tag and a discriminator:
//!
//! | class        | tag | name           | holds                                    |
//! |--------------|-----|----------------|------------------------------------------|
//! | small        | `s` | `s01.tar`      | small files, links, devices, fifos       |
//! | medium       | `m` | `m01.tar`      | files between the small and large limits |
//! | large        | `l` | `l3fa9c012.tar`| exactly one large file (hash of tarpath) |
//! | directory    | `z` | `z01.tar`      | directory entries                        |
//! | single-file  | `r` | `r01`          | one virtual file, raw bytes              |

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::common::BLOCK_SIZE;
use crate::entry::EntryId;
use crate::header::HeaderStyle;

/// Index of a shard in its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShardId(pub(crate) usize);

impl ShardId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardKind {
    Small,
    Medium,
    Large,
    Directory,
    SingleFile,
}

impl ShardKind {
    pub fn tag(self) -> char {
        match self {
            ShardKind::Small => 's',
            ShardKind::Medium => 'm',
            ShardKind::Large => 'l',
            ShardKind::Directory => 'z',
            ShardKind::SingleFile => 'r',
        }
    }
}

/// A named, bounded group of entries forming one tar stream.
#[derive(Debug, Clone)]
pub struct Shard {
    kind: ShardKind,
    discriminator: u32,
    root: EntryId,
    root_path: PathBuf,
    style: HeaderStyle,
    pub(crate) entries: Vec<EntryId>,
    pub(crate) content_size: u64,
}

impl Shard {
    pub(crate) fn new(kind: ShardKind, discriminator: u32, root: EntryId, root_path: PathBuf, style: HeaderStyle) -> Self {
        Self {
            kind,
            discriminator,
            root,
            root_path,
            style,
            entries: Vec::new(),
            content_size: 0,
        }
    }

    pub fn kind(&self) -> ShardKind {
        self.kind
    }

    pub fn discriminator(&self) -> u32 {
        self.discriminator
    }

    /// The storage root this shard belongs to.
    pub fn root(&self) -> EntryId {
        self.root
    }

    /// Tree path of the storage root. Tarpaths inside the shard are relative to it.
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn entries(&self) -> &[EntryId] {
        &self.entries
    }

    pub fn is_tar(&self) -> bool {
        self.style != HeaderStyle::None
    }

    /// Name of the shard within its storage root.
    pub fn name(&self) -> String {
        let ext = if self.is_tar() { ".tar" } else { "" };
        match self.kind {
            ShardKind::Large => format!("l{:08x}{}", self.discriminator, ext),
            kind => format!("{}{:02}{}", kind.tag(), self.discriminator, ext),
        }
    }

    /// Name including the storage root path, unique within a tree.
    pub fn qualified_name(&self) -> String {
        self.root_path.join(self.name()).to_string_lossy().into_owned()
    }

    /// Sum of the blocked sizes of the shard's entries.
    pub fn content_size(&self) -> u64 {
        self.content_size
    }

    /// The two zero blocks that end a tar archive.
    pub fn trailer_size(&self) -> u64 {
        if self.is_tar() {
            2 * BLOCK_SIZE
        } else {
            0
        }
    }

    /// Total bytes the shard produces.
    pub fn stream_size(&self) -> u64 {
        self.content_size + self.trailer_size()
    }

    pub(crate) fn push(&mut self, id: EntryId, blocked_size: u64) {
        self.entries.push(id);
        self.content_size += blocked_size;
    }

    pub(crate) fn remove(&mut self, id: EntryId, blocked_size: u64) {
        self.entries.retain(|e| *e != id);
        self.content_size -= blocked_size;
    }
}
