//! Common types shared by every layer of the engine.
// Stat records, timestamps, block arithmetic.

use serde::{Deserialize, Serialize};

/// Size of one tar block. Every header and every padded content region is a
/// multiple of this.
pub const BLOCK_SIZE: u64 = 512;

/// Rounds `size` up to the next multiple of [`BLOCK_SIZE`].
pub fn round_up_to_block(size: u64) -> u64 {
    match size % BLOCK_SIZE {
        0 => size,
        rem => size + BLOCK_SIZE - rem,
    }
}

/// The type of a filesystem object, as far as tar cares.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
}

impl FileKind {
    pub fn is_device(self) -> bool {
        matches!(self, FileKind::CharDevice | FileKind::BlockDevice)
    }
}

/// Seconds and nanoseconds since the epoch.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: i64,
}

impl Timespec {
    pub fn new(sec: i64, nsec: i64) -> Self {
        Self { sec, nsec }
    }
}

/// The stat record of one filesystem object.
///
/// `mode` holds permission bits only (including setuid/setgid/sticky); the
/// object type lives in `kind`. `dev`, `ino` and `nlink` are only used to
/// discover hard links during the walk and are never written into a shard.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub kind: FileKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub mtime: Timespec,
    pub atime: Timespec,
    pub ctime: Timespec,
    pub rdev_major: u32,
    pub rdev_minor: u32,
    #[serde(default)]
    pub dev: u64,
    #[serde(default)]
    pub ino: u64,
    #[serde(default)]
    pub nlink: u64,
}

impl FileStat {
    /// A plain stat record for an object that does not exist on disk.
    pub fn synthetic(kind: FileKind, mode: u32, size: u64, mtime: Timespec) -> Self {
        Self {
            kind,
            mode: mode & 0o7777,
            uid: 0,
            gid: 0,
            size,
            mtime,
            atime: mtime,
            ctime: mtime,
            rdev_major: 0,
            rdev_minor: 0,
            dev: 0,
            ino: 0,
            nlink: 1,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    pub fn is_regular(&self) -> bool {
        self.kind == FileKind::Regular
    }

    pub fn is_symlink(&self) -> bool {
        self.kind == FileKind::Symlink
    }
}
