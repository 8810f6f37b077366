//! # Sealed Archive
//!
//! The read-only result of [`crate::tree::Tree::seal`]. An [`Archive`] owns
//! every entry and shard and produces shard bytes on demand: any byte range
//! of any shard can be requested, from any number of threads, and the same
//! range always yields the same bytes as long as the source files are
//! unchanged.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::entry::{Entry, EntryId};
use crate::error::{Result, ShardError};
use crate::shard::{Shard, ShardId, ShardKind};

/// Size of the buffer used when streaming whole shards.
const BUF_SZ: usize = 1 << 20; // 1 MiB

/// One line of a shard plan.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ShardSummary {
    pub name: String,
    pub kind: ShardKind,
    pub entries: usize,
    pub content_size: u64,
    pub stream_size: u64,
}

/// An immutable, fully laid out set of shards.
#[derive(Debug)]
pub struct Archive {
    origin: PathBuf,
    entries: Vec<Entry>,
    shards: Vec<Shard>,
    by_path: HashMap<PathBuf, EntryId>,
    by_name: HashMap<String, ShardId>,
}

impl Archive {
    pub(crate) fn new(
        origin: PathBuf,
        entries: Vec<Entry>,
        shards: Vec<Shard>,
        by_path: HashMap<PathBuf, EntryId>,
    ) -> Self {
        let by_name = shards
            .iter()
            .enumerate()
            .map(|(i, s)| (s.qualified_name(), ShardId(i)))
            .collect();
        Self {
            origin,
            entries,
            shards,
            by_path,
            by_name,
        }
    }

    /// Absolute path of the scanned directory.
    pub fn origin(&self) -> &Path {
        &self.origin
    }

    pub fn root(&self) -> EntryId {
        EntryId(0)
    }

    pub fn entry(&self, id: EntryId) -> &Entry {
        &self.entries[id.0]
    }

    pub fn entries(&self) -> impl Iterator<Item = (EntryId, &Entry)> {
        self.entries.iter().enumerate().map(|(i, e)| (EntryId(i), e))
    }

    pub fn shard(&self, id: ShardId) -> &Shard {
        &self.shards[id.0]
    }

    pub fn shards(&self) -> impl Iterator<Item = (ShardId, &Shard)> {
        self.shards.iter().enumerate().map(|(i, s)| (ShardId(i), s))
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Looks an entry up by its path relative to the origin.
    pub fn find_entry(&self, path: &Path) -> Option<EntryId> {
        self.by_path.get(path).copied()
    }

    /// Looks a shard up by its qualified name, e.g. `home/user/s01.tar`.
    pub fn find_shard(&self, name: &str) -> Result<ShardId> {
        self.by_name
            .get(name.trim_start_matches('/'))
            .copied()
            .ok_or_else(|| ShardError::UnknownShard(name.to_string()))
    }

    /// All storage roots, origin first, in tree order.
    pub fn storage_roots(&self) -> Vec<EntryId> {
        self.entries()
            .filter(|(_, e)| e.is_storage_root())
            .map(|(id, _)| id)
            .collect()
    }

    /// Shards belonging to the storage root `root`, in name order.
    pub fn shards_of(&self, root: EntryId) -> Vec<ShardId> {
        let mut ids: Vec<ShardId> = self
            .shards()
            .filter(|(_, s)| s.root() == root)
            .map(|(id, _)| id)
            .collect();
        ids.sort_by_key(|id| self.shards[id.0].name());
        ids
    }

    /// Sum of all shard stream sizes.
    pub fn total_size(&self) -> u64 {
        self.shards.iter().map(Shard::stream_size).sum()
    }

    /// Copies shard bytes starting at `offset` into `buf`. Returns the
    /// number of bytes produced, which is short only at the end of the
    /// shard.
    pub fn read_at(&self, shard: ShardId, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let s = &self.shards[shard.0];
        let total = s.stream_size();
        if offset >= total || buf.is_empty() {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(total - offset) as usize;
        let name = s.qualified_name();
        let ids = s.entries();

        // First entry whose region ends after `offset`.
        let mut idx = ids.partition_point(|id| {
            let e = &self.entries[id.0];
            e.offset() + e.blocked_size() <= offset
        });
        let mut pos = offset;
        let mut done = 0usize;
        while done < want && idx < ids.len() {
            let e = &self.entries[ids[idx].0];
            done += e.serve(&mut buf[done..want], pos - e.offset(), &name)?;
            pos = offset + done as u64;
            idx += 1;
        }

        // End-of-archive blocks.
        buf[done..want].fill(0);
        Ok(want)
    }

    /// Streams a whole shard into `out`. Returns the number of bytes written.
    pub fn write_shard<W: Write>(&self, shard: ShardId, out: &mut W) -> Result<u64> {
        let s = &self.shards[shard.0];
        let mut buf = vec![0u8; BUF_SZ];
        let mut offset = 0u64;
        loop {
            let n = self.read_at(shard, offset, &mut buf)?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n])?;
            offset += n as u64;
        }
        debug!("wrote {} ({} bytes)", s.qualified_name(), offset);
        if offset != s.stream_size() {
            return Err(ShardError::InvalidTree(format!(
                "shard {} produced {} bytes, expected {}",
                s.qualified_name(),
                offset,
                s.stream_size()
            )));
        }
        Ok(offset)
    }

    /// One summary per shard, grouped by storage root.
    pub fn plan(&self) -> Vec<ShardSummary> {
        let plan: Vec<ShardSummary> = self
            .storage_roots()
            .into_iter()
            .flat_map(|root| self.shards_of(root))
            .map(|sid| {
                let s = &self.shards[sid.0];
                ShardSummary {
                    name: s.qualified_name(),
                    kind: s.kind(),
                    entries: s.entries().len(),
                    content_size: s.content_size(),
                    stream_size: s.stream_size(),
                }
            })
            .collect();
        info!("{} shards, {} bytes in total", plan.len(), self.total_size());
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{FileKind, FileStat, Timespec};
    use crate::config::ShardPolicy;
    use crate::tree::Tree;
    use std::fs;
    use tempfile::tempdir;

    fn sealed(dir: &Path, files: &[(&str, usize)]) -> Archive {
        let st = FileStat::synthetic(FileKind::Directory, 0o755, 0, Timespec::new(1, 0));
        let mut t = Tree::new(dir.to_path_buf(), st, ShardPolicy::default());
        for (name, len) in files {
            let content: Vec<u8> = (0..*len).map(|i| (i % 200) as u8 + 1).collect();
            fs::write(dir.join(name), &content).unwrap();
            let fst = FileStat::synthetic(FileKind::Regular, 0o644, *len as u64, Timespec::new(2, 0));
            t.add(PathBuf::from(name), fst, None).unwrap();
        }
        t.seal().unwrap()
    }

    #[test]
    fn shard_ends_with_two_zero_blocks() {
        let dir = tempdir().unwrap();
        let a = sealed(dir.path(), &[("a", 10), ("b", 600)]);
        let sid = a.find_shard("s01.tar").unwrap();
        assert_eq!(a.shard(sid).stream_size(), 1024 + 1536 + 1024);

        let mut out = Vec::new();
        assert_eq!(a.write_shard(sid, &mut out).unwrap(), out.len() as u64);
        assert_eq!(out.len(), 3584);
        assert!(out[2560..].iter().all(|&b| b == 0));
        assert_eq!(&out[512..522], &(0..10).map(|i| i as u8 + 1).collect::<Vec<_>>()[..]);
    }

    #[test]
    fn ranges_agree_with_the_full_stream() {
        let dir = tempdir().unwrap();
        let a = sealed(dir.path(), &[("a", 10), ("b", 600), ("c", 1)]);
        let sid = a.find_shard("s01.tar").unwrap();
        let mut whole = Vec::new();
        a.write_shard(sid, &mut whole).unwrap();

        for (off, len) in [(0usize, 1usize), (100, 900), (511, 2), (1023, 1030), (3000, 5000)] {
            let mut buf = vec![0xEEu8; len];
            let n = a.read_at(sid, off as u64, &mut buf).unwrap();
            let end = (off + len).min(whole.len());
            assert_eq!(n, end - off);
            assert_eq!(&buf[..n], &whole[off..end]);
        }
        let mut buf = [0u8; 4];
        assert_eq!(a.read_at(sid, whole.len() as u64, &mut buf).unwrap(), 0);
    }

    #[test]
    fn plan_lists_every_shard() {
        let dir = tempdir().unwrap();
        let a = sealed(dir.path(), &[("a", 1), ("b", 2 * 1024 * 1024)]);
        let plan = a.plan();
        let names: Vec<&str> = plan.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["m01.tar", "s01.tar"]);
        assert_eq!(plan[1].entries, 1);
        assert_eq!(plan[1].stream_size, 1024 + 1024);
        let json = serde_json::to_string(&plan[0]).unwrap();
        assert!(json.contains(r#""kind":"medium""#));
    }

    #[test]
    fn unknown_shard_names_are_errors() {
        let dir = tempdir().unwrap();
        let a = sealed(dir.path(), &[("a", 1)]);
        assert!(matches!(a.find_shard("s09.tar"), Err(ShardError::UnknownShard(_))));
        assert!(a.find_shard("/s01.tar").is_ok());
    }

    #[test]
    fn vanished_file_fails_the_read() {
        let dir = tempdir().unwrap();
        let a = sealed(dir.path(), &[("a", 100)]);
        fs::remove_file(dir.path().join("a")).unwrap();
        let sid = a.find_shard("s01.tar").unwrap();
        let mut out = Vec::new();
        let err = a.write_shard(sid, &mut out).unwrap_err();
        assert!(matches!(err, ShardError::UnreadableSource { .. }));
    }
}
