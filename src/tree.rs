//! # Entry Tree
//!
//! The mutable build phase. Entries are added parent-first into an arena,
//! then [`Tree::seal`] decides the storage roots, groups entries into shards,
//! resolves hard links and freezes the layout into an [`Archive`].
//!
//! Sealing runs in four passes:
//!
//! 1. storage roots: a reverse pre-order sweep accumulates subtree sizes and
//!    marks every directory whose subtree reaches the trigger size,
//! 2. shard assignment: each entry goes to a shard of its nearest storage
//!    root, by type and size,
//! 3. hard links: link text is made relative to the root, promoting links
//!    that point outside their root,
//! 4. layout: entries are sorted by tarpath and given their offsets.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::archive::Archive;
use crate::common::{FileKind, FileStat, Timespec};
use crate::config::ShardPolicy;
use crate::entry::{Entry, EntryId, Link};
use crate::error::{Result, ShardError};
use crate::fingerprint;
use crate::fsx;
use crate::hardlink::{fix_hard_link, HardLinkFix};
use crate::header::HeaderStyle;
use crate::shard::{Shard, ShardId, ShardKind};

/// Arena of entries under construction.
#[derive(Debug)]
pub struct Tree {
    origin: PathBuf,
    policy: ShardPolicy,
    entries: Vec<Entry>,
    shards: Vec<Shard>,
    by_path: HashMap<PathBuf, EntryId>,

    /// Shard currently being filled, per storage root and class.
    open: HashMap<(EntryId, ShardKind), ShardId>,
    /// Discriminators handed out so far, per storage root and class.
    issued: HashMap<(EntryId, ShardKind), u32>,
    /// Large-shard discriminators taken, per storage root.
    large_taken: HashSet<(EntryId, u32)>,
}

impl Tree {
    /// Starts a tree for the directory at `origin`. The origin itself is the
    /// root entry, with an empty tree path.
    pub fn new(origin: PathBuf, root_stat: FileStat, policy: ShardPolicy) -> Self {
        let root = Entry::new(origin.clone(), PathBuf::new(), root_stat, None, policy.header_style);
        let mut by_path = HashMap::new();
        by_path.insert(PathBuf::new(), EntryId(0));
        Self {
            origin,
            policy,
            entries: vec![root],
            shards: Vec::new(),
            by_path,
            open: HashMap::new(),
            issued: HashMap::new(),
            large_taken: HashSet::new(),
        }
    }

    pub fn origin(&self) -> &Path {
        &self.origin
    }

    pub fn policy(&self) -> &ShardPolicy {
        &self.policy
    }

    pub fn root(&self) -> EntryId {
        EntryId(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn entry(&self, id: EntryId) -> &Entry {
        &self.entries[id.0]
    }

    pub fn shard(&self, id: ShardId) -> &Shard {
        &self.shards[id.0]
    }

    pub fn find(&self, path: &Path) -> Option<EntryId> {
        self.by_path.get(path).copied()
    }

    /// Adds the object at `path` (relative to the origin). Its parent
    /// directory must have been added first.
    pub fn add(&mut self, path: PathBuf, stat: FileStat, symlink: Option<PathBuf>) -> Result<EntryId> {
        let abspath = self.origin.join(&path);
        let entry = Entry::new(abspath, path, stat, symlink, self.policy.header_style);
        self.insert(entry)
    }

    /// Adds a regular file whose content is `bytes`. It is stored as a raw
    /// single-file shard of its own.
    pub fn add_virtual(&mut self, path: PathBuf, bytes: Arc<[u8]>, mtime: Timespec) -> Result<EntryId> {
        let stat = FileStat::synthetic(FileKind::Regular, 0o644, bytes.len() as u64, mtime);
        let entry = Entry::new_virtual(path, stat, bytes, HeaderStyle::None)?;
        self.insert(entry)
    }

    fn insert(&mut self, mut entry: Entry) -> Result<EntryId> {
        let path = entry.path().to_path_buf();
        if path.as_os_str().is_empty() || self.by_path.contains_key(&path) {
            return Err(ShardError::InvalidTree(format!("duplicate entry '{}'", path.display())));
        }
        let parent_path = path.parent().unwrap_or_else(|| Path::new(""));
        let parent = self
            .find(parent_path)
            .ok_or_else(|| ShardError::InvalidTree(format!("no parent directory for '{}'", path.display())))?;
        if !self.entries[parent.0].stat().is_dir() {
            return Err(ShardError::InvalidTree(format!(
                "parent of '{}' is not a directory",
                path.display()
            )));
        }

        let id = EntryId(self.entries.len());
        entry.parent = Some(parent);
        self.entries.push(entry);
        self.entries[parent.0].children.push(id);
        self.by_path.insert(path, id);
        Ok(id)
    }

    /// Turns `link` into a hard link to `target`, which must already be in
    /// the tree.
    pub fn make_hard_link(&mut self, link: EntryId, target: EntryId) -> Result<()> {
        if link == target || self.entries[target.0].is_hard_link() {
            return Err(ShardError::InvalidTree(format!(
                "'{}' cannot be a hard link target",
                self.entries[target.0].path().display()
            )));
        }
        let target_path = self.entries[target.0].path().to_path_buf();
        self.entries[link.0].rewrite_into_hard_link(target_path);
        Ok(())
    }

    /// Runs all passes and freezes the result.
    pub fn seal(mut self) -> Result<Archive> {
        self.select_storage_roots();
        self.assign_shards()?;
        self.resolve_hard_links()?;
        self.drop_empty_shards();
        self.layout();
        info!(
            "sealed {} entries into {} shards",
            self.entries.len() - 1,
            self.shards.len()
        );
        Ok(Archive::new(self.origin, self.entries, self.shards, self.by_path))
    }

    fn reset_children_sizes(&mut self) {
        for e in &mut self.entries {
            e.children_size = e.blocked_size();
        }
    }

    /// Reverse pre-order sweep: every child is visited before its parent.
    fn select_storage_roots(&mut self) {
        let trigger = self.policy.storage_trigger_size;
        self.reset_children_sizes();
        for i in (0..self.entries.len()).rev() {
            let children_size = self.entries[i].children_size;
            if i == 0 {
                self.entries[0].storage_root = true;
                continue;
            }
            if self.entries[i].stat().is_dir() && children_size >= trigger {
                debug!(
                    "storage root {} ({} bytes below)",
                    self.entries[i].path().display(),
                    children_size
                );
                self.entries[i].storage_root = true;
                continue;
            }
            if let Some(p) = self.entries[i].parent {
                self.entries[p.0].children_size += children_size;
            }
        }
    }

    /// Nearest storage root strictly above `id`.
    fn owning_root(&self, id: EntryId) -> EntryId {
        let mut cur = self.entries[id.0].parent;
        while let Some(p) = cur {
            if self.entries[p.0].storage_root {
                return p;
            }
            cur = self.entries[p.0].parent;
        }
        EntryId(0)
    }

    fn classify(&self, id: EntryId) -> ShardKind {
        let e = &self.entries[id.0];
        if e.is_virtual() {
            return ShardKind::SingleFile;
        }
        match e.kind() {
            FileKind::Directory => ShardKind::Directory,
            FileKind::Regular if !e.is_hard_link() => {
                let size = e.stat().size;
                if size >= self.policy.large_file_limit {
                    ShardKind::Large
                } else if size >= self.policy.small_file_limit {
                    ShardKind::Medium
                } else {
                    ShardKind::Small
                }
            }
            _ => ShardKind::Small,
        }
    }

    fn assign_shards(&mut self) -> Result<()> {
        let mut per_root: BTreeMap<EntryId, Vec<EntryId>> = BTreeMap::new();
        for i in 1..self.entries.len() {
            let id = EntryId(i);
            let root = self.owning_root(id);
            let root_path = self.entries[root.0].path().to_path_buf();
            self.entries[i].calculate_tarpath(&root_path)?;
            per_root.entry(root).or_default().push(id);
        }

        for (root, mut ids) in per_root {
            ids.sort_by(|a, b| self.entries[a.0].tarpath().cmp(self.entries[b.0].tarpath()));
            for id in ids {
                let kind = self.classify(id);
                self.place(id, kind, root);
            }
        }
        Ok(())
    }

    fn next_discriminator(&mut self, root: EntryId, kind: ShardKind) -> u32 {
        let n = self.issued.entry((root, kind)).or_insert(0);
        *n += 1;
        *n
    }

    fn new_shard(&mut self, kind: ShardKind, discriminator: u32, root: EntryId) -> ShardId {
        let style = match kind {
            ShardKind::SingleFile => HeaderStyle::None,
            _ => self.policy.header_style,
        };
        let root_path = self.entries[root.0].path().to_path_buf();
        let id = ShardId(self.shards.len());
        self.shards.push(Shard::new(kind, discriminator, root, root_path, style));
        id
    }

    /// Puts `id` into a shard of class `kind` belonging to `root`.
    fn place(&mut self, id: EntryId, kind: ShardKind, root: EntryId) {
        let blocked = self.entries[id.0].blocked_size();
        let sid = match kind {
            ShardKind::Large => {
                let tarpath = fsx::path_bytes(self.entries[id.0].tarpath());
                let mut disc = fingerprint::path_hash(&tarpath);
                while !self.large_taken.insert((root, disc)) {
                    disc = disc.wrapping_add(1);
                }
                self.new_shard(kind, disc, root)
            }
            ShardKind::SingleFile => {
                let disc = self.next_discriminator(root, kind);
                self.new_shard(kind, disc, root)
            }
            ShardKind::Small | ShardKind::Medium | ShardKind::Directory => {
                let target = self.policy.target_shard_size;
                match self.open.get(&(root, kind)).copied() {
                    Some(sid)
                        if self.shards[sid.0].content_size() == 0
                            || self.shards[sid.0].content_size() + blocked <= target =>
                    {
                        sid
                    }
                    _ => {
                        let disc = self.next_discriminator(root, kind);
                        let sid = self.new_shard(kind, disc, root);
                        self.open.insert((root, kind), sid);
                        sid
                    }
                }
            }
        };
        self.entries[id.0].shard = Some(sid);
        self.shards[sid.0].push(id, blocked);
    }

    fn resolve_hard_links(&mut self) -> Result<()> {
        let links: Vec<EntryId> = (1..self.entries.len())
            .map(EntryId)
            .filter(|id| self.entries[id.0].is_hard_link())
            .collect();

        for id in links {
            loop {
                let root = self.owning_root(id);
                let root_path = self.entries[root.0].path().to_path_buf();
                match fix_hard_link(&mut self.entries[id.0], &root_path) {
                    HardLinkFix::Resolved => break,
                    HardLinkFix::NeedsPromotion if root != EntryId(0) => {
                        let up = self.owning_root(root);
                        self.promote(id, up)?;
                    }
                    HardLinkFix::NeedsPromotion => {
                        let target = match self.entries[id.0].link() {
                            Link::Hard { target, .. } => target.clone(),
                            _ => PathBuf::new(),
                        };
                        return Err(ShardError::UnresolvedHardLink {
                            path: self.entries[id.0].path().to_path_buf(),
                            target,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Moves `id` from its shard and parent into the small shard of the
    /// storage root `new_root`, recomputing its tarpath.
    pub(crate) fn promote(&mut self, id: EntryId, new_root: EntryId) -> Result<()> {
        debug_assert!(self.entries[new_root.0].storage_root);
        if let Some(sid) = self.entries[id.0].shard.take() {
            let blocked = self.entries[id.0].blocked_size();
            self.shards[sid.0].remove(id, blocked);
        }
        if let Some(old) = self.entries[id.0].parent.take() {
            self.entries[old.0].children.retain(|c| *c != id);
        }
        self.entries[id.0].parent = Some(new_root);
        self.entries[new_root.0].children.push(id);

        let root_path = self.entries[new_root.0].path().to_path_buf();
        self.entries[id.0].calculate_tarpath(&root_path)?;
        self.place(id, ShardKind::Small, new_root);
        info!(
            "promoted hard link {} to storage root '{}'",
            self.entries[id.0].path().display(),
            root_path.display()
        );
        Ok(())
    }

    /// Promotion can leave a shard without entries. Such shards are removed
    /// and the remaining ones renumbered.
    fn drop_empty_shards(&mut self) {
        let old = std::mem::take(&mut self.shards);
        let mut remap = vec![None; old.len()];
        for (i, shard) in old.into_iter().enumerate() {
            if shard.entries().is_empty() {
                debug!("dropping empty shard {}", shard.qualified_name());
                continue;
            }
            remap[i] = Some(ShardId(self.shards.len()));
            self.shards.push(shard);
        }
        for e in &mut self.entries {
            if let Some(sid) = e.shard {
                e.shard = remap[sid.0];
            }
        }
    }

    /// Offsets and shard sizes are recomputed here, since resolving hard
    /// links may have shrunk some headers.
    fn layout(&mut self) {
        for s in 0..self.shards.len() {
            let mut ids = std::mem::take(&mut self.shards[s].entries);
            ids.sort_by(|a, b| self.entries[a.0].tarpath().cmp(self.entries[b.0].tarpath()));
            let mut offset = 0u64;
            for id in &ids {
                self.entries[id.0].offset = offset;
                offset += self.entries[id.0].blocked_size();
            }
            self.shards[s].entries = ids;
            self.shards[s].content_size = offset;
        }
        for i in 0..self.entries.len() {
            let mut children = std::mem::take(&mut self.entries[i].children);
            children.sort_by(|a, b| self.entries[a.0].tarpath().cmp(self.entries[b.0].tarpath()));
            self.entries[i].children = children;
        }
        self.accumulate_children_sizes();
    }

    /// Same sweep as root selection, with the final sizes and roots. A
    /// promoted link always sits after its new parent in the arena.
    fn accumulate_children_sizes(&mut self) {
        self.reset_children_sizes();
        for i in (1..self.entries.len()).rev() {
            if self.entries[i].storage_root {
                continue;
            }
            if let Some(p) = self.entries[i].parent {
                self.entries[p.0].children_size += self.entries[i].children_size;
            }
        }
    }
}
