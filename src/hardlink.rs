//! Hard-link resolution.
//!
//! A hard link inside a tar names its target by archive path. Since a backup
//! is split into shards that are extracted independently, relative to their
//! storage root, the stored text must be relative to that root, and the
//! target must live below it. Links whose target lies outside the root are
//! reported so the tree can promote the link to a shallower root.

use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use crate::entry::{Entry, Link};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardLinkFix {
    /// The link text is now relative to the shard root.
    Resolved,
    /// The target is outside the shard root; the entry was not touched.
    NeedsPromotion,
}

/// Returns the longest common ancestor of two paths, component by component.
pub fn common_prefix(a: &Path, b: &Path) -> PathBuf {
    a.components()
        .zip(b.components())
        .take_while(|(x, y)| x == y)
        .map(|(x, _)| x.as_os_str())
        .collect()
}

fn depth(p: &Path) -> usize {
    p.components().filter(|c| !matches!(c, Component::RootDir | Component::CurDir)).count()
}

fn is_filesystem_root(p: &Path) -> bool {
    depth(p) == 0
}

/// Rewrites the hard-link text of `entry` relative to `shard_root`, or
/// reports that the entry must move to a shard rooted higher up.
pub fn fix_hard_link(entry: &mut Entry, shard_root: &Path) -> HardLinkFix {
    let target = match entry.link() {
        Link::Hard { target, .. } => target.clone(),
        _ => return HardLinkFix::Resolved,
    };
    debug!(
        "fix hard link {} to {} within {}",
        entry.path().display(),
        target.display(),
        shard_root.display()
    );

    if is_filesystem_root(shard_root) {
        return HardLinkFix::Resolved;
    }

    let common = common_prefix(shard_root, &target);
    if depth(&common) < depth(shard_root) {
        warn!(
            "hard link between shards detected, from {} to {}",
            entry.path().display(),
            target.display()
        );
        return HardLinkFix::NeedsPromotion;
    }

    let cut = target
        .strip_prefix(&common)
        .map(Path::to_path_buf)
        .unwrap_or(target);
    debug!("cut link to {}", cut.display());
    entry.set_hard_link_text(cut);
    HardLinkFix::Resolved
}
