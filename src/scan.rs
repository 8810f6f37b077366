//! Directory walk: turns a filesystem subtree into a [`Tree`].
//!
//! Entries are visited parent-first in file-name order, without following
//! symlinks. Objects that vanish or cannot be read during the walk are
//! skipped with a warning; any other I/O failure aborts the scan.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::common::FileKind;
use crate::config::ShardPolicy;
use crate::entry::EntryId;
use crate::error::{Result, ShardError};
use crate::fsx;
use crate::tree::Tree;

fn is_soft_io_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::PermissionDenied | std::io::ErrorKind::NotFound
    )
}

fn is_soft_walk_error(e: &walkdir::Error) -> bool {
    e.io_error().is_some_and(is_soft_io_error)
}

/// Scans the directory at `origin` into a tree governed by `policy`.
pub fn scan(origin: &Path, policy: ShardPolicy) -> Result<Tree> {
    policy.validate()?;
    let origin = origin.canonicalize().map_err(|e| ShardError::io(e, origin))?;
    let root_stat = fsx::lstat(&origin).map_err(|e| ShardError::io(e, &origin))?;
    if root_stat.kind != FileKind::Directory {
        return Err(ShardError::Config(format!("{} is not a directory", origin.display())));
    }

    let mut tree = Tree::new(origin.clone(), root_stat, policy);
    // (dev, ino) of multiply linked objects, mapped to the first path seen.
    let mut inodes: HashMap<(u64, u64), EntryId> = HashMap::new();

    let walker = WalkDir::new(&origin)
        .follow_links(false)
        .min_depth(1)
        .sort_by_file_name();

    for item in walker {
        let item = match item {
            Ok(item) => item,
            Err(e) if is_soft_walk_error(&e) => {
                warn!("skipping unreadable entry: {}", e);
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let path = item.path();
        let rel = path
            .strip_prefix(&origin)
            .map_err(|_| ShardError::StripPrefix {
                prefix: origin.clone(),
                path: path.to_path_buf(),
            })?
            .to_path_buf();

        let meta = match item.metadata() {
            Ok(m) => m,
            Err(e) if is_soft_walk_error(&e) => {
                warn!("skipping {}: {}", path.display(), e);
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let stat = fsx::stat_from_metadata(&meta);

        if stat.kind == FileKind::Socket {
            debug!("skipping socket {}", path.display());
            continue;
        }
        if rel.parent().is_some_and(|p| tree.find(p).is_none()) {
            debug!("skipping {}, its directory was skipped", path.display());
            continue;
        }

        let symlink = if stat.is_symlink() {
            match fsx::read_link_bounded(path) {
                Ok(dest) => Some(dest),
                Err(e) if is_soft_io_error(&e) => {
                    warn!("skipping symlink {}: {}", path.display(), e);
                    continue;
                }
                Err(e) => return Err(ShardError::io(e, path)),
            }
        } else {
            None
        };

        let key = (stat.dev, stat.ino);
        let multiply_linked = !stat.is_dir() && stat.nlink > 1;
        let id = tree.add(rel, stat, symlink)?;

        if multiply_linked {
            match inodes.get(&key) {
                Some(&target) => tree.make_hard_link(id, target)?,
                None => {
                    inodes.insert(key, id);
                }
            }
        }
    }

    info!("scanned {} entries below {}", tree.len() - 1, origin.display());
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Link;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[test]
    fn walks_parent_first_in_name_order() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("b/z"), b"z").unwrap();
        fs::write(dir.path().join("b/a"), b"a").unwrap();
        fs::write(dir.path().join("a"), b"aa").unwrap();

        let tree = scan(dir.path(), ShardPolicy::default()).unwrap();
        assert_eq!(tree.len(), 5);
        let b = tree.find(Path::new("b")).unwrap();
        let names: Vec<PathBuf> = tree
            .entry(b)
            .children()
            .iter()
            .map(|id| tree.entry(*id).path().to_path_buf())
            .collect();
        assert_eq!(names, vec![PathBuf::from("b/a"), PathBuf::from("b/z")]);
        let a = tree.find(Path::new("a")).unwrap();
        assert_eq!(tree.entry(a).stat().size, 2);
    }

    #[test]
    fn origin_must_be_a_directory() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(scan(&file, ShardPolicy::default()), Err(ShardError::Config(_))));
        assert!(matches!(
            scan(&dir.path().join("missing"), ShardPolicy::default()),
            Err(ShardError::Io { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_and_hard_links_are_recognised() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("data"), vec![1u8; 3000]).unwrap();
        fs::hard_link(dir.path().join("data"), dir.path().join("same")).unwrap();
        std::os::unix::fs::symlink("data", dir.path().join("sym")).unwrap();

        let tree = scan(dir.path(), ShardPolicy::default()).unwrap();
        let data = tree.entry(tree.find(Path::new("data")).unwrap());
        let same = tree.entry(tree.find(Path::new("same")).unwrap());
        let sym = tree.entry(tree.find(Path::new("sym")).unwrap());

        assert!(!data.is_hard_link());
        assert_eq!(same.link(), &Link::Hard { target: PathBuf::from("data"), text: PathBuf::from("data") });
        assert_eq!(same.blocked_size(), 512);
        assert_eq!(sym.link(), &Link::Symlink(PathBuf::from("data")));
        assert_eq!(sym.stat().size, 4);
    }
}
