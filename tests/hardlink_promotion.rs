#![cfg(unix)]

use std::fs::{self, File};
use std::path::Path;

use tarshard::archive::Archive;
use tarshard::catalog::{parse_catalog, Catalog, CatalogLink};
use tarshard::config::ShardPolicy;
use tarshard::entry::Link;
use tarshard::header::HeaderStyle;
use tarshard::scan::scan;
use tarshard::workers::export_all;
use tempfile::tempdir;

fn policy() -> ShardPolicy {
    ShardPolicy {
        small_file_limit: 1024,
        large_file_limit: 1024 * 1024,
        target_shard_size: 1024 * 1024,
        storage_trigger_size: 3000,
        header_style: HeaderStyle::Simple,
    }
}

/// `a/big` and `b/other` push `a` and `b` over the trigger size; `b/link`
/// is a hard link to `a/big`.
fn cross_root_tree(root: &Path) -> Archive {
    fs::create_dir(root.join("a")).unwrap();
    fs::create_dir(root.join("b")).unwrap();
    fs::write(root.join("a/big"), vec![b'A'; 3000]).unwrap();
    fs::write(root.join("b/other"), vec![b'B'; 3000]).unwrap();
    fs::hard_link(root.join("a/big"), root.join("b/link")).unwrap();
    scan(root, policy()).unwrap().seal().unwrap()
}

#[test]
fn cross_root_link_moves_to_the_common_root() {
    let src = tempdir().unwrap();
    let archive = cross_root_tree(src.path());

    let a = archive.find_entry(Path::new("a")).unwrap();
    let b = archive.find_entry(Path::new("b")).unwrap();
    assert!(archive.entry(a).is_storage_root());
    assert!(archive.entry(b).is_storage_root());

    let link = archive.find_entry(Path::new("b/link")).unwrap();
    let e = archive.entry(link);
    assert_eq!(e.parent(), Some(archive.root()));
    assert_eq!(e.tarpath(), Path::new("b/link"));
    assert!(matches!(e.link(), Link::Hard { text, .. } if text == Path::new("a/big")));
    assert_eq!(archive.shard(e.shard().unwrap()).qualified_name(), "s01.tar");

    let root_catalog = Catalog::for_root(&archive, archive.root());
    let rec = root_catalog
        .records
        .iter()
        .find(|r| r.tarpath == Path::new("b/link"))
        .unwrap();
    assert_eq!(rec.link, CatalogLink::Hard("a/big".into()));
    assert_eq!(rec.size, 3000);

    let b_catalog = Catalog::for_root(&archive, b);
    assert!(b_catalog.records.iter().all(|r| r.tarpath != Path::new("link")));
    assert!(b_catalog.records.iter().any(|r| r.tarpath == Path::new("other")));
}

#[test]
fn exported_shards_extract_into_the_original_tree() {
    let src = tempdir().unwrap();
    let archive = cross_root_tree(src.path());
    let shards = tempdir().unwrap();
    export_all(&archive, shards.path(), 2, None).unwrap();

    // Deeper roots first, then the origin, each into its own directory.
    let restore = tempdir().unwrap();
    let mut roots = archive.storage_roots();
    roots.reverse();
    for root in roots {
        let rel = archive.entry(root).path().to_path_buf();
        let dest = restore.path().join(&rel);
        fs::create_dir_all(&dest).unwrap();
        for sid in archive.shards_of(root) {
            let file = File::open(shards.path().join(archive.shard(sid).qualified_name())).unwrap();
            tar::Archive::new(file).unpack(&dest).unwrap();
        }
        let catalog = fs::read(shards.path().join(&rel).join("tarshard.idx")).unwrap();
        assert!(!parse_catalog(&catalog).unwrap().is_empty());
    }

    assert_eq!(fs::read(restore.path().join("a/big")).unwrap(), vec![b'A'; 3000]);
    assert_eq!(fs::read(restore.path().join("b/other")).unwrap(), vec![b'B'; 3000]);
    assert_eq!(fs::read(restore.path().join("b/link")).unwrap(), vec![b'A'; 3000]);
}
