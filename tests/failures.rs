use std::fs::{self, OpenOptions};

use tarshard::config::ShardPolicy;
use tarshard::scan::scan;
use tarshard::ShardError;
use tempfile::tempdir;

#[test]
fn deleted_source_fails_the_shard() {
    let src = tempdir().unwrap();
    fs::write(src.path().join("keep"), b"still here").unwrap();
    fs::write(src.path().join("lost"), vec![7u8; 900]).unwrap();
    let archive = scan(src.path(), ShardPolicy::default()).unwrap().seal().unwrap();
    fs::remove_file(src.path().join("lost")).unwrap();

    let sid = archive.find_shard("s01.tar").unwrap();
    let mut out = Vec::new();
    match archive.write_shard(sid, &mut out) {
        Err(ShardError::UnreadableSource { path, shard, offset, .. }) => {
            assert!(path.ends_with("lost"));
            assert_eq!(shard, "s01.tar");
            assert_eq!(offset, 0);
        }
        other => panic!("expected an unreadable source, got {other:?}"),
    }

    // The region before the lost file is still producible.
    let mut head = vec![0u8; 1024];
    assert_eq!(archive.read_at(sid, 0, &mut head).unwrap(), 1024);
    assert_eq!(&head[512..522], b"still here");
}

#[test]
fn truncated_source_is_a_short_read() {
    let src = tempdir().unwrap();
    fs::write(src.path().join("shrinks"), vec![1u8; 2000]).unwrap();
    let archive = scan(src.path(), ShardPolicy::default()).unwrap().seal().unwrap();
    OpenOptions::new()
        .write(true)
        .open(src.path().join("shrinks"))
        .unwrap()
        .set_len(100)
        .unwrap();

    let sid = archive.find_shard("s01.tar").unwrap();
    let mut buf = vec![0u8; 4096];
    let err = archive.read_at(sid, 0, &mut buf).unwrap_err();
    assert!(matches!(err, ShardError::ShortRead { expected: 2000, got: 100, .. }));
    assert!(err.to_string().contains("s01.tar"));
}

#[test]
fn unknown_shard_is_reported_by_name() {
    let src = tempdir().unwrap();
    let archive = scan(src.path(), ShardPolicy::default()).unwrap().seal().unwrap();
    assert_eq!(archive.shard_count(), 0);
    let err = archive.find_shard("nested/s01.tar").unwrap_err();
    assert_eq!(err.to_string(), "no such shard: 'nested/s01.tar'");
}
