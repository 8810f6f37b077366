use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use rand::{Rng, SeedableRng};
use tarshard::config::ShardPolicy;
use tarshard::header::HeaderStyle;
use tarshard::scan::scan;
use tempfile::tempdir;

#[derive(Debug)]
struct Member {
    kind: tar::EntryType,
    link: Option<PathBuf>,
    data: Vec<u8>,
}

fn read_members(stream: &[u8]) -> HashMap<PathBuf, Member> {
    let mut out = HashMap::new();
    let mut archive = tar::Archive::new(stream);
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let path: PathBuf = entry.path().unwrap().components().collect();
        let kind = entry.header().entry_type();
        let link = entry.link_name().unwrap().map(|l| l.into_owned());
        let mut data = Vec::new();
        entry.read_to_end(&mut data).unwrap();
        out.insert(path, Member { kind, link, data });
    }
    out
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

fn policy() -> ShardPolicy {
    ShardPolicy {
        small_file_limit: 1024,
        large_file_limit: 64 * 1024,
        target_shard_size: 1024 * 1024,
        storage_trigger_size: u64::MAX,
        header_style: HeaderStyle::Simple,
    }
}

fn populate(root: &Path) -> String {
    fs::write(root.join("small.txt"), pattern(745, 1)).unwrap();
    fs::create_dir(root.join("dir")).unwrap();
    fs::write(root.join("dir/medium.bin"), pattern(5000, 2)).unwrap();
    fs::write(root.join("big.bin"), pattern(100 * 1024, 3)).unwrap();
    let long = format!("dir/{}", "x".repeat(120));
    fs::write(root.join(&long), pattern(10, 4)).unwrap();
    long
}

#[test]
fn tar_readers_see_every_file() {
    let src = tempdir().unwrap();
    let long = populate(src.path());
    let archive = scan(src.path(), policy()).unwrap().seal().unwrap();

    let mut members = HashMap::new();
    for (sid, shard) in archive.shards() {
        let mut stream = Vec::new();
        archive.write_shard(sid, &mut stream).unwrap();
        assert_eq!(stream.len() as u64, shard.stream_size());
        assert_eq!(stream.len() % 512, 0);
        members.extend(read_members(&stream));
    }

    assert_eq!(members.len(), 5);
    assert_eq!(members[Path::new("small.txt")].data, pattern(745, 1));
    assert_eq!(members[Path::new("dir/medium.bin")].data, pattern(5000, 2));
    assert_eq!(members[Path::new("big.bin")].data, pattern(100 * 1024, 3));
    assert_eq!(members[Path::new(&long)].data, pattern(10, 4));
    assert_eq!(members[Path::new("dir")].kind, tar::EntryType::Directory);
}

#[cfg(unix)]
#[test]
fn links_survive_the_round_trip() {
    let src = tempdir().unwrap();
    fs::write(src.path().join("data.bin"), pattern(3000, 9)).unwrap();
    fs::hard_link(src.path().join("data.bin"), src.path().join("twin.bin")).unwrap();
    std::os::unix::fs::symlink("data.bin", src.path().join("alias")).unwrap();

    let archive = scan(src.path(), policy()).unwrap().seal().unwrap();
    let sid = archive.find_shard("s01.tar").unwrap();
    let mut stream = Vec::new();
    archive.write_shard(sid, &mut stream).unwrap();
    let members = read_members(&stream);

    let alias = &members[Path::new("alias")];
    assert_eq!(alias.kind, tar::EntryType::Symlink);
    assert_eq!(alias.link.as_deref(), Some(Path::new("data.bin")));

    let twin = &members[Path::new("twin.bin")];
    assert_eq!(twin.kind, tar::EntryType::Link);
    assert_eq!(twin.link.as_deref(), Some(Path::new("data.bin")));
    assert!(twin.data.is_empty());

    let data_shard = archive.find_shard("m01.tar").unwrap();
    let mut stream = Vec::new();
    archive.write_shard(data_shard, &mut stream).unwrap();
    assert_eq!(read_members(&stream)[Path::new("data.bin")].data, pattern(3000, 9));
}

#[test]
fn random_ranges_match_the_full_stream() {
    let src = tempdir().unwrap();
    populate(src.path());
    let archive = scan(src.path(), policy()).unwrap().seal().unwrap();
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);

    for (sid, shard) in archive.shards() {
        let mut whole = Vec::new();
        archive.write_shard(sid, &mut whole).unwrap();
        let total = shard.stream_size() as usize;
        for _ in 0..50 {
            let off = rng.gen_range(0..total);
            let len = rng.gen_range(1..4096);
            let mut buf = vec![0x5Au8; len];
            let n = archive.read_at(sid, off as u64, &mut buf).unwrap();
            assert_eq!(n, len.min(total - off));
            assert_eq!(&buf[..n], &whole[off..off + n]);
        }
    }
}

#[test]
fn headerless_style_concatenates_content() {
    let src = tempdir().unwrap();
    fs::write(src.path().join("a"), b"first").unwrap();
    fs::write(src.path().join("b"), b"second").unwrap();
    let raw = ShardPolicy {
        header_style: HeaderStyle::None,
        ..policy()
    };
    let archive = scan(src.path(), raw).unwrap().seal().unwrap();
    let sid = archive.find_shard("s01").unwrap();
    let mut stream = Vec::new();
    archive.write_shard(sid, &mut stream).unwrap();
    assert_eq!(stream.len(), 1024);
    assert_eq!(&stream[..5], b"first");
    assert_eq!(&stream[512..518], b"second");
}
