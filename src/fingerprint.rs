//! Per-entry fingerprint used for change detection between backup runs.
//!
//! The digest covers the archive path, the size and the modification time.
//! It does NOT cover file content: two files with the same path, size and
//! mtime are indistinguishable, e.g. a file restored with its original
//! timestamps. Catalogs written by earlier runs depend on this exact input,
//! so the content must stay out of it.

use sha2::{Digest, Sha256};

use crate::common::Timespec;

pub const FINGERPRINT_LEN: usize = 32;

pub type Fingerprint = [u8; FINGERPRINT_LEN];

/// SHA-256 over `tarpath`, then size, mtime seconds and mtime nanoseconds,
/// each as a big-endian 64-bit signed integer.
pub fn fingerprint(tarpath: &[u8], size: i64, mtime: Timespec) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(tarpath);
    hasher.update(size.to_be_bytes());
    hasher.update(mtime.sec.to_be_bytes());
    hasher.update(mtime.nsec.to_be_bytes());
    hasher.finalize().into()
}

/// 32-bit hash of an archive path, used to name large-file shards.
pub fn path_hash(tarpath: &[u8]) -> u32 {
    let digest = Sha256::digest(tarpath);
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

pub fn to_hex(fp: &Fingerprint) -> String {
    hex::encode(fp)
}

pub fn from_hex(text: &str) -> Option<Fingerprint> {
    let mut fp = [0u8; FINGERPRINT_LEN];
    hex::decode_to_slice(text, &mut fp).ok()?;
    Some(fp)
}
