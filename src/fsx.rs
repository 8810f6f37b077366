//! Thin platform layer over `std::fs`.
//!
//! On Unix the stat record is filled from `MetadataExt` and content is read
//! with `pread`-style positioned reads. Other platforms get a best-effort
//! record built from the portable metadata and a seek + read fallback, so
//! that the rest of the crate never touches platform APIs directly.

use std::fs::{File, Metadata};
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::common::{FileKind, FileStat, Timespec};

#[cfg(unix)]
const LINK_MAX: usize = libc::PATH_MAX as usize;
#[cfg(not(unix))]
const LINK_MAX: usize = 4096;

#[cfg(unix)]
fn kind_of(meta: &Metadata) -> FileKind {
    use std::os::unix::fs::FileTypeExt;
    let ft = meta.file_type();
    if ft.is_dir() {
        FileKind::Directory
    } else if ft.is_symlink() {
        FileKind::Symlink
    } else if ft.is_char_device() {
        FileKind::CharDevice
    } else if ft.is_block_device() {
        FileKind::BlockDevice
    } else if ft.is_fifo() {
        FileKind::Fifo
    } else if ft.is_socket() {
        FileKind::Socket
    } else {
        FileKind::Regular
    }
}

/// Splits a Linux `dev_t` into major and minor numbers.
#[cfg(unix)]
fn split_dev(rdev: u64) -> (u32, u32) {
    let major = ((rdev >> 32) & 0xffff_f000) | ((rdev >> 8) & 0x0000_0fff);
    let minor = ((rdev >> 12) & 0xffff_ff00) | (rdev & 0x0000_00ff);
    (major as u32, minor as u32)
}

/// Converts `lstat` metadata into the engine's stat record.
#[cfg(unix)]
pub fn stat_from_metadata(meta: &Metadata) -> FileStat {
    use std::os::unix::fs::MetadataExt;
    let kind = kind_of(meta);
    let (rdev_major, rdev_minor) = if kind.is_device() {
        split_dev(meta.rdev())
    } else {
        (0, 0)
    };
    FileStat {
        kind,
        mode: meta.mode() & 0o7777,
        uid: meta.uid(),
        gid: meta.gid(),
        size: meta.size(),
        mtime: Timespec::new(meta.mtime(), meta.mtime_nsec()),
        atime: Timespec::new(meta.atime(), meta.atime_nsec()),
        ctime: Timespec::new(meta.ctime(), meta.ctime_nsec()),
        rdev_major,
        rdev_minor,
        dev: meta.dev(),
        ino: meta.ino(),
        nlink: meta.nlink(),
    }
}

#[cfg(not(unix))]
/// Portable fallback: no ownership, no devices, no hard-link detection.
pub fn stat_from_metadata(meta: &Metadata) -> FileStat {
    let kind = if meta.is_dir() {
        FileKind::Directory
    } else if meta.file_type().is_symlink() {
        FileKind::Symlink
    } else {
        FileKind::Regular
    };
    let mtime = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| Timespec::new(d.as_secs() as i64, d.subsec_nanos() as i64))
        .unwrap_or_default();
    let mode = if meta.is_dir() { 0o755 } else if meta.permissions().readonly() { 0o444 } else { 0o644 };
    FileStat::synthetic(kind, mode, meta.len(), mtime)
}

/// `lstat` the path and convert the result.
pub fn lstat(path: &Path) -> io::Result<FileStat> {
    std::fs::symlink_metadata(path).map(|m| stat_from_metadata(&m))
}

/// Reads a symbolic link destination once. Destinations longer than the
/// platform path limit are truncated with a warning.
pub fn read_link_bounded(path: &Path) -> io::Result<PathBuf> {
    let dest = std::fs::read_link(path)?;
    let bytes = path_bytes(&dest);
    if bytes.len() >= LINK_MAX {
        warn!(
            "symbolic link '{}' has a {} byte destination, truncating to {}",
            path.display(),
            bytes.len(),
            LINK_MAX - 1
        );
        return Ok(path_from_bytes(&bytes[..LINK_MAX - 1]));
    }
    Ok(dest)
}

/// Fills `buf` from `file` starting at `offset`. Returns the number of bytes
/// read, which is less than `buf.len()` only at end of file.
pub fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    let mut done = 0;
    while done < buf.len() {
        match pread(file, &mut buf[done..], offset + done as u64) {
            Ok(0) => break,
            Ok(n) => done += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(done)
}

#[cfg(unix)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(not(unix))]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::io::{Read, Seek, SeekFrom};
    let mut f = file;
    f.seek(SeekFrom::Start(offset))?;
    f.read(buf)
}

/// The raw bytes of a path, as stored in tar headers and catalogs.
#[cfg(unix)]
pub fn path_bytes(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
pub fn path_bytes(path: &Path) -> Vec<u8> {
    path.to_string_lossy().replace('\\', "/").into_bytes()
}

#[cfg(unix)]
pub fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(std::ffi::OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
pub fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn positioned_reads_stop_at_eof() -> Result<(), Box<dyn std::error::Error>> {
        let mut tmp = NamedTempFile::new()?;
        tmp.write_all(b"0123456789")?;
        let file = File::open(tmp.path())?;

        let mut buf = [0u8; 4];
        assert_eq!(read_at(&file, &mut buf, 3)?, 4);
        assert_eq!(&buf, b"3456");

        let mut tail = [0u8; 8];
        assert_eq!(read_at(&file, &mut tail, 7)?, 3);
        assert_eq!(&tail[..3], b"789");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn device_numbers_are_split_like_glibc() {
        // makedev(8, 1) and makedev(259, 65536)
        assert_eq!(split_dev(0x0801), (8, 1));
        let dev = ((259u64 & 0xfff) << 8) | ((259u64 & !0xfff) << 32) | (65536u64 & 0xff) | ((65536u64 & !0xff) << 12);
        assert_eq!(split_dev(dev), (259, 65536));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_destination_is_read_once() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let link = dir.path().join("link");
        std::os::unix::fs::symlink("target", &link)?;
        assert_eq!(read_link_bounded(&link)?, PathBuf::from("target"));
        let st = lstat(&link)?;
        assert_eq!(st.kind, FileKind::Symlink);
        assert_eq!(st.size, 6);
        Ok(())
    }
}
