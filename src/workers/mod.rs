//! Parallel shard export.
//!
//! Every shard is an independent stream, so export is one rayon task per
//! shard. Shards land under `<out>/<storage root path>/<shard name>`, and
//! each storage root directory also receives its catalog.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, info};

use crate::archive::Archive;
use crate::catalog::{Catalog, CATALOG_NAME};
use crate::error::{Result, ShardError};
use crate::progress::ProgressTracker;
use crate::shard::ShardId;

/// What an export produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportReport {
    pub shards: usize,
    pub bytes: u64,
    pub catalogs: usize,
}

/// Number of worker threads to use; 0 means one per CPU.
pub fn worker_count(requested: usize) -> usize {
    if requested == 0 {
        num_cpus::get()
    } else {
        requested
    }
}

fn write_one(archive: &Archive, sid: ShardId, out_dir: &Path) -> Result<u64> {
    let path = out_dir.join(archive.shard(sid).qualified_name());
    let file = File::create(&path).map_err(|e| ShardError::io(e, &path))?;
    // 8 MiB buffer to cut syscall overhead on large shards.
    let mut writer = BufWriter::with_capacity(8 * 1024 * 1024, file);
    let n = archive.write_shard(sid, &mut writer)?;
    writer.flush().map_err(|e| ShardError::io(e, &path))?;
    debug!("exported {}", path.display());
    Ok(n)
}

/// Writes every shard of `archive`, plus one catalog per storage root,
/// below `out_dir`.
pub fn export_all(
    archive: &Archive,
    out_dir: &Path,
    threads: usize,
    progress: Option<&ProgressTracker>,
) -> Result<ExportReport> {
    let roots = archive.storage_roots();
    for root in &roots {
        let dir: PathBuf = out_dir.join(archive.entry(*root).path());
        fs::create_dir_all(&dir).map_err(|e| ShardError::io(e, &dir))?;
    }

    let num_workers = worker_count(threads);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_workers)
        .build()
        .map_err(|e| ShardError::Config(format!("cannot start worker pool: {e}")))?;
    info!(
        "exporting {} shards with {} worker threads",
        archive.shard_count(),
        num_workers
    );

    let ids: Vec<ShardId> = archive.shards().map(|(id, _)| id).collect();
    let sizes: Vec<u64> = pool.install(|| {
        ids.par_iter()
            .map(|sid| -> Result<u64> {
                let n = write_one(archive, *sid, out_dir)?;
                if let Some(p) = progress {
                    p.record_shard_completed(n);
                }
                Ok(n)
            })
            .collect::<Result<Vec<u64>>>()
    })?;

    for root in &roots {
        let path = out_dir.join(archive.entry(*root).path()).join(CATALOG_NAME);
        let catalog = Catalog::for_root(archive, *root);
        fs::write(&path, catalog.to_bytes()).map_err(|e| ShardError::io(e, &path))?;
        debug!("catalog {} ({} records)", path.display(), catalog.len());
    }

    if let Some(p) = progress {
        p.emit_progress();
    }

    Ok(ExportReport {
        shards: sizes.len(),
        bytes: sizes.iter().sum(),
        catalogs: roots.len(),
    })
}
