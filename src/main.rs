//! Main entry point for the tarshard CLI app

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use tarshard::archive::Archive;
use tarshard::catalog::{parse_catalog, Catalog};
use tarshard::cli::{self, Commands, PolicyArgs};
use tarshard::progress::ProgressTracker;
use tarshard::{scan, workers, ShardError};

fn main() -> std::process::ExitCode {
    let filter = EnvFilter::try_from_env("TARSHARD_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    if let Err(e) = run_app() {
        if e.downcast_ref::<clap::Error>().is_none() {
            eprintln!("Error: {}", e);
        }
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

fn seal(origin: &Path, policy: &PolicyArgs) -> Result<Archive, ShardError> {
    scan::scan(origin, policy.resolve()?)?.seal()
}

fn open_output(path: Option<&PathBuf>) -> io::Result<Box<dyn Write>> {
    Ok(match path {
        Some(p) => Box::new(BufWriter::new(File::create(p)?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    })
}

fn run_app() -> Result<(), Box<dyn std::error::Error>> {
    let command = cli::run()?;

    match &command {
        Commands::Plan { origin, json, policy } => {
            let archive = seal(origin, policy)?;
            let plan = archive.plan();
            if *json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                for s in &plan {
                    println!("{:<40} {:>6} entries {:>14} bytes", s.name, s.entries, s.stream_size);
                }
                println!("{} shards, {} bytes", plan.len(), archive.total_size());
            }
        }
        Commands::Export { origin, output, threads, policy } => {
            let archive = seal(origin, policy)?;
            let tracker = ProgressTracker::new(archive.shard_count(), archive.total_size(), Duration::from_millis(500))
                .with_callback(|state| {
                    eprintln!(
                        "{}/{} shards, {:.1}%, {:.1} MB/s, {}s left",
                        state.completed_shards,
                        state.total_shards,
                        state.progress_percent,
                        state.speed_mbps,
                        state.estimated_time_remaining().as_secs()
                    );
                });
            let report = workers::export_all(&archive, output, *threads, Some(&tracker))?;
            println!(
                "Exported {} shards ({} bytes) and {} catalogs to {}",
                report.shards,
                report.bytes,
                report.catalogs,
                output.display()
            );
        }
        Commands::Read { origin, shard, offset, length, output, policy } => {
            let archive = seal(origin, policy)?;
            let sid = archive.find_shard(shard)?;
            let end = match length {
                Some(len) => offset.saturating_add(*len),
                None => u64::MAX,
            };
            let mut out = open_output(output.as_ref())?;
            let mut buf = vec![0u8; 1 << 20];
            let mut pos = *offset;
            while pos < end {
                let want = (end - pos).min(buf.len() as u64) as usize;
                let n = archive.read_at(sid, pos, &mut buf[..want])?;
                if n == 0 {
                    break;
                }
                out.write_all(&buf[..n])?;
                pos += n as u64;
            }
            out.flush()?;
        }
        Commands::Catalog { origin, root, output, policy } => {
            let archive = seal(origin, policy)?;
            let root_id = match root {
                Some(r) => archive
                    .find_entry(r)
                    .filter(|id| archive.entry(*id).is_storage_root())
                    .ok_or_else(|| format!("{} is not a storage root", r.display()))?,
                None => archive.root(),
            };
            let mut out = open_output(output.as_ref())?;
            out.write_all(&Catalog::for_root(&archive, root_id).to_bytes())?;
            out.flush()?;
        }
        Commands::List { catalog } => {
            let bytes = fs::read(catalog).map_err(|e| ShardError::Io { source: e, path: catalog.clone() })?;
            print!("{}", parse_catalog(&bytes)?.to_listing());
        }
    }

    Ok(())
}
