//! # tarshard Core Library
//!
//! This crate splits a directory tree into tar shards: independent,
//! tar-compatible byte streams that are produced on demand, range by range,
//! without ever materializing an archive in memory or on disk.
//!
//! It is designed to be used by the `tarshard` command-line application, but
//! its public API can also be used directly.
//!
//! ## Key Modules
//!
//! - [`scan`]: walks a directory into a [`tree::Tree`].
//! - [`tree`]: storage roots, shard assignment and hard-link promotion.
//! - [`archive`]: the sealed result; serves any byte range of any shard.
//! - [`entry`] and [`header`]: per-object layout and GNU tar headers.
//! - [`catalog`]: the per-root text catalog of stored entries.
//! - [`workers`]: parallel export of every shard to a directory.
//!
//! ## Examples
//!
//! ```no_run
//! use std::path::Path;
//! use tarshard::{config::ShardPolicy, scan::scan};
//!
//! let archive = scan(Path::new("/home"), ShardPolicy::default())?.seal()?;
//! let shard = archive.find_shard("s01.tar")?;
//! let mut first_block = [0u8; 512];
//! archive.read_at(shard, 0, &mut first_block)?;
//! # Ok::<(), tarshard::ShardError>(())
//! ```

pub mod archive;
pub mod catalog;
pub mod cli;
pub mod common;
pub mod config;
pub mod entry;
pub mod error;
pub mod fingerprint;
pub mod hardlink;
pub mod header;
pub mod progress;
pub mod scan;
pub mod shard;
pub mod tree;
pub mod workers;

// Cross-platform filesystem wrapper
pub mod fsx;

pub use error::{Result, ShardError};
