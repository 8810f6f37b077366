use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::ShardPolicy;
use crate::error::Result;
use crate::header::HeaderStyle;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
}

/// Shard policy options shared by every command that scans a directory.
#[derive(ClapArgs, Clone, Debug, Default)]
pub struct PolicyArgs {
    /// JSON file with shard policy settings. Flags below override it.
    #[arg(long)]
    pub policy: Option<PathBuf>,

    /// Header style of tar shards.
    #[arg(long, value_enum)]
    pub style: Option<HeaderStyle>,

    /// Regular files smaller than this many bytes go to small shards.
    #[arg(long)]
    pub small_limit: Option<u64>,

    /// Regular files of at least this many bytes get their own shard.
    #[arg(long)]
    pub large_limit: Option<u64>,

    /// Target size in bytes of small and medium shards.
    #[arg(long)]
    pub target_size: Option<u64>,

    /// Directories whose subtree reaches this many bytes become storage roots.
    #[arg(long)]
    pub trigger_size: Option<u64>,
}

impl PolicyArgs {
    /// Defaults, then the policy file, then individual flags.
    pub fn resolve(&self) -> Result<ShardPolicy> {
        let mut policy = match &self.policy {
            Some(path) => ShardPolicy::load(path)?,
            None => ShardPolicy::default(),
        };
        if let Some(style) = self.style {
            policy.header_style = style;
        }
        if let Some(v) = self.small_limit {
            policy.small_file_limit = v;
        }
        if let Some(v) = self.large_limit {
            policy.large_file_limit = v;
        }
        if let Some(v) = self.target_size {
            policy.target_shard_size = v;
        }
        if let Some(v) = self.trigger_size {
            policy.storage_trigger_size = v;
        }
        policy.validate()?;
        Ok(policy)
    }
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Scan a directory and print the shards it would produce.
    #[command(alias = "p")]
    Plan {
        /// Directory to scan.
        #[arg(required = true)]
        origin: PathBuf,

        /// Print the plan as JSON.
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        policy: PolicyArgs,
    },

    /// Write every shard and every catalog of a directory into an output directory.
    #[command(alias = "x")]
    Export {
        /// Directory to scan.
        #[arg(required = true)]
        origin: PathBuf,

        /// Output directory. Created if missing.
        #[arg(short, long)]
        output: PathBuf,

        /// Number of parallel threads to use. [0 = auto-detect based on CPU cores]
        #[arg(long, default_value_t = 0)]
        threads: usize,

        #[command(flatten)]
        policy: PolicyArgs,
    },

    /// Write a byte range of one shard to stdout or a file.
    Read {
        /// Directory to scan.
        #[arg(required = true)]
        origin: PathBuf,

        /// Qualified shard name, e.g. `home/user/s01.tar`.
        #[arg(long)]
        shard: String,

        /// First byte to produce.
        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Number of bytes to produce. Defaults to the rest of the shard.
        #[arg(long)]
        length: Option<u64>,

        /// Write to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        policy: PolicyArgs,
    },

    /// Write the catalog of one storage root.
    Catalog {
        /// Directory to scan.
        #[arg(required = true)]
        origin: PathBuf,

        /// Storage root, relative to the origin. Defaults to the origin itself.
        #[arg(long)]
        root: Option<PathBuf>,

        /// Write to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        policy: PolicyArgs,
    },

    /// Print a catalog file in a `tar tv` like format.
    #[command(alias = "l")]
    List {
        /// The catalog file to list.
        #[arg(required = true)]
        catalog: PathBuf,
    },
}

/// Parses command-line arguments using `clap` and returns the command to execute.
pub fn run() -> std::result::Result<Commands, Box<dyn std::error::Error>> {
    let args = Args::parse();
    Ok(args.command)
}
