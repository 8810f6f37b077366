//! Shard policy: the thresholds that decide how entries are grouped.
//!
//! The policy is an explicit value handed to the tree; nothing here is
//! process-global. It can be read from a JSON file, every field optional:
//!
//! ```json
//! { "small_file_limit": 65536, "target_shard_size": 4194304, "header_style": "full" }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShardError};
use crate::header::HeaderStyle;

const MIB: u64 = 1024 * 1024;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ShardPolicy {
    /// Regular files smaller than this go to small shards.
    pub small_file_limit: u64,
    /// Regular files at least this large get a dedicated large shard.
    pub large_file_limit: u64,
    /// A small or medium shard is closed once adding an entry would exceed this.
    pub target_shard_size: u64,
    /// A directory whose accumulated subtree reaches this becomes a storage root.
    pub storage_trigger_size: u64,
    /// Header style of tar shards.
    pub header_style: HeaderStyle,
}

impl Default for ShardPolicy {
    fn default() -> Self {
        Self {
            small_file_limit: MIB,
            large_file_limit: 100 * MIB,
            target_shard_size: 10 * MIB,
            storage_trigger_size: 20 * MIB,
            header_style: HeaderStyle::Simple,
        }
    }
}

impl ShardPolicy {
    /// Reads a policy from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| ShardError::io(e, path))?;
        let policy: ShardPolicy = serde_json::from_str(&text)?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> Result<()> {
        if self.small_file_limit > self.large_file_limit {
            return Err(ShardError::Config(format!(
                "small_file_limit ({}) exceeds large_file_limit ({})",
                self.small_file_limit, self.large_file_limit
            )));
        }
        if self.target_shard_size == 0 {
            return Err(ShardError::Config("target_shard_size must be positive".into()));
        }
        if self.storage_trigger_size == 0 {
            return Err(ShardError::Config("storage_trigger_size must be positive".into()));
        }
        Ok(())
    }
}
