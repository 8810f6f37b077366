use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ShardError>;

/// The primary error type for all operations in the `tarshard` crate.
#[derive(Debug, Error)]
pub enum ShardError {
    /// An I/O error occurred, typically while scanning or writing a file.
    /// Includes the path where the error happened.
    #[error("I/O error on path '{}': {source}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Content of a listed file could not be read while producing a shard.
    /// The shard is unproducible; nothing is zero-filled in its place.
    #[error("cannot read '{}' for shard '{shard}' at content offset {offset}: {source}", path.display())]
    UnreadableSource {
        #[source]
        source: std::io::Error,
        path: PathBuf,
        shard: String,
        offset: u64,
    },

    /// A positioned read returned fewer bytes than the layout requires,
    /// usually because the file shrank after it was scanned.
    #[error("short read from '{}' for shard '{shard}' at content offset {offset}: expected {expected} bytes, got {got}", path.display())]
    ShortRead {
        path: PathBuf,
        shard: String,
        offset: u64,
        expected: usize,
        got: usize,
    },

    /// An error occurred when trying to strip a prefix from a file path.
    #[error("could not strip prefix '{}' from path '{}'", prefix.display(), path.display())]
    StripPrefix { prefix: PathBuf, path: PathBuf },

    /// A virtual entry was given a buffer whose length differs from its declared size.
    #[error("virtual entry '{}' declares {declared} bytes but has {actual}", path.display())]
    VirtualSizeMismatch {
        path: PathBuf,
        declared: u64,
        actual: u64,
    },

    /// A hard link whose target is outside every storage root, even the outermost one.
    #[error("hard link '{}' to '{}' cannot be resolved inside any shard", path.display(), target.display())]
    UnresolvedHardLink { path: PathBuf, target: PathBuf },

    /// A catalog record is missing a field or a field is malformed.
    #[error("malformed catalog record {record}: field '{field}': {reason}")]
    Catalog {
        record: usize,
        field: &'static str,
        reason: String,
    },

    /// An entry was added in a way that breaks the tree structure.
    #[error("invalid tree: {0}")]
    InvalidTree(String),

    /// No shard with the requested name exists.
    #[error("no such shard: '{0}'")]
    UnknownShard(String),

    /// The shard policy is unusable.
    #[error("configuration error: {0}")]
    Config(String),

    /// An error during serialization or deserialization of a policy file.
    #[error("serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// The directory walk failed.
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

impl ShardError {
    pub(crate) fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ShardError::Io {
            source,
            path: path.into(),
        }
    }
}

// Generic IO error conversion that doesn't require a path
impl From<std::io::Error> for ShardError {
    fn from(err: std::io::Error) -> Self {
        ShardError::Io {
            source: err,
            path: PathBuf::new(),
        }
    }
}
