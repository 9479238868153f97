//! Configuration for a ZKAPStore node.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;

/// Configuration shared by the client and server sides of a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Directory holding the node's durable state (the voucher database
    /// lives directly under it).
    pub data_dir: PathBuf,
    /// How many stored bytes one pass pays for. Client and server must
    /// agree or every cost computation disagrees.
    pub bytes_per_pass: u64,
    /// Upper bound on the pass list accepted per call.
    pub max_passes_per_call: usize,
}

impl NodeConfig {
    /// A config rooted at the given data directory with default limits.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            bytes_per_pass: constants::DEFAULT_BYTES_PER_PASS,
            max_passes_per_call: constants::MAX_PASSES_PER_CALL,
        }
    }

    /// The node's data directory.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self::new("data")
    }
}
