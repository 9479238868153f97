//! Share data model: stats, test/write/read vectors, and operation results.
//!
//! These types mirror the underlying object-store protocol. Mutable-slot
//! operations carry per-share test-and-write vectors plus a read vector;
//! immutable allocation reports which shares already existed and which were
//! created.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::ShareNum;

/// Which container format a share uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareType {
    Immutable,
    Mutable,
}

impl std::fmt::Display for ShareType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Immutable => write!(f, "immutable"),
            Self::Mutable => write!(f, "mutable"),
        }
    }
}

/// Size and lease information about one stored share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareStat {
    /// Stored data size in bytes.
    pub size: u64,
    /// POSIX timestamp at which the most durable lease expires.
    pub lease_expiration: u64,
}

/// A precondition on existing share contents: the bytes at `offset` must
/// equal `specimen` for the enclosing write to proceed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestVector {
    pub offset: u64,
    pub specimen: Vec<u8>,
}

/// A single write: `data` placed at `offset`, zero-filling any gap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteVector {
    pub offset: u64,
    pub data: Vec<u8>,
}

/// The per-share payload of a mutable-slot operation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TestWriteVectors {
    /// Preconditions; all must hold or the whole call writes nothing.
    pub test: Vec<TestVector>,
    /// Writes applied in order after the preconditions pass.
    pub write: Vec<WriteVector>,
    /// Optional final share length; only ever truncates.
    pub new_length: Option<u64>,
}

impl TestWriteVectors {
    /// Does this vector mutate the share?
    #[must_use]
    pub fn is_write(&self) -> bool {
        !self.write.is_empty() || self.new_length.is_some()
    }
}

/// All test-and-write vectors of one mutable-slot call, keyed by share.
pub type TwVectors = BTreeMap<ShareNum, TestWriteVectors>;

/// A single read: `size` bytes starting at `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadVector {
    pub offset: u64,
    pub size: u64,
}

/// Read results: per share, one byte string per requested read vector.
pub type ReadData = BTreeMap<ShareNum, Vec<Vec<u8>>>;

/// Result of an immutable `allocate_buckets` call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AllocateResult {
    /// Shares that already existed at this storage index.
    pub alreadygot: BTreeSet<ShareNum>,
    /// Shares newly allocated by this call.
    pub allocated: BTreeSet<ShareNum>,
}

/// Server identification returned by `get_version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub engine: String,
    pub version: String,
    pub maximum_immutable_share_size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_vector_detection() {
        let read_only = TestWriteVectors::default();
        assert!(!read_only.is_write());

        let write = TestWriteVectors {
            write: vec![WriteVector {
                offset: 0,
                data: vec![1, 2, 3],
            }],
            ..Default::default()
        };
        assert!(write.is_write());

        let truncate = TestWriteVectors {
            new_length: Some(0),
            ..Default::default()
        };
        assert!(truncate.is_write());
    }

    #[test]
    fn share_stat_serde_roundtrip() {
        let stat = ShareStat {
            size: 300_000,
            lease_expiration: 1_700_000_000,
        };
        let json = serde_json::to_string(&stat).unwrap();
        let back: ShareStat = serde_json::from_str(&json).unwrap();
        assert_eq!(stat, back);
    }

    #[test]
    fn allocate_result_serde_roundtrip() {
        let result = AllocateResult {
            alreadygot: [ShareNum(0)].into(),
            allocated: [ShareNum(1), ShareNum(2)].into(),
        };
        let json = serde_json::to_string(&result).unwrap();
        let back: AllocateResult = serde_json::from_str(&json).unwrap();
        assert_eq!(result, back);
    }
}
