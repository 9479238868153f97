//! Identifiers used throughout ZKAPStore.
//!
//! Storage indexes are opaque 16-byte values assigned by the upper storage
//! layers; share numbers are small integers within one index; voucher
//! numbers are opaque text handed to the user at purchase time.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::STORAGE_INDEX_LENGTH;

// ---------------------------------------------------------------------------
// StorageIndex
// ---------------------------------------------------------------------------

/// Opaque identifier for a bucket or slot in the underlying object store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct StorageIndex(pub [u8; STORAGE_INDEX_LENGTH]);

impl StorageIndex {
    #[must_use]
    pub fn from_bytes(bytes: [u8; STORAGE_INDEX_LENGTH]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; STORAGE_INDEX_LENGTH] {
        &self.0
    }

    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for StorageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

// ---------------------------------------------------------------------------
// ShareNum
// ---------------------------------------------------------------------------

/// Number of a single share within one storage index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ShareNum(pub u32);

impl fmt::Display for ShareNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sh{}", self.0)
    }
}

impl From<u32> for ShareNum {
    fn from(n: u32) -> Self {
        Self(n)
    }
}

// ---------------------------------------------------------------------------
// VoucherNumber
// ---------------------------------------------------------------------------

/// The user-visible identifier of a purchased quantity of storage authority.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct VoucherNumber(pub String);

impl VoucherNumber {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VoucherNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VoucherNumber {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for VoucherNumber {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ---------------------------------------------------------------------------
// Lease secrets
// ---------------------------------------------------------------------------

/// Shared secret proving the right to renew a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RenewSecret(pub [u8; 32]);

/// Shared secret proving the right to cancel a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CancelSecret(pub [u8; 32]);

/// Shared secret authorizing writes to a mutable slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WriteEnabler(pub [u8; 32]);

/// The secret triple accompanying a mutable-slot operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSecrets {
    pub write_enabler: WriteEnabler,
    pub renew_secret: RenewSecret,
    pub cancel_secret: CancelSecret,
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

#[cfg(any(test, feature = "test-helpers"))]
impl StorageIndex {
    /// Random storage index for unit tests.
    pub fn random() -> Self {
        Self(rand::random())
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl SlotSecrets {
    /// Random secret triple for unit tests.
    pub fn random() -> Self {
        Self {
            write_enabler: WriteEnabler(rand::random()),
            renew_secret: RenewSecret(rand::random()),
            cancel_secret: CancelSecret(rand::random()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
