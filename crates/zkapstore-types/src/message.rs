//! Binding messages — the byte strings passes are mathematically tied to.
//!
//! Every authorized operation derives a deterministic UTF-8 message from
//! its operation tag and storage index. The client mints passes bound to
//! the message; the server recomputes it from the call's own arguments
//! before verifying. Distinct operation tags guarantee a pass minted for
//! one kind of call can never be replayed on another.

use crate::StorageIndex;

fn bind(operation: &str, storage_index: &StorageIndex) -> String {
    format!("{operation} {storage_index}")
}

/// Binding message for `allocate_buckets`.
#[must_use]
pub fn allocate_buckets_message(storage_index: &StorageIndex) -> String {
    bind("allocate_buckets", storage_index)
}

/// Binding message for `add_lease`.
#[must_use]
pub fn add_lease_message(storage_index: &StorageIndex) -> String {
    bind("add_lease", storage_index)
}

/// Binding message for `renew_lease`.
#[must_use]
pub fn renew_lease_message(storage_index: &StorageIndex) -> String {
    bind("renew_lease", storage_index)
}

/// Binding message for `slot_testv_and_readv_and_writev`.
#[must_use]
pub fn slot_testv_and_readv_and_writev_message(storage_index: &StorageIndex) -> String {
    bind("slot_testv_and_readv_and_writev", storage_index)
}
