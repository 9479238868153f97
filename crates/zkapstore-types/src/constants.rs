//! Protocol-wide constants for ZKAPStore.

/// Serialized length of a pass in bytes: two base64-encoded 64-byte values
/// (the token preimage and the unblinded signature) joined by one space.
pub const PASS_LENGTH: usize = 177;

/// Length of each base64-encoded half of a pass.
pub const PASS_PART_LENGTH: usize = 88;

/// Raw byte length of a token preimage / unblinded signature.
pub const TOKEN_PART_RAW_LENGTH: usize = 64;

/// Maximum number of passes a single call may carry. Deliberately small;
/// a client can accomplish a lot with a few passes while a bound keeps the
/// per-call resource use predictable.
pub const MAX_PASSES_PER_CALL: usize = 10;

/// Default number of stored bytes one pass pays for.
pub const DEFAULT_BYTES_PER_PASS: u64 = 128 * 1024;

/// Lease duration granted by `add_lease` / `renew_lease` (31 days).
pub const LEASE_PERIOD_SECS: u64 = 60 * 60 * 24 * 31;

/// Voucher-store schema version this build reads and writes.
pub const SCHEMA_VERSION: i64 = 1;

/// Server-side spent-pass book capacity (fingerprints to remember).
pub const SPENT_PASS_CACHE_SIZE: usize = 500_000;

/// Client-side capacity of the invalidation-reason cache (diagnostics).
pub const INVALID_REASON_CACHE_SIZE: usize = 10_000;

/// Immutable share-file container version.
pub const SHARE_VERSION: u32 = 1;

/// Immutable share-file header length: version, internal size, lease count,
/// each a big-endian `u32`.
pub const SHARE_HEADER_LENGTH: usize = 12;

/// Length of one lease record in an immutable share file: owner (`u32`),
/// renew secret (32 bytes), cancel secret (32 bytes), expiration (`u32`).
pub const SHARE_LEASE_LENGTH: usize = 72;

/// Length of a storage index in bytes.
pub const STORAGE_INDEX_LENGTH: usize = 16;

/// Length of a lease renew / cancel secret in bytes.
pub const SECRET_LENGTH: usize = 32;

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "ZKAPStore";
