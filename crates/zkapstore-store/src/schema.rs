//! SQL schema for the voucher database.
//!
//! The schema carries a version integer in its own table; opening the
//! store validates it against [`SCHEMA_VERSION`] and refuses to touch a
//! database written by an incompatible build.

pub use zkapstore_types::constants::SCHEMA_VERSION;

/// The name of the voucher SQLite database under the data directory.
pub const DB_NAME: &str = "vouchers.sqlite3";

pub const TABLE_VERSION: &str = "CREATE TABLE IF NOT EXISTS version (
    version INTEGER NOT NULL
)";

pub const TABLE_VOUCHERS: &str = "CREATE TABLE IF NOT EXISTS vouchers (
    number TEXT PRIMARY KEY,
    created TEXT NOT NULL,
    state TEXT NOT NULL,
    finished TEXT,
    token_count INTEGER
)";

pub const TABLE_RANDOM_TOKENS: &str = "CREATE TABLE IF NOT EXISTS random_tokens (
    token TEXT PRIMARY KEY,
    voucher_number TEXT NOT NULL
)";

// `sequence` establishes the total FIFO extraction order; AUTOINCREMENT
// keeps it stable across deletes and process restarts.
pub const TABLE_UNBLINDED_TOKENS: &str = "CREATE TABLE IF NOT EXISTS unblinded_tokens (
    sequence INTEGER PRIMARY KEY AUTOINCREMENT,
    token TEXT NOT NULL UNIQUE,
    voucher_number TEXT NOT NULL
)";

pub const TABLE_LEASE_MAINTENANCE: &str = "CREATE TABLE IF NOT EXISTS lease_maintenance (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started TEXT NOT NULL,
    finished TEXT,
    passes_required INTEGER NOT NULL DEFAULT 0
)";

pub const QUERY_VERSION: &str = "SELECT version FROM version LIMIT 1";
pub const INSERT_VERSION: &str = "INSERT INTO version (version) VALUES (?1)";

pub const INSERT_VOUCHER: &str =
    "INSERT INTO vouchers (number, created, state) VALUES (?1, ?2, 'pending')";
pub const QUERY_VOUCHER: &str =
    "SELECT number, created, state, finished, token_count FROM vouchers WHERE number = ?1";
pub const QUERY_VOUCHERS: &str =
    "SELECT number, created, state, finished, token_count FROM vouchers
     ORDER BY created ASC, rowid ASC";
pub const REDEEM_VOUCHER: &str =
    "UPDATE vouchers SET state = 'redeemed', finished = ?2, token_count = ?3 WHERE number = ?1";
pub const DOUBLE_SPEND_VOUCHER: &str =
    "UPDATE vouchers SET state = 'double-spend', finished = ?2 WHERE number = ?1";

pub const INSERT_RANDOM_TOKEN: &str =
    "INSERT INTO random_tokens (token, voucher_number) VALUES (?1, ?2)";

pub const INSERT_UNBLINDED_TOKEN: &str =
    "INSERT INTO unblinded_tokens (token, voucher_number) VALUES (?1, ?2)";
pub const QUERY_UNBLINDED_HEAD: &str =
    "SELECT sequence, token FROM unblinded_tokens ORDER BY sequence ASC LIMIT ?1";
pub const DELETE_UNBLINDED_TOKEN: &str = "DELETE FROM unblinded_tokens WHERE sequence = ?1";
pub const COUNT_UNBLINDED_TOKENS: &str = "SELECT COUNT(*) FROM unblinded_tokens";

pub const INSERT_LEASE_MAINTENANCE: &str =
    "INSERT INTO lease_maintenance (started, passes_required) VALUES (?1, 0)";
pub const OBSERVE_LEASE_MAINTENANCE: &str =
    "UPDATE lease_maintenance SET passes_required = passes_required + ?2 WHERE id = ?1";
pub const FINISH_LEASE_MAINTENANCE: &str =
    "UPDATE lease_maintenance SET finished = ?2 WHERE id = ?1";
pub const QUERY_LATEST_LEASE_MAINTENANCE: &str =
    "SELECT started, finished, passes_required FROM lease_maintenance
     WHERE finished IS NOT NULL ORDER BY finished DESC, id DESC LIMIT 1";

/// All table definitions, in creation order.
pub const TABLES: [&str; 5] = [
    TABLE_VERSION,
    TABLE_VOUCHERS,
    TABLE_RANDOM_TOKENS,
    TABLE_UNBLINDED_TOKENS,
    TABLE_LEASE_MAINTENANCE,
];
