//! # zkapstore-store
//!
//! Durable persistence for the client side of the pass protocol: vouchers,
//! their random tokens, the unblinded-token pool, and lease-maintenance
//! accounting. One SQLite database file under the node's data directory.
//!
//! Every mutation commits in a single transaction before returning, so a
//! crash mid-redemption can never lose tokens while reporting success, and
//! concurrent extractors are serialized at the storage layer.
//!
//! All operations are synchronous. From an async context, run them on a
//! blocking worker (e.g. `tokio::task::spawn_blocking`) so the event loop
//! never stalls on disk I/O.

pub mod lease_maintenance;
pub mod schema;
pub mod store;

pub use lease_maintenance::{LeaseMaintenance, LeaseMaintenanceActivity};
pub use store::{NowFn, VoucherStore};
