//! # zkapstore-types
//!
//! Shared types, errors, and configuration for the **ZKAPStore**
//! pass-authorized storage protocol.
//!
//! This crate is the leaf dependency of the workspace — every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`StorageIndex`], [`ShareNum`], [`VoucherNumber`]
//! - **Pass model**: [`Pass`], [`UnblindedToken`], [`RandomToken`]
//! - **Voucher model**: [`Voucher`], [`VoucherState`]
//! - **Binding messages**: [`allocate_buckets_message`] and friends
//! - **Cost function**: [`required_passes`],
//!   [`required_new_passes_for_mutable_write`]
//! - **Share data model**: [`ShareStat`], [`TestWriteVectors`],
//!   [`ReadVector`], [`AllocateResult`], [`VersionInfo`]
//! - **Configuration**: [`NodeConfig`]
//! - **Errors**: [`ZkapError`] with `ZS_ERR_` prefix codes
//! - **Constants**: protocol-wide lengths, bounds, and defaults

pub mod config;
pub mod constants;
pub mod cost;
pub mod error;
pub mod ids;
pub mod message;
pub mod pass;
pub mod share;
pub mod voucher;

// Re-export all primary types at crate root for ergonomic imports:
//   use zkapstore_types::{Pass, Voucher, StorageIndex, ...};

pub use config::*;
pub use cost::*;
pub use error::*;
pub use ids::*;
pub use message::*;
pub use pass::*;
pub use share::*;
pub use voucher::*;

// Constants are accessed via `zkapstore_types::constants::FOO`
// (not re-exported to avoid name collisions).
