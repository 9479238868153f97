//! # zkapstore-spending
//!
//! The spending controller — the stateful issuer that decides which passes
//! leave the node and what became of every pass that ever did.
//!
//! A caller asks for a [`PassGroup`] bound to one request message. The
//! group is the only handle through which those passes change state:
//! spent on success, invalid on rejection, or returned to the pool when
//! the operation could not be completed. The controller's bookkeeping
//! guarantees that at any moment a pass is in exactly one of
//! {in-use, spent, invalid, returned}, and that spent and invalid are
//! terminal.

pub mod controller;
pub mod group;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_support;

pub use controller::{PassMinter, SpendingController, TokenSource};
pub use group::PassGroup;
