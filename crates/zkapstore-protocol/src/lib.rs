//! # zkapstore-protocol
//!
//! The pass-authorized storage protocol: an augmentation of an existing
//! object-store RPC interface with a leading `passes` argument on every
//! operation that consumes resources.
//!
//! The [`client`] computes each call's cost, checks out a bound pass group
//! from the spending controller, and retries with replacement passes when
//! the server rejects some signatures. The [`server`] admits a call only
//! after every submitted pass clears structural, signature, double-spend,
//! and sufficiency checks, then delegates to the wrapped
//! [`StorageBackend`].
//!
//! Cooperative scheduling: client and server expose `async fn` surfaces
//! and suspend only at RPC boundaries. RPCs issued against one remote
//! reference are awaited serially within a retry loop, preserving
//! initiation order.

pub mod backend;
pub mod client;
pub mod mint;
pub mod rref;
pub mod server;
pub mod share_file;
pub mod spent_passes;

pub use backend::{MemoryBackend, StorageBackend};
pub use client::{AuthorizedStorageClient, StoreTokenSource};
pub use mint::{PassVerifier, TokenSigner};
pub use rref::{AuthorizedStorage, LocalRemote, REMOTE_INTERFACE_NAME, RemoteReference};
pub use server::AuthorizedStorageServer;
pub use spent_passes::SpentPassBook;
