//! The remote interface and the references clients hold to it.
//!
//! A client never trusts a resolved reference blindly: every call boundary
//! re-checks that the reference advertises exactly
//! [`REMOTE_INTERFACE_NAME`]. A mismatch means the configured server is
//! not a pass-authorized storage server at all and the connection is
//! unusable.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use zkapstore_types::{
    AllocateResult, CancelSecret, ReadData, ReadVector, RenewSecret, Result, ShareNum, ShareStat,
    ShareType, SlotSecrets, StorageIndex, TwVectors, VersionInfo,
};

/// The advertised name of the pass-authorized remote storage interface.
pub const REMOTE_INTERFACE_NAME: &str =
    "RIPrivacyPassAuthorizedStorageServer.tahoe.privatestorage.io";

/// The wire surface of a pass-authorized storage server.
///
/// This mirrors the underlying storage interface with one additional
/// leading `passes` argument on the authorized operations. Passes travel
/// as raw byte strings so the server can account malformed entries as
/// signature failures instead of transport errors.
#[allow(async_fn_in_trait)]
pub trait AuthorizedStorage {
    /// Server identification. Not authorized.
    async fn get_version(&self) -> Result<VersionInfo>;

    /// Allocate immutable buckets. Authorized.
    async fn allocate_buckets(
        &self,
        passes: Vec<Vec<u8>>,
        storage_index: StorageIndex,
        renew_secret: RenewSecret,
        cancel_secret: CancelSecret,
        sharenums: BTreeSet<ShareNum>,
        allocated_size: u64,
    ) -> Result<AllocateResult>;

    /// Readable immutable shares and their sizes. Not authorized.
    async fn get_buckets(&self, storage_index: StorageIndex)
    -> Result<BTreeMap<ShareNum, u64>>;

    /// Add a new lease to every share at the index. Authorized.
    async fn add_lease(
        &self,
        passes: Vec<Vec<u8>>,
        storage_index: StorageIndex,
        renew_secret: RenewSecret,
        cancel_secret: CancelSecret,
    ) -> Result<()>;

    /// Extend an existing lease. Authorized.
    async fn renew_lease(
        &self,
        passes: Vec<Vec<u8>>,
        storage_index: StorageIndex,
        renew_secret: RenewSecret,
    ) -> Result<()>;

    /// Current sizes of the given shares (all shares when `sharenums` is
    /// `None`). Not authorized; the client's costing pre-query.
    async fn share_sizes(
        &self,
        storage_index: StorageIndex,
        sharenums: Option<BTreeSet<ShareNum>>,
    ) -> Result<BTreeMap<ShareNum, u64>>;

    /// Size and lease information per share per index. Not authorized.
    async fn stat_shares(
        &self,
        storage_indexes: Vec<StorageIndex>,
    ) -> Result<Vec<BTreeMap<ShareNum, ShareStat>>>;

    /// Mutable-slot test-and-set. Authorized (cost zero when read-only).
    async fn slot_testv_and_readv_and_writev(
        &self,
        passes: Vec<Vec<u8>>,
        storage_index: StorageIndex,
        secrets: SlotSecrets,
        tw_vectors: TwVectors,
        r_vector: Vec<ReadVector>,
    ) -> Result<(bool, ReadData)>;

    /// Mutable-slot read. Not authorized — reads are free.
    async fn slot_readv(
        &self,
        storage_index: StorageIndex,
        shares: Option<Vec<ShareNum>>,
        r_vector: Vec<ReadVector>,
    ) -> Result<ReadData>;

    /// Report an observed share corruption. Not authorized.
    async fn advise_corrupt_share(
        &self,
        share_type: ShareType,
        storage_index: StorageIndex,
        sharenum: ShareNum,
        reason: String,
    ) -> Result<()>;
}

/// A resolved reference to a remote storage server, as handed to the
/// client by the connection layer.
#[derive(Clone)]
pub struct RemoteReference<R> {
    /// Where the reference was resolved from.
    pub furl: String,
    /// The interface name the remote object advertises.
    pub interface_name: String,
    /// The callable remote surface.
    pub remote: R,
}

impl<R> RemoteReference<R> {
    #[must_use]
    pub fn new(furl: impl Into<String>, interface_name: impl Into<String>, remote: R) -> Self {
        Self {
            furl: furl.into(),
            interface_name: interface_name.into(),
            remote,
        }
    }

    /// A reference advertising the correct interface name, as a healthy
    /// connection layer would produce.
    #[must_use]
    pub fn well_known(furl: impl Into<String>, remote: R) -> Self {
        Self::new(furl, REMOTE_INTERFACE_NAME, remote)
    }
}

/// An in-process "remote" wrapping a server directly, for tests and
/// single-process deployments. Forwards every call; the only latency is a
/// task switch.
pub struct LocalRemote<S> {
    inner: Arc<S>,
}

impl<S> Clone for LocalRemote<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> LocalRemote<S> {
    #[must_use]
    pub fn new(inner: Arc<S>) -> Self {
        Self { inner }
    }
}

impl<S: AuthorizedStorage + Send + Sync> AuthorizedStorage for LocalRemote<S> {
    async fn get_version(&self) -> Result<VersionInfo> {
        self.inner.get_version().await
    }

    async fn allocate_buckets(
        &self,
        passes: Vec<Vec<u8>>,
        storage_index: StorageIndex,
        renew_secret: RenewSecret,
        cancel_secret: CancelSecret,
        sharenums: BTreeSet<ShareNum>,
        allocated_size: u64,
    ) -> Result<AllocateResult> {
        self.inner
            .allocate_buckets(
                passes,
                storage_index,
                renew_secret,
                cancel_secret,
                sharenums,
                allocated_size,
            )
            .await
    }

    async fn get_buckets(
        &self,
        storage_index: StorageIndex,
    ) -> Result<BTreeMap<ShareNum, u64>> {
        self.inner.get_buckets(storage_index).await
    }

    async fn add_lease(
        &self,
        passes: Vec<Vec<u8>>,
        storage_index: StorageIndex,
        renew_secret: RenewSecret,
        cancel_secret: CancelSecret,
    ) -> Result<()> {
        self.inner
            .add_lease(passes, storage_index, renew_secret, cancel_secret)
            .await
    }

    async fn renew_lease(
        &self,
        passes: Vec<Vec<u8>>,
        storage_index: StorageIndex,
        renew_secret: RenewSecret,
    ) -> Result<()> {
        self.inner
            .renew_lease(passes, storage_index, renew_secret)
            .await
    }

    async fn share_sizes(
        &self,
        storage_index: StorageIndex,
        sharenums: Option<BTreeSet<ShareNum>>,
    ) -> Result<BTreeMap<ShareNum, u64>> {
        self.inner.share_sizes(storage_index, sharenums).await
    }

    async fn stat_shares(
        &self,
        storage_indexes: Vec<StorageIndex>,
    ) -> Result<Vec<BTreeMap<ShareNum, ShareStat>>> {
        self.inner.stat_shares(storage_indexes).await
    }

    async fn slot_testv_and_readv_and_writev(
        &self,
        passes: Vec<Vec<u8>>,
        storage_index: StorageIndex,
        secrets: SlotSecrets,
        tw_vectors: TwVectors,
        r_vector: Vec<ReadVector>,
    ) -> Result<(bool, ReadData)> {
        self.inner
            .slot_testv_and_readv_and_writev(passes, storage_index, secrets, tw_vectors, r_vector)
            .await
    }

    async fn slot_readv(
        &self,
        storage_index: StorageIndex,
        shares: Option<Vec<ShareNum>>,
        r_vector: Vec<ReadVector>,
    ) -> Result<ReadData> {
        self.inner.slot_readv(storage_index, shares, r_vector).await
    }

    async fn advise_corrupt_share(
        &self,
        share_type: ShareType,
        storage_index: StorageIndex,
        sharenum: ShareNum,
        reason: String,
    ) -> Result<()> {
        self.inner
            .advise_corrupt_share(share_type, storage_index, sharenum, reason)
            .await
    }
}
