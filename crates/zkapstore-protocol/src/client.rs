//! Client side of the authorized storage protocol.
//!
//! The client presents passes per call to prove authorization for writes
//! and lease updates. Application code sees the same storage surface as
//! the anonymous protocol; the passes are inserted here and interpreted by
//! the corresponding server-side admission.
//!
//! The one recoverable failure is a partial rejection: the server names
//! the indices whose signature check failed, the client marks those passes
//! invalid, expands the group with replacements bound to the same message,
//! and retries. Every other failure resets the group so unused passes
//! return to the pool, then propagates.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};
use zkapstore_spending::{PassGroup, SpendingController, TokenSource};
use zkapstore_store::VoucherStore;
use zkapstore_types::{
    AllocateResult, CancelSecret, ReadData, ReadVector, RenewSecret, Result, ShareNum, ShareStat,
    ShareType, SlotSecrets, StorageIndex, TwVectors, UnblindedToken, VersionInfo, ZkapError,
    add_lease_message, allocate_buckets_message, has_writes, renew_lease_message,
    required_new_passes_for_mutable_write, required_passes,
    slot_testv_and_readv_and_writev_message,
};

use crate::rref::{AuthorizedStorage, REMOTE_INTERFACE_NAME, RemoteReference};

/// Adapter feeding the spending controller from the voucher store's
/// unblinded-token pool.
pub struct StoreTokenSource {
    store: Arc<Mutex<VoucherStore>>,
}

impl StoreTokenSource {
    #[must_use]
    pub fn new(store: Arc<Mutex<VoucherStore>>) -> Self {
        Self { store }
    }
}

impl TokenSource for StoreTokenSource {
    fn extract_unblinded_tokens(&mut self, count: usize) -> Result<Vec<UnblindedToken>> {
        self.store
            .lock()
            .expect("voucher store lock poisoned")
            .extract_unblinded_tokens(count)
    }
}

/// Resolver handing the client a fresh remote reference per call.
pub type RrefResolver<R> = Box<dyn Fn() -> RemoteReference<R> + Send + Sync>;

/// A storage client that authorizes resource-consuming calls with passes.
pub struct AuthorizedStorageClient<R> {
    bytes_per_pass: u64,
    spender: SpendingController,
    get_rref: RrefResolver<R>,
}

impl<R: AuthorizedStorage> AuthorizedStorageClient<R> {
    #[must_use]
    pub fn new(bytes_per_pass: u64, spender: SpendingController, get_rref: RrefResolver<R>) -> Self {
        Self {
            bytes_per_pass,
            spender,
            get_rref,
        }
    }

    /// The controller issuing this client's passes.
    #[must_use]
    pub fn spender(&self) -> &SpendingController {
        &self.spender
    }

    /// Resolve and validate the remote reference for one call.
    ///
    /// # Errors
    /// [`ZkapError::IncorrectStorageServerReference`] if the reference
    /// advertises any interface other than [`REMOTE_INTERFACE_NAME`].
    fn rref(&self) -> Result<RemoteReference<R>> {
        let rref = (self.get_rref)();
        if rref.interface_name != REMOTE_INTERFACE_NAME {
            return Err(ZkapError::IncorrectStorageServerReference {
                furl: rref.furl,
                actual_name: rref.interface_name,
                expected_name: REMOTE_INTERFACE_NAME.to_string(),
            });
        }
        Ok(rref)
    }

    /// Invoke `op` with `count` passes bound to `message`, replacing
    /// rejected passes and retrying until the call succeeds, the pool
    /// runs dry, or the call fails some other way.
    async fn call_with_passes<T, F, Fut>(&self, message: &str, count: u64, mut op: F) -> Result<T>
    where
        F: FnMut(Vec<Vec<u8>>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut group = self
            .spender
            .get(message, usize::try_from(count).unwrap_or(usize::MAX))?;
        loop {
            let encoded = encode_passes(&group);
            match op(encoded).await {
                Ok(result) => {
                    // Commit the spend only once the operation succeeds.
                    group.mark_spent()?;
                    return Ok(result);
                }
                Err(ZkapError::MorePassesRequired {
                    valid_count,
                    required_count,
                    signature_check_failed,
                }) => {
                    if signature_check_failed.is_empty() {
                        // The call was simply under-supplied. The cost
                        // function should never let that happen, so err on
                        // the side of lack of service instead of burning
                        // extra value.
                        group.reset()?;
                        return Err(ZkapError::MorePassesRequired {
                            valid_count,
                            required_count,
                            signature_check_failed,
                        });
                    }
                    warn!(
                        binding = message,
                        rejected = signature_check_failed.len(),
                        "Signature check failed; replacing passes"
                    );
                    let (rejected, okay) = group.split(&signature_check_failed);
                    rejected.mark_invalid("signature check failed")?;
                    group = okay.expand(signature_check_failed.len())?;
                }
                Err(other) => {
                    group.reset()?;
                    return Err(other);
                }
            }
        }
    }

    // =====================================================================
    // Authorized operations
    // =====================================================================

    /// Allocate immutable buckets, paying for the requested size of every
    /// new share.
    pub async fn allocate_buckets(
        &self,
        storage_index: StorageIndex,
        renew_secret: RenewSecret,
        cancel_secret: CancelSecret,
        sharenums: BTreeSet<ShareNum>,
        allocated_size: u64,
    ) -> Result<AllocateResult> {
        let rref = self.rref()?;
        let message = allocate_buckets_message(&storage_index);
        let sizes = vec![allocated_size; sharenums.len()];
        let count = required_passes(self.bytes_per_pass, &sizes)?;
        debug!(storage_index = %storage_index.short(), count, "allocate_buckets");
        self.call_with_passes(&message, count, |passes| {
            rref.remote.allocate_buckets(
                passes,
                storage_index,
                renew_secret,
                cancel_secret,
                sharenums.clone(),
                allocated_size,
            )
        })
        .await
    }

    /// Add a lease to every share at the index, paying for the current
    /// stored size.
    pub async fn add_lease(
        &self,
        storage_index: StorageIndex,
        renew_secret: RenewSecret,
        cancel_secret: CancelSecret,
    ) -> Result<()> {
        let rref = self.rref()?;
        // Only the server knows how much is currently stored.
        let sizes: Vec<u64> = rref
            .remote
            .share_sizes(storage_index, None)
            .await?
            .into_values()
            .collect();
        let count = required_passes(self.bytes_per_pass, &sizes)?;
        debug!(storage_index = %storage_index.short(), count, "add_lease");
        self.call_with_passes(&add_lease_message(&storage_index), count, |passes| {
            rref.remote
                .add_lease(passes, storage_index, renew_secret, cancel_secret)
        })
        .await
    }

    /// Extend an existing lease, paying for the current stored size.
    pub async fn renew_lease(
        &self,
        storage_index: StorageIndex,
        renew_secret: RenewSecret,
    ) -> Result<()> {
        let rref = self.rref()?;
        let sizes: Vec<u64> = rref
            .remote
            .share_sizes(storage_index, None)
            .await?
            .into_values()
            .collect();
        let count = required_passes(self.bytes_per_pass, &sizes)?;
        debug!(storage_index = %storage_index.short(), count, "renew_lease");
        self.call_with_passes(&renew_lease_message(&storage_index), count, |passes| {
            rref.remote.renew_lease(passes, storage_index, renew_secret)
        })
        .await
    }

    /// Mutable-slot test-and-set. Read-only calls are free; writes pay for
    /// the storage increase they imply, as judged against the server's
    /// current share sizes.
    pub async fn slot_testv_and_readv_and_writev(
        &self,
        storage_index: StorageIndex,
        secrets: SlotSecrets,
        tw_vectors: TwVectors,
        r_vector: Vec<ReadVector>,
    ) -> Result<(bool, ReadData)> {
        let rref = self.rref()?;
        let count = if has_writes(&tw_vectors) {
            // We don't know the current storage requirements at this layer,
            // and a higher layer's guess wouldn't bind the server. Ask.
            let touched: BTreeSet<ShareNum> = tw_vectors.keys().copied().collect();
            let current = rref
                .remote
                .share_sizes(storage_index, Some(touched))
                .await?;
            required_new_passes_for_mutable_write(self.bytes_per_pass, &current, &tw_vectors)?
        } else {
            0
        };
        debug!(storage_index = %storage_index.short(), count, "slot_testv_and_readv_and_writev");
        self.call_with_passes(
            &slot_testv_and_readv_and_writev_message(&storage_index),
            count,
            |passes| {
                rref.remote.slot_testv_and_readv_and_writev(
                    passes,
                    storage_index,
                    secrets,
                    tw_vectors.clone(),
                    r_vector.clone(),
                )
            },
        )
        .await
    }

    // =====================================================================
    // Non-authorized pass-throughs
    // =====================================================================

    pub async fn get_version(&self) -> Result<VersionInfo> {
        self.rref()?.remote.get_version().await
    }

    pub async fn get_buckets(
        &self,
        storage_index: StorageIndex,
    ) -> Result<BTreeMap<ShareNum, u64>> {
        self.rref()?.remote.get_buckets(storage_index).await
    }

    pub async fn share_sizes(
        &self,
        storage_index: StorageIndex,
        sharenums: Option<BTreeSet<ShareNum>>,
    ) -> Result<BTreeMap<ShareNum, u64>> {
        self.rref()?
            .remote
            .share_sizes(storage_index, sharenums)
            .await
    }

    pub async fn stat_shares(
        &self,
        storage_indexes: Vec<StorageIndex>,
    ) -> Result<Vec<BTreeMap<ShareNum, ShareStat>>> {
        self.rref()?.remote.stat_shares(storage_indexes).await
    }

    pub async fn slot_readv(
        &self,
        storage_index: StorageIndex,
        shares: Option<Vec<ShareNum>>,
        r_vector: Vec<ReadVector>,
    ) -> Result<ReadData> {
        self.rref()?
            .remote
            .slot_readv(storage_index, shares, r_vector)
            .await
    }

    pub async fn advise_corrupt_share(
        &self,
        share_type: ShareType,
        storage_index: StorageIndex,
        sharenum: ShareNum,
        reason: String,
    ) -> Result<()> {
        self.rref()?
            .remote
            .advise_corrupt_share(share_type, storage_index, sharenum, reason)
            .await
    }
}

fn encode_passes(group: &PassGroup) -> Vec<Vec<u8>> {
    group
        .passes()
        .iter()
        .map(|pass| pass.as_bytes().to_vec())
        .collect()
}
