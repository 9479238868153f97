//! Server-side admission for the authorized storage protocol.
//!
//! Every authorized call walks the same gate sequence, fail-closed:
//!
//! ```text
//! Received → Structural-OK → Signed-OK → Sufficient → Delegated → Persisted
//! ```
//!
//! A structural failure, a bad signature, or a double-spent fingerprint
//! each count as a signature failure at that pass's index; if the
//! survivors fall short of the operation's cost the whole call is refused
//! with [`ZkapError::MorePassesRequired`] and **no** backend mutation
//! happens. Only once admission succeeds are the validated fingerprints
//! recorded and the call delegated; nothing past delegation is
//! reversible.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info, warn};
use zkapstore_types::constants::{MAX_PASSES_PER_CALL, SPENT_PASS_CACHE_SIZE};
use zkapstore_types::{
    AllocateResult, CancelSecret, Pass, ReadData, ReadVector, RenewSecret, Result, ShareNum,
    ShareStat, ShareType, SlotSecrets, StorageIndex, TwVectors, VersionInfo,
    add_lease_message, allocate_buckets_message, has_writes, renew_lease_message,
    required_new_passes_for_mutable_write, required_passes,
    slot_testv_and_readv_and_writev_message, ZkapError,
};

use crate::backend::StorageBackend;
use crate::mint::PassVerifier;
use crate::rref::AuthorizedStorage;
use crate::share_file;
use crate::spent_passes::SpentPassBook;

/// The server half of the protocol: admission in front of a delegated
/// [`StorageBackend`].
pub struct AuthorizedStorageServer<B, V> {
    backend: Mutex<B>,
    verifier: V,
    bytes_per_pass: u64,
    max_passes_per_call: usize,
    spent: Mutex<SpentPassBook>,
}

impl<B: StorageBackend, V: PassVerifier> AuthorizedStorageServer<B, V> {
    /// A server with the default per-call bound and spent-book capacity.
    #[must_use]
    pub fn new(backend: B, verifier: V, bytes_per_pass: u64) -> Self {
        Self::with_limits(
            backend,
            verifier,
            bytes_per_pass,
            MAX_PASSES_PER_CALL,
            SPENT_PASS_CACHE_SIZE,
        )
    }

    #[must_use]
    pub fn with_limits(
        backend: B,
        verifier: V,
        bytes_per_pass: u64,
        max_passes_per_call: usize,
        spent_cache_size: usize,
    ) -> Self {
        Self {
            backend: Mutex::new(backend),
            verifier,
            bytes_per_pass,
            max_passes_per_call,
            spent: Mutex::new(SpentPassBook::new(spent_cache_size)),
        }
    }

    fn backend(&self) -> MutexGuard<'_, B> {
        self.backend.lock().expect("storage backend lock poisoned")
    }

    /// Run the admission gates over a submitted pass list.
    ///
    /// Returns the number of passes consumed. On refusal nothing is
    /// recorded and the backend is untouched.
    fn validate_passes(&self, message: &str, passes: &[Vec<u8>], required: u64) -> Result<usize> {
        if passes.len() > self.max_passes_per_call {
            return Err(ZkapError::InvalidArgument {
                reason: format!(
                    "{} passes submitted, at most {} allowed per call",
                    passes.len(),
                    self.max_passes_per_call
                ),
            });
        }
        let required = usize::try_from(required).unwrap_or(usize::MAX);

        let mut spent = self.spent.lock().expect("spent-pass book lock poisoned");
        let mut signature_check_failed = Vec::new();
        let mut valid = Vec::new();
        let mut seen_this_call = HashSet::new();
        for (index, raw) in passes.iter().enumerate() {
            let Ok(pass) = Pass::try_from_bytes(raw) else {
                signature_check_failed.push(index);
                continue;
            };
            let fingerprint = pass.fingerprint();
            if !self.verifier.verify(message.as_bytes(), &pass)
                || spent.contains(&fingerprint)
                || !seen_this_call.insert(fingerprint)
            {
                signature_check_failed.push(index);
                continue;
            }
            valid.push(pass);
        }

        if valid.len() < required {
            warn!(
                binding = message,
                submitted = passes.len(),
                valid = valid.len(),
                required,
                rejected = ?signature_check_failed,
                "Admission refused"
            );
            return Err(ZkapError::MorePassesRequired {
                valid_count: valid.len(),
                required_count: required,
                signature_check_failed,
            });
        }
        for pass in &valid {
            spent.record(pass.fingerprint());
        }
        debug!(binding = message, consumed = valid.len(), required, "Passes admitted");
        Ok(valid.len())
    }
}

impl<B: StorageBackend, V: PassVerifier> AuthorizedStorage for AuthorizedStorageServer<B, V> {
    async fn get_version(&self) -> Result<VersionInfo> {
        Ok(self.backend().version())
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
        let message = allocate_buckets_message(&storage_index);
        let sizes = vec![allocated_size; sharenums.len()];
        let required = required_passes(self.bytes_per_pass, &sizes)?;
        self.validate_passes(&message, &passes, required)?;

        let result = self.backend().allocate_buckets(
            storage_index,
            &renew_secret,
            &cancel_secret,
            &sharenums,
            allocated_size,
        )?;
        info!(
            storage_index = %storage_index.short(),
            allocated = result.allocated.len(),
            alreadygot = result.alreadygot.len(),
            "Allocated immutable buckets"
        );
        Ok(result)
    }

    async fn get_buckets(
        &self,
        storage_index: StorageIndex,
    ) -> Result<BTreeMap<ShareNum, u64>> {
        self.backend().get_buckets(storage_index)
    }

    async fn add_lease(
        &self,
        passes: Vec<Vec<u8>>,
        storage_index: StorageIndex,
        renew_secret: RenewSecret,
        cancel_secret: CancelSecret,
    ) -> Result<()> {
        let message = add_lease_message(&storage_index);
        let sizes: Vec<u64> = self
            .backend()
            .share_sizes(storage_index, None)?
            .into_values()
            .collect();
        let required = required_passes(self.bytes_per_pass, &sizes)?;
        self.validate_passes(&message, &passes, required)?;

        self.backend()
            .add_lease(storage_index, &renew_secret, &cancel_secret)?;
        info!(storage_index = %storage_index.short(), "Lease added");
        Ok(())
    }

    async fn renew_lease(
        &self,
        passes: Vec<Vec<u8>>,
        storage_index: StorageIndex,
        renew_secret: RenewSecret,
    ) -> Result<()> {
        let message = renew_lease_message(&storage_index);
        let sizes: Vec<u64> = self
            .backend()
            .share_sizes(storage_index, None)?
            .into_values()
            .collect();
        let required = required_passes(self.bytes_per_pass, &sizes)?;
        self.validate_passes(&message, &passes, required)?;

        self.backend().renew_lease(storage_index, &renew_secret)?;
        info!(storage_index = %storage_index.short(), "Lease renewed");
        Ok(())
    }

    async fn share_sizes(
        &self,
        storage_index: StorageIndex,
        sharenums: Option<BTreeSet<ShareNum>>,
    ) -> Result<BTreeMap<ShareNum, u64>> {
        self.backend().share_sizes(storage_index, sharenums.as_ref())
    }

    async fn stat_shares(
        &self,
        storage_indexes: Vec<StorageIndex>,
    ) -> Result<Vec<BTreeMap<ShareNum, ShareStat>>> {
        let backend = self.backend();
        let mut stats = Vec::with_capacity(storage_indexes.len());
        for storage_index in storage_indexes {
            let mut per_share = BTreeMap::new();
            for (sharenum, path) in backend.bucket_share_paths(storage_index)? {
                per_share.insert(sharenum, share_file::stat_share(&path)?);
            }
            stats.push(per_share);
        }
        Ok(stats)
    }

    async fn slot_testv_and_readv_and_writev(
        &self,
        passes: Vec<Vec<u8>>,
        storage_index: StorageIndex,
        secrets: SlotSecrets,
        tw_vectors: TwVectors,
        r_vector: Vec<ReadVector>,
    ) -> Result<(bool, ReadData)> {
        let message = slot_testv_and_readv_and_writev_message(&storage_index);
        // Reads are free; writes pay for the growth they imply.
        let required = if has_writes(&tw_vectors) {
            let touched: BTreeSet<ShareNum> = tw_vectors.keys().copied().collect();
            let current = self.backend().share_sizes(storage_index, Some(&touched))?;
            required_new_passes_for_mutable_write(self.bytes_per_pass, &current, &tw_vectors)?
        } else {
            0
        };
        self.validate_passes(&message, &passes, required)?;

        self.backend()
            .slot_testv_and_readv_and_writev(storage_index, &secrets, &tw_vectors, &r_vector)
    }

    async fn slot_readv(
        &self,
        storage_index: StorageIndex,
        shares: Option<Vec<ShareNum>>,
        r_vector: Vec<ReadVector>,
    ) -> Result<ReadData> {
        self.backend()
            .slot_readv(storage_index, shares.as_deref(), &r_vector)
    }

    async fn advise_corrupt_share(
        &self,
        share_type: ShareType,
        storage_index: StorageIndex,
        sharenum: ShareNum,
        reason: String,
    ) -> Result<()> {
        warn!(
            %share_type,
            storage_index = %storage_index.short(),
            %sharenum,
            reason,
            "Corruption advisory received"
        );
        self.backend()
            .advise_corrupt_share(share_type, storage_index, sharenum, &reason)
    }
}

#[cfg(test)]
mod tests {
    use zkapstore_spending::PassMinter;
    use zkapstore_types::UnblindedToken;

    use super::*;
    use crate::backend::MemoryBackend;
    use crate::mint::TokenSigner;

    const PASS_VALUE: u64 = 128 * 1024;

    fn server(
        dir: &tempfile::TempDir,
    ) -> (AuthorizedStorageServer<MemoryBackend, TokenSigner>, TokenSigner) {
        let signer = TokenSigner::random();
        let backend = MemoryBackend::with_clock(dir.path().to_path_buf(), Box::new(|| 1_000_000));
        let server = AuthorizedStorageServer::new(backend, signer.clone(), PASS_VALUE);
        (server, signer)
    }

    fn passes(signer: &TokenSigner, message: &str, count: usize) -> Vec<Vec<u8>> {
        let tokens: Vec<UnblindedToken> =
            (0..count).map(|_| UnblindedToken::random()).collect();
        signer
            .tokens_to_passes(message.as_bytes(), &tokens)
            .unwrap()
            .into_iter()
            .map(|p| p.as_bytes().to_vec())
            .collect()
    }

    #[tokio::test]
    async fn rejected_passes_reported_by_index() {
        let dir = tempfile::tempdir().unwrap();
        let (server, signer) = server(&dir);
        let si = StorageIndex::random();
        let message = allocate_buckets_message(&si);

        // Five one-pass shares cost 5 passes; indices 1 and 3 carry
        // signatures from a key the server does not trust.
        let sharenums: BTreeSet<ShareNum> = (0..5).map(ShareNum).collect();
        let stranger = TokenSigner::random();
        let mut submitted = passes(&signer, &message, 5);
        submitted[1] = passes(&stranger, &message, 1).remove(0);
        submitted[3] = passes(&stranger, &message, 1).remove(0);

        let secrets = zkapstore_types::SlotSecrets::random();
        let err = server
            .allocate_buckets(
                submitted,
                si,
                secrets.renew_secret,
                secrets.cancel_secret,
                sharenums,
                PASS_VALUE,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ZkapError::MorePassesRequired {
                valid_count: 3,
                required_count: 5,
                ref signature_check_failed,
            } if *signature_check_failed == vec![1, 3]
        ));

        // Admission failure must not have touched the backend.
        assert!(server.get_buckets(si).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_pass_counts_as_signature_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (server, signer) = server(&dir);
        let si = StorageIndex::random();
        let message = allocate_buckets_message(&si);

        let mut submitted = passes(&signer, &message, 2);
        submitted[0] = b"way too short".to_vec();

        let secrets = zkapstore_types::SlotSecrets::random();
        let err = server
            .allocate_buckets(
                submitted,
                si,
                secrets.renew_secret,
                secrets.cancel_secret,
                [ShareNum(0), ShareNum(1)].into(),
                PASS_VALUE,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ZkapError::MorePassesRequired {
                valid_count: 1,
                required_count: 2,
                ref signature_check_failed,
            } if *signature_check_failed == vec![0]
        ));
    }

    #[tokio::test]
    async fn pass_bound_to_other_operation_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (server, signer) = server(&dir);
        let si = StorageIndex::random();

        // Minted for renew_lease, replayed against allocate_buckets.
        let submitted = passes(&signer, &renew_lease_message(&si), 1);
        let secrets = zkapstore_types::SlotSecrets::random();
        let err = server
            .allocate_buckets(
                submitted,
                si,
                secrets.renew_secret,
                secrets.cancel_secret,
                [ShareNum(0)].into(),
                100,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ZkapError::MorePassesRequired {
                valid_count: 0,
                required_count: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn duplicate_submission_rejected_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let (server, signer) = server(&dir);
        let si = StorageIndex::random();
        let message = allocate_buckets_message(&si);
        let submitted = passes(&signer, &message, 1);
        let secrets = zkapstore_types::SlotSecrets::random();

        server
            .allocate_buckets(
                submitted.clone(),
                si,
                secrets.renew_secret,
                secrets.cancel_secret,
                [ShareNum(0)].into(),
                100,
            )
            .await
            .unwrap();

        // The same pass again: reported as a signature failure at its
        // index, exactly like a forgery.
        let err = server
            .allocate_buckets(
                submitted,
                si,
                secrets.renew_secret,
                secrets.cancel_secret,
                [ShareNum(1)].into(),
                100,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ZkapError::MorePassesRequired {
                valid_count: 0,
                required_count: 1,
                ref signature_check_failed,
            } if *signature_check_failed == vec![0]
        ));
    }

    #[tokio::test]
    async fn duplicate_within_one_call_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (server, signer) = server(&dir);
        let si = StorageIndex::random();
        let message = allocate_buckets_message(&si);
        let one = passes(&signer, &message, 1).remove(0);

        let secrets = zkapstore_types::SlotSecrets::random();
        let err = server
            .allocate_buckets(
                vec![one.clone(), one],
                si,
                secrets.renew_secret,
                secrets.cancel_secret,
                [ShareNum(0), ShareNum(1)].into(),
                PASS_VALUE,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ZkapError::MorePassesRequired {
                valid_count: 1,
                required_count: 2,
                ref signature_check_failed,
            } if *signature_check_failed == vec![1]
        ));
    }

    #[tokio::test]
    async fn oversized_pass_list_refused() {
        let dir = tempfile::tempdir().unwrap();
        let (server, signer) = server(&dir);
        let si = StorageIndex::random();
        let message = allocate_buckets_message(&si);
        let submitted = passes(&signer, &message, MAX_PASSES_PER_CALL + 1);

        let secrets = zkapstore_types::SlotSecrets::random();
        let err = server
            .allocate_buckets(
                submitted,
                si,
                secrets.renew_secret,
                secrets.cancel_secret,
                [ShareNum(0)].into(),
                100,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ZkapError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn surplus_valid_passes_admit_the_call() {
        let dir = tempfile::tempdir().unwrap();
        let (server, signer) = server(&dir);
        let si = StorageIndex::random();
        let message = allocate_buckets_message(&si);

        // One bad pass among three, but only two are required.
        let stranger = TokenSigner::random();
        let mut submitted = passes(&signer, &message, 3);
        submitted[2] = passes(&stranger, &message, 1).remove(0);

        let secrets = zkapstore_types::SlotSecrets::random();
        let result = server
            .allocate_buckets(
                submitted,
                si,
                secrets.renew_secret,
                secrets.cancel_secret,
                [ShareNum(0), ShareNum(1)].into(),
                PASS_VALUE,
            )
            .await
            .unwrap();
        assert_eq!(result.allocated.len(), 2);
    }

    #[tokio::test]
    async fn read_only_slot_call_needs_no_passes() {
        let dir = tempfile::tempdir().unwrap();
        let (server, _) = server(&dir);
        let si = StorageIndex::random();

        let (wrote, read) = server
            .slot_testv_and_readv_and_writev(
                Vec::new(),
                si,
                zkapstore_types::SlotSecrets::random(),
                TwVectors::new(),
                vec![ReadVector { offset: 0, size: 8 }],
            )
            .await
            .unwrap();
        assert!(wrote);
        assert!(read.is_empty());
    }
}
