//! The delegated object store behind the authorized server.
//!
//! The server owns admission; everything after it is the backend's
//! business. [`StorageBackend`] is the seam to the pre-existing storage
//! implementation: immutable buckets, mutable slots, leases, and the
//! share-file paths the stat machinery parses.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::PathBuf;

use zkapstore_types::{
    AllocateResult, CancelSecret, ReadData, ReadVector, RenewSecret, Result, ShareNum, ShareType,
    SlotSecrets, StorageIndex, TwVectors, VersionInfo,
};

/// The underlying anonymous object store the server delegates to once a
/// call has been admitted. Implementations are synchronous; the server
/// serializes access behind its own lock.
pub trait StorageBackend: Send {
    /// Server identification for `get_version`.
    fn version(&self) -> VersionInfo;

    /// Create zero-filled immutable shares under a lease.
    fn allocate_buckets(
        &mut self,
        storage_index: StorageIndex,
        renew_secret: &RenewSecret,
        cancel_secret: &CancelSecret,
        sharenums: &BTreeSet<ShareNum>,
        allocated_size: u64,
    ) -> Result<AllocateResult>;

    /// Readable immutable shares and their data sizes.
    fn get_buckets(&self, storage_index: StorageIndex) -> Result<BTreeMap<ShareNum, u64>>;

    /// Add a lease to every share at the index. An existing lease under
    /// the same renew secret is renewed instead.
    fn add_lease(
        &mut self,
        storage_index: StorageIndex,
        renew_secret: &RenewSecret,
        cancel_secret: &CancelSecret,
    ) -> Result<()>;

    /// Extend the lease carrying `renew_secret` on every share.
    fn renew_lease(&mut self, storage_index: StorageIndex, renew_secret: &RenewSecret)
    -> Result<()>;

    /// Current data sizes of the given shares (immutable and mutable);
    /// all shares when `sharenums` is `None`.
    fn share_sizes(
        &self,
        storage_index: StorageIndex,
        sharenums: Option<&BTreeSet<ShareNum>>,
    ) -> Result<BTreeMap<ShareNum, u64>>;

    /// Paths of the share files stored at the index, for stat.
    fn bucket_share_paths(&self, storage_index: StorageIndex)
    -> Result<Vec<(ShareNum, PathBuf)>>;

    /// Mutable-slot test-and-set: check the test vectors, then apply the
    /// write vectors (zero-filling gaps, truncating to `new_length`), and
    /// return the pre-write reads.
    fn slot_testv_and_readv_and_writev(
        &mut self,
        storage_index: StorageIndex,
        secrets: &SlotSecrets,
        tw_vectors: &TwVectors,
        r_vector: &[ReadVector],
    ) -> Result<(bool, ReadData)>;

    /// Mutable-slot read.
    fn slot_readv(
        &self,
        storage_index: StorageIndex,
        shares: Option<&[ShareNum]>,
        r_vector: &[ReadVector],
    ) -> Result<ReadData>;

    /// Record a corruption advisory.
    fn advise_corrupt_share(
        &mut self,
        share_type: ShareType,
        storage_index: StorageIndex,
        sharenum: ShareNum,
        reason: &str,
    ) -> Result<()>;
}

// ---------------------------------------------------------------------------
// MemoryBackend
// ---------------------------------------------------------------------------

pub use memory::{CorruptionAdvisory, MemoryBackend, PosixClock};

mod memory {
    use std::fs;

    use zkapstore_types::constants::{LEASE_PERIOD_SECS, SHARE_VERSION};
    use zkapstore_types::{TestWriteVectors, ZkapError};

    use super::{
        AllocateResult, BTreeMap, BTreeSet, CancelSecret, PathBuf, ReadData, ReadVector,
        RenewSecret, Result, ShareNum, ShareType, SlotSecrets, StorageBackend, StorageIndex,
        TwVectors, VersionInfo,
    };
    use crate::share_file::{self, Lease};

    /// Clock reporting POSIX seconds; injectable so tests can pin lease
    /// arithmetic.
    pub type PosixClock = Box<dyn Fn() -> u64 + Send>;

    fn system_clock() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    struct MutableSlot {
        write_enabler: [u8; 32],
        shares: BTreeMap<ShareNum, Vec<u8>>,
        leases: Vec<(RenewSecret, u64)>,
    }

    /// A corruption report captured by `advise_corrupt_share`.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct CorruptionAdvisory {
        pub share_type: ShareType,
        pub storage_index: StorageIndex,
        pub sharenum: ShareNum,
        pub reason: String,
    }

    /// A self-contained object store: immutable shares live as real
    /// share files under a root directory, mutable slots in memory.
    /// Complete enough for tests and single-node deployments; a real
    /// deployment wraps the production object store instead.
    pub struct MemoryBackend {
        share_root: PathBuf,
        slots: BTreeMap<StorageIndex, MutableSlot>,
        advisories: Vec<CorruptionAdvisory>,
        clock: PosixClock,
    }

    impl MemoryBackend {
        #[must_use]
        pub fn new(share_root: PathBuf) -> Self {
            Self::with_clock(share_root, Box::new(system_clock))
        }

        #[must_use]
        pub fn with_clock(share_root: PathBuf, clock: PosixClock) -> Self {
            Self {
                share_root,
                slots: BTreeMap::new(),
                advisories: Vec::new(),
                clock,
            }
        }

        /// Corruption advisories received so far.
        #[must_use]
        pub fn advisories(&self) -> &[CorruptionAdvisory] {
            &self.advisories
        }

        /// Directory holding the share files of one storage index.
        #[must_use]
        pub fn bucket_dir(&self, storage_index: StorageIndex) -> PathBuf {
            self.share_root.join(storage_index.to_string())
        }

        fn lease_expiration(&self) -> u64 {
            (self.clock)() + LEASE_PERIOD_SECS
        }

        fn immutable_shares(
            &self,
            storage_index: StorageIndex,
        ) -> Result<Vec<(ShareNum, PathBuf)>> {
            let dir = self.bucket_dir(storage_index);
            if !dir.is_dir() {
                return Ok(Vec::new());
            }
            let mut shares = Vec::new();
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let name = entry.file_name();
                let Some(sharenum) = name.to_str().and_then(|s| s.parse::<u32>().ok()) else {
                    continue;
                };
                shares.push((ShareNum(sharenum), entry.path()));
            }
            shares.sort_by_key(|(sharenum, _)| *sharenum);
            Ok(shares)
        }

        fn read_span(data: &[u8], rv: &ReadVector) -> Vec<u8> {
            let len = data.len() as u64;
            if rv.offset >= len {
                return Vec::new();
            }
            let end = len.min(rv.offset + rv.size) as usize;
            data[rv.offset as usize..end].to_vec()
        }

        fn apply_vectors(data: &mut Vec<u8>, vectors: &TestWriteVectors) {
            for wv in &vectors.write {
                let end = wv.offset as usize + wv.data.len();
                if data.len() < end {
                    data.resize(end, 0);
                }
                data[wv.offset as usize..end].copy_from_slice(&wv.data);
            }
            if let Some(new_length) = vectors.new_length {
                let new_length = new_length as usize;
                if data.len() > new_length {
                    data.truncate(new_length);
                }
            }
        }

        fn tests_pass(data: &[u8], vectors: &TestWriteVectors) -> bool {
            vectors.test.iter().all(|tv| {
                let span = Self::read_span(
                    data,
                    &ReadVector {
                        offset: tv.offset,
                        size: tv.specimen.len() as u64,
                    },
                );
                span == tv.specimen
            })
        }
    }

    impl StorageBackend for MemoryBackend {
        fn version(&self) -> VersionInfo {
            VersionInfo {
                engine: zkapstore_types::constants::ENGINE_NAME.to_string(),
                version: zkapstore_types::constants::VERSION.to_string(),
                maximum_immutable_share_size: u64::from(u32::MAX),
            }
        }

        fn allocate_buckets(
            &mut self,
            storage_index: StorageIndex,
            renew_secret: &RenewSecret,
            cancel_secret: &CancelSecret,
            sharenums: &BTreeSet<ShareNum>,
            allocated_size: u64,
        ) -> Result<AllocateResult> {
            let dir = self.bucket_dir(storage_index);
            fs::create_dir_all(&dir)?;
            let expiration = self.lease_expiration();
            let mut result = AllocateResult::default();
            for sharenum in sharenums {
                let path = dir.join(sharenum.0.to_string());
                if path.exists() {
                    result.alreadygot.insert(*sharenum);
                    continue;
                }
                share_file::write_share(
                    &path,
                    SHARE_VERSION,
                    allocated_size,
                    &[Lease {
                        renew_secret: *renew_secret,
                        cancel_secret: *cancel_secret,
                        expiration,
                    }],
                )?;
                result.allocated.insert(*sharenum);
            }
            Ok(result)
        }

        fn get_buckets(
            &self,
            storage_index: StorageIndex,
        ) -> Result<BTreeMap<ShareNum, u64>> {
            let mut buckets = BTreeMap::new();
            for (sharenum, path) in self.immutable_shares(storage_index)? {
                buckets.insert(sharenum, share_file::stat_share(&path)?.size);
            }
            Ok(buckets)
        }

        fn add_lease(
            &mut self,
            storage_index: StorageIndex,
            renew_secret: &RenewSecret,
            cancel_secret: &CancelSecret,
        ) -> Result<()> {
            let expiration = self.lease_expiration();
            for (_, path) in self.immutable_shares(storage_index)? {
                // Same renew secret means implicit renewal, not a second
                // lease.
                if !share_file::renew_lease(&path, renew_secret, expiration)? {
                    share_file::append_lease(
                        &path,
                        &Lease {
                            renew_secret: *renew_secret,
                            cancel_secret: *cancel_secret,
                            expiration,
                        },
                    )?;
                }
            }
            if let Some(slot) = self.slots.get_mut(&storage_index) {
                match slot.leases.iter_mut().find(|(rs, _)| rs == renew_secret) {
                    Some((_, exp)) => *exp = expiration,
                    None => slot.leases.push((*renew_secret, expiration)),
                }
            }
            Ok(())
        }

        fn renew_lease(
            &mut self,
            storage_index: StorageIndex,
            renew_secret: &RenewSecret,
        ) -> Result<()> {
            let expiration = self.lease_expiration();
            let mut renewed = false;
            for (_, path) in self.immutable_shares(storage_index)? {
                renewed |= share_file::renew_lease(&path, renew_secret, expiration)?;
            }
            if let Some(slot) = self.slots.get_mut(&storage_index) {
                for (rs, exp) in &mut slot.leases {
                    if rs == renew_secret {
                        *exp = expiration;
                        renewed = true;
                    }
                }
            }
            if renewed {
                Ok(())
            } else {
                Err(ZkapError::Backend {
                    reason: format!("no lease under that secret at {storage_index}"),
                })
            }
        }

        fn share_sizes(
            &self,
            storage_index: StorageIndex,
            sharenums: Option<&BTreeSet<ShareNum>>,
        ) -> Result<BTreeMap<ShareNum, u64>> {
            let wanted = |sharenum: ShareNum| sharenums.is_none_or(|s| s.contains(&sharenum));
            let mut sizes = BTreeMap::new();
            for (sharenum, path) in self.immutable_shares(storage_index)? {
                if wanted(sharenum) {
                    sizes.insert(sharenum, share_file::stat_share(&path)?.size);
                }
            }
            if let Some(slot) = self.slots.get(&storage_index) {
                for (sharenum, data) in &slot.shares {
                    if wanted(*sharenum) {
                        sizes.insert(*sharenum, data.len() as u64);
                    }
                }
            }
            Ok(sizes)
        }

        fn bucket_share_paths(
            &self,
            storage_index: StorageIndex,
        ) -> Result<Vec<(ShareNum, PathBuf)>> {
            self.immutable_shares(storage_index)
        }

        fn slot_testv_and_readv_and_writev(
            &mut self,
            storage_index: StorageIndex,
            secrets: &SlotSecrets,
            tw_vectors: &TwVectors,
            r_vector: &[ReadVector],
        ) -> Result<(bool, ReadData)> {
            let expiration = self.lease_expiration();
            let slot = self
                .slots
                .entry(storage_index)
                .or_insert_with(|| MutableSlot {
                    write_enabler: secrets.write_enabler.0,
                    shares: BTreeMap::new(),
                    leases: vec![(secrets.renew_secret, expiration)],
                });
            if slot.write_enabler != secrets.write_enabler.0 {
                return Err(ZkapError::Backend {
                    reason: format!("bad write enabler for slot {storage_index}"),
                });
            }

            // Reads and test vectors see pre-write state.
            let mut read_data = ReadData::new();
            for (sharenum, data) in &slot.shares {
                read_data.insert(
                    *sharenum,
                    r_vector.iter().map(|rv| Self::read_span(data, rv)).collect(),
                );
            }
            let empty = Vec::new();
            let tests_good = tw_vectors.iter().all(|(sharenum, vectors)| {
                let data = slot.shares.get(sharenum).unwrap_or(&empty);
                Self::tests_pass(data, vectors)
            });
            if !tests_good {
                return Ok((false, read_data));
            }
            for (sharenum, vectors) in tw_vectors {
                let data = slot.shares.entry(*sharenum).or_default();
                Self::apply_vectors(data, vectors);
            }
            Ok((true, read_data))
        }

        fn slot_readv(
            &self,
            storage_index: StorageIndex,
            shares: Option<&[ShareNum]>,
            r_vector: &[ReadVector],
        ) -> Result<ReadData> {
            let mut read_data = ReadData::new();
            let Some(slot) = self.slots.get(&storage_index) else {
                return Ok(read_data);
            };
            for (sharenum, data) in &slot.shares {
                let wanted = shares.is_none_or(|s| s.contains(sharenum));
                if wanted {
                    read_data.insert(
                        *sharenum,
                        r_vector.iter().map(|rv| Self::read_span(data, rv)).collect(),
                    );
                }
            }
            Ok(read_data)
        }

        fn advise_corrupt_share(
            &mut self,
            share_type: ShareType,
            storage_index: StorageIndex,
            sharenum: ShareNum,
            reason: &str,
        ) -> Result<()> {
            self.advisories.push(CorruptionAdvisory {
                share_type,
                storage_index,
                sharenum,
                reason: reason.to_string(),
            });
            Ok(())
        }
    }

    impl MemoryBackend {
        /// Expiration of the leases held by a mutable slot, in grant order.
        #[must_use]
        pub fn slot_lease_expirations(&self, storage_index: StorageIndex) -> Vec<u64> {
            self.slots
                .get(&storage_index)
                .map(|slot| slot.leases.iter().map(|(_, exp)| *exp).collect())
                .unwrap_or_default()
        }
    }
}

#[cfg(test)]
mod tests {
    use zkapstore_types::{
        ReadVector, ShareNum, SlotSecrets, StorageIndex, TestVector, TestWriteVectors,
        WriteVector,
    };

    use super::{MemoryBackend, StorageBackend};

    fn backend() -> (MemoryBackend, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let backend = MemoryBackend::with_clock(dir.path().to_path_buf(), Box::new(|| 1_000_000));
        (backend, dir)
    }

    fn write(offset: u64, data: &[u8]) -> TestWriteVectors {
        TestWriteVectors {
            write: vec![WriteVector {
                offset,
                data: data.to_vec(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn allocate_reports_existing_shares() {
        let (mut backend, _dir) = backend();
        let si = StorageIndex::random();
        let secrets = SlotSecrets::random();

        let first = backend
            .allocate_buckets(
                si,
                &secrets.renew_secret,
                &secrets.cancel_secret,
                &[ShareNum(0), ShareNum(1)].into(),
                1000,
            )
            .unwrap();
        assert_eq!(first.allocated.len(), 2);
        assert!(first.alreadygot.is_empty());

        let second = backend
            .allocate_buckets(
                si,
                &secrets.renew_secret,
                &secrets.cancel_secret,
                &[ShareNum(1), ShareNum(2)].into(),
                1000,
            )
            .unwrap();
        assert_eq!(second.alreadygot, [ShareNum(1)].into());
        assert_eq!(second.allocated, [ShareNum(2)].into());

        let buckets = backend.get_buckets(si).unwrap();
        assert_eq!(buckets.len(), 3);
        assert!(buckets.values().all(|size| *size == 1000));
    }

    #[test]
    fn slot_write_then_read_back_with_zero_fill() {
        let (mut backend, _dir) = backend();
        let si = StorageIndex::random();
        let secrets = SlotSecrets::random();

        let tw = [(ShareNum(0), write(5, b"hello"))].into();
        let (wrote, _) = backend
            .slot_testv_and_readv_and_writev(si, &secrets, &tw, &[])
            .unwrap();
        assert!(wrote);

        let read = backend
            .slot_readv(si, None, &[ReadVector { offset: 0, size: 10 }])
            .unwrap();
        assert_eq!(read[&ShareNum(0)], vec![b"\0\0\0\0\0hello".to_vec()]);
    }

    #[test]
    fn failed_test_vector_blocks_write() {
        let (mut backend, _dir) = backend();
        let si = StorageIndex::random();
        let secrets = SlotSecrets::random();

        let tw = [(ShareNum(0), write(0, b"v1"))].into();
        backend
            .slot_testv_and_readv_and_writev(si, &secrets, &tw, &[])
            .unwrap();

        let guarded = TestWriteVectors {
            test: vec![TestVector {
                offset: 0,
                specimen: b"xx".to_vec(),
            }],
            write: vec![WriteVector {
                offset: 0,
                data: b"v2".to_vec(),
            }],
            new_length: None,
        };
        let (wrote, _) = backend
            .slot_testv_and_readv_and_writev(si, &secrets, &[(ShareNum(0), guarded)].into(), &[])
            .unwrap();
        assert!(!wrote);

        let read = backend
            .slot_readv(si, None, &[ReadVector { offset: 0, size: 2 }])
            .unwrap();
        assert_eq!(read[&ShareNum(0)], vec![b"v1".to_vec()]);
    }

    #[test]
    fn new_length_truncates() {
        let (mut backend, _dir) = backend();
        let si = StorageIndex::random();
        let secrets = SlotSecrets::random();

        let tw = [(ShareNum(0), write(0, b"a long payload"))].into();
        backend
            .slot_testv_and_readv_and_writev(si, &secrets, &tw, &[])
            .unwrap();

        let truncate = TestWriteVectors {
            new_length: Some(6),
            ..Default::default()
        };
        backend
            .slot_testv_and_readv_and_writev(si, &secrets, &[(ShareNum(0), truncate)].into(), &[])
            .unwrap();

        let sizes = backend.share_sizes(si, None).unwrap();
        assert_eq!(sizes[&ShareNum(0)], 6);
    }

    #[test]
    fn rewrite_preserves_slot_leases() {
        let (mut backend, _dir) = backend();
        let si = StorageIndex::random();
        let secrets = SlotSecrets::random();

        let tw = [(ShareNum(0), write(0, b"one"))].into();
        backend
            .slot_testv_and_readv_and_writev(si, &secrets, &tw, &[])
            .unwrap();
        let leases_before = backend.slot_lease_expirations(si);

        let tw = [(ShareNum(0), write(0, b"two"))].into();
        backend
            .slot_testv_and_readv_and_writev(si, &secrets, &tw, &[])
            .unwrap();
        assert_eq!(backend.slot_lease_expirations(si), leases_before);
    }

    #[test]
    fn wrong_write_enabler_rejected() {
        let (mut backend, _dir) = backend();
        let si = StorageIndex::random();

        let tw = [(ShareNum(0), write(0, b"data"))].into();
        backend
            .slot_testv_and_readv_and_writev(si, &SlotSecrets::random(), &tw, &[])
            .unwrap();
        let err = backend
            .slot_testv_and_readv_and_writev(si, &SlotSecrets::random(), &tw, &[])
            .unwrap_err();
        assert!(matches!(err, zkapstore_types::ZkapError::Backend { .. }));
    }

    #[test]
    fn share_sizes_filters_and_merges() {
        let (mut backend, _dir) = backend();
        let si = StorageIndex::random();
        let secrets = SlotSecrets::random();

        backend
            .allocate_buckets(
                si,
                &secrets.renew_secret,
                &secrets.cancel_secret,
                &[ShareNum(0)].into(),
                500,
            )
            .unwrap();
        let tw = [(ShareNum(5), write(0, b"mutable data"))].into();
        backend
            .slot_testv_and_readv_and_writev(si, &secrets, &tw, &[])
            .unwrap();

        let all = backend.share_sizes(si, None).unwrap();
        assert_eq!(all[&ShareNum(0)], 500);
        assert_eq!(all[&ShareNum(5)], 12);

        let filtered = backend
            .share_sizes(si, Some(&[ShareNum(5)].into()))
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[&ShareNum(5)], 12);
    }
}
