//! Immutable share-file container: stat, create, and lease maintenance.
//!
//! Layout (all integers big-endian):
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ header: version u32 · internal_size u32 ·    │  12 bytes
//! │         lease_count u32                      │
//! ├──────────────────────────────────────────────┤
//! │ share data                                   │  size bytes
//! ├──────────────────────────────────────────────┤
//! │ lease records: owner u32 · renew [u8;32] ·   │  72 bytes each
//! │   cancel [u8;32] · expiration u32            │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! `internal_size` saturates at `u32::MAX`; the authoritative data size is
//! computed from the file length and the lease count, so multi-gigabyte
//! shares stat correctly. A file that ends inside the header or inside the
//! lease region is malformed and stats as [`ZkapError::InvalidShare`].

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use zkapstore_types::constants::{SHARE_HEADER_LENGTH, SHARE_LEASE_LENGTH, SHARE_VERSION};
use zkapstore_types::{CancelSecret, RenewSecret, Result, ShareStat, ZkapError};

/// One lease record inside a share file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub renew_secret: RenewSecret,
    pub cancel_secret: CancelSecret,
    pub expiration: u64,
}

fn truncated(path: &Path, what: &str) -> ZkapError {
    ZkapError::InvalidShare {
        reason: format!("{}: truncated {what}", path.display()),
    }
}

fn read_header(file: &mut File, path: &Path) -> Result<(u32, u32, u32)> {
    let mut header = [0u8; SHARE_HEADER_LENGTH];
    file.read_exact(&mut header)
        .map_err(|_| truncated(path, "header"))?;
    let version = u32::from_be_bytes(header[0..4].try_into().expect("4-byte slice"));
    let internal_size = u32::from_be_bytes(header[4..8].try_into().expect("4-byte slice"));
    let lease_count = u32::from_be_bytes(header[8..12].try_into().expect("4-byte slice"));
    Ok((version, internal_size, lease_count))
}

fn encode_lease(lease: &Lease) -> [u8; SHARE_LEASE_LENGTH] {
    let mut record = [0u8; SHARE_LEASE_LENGTH];
    // owner stays zero
    record[4..36].copy_from_slice(&lease.renew_secret.0);
    record[36..68].copy_from_slice(&lease.cancel_secret.0);
    let expiration = u32::try_from(lease.expiration).unwrap_or(u32::MAX);
    record[68..72].copy_from_slice(&expiration.to_be_bytes());
    record
}

fn decode_lease(record: &[u8; SHARE_LEASE_LENGTH]) -> Lease {
    let mut renew = [0u8; 32];
    renew.copy_from_slice(&record[4..36]);
    let mut cancel = [0u8; 32];
    cancel.copy_from_slice(&record[36..68]);
    let expiration = u32::from_be_bytes(record[68..72].try_into().expect("4-byte slice"));
    Lease {
        renew_secret: RenewSecret(renew),
        cancel_secret: CancelSecret(cancel),
        expiration: u64::from(expiration),
    }
}

/// Create a share file of `size` zero bytes with the given leases.
pub fn write_share(path: &Path, version: u32, size: u64, leases: &[Lease]) -> Result<()> {
    let mut file = File::create(path)?;
    let internal_size = u32::try_from(size).unwrap_or(u32::MAX);
    file.write_all(&version.to_be_bytes())?;
    file.write_all(&internal_size.to_be_bytes())?;
    file.write_all(&u32::try_from(leases.len()).unwrap_or(u32::MAX).to_be_bytes())?;
    // Zero-fill the data region without materializing it.
    if size > 0 {
        file.seek(SeekFrom::Current(
            i64::try_from(size - 1).unwrap_or(i64::MAX),
        ))?;
        file.write_all(&[0])?;
    }
    for lease in leases {
        file.write_all(&encode_lease(lease))?;
    }
    Ok(())
}

/// Size and lease information for one share file.
///
/// # Errors
/// [`ZkapError::InvalidShare`] if the file is truncated or carries an
/// unsupported container version.
pub fn stat_share(path: &Path) -> Result<ShareStat> {
    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let (version, _internal_size, lease_count) = read_header(&mut file, path)?;
    if version != SHARE_VERSION {
        return Err(ZkapError::InvalidShare {
            reason: format!("{}: unsupported version {version}", path.display()),
        });
    }
    let lease_bytes = u64::from(lease_count) * SHARE_LEASE_LENGTH as u64;
    let overhead = SHARE_HEADER_LENGTH as u64 + lease_bytes;
    if file_len < overhead {
        return Err(truncated(path, "lease region"));
    }
    let size = file_len - overhead;
    let lease_expiration = read_leases_from(&mut file, path, file_len, lease_count)?
        .iter()
        .map(|lease| lease.expiration)
        .max()
        .unwrap_or(0);
    Ok(ShareStat {
        size,
        lease_expiration,
    })
}

fn read_leases_from(
    file: &mut File,
    path: &Path,
    file_len: u64,
    lease_count: u32,
) -> Result<Vec<Lease>> {
    let lease_bytes = u64::from(lease_count) * SHARE_LEASE_LENGTH as u64;
    file.seek(SeekFrom::Start(file_len - lease_bytes))?;
    let mut leases = Vec::with_capacity(lease_count as usize);
    for _ in 0..lease_count {
        let mut record = [0u8; SHARE_LEASE_LENGTH];
        file.read_exact(&mut record)
            .map_err(|_| truncated(path, "lease record"))?;
        leases.push(decode_lease(&record));
    }
    Ok(leases)
}

/// All lease records in the file, oldest first.
pub fn read_leases(path: &Path) -> Result<Vec<Lease>> {
    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let (_, _, lease_count) = read_header(&mut file, path)?;
    let lease_bytes = u64::from(lease_count) * SHARE_LEASE_LENGTH as u64;
    if file_len < SHARE_HEADER_LENGTH as u64 + lease_bytes {
        return Err(truncated(path, "lease region"));
    }
    read_leases_from(&mut file, path, file_len, lease_count)
}

/// Append a lease record and bump the header count.
pub fn append_lease(path: &Path, lease: &Lease) -> Result<()> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let (_, _, lease_count) = read_header(&mut file, path)?;
    file.seek(SeekFrom::End(0))?;
    file.write_all(&encode_lease(lease))?;
    file.seek(SeekFrom::Start(8))?;
    file.write_all(&(lease_count + 1).to_be_bytes())?;
    Ok(())
}

/// Update the expiration of the lease carrying `renew_secret`. Returns
/// `false` if no lease matches.
pub fn renew_lease(path: &Path, renew_secret: &RenewSecret, expiration: u64) -> Result<bool> {
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let file_len = file.metadata()?.len();
    let (_, _, lease_count) = read_header(&mut file, path)?;
    let lease_bytes = u64::from(lease_count) * SHARE_LEASE_LENGTH as u64;
    if file_len < SHARE_HEADER_LENGTH as u64 + lease_bytes {
        return Err(truncated(path, "lease region"));
    }
    let leases = read_leases_from(&mut file, path, file_len, lease_count)?;
    for (index, lease) in leases.iter().enumerate() {
        if &lease.renew_secret == renew_secret {
            let record_start =
                file_len - lease_bytes + (index * SHARE_LEASE_LENGTH) as u64;
            file.seek(SeekFrom::Start(record_start + 68))?;
            let expiration = u32::try_from(expiration).unwrap_or(u32::MAX);
            file.write_all(&expiration.to_be_bytes())?;
            return Ok(true);
        }
    }
    Ok(false)
}
