//! Lease-maintenance accounting.
//!
//! A maintenance run walks the node's stored shares and renews their
//! leases, which costs passes. The store keeps one row per run; only the
//! most recently *finished* run is externally observable, giving status
//! displays a stable answer while a run is in flight.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::debug;
use zkapstore_types::{Result, required_passes};

use crate::schema;
use crate::store::{VoucherStore, db_err, encode_ts};

/// A finished lease-maintenance record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseMaintenanceActivity {
    /// When the run began.
    pub started: DateTime<Utc>,
    /// When the run finished.
    pub finished: DateTime<Utc>,
    /// Total passes the observed shares required.
    pub passes_required: u64,
}

/// Handle over one in-flight maintenance run.
///
/// `observe` is cumulative; `finish` stamps the completion time and makes
/// the record visible through
/// [`VoucherStore::get_latest_lease_maintenance_activity`]. Dropping the
/// handle without finishing leaves the run invisible.
pub struct LeaseMaintenance<'a> {
    store: &'a VoucherStore,
    id: i64,
}

impl<'a> LeaseMaintenance<'a> {
    pub(crate) fn new(store: &'a VoucherStore, id: i64) -> Self {
        Self { store, id }
    }

    /// Record the sizes of shares whose leases this run renewed. Adds the
    /// pass cost of the given sizes to the run's running total.
    pub fn observe(&self, sizes: &[u64]) -> Result<()> {
        let passes = required_passes(self.store.bytes_per_pass(), sizes)?;
        self.store
            .conn()
            .execute(
                schema::OBSERVE_LEASE_MAINTENANCE,
                params![self.id, i64::try_from(passes).unwrap_or(i64::MAX)],
            )
            .map_err(db_err)?;
        debug!(id = self.id, passes, "Observed lease-maintenance spending");
        Ok(())
    }

    /// Close the run, stamping the current time.
    pub fn finish(self) -> Result<()> {
        let finished = self.store.now();
        self.store
            .conn()
            .execute(
                schema::FINISH_LEASE_MAINTENANCE,
                params![self.id, encode_ts(finished)],
            )
            .map_err(db_err)?;
        debug!(id = self.id, "Lease maintenance finished");
        Ok(())
    }
}
