//! The voucher store — SQLite-backed, synchronous, transactional.

use std::fs;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use tracing::{debug, info};
use zkapstore_types::{
    NodeConfig, RandomToken, Result, UnblindedToken, Voucher, VoucherNumber, VoucherState,
    ZkapError,
};

use crate::lease_maintenance::{LeaseMaintenance, LeaseMaintenanceActivity};
use crate::schema;

/// Clock used for every timestamp the store writes. Injected so tests can
/// pin or advance time.
pub type NowFn = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Durable record of vouchers, random tokens, the unblinded-token pool,
/// and lease-maintenance activity.
pub struct VoucherStore {
    conn: Connection,
    now: NowFn,
    bytes_per_pass: u64,
}

impl std::fmt::Debug for VoucherStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoucherStore")
            .field("bytes_per_pass", &self.bytes_per_pass)
            .finish_non_exhaustive()
    }
}

impl VoucherStore {
    /// Create or open the store under the configured data directory.
    ///
    /// # Errors
    /// - [`ZkapError::StoreOpenError`] if the directory cannot be created
    ///   or the database file cannot be opened.
    /// - [`ZkapError::SchemaError`] if the file carries a different schema
    ///   version.
    pub fn open(config: &NodeConfig) -> Result<Self> {
        Self::open_with_now(config, Box::new(Utc::now))
    }

    /// [`VoucherStore::open`] with an injected clock.
    pub fn open_with_now(config: &NodeConfig, now: NowFn) -> Result<Self> {
        fs::create_dir_all(config.data_dir()).map_err(|e| ZkapError::StoreOpenError {
            cause: format!("creating {}: {e}", config.data_dir().display()),
        })?;
        let path = config.data_dir().join(schema::DB_NAME);
        info!(path = %path.display(), "Opening voucher database");
        let conn = Connection::open(&path).map_err(|e| ZkapError::StoreOpenError {
            cause: format!("opening {}: {e}", path.display()),
        })?;
        Self::initialize(conn, now, config.bytes_per_pass)
    }

    /// An in-memory store for tests; nothing touches disk.
    pub fn memory(bytes_per_pass: u64) -> Result<Self> {
        Self::memory_with_now(bytes_per_pass, Box::new(Utc::now))
    }

    /// [`VoucherStore::memory`] with an injected clock.
    pub fn memory_with_now(bytes_per_pass: u64, now: NowFn) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| ZkapError::StoreOpenError {
            cause: e.to_string(),
        })?;
        Self::initialize(conn, now, bytes_per_pass)
    }

    fn initialize(conn: Connection, now: NowFn, bytes_per_pass: u64) -> Result<Self> {
        for table in schema::TABLES {
            conn.execute(table, []).map_err(db_err)?;
        }
        let found: Option<i64> = conn
            .query_row(schema::QUERY_VERSION, [], |row| row.get(0))
            .optional()
            .map_err(db_err)?;
        match found {
            None => {
                conn.execute(schema::INSERT_VERSION, params![schema::SCHEMA_VERSION])
                    .map_err(db_err)?;
            }
            Some(version) if version == schema::SCHEMA_VERSION => {}
            Some(version) => {
                return Err(ZkapError::SchemaError {
                    found: version,
                    required: schema::SCHEMA_VERSION,
                });
            }
        }
        Ok(Self {
            conn,
            now,
            bytes_per_pass,
        })
    }

    /// The number of stored bytes one pass pays for.
    #[must_use]
    pub fn bytes_per_pass(&self) -> u64 {
        self.bytes_per_pass
    }

    // =====================================================================
    // Vouchers
    // =====================================================================

    /// Record a voucher and its random tokens. Idempotent: the first call
    /// creates the voucher in `Pending` state; later calls for the same
    /// number leave the store untouched and ignore the token argument.
    pub fn add(&mut self, number: &VoucherNumber, random_tokens: &[RandomToken]) -> Result<Voucher> {
        let created = (self.now)();
        let tx = self.conn.transaction().map_err(db_err)?;
        if let Some(existing) = get_in_tx(&tx, number)? {
            tx.commit().map_err(db_err)?;
            return Ok(existing);
        }
        tx.execute(
            schema::INSERT_VOUCHER,
            params![number.as_str(), encode_ts(created)],
        )
        .map_err(db_err)?;
        for token in random_tokens {
            tx.execute(
                schema::INSERT_RANDOM_TOKEN,
                params![token.as_str(), number.as_str()],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;
        debug!(voucher = %number, tokens = random_tokens.len(), "Voucher recorded");
        Ok(Voucher::new(number.clone(), created))
    }

    /// Look up a voucher.
    ///
    /// # Errors
    /// [`ZkapError::NotFound`] if the voucher was never added.
    pub fn get(&self, number: &VoucherNumber) -> Result<Voucher> {
        let row = self
            .conn
            .query_row(schema::QUERY_VOUCHER, params![number.as_str()], read_row)
            .optional()
            .map_err(db_err)?;
        match row {
            Some(raw) => voucher_from_raw(raw),
            None => Err(ZkapError::NotFound(number.clone())),
        }
    }

    /// Every voucher in the store, oldest first.
    pub fn list(&self) -> Result<Vec<Voucher>> {
        let mut stmt = self.conn.prepare(schema::QUERY_VOUCHERS).map_err(db_err)?;
        let rows = stmt.query_map([], read_row).map_err(db_err)?;
        let mut vouchers = Vec::new();
        for raw in rows {
            vouchers.push(voucher_from_raw(raw.map_err(db_err)?)?);
        }
        Ok(vouchers)
    }

    /// Complete a redemption: transition the voucher `Pending → Redeemed`
    /// and append the unblinded tokens to the pool, in one transaction.
    ///
    /// A voucher the store has never seen is created implicitly, so a
    /// redemption finishing against a store that lost the `add` still
    /// banks its tokens.
    ///
    /// # Errors
    /// [`ZkapError::InvalidState`] if the voucher is already terminal; no
    /// tokens are inserted in that case.
    pub fn insert_unblinded_tokens_for_voucher(
        &mut self,
        number: &VoucherNumber,
        tokens: &[UnblindedToken],
    ) -> Result<()> {
        let now = (self.now)();
        let tx = self.conn.transaction().map_err(db_err)?;
        match get_in_tx(&tx, number)? {
            None => {
                tx.execute(
                    schema::INSERT_VOUCHER,
                    params![number.as_str(), encode_ts(now)],
                )
                .map_err(db_err)?;
            }
            Some(voucher) if voucher.state == VoucherState::Pending => {}
            Some(voucher) => {
                return Err(ZkapError::InvalidState {
                    reason: format!(
                        "voucher {number} is {}, expected PENDING",
                        voucher.state
                    ),
                });
            }
        }
        tx.execute(
            schema::REDEEM_VOUCHER,
            params![number.as_str(), encode_ts(now), tokens.len() as i64],
        )
        .map_err(db_err)?;
        for token in tokens {
            tx.execute(
                schema::INSERT_UNBLINDED_TOKEN,
                params![token.as_str(), number.as_str()],
            )
            .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;
        info!(voucher = %number, tokens = tokens.len(), "Voucher redeemed");
        Ok(())
    }

    /// Record that the redemption service reported this voucher as already
    /// used: `Pending → DoubleSpend`.
    ///
    /// # Errors
    /// [`ZkapError::InvalidState`] if the voucher is absent or terminal.
    pub fn mark_voucher_double_spent(&mut self, number: &VoucherNumber) -> Result<()> {
        let now = (self.now)();
        let tx = self.conn.transaction().map_err(db_err)?;
        match get_in_tx(&tx, number)? {
            Some(voucher) if voucher.state == VoucherState::Pending => {}
            Some(voucher) => {
                return Err(ZkapError::InvalidState {
                    reason: format!(
                        "voucher {number} is {}, expected PENDING",
                        voucher.state
                    ),
                });
            }
            None => {
                return Err(ZkapError::InvalidState {
                    reason: format!("voucher {number} is not in the store"),
                });
            }
        }
        tx.execute(
            schema::DOUBLE_SPEND_VOUCHER,
            params![number.as_str(), encode_ts(now)],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        info!(voucher = %number, "Voucher marked double-spent");
        Ok(())
    }

    // =====================================================================
    // Unblinded tokens
    // =====================================================================

    /// Remove and return up to `count` unblinded tokens in FIFO order.
    ///
    /// The select and delete run in one transaction, so concurrent
    /// extractors each receive distinct tokens and a token is delivered at
    /// most once, ever.
    pub fn extract_unblinded_tokens(&mut self, count: usize) -> Result<Vec<UnblindedToken>> {
        let tx = self.conn.transaction().map_err(db_err)?;
        let head: Vec<(i64, String)> = {
            let mut stmt = tx.prepare(schema::QUERY_UNBLINDED_HEAD).map_err(db_err)?;
            let rows = stmt
                .query_map(params![count as i64], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })
                .map_err(db_err)?;
            rows.collect::<rusqlite::Result<_>>().map_err(db_err)?
        };
        for (sequence, _) in &head {
            tx.execute(schema::DELETE_UNBLINDED_TOKEN, params![sequence])
                .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;
        debug!(requested = count, extracted = head.len(), "Extracted unblinded tokens");
        Ok(head.into_iter().map(|(_, t)| UnblindedToken(t)).collect())
    }

    /// Number of unblinded tokens remaining in the pool.
    pub fn count_unblinded_tokens(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row(schema::COUNT_UNBLINDED_TOKENS, [], |row| row.get(0))
            .map_err(db_err)?;
        Ok(count.unsigned_abs())
    }

    // =====================================================================
    // Lease maintenance
    // =====================================================================

    /// Begin a lease-maintenance run. The returned handle accumulates
    /// observed share sizes and stamps the finish time.
    pub fn start_lease_maintenance(&self) -> Result<LeaseMaintenance<'_>> {
        let started = (self.now)();
        self.conn
            .execute(schema::INSERT_LEASE_MAINTENANCE, params![encode_ts(started)])
            .map_err(db_err)?;
        let id = self.conn.last_insert_rowid();
        debug!(id, "Lease maintenance started");
        Ok(LeaseMaintenance::new(self, id))
    }

    /// The most recently finished lease-maintenance record, if any.
    pub fn get_latest_lease_maintenance_activity(
        &self,
    ) -> Result<Option<LeaseMaintenanceActivity>> {
        let row = self
            .conn
            .query_row(schema::QUERY_LATEST_LEASE_MAINTENANCE, [], |row| {
                let started: String = row.get(0)?;
                let finished: String = row.get(1)?;
                let passes_required: i64 = row.get(2)?;
                Ok((started, finished, passes_required))
            })
            .optional()
            .map_err(db_err)?;
        match row {
            None => Ok(None),
            Some((started, finished, passes_required)) => Ok(Some(LeaseMaintenanceActivity {
                started: decode_ts(&started)?,
                finished: decode_ts(&finished)?,
                passes_required: passes_required.unsigned_abs(),
            })),
        }
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        (self.now)()
    }
}

// ---------------------------------------------------------------------------
// Row handling
// ---------------------------------------------------------------------------

type RawVoucher = (String, String, String, Option<String>, Option<i64>);

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawVoucher> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn voucher_from_raw(raw: RawVoucher) -> Result<Voucher> {
    let (number, created, state, finished, token_count) = raw;
    let state = match state.as_str() {
        "pending" => VoucherState::Pending,
        "redeemed" => VoucherState::Redeemed {
            finished: decode_ts(finished.as_deref().unwrap_or_default())?,
            token_count: token_count.unwrap_or(0).unsigned_abs(),
        },
        "double-spend" => VoucherState::DoubleSpend {
            finished: decode_ts(finished.as_deref().unwrap_or_default())?,
        },
        other => {
            return Err(ZkapError::Database(format!(
                "voucher {number} has unknown state {other:?}"
            )));
        }
    };
    Ok(Voucher {
        number: VoucherNumber(number),
        created: decode_ts(&created)?,
        state,
    })
}

fn get_in_tx(tx: &Transaction<'_>, number: &VoucherNumber) -> Result<Option<Voucher>> {
    let row = tx
        .query_row(schema::QUERY_VOUCHER, params![number.as_str()], read_row)
        .optional()
        .map_err(db_err)?;
    row.map(voucher_from_raw).transpose()
}

pub(crate) fn encode_ts(ts: DateTime<Utc>) -> String {
    // Uniform precision keeps the textual ordering equal to the temporal
    // ordering.
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_ts(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ZkapError::Database(format!("bad timestamp {text:?}: {e}")))
}

pub(crate) fn db_err(err: rusqlite::Error) -> ZkapError {
    ZkapError::Database(err.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
