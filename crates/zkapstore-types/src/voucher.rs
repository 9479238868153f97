//! # Voucher — the purchased unit of storage authority
//!
//! A voucher is the user-visible receipt for a purchase. Submitting it to
//! the redemption service yields unblinded tokens; the voucher store
//! tracks each voucher through that exchange.
//!
//! ## State Machine
//!
//! ```text
//!   ┌─────────┐  redeemed    ┌──────────┐
//!   │ PENDING ├─────────────▶│ REDEEMED │
//!   └────┬────┘              └──────────┘
//!        │ double-spend reported
//!        ▼
//!   ┌─────────────┐
//!   │ DOUBLE-SPEND │
//!   └─────────────┘
//! ```
//!
//! Both right-hand states are terminal: voucher state is monotone and a
//! transition out of a terminal state is rejected with an invalid-state
//! error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Result, VoucherNumber, ZkapError};

/// The lifecycle state of a voucher.
///
/// Transitions are **monotonic** (never go backwards):
/// - `Pending → Redeemed` (redemption succeeded, tokens banked)
/// - `Pending → DoubleSpend` (redemption service reported prior use)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "kebab-case")]
pub enum VoucherState {
    /// Recorded locally, random tokens stored, not yet redeemed.
    Pending,
    /// Redemption succeeded; `token_count` unblinded tokens were added to
    /// the pool. **Irreversible.**
    Redeemed {
        finished: DateTime<Utc>,
        token_count: u64,
    },
    /// The redemption service reported the voucher was already used.
    /// **Irreversible.**
    DoubleSpend { finished: DateTime<Utc> },
}

impl VoucherState {
    /// Can this state transition to the given target state?
    #[must_use]
    pub fn can_transition_to(&self, target: &Self) -> bool {
        matches!(
            (self, target),
            (
                Self::Pending,
                Self::Redeemed { .. } | Self::DoubleSpend { .. }
            )
        )
    }

    /// Is this a terminal state?
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for VoucherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Redeemed { .. } => write!(f, "REDEEMED"),
            Self::DoubleSpend { .. } => write!(f, "DOUBLE-SPEND"),
        }
    }
}

/// A voucher as recorded in the voucher store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voucher {
    /// The opaque voucher number handed out at purchase time.
    pub number: VoucherNumber,
    /// When this voucher was first added to the store.
    pub created: DateTime<Utc>,
    /// Current lifecycle state.
    pub state: VoucherState,
}

impl Voucher {
    /// A freshly added voucher in `Pending` state.
    #[must_use]
    pub fn new(number: VoucherNumber, created: DateTime<Utc>) -> Self {
        Self {
            number,
            created,
            state: VoucherState::Pending,
        }
    }

    /// Attempt to transition to the given state.
    ///
    /// # Errors
    /// Returns [`ZkapError::InvalidState`] if the current state is terminal.
    pub fn transition_to(&mut self, target: VoucherState) -> Result<()> {
        if !self.state.can_transition_to(&target) {
            return Err(ZkapError::InvalidState {
                reason: format!(
                    "voucher {} cannot go from {} to {target}",
                    self.number, self.state
                ),
            });
        }
        self.state = target;
        Ok(())
    }

    /// Serialize to the store's JSON representation.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from the store's JSON representation.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
