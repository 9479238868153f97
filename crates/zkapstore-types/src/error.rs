//! Error types for the ZKAPStore storage protocol.
//!
//! All errors use the `ZS_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Pass / cost errors
//! - 2xx: Voucher store errors
//! - 3xx: Admission errors
//! - 4xx: Client / trust errors
//! - 5xx: Share errors
//! - 9xx: General / internal errors

use thiserror::Error;

use crate::VoucherNumber;

/// Central error enum for all ZKAPStore operations.
#[derive(Debug, Error)]
pub enum ZkapError {
    // =================================================================
    // Pass / Cost Errors (1xx)
    // =================================================================
    /// A pass is structurally invalid (wrong length, bad encoding).
    #[error("ZS_ERR_100: Invalid pass: {reason}")]
    InvalidPass { reason: String },

    /// An argument failed validation (zero pass value, oversized list, ...).
    #[error("ZS_ERR_101: Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// The unblinded-token pool cannot cover a pass request.
    #[error("ZS_ERR_102: Not enough tokens: {available} available, {required} required")]
    NotEnoughTokens { available: usize, required: usize },

    // =================================================================
    // Voucher Store Errors (2xx)
    // =================================================================
    /// The database schema version does not match this build.
    #[error("ZS_ERR_200: Schema version mismatch: found {found}, require {required}")]
    SchemaError { found: i64, required: i64 },

    /// The backing directory or database file could not be opened.
    #[error("ZS_ERR_201: Cannot open voucher store: {cause}")]
    StoreOpenError { cause: String },

    /// The requested voucher is not in the store.
    #[error("ZS_ERR_202: Voucher not found: {0}")]
    NotFound(VoucherNumber),

    /// An illegal voucher or pass state transition was attempted.
    #[error("ZS_ERR_203: Invalid state transition: {reason}")]
    InvalidState { reason: String },

    /// The underlying database rejected an operation.
    #[error("ZS_ERR_204: Database error: {0}")]
    Database(String),

    // =================================================================
    // Admission Errors (3xx)
    // =================================================================
    /// The submitted passes were insufficient or partially rejected.
    /// `signature_check_failed` holds the 0-based indices, in submitted
    /// order, of passes that failed the signature check. This is the only
    /// error the client retries.
    #[error(
        "ZS_ERR_300: More passes required: {valid_count} valid of \
         {required_count} required, rejected {signature_check_failed:?}"
    )]
    MorePassesRequired {
        valid_count: usize,
        required_count: usize,
        signature_check_failed: Vec<usize>,
    },

    // =================================================================
    // Client / Trust Errors (4xx)
    // =================================================================
    /// The resolved remote reference advertises the wrong interface.
    /// The configured storage server is unusable until replaced.
    #[error(
        "ZS_ERR_400: Remote reference via {furl} provides {actual_name} \
         instead of {expected_name}"
    )]
    IncorrectStorageServerReference {
        furl: String,
        actual_name: String,
        expected_name: String,
    },

    /// The underlying transport failed.
    #[error("ZS_ERR_401: Transport failure: {reason}")]
    Transport { reason: String },

    // =================================================================
    // Share Errors (5xx)
    // =================================================================
    /// A share file is malformed (wrong version or truncated header).
    #[error("ZS_ERR_500: Invalid share: {reason}")]
    InvalidShare { reason: String },

    /// The delegated storage backend failed an operation.
    #[error("ZS_ERR_501: Storage backend error: {reason}")]
    Backend { reason: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("ZS_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("ZS_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// I/O error (disk, network).
    #[error("ZS_ERR_902: I/O error: {0}")]
    Io(String),
}

impl ZkapError {
    /// Is this an admission failure the client may recover from by
    /// replacing rejected passes?
    #[must_use]
    pub fn is_retryable_rejection(&self) -> bool {
        matches!(
            self,
            Self::MorePassesRequired { signature_check_failed, .. }
                if !signature_check_failed.is_empty()
        )
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, ZkapError>;

// Conversion from std::io::Error
impl From<std::io::Error> for ZkapError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ZkapError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_contains_prefix() {
        let err = ZkapError::NotFound(VoucherNumber::from("abc"));
        let msg = format!("{err}");
        assert!(msg.starts_with("ZS_ERR_202"), "Got: {msg}");
    }

    #[test]
    fn more_passes_required_display() {
        let err = ZkapError::MorePassesRequired {
            valid_count: 3,
            required_count: 5,
            signature_check_failed: vec![1, 3],
        };
        let msg = format!("{err}");
        assert!(msg.contains("ZS_ERR_300"));
        assert!(msg.contains('3'));
        assert!(msg.contains('5'));
        assert!(msg.contains("[1, 3]"));
    }

    #[test]
    fn retryable_rejection_requires_failed_indices() {
        let retryable = ZkapError::MorePassesRequired {
            valid_count: 3,
            required_count: 5,
            signature_check_failed: vec![0, 4],
        };
        assert!(retryable.is_retryable_rejection());

        let insufficiency = ZkapError::MorePassesRequired {
            valid_count: 3,
            required_count: 5,
            signature_check_failed: vec![],
        };
        assert!(!insufficiency.is_retryable_rejection());

        let other = ZkapError::Internal("test".into());
        assert!(!other.is_retryable_rejection());
    }

    #[test]
    fn all_errors_have_zs_err_prefix() {
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(ZkapError::InvalidPass { reason: "short".into() }),
            Box::new(ZkapError::SchemaError { found: 2, required: 1 }),
            Box::new(ZkapError::StoreOpenError { cause: "EACCES".into() }),
            Box::new(ZkapError::InvalidState { reason: "test".into() }),
            Box::new(ZkapError::InvalidShare { reason: "truncated".into() }),
            Box::new(ZkapError::Internal("test".into())),
        ];
        for err in errors {
            let msg = format!("{err}");
            assert!(
                msg.starts_with("ZS_ERR_"),
                "Error missing ZS_ERR_ prefix: {msg}"
            );
        }
    }
}
