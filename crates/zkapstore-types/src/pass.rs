//! # Pass — the single-use authorization primitive
//!
//! A `Pass` is a request-bound, single-use token presented alongside every
//! storage operation that consumes resources. On the wire it is an
//! ASCII-safe byte string of exactly [`PASS_LENGTH`] bytes: the base64
//! token preimage and the base64 unblinded signature joined by one space.
//!
//! ## Security Properties
//!
//! - **Message-bound**: the signature covers a binding message derived
//!   from the operation, so a pass minted for one call cannot be replayed
//!   on another.
//! - **Single-use**: the spending controller never re-issues a spent or
//!   invalidated pass, and the server records a fingerprint of every
//!   validated pass to reject duplicates across calls.
//! - **Unlinkable**: minting consumes an unblinded token obtained through
//!   a blind-signature exchange; the operator cannot connect the pass to
//!   the voucher that paid for it.
//!
//! The core treats the two halves as opaque; only structural validation
//! and fingerprinting happen here. Signing and verification live behind
//! the protocol crate's oracle traits.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::constants::{PASS_LENGTH, PASS_PART_LENGTH, TOKEN_PART_RAW_LENGTH};
use crate::{Result, ZkapError};

/// A single-use, request-bound authorization token of fixed length.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct Pass {
    bytes: [u8; PASS_LENGTH],
}

impl Pass {
    /// Parse a pass from its wire representation.
    ///
    /// Structural checks only: exact length, the separating space, and two
    /// base64 halves each decoding to [`TOKEN_PART_RAW_LENGTH`] bytes.
    ///
    /// # Errors
    /// Returns [`ZkapError::InvalidPass`] on any structural violation.
    pub fn try_from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PASS_LENGTH {
            return Err(ZkapError::InvalidPass {
                reason: format!("length {} != {PASS_LENGTH}", bytes.len()),
            });
        }
        if bytes[PASS_PART_LENGTH] != b' ' {
            return Err(ZkapError::InvalidPass {
                reason: "missing separator between preimage and signature".to_string(),
            });
        }
        for (name, part) in [
            ("preimage", &bytes[..PASS_PART_LENGTH]),
            ("signature", &bytes[PASS_PART_LENGTH + 1..]),
        ] {
            let decoded = BASE64.decode(part).map_err(|e| ZkapError::InvalidPass {
                reason: format!("{name} is not base64: {e}"),
            })?;
            if decoded.len() != TOKEN_PART_RAW_LENGTH {
                return Err(ZkapError::InvalidPass {
                    reason: format!(
                        "{name} decodes to {} bytes, want {TOKEN_PART_RAW_LENGTH}",
                        decoded.len()
                    ),
                });
            }
        }
        let mut fixed = [0u8; PASS_LENGTH];
        fixed.copy_from_slice(bytes);
        Ok(Self { bytes: fixed })
    }

    /// Assemble a pass from its raw preimage and signature.
    #[must_use]
    pub fn from_parts(
        preimage: &[u8; TOKEN_PART_RAW_LENGTH],
        signature: &[u8; TOKEN_PART_RAW_LENGTH],
    ) -> Self {
        let mut bytes = [0u8; PASS_LENGTH];
        bytes[..PASS_PART_LENGTH].copy_from_slice(BASE64.encode(preimage).as_bytes());
        bytes[PASS_PART_LENGTH] = b' ';
        bytes[PASS_PART_LENGTH + 1..].copy_from_slice(BASE64.encode(signature).as_bytes());
        Self { bytes }
    }

    /// The wire representation.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The wire representation as text (always valid ASCII).
    #[must_use]
    pub fn text(&self) -> &str {
        std::str::from_utf8(&self.bytes).expect("pass bytes are validated ASCII")
    }

    /// The base64 preimage half.
    #[must_use]
    pub fn preimage_b64(&self) -> &str {
        &self.text()[..PASS_PART_LENGTH]
    }

    /// The base64 signature half.
    #[must_use]
    pub fn signature_b64(&self) -> &str {
        &self.text()[PASS_PART_LENGTH + 1..]
    }

    /// The decoded token preimage.
    #[must_use]
    pub fn preimage(&self) -> Vec<u8> {
        BASE64
            .decode(self.preimage_b64())
            .expect("pass preimage is validated base64")
    }

    /// The decoded unblinded signature.
    #[must_use]
    pub fn signature(&self) -> Vec<u8> {
        BASE64
            .decode(self.signature_b64())
            .expect("pass signature is validated base64")
    }

    /// Deterministic fingerprint for double-spend bookkeeping: SHA-256
    /// over the wire bytes, hex-encoded.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"zkapstore:pass:v1:");
        hasher.update(self.bytes);
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print a whole pass; it is spendable value.
        write!(f, "pass:{}", &self.fingerprint()[..8])
    }
}

impl Serialize for Pass {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.text())
    }
}

impl<'de> Deserialize<'de> for Pass {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::try_from_bytes(text.as_bytes()).map_err(D::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// UnblindedToken
// ---------------------------------------------------------------------------

/// A cryptographic value held in the client's store, minted into a pass on
/// demand. Opaque ASCII text produced by the redemption exchange.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct UnblindedToken(pub String);

impl UnblindedToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// RandomToken
// ---------------------------------------------------------------------------

/// A client-generated blinded value exchanged for unblinded tokens during
/// voucher redemption. Unique within the voucher store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct RandomToken(pub String);

impl RandomToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

#[cfg(any(test, feature = "test-helpers"))]
impl Pass {
    /// A structurally valid pass with random halves. The signature half is
    /// random, so it fails any real verifier. **Never use in production.**
    pub fn dummy() -> Self {
        let preimage: [u8; TOKEN_PART_RAW_LENGTH] = std::array::from_fn(|_| rand::random());
        let signature: [u8; TOKEN_PART_RAW_LENGTH] = std::array::from_fn(|_| rand::random());
        Self::from_parts(&preimage, &signature)
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl UnblindedToken {
    /// A random unblinded token carrying a fresh 64-byte preimage.
    pub fn random() -> Self {
        let raw: [u8; TOKEN_PART_RAW_LENGTH] = std::array::from_fn(|_| rand::random());
        Self(BASE64.encode(raw))
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl RandomToken {
    /// A random blinded token, as the client would generate at submission.
    pub fn random() -> Self {
        let raw: [u8; 96] = std::array::from_fn(|_| rand::random());
        Self(BASE64.encode(raw))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
