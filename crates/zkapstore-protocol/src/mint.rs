//! The signing/verification oracle behind pass minting.
//!
//! The blind-signature cryptography is a black box to this repository: the
//! client side needs something that turns unblinded tokens into passes
//! bound to a message, and the server side needs something that checks a
//! pass against that message. Those two contracts are the
//! [`PassMinter`](zkapstore_spending::PassMinter) and [`PassVerifier`]
//! traits; a deployment slots the real blind-signature library in behind
//! them.
//!
//! [`TokenSigner`] is the keyed-hash oracle satisfying both contracts:
//! the signature is SHA-512 over the key, the length-framed message, and
//! the token preimage. It produces real 177-byte passes and rejects
//! wrong-message and wrong-key passes, which is everything the protocol
//! machinery observes.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha512};
use zkapstore_spending::PassMinter;
use zkapstore_types::constants::TOKEN_PART_RAW_LENGTH;
use zkapstore_types::{Pass, Result, UnblindedToken, ZkapError};

/// Server-side half of the oracle: does this pass authorize this message?
pub trait PassVerifier: Send + Sync {
    fn verify(&self, message: &[u8], pass: &Pass) -> bool;
}

/// Keyed-hash signing oracle implementing both halves of the pass
/// exchange over one shared 32-byte key.
#[derive(Clone)]
pub struct TokenSigner {
    key: [u8; 32],
}

impl TokenSigner {
    #[must_use]
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    fn signature(&self, message: &[u8], preimage: &[u8]) -> [u8; TOKEN_PART_RAW_LENGTH] {
        let mut hasher = Sha512::new();
        hasher.update(b"zkapstore:sig:v1:");
        hasher.update(self.key);
        // Length framing keeps (message, preimage) unambiguous.
        hasher.update(u64::try_from(message.len()).unwrap_or(u64::MAX).to_le_bytes());
        hasher.update(message);
        hasher.update(preimage);
        hasher.finalize().into()
    }
}

impl PassMinter for TokenSigner {
    fn tokens_to_passes(&self, message: &[u8], tokens: &[UnblindedToken]) -> Result<Vec<Pass>> {
        tokens
            .iter()
            .map(|token| {
                let raw = BASE64.decode(token.as_str()).map_err(|e| {
                    ZkapError::InvalidArgument {
                        reason: format!("unblinded token is not base64: {e}"),
                    }
                })?;
                let preimage: [u8; TOKEN_PART_RAW_LENGTH] =
                    raw.try_into().map_err(|raw: Vec<u8>| {
                        ZkapError::InvalidArgument {
                            reason: format!(
                                "unblinded token decodes to {} bytes, want {TOKEN_PART_RAW_LENGTH}",
                                raw.len()
                            ),
                        }
                    })?;
                let signature = self.signature(message, &preimage);
                Ok(Pass::from_parts(&preimage, &signature))
            })
            .collect()
    }
}

impl PassVerifier for TokenSigner {
    fn verify(&self, message: &[u8], pass: &Pass) -> bool {
        let expected = self.signature(message, &pass.preimage());
        pass.signature() == expected
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl TokenSigner {
    /// A signer over a random key, for tests.
    pub fn random() -> Self {
        Self::new(rand::random())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(count: usize) -> Vec<UnblindedToken> {
        (0..count).map(|_| UnblindedToken::random()).collect()
    }

    #[test]
    fn minted_passes_verify() {
        let signer = TokenSigner::random();
        let passes = signer.tokens_to_passes(b"add_lease abc", &tokens(3)).unwrap();
        assert_eq!(passes.len(), 3);
        for pass in &passes {
            assert!(signer.verify(b"add_lease abc", pass));
        }
    }

    #[test]
    fn wrong_message_fails_verification() {
        let signer = TokenSigner::random();
        let passes = signer.tokens_to_passes(b"add_lease abc", &tokens(1)).unwrap();
        assert!(!signer.verify(b"renew_lease abc", &passes[0]));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let minter = TokenSigner::random();
        let verifier = TokenSigner::random();
        let passes = minter.tokens_to_passes(b"message", &tokens(1)).unwrap();
        assert!(!verifier.verify(b"message", &passes[0]));
    }

    #[test]
    fn minting_is_deterministic_per_token() {
        let signer = TokenSigner::new([7u8; 32]);
        let token = tokens(1);
        let a = signer.tokens_to_passes(b"m", &token).unwrap();
        let b = signer.tokens_to_passes(b"m", &token).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn malformed_token_rejected() {
        let signer = TokenSigner::random();
        let bad = UnblindedToken("not base64 at all!!".to_string());
        let err = signer.tokens_to_passes(b"m", &[bad]).unwrap_err();
        assert!(matches!(err, ZkapError::InvalidArgument { .. }));
    }

    #[test]
    fn random_signature_never_verifies() {
        let signer = TokenSigner::random();
        let pass = Pass::dummy();
        assert!(!signer.verify(b"anything", &pass));
    }
}
