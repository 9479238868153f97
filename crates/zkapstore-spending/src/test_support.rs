//! Controller doubles for unit tests. **Never use in production.**

use std::collections::VecDeque;
use std::sync::Mutex;

use zkapstore_types::{Pass, Result, UnblindedToken, ZkapError};

use crate::controller::{PassMinter, SpendingController, TokenSource};

/// A token source backed by a fixed in-memory pool.
pub struct VecTokenSource {
    tokens: VecDeque<UnblindedToken>,
}

impl VecTokenSource {
    #[must_use]
    pub fn new(tokens: Vec<UnblindedToken>) -> Self {
        Self {
            tokens: tokens.into(),
        }
    }
}

impl TokenSource for VecTokenSource {
    fn extract_unblinded_tokens(&mut self, count: usize) -> Result<Vec<UnblindedToken>> {
        let take = count.min(self.tokens.len());
        Ok(self.tokens.drain(..take).collect())
    }
}

/// A source over `pool_size` random tokens.
pub fn vec_source(pool_size: usize) -> Box<dyn TokenSource> {
    Box::new(VecTokenSource::new(random_tokens(pool_size)))
}

/// A source that always fails, for error-path tests.
pub fn failing_source(reason: &str) -> Box<dyn TokenSource> {
    struct Failing(String);
    impl TokenSource for Failing {
        fn extract_unblinded_tokens(&mut self, _count: usize) -> Result<Vec<UnblindedToken>> {
            Err(ZkapError::Database(self.0.clone()))
        }
    }
    Box::new(Failing(reason.to_string()))
}

/// A source that serves `pool_size` tokens, then errors instead of
/// reporting a short pool — the shape of a store hitting disk trouble.
pub fn exhausted_source(pool_size: usize) -> Box<dyn TokenSource> {
    struct Exhausted(VecDeque<UnblindedToken>);
    impl TokenSource for Exhausted {
        fn extract_unblinded_tokens(&mut self, count: usize) -> Result<Vec<UnblindedToken>> {
            if self.0.len() < count {
                return Err(ZkapError::Database("token pool unavailable".to_string()));
            }
            Ok(self.0.drain(..count).collect())
        }
    }
    Box::new(Exhausted(random_tokens(pool_size).into()))
}

/// A minter producing structurally valid passes with random signatures.
pub fn dummy_minter() -> Box<dyn PassMinter> {
    struct DummyMinter;
    impl PassMinter for DummyMinter {
        fn tokens_to_passes(
            &self,
            _message: &[u8],
            tokens: &[UnblindedToken],
        ) -> Result<Vec<Pass>> {
            Ok(tokens.iter().map(|_| Pass::dummy()).collect())
        }
    }
    Box::new(DummyMinter)
}

/// A minter that survives `successes` batches, then errors.
pub fn flaky_minter(successes: usize) -> Box<dyn PassMinter> {
    struct Flaky {
        remaining: Mutex<usize>,
    }
    impl PassMinter for Flaky {
        fn tokens_to_passes(
            &self,
            _message: &[u8],
            tokens: &[UnblindedToken],
        ) -> Result<Vec<Pass>> {
            let mut remaining = self.remaining.lock().expect("flaky minter lock poisoned");
            if *remaining == 0 {
                return Err(ZkapError::Internal("signer unavailable".to_string()));
            }
            *remaining -= 1;
            Ok(tokens.iter().map(|_| Pass::dummy()).collect())
        }
    }
    Box::new(Flaky {
        remaining: Mutex::new(successes),
    })
}

/// A controller over a pool of `pool_size` random tokens and the dummy
/// minter. Returns the pool contents for assertions.
#[must_use]
pub fn test_controller(pool_size: usize) -> (SpendingController, Vec<UnblindedToken>) {
    let tokens = random_tokens(pool_size);
    let controller = SpendingController::new(
        Box::new(VecTokenSource::new(tokens.clone())),
        dummy_minter(),
    );
    (controller, tokens)
}

fn random_tokens(count: usize) -> Vec<UnblindedToken> {
    (0..count).map(|_| UnblindedToken::random()).collect()
}
