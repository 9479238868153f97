//! The spending controller and its pass bookkeeping.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use tracing::debug;
use zkapstore_types::constants::INVALID_REASON_CACHE_SIZE;
use zkapstore_types::{Pass, Result, UnblindedToken, ZkapError};

use crate::group::PassGroup;

/// Source of unblinded tokens, normally the voucher store's pool.
pub trait TokenSource: Send {
    /// Remove and return up to `count` tokens; fewer if the pool is short.
    fn extract_unblinded_tokens(&mut self, count: usize) -> Result<Vec<UnblindedToken>>;
}

/// The minting half of the blind-signature oracle: turns unblinded tokens
/// into passes bound to a request message.
pub trait PassMinter: Send {
    fn tokens_to_passes(&self, message: &[u8], tokens: &[UnblindedToken]) -> Result<Vec<Pass>>;
}

/// Where every pass the controller issued currently is.
///
/// Only the live passes are retained: `in_use` holds checked-out passes
/// and `returned` holds reset passes awaiting reuse, oldest first. Spent
/// and invalidated passes are terminal by construction — a pass only
/// re-enters circulation through `returned`, which is fed exclusively by
/// `reset` — so those populations are tracked as exact counters, keeping
/// memory bounded by the outstanding (not historical) pass count. A
/// bounded cache of recent invalidation reasons is kept for diagnosis.
#[derive(Default)]
struct PassBook {
    issued_count: usize,
    spent_count: usize,
    invalid_count: usize,
    in_use: HashSet<Pass>,
    invalid_reasons: HashMap<Pass, String>,
    invalid_order: VecDeque<Pass>,
    returned: VecDeque<Pass>,
}

enum Disposition {
    Spent,
    Invalid(String),
    Returned,
}

impl PassBook {
    /// Move `passes` out of `in_use` into the given disposition.
    ///
    /// Validates the whole batch before touching anything, so a bad batch
    /// leaves the book unchanged.
    fn transition(&mut self, passes: &[Pass], to: &Disposition) -> Result<()> {
        for pass in passes {
            if !self.in_use.contains(pass) {
                return Err(ZkapError::InvalidState {
                    reason: format!("{pass} is not in use and cannot change state"),
                });
            }
        }
        for pass in passes {
            self.in_use.remove(pass);
            match to {
                Disposition::Spent => {
                    self.spent_count += 1;
                }
                Disposition::Invalid(reason) => {
                    self.invalid_count += 1;
                    self.record_invalid_reason(pass.clone(), reason.clone());
                }
                Disposition::Returned => {
                    self.returned.push_back(pass.clone());
                }
            }
        }
        Ok(())
    }

    /// Remember why a pass was invalidated, evicting the oldest entry once
    /// the cache is full.
    fn record_invalid_reason(&mut self, pass: Pass, reason: String) {
        if self.invalid_reasons.len() >= INVALID_REASON_CACHE_SIZE {
            if let Some(oldest) = self.invalid_order.pop_front() {
                self.invalid_reasons.remove(&oldest);
            }
        }
        self.invalid_reasons.insert(pass.clone(), reason);
        self.invalid_order.push_back(pass);
    }

    /// Put drained-but-unissued passes back where they came from, in
    /// their original order.
    fn restore_returned(&mut self, reused: Vec<Pass>) {
        for pass in reused.into_iter().rev() {
            self.returned.push_front(pass);
        }
    }
}

struct State {
    source: Box<dyn TokenSource>,
    minter: Box<dyn PassMinter>,
    book: PassBook,
}

pub(crate) struct Inner {
    state: Mutex<State>,
}

/// Gives out passes and arranges for re-spend attempts when necessary.
///
/// Wraps a [`TokenSource`] and a [`PassMinter`]; issues [`PassGroup`]s
/// bound to request messages and tracks each pass it issues through to a
/// terminal state. All bookkeeping updates happen under one internal
/// lock.
#[derive(Clone)]
pub struct SpendingController {
    inner: Arc<Inner>,
}

impl SpendingController {
    #[must_use]
    pub fn new(source: Box<dyn TokenSource>, minter: Box<dyn PassMinter>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    source,
                    minter,
                    book: PassBook::default(),
                }),
            }),
        }
    }

    /// Issue a group of `count` passes bound to `message`.
    ///
    /// Reset passes are reused first, in the order they were returned;
    /// the remainder is minted from freshly extracted unblinded tokens.
    ///
    /// # Errors
    /// [`ZkapError::NotEnoughTokens`] if the pool cannot cover the
    /// request; on that or any extraction/minting failure nothing is
    /// issued and previously returned passes stay in the queue.
    pub fn get(&self, message: &str, count: usize) -> Result<PassGroup> {
        let passes = self.inner.checkout(message, count)?;
        debug!(binding = message, count, "Issued pass group");
        Ok(PassGroup::new(
            Arc::clone(&self.inner),
            message.to_string(),
            passes,
        ))
    }

    /// Number of distinct passes ever issued.
    #[must_use]
    pub fn issued_count(&self) -> usize {
        self.inner.lock().book.issued_count
    }

    /// Number of passes currently checked out.
    #[must_use]
    pub fn in_use_count(&self) -> usize {
        self.inner.lock().book.in_use.len()
    }

    /// Number of passes spent successfully.
    #[must_use]
    pub fn spent_count(&self) -> usize {
        self.inner.lock().book.spent_count
    }

    /// Number of passes marked invalid.
    #[must_use]
    pub fn invalid_count(&self) -> usize {
        self.inner.lock().book.invalid_count
    }

    /// Number of reset passes awaiting reuse.
    #[must_use]
    pub fn returned_count(&self) -> usize {
        self.inner.lock().book.returned.len()
    }

    /// The recorded invalidation reason for a pass, if still cached.
    #[must_use]
    pub fn invalid_reason(&self, pass: &Pass) -> Option<String> {
        self.inner.lock().book.invalid_reasons.get(pass).cloned()
    }
}

impl Inner {
    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("spending controller lock poisoned")
    }

    /// Check out `count` passes bound to `message`: returned queue first,
    /// then fresh mints. All-or-nothing: any failure on the fresh path
    /// restores the drained returned passes before surfacing.
    pub(crate) fn checkout(&self, message: &str, count: usize) -> Result<Vec<Pass>> {
        let mut state = self.lock();

        let reused: Vec<Pass> = {
            let take = count.min(state.book.returned.len());
            state.book.returned.drain(..take).collect()
        };
        let missing = count - reused.len();

        let fresh = if missing > 0 {
            let tokens = match state.source.extract_unblinded_tokens(missing) {
                Ok(tokens) => tokens,
                Err(err) => {
                    state.book.restore_returned(reused);
                    return Err(err);
                }
            };
            if tokens.len() < missing {
                state.book.restore_returned(reused);
                return Err(ZkapError::NotEnoughTokens {
                    available: tokens.len(),
                    required: missing,
                });
            }
            match state.minter.tokens_to_passes(message.as_bytes(), &tokens) {
                Ok(fresh) => fresh,
                Err(err) => {
                    state.book.restore_returned(reused);
                    return Err(err);
                }
            }
        } else {
            Vec::new()
        };

        state.book.issued_count += fresh.len();
        let mut passes = reused;
        passes.extend(fresh);
        for pass in &passes {
            state.book.in_use.insert(pass.clone());
        }
        Ok(passes)
    }

    pub(crate) fn mark_spent(&self, passes: &[Pass]) -> Result<()> {
        self.lock().book.transition(passes, &Disposition::Spent)
    }

    pub(crate) fn mark_invalid(&self, reason: &str, passes: &[Pass]) -> Result<()> {
        self.lock()
            .book
            .transition(passes, &Disposition::Invalid(reason.to_string()))
    }

    pub(crate) fn reset(&self, passes: &[Pass]) -> Result<()> {
        self.lock().book.transition(passes, &Disposition::Returned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        dummy_minter, exhausted_source, failing_source, flaky_minter, test_controller, vec_source,
    };

    #[test]
    fn get_issues_and_tracks() {
        let (controller, _) = test_controller(10);
        let group = controller.get("msg", 4).unwrap();
        assert_eq!(group.len(), 4);
        assert_eq!(controller.issued_count(), 4);
        assert_eq!(controller.in_use_count(), 4);
        assert_eq!(controller.spent_count(), 0);
        group.mark_spent().unwrap();
    }

    #[test]
    fn empty_group_is_fine() {
        let (controller, _) = test_controller(0);
        let group = controller.get("msg", 0).unwrap();
        assert!(group.is_empty());
        group.mark_spent().unwrap();
        assert_eq!(controller.spent_count(), 0);
    }

    #[test]
    fn pool_shortfall_issues_nothing() {
        let (controller, _) = test_controller(2);
        let err = controller.get("msg", 3).unwrap_err();
        assert!(matches!(
            err,
            ZkapError::NotEnoughTokens {
                available: 2,
                required: 3
            }
        ));
        assert_eq!(controller.issued_count(), 0);
        assert_eq!(controller.in_use_count(), 0);
    }

    #[test]
    fn shortfall_preserves_returned_queue() {
        let (controller, _) = test_controller(3);
        let group = controller.get("msg", 3).unwrap();
        let originals = group.passes().to_vec();
        group.reset().unwrap();
        assert_eq!(controller.returned_count(), 3);

        // 3 returned + an empty pool cannot cover 5.
        let err = controller.get("msg", 5).unwrap_err();
        assert!(matches!(err, ZkapError::NotEnoughTokens { .. }));
        assert_eq!(controller.returned_count(), 3);

        // The queue is intact and still FIFO.
        let again = controller.get("msg", 3).unwrap();
        assert_eq!(again.passes(), &originals[..]);
    }

    #[test]
    fn extraction_failure_preserves_returned_queue() {
        // Two tokens, then the source starts erroring.
        let controller = SpendingController::new(exhausted_source(2), dummy_minter());
        let group = controller.get("msg", 2).unwrap();
        let originals = group.passes().to_vec();
        group.reset().unwrap();

        // 2 reused + 1 fresh: the extraction error must not eat the
        // drained passes.
        let err = controller.get("msg", 3).unwrap_err();
        assert!(matches!(err, ZkapError::Database(_)));
        assert_eq!(controller.returned_count(), 2);
        assert_eq!(controller.in_use_count(), 0);

        let again = controller.get("msg", 2).unwrap();
        assert_eq!(again.passes(), &originals[..]);
    }

    #[test]
    fn minting_failure_preserves_returned_queue() {
        // The minter survives exactly one batch, then errors.
        let controller = SpendingController::new(vec_source(5), flaky_minter(1));
        let group = controller.get("msg", 2).unwrap();
        let originals = group.passes().to_vec();
        group.reset().unwrap();

        let err = controller.get("msg", 3).unwrap_err();
        assert!(matches!(err, ZkapError::Internal(_)));
        assert_eq!(controller.returned_count(), 2);
        assert_eq!(controller.in_use_count(), 0);

        let again = controller.get("msg", 2).unwrap();
        assert_eq!(again.passes(), &originals[..]);
    }

    #[test]
    fn reset_passes_reused_fifo_before_fresh() {
        let (controller, _) = test_controller(10);
        let group = controller.get("msg", 2).unwrap();
        let originals = group.passes().to_vec();
        group.reset().unwrap();

        let next = controller.get("msg", 3).unwrap();
        assert_eq!(&next.passes()[..2], &originals[..]);
        assert_eq!(controller.returned_count(), 0);
        // 2 reused + 1 fresh; reuse does not inflate the issue count.
        assert_eq!(controller.issued_count(), 3);
    }

    #[test]
    fn transitions_require_in_use() {
        let (controller, _) = test_controller(3);
        let group = controller.get("msg", 3).unwrap();
        let passes = group.passes().to_vec();
        group.mark_spent().unwrap();

        // Spent passes are terminal: no further transition is legal.
        for result in [
            controller.inner.mark_spent(&passes),
            controller.inner.mark_invalid("again", &passes),
            controller.inner.reset(&passes),
        ] {
            assert!(matches!(result, Err(ZkapError::InvalidState { .. })));
        }
        assert_eq!(controller.spent_count(), 3);
        assert_eq!(controller.invalid_count(), 0);
        assert_eq!(controller.returned_count(), 0);
    }

    #[test]
    fn failed_batch_transition_changes_nothing() {
        let (controller, _) = test_controller(4);
        let group = controller.get("msg", 2).unwrap();
        let mut mixed = group.passes().to_vec();
        group.mark_spent().unwrap();

        // A batch mixing live and spent passes is rejected wholesale.
        let live = controller.get("msg", 2).unwrap();
        mixed.extend(live.passes().to_vec());
        let err = controller.inner.mark_invalid("mixed", &mixed).unwrap_err();
        assert!(matches!(err, ZkapError::InvalidState { .. }));
        assert_eq!(controller.in_use_count(), 2);
        assert_eq!(controller.invalid_count(), 0);
        live.reset().unwrap();
    }

    #[test]
    fn invalid_reason_cache_is_bounded() {
        let mut book = PassBook::default();
        for _ in 0..INVALID_REASON_CACHE_SIZE + 5 {
            book.record_invalid_reason(Pass::dummy(), "bad".to_string());
        }
        assert_eq!(book.invalid_reasons.len(), INVALID_REASON_CACHE_SIZE);
        assert_eq!(book.invalid_order.len(), INVALID_REASON_CACHE_SIZE);
    }

    #[test]
    fn source_failure_propagates() {
        let controller = SpendingController::new(failing_source("pool on fire"), dummy_minter());
        let err = controller.get("msg", 1).unwrap_err();
        assert!(matches!(err, ZkapError::Database(_)));
        assert_eq!(controller.issued_count(), 0);
    }
}
