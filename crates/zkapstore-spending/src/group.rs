//! Pass groups — the caller-facing handle over checked-out passes.

use std::collections::HashSet;
use std::mem;
use std::sync::Arc;

use tracing::debug;
use zkapstore_types::{Pass, Result};

use crate::controller::Inner;

/// A group of passes meant to be spent together on one request.
///
/// The group remembers its binding message and its issuing controller, so
/// [`PassGroup::expand`] reliably produces additional passes bound to the
/// same message. Terminal operations consume the group; once a group is
/// spent or invalidated its passes never appear in any future group.
///
/// Dropping a group without reaching a terminal state resets it: the
/// passes return to the pool, so an abandoned call cannot strand value.
pub struct PassGroup {
    inner: Arc<Inner>,
    message: String,
    passes: Vec<Pass>,
}

impl std::fmt::Debug for PassGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassGroup")
            .field("message", &self.message)
            .field("passes", &self.passes)
            .finish_non_exhaustive()
    }
}

impl PassGroup {
    pub(crate) fn new(inner: Arc<Inner>, message: String, passes: Vec<Pass>) -> Self {
        Self {
            inner,
            message,
            passes,
        }
    }

    /// The passes themselves, in issue order.
    #[must_use]
    pub fn passes(&self) -> &[Pass] {
        &self.passes
    }

    /// The message every pass in this group is bound to.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Partition into (selected, rest) by 0-based index. Both halves keep
    /// the binding message and the controller back-reference.
    #[must_use]
    pub fn split(mut self, select_indices: &[usize]) -> (Self, Self) {
        let wanted: HashSet<usize> = select_indices.iter().copied().collect();
        let mut selected = Vec::new();
        let mut unselected = Vec::new();
        for (idx, pass) in mem::take(&mut self.passes).into_iter().enumerate() {
            if wanted.contains(&idx) {
                selected.push(pass);
            } else {
                unselected.push(pass);
            }
        }
        (
            Self::new(Arc::clone(&self.inner), self.message.clone(), selected),
            Self::new(Arc::clone(&self.inner), self.message.clone(), unselected),
        )
    }

    /// A new group holding these passes plus `by_amount` more bound to the
    /// same message.
    ///
    /// # Errors
    /// On a pool shortfall this group's passes go back to the pool (the
    /// group is consumed either way) and the shortfall error is returned.
    pub fn expand(mut self, by_amount: usize) -> Result<Self> {
        let passes = mem::take(&mut self.passes);
        match self.inner.checkout(&self.message, by_amount) {
            Ok(extra) => {
                debug!(by_amount, "Expanded pass group");
                let mut passes = passes;
                passes.extend(extra);
                Ok(Self::new(
                    Arc::clone(&self.inner),
                    self.message.clone(),
                    passes,
                ))
            }
            Err(err) => {
                // Do not strand the existing passes in the in-use set.
                self.inner.reset(&passes)?;
                Err(err)
            }
        }
    }

    /// The passes were spent successfully. Terminal.
    pub fn mark_spent(mut self) -> Result<()> {
        let passes = mem::take(&mut self.passes);
        self.inner.mark_spent(&passes)
    }

    /// The passes were rejected and must never be reused. Terminal.
    pub fn mark_invalid(mut self, reason: &str) -> Result<()> {
        let passes = mem::take(&mut self.passes);
        self.inner.mark_invalid(reason, &passes)
    }

    /// The passes were not spent; return them for use in a future group.
    pub fn reset(mut self) -> Result<()> {
        let passes = mem::take(&mut self.passes);
        self.inner.reset(&passes)
    }
}

impl Drop for PassGroup {
    fn drop(&mut self) {
        if !self.passes.is_empty() {
            debug!(count = self.passes.len(), "Pass group dropped; resetting");
            // The passes were in use moments ago; a failure here means the
            // controller already considers them terminal and there is
            // nothing left to return.
            let _ = self.inner.reset(&self.passes);
        }
    }
}

#[cfg(test)]
mod tests {
    use zkapstore_types::ZkapError;

    use crate::test_support::test_controller;

    #[test]
    fn split_partitions_by_index() {
        let (controller, _) = test_controller(5);
        let group = controller.get("msg", 5).unwrap();
        let all = group.passes().to_vec();

        let (selected, rest) = group.split(&[1, 3]);
        assert_eq!(selected.passes(), &[all[1].clone(), all[3].clone()]);
        assert_eq!(
            rest.passes(),
            &[all[0].clone(), all[2].clone(), all[4].clone()]
        );
        assert_eq!(selected.message(), rest.message());

        selected.mark_invalid("bad").unwrap();
        rest.mark_spent().unwrap();
        assert_eq!(controller.invalid_count(), 2);
        assert_eq!(controller.spent_count(), 3);
    }

    #[test]
    fn expand_keeps_binding_message() {
        let (controller, _) = test_controller(6);
        let group = controller.get("the message", 2).unwrap();
        let expanded = group.expand(3).unwrap();
        assert_eq!(expanded.len(), 5);
        assert_eq!(expanded.message(), "the message");
        assert_eq!(controller.in_use_count(), 5);
    }

    #[test]
    fn expand_shortfall_returns_passes_to_pool() {
        let (controller, _) = test_controller(2);
        let group = controller.get("msg", 2).unwrap();
        let err = group.expand(1).unwrap_err();
        assert!(matches!(err, ZkapError::NotEnoughTokens { .. }));
        // The group's passes are back in the pool, not stranded in-use.
        assert_eq!(controller.in_use_count(), 0);
        assert_eq!(controller.returned_count(), 2);
    }

    #[test]
    fn dropped_group_resets_itself() {
        let (controller, _) = test_controller(3);
        let group = controller.get("msg", 3).unwrap();
        assert_eq!(controller.in_use_count(), 3);

        // Abandoning the group (a cancelled call) returns the passes.
        drop(group);
        assert_eq!(controller.in_use_count(), 0);
        assert_eq!(controller.returned_count(), 3);
    }

    #[test]
    fn terminal_group_does_not_reset_on_drop() {
        let (controller, _) = test_controller(2);
        let group = controller.get("msg", 2).unwrap();
        group.mark_spent().unwrap();
        assert_eq!(controller.spent_count(), 2);
        assert_eq!(controller.returned_count(), 0);
    }

    #[test]
    fn spent_passes_never_reissued() {
        let (controller, tokens) = test_controller(3);
        let group = controller.get("msg", 3).unwrap();
        group.mark_spent().unwrap();

        // The pool is empty and spent passes are terminal.
        assert!(controller.get("msg", 1).is_err());
        assert_eq!(controller.spent_count(), 3);
        assert_eq!(tokens.len(), 3);
    }

    #[test]
    fn invalid_passes_never_reissued() {
        let (controller, _) = test_controller(4);
        let group = controller.get("msg", 2).unwrap();
        let bad = group.passes().to_vec();
        group.mark_invalid("signature check failed").unwrap();
        assert_eq!(
            controller.invalid_reason(&bad[0]).as_deref(),
            Some("signature check failed")
        );

        // Fresh issuance never hands back an invalidated pass.
        let next = controller.get("msg", 2).unwrap();
        for pass in next.passes() {
            assert!(!bad.contains(pass));
        }
        next.reset().unwrap();
    }

    #[test]
    fn disjointness_holds_through_lifecycle() {
        let (controller, _) = test_controller(6);
        let group = controller.get("msg", 6).unwrap();
        let (a, bc) = group.split(&[0, 1]);
        let (b, c) = bc.split(&[0, 1]);

        a.mark_spent().unwrap();
        b.mark_invalid("rejected").unwrap();
        c.reset().unwrap();

        assert_eq!(controller.spent_count(), 2);
        assert_eq!(controller.invalid_count(), 2);
        assert_eq!(controller.returned_count(), 2);
        assert_eq!(controller.in_use_count(), 0);
        assert_eq!(controller.issued_count(), 6);
    }
}
