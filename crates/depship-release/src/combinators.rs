//! Fail-fast sequencing and joining of release steps

use futures::future::{try_join_all, Future};

use depship_core::CommandState;

use crate::error::Result;

/// States produced by a fail-fast sequence of commands
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SequenceOutcome {
    states: Vec<CommandState>,
}

impl SequenceOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the sequence stopped because of a failure
    pub fn is_failed(&self) -> bool {
        matches!(self.states.last(), Some(CommandState::Failed))
    }

    /// The first state that is not `Succeeded`, or `Succeeded`
    pub fn summary(&self) -> CommandState {
        self.states
            .iter()
            .find(|state| **state != CommandState::Succeeded)
            .cloned()
            .unwrap_or(CommandState::Succeeded)
    }

    pub fn states(&self) -> &[CommandState] {
        &self.states
    }
}

/// Run `action` for each item, one after another.
///
/// Nothing runs if `outcome` already failed, and the remaining items are
/// skipped as soon as one yields `Failed`. Other non-success states do not
/// stop the sequence. Errors abort immediately.
pub async fn run_fail_fast<I, F, Fut>(
    outcome: &mut SequenceOutcome,
    items: I,
    mut action: F,
) -> Result<()>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = Result<CommandState>>,
{
    if outcome.is_failed() {
        return Ok(());
    }
    for item in items {
        let state = action(item).await?;
        outcome.states.push(state);
        if outcome.is_failed() {
            break;
        }
    }
    Ok(())
}

/// Drive all branches concurrently and collect their results in order.
///
/// The first error drops the remaining branches.
pub async fn join_all<I, Fut, T>(branches: I) -> Result<Vec<T>>
where
    I: IntoIterator<Item = Fut>,
    Fut: Future<Output = Result<T>>,
{
    try_join_all(branches).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReleaseError;
    use depship_core::ConfigKey;
    use std::cell::RefCell;

    #[tokio::test]
    async fn test_stops_after_failure() {
        let visited = RefCell::new(Vec::new());
        let mut outcome = SequenceOutcome::new();

        run_fail_fast(
            &mut outcome,
            [CommandState::Succeeded, CommandState::Failed, CommandState::Succeeded]
                .into_iter()
                .enumerate(),
            |(index, state)| {
                visited.borrow_mut().push(index);
                async move { Ok(state) }
            },
        )
        .await
        .unwrap();

        assert_eq!(*visited.borrow(), vec![0, 1]);
        assert_eq!(outcome.summary(), CommandState::Failed);
    }

    #[tokio::test]
    async fn test_failed_outcome_skips_later_sequences() {
        let mut outcome = SequenceOutcome::new();
        run_fail_fast(&mut outcome, [CommandState::Failed], |s| async move { Ok(s) })
            .await
            .unwrap();

        let mut ran = false;
        run_fail_fast(&mut outcome, [CommandState::Ready], |s| {
            ran = true;
            async move { Ok(s) }
        })
        .await
        .unwrap();

        assert!(!ran);
        assert_eq!(outcome.states().len(), 1);
    }

    #[tokio::test]
    async fn test_summary_is_first_non_success() {
        let mut outcome = SequenceOutcome::new();
        run_fail_fast(
            &mut outcome,
            [
                CommandState::Succeeded,
                CommandState::waiting(["x"]),
                CommandState::Deactivated,
            ],
            |s| async move { Ok(s) },
        )
        .await
        .unwrap();

        assert_eq!(outcome.states().len(), 3);
        assert_eq!(outcome.summary(), CommandState::waiting(["x"]));
        assert!(!outcome.is_failed());
    }

    #[tokio::test]
    async fn test_empty_sequence_succeeds() {
        let mut outcome = SequenceOutcome::new();
        run_fail_fast(&mut outcome, Vec::<CommandState>::new(), |s| async move { Ok(s) })
            .await
            .unwrap();
        assert_eq!(outcome.summary(), CommandState::Succeeded);
    }

    #[tokio::test]
    async fn test_error_aborts() {
        let mut outcome = SequenceOutcome::new();
        let result = run_fail_fast(&mut outcome, [1, 2], |i| async move {
            if i == 1 {
                Err(ReleaseError::MissingConfig(ConfigKey::RemoteJob))
            } else {
                Ok(CommandState::Succeeded)
            }
        })
        .await;

        assert!(result.is_err());
        assert!(outcome.states().is_empty());
    }

    #[tokio::test]
    async fn test_join_all_keeps_order() {
        let results = join_all((0..3).map(|i| async move { Ok(i * 2) }))
            .await
            .unwrap();
        assert_eq!(results, vec![0, 2, 4]);
    }
}
