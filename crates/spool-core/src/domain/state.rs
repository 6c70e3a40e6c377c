//! Entry state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of an entry.
///
/// State transitions:
/// - Waiting -> Processing (claim)
/// - Processing -> Finished (finish)
/// - Processing -> Waiting (fail / requeue)
/// - Processing -> Suspending (suspend)
/// - Suspending -> Waiting (requeue)
///
/// Finished is terminal; the entry can only be removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// Eligible for claim.
    Waiting,

    /// Claimed by a consumer and being executed.
    Processing,

    /// Paused; not eligible for claim until requeued.
    Suspending,

    /// Done.
    Finished,
}

/// Something that happens to an entry after it has been created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryEvent {
    Claim,
    Finish,
    Fail,
    Requeue,
    Suspend,
}

impl EntryState {
    pub const ALL: [EntryState; 4] = [
        EntryState::Waiting,
        EntryState::Processing,
        EntryState::Suspending,
        EntryState::Finished,
    ];

    /// State a fresh entry starts in.
    pub fn initial(suspended: bool) -> Self {
        if suspended {
            EntryState::Suspending
        } else {
            EntryState::Waiting
        }
    }

    /// Target state for `event`, or `None` when the table has no such edge.
    pub fn apply(self, event: EntryEvent) -> Option<EntryState> {
        use EntryEvent::*;
        use EntryState::*;

        match (self, event) {
            (Waiting, Claim) => Some(Processing),
            (Processing, Finish) => Some(Finished),
            (Processing, Fail | Requeue) => Some(Waiting),
            (Processing, Suspend) => Some(Suspending),
            (Suspending, Requeue) => Some(Waiting),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, EntryState::Finished)
    }

    /// Is this entry eligible for claim?
    pub fn is_claimable(self) -> bool {
        matches!(self, EntryState::Waiting)
    }

    /// Processing entries belong to a consumer and must not be deleted.
    pub fn is_removable(self) -> bool {
        !matches!(self, EntryState::Processing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntryState::Waiting => "waiting",
            EntryState::Processing => "processing",
            EntryState::Suspending => "suspending",
            EntryState::Finished => "finished",
        }
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EntryEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryEvent::Claim => "claim",
            EntryEvent::Finish => "finish",
            EntryEvent::Fail => "fail",
            EntryEvent::Requeue => "requeue",
            EntryEvent::Suspend => "suspend",
        }
    }
}

impl fmt::Display for EntryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(EntryState::Waiting, EntryEvent::Claim, EntryState::Processing)]
    #[case(EntryState::Processing, EntryEvent::Finish, EntryState::Finished)]
    #[case(EntryState::Processing, EntryEvent::Fail, EntryState::Waiting)]
    #[case(EntryState::Processing, EntryEvent::Requeue, EntryState::Waiting)]
    #[case(EntryState::Processing, EntryEvent::Suspend, EntryState::Suspending)]
    #[case(EntryState::Suspending, EntryEvent::Requeue, EntryState::Waiting)]
    fn legal_transitions(
        #[case] from: EntryState,
        #[case] event: EntryEvent,
        #[case] to: EntryState,
    ) {
        assert_eq!(from.apply(event), Some(to));
    }

    #[rstest]
    #[case(EntryState::Waiting, EntryEvent::Finish)]
    #[case(EntryState::Waiting, EntryEvent::Fail)]
    #[case(EntryState::Waiting, EntryEvent::Requeue)]
    #[case(EntryState::Waiting, EntryEvent::Suspend)]
    #[case(EntryState::Processing, EntryEvent::Claim)]
    #[case(EntryState::Suspending, EntryEvent::Claim)]
    #[case(EntryState::Suspending, EntryEvent::Finish)]
    #[case(EntryState::Suspending, EntryEvent::Fail)]
    #[case(EntryState::Suspending, EntryEvent::Suspend)]
    fn illegal_transitions(#[case] from: EntryState, #[case] event: EntryEvent) {
        assert_eq!(from.apply(event), None);
    }

    #[test]
    fn finished_is_terminal() {
        for event in [
            EntryEvent::Claim,
            EntryEvent::Finish,
            EntryEvent::Fail,
            EntryEvent::Requeue,
            EntryEvent::Suspend,
        ] {
            assert_eq!(EntryState::Finished.apply(event), None);
        }
        assert!(EntryState::Finished.is_terminal());
    }

    #[test]
    fn only_processing_blocks_removal() {
        let blocked: Vec<_> = EntryState::ALL
            .into_iter()
            .filter(|s| !s.is_removable())
            .collect();
        assert_eq!(blocked, vec![EntryState::Processing]);
    }

    #[test]
    fn initial_state_honours_suspended_flag() {
        assert_eq!(EntryState::initial(false), EntryState::Waiting);
        assert_eq!(EntryState::initial(true), EntryState::Suspending);
    }
}
