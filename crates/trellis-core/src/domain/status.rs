//! Task status state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::BoardError;

/// Task status.
///
/// State transitions:
/// - Open -> InProgress | Blocked | Archived
/// - InProgress -> Blocked | Done | Archived
/// - Blocked -> InProgress | Archived
/// - Done -> Archived
/// - Archived (terminal, read-only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Blocked,
    Done,
    Archived,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Open,
        TaskStatus::InProgress,
        TaskStatus::Blocked,
        TaskStatus::Done,
        TaskStatus::Archived,
    ];

    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Archived)
    }

    /// Does a task in this state count against the list's WIP limit?
    pub fn counts_toward_wip(self) -> bool {
        !self.is_terminal()
    }

    /// States reachable in one step.
    pub fn successors(self) -> &'static [TaskStatus] {
        match self {
            TaskStatus::Open => &[
                TaskStatus::InProgress,
                TaskStatus::Blocked,
                TaskStatus::Archived,
            ],
            TaskStatus::InProgress => &[
                TaskStatus::Blocked,
                TaskStatus::Done,
                TaskStatus::Archived,
            ],
            TaskStatus::Blocked => &[TaskStatus::InProgress, TaskStatus::Archived],
            TaskStatus::Done => &[TaskStatus::Archived],
            TaskStatus::Archived => &[],
        }
    }

    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        self.successors().contains(&to)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Done => "done",
            TaskStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fails with `InvalidTransition` unless `to` is reachable from `from`.
pub fn assert_transition(from: TaskStatus, to: TaskStatus) -> Result<(), BoardError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(BoardError::InvalidTransition { from, to })
    }
}

/// Archived tasks are read-only.
pub fn assert_mutable(status: TaskStatus) -> Result<(), BoardError> {
    if status.is_terminal() {
        Err(BoardError::Immutable { status })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::start_work(TaskStatus::Open, TaskStatus::InProgress)]
    #[case::block_open(TaskStatus::Open, TaskStatus::Blocked)]
    #[case::archive_open(TaskStatus::Open, TaskStatus::Archived)]
    #[case::finish(TaskStatus::InProgress, TaskStatus::Done)]
    #[case::block_running(TaskStatus::InProgress, TaskStatus::Blocked)]
    #[case::unblock(TaskStatus::Blocked, TaskStatus::InProgress)]
    #[case::archive_done(TaskStatus::Done, TaskStatus::Archived)]
    fn allowed_transitions(#[case] from: TaskStatus, #[case] to: TaskStatus) {
        assert!(assert_transition(from, to).is_ok());
    }

    #[rstest]
    #[case::reopen_done(TaskStatus::Done, TaskStatus::Open)]
    #[case::skip_to_done(TaskStatus::Open, TaskStatus::Done)]
    #[case::blocked_to_done(TaskStatus::Blocked, TaskStatus::Done)]
    #[case::self_loop(TaskStatus::Open, TaskStatus::Open)]
    #[case::revive(TaskStatus::Archived, TaskStatus::Open)]
    #[case::archive_twice(TaskStatus::Archived, TaskStatus::Archived)]
    fn rejected_transitions(#[case] from: TaskStatus, #[case] to: TaskStatus) {
        let err = assert_transition(from, to).unwrap_err();
        assert!(matches!(err, BoardError::InvalidTransition { from: f, to: t } if f == from && t == to));
    }

    #[test]
    fn archived_has_no_successors_and_is_the_only_terminal_state() {
        for status in TaskStatus::ALL {
            assert_eq!(status.is_terminal(), status.successors().is_empty());
        }
    }

    #[test]
    fn only_archived_is_immutable() {
        for status in TaskStatus::ALL {
            assert_eq!(
                assert_mutable(status).is_err(),
                status == TaskStatus::Archived
            );
        }
    }

    #[test]
    fn status_serializes_as_snake_case() {
        let s = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(s, "\"in_progress\"");
        assert_eq!(TaskStatus::InProgress.to_string(), "in_progress");
    }
}
