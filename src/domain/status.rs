//! Processing status state machine.
//!
//! A request moves forward through `Pending → Transcribing → Analyzing →
//! Completed`. `Failed` is reachable from every non-terminal state.
//! `Analyzing` is a progress marker: a request may complete straight from
//! `Transcribing`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of a single capture request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// Accepted, nothing dispatched yet
    Pending,

    /// External transcription call in flight
    Transcribing,

    /// Backend reported it is analyzing the transcript
    Analyzing,

    /// Finished successfully (terminal)
    Completed,

    /// Finished with an error (terminal)
    Failed,
}

impl Default for ProcessingStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl ProcessingStatus {
    /// Whether no further transitions are allowed
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Position along the forward path, used to reject backward moves
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Transcribing => 1,
            Self::Analyzing => 2,
            Self::Completed => 3,
            Self::Failed => 3,
        }
    }

    /// Check whether `self → to` is a legal edge
    pub fn can_transition_to(self, to: ProcessingStatus) -> bool {
        if self.is_terminal() {
            return false;
        }

        match to {
            Self::Failed => true,
            Self::Pending => false,
            Self::Transcribing => self == Self::Pending,
            // Analyzing is optional, so Completed only needs the call to have started
            Self::Analyzing | Self::Completed => {
                self != Self::Pending && to.rank() > self.rank()
            }
        }
    }

    /// Return the new status, or `InvalidTransition` for an illegal edge
    pub fn transition(self, to: ProcessingStatus) -> Result<ProcessingStatus, TransitionError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(TransitionError::InvalidTransition { from: self, to })
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Transcribing => "transcribing",
            Self::Analyzing => "analyzing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Rejected status change
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Invalid status transition: {from} → {to}")]
    InvalidTransition {
        from: ProcessingStatus,
        to: ProcessingStatus,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ProcessingStatus; 5] = [
        ProcessingStatus::Pending,
        ProcessingStatus::Transcribing,
        ProcessingStatus::Analyzing,
        ProcessingStatus::Completed,
        ProcessingStatus::Failed,
    ];

    #[test]
    fn test_full_forward_path() {
        let status = ProcessingStatus::Pending
            .transition(ProcessingStatus::Transcribing)
            .unwrap()
            .transition(ProcessingStatus::Analyzing)
            .unwrap()
            .transition(ProcessingStatus::Completed)
            .unwrap();

        assert_eq!(status, ProcessingStatus::Completed);
    }

    #[test]
    fn test_analyzing_is_optional() {
        let status = ProcessingStatus::Transcribing
            .transition(ProcessingStatus::Completed)
            .unwrap();
        assert_eq!(status, ProcessingStatus::Completed);
    }

    #[test]
    fn test_failed_reachable_from_non_terminal() {
        for from in [
            ProcessingStatus::Pending,
            ProcessingStatus::Transcribing,
            ProcessingStatus::Analyzing,
        ] {
            assert_eq!(
                from.transition(ProcessingStatus::Failed),
                Ok(ProcessingStatus::Failed)
            );
        }
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        for from in [ProcessingStatus::Completed, ProcessingStatus::Failed] {
            for to in ALL {
                assert_eq!(
                    from.transition(to),
                    Err(TransitionError::InvalidTransition { from, to })
                );
            }
        }
    }

    #[test]
    fn test_backward_and_skipping_moves_rejected() {
        assert!(ProcessingStatus::Analyzing
            .transition(ProcessingStatus::Transcribing)
            .is_err());
        assert!(ProcessingStatus::Transcribing
            .transition(ProcessingStatus::Pending)
            .is_err());
        // Completion requires the external call to have started
        assert!(ProcessingStatus::Pending
            .transition(ProcessingStatus::Completed)
            .is_err());
        assert!(ProcessingStatus::Pending
            .transition(ProcessingStatus::Analyzing)
            .is_err());
        assert!(ProcessingStatus::Transcribing
            .transition(ProcessingStatus::Transcribing)
            .is_err());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ProcessingStatus::Transcribing).unwrap();
        assert_eq!(json, "\"transcribing\"");
    }
}
