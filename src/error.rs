//! Tour engine error types

use thiserror::Error;

use crate::tour::{Phase, Transition};

/// Failures reported by the tour engine.
///
/// None of these are fatal: unavailable targets are recovered by skipping or
/// aborting, everything else is reported to the caller with state unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TourError {
    /// Step anchor never produced laid-out geometry within the timeout
    #[error("step '{step_id}' of tour '{tour_id}' never resolved to a laid-out anchor")]
    TargetUnavailable { tour_id: String, step_id: String },

    /// Transition requested from a state that forbids it
    #[error("{transition} is not allowed while {phase}: {reason}")]
    InvalidTransition {
        transition: Transition,
        phase: Phase,
        reason: &'static str,
    },

    /// A tour was started before completion state was hydrated
    #[error("completion state has not been hydrated yet")]
    NotHydrated,

    #[error("completion state was already hydrated")]
    AlreadyHydrated,

    /// Completion flag could not be written; memory stays authoritative
    #[error("failed to persist completion of tour '{tour_id}': {reason}")]
    PersistenceWriteFailure { tour_id: String, reason: String },

    #[error("tour '{0}' has no steps")]
    EmptyTour(String),

    #[error("tour '{tour_id}' declares order {order} more than once")]
    DuplicateOrder { tour_id: String, order: i32 },

    #[error("step '{step_id}' belongs to tour '{step_tour}', not '{tour_id}'")]
    ForeignStep {
        tour_id: String,
        step_id: String,
        step_tour: String,
    },

    /// A later transition cancelled this one before it settled
    #[error("superseded by a later transition")]
    Superseded,

    #[error("tour engine has shut down")]
    EngineClosed,
}

impl TourError {
    pub(crate) fn invalid(transition: Transition, phase: Phase, reason: &'static str) -> Self {
        TourError::InvalidTransition {
            transition,
            phase,
            reason,
        }
    }

    /// Whether the failure left the engine state untouched
    pub fn is_no_op(&self) -> bool {
        matches!(
            self,
            TourError::InvalidTransition { .. }
                | TourError::NotHydrated
                | TourError::AlreadyHydrated
                | TourError::EmptyTour(_)
                | TourError::DuplicateOrder { .. }
                | TourError::ForeignStep { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_message() {
        let err = TourError::invalid(Transition::Next, Phase::Idle, "no tour is running");
        assert_eq!(
            err.to_string(),
            "next is not allowed while idle: no tour is running"
        );
        assert!(err.is_no_op());
    }

    #[test]
    fn test_target_unavailable_is_not_no_op() {
        let err = TourError::TargetUnavailable {
            tour_id: "home".into(),
            step_id: "a".into(),
        };
        assert!(!err.is_no_op());
        assert!(err.to_string().contains("'a'"));
    }
}
