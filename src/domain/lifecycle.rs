//! Transition rules for the cost request state machine.
//!
//! Admin decisions (`POST /api/requests/:id/decision`) move a request between
//! review states; the synchronization and reconciliation services own the two
//! terminal transitions (`approved -> synced_to_freee` and
//! `synced_to_freee -> freee_deleted`) and do not go through this table.

use std::fmt;

use serde::Deserialize;

use super::models::RequestStatus;

/// Reviewer action carried in a decision payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Approve,
    Reject,
    Hold,
    Revert,
}

impl DecisionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionAction::Approve => "approve",
            DecisionAction::Reject => "reject",
            DecisionAction::Hold => "hold",
            DecisionAction::Revert => "revert",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: RequestStatus,
    pub action: DecisionAction,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cannot {} a request in status {}",
            self.action.as_str(),
            self.from.as_str()
        )
    }
}

impl std::error::Error for InvalidTransition {}

/// Resolves the status an action moves a request into.
///
/// Holding an already held request is an idempotent no-op. Everything not in
/// the table is rejected.
pub fn next_status(
    from: RequestStatus,
    action: DecisionAction,
) -> Result<RequestStatus, InvalidTransition> {
    use DecisionAction::*;
    use RequestStatus::*;

    let next = match (from, action) {
        (Submitted, Hold) | (OnHold, Hold) => OnHold,
        (Submitted, Approve) | (OnHold, Approve) => Approved,
        (Submitted, Reject) | (OnHold, Reject) | (Approved, Reject) => Rejected,
        (OnHold, Revert) | (Approved, Revert) | (Rejected, Revert) => Submitted,
        _ => return Err(InvalidTransition { from, action }),
    };
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use DecisionAction::*;
    use RequestStatus::*;

    #[test]
    fn hold_is_idempotent() {
        assert_eq!(next_status(Submitted, Hold).unwrap(), OnHold);
        assert_eq!(next_status(OnHold, Hold).unwrap(), OnHold);
    }

    #[test]
    fn approve_requires_review_state() {
        assert_eq!(next_status(Submitted, Approve).unwrap(), Approved);
        assert_eq!(next_status(OnHold, Approve).unwrap(), Approved);
        assert!(next_status(Approved, Approve).is_err());
        assert!(next_status(Rejected, Approve).is_err());
        assert!(next_status(SyncedToFreee, Approve).is_err());
    }

    #[test]
    fn reject_allowed_up_to_approved() {
        assert_eq!(next_status(Submitted, Reject).unwrap(), Rejected);
        assert_eq!(next_status(OnHold, Reject).unwrap(), Rejected);
        assert_eq!(next_status(Approved, Reject).unwrap(), Rejected);
        assert!(next_status(Rejected, Reject).is_err());
        assert!(next_status(SyncedToFreee, Reject).is_err());
    }

    #[test]
    fn revert_returns_to_submitted() {
        assert_eq!(next_status(OnHold, Revert).unwrap(), Submitted);
        assert_eq!(next_status(Approved, Revert).unwrap(), Submitted);
        assert_eq!(next_status(Rejected, Revert).unwrap(), Submitted);
        assert!(next_status(Submitted, Revert).is_err());
        assert!(next_status(SyncedToFreee, Revert).is_err());
    }

    #[test]
    fn terminal_states_accept_no_decisions() {
        for action in [Approve, Reject, Hold, Revert] {
            assert!(next_status(SyncedToFreee, action).is_err());
            assert!(next_status(FreeeDeleted, action).is_err());
            assert!(next_status(Draft, action).is_err());
        }
    }
}
