//! Errors surfaced to direct callers of the coordinator.

use crate::model::{PlayerId, RequestKind, SessionId, SessionStatus};
use crate::store::StoreError;
use derive_more::{Display, Error};

/// Why a session operation did not change anything.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum SessionError {
    /// No session with this ID.
    #[display("Session {} not found", id)]
    NotFound {
        /// Missing session.
        id: SessionId,
    },
    /// The session is not in play.
    #[display("Session is {}, not active", status)]
    NotActive {
        /// Current status.
        status: SessionStatus,
    },
    /// The invitation was already answered.
    #[display("Session is {}, not pending", status)]
    NotPending {
        /// Current status.
        status: SessionStatus,
    },
    /// The caller is not the right participant for this operation.
    #[display("Player {} may not do that here", player)]
    NotParticipant {
        /// The caller.
        player: PlayerId,
    },
    /// The caller moved out of turn.
    #[display("Not your turn. Waiting for {}", expected)]
    NotYourTurn {
        /// The participant to move.
        expected: PlayerId,
    },
    /// The rules engine rejected the action.
    #[display("Illegal action: {}", reason)]
    IllegalAction {
        /// Engine's explanation.
        reason: String,
    },
    /// The session moved on since the caller's snapshot.
    #[display("Session changed since the move was computed")]
    StaleBaseline,
    /// A request is already open.
    #[display("A {} request is already pending", kind)]
    RequestPending {
        /// The open request's kind.
        kind: RequestKind,
    },
    /// There is nothing to respond to.
    #[display("No request is pending")]
    NoPendingRequest,
    /// Requesters may cancel but not approve their own request.
    #[display("Cannot approve your own request")]
    SelfApproval,
    /// Undo and reset need at least one move.
    #[display("No moves have been played")]
    EmptyHistory,
    /// Undo count out of range.
    #[display("Cannot undo {} of {} moves", requested, available)]
    InvalidUndo {
        /// Moves asked for.
        requested: usize,
        /// Moves in the history.
        available: usize,
    },
    /// The session could not be created as described.
    #[display("Invalid session setup: {}", reason)]
    InvalidSetup {
        /// What is wrong.
        reason: String,
    },
    /// A status change that does not move the lifecycle forward.
    #[display("Session cannot go from {} to {}", from, to)]
    InvalidTransition {
        /// Status before the change.
        from: SessionStatus,
        /// Status the change asked for.
        to: SessionStatus,
    },
    /// Another writer committed first; refresh and retry.
    #[display("Session {} changed, refresh and retry", id)]
    Conflict {
        /// Contended session.
        id: SessionId,
    },
    /// The store failed.
    #[display("{}", source)]
    Store {
        /// Underlying store error.
        source: StoreError,
    },
}

impl SessionError {
    /// A rejected transition: the request was understood but not allowed.
    pub fn is_rejection(&self) -> bool {
        !matches!(
            self,
            Self::NotFound { .. } | Self::Conflict { .. } | Self::Store { .. }
        )
    }
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { id } => Self::NotFound { id },
            StoreError::Conflict { id, .. } => Self::Conflict { id },
            other => Self::Store { source: other },
        }
    }
}
