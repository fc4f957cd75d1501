//! Cooperative Request Protocol: undo and reset proposals.
//!
//! A session holds at most one open request. Proposing checks that; responding
//! only ever clears it, after optionally rewinding the game.

use crate::coordinator::{Coordinator, SessionOf};
use crate::error::SessionError;
use crate::model::{PendingRequest, RequestKind, RequestState, Session, SessionStatus};
use crate::notify::NotificationKind;
use crate::rules::Rules;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{info, instrument};

/// Where a request stands after a call.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome<B, A> {
    /// Waiting for the counterpart.
    Pending(Session<B, A>),
    /// Approved and applied.
    Approved(Session<B, A>),
    /// Declined by the counterpart.
    Declined(Session<B, A>),
    /// Withdrawn by the requester.
    Cancelled(Session<B, A>),
}

impl<B, A> RequestOutcome<B, A> {
    /// The session after the call.
    pub fn session(&self) -> &Session<B, A> {
        match self {
            Self::Pending(s) | Self::Approved(s) | Self::Declined(s) | Self::Cancelled(s) => s,
        }
    }

    /// Takes the session.
    pub fn into_session(self) -> Session<B, A> {
        match self {
            Self::Pending(s) | Self::Approved(s) | Self::Declined(s) | Self::Cancelled(s) => s,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Pending,
    Approved,
    Declined,
    Cancelled,
}

fn active(session: &Session<impl Sized, impl Sized>) -> Result<(), SessionError> {
    if session.status == SessionStatus::Active {
        Ok(())
    } else {
        Err(SessionError::NotActive {
            status: session.status,
        })
    }
}

impl<R: Rules> Coordinator<R> {
    /// Opens an undo or reset request.
    ///
    /// An agent counterpart answers on the spot, according to
    /// `agent_accepts_requests`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::RequestPending`] while another request is open,
    /// [`SessionError::EmptyHistory`] before the first move and
    /// [`SessionError::InvalidUndo`] for an out-of-range move count.
    #[instrument(skip(self))]
    pub fn propose(
        &self,
        id: &str,
        requester: &str,
        kind: RequestKind,
    ) -> Result<RequestOutcome<R::Board, R::Action>, SessionError> {
        let agent_accepts = *self.inner.settings.agent_accepts_requests();

        let ((resolution, request), session) = self.transact(id, |session, now| {
            active(session)?;
            let counterpart = session
                .opponent_of(requester)
                .cloned()
                .ok_or_else(|| SessionError::NotParticipant {
                    player: requester.to_string(),
                })?;
            if let Some(open) = session.request.pending() {
                return Err(SessionError::RequestPending { kind: open.kind });
            }

            let available = session.ply();
            if available == 0 {
                return Err(SessionError::EmptyHistory);
            }
            let target_ply = match kind {
                RequestKind::Undo { move_count } if move_count == 0 || move_count > available => {
                    return Err(SessionError::InvalidUndo {
                        requested: move_count,
                        available,
                    });
                }
                RequestKind::Undo { move_count } => available - move_count,
                RequestKind::Reset => 0,
            };

            let request = PendingRequest {
                kind,
                requester: requester.to_string(),
                target_ply,
                requested_at: now,
            };

            if counterpart.is_agent() {
                if agent_accepts {
                    self.rewind(session, target_ply, now)?;
                    return Ok((Resolution::Approved, request));
                }
                return Ok((Resolution::Declined, request));
            }

            session.request = RequestState::Pending(request.clone());
            Ok((Resolution::Pending, request))
        })?;

        info!(?resolution, target_ply = request.target_ply, "Request proposed");
        self.announce_request(&session, &request, requester, resolution);
        Ok(Self::outcome(resolution, session))
    }

    /// Answers the open request.
    ///
    /// Either participant may decline; the requester declining is a
    /// cancellation. Only the counterpart may approve.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoPendingRequest`] if nothing is open and
    /// [`SessionError::SelfApproval`] if the requester tries to approve.
    #[instrument(skip(self))]
    pub fn respond(
        &self,
        id: &str,
        responder: &str,
        approve: bool,
    ) -> Result<RequestOutcome<R::Board, R::Action>, SessionError> {
        let ((resolution, request), session) = self.transact(id, |session, now| {
            active(session)?;
            let open = session
                .request
                .pending()
                .cloned()
                .ok_or(SessionError::NoPendingRequest)?;
            if session.participant(responder).is_none() {
                return Err(SessionError::NotParticipant {
                    player: responder.to_string(),
                });
            }
            let own = open.requester == responder;

            if !approve {
                session.request = RequestState::None;
                let resolution = if own {
                    Resolution::Cancelled
                } else {
                    Resolution::Declined
                };
                return Ok((resolution, open));
            }
            if own {
                return Err(SessionError::SelfApproval);
            }

            self.rewind(session, open.target_ply, now)?;
            Ok((Resolution::Approved, open))
        })?;

        info!(?resolution, kind = %request.kind, "Request answered");
        self.announce_request(&session, &request, responder, resolution);
        Ok(Self::outcome(resolution, session))
    }

    /// Rewinds the game to `target_ply` moves and restarts the clock.
    ///
    /// The board is rebuilt by replaying the kept moves. Each clock goes back
    /// to what its owner had right after their last kept move.
    fn rewind(
        &self,
        session: &mut SessionOf<R>,
        target_ply: usize,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        let rules = &self.inner.rules;
        session.history.truncate(target_ply);
        session.board = rules
            .replay(session.history.iter().map(|record| &record.action))
            .map_err(|e| SessionError::IllegalAction { reason: e.reason })?;
        session.current_turn = session
            .at_seat(rules.side_to_move(&session.board))
            .id
            .clone();

        if let Some(tc) = session.time_control {
            let clocks: BTreeMap<_, _> = session
                .participants
                .iter()
                .map(|p| {
                    let ms = session
                        .history
                        .iter()
                        .rev()
                        .find(|record| record.mover == p.id)
                        .and_then(|record| record.clock_after_ms)
                        .unwrap_or_else(|| tc.total_ms());
                    (p.id.clone(), ms)
                })
                .collect();
            session.time_remaining_ms = clocks;
        }

        session.last_move_at = Some(now);
        session.request = RequestState::None;
        self.rearm(session);
        Ok(())
    }

    fn announce_request(
        &self,
        session: &SessionOf<R>,
        request: &PendingRequest,
        actor: &str,
        resolution: Resolution,
    ) {
        let data = serde_json::json!({
            "request": request.kind,
            "requester": request.requester,
            "target_ply": request.target_ply,
        });
        let counterpart = session
            .opponent_of(&request.requester)
            .map(|p| p.id.clone());

        match resolution {
            Resolution::Pending => {
                if let Some(counterpart) = counterpart {
                    self.notify(session, &counterpart, NotificationKind::RequestProposed, data);
                }
            }
            Resolution::Approved => {
                self.notify_all(session, NotificationKind::RequestAccepted, data);
                self.notify_turn(session);
            }
            Resolution::Declined => {
                self.notify(session, &request.requester, NotificationKind::RequestDeclined, data);
            }
            Resolution::Cancelled => {
                if let Some(counterpart) = counterpart.filter(|c| c != actor) {
                    self.notify(session, &counterpart, NotificationKind::RequestCancelled, data);
                }
            }
        }
    }

    fn outcome(
        resolution: Resolution,
        session: SessionOf<R>,
    ) -> RequestOutcome<R::Board, R::Action> {
        match resolution {
            Resolution::Pending => RequestOutcome::Pending(session),
            Resolution::Approved => RequestOutcome::Approved(session),
            Resolution::Declined => RequestOutcome::Declined(session),
            Resolution::Cancelled => RequestOutcome::Cancelled(session),
        }
    }
}
