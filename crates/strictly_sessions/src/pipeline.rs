//! Move Pipeline: validate, apply, re-arm.

use crate::coordinator::{Coordinator, SessionOf};
use crate::error::SessionError;
use crate::model::{
    Baseline, GameResult, MoveRecord, RequestState, ResultReason, Session, SessionStatus,
};
use crate::notify::NotificationKind;
use crate::rules::{Rules, Terminal};
use tracing::{info, instrument, warn};

/// What a move submission did.
#[derive(Debug, Clone, PartialEq)]
pub enum MoveOutcome<B, A> {
    /// The move was applied.
    Applied(Session<B, A>),
    /// The mover's clock had already run out; the session completed on time
    /// instead and the move was discarded.
    Expired(Session<B, A>),
}

impl<B, A> MoveOutcome<B, A> {
    /// The committed session.
    pub fn session(&self) -> &Session<B, A> {
        match self {
            Self::Applied(session) | Self::Expired(session) => session,
        }
    }

    /// Takes the committed session.
    pub fn into_session(self) -> Session<B, A> {
        match self {
            Self::Applied(session) | Self::Expired(session) => session,
        }
    }
}

enum Step {
    Applied { request_dropped: bool },
    Expired,
}

impl<R: Rules> Coordinator<R> {
    /// Validates and applies `action` for `proposer`.
    ///
    /// When `expected` is given, the move only applies if the session still
    /// matches that baseline. Computed moves always pass one, so a stale
    /// computation never lands on a newer position.
    ///
    /// # Errors
    ///
    /// Rejections ([`SessionError::NotActive`], [`SessionError::NotParticipant`],
    /// [`SessionError::NotYourTurn`], [`SessionError::StaleBaseline`],
    /// [`SessionError::IllegalAction`]) leave the session untouched.
    /// [`SessionError::Conflict`] means a concurrent write won.
    #[instrument(skip(self, action, expected))]
    pub fn apply_move(
        &self,
        id: &str,
        proposer: &str,
        action: R::Action,
        expected: Option<&Baseline>,
    ) -> Result<MoveOutcome<R::Board, R::Action>, SessionError> {
        let (step, session) = self.transact(id, |session, now| {
            if session.status != SessionStatus::Active {
                return Err(SessionError::NotActive {
                    status: session.status,
                });
            }
            if session.participant(proposer).is_none() {
                return Err(SessionError::NotParticipant {
                    player: proposer.to_string(),
                });
            }
            if session.current_turn != proposer {
                return Err(SessionError::NotYourTurn {
                    expected: session.current_turn.clone(),
                });
            }
            if let Some(baseline) = expected {
                if !session.matches(baseline) {
                    return Err(SessionError::StaleBaseline);
                }
            }

            let remaining = session.clock_remaining_ms(proposer, now);
            if remaining.is_some_and(|ms| ms <= 0) {
                self.expire(session);
                return Ok(Step::Expired);
            }

            let verdict = self
                .inner
                .rules
                .validate(&session.board, &action)
                .map_err(|e| SessionError::IllegalAction { reason: e.reason })?;

            if let Some(ms) = remaining {
                session.time_remaining_ms.insert(proposer.to_string(), ms);
            }
            session.history.push(MoveRecord {
                mover: proposer.to_string(),
                action,
                applied_at: now,
                clock_after_ms: remaining,
            });
            session.board = verdict.board;
            session.last_move_at = Some(now);

            let request_dropped = session.request.pending().is_some();
            session.request = RequestState::None;

            match verdict.terminal {
                Some(terminal) => {
                    let result = self.result_of(session, terminal);
                    self.finish(session, result);
                }
                None => {
                    session.current_turn = session
                        .opponent_of(proposer)
                        .map(|p| p.id.clone())
                        .unwrap_or_else(|| proposer.to_string());
                    self.rearm(session);
                }
            }

            Ok(Step::Applied { request_dropped })
        })?;

        match step {
            Step::Expired => {
                warn!("Mover's clock ran out before the move arrived");
                self.announce_result(&session);
                Ok(MoveOutcome::Expired(session))
            }
            Step::Applied { request_dropped } => {
                info!(ply = session.ply(), status = %session.status, "Move applied");
                if request_dropped {
                    self.notify_all(
                        &session,
                        NotificationKind::RequestCancelled,
                        serde_json::json!({ "reason": "superseded by a move" }),
                    );
                }
                if session.status == SessionStatus::Completed {
                    self.announce_result(&session);
                } else {
                    self.notify_turn(&session);
                }
                Ok(MoveOutcome::Applied(session))
            }
        }
    }

    fn result_of(&self, session: &SessionOf<R>, terminal: Terminal) -> GameResult {
        match terminal {
            Terminal::Win(seat) => GameResult::new(
                Some(session.at_seat(seat).id.clone()),
                ResultReason::Win,
            ),
            Terminal::Draw => GameResult::new(None, ResultReason::Draw),
        }
    }

    /// Tells both humans whose turn it is now.
    pub(crate) fn notify_turn(&self, session: &SessionOf<R>) {
        let data = serde_json::json!({
            "current_turn": session.current_turn,
            "ply": session.ply(),
            "last_move_at": session.last_move_at,
        });
        self.notify_all(session, NotificationKind::TurnChanged, data);
    }
}
