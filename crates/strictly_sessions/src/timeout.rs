//! Timeout Scheduler: arming expiry checks and handling their fires.
//!
//! Cancellation is best effort, so a fire may arrive for a turn that is long
//! over. The baseline comparison in [`Coordinator::on_fire`] is what makes
//! such fires harmless.

use crate::coordinator::{Coordinator, SessionOf};
use crate::error::SessionError;
use crate::model::{GameResult, ResultReason, Session, SessionStatus};
use crate::rules::Rules;
use crate::scheduler::TimeoutCheck;
use chrono::Duration;
use tracing::{debug, info, instrument, warn};

/// Attempts before a fire gives up on write conflicts.
const FIRE_ATTEMPTS: usize = 3;

/// What a delivered check did.
#[derive(Debug, Clone, PartialEq)]
pub enum FireOutcome<B, A> {
    /// Something relevant happened since scheduling; nothing changed.
    Stale,
    /// The check arrived before the clock actually ran out; nothing changed.
    ClockRunning {
        /// Time the side to move still has.
        remaining_ms: i64,
    },
    /// The side to move lost on time.
    Expired(Session<B, A>),
}

enum Check {
    Stale,
    Running(i64),
    Expired,
}

impl<R: Rules> Coordinator<R> {
    /// Replaces the session's expiry check with one for the current turn.
    ///
    /// Clears `pending_timeout` first; the superseded handle is cancelled once
    /// the surrounding transaction commits. A scheduling failure is logged and
    /// leaves the turn unguarded except for the reactive check.
    pub(crate) fn rearm(&self, session: &mut SessionOf<R>) {
        session.pending_timeout = None;

        if session.status != SessionStatus::Active || session.time_control.is_none() {
            return;
        }
        let Some(baseline) = session.baseline() else {
            return;
        };
        let Some(remaining) = session.time_remaining_ms.get(&session.current_turn).copied() else {
            return;
        };
        if remaining <= 0 {
            return;
        }

        let at = baseline.last_move_at + Duration::milliseconds(remaining);
        let check = TimeoutCheck::new(session.id.clone(), baseline);
        match self.inner.scheduler.schedule(at, check) {
            Ok(handle) => {
                debug!(session_id = %session.id, handle = %handle, %at, "Expiry check armed");
                session.pending_timeout = Some(handle);
            }
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "Could not arm expiry check");
            }
        }
    }

    /// The side to move loses on time.
    pub(crate) fn expire(&self, session: &mut SessionOf<R>) {
        let loser = session.current_turn.clone();
        session.time_remaining_ms.insert(loser.clone(), 0);
        let winner = session.opponent_of(&loser).map(|p| p.id.clone());
        info!(session_id = %session.id, loser = %loser, "Clock expired");
        self.finish(session, GameResult::new(winner, ResultReason::Timeout));
    }

    /// Handles a delivered expiry check.
    ///
    /// A no-op unless the session is still active and still at the check's
    /// baseline. Duplicate and late deliveries therefore change nothing.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] on backend failure and
    /// [`SessionError::Conflict`] if concurrent writers kept winning.
    #[instrument(skip(self, check), fields(session_id = %check.session_id, turn = %check.baseline.turn, ply = check.baseline.ply))]
    pub fn on_fire(
        &self,
        check: &TimeoutCheck,
    ) -> Result<FireOutcome<R::Board, R::Action>, SessionError> {
        for attempt in 1..=FIRE_ATTEMPTS {
            let result = self.transact(&check.session_id, |session, now| {
                if session.status != SessionStatus::Active || !session.matches(&check.baseline) {
                    return Ok(Check::Stale);
                }
                let turn = session.current_turn.clone();
                match session.clock_remaining_ms(&turn, now) {
                    None => Ok(Check::Stale),
                    Some(ms) if ms > 0 => Ok(Check::Running(ms)),
                    Some(_) => {
                        self.expire(session);
                        Ok(Check::Expired)
                    }
                }
            });

            match result {
                Ok((Check::Stale, _)) => {
                    debug!("Stale expiry check ignored");
                    return Ok(FireOutcome::Stale);
                }
                Ok((Check::Running(remaining_ms), _)) => {
                    warn!(remaining_ms, "Expiry check fired early, ignoring");
                    return Ok(FireOutcome::ClockRunning { remaining_ms });
                }
                Ok((Check::Expired, session)) => {
                    self.announce_result(&session);
                    return Ok(FireOutcome::Expired(session));
                }
                Err(SessionError::NotFound { .. }) => {
                    debug!("Expiry check for unknown session ignored");
                    return Ok(FireOutcome::Stale);
                }
                Err(SessionError::Conflict { .. }) if attempt < FIRE_ATTEMPTS => {
                    debug!(attempt, "Write race during expiry check, re-reading");
                }
                Err(e) => return Err(e),
            }
        }

        Err(SessionError::Conflict {
            id: check.session_id.clone(),
        })
    }
}
