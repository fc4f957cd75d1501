//! Opponent Dispatcher.
//!
//! Runs after every committed write. When the turn has just passed to the
//! non-human participant, a one-shot task computes its move off the session
//! and feeds the result back through [`Coordinator::apply_move`] with the
//! baseline it computed against.

use crate::computer::Constraints;
use crate::coordinator::{Coordinator, SessionOf};
use crate::error::SessionError;
use crate::model::{Baseline, PlayerId, Session, SessionId, SessionStatus};
use crate::rules::Rules;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

/// Whether a committed change hands the turn to the agent.
///
/// Only turn-relevant fields count. A write that merely swaps the pending
/// timer handle or opens a request never triggers a dispatch.
pub fn should_dispatch<B, A>(before: &Session<B, A>, after: &Session<B, A>) -> bool {
    if !after.is_agent_turn() {
        return false;
    }
    before.status != after.status
        || before.current_turn != after.current_turn
        || before.history.len() != after.history.len()
        || before.last_move_at != after.last_move_at
}

impl<R: Rules> Coordinator<R> {
    /// Commit hook.
    pub(crate) fn on_commit(&self, before: &SessionOf<R>, after: &SessionOf<R>) {
        if should_dispatch(before, after) {
            self.dispatch(after);
        }
    }

    /// Spawns the computation for the agent to move in `snapshot`.
    pub(crate) fn dispatch(&self, snapshot: &SessionOf<R>) {
        let Some(baseline) = snapshot.baseline() else {
            return;
        };
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!(session_id = %snapshot.id, "No async runtime, agent move not dispatched");
                return;
            }
        };

        let settings = &self.inner.settings;
        let agent = snapshot.current_turn.clone();
        let constraints = Constraints::new(
            *settings.compute_budget_ms(),
            snapshot.ply(),
            snapshot.clock_remaining_ms(&agent, self.inner.clock.now()),
        );
        let span = info_span!("dispatch", session_id = %snapshot.id, agent = %agent, ply = baseline.ply);
        let task = runtime.spawn(
            self.clone()
                .run_dispatch(
                    snapshot.id.clone(),
                    agent,
                    snapshot.board.clone(),
                    constraints,
                    baseline,
                )
                .instrument(span),
        );

        match self.inner.in_flight.lock() {
            Ok(mut in_flight) => {
                in_flight.retain(|(_, handle)| !handle.is_finished());
                in_flight.push((snapshot.id.clone(), task));
            }
            Err(_) => warn!("Dispatch table lock poisoned, task left untracked"),
        }
        debug!(session_id = %snapshot.id, "Agent move dispatched");
    }

    async fn run_dispatch(
        self,
        id: SessionId,
        agent: PlayerId,
        board: R::Board,
        constraints: Constraints,
        baseline: Baseline,
    ) {
        let budget = constraints.budget();
        let computed =
            tokio::time::timeout(budget, self.inner.computer.compute(&board, &constraints)).await;

        let action = match computed {
            Ok(Ok(action)) => action,
            Ok(Err(e)) => {
                warn!(error = %e, "Move computation failed, session left unchanged");
                return;
            }
            Err(_) => {
                warn!(
                    budget_ms = *constraints.budget_ms(),
                    "Move computation exceeded its budget, session left unchanged"
                );
                return;
            }
        };

        match self.apply_move(&id, &agent, action, Some(&baseline)) {
            Ok(outcome) => {
                info!(ply = outcome.session().ply(), "Agent move committed");
            }
            Err(e @ (SessionError::Conflict { .. } | SessionError::NotFound { .. })) => {
                info!(error = %e, "Agent move dropped");
            }
            Err(e) if e.is_rejection() => {
                info!(error = %e, "Agent move rejected, session moved on");
            }
            Err(e) => {
                warn!(error = %e, "Agent move could not be committed");
            }
        }
    }

    /// Whether a computation for `id` is still running.
    pub fn dispatch_in_flight(&self, id: &str) -> bool {
        self.inner
            .in_flight
            .lock()
            .map(|in_flight| {
                in_flight
                    .iter()
                    .any(|(session_id, handle)| session_id == id && !handle.is_finished())
            })
            .unwrap_or(false)
    }

    /// Waits until no computation is running, including ones spawned while
    /// waiting.
    pub async fn drain_dispatches(&self) {
        loop {
            let pending: Vec<_> = match self.inner.in_flight.lock() {
                Ok(mut in_flight) => in_flight.drain(..).map(|(_, handle)| handle).collect(),
                Err(_) => return,
            };
            if pending.is_empty() {
                return;
            }
            for handle in pending {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Dispatch task ended abnormally");
                }
            }
        }
    }

    /// Fallback trigger for a session that may be stuck.
    ///
    /// Ends the session if the side to move has run out of time, and otherwise
    /// re-dispatches the agent when it is to move and nothing is computing.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] for unknown sessions and
    /// [`SessionError::Conflict`] if a concurrent write won.
    #[instrument(skip(self))]
    pub fn poke(&self, id: &str) -> Result<SessionOf<R>, SessionError> {
        self.settle(id, false)
    }

    /// Picks up a session left behind by a previous process.
    ///
    /// Like [`Coordinator::poke`], but also arms a fresh expiry check when the
    /// clock is still running. The stored handle belongs to a scheduler that no
    /// longer exists. Should the old check still fire somewhere, its baseline
    /// guard makes it harmless.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] for unknown sessions and
    /// [`SessionError::Conflict`] if a concurrent write won.
    #[instrument(skip(self))]
    pub fn resume(&self, id: &str) -> Result<SessionOf<R>, SessionError> {
        self.settle(id, true)
    }

    fn settle(&self, id: &str, rearm: bool) -> Result<SessionOf<R>, SessionError> {
        let (expired, session) = self.transact(id, |session, now| {
            if session.status != SessionStatus::Active {
                return Ok(false);
            }
            let turn = session.current_turn.clone();
            match session.clock_remaining_ms(&turn, now) {
                Some(ms) if ms <= 0 => {
                    self.expire(session);
                    Ok(true)
                }
                _ => {
                    if rearm {
                        self.rearm(session);
                    }
                    Ok(false)
                }
            }
        })?;

        if expired {
            self.announce_result(&session);
        } else if session.is_agent_turn() && !self.dispatch_in_flight(id) {
            info!("Re-dispatching agent move");
            self.dispatch(&session);
        }
        Ok(session)
    }
}
