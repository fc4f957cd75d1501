//! Composition root for the session core.
//!
//! Every mutation of a session, whatever triggered it, goes through one
//! read-check-write helper: load a versioned snapshot, compute the next
//! document from that snapshot, write it conditionally. Side effects that must
//! not be rolled back (timer cancellation, opponent dispatch, notifications)
//! run only after the write committed.

use crate::clock::{Clock, SystemClock};
use crate::computer::{FirstLegalMove, MoveComputer};
use crate::config::Settings;
use crate::error::SessionError;
use crate::model::{
    GameResult, Participant, PlayerId, RequestState, ResultReason, Session, SessionId,
    SessionStatus, TimeControl,
};
use crate::notify::{Notification, NotificationKind, NotificationSink, TracingSink};
use crate::rules::{Rules, Seat};
use crate::scheduler::{TaskScheduler, TimeoutCheck};
use crate::store::{MemoryStore, SessionStore, StoreError, Versioned};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// The session type a coordinator over `R` manages.
pub type SessionOf<R> = Session<<R as Rules>::Board, <R as Rules>::Action>;

/// A match proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, derive_new::new)]
pub struct NewSession {
    /// Who proposes the match. Must be human.
    pub challenger: Participant,
    /// Who is invited. An agent invitee accepts immediately.
    pub invitee: Participant,
    /// Seat the challenger takes.
    pub challenger_seat: Seat,
    /// Clock budget, or `None` for an untimed match.
    #[serde(default)]
    pub time_control: Option<TimeControl>,
}

pub(crate) struct Inner<R: Rules> {
    pub(crate) rules: R,
    pub(crate) store: Arc<dyn SessionStore<R::Board, R::Action>>,
    pub(crate) scheduler: Arc<dyn TaskScheduler>,
    pub(crate) computer: Arc<dyn MoveComputer<R>>,
    pub(crate) notifier: Arc<dyn NotificationSink>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) settings: Settings,
    pub(crate) in_flight: Mutex<Vec<(SessionId, JoinHandle<()>)>>,
}

/// Shared handle to the session core. Cheap to clone.
pub struct Coordinator<R: Rules> {
    pub(crate) inner: Arc<Inner<R>>,
}

impl<R: Rules> Clone for Coordinator<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Rules> std::fmt::Debug for Coordinator<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("rules", &self.inner.rules)
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}

/// Assembles a [`Coordinator`].
///
/// Only the rules and the scheduler are required. The rest default to an
/// in-memory store, the first-legal-move computer, a log-only notifier and the
/// system clock.
pub struct CoordinatorBuilder<R: Rules> {
    rules: R,
    scheduler: Arc<dyn TaskScheduler>,
    store: Option<Arc<dyn SessionStore<R::Board, R::Action>>>,
    computer: Option<Arc<dyn MoveComputer<R>>>,
    notifier: Option<Arc<dyn NotificationSink>>,
    clock: Option<Arc<dyn Clock>>,
    settings: Settings,
}

impl<R: Rules> CoordinatorBuilder<R> {
    /// Starts a builder.
    pub fn new(rules: R, scheduler: Arc<dyn TaskScheduler>) -> Self {
        Self {
            rules,
            scheduler,
            store: None,
            computer: None,
            notifier: None,
            clock: None,
            settings: Settings::default(),
        }
    }

    /// Uses `store` for persistence.
    pub fn store(mut self, store: Arc<dyn SessionStore<R::Board, R::Action>>) -> Self {
        self.store = Some(store);
        self
    }

    /// Uses `computer` for the non-human participant.
    pub fn computer(mut self, computer: Arc<dyn MoveComputer<R>>) -> Self {
        self.computer = Some(computer);
        self
    }

    /// Sends notifications to `notifier`.
    pub fn notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Reads time from `clock`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Applies `settings`.
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Finishes the coordinator.
    #[instrument(skip(self), fields(game = self.rules.name()))]
    pub fn build(self) -> Coordinator<R> {
        let rules = self.rules;
        let store: Arc<dyn SessionStore<R::Board, R::Action>> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryStore::new()),
        };
        let computer: Arc<dyn MoveComputer<R>> = match self.computer {
            Some(computer) => computer,
            None => Arc::new(FirstLegalMove::new(rules.clone())),
        };
        let notifier: Arc<dyn NotificationSink> = match self.notifier {
            Some(notifier) => notifier,
            None => Arc::new(TracingSink),
        };
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        info!("Coordinator ready");
        Coordinator {
            inner: Arc::new(Inner {
                rules,
                store,
                scheduler: self.scheduler,
                computer,
                notifier,
                clock,
                settings: self.settings,
                in_flight: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl<R: Rules> Coordinator<R> {
    /// The rules engine.
    pub fn rules(&self) -> &R {
        &self.inner.rules
    }

    /// Active settings.
    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Current time according to the coordinator's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// One atomic read-check-write against the store.
    ///
    /// `mutate` works on a copy of the latest committed session. Nothing is
    /// written if it fails, leaves the copy unchanged, or moves the status
    /// anywhere but forward.
    pub(crate) fn transact<T>(
        &self,
        id: &str,
        mutate: impl FnOnce(&mut SessionOf<R>, DateTime<Utc>) -> Result<T, SessionError>,
    ) -> Result<(T, SessionOf<R>), SessionError> {
        let now = self.inner.clock.now();
        let Versioned {
            version,
            session: before,
        } = self
            .inner
            .store
            .load(id)?
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;

        let mut after = before.clone();
        let value = match mutate(&mut after, now) {
            Ok(value) => value,
            Err(e) => {
                self.discard_new_timeout(&before, &after);
                return Err(e);
            }
        };

        if after == before {
            return Ok((value, after));
        }
        if after.status != before.status && !before.status.can_become(after.status) {
            self.discard_new_timeout(&before, &after);
            warn!(session_id = id, from = %before.status, to = %after.status, "Backward status change refused");
            return Err(SessionError::InvalidTransition {
                from: before.status,
                to: after.status,
            });
        }
        after.updated_at = now;

        if let Err(e) = self.inner.store.replace(version, &after) {
            self.discard_new_timeout(&before, &after);
            if matches!(e, StoreError::Conflict { .. }) {
                debug!(session_id = id, version, "Lost write race");
            }
            return Err(e.into());
        }

        if let Some(old) = &before.pending_timeout {
            if after.pending_timeout.as_ref() != Some(old) {
                self.inner.scheduler.cancel(old);
            }
        }

        self.on_commit(&before, &after);
        Ok((value, after))
    }

    /// Cancels a timer scheduled by a transaction that did not commit.
    fn discard_new_timeout(&self, before: &SessionOf<R>, after: &SessionOf<R>) {
        if after.pending_timeout != before.pending_timeout {
            if let Some(handle) = &after.pending_timeout {
                self.inner.scheduler.cancel(handle);
            }
        }
    }

    /// Ends the session. Clears the timer and any open request.
    pub(crate) fn finish(&self, session: &mut SessionOf<R>, result: GameResult) {
        debug!(session_id = %session.id, reason = %result.reason, winner = ?result.winner, "Session finished");
        session.status = SessionStatus::Completed;
        session.result = Some(result);
        session.pending_timeout = None;
        session.request = RequestState::None;
    }

    /// Starts play and arms the first turn's clock.
    fn start(&self, session: &mut SessionOf<R>, now: DateTime<Utc>) {
        session.status = SessionStatus::Active;
        session.last_move_at = Some(now);
        self.rearm(session);
    }

    /// Sends a notification to one participant. Agents are skipped.
    pub(crate) fn notify(
        &self,
        session: &SessionOf<R>,
        recipient: &str,
        kind: NotificationKind,
        data: serde_json::Value,
    ) {
        match session.participant(recipient) {
            Some(p) if p.is_agent() => return,
            Some(_) => {}
            None => {
                warn!(recipient, "Notification for unknown participant dropped");
                return;
            }
        }
        let notification =
            Notification::new(recipient.to_string(), kind, session.id.clone(), data);
        if let Err(e) = self.inner.notifier.send(notification) {
            warn!(error = %e, recipient, %kind, "Notification delivery failed");
        }
    }

    /// Sends the same notification to every human participant.
    pub(crate) fn notify_all(
        &self,
        session: &SessionOf<R>,
        kind: NotificationKind,
        data: serde_json::Value,
    ) {
        for participant in &session.participants {
            self.notify(session, &participant.id, kind, data.clone());
        }
    }

    /// Notifies everyone of a completed session.
    pub(crate) fn announce_result(&self, session: &SessionOf<R>) {
        let data = serde_json::json!({ "result": session.result });
        self.notify_all(session, NotificationKind::GameOver, data);
    }

    /// Proposes a match.
    ///
    /// The session starts pending, or active straight away when the invitee is
    /// an agent.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidSetup`] for malformed proposals and
    /// [`SessionError::Store`] if the session cannot be stored.
    #[instrument(skip(self, request), fields(challenger = %request.challenger.id, invitee = %request.invitee.id))]
    pub fn create_session(&self, request: NewSession) -> Result<SessionOf<R>, SessionError> {
        let NewSession {
            challenger,
            invitee,
            challenger_seat,
            time_control,
        } = request;

        if challenger.id.trim().is_empty() || invitee.id.trim().is_empty() {
            return Err(SessionError::InvalidSetup {
                reason: "participant IDs must not be empty".to_string(),
            });
        }
        if challenger.id == invitee.id {
            return Err(SessionError::InvalidSetup {
                reason: "a session needs two distinct participants".to_string(),
            });
        }
        if challenger.is_agent() {
            return Err(SessionError::InvalidSetup {
                reason: "only humans can propose a match".to_string(),
            });
        }
        if time_control.is_some_and(|tc| tc.total_seconds == 0) {
            return Err(SessionError::InvalidSetup {
                reason: "time control must allow some time".to_string(),
            });
        }

        let now = self.inner.clock.now();
        let invitee_id = invitee.id.clone();
        let challenger_id = challenger.id.clone();
        let auto_accept = invitee.is_agent();
        let participants = match challenger_seat {
            Seat::First => [challenger, invitee],
            Seat::Second => [invitee, challenger],
        };

        let board = self.inner.rules.initial_board();
        let first = participants[self.inner.rules.side_to_move(&board).index()]
            .id
            .clone();
        let mut session = Session::new(
            uuid::Uuid::new_v4().to_string(),
            self.inner.rules.name().to_string(),
            participants,
            invitee_id,
            first,
            board,
            time_control,
            now,
        );

        if auto_accept {
            self.start(&mut session, now);
        }

        if let Err(e) = self.inner.store.insert(&session) {
            if let Some(handle) = &session.pending_timeout {
                self.inner.scheduler.cancel(handle);
            }
            return Err(e.into());
        }

        info!(session_id = %session.id, auto_accept, "Session created");

        if auto_accept {
            self.notify(
                &session,
                &challenger_id,
                NotificationKind::InvitationAccepted,
                serde_json::json!({ "current_turn": session.current_turn }),
            );
            if session.is_agent_turn() {
                self.dispatch(&session);
            }
        }

        Ok(session)
    }

    /// The invitee accepts; play begins.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotPending`] if the invitation was already
    /// answered and [`SessionError::NotParticipant`] if `player` is not the
    /// invitee.
    #[instrument(skip(self))]
    pub fn accept(&self, id: &str, player: &str) -> Result<SessionOf<R>, SessionError> {
        let ((), session) = self.transact(id, |session, now| {
            if session.status != SessionStatus::Pending {
                return Err(SessionError::NotPending {
                    status: session.status,
                });
            }
            if session.invitee != player {
                return Err(SessionError::NotParticipant {
                    player: player.to_string(),
                });
            }
            self.start(session, now);
            Ok(())
        })?;

        info!(current_turn = %session.current_turn, "Invitation accepted");
        if let Some(challenger) = session.opponent_of(player) {
            self.notify(
                &session,
                &challenger.id,
                NotificationKind::InvitationAccepted,
                serde_json::json!({ "current_turn": session.current_turn }),
            );
        }
        Ok(session)
    }

    /// The invitee declines; the session is cancelled.
    ///
    /// # Errors
    ///
    /// Same as [`Coordinator::accept`].
    #[instrument(skip(self))]
    pub fn decline(&self, id: &str, player: &str) -> Result<SessionOf<R>, SessionError> {
        let ((), session) = self.transact(id, |session, _now| {
            if session.status != SessionStatus::Pending {
                return Err(SessionError::NotPending {
                    status: session.status,
                });
            }
            if session.invitee != player {
                return Err(SessionError::NotParticipant {
                    player: player.to_string(),
                });
            }
            session.status = SessionStatus::Cancelled;
            Ok(())
        })?;

        info!("Invitation declined");
        if let Some(challenger) = session.opponent_of(player) {
            self.notify(
                &session,
                &challenger.id,
                NotificationKind::InvitationDeclined,
                serde_json::Value::Null,
            );
        }
        Ok(session)
    }

    /// A participant concedes; the other wins.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotActive`] unless the session is in play and
    /// [`SessionError::NotParticipant`] for outsiders.
    #[instrument(skip(self))]
    pub fn resign(&self, id: &str, player: &str) -> Result<SessionOf<R>, SessionError> {
        let ((), session) = self.transact(id, |session, _now| {
            if session.status != SessionStatus::Active {
                return Err(SessionError::NotActive {
                    status: session.status,
                });
            }
            let winner: PlayerId = session
                .opponent_of(player)
                .map(|p| p.id.clone())
                .ok_or_else(|| SessionError::NotParticipant {
                    player: player.to_string(),
                })?;
            self.finish(
                session,
                GameResult::new(Some(winner), ResultReason::Resignation),
            );
            Ok(())
        })?;

        info!("Participant resigned");
        self.announce_result(&session);
        Ok(session)
    }

    /// Reads the latest committed session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] for unknown IDs.
    #[instrument(skip(self))]
    pub fn session(&self, id: &str) -> Result<SessionOf<R>, SessionError> {
        self.inner
            .store
            .load(id)?
            .map(|versioned| versioned.session)
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })
    }

    /// All sessions, most recently updated first.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Store`] if the store cannot be read.
    #[instrument(skip(self))]
    pub fn list_sessions(&self) -> Result<Vec<SessionOf<R>>, SessionError> {
        Ok(self.inner.store.list()?)
    }

    /// Feeds fired checks from a scheduler channel into [`Coordinator::on_fire`].
    pub fn spawn_timeout_listener(
        &self,
        mut rx: mpsc::UnboundedReceiver<TimeoutCheck>,
    ) -> JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            info!("Timeout listener started");
            while let Some(check) = rx.recv().await {
                if let Err(e) = coordinator.on_fire(&check) {
                    warn!(session_id = %check.session_id, error = %e, "Timeout check failed");
                }
            }
            info!("Timeout listener stopped");
        })
    }
}
