//! The session document and its value types.

use crate::rules::Seat;
use chrono::{DateTime, Utc};
use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Unique identifier for a game session.
pub type SessionId = String;

/// Unique identifier for a player.
pub type PlayerId = String;

/// Type of player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerType {
    /// Moves are submitted by a client.
    Human,
    /// Moves are computed by the move-computation collaborator.
    Agent,
}

/// One of the two parties in a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, derive_new::new)]
pub struct Participant {
    /// Player's unique ID.
    pub id: PlayerId,
    /// Type of player.
    pub kind: PlayerType,
}

impl Participant {
    /// A participant whose moves arrive from a client.
    pub fn human(id: impl Into<PlayerId>) -> Self {
        Self::new(id.into(), PlayerType::Human)
    }

    /// A participant whose moves are computed.
    pub fn agent(id: impl Into<PlayerId>) -> Self {
        Self::new(id.into(), PlayerType::Agent)
    }

    /// Whether this participant is the non-human role.
    pub fn is_agent(&self) -> bool {
        self.kind == PlayerType::Agent
    }
}

/// Lifecycle of a session. Only ever moves forward.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionStatus {
    /// Proposed, waiting for the invitee.
    Pending,
    /// In play.
    Active,
    /// Finished with a result.
    Completed,
    /// Declined before play started.
    Cancelled,
}

impl SessionStatus {
    /// Completed and cancelled sessions are immutable.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Whether `next` is a legal forward transition from `self`.
    pub fn can_become(self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Active)
                | (Self::Pending, Self::Cancelled)
                | (Self::Active, Self::Completed)
                | (Self::Active, Self::Cancelled)
        )
    }
}

/// Per-player clock budget for a timed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_new::new)]
pub struct TimeControl {
    /// Initial time for each participant, in seconds.
    pub total_seconds: u32,
}

impl TimeControl {
    /// Initial budget in milliseconds.
    pub fn total_ms(&self) -> i64 {
        i64::from(self.total_seconds) * 1000
    }
}

/// An applied move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveRecord<A> {
    /// Who made the move.
    pub mover: PlayerId,
    /// The engine-specific action.
    pub action: A,
    /// When the move was committed.
    pub applied_at: DateTime<Utc>,
    /// The mover's remaining time right after the move, for timed sessions.
    pub clock_after_ms: Option<i64>,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResultReason {
    /// The engine reported a decisive position (checkmate, three in a row).
    Win,
    /// The engine reported a drawn position.
    Draw,
    /// A participant resigned.
    Resignation,
    /// The side to move ran out of time.
    Timeout,
}

/// Final result of a completed session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, derive_new::new)]
pub struct GameResult {
    /// Winner, or `None` for a draw.
    pub winner: Option<PlayerId>,
    /// How the session ended.
    pub reason: ResultReason,
}

/// Kind of cooperative request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestKind {
    /// Take back the last `move_count` moves.
    #[display("undo({move_count})")]
    Undo {
        /// Number of moves to rewind.
        move_count: usize,
    },
    /// Restart from the initial position.
    #[display("reset")]
    Reset,
}

/// An outstanding undo or reset proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    /// Undo or reset.
    pub kind: RequestKind,
    /// Who proposed it.
    pub requester: PlayerId,
    /// History length the session is rewound to on approval.
    pub target_ply: usize,
    /// When it was proposed.
    pub requested_at: DateTime<Utc>,
}

/// At most one request is open per session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RequestState {
    /// No request is open.
    #[default]
    None,
    /// A request waits for a response.
    Pending(PendingRequest),
}

impl RequestState {
    /// The open request, if any.
    pub fn pending(&self) -> Option<&PendingRequest> {
        match self {
            Self::None => None,
            Self::Pending(request) => Some(request),
        }
    }
}

/// Snapshot of the turn-relevant fields a deferred trigger was created for.
///
/// A scheduled check or an opponent computation only acts if the session
/// still matches its baseline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Baseline {
    /// Participant to move.
    pub turn: PlayerId,
    /// When the current turn started.
    pub last_move_at: DateTime<Utc>,
    /// History length.
    pub ply: usize,
}

/// Opaque handle to a scheduled expiration check.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display)]
pub struct TaskHandle(pub String);

/// Authoritative record of one match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Getters)]
pub struct Session<B, A> {
    /// Session ID.
    pub(crate) id: SessionId,
    /// Name of the rules engine the session is played under.
    pub(crate) game: String,
    /// Lifecycle status.
    pub(crate) status: SessionStatus,
    /// Participants ordered by seat.
    pub(crate) participants: [Participant; 2],
    /// The participant who must accept the invitation.
    pub(crate) invitee: PlayerId,
    /// Participant to move.
    pub(crate) current_turn: PlayerId,
    /// Current position.
    pub(crate) board: B,
    /// Applied moves, oldest first.
    pub(crate) history: Vec<MoveRecord<A>>,
    /// Clock budget; `None` for untimed sessions.
    pub(crate) time_control: Option<TimeControl>,
    /// Remaining time per participant as of `last_move_at`.
    pub(crate) time_remaining_ms: BTreeMap<PlayerId, i64>,
    /// Start of the current turn.
    pub(crate) last_move_at: Option<DateTime<Utc>>,
    /// Outstanding expiration check.
    pub(crate) pending_timeout: Option<TaskHandle>,
    /// Open undo or reset proposal.
    pub(crate) request: RequestState,
    /// Set once completed.
    pub(crate) result: Option<GameResult>,
    /// Creation time.
    pub(crate) created_at: DateTime<Utc>,
    /// Last committed write.
    pub(crate) updated_at: DateTime<Utc>,
}

impl<B, A> Session<B, A> {
    /// Builds a pending session with full clocks.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: SessionId,
        game: String,
        participants: [Participant; 2],
        invitee: PlayerId,
        first_turn: PlayerId,
        board: B,
        time_control: Option<TimeControl>,
        now: DateTime<Utc>,
    ) -> Self {
        let time_remaining_ms = match time_control {
            Some(tc) => participants
                .iter()
                .map(|p| (p.id.clone(), tc.total_ms()))
                .collect(),
            None => BTreeMap::new(),
        };
        Self {
            id,
            game,
            status: SessionStatus::Pending,
            participants,
            invitee,
            current_turn: first_turn,
            board,
            history: Vec::new(),
            time_control,
            time_remaining_ms,
            last_move_at: None,
            pending_timeout: None,
            request: RequestState::None,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Number of applied moves.
    pub fn ply(&self) -> usize {
        self.history.len()
    }

    /// Looks up a participant by ID.
    pub fn participant(&self, player: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == player)
    }

    /// Seat held by the given participant.
    pub fn seat_of(&self, player: &str) -> Option<Seat> {
        match self.participants.iter().position(|p| p.id == player) {
            Some(0) => Some(Seat::First),
            Some(_) => Some(Seat::Second),
            None => None,
        }
    }

    /// Participant sitting in `seat`.
    pub fn at_seat(&self, seat: Seat) -> &Participant {
        &self.participants[seat.index()]
    }

    /// The other participant.
    pub fn opponent_of(&self, player: &str) -> Option<&Participant> {
        self.seat_of(player).map(|seat| self.at_seat(seat.other()))
    }

    /// The participant to move.
    pub fn to_move(&self) -> Option<&Participant> {
        self.participant(&self.current_turn)
    }

    /// Whether the non-human participant is to move in an active session.
    pub fn is_agent_turn(&self) -> bool {
        self.status == SessionStatus::Active && self.to_move().is_some_and(Participant::is_agent)
    }

    /// The current turn baseline, once the clock basis has been set.
    pub fn baseline(&self) -> Option<Baseline> {
        self.last_move_at.map(|last_move_at| Baseline {
            turn: self.current_turn.clone(),
            last_move_at,
            ply: self.history.len(),
        })
    }

    /// Whether the turn-relevant fields still equal `baseline`.
    pub fn matches(&self, baseline: &Baseline) -> bool {
        self.baseline().as_ref() == Some(baseline)
    }

    /// Remaining time for `player` as of `now`, derived lazily.
    ///
    /// Returns `None` for untimed sessions and unknown players.
    pub fn clock_remaining_ms(&self, player: &str, now: DateTime<Utc>) -> Option<i64> {
        let stored = *self.time_remaining_ms.get(player)?;
        let running = self.status == SessionStatus::Active && self.current_turn == player;
        match (running, self.last_move_at) {
            (true, Some(since)) => Some(stored - (now - since).num_milliseconds()),
            _ => Some(stored),
        }
    }
}
