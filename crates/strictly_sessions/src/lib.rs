//! Strictly Sessions - authoritative coordination for two-party game sessions
//!
//! Owns the session record, validates and applies moves through a pluggable
//! rules engine, enforces per-player clocks, drives a computer opponent and
//! runs a consent protocol for undo and reset.
//!
//! # Architecture
//!
//! - **Coordinator**: composition root; every write is a versioned
//!   read-check-write against a [`SessionStore`]
//! - **Rules**: game engines behind the [`Rules`] trait (tic-tac-toe, chess)
//! - **Scheduler**: deferred expiry checks, guarded by a turn [`Baseline`]
//! - **Computer**: opponent moves computed off the session and submitted back
//! - **HTTP**: JSON surface over the coordinator
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use strictly_sessions::{
//!     CoordinatorBuilder, NewSession, Participant, Seat, TicTacToe, TicTacToeAction,
//!     TokioScheduler, SystemClock,
//! };
//! use strictly_tictactoe::Position;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let (scheduler, fired) = TokioScheduler::new(Arc::new(SystemClock));
//! let coordinator = CoordinatorBuilder::new(TicTacToe, Arc::new(scheduler)).build();
//! coordinator.spawn_timeout_listener(fired);
//!
//! let session = coordinator.create_session(NewSession::new(
//!     Participant::human("alice"),
//!     Participant::agent("bot"),
//!     Seat::First,
//!     None,
//! ))?;
//! coordinator.apply_move(
//!     session.id(),
//!     "alice",
//!     TicTacToeAction::new(Position::Center),
//!     None,
//! )?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Private module declarations
mod clock;
mod computer;
mod config;
mod coordinator;
mod dispatcher;
mod error;
mod http;
mod model;
mod notify;
mod pipeline;
mod requests;
mod rules;
mod scheduler;
mod store;
mod timeout;

// Crate-level exports - Session core
pub use coordinator::{Coordinator, CoordinatorBuilder, NewSession, SessionOf};
pub use dispatcher::should_dispatch;
pub use error::SessionError;
pub use pipeline::MoveOutcome;
pub use requests::RequestOutcome;
pub use timeout::FireOutcome;

// Crate-level exports - Session document
pub use model::{
    Baseline, GameResult, MoveRecord, Participant, PendingRequest, PlayerId, PlayerType,
    RequestKind, RequestState, ResultReason, Session, SessionId, SessionStatus, TaskHandle,
    TimeControl,
};

// Crate-level exports - Rules engines
pub use rules::{
    Chess, ChessAction, ChessBoard, Promotion, Rules, RulesError, Seat, Terminal, TicTacToe,
    TicTacToeAction, Verdict,
};

// Crate-level exports - Collaborators
pub use clock::{Clock, ManualClock, SystemClock};
pub use computer::{ComputeError, Constraints, FirstLegalMove, MoveComputer, RemoteComputer};
pub use notify::{ChannelSink, Notification, NotificationKind, NotificationSink, NotifyError, TracingSink};
pub use scheduler::{
    RecordingScheduler, ScheduledCheck, SchedulerError, TaskScheduler, TimeoutCheck,
    TokioScheduler,
};
pub use store::{MemoryStore, SessionStore, SqliteStore, StoreError, Versioned};

// Crate-level exports - Configuration
pub use config::{ConfigError, Settings};

// Crate-level exports - HTTP surface
pub use http::{
    ApiError, MoveBody, MoveResponse, PlayerBody, ProposeBody, RequestResponse, RespondBody,
    SessionView, router,
};
