//! Legality engine seam.
//!
//! The coordinator never inspects boards or actions itself. Every engine
//! validates a candidate action against a board, produces the next board and
//! reports whether the game ended.

mod chess;
mod tictactoe;

pub use self::chess::{Chess, ChessAction, ChessBoard, Promotion};
pub use self::tictactoe::{TicTacToe, TicTacToeAction};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Seat at the table. The first seat moves first from the initial position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Seat {
    /// The side that opens the game.
    First,
    /// The side that replies.
    Second,
}

impl Seat {
    /// Returns the other seat.
    pub fn other(self) -> Self {
        match self {
            Seat::First => Seat::Second,
            Seat::Second => Seat::First,
        }
    }

    /// Index into a two-element participant array.
    pub fn index(self) -> usize {
        match self {
            Seat::First => 0,
            Seat::Second => 1,
        }
    }
}

/// Terminal condition reported by an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    /// The seat won outright.
    Win(Seat),
    /// Nobody can win.
    Draw,
}

/// Outcome of a successful validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict<B> {
    /// Board after the action.
    pub board: B,
    /// Set when the action ended the game.
    pub terminal: Option<Terminal>,
}

/// The engine rejected an action or could not replay a history.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
#[display("Rules error: {}", reason)]
pub struct RulesError {
    /// Why the action was rejected.
    pub reason: String,
}

impl RulesError {
    /// Creates a new rules error.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl std::error::Error for RulesError {}

/// A board/move-legality engine.
pub trait Rules: Debug + Clone + Send + Sync + 'static {
    /// Engine-specific position.
    type Board: Debug + Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;
    /// Engine-specific candidate action.
    type Action: Debug + Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Stable game name, stored with each session.
    fn name(&self) -> &'static str;

    /// Starting position.
    fn initial_board(&self) -> Self::Board;

    /// Seat whose action the engine expects next.
    fn side_to_move(&self, board: &Self::Board) -> Seat;

    /// Validates `action` on `board` and returns the resulting position.
    ///
    /// # Errors
    ///
    /// Returns [`RulesError`] if the action is illegal.
    fn validate(&self, board: &Self::Board, action: &Self::Action)
    -> Result<Verdict<Self::Board>, RulesError>;

    /// All legal actions on `board`, in a deterministic order.
    fn legal_actions(&self, board: &Self::Board) -> Vec<Self::Action>;

    /// Rebuilds a position by applying `actions` to the starting position.
    ///
    /// # Errors
    ///
    /// Returns [`RulesError`] if any action in the sequence is illegal.
    fn replay<'a, I>(&self, actions: I) -> Result<Self::Board, RulesError>
    where
        I: IntoIterator<Item = &'a Self::Action>,
        Self::Action: 'a,
    {
        actions
            .into_iter()
            .try_fold(self.initial_board(), |board, action| {
                self.validate(&board, action).map(|verdict| verdict.board)
            })
    }
}
