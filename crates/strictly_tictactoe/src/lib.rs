//! Pure tic-tac-toe rules.
//!
//! The crate knows nothing about players, clocks or sessions: it validates
//! placements, tracks whose mark goes next and reports wins and draws.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod position;
mod rules;
mod types;

pub use position::Position;
pub use rules::{Game, GameStatus, PlaceError, check_winner, is_full};
pub use types::{Board, Player, Square};
