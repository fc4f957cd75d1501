//! Tic-tac-toe on top of the `strictly_tictactoe` engine.

use super::{Rules, RulesError, Seat, Terminal, Verdict};
use serde::{Deserialize, Serialize};
use strictly_tictactoe::{Game, GameStatus, Player, Position};

/// Place a mark on a square.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_new::new)]
pub struct TicTacToeAction {
    /// Target square.
    pub position: Position,
}

/// Tic-tac-toe. X sits in the first seat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TicTacToe;

fn seat(player: Player) -> Seat {
    match player {
        Player::X => Seat::First,
        Player::O => Seat::Second,
    }
}

impl Rules for TicTacToe {
    type Board = Game;
    type Action = TicTacToeAction;

    fn name(&self) -> &'static str {
        "tictactoe"
    }

    fn initial_board(&self) -> Game {
        Game::new()
    }

    fn side_to_move(&self, board: &Game) -> Seat {
        seat(board.to_move())
    }

    fn validate(&self, board: &Game, action: &TicTacToeAction) -> Result<Verdict<Game>, RulesError> {
        let mut next = board.clone();
        let status = next
            .place(action.position)
            .map_err(|e| RulesError::new(e.to_string()))?;

        let terminal = match status {
            GameStatus::InProgress => None,
            GameStatus::Won(player) => Some(Terminal::Win(seat(player))),
            GameStatus::Draw => Some(Terminal::Draw),
        };

        Ok(Verdict {
            board: next,
            terminal,
        })
    }

    fn legal_actions(&self, board: &Game) -> Vec<TicTacToeAction> {
        if board.status() != GameStatus::InProgress {
            return Vec::new();
        }
        Position::valid_moves(board.board())
            .into_iter()
            .map(TicTacToeAction::new)
            .collect()
    }
}
