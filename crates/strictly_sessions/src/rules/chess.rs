//! Standard chess via the `chess` crate.

use super::{Rules, RulesError, Seat, Terminal, Verdict};
use ::chess::{Board, BoardStatus, ChessMove, Color, MoveGen, Piece, Rank, Square};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, instrument};

/// Chess position, stored as FEN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChessBoard(pub Board);

impl TryFrom<String> for ChessBoard {
    type Error = RulesError;

    fn try_from(fen: String) -> Result<Self, Self::Error> {
        Board::from_str(&fen)
            .map(ChessBoard)
            .map_err(|e| RulesError::new(format!("Invalid FEN '{}': {}", fen, e)))
    }
}

impl From<ChessBoard> for String {
    fn from(board: ChessBoard) -> Self {
        board.0.to_string()
    }
}

/// Piece a pawn promotes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Promotion {
    /// Queen.
    Queen,
    /// Rook.
    Rook,
    /// Bishop.
    Bishop,
    /// Knight.
    Knight,
}

impl From<Promotion> for Piece {
    fn from(p: Promotion) -> Self {
        match p {
            Promotion::Queen => Piece::Queen,
            Promotion::Rook => Piece::Rook,
            Promotion::Bishop => Piece::Bishop,
            Promotion::Knight => Piece::Knight,
        }
    }
}

/// A chess move in coordinate notation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChessAction {
    /// Source square, e.g. `e2`.
    pub from: String,
    /// Destination square, e.g. `e4`.
    pub to: String,
    /// Promotion piece; pawns reaching the last rank default to a queen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion: Option<Promotion>,
}

impl ChessAction {
    /// Creates a non-promoting move.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            promotion: None,
        }
    }

    fn from_move(mv: ChessMove) -> Self {
        let promotion = mv.get_promotion().and_then(|piece| match piece {
            Piece::Queen => Some(Promotion::Queen),
            Piece::Rook => Some(Promotion::Rook),
            Piece::Bishop => Some(Promotion::Bishop),
            Piece::Knight => Some(Promotion::Knight),
            _ => None,
        });
        Self {
            from: mv.get_source().to_string(),
            to: mv.get_dest().to_string(),
            promotion,
        }
    }
}

/// Standard chess. White sits in the first seat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Chess;

impl Chess {
    fn parse_square(s: &str) -> Result<Square, RulesError> {
        Square::from_str(&s.trim().to_lowercase())
            .map_err(|_| RulesError::new(format!("Invalid square '{}'", s)))
    }

    fn to_move(board: &Board, action: &ChessAction) -> Result<ChessMove, RulesError> {
        let from = Self::parse_square(&action.from)?;
        let to = Self::parse_square(&action.to)?;
        let promotion = match action.promotion {
            Some(p) => Some(Piece::from(p)),
            None if board.piece_on(from) == Some(Piece::Pawn)
                && (to.get_rank() == Rank::Eighth || to.get_rank() == Rank::First) =>
            {
                Some(Piece::Queen)
            }
            None => None,
        };
        Ok(ChessMove::new(from, to, promotion))
    }
}

/// Neither side can possibly deliver mate.
pub fn has_insufficient_material(board: &Board) -> bool {
    let mut minors = Vec::new();
    for square in *board.combined() {
        match board.piece_on(square) {
            Some(Piece::King) | None => {}
            Some(Piece::Knight) => minors.push((Piece::Knight, board.color_on(square), square)),
            Some(Piece::Bishop) => minors.push((Piece::Bishop, board.color_on(square), square)),
            Some(_) => return false,
        }
    }

    match minors.as_slice() {
        // King vs king, or a single minor piece
        [] | [_] => true,
        // Opposing bishops on the same square colour
        [(Piece::Bishop, a, sa), (Piece::Bishop, b, sb)] if a != b => {
            let shade = |sq: &Square| (sq.get_rank().to_index() + sq.get_file().to_index()) % 2;
            shade(sa) == shade(sb)
        }
        _ => false,
    }
}

impl Rules for Chess {
    type Board = ChessBoard;
    type Action = ChessAction;

    fn name(&self) -> &'static str {
        "chess"
    }

    fn initial_board(&self) -> ChessBoard {
        ChessBoard(Board::default())
    }

    fn side_to_move(&self, board: &ChessBoard) -> Seat {
        match board.0.side_to_move() {
            Color::White => Seat::First,
            Color::Black => Seat::Second,
        }
    }

    #[instrument(skip(self, board), fields(from = %action.from, to = %action.to))]
    fn validate(
        &self,
        board: &ChessBoard,
        action: &ChessAction,
    ) -> Result<Verdict<ChessBoard>, RulesError> {
        let mv = Self::to_move(&board.0, action)?;
        if !board.0.legal(mv) {
            debug!(mv = %mv, "Illegal chess move");
            return Err(RulesError::new(format!("Illegal move {}", mv)));
        }

        let mover = self.side_to_move(board);
        let next = board.0.make_move_new(mv);
        let terminal = match next.status() {
            BoardStatus::Checkmate => Some(Terminal::Win(mover)),
            BoardStatus::Stalemate => Some(Terminal::Draw),
            BoardStatus::Ongoing if has_insufficient_material(&next) => Some(Terminal::Draw),
            BoardStatus::Ongoing => None,
        };

        Ok(Verdict {
            board: ChessBoard(next),
            terminal,
        })
    }

    fn legal_actions(&self, board: &ChessBoard) -> Vec<ChessAction> {
        MoveGen::new_legal(&board.0)
            .map(ChessAction::from_move)
            .collect()
    }
}
