//! Move computation for the non-human participant.

use crate::rules::Rules;
use async_trait::async_trait;
use derive_getters::Getters;
use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, instrument};

/// Limits handed to the computer with each position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Getters, derive_new::new)]
pub struct Constraints {
    /// Wall-clock budget in milliseconds.
    budget_ms: u64,
    /// Moves played so far.
    ply: usize,
    /// The agent's remaining clock, for timed sessions.
    time_remaining_ms: Option<i64>,
}

impl Constraints {
    /// Budget as a duration.
    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.budget_ms)
    }
}

/// Move computation failed.
#[derive(Debug, Clone, Display, Error)]
#[display("Compute error: {} at {}:{}", message, file, line)]
pub struct ComputeError {
    /// Error message.
    pub message: String,
    /// Line number where error occurred.
    pub line: u32,
    /// Source file where error occurred.
    pub file: &'static str,
}

impl ComputeError {
    /// Creates a new compute error.
    #[track_caller]
    #[instrument(skip(message))]
    pub fn new(message: impl Into<String>) -> Self {
        let loc = std::panic::Location::caller();
        let message = message.into();
        error!(error_message = %message, "Compute error created");
        Self {
            message,
            line: loc.line(),
            file: loc.file(),
        }
    }
}

/// Produces an action for the side to move.
#[async_trait]
pub trait MoveComputer<R: Rules>: Send + Sync {
    /// Computes an action for `board`.
    ///
    /// # Errors
    ///
    /// Returns [`ComputeError`] if no action could be produced.
    async fn compute(
        &self,
        board: &R::Board,
        constraints: &Constraints,
    ) -> Result<R::Action, ComputeError>;
}

/// Plays the first legal action the engine lists.
#[derive(Debug, Clone)]
pub struct FirstLegalMove<R> {
    rules: R,
    think: Option<Duration>,
}

impl<R: Rules> FirstLegalMove<R> {
    /// Answers immediately.
    pub fn new(rules: R) -> Self {
        Self { rules, think: None }
    }

    /// Waits `think` before answering.
    pub fn with_think_time(mut self, think: Duration) -> Self {
        self.think = Some(think);
        self
    }
}

#[async_trait]
impl<R: Rules> MoveComputer<R> for FirstLegalMove<R> {
    #[instrument(skip(self, board), fields(game = self.rules.name(), ply = constraints.ply()))]
    async fn compute(
        &self,
        board: &R::Board,
        constraints: &Constraints,
    ) -> Result<R::Action, ComputeError> {
        if let Some(think) = self.think {
            tokio::time::sleep(think).await;
        }
        let action = self
            .rules
            .legal_actions(board)
            .into_iter()
            .next()
            .ok_or_else(|| ComputeError::new("No legal actions"))?;
        debug!(?action, "Picked first legal action");
        Ok(action)
    }
}

#[derive(Debug, Serialize)]
struct ComputeRequest<'a, B> {
    game: &'a str,
    board: &'a B,
    constraints: &'a Constraints,
}

#[derive(Debug, Deserialize)]
struct ComputeResponse<A> {
    action: A,
}

/// Asks an HTTP service for the move.
///
/// Posts `{game, board, constraints}` as JSON and expects `{action}` back.
#[derive(Debug, Clone)]
pub struct RemoteComputer {
    client: reqwest::Client,
    url: String,
    game: String,
}

impl RemoteComputer {
    /// Creates a client for the service at `url`, playing `game`.
    #[instrument]
    pub fn new(url: String, game: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            game,
        }
    }
}

#[async_trait]
impl<R: Rules> MoveComputer<R> for RemoteComputer {
    #[instrument(skip(self, board), fields(url = %self.url, game = %self.game, ply = constraints.ply()))]
    async fn compute(
        &self,
        board: &R::Board,
        constraints: &Constraints,
    ) -> Result<R::Action, ComputeError> {
        let body = ComputeRequest {
            game: &self.game,
            board,
            constraints,
        };

        let response = self
            .client
            .post(&self.url)
            .timeout(constraints.budget())
            .json(&body)
            .send()
            .await
            .map_err(|e| ComputeError::new(format!("Compute request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ComputeError::new(format!(
                "Compute service returned {}: {}",
                status, text
            )));
        }

        let parsed: ComputeResponse<R::Action> = response
            .json()
            .await
            .map_err(|e| ComputeError::new(format!("Failed to parse compute response: {}", e)))?;

        debug!(action = ?parsed.action, "Remote action received");
        Ok(parsed.action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{Rules, TicTacToe, TicTacToeAction};
    use strictly_tictactoe::Position;

    #[tokio::test]
    async fn test_first_legal_move_takes_first_empty_square() {
        let rules = TicTacToe;
        let board = rules
            .replay([TicTacToeAction::new(Position::TopLeft)].iter())
            .expect("Legal move");
        let computer = FirstLegalMove::new(rules);
        let action = computer
            .compute(&board, &Constraints::new(1000, 1, None))
            .await
            .expect("A move");
        assert_eq!(action, TicTacToeAction::new(Position::TopCenter));
    }
}
