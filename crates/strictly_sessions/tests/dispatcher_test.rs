//! Tests for computed opponent moves.

mod common;

use async_trait::async_trait;
use common::{Harness, HarnessBuilder};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use strictly_sessions::{
    ComputeError, Constraints, FirstLegalMove, MoveComputer, NotificationKind, Rules, Seat,
    SessionError, SessionStatus, Settings, TicTacToe, TicTacToeAction,
};
use strictly_tictactoe::{Game, Position};

fn mark(position: Position) -> TicTacToeAction {
    TicTacToeAction::new(position)
}

/// Never answers within any reasonable budget.
struct Stalling;

#[async_trait]
impl MoveComputer<TicTacToe> for Stalling {
    async fn compute(
        &self,
        _board: &Game,
        _constraints: &Constraints,
    ) -> Result<TicTacToeAction, ComputeError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Err(ComputeError::new("gave up"))
    }
}

/// Records the constraints it was handed, then plays the first legal move.
#[derive(Default)]
struct Counting {
    calls: AtomicUsize,
    last_ply: AtomicUsize,
}

#[async_trait]
impl MoveComputer<TicTacToe> for Counting {
    async fn compute(
        &self,
        board: &Game,
        constraints: &Constraints,
    ) -> Result<TicTacToeAction, ComputeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_ply.store(*constraints.ply(), Ordering::SeqCst);
        TicTacToe
            .legal_actions(board)
            .into_iter()
            .next()
            .ok_or_else(|| ComputeError::new("no moves"))
    }
}

#[tokio::test]
async fn test_agent_invitee_accepts_immediately() {
    let mut h = Harness::new(TicTacToe);
    let session = h.versus_agent(Seat::First, Some(60));

    assert_eq!(*session.status(), SessionStatus::Active);
    assert_eq!(session.current_turn(), "alice");
    assert!(session.pending_timeout().is_some());
    assert!(
        h.kinds_for("alice")
            .contains(&NotificationKind::InvitationAccepted)
    );
}

#[tokio::test]
async fn test_agent_replies_after_human_move() {
    let h = Harness::new(TicTacToe);
    let session = h.versus_agent(Seat::First, None);
    let id = session.id().clone();

    h.coordinator
        .apply_move(&id, "alice", mark(Position::Center), None)
        .expect("move failed");
    h.coordinator.drain_dispatches().await;

    let after = h.coordinator.session(&id).expect("load failed");
    assert_eq!(after.ply(), 2);
    assert_eq!(after.current_turn(), "alice");
    assert_eq!(after.history()[1].mover, "bot");
    assert_eq!(after.history()[1].action, mark(Position::TopLeft));
}

#[tokio::test]
async fn test_agent_in_first_seat_opens() {
    let h = Harness::new(TicTacToe);
    let session = h.versus_agent(Seat::Second, None);
    assert_eq!(session.current_turn(), "bot");

    h.coordinator.drain_dispatches().await;
    let after = h.coordinator.session(session.id()).expect("load failed");
    assert_eq!(after.ply(), 1);
    assert_eq!(after.current_turn(), "alice");
}

#[tokio::test]
async fn test_stalled_computation_leaves_session_unchanged() {
    let h = HarnessBuilder::new(TicTacToe)
        .computer(Arc::new(Stalling))
        .settings(Settings::default().with_compute_budget(Duration::from_millis(50)))
        .build();
    let session = h.versus_agent(Seat::First, Some(60));
    let id = session.id().clone();

    h.coordinator
        .apply_move(&id, "alice", mark(Position::Center), None)
        .expect("move failed");
    let waiting = h.coordinator.session(&id).expect("load failed");
    h.coordinator.drain_dispatches().await;

    let after = h.coordinator.session(&id).expect("load failed");
    assert_eq!(after, waiting);
    assert_eq!(after.current_turn(), "bot");
    assert!(!h.coordinator.dispatch_in_flight(&id));

    let err = h
        .coordinator
        .apply_move(&id, "alice", mark(Position::TopLeft), None)
        .expect_err("human moved for the agent");
    assert_eq!(
        err,
        SessionError::NotYourTurn {
            expected: "bot".to_string()
        }
    );
}

#[tokio::test]
async fn test_poke_on_human_turn_does_not_dispatch() {
    let counting = Arc::new(Counting::default());
    let h = HarnessBuilder::new(TicTacToe)
        .computer(counting.clone())
        .build();
    let session = h.versus_agent(Seat::First, None);
    let id = session.id().clone();

    h.coordinator
        .apply_move(&id, "alice", mark(Position::Center), None)
        .expect("move failed");
    h.coordinator.drain_dispatches().await;
    assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    assert_eq!(counting.last_ply.load(Ordering::SeqCst), 1);

    // Human to move: poke has nothing to do.
    h.coordinator.poke(&id).expect("poke failed");
    h.coordinator.drain_dispatches().await;
    assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_computation_for_finished_session_is_dropped() {
    let slow = FirstLegalMove::new(TicTacToe).with_think_time(Duration::from_millis(100));
    let h = HarnessBuilder::new(TicTacToe)
        .computer(Arc::new(slow))
        .build();
    let session = h.versus_agent(Seat::First, None);
    let id = session.id().clone();

    h.coordinator
        .apply_move(&id, "alice", mark(Position::Center), None)
        .expect("move failed");
    assert!(h.coordinator.dispatch_in_flight(&id));
    h.coordinator.resign(&id, "alice").expect("resign failed");
    h.coordinator.drain_dispatches().await;

    let after = h.coordinator.session(&id).expect("load failed");
    assert_eq!(*after.status(), SessionStatus::Completed);
    assert_eq!(after.ply(), 1);
    assert_eq!(
        after.result().as_ref().and_then(|r| r.winner.as_deref()),
        Some("bot")
    );
}

#[tokio::test]
async fn test_agent_game_runs_to_completion() {
    let h = Harness::new(TicTacToe);
    let session = h.versus_agent(Seat::First, Some(120));
    let id = session.id().clone();

    for _ in 0..9 {
        h.coordinator.drain_dispatches().await;
        let current = h.coordinator.session(&id).expect("load failed");
        if current.status().is_terminal() {
            break;
        }
        let action = TicTacToe
            .legal_actions(current.board())
            .pop()
            .expect("active game has moves");
        h.coordinator
            .apply_move(&id, "alice", action, current.baseline().as_ref())
            .expect("move failed");
    }
    h.coordinator.drain_dispatches().await;

    let finished = h.coordinator.session(&id).expect("load failed");
    assert_eq!(*finished.status(), SessionStatus::Completed);
    assert!(finished.result().is_some());
    assert!(finished.pending_timeout().is_none());
}
