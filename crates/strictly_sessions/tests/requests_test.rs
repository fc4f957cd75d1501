//! Tests for the undo/reset consent protocol.

mod common;

use common::{Harness, HarnessBuilder};
use strictly_sessions::{
    NotificationKind, RequestKind, RequestOutcome, Rules, Seat, SessionError, SessionOf,
    Settings, TicTacToe, TicTacToeAction,
};
use strictly_tictactoe::Position;

fn mark(position: Position) -> TicTacToeAction {
    TicTacToeAction::new(position)
}

const OPENING: [(&str, Position); 5] = [
    ("alice", Position::Center),
    ("bob", Position::TopLeft),
    ("alice", Position::TopRight),
    ("bob", Position::BottomLeft),
    ("alice", Position::MiddleLeft),
];

/// Plays the first `n` opening moves one second apart.
fn play(h: &Harness<TicTacToe>, id: &str, n: usize) -> SessionOf<TicTacToe> {
    let mut last = h.coordinator.session(id).expect("load failed");
    for (player, position) in OPENING.iter().take(n) {
        h.advance(1);
        last = h
            .coordinator
            .apply_move(id, player, mark(*position), None)
            .expect("move failed")
            .into_session();
    }
    last
}

#[test]
fn test_only_one_request_at_a_time() {
    let h = Harness::new(TicTacToe);
    let id = h.humans(None).id().clone();
    play(&h, &id, 2);

    let outcome = h
        .coordinator
        .propose(&id, "alice", RequestKind::Undo { move_count: 1 })
        .expect("propose failed");
    assert!(matches!(outcome, RequestOutcome::Pending(_)));

    let err = h
        .coordinator
        .propose(&id, "bob", RequestKind::Reset)
        .expect_err("second request accepted");
    assert_eq!(
        err,
        SessionError::RequestPending {
            kind: RequestKind::Undo { move_count: 1 }
        }
    );

    h.coordinator
        .respond(&id, "alice", false)
        .expect("withdraw failed");
    h.coordinator
        .propose(&id, "bob", RequestKind::Reset)
        .expect("propose failed");
    let err = h
        .coordinator
        .propose(&id, "alice", RequestKind::Undo { move_count: 1 })
        .expect_err("undo accepted during pending reset");
    assert_eq!(
        err,
        SessionError::RequestPending {
            kind: RequestKind::Reset
        }
    );
}

#[test]
fn test_undo_two_of_five_restores_position_and_clocks() {
    let h = Harness::new(TicTacToe);
    let id = h.humans(Some(60)).id().clone();
    let after_three = play(&h, &id, 3);
    play_rest(&h, &id);

    h.advance(1);
    h.coordinator
        .propose(&id, "bob", RequestKind::Undo { move_count: 2 })
        .expect("propose failed");
    h.advance(1);
    let outcome = h
        .coordinator
        .respond(&id, "alice", true)
        .expect("approve failed");
    let RequestOutcome::Approved(rewound) = outcome else {
        panic!("undo was not applied");
    };

    assert_eq!(rewound.ply(), 3);
    assert_eq!(rewound.board(), after_three.board());
    assert_eq!(rewound.current_turn(), "bob");
    assert!(rewound.request().pending().is_none());
    assert_eq!(rewound.time_remaining_ms().get("alice"), Some(&58_000));
    assert_eq!(rewound.time_remaining_ms().get("bob"), Some(&59_000));
    assert_eq!(*rewound.last_move_at(), Some(h.coordinator.now()));
}

fn play_rest(h: &Harness<TicTacToe>, id: &str) {
    for (player, position) in OPENING.iter().skip(3) {
        h.advance(1);
        h.coordinator
            .apply_move(id, player, mark(*position), None)
            .expect("move failed");
    }
}

#[test]
fn test_reset_returns_to_initial_position() {
    let h = Harness::new(TicTacToe);
    let id = h.humans(Some(60)).id().clone();
    play(&h, &id, 3);

    h.coordinator
        .propose(&id, "alice", RequestKind::Reset)
        .expect("propose failed");
    let rewound = h
        .coordinator
        .respond(&id, "bob", true)
        .expect("approve failed")
        .into_session();

    assert_eq!(rewound.ply(), 0);
    assert_eq!(*rewound.board(), TicTacToe.initial_board());
    assert_eq!(rewound.current_turn(), "alice");
    assert_eq!(rewound.time_remaining_ms().get("alice"), Some(&60_000));
    assert_eq!(rewound.time_remaining_ms().get("bob"), Some(&60_000));
    let armed = h.scheduler.last().expect("timer rearmed");
    assert_eq!(rewound.pending_timeout().as_ref(), Some(&armed.handle));
    assert_eq!(armed.check.baseline.ply, 0);
}

#[test]
fn test_requester_cannot_approve_own_request() {
    let h = Harness::new(TicTacToe);
    let id = h.humans(None).id().clone();
    play(&h, &id, 1);

    h.coordinator
        .propose(&id, "alice", RequestKind::Undo { move_count: 1 })
        .expect("propose failed");
    let err = h
        .coordinator
        .respond(&id, "alice", true)
        .expect_err("self approval accepted");
    assert_eq!(err, SessionError::SelfApproval);

    let stored = h.coordinator.session(&id).expect("load failed");
    assert_eq!(stored.ply(), 1);
    assert!(stored.request().pending().is_some());
}

#[test]
fn test_counterpart_declines() {
    let mut h = Harness::new(TicTacToe);
    let id = h.humans(None).id().clone();
    play(&h, &id, 2);
    h.coordinator
        .propose(&id, "alice", RequestKind::Undo { move_count: 2 })
        .expect("propose failed");
    assert!(h.kinds_for("bob").contains(&NotificationKind::RequestProposed));

    let outcome = h
        .coordinator
        .respond(&id, "bob", false)
        .expect("decline failed");
    let RequestOutcome::Declined(after) = outcome else {
        panic!("expected a decline");
    };
    assert_eq!(after.ply(), 2);
    assert!(after.request().pending().is_none());
    assert!(h.kinds_for("alice").contains(&NotificationKind::RequestDeclined));
}

#[test]
fn test_requester_withdraws() {
    let mut h = Harness::new(TicTacToe);
    let id = h.humans(None).id().clone();
    play(&h, &id, 1);
    h.coordinator
        .propose(&id, "alice", RequestKind::Reset)
        .expect("propose failed");
    h.drain_notifications();

    let outcome = h
        .coordinator
        .respond(&id, "alice", false)
        .expect("withdraw failed");
    assert!(matches!(outcome, RequestOutcome::Cancelled(_)));
    assert_eq!(h.kinds_for("bob"), vec![NotificationKind::RequestCancelled]);

    let err = h
        .coordinator
        .respond(&id, "bob", true)
        .expect_err("withdrawn request approved");
    assert_eq!(err, SessionError::NoPendingRequest);
}

#[test]
fn test_undo_bounds() {
    let h = Harness::new(TicTacToe);
    let id = h.humans(None).id().clone();

    let err = h
        .coordinator
        .propose(&id, "alice", RequestKind::Undo { move_count: 1 })
        .expect_err("undo with no history");
    assert_eq!(err, SessionError::EmptyHistory);

    play(&h, &id, 2);
    for move_count in [0, 3] {
        let err = h
            .coordinator
            .propose(&id, "alice", RequestKind::Undo { move_count })
            .expect_err("out-of-range undo accepted");
        assert_eq!(
            err,
            SessionError::InvalidUndo {
                requested: move_count,
                available: 2
            }
        );
    }

    let err = h
        .coordinator
        .propose(&id, "mallory", RequestKind::Reset)
        .expect_err("outsider proposed");
    assert!(matches!(err, SessionError::NotParticipant { .. }));
}

#[tokio::test]
async fn test_agent_approves_undo() {
    let h = Harness::new(TicTacToe);
    let id = h.versus_agent(Seat::First, None).id().clone();

    h.coordinator
        .apply_move(&id, "alice", mark(Position::Center), None)
        .expect("move failed");
    h.coordinator.drain_dispatches().await;

    let outcome = h
        .coordinator
        .propose(&id, "alice", RequestKind::Undo { move_count: 2 })
        .expect("propose failed");
    let RequestOutcome::Approved(rewound) = outcome else {
        panic!("agent did not approve");
    };
    assert_eq!(rewound.ply(), 0);
    assert_eq!(rewound.current_turn(), "alice");
}

#[tokio::test]
async fn test_agent_declines_when_configured() {
    let h = HarnessBuilder::new(TicTacToe)
        .settings(Settings::default().with_agent_accepts_requests(false))
        .build();
    let id = h.versus_agent(Seat::First, None).id().clone();

    h.coordinator
        .apply_move(&id, "alice", mark(Position::Center), None)
        .expect("move failed");
    h.coordinator.drain_dispatches().await;

    let outcome = h
        .coordinator
        .propose(&id, "alice", RequestKind::Reset)
        .expect("propose failed");
    let RequestOutcome::Declined(after) = outcome else {
        panic!("agent did not decline");
    };
    assert_eq!(after.ply(), 2);
    assert!(after.request().pending().is_none());
}

#[tokio::test]
async fn test_undo_into_agent_turn_redispatches() {
    let h = Harness::new(TicTacToe);
    let id = h.versus_agent(Seat::First, None).id().clone();

    h.coordinator
        .apply_move(&id, "alice", mark(Position::Center), None)
        .expect("move failed");
    h.coordinator.drain_dispatches().await;

    let rewound = h
        .coordinator
        .propose(&id, "alice", RequestKind::Undo { move_count: 1 })
        .expect("propose failed")
        .into_session();
    assert_eq!(rewound.ply(), 1);
    assert_eq!(rewound.current_turn(), "bot");

    h.coordinator.drain_dispatches().await;
    let replayed = h.coordinator.session(&id).expect("load failed");
    assert_eq!(replayed.ply(), 2);
    assert_eq!(replayed.current_turn(), "alice");
}
