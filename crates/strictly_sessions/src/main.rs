//! Strictly Sessions - Unified CLI
//!
//! Session server, terminal play against the computer, and store inspection.

#![warn(missing_docs)]

mod cli;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use cli::{Cli, Command, GameKind};
use std::sync::Arc;
use strictly_sessions::{
    Chess, ChessAction, ChessBoard, Clock, CoordinatorBuilder, NewSession, Participant,
    Promotion, RemoteComputer, RequestKind, Rules, Seat, SessionStatus, SessionStore, Settings,
    SqliteStore, SystemClock, TicTacToe, TicTacToeAction, TimeControl, TokioScheduler,
};
use strictly_tictactoe::{Game, Position};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, instrument, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(matches!(cli.command, Command::Serve { .. }));

    match cli.command {
        Command::Serve {
            config,
            host,
            port,
            db_path,
            computer_url,
            game,
        } => {
            let mut settings = match config {
                Some(path) => Settings::from_file(&path)?,
                None => Settings::default(),
            };
            if host.is_some() || port.is_some() {
                let host = host.unwrap_or_else(|| settings.host().clone());
                let port = port.unwrap_or(*settings.port());
                settings = settings.with_address(host, port);
            }
            if db_path.is_some() {
                settings = settings.with_database_path(db_path);
            }
            if computer_url.is_some() {
                settings = settings.with_computer_url(computer_url);
            }
            match game {
                GameKind::Tictactoe => run_server(TicTacToe, settings).await,
                GameKind::Chess => run_server(Chess, settings).await,
            }
        }
        Command::Play {
            game,
            second,
            seconds,
        } => {
            let seat = if second { Seat::Second } else { Seat::First };
            let time_control = seconds.map(TimeControl::new);
            match game {
                GameKind::Tictactoe => {
                    run_play(TicTacToe, seat, time_control, parse_square, render_tictactoe).await
                }
                GameKind::Chess => {
                    run_play(Chess, seat, time_control, parse_chess_move, render_chess).await
                }
            }
        }
        Command::Inspect { db_path, id } => run_inspect(&db_path, id.as_deref()),
    }
}

/// Logs go to stderr so interactive play keeps stdout for the board.
fn init_tracing(server: bool) {
    let default = if server {
        "info,strictly_sessions=debug"
    } else {
        "warn"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Run the HTTP session server
#[instrument(skip_all, fields(game = rules.name()))]
async fn run_server<R: Rules>(rules: R, settings: Settings) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (scheduler, fired) = TokioScheduler::new(Arc::clone(&clock));

    let mut builder = CoordinatorBuilder::new(rules.clone(), Arc::new(scheduler))
        .clock(clock)
        .settings(settings.clone());
    if let Some(path) = settings.database_path() {
        let store = SqliteStore::<R::Board, R::Action>::open(path.clone())
            .with_context(|| format!("Failed to open session store at {}", path))?;
        builder = builder.store(Arc::new(store));
    }
    if let Some(url) = settings.computer_url() {
        info!(url = %url, "Using remote move computer");
        builder = builder.computer(Arc::new(RemoteComputer::new(
            url.clone(),
            rules.name().to_string(),
        )));
    }
    let coordinator = builder.build();
    let listener_task = coordinator.spawn_timeout_listener(fired);

    // Timers do not survive a restart. Resuming settles expired clocks, arms
    // new expiry checks and restarts any agent turn left hanging.
    for session in coordinator.list_sessions()? {
        if *session.status() == SessionStatus::Active {
            if let Err(e) = coordinator.resume(session.id()) {
                warn!(session_id = %session.id(), error = %e, "Could not resume session");
            }
        }
    }

    let app = strictly_sessions::router(coordinator.clone());
    let listener = tokio::net::TcpListener::bind((settings.host().as_str(), *settings.port()))
        .await
        .with_context(|| format!("Failed to bind {}:{}", settings.host(), settings.port()))?;
    info!(address = %listener.local_addr()?, "Session server ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;

    info!("Shutting down");
    coordinator.drain_dispatches().await;
    listener_task.abort();
    Ok(())
}

/// Play against the computer on stdin/stdout.
async fn run_play<R: Rules>(
    rules: R,
    seat: Seat,
    time_control: Option<TimeControl>,
    parse: fn(&str) -> Option<R::Action>,
    render: fn(&R::Board) -> String,
) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (scheduler, fired) = TokioScheduler::new(Arc::clone(&clock));
    let coordinator = CoordinatorBuilder::new(rules, Arc::new(scheduler))
        .clock(clock)
        .build();
    coordinator.spawn_timeout_listener(fired);

    let session = coordinator.create_session(NewSession::new(
        Participant::human("you"),
        Participant::agent("computer"),
        seat,
        time_control,
    ))?;
    let id = session.id().clone();
    debug!(session_id = %id, "Local game started");

    println!("Enter a move, or: undo, reset, resign, quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        coordinator.drain_dispatches().await;
        let session = coordinator.session(&id)?;
        println!("\n{}", render(session.board()));

        if session.status().is_terminal() {
            match session.result() {
                Some(result) => match &result.winner {
                    Some(winner) => println!("{} wins ({})", winner, result.reason),
                    None => println!("Draw"),
                },
                None => println!("Game over"),
            }
            return Ok(());
        }

        if let Some(ms) = session.clock_remaining_ms("you", coordinator.now()) {
            println!("Your clock: {:.1}s", ms.max(0) as f64 / 1000.0);
        }
        println!("Your move:");

        let Some(line) = lines.next_line().await? else {
            return Ok(());
        };
        let input = line.trim();

        let outcome = match input {
            "quit" => return Ok(()),
            "resign" => coordinator.resign(&id, "you").map(|_| ()),
            "reset" => coordinator.propose(&id, "you", RequestKind::Reset).map(|_| ()),
            "undo" => {
                let move_count = session.ply().min(2);
                coordinator
                    .propose(&id, "you", RequestKind::Undo { move_count })
                    .map(|_| ())
            }
            other => match parse(other) {
                Some(action) => coordinator
                    .apply_move(&id, "you", action, None)
                    .map(|_| ()),
                None => {
                    println!("Could not read '{}'", other);
                    continue;
                }
            },
        };
        if let Err(e) = outcome {
            println!("{}", e);
        }
    }
}

fn parse_square(input: &str) -> Option<TicTacToeAction> {
    Position::from_label_or_number(input).map(TicTacToeAction::new)
}

fn render_tictactoe(game: &Game) -> String {
    game.board().display()
}

fn parse_chess_move(input: &str) -> Option<ChessAction> {
    let input = input.trim();
    if !(4..=5).contains(&input.len()) || !input.is_ascii() {
        return None;
    }
    let mut action = ChessAction::new(&input[0..2], &input[2..4]);
    if input.len() == 5 {
        action.promotion = Some(match &input[4..] {
            "q" => Promotion::Queen,
            "r" => Promotion::Rook,
            "b" => Promotion::Bishop,
            "n" => Promotion::Knight,
            _ => return None,
        });
    }
    Some(action)
}

fn render_chess(board: &ChessBoard) -> String {
    use chess::{ALL_RANKS, File, Square};

    let mut out = String::new();
    for rank in ALL_RANKS.iter().rev() {
        out.push_str(&format!("{} ", rank.to_index() + 1));
        for file in 0..8 {
            let square = Square::make_square(*rank, File::from_index(file));
            let symbol = match (board.0.piece_on(square), board.0.color_on(square)) {
                (Some(piece), Some(color)) => piece.to_string(color),
                _ => ".".to_string(),
            };
            out.push_str(&symbol);
            out.push(' ');
        }
        out.push('\n');
    }
    out.push_str("  a b c d e f g h");
    out
}

/// Print sessions stored in a database.
fn run_inspect(db_path: &str, id: Option<&str>) -> Result<()> {
    let store: SqliteStore<serde_json::Value, serde_json::Value> = SqliteStore::open(db_path)?;

    match id {
        Some(id) => {
            let versioned = store
                .load(id)?
                .ok_or_else(|| anyhow!("No session '{}' in {}", id, db_path))?;
            println!("version {}", versioned.version);
            println!("{}", serde_json::to_string_pretty(&versioned.session)?);
        }
        None => {
            for session in store.list()? {
                println!(
                    "{}  {:<10} {:<10} ply {:<4} turn {}",
                    session.id(),
                    session.game(),
                    session.status(),
                    session.ply(),
                    session.current_turn()
                );
            }
        }
    }
    Ok(())
}
