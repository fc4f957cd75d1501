//! Command-line interface for strictly_sessions.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Strictly Sessions - authoritative game session coordinator
#[derive(Parser, Debug)]
#[command(name = "strictly_sessions")]
#[command(about = "Turn, clock and request coordination for two-party games", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Command,
}

/// Supported rules engines.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum GameKind {
    /// Tic-tac-toe
    Tictactoe,
    /// Standard chess
    Chess,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP session server
    Serve {
        /// Settings file (TOML). Flags below override it.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,

        /// SQLite database file. Sessions stay in memory if omitted.
        #[arg(long)]
        db_path: Option<String>,

        /// Remote move-computation service
        #[arg(long)]
        computer_url: Option<String>,

        /// Game to host
        #[arg(long, value_enum, default_value = "tictactoe")]
        game: GameKind,
    },

    /// Play against the computer in the terminal
    Play {
        /// Game to play
        #[arg(long, value_enum, default_value = "tictactoe")]
        game: GameKind,

        /// Let the computer move first
        #[arg(long)]
        second: bool,

        /// Per-player clock in seconds. Untimed if omitted.
        #[arg(long)]
        seconds: Option<u32>,
    },

    /// List sessions stored in a database
    Inspect {
        /// SQLite database file
        #[arg(long, default_value = "strictly_sessions.db")]
        db_path: String,

        /// Show a single session in full
        #[arg(long)]
        id: Option<String>,
    },
}
