//! nestkit CLI
//!
//! Maintenance tools for nestkit state files.
//!
//! # Commands
//!
//! - `cursor show|reset` - Inspect or clear the propagation cursor
//! - `prefs show|set` - Inspect or edit the notification preferences blob
//! - `hash` - Print the content hash of a file as stored by the asset cache

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// nestkit command-line maintenance tools.
#[derive(Parser)]
#[command(name = "nestkit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the state file the command operates on
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(global = true, short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or clear the propagation cursor
    Cursor {
        #[command(subcommand)]
        action: CursorAction,
    },

    /// Inspect or edit notification preferences
    Prefs {
        #[command(subcommand)]
        action: PrefsAction,
    },

    /// Print the SHA-512 content hash of a file
    Hash {
        /// File to hash
        file: PathBuf,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum CursorAction {
    /// Show the persisted cursor
    Show,
    /// Delete the cursor; the next cycle starts from the tip of history
    Reset,
}

#[derive(Subcommand)]
enum PrefsAction {
    /// Show the stored preferences
    Show,
    /// Change individual toggles; unspecified toggles keep their value
    Set {
        /// Notify on profile changes
        #[arg(long)]
        profile: Option<bool>,
        /// Notify on following changes
        #[arg(long)]
        following: Option<bool>,
        /// Notify on follower changes
        #[arg(long)]
        followers: Option<bool>,
        /// Notify on blocking changes
        #[arg(long)]
        blocking: Option<bool>,
        /// Notify on muting changes
        #[arg(long)]
        muting: Option<bool>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Cursor { action } => {
            let path = cli.path.ok_or("Cursor path required for cursor")?;
            match action {
                CursorAction::Show => commands::cursor::show(&path, &cli.format)?,
                CursorAction::Reset => commands::cursor::reset(&path)?,
            }
        }
        Commands::Prefs { action } => {
            let path = cli.path.ok_or("Preferences path required for prefs")?;
            match action {
                PrefsAction::Show => commands::prefs::show(&path, &cli.format)?,
                PrefsAction::Set {
                    profile,
                    following,
                    followers,
                    blocking,
                    muting,
                } => {
                    let changes = commands::prefs::PreferenceChanges {
                        profile,
                        following,
                        followers,
                        blocking,
                        muting,
                    };
                    commands::prefs::set(&path, &changes, &cli.format)?;
                }
            }
        }
        Commands::Hash { file } => {
            commands::hash::run(&file, &cli.format)?;
        }
        Commands::Version => {
            println!("nestkit CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("nestkit core v{}", nestkit_core::VERSION);
        }
    }

    Ok(())
}
