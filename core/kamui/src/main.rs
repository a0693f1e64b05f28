//! kam: named, resumable Claude Code sessions.
//!
//! ## Subcommands
//!
//! - `open <name>` (or just `kam <name>`): Create or resume a session and launch claude
//! - `list`, `info`: Inspect sessions recorded for the project
//! - `complete`, `pause`, `archive`, `delete`: Manage session state
//! - `monitor`: Transcript watcher (spawned internally by `open`)

mod context;
mod info;
mod list;
mod logging;
mod manage;
mod monitor;
mod open;

use clap::{Parser, Subcommand};
use kamui_core::KamuiError;
use std::path::PathBuf;

use context::Context;
use manage::Action;

#[derive(Parser)]
#[command(name = "kam")]
#[command(about = "Named, resumable Claude Code sessions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: ~/.kamui/config.json)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Project directory (default: current directory)
    #[arg(long, global = true, value_name = "PATH")]
    project: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or resume a session and launch claude
    Open {
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// List sessions for the project
    List {
        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one session
    Info {
        #[arg(value_name = "NAME")]
        name: String,

        /// Print the record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Mark a session completed
    Complete {
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// Pause a session
    Pause {
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// Archive a session
    Archive {
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// Delete a session record (the Claude transcript is kept)
    Delete {
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// Transcript watcher (spawned by `open`)
    #[command(hide = true)]
    Monitor {
        /// Local session to bind
        #[arg(long)]
        session_id: String,

        /// Directory claude was started in
        #[arg(long)]
        working_dir: String,

        /// Give up after this many seconds
        #[arg(long, default_value_t = 60)]
        timeout_secs: u64,
    },

    /// `kam <name>` is shorthand for `kam open <name>`
    #[command(external_subcommand)]
    Shorthand(Vec<String>),
}

fn main() {
    let cli = Cli::parse();
    let logging_guard = logging::init(cli.verbose);

    if let Err(e) = run(cli) {
        report(&e);
        // process::exit skips destructors; flush the file log first.
        drop(logging_guard);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), KamuiError> {
    let ctx = Context::load(cli.config, cli.project)?;

    match cli.command {
        Commands::Open { name } => open::run(&ctx, &name),
        Commands::Shorthand(args) => match args.as_slice() {
            [name] => open::run(&ctx, name),
            _ => Err(KamuiError::InvalidSessionId(args.join(" "))),
        },
        Commands::List { json } => list::run(&ctx, json),
        Commands::Info { name, json } => info::run(&ctx, &name, json),
        Commands::Complete { name } => manage::run(&ctx, &name, Action::Complete),
        Commands::Pause { name } => manage::run(&ctx, &name, Action::Pause),
        Commands::Archive { name } => manage::run(&ctx, &name, Action::Archive),
        Commands::Delete { name } => manage::run(&ctx, &name, Action::Delete),
        Commands::Monitor {
            session_id,
            working_dir,
            timeout_secs,
        } => monitor::run(&ctx, &session_id, &working_dir, timeout_secs),
    }
}

fn report(err: &KamuiError) {
    tracing::error!(target: logging::EXIT_TARGET, code = err.code(), error = %err, "kam failed");
    eprintln!("Error: {}", err);
    eprintln!("Hint: {}", err.recovery_hint());
}
