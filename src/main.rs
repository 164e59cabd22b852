//! # SciTutor CLI (`tutor`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tutor serve` | Bootstrap the index and start the HTTP API |
//! | `tutor ingest [--rebuild]` | Build the index from the PDF folder |
//! | `tutor chat --username <name>` | Interactive tutor session in the terminal |
//! | `tutor progress <username>` | Print a user's progress report |
//! | `tutor history <username>` | Print a user's persisted transcript |
//!
//! ## Examples
//!
//! ```bash
//! export GOOGLE_API_KEY=...
//! tutor ingest --config ./config/tutor.toml
//! tutor serve --config ./config/tutor.toml
//! tutor chat --username alice
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use scitutor::chain::ConversationalChain;
use scitutor::config;
use scitutor::console;
use scitutor::index::VectorIndex;
use scitutor::llm::create_chat_model;
use scitutor::logging;
use scitutor::server;
use scitutor::users::UserStore;

/// SciTutor: a retrieval-augmented science tutor for Class 9 and 10.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/tutor.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "tutor", about = "Retrieval-augmented science tutor", version)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/tutor.toml`. A missing file means all defaults.
    #[arg(long, global = true, default_value = "./config/tutor.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API.
    ///
    /// Builds the index from the PDF folder on first start, then serves
    /// `/chat`, `/progress/{username}` and `/history/{username}`.
    Serve,

    /// Build the index from the PDF folder.
    ///
    /// Without `--rebuild` an existing, non-empty index is left untouched.
    Ingest {
        /// Drop the existing index and ingest everything again.
        #[arg(long)]
        rebuild: bool,
    },

    /// Chat with the tutor in the terminal.
    Chat {
        /// Whose progress the session is recorded against.
        #[arg(long)]
        username: String,
    },

    /// Print a user's learning progress.
    Progress { username: String },

    /// Print a user's persisted chat transcript.
    History { username: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ingest { rebuild } => {
            let index = if rebuild {
                VectorIndex::rebuild(&cfg).await?
            } else {
                VectorIndex::bootstrap(&cfg).await?
            };
            println!(
                "Index ready: {} documents, {} vectors.",
                index.document_count().await?,
                index.vector_count().await?
            );
            index.close().await;
        }
        Commands::Chat { username } => {
            let users = UserStore::open(&cfg.paths.users_dir, cfg.history.max_entries)?;
            let index = VectorIndex::bootstrap(&cfg).await?;
            let llm = create_chat_model(&cfg.llm)?;
            let chain =
                ConversationalChain::new(Arc::from(llm), Arc::new(index), cfg.retrieval.k);

            let stdin = std::io::stdin();
            let mut stdout = std::io::stdout();
            console::run_chat(
                &chain,
                &users,
                &username,
                cfg.history.console_window,
                stdin.lock(),
                &mut stdout,
            )
            .await?;
        }
        Commands::Progress { username } => {
            let users = UserStore::open(&cfg.paths.users_dir, cfg.history.max_entries)?;
            console::display_progress(&users, &username, &mut std::io::stdout())?;
        }
        Commands::History { username } => {
            let users = UserStore::open(&cfg.paths.users_dir, cfg.history.max_entries)?;
            for entry in users.chat_history(&username)? {
                println!(
                    "[{}] {}: {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.role.as_str(),
                    entry.content
                );
            }
        }
    }

    Ok(())
}
