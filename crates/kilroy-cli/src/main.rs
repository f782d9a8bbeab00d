//! Kilroy CLI - maintenance commands for a kilroy scene store

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kilroy::prelude::*;
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "kilroy")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the store root
    #[arg(short, long, default_value = "./data")]
    root: PathBuf,

    /// JSON configuration file; its root wins over --root
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the collection directories and clear leftover markers
    Init,

    /// Run collection passes
    Gc {
        /// Number of passes to run back to back
        #[arg(short, long, default_value_t = 1)]
        passes: u32,

        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Record counts per collection
    Status,

    /// Search scenes and objects by text
    Search {
        text: String,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Scenes that use an object
    Refs {
        /// Object id
        id: String,

        /// The id names a place rather than a thing
        #[arg(long)]
        place: bool,
    },

    /// Live objects citing a word
    Citations { word: String },
}

impl Cli {
    fn load_config(&self) -> Result<KilroyConfig> {
        match &self.config {
            Some(path) => KilroyConfig::from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display())),
            None => Ok(KilroyConfig::new(&self.root)),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let config = cli.load_config()?;
    let db = commands::open(config).await?;

    // Execute command
    match cli.command {
        Commands::Init => commands::status::init(&db)?,
        Commands::Gc { passes, json } => commands::gc::execute(&db, passes, json).await?,
        Commands::Status => commands::status::execute(&db).await?,
        Commands::Search { text, json } => commands::search::search(&db, &text, json).await?,
        Commands::Refs { id, place } => {
            let object = if place {
                ObjectId::place(id)
            } else {
                ObjectId::thing(id)
            };
            commands::search::refs(&db, &object).await?
        }
        Commands::Citations { word } => commands::search::citations(&db, &word).await?,
    }

    Ok(())
}
