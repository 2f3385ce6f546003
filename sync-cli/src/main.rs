//! # sync-cli
//!
//! Command-line quote list that syncs through a shared cloud directory.
//!
//! ## Commands
//!
//! - `init`: Create a data directory bound to a cloud directory
//! - `add`, `edit`, `remove`, `list`: Work on the local quote list
//! - `push`, `pull`, `sync`: Exchange changes with the cloud
//! - `reupload`, `reset`: Recovery operations
//! - `status`: Show sync status
//!
//! ## Example
//!
//! ```bash
//! # Two devices sharing one cloud directory
//! quotes --data-dir ./laptop init --cloud-dir ./cloud --name laptop
//! quotes --data-dir ./phone init --cloud-dir ./cloud --name phone
//!
//! # Add on one, sync both
//! quotes --data-dir ./laptop add "Make it work, make it right, make it fast."
//! quotes --data-dir ./laptop sync
//! quotes --data-dir ./phone sync
//! quotes --data-dir ./phone list
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{edit, init, status, sync};

/// Quote list with cloud sync.
#[derive(Parser, Debug)]
#[command(name = "quotes")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Data directory holding the local quotes and sync state
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log sync activity to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the data directory and bind it to a cloud directory
    Init {
        /// Directory shared by every device (acts as the cloud store)
        #[arg(long)]
        cloud_dir: PathBuf,

        /// Device name
        #[arg(long, short)]
        name: Option<String>,
    },

    /// Add a quote
    Add {
        /// Quote text
        text: String,
    },

    /// Replace the text of a quote
    Edit {
        /// Quote id (as shown by `list`)
        id: String,

        /// New text
        text: String,
    },

    /// Remove a quote
    Remove {
        /// Quote id (as shown by `list`)
        id: String,
    },

    /// List the local quotes
    List,

    /// Send pending local changes to the cloud
    Push,

    /// Fetch and apply changes from the cloud
    Pull,

    /// Pull, then push
    Sync,

    /// Queue every local quote for upload and push
    Reupload,

    /// Delete everything locally and in the cloud
    Reset,

    /// Show sync status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir()?,
    };

    match cli.command {
        Commands::Init { cloud_dir, name } => {
            init::run(&data_dir, &cloud_dir, name.as_deref()).await?;
        }
        Commands::Add { text } => {
            edit::add(&data_dir, &text).await?;
        }
        Commands::Edit { id, text } => {
            edit::edit(&data_dir, &id, &text).await?;
        }
        Commands::Remove { id } => {
            edit::remove(&data_dir, &id).await?;
        }
        Commands::List => {
            edit::list(&data_dir).await?;
        }
        Commands::Push => {
            sync::push(&data_dir).await?;
        }
        Commands::Pull => {
            sync::pull(&data_dir).await?;
        }
        Commands::Sync => {
            sync::sync(&data_dir).await?;
        }
        Commands::Reupload => {
            sync::reupload(&data_dir).await?;
        }
        Commands::Reset => {
            sync::reset(&data_dir).await?;
        }
        Commands::Status => {
            status::run(&data_dir).await?;
        }
    }

    Ok(())
}

/// Get the default data directory for quotes.
fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("io", "ydun", "quotes")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}
