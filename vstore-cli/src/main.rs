// SPDX-License-Identifier: AGPL-3.0-or-later
//! vstore CLI
//!
//! Local folders, zip archives and FTP servers behind one set of commands.

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use std::path::PathBuf;
use std::process::ExitCode;
use vstore_core::{CancellationToken, CollisionPolicy, StorageConfig, StorageContext, StorageResult};
use vstore_providers::PathResolver;

#[derive(Parser)]
#[command(name = "vstore")]
#[command(author, version, about = "vstore - files, archives and FTP as one tree", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to the per-user config, if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

/// What to do when the target name is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OnConflict {
    Fail,
    Replace,
    Unique,
    Skip,
}

impl From<OnConflict> for CollisionPolicy {
    fn from(value: OnConflict) -> Self {
        match value {
            OnConflict::Fail => CollisionPolicy::FailIfExists,
            OnConflict::Replace => CollisionPolicy::ReplaceExisting,
            OnConflict::Unique => CollisionPolicy::GenerateUniqueName,
            OnConflict::Skip => CollisionPolicy::Skip,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List folder contents
    #[command(alias = "dir")]
    Ls {
        /// Folder to list (defaults to current directory)
        #[arg(default_value = ".")]
        path: String,

        /// Long format with details
        #[arg(short, long)]
        long: bool,

        /// Human-readable sizes
        #[arg(short = 'H', long)]
        human: bool,
    },

    /// Write file contents to stdout
    Cat {
        /// File to display
        path: String,
    },

    /// Copy a file or folder into a folder
    Cp {
        /// Source path
        source: String,

        /// Destination folder
        dest: String,

        /// Name in the destination (defaults to the source name)
        #[arg(short, long)]
        name: Option<String>,

        #[arg(long, value_enum, default_value = "fail")]
        on_conflict: OnConflict,
    },

    /// Move a file or folder into a folder
    Mv {
        /// Source path
        source: String,

        /// Destination folder
        dest: String,

        /// Name in the destination (defaults to the source name)
        #[arg(short, long)]
        name: Option<String>,

        #[arg(long, value_enum, default_value = "fail")]
        on_conflict: OnConflict,
    },

    /// Rename in place
    Rename {
        path: String,

        new_name: String,

        #[arg(long, value_enum, default_value = "fail")]
        on_conflict: OnConflict,
    },

    /// Remove files or folders
    Rm {
        /// Path(s) to remove
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Create folders
    Mkdir {
        /// Folder path(s) to create
        #[arg(required = true)]
        paths: Vec<String>,

        #[arg(long, value_enum, default_value = "fail")]
        on_conflict: OnConflict,
    },

    /// Create empty files, leaving existing ones alone
    Touch {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Write stdin to a file
    Put {
        path: String,

        #[arg(long, value_enum, default_value = "replace")]
        on_conflict: OnConflict,
    },

    /// Show file or folder information
    Stat {
        path: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show which backend a path belongs to
    Which {
        path: String,
    },

    /// Create an empty zip archive
    InitZip {
        path: String,
    },
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> StorageResult<StorageConfig> {
    match path {
        Some(path) => StorageConfig::load(path),
        None => Ok(StorageConfig::load_or_default()),
    }
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_interrupt(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            token.cancel();
        }
    });
}

async fn run(cli: Cli) -> StorageResult<()> {
    let config = load_config(cli.config.as_ref())?;
    let resolver = PathResolver::new(StorageContext::new(config));
    let cancel = CancellationToken::new();
    cancel_on_interrupt(&cancel);

    let cx = commands::Cx { resolver, cancel };

    match cli.command {
        Commands::Ls { path, long, human } => commands::ls(&cx, &path, long, human).await,
        Commands::Cat { path } => commands::cat(&cx, &path).await,
        Commands::Cp {
            source,
            dest,
            name,
            on_conflict,
        } => commands::cp(&cx, &source, &dest, name.as_deref(), on_conflict.into()).await,
        Commands::Mv {
            source,
            dest,
            name,
            on_conflict,
        } => commands::mv(&cx, &source, &dest, name.as_deref(), on_conflict.into()).await,
        Commands::Rename {
            path,
            new_name,
            on_conflict,
        } => commands::rename(&cx, &path, &new_name, on_conflict.into()).await,
        Commands::Rm { paths } => commands::rm(&cx, &paths).await,
        Commands::Mkdir { paths, on_conflict } => commands::mkdir(&cx, &paths, on_conflict.into()).await,
        Commands::Touch { paths } => commands::touch(&cx, &paths).await,
        Commands::Put { path, on_conflict } => commands::put(&cx, &path, on_conflict.into()).await,
        Commands::Stat { path, json } => commands::stat(&cx, &path, json).await,
        Commands::Which { path } => commands::which(&cx, &path).await,
        Commands::InitZip { path } => commands::init_zip(&cx, &path).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e}", style("Error:").red().bold());
            ExitCode::FAILURE
        }
    }
}
