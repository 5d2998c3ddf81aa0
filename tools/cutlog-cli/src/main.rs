//! Cutlog CLI: projects, edits, renders, and export retention.
//!
//! Usage:
//!   cutlog project create <NAME>     Create a project
//!   cutlog ingest <FILE>             Store source media (deduplicated)
//!   cutlog append <PROJECT> <OPS>    Commit a batch of edit operations
//!   cutlog history <PROJECT>         Show the edit log
//!   cutlog proxy <PROJECT>           Render a low-resolution preview
//!   cutlog export <PROJECT>          Render a full-resolution export
//!   cutlog jobs                      List render jobs
//!   cutlog pin <EXPORT>              Toggle an export's pin
//!   cutlog gc <ACTION>               Mark, archive, and delete old exports

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use cutlog_common::config::AppConfig;
use cutlog_common::error::CutlogError;
use cutlog_project_model::job::JobKind;

mod commands;
mod context;

use context::Context;

#[derive(Parser)]
#[command(
    name = "cutlog",
    about = "Versioned edit log, render queue, and export retention for video projects",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Storage root (overrides the config file)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Config file to use instead of the standard location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create, show, and list projects
    Project {
        #[command(subcommand)]
        action: ProjectCommand,
    },

    /// Store a source media file, deduplicated by content
    Ingest {
        /// File to ingest
        path: PathBuf,

        /// Make the file this project's source
        #[arg(short, long)]
        project: Option<String>,
    },

    /// Commit one batch of edit operations
    Append {
        /// Project ID
        project: String,

        /// JSON array of {"type", "parameters"} objects; "-" reads stdin,
        /// "@FILE" reads a file
        operations: String,

        /// Author of the batch
        #[arg(short, long, default_value = "cli")]
        user: String,
    },

    /// Show a project's edit batches
    History {
        /// Project ID
        project: String,

        /// Stop at this version (default: latest)
        #[arg(long)]
        version: Option<u64>,

        /// Print the flattened edit-decision list as JSON
        #[arg(long)]
        edl: bool,
    },

    /// Render a low-resolution proxy and wait for it
    Proxy {
        /// Project ID
        project: String,

        /// Version to render (default: latest)
        #[arg(long)]
        version: Option<u64>,
    },

    /// Render a full-resolution export and wait for it
    Export {
        /// Project ID
        project: String,

        /// Version to render (default: latest)
        #[arg(long)]
        version: Option<u64>,
    },

    /// List render jobs
    Jobs {
        /// Run queued and interrupted jobs to completion first
        #[arg(long)]
        resume: bool,
    },

    /// Toggle an export's pin
    Pin {
        /// Export ID ({projectId}-v{version})
        export: String,
    },

    /// Export garbage collection
    Gc {
        #[command(subcommand)]
        action: GcCommand,
    },
}

#[derive(Subcommand)]
enum ProjectCommand {
    /// Create an empty project
    Create {
        /// Project name
        name: String,

        /// Source media file to ingest and attach
        #[arg(short, long)]
        source: Option<PathBuf>,
    },

    /// Show a project and its exports
    Show {
        /// Project ID
        project: String,
    },

    /// List all projects
    List,
}

#[derive(Subcommand)]
enum GcCommand {
    /// Flag old, unpinned exports as GC candidates (no files touched)
    Mark {
        /// Age in days before an export may be marked
        #[arg(long)]
        ttl_days: Option<u32>,

        /// Newest exports per project that are always kept
        #[arg(long)]
        keep_latest: Option<usize>,
    },

    /// List GC candidates
    Candidates,

    /// Move candidates' files into the archive
    Archive {
        /// Export IDs to archive
        ids: Vec<String>,

        /// Archive every current candidate
        #[arg(long, conflicts_with = "ids")]
        all: bool,
    },

    /// Permanently delete archived exports
    Delete {
        /// Export IDs to delete
        ids: Vec<String>,

        /// Delete every archived export
        #[arg(long, conflicts_with = "ids")]
        all: bool,

        /// Required: confirm permanent deletion
        #[arg(long)]
        confirm: bool,
    },

    /// Show export counts and bytes per state
    Status,

    /// List source assets, optionally purging unreferenced ones
    Assets {
        /// Delete assets no project references
        #[arg(long)]
        purge: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match AppConfig::load_from(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: cannot load {}: {e}", path.display());
                return ExitCode::from(e.exit_code());
            }
        },
        None => AppConfig::load(),
    };
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    cutlog_common::logging::init_logging(&config.logging);
    if let Some(root) = cli.root {
        config.storage_root = root;
    }

    match run(config, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

async fn run(config: AppConfig, command: Commands) -> anyhow::Result<()> {
    let ctx = Context::open(config)?;

    match command {
        Commands::Project { action } => match action {
            ProjectCommand::Create { name, source } => commands::project::create(&ctx, name, source),
            ProjectCommand::Show { project } => commands::project::show(&ctx, &project),
            ProjectCommand::List => commands::project::list(&ctx),
        },
        Commands::Ingest { path, project } => commands::ingest::run(&ctx, path, project),
        Commands::Append {
            project,
            operations,
            user,
        } => commands::append::run(&ctx, &project, &operations, &user),
        Commands::History {
            project,
            version,
            edl,
        } => commands::history::run(&ctx, &project, version, edl),
        Commands::Proxy { project, version } => {
            commands::render::run(&ctx, JobKind::Proxy, &project, version).await
        }
        Commands::Export { project, version } => {
            commands::render::run(&ctx, JobKind::Export, &project, version).await
        }
        Commands::Jobs { resume } => commands::jobs::run(&ctx, resume).await,
        Commands::Pin { export } => commands::pin::run(&ctx, &export),
        Commands::Gc { action } => match action {
            GcCommand::Mark {
                ttl_days,
                keep_latest,
            } => commands::gc::mark(&ctx, ttl_days, keep_latest),
            GcCommand::Candidates => commands::gc::candidates(&ctx),
            GcCommand::Archive { ids, all } => commands::gc::archive(&ctx, ids, all),
            GcCommand::Delete { ids, all, confirm } => commands::gc::delete(&ctx, ids, all, confirm),
            GcCommand::Status => commands::gc::status(&ctx),
            GcCommand::Assets { purge } => commands::gc::assets(&ctx, purge),
        },
    }
}

/// Exit code of the first `CutlogError` in the chain; 1 for anything else.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<CutlogError>())
        .map(CutlogError::exit_code)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_exit_code_follows_error_kind() {
        let not_found: anyhow::Error = CutlogError::not_found("project", "p1").into();
        assert_eq!(exit_code(&not_found), 3);

        let wrapped = anyhow::Error::from(CutlogError::state("pinned")).context("gc archive");
        assert_eq!(exit_code(&wrapped), 6);

        assert_eq!(exit_code(&anyhow::anyhow!("boom")), 1);
    }

    #[test]
    fn test_gc_delete_parses_confirm() {
        let cli = Cli::try_parse_from(["cutlog", "gc", "delete", "p1-v1", "--confirm"]).unwrap();
        match cli.command {
            Commands::Gc {
                action: GcCommand::Delete { ids, all, confirm },
            } => {
                assert_eq!(ids, vec!["p1-v1"]);
                assert!(!all);
                assert!(confirm);
            }
            _ => panic!("expected gc delete"),
        }
    }
}
