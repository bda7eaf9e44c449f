//! gitkv CLI - inspect and update repositories stored in key-value tables.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gitkv_dfs::RepositoryRegistry;
use gitkv_store::{MemorySession, Session};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

mod commands;
mod config;
mod logging;

use config::{BackendKind, CliError, Settings};

/// gitkv - git references and packs over key-value storage
#[derive(Parser, Debug)]
#[command(name = "gitkv")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// YAML settings file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// RocksDB directory, overriding the configured backend
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List every reference
    Refs {
        /// Repository name
        repo: String,
    },

    /// Show one reference
    ShowRef { repo: String, name: String },

    /// Point a reference at an object
    UpdateRef {
        repo: String,
        name: String,
        /// New object id
        new_id: String,
        /// Only update while the reference points at this id
        #[arg(long)]
        old: Option<String>,
        /// Peeled object id, for annotated tags
        #[arg(long)]
        peeled: Option<String>,
    },

    /// Make a symbolic reference
    SymbolicRef {
        repo: String,
        name: String,
        target: String,
    },

    /// Delete a reference
    DeleteRef { repo: String, name: String },

    /// List committed packs
    Packs { repo: String },

    /// Write the raw bytes of a pack file to stdout
    CatPack {
        repo: String,
        pack: String,
        /// File extension, such as pack or idx
        ext: String,
    },

    /// Import files as one new pack
    ImportPack {
        repo: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Show version information
    Version,
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load_yaml(path)
            .with_context(|| format!("cannot load {}", path.display()))?,
        None => Settings::default(),
    };
    if let Some(db) = &cli.db {
        settings = settings.with_db_path(db.clone());
    }
    match cli.verbose {
        0 => {}
        1 => settings.logging.level = "info".to_string(),
        2 => settings.logging.level = "debug".to_string(),
        _ => settings.logging.level = "trace".to_string(),
    }
    settings.validate()?;
    Ok(settings)
}

fn connect(settings: &Settings) -> Result<Arc<dyn Session>> {
    match settings.backend.kind {
        BackendKind::Memory => {
            tracing::debug!("using in-memory backend");
            Ok(Arc::new(MemorySession::new()))
        }
        BackendKind::Rocksdb => open_rocksdb(settings),
    }
}

#[cfg(feature = "rocksdb-backend")]
fn open_rocksdb(settings: &Settings) -> Result<Arc<dyn Session>> {
    let path = settings
        .backend
        .path
        .clone()
        .ok_or_else(|| CliError::Invalid("backend.path is required".to_string()))?;
    let session = gitkv_store::RocksDbSession::open(gitkv_store::RocksDbConfig {
        path: path.clone(),
        ..Default::default()
    })
    .with_context(|| format!("cannot open database at {}", path.display()))?;
    Ok(Arc::new(session))
}

#[cfg(not(feature = "rocksdb-backend"))]
fn open_rocksdb(_settings: &Settings) -> Result<Arc<dyn Session>> {
    Err(CliError::BackendUnavailable("rocksdb").into())
}

fn run(cli: Cli) -> Result<()> {
    let settings = load_settings(&cli)?;
    logging::init_logging(&settings.logging.level, settings.logging.format);

    if let Commands::Version = cli.command {
        println!("gitkv {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let registry = RepositoryRegistry::new(connect(&settings)?, settings.store.clone());
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match cli.command {
        Commands::Refs { repo } => commands::refs(&registry, &repo, &mut out),
        Commands::ShowRef { repo, name } => commands::show_ref(&registry, &repo, &name, &mut out),
        Commands::UpdateRef {
            repo,
            name,
            new_id,
            old,
            peeled,
        } => commands::update_ref(
            &registry,
            &repo,
            &name,
            &new_id,
            old.as_deref(),
            peeled.as_deref(),
        ),
        Commands::SymbolicRef { repo, name, target } => {
            commands::symbolic_ref(&registry, &repo, &name, &target)
        }
        Commands::DeleteRef { repo, name } => commands::delete_ref(&registry, &repo, &name),
        Commands::Packs { repo } => commands::packs(&registry, &repo, &mut out),
        Commands::CatPack { repo, pack, ext } => {
            commands::cat_pack(&registry, &repo, &pack, &ext, &mut out)
        }
        Commands::ImportPack { repo, files } => {
            let name = commands::import_pack(&registry, &repo, &files)?;
            writeln!(out, "{name}")?;
            Ok(())
        }
        Commands::Version => Ok(()),
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
