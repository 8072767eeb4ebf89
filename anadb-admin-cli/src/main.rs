//! AnaDB Administration CLI

mod commit;
mod inspect;
mod kv;

use anadb_core::{Database, DatabaseConfig, SnapshotId};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "anadb-admin")]
#[command(author = "AnaDB Contributors")]
#[command(version = "0.1.0")]
#[command(about = "AnaDB analysis database administration tool")]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize a new database
    Init {
        path: PathBuf,
        /// User recorded when commits do not name one
        #[arg(long)]
        user: Option<String>,
        /// Skip hash verification when opening
        #[arg(long)]
        no_verify: bool,
    },

    /// Commit a new snapshot
    Commit {
        #[arg(short, long)]
        db: PathBuf,
        #[arg(short, long)]
        name: String,
        /// File whose bytes become the snapshot contents
        #[arg(short, long)]
        contents: Option<PathBuf>,
        /// Parent snapshot id (defaults to the current snapshot)
        #[arg(short, long, conflicts_with = "root")]
        parent: Option<i64>,
        /// Start a new tree with no parent
        #[arg(long)]
        root: bool,
        #[arg(long)]
        auto_save: bool,
        #[arg(short, long)]
        user: Option<String>,
        /// Undo action as KIND=PAYLOAD; repeat for several actions
        #[arg(short, long = "action")]
        actions: Vec<String>,
    },

    /// Show snapshot history from the current (or given) snapshot back to its root
    Log {
        #[arg(short, long)]
        db: PathBuf,
        #[arg(short, long)]
        from: Option<i64>,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Show one snapshot in detail
    Show {
        #[arg(short, long)]
        db: PathBuf,
        id: i64,
    },

    /// Write a snapshot's file contents to stdout or a file
    Cat {
        #[arg(short, long)]
        db: PathBuf,
        id: i64,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Make a snapshot current (undo / redo)
    Checkout {
        #[arg(short, long)]
        db: PathBuf,
        id: i64,
    },

    /// Read or write key-value data
    Kv {
        #[arg(short, long)]
        db: PathBuf,
        /// Snapshot whose metadata to use; globals when omitted
        #[arg(short, long)]
        snapshot: Option<i64>,
        /// Namespace path such as `analysis/functions`
        #[arg(short, long)]
        namespace: Option<String>,
        #[command(subcommand)]
        action: kv::KvAction,
    },

    /// Verify content hashes and undo history
    Verify {
        #[arg(short, long)]
        db: PathBuf,
        #[arg(short, long)]
        quiet: bool,
    },
}

fn init_tracing(debug: bool) {
    let env_filter = if debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

/// Open an existing database; `init` is the only command that creates one
fn open_existing(path: &Path) -> Result<Database> {
    if !path.join("uuid").exists() {
        anyhow::bail!("No database at {} (run `anadb-admin init` first)", path.display());
    }
    Database::open(path).with_context(|| format!("Failed to open database at {}", path.display()))
}

/// Create a new database; refuses directories that already hold one
fn init_database(path: &Path, config: DatabaseConfig) -> Result<Database> {
    if path.join("uuid").exists() {
        anyhow::bail!("A database already exists at {}", path.display());
    }
    let db = Database::open_with_config(path, config)
        .with_context(|| format!("Failed to initialize {}", path.display()))?;
    info!("Initialized database {}", db.uuid());
    Ok(db)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match cli.command {
        Commands::Init { path, user, no_verify } => {
            let config = DatabaseConfig {
                verify_on_open: !no_verify,
                default_user: user,
                ..DatabaseConfig::default()
            };
            let db = init_database(&path, config)?;
            println!("Database initialized successfully (UUID: {})", db.uuid());
        }

        Commands::Commit {
            db,
            name,
            contents,
            parent,
            root,
            auto_save,
            user,
            actions,
        } => {
            let db = open_existing(&db)?;
            let request = commit::CommitRequest {
                name,
                contents,
                parent: parent.map(SnapshotId),
                root,
                auto_save,
                user,
                actions,
            };
            let snapshot = commit::run(&db, request)?;
            println!("Committed snapshot {}", snapshot.id());
        }

        Commands::Log { db, from, limit } => {
            let db = open_existing(&db)?;
            inspect::log(&db, from.map(SnapshotId), limit)?;
        }

        Commands::Show { db, id } => {
            let db = open_existing(&db)?;
            inspect::show(&db, SnapshotId(id))?;
        }

        Commands::Cat { db, id, output } => {
            let db = open_existing(&db)?;
            inspect::cat(&db, SnapshotId(id), output.as_deref())?;
        }

        Commands::Checkout { db, id } => {
            let db = open_existing(&db)?;
            db.set_current_snapshot(SnapshotId(id))?;
            println!("Current snapshot is now {}", id);
        }

        Commands::Kv {
            db,
            snapshot,
            namespace,
            action,
        } => {
            let db = open_existing(&db)?;
            let target = match snapshot {
                Some(id) => kv::Target::Snapshot(SnapshotId(id)),
                None => kv::Target::Globals,
            };
            let path = kv::parse_namespace(namespace.as_deref());
            kv::run(&db, target, &path, action)?;
        }

        Commands::Verify { db, quiet } => {
            let db = open_existing(&db)?;
            inspect::verify(&db, quiet)?;
        }
    }

    Ok(())
}
