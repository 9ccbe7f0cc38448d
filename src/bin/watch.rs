//! livedoc watcher
//!
//! Loads documents into an in-memory backend, subscribes one live query and
//! prints every result as a JSON line. Writes read from stdin are applied to
//! the backend, so updates can be watched as they flow through the cache:
//!
//! ```text
//! {"put": "orders", "doc": {"id": "o9", "uid": "alice", "timestampCreate": 1700000000000}}
//! {"delete": "orders", "id": "o9"}
//! ```
//!
//! Run with: livedoc-watch --data orders.json owner orders alice

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use livedoc::{Cursor, Document, LiveConfig, LiveQueries, LiveQuery, MemoryBackend};

#[derive(Parser, Debug)]
#[command(name = "livedoc-watch")]
#[command(about = "Watch a live query over an in-memory document set")]
#[command(version)]
struct Args {
    /// JSON file of the form {"collection": [documents]}
    #[arg(long, env = "LIVEDOC_DATA")]
    data: Option<String>,

    /// TOML configuration file
    #[arg(long, env = "LIVEDOC_CONFIG")]
    config: Option<String>,

    /// Log as JSON instead of text
    #[arg(long, env = "LIVEDOC_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch a single document
    Doc {
        collection: String,
        id: String,
    },
    /// Watch the documents of one owner, newest first
    Owner {
        collection: String,
        owner: String,
    },
    /// Watch one page of a collection, newest first
    Page {
        collection: String,
        /// Page size (defaults to the configured size)
        #[arg(short, long)]
        size: Option<usize>,
        /// Cursor token from a previous page
        #[arg(short, long)]
        cursor: Option<String>,
    },
}

/// One write read from stdin
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WriteCommand {
    Put { put: String, doc: Document },
    Delete { delete: String, id: String },
}

fn init_logging(json: bool) {
    let registry =
        tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::from_default_env());
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(false),
            )
            .init();
    }
}

fn load_config(path: Option<&str>) -> anyhow::Result<LiveConfig> {
    let config = match path {
        Some(path) => {
            let path = shellexpand::tilde(path).to_string();
            LiveConfig::from_file(&path).with_context(|| format!("loading config {}", path))?
        }
        None => LiveConfig::default(),
    };
    Ok(config.with_env_overrides()?)
}

fn apply_write(backend: &MemoryBackend, line: &str) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }
    match serde_json::from_str::<WriteCommand>(line) {
        Ok(WriteCommand::Put { put, doc }) => backend.put(&put, doc),
        Ok(WriteCommand::Delete { delete, id }) => {
            if backend.delete(&delete, &id).is_none() {
                tracing::warn!(collection = %delete, id = %id, "no such document");
            }
        }
        Err(e) => tracing::warn!("ignoring malformed write: {}", e),
    }
}

fn emit<R: Serialize>(result: &R) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(result)?);
    Ok(())
}

async fn watch<R>(mut query: LiveQuery<R>, backend: MemoryBackend) -> anyhow::Result<()>
where
    R: Serialize + 'static,
{
    tracing::info!(key = %query.key(), "watching");
    emit(&query.result())?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = query.next() => match changed {
                Some(result) => emit(&result)?,
                None => break,
            },
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => apply_write(&backend, &line),
                None => stdin_open = false,
            },
        }
    }

    query.cancel();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_json);

    let config = load_config(args.config.as_deref())?;
    let backend = MemoryBackend::from_config(&config);

    if let Some(path) = &args.data {
        let path = shellexpand::tilde(path).to_string();
        let json = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path))?;
        let loaded = backend.seed_from_json(&json)?;
        tracing::info!(documents = loaded, "loaded {}", path);
    }

    let live = LiveQueries::with_backend(Arc::new(backend.clone()), config);

    match args.command {
        Commands::Doc { collection, id } => watch(live.document(&collection, &id), backend).await?,
        Commands::Owner { collection, owner } => {
            watch(live.list_by_owner(&collection, &owner), backend).await?
        }
        Commands::Page {
            collection,
            size,
            cursor,
        } => {
            let cursor = cursor.as_deref().map(Cursor::from_token).transpose()?;
            watch(live.paged(&collection, size, cursor.as_ref()), backend).await?
        }
    }

    live.cache().shutdown();
    Ok(())
}
