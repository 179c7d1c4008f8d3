//! Device Query CLI
//!
//! Command-line interface for working with queries and stores directly:
//! - Parse a query and show the descriptor or every error
//! - Run a query against a store for a known internal id
//! - Seed a store from a JSON file
//! - Generate a default config file

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use device_query::config::Config;
use device_query::query::{build_query, translate, QueryExecutor};
use device_query::storage::SqliteStore;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "device-query")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Query language tooling for device data")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default locations are searched when omitted)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse a query and print its descriptor as JSON
    Parse {
        /// Query text (read from stdin when omitted)
        query: Option<String>,
    },

    /// Run a query against a store
    Run {
        /// Internal storage id of the target user
        #[arg(short, long)]
        internal_id: String,
        /// Store connection string (default: from config)
        #[arg(short, long)]
        store: Option<String>,
        /// Query text (read from stdin when omitted)
        query: Option<String>,
    },

    /// Load a JSON array of documents into a store
    Load {
        /// Path to the JSON file
        path: PathBuf,
        /// Store connection string (default: from config)
        #[arg(short, long)]
        store: Option<String>,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn query_text(arg: Option<String>) -> anyhow::Result<String> {
    match arg {
        Some(text) => Ok(text),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("reading query from stdin")?;
            Ok(text)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };

    match cli.command {
        Commands::Parse { query } => {
            let text = query_text(query)?;
            match build_query(&text) {
                Ok(descriptor) => {
                    println!("{}", serde_json::to_string_pretty(&descriptor)?);
                }
                Err(errors) => {
                    eprintln!("{} error(s):", errors.len());
                    for issue in errors.issues() {
                        eprintln!("  {}", issue);
                    }
                    std::process::exit(1);
                }
            }
        }

        Commands::Run {
            internal_id,
            store,
            query,
        } => {
            let text = query_text(query)?;
            let descriptor = build_query(&text)?;
            let connection = store.unwrap_or(config.store.connection_string.clone());

            let store = SqliteStore::open(&connection)
                .with_context(|| format!("opening store {}", connection))?;
            let executor = QueryExecutor::new(Arc::new(store))
                .with_timeout(Duration::from_millis(config.store.query_timeout_ms));

            let records = executor.execute(&translate(&descriptor, &internal_id)).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }

        Commands::Load { path, store } => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {:?}", path))?;
            let documents: serde_json::Value = serde_json::from_str(&content)?;
            let Some(documents) = documents.as_array() else {
                bail!("{:?} must contain a JSON array of documents", path);
            };

            let connection = store.unwrap_or(config.store.connection_string.clone());
            let store = SqliteStore::open(&connection)
                .with_context(|| format!("opening store {}", connection))?;
            let written = store.insert_documents(documents)?;

            println!("Loaded {} documents into {}", written, connection);
        }

        Commands::Config { output } => {
            let config = device_query::config::generate_default_config();

            match output {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, &config)?;
                    println!("Config written to {:?}", path);
                }
                None => {
                    print!("{}", config);
                }
            }
        }
    }

    Ok(())
}
