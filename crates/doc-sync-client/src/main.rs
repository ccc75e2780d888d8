//! doc-sync: command-line client for the document store and realtime server.
//!
//! One-shot subcommands talk to the REST API directly. `session` opens a
//! live editing session: lines typed on stdin become edits broadcast to
//! peers, and documents pushed by peers are printed as they arrive.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use doc_sync_client::session::{self, Outcome};
use doc_sync_client::{ClientConfig, HttpPersistenceClient, WebSocketChannel};
use doc_sync_core::{classify, Document, DocumentPatch, PersistenceClient, RealtimeChannel, SyncCallbacks, SyncController};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "doc-sync")]
#[command(about = "Document sync client")]
struct Args {
    #[command(flatten)]
    config: ClientConfig,

    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a document by id
    Fetch { id: String },

    /// Create a new document
    Create {
        #[arg(long)]
        content: String,
    },

    /// Merge new content into an existing document
    Merge {
        id: String,

        #[arg(long)]
        content: String,

        /// Version the edit was based on; omit to skip the conflict check
        #[arg(long)]
        base_version: Option<u64>,
    },

    /// Open a live editing session
    Session {
        /// Document to load once connected
        #[arg(long)]
        document: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Respects RUST_LOG, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,doc_sync_core=debug,doc_sync_client=debug"
    } else {
        "info,doc_sync_core=info,doc_sync_client=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let persistence = HttpPersistenceClient::from_config(&args.config)?;
    debug!("Backend: {}", args.config.backend_url);

    match args.command {
        Command::Fetch { id } => print_result(persistence.fetch(&id).await),
        Command::Create { content } => print_result(persistence.create(&Document::with_content(content)).await),
        Command::Merge {
            id,
            content,
            base_version,
        } => {
            let patch = DocumentPatch::content(content).with_base_version(base_version);
            print_result(persistence.merge_update(&id, &patch).await)
        }
        Command::Session { document } => run_session(&args.config, persistence, document).await,
    }
}

fn print_result(result: doc_sync_core::persistence::Result<Document>) -> Result<()> {
    match result {
        Ok(doc) => {
            println!("{}", serde_json::to_string_pretty(&doc)?);
            Ok(())
        }
        Err(e) => {
            let resolution = classify(&e);
            Err(anyhow::Error::new(e).context(format!("Request failed ({:?})", resolution)))
        }
    }
}

async fn run_session(config: &ClientConfig, persistence: HttpPersistenceClient, document: Option<String>) -> Result<()> {
    let url = config.realtime_url()?;
    let channel = Arc::new(
        WebSocketChannel::connect(&url)
            .await
            .with_context(|| format!("Failed to connect to {}", url))?,
    );

    let callbacks = SyncCallbacks::new()
        .on_conflict(|id| warn!("Document {} changed remotely; :reload {} before saving again", id, id))
        .on_fetch_error(|e| warn!("Fetch failed: {}", e))
        .on_save_error(|e| warn!("Save failed: {}", e))
        .on_merge_error(|e| warn!("Merge failed: {}", e));
    let ctl = SyncController::new(Arc::new(persistence), Arc::clone(&channel), callbacks);

    let printer = channel.on_document(Box::new(|doc: Document| {
        println!("<< {}", session::render(&doc));
    }));
    ctl.connect();

    if let Some(id) = document {
        if let Outcome::Reply(msg) = session::apply(&ctl, session::Input::Load(id)).await {
            println!("{}", msg);
        }
    }

    info!("Session open. Type to edit, :save, :load <id>, :reload <id>, :show, :quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    debug!("stdin closed");
                    break;
                };
                match session::apply(&ctl, session::parse_input(&line)).await {
                    Outcome::Reply(msg) => println!("{}", msg),
                    Outcome::Silent => {}
                    Outcome::Quit => break,
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    drop(printer);
    ctl.disconnect();
    info!("Session closed");
    Ok(())
}
