//! Document Inspector Binary
//!
//! Opens a CherryTree document (`.ctd`, `.ctb` or a multi-file directory)
//! and prints its structure or the decoded content of a node.
//!
//! # Usage
//!
//! ```bash
//! ctdump notes.ctb tree
//! ctdump notes.ctd show 12
//! ctdump ./notes-dir bookmarks --json
//!
//! # Codec warnings are logged at warn level
//! RUST_LOG=debug ctdump notes.ctb show 12
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;

use cherrynote_core::config::CherryConfig;
use cherrynote_core::db::{EventSummary, NodeTree};
use cherrynote_core::services::DocumentService;
use cherrynote_core::models::{ContentModel, NodeId};

/// Inspect CherryTree documents
#[derive(Parser, Debug)]
#[command(name = "ctdump")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Document file or multi-file directory
    document: PathBuf,

    /// JSON config file (see CherryConfig)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the node hierarchy
    Tree,

    /// Print the content of one node
    Show {
        /// Node id
        id: NodeId,
    },

    /// List bookmarked nodes
    Bookmarks,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TreeLine {
    id: NodeId,
    parent: Option<NodeId>,
    depth: usize,
    name: String,
    syntax: String,
    master_id: Option<NodeId>,
}

/// `show --json` output: the decoded model and the events its load raised
#[derive(Serialize)]
struct ShowOutput<'a> {
    model: &'a ContentModel,
    events: Vec<EventSummary>,
}

fn tree_lines(tree: &NodeTree) -> Vec<TreeLine> {
    tree.preorder()
        .into_iter()
        .filter_map(|id| {
            let node = tree.get(id)?;
            Some(TreeLine {
                id,
                parent: tree.parent(id),
                depth: tree.depth(id),
                name: node.name.clone(),
                syntax: node.kind.syntax().to_string(),
                master_id: node.master_id,
            })
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => CherryConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => CherryConfig::default(),
    };

    let service = DocumentService::open(&cli.document, config)
        .await
        .with_context(|| format!("opening {}", cli.document.display()))?;
    tracing::debug!("Opened {} ({})", cli.document.display(), service.backend_kind());

    match cli.command {
        Command::Tree => {
            let lines = tree_lines(&service.tree().await);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&lines)?);
            } else {
                for line in lines {
                    let alias = line
                        .master_id
                        .map(|m| format!(" -> {m}"))
                        .unwrap_or_default();
                    println!(
                        "{}{} {} [{}]{}",
                        "  ".repeat(line.depth),
                        line.id,
                        line.name,
                        line.syntax,
                        alias
                    );
                }
            }
        }
        Command::Show { id } => {
            let mut events = service.subscribe_to_events();
            let content = service
                .load_content(id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("node {} not found", id))?;
            if cli.json {
                let mut summaries = Vec::new();
                while let Ok(event) = events.try_recv() {
                    summaries.push(EventSummary::from(&event));
                }
                let output = ShowOutput {
                    model: &content.model,
                    events: summaries,
                };
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                let text = service.node_plain_text(id).await?.unwrap_or_default();
                println!("{}", text);
                for warning in &content.warnings {
                    eprintln!("warning: {}", warning);
                }
            }
        }
        Command::Bookmarks => {
            let tree = service.tree().await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(tree.bookmarks())?);
            } else {
                for &id in tree.bookmarks() {
                    let name = tree.get(id).map(|n| n.name.as_str()).unwrap_or_default();
                    println!("{} {}", id, name);
                }
            }
        }
    }

    Ok(())
}
