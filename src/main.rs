//! # pdf-rag CLI (`rag`)
//!
//! Builds a vector index from local documents and answers questions about
//! them through the retrieval agent.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag build <paths>...` | Split documents and build the index |
//! | `rag delete` | Remove the persisted index |
//! | `rag status` | Show what the persisted index contains |
//! | `rag ask "<question>"` | Answer one question |
//! | `rag chat` | Answer questions read line by line from stdin |
//!
//! Logs go to stderr (filter with `RUST_LOG`); answers go to stdout.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use pdf_rag::config::{load_config, Config};
use pdf_rag::embedding::create_provider;
use pdf_rag::{Agent, Chunker, Retriever, VectorIndex};

/// Question answering over your PDF documents.
#[derive(Parser)]
#[command(
    name = "rag",
    about = "Retrieval-augmented question answering over PDF documents",
    version
)]
struct Cli {
    /// Path to a TOML configuration file. Built-in defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split documents and build the vector index.
    ///
    /// Directories are walked recursively for supported files
    /// (`.pdf`, `.docx`, `.txt`, `.md`).
    Build {
        /// Files or directories to index.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Delete an existing index first.
        #[arg(long)]
        rebuild: bool,
    },

    /// Delete the persisted index.
    Delete,

    /// Show the persisted index's contents.
    Status,

    /// Answer a single question.
    Ask {
        question: String,
    },

    /// Answer questions from stdin, one per line, until EOF.
    Chat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    match cli.command {
        Commands::Build { paths, rebuild } => build(&cfg, &paths, rebuild).await,
        Commands::Delete => {
            let location = &cfg.index.path;
            if VectorIndex::delete(location).await? {
                println!("Deleted index at {}", location.display());
            } else {
                println!("No index at {}", location.display());
            }
            Ok(())
        }
        Commands::Status => status(&cfg).await,
        Commands::Ask { question } => {
            let agent = open_agent(&cfg).await?;
            println!("{}", agent.answer(&question).await);
            Ok(())
        }
        Commands::Chat => chat(&cfg).await,
    }
}

async fn build(cfg: &Config, inputs: &[PathBuf], rebuild: bool) -> anyhow::Result<()> {
    let chunker = Chunker::new(&cfg.chunking)?;
    let files = collect_files(&chunker, inputs)?;
    if files.is_empty() {
        bail!("no supported documents found under the given paths");
    }

    let fragments = chunker.split(&files)?;
    let provider = create_provider(&cfg.embedding).context("failed to create embedding provider")?;
    let index = VectorIndex::from_config(cfg, provider);

    if rebuild {
        VectorIndex::delete(index.location()).await?;
    } else if VectorIndex::exists(index.location()) {
        bail!(
            "an index already exists at {} (use --rebuild to replace it)",
            index.location().display()
        );
    }

    let count = fragments.len();
    index
        .build(fragments)
        .await
        .with_context(|| format!("failed to build index at {}", index.location().display()))?;
    println!(
        "Indexed {} fragments from {} documents into {}",
        count,
        files.len(),
        index.location().display()
    );
    Ok(())
}

/// Expand directories into the supported files beneath them, sorted.
fn collect_files(chunker: &Chunker, inputs: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if !input.is_dir() {
            // Missing or unsupported files surface as errors from the chunker.
            files.push(input.clone());
            continue;
        }
        let mut found: Vec<PathBuf> = Vec::new();
        for entry in WalkDir::new(input).follow_links(true) {
            let entry = entry.with_context(|| format!("failed to walk {}", input.display()))?;
            if entry.file_type().is_file() && chunker.loaders().supports(entry.path()) {
                found.push(entry.into_path());
            }
        }
        found.sort();
        files.extend(found);
    }
    Ok(files)
}

async fn status(cfg: &Config) -> anyhow::Result<()> {
    let location = &cfg.index.path;
    if !VectorIndex::exists(location) {
        println!("No index at {}", location.display());
        return Ok(());
    }
    let handle = open_index(cfg, location).await?;
    let stats = handle.stats();
    println!("Index:      {}", stats.location.display());
    println!("Build:      {} ({})", stats.build_id, stats.created_at.to_rfc3339());
    println!("Provider:   {}", stats.fingerprint);
    println!("Documents:  {}", stats.documents);
    println!("Fragments:  {}", stats.fragments);
    println!("Dimensions: {}", stats.dims);
    Ok(())
}

async fn open_index(cfg: &Config, location: &Path) -> anyhow::Result<pdf_rag::IndexHandle> {
    let provider = create_provider(&cfg.embedding).context("failed to create embedding provider")?;
    let index = VectorIndex::from_config(cfg, provider);
    index
        .load()
        .await
        .with_context(|| format!("failed to load index at {}", location.display()))
}

async fn open_agent(cfg: &Config) -> anyhow::Result<Agent> {
    let handle = open_index(cfg, &cfg.index.path).await?;
    let retriever = Retriever::new(handle, cfg.retrieval.top_k);
    Agent::from_config(cfg, retriever)
        .await
        .context("failed to initialize the agent")
}

async fn chat(cfg: &Config) -> anyhow::Result<()> {
    let agent = open_agent(cfg).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        println!("{}", agent.answer(&line).await);
    }
    Ok(())
}
