//! # PNCP Research CLI (`pncp`)
//!
//! Runs market research against the PNCP registry from the command line.
//!
//! ## Usage
//!
//! ```bash
//! pncp --config ./config/pncp.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pncp research <keywords>...` | Search, rank, download and stage reference documents |
//! | `pncp search <query>` | Search the registry and print the parsed hits |
//! | `pncp preview <query>` | Print the search request URL per kind without sending it |
//! | `pncp staged` | List the staged files the extraction step will read |
//! | `pncp clean` | Clear staging slots and the download directory |
//!
//! When the config file does not exist the built-in defaults are used.
//! Logs go to stderr (`RUST_LOG` controls the level); results go to stdout.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use pncp_research::config::{self, Config};
use pncp_research::models::Ordering;
use pncp_research::pipeline::{resolve_criteria, MarketResearch, ResearchOutcome, ResearchRequest};
use pncp_research::search::SearchClient;
use pncp_research::staging::{staged_documents, Bucket, Stager};

/// PNCP market research: find, rank and stage reference procurement
/// documents for a contracting project.
#[derive(Parser)]
#[command(name = "pncp", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pncp.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline and print the staging report.
    Research {
        /// Search keywords. The first one is sent to the registry.
        #[arg(required = true)]
        keywords: Vec<String>,

        /// Description of the contracting object used for ranking.
        /// Defaults to the keywords.
        #[arg(long)]
        describe: Option<String>,

        #[command(flatten)]
        filters: FilterArgs,

        /// Number of ranked documents to download.
        #[arg(long)]
        top_k: Option<usize>,

        /// Keep the raw download directory after staging.
        #[arg(long)]
        keep_downloads: bool,
    },

    /// Search the registry and print parsed results.
    Search {
        query: String,

        #[command(flatten)]
        filters: FilterArgs,
    },

    /// Print the first-page request URL for each kind.
    Preview {
        query: String,

        #[command(flatten)]
        filters: FilterArgs,
    },

    /// List staged files in the order the extraction step reads them.
    Staged,

    /// Remove staging slots and the download directory.
    Clean,
}

#[derive(Args, Default)]
struct FilterArgs {
    /// State codes (e.g. `SP`). Repeatable.
    #[arg(long = "uf")]
    ufs: Vec<String>,

    /// Government sphere name or code (`municipal`, `E`, ...). Repeatable.
    #[arg(long = "sphere")]
    spheres: Vec<String>,

    /// Procurement modality name or code (`pregao_eletronico`, `6`, ...).
    /// Repeatable.
    #[arg(long = "modality")]
    modalities: Vec<String>,

    /// Document kind: `ata` or `contrato`. Repeatable; both when omitted.
    #[arg(long = "kind")]
    kinds: Vec<String>,

    /// Maximum documents collected across all kinds.
    #[arg(long)]
    max_documents: Option<usize>,

    /// `most-recent` or `relevance`.
    #[arg(long)]
    ordering: Option<Ordering>,
}

impl FilterArgs {
    fn into_request(self, keywords: Vec<String>) -> ResearchRequest {
        ResearchRequest {
            keywords,
            kinds: self.kinds,
            jurisdictions: self.ufs,
            spheres: self.spheres,
            modalities: self.modalities,
            max_documents: self.max_documents,
            ordering: self.ordering,
            ..ResearchRequest::default()
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load(path: &Path) -> Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        info!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::minimal())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);
    let cfg = load(&cli.config)?;

    match cli.command {
        Commands::Research {
            keywords,
            describe,
            filters,
            top_k,
            keep_downloads,
        } => {
            let mut request = filters.into_request(keywords);
            request.similarity_text = describe.unwrap_or_default();
            request.top_k = top_k;
            if keep_downloads {
                request.cleanup = Some(false);
            }
            let research = MarketResearch::new(cfg)?;
            research.warm_up().await?;
            let outcome = research.run(&request).await?;
            print_report(&outcome);
        }
        Commands::Search { query, filters } => {
            let criteria = resolve_criteria(&cfg, &filters.into_request(vec![query]))?;
            let client = SearchClient::new(&cfg.registry)?;
            let results = client.search(&criteria).await?;
            for (i, doc) in results.iter().enumerate() {
                println!("{}. [{}] {}", i + 1, doc.document_kind, doc.organization);
                println!("    {}", doc.short_description(120));
                println!("    view:     {}", doc.view_url);
                match &doc.download_url {
                    Some(url) => println!("    download: {}", url),
                    None => println!("    download: (not available)"),
                }
            }
            println!("{} documents", results.len());
        }
        Commands::Preview { query, filters } => {
            let criteria = resolve_criteria(&cfg, &filters.into_request(vec![query]))?;
            let client = SearchClient::new(&cfg.registry)?;
            for (kind, url) in client.preview_urls(&criteria)? {
                println!("{:<9} {}", kind.as_str(), url);
            }
        }
        Commands::Staged => {
            let files = staged_documents(&cfg.staging.dir, cfg.staging.consume_limit)?;
            if files.is_empty() {
                println!("No staged documents in {}", cfg.staging.dir.display());
            }
            for file in files {
                println!("{}", file.display());
            }
        }
        Commands::Clean => {
            let stager = Stager::new(&cfg.staging, &cfg.download);
            let removed = stager.clear_slots();
            stager.cleanup();
            println!("Removed {} staged files and {}", removed, cfg.download.dir.display());
        }
    }

    Ok(())
}

fn print_report(outcome: &ResearchOutcome) {
    println!(
        "found {} | ranked {} | downloaded {} | staged {}",
        outcome.found,
        outcome.ranked.len(),
        outcome.downloaded,
        outcome.staged.len()
    );
    if outcome.staged.is_empty() {
        println!("No documents staged.");
        return;
    }
    let atas = outcome.staged.iter().filter(|s| s.bucket == Bucket::Ata).count();
    println!("ATA: {} | CONTRATOS: {}", atas, outcome.staged.len() - atas);

    for staged in &outcome.staged {
        let doc = &staged.document;
        println!();
        println!("{} (rank {}, score {:.4})", staged.slot_name(), staged.rank, staged.score);
        println!("    organization: {}", doc.organization);
        println!("    description:  {}", doc.short_description(120));
        println!("    view:         {}", doc.view_url);
        match &doc.download_url {
            Some(url) => println!("    download:     {}", url),
            None => println!("    download:     (not available)"),
        }
    }
}
