//! End-to-end market research: search, rank, download, stage, clean up.
//!
//! [`MarketResearch`] owns one instance of every component and runs them
//! strictly in sequence. Only the download step fans out.
//!
//! ```text
//! Idle → Searching → Ranking → Downloading → Staging → Cleanup → Done
//! ```
//!
//! Any stage that produces nothing moves straight to `Done` with an empty
//! outcome. Invalid filters or a missing keyword fail before `Searching`.

use anyhow::{Context, Result};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::download::{DownloadOutcome, Downloader};
use crate::embedding::{create_embedder, Embedder};
use crate::error::ValidationError;
use crate::filters;
use crate::models::{DocumentKind, DocumentResult, Ordering, RankedCandidate, SearchCriteria};
use crate::rank::rank;
use crate::search::SearchClient;
use crate::staging::{StagedDocument, Stager};

/// One market-research run as requested by the caller.
///
/// Unset numeric options fall back to the `[research]` config section.
#[derive(Debug, Clone, Default)]
pub struct ResearchRequest {
    /// Search keywords; the first non-blank one is sent to the registry.
    pub keywords: Vec<String>,
    /// Free-text description of the contracting object, compared against
    /// each hit's description. Falls back to the joined keywords.
    pub similarity_text: String,
    /// Requested kinds (`ata`, `contrato`). Empty means both.
    pub kinds: Vec<String>,
    pub jurisdictions: Vec<String>,
    pub spheres: Vec<String>,
    pub modalities: Vec<String>,
    pub max_documents: Option<usize>,
    pub top_k: Option<usize>,
    pub ordering: Option<Ordering>,
    pub cleanup: Option<bool>,
}

impl ResearchRequest {
    pub fn new<S: Into<String>>(keywords: impl IntoIterator<Item = S>) -> Self {
        Self {
            keywords: keywords.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn describe(mut self, text: impl Into<String>) -> Self {
        self.similarity_text = text.into();
        self
    }

    /// The registry query: the first keyword that is not blank.
    pub fn query(&self) -> Result<&str, ValidationError> {
        self.keywords
            .iter()
            .map(|k| k.trim())
            .find(|k| !k.is_empty())
            .ok_or(ValidationError::MissingKeyword)
    }

    /// Text the ranker compares descriptions against.
    pub fn ranking_text(&self) -> String {
        let text = self.similarity_text.trim();
        if !text.is_empty() {
            return text.to_string();
        }
        self.keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Pipeline progress, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Searching,
    Ranking,
    Downloading,
    Staging,
    Cleanup,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Searching => "searching",
            Stage::Ranking => "ranking",
            Stage::Downloading => "downloading",
            Stage::Staging => "staging",
            Stage::Cleanup => "cleanup",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// What a run produced.
#[derive(Debug, Clone, Default)]
pub struct ResearchOutcome {
    /// Hits accepted by the parser across all kinds.
    pub found: usize,
    /// Top candidates in rank order. `local_path` points at the staged copy
    /// for documents that made it into a slot.
    pub ranked: Vec<RankedCandidate>,
    pub downloaded: usize,
    pub staged: Vec<StagedDocument>,
}

impl ResearchOutcome {
    /// Ranked documents that were staged, in rank order.
    pub fn staged_results(&self) -> Vec<&DocumentResult> {
        self.ranked
            .iter()
            .map(|c| &c.document)
            .filter(|d| d.local_path.is_some())
            .collect()
    }
}

/// The market-research service.
///
/// Holds the HTTP clients and the embedding model, so build it once and
/// call [`run`](Self::run) as often as needed.
pub struct MarketResearch {
    config: Config,
    search: SearchClient,
    embedder: Arc<dyn Embedder>,
    downloader: Downloader,
    stager: Stager,
}

impl MarketResearch {
    /// Build the service with the configured local embedding backend.
    pub fn new(config: Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        Self::with_embedder(config, embedder)
    }

    /// Build the service around an existing embedder.
    ///
    /// Creates the download and staging directories.
    pub fn with_embedder(config: Config, embedder: Arc<dyn Embedder>) -> Result<Self> {
        config.validate()?;
        for dir in [&config.download.dir, &config.staging.dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }

        Ok(Self {
            search: SearchClient::new(&config.registry)?,
            downloader: Downloader::new(&config.download)?,
            stager: Stager::new(&config.staging, &config.download),
            embedder,
            config,
        })
    }

    /// Load the embedding model now rather than on the first ranking.
    ///
    /// Returns the name of the model in use.
    pub async fn warm_up(&self) -> Result<String> {
        self.embedder.warm_up().await?;
        let model = self.embedder.model_name().to_string();
        info!(model = %model, "embedding model ready");
        Ok(model)
    }

    /// Resolve a request against the configured defaults and validate it.
    pub fn criteria(&self, request: &ResearchRequest) -> Result<SearchCriteria, ValidationError> {
        resolve_criteria(&self.config, request)
    }

    /// Run the whole pipeline once.
    pub async fn run(&self, request: &ResearchRequest) -> Result<ResearchOutcome> {
        let mut stage = Stage::Idle;
        let criteria = self.criteria(request)?;
        let top_k = request.top_k.unwrap_or(self.config.research.top_k);
        let cleanup = request.cleanup.unwrap_or(self.config.research.cleanup);
        let mut outcome = ResearchOutcome::default();

        advance(&mut stage, Stage::Searching);
        let found = self.search.search(&criteria).await?;
        outcome.found = found.len();
        if found.is_empty() {
            warn!(query = %criteria.query, "registry returned no usable documents");
            advance(&mut stage, Stage::Done);
            return Ok(outcome);
        }

        advance(&mut stage, Stage::Ranking);
        let text = request.ranking_text();
        let mut ranked = rank(self.embedder.as_ref(), found, &text, top_k).await?;
        if ranked.is_empty() {
            advance(&mut stage, Stage::Done);
            return Ok(outcome);
        }

        advance(&mut stage, Stage::Downloading);
        let outcomes = self.downloader.download_outcomes(&ranked).await;
        for result in outcomes {
            if let DownloadOutcome::Saved { rank, document } = result {
                if let Some(candidate) = ranked.get_mut(rank - 1) {
                    candidate.document.local_path = document.local_path;
                    outcome.downloaded += 1;
                }
            }
        }
        if outcome.downloaded == 0 {
            warn!(ranked = ranked.len(), "no ranked document could be downloaded");
            outcome.ranked = ranked;
            advance(&mut stage, Stage::Done);
            return Ok(outcome);
        }

        advance(&mut stage, Stage::Staging);
        let staged = self.stager.stage(&ranked)?;

        // Raw download paths are gone after cleanup; only staged copies survive.
        if cleanup {
            for candidate in ranked.iter_mut() {
                candidate.document.local_path = None;
            }
        }
        for doc in &staged {
            if let Some(candidate) = ranked.get_mut(doc.rank - 1) {
                candidate.document.local_path = doc.document.local_path.clone();
            }
        }

        if cleanup {
            advance(&mut stage, Stage::Cleanup);
            self.stager.cleanup();
        }

        advance(&mut stage, Stage::Done);
        info!(
            found = outcome.found,
            ranked = ranked.len(),
            downloaded = outcome.downloaded,
            staged = staged.len(),
            "market research finished"
        );
        outcome.ranked = ranked;
        outcome.staged = staged;
        Ok(outcome)
    }
}

/// Turn a request into search criteria, filling unset values from
/// `config`. Fails on a missing keyword or an invalid filter token.
pub fn resolve_criteria(
    config: &Config,
    request: &ResearchRequest,
) -> Result<SearchCriteria, ValidationError> {
    let query = request.query()?;
    filters::validate(
        &request.jurisdictions,
        &request.spheres,
        &request.modalities,
    )?;

    let defaults = &config.research;
    let mut criteria = SearchCriteria::new(query);
    criteria.kinds = if request.kinds.is_empty() {
        DocumentKind::ALL.to_vec()
    } else {
        DocumentKind::select(&request.kinds)
    };
    criteria.max_documents = request.max_documents.unwrap_or(defaults.max_documents);
    criteria.page_size = config.registry.page_size;
    criteria.ordering = request.ordering.unwrap_or(defaults.ordering);
    criteria.jurisdictions = request.jurisdictions.clone();
    criteria.spheres = request.spheres.clone();
    criteria.modalities = request.modalities.clone();
    Ok(criteria)
}

fn advance(stage: &mut Stage, next: Stage) {
    info!(from = %stage, to = %next, "pipeline stage");
    *stage = next;
}
