//! Core data types that flow through the market-research pipeline.
//!
//! Everything here lives for one pipeline run. Only the staged files
//! written by [`crate::staging`] outlive it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Placeholder used when the registry omits a description or type tag.
pub const NOT_INFORMED: &str = "Não informado";
/// Placeholder used when the registry omits the organization name.
pub const NOT_DETERMINED: &str = "N/D";
/// Placeholder used when an item has no view path.
pub const NOT_AVAILABLE: &str = "Não disponível";

/// Document kinds the pipeline can search for and download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    /// Ata de registro de preços.
    Ata,
    /// Executed contract.
    Contrato,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 2] = [DocumentKind::Ata, DocumentKind::Contrato];

    /// Value sent in the `tipos_documento` query parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Ata => "ata",
            DocumentKind::Contrato => "contrato",
        }
    }

    /// Keeps the recognised kinds from a free-form list, in input order.
    ///
    /// Unknown entries are dropped with a warning. Duplicates collapse.
    /// When nothing valid remains both kinds are returned.
    pub fn select<S: AsRef<str>>(requested: &[S]) -> Vec<DocumentKind> {
        let mut kinds = Vec::new();
        for raw in requested {
            match raw.as_ref().parse::<DocumentKind>() {
                Ok(kind) if !kinds.contains(&kind) => kinds.push(kind),
                Ok(_) => {}
                Err(_) => tracing::warn!(kind = raw.as_ref(), "ignoring unsupported document kind"),
            }
        }
        if kinds.is_empty() {
            tracing::warn!("no valid document kind requested, searching ata and contrato");
            kinds = Self::ALL.to_vec();
        }
        kinds
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ata" => Ok(DocumentKind::Ata),
            "contrato" => Ok(DocumentKind::Contrato),
            other => Err(format!("unsupported document kind: '{}'", other)),
        }
    }
}

/// Result ordering requested from the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Ordering {
    /// Newest first (`-data`).
    #[default]
    MostRecent,
    /// Registry relevance (`relevancia`).
    Relevance,
}

impl Ordering {
    pub fn as_param(&self) -> &'static str {
        match self {
            Ordering::MostRecent => "-data",
            Ordering::Relevance => "relevancia",
        }
    }
}

impl FromStr for Ordering {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "most-recent" | "-data" => Ok(Ordering::MostRecent),
            "relevance" | "relevancia" => Ok(Ordering::Relevance),
            other => Err(format!(
                "unknown ordering '{}'. Use most-recent or relevance.",
                other
            )),
        }
    }
}

/// Everything the search client needs to crawl the registry.
#[derive(Debug, Clone)]
pub struct SearchCriteria {
    pub query: String,
    pub kinds: Vec<DocumentKind>,
    pub max_documents: usize,
    pub page_size: usize,
    pub ordering: Ordering,
    pub jurisdictions: Vec<String>,
    pub spheres: Vec<String>,
    pub modalities: Vec<String>,
}

impl SearchCriteria {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            kinds: DocumentKind::ALL.to_vec(),
            max_documents: 300,
            page_size: 10,
            ordering: Ordering::default(),
            jurisdictions: Vec::new(),
            spheres: Vec::new(),
            modalities: Vec::new(),
        }
    }

    /// Documents allotted to each kind. The remainder of the division is
    /// not redistributed.
    pub fn per_kind_budget(&self) -> usize {
        if self.kinds.is_empty() {
            return 0;
        }
        self.max_documents / self.kinds.len()
    }
}

/// A search hit that passed the parser.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentResult {
    pub organization: String,
    pub description: String,
    /// Type tag exactly as the registry reported it.
    pub document_kind: String,
    pub view_url: String,
    pub download_url: Option<String>,
    /// Set once the downloader has stored the file.
    pub local_path: Option<PathBuf>,
    /// Set by the ranker.
    pub similarity: Option<f32>,
}

impl DocumentResult {
    /// Whether the description can be fed to the embedding model.
    pub fn has_usable_description(&self) -> bool {
        let trimmed = self.description.trim();
        !trimmed.is_empty() && self.description != NOT_INFORMED
    }

    /// First `max` characters of the description, for log lines.
    pub fn short_description(&self, max: usize) -> String {
        truncate_chars(&self.description, max)
    }
}

/// A document paired with its similarity to the research text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedCandidate {
    pub document: DocumentResult,
    pub score: f32,
}

/// Character-safe truncation.
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
