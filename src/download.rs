//! Concurrent download of ranked documents.
//!
//! Downloads run on a [`JoinSet`] with a [`Semaphore`] capping how many are
//! in flight (3 by default). Every task reports a [`DownloadOutcome`]; a
//! failure only affects its own document. Outcomes are collected in
//! completion order. Final placement is decided later by rank, in
//! [`crate::staging`].
//!
//! # File naming
//!
//! 1. `Content-Disposition` filename (percent-decoded, sanitized), else
//! 2. `{organization}_{description}_{kind}{ext}` with each part shortened
//!    and the extension taken from `Content-Type` (`.pdf` by default).
//!
//! The 1-based rank is prepended (`03_contrato.pdf`) so two documents that
//! resolve to the same name never overwrite each other.

use anyhow::{Context, Result};
use percent_encoding::percent_decode_str;
use regex::Regex;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, CONTENT_TYPE};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::DownloadConfig;
use crate::models::{truncate_chars, DocumentResult, RankedCandidate};

const MAX_FILENAME_CHARS: usize = 100;
/// Leaves room for the rank prefix under the usual 255-byte name limit.
const MAX_FILENAME_BYTES: usize = 200;
const ORGANIZATION_CHARS: usize = 20;
const DESCRIPTION_CHARS: usize = 30;
const KIND_CHARS: usize = 30;

/// What happened to one submitted document.
#[derive(Debug, Clone)]
pub enum DownloadOutcome {
    Saved {
        /// Position in the ranked input, 1-based.
        rank: usize,
        document: DocumentResult,
    },
    Failed {
        rank: usize,
        document: DocumentResult,
        reason: String,
    },
}

/// Bounded-concurrency downloader writing into one directory.
pub struct Downloader {
    http: reqwest::Client,
    dir: PathBuf,
    workers: usize,
}

impl Downloader {
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            dir: config.dir.clone(),
            workers: config.workers.max(1),
        })
    }

    /// Download every ranked document that has a download URL and return
    /// the ones that were saved, in completion order.
    pub async fn download_all(&self, ranked: &[RankedCandidate]) -> Vec<DocumentResult> {
        self.download_outcomes(ranked)
            .await
            .into_iter()
            .filter_map(|outcome| match outcome {
                DownloadOutcome::Saved { document, .. } => Some(document),
                DownloadOutcome::Failed { .. } => None,
            })
            .collect()
    }

    /// Like [`download_all`](Self::download_all) but keeps failures and
    /// the rank of every submitted document.
    pub async fn download_outcomes(&self, ranked: &[RankedCandidate]) -> Vec<DownloadOutcome> {
        let submitted: Vec<(usize, DocumentResult)> = ranked
            .iter()
            .enumerate()
            .filter(|(_, c)| c.document.download_url.is_some())
            .map(|(i, c)| (i + 1, c.document.clone()))
            .collect();

        if submitted.len() < ranked.len() {
            warn!(
                without_url = ranked.len() - submitted.len(),
                "some ranked documents have no download URL"
            );
        }
        if submitted.is_empty() {
            warn!("nothing to download");
            return Vec::new();
        }

        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            error!(dir = %self.dir.display(), error = %e, "cannot create download directory");
            return submitted
                .into_iter()
                .map(|(rank, document)| DownloadOutcome::Failed {
                    rank,
                    document,
                    reason: e.to_string(),
                })
                .collect();
        }

        info!(count = submitted.len(), workers = self.workers, "downloading ranked documents");

        let permits = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        for (rank, document) in submitted {
            let permits = Arc::clone(&permits);
            let http = self.http.clone();
            let dir = self.dir.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                download_one(&http, &dir, rank, document).await
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(error = %e, "download task aborted"),
            }
        }

        let saved = outcomes
            .iter()
            .filter(|o| matches!(o, DownloadOutcome::Saved { .. }))
            .count();
        info!(saved, failed = outcomes.len() - saved, "downloads finished");
        outcomes
    }
}

async fn download_one(
    http: &reqwest::Client,
    dir: &Path,
    rank: usize,
    mut document: DocumentResult,
) -> DownloadOutcome {
    info!(rank, description = %document.short_description(50), "downloading");
    match fetch_to_dir(http, dir, rank, &document).await {
        Ok(path) => {
            info!(rank, file = %path.display(), "file saved");
            document.local_path = Some(path);
            DownloadOutcome::Saved { rank, document }
        }
        Err(e) => {
            error!(rank, description = %document.description, error = %format!("{:#}", e), "download failed");
            DownloadOutcome::Failed {
                rank,
                document,
                reason: format!("{:#}", e),
            }
        }
    }
}

async fn fetch_to_dir(
    http: &reqwest::Client,
    dir: &Path,
    rank: usize,
    document: &DocumentResult,
) -> Result<PathBuf> {
    let url = document
        .download_url
        .as_deref()
        .context("document has no download URL")?;

    let mut response = http.get(url).send().await?.error_for_status()?;

    let name = resolve_filename(response.headers(), document);
    let path = dir.join(format!("{:02}_{}", rank, name));

    let mut file = tokio::fs::File::create(&path)
        .await
        .with_context(|| format!("Failed to create {}", path.display()))?;

    let written: Result<()> = async {
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
    .await;

    if let Err(e) = written {
        drop(file);
        let _ = tokio::fs::remove_file(&path).await;
        return Err(e);
    }
    Ok(path)
}

/// Pick a file name from the response headers, falling back to one built
/// from the document's fields.
pub fn resolve_filename(headers: &HeaderMap, document: &DocumentResult) -> String {
    let disposition = headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(filename_from_disposition);
    if let Some(name) = disposition {
        return name;
    }

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    synthesize_filename(document, extension_for(content_type))
}

/// Extract the file name from a `Content-Disposition` value.
///
/// Handles both `filename="x.pdf"` and `filename*=UTF-8''x%20y.pdf`; the
/// first match wins.
pub fn filename_from_disposition(header: &str) -> Option<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(r"(?i)filename\*?=(?:UTF-8'')?([^;]+)").expect("static regex")
    });

    let raw = re.captures(header)?.get(1)?.as_str();
    let raw = raw.trim_matches(|c: char| c == '"' || c == ' ');
    let decoded = percent_decode_str(raw).decode_utf8_lossy();
    let name = sanitize_filename(&decoded);
    (!name.trim().is_empty()).then_some(name)
}

pub fn extension_for(content_type: &str) -> &'static str {
    let content_type = content_type.to_lowercase();
    if content_type.contains("pdf") {
        ".pdf"
    } else if content_type.contains("zip") {
        ".zip"
    } else if content_type.contains("xml") {
        ".xml"
    } else {
        ".pdf"
    }
}

pub fn synthesize_filename(document: &DocumentResult, extension: &str) -> String {
    format!(
        "{}_{}_{}{}",
        truncate_chars(&sanitize_filename(&document.organization), ORGANIZATION_CHARS),
        truncate_chars(&sanitize_filename(&document.description), DESCRIPTION_CHARS),
        truncate_chars(&sanitize_filename(&document.document_kind), KIND_CHARS),
        extension
    )
}

/// Replace characters that are invalid in file names and cap the length,
/// both in characters and in UTF-8 bytes.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let capped = truncate_chars(&cleaned, MAX_FILENAME_CHARS);
    truncate_bytes(&capped, MAX_FILENAME_BYTES).to_string()
}

/// Longest prefix of `s` within `max` bytes that ends on a char boundary.
fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
