//! Staging of downloaded documents into fixed-name slots.
//!
//! The extraction step that follows the pipeline reads files named
//! `ATA_{n}.pdf` and `CONTRATOS_{n}.pdf` from the staging directory, where
//! `n` is the 1-based rank of the document among those of its kind.
//!
//! Every run first deletes slots `1..=max_slots` of both kinds, so a run
//! that stages fewer documents than the previous one leaves no stale
//! files behind. The directory is assumed to have a single writer; two
//! concurrent runs against the same staging directory are not supported.

use anyhow::{Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::config::{DownloadConfig, StagingConfig};
use crate::models::{DocumentResult, RankedCandidate};

/// Slot family a document is staged under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Bucket {
    Ata,
    Contratos,
}

impl Bucket {
    pub const ALL: [Bucket; 2] = [Bucket::Ata, Bucket::Contratos];

    pub fn prefix(&self) -> &'static str {
        match self {
            Bucket::Ata => "ATA",
            Bucket::Contratos => "CONTRATOS",
        }
    }

    /// Classify by the registry's free-text type tag.
    ///
    /// Tags naming neither kind return `None` and are not staged. The match
    /// is a plain substring test checked for `ata` first, so any tag that
    /// contains those letters lands in ATA, including "Contratação ...".
    pub fn classify(kind_tag: &str) -> Option<Bucket> {
        let tag = kind_tag.to_lowercase();
        if tag.contains("ata") {
            Some(Bucket::Ata)
        } else if tag.contains("contrato") {
            Some(Bucket::Contratos)
        } else {
            None
        }
    }

    pub fn slot_name(&self, n: usize) -> String {
        format!("{}_{}.pdf", self.prefix(), n)
    }

    /// Parse `ATA_3.pdf` back into `(Ata, 3)`.
    fn parse_slot(file_name: &str) -> Option<(Bucket, usize)> {
        let stem = file_name.strip_suffix(".pdf")?;
        let (prefix, n) = stem.rsplit_once('_')?;
        let bucket = Bucket::ALL.into_iter().find(|b| b.prefix() == prefix)?;
        let n = n.parse().ok()?;
        Some((bucket, n))
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// A document copied into a staging slot.
#[derive(Debug, Clone)]
pub struct StagedDocument {
    /// 1-based position in the ranked input.
    pub rank: usize,
    pub bucket: Bucket,
    /// 1-based position within the bucket.
    pub slot: usize,
    pub score: f32,
    /// The ranked document with `local_path` pointing at the staged copy.
    pub document: DocumentResult,
}

impl StagedDocument {
    pub fn slot_name(&self) -> String {
        self.bucket.slot_name(self.slot)
    }
}

/// Places downloads into the staging slots and clears the raw cache.
pub struct Stager {
    dir: PathBuf,
    download_dir: PathBuf,
    max_slots: usize,
}

impl Stager {
    pub fn new(staging: &StagingConfig, download: &DownloadConfig) -> Self {
        Self {
            dir: staging.dir.clone(),
            download_dir: download.dir.clone(),
            max_slots: staging.max_slots,
        }
    }

    /// Remove every numbered slot up to `max_slots`, whatever the last run
    /// actually used. Individual failures are logged.
    pub fn clear_slots(&self) -> usize {
        let mut removed = 0;
        for bucket in Bucket::ALL {
            for n in 1..=self.max_slots {
                let name = bucket.slot_name(n);
                let path = self.dir.join(&name);
                if !path.exists() {
                    continue;
                }
                match std::fs::remove_file(&path) {
                    Ok(()) => {
                        removed += 1;
                        info!(file = %name, "removed stale slot");
                    }
                    Err(e) => error!(file = %name, error = %e, "failed to remove stale slot"),
                }
            }
        }
        removed
    }

    /// Copy downloaded, ranked documents into their slots.
    ///
    /// `ranked` must be in rank order; candidates without a local file are
    /// ignored. Slot numbers follow rank order within each bucket.
    pub fn stage(&self, ranked: &[RankedCandidate]) -> Result<Vec<StagedDocument>> {
        std::fs::create_dir_all(&self.dir).with_context(|| {
            format!("Failed to create staging directory: {}", self.dir.display())
        })?;

        self.clear_slots();

        let mut atas = Vec::new();
        let mut contratos = Vec::new();
        for (i, candidate) in ranked.iter().enumerate() {
            let Some(source) = candidate.document.local_path.as_deref() else {
                continue;
            };
            if !source.exists() {
                continue;
            }
            match Bucket::classify(&candidate.document.document_kind) {
                Some(Bucket::Ata) => atas.push((i + 1, candidate)),
                Some(Bucket::Contratos) => contratos.push((i + 1, candidate)),
                None => warn!(
                    description = %candidate.document.short_description(40),
                    kind = %candidate.document.document_kind,
                    "unclassified document type, not staged"
                ),
            }
        }

        let mut staged = Vec::new();
        for (bucket, members) in [(Bucket::Ata, atas), (Bucket::Contratos, contratos)] {
            for (i, (rank, candidate)) in members.into_iter().enumerate() {
                let slot = i + 1;
                if let Some(doc) = self.copy_into_slot(rank, bucket, slot, candidate) {
                    staged.push(doc);
                }
            }
        }

        for bucket in Bucket::ALL {
            let count = staged.iter().filter(|s| s.bucket == bucket).count();
            info!(bucket = %bucket, count, "staged");
        }
        info!(total = staged.len(), dir = %self.dir.display(), "staging finished");
        Ok(staged)
    }

    fn copy_into_slot(
        &self,
        rank: usize,
        bucket: Bucket,
        slot: usize,
        candidate: &RankedCandidate,
    ) -> Option<StagedDocument> {
        let source = candidate.document.local_path.as_deref()?;
        let name = bucket.slot_name(slot);
        let dest = self.dir.join(&name);

        if let Err(e) = std::fs::copy(source, &dest) {
            error!(slot = %name, error = %e, "failed to copy into slot");
            return None;
        }

        let document = &candidate.document;
        info!(
            slot = %name,
            organization = %document.organization,
            description = %document.short_description(40),
            score = %format!("{:.4}", candidate.score),
            view_url = %document.view_url,
            "document staged"
        );
        match &document.download_url {
            Some(url) => info!(slot = %name, download_url = %url, "download source"),
            None => warn!(slot = %name, "download URL not available"),
        }

        let mut document = document.clone();
        document.local_path = Some(dest);
        Some(StagedDocument {
            rank,
            bucket,
            slot,
            score: candidate.score,
            document,
        })
    }

    /// Delete the raw download directory. Failures are logged, not raised.
    pub fn cleanup(&self) -> bool {
        if !self.download_dir.exists() {
            return true;
        }
        match std::fs::remove_dir_all(&self.download_dir) {
            Ok(()) => {
                info!(dir = %self.download_dir.display(), "download directory removed");
                true
            }
            Err(e) => {
                error!(dir = %self.download_dir.display(), error = %e, "failed to remove download directory");
                false
            }
        }
    }
}

/// Staged PDFs the extraction step should read, at most `limit`.
///
/// Slot files come first (ATA before CONTRATOS, then by number); other
/// PDFs follow in name order. A missing directory yields an empty list,
/// which callers treat as "market research found nothing usable".
pub fn staged_documents(dir: &Path, limit: usize) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files: Vec<(Option<(Bucket, usize)>, String, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read staging directory: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.to_lowercase().ends_with(".pdf") {
            continue;
        }
        files.push((Bucket::parse_slot(&name), name, path));
    }

    // Slot files sort before the rest.
    files.sort_by(|a, b| match (&a.0, &b.0) {
        (Some(x), Some(y)) => x.cmp(y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.1.cmp(&b.1),
    });

    Ok(files
        .into_iter()
        .take(limit)
        .map(|(_, _, path)| path)
        .collect())
}
