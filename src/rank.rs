//! Similarity ranking of search hits against the research text.
//!
//! Only the description of each hit is embedded. Hits without a usable
//! description are skipped before the model is touched, so a search that
//! returns nothing rankable never loads a model.

use anyhow::{bail, Result};
use tracing::{info, warn};

use crate::embedding::{cosine_similarity, Embedder};
use crate::models::{DocumentResult, RankedCandidate};

/// Rank `candidates` by similarity to `query` and keep the best `top_k`.
///
/// The query and every usable description are embedded in one batch.
/// Equal scores keep their input order. The result may be shorter than
/// `top_k`; it is never padded.
pub async fn rank(
    embedder: &dyn Embedder,
    candidates: Vec<DocumentResult>,
    query: &str,
    top_k: usize,
) -> Result<Vec<RankedCandidate>> {
    let total = candidates.len();
    let (valid, skipped): (Vec<DocumentResult>, Vec<DocumentResult>) = candidates
        .into_iter()
        .partition(DocumentResult::has_usable_description);

    for doc in &skipped {
        info!(organization = %doc.organization, "skipping document without description");
    }

    if valid.is_empty() {
        warn!(candidates = total, "no document with a usable description to rank");
        return Ok(Vec::new());
    }

    info!(
        valid = valid.len(),
        skipped = skipped.len(),
        "computing description similarity"
    );

    let mut texts = Vec::with_capacity(valid.len() + 1);
    texts.push(query.to_string());
    texts.extend(valid.iter().map(|d| d.description.trim().to_string()));

    let embeddings = embedder.embed(&texts).await?;
    if embeddings.len() != texts.len() {
        bail!(
            "Embedding model returned {} vectors for {} texts",
            embeddings.len(),
            texts.len()
        );
    }

    let (query_vec, doc_vecs) = embeddings.split_at(1);
    let mut ranked: Vec<RankedCandidate> = valid
        .into_iter()
        .zip(doc_vecs)
        .map(|(mut document, vec)| {
            let score = cosine_similarity(&query_vec[0], vec);
            document.similarity = Some(score);
            RankedCandidate { document, score }
        })
        .collect();

    // sort_by is stable
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked.truncate(top_k);

    info!(model = embedder.model_name(), kept = ranked.len(), query, "ranking finished");
    for (i, c) in ranked.iter().enumerate() {
        info!(
            rank = i + 1,
            organization = %c.document.organization,
            description = %c.document.short_description(60),
            score = %format!("{:.4}", c.score),
            "ranked document"
        );
    }

    Ok(ranked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const VOCAB: [&str; 6] = ["limpeza", "urbana", "predial", "segurança", "patrimonial", "completa"];

    /// Bag-of-words over a tiny vocabulary.
    struct WordCounter {
        calls: AtomicUsize,
    }

    impl WordCounter {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for WordCounter {
        fn model_name(&self) -> &str {
            "word-counter"
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| {
                    let lower = t.to_lowercase();
                    VOCAB
                        .iter()
                        .map(|w| lower.split_whitespace().filter(|tok| tok == w).count() as f32)
                        .collect()
                })
                .collect())
        }
    }

    fn doc(description: &str) -> DocumentResult {
        DocumentResult {
            organization: "Prefeitura".to_string(),
            description: description.to_string(),
            document_kind: "Ata de Registro de Preço".to_string(),
            view_url: "https://pncp.gov.br/app/atas/1".to_string(),
            download_url: None,
            local_path: None,
            similarity: None,
        }
    }

    #[tokio::test]
    async fn ranks_by_description_and_skips_empty() {
        let embedder = WordCounter::new();
        let candidates = vec![
            doc("limpeza predial"),
            doc("segurança patrimonial"),
            doc("limpeza urbana completa"),
            doc(""),
        ];
        let ranked = rank(&embedder, candidates.clone(), "limpeza urbana", 2)
            .await
            .unwrap();
        let descriptions: Vec<&str> = ranked
            .iter()
            .map(|c| c.document.description.as_str())
            .collect();
        assert_eq!(descriptions, vec!["limpeza urbana completa", "limpeza predial"]);
        assert_eq!(ranked[0].document.similarity, Some(ranked[0].score));

        let all = rank(&embedder, candidates, "limpeza urbana", 10).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].document.description, "segurança patrimonial");
        assert!(all[0].score > all[1].score && all[1].score > all[2].score);
    }

    #[tokio::test]
    async fn input_order_does_not_change_top_k() {
        let embedder = WordCounter::new();
        let forward = vec![
            doc("limpeza predial"),
            doc("segurança patrimonial"),
            doc("limpeza urbana completa"),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();

        let a = rank(&embedder, forward, "limpeza urbana", 2).await.unwrap();
        let b = rank(&embedder, reversed, "limpeza urbana", 2).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn ties_keep_input_order() {
        let embedder = WordCounter::new();
        let mut first = doc("limpeza predial");
        first.organization = "first".to_string();
        let mut second = doc("limpeza predial");
        second.organization = "second".to_string();
        let ranked = rank(&embedder, vec![first, second], "limpeza", 2).await.unwrap();
        assert_eq!(ranked[0].document.organization, "first");
        assert_eq!(ranked[1].document.organization, "second");
    }

    #[tokio::test]
    async fn nothing_rankable_skips_the_model() {
        let embedder = WordCounter::new();
        let candidates = vec![doc("   "), doc(crate::models::NOT_INFORMED)];
        let ranked = rank(&embedder, candidates, "limpeza", 5).await.unwrap();
        assert!(ranked.is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn one_batched_embedding_call() {
        let embedder = WordCounter::new();
        let candidates = vec![doc("limpeza"), doc("urbana"), doc("predial")];
        rank(&embedder, candidates, "limpeza", 1).await.unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }
}
