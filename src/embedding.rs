//! Sentence-embedding backends.
//!
//! Defines the [`Embedder`] trait used by the ranker and the
//! [`LocalEmbedder`] implementation, which runs models locally through
//! fastembed. Also provides [`cosine_similarity`].
//!
//! # Model selection
//!
//! The local backend is configured with an ordered preference list. On
//! first use it tries each model in turn and keeps the first one that
//! loads; multilingual models come first because registry descriptions are
//! written in Portuguese, with an English model as the last resort. The
//! loaded model lives inside the embedder and is reused by every later
//! call. If nothing in the list loads, embedding fails and ranking cannot
//! proceed.
//!
//! ```rust,no_run
//! # use pncp_research::config::EmbeddingConfig;
//! # use pncp_research::embedding::create_embedder;
//! let embedder = create_embedder(&EmbeddingConfig::default()).unwrap();
//! assert_eq!(embedder.model_name(), "not loaded");
//! ```

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::EmbeddingConfig;

/// Model names accepted in `embedding.models`.
pub const SUPPORTED_MODELS: [&str; 9] = [
    "paraphrase-multilingual-minilm-l12-v2",
    "paraphrase-multilingual-mpnet-base-v2",
    "multilingual-e5-small",
    "multilingual-e5-base",
    "multilingual-e5-large",
    "all-minilm-l6-v2",
    "bge-small-en-v1.5",
    "bge-base-en-v1.5",
    "nomic-embed-text-v1.5",
];

/// Turns texts into fixed-size vectors.
///
/// Implementations must return one vector per input text, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier of the model in use.
    fn model_name(&self) -> &str;

    /// Embed a batch of texts in a single call.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Prepare the model ahead of the first [`embed`](Self::embed) call.
    async fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}

/// Build the embedder described by `config`.
///
/// Nothing is loaded here; the model is resolved on the first
/// [`Embedder::embed`] call.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    #[cfg(feature = "local-embeddings-fastembed")]
    {
        Ok(Arc::new(LocalEmbedder::new(config)))
    }
    #[cfg(not(feature = "local-embeddings-fastembed"))]
    {
        let _ = config;
        bail!("Local embeddings require --features local-embeddings-fastembed")
    }
}

/// Whether `name` is a model the local backend knows how to load.
pub fn is_supported_model(name: &str) -> bool {
    SUPPORTED_MODELS.contains(&name)
}

// ============ Local Provider (fastembed) ============

#[cfg(feature = "local-embeddings-fastembed")]
pub use local::LocalEmbedder;

#[cfg(feature = "local-embeddings-fastembed")]
mod local {
    use super::*;
    use anyhow::anyhow;
    use std::sync::Mutex;
    use tokio::sync::OnceCell;
    use tracing::{info, warn};

    struct LoadedModel {
        name: String,
        engine: Arc<Mutex<fastembed::TextEmbedding>>,
    }

    /// Embedder backed by a locally executed ONNX model.
    ///
    /// Models are downloaded from Hugging Face on first use and cached.
    /// Inference runs on the blocking thread pool.
    pub struct LocalEmbedder {
        preferences: Vec<String>,
        batch_size: usize,
        show_download_progress: bool,
        model: OnceCell<LoadedModel>,
    }

    impl LocalEmbedder {
        pub fn new(config: &EmbeddingConfig) -> Self {
            Self {
                preferences: config.models.clone(),
                batch_size: config.batch_size,
                show_download_progress: config.show_download_progress,
                model: OnceCell::new(),
            }
        }

        async fn loaded(&self) -> Result<&LoadedModel> {
            self.model
                .get_or_try_init(|| {
                    let preferences = self.preferences.clone();
                    let show = self.show_download_progress;
                    async move {
                        tokio::task::spawn_blocking(move || load_first_available(&preferences, show))
                            .await?
                    }
                })
                .await
        }
    }

    #[async_trait]
    impl Embedder for LocalEmbedder {
        fn model_name(&self) -> &str {
            self.model
                .get()
                .map(|m| m.name.as_str())
                .unwrap_or("not loaded")
        }

        async fn warm_up(&self) -> Result<()> {
            self.loaded().await?;
            Ok(())
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let loaded = self.loaded().await?;
            let engine = Arc::clone(&loaded.engine);
            let batch_size = self.batch_size;
            let texts = texts.to_vec();

            tokio::task::spawn_blocking(move || {
                let mut model = engine
                    .lock()
                    .map_err(|_| anyhow!("embedding model lock poisoned"))?;
                model
                    .embed(texts, Some(batch_size))
                    .map_err(|e| anyhow!("Local embedding failed: {}", e))
            })
            .await?
        }
    }

    fn load_first_available(preferences: &[String], show_progress: bool) -> Result<LoadedModel> {
        for name in preferences {
            let Some(model) = config_to_fastembed_model(name) else {
                warn!(model = %name, "unknown embedding model, skipping");
                continue;
            };
            info!(model = %name, "loading embedding model");
            let options =
                fastembed::InitOptions::new(model).with_show_download_progress(show_progress);
            match fastembed::TextEmbedding::try_new(options) {
                Ok(engine) => {
                    info!(model = %name, "embedding model loaded");
                    return Ok(LoadedModel {
                        name: name.clone(),
                        engine: Arc::new(Mutex::new(engine)),
                    });
                }
                Err(e) => warn!(model = %name, error = %e, "failed to load embedding model"),
            }
        }
        bail!(
            "Could not load any embedding model (tried: {})",
            preferences.join(", ")
        )
    }

    fn config_to_fastembed_model(name: &str) -> Option<fastembed::EmbeddingModel> {
        use fastembed::EmbeddingModel;
        match name {
            "paraphrase-multilingual-minilm-l12-v2" => Some(EmbeddingModel::ParaphraseMLMiniLML12V2),
            "paraphrase-multilingual-mpnet-base-v2" => Some(EmbeddingModel::ParaphraseMLMpnetBaseV2),
            "multilingual-e5-small" => Some(EmbeddingModel::MultilingualE5Small),
            "multilingual-e5-base" => Some(EmbeddingModel::MultilingualE5Base),
            "multilingual-e5-large" => Some(EmbeddingModel::MultilingualE5Large),
            "all-minilm-l6-v2" => Some(EmbeddingModel::AllMiniLML6V2),
            "bge-small-en-v1.5" => Some(EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" => Some(EmbeddingModel::BGEBaseENV15),
            "nomic-embed-text-v1.5" => Some(EmbeddingModel::NomicEmbedTextV15),
            _ => None,
        }
    }

}

/// Cosine similarity of two vectors, in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-norm vector.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (dot, norm_a, norm_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, na, nb), (x, y)| {
            (dot + x * y, na + x * x, nb + y * y)
        });

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}
