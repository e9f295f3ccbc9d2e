//! Integration tests against an in-process mock of the PNCP registry.
//!
//! The mock serves the search endpoint (paged by `tipos_documento`,
//! `pagina` and `tam_pagina`) and the per-document file endpoints. Ranking
//! uses a bag-of-words embedder so no model is downloaded.

use anyhow::Result;
use async_trait::async_trait;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use pncp_research::config::Config;
use pncp_research::download::{DownloadOutcome, Downloader};
use pncp_research::embedding::Embedder;
use pncp_research::error::ValidationError;
use pncp_research::models::{DocumentKind, RankedCandidate, SearchCriteria};
use pncp_research::pipeline::{MarketResearch, ResearchRequest};
use pncp_research::search::SearchClient;
use pncp_research::staging::{staged_documents, Stager};

// ─── Mock registry ──────────────────────────────────────────────────

#[derive(Default)]
struct Registry {
    items: HashMap<String, Vec<Value>>,
    failing_kinds: Vec<String>,
    /// `(kind, page)` pairs answered with a 500.
    failing_pages: Vec<(String, usize)>,
    failing_downloads: Vec<String>,
    download_delay_ms: u64,
    downloads_in_flight: AtomicUsize,
    peak_downloads: AtomicUsize,
    searches: Mutex<Vec<HashMap<String, String>>>,
}

impl Registry {
    fn with_items(mut self, kind: &str, items: Vec<Value>) -> Self {
        self.items.insert(kind.to_string(), items);
        self
    }

    fn searches_for(&self, kind: &str) -> usize {
        self.searches
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.get("tipos_documento").map(String::as_str) == Some(kind))
            .count()
    }

    fn search_count(&self) -> usize {
        self.searches.lock().unwrap().len()
    }
}

async fn search_handler(
    State(registry): State<Arc<Registry>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    registry.searches.lock().unwrap().push(params.clone());

    let kind = params.get("tipos_documento").cloned().unwrap_or_default();
    if registry.failing_kinds.contains(&kind) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let page: usize = params.get("pagina").and_then(|p| p.parse().ok()).unwrap_or(1);
    if registry.failing_pages.contains(&(kind.clone(), page)) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    let size: usize = params
        .get("tam_pagina")
        .and_then(|p| p.parse().ok())
        .unwrap_or(10);
    let all = registry.items.get(&kind).cloned().unwrap_or_default();
    let start = ((page - 1) * size).min(all.len());
    let end = (start + size).min(all.len());

    Json(json!({
        "items": all[start..end].to_vec(),
        "total": all.len(),
    }))
    .into_response()
}

async fn file_handler(State(registry): State<Arc<Registry>>, Path(path): Path<String>) -> Response {
    if registry
        .failing_downloads
        .iter()
        .any(|f| path.contains(f.as_str()))
    {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let now = registry.downloads_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    registry.peak_downloads.fetch_max(now, Ordering::SeqCst);
    if registry.download_delay_ms > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(registry.download_delay_ms)).await;
    }
    registry.downloads_in_flight.fetch_sub(1, Ordering::SeqCst);

    let name = path.replace('/', "-");
    (
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}.pdf\"", name),
            ),
        ],
        format!("%PDF-1.4 {}", path),
    )
        .into_response()
}

/// Serve `registry` on an ephemeral port and return its base URL.
async fn spawn_registry(registry: Registry) -> (String, Arc<Registry>) {
    let registry = Arc::new(registry);
    let app = Router::new()
        .route("/api/search/", get(search_handler))
        .route("/pncp-api/v1/{*path}", get(file_handler))
        .with_state(registry.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    (format!("http://{}", addr), registry)
}

fn ata_item(n: usize, description: &str) -> Value {
    json!({
        "document_type": "Ata de Registro de Preço",
        "orgao_nome": format!("Prefeitura {}", n),
        "description": description,
        "item_url": format!("/app/atas/{}", n),
        "orgao_cnpj": "12345678000199",
        "ano": 2024,
        "numero_sequencial_compra_ata": n,
        "numero_sequencial": 1,
    })
}

fn contrato_item(n: usize, description: &str) -> Value {
    json!({
        "document_type": "Contrato",
        "orgao_nome": format!("Secretaria {}", n),
        "description": description,
        "item_url": format!("/app/contratos/{}", n),
        "orgao_cnpj": "98765432000111",
        "ano": "2023",
        "numero_sequencial": n,
    })
}

/// `count` ranked ata candidates pointing at the mock's file endpoint.
fn ranked_atas(base: &str, count: usize) -> Vec<RankedCandidate> {
    let urls = pncp_research::parse::UrlBase {
        site_url: base.to_string(),
        api_url: format!("{}/pncp-api/v1", base),
    };
    (1..=count)
        .map(|n| {
            let item = ata_item(n, &format!("documento {}", n));
            let record = serde_json::from_value(item).unwrap();
            let document =
                pncp_research::parse::parse_record(&record, DocumentKind::Ata, &urls).unwrap();
            RankedCandidate {
                document,
                score: 1.0 - n as f32 / 10.0,
            }
        })
        .collect()
}

fn test_config(base: &str, tmp: &TempDir) -> Config {
    let config_content = format!(
        r#"
[registry]
search_url = "{base}/api/search/"
site_url = "{base}"
api_url = "{base}/pncp-api/v1"
page_delay_ms = 0

[download]
dir = "{downloads}"

[staging]
dir = "{staging}"
"#,
        base = base,
        downloads = tmp.path().join("downloads").display(),
        staging = tmp.path().join("staging").display(),
    );
    toml::from_str(&config_content).unwrap()
}

// ─── Test embedder ──────────────────────────────────────────────────

const VOCAB: [&str; 6] = ["limpeza", "urbana", "predial", "segurança", "patrimonial", "completa"];

struct WordCounter {
    calls: AtomicUsize,
}

impl WordCounter {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
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

// ─── Search ─────────────────────────────────────────────────────────

#[tokio::test]
async fn search_caps_each_kind_at_its_budget() {
    let tmp = TempDir::new().unwrap();
    let atas = (1..=15).map(|n| ata_item(n, "limpeza urbana")).collect();
    let contratos = (1..=5).map(|n| contrato_item(n, "limpeza urbana")).collect();
    let (base, registry) = spawn_registry(
        Registry::default()
            .with_items("ata", atas)
            .with_items("contrato", contratos),
    )
    .await;
    let config = test_config(&base, &tmp);
    let client = SearchClient::new(&config.registry).unwrap();

    let mut criteria = SearchCriteria::new("limpeza urbana");
    criteria.max_documents = 20;
    let results = client.search(&criteria).await.unwrap();

    let atas = results
        .iter()
        .filter(|d| d.document_kind.starts_with("Ata"))
        .count();
    let contratos = results
        .iter()
        .filter(|d| d.document_kind == "Contrato")
        .count();
    assert_eq!(atas, 10);
    assert_eq!(contratos, 5);

    // A full first page fills the ata budget; the short contrato page is last.
    assert_eq!(registry.searches_for("ata"), 1);
    assert_eq!(registry.searches_for("contrato"), 1);

    let first = &results[0];
    assert_eq!(first.view_url, format!("{}/app/atas/1", base));
    assert_eq!(
        first.download_url.as_deref(),
        Some(
            format!(
                "{}/pncp-api/v1/orgaos/12345678000199/compras/2024/1/atas/1/arquivos/1",
                base
            )
            .as_str()
        )
    );
}

#[tokio::test]
async fn search_stops_on_empty_page() {
    let tmp = TempDir::new().unwrap();
    let atas = (1..=10).map(|n| ata_item(n, "limpeza")).collect();
    let (base, registry) = spawn_registry(Registry::default().with_items("ata", atas)).await;
    let config = test_config(&base, &tmp);
    let client = SearchClient::new(&config.registry).unwrap();

    let mut criteria = SearchCriteria::new("limpeza");
    criteria.kinds = vec![DocumentKind::Ata];
    criteria.max_documents = 100;
    let results = client.search(&criteria).await.unwrap();

    assert_eq!(results.len(), 10);
    assert_eq!(registry.searches_for("ata"), 2);
}

#[tokio::test]
async fn rejected_items_do_not_consume_budget() {
    let tmp = TempDir::new().unwrap();
    let mut items = Vec::new();
    for n in 1..=10 {
        if n % 2 == 0 {
            let mut note = contrato_item(n, "empenho");
            note["document_type"] = json!("Nota de Empenho de Contrato");
            items.push(note);
        } else {
            items.push(contrato_item(n, "limpeza"));
        }
    }
    items.extend((11..=13).map(|n| contrato_item(n, "limpeza")));
    let (base, registry) = spawn_registry(Registry::default().with_items("contrato", items)).await;
    let config = test_config(&base, &tmp);
    let client = SearchClient::new(&config.registry).unwrap();

    let mut criteria = SearchCriteria::new("limpeza");
    criteria.kinds = vec![DocumentKind::Contrato];
    criteria.max_documents = 7;
    let results = client.search(&criteria).await.unwrap();

    // Page 1 yields 5 accepted items, page 2 (short) yields 2 before the
    // budget is reached.
    assert_eq!(results.len(), 7);
    assert!(results.iter().all(|d| d.document_kind == "Contrato"));
    assert_eq!(registry.searches_for("contrato"), 2);
}

#[tokio::test]
async fn failing_kind_keeps_other_kinds() {
    let tmp = TempDir::new().unwrap();
    let contratos = (1..=3).map(|n| contrato_item(n, "limpeza")).collect();
    let mut registry = Registry::default().with_items("contrato", contratos);
    registry.failing_kinds = vec!["ata".to_string()];
    let (base, registry) = spawn_registry(registry).await;
    let config = test_config(&base, &tmp);
    let client = SearchClient::new(&config.registry).unwrap();

    let results = client.search(&SearchCriteria::new("limpeza")).await.unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(registry.searches_for("ata"), 1);
}

#[tokio::test]
async fn later_page_failure_keeps_earlier_pages() {
    let tmp = TempDir::new().unwrap();
    let contratos = (1..=15).map(|n| contrato_item(n, "limpeza")).collect();
    let atas = (1..=3).map(|n| ata_item(n, "limpeza")).collect();
    let mut registry = Registry::default()
        .with_items("contrato", contratos)
        .with_items("ata", atas);
    registry.failing_pages = vec![("contrato".to_string(), 2)];
    let (base, registry) = spawn_registry(registry).await;
    let config = test_config(&base, &tmp);
    let client = SearchClient::new(&config.registry).unwrap();

    let results = client.search(&SearchCriteria::new("limpeza")).await.unwrap();

    let contratos: Vec<&str> = results
        .iter()
        .filter(|d| d.document_kind == "Contrato")
        .map(|d| d.organization.as_str())
        .collect();
    assert_eq!(contratos.len(), 10);
    assert_eq!(contratos[0], "Secretaria 1");
    assert_eq!(contratos[9], "Secretaria 10");
    assert_eq!(results.len() - contratos.len(), 3);
    assert_eq!(registry.searches_for("contrato"), 2);
}

#[tokio::test]
async fn invalid_filters_fail_before_any_request() {
    let tmp = TempDir::new().unwrap();
    let (base, registry) = spawn_registry(Registry::default()).await;
    let config = test_config(&base, &tmp);
    let client = SearchClient::new(&config.registry).unwrap();

    let mut criteria = SearchCriteria::new("limpeza");
    criteria.spheres = vec!["municipal".into(), "galactic".into()];
    let err = client.search(&criteria).await.unwrap_err();

    assert!(matches!(err, ValidationError::Spheres { .. }));
    assert_eq!(err.invalid_tokens(), ["galactic".to_string()]);
    assert_eq!(registry.search_count(), 0);
}

#[tokio::test]
async fn filters_are_encoded_in_the_request() {
    let tmp = TempDir::new().unwrap();
    let (base, registry) = spawn_registry(Registry::default()).await;
    let config = test_config(&base, &tmp);
    let client = SearchClient::new(&config.registry).unwrap();

    let mut criteria = SearchCriteria::new("limpeza");
    criteria.kinds = vec![DocumentKind::Ata];
    criteria.jurisdictions = vec!["sp".into(), "MG".into()];
    criteria.modalities = vec!["pregao_eletronico".into(), "8".into()];
    client.search(&criteria).await.unwrap();

    let searches = registry.searches.lock().unwrap();
    let params = &searches[0];
    assert_eq!(params["ufs"], "SP|MG");
    assert_eq!(params["modalidades"], "6|8");
    assert_eq!(params["status"], "vigente");
    assert_eq!(params["ordenacao"], "-data");
    assert!(!params.contains_key("esferas"));
}

// ─── Download + staging ─────────────────────────────────────────────

#[tokio::test]
async fn failed_download_is_skipped_and_survivors_keep_rank_order() {
    let tmp = TempDir::new().unwrap();
    let mut registry = Registry::default();
    registry.failing_downloads = vec!["compras/2024/3/".to_string()];
    let (base, _registry) = spawn_registry(registry).await;
    let config = test_config(&base, &tmp);

    let ranked = ranked_atas(&base, 5);

    let downloader = Downloader::new(&config.download).unwrap();
    let saved = downloader.download_all(&ranked).await;
    assert_eq!(saved.len(), 4);
    assert!(saved.iter().all(|d| d.local_path.as_ref().unwrap().exists()));

    let mut with_files = ranked.clone();
    for outcome in downloader.download_outcomes(&ranked).await {
        if let DownloadOutcome::Saved { rank, document } = outcome {
            with_files[rank - 1].document.local_path = document.local_path;
        }
    }

    let stager = Stager::new(&config.staging, &config.download);
    let staged = stager.stage(&with_files).unwrap();
    let slots: Vec<(String, String)> = staged
        .iter()
        .map(|s| (s.slot_name(), s.document.description.clone()))
        .collect();
    assert_eq!(
        slots,
        vec![
            ("ATA_1.pdf".to_string(), "documento 1".to_string()),
            ("ATA_2.pdf".to_string(), "documento 2".to_string()),
            ("ATA_3.pdf".to_string(), "documento 4".to_string()),
            ("ATA_4.pdf".to_string(), "documento 5".to_string()),
        ]
    );

    let content = std::fs::read_to_string(tmp.path().join("staging/ATA_3.pdf")).unwrap();
    assert!(content.contains("compras/2024/4/"));
}

#[tokio::test]
async fn downloads_never_exceed_the_worker_count() {
    let tmp = TempDir::new().unwrap();
    let registry = Registry {
        download_delay_ms: 200,
        ..Registry::default()
    };
    let (base, registry) = spawn_registry(registry).await;
    let mut config = test_config(&base, &tmp);
    config.download.workers = 3;

    let downloader = Downloader::new(&config.download).unwrap();
    let saved = downloader.download_all(&ranked_atas(&base, 7)).await;

    assert_eq!(saved.len(), 7);
    let peak = registry.peak_downloads.load(Ordering::SeqCst);
    assert!((2..=3).contains(&peak), "peak concurrent downloads: {}", peak);
    assert_eq!(registry.downloads_in_flight.load(Ordering::SeqCst), 0);
}

// ─── Full pipeline ──────────────────────────────────────────────────

#[tokio::test]
async fn research_ranks_downloads_and_stages() {
    let tmp = TempDir::new().unwrap();
    let atas = vec![
        ata_item(1, "limpeza urbana completa"),
        ata_item(2, "segurança patrimonial"),
        ata_item(3, "limpeza predial"),
        ata_item(4, ""),
    ];
    let mut note = contrato_item(2, "limpeza urbana");
    note["document_type"] = json!("Nota de Empenho de Contrato");
    let contratos = vec![contrato_item(1, "limpeza urbana"), note];
    let (base, _registry) = spawn_registry(
        Registry::default()
            .with_items("ata", atas)
            .with_items("contrato", contratos),
    )
    .await;
    let config = test_config(&base, &tmp);
    let embedder = WordCounter::new();
    let research = MarketResearch::with_embedder(config, embedder.clone()).unwrap();

    let mut request = ResearchRequest::new(["limpeza urbana"]);
    request.top_k = Some(3);
    let outcome = research.run(&request).await.unwrap();

    assert_eq!(outcome.found, 5);
    assert_eq!(outcome.downloaded, 3);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);

    let order: Vec<&str> = outcome
        .ranked
        .iter()
        .map(|c| c.document.description.as_str())
        .collect();
    assert_eq!(order, vec!["limpeza urbana", "limpeza urbana completa", "limpeza predial"]);

    let staging = tmp.path().join("staging");
    assert_eq!(
        outcome.ranked[0].document.local_path.as_deref(),
        Some(staging.join("CONTRATOS_1.pdf").as_path())
    );
    assert_eq!(
        outcome.ranked[2].document.local_path.as_deref(),
        Some(staging.join("ATA_2.pdf").as_path())
    );
    assert_eq!(outcome.staged_results().len(), 3);

    // Raw downloads are removed once staged.
    assert!(!tmp.path().join("downloads").exists());

    let files = staged_documents(&staging, 5).unwrap();
    let names: Vec<String> = files
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    assert_eq!(names, vec!["ATA_1.pdf", "ATA_2.pdf", "CONTRATOS_1.pdf"]);
}

#[tokio::test]
async fn research_keeps_downloads_when_asked() {
    let tmp = TempDir::new().unwrap();
    let (base, _registry) = spawn_registry(
        Registry::default().with_items("contrato", vec![contrato_item(1, "limpeza urbana")]),
    )
    .await;
    let config = test_config(&base, &tmp);
    let research = MarketResearch::with_embedder(config, WordCounter::new()).unwrap();

    let mut request = ResearchRequest::new(["limpeza"]);
    request.kinds = vec!["contrato".into()];
    request.cleanup = Some(false);
    let outcome = research.run(&request).await.unwrap();

    assert_eq!(outcome.staged.len(), 1);
    let downloads = tmp.path().join("downloads");
    assert_eq!(std::fs::read_dir(&downloads).unwrap().count(), 1);
}

#[tokio::test]
async fn empty_search_skips_the_model() {
    let tmp = TempDir::new().unwrap();
    let (base, registry) = spawn_registry(Registry::default()).await;
    let config = test_config(&base, &tmp);
    let embedder = WordCounter::new();
    let research = MarketResearch::with_embedder(config, embedder.clone()).unwrap();

    let outcome = research
        .run(&ResearchRequest::new(["limpeza"]))
        .await
        .unwrap();

    assert_eq!(outcome.found, 0);
    assert!(outcome.ranked.is_empty());
    assert!(outcome.staged.is_empty());
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    assert_eq!(registry.search_count(), 2);
}

#[tokio::test]
async fn research_rejects_invalid_request_without_searching() {
    let tmp = TempDir::new().unwrap();
    let (base, registry) = spawn_registry(Registry::default()).await;
    let config = test_config(&base, &tmp);
    let research = MarketResearch::with_embedder(config, WordCounter::new()).unwrap();

    let mut request = ResearchRequest::new(["limpeza"]);
    request.jurisdictions = vec!["ZZ".into()];
    let err = research.run(&request).await.unwrap_err();
    assert!(err.to_string().contains("ZZ"));

    let err = research
        .run(&ResearchRequest::new(["   "]))
        .await
        .unwrap_err();
    assert_eq!(
        err.downcast_ref::<ValidationError>(),
        Some(&ValidationError::MissingKeyword)
    );
    assert_eq!(registry.search_count(), 0);
}
