//! Paginated search against the PNCP registry.
//!
//! Each requested kind gets an equal share of the document budget and is
//! crawled page by page until one of three things happens:
//!
//! 1. a page comes back empty,
//! 2. the kind's budget is filled,
//! 3. a page is shorter than the requested page size (last page).
//!
//! A fixed pause separates consecutive page requests. A failed request
//! ends the crawl for that kind only; the other kinds still run and the
//! results gathered so far are kept. Nothing is retried.

use anyhow::Result;
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::RegistryConfig;
use crate::error::ValidationError;
use crate::filters;
use crate::models::{DocumentKind, DocumentResult, SearchCriteria};
use crate::parse::{parse_record, DocumentRecord, UrlBase};

/// Body of a search response. Unknown keys are ignored.
#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    items: Vec<Value>,
    #[serde(default)]
    total: u64,
}

/// HTTP client for the registry's search endpoint.
///
/// Construct once and reuse; the underlying connection pool is shared by
/// every search made through it.
pub struct SearchClient {
    http: reqwest::Client,
    registry: RegistryConfig,
    urls: UrlBase,
}

impl SearchClient {
    pub fn new(registry: &RegistryConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(registry.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            registry: registry.clone(),
            urls: UrlBase {
                site_url: registry.site_url.trim_end_matches('/').to_string(),
                api_url: registry.api_url.trim_end_matches('/').to_string(),
            },
        })
    }

    /// Crawl the registry for every kind in `criteria`.
    ///
    /// Only filter validation can fail; network trouble shortens the
    /// result instead.
    pub async fn search(
        &self,
        criteria: &SearchCriteria,
    ) -> Result<Vec<DocumentResult>, ValidationError> {
        filters::validate(
            &criteria.jurisdictions,
            &criteria.spheres,
            &criteria.modalities,
        )?;

        let budget = criteria.per_kind_budget();
        let mut all = Vec::new();

        for &kind in &criteria.kinds {
            info!(
                query = %criteria.query,
                kind = %kind,
                budget,
                ordering = criteria.ordering.as_param(),
                "searching registry"
            );
            if !criteria.jurisdictions.is_empty()
                || !criteria.spheres.is_empty()
                || !criteria.modalities.is_empty()
            {
                info!(
                    jurisdictions = ?criteria.jurisdictions,
                    spheres = ?criteria.spheres,
                    modalities = ?criteria.modalities,
                    "filters applied"
                );
            }

            let found = self.search_kind(criteria, kind, budget).await;
            info!(kind = %kind, collected = found.len(), "kind finished");
            all.extend(found);
        }

        info!(total = all.len(), "search finished");
        Ok(all)
    }

    async fn search_kind(
        &self,
        criteria: &SearchCriteria,
        kind: DocumentKind,
        budget: usize,
    ) -> Vec<DocumentResult> {
        let page_size = criteria.page_size.max(1);
        let delay = Duration::from_millis(self.registry.page_delay_ms);
        let mut collected: Vec<DocumentResult> = Vec::new();
        let mut page = 1usize;

        while collected.len() < budget {
            let params = self.query_params(criteria, kind, page);
            debug!(?params, "search request parameters");

            let body = match self.fetch_page(&params).await {
                Ok(body) => body,
                Err(e) => {
                    error!(kind = %kind, page, error = %e, "search request failed, stopping kind");
                    break;
                }
            };

            if page == 1 {
                let estimated_pages = (body.total as usize).div_ceil(page_size);
                info!(kind = %kind, available = body.total, estimated_pages, "first page received");
                let tags: BTreeSet<String> = body
                    .items
                    .iter()
                    .take(5)
                    .map(|item| {
                        item.get("document_type")
                            .and_then(Value::as_str)
                            .unwrap_or("N/D")
                            .to_string()
                    })
                    .collect();
                if !tags.is_empty() {
                    info!(kind = %kind, types = ?tags, "document types returned by registry");
                }
            }

            if body.items.is_empty() {
                info!(kind = %kind, page, "empty page, stopping kind");
                break;
            }

            let mut processed = 0usize;
            let mut accepted = 0usize;
            for item in &body.items {
                if collected.len() >= budget {
                    break;
                }
                processed += 1;
                match serde_json::from_value::<DocumentRecord>(item.clone()) {
                    Ok(record) => match parse_record(&record, kind, &self.urls) {
                        Ok(doc) => {
                            collected.push(doc);
                            accepted += 1;
                        }
                        Err(reason) => debug!(%reason, "item skipped"),
                    },
                    Err(e) => debug!(error = %e, "malformed item skipped"),
                }
            }
            info!(
                kind = %kind,
                page,
                items = body.items.len(),
                processed,
                accepted,
                filtered = processed - accepted,
                "page processed"
            );

            if body.items.len() < page_size {
                info!(kind = %kind, page, "short page, last page reached");
                break;
            }

            page += 1;
            tokio::time::sleep(delay).await;
        }

        if collected.is_empty() {
            warn!(kind = %kind, "no documents collected");
        }
        collected
    }

    async fn fetch_page(&self, params: &[(&'static str, String)]) -> Result<SearchPage> {
        let page = self
            .http
            .get(&self.registry.search_url)
            .query(params)
            .send()
            .await?
            .error_for_status()?
            .json::<SearchPage>()
            .await?;
        Ok(page)
    }

    /// Query string for one page. Optional filters are only sent when set.
    pub fn query_params(
        &self,
        criteria: &SearchCriteria,
        kind: DocumentKind,
        page: usize,
    ) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("q", criteria.query.clone()),
            ("tipos_documento", kind.as_str().to_string()),
            ("ordenacao", criteria.ordering.as_param().to_string()),
            ("pagina", page.to_string()),
            ("tam_pagina", criteria.page_size.to_string()),
            ("status", self.registry.status.clone()),
        ];
        if !criteria.jurisdictions.is_empty() {
            params.push(("ufs", filters::encode_jurisdictions(&criteria.jurisdictions)));
        }
        if !criteria.spheres.is_empty() {
            params.push(("esferas", filters::encode_spheres(&criteria.spheres)));
        }
        if !criteria.modalities.is_empty() {
            params.push(("modalidades", filters::encode_modalities(&criteria.modalities)));
        }
        params
    }

    /// The first-page request URL for each kind, without touching the
    /// network. Filters are validated first.
    pub fn preview_urls(&self, criteria: &SearchCriteria) -> Result<Vec<(DocumentKind, Url)>> {
        filters::validate(
            &criteria.jurisdictions,
            &criteria.spheres,
            &criteria.modalities,
        )?;
        criteria
            .kinds
            .iter()
            .map(|&kind| -> Result<(DocumentKind, Url)> {
                let params = self.query_params(criteria, kind, 1);
                let url = Url::parse_with_params(&self.registry.search_url, &params)?;
                Ok((kind, url))
            })
            .collect()
    }
}
