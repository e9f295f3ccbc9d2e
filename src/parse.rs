//! Turns registry search items into [`DocumentResult`]s.
//!
//! The search endpoint returns loosely-typed JSON with a dozen or more keys
//! per item. [`DocumentRecord`] keeps only the fields the pipeline reads;
//! everything else is discarded at deserialization time.

use serde::Deserialize;
use serde_json::Value;

use crate::error::Rejection;
use crate::models::{DocumentKind, DocumentResult, NOT_AVAILABLE, NOT_DETERMINED, NOT_INFORMED};

/// One item of the search response `items` array.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocumentRecord {
    #[serde(default)]
    pub document_type: Option<String>,
    #[serde(default)]
    pub orgao_nome: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub item_url: Option<String>,
    #[serde(default)]
    pub orgao_cnpj: Option<Value>,
    #[serde(default)]
    pub ano: Option<Value>,
    #[serde(default)]
    pub numero_sequencial_compra_ata: Option<Value>,
    #[serde(default)]
    pub numero_sequencial: Option<Value>,
}

/// Hosts used to build view and download URLs.
#[derive(Debug, Clone)]
pub struct UrlBase {
    pub site_url: String,
    pub api_url: String,
}

impl Default for UrlBase {
    fn default() -> Self {
        Self {
            site_url: "https://pncp.gov.br".to_string(),
            api_url: "https://pncp.gov.br/pncp-api/v1".to_string(),
        }
    }
}

/// Parse one record fetched while searching for `kind`.
///
/// A record is rejected when its type tag names neither an ata nor a
/// contrato, or when it is a commitment note. The commitment-note check
/// wins over a matching kind ("nota de empenho de contrato" is rejected).
pub fn parse_record(
    record: &DocumentRecord,
    kind: DocumentKind,
    base: &UrlBase,
) -> Result<DocumentResult, Rejection> {
    let raw_type = record.document_type.clone().unwrap_or_default();
    let tag = raw_type.to_lowercase();

    if !DocumentKind::ALL.iter().any(|k| tag.contains(k.as_str())) {
        return Err(Rejection::UnacceptedKind(raw_type));
    }
    if tag.contains("empenho") || tag.contains("nota") {
        return Err(Rejection::CommitmentNote(raw_type));
    }

    let view_url = match record.item_url.as_deref() {
        Some(path) if !path.is_empty() => format!("{}{}", base.site_url, path),
        _ => NOT_AVAILABLE.to_string(),
    };

    Ok(DocumentResult {
        organization: record
            .orgao_nome
            .clone()
            .unwrap_or_else(|| NOT_DETERMINED.to_string()),
        description: record
            .description
            .clone()
            .unwrap_or_else(|| NOT_INFORMED.to_string()),
        document_kind: if raw_type.is_empty() {
            NOT_INFORMED.to_string()
        } else {
            raw_type
        },
        view_url,
        download_url: download_url(record, kind, base),
        local_path: None,
        similarity: None,
    })
}

/// Build the file endpoint for a record, or `None` when any identifier the
/// kind needs is missing.
pub fn download_url(record: &DocumentRecord, kind: DocumentKind, base: &UrlBase) -> Option<String> {
    let cnpj = identifier(&record.orgao_cnpj)?;
    let year = identifier(&record.ano)?;

    match kind {
        DocumentKind::Ata => {
            let purchase_seq = identifier(&record.numero_sequencial_compra_ata)?;
            let ata_seq = identifier(&record.numero_sequencial)?;
            Some(format!(
                "{}/orgaos/{}/compras/{}/{}/atas/{}/arquivos/1",
                base.api_url, cnpj, year, purchase_seq, ata_seq
            ))
        }
        DocumentKind::Contrato => {
            let seq = identifier(&record.numero_sequencial)?;
            Some(format!(
                "{}/orgaos/{}/contratos/{}/{}/arquivos/1",
                base.api_url, cnpj, year, seq
            ))
        }
    }
}

/// Render an identifier field. Empty strings, zero, `false` and `null`
/// count as absent.
fn identifier(value: &Option<Value>) -> Option<String> {
    match value.as_ref()? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => {
            let zero = n.as_f64().map(|f| f == 0.0).unwrap_or(false);
            (!zero).then(|| n.to_string())
        }
        _ => None,
    }
}
