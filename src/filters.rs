//! Validation and encoding of the registry's jurisdiction, sphere and
//! modality filters.
//!
//! The registry accepts several values per filter joined with `|`, meaning
//! "any of". Spheres and modalities may be given by name
//! (`municipal`, `pregao_eletronico`) or by code (`M`, `6`).
//!
//! [`validate`] and the `encode_*` functions share the same tables, so any
//! token that passes validation encodes to a code. Encoding silently skips
//! unknown tokens; callers validate first.

use crate::error::ValidationError;

/// The 27 federative units.
pub const STATES: [&str; 27] = [
    "AC", "AL", "AP", "AM", "BA", "CE", "DF", "ES", "GO", "MA", "MT", "MS", "MG", "PA", "PB", "PR",
    "PE", "PI", "RJ", "RN", "RS", "RO", "RR", "SC", "SP", "SE", "TO",
];

/// Government levels: name → code.
pub const SPHERES: [(&str, &str); 4] = [
    ("distrital", "D"),
    ("estadual", "E"),
    ("federal", "F"),
    ("municipal", "M"),
];

/// Procurement modalities: name → code.
pub const MODALITIES: [(&str, &str); 10] = [
    ("concorrencia_eletronica", "4"),
    ("concorrencia_presencial", "7"),
    ("credenciamento", "12"),
    ("dispensa", "8"),
    ("inexigibilidade", "9"),
    ("leilao_eletronico", "1"),
    ("leilao_presencial", "13"),
    ("pre_qualificacao", "11"),
    ("pregao_eletronico", "6"),
    ("pregao_presencial", "5"),
];

/// Check every filter token against the fixed vocabularies.
///
/// Empty slices are always valid. The first failing filter (jurisdictions,
/// then spheres, then modalities) is reported with all of its invalid
/// tokens.
pub fn validate(
    jurisdictions: &[String],
    spheres: &[String],
    modalities: &[String],
) -> Result<(), ValidationError> {
    let invalid: Vec<String> = jurisdictions
        .iter()
        .filter(|uf| !is_state(uf))
        .cloned()
        .collect();
    if !invalid.is_empty() {
        return Err(ValidationError::Jurisdictions {
            invalid,
            allowed: STATES.join(", "),
        });
    }

    let invalid: Vec<String> = spheres
        .iter()
        .filter(|s| sphere_code(s).is_none())
        .cloned()
        .collect();
    if !invalid.is_empty() {
        return Err(ValidationError::Spheres {
            invalid,
            allowed: vocabulary(&SPHERES),
        });
    }

    let invalid: Vec<String> = modalities
        .iter()
        .filter(|m| modality_code(m).is_none())
        .cloned()
        .collect();
    if !invalid.is_empty() {
        return Err(ValidationError::Modalities {
            invalid,
            allowed: vocabulary(&MODALITIES),
        });
    }

    Ok(())
}

/// Uppercase and pipe-join, without lookup.
pub fn encode_jurisdictions(jurisdictions: &[String]) -> String {
    jurisdictions
        .iter()
        .map(|uf| uf.to_uppercase())
        .collect::<Vec<_>>()
        .join("|")
}

pub fn encode_spheres(spheres: &[String]) -> String {
    spheres
        .iter()
        .filter_map(|s| sphere_code(s))
        .collect::<Vec<_>>()
        .join("|")
}

pub fn encode_modalities(modalities: &[String]) -> String {
    modalities
        .iter()
        .filter_map(|m| modality_code(m))
        .collect::<Vec<_>>()
        .join("|")
}

fn is_state(token: &str) -> bool {
    let upper = token.to_uppercase();
    STATES.contains(&upper.as_str())
}

/// Names match case-insensitively, codes too (`m` → `M`).
fn sphere_code(token: &str) -> Option<&'static str> {
    let lower = token.to_lowercase();
    let upper = token.to_uppercase();
    SPHERES
        .iter()
        .find(|(name, code)| *name == lower || *code == upper)
        .map(|(_, code)| *code)
}

/// Names match case-insensitively; numeric codes match exactly.
fn modality_code(token: &str) -> Option<&'static str> {
    let lower = token.to_lowercase();
    MODALITIES
        .iter()
        .find(|(name, code)| *name == lower || *code == token)
        .map(|(_, code)| *code)
}

fn vocabulary(table: &[(&str, &str)]) -> String {
    let names: Vec<&str> = table.iter().map(|(name, _)| *name).collect();
    let codes: Vec<&str> = table.iter().map(|(_, code)| *code).collect();
    format!("{} or {}", names.join(", "), codes.join(", "))
}
