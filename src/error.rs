//! Typed errors callers may want to match on.
//!
//! Everything else in the crate propagates `anyhow::Error`.

use thiserror::Error;

/// A search filter contained tokens outside the fixed vocabularies.
///
/// Raised before any network request is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid jurisdictions: {invalid:?}. Use: {allowed}")]
    Jurisdictions { invalid: Vec<String>, allowed: String },

    #[error("invalid spheres: {invalid:?}. Use: {allowed}")]
    Spheres { invalid: Vec<String>, allowed: String },

    #[error("invalid modalities: {invalid:?}. Use: {allowed}")]
    Modalities { invalid: Vec<String>, allowed: String },

    #[error("no search keyword provided")]
    MissingKeyword,
}

impl ValidationError {
    /// The offending tokens, in input order.
    pub fn invalid_tokens(&self) -> &[String] {
        match self {
            ValidationError::Jurisdictions { invalid, .. }
            | ValidationError::Spheres { invalid, .. }
            | ValidationError::Modalities { invalid, .. } => invalid,
            ValidationError::MissingKeyword => &[],
        }
    }
}

/// Why the parser refused a registry item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("document type not accepted: {0}")]
    UnacceptedKind(String),

    #[error("commitment note (nota de empenho): {0}")]
    CommitmentNote(String),
}
