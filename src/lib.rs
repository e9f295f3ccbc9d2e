//! # PNCP Research
//!
//! Market research over Brazil's National Public Procurement Portal (PNCP).
//!
//! Given the keywords and free-text description of a contracting project,
//! the crate crawls the registry's search API for price-registration
//! records (*atas*) and contracts, ranks the hits by semantic similarity to
//! the description, downloads the best ones concurrently and stages them
//! under fixed file names for a downstream extraction step.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌────────────┐   ┌──────────┐
//! │ Filters  │──▶│  Search  │──▶│  Rank    │──▶│  Download  │──▶│ Staging  │
//! │ validate │   │ paginate │   │ embed+cos│   │ N workers  │   │ ATA_n    │
//! └──────────┘   └────┬─────┘   └──────────┘   └────────────┘   └──────────┘
//!                     │
//!                ┌────▼─────┐
//!                │  Parse   │
//!                └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pncp preview "limpeza urbana" --uf SP          # show the request URLs
//! pncp search "limpeza urbana" --sphere municipal
//! pncp research "limpeza urbana" --describe "Serviços contínuos de limpeza urbana"
//! pncp staged                                   # files the extractor will read
//! pncp clean
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Validation and rejection errors |
//! | [`filters`] | Filter validation and encoding |
//! | [`search`] | Paginated registry search |
//! | [`parse`] | Registry item parsing |
//! | [`embedding`] | Embedding backend abstraction |
//! | [`rank`] | Similarity ranking |
//! | [`download`] | Concurrent document downloads |
//! | [`staging`] | Slot staging and cleanup |
//! | [`pipeline`] | End-to-end orchestration |

pub mod config;
pub mod download;
pub mod embedding;
pub mod error;
pub mod filters;
pub mod models;
pub mod parse;
pub mod pipeline;
pub mod rank;
pub mod search;
pub mod staging;
