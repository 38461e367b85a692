//! Meilisearch client, document shapes and filter translation.

pub mod error;
pub mod filter;
pub mod models;
pub mod service;

pub use error::SearchError;
pub use filter::{DateFilter, combine_filters, folder_filter, translate_filter};
pub use models::{IndexStats, MailDocument, RankingRulesFile, StopWordsFile, SynonymsFile};
pub use service::{MailHit, MailSearchResults, SearchService};
