use chrono::{DateTime, Utc};

use crate::techniques::Technique;

/// A text chunk belonging to a stored technique row.
#[derive(Debug, Clone)]
pub struct Chunk<'a> {
    pub technique_row: i64,
    pub position: usize,
    pub content: &'a str,
}

/// Metadata recorded alongside a vector store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreInfo {
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
    pub collection: String,
    pub created_at: DateTime<Utc>,
}

impl StoreInfo {
    pub fn new(provider: &str, model: &str, dimensions: usize, collection: &str) -> Self {
        Self {
            provider: provider.to_string(),
            model: model.to_string(),
            dimensions,
            collection: collection.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Per-technique row counts, as listed by `info --list`.
#[derive(Debug)]
pub struct TechniqueSummary {
    pub technique_id: String,
    pub name: String,
    pub chunks: usize,
}

#[derive(Debug)]
pub struct SearchResult {
    pub technique: Technique,
    pub chunk_content: String,
    pub similarity: f64,
    pub position: usize,
    pub chunk_id: i64,
}
