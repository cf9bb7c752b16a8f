use mca_core::error::AppError;
use serde::{Deserialize, Serialize};

mod http_search;

pub use http_search::HttpRetriever;

pub const MAX_TOP_K: usize = 50;

/// One ranked result from the similarity search service.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RetrievalHit {
    #[serde(alias = "content")]
    pub text: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl RetrievalHit {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Similarity search boundary: rank order of the returned hits is significant.
pub trait Retriever {
    fn search(&self, query: &str, top_k: usize) -> Result<Vec<RetrievalHit>, AppError>;
}

pub fn validate_top_k(top_k: usize) -> Result<usize, AppError> {
    if top_k == 0 || top_k > MAX_TOP_K {
        return Err(AppError::new(
            "AI_INVALID_TOP_K",
            format!("top_k must be between 1 and {MAX_TOP_K}"),
        )
        .with_details(format!("top_k={top_k}")));
    }
    Ok(top_k)
}

/// Search and keep at most `top_k` hits, whatever the service returned.
pub fn retrieve_hits(
    retriever: &dyn Retriever,
    query: &str,
    top_k: usize,
) -> Result<Vec<RetrievalHit>, AppError> {
    let top_k = validate_top_k(top_k)?;
    let q = query.trim();
    if q.is_empty() {
        return Err(AppError::new("AI_RETRIEVAL_FAILED", "Query must not be empty"));
    }

    let mut hits = retriever.search(q, top_k)?;
    hits.truncate(top_k);
    tracing::info!(top_k, hits = hits.len(), "retrieval completed");
    Ok(hits)
}
