use std::time::Duration;

use mca_core::error::AppError;
use serde::{Deserialize, Serialize};

use super::{RetrievalHit, Retriever};

/// Retrieval over a JSON search endpoint: `POST {"query", "top_k"}`.
#[derive(Debug, Clone)]
pub struct HttpRetriever {
    url: String,
    timeout: Duration,
}

impl HttpRetriever {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    top_k: usize,
}

/// The service may answer with a bare array or wrap it in `results`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SearchResponse {
    Bare(Vec<RetrievalHit>),
    Wrapped { results: Vec<RetrievalHit> },
}

impl SearchResponse {
    fn into_hits(self) -> Vec<RetrievalHit> {
        match self {
            SearchResponse::Bare(hits) => hits,
            SearchResponse::Wrapped { results } => results,
        }
    }
}

pub(crate) fn decode_search_response(value: serde_json::Value) -> Result<Vec<RetrievalHit>, AppError> {
    serde_json::from_value::<SearchResponse>(value)
        .map(SearchResponse::into_hits)
        .map_err(|e| {
            AppError::new("AI_RETRIEVAL_FAILED", "Unexpected search response shape")
                .with_details(e.to_string())
        })
}

impl Retriever for HttpRetriever {
    fn search(&self, query: &str, top_k: usize) -> Result<Vec<RetrievalHit>, AppError> {
        let req = SearchRequest { query, top_k };
        let resp = ureq::post(&self.url)
            .timeout(self.timeout)
            .send_json(serde_json::to_value(req).map_err(|e| {
                AppError::new("AI_RETRIEVAL_FAILED", "Failed to encode search request")
                    .with_details(e.to_string())
            })?);

        match resp {
            Ok(r) if r.status() == 200 => {
                let v: serde_json::Value = r.into_json().map_err(|e| {
                    AppError::new("AI_RETRIEVAL_FAILED", "Failed to decode search response")
                        .with_details(e.to_string())
                })?;
                decode_search_response(v)
            }
            Ok(r) => Err(
                AppError::new("AI_RETRIEVAL_FAILED", "Search request failed")
                    .with_details(format!("status={}", r.status())),
            ),
            Err(ureq::Error::Status(code, _)) => Err(
                AppError::new("AI_RETRIEVAL_FAILED", "Search request failed")
                    .with_details(format!("status={code}; url={}", self.url)),
            ),
            Err(e) => Err(
                AppError::new("AI_RETRIEVAL_FAILED", "Failed to reach search service")
                    .with_details(e.to_string())
                    .with_retryable(true),
            ),
        }
    }
}
