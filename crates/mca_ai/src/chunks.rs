use mca_core::normalize::{excerpt, parse_lenient_int};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::retrieve::RetrievalHit;

/// Metadata keys tried in order for the source file name.
pub const FILE_NAME_KEYS: &[&str] = &["fileName", "file_name", "filename"];
/// Metadata keys tried in order for the page number.
pub const PAGE_KEYS: &[&str] = &["page", "page_number", "pageNumber"];

pub const DEFAULT_FILE_NAME: &str = "Documento";
/// Chunk text budget for prompt inclusion.
pub const MAX_CHUNK_CHARS: usize = 2_000;

/// A retrieval hit as shown to the model for one request. Never persisted.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedChunk {
    /// 1-based, in rank order.
    pub chunk_id: u32,
    pub source_file: String,
    pub page: Option<i64>,
    pub text: String,
    pub confidence: f64,
}

/// `clamp(0.9 - 0.05 * rank, 0.5, 0.95)`: non-increasing in rank.
pub fn rank_confidence(rank_index: usize) -> f64 {
    let value = 0.9 - 0.05 * rank_index as f64;
    value.clamp(0.5, 0.95)
}

fn metadata_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let t = s.trim();
            (!t.is_empty()).then(|| t.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn metadata_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => parse_lenient_int(s),
        _ => None,
    }
}

pub fn resolve_file_name(metadata: &Map<String, Value>) -> String {
    FILE_NAME_KEYS
        .iter()
        .filter_map(|key| metadata.get(*key))
        .find_map(metadata_text)
        .unwrap_or_else(|| DEFAULT_FILE_NAME.to_string())
}

pub fn resolve_page(metadata: &Map<String, Value>) -> Option<i64> {
    PAGE_KEYS
        .iter()
        .filter_map(|key| metadata.get(*key))
        .find_map(metadata_int)
}

fn confidence_for(score: Option<f64>, rank_index: usize) -> f64 {
    match score {
        Some(s) if s.is_finite() => s.clamp(0.0, 1.0),
        _ => rank_confidence(rank_index),
    }
}

/// Turn ranked hits into chunks with stable ids `1..=N` in the given order.
///
/// The caller has already capped the number of hits.
pub fn normalize_hits(hits: &[RetrievalHit]) -> Vec<RetrievedChunk> {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| RetrievedChunk {
            chunk_id: (i + 1) as u32,
            source_file: resolve_file_name(&hit.metadata),
            page: resolve_page(&hit.metadata),
            text: excerpt(&hit.text, MAX_CHUNK_CHARS),
            confidence: confidence_for(hit.score, i),
        })
        .collect()
}
