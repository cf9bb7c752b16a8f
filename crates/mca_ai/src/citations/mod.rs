//! Citation resolution: model-declared ids become resolved, deduplicated sources.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use mca_core::domain::{Finding, Source};
use mca_core::normalize::excerpt;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::chunks::{RetrievedChunk, DEFAULT_FILE_NAME};
use crate::interpret::FindingDraft;

/// Excerpt budget for a source attached to a finding or a chat answer.
pub const MAX_SOURCE_EXCERPT_CHARS: usize = 1_200;

fn article_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(?:articolo|art\.)\s*(\d+[a-z]?)\b").expect("valid regex"))
}

fn paragraph_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bparagrafo\s*(\d+)\b").expect("valid regex"))
}

fn comma_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bcomma\s*(\d+)\b").expect("valid regex"))
}

fn first_capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// `file, Articolo X, Paragrafo Y, Comma Z, Pag. N`; undetected parts are omitted.
pub fn build_reference(file_name: &str, page: Option<i64>, text: &str) -> String {
    let base = file_name.trim();
    let mut reference = if base.is_empty() {
        DEFAULT_FILE_NAME.to_string()
    } else {
        base.to_string()
    };

    if let Some(article) = first_capture(article_re(), text) {
        reference.push_str(&format!(", Articolo {article}"));
    }
    if let Some(paragraph) = first_capture(paragraph_re(), text) {
        reference.push_str(&format!(", Paragrafo {paragraph}"));
    }
    if let Some(comma) = first_capture(comma_re(), text) {
        reference.push_str(&format!(", Comma {comma}"));
    }
    if let Some(page) = page {
        reference.push_str(&format!(", Pag. {page}"));
    }
    reference
}

pub fn source_from_chunk(chunk: &RetrievedChunk) -> Source {
    Source {
        reference: build_reference(&chunk.source_file, chunk.page, &chunk.text),
        file_name: chunk.source_file.clone(),
        page: chunk.page,
        excerpt: excerpt(&chunk.text, MAX_SOURCE_EXCERPT_CHARS),
        confidence: Some(chunk.confidence),
    }
}

/// First 16 hex chars of the SHA-256 of the trimmed excerpt.
pub fn fingerprint(excerpt: &str) -> String {
    let digest = Sha256::digest(excerpt.trim().as_bytes());
    let mut out = hex::encode(digest);
    out.truncate(16);
    out
}

/// Structural identity of a source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceKey {
    reference: String,
    file_name: String,
    page: String,
    fingerprint: String,
}

impl SourceKey {
    pub fn of(source: &Source) -> Self {
        Self {
            reference: source.reference.trim().to_string(),
            file_name: source.file_name.trim().to_string(),
            page: source.page.map(|p| p.to_string()).unwrap_or_default(),
            fingerprint: fingerprint(&source.excerpt),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub findings: Vec<Finding>,
    /// Declared ids that matched no shown chunk.
    pub dropped_ids: usize,
}

/// Resolve declared ids against the chunks shown in this call.
///
/// Unknown ids are dropped silently; the returned sources are deduplicated by [`SourceKey`].
pub fn resolve_chunk_ids(ids: &[i64], shown: &[RetrievedChunk]) -> (Vec<Source>, usize) {
    let by_id: HashMap<u32, &RetrievedChunk> = shown.iter().map(|c| (c.chunk_id, c)).collect();

    let mut seen = HashSet::new();
    let mut sources = Vec::new();
    let mut dropped = 0usize;
    for id in ids {
        let chunk = u32::try_from(*id).ok().and_then(|id| by_id.get(&id));
        let Some(chunk) = chunk else {
            dropped += 1;
            continue;
        };
        let source = source_from_chunk(chunk);
        if seen.insert(SourceKey::of(&source)) {
            sources.push(source);
        }
    }
    (sources, dropped)
}

/// Drafts keep their order; a draft whose ids all fail to resolve becomes an uncited finding.
pub fn resolve_findings(drafts: &[FindingDraft], shown: &[RetrievedChunk]) -> Resolution {
    let mut dropped_ids = 0usize;
    let findings = drafts
        .iter()
        .map(|draft| {
            let (sources, dropped) = resolve_chunk_ids(&draft.chunk_ids, shown);
            dropped_ids += dropped;
            Finding {
                text: draft.text.clone(),
                sources,
            }
        })
        .collect();
    Resolution {
        findings,
        dropped_ids,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceEntry {
    pub id: String,
    pub source: Source,
}

/// Request-local table assigning `SRC1, SRC2, …` in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct SourceTable {
    entries: Vec<SourceEntry>,
    by_key: HashMap<SourceKey, usize>,
    max_entries: Option<usize>,
    refused: HashSet<SourceKey>,
}

impl SourceTable {
    /// Table that refuses new distinct sources once `max_entries` is reached.
    pub fn with_capacity_limit(max_entries: usize) -> Self {
        Self {
            max_entries: Some(max_entries),
            ..Self::default()
        }
    }

    /// Intern `findings` in order (the caller fixes the category order).
    pub fn from_findings<'a>(
        findings: impl IntoIterator<Item = &'a Finding>,
        max_entries: Option<usize>,
    ) -> Self {
        let mut table = Self {
            max_entries,
            ..Self::default()
        };
        for finding in findings {
            for source in &finding.sources {
                table.intern(source);
            }
        }
        table
    }

    /// Id for `source`, assigning the next one if it is new and the table has room.
    pub fn intern(&mut self, source: &Source) -> Option<&str> {
        let key = SourceKey::of(source);
        if let Some(&idx) = self.by_key.get(&key) {
            return Some(self.entries[idx].id.as_str());
        }
        if self.max_entries.is_some_and(|max| self.entries.len() >= max) {
            self.refused.insert(key);
            return None;
        }

        let idx = self.entries.len();
        self.entries.push(SourceEntry {
            id: format!("SRC{}", idx + 1),
            source: source.clone(),
        });
        self.by_key.insert(key, idx);
        Some(self.entries[idx].id.as_str())
    }

    pub fn id_for(&self, source: &Source) -> Option<&str> {
        self.by_key
            .get(&SourceKey::of(source))
            .map(|&idx| self.entries[idx].id.as_str())
    }

    /// Distinct ids cited by `finding`, in its own source order.
    pub fn ids_for(&self, finding: &Finding) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for source in &finding.sources {
            if let Some(id) = self.id_for(source) {
                if !ids.iter().any(|existing| existing == id) {
                    ids.push(id.to_string());
                }
            }
        }
        ids
    }

    /// Sources for numeric ids (`2` means `SRC2`); unknown ids are dropped, duplicates collapse.
    pub fn resolve_ids(&self, ids: &[i64]) -> (Vec<Source>, usize) {
        let mut seen = HashSet::new();
        let mut sources = Vec::new();
        let mut dropped = 0usize;
        for id in ids {
            let entry = usize::try_from(*id)
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|idx| self.entries.get(idx));
            match entry {
                Some(entry) => {
                    if seen.insert(entry.id.clone()) {
                        sources.push(entry.source.clone());
                    }
                }
                None => dropped += 1,
            }
        }
        (sources, dropped)
    }

    pub fn entries(&self) -> &[SourceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct sources refused because the table was full.
    pub fn omitted(&self) -> usize {
        self.refused.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chunk(id: u32, file: &str, page: Option<i64>, text: &str) -> RetrievedChunk {
        RetrievedChunk {
            chunk_id: id,
            source_file: file.to_string(),
            page,
            text: text.to_string(),
            confidence: 0.9,
        }
    }

    fn draft(text: &str, ids: &[i64]) -> FindingDraft {
        FindingDraft {
            text: text.to_string(),
            chunk_ids: ids.to_vec(),
        }
    }

    #[test]
    fn reference_embeds_detected_locators_in_fixed_order() {
        let text = "Ai sensi del comma 3 dell'Art. 10a, paragrafo 2, il fabbricante...";
        assert_eq!(
            build_reference("reg.pdf", Some(14), text),
            "reg.pdf, Articolo 10a, Paragrafo 2, Comma 3, Pag. 14"
        );
        assert_eq!(build_reference("reg.pdf", None, "testo libero"), "reg.pdf");
        assert_eq!(build_reference("  ", Some(2), ""), "Documento, Pag. 2");
        assert_eq!(
            build_reference("a.pdf", None, "ARTICOLO 5 requisiti"),
            "a.pdf, Articolo 5"
        );
    }

    #[test]
    fn hallucinated_ids_are_dropped() {
        let shown = vec![chunk(1, "a.pdf", Some(1), "uno"), chunk(2, "b.pdf", None, "due")];
        let res = resolve_findings(
            &[draft("NC con id inventati", &[2, 7, -1, 0]), draft("solo inventati", &[99])],
            &shown,
        );
        assert_eq!(res.dropped_ids, 4);
        assert_eq!(res.findings[0].sources.len(), 1);
        assert_eq!(res.findings[0].sources[0].file_name, "b.pdf");
        assert_eq!(res.findings[1].text, "solo inventati");
        assert!(!res.findings[1].is_cited());
    }

    #[test]
    fn identical_chunks_collapse_within_a_finding() {
        let shown = vec![chunk(1, "a.pdf", Some(3), "stesso testo"), chunk(2, "a.pdf", Some(3), " stesso testo ")];
        let (sources, dropped) = resolve_chunk_ids(&[1, 2], &shown);
        assert_eq!(dropped, 0);
        assert_eq!(sources.len(), 1);
    }

    #[test]
    fn shared_source_gets_one_id_across_findings() {
        let shown = vec![
            chunk(1, "a.pdf", Some(1), "Articolo 5"),
            chunk(2, "b.pdf", Some(2), "Comma 1"),
        ];
        let res = resolve_findings(&[draft("nc", &[1, 2]), draft("rec", &[2])], &shown);
        let table = SourceTable::from_findings(res.findings.iter(), None);

        assert_eq!(table.len(), 2);
        assert_eq!(table.ids_for(&res.findings[0]), vec!["SRC1", "SRC2"]);
        assert_eq!(table.ids_for(&res.findings[1]), vec!["SRC2"]);
    }

    #[test]
    fn table_cap_refuses_new_sources_only() {
        let sources: Vec<Source> = (1..=4)
            .map(|i| source_from_chunk(&chunk(i, "a.pdf", Some(i64::from(i)), "t")))
            .collect();
        let mut table = SourceTable::with_capacity_limit(2);
        assert_eq!(table.intern(&sources[0]), Some("SRC1"));
        assert_eq!(table.intern(&sources[1]), Some("SRC2"));
        assert_eq!(table.intern(&sources[2]), None);
        assert_eq!(table.intern(&sources[0]), Some("SRC1"));
        assert_eq!(table.intern(&sources[2]), None);
        assert_eq!(table.omitted(), 1);
        assert_eq!(table.intern(&sources[3]), None);
        assert_eq!(table.omitted(), 2);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn numeric_ids_resolve_against_table() {
        let shown = vec![chunk(1, "a.pdf", None, "x"), chunk(2, "b.pdf", None, "y")];
        let res = resolve_findings(&[draft("nc", &[1, 2])], &shown);
        let table = SourceTable::from_findings(res.findings.iter(), None);
        let (sources, dropped) = table.resolve_ids(&[2, 2, 5, 0]);
        assert_eq!(dropped, 2);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].file_name, "b.pdf");
    }

    #[test]
    fn fingerprint_ignores_surrounding_whitespace() {
        assert_eq!(fingerprint("  abc\n"), fingerprint("abc"));
        assert_ne!(fingerprint("abc"), fingerprint("abd"));
        assert_eq!(fingerprint("abc").len(), 16);
    }
}
