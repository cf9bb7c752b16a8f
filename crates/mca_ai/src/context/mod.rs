//! Renders the text blocks the model sees: grounding, history, then the question.
//!
//! Every block is capped on its own and only whole entries are ever omitted, so the
//! ids a block declares always match the entries it actually contains.

use mca_core::domain::{AssessmentRecord, ChatRole, ChatTurn, Finding, Machine};
use mca_core::normalize::excerpt;

use crate::chunks::RetrievedChunk;
use crate::citations::{SourceTable, MAX_SOURCE_EXCERPT_CHARS};

pub const HISTORY_WINDOW: usize = 10;
pub const MAX_HISTORY_TURN_CHARS: usize = 2_000;
pub const MAX_CHUNK_BLOCK_CHARS: usize = 30_000;
pub const MAX_FINDINGS_PER_CATEGORY: usize = 30;
pub const MAX_FINDING_CHARS: usize = 1_000;
pub const MAX_RECORD_SOURCES: usize = 20;
pub const MAX_FIELD_CHARS: usize = 2_000;

pub const ASSESSMENT_CHUNKS_TITLE: &str = "=== CHUNKS NORMATIVI RECUPERATI (RAG) ===";
pub const CHAT_CHUNKS_TITLE: &str = "=== CHUNKS RECUPERATI (RAG) ===";
pub const NO_DOCUMENTS: &str = "Nessun documento di riferimento trovato nel database.";
pub const QUESTION_MARKER: &str = "=== DOMANDA UTENTE ===";

const CHUNK_INSTRUCTIONS: &str =
    "Usa SOLO questi chunk come fonti. Per citare un chunk usa il suo chunkId (numero).";
const HISTORY_NONE: &str = "=== STORIA CHAT ===\nNessuna.\n";
const HISTORY_TITLE: &str = "=== STORIA CHAT (ultimi messaggi) ===";
const NOT_AVAILABLE: &str = "N/D";

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkBlock {
    pub text: String,
    /// Leading chunks that made it into `text`; citations resolve against these only.
    pub shown: usize,
}

fn chunk_entry(chunk: &RetrievedChunk) -> String {
    let mut entry = format!("[CHUNK {}] Fonte: {}", chunk.chunk_id, chunk.source_file);
    if let Some(page) = chunk.page {
        entry.push_str(&format!(" | Pagina: {page}"));
    }
    entry.push_str(&format!(" | Pertinenza: {:.2}\n", chunk.confidence));
    entry.push_str(&chunk.text);
    entry.push_str("\n\n");
    entry
}

/// Append whole entries while they fit in `budget` chars; returns how many were kept.
fn push_entries_within(out: &mut String, entries: &[String], budget: usize) -> usize {
    let mut used = out.chars().count();
    let mut kept = 0usize;
    for entry in entries {
        let len = entry.chars().count();
        if used + len > budget {
            break;
        }
        out.push_str(entry);
        used += len;
        kept += 1;
    }
    kept
}

pub fn render_chunk_block(title: &str, chunks: &[RetrievedChunk]) -> ChunkBlock {
    if chunks.is_empty() {
        return ChunkBlock {
            text: format!("{title}\n\n{NO_DOCUMENTS}\n"),
            shown: 0,
        };
    }

    let mut text = format!("{title}\n{CHUNK_INSTRUCTIONS}\n\n");
    let entries: Vec<String> = chunks.iter().map(chunk_entry).collect();
    let shown = push_entries_within(&mut text, &entries, MAX_CHUNK_BLOCK_CHARS);
    if shown < chunks.len() {
        text.push_str(&format!(
            "[{} chunk omessi per limiti di lunghezza]\n",
            chunks.len() - shown
        ));
        tracing::warn!(shown, total = chunks.len(), "chunk block truncated");
    }
    ChunkBlock { text, shown }
}

/// Unstructured documents block used by the legacy assessment prompt.
pub fn render_legacy_documents(chunks: &[RetrievedChunk]) -> String {
    if chunks.is_empty() {
        return NO_DOCUMENTS.to_string();
    }

    let mut text = String::from("=== DOCUMENTI DI RIFERIMENTO ===\n\n");
    let entries: Vec<String> = chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let mut entry = format!("--- Documento {} ---\nFonte: {}\n", i + 1, chunk.source_file);
            if let Some(page) = chunk.page {
                entry.push_str(&format!("Pagina: {page}\n"));
            }
            entry.push_str(&format!("Contenuto:\n{}\n\n", chunk.text));
            entry
        })
        .collect();
    push_entries_within(&mut text, &entries, MAX_CHUNK_BLOCK_CHARS);
    text
}

/// Turns on one line each, so a turn can never forge extra role lines.
fn single_line(content: &str) -> String {
    let flat: String = content
        .trim()
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    excerpt(&flat, MAX_HISTORY_TURN_CHARS)
}

/// Last [`HISTORY_WINDOW`] user/assistant turns with content, oldest first.
pub fn render_history(history: &[ChatTurn]) -> String {
    let kept: Vec<(ChatRole, &str)> = history
        .iter()
        .filter(|turn| !turn.content.trim().is_empty())
        .filter_map(|turn| turn.parsed_role().map(|role| (role, turn.content.as_str())))
        .collect();
    if kept.is_empty() {
        return HISTORY_NONE.to_string();
    }

    let from = kept.len().saturating_sub(HISTORY_WINDOW);
    let mut out = format!("{HISTORY_TITLE}\n");
    for (role, content) in &kept[from..] {
        let label = match role {
            ChatRole::User => "Utente",
            ChatRole::Assistant => "Assistente",
        };
        out.push_str(&format!("{label}: {}\n", single_line(content)));
    }
    out
}

/// Grounding, then history, then the live question. The order is fixed.
pub fn compose_user_message(grounding: &str, history: &str, question: &str) -> String {
    format!(
        "{}\n\n{}\n\n{QUESTION_MARKER}\n{}\n",
        grounding.trim_end(),
        history.trim_end(),
        question.trim()
    )
}

fn nd(value: Option<&str>) -> String {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => excerpt(v, MAX_FIELD_CHARS),
        None => NOT_AVAILABLE.to_string(),
    }
}

/// Context rebuilt from one stored record and its machine, plus the table its `SRC` ids index.
#[derive(Debug, Clone)]
pub struct RecordContext {
    pub text: String,
    pub sources: SourceTable,
}

fn render_findings(out: &mut String, findings: &[Finding], prefix: &str, sources: &SourceTable) {
    if findings.is_empty() {
        out.push_str("Nessuna informazione disponibile.\n");
        return;
    }

    let shown = findings.len().min(MAX_FINDINGS_PER_CATEGORY);
    for (i, finding) in findings[..shown].iter().enumerate() {
        let text = finding.text.trim();
        let text = if text.is_empty() {
            "—".to_string()
        } else {
            excerpt(text, MAX_FINDING_CHARS)
        };
        out.push_str(&format!("[{prefix}{}] {text}\n", i + 1));

        let ids = sources.ids_for(finding);
        if !ids.is_empty() {
            out.push_str(&format!("  Fonti: {}\n", ids.join(", ")));
        }
        out.push('\n');
    }
    if findings.len() > shown {
        out.push_str(&format!("[... altre {} voci omesse]\n", findings.len() - shown));
    }
}

fn render_source_table(out: &mut String, sources: &SourceTable) {
    if sources.is_empty() {
        return;
    }

    out.push_str("=== FONTI NORMATIVE (da assessment) ===\n");
    for entry in sources.entries() {
        let src = &entry.source;
        out.push_str(&format!("[{}] ", entry.id));
        if !src.reference.trim().is_empty() {
            out.push_str(&format!("Riferimento: {}", src.reference.trim()));
        } else if !src.file_name.trim().is_empty() {
            out.push_str(&format!("Documento: {}", src.file_name.trim()));
        } else {
            out.push_str("Fonte: —");
        }
        if let Some(page) = src.page {
            out.push_str(&format!(" | Pagina: {page}"));
        }
        if let Some(confidence) = src.confidence {
            out.push_str(&format!(" | Pertinenza: {confidence:.2}"));
        }
        out.push('\n');

        let quoted = excerpt(&src.excerpt, MAX_SOURCE_EXCERPT_CHARS);
        if !quoted.is_empty() {
            out.push_str(&format!("Testo (estratto): {quoted}\n"));
        }
        out.push('\n');
    }
    if sources.omitted() > 0 {
        out.push_str(&format!("[... altre {} fonti omesse]\n", sources.omitted()));
    }
}

/// Render the assessment-bound grounding from `record`'s own fields only.
pub fn render_record_context(machine: &Machine, record: &AssessmentRecord) -> RecordContext {
    let non_conformities =
        &record.non_conformities[..record.non_conformities.len().min(MAX_FINDINGS_PER_CATEGORY)];
    let recommendations =
        &record.recommendations[..record.recommendations.len().min(MAX_FINDINGS_PER_CATEGORY)];
    let sources = SourceTable::from_findings(
        non_conformities.iter().chain(recommendations.iter()),
        Some(MAX_RECORD_SOURCES),
    );

    let year = machine.production_year.map(|y| y.to_string());
    let documents = record.documents_used.join(", ");

    let mut out = String::new();
    out.push_str("=== INFORMAZIONI MACCHINARIO ===\n");
    out.push_str(&format!("Nome: {}\n", nd(Some(machine.name.as_str()))));
    out.push_str(&format!("Categoria: {}\n", nd(machine.category.as_deref())));
    out.push_str(&format!("Produttore: {}\n", nd(machine.manufacturer.as_deref())));
    out.push_str(&format!("Modello: {}\n", nd(machine.model.as_deref())));
    out.push_str(&format!("Numero Serie: {}\n", nd(machine.serial_number.as_deref())));
    out.push_str(&format!("Anno Produzione: {}\n", nd(year.as_deref())));
    out.push_str(&format!("Descrizione: {}\n", nd(machine.description.as_deref())));
    out.push_str(&format!(
        "Specifiche Tecniche: {}\n\n",
        nd(machine.technical_specs.as_deref())
    ));

    out.push_str("=== RISULTATO ASSESSMENT (QUESTO ASSESSMENT) ===\n");
    out.push_str(&format!("Data: {}\n", nd(Some(record.created_at.as_str()))));
    out.push_str(&format!("Punteggio Conformità: {}\n", record.conformity_score));
    out.push_str(&format!("Livello Rischio: {}\n", record.risk_level.as_str()));
    out.push_str(&format!("Riepilogo: {}\n", nd(Some(record.summary.as_str()))));
    out.push_str(&format!("Documenti Utilizzati: {}\n\n", nd(Some(documents.as_str()))));

    out.push_str("=== NON CONFORMITÀ (da assessment) ===\n");
    render_findings(&mut out, &record.non_conformities, "NC", &sources);
    out.push('\n');

    out.push_str("=== RACCOMANDAZIONI (da assessment) ===\n");
    render_findings(&mut out, &record.recommendations, "REC", &sources);
    out.push('\n');

    render_source_table(&mut out, &sources);

    RecordContext { text: out, sources }
}
