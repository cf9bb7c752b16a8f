//! Scoped chat: open questions over fresh retrieval, or follow-ups bound to one stored assessment.

use mca_core::domain::{ChatTurn, Source};
use mca_core::error::AppError;
use mca_core::repo::AssessmentStore;
use serde::{Deserialize, Serialize};

use crate::chunks::normalize_hits;
use crate::citations::{resolve_chunk_ids, source_from_chunk};
use crate::context::{
    compose_user_message, render_chunk_block, render_history, render_record_context,
    CHAT_CHUNKS_TITLE,
};
use crate::guardrails::{resolve_system_prompt, validate_question};
use crate::interpret::answer_draft;
use crate::llm::Llm;
use crate::retrieve::{retrieve_hits, Retriever};

pub mod prompts;

pub const CHAT_TOP_K: usize = 8;
/// Best-effort attribution when the model cited nothing usable.
pub const DEFAULT_SOURCE_COUNT: usize = 3;

pub const NO_INFO_MESSAGE: &str = "Non ho trovato questa informazione.";
pub const NO_INFO_HINT: &str = "Prova a riformulare la domanda oppure carica documenti più pertinenti (es. regolamento/standard/manuali specifici).";

const CHUNK_IDS_KEY: &str = "chunkIds";
const SOURCE_IDS_KEY: &str = "sourceIds";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub question: String,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssessmentChatRequest {
    pub question: String,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatResponse {
    pub answer: String,
    pub sources: Vec<Source>,
}

pub fn no_info_with_hint() -> String {
    format!("{NO_INFO_MESSAGE} {NO_INFO_HINT}")
}

/// Instruction used when the caller does not override it.
pub fn default_system_prompt() -> &'static str {
    prompts::CHAT_SYSTEM_PROMPT
}

fn final_answer(answer: String) -> String {
    let answer = answer.trim();
    if answer.is_empty() {
        NO_INFO_MESSAGE.to_string()
    } else {
        answer.to_string()
    }
}

/// Answer a free-form question grounded on a fresh retrieval.
///
/// With nothing retrieved the model is not called at all.
pub fn chat(
    llm: &dyn Llm,
    retriever: &dyn Retriever,
    req: &ChatRequest,
) -> Result<ChatResponse, AppError> {
    let question = validate_question(&req.question)?;
    let system = resolve_system_prompt(req.system_prompt.as_deref(), default_system_prompt())?;

    let hits = retrieve_hits(retriever, &question, CHAT_TOP_K)?;
    let chunks = normalize_hits(&hits);
    if chunks.is_empty() {
        tracing::info!("no chunks retrieved, answering without the model");
        return Ok(ChatResponse {
            answer: no_info_with_hint(),
            sources: Vec::new(),
        });
    }

    let block = render_chunk_block(CHAT_CHUNKS_TITLE, &chunks);
    let shown = &chunks[..block.shown];
    let user = compose_user_message(&block.text, &render_history(&req.history), &question);

    let raw = llm.generate(&system, &user)?;
    tracing::debug!(output = %raw, "chat output");

    let draft = answer_draft(&raw, CHUNK_IDS_KEY);
    let (mut sources, dropped) = resolve_chunk_ids(&draft.ids, shown);
    if dropped > 0 {
        tracing::info!(dropped, "dropped chat citation ids not among shown chunks");
    }
    if sources.is_empty() && !draft.answer.trim().is_empty() {
        sources = shown
            .iter()
            .take(DEFAULT_SOURCE_COUNT)
            .map(source_from_chunk)
            .collect();
    }

    Ok(ChatResponse {
        answer: final_answer(draft.answer),
        sources,
    })
}

/// Answer a follow-up about one stored assessment, grounded only on that record.
///
/// No retrieval happens here: the context comes from the record and its machine.
pub fn assessment_chat(
    store: &dyn AssessmentStore,
    llm: &dyn Llm,
    assessment_id: i64,
    req: &AssessmentChatRequest,
) -> Result<ChatResponse, AppError> {
    let question = validate_question(&req.question)?;
    let record = store.load_assessment(assessment_id)?;
    let machine = store.load_machine(record.machine_id)?;

    let context = render_record_context(&machine, &record);
    let user = compose_user_message(&context.text, &render_history(&req.history), &question);

    let raw = llm.generate(prompts::ASSESSMENT_CHAT_SYSTEM_PROMPT, &user)?;
    tracing::debug!(assessment_id, output = %raw, "assessment chat output");

    let draft = answer_draft(&raw, SOURCE_IDS_KEY);
    let (mut sources, dropped) = context.sources.resolve_ids(&draft.ids);
    if dropped > 0 {
        tracing::info!(assessment_id, dropped, "dropped source ids not in the record table");
    }
    if sources.is_empty() && !draft.answer.trim().is_empty() {
        sources = context
            .sources
            .entries()
            .iter()
            .take(DEFAULT_SOURCE_COUNT)
            .map(|entry| entry.source.clone())
            .collect();
    }

    Ok(ChatResponse {
        answer: final_answer(draft.answer),
        sources,
    })
}
