use std::collections::BTreeSet;

use mca_core::domain::{AssessmentRecord, Finding, Machine, NewAssessment, RiskLevel};
use mca_core::error::AppError;
use mca_core::normalize::{findings_from_bullet_text, score_from_text};
use mca_core::repo::AssessmentStore;
use serde::Serialize;

use crate::chunks::{normalize_hits, RetrievedChunk};
use crate::citations::resolve_findings;
use crate::context::{render_chunk_block, render_legacy_documents, ASSESSMENT_CHUNKS_TITLE};
use crate::interpret::{
    explainable_draft, extract_legacy_section, interpret, Interpretation, SECTION_NON_CONFORMITIES,
    SECTION_RECOMMENDATIONS, SECTION_RISK_LEVEL, SECTION_SCORE, SECTION_SUMMARY,
};
use crate::llm::Llm;
use crate::retrieve::{retrieve_hits, Retriever};

pub mod prompts;

pub const ASSESSMENT_TOP_K: usize = 10;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentPath {
    Explainable,
    Legacy,
}

/// A generated, not yet persisted assessment tagged with the path that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratedAssessment {
    Explainable(NewAssessment),
    Legacy(NewAssessment),
}

impl GeneratedAssessment {
    pub fn path(&self) -> AssessmentPath {
        match self {
            GeneratedAssessment::Explainable(_) => AssessmentPath::Explainable,
            GeneratedAssessment::Legacy(_) => AssessmentPath::Legacy,
        }
    }

    pub fn into_assessment(self) -> NewAssessment {
        match self {
            GeneratedAssessment::Explainable(a) | GeneratedAssessment::Legacy(a) => a,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AssessmentOutcome {
    pub path: AssessmentPath,
    pub record: AssessmentRecord,
}

pub fn build_retrieval_query(machine: &Machine) -> String {
    let mut query = String::from("Requisiti di sicurezza e conformità per ");
    if let Some(category) = machine.category.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        query.push_str(category);
        query.push(' ');
    }
    query.push_str(machine.name.trim());
    if let Some(description) = machine
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
    {
        query.push_str(". ");
        query.push_str(description);
    }
    query.push_str(" Regolamento Macchine sicurezza requisiti essenziali marcatura CE");
    query
}

/// Distinct file names of cited sources, or of every shown chunk when nothing was cited.
fn cited_documents(findings: &[&Finding], shown: &[RetrievedChunk]) -> Vec<String> {
    let mut names: BTreeSet<String> = findings
        .iter()
        .flat_map(|f| f.sources.iter())
        .map(|s| s.file_name.trim())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .collect();
    if names.is_empty() {
        names = shown
            .iter()
            .map(|c| c.source_file.trim())
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .collect();
    }
    names.into_iter().collect()
}

/// Distinct file names of the shown chunks in rank order.
fn shown_documents(shown: &[RetrievedChunk]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for chunk in shown {
        let name = chunk.source_file.trim();
        if !name.is_empty() && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// Structured reading of the explainable call; `None` sends the caller to the legacy path.
pub fn explainable_from_output(
    raw: &str,
    machine_id: i64,
    shown: &[RetrievedChunk],
    created_at: &str,
) -> Option<NewAssessment> {
    let obj = match interpret(raw) {
        Interpretation::Parsed(obj) => obj,
        Interpretation::Unparseable { reason } => {
            tracing::warn!(machine_id, %reason, "assessment output is not valid JSON");
            return None;
        }
    };
    let Some(draft) = explainable_draft(&obj) else {
        tracing::warn!(machine_id, "assessment output has no summary");
        return None;
    };

    let non_conformities = resolve_findings(&draft.non_conformities, shown);
    let recommendations = resolve_findings(&draft.recommendations, shown);
    let dropped = non_conformities.dropped_ids + recommendations.dropped_ids;
    if dropped > 0 {
        tracing::info!(machine_id, dropped, "dropped citation ids not among shown chunks");
    }

    let all: Vec<&Finding> = non_conformities
        .findings
        .iter()
        .chain(recommendations.findings.iter())
        .collect();
    let documents_used = cited_documents(&all, shown);

    Some(NewAssessment {
        machine_id,
        raw_output: raw.to_string(),
        summary: draft.summary,
        non_conformities: non_conformities.findings,
        recommendations: recommendations.findings,
        risk_level: draft.risk_level,
        conformity_score: draft.conformity_score,
        documents_used,
        created_at: created_at.to_string(),
    })
}

/// Heading-delimited reading of the legacy call. Always yields a record.
pub fn legacy_from_output(
    raw: &str,
    machine_id: i64,
    shown: &[RetrievedChunk],
    created_at: &str,
) -> NewAssessment {
    let risk = extract_legacy_section(raw, SECTION_RISK_LEVEL);
    let score = extract_legacy_section(raw, SECTION_SCORE);

    NewAssessment {
        machine_id,
        raw_output: raw.to_string(),
        summary: extract_legacy_section(raw, SECTION_SUMMARY),
        non_conformities: findings_from_bullet_text(&extract_legacy_section(
            raw,
            SECTION_NON_CONFORMITIES,
        )),
        recommendations: findings_from_bullet_text(&extract_legacy_section(
            raw,
            SECTION_RECOMMENDATIONS,
        )),
        risk_level: RiskLevel::normalize(Some(risk.as_str())),
        conformity_score: score_from_text(&score),
        documents_used: shown_documents(shown),
        created_at: created_at.to_string(),
    }
}

/// Retrieve, prompt, interpret and resolve for one machine, without persisting.
pub fn draft_assessment(
    llm: &dyn Llm,
    retriever: &dyn Retriever,
    machine: &Machine,
    created_at: &str,
) -> Result<GeneratedAssessment, AppError> {
    let query = build_retrieval_query(machine);
    let hits = retrieve_hits(retriever, &query, ASSESSMENT_TOP_K)?;
    let chunks = normalize_hits(&hits);

    let block = render_chunk_block(ASSESSMENT_CHUNKS_TITLE, &chunks);
    let shown = &chunks[..block.shown];

    let user = prompts::explainable_user_prompt(machine, &block.text);
    let raw = llm.generate(prompts::EXPLAINABLE_SYSTEM_PROMPT, &user)?;
    tracing::debug!(machine_id = machine.id, output = %raw, "explainable assessment output");

    if let Some(assessment) = explainable_from_output(&raw, machine.id, shown, created_at) {
        tracing::info!(machine_id = machine.id, chunks = shown.len(), "assessment took explainable path");
        return Ok(GeneratedAssessment::Explainable(assessment));
    }

    let documents = render_legacy_documents(shown);
    let user = prompts::legacy_user_prompt(machine, &documents);
    let raw = llm.generate(prompts::LEGACY_SYSTEM_PROMPT, &user)?;
    tracing::debug!(machine_id = machine.id, output = %raw, "legacy assessment output");
    tracing::info!(machine_id = machine.id, chunks = shown.len(), "assessment took legacy path");

    Ok(GeneratedAssessment::Legacy(legacy_from_output(
        &raw, machine.id, shown, created_at,
    )))
}

/// Generate and persist an assessment for `machine_id`.
pub fn generate_assessment(
    store: &dyn AssessmentStore,
    llm: &dyn Llm,
    retriever: &dyn Retriever,
    machine_id: i64,
    created_at: &str,
) -> Result<AssessmentOutcome, AppError> {
    let machine = store.load_machine(machine_id)?;
    let generated = draft_assessment(llm, retriever, &machine, created_at)?;
    let path = generated.path();
    let record = store.store_assessment(generated.into_assessment())?;
    tracing::info!(machine_id, assessment_id = record.id, ?path, "assessment stored");
    Ok(AssessmentOutcome { path, record })
}
