//! Coerces noisy model text into typed values, field by field.

use mca_core::domain::RiskLevel;
use mca_core::normalize::{non_blank, normalize_score, parse_lenient_int, score_from_text};
use serde_json::{Map, Value};

pub const FIELD_SUMMARY: &str = "riepilogoConformita";
pub const FIELD_NON_CONFORMITIES: &str = "nonConformitaRilevate";
pub const FIELD_RECOMMENDATIONS: &str = "raccomandazioni";
pub const FIELD_RISK_LEVEL: &str = "livelloRischio";
pub const FIELD_SCORE: &str = "punteggioConformita";

const SUMMARY_KEYS: &[&str] = &[FIELD_SUMMARY, "summary"];
const FINDING_TEXT_KEYS: &[&str] = &["text", "testo"];
const ANSWER_KEYS: &[&str] = &["answer", "risposta"];

pub const SECTION_SUMMARY: &str = "RIEPILOGO CONFORMITÀ";
pub const SECTION_NON_CONFORMITIES: &str = "NON CONFORMITÀ RILEVATE";
pub const SECTION_RECOMMENDATIONS: &str = "RACCOMANDAZIONI";
pub const SECTION_RISK_LEVEL: &str = "LIVELLO DI RISCHIO";
pub const SECTION_SCORE: &str = "PUNTEGGIO DI CONFORMITÀ";

/// Outcome of reading model output as a JSON object.
#[derive(Debug, Clone, PartialEq)]
pub enum Interpretation {
    Parsed(Map<String, Value>),
    Unparseable { reason: String },
}

/// Drop a leading ```` ```lang ```` line and everything from the last fence on.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let Some(newline) = trimmed.find('\n') else {
        return trimmed;
    };
    let body = &trimmed[newline + 1..];
    match body.rfind("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

/// The span from the first `{` to the last `}`, or `{}` when there is none.
pub fn extract_json_object(raw: &str) -> &str {
    let text = strip_code_fence(raw);
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => "{}",
    }
}

pub fn interpret(raw: &str) -> Interpretation {
    let span = extract_json_object(raw);
    match serde_json::from_str::<Value>(span) {
        Ok(Value::Object(obj)) => Interpretation::Parsed(obj),
        Ok(other) => Interpretation::Unparseable {
            reason: format!("expected a JSON object, found {other}"),
        },
        Err(e) => Interpretation::Unparseable {
            reason: e.to_string(),
        },
    }
}

/// First non-blank string (or number) among `keys`.
pub fn text_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match obj.get(*key)? {
        Value::String(s) => non_blank(Some(s)),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Integers, rounded floats, or numeric-looking strings (`"12"`, `"SRC2"`).
pub fn int_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => parse_lenient_int(s),
        _ => None,
    }
}

pub fn score_field(obj: &Map<String, Value>, key: &str) -> u8 {
    match obj.get(key) {
        Some(Value::String(s)) => score_from_text(s),
        Some(v) => normalize_score(int_value(v)),
        None => normalize_score(None),
    }
}

pub fn risk_field(obj: &Map<String, Value>, key: &str) -> RiskLevel {
    RiskLevel::normalize(text_field(obj, &[key]).as_deref())
}

/// Ordered set of ids; entries that are not numeric are skipped.
pub fn id_list(value: Option<&Value>) -> Vec<i64> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    let mut ids: Vec<i64> = Vec::new();
    for id in items.iter().filter_map(int_value) {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

/// A claim as the model wrote it, before its ids are checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FindingDraft {
    pub text: String,
    pub chunk_ids: Vec<i64>,
}

/// Plain strings are uncited drafts; objects carry `text` (or `testo`) and `chunkIds`.
///
/// Items with blank text are skipped.
pub fn finding_drafts(value: Option<&Value>) -> Vec<FindingDraft> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => non_blank(Some(s)).map(|text| FindingDraft {
                text,
                chunk_ids: Vec::new(),
            }),
            Value::Object(obj) => text_field(obj, FINDING_TEXT_KEYS).map(|text| FindingDraft {
                text,
                chunk_ids: id_list(obj.get("chunkIds")),
            }),
            _ => None,
        })
        .collect()
}

/// The fields of a structured assessment response.
#[derive(Debug, Clone, PartialEq)]
pub struct ExplainableDraft {
    pub summary: String,
    pub non_conformities: Vec<FindingDraft>,
    pub recommendations: Vec<FindingDraft>,
    pub risk_level: RiskLevel,
    pub conformity_score: u8,
}

/// `None` unless the object carries a non-blank summary.
pub fn explainable_draft(obj: &Map<String, Value>) -> Option<ExplainableDraft> {
    let summary = text_field(obj, SUMMARY_KEYS)?;
    Some(ExplainableDraft {
        summary,
        non_conformities: finding_drafts(obj.get(FIELD_NON_CONFORMITIES)),
        recommendations: finding_drafts(obj.get(FIELD_RECOMMENDATIONS)),
        risk_level: risk_field(obj, FIELD_RISK_LEVEL),
        conformity_score: score_field(obj, FIELD_SCORE),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerDraft {
    /// Blank when the output was blank or carried a blank answer field.
    pub answer: String,
    pub ids: Vec<i64>,
}

/// Read `{answer|risposta, <ids_key>}`.
///
/// Output without an answer field (prose, broken JSON) becomes the answer verbatim.
pub fn answer_draft(raw: &str, ids_key: &str) -> AnswerDraft {
    let raw = raw.trim();
    if raw.is_empty() {
        return AnswerDraft {
            answer: String::new(),
            ids: Vec::new(),
        };
    }
    match interpret(raw) {
        Interpretation::Parsed(obj) => AnswerDraft {
            answer: if ANSWER_KEYS.iter().any(|key| obj.contains_key(*key)) {
                text_field(&obj, ANSWER_KEYS).unwrap_or_default()
            } else {
                raw.to_string()
            },
            ids: id_list(obj.get(ids_key)),
        },
        Interpretation::Unparseable { reason } => {
            tracing::debug!(%reason, "chat output is not JSON, using raw text");
            AnswerDraft {
                answer: raw.to_string(),
                ids: Vec::new(),
            }
        }
    }
}

/// Text under `## NAME` (or `**NAME**`) up to the next heading; empty when missing.
pub fn extract_legacy_section(text: &str, name: &str) -> String {
    let start = text
        .find(&format!("## {name}"))
        .or_else(|| text.find(&format!("**{name}**")));
    let Some(start) = start else {
        return String::new();
    };
    let Some(line_end) = text[start..].find('\n').map(|n| start + n) else {
        return String::new();
    };

    let rest = &text[line_end + 1..];
    let end = rest
        .find("\n## ")
        .or_else(|| rest.find("\n**"))
        .unwrap_or(rest.len());
    rest[..end].trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn fences_and_prose_do_not_change_the_object() {
        let bare = r#"{"a": {"b": [1, 2]}, "c": "}"}"#;
        let fenced = format!("```json\n{bare}\n```");
        let prose = format!("Ecco il risultato:\n{bare}\nSpero sia utile.");
        let fenced_no_lang = format!("```\n{bare}\n```\n");

        assert_eq!(extract_json_object(bare), bare);
        assert_eq!(extract_json_object(&fenced), bare);
        assert_eq!(extract_json_object(&prose), bare);
        assert_eq!(extract_json_object(&fenced_no_lang), bare);
    }

    #[test]
    fn missing_or_inverted_braces_fall_back_to_empty_object() {
        assert_eq!(extract_json_object("nessun json qui"), "{}");
        assert_eq!(extract_json_object("} al contrario {"), "{}");
        assert_eq!(interpret("solo testo"), Interpretation::Parsed(Map::new()));
    }

    #[test]
    fn broken_json_is_unparseable_not_an_error() {
        let out = interpret(r#"{"riepilogoConformita": "ok", "raccomandazioni": [}"#);
        assert!(matches!(out, Interpretation::Unparseable { .. }));
    }

    #[test]
    fn finding_drafts_accept_strings_objects_and_legacy_key() {
        let v = json!([
            "testo semplice",
            {"text": "con id", "chunkIds": [3, "4", "chunk 5", "x", 3, 2.6, null]},
            {"testo": "chiave legacy"},
            {"text": "   "},
            42
        ]);
        let drafts = finding_drafts(Some(&v));
        assert_eq!(
            drafts,
            vec![
                FindingDraft { text: "testo semplice".into(), chunk_ids: vec![] },
                FindingDraft { text: "con id".into(), chunk_ids: vec![3, 4, 5] },
                FindingDraft { text: "chiave legacy".into(), chunk_ids: vec![] },
            ]
        );
    }

    #[test]
    fn explainable_draft_requires_summary_and_normalizes_fields() {
        assert!(explainable_draft(&Map::new()).is_none());
        let blank = json!({"riepilogoConformita": "  ", "livelloRischio": "ALTO"});
        assert!(explainable_draft(blank.as_object().unwrap()).is_none());

        let obj = json!({
            "summary": "Sintesi",
            "livelloRischio": "rischio critico",
            "punteggioConformita": 140
        });
        let draft = explainable_draft(obj.as_object().unwrap()).unwrap();
        assert_eq!(draft.summary, "Sintesi");
        assert_eq!(draft.risk_level, RiskLevel::Critico);
        assert_eq!(draft.conformity_score, 100);
        assert!(draft.non_conformities.is_empty());
    }

    #[test]
    fn scores_are_clamped_defaulted_and_read_from_text() {
        let obj = |v: Value| json!({ "s": v }).as_object().unwrap().clone();
        assert_eq!(score_field(&obj(json!(-4)), "s"), 0);
        assert_eq!(score_field(&obj(json!(72.6)), "s"), 73);
        assert_eq!(score_field(&obj(json!("80/100")), "s"), 80);
        assert_eq!(score_field(&obj(json!("n/d")), "s"), 50);
        assert_eq!(score_field(&obj(json!(null)), "s"), 50);
        assert_eq!(score_field(&Map::new(), "s"), 50);
    }

    #[test]
    fn answer_draft_handles_aliases_ids_and_raw_text() {
        let a = answer_draft(r#"{"risposta": "Sì", "chunkIds": [1]}"#, "chunkIds");
        assert_eq!(a.answer, "Sì");
        assert_eq!(a.ids, vec![1]);

        let b = answer_draft(r#"{"answer": "ok", "sourceIds": ["SRC2", "2", 3]}"#, "sourceIds");
        assert_eq!(b.ids, vec![2, 3]);

        let c = answer_draft("{risposta non json", "chunkIds");
        assert_eq!(c.answer, "{risposta non json");
        assert!(c.ids.is_empty());

        let broken = answer_draft(r#"{"answer": "a", "chunkIds": [1,}"#, "chunkIds");
        assert_eq!(broken.answer, r#"{"answer": "a", "chunkIds": [1,}"#);

        let d = answer_draft("   ", "chunkIds");
        assert_eq!(d.answer, "");

        let blank_field = answer_draft(r#"{"answer": "  ", "chunkIds": [3]}"#, "chunkIds");
        assert_eq!(blank_field.answer, "");
        assert_eq!(blank_field.ids, vec![3]);
    }

    #[test]
    fn legacy_sections_are_sliced_between_headings() {
        let text = "Intro\n## RIEPILOGO CONFORMITÀ\nTutto bene\n\n## NON CONFORMITÀ RILEVATE\n- A\n- B\n**LIVELLO DI RISCHIO**\nAlto\n";
        assert_eq!(extract_legacy_section(text, SECTION_SUMMARY), "Tutto bene");
        assert_eq!(extract_legacy_section(text, SECTION_NON_CONFORMITIES), "- A\n- B");
        assert_eq!(extract_legacy_section(text, SECTION_RISK_LEVEL), "Alto");
        assert_eq!(extract_legacy_section(text, SECTION_SCORE), "");
        // Case-sensitive heading text.
        assert_eq!(extract_legacy_section("## riepilogo conformità\nx", SECTION_SUMMARY), "");
    }
}
