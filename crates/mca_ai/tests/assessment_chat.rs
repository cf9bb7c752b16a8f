mod common;

use pretty_assertions::assert_eq;
use rusqlite::Connection;

use common::{add_named_machine, add_press, setup, ScriptedLlm};
use mca_ai::chat::prompts::ASSESSMENT_CHAT_SYSTEM_PROMPT;
use mca_ai::chat::{assessment_chat, AssessmentChatRequest, NO_INFO_MESSAGE};
use mca_core::domain::{AssessmentRecord, ChatTurn, Finding, NewAssessment, RiskLevel, Source};
use mca_core::repo::save_assessment;

fn source(file: &str, page: i64, excerpt: &str) -> Source {
    Source {
        reference: format!("{file}, Pag. {page}"),
        file_name: file.to_string(),
        page: Some(page),
        excerpt: excerpt.to_string(),
        confidence: Some(0.8),
    }
}

fn guard_source() -> Source {
    source("regolamento.pdf", 12, "I ripari fissi devono impedire l'accesso.")
}

fn stop_source() -> Source {
    source("regolamento.pdf", 30, "L'arresto di emergenza deve essere accessibile.")
}

fn store(conn: &Connection, machine_id: i64, defect: &str, nc_sources: Vec<Source>) -> AssessmentRecord {
    save_assessment(
        conn,
        NewAssessment {
            machine_id,
            raw_output: "{}".to_string(),
            summary: format!("Riepilogo {defect}"),
            non_conformities: vec![Finding {
                text: defect.to_string(),
                sources: nc_sources,
            }],
            recommendations: vec![Finding {
                text: format!("Correggere {defect}"),
                sources: vec![guard_source()],
            }],
            risk_level: RiskLevel::Alto,
            conformity_score: 45,
            documents_used: vec!["regolamento.pdf".to_string()],
            created_at: "2026-02-01T00:00:00Z".to_string(),
        },
    )
    .expect("save")
}

fn ask(question: &str) -> AssessmentChatRequest {
    AssessmentChatRequest {
        question: question.to_string(),
        history: Vec::new(),
    }
}

#[test]
fn context_comes_only_from_the_requested_assessment() {
    let conn = setup();
    let machine_a = add_named_machine(&conn, "Macchina A");
    let machine_b = add_named_machine(&conn, "Macchina B");
    let a = store(&conn, machine_a.id, "DIFETTO_A", vec![guard_source()]);
    let b = store(&conn, machine_b.id, "DIFETTO_B", vec![stop_source()]);

    let llm = ScriptedLlm::new(&[
        r#"{"answer":"Manca il riparo.","sourceIds":["SRC1"]}"#,
        r#"{"answer":"Arresto non accessibile.","sourceIds":["SRC1"]}"#,
    ]);
    let resp_a = assessment_chat(&conn, &llm, a.id, &ask("Cosa manca?")).expect("chat a");
    let resp_b = assessment_chat(&conn, &llm, b.id, &ask("Cosa manca?")).expect("chat b");

    assert_eq!(llm.system(0), ASSESSMENT_CHAT_SYSTEM_PROMPT);
    let user_a = llm.user(0);
    assert!(user_a.contains("Nome: Macchina A\n"));
    assert!(user_a.contains("DIFETTO_A"));
    assert!(user_a.contains("Livello Rischio: ALTO"));
    assert!(!user_a.contains("Macchina B"));
    assert!(!user_a.contains("DIFETTO_B"));
    assert!(!user_a.contains("arresto di emergenza"));

    let user_b = llm.user(1);
    assert!(user_b.contains("Nome: Macchina B\n"));
    assert!(user_b.contains("DIFETTO_B"));
    assert!(!user_b.contains("Macchina A"));
    assert!(!user_b.contains("DIFETTO_A"));

    assert_eq!(resp_a.answer, "Manca il riparo.");
    assert_eq!(resp_a.sources, vec![guard_source()]);
    assert_eq!(resp_b.answer, "Arresto non accessibile.");
    assert_eq!(resp_b.sources, vec![stop_source()]);
}

#[test]
fn shared_sources_get_one_id() {
    let conn = setup();
    let machine = add_press(&conn);
    let record = store(&conn, machine.id, "Riparo assente", vec![guard_source(), stop_source()]);

    let llm = ScriptedLlm::new(&[r#"{"answer":"ok","sourceIds":[]}"#]);
    assessment_chat(&conn, &llm, record.id, &ask("Fonti?")).expect("chat");

    let user = llm.user(0);
    assert!(user.contains("[NC1] Riparo assente\n  Fonti: SRC1, SRC2\n"));
    assert!(user.contains("[REC1] Correggere Riparo assente\n  Fonti: SRC1\n"));
    assert_eq!(user.matches("[SRC1] ").count(), 1);
    assert_eq!(user.matches("[SRC2] ").count(), 1);
    assert!(!user.contains("[SRC3]"));
}

#[test]
fn textual_and_numeric_ids_resolve_alike() {
    let conn = setup();
    let machine = add_press(&conn);
    let record = store(&conn, machine.id, "Riparo assente", vec![guard_source(), stop_source()]);

    for output in [
        r#"{"answer":"Vedi arresto.","sourceIds":["SRC2"]}"#,
        r#"{"answer":"Vedi arresto.","sourceIds":[2, "SRC2", 9]}"#,
    ] {
        let llm = ScriptedLlm::new(&[output]);
        let resp = assessment_chat(&conn, &llm, record.id, &ask("Arresto?")).expect("chat");
        assert_eq!(resp.sources, vec![stop_source()]);
    }
}

#[test]
fn uncited_answer_defaults_to_leading_table_entries() {
    let conn = setup();
    let machine = add_press(&conn);
    let record = store(&conn, machine.id, "Riparo assente", vec![guard_source(), stop_source()]);

    let llm = ScriptedLlm::new(&["Il riparo va installato subito."]);
    let resp = assessment_chat(&conn, &llm, record.id, &ask("Priorità?")).expect("chat");
    assert_eq!(resp.answer, "Il riparo va installato subito.");
    assert_eq!(resp.sources, vec![guard_source(), stop_source()]);
}

#[test]
fn blank_answer_becomes_not_found_message() {
    let conn = setup();
    let machine = add_press(&conn);
    let record = store(&conn, machine.id, "Riparo assente", vec![]);

    let llm = ScriptedLlm::new(&[r#"{"answer":"","sourceIds":[]}"#]);
    let resp = assessment_chat(&conn, &llm, record.id, &ask("Altro?")).expect("chat");
    assert_eq!(resp.answer, NO_INFO_MESSAGE);
    assert!(resp.sources.is_empty());
}

#[test]
fn history_follows_the_record_and_precedes_the_question() {
    let conn = setup();
    let machine = add_press(&conn);
    let record = store(&conn, machine.id, "Riparo assente", vec![guard_source()]);

    let llm = ScriptedLlm::new(&[r#"{"answer":"ok","sourceIds":[1]}"#]);
    let req = AssessmentChatRequest {
        question: "E il costo?".to_string(),
        history: vec![ChatTurn::user("Cosa manca?"), ChatTurn::assistant("Un riparo.")],
    };
    assessment_chat(&conn, &llm, record.id, &req).expect("chat");

    let user = llm.user(0);
    let record_at = user.find("Riparo assente").expect("record");
    let history_at = user.find("Utente: Cosa manca?").expect("history");
    let question_at = user.find("E il costo?").expect("question");
    assert!(record_at < history_at && history_at < question_at);
}

#[test]
fn unknown_assessment_and_blank_question_fail_early() {
    let conn = setup();
    let machine = add_press(&conn);
    let record = store(&conn, machine.id, "Riparo assente", vec![]);
    let llm = ScriptedLlm::new(&[]);

    let err = assessment_chat(&conn, &llm, 999, &ask("Cosa manca?")).unwrap_err();
    assert_eq!(err.code, "ASSESSMENT_NOT_FOUND");

    let err = assessment_chat(&conn, &llm, record.id, &ask("  ")).unwrap_err();
    assert_eq!(err.code, "CHAT_QUESTION_REQUIRED");
    assert_eq!(llm.call_count(), 0);
}
