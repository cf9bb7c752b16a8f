#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;

use mca_ai::llm::Llm;
use mca_ai::retrieve::{RetrievalHit, Retriever};
use mca_core::db;
use mca_core::domain::{Machine, MachineInput};
use mca_core::error::AppError;
use mca_core::repo::create_machine;
use rusqlite::Connection;

pub const NOW: &str = "2026-03-01T10:00:00Z";

/// Replays scripted outputs in order and records every prompt it was given.
pub struct ScriptedLlm {
    outputs: RefCell<VecDeque<String>>,
    pub calls: RefCell<Vec<(String, String)>>,
}

impl ScriptedLlm {
    pub fn new(outputs: &[&str]) -> Self {
        Self {
            outputs: RefCell::new(outputs.iter().map(|s| s.to_string()).collect()),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }

    pub fn system(&self, idx: usize) -> String {
        self.calls.borrow()[idx].0.clone()
    }

    pub fn user(&self, idx: usize) -> String {
        self.calls.borrow()[idx].1.clone()
    }
}

impl Llm for ScriptedLlm {
    fn generate(&self, system: &str, user: &str) -> Result<String, AppError> {
        self.calls
            .borrow_mut()
            .push((system.to_string(), user.to_string()));
        self.outputs
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| AppError::new("AI_GENERATE_FAILED", "no scripted output left"))
    }
}

pub struct FixedRetriever {
    hits: Vec<RetrievalHit>,
    pub queries: RefCell<Vec<(String, usize)>>,
}

impl FixedRetriever {
    pub fn new(hits: Vec<RetrievalHit>) -> Self {
        Self {
            hits,
            queries: RefCell::new(Vec::new()),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn call_count(&self) -> usize {
        self.queries.borrow().len()
    }
}

impl Retriever for FixedRetriever {
    fn search(&self, query: &str, top_k: usize) -> Result<Vec<RetrievalHit>, AppError> {
        self.queries.borrow_mut().push((query.to_string(), top_k));
        Ok(self.hits.clone())
    }
}

pub fn hit(file: &str, page: i64, text: &str, score: f64) -> RetrievalHit {
    RetrievalHit::new(text)
        .with_score(score)
        .with_meta("fileName", file)
        .with_meta("page", page)
}

/// Three hits over two documents, best first.
pub fn regulation_hits() -> Vec<RetrievalHit> {
    vec![
        hit(
            "regolamento.pdf",
            12,
            "Articolo 5, paragrafo 2: i ripari fissi devono impedire l'accesso alle zone pericolose.",
            0.91,
        ),
        hit(
            "regolamento.pdf",
            30,
            "Comma 3: il dispositivo di arresto di emergenza deve essere sempre accessibile.",
            0.84,
        ),
        hit("manuale.pdf", 4, "Manutenzione: verificare i ripari ogni 500 ore.", 0.42),
    ]
}

pub fn setup() -> Connection {
    let mut conn = db::open_in_memory().expect("open");
    db::migrate(&mut conn).expect("migrate");
    conn
}

pub fn add_press(conn: &Connection) -> Machine {
    create_machine(
        conn,
        MachineInput {
            name: "Pressa P1".to_string(),
            description: Some("Pressa idraulica a due montanti".to_string()),
            manufacturer: Some("ACME".to_string()),
            category: Some("Presse".to_string()),
            production_year: Some(2018),
            ..MachineInput::default()
        },
        "2026-01-01T00:00:00Z",
    )
    .expect("create machine")
}

pub fn add_named_machine(conn: &Connection, name: &str) -> Machine {
    create_machine(
        conn,
        MachineInput {
            name: name.to_string(),
            ..MachineInput::default()
        },
        "2026-01-01T00:00:00Z",
    )
    .expect("create machine")
}
