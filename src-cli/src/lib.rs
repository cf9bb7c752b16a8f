use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mca_ai::assess::{generate_assessment, AssessmentOutcome};
use mca_ai::chat::{assessment_chat, chat, AssessmentChatRequest, ChatRequest, ChatResponse};
use mca_ai::llm::ollama_llm::OllamaLlm;
use mca_ai::ollama::OllamaClient;
use mca_ai::retrieve::HttpRetriever;
use mca_core::domain::{AssessmentRecord, ChatTurn, Machine, MachineAggregate, MachineInput};
use mca_core::error::AppError;
use mca_core::export::{export_conversation_csv, ConversationSnapshot};
use mca_core::repo;
use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub const DB_FILE_NAME: &str = "mca.sqlite";

/// Process exit status when a referenced machine or assessment does not exist.
pub const EXIT_NOT_FOUND: u8 = 2;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub ollama_base_url: String,
    pub answer_model: String,
    pub search_url: String,
    pub http_timeout: Duration,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`AppConfig::from_env`] over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Self {
            data_dir: var("MCA_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            ollama_base_url: var("OLLAMA_BASE_URL")
                .unwrap_or_else(|| "http://127.0.0.1:11434".to_string()),
            answer_model: var("MCA_ANSWER_MODEL").unwrap_or_else(|| "llama3.2:latest".to_string()),
            search_url: var("MCA_SEARCH_URL")
                .unwrap_or_else(|| "http://127.0.0.1:8000/search".to_string()),
            http_timeout: Duration::from_secs(
                var("MCA_HTTP_TIMEOUT_SECS")
                    .and_then(|v| v.parse::<u64>().ok())
                    .filter(|secs| *secs > 0)
                    .unwrap_or(120),
            ),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE_NAME)
    }

    fn llm(&self) -> Result<OllamaLlm, AppError> {
        let client = OllamaClient::new(&self.ollama_base_url)?;
        Ok(OllamaLlm::new(client, self.answer_model.clone(), self.http_timeout))
    }

    fn retriever(&self) -> HttpRetriever {
        HttpRetriever::new(self.search_url.clone(), self.http_timeout)
    }
}

#[derive(Debug, serde::Serialize)]
pub struct InitDbResponse {
    pub db_path: String,
}

#[derive(Debug, serde::Serialize)]
pub struct DeleteResponse {
    pub ok: bool,
    pub deleted_assessments: usize,
}

#[derive(Debug, serde::Serialize)]
pub struct AiHealthStatus {
    pub ok: bool,
    pub message: String,
}

/// Exit status for a failed command: [`EXIT_NOT_FOUND`] for unknown ids, 1 otherwise.
pub fn exit_status(err: &AppError) -> u8 {
    if err.is_not_found() {
        EXIT_NOT_FOUND
    } else {
        1
    }
}

pub fn now_rfc3339_utc() -> Result<String, AppError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|e| AppError::new("TIME_FORMAT_FAILED", "Failed to format time").with_details(e.to_string()))
}

fn open_workspace(config: &AppConfig) -> Result<rusqlite::Connection, AppError> {
    fs::create_dir_all(&config.data_dir).map_err(|e| {
        AppError::new("DB_PATH_FAILED", "Failed to create data directory")
            .with_details(format!("path={}: {e}", config.data_dir.display()))
    })?;
    mca_core::db::open_and_migrate(&config.db_path())
}

fn read_text(path: &Path) -> Result<String, AppError> {
    fs::read_to_string(path).map_err(|e| {
        AppError::new("CLI_READ_FAILED", "Failed to read input file")
            .with_details(format!("path={}: {e}", path.display()))
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HistoryFile {
    Turns(Vec<ChatTurn>),
    Snapshot(ConversationSnapshot),
}

fn read_snapshot(path: &Path) -> Result<ConversationSnapshot, AppError> {
    let text = read_text(path)?;
    let parsed: HistoryFile = serde_json::from_str(&text).map_err(|e| {
        AppError::new("CLI_INVALID_JSON", "Conversation file is not valid JSON")
            .with_details(format!("path={}: {e}", path.display()))
    })?;
    Ok(match parsed {
        HistoryFile::Snapshot(snapshot) => snapshot,
        HistoryFile::Turns(turns) => ConversationSnapshot {
            messages: turns
                .into_iter()
                .map(|t| mca_core::export::SnapshotMessage {
                    role: t.role,
                    content: t.content,
                    ts: String::new(),
                })
                .collect(),
        },
    })
}

/// History turns from a JSON file holding either `[{role, content}]` or `{messages: [...]}`.
pub fn read_history(path: Option<&Path>) -> Result<Vec<ChatTurn>, AppError> {
    match path {
        None => Ok(Vec::new()),
        Some(p) => Ok(read_snapshot(p)?.turns()),
    }
}

pub fn init_db(config: &AppConfig) -> Result<InitDbResponse, AppError> {
    let _conn = open_workspace(config)?;
    Ok(InitDbResponse {
        db_path: config.db_path().to_string_lossy().to_string(),
    })
}

pub fn machine_add(config: &AppConfig, input: MachineInput) -> Result<Machine, AppError> {
    let conn = open_workspace(config)?;
    repo::create_machine(&conn, input, &now_rfc3339_utc()?)
}

pub fn machine_list(
    config: &AppConfig,
    search: Option<&str>,
    category: Option<&str>,
) -> Result<Vec<Machine>, AppError> {
    let conn = open_workspace(config)?;
    match (search, category) {
        (Some(needle), _) => repo::search_machines_by_name(&conn, needle),
        (None, Some(category)) => repo::list_machines_by_category(&conn, category),
        (None, None) => repo::list_machines(&conn),
    }
}

pub fn machine_show(config: &AppConfig, machine_id: i64) -> Result<MachineAggregate, AppError> {
    let conn = open_workspace(config)?;
    repo::load_machine_aggregate(&conn, machine_id)
}

pub fn machine_delete(config: &AppConfig, machine_id: i64) -> Result<DeleteResponse, AppError> {
    let mut conn = open_workspace(config)?;
    let deleted_assessments = repo::delete_machine(&mut conn, machine_id)?;
    Ok(DeleteResponse {
        ok: true,
        deleted_assessments,
    })
}

pub fn assess(config: &AppConfig, machine_id: i64) -> Result<AssessmentOutcome, AppError> {
    let conn = open_workspace(config)?;
    let llm = config.llm()?;
    let retriever = config.retriever();
    generate_assessment(&conn, &llm, &retriever, machine_id, &now_rfc3339_utc()?)
}

pub fn assessments(config: &AppConfig, machine_id: i64) -> Result<Vec<AssessmentRecord>, AppError> {
    let conn = open_workspace(config)?;
    repo::get_machine(&conn, machine_id)?;
    repo::list_assessments_for_machine(&conn, machine_id)
}

pub fn chat_once(
    config: &AppConfig,
    question: &str,
    history: Option<&Path>,
    system_prompt: Option<&Path>,
) -> Result<ChatResponse, AppError> {
    let system_prompt = system_prompt.map(read_text).transpose()?;
    let req = ChatRequest {
        question: question.to_string(),
        history: read_history(history)?,
        system_prompt,
    };
    let llm = config.llm()?;
    chat(&llm, &config.retriever(), &req)
}

pub fn assessment_chat_once(
    config: &AppConfig,
    assessment_id: i64,
    question: &str,
    history: Option<&Path>,
) -> Result<ChatResponse, AppError> {
    let req = AssessmentChatRequest {
        question: question.to_string(),
        history: read_history(history)?,
    };
    let conn = open_workspace(config)?;
    let llm = config.llm()?;
    assessment_chat(&conn, &llm, assessment_id, &req)
}

pub fn export_chat(conversation: &Path) -> Result<String, AppError> {
    let snapshot = read_snapshot(conversation)?;
    export_conversation_csv(&snapshot, &now_rfc3339_utc()?)
}

pub fn ai_health_check(config: &AppConfig) -> Result<AiHealthStatus, AppError> {
    let client = OllamaClient::new(&config.ollama_base_url)?;
    client.health_check()?;
    Ok(AiHealthStatus {
        ok: true,
        message: format!("Ollama reachable on {}", client.base_url()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> AppConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset_or_blank() {
        let config = config_from(&[("MCA_ANSWER_MODEL", "  ")]);
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.db_path(), PathBuf::from("./data").join("mca.sqlite"));
        assert_eq!(config.ollama_base_url, "http://127.0.0.1:11434");
        assert_eq!(config.answer_model, "llama3.2:latest");
        assert_eq!(config.search_url, "http://127.0.0.1:8000/search");
        assert_eq!(config.http_timeout, Duration::from_secs(120));
    }

    #[test]
    fn overrides_are_read() {
        let config = config_from(&[
            ("MCA_DATA_DIR", "/tmp/mca"),
            ("MCA_ANSWER_MODEL", "qwen2.5:7b"),
            ("MCA_HTTP_TIMEOUT_SECS", "30"),
        ]);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/mca"));
        assert_eq!(config.answer_model, "qwen2.5:7b");
        assert_eq!(config.http_timeout, Duration::from_secs(30));

        let bad = config_from(&[("MCA_HTTP_TIMEOUT_SECS", "0")]);
        assert_eq!(bad.http_timeout, Duration::from_secs(120));
    }

    #[test]
    fn remote_model_host_is_rejected_before_any_call() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_from(&[
            ("MCA_DATA_DIR", dir.path().to_str().expect("utf8 path")),
            ("OLLAMA_BASE_URL", "http://10.0.0.5:11434"),
        ]);
        let err = chat_once(&config, "Ripari?", None, None).unwrap_err();
        assert_eq!(err.code, "AI_REMOTE_NOT_ALLOWED");
        assert_eq!(exit_status(&err), 1);
    }

    #[test]
    fn machines_round_trip_through_the_workspace() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config_from(&[("MCA_DATA_DIR", dir.path().join("nested").to_str().expect("utf8 path"))]);

        let init = init_db(&config).expect("init");
        assert!(init.db_path.ends_with("mca.sqlite"));

        let machine = machine_add(
            &config,
            MachineInput {
                name: "Cesoia".to_string(),
                category: Some("Taglio".to_string()),
                ..MachineInput::default()
            },
        )
        .expect("add");
        assert_eq!(machine_list(&config, None, Some("taglio")).unwrap().len(), 1);
        assert_eq!(machine_show(&config, machine.id).unwrap().assessments.len(), 0);
        assert!(assessments(&config, machine.id).unwrap().is_empty());
        let missing = assessments(&config, 99).unwrap_err();
        assert_eq!(missing.code, "MACHINE_NOT_FOUND");
        assert_eq!(exit_status(&missing), EXIT_NOT_FOUND);

        let deleted = machine_delete(&config, machine.id).expect("delete");
        assert_eq!(deleted.deleted_assessments, 0);
        assert!(machine_list(&config, None, None).unwrap().is_empty());
    }

    #[test]
    fn history_files_accept_both_shapes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bare = dir.path().join("bare.json");
        fs::write(&bare, r#"[{"role":"user","content":"ciao"}]"#).unwrap();
        let wrapped = dir.path().join("wrapped.json");
        fs::write(
            &wrapped,
            r#"{"messages":[{"role":"assistant","content":"salve","ts":"2026-01-01T00:00:00Z"}]}"#,
        )
        .unwrap();

        assert_eq!(read_history(Some(&bare)).unwrap(), vec![ChatTurn::user("ciao")]);
        assert_eq!(read_history(Some(&wrapped)).unwrap(), vec![ChatTurn::assistant("salve")]);
        assert!(read_history(None).unwrap().is_empty());

        let broken = dir.path().join("broken.json");
        fs::write(&broken, "not json").unwrap();
        assert_eq!(read_history(Some(&broken)).unwrap_err().code, "CLI_INVALID_JSON");
        assert_eq!(
            read_history(Some(&dir.path().join("missing.json"))).unwrap_err().code,
            "CLI_READ_FAILED"
        );
    }

    #[test]
    fn export_renders_csv_from_a_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("conv.json");
        fs::write(
            &path,
            r#"{"messages":[{"role":"user","content":"a","ts":"2026-01-01T08:00:00Z"}]}"#,
        )
        .unwrap();
        let csv = export_chat(&path).expect("export");
        let mut lines = csv.split("\r\n");
        assert!(lines.next().unwrap().starts_with("indice,ruolo,messaggio"));
        assert!(lines.next().unwrap().starts_with("1,utente,a,01/01/2026 08:00:00,"));
    }
}
