use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::domain::{ChatRole, ChatTurn};
use crate::error::AppError;

pub const CSV_HEADER: [&str; 7] = [
    "indice",
    "ruolo",
    "messaggio",
    "data_ora_messaggio",
    "data_ora_inizio_conversazione",
    "data_ora_fine_conversazione",
    "data_ora_export_csv",
];

/// One timestamped chat message as kept by a presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotMessage {
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub ts: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationSnapshot {
    #[serde(default)]
    pub messages: Vec<SnapshotMessage>,
}

impl ConversationSnapshot {
    /// History turns in the shape the chat pipelines accept.
    pub fn turns(&self) -> Vec<ChatTurn> {
        self.messages
            .iter()
            .map(|m| ChatTurn {
                role: m.role.clone(),
                content: m.content.clone(),
            })
            .collect()
    }
}

fn role_label(role: &str) -> String {
    let turn = ChatTurn {
        role: role.to_string(),
        content: String::new(),
    };
    match turn.parsed_role() {
        Some(ChatRole::User) => "utente".to_string(),
        Some(ChatRole::Assistant) => "assistente".to_string(),
        None => role.trim().to_lowercase(),
    }
}

/// RFC3339 timestamps render as `dd/mm/yyyy HH:MM:SS` (offset kept as given); anything else is passed through.
pub fn format_csv_datetime(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(dt) = OffsetDateTime::parse(trimmed, &Rfc3339) else {
        return trimmed.to_string();
    };
    dt.format(format_description!(
        "[day]/[month]/[year] [hour]:[minute]:[second]"
    ))
    .unwrap_or_else(|_| trimmed.to_string())
}

/// Keep each message on one physical CSV line.
fn escape_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n").replace('\n', "\\n")
}

/// Render a conversation as CSV (header always present, one row per message).
pub fn export_conversation_csv(
    snapshot: &ConversationSnapshot,
    exported_at: &str,
) -> Result<String, AppError> {
    let started_at = snapshot
        .messages
        .first()
        .map(|m| format_csv_datetime(&m.ts))
        .unwrap_or_default();
    let ended_at = snapshot
        .messages
        .last()
        .map(|m| format_csv_datetime(&m.ts))
        .unwrap_or_default();
    let exported_at = format_csv_datetime(exported_at);

    let mut wtr = csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new());
    wtr.write_record(CSV_HEADER).map_err(|e| {
        AppError::new("EXPORT_CSV_FAILED", "Failed to write CSV header").with_details(e.to_string())
    })?;

    for (idx, msg) in snapshot.messages.iter().enumerate() {
        let index = (idx + 1).to_string();
        let role = role_label(&msg.role);
        let content = escape_newlines(&msg.content);
        let sent_at = format_csv_datetime(&msg.ts);
        wtr.write_record([
            index.as_str(),
            role.as_str(),
            content.as_str(),
            sent_at.as_str(),
            started_at.as_str(),
            ended_at.as_str(),
            exported_at.as_str(),
        ])
        .map_err(|e| {
            AppError::new("EXPORT_CSV_FAILED", "Failed to write CSV row")
                .with_details(format!("row={}: {e}", idx + 1))
        })?;
    }

    let bytes = wtr.into_inner().map_err(|e| {
        AppError::new("EXPORT_CSV_FAILED", "Failed to flush CSV").with_details(e.to_string())
    })?;
    tracing::debug!(rows = snapshot.messages.len(), "exported conversation csv");
    String::from_utf8(bytes).map_err(|e| {
        AppError::new("EXPORT_CSV_FAILED", "CSV output is not valid UTF-8").with_details(e.to_string())
    })
}
