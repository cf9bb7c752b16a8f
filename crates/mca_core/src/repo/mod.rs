use rusqlite::{params, Connection, OptionalExtension, Params, Row};

use crate::domain::{
    AssessmentRecord, Finding, Machine, MachineAggregate, MachineInput, NewAssessment, RiskLevel,
};
use crate::error::AppError;
use crate::normalize::{findings_from_bullet_text, non_blank, normalize_score};

pub const ASSESSMENT_VERSION: &str = "1.0";

const MACHINE_COLUMNS: &str = r#"
    id, name, description, manufacturer, model, serial_number,
    production_year, category, technical_specs, created_at, updated_at
"#;

const ASSESSMENT_COLUMNS: &str = r#"
    id, machine_id, raw_output, summary, non_conformities_json, recommendations_json,
    risk_level, conformity_score, documents_used_json, created_at, version
"#;

fn machine_from_row(row: &Row<'_>) -> Result<Machine, rusqlite::Error> {
    Ok(Machine {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        manufacturer: row.get(3)?,
        model: row.get(4)?,
        serial_number: row.get(5)?,
        production_year: row.get(6)?,
        category: row.get(7)?,
        technical_specs: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

/// Trim every field; blank optionals become `None`. `name` is required.
fn normalize_machine_input(input: MachineInput) -> Result<MachineInput, AppError> {
    let name = input.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::new(
            "MACHINE_NAME_REQUIRED",
            "Il campo nome è obbligatorio",
        ));
    }
    Ok(MachineInput {
        name,
        description: non_blank(input.description.as_deref()),
        manufacturer: non_blank(input.manufacturer.as_deref()),
        model: non_blank(input.model.as_deref()),
        serial_number: non_blank(input.serial_number.as_deref()),
        production_year: input.production_year,
        category: non_blank(input.category.as_deref()),
        technical_specs: non_blank(input.technical_specs.as_deref()),
    })
}

fn machine_not_found(id: i64) -> AppError {
    AppError::new("MACHINE_NOT_FOUND", "Macchinario non trovato").with_details(format!("id={id}"))
}

fn assessment_not_found(id: i64) -> AppError {
    AppError::new("ASSESSMENT_NOT_FOUND", "Assessment non trovato").with_details(format!("id={id}"))
}

fn query_machines<P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<Machine>, AppError> {
    let mut stmt = conn.prepare(sql).map_err(|e| {
        AppError::new("DB_QUERY_FAILED", "Failed to prepare machines query")
            .with_details(e.to_string())
    })?;
    let rows = stmt.query_map(params, machine_from_row).map_err(|e| {
        AppError::new("DB_QUERY_FAILED", "Failed to query machines").with_details(e.to_string())
    })?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r.map_err(|e| {
            AppError::new("DB_DECODE_FAILED", "Failed to decode machine row")
                .with_details(e.to_string())
        })?);
    }
    Ok(out)
}

pub fn create_machine(conn: &Connection, input: MachineInput, now: &str) -> Result<Machine, AppError> {
    let input = normalize_machine_input(input)?;
    conn.execute(
        r#"
        INSERT INTO machines(
          name, description, manufacturer, model, serial_number,
          production_year, category, technical_specs, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
        "#,
        params![
            input.name,
            input.description,
            input.manufacturer,
            input.model,
            input.serial_number,
            input.production_year,
            input.category,
            input.technical_specs,
            now
        ],
    )
    .map_err(|e| {
        AppError::new("DB_WRITE_FAILED", "Failed to insert machine").with_details(e.to_string())
    })?;

    let id = conn.last_insert_rowid();
    tracing::info!(machine_id = id, name = %input.name, "created machine");
    get_machine(conn, id)
}

pub fn update_machine(
    conn: &Connection,
    id: i64,
    input: MachineInput,
    now: &str,
) -> Result<Machine, AppError> {
    let input = normalize_machine_input(input)?;
    let changed = conn
        .execute(
            r#"
            UPDATE machines SET
              name = ?1, description = ?2, manufacturer = ?3, model = ?4, serial_number = ?5,
              production_year = ?6, category = ?7, technical_specs = ?8, updated_at = ?9
            WHERE id = ?10
            "#,
            params![
                input.name,
                input.description,
                input.manufacturer,
                input.model,
                input.serial_number,
                input.production_year,
                input.category,
                input.technical_specs,
                now,
                id
            ],
        )
        .map_err(|e| {
            AppError::new("DB_WRITE_FAILED", "Failed to update machine").with_details(e.to_string())
        })?;
    if changed == 0 {
        return Err(machine_not_found(id));
    }
    get_machine(conn, id)
}

pub fn find_machine(conn: &Connection, id: i64) -> Result<Option<Machine>, AppError> {
    conn.query_row(
        &format!("SELECT {MACHINE_COLUMNS} FROM machines WHERE id = ?1"),
        [id],
        machine_from_row,
    )
    .optional()
    .map_err(|e| {
        AppError::new("DB_QUERY_FAILED", "Failed to query machine").with_details(e.to_string())
    })
}

pub fn get_machine(conn: &Connection, id: i64) -> Result<Machine, AppError> {
    find_machine(conn, id)?.ok_or_else(|| machine_not_found(id))
}

/// Newest first; ties broken by id so the order is deterministic.
pub fn list_machines(conn: &Connection) -> Result<Vec<Machine>, AppError> {
    query_machines(
        conn,
        &format!("SELECT {MACHINE_COLUMNS} FROM machines ORDER BY created_at DESC, id DESC"),
        [],
    )
}

/// Case-insensitive substring match on the name (Unicode-aware, done in Rust).
pub fn search_machines_by_name(conn: &Connection, needle: &str) -> Result<Vec<Machine>, AppError> {
    let needle = needle.trim().to_lowercase();
    Ok(list_machines(conn)?
        .into_iter()
        .filter(|m| m.name.to_lowercase().contains(&needle))
        .collect())
}

pub fn list_machines_by_category(conn: &Connection, category: &str) -> Result<Vec<Machine>, AppError> {
    let category = category.trim().to_lowercase();
    Ok(list_machines(conn)?
        .into_iter()
        .filter(|m| {
            m.category
                .as_deref()
                .map(|c| c.to_lowercase() == category)
                .unwrap_or(false)
        })
        .collect())
}

/// Delete a machine and every assessment it owns in one transaction.
///
/// Returns the number of assessments removed.
pub fn delete_machine(conn: &mut Connection, id: i64) -> Result<usize, AppError> {
    let tx = conn.transaction().map_err(|e| {
        AppError::new("DB_TX_FAILED", "Failed to start delete transaction").with_details(e.to_string())
    })?;

    let removed = tx
        .execute("DELETE FROM assessments WHERE machine_id = ?1", [id])
        .map_err(|e| {
            AppError::new("DB_WRITE_FAILED", "Failed to delete machine assessments")
                .with_details(e.to_string())
        })?;
    let deleted = tx
        .execute("DELETE FROM machines WHERE id = ?1", [id])
        .map_err(|e| {
            AppError::new("DB_WRITE_FAILED", "Failed to delete machine").with_details(e.to_string())
        })?;
    if deleted == 0 {
        // Dropping `tx` rolls back.
        return Err(machine_not_found(id));
    }

    tx.commit().map_err(|e| {
        AppError::new("DB_TX_FAILED", "Failed to commit delete transaction").with_details(e.to_string())
    })?;
    tracing::info!(machine_id = id, assessments_removed = removed, "deleted machine");
    Ok(removed)
}

/// Findings columns hold a JSON array; rows written as bullet text decode as uncited findings.
fn decode_findings(raw: &str) -> Vec<Finding> {
    let trimmed = raw.trim();
    if trimmed.starts_with('[') {
        match serde_json::from_str::<Vec<Finding>>(trimmed) {
            Ok(findings) => return findings,
            Err(e) => tracing::debug!(error = %e, "findings column is not a findings array"),
        }
    }
    findings_from_bullet_text(trimmed)
}

fn decode_documents(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if let Ok(list) = serde_json::from_str::<Vec<String>>(trimmed) {
        return list;
    }
    trimmed
        .split(", ")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn assessment_from_row(row: &Row<'_>) -> Result<AssessmentRecord, rusqlite::Error> {
    let non_conformities: String = row.get(4)?;
    let recommendations: String = row.get(5)?;
    let risk_raw: String = row.get(6)?;
    let score: i64 = row.get(7)?;
    let documents: String = row.get(8)?;

    Ok(AssessmentRecord {
        id: row.get(0)?,
        machine_id: row.get(1)?,
        raw_output: row.get(2)?,
        summary: row.get(3)?,
        non_conformities: decode_findings(&non_conformities),
        recommendations: decode_findings(&recommendations),
        risk_level: risk_raw
            .parse::<RiskLevel>()
            .unwrap_or_else(|_| RiskLevel::normalize(Some(&risk_raw))),
        conformity_score: normalize_score(Some(score)),
        documents_used: decode_documents(&documents),
        created_at: row.get(9)?,
        version: row.get(10)?,
    })
}

fn query_assessments<P: Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<AssessmentRecord>, AppError> {
    let mut stmt = conn.prepare(sql).map_err(|e| {
        AppError::new("DB_QUERY_FAILED", "Failed to prepare assessments query")
            .with_details(e.to_string())
    })?;
    let rows = stmt.query_map(params, assessment_from_row).map_err(|e| {
        AppError::new("DB_QUERY_FAILED", "Failed to query assessments").with_details(e.to_string())
    })?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r.map_err(|e| {
            AppError::new("DB_DECODE_FAILED", "Failed to decode assessment row")
                .with_details(e.to_string())
        })?);
    }
    Ok(out)
}

fn encode_json<T: serde::Serialize + ?Sized>(value: &T, what: &str) -> Result<String, AppError> {
    serde_json::to_string(value).map_err(|e| {
        AppError::new("DB_WRITE_FAILED", format!("Failed to encode {what}")).with_details(e.to_string())
    })
}

/// Persist a generated assessment. The owning machine must exist.
pub fn save_assessment(conn: &Connection, input: NewAssessment) -> Result<AssessmentRecord, AppError> {
    get_machine(conn, input.machine_id)?;

    let non_conformities_json = encode_json(&input.non_conformities, "non-conformities")?;
    let recommendations_json = encode_json(&input.recommendations, "recommendations")?;
    let documents_json = encode_json(&input.documents_used, "documents used")?;

    conn.execute(
        r#"
        INSERT INTO assessments(
          machine_id, raw_output, summary, non_conformities_json, recommendations_json,
          risk_level, conformity_score, documents_used_json, created_at, version
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
        params![
            input.machine_id,
            input.raw_output,
            input.summary,
            non_conformities_json,
            recommendations_json,
            input.risk_level.as_str(),
            i64::from(input.conformity_score.min(100)),
            documents_json,
            input.created_at,
            ASSESSMENT_VERSION
        ],
    )
    .map_err(|e| {
        AppError::new("DB_WRITE_FAILED", "Failed to store assessment").with_details(e.to_string())
    })?;

    let id = conn.last_insert_rowid();
    find_assessment(conn, id)?.ok_or_else(|| {
        AppError::new(
            "DB_WRITE_FAILED",
            "Assessment stored but could not be read back",
        )
        .with_details(format!("id={id}"))
    })
}

pub fn find_assessment(conn: &Connection, id: i64) -> Result<Option<AssessmentRecord>, AppError> {
    conn.query_row(
        &format!("SELECT {ASSESSMENT_COLUMNS} FROM assessments WHERE id = ?1"),
        [id],
        assessment_from_row,
    )
    .optional()
    .map_err(|e| {
        AppError::new("DB_QUERY_FAILED", "Failed to query assessment").with_details(e.to_string())
    })
}

pub fn get_assessment(conn: &Connection, id: i64) -> Result<AssessmentRecord, AppError> {
    find_assessment(conn, id)?.ok_or_else(|| assessment_not_found(id))
}

pub fn list_assessments_for_machine(
    conn: &Connection,
    machine_id: i64,
) -> Result<Vec<AssessmentRecord>, AppError> {
    query_assessments(
        conn,
        &format!(
            "SELECT {ASSESSMENT_COLUMNS} FROM assessments WHERE machine_id = ?1 ORDER BY created_at DESC, id DESC"
        ),
        [machine_id],
    )
}

pub fn list_all_assessments(conn: &Connection) -> Result<Vec<AssessmentRecord>, AppError> {
    query_assessments(
        conn,
        &format!("SELECT {ASSESSMENT_COLUMNS} FROM assessments ORDER BY created_at DESC, id DESC"),
        [],
    )
}

pub fn load_machine_aggregate(conn: &Connection, machine_id: i64) -> Result<MachineAggregate, AppError> {
    let machine = get_machine(conn, machine_id)?;
    let assessments = list_assessments_for_machine(conn, machine_id)?;
    Ok(MachineAggregate {
        machine,
        assessments,
    })
}

/// Persistence seam consumed by the AI pipelines.
pub trait AssessmentStore {
    fn load_machine(&self, machine_id: i64) -> Result<Machine, AppError>;
    fn load_assessment(&self, assessment_id: i64) -> Result<AssessmentRecord, AppError>;
    fn store_assessment(&self, input: NewAssessment) -> Result<AssessmentRecord, AppError>;
}

impl AssessmentStore for Connection {
    fn load_machine(&self, machine_id: i64) -> Result<Machine, AppError> {
        get_machine(self, machine_id)
    }

    fn load_assessment(&self, assessment_id: i64) -> Result<AssessmentRecord, AppError> {
        get_assessment(self, assessment_id)
    }

    fn store_assessment(&self, input: NewAssessment) -> Result<AssessmentRecord, AppError> {
        save_assessment(self, input)
    }
}
