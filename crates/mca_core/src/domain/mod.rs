use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// The subject of an assessment: a machine (or other asset) described by free-text fields.
///
/// Notes:
/// - Timestamps are RFC3339 UTC strings supplied by the caller.
/// - Only `name` is required; every other descriptive field may be unknown.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub production_year: Option<i32>,
    pub category: Option<String>,
    pub technical_specs: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Writable machine fields used by create and update.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MachineInput {
    #[serde(default)]
    pub name: String,
    pub description: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub production_year: Option<i32>,
    pub category: Option<String>,
    pub technical_specs: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Basso,
    Medio,
    Alto,
    Critico,
}

impl RiskLevel {
    /// Containment order matters: "CRITICO" must win over "ALTO" etc.
    const PRIORITY: [RiskLevel; 4] = [
        RiskLevel::Critico,
        RiskLevel::Alto,
        RiskLevel::Medio,
        RiskLevel::Basso,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Basso => "BASSO",
            RiskLevel::Medio => "MEDIO",
            RiskLevel::Alto => "ALTO",
            RiskLevel::Critico => "CRITICO",
        }
    }

    /// Total mapping from free model text to the closed vocabulary.
    ///
    /// Case-insensitive substring containment tested in priority order
    /// CRITICO, ALTO, MEDIO, BASSO; anything else (including missing input) is MEDIO.
    pub fn normalize(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return RiskLevel::Medio;
        };
        let upper = raw.trim().to_uppercase();
        Self::PRIORITY
            .into_iter()
            .find(|level| upper.contains(level.as_str()))
            .unwrap_or(RiskLevel::Medio)
    }
}

/// Exact stored form only; use [`RiskLevel::normalize`] for model text.
impl FromStr for RiskLevel {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BASSO" => Ok(Self::Basso),
            "MEDIO" => Ok(Self::Medio),
            "ALTO" => Ok(Self::Alto),
            "CRITICO" => Ok(Self::Critico),
            other => Err(AppError::new("RISK_LEVEL_INVALID", "Unknown risk level")
                .with_details(format!("value={other}"))),
        }
    }
}

/// A resolved citation. Identity is structural; see `mca_ai::citations::SourceKey`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub reference: String,
    pub file_name: String,
    pub page: Option<i64>,
    #[serde(alias = "chunk")]
    pub excerpt: String,
    pub confidence: Option<f64>,
}

/// A claim with the sources that survived citation resolution. Empty `sources` means uncited.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    pub text: String,
    #[serde(default)]
    pub sources: Vec<Source>,
}

impl Finding {
    pub fn uncited(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sources: Vec::new(),
        }
    }

    pub fn is_cited(&self) -> bool {
        !self.sources.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentRecord {
    pub id: i64,
    pub machine_id: i64,
    pub raw_output: String,
    pub summary: String,
    pub non_conformities: Vec<Finding>,
    pub recommendations: Vec<Finding>,
    pub risk_level: RiskLevel,
    pub conformity_score: u8,
    pub documents_used: Vec<String>,
    pub created_at: String, // RFC3339
    pub version: String,
}

impl AssessmentRecord {
    /// Fixed category order used everywhere sources are enumerated.
    pub fn findings_in_order(&self) -> impl Iterator<Item = &Finding> {
        self.non_conformities.iter().chain(self.recommendations.iter())
    }
}

/// An assessment that has not been persisted yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewAssessment {
    pub machine_id: i64,
    pub raw_output: String,
    pub summary: String,
    pub non_conformities: Vec<Finding>,
    pub recommendations: Vec<Finding>,
    pub risk_level: RiskLevel,
    pub conformity_score: u8,
    pub documents_used: Vec<String>,
    pub created_at: String,
}

/// A machine together with the assessments it owns, newest first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MachineAggregate {
    pub machine: Machine,
    pub assessments: Vec<AssessmentRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

/// One prior conversation turn supplied by the caller. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }

    /// Roles other than user/assistant (case-insensitive) are not part of the conversation.
    pub fn parsed_role(&self) -> Option<ChatRole> {
        let role = self.role.trim();
        if role.eq_ignore_ascii_case("user") {
            Some(ChatRole::User)
        } else if role.eq_ignore_ascii_case("assistant") {
            Some(ChatRole::Assistant)
        } else {
            None
        }
    }
}
