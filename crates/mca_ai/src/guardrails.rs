use mca_core::error::AppError;

pub const MAX_QUESTION_CHARS: usize = 2_000;
pub const MAX_SYSTEM_PROMPT_CHARS: usize = 12_000;

/// Trimmed question; blank or oversized questions are rejected before any other work.
pub fn validate_question(question: &str) -> Result<String, AppError> {
    let q = question.trim();
    if q.is_empty() {
        return Err(AppError::new(
            "CHAT_QUESTION_REQUIRED",
            "La domanda è obbligatoria",
        ));
    }
    let chars = q.chars().count();
    if chars > MAX_QUESTION_CHARS {
        return Err(AppError::new(
            "CHAT_QUESTION_TOO_LONG",
            format!("Domanda troppo lunga (max {MAX_QUESTION_CHARS} caratteri)"),
        )
        .with_details(format!("chars={chars}")));
    }
    Ok(q.to_string())
}

/// Caller override of the chat instruction; blank means `default`.
pub fn resolve_system_prompt(custom: Option<&str>, default: &str) -> Result<String, AppError> {
    let Some(custom) = custom.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(default.to_string());
    };
    let chars = custom.chars().count();
    if chars > MAX_SYSTEM_PROMPT_CHARS {
        return Err(AppError::new(
            "CHAT_SYSTEM_PROMPT_TOO_LONG",
            format!("Istruzioni chatbot troppo lunghe (max {MAX_SYSTEM_PROMPT_CHARS} caratteri)"),
        )
        .with_details(format!("chars={chars}")));
    }
    Ok(custom.to_string())
}
