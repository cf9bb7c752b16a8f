use mca_core::error::AppError;

/// Single-turn model invocation. Multi-turn context is embedded in `user` by the caller.
pub trait Llm {
    fn generate(&self, system: &str, user: &str) -> Result<String, AppError>;
}

pub mod ollama_llm;
