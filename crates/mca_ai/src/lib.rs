pub mod assess;
pub mod chat;
pub mod chunks;
pub mod citations;
pub mod context;
pub mod guardrails;
pub mod interpret;
pub mod llm;
pub mod ollama;
pub mod retrieve;
