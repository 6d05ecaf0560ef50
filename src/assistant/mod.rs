/// LLM assistants over declared datasets
pub mod duckdb;
pub mod llm;

pub use duckdb::{DuckDbAssistant, SemanticModel, TableInfo};
pub use llm::{Llm, LlmClient, Message};
