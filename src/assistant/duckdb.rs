/// Data-analyst assistant that answers questions with DuckDB SQL
use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::llm::{LlmClient, Message};
use crate::error::Result;

const SYSTEM_PROMPT: &str = r#"You are a data engineering expert who writes DuckDB SQL to answer questions about data.
You have access to the following tables, described by this semantic model:

{{semantic_model}}

When answering:
- Only use the tables listed above. Load CSV files with read_csv_auto('<path>').
{{#each tables}}
- `{{name}}` is stored at {{path}}
{{/each}}
- Always show the SQL you ran or would run.
- If the question cannot be answered from these tables, say so.
{{#if markdown}}
- Format your answer using markdown.
{{/if}}"#;

/// A table the assistant may query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub description: String,
    pub path: String,
}

/// Tables handed to the assistant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticModel {
    pub tables: Vec<TableInfo>,
}

impl SemanticModel {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Assistant bound to one model and one semantic model
pub struct DuckDbAssistant {
    llm: LlmClient,
    semantic_model: SemanticModel,
    templates: Handlebars<'static>,
}

impl DuckDbAssistant {
    pub fn new(llm: LlmClient, semantic_model: SemanticModel) -> Self {
        let mut templates = Handlebars::new();
        templates.register_escape_fn(handlebars::no_escape);
        Self {
            llm,
            semantic_model,
            templates,
        }
    }

    pub fn semantic_model(&self) -> &SemanticModel {
        &self.semantic_model
    }

    /// Render the system prompt
    pub fn system_prompt(&self, markdown: bool) -> Result<String> {
        let data = json!({
            "semantic_model": self.semantic_model.to_json()?,
            "tables": self.semantic_model.tables,
            "markdown": markdown,
        });
        Ok(self.templates.render_template(SYSTEM_PROMPT, &data)?)
    }

    /// Ask one question; a single request, no retries
    pub async fn response(&self, question: &str, markdown: bool) -> Result<String> {
        info!("Asking {}: {}", self.llm.llm().model(), question);
        let messages = [
            Message::system(self.system_prompt(markdown)?),
            Message::user(question),
        ];
        self.llm.chat(&messages).await
    }

    /// Ask and print the answer to stdout
    pub async fn print_response(&self, question: &str, markdown: bool) -> Result<()> {
        let answer = self.response(question, markdown).await?;
        println!("{}", answer.trim());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::llm::Llm;

    fn movies() -> SemanticModel {
        SemanticModel {
            tables: vec![TableInfo {
                name: "movies".to_string(),
                description: "Contains information about movies from IMDB.".to_string(),
                path: "/data/IMDB-Movie-Data.csv".to_string(),
            }],
        }
    }

    #[test]
    fn test_system_prompt_lists_tables() {
        let llm = LlmClient::new(Llm::ollama("phi3")).unwrap();
        let assistant = DuckDbAssistant::new(llm, movies());

        let prompt = assistant.system_prompt(true).unwrap();
        assert!(prompt.contains("`movies` is stored at /data/IMDB-Movie-Data.csv"));
        assert!(prompt.contains("\"description\": \"Contains information about movies from IMDB.\""));
        assert!(prompt.contains("markdown"));

        let plain = assistant.system_prompt(false).unwrap();
        assert!(!plain.contains("Format your answer using markdown"));
    }

    #[test]
    fn test_semantic_model_json_shape() {
        let value: serde_json::Value = serde_json::from_str(&movies().to_json().unwrap()).unwrap();
        assert_eq!(value["tables"][0]["name"], "movies");
    }

    #[tokio::test]
    #[ignore] // Requires a running Ollama server
    async fn test_print_response_against_ollama() {
        let llm = LlmClient::new(Llm::ollama("phi3")).unwrap();
        let assistant = DuckDbAssistant::new(llm, movies());
        assistant
            .print_response("What is the average rating of movies? Show me the SQL.", true)
            .await
            .unwrap();
    }
}
