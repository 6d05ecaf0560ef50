/// Chat-completion clients for hosted (Groq) and local (Ollama) models
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

const GROQ_API_BASE: &str = "https://api.groq.com/openai/v1/";
const OLLAMA_DEFAULT_HOST: &str = "http://localhost:11434";

fn default_ollama_host() -> String {
    OLLAMA_DEFAULT_HOST.to_string()
}

/// Model provider and model name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum Llm {
    Groq {
        model: String,
        /// Falls back to GROQ_API_KEY
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_key: Option<String>,
    },
    Ollama {
        model: String,
        #[serde(default = "default_ollama_host")]
        host: String,
    },
}

impl Llm {
    pub fn groq(model: impl Into<String>) -> Self {
        Llm::Groq {
            model: model.into(),
            api_key: None,
        }
    }

    pub fn ollama(model: impl Into<String>) -> Self {
        Llm::Ollama {
            model: model.into(),
            host: default_ollama_host(),
        }
    }

    pub fn model(&self) -> &str {
        match self {
            Llm::Groq { model, .. } | Llm::Ollama { model, .. } => model,
        }
    }

    fn provider(&self) -> &'static str {
        match self {
            Llm::Groq { .. } => "groq",
            Llm::Ollama { .. } => "ollama",
        }
    }

    /// Chat endpoint for the provider
    pub fn endpoint(&self) -> Result<Url> {
        let url = match self {
            Llm::Groq { .. } => Url::parse(GROQ_API_BASE).and_then(|u| u.join("chat/completions")),
            Llm::Ollama { host, .. } => {
                let base = format!("{}/", host.trim_end_matches('/'));
                Url::parse(&base).and_then(|u| u.join("api/chat"))
            }
        };
        url.map_err(|e| Error::validation("Llm", format!("invalid endpoint: {}", e)))
    }

    /// Request body for one non-streaming chat exchange
    pub fn request_body(&self, messages: &[Message]) -> Value {
        match self {
            Llm::Groq { model, .. } => json!({
                "model": model,
                "messages": messages,
            }),
            Llm::Ollama { model, .. } => json!({
                "model": model,
                "messages": messages,
                "stream": false,
            }),
        }
    }

    /// Assistant message text from a chat response
    pub fn parse_response(&self, response: &Value) -> Result<String> {
        let content = match self {
            Llm::Groq { .. } => response.pointer("/choices/0/message/content"),
            Llm::Ollama { .. } => response.pointer("/message/content"),
        };
        content
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::provider(self.provider(), "response has no message content"))
    }
}

/// One chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// HTTP client for one configured model
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    llm: Llm,
}

impl LlmClient {
    pub fn new(llm: Llm) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        if let Llm::Groq { api_key, .. } = &llm {
            let key = match api_key {
                Some(key) => key.clone(),
                None => std::env::var("GROQ_API_KEY").map_err(|_| {
                    Error::missing("api_key", "set api_key or the GROQ_API_KEY env var")
                })?,
            };
            let value = header::HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|_| Error::validation("Llm", "invalid API key format"))?;
            headers.insert(header::AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(120))
            .build()?;

        Ok(Self { client, llm })
    }

    pub fn llm(&self) -> &Llm {
        &self.llm
    }

    /// Send one chat request and return the reply text
    pub async fn chat(&self, messages: &[Message]) -> Result<String> {
        let url = self.llm.endpoint()?;
        debug!("POST {} ({})", url, self.llm.model());

        let response = self
            .client
            .post(url)
            .json(&self.llm.request_body(messages))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::provider(
                self.llm.provider(),
                format!("request failed with status {}: {}", status, error_text),
            ));
        }

        let body: Value = response.json().await?;
        self.llm.parse_response(&body)
    }
}
