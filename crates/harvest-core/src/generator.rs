//! Narrative text generation for author-period buckets.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::config::GeneratorConfig;

/// Input for one generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NarrativeRequest {
    pub author_name: String,
    pub period_label: String,
    /// Chronological transcript, one message per line.
    pub transcript: String,
}

/// Produces a narrative for a bucket. An `Err` or empty string means
/// nothing was produced; callers do not retry.
#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    async fn generate(&self, request: &NarrativeRequest) -> Result<String>;
}

/// OpenAI-compatible `chat/completions` client.
pub struct ChatCompletionsGenerator {
    client: reqwest::Client,
    endpoint: Url,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl ChatCompletionsGenerator {
    pub fn new(config: &GeneratorConfig, api_key: &str) -> Result<Self> {
        let base = if config.base_url.ends_with('/') {
            config.base_url.clone()
        } else {
            format!("{}/", config.base_url)
        };
        let endpoint = Url::parse(&base)
            .and_then(|base| base.join("chat/completions"))
            .context("invalid generator base URL")?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

const SYSTEM_PROMPT: &str = "You write concise, evidence-based work summaries for leadership. \
Be direct and practical.";

fn user_prompt(request: &NarrativeRequest) -> String {
    let count = request.transcript.lines().count();
    format!(
        "[Person] {}\n[Period] {}\n\n[Messages ({})]\n{}\n\n\
Summarize the main work this person did in the period as 3-6 bullets, \
then give 3-5 business recommendations, 3-5 personal coaching points, \
and 3 measurable goals for the next period.",
        request.author_name, request.period_label, count, request.transcript
    )
}

#[async_trait]
impl NarrativeGenerator for ChatCompletionsGenerator {
    async fn generate(&self, request: &NarrativeRequest) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: Some(SYSTEM_PROMPT.to_string()),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Some(user_prompt(request)),
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        debug!(
            "generating narrative for {} ({})",
            request.author_name, request.period_label
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow!("generator returned HTTP {}: {}", status, detail));
        }

        let payload: ChatResponse = response.json().await?;
        let text = payload
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        Ok(text.trim().to_string())
    }
}
