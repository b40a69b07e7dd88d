//! LLM completion clients: a deterministic mock and an OpenAI-compatible
//! chat-completions client.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;

use crate::config::LlmConfig;

pub const CHARS_PER_TOKEN: usize = 4;

static FENCE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^\s*```[a-zA-Z]*\s*\n?(.*?)\s*```\s*$").unwrap());

#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    pub max_tokens: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    pub content: String,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub model: String,
    pub finish_reason: String,
}

impl LlmResponse {
    pub fn total_tokens(&self) -> usize {
        self.prompt_tokens + self.completion_tokens
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> anyhow::Result<LlmResponse>;
}

/// Rough token count used for budgeting and by the mock.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / CHARS_PER_TOKEN
}

/// Remove a Markdown code fence wrapped around the whole reply.
pub fn strip_fences(content: &str) -> &str {
    match FENCE_REGEX.captures(content).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => content.trim(),
    }
}

const MOCK_RESPONSE: &str = r#"[
  {
    "title": "Database connection pool exhaustion",
    "description": "The application may be leaking database connections, causing pool exhaustion under load.",
    "confidence": 0.75,
    "evidenceFor": "Connection timeout errors in logs, rising active connection count in metrics",
    "evidenceAgainst": "No recent deployment changes to connection handling code",
    "nextBestTest": "Check pool metrics for active/idle/pending connection counts",
    "stopCondition": "Connection pool metrics return to normal levels after fix"
  },
  {
    "title": "Upstream service degradation",
    "description": "A dependent service may be responding slowly, causing worker exhaustion.",
    "confidence": 0.60,
    "evidenceFor": "Increased latency in service dependency metrics",
    "evidenceAgainst": "No alerts from upstream service dashboards",
    "nextBestTest": "Check upstream service health endpoints and latency percentiles",
    "stopCondition": "Upstream service latency returns below p99 SLA threshold"
  },
  {
    "title": "Memory pressure from GC pauses",
    "description": "Long GC pauses may be causing request timeouts and cascading failures.",
    "confidence": 0.45,
    "evidenceFor": "GC pause duration spikes correlate with error rate increases",
    "evidenceAgainst": "Heap usage appears within normal bounds",
    "nextBestTest": "Review GC logs for stop-the-world pause durations > 500ms",
    "stopCondition": "GC pause times consistently below 200ms"
  }
]"#;

/// Returns the same three hypotheses for every request.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockLlm;

#[async_trait]
impl LlmClient for MockLlm {
    async fn complete(&self, request: &LlmRequest) -> anyhow::Result<LlmResponse> {
        Ok(LlmResponse {
            content: MOCK_RESPONSE.to_string(),
            prompt_tokens: estimate_tokens(&request.system_prompt) + estimate_tokens(&request.user_prompt),
            completion_tokens: estimate_tokens(MOCK_RESPONSE),
            model: "mock".to_string(),
            finish_reason: "stop".to_string(),
        })
    }
}

pub struct OpenAiClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: &LlmRequest) -> anyhow::Result<LlmResponse> {
        let body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "temperature": 0.2,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_prompt },
            ],
        });

        let resp = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .header("User-Agent", "moc-triage")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("LLM API error: {status} {text}");
        }

        let completion: ChatCompletion = resp.json().await?;
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("LLM API returned no choices"))?;
        let content = choice.message.content.unwrap_or_default();
        let (prompt_tokens, completion_tokens) = match completion.usage {
            Some(u) => (u.prompt_tokens, u.completion_tokens),
            None => (
                estimate_tokens(&request.system_prompt) + estimate_tokens(&request.user_prompt),
                estimate_tokens(&content),
            ),
        };

        Ok(LlmResponse {
            content,
            prompt_tokens,
            completion_tokens,
            model: completion.model.unwrap_or_else(|| self.model.clone()),
            finish_reason: choice.finish_reason.unwrap_or_default(),
        })
    }
}

/// Client for the configured mode. Disabled selects the mock.
pub fn from_config(config: &LlmConfig) -> Box<dyn LlmClient> {
    if config.enabled {
        tracing::info!(model = %config.model, url = %config.api_url, "Using OpenAI-compatible LLM client");
        Box::new(OpenAiClient::new(config))
    } else {
        tracing::info!("LLM disabled, using mock client");
        Box::new(MockLlm)
    }
}
