//! Generative-model client used by the repair loop.
//!
//! [`ModelClient`] is the seam; [`OpenAiCompatibleClient`] speaks the
//! chat-completions shape most hosted providers accept and retries rate
//! limits and server errors with exponential backoff.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use veriforge_domain::{Result, VerifyError};

/// Model strength. Critical and blocking issues go to `Advanced`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Standard,
    Advanced,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Standard => "standard",
            ModelTier::Advanced => "advanced",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub tier: ModelTier,
    /// Explicit model id; the client maps `tier` when absent.
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ModelRequest {
    pub fn new(prompt: impl Into<String>, tier: ModelTier) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            tier,
            model: None,
            max_tokens: 2048,
            temperature: 0.1,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_limits(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }
}

/// Token and cost accounting for one or more calls.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
}

impl TokenUsage {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.cost_usd += other.cost_usd;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    pub text: String,
    pub usage: TokenUsage,
    pub model: String,
}

/// A generative model.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, request: &ModelRequest) -> anyhow::Result<ModelResponse>;
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Connection settings for [`OpenAiCompatibleClient`].
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelSettings {
    /// API root; `/chat/completions` is appended.
    pub base_url: String,
    pub api_key: Option<String>,
    pub standard_model: String,
    pub advanced_model: String,
    #[serde(with = "veriforge_domain::duration_ms")]
    pub request_timeout: Duration,
    pub max_retries: u32,
    #[serde(with = "veriforge_domain::duration_ms")]
    pub initial_backoff: Duration,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key: None,
            standard_model: "openai/gpt-4o-mini".to_string(),
            advanced_model: "anthropic/claude-sonnet-4".to_string(),
            request_timeout: Duration::from_secs(60),
            max_retries: 3,
            initial_backoff: Duration::from_secs(2),
        }
    }
}

impl fmt::Debug for ModelSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("standard_model", &self.standard_model)
            .field("advanced_model", &self.advanced_model)
            .field("request_timeout", &self.request_timeout)
            .field("max_retries", &self.max_retries)
            .field("initial_backoff", &self.initial_backoff)
            .finish()
    }
}

impl ModelSettings {
    pub fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Standard => &self.standard_model,
            ModelTier::Advanced => &self.advanced_model,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

// ---------------------------------------------------------------------------
// Chat-completions client
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default, alias = "total_cost")]
    cost: Option<f64>,
}

/// Client for OpenAI-compatible chat-completions endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    settings: ModelSettings,
}

impl OpenAiCompatibleClient {
    pub fn new(settings: ModelSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| VerifyError::Model(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }

    /// POST with retry on transport errors, 429 and 5xx. Returns the body.
    async fn send_with_retry(&self, body: &ChatRequest<'_>) -> anyhow::Result<String> {
        let mut attempt = 0u32;
        loop {
            let mut builder = self.client.post(self.endpoint()).json(body);
            if let Some(key) = &self.settings.api_key {
                builder = builder.bearer_auth(key);
            }

            let retryable_reason = match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await?;
                    if status.is_success() {
                        return Ok(text);
                    }
                    if status.as_u16() != 429 && !status.is_server_error() {
                        anyhow::bail!(
                            "model endpoint returned {}: {}",
                            status,
                            truncate(&text, 200)
                        );
                    }
                    format!("status {status}")
                }
                Err(err) if err.is_timeout() || err.is_connect() => err.to_string(),
                Err(err) => return Err(err.into()),
            };

            if attempt >= self.settings.max_retries {
                anyhow::bail!(
                    "model request failed after {} attempts: {}",
                    attempt + 1,
                    retryable_reason
                );
            }
            attempt += 1;
            let delay = self.settings.backoff(attempt);
            warn!(attempt = attempt, delay_ms = delay.as_millis() as u64, reason = %retryable_reason, "retrying model request");
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatibleClient {
    async fn complete(&self, request: &ModelRequest) -> anyhow::Result<ModelResponse> {
        let model = request
            .model
            .as_deref()
            .unwrap_or_else(|| self.settings.model_for(request.tier));

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(Message {
                role: "system",
                content: system,
            });
        }
        messages.push(Message {
            role: "user",
            content: &request.prompt,
        });

        let body = ChatRequest {
            model,
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: false,
        };

        debug!(model = %model, tier = request.tier.as_str(), "calling model");
        let text = self.send_with_retry(&body).await?;
        let parsed: ChatResponse = serde_json::from_str(&text)?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("model returned no content"))?;
        let usage = parsed.usage.unwrap_or_default();

        Ok(ModelResponse {
            text: content,
            usage: TokenUsage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                cost_usd: usage.cost.unwrap_or(0.0),
            },
            model: parsed.model.unwrap_or_else(|| model.to_string()),
        })
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
