use super::models::{Model, ModelIds};
use super::parse::{sanitize_api_response, truncate_str};
use futures::future::BoxFuture;
use redline_core::Usage;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// OpenRouter chat completions endpoint
pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Rate limit retry configuration
pub(crate) const MAX_RETRIES: u32 = 3;
pub(crate) const INITIAL_BACKOFF_MS: u64 = 2000;
pub(crate) const BACKOFF_MULTIPLIER: u64 = 2;

const RESPONSE_HEALING_PLUGIN_ID: &str = "response-healing";

/// Failure of a single structured model call.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request cancelled")]
    Cancelled,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed model output: {0}")]
    Format(String),
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("request was refused: {0}")]
    Refused(String),
    #[error("API returned an empty response")]
    EmptyResponse,
    #[error("configuration error: {0}")]
    Config(String),
}

impl LlmError {
    /// Network and format failures are worth another attempt; everything else is not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Transport(_) | LlmError::Format(_) | LlmError::EmptyResponse
        )
    }
}

/// One structured-output request.
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    pub model: Model,
    pub schema_name: String,
    pub schema: serde_json::Value,
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Raw model output plus usage.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub usage: Option<Usage>,
}

/// Parsed structured output plus usage.
#[derive(Debug, Clone)]
pub struct StructuredResponse<T> {
    pub data: T,
    pub usage: Option<Usage>,
}

/// The one non-deterministic dependency of the review/fix loop.
///
/// Implementations must return promptly with `LlmError::Cancelled` once the
/// token fires.
pub trait StructuredLlm: Send + Sync {
    fn call<'a>(
        &'a self,
        request: &'a StructuredRequest,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<LlmResponse, LlmError>>;
}

/// Call the model and parse its output into `T`.
pub async fn call_structured<T>(
    llm: &dyn StructuredLlm,
    request: &StructuredRequest,
    cancel: &CancellationToken,
) -> Result<StructuredResponse<T>, LlmError>
where
    T: serde::de::DeserializeOwned,
{
    let response = llm.call(request, cancel).await?;
    let data = parse_structured_content(&response.content)?;
    Ok(StructuredResponse {
        data,
        usage: response.usage,
    })
}

// ═══════════════════════════════════════════════════════════════════════════
//  STRUCTURED CONTENT SALVAGE
// ═══════════════════════════════════════════════════════════════════════════

fn push_unique_candidate(candidates: &mut Vec<String>, candidate: impl Into<String>) {
    let candidate = candidate.into();
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return;
    }
    if !candidates.iter().any(|existing| existing == trimmed) {
        candidates.push(trimmed.to_string());
    }
}

fn strip_json_fences(content: &str) -> Option<String> {
    let trimmed = content.trim();
    let without_open = trimmed.strip_prefix("```")?;
    let after_header = match without_open.find('\n') {
        Some(newline_idx) => &without_open[newline_idx + 1..],
        None => without_open,
    };
    let end_idx = after_header.rfind("```")?;
    Some(after_header[..end_idx].trim().to_string())
}

fn unwrap_outer_wrapper(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.len() < 3 {
        return None;
    }
    let inner = if (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'))
    {
        &trimmed[1..trimmed.len() - 1]
    } else {
        return None;
    };
    let inner_trimmed = inner.trim_start();
    if inner_trimmed.starts_with('{') || inner_trimmed.starts_with('[') {
        Some(inner.trim().to_string())
    } else {
        None
    }
}

fn extract_balanced_json_from(content: &str, start: usize) -> Option<String> {
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in content[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(ch) {
                    return None;
                }
                if stack.is_empty() {
                    let end = start + offset + ch.len_utf8();
                    return Some(content[start..end].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn extract_json_candidates(content: &str, max_candidates: usize) -> Vec<String> {
    let mut out = Vec::new();
    for (idx, ch) in content.char_indices() {
        if out.len() >= max_candidates {
            break;
        }
        if ch == '{' || ch == '[' {
            if let Some(candidate) = extract_balanced_json_from(content, idx) {
                push_unique_candidate(&mut out, candidate);
            }
        }
    }
    out
}

/// Parse model output into `T`, salvaging fenced, wrapped or prefixed JSON.
pub fn parse_structured_content<T>(content: &str) -> Result<T, LlmError>
where
    T: serde::de::DeserializeOwned,
{
    let mut candidates = Vec::new();
    push_unique_candidate(&mut candidates, content);
    if let Some(stripped) = strip_json_fences(content) {
        push_unique_candidate(&mut candidates, stripped);
    }

    // A few deterministic salvage candidates for mildly malformed wrappers.
    let mut idx = 0usize;
    while idx < candidates.len() {
        let current = candidates[idx].clone();
        for extracted in extract_json_candidates(&current, 4) {
            push_unique_candidate(&mut candidates, extracted);
        }
        if let Some(unwrapped) = unwrap_outer_wrapper(&current) {
            push_unique_candidate(&mut candidates, unwrapped);
        }
        idx += 1;
    }

    let mut last_err: Option<String> = None;
    for candidate in candidates {
        match serde_json::from_str::<T>(&candidate) {
            Ok(data) => return Ok(data),
            Err(err) => last_err = Some(err.to_string()),
        }
    }

    Err(LlmError::Format(format!(
        "{} (content: {})",
        last_err.unwrap_or_else(|| "empty response".to_string()),
        sanitize_api_response(content)
    )))
}

// ═══════════════════════════════════════════════════════════════════════════
//  OPENROUTER CLIENT
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
    response_format: ResponseFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    plugins: Option<Vec<PluginConfig>>,
    provider: ProviderConfig,
}

/// OpenRouter provider routing preferences
#[derive(Serialize)]
struct ProviderConfig {
    /// Allow OpenRouter to try other providers if the primary fails
    allow_fallbacks: bool,
    /// Only use providers that support all parameters in the request
    require_parameters: bool,
}

#[derive(Serialize)]
struct PluginConfig {
    id: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
    json_schema: JsonSchemaWrapper,
}

#[derive(Serialize)]
struct JsonSchemaWrapper {
    name: String,
    strict: bool,
    schema: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    /// Content can be null in some API responses (e.g., when refusal or error occurs)
    #[serde(default)]
    content: Option<String>,
    /// Refusal reason - set when content is blocked by content moderation
    #[serde(default)]
    refusal: Option<String>,
}

/// OpenRouter error response (can come with 200 status for upstream errors)
#[derive(Deserialize)]
struct OpenRouterError {
    error: OpenRouterApiError,
}

#[derive(Deserialize)]
struct OpenRouterApiError {
    message: String,
    #[serde(default)]
    code: Option<i32>,
}

/// Extract retry-after hint from a rate-limit response body (if present)
fn parse_retry_after(text: &str) -> Option<u64> {
    let text_lower = text.to_lowercase();
    let pos = text_lower.find("retry")?;
    text_lower[pos..]
        .split_whitespace()
        .skip(1)
        .take(5)
        .filter_map(|word| {
            word.trim_matches(|c: char| !c.is_numeric())
                .parse::<u64>()
                .ok()
        })
        .find(|secs| *secs > 0 && *secs < 300)
}

pub(crate) fn backoff_secs(retry_count: u32) -> u64 {
    let factor = BACKOFF_MULTIPLIER.pow(retry_count.saturating_sub(1));
    let ms = INITIAL_BACKOFF_MS.saturating_mul(factor);
    (ms / 1000).max(1)
}

fn map_reqwest_error(err: reqwest::Error) -> LlmError {
    if err.is_timeout() {
        LlmError::Transport("request timed out".to_string())
    } else if err.is_connect() {
        LlmError::Transport("could not connect to the model endpoint".to_string())
    } else {
        LlmError::Transport(err.to_string())
    }
}

fn is_retryable_network_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// Settings for `OpenRouterClient`.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub api_key: String,
    pub base_url: Option<String>,
    pub models: ModelIds,
    pub request_timeout_secs: u64,
}

/// `StructuredLlm` backed by an OpenRouter-compatible chat completions API.
pub struct OpenRouterClient {
    http: reqwest::Client,
    api_key: String,
    url: String,
    models: ModelIds,
}

impl OpenRouterClient {
    pub fn new(settings: ClientSettings) -> Result<Self, LlmError> {
        if settings.api_key.trim().is_empty() {
            return Err(LlmError::Config(
                "no API key configured. Run 'redline setup --api-key <key>' or set REDLINE_API_KEY."
                    .to_string(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| LlmError::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            http,
            api_key: settings.api_key,
            url: settings
                .base_url
                .unwrap_or_else(|| OPENROUTER_URL.to_string()),
            models: settings.models,
        })
    }

    fn build_request(&self, request: &StructuredRequest) -> ChatRequest {
        ChatRequest {
            model: self.models.id(request.model).to_string(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: request.system.clone(),
                },
                Message {
                    role: "user".to_string(),
                    content: request.prompt.clone(),
                },
            ],
            max_tokens: request.max_tokens.min(request.model.max_tokens()),
            temperature: request.temperature,
            stream: false,
            response_format: ResponseFormat {
                format_type: "json_schema".to_string(),
                json_schema: JsonSchemaWrapper {
                    name: request.schema_name.clone(),
                    strict: true,
                    schema: request.schema.clone(),
                },
            },
            plugins: Some(vec![PluginConfig {
                id: RESPONSE_HEALING_PLUGIN_ID.to_string(),
            }]),
            provider: ProviderConfig {
                allow_fallbacks: true,
                require_parameters: true,
            },
        }
    }

    /// Send with automatic retry on transient failures: network errors, 429,
    /// 5xx and OpenRouter's 200-with-error bodies.
    async fn send_with_retry(&self, body: &ChatRequest) -> Result<String, LlmError> {
        let mut retry_count = 0;

        loop {
            let response = match self
                .http
                .post(&self.url)
                .header("Content-Type", "application/json")
                .header("X-Title", "Redline")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(body)
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    if is_retryable_network_error(&err) && retry_count < MAX_RETRIES {
                        retry_count += 1;
                        warn!(retry_count, error = %err, "model request failed, retrying");
                        tokio::time::sleep(Duration::from_secs(backoff_secs(retry_count))).await;
                        continue;
                    }
                    return Err(map_reqwest_error(err));
                }
            };

            let status = response.status();
            let text = match response.text().await {
                Ok(text) => text,
                Err(err) => {
                    if is_retryable_network_error(&err) && retry_count < MAX_RETRIES {
                        retry_count += 1;
                        tokio::time::sleep(Duration::from_secs(backoff_secs(retry_count))).await;
                        continue;
                    }
                    return Err(map_reqwest_error(err));
                }
            };

            if status.is_success() {
                if let Ok(err_resp) = serde_json::from_str::<OpenRouterError>(&text) {
                    let is_retryable = err_resp
                        .error
                        .code
                        .map(|c| c >= 500 || c == 429)
                        .unwrap_or(true);
                    if is_retryable && retry_count < MAX_RETRIES {
                        retry_count += 1;
                        tokio::time::sleep(Duration::from_secs(backoff_secs(retry_count))).await;
                        continue;
                    }
                    return Err(LlmError::Transport(format!(
                        "upstream error: {}",
                        truncate_str(&err_resp.error.message, 200)
                    )));
                }
                return Ok(text);
            }

            if (status.as_u16() == 429 || status.is_server_error()) && retry_count < MAX_RETRIES {
                retry_count += 1;
                let wait = if status.as_u16() == 429 {
                    parse_retry_after(&text).unwrap_or_else(|| backoff_secs(retry_count))
                } else {
                    backoff_secs(retry_count)
                };
                warn!(status = status.as_u16(), retry_count, wait, "transient API failure, backing off");
                tokio::time::sleep(Duration::from_secs(wait)).await;
                continue;
            }

            return Err(match status.as_u16() {
                401 => LlmError::Api {
                    status: 401,
                    message: "invalid API key".to_string(),
                },
                429 => LlmError::Transport(format!("rate limited after {} retries", retry_count)),
                500..=599 => LlmError::Transport(format!("server error ({})", status)),
                code => LlmError::Api {
                    status: code,
                    message: sanitize_api_response(&text),
                },
            });
        }
    }

    async fn complete(&self, request: &StructuredRequest) -> Result<LlmResponse, LlmError> {
        let body = self.build_request(request);
        debug!(model = %body.model, schema = %request.schema_name, "structured model call");
        let text = self.send_with_retry(&body).await?;

        let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
            LlmError::Format(format!(
                "unreadable API response: {} ({})",
                e,
                sanitize_api_response(&text)
            ))
        })?;

        let choice = parsed.choices.first();
        if let Some(refusal) = choice.and_then(|c| c.message.refusal.as_deref()) {
            return Err(LlmError::Refused(truncate_str(refusal, 200).to_string()));
        }
        let content = choice
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        Ok(LlmResponse {
            content,
            usage: parsed.usage,
        })
    }
}

impl StructuredLlm for OpenRouterClient {
    fn call<'a>(
        &'a self,
        request: &'a StructuredRequest,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<LlmResponse, LlmError>> {
        Box::pin(async move {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(LlmError::Cancelled),
                result = self.complete(request) => result,
            }
        })
    }
}
