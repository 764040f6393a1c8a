// Streaming LLM client using reqwest-eventsource.
//
// Sends a single prompt to the configured provider with streaming enabled and
// parses the Server-Sent Events into `LlmEvent` variants that are forwarded
// over an mpsc channel for the app orchestrator to consume.

use futures_util::StreamExt;
use reqwest_eventsource::{Event, RequestBuilderExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::Config;
use crate::protocol::{LlmEvent, LlmProvider};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const OPENAI_BASE_URL: &str = "https://api.openai.com";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

fn default_base_url(provider: LlmProvider) -> &'static str {
    match provider {
        LlmProvider::Anthropic => ANTHROPIC_BASE_URL,
        LlmProvider::OpenAi => OPENAI_BASE_URL,
        LlmProvider::Gemini => GEMINI_BASE_URL,
    }
}

// ---------------------------------------------------------------------------
// ProviderClient
// ---------------------------------------------------------------------------

/// Low-level streaming client for one provider and API key.
#[derive(Clone)]
pub struct ProviderClient {
    http: reqwest::Client,
    provider: LlmProvider,
    api_key: String,
    model: String,
    base_url: String,
}

impl ProviderClient {
    pub fn new(provider: LlmProvider, api_key: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            provider,
            api_key,
            model,
            base_url: default_base_url(provider).to_string(),
        }
    }

    /// Point the client at a different host (proxies, local mocks).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Build the streaming request for this provider.
    fn build_request(&self, system: &str, user_content: &str, max_tokens: u32) -> reqwest::RequestBuilder {
        match self.provider {
            LlmProvider::Anthropic => {
                let body = serde_json::json!({
                    "model": self.model,
                    "max_tokens": max_tokens,
                    "stream": true,
                    "system": system,
                    "messages": [{ "role": "user", "content": user_content }]
                });
                self.http
                    .post(format!("{}/v1/messages", self.base_url))
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .header("content-type", "application/json")
                    .json(&body)
            }
            LlmProvider::OpenAi => {
                let body = serde_json::json!({
                    "model": self.model,
                    "max_tokens": max_tokens,
                    "stream": true,
                    "stream_options": { "include_usage": true },
                    "messages": [
                        { "role": "system", "content": system },
                        { "role": "user", "content": user_content }
                    ]
                });
                self.http
                    .post(format!("{}/v1/chat/completions", self.base_url))
                    .bearer_auth(&self.api_key)
                    .header("content-type", "application/json")
                    .json(&body)
            }
            LlmProvider::Gemini => {
                let body = serde_json::json!({
                    "systemInstruction": { "parts": [{ "text": system }] },
                    "contents": [{ "role": "user", "parts": [{ "text": user_content }] }],
                    "generationConfig": {
                        "maxOutputTokens": max_tokens,
                        "responseMimeType": "application/json"
                    }
                });
                self.http
                    .post(format!(
                        "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
                        self.base_url, self.model
                    ))
                    .header("x-goog-api-key", &self.api_key)
                    .header("content-type", "application/json")
                    .json(&body)
            }
        }
    }

    /// Send a prompt and stream the response as `LlmEvent`s over `tx`.
    ///
    /// The `generation` counter is threaded through every emitted event so that
    /// the receiving side can discard events from superseded requests.
    ///
    /// Returns when the stream is complete, an error occurs, or the receiver
    /// is dropped.
    pub async fn stream_message(
        &self,
        system: &str,
        user_content: &str,
        max_tokens: u32,
        tx: mpsc::Sender<LlmEvent>,
        generation: u64,
    ) -> anyhow::Result<()> {
        if self.api_key.is_empty() {
            let _ = tx
                .send(LlmEvent::Error {
                    message: "API key not configured".to_string(),
                    generation,
                })
                .await;
            return Ok(());
        }

        let request = self.build_request(system, user_content, max_tokens);

        let mut es = match request.eventsource() {
            Ok(es) => es,
            Err(e) => {
                let _ = tx
                    .send(LlmEvent::Error {
                        message: format!("Failed to create event source: {e}"),
                        generation,
                    })
                    .await;
                return Ok(());
            }
        };

        let mut full_text = String::new();
        let mut input_tokens: u32 = 0;
        let mut output_tokens: u32 = 0;
        let mut stop_reason: Option<String> = None;

        while let Some(event) = es.next().await {
            match event {
                Ok(Event::Open) => {
                    debug!(provider = %self.provider, "SSE connection opened");
                }
                Ok(Event::Message(msg)) => {
                    let chunk = decode_event(self.provider, &msg.event, &msg.data);

                    if let Some(message) = chunk.error {
                        warn!(provider = %self.provider, "provider error in stream: {message}");
                        let _ = tx.send(LlmEvent::Error { message, generation }).await;
                        es.close();
                        return Ok(());
                    }
                    if let Some(n) = chunk.input_tokens {
                        input_tokens = n;
                    }
                    if let Some(n) = chunk.output_tokens {
                        output_tokens = n;
                    }
                    if chunk.stop_reason.is_some() {
                        stop_reason = chunk.stop_reason;
                    }
                    if let Some(text) = chunk.text.filter(|t| !t.is_empty()) {
                        full_text.push_str(&text);
                        if tx.send(LlmEvent::Token { text, generation }).await.is_err() {
                            // Receiver dropped, abort stream.
                            es.close();
                            return Ok(());
                        }
                    }
                    if chunk.done {
                        debug!(input_tokens, output_tokens, "streaming complete");
                        let _ = tx
                            .send(LlmEvent::Complete {
                                full_text,
                                input_tokens,
                                output_tokens,
                                stop_reason,
                                generation,
                            })
                            .await;
                        es.close();
                        return Ok(());
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => {
                    // Gemini signals completion by closing the stream.
                    es.close();
                    break;
                }
                Err(err) => {
                    warn!(?err, "SSE stream error");
                    let message = extract_error_message(&err);
                    let _ = tx.send(LlmEvent::Error { message, generation }).await;
                    es.close();
                    return Ok(());
                }
            }
        }

        if full_text.is_empty() {
            let _ = tx
                .send(LlmEvent::Error {
                    message: "Stream ended unexpectedly without any content".to_string(),
                    generation,
                })
                .await;
        } else {
            let _ = tx
                .send(LlmEvent::Complete {
                    full_text,
                    input_tokens,
                    output_tokens,
                    stop_reason,
                    generation,
                })
                .await;
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// LlmClient wrapper
// ---------------------------------------------------------------------------

/// High-level wrapper that can be either an active provider client or disabled.
#[derive(Clone)]
pub enum LlmClient {
    /// A provider and API key are configured.
    Active(ProviderClient),
    /// LLM functionality is disabled (no API key configured).
    Disabled,
}

impl LlmClient {
    /// Build an `LlmClient` from the application config.
    ///
    /// Returns `Active` if the configured provider has an API key, otherwise
    /// returns `Disabled`.
    pub fn from_config(config: &Config) -> Self {
        match config.api_key() {
            Some(key) => LlmClient::Active(ProviderClient::new(
                config.llm.provider,
                key.to_string(),
                config.model(),
            )),
            None => LlmClient::Disabled,
        }
    }

    pub fn is_configured(&self) -> bool {
        matches!(self, LlmClient::Active(_))
    }

    pub fn provider(&self) -> Option<LlmProvider> {
        match self {
            LlmClient::Active(client) => Some(client.provider()),
            LlmClient::Disabled => None,
        }
    }

    /// Stream a message, delegating to the inner client or immediately
    /// sending an error if disabled.
    pub async fn stream_message(
        &self,
        system: &str,
        user_content: &str,
        max_tokens: u32,
        tx: mpsc::Sender<LlmEvent>,
        generation: u64,
    ) -> anyhow::Result<()> {
        match self {
            LlmClient::Active(client) => {
                client
                    .stream_message(system, user_content, max_tokens, tx, generation)
                    .await
            }
            LlmClient::Disabled => {
                let _ = tx
                    .send(LlmEvent::Error {
                        message: "LLM not configured".to_string(),
                        generation,
                    })
                    .await;
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Key validation
// ---------------------------------------------------------------------------

/// Check an API key with a cheap authenticated request to the provider's
/// model listing endpoint. Returns a short human-readable reason on failure.
pub async fn validate_key(provider: LlmProvider, api_key: &str) -> Result<(), String> {
    validate_key_at(provider, api_key, default_base_url(provider)).await
}

pub async fn validate_key_at(provider: LlmProvider, api_key: &str, base_url: &str) -> Result<(), String> {
    if api_key.trim().is_empty() {
        return Err("Please enter an API key.".to_string());
    }

    let http = reqwest::Client::new();
    let base_url = base_url.trim_end_matches('/');
    let request = match provider {
        LlmProvider::Anthropic => http
            .get(format!("{base_url}/v1/models"))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION),
        LlmProvider::OpenAi => http.get(format!("{base_url}/v1/models")).bearer_auth(api_key),
        LlmProvider::Gemini => http
            .get(format!("{base_url}/v1beta/models"))
            .header("x-goog-api-key", api_key),
    };

    let response = request
        .send()
        .await
        .map_err(|e| format!("Network error: {e}"))?;

    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    Err(parse_api_error(&body).unwrap_or_else(|| format!("API returned status {status}")))
}

// ---------------------------------------------------------------------------
// SSE JSON parsing helpers
// ---------------------------------------------------------------------------

/// Everything a single SSE event contributed to the response.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct StreamChunk {
    pub text: Option<String>,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub stop_reason: Option<String>,
    /// The provider reported an error inside the stream.
    pub error: Option<String>,
    /// The provider signalled the end of the response.
    pub done: bool,
}

/// Decode one SSE event according to the provider's streaming format.
pub(crate) fn decode_event(provider: LlmProvider, event: &str, data: &str) -> StreamChunk {
    match provider {
        LlmProvider::Anthropic => match event {
            "message_start" => StreamChunk {
                input_tokens: parse_input_tokens(data),
                ..Default::default()
            },
            "content_block_delta" => StreamChunk {
                text: parse_delta_text(data),
                ..Default::default()
            },
            "message_delta" => StreamChunk {
                output_tokens: parse_output_tokens(data),
                stop_reason: parse_stop_reason(data),
                ..Default::default()
            },
            "message_stop" => StreamChunk {
                done: true,
                ..Default::default()
            },
            "error" => StreamChunk {
                error: Some(
                    parse_api_error(data).unwrap_or_else(|| "Provider reported a stream error".to_string()),
                ),
                ..Default::default()
            },
            // ping, content_block_start, content_block_stop
            _ => StreamChunk::default(),
        },
        LlmProvider::OpenAi => {
            if data.trim() == "[DONE]" {
                return StreamChunk {
                    done: true,
                    ..Default::default()
                };
            }
            let Ok(v) = serde_json::from_str::<Value>(data) else {
                return StreamChunk::default();
            };
            if let Some(error) = parse_api_error(data) {
                return StreamChunk {
                    error: Some(error),
                    ..Default::default()
                };
            }
            let choice = v.get("choices").and_then(|c| c.get(0));
            let usage = v.get("usage");
            StreamChunk {
                text: choice
                    .and_then(|c| c.get("delta")?.get("content")?.as_str())
                    .map(str::to_string),
                input_tokens: usage.and_then(|u| u.get("prompt_tokens")?.as_u64()).map(|n| n as u32),
                output_tokens: usage
                    .and_then(|u| u.get("completion_tokens")?.as_u64())
                    .map(|n| n as u32),
                stop_reason: choice
                    .and_then(|c| c.get("finish_reason")?.as_str())
                    .map(str::to_string),
                error: None,
                done: false,
            }
        }
        LlmProvider::Gemini => {
            let Ok(v) = serde_json::from_str::<Value>(data) else {
                return StreamChunk::default();
            };
            if let Some(error) = parse_api_error(data) {
                return StreamChunk {
                    error: Some(error),
                    ..Default::default()
                };
            }
            let candidate = v.get("candidates").and_then(|c| c.get(0));
            let text: String = candidate
                .and_then(|c| c.get("content")?.get("parts")?.as_array())
                .map(|parts| {
                    parts
                        .iter()
                        .filter_map(|p| p.get("text")?.as_str())
                        .collect()
                })
                .unwrap_or_default();
            let usage = v.get("usageMetadata");
            StreamChunk {
                text: (!text.is_empty()).then_some(text),
                input_tokens: usage
                    .and_then(|u| u.get("promptTokenCount")?.as_u64())
                    .map(|n| n as u32),
                output_tokens: usage
                    .and_then(|u| u.get("candidatesTokenCount")?.as_u64())
                    .map(|n| n as u32),
                stop_reason: candidate
                    .and_then(|c| c.get("finishReason")?.as_str())
                    .map(str::to_string),
                error: None,
                done: false,
            }
        }
    }
}

/// Extract `input_tokens` from an Anthropic `message_start` event's JSON.
///
/// Expected shape: `{ "type": "message_start", "message": { "usage": { "input_tokens": N } } }`
pub(crate) fn parse_input_tokens(data: &str) -> Option<u32> {
    let v: Value = serde_json::from_str(data).ok()?;
    v.get("message")?
        .get("usage")?
        .get("input_tokens")?
        .as_u64()
        .map(|n| n as u32)
}

/// Extract `delta.text` from an Anthropic `content_block_delta` event's JSON.
pub(crate) fn parse_delta_text(data: &str) -> Option<String> {
    let v: Value = serde_json::from_str(data).ok()?;
    v.get("delta")?
        .get("text")?
        .as_str()
        .map(|s| s.to_string())
}

/// Extract `usage.output_tokens` from an Anthropic `message_delta` event's JSON.
pub(crate) fn parse_output_tokens(data: &str) -> Option<u32> {
    let v: Value = serde_json::from_str(data).ok()?;
    v.get("usage")?
        .get("output_tokens")?
        .as_u64()
        .map(|n| n as u32)
}

/// Extract `delta.stop_reason` from an Anthropic `message_delta` event's JSON.
pub(crate) fn parse_stop_reason(data: &str) -> Option<String> {
    let v: Value = serde_json::from_str(data).ok()?;
    v.get("delta")?
        .get("stop_reason")?
        .as_str()
        .map(|s| s.to_string())
}

/// Pull `error.message` (Anthropic, OpenAI, Gemini all use this shape) out of
/// an error response body.
pub(crate) fn parse_api_error(body: &str) -> Option<String> {
    let v: Value = serde_json::from_str(body).ok()?;
    v.get("error")?
        .get("message")?
        .as_str()
        .map(|s| s.to_string())
}

/// Extract a human-readable error message from an SSE error.
fn extract_error_message(err: &reqwest_eventsource::Error) -> String {
    match err {
        reqwest_eventsource::Error::InvalidStatusCode(status, _response) => {
            format!("API returned status {status}")
        }
        reqwest_eventsource::Error::Transport(e) => {
            format!("Network error: {e}")
        }
        other => format!("Stream error: {other}"),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
