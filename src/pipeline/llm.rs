//! Structured extraction: send the prompt to a language model and time it.
//!
//! All prompt wording lives in [`crate::prompts`]; this module only knows how
//! to deliver a prompt under the fixed [`SamplingOptions`] and how to report
//! what happened.
//!
//! ## No retry
//!
//! A failed call is not retried. The request is interactive and a local
//! backend that is down stays down for the next attempt too; the fallback
//! record gets the user an answer immediately, with the cause attached.

use crate::config::SamplingOptions;
use crate::error::InferenceError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A chat-completion backend.
///
/// `infer` sends a single user-role message containing `prompt`.
/// Implementations hold no per-request state and may be shared across
/// concurrent requests.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Short label used in logs, e.g. `ollama:llama3.2:1b`.
    fn name(&self) -> String;

    /// Run one completion and return the model's text verbatim.
    async fn infer(&self, prompt: &str, sampling: &SamplingOptions) -> Result<String, InferenceError>;
}

/// What the extraction stage produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionOutcome {
    /// The model answered; `response` is its verbatim text.
    Extracted { response: String, elapsed: Duration },
    /// The backend failed; `reason` is the rendered [`InferenceError`].
    Failed { reason: String, elapsed: Duration },
}

impl ExtractionOutcome {
    pub fn elapsed(&self) -> Duration {
        match self {
            ExtractionOutcome::Extracted { elapsed, .. } | ExtractionOutcome::Failed { elapsed, .. } => {
                *elapsed
            }
        }
    }
}

/// Call `backend` once with `prompt`, measuring wall-clock time around the call.
///
/// When `timeout` is set the call is abandoned after that long and reported
/// as [`InferenceError::Timeout`].
pub async fn run_extraction(
    backend: &Arc<dyn InferenceBackend>,
    prompt: &str,
    sampling: &SamplingOptions,
    timeout: Option<Duration>,
) -> ExtractionOutcome {
    let start = Instant::now();

    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, backend.infer(prompt, sampling)).await {
            Ok(r) => r,
            Err(_) => Err(InferenceError::Timeout {
                millis: limit.as_millis() as u64,
            }),
        },
        None => backend.infer(prompt, sampling).await,
    };

    let elapsed = start.elapsed();
    match result {
        Ok(response) => {
            debug!(
                "{}: {} chars in {:?}",
                backend.name(),
                response.len(),
                elapsed
            );
            ExtractionOutcome::Extracted { response, elapsed }
        }
        Err(e) => {
            warn!("{}: inference failed after {:?} — {}", backend.name(), elapsed, e);
            ExtractionOutcome::Failed {
                reason: e.to_string(),
                elapsed,
            }
        }
    }
}

/// Prefix the model text with a human-readable timing line.
pub fn annotate_with_timing(response: &str, elapsed: Duration) -> String {
    format!("⚡ Processed in {:.2}s\n\n{}", elapsed.as_secs_f64(), response)
}

// ── Ollama ───────────────────────────────────────────────────────────────────

/// [`InferenceBackend`] speaking Ollama's native `/api/chat` protocol.
///
/// The native API is used rather than the OpenAI-compatible one because only
/// it accepts `num_ctx`, `repeat_penalty` and `seed`.
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaBackend {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    /// Build the JSON body for one chat request.
    pub fn request_body<'a>(&'a self, prompt: &'a str, sampling: &SamplingOptions) -> OllamaChatRequest<'a> {
        OllamaChatRequest {
            model: &self.model,
            messages: vec![OllamaMessage {
                role: "user",
                content: prompt,
            }],
            stream: false,
            options: OllamaOptions::from(sampling),
        }
    }
}

/// Request body for `POST /api/chat`.
#[derive(Debug, Serialize)]
pub struct OllamaChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<OllamaMessage<'a>>,
    pub stream: bool,
    pub options: OllamaOptions,
}

#[derive(Debug, Serialize)]
pub struct OllamaMessage<'a> {
    pub role: &'a str,
    pub content: &'a str,
}

/// Ollama's names for the [`SamplingOptions`] fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OllamaOptions {
    pub temperature: f32,
    pub top_p: f32,
    pub num_predict: usize,
    pub num_ctx: u32,
    pub repeat_penalty: f32,
    pub seed: u64,
}

impl From<&SamplingOptions> for OllamaOptions {
    fn from(s: &SamplingOptions) -> Self {
        Self {
            temperature: s.temperature,
            top_p: s.top_p,
            num_predict: s.max_tokens,
            num_ctx: s.context_window,
            repeat_penalty: s.repeat_penalty,
            seed: s.seed,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    message: OllamaResponseMessage,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaErrorBody {
    error: String,
}

#[async_trait]
impl InferenceBackend for OllamaBackend {
    fn name(&self) -> String {
        format!("ollama:{}", self.model)
    }

    async fn infer(&self, prompt: &str, sampling: &SamplingOptions) -> Result<String, InferenceError> {
        let url = self.chat_url();
        let response = self
            .client
            .post(&url)
            .json(&self.request_body(prompt, sampling))
            .send()
            .await
            .map_err(|e| InferenceError::Connection {
                url: url.clone(),
                detail: e.to_string(),
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| InferenceError::MalformedResponse {
                detail: e.to_string(),
            })?;

        if !status.is_success() {
            let detail = serde_json::from_str::<OllamaErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or(body);
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(InferenceError::ModelNotFound {
                    model: self.model.clone(),
                    detail,
                });
            }
            return Err(InferenceError::Api {
                status: status.as_u16(),
                body: detail,
            });
        }

        let parsed: OllamaChatResponse =
            serde_json::from_str(&body).map_err(|e| InferenceError::MalformedResponse {
                detail: e.to_string(),
            })?;
        debug!(
            "ollama: {} prompt tokens, {} output tokens",
            parsed.prompt_eval_count.unwrap_or(0),
            parsed.eval_count.unwrap_or(0)
        );
        Ok(parsed.message.content)
    }
}

// ── edgequake-llm providers ──────────────────────────────────────────────────

/// [`InferenceBackend`] wrapping an `edgequake-llm` provider.
///
/// Temperature, top-p and the output-token cap are forwarded through
/// `CompletionOptions`; context window, repeat penalty and seed are
/// Ollama-specific and are not.
pub struct ProviderBackend {
    provider: Arc<dyn LLMProvider>,
    label: String,
}

impl ProviderBackend {
    pub fn new(provider: Arc<dyn LLMProvider>, label: impl Into<String>) -> Self {
        Self {
            provider,
            label: label.into(),
        }
    }
}

/// Build `CompletionOptions` from the sampling profile.
fn build_options(sampling: &SamplingOptions) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(sampling.temperature),
        top_p: Some(sampling.top_p),
        max_tokens: Some(sampling.max_tokens),
        ..Default::default()
    }
}

#[async_trait]
impl InferenceBackend for ProviderBackend {
    fn name(&self) -> String {
        self.label.clone()
    }

    async fn infer(&self, prompt: &str, sampling: &SamplingOptions) -> Result<String, InferenceError> {
        let messages = vec![ChatMessage::user(prompt)];
        let options = build_options(sampling);
        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| InferenceError::Provider {
                provider: self.label.clone(),
                detail: e.to_string(),
            })?;
        debug!(
            "{}: {} input tokens, {} output tokens",
            self.label, response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}
