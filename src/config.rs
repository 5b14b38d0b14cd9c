//! Configuration types for receipt extraction.
//!
//! All pipeline behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. The defaults reproduce the tuned
//! low-latency setup: 2000 px image cap, 400-character prompt snippet and a
//! near-greedy sampling profile for a 1B-parameter local model.

use crate::error::ReceiptError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default local model. Small and instruction-tuned so a receipt comes back in
/// a couple of seconds on a laptop CPU.
pub const DEFAULT_MODEL: &str = "llama3.2:1b";

/// Default Ollama endpoint.
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Decoding parameters sent with every chat request.
///
/// The values are fixed per process: identical prompts against the same model
/// state yield identical completions because `seed` is pinned and sampling is
/// kept close to greedy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingOptions {
    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Nucleus-sampling cutoff. Default: 0.3.
    pub top_p: f32,

    /// Maximum generated tokens. Default: 150.
    ///
    /// A six-field expense record fits comfortably in ~100 tokens; the cap
    /// stops a confused model from rambling.
    pub max_tokens: usize,

    /// Context window in tokens. Default: 512.
    pub context_window: u32,

    /// Repetition penalty. Default: 1.1.
    pub repeat_penalty: f32,

    /// Random seed. Default: 42.
    pub seed: u64,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            top_p: 0.3,
            max_tokens: 150,
            context_window: 512,
            repeat_penalty: 1.1,
            seed: 42,
        }
    }
}

/// Configuration for the receipt extraction pipeline.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use receipt2json::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .model("llama3.2:3b")
///     .max_prompt_chars(600)
///     .build()
///     .unwrap();
/// assert_eq!(config.sampling.seed, 42);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Largest allowed image width or height in pixels. Default: 2000.
    ///
    /// Larger photos are downsampled before OCR; Tesseract gains nothing from
    /// 4000 px phone shots and takes several times longer on them.
    pub max_image_dimension: u32,

    /// Number of OCR characters embedded in the prompt. Default: 400.
    pub max_prompt_chars: usize,

    /// Decoding parameters for the chat request.
    pub sampling: SamplingOptions,

    /// Model identifier. Default: [`DEFAULT_MODEL`].
    pub model: String,

    /// Base URL of the Ollama server. Default: [`DEFAULT_OLLAMA_URL`].
    pub ollama_url: String,

    /// `edgequake-llm` provider name (e.g. "openai", "anthropic"). When set,
    /// the named provider is used instead of Ollama.
    pub provider_name: Option<String>,

    /// Pre-constructed `edgequake-llm` provider. Takes precedence over
    /// `provider_name` and Ollama.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Tesseract executable name or path. Default: "tesseract".
    pub tesseract_program: String,

    /// Per-call inference timeout in seconds. Default: none.
    ///
    /// Without a timeout a stalled backend stalls the request; callers that
    /// need a latency bound set this or wrap the call themselves.
    pub api_timeout_secs: Option<u64>,

    /// Directory uploads are staged in. Default: "uploads".
    pub upload_dir: PathBuf,

    /// Maximum accepted upload body size in bytes. Default: 20 MiB.
    pub max_upload_bytes: usize,

    /// Optional stage-progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_image_dimension: 2000,
            max_prompt_chars: 400,
            sampling: SamplingOptions::default(),
            model: DEFAULT_MODEL.to_string(),
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            provider_name: None,
            provider: None,
            tesseract_program: "tesseract".to_string(),
            api_timeout_secs: None,
            upload_dir: PathBuf::from("uploads"),
            max_upload_bytes: 20 * 1024 * 1024,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("max_image_dimension", &self.max_image_dimension)
            .field("max_prompt_chars", &self.max_prompt_chars)
            .field("sampling", &self.sampling)
            .field("model", &self.model)
            .field("ollama_url", &self.ollama_url)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("tesseract_program", &self.tesseract_program)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("upload_dir", &self.upload_dir)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn max_image_dimension(mut self, px: u32) -> Self {
        self.config.max_image_dimension = px;
        self
    }

    pub fn max_prompt_chars(mut self, n: usize) -> Self {
        self.config.max_prompt_chars = n;
        self
    }

    pub fn sampling(mut self, sampling: SamplingOptions) -> Self {
        self.config.sampling = sampling;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.sampling.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn top_p(mut self, p: f32) -> Self {
        self.config.sampling.top_p = p.clamp(0.0, 1.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.sampling.max_tokens = n;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.sampling.seed = seed;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn ollama_url(mut self, url: impl Into<String>) -> Self {
        self.config.ollama_url = url.into();
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn tesseract_program(mut self, program: impl Into<String>) -> Self {
        self.config.tesseract_program = program.into();
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = Some(secs);
        self
    }

    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.upload_dir = dir.into();
        self
    }

    pub fn max_upload_bytes(mut self, n: usize) -> Self {
        self.config.max_upload_bytes = n;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ReceiptError> {
        let c = &self.config;
        if c.max_image_dimension == 0 {
            return Err(ReceiptError::InvalidConfig(
                "max_image_dimension must be ≥ 1".into(),
            ));
        }
        if c.max_prompt_chars == 0 {
            return Err(ReceiptError::InvalidConfig(
                "max_prompt_chars must be ≥ 1".into(),
            ));
        }
        if c.sampling.max_tokens == 0 {
            return Err(ReceiptError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if c.model.trim().is_empty() {
            return Err(ReceiptError::InvalidConfig("model must not be empty".into()));
        }
        if !c.ollama_url.starts_with("http://") && !c.ollama_url.starts_with("https://") {
            return Err(ReceiptError::InvalidConfig(format!(
                "ollama_url must be an http(s) URL, got '{}'",
                c.ollama_url
            )));
        }
        if c.api_timeout_secs == Some(0) {
            return Err(ReceiptError::InvalidConfig(
                "api_timeout_secs must be ≥ 1 when set".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_tuned_profile() {
        let c = ExtractionConfig::default();
        assert_eq!(c.max_image_dimension, 2000);
        assert_eq!(c.max_prompt_chars, 400);
        assert_eq!(c.model, "llama3.2:1b");
        assert_eq!(c.sampling.temperature, 0.1);
        assert_eq!(c.sampling.top_p, 0.3);
        assert_eq!(c.sampling.max_tokens, 150);
        assert_eq!(c.sampling.context_window, 512);
        assert_eq!(c.sampling.repeat_penalty, 1.1);
        assert_eq!(c.sampling.seed, 42);
        assert!(c.api_timeout_secs.is_none());
    }

    #[test]
    fn builder_clamps_sampling() {
        let c = ExtractionConfig::builder()
            .temperature(9.0)
            .top_p(-1.0)
            .build()
            .unwrap();
        assert_eq!(c.sampling.temperature, 2.0);
        assert_eq!(c.sampling.top_p, 0.0);
    }

    #[test]
    fn builder_rejects_zero_dimension() {
        let err = ExtractionConfig::builder()
            .max_image_dimension(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, ReceiptError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_zero_prompt_chars() {
        assert!(ExtractionConfig::builder().max_prompt_chars(0).build().is_err());
    }

    #[test]
    fn builder_rejects_non_http_url() {
        let err = ExtractionConfig::builder()
            .ollama_url("localhost:11434")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("localhost:11434"));
    }

    #[test]
    fn debug_hides_provider() {
        let c = ExtractionConfig::default();
        let dbg = format!("{:?}", c);
        assert!(dbg.contains("llama3.2:1b"));
        assert!(!dbg.contains("progress_callback"));
    }
}
