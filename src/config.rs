//! Configuration types for the assistant chat core.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Startup readiness polling and post-load verification.
    pub startup: StartupConfig,
    /// Stopping policy thresholds for streamed generation.
    pub generation: GenerationConfig,
    /// Auxiliary context-retrieval service.
    pub retrieval: RetrievalConfig,
    /// Voice mode and conversation-mode timing.
    pub voice: VoiceConfig,
    /// OpenAI-compatible generation backend.
    pub api: ApiConfig,
}

/// Startup behaviour while the generation backend finishes its own initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupConfig {
    /// Number of model-list attempts before continuing in degraded mode.
    pub ready_retries: u32,
    /// Pause between model-list attempts in ms.
    pub ready_retry_delay_ms: u64,
    /// Run a short generation self-check after a model loads.
    pub verify_after_load: bool,
    /// Delay before the self-check in ms.
    pub verify_delay_ms: u64,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            ready_retries: 10,
            ready_retry_delay_ms: 1000,
            verify_after_load: true,
            verify_delay_ms: 1000,
        }
    }
}

impl StartupConfig {
    pub fn ready_retry_delay(&self) -> Duration {
        Duration::from_millis(self.ready_retry_delay_ms)
    }

    pub fn verify_delay(&self) -> Duration {
        Duration::from_millis(self.verify_delay_ms)
    }
}

/// Thresholds for the token-stream stopping policy.
///
/// The repetition windows (10-word sequence, 5-word run) are fixed and not
/// part of this surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Hard ceiling on consumed tokens.
    pub max_tokens: usize,
    /// Hard ceiling on accumulated characters.
    pub max_chars: usize,
    /// Minimum accumulated characters before repetition detection runs.
    pub spam_min_chars: usize,
    /// Minimum accumulated characters before a natural stop is considered.
    pub natural_stop_min_chars: usize,
    /// Minimum consumed tokens before a natural stop is considered.
    pub natural_stop_min_tokens: usize,
    /// Sentences required for a natural stop.
    pub natural_stop_sentences: usize,
    /// Emit a progress event every N consumed tokens (0 disables).
    pub progress_every_tokens: usize,
    /// Pause between marking a turn as generating and opening the stream, in ms.
    pub pre_generation_delay_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: 500,
            max_chars: 1000,
            spam_min_chars: 50,
            natural_stop_min_chars: 200,
            natural_stop_min_tokens: 10,
            natural_stop_sentences: 3,
            progress_every_tokens: 10,
            pre_generation_delay_ms: 0,
        }
    }
}

/// Context-retrieval service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Whether prompts are augmented with retrieved context by default.
    pub enabled: bool,
    /// Base URL of the retrieval service (trailing slash optional).
    pub base_url: String,
    /// Search endpoint path relative to `base_url`.
    pub endpoint: String,
    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Whole-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Prefix for the per-request user identifier.
    pub user_id_prefix: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "http://localhost:4567/".to_owned(),
            endpoint: "search".to_owned(),
            connect_timeout_secs: 30,
            request_timeout_secs: 60,
            user_id_prefix: "ai_user_".to_owned(),
        }
    }
}

impl RetrievalConfig {
    /// Full search URL (`base_url` joined with `endpoint`).
    pub fn search_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.endpoint.trim_start_matches('/')
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Voice interaction timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Speak assistant responses by default.
    pub voice_mode: bool,
    /// Pause after the assistant stops speaking before listening resumes (ms).
    pub resume_listening_delay_ms: u64,
    /// Pause after a speech error before listening resumes (ms).
    pub error_recovery_delay_ms: u64,
    /// Pause after creating a session for a voice transcript (ms).
    pub session_settle_ms: u64,
    /// Pause between showing a voice transcript and generating (ms).
    pub transcript_display_ms: u64,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice_mode: false,
            resume_listening_delay_ms: 800,
            error_recovery_delay_ms: 2000,
            session_settle_ms: 100,
            transcript_display_ms: 200,
        }
    }
}

impl VoiceConfig {
    pub fn resume_listening_delay(&self) -> Duration {
        Duration::from_millis(self.resume_listening_delay_ms)
    }

    pub fn error_recovery_delay(&self) -> Duration {
        Duration::from_millis(self.error_recovery_delay_ms)
    }

    pub fn session_settle(&self) -> Duration {
        Duration::from_millis(self.session_settle_ms)
    }

    pub fn transcript_display(&self) -> Duration {
        Duration::from_millis(self.transcript_display_ms)
    }
}

/// OpenAI-compatible HTTP backend.
///
/// Works against any server implementing `/v1/models` and streaming
/// `/v1/chat/completions` (Ollama, llama.cpp server, vLLM, MLX).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Server base URL, with or without a trailing `/v1`.
    pub base_url: String,
    /// Bearer token (empty = no `Authorization` header).
    pub api_key: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Server-side token limit per response.
    pub max_tokens: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_owned(),
            api_key: String::new(),
            temperature: 0.7,
            max_tokens: 512,
        }
    }
}

impl ChatConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::ChatError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::ChatError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/voxchat/config.toml`.
    pub fn default_config_path() -> PathBuf {
        match dirs::config_dir() {
            Some(dir) => dir.join("voxchat").join("config.toml"),
            None => PathBuf::from("/tmp/voxchat-config/config.toml"),
        }
    }
}
