//! Configuration sections and their compiled defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Where rendered MIDI and WAV files are written.
    /// Default: the platform temp directory
    #[serde(default = "PathsConfig::default_artifact_dir")]
    pub artifact_dir: PathBuf,

    /// SoundFont used for synthesis.
    /// Default: ~/.fluidsynth/default_sound_font.sf2
    #[serde(default = "PathsConfig::default_soundfont")]
    pub soundfont: PathBuf,

    /// Searched for any `.sf2` when `soundfont` does not exist.
    #[serde(default = "PathsConfig::default_soundfont_dirs")]
    pub soundfont_dirs: Vec<PathBuf>,

    /// Song-example retrieval snapshot.
    #[serde(default = "PathsConfig::default_examples_index")]
    pub examples_index: PathBuf,

    /// Music-theory retrieval snapshot.
    #[serde(default = "PathsConfig::default_theories_index")]
    pub theories_index: PathBuf,
}

impl PathsConfig {
    fn default_artifact_dir() -> PathBuf {
        std::env::temp_dir()
    }

    fn default_soundfont() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".fluidsynth/default_sound_font.sf2"))
            .unwrap_or_else(|| PathBuf::from(".fluidsynth/default_sound_font.sf2"))
    }

    fn default_soundfont_dirs() -> Vec<PathBuf> {
        vec![
            PathBuf::from("/usr/share/sounds/sf2"),
            PathBuf::from("/usr/share/soundfonts"),
        ]
    }

    fn default_examples_index() -> PathBuf {
        PathBuf::from("data/examples.json")
    }

    fn default_theories_index() -> PathBuf {
        PathBuf::from("data/theories.json")
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            artifact_dir: Self::default_artifact_dir(),
            soundfont: Self::default_soundfont(),
            soundfont_dirs: Self::default_soundfont_dirs(),
            examples_index: Self::default_examples_index(),
            theories_index: Self::default_theories_index(),
        }
    }
}

/// HTTP listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindConfig {
    /// Default: 8501
    #[serde(default = "BindConfig::default_http_port")]
    pub http_port: u16,

    /// Default: 127.0.0.1
    #[serde(default = "BindConfig::default_host")]
    pub host: String,
}

impl BindConfig {
    fn default_http_port() -> u16 {
        8501
    }

    fn default_host() -> String {
        "127.0.0.1".to_string()
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            http_port: Self::default_http_port(),
            host: Self::default_host(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint. Traces and logs are exported only when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otlp_endpoint: Option<String>,

    /// Filter directive (trace, debug, info, warn, error, or a full
    /// `tracing_subscriber::EnvFilter` string).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            log_level: Self::default_log_level(),
        }
    }
}

/// Composer and prompt-refiner behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model id (from `[[models]]`) a new session starts with.
    #[serde(default = "AgentConfig::default_model")]
    pub default_model: String,

    /// Model id the prompt refiner runs on.
    #[serde(default = "AgentConfig::default_prompt_model")]
    pub prompt_model: String,

    /// Model steps allowed per turn before giving up.
    #[serde(default = "AgentConfig::default_max_steps")]
    pub max_steps: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Per-request timeout for model calls. Unset means wait indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,

    /// Rewrite the first message of a session with the prompt refiner.
    #[serde(default)]
    pub refine_first_prompt: bool,

    /// Fail the turn when the composition breaks the output rules.
    #[serde(default)]
    pub strict_contract: bool,
}

impl AgentConfig {
    fn default_model() -> String {
        "gpt-5-mini".to_string()
    }

    fn default_prompt_model() -> String {
        "gpt-4.1-mini".to_string()
    }

    fn default_max_steps() -> u32 {
        25
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_model: Self::default_model(),
            prompt_model: Self::default_prompt_model(),
            max_steps: Self::default_max_steps(),
            temperature: None,
            request_timeout_secs: None,
            refine_first_prompt: false,
            strict_contract: false,
        }
    }
}

/// Embedding endpoint used to query the retrieval snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "RetrievalConfig::default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "RetrievalConfig::default_embedding_base_url")]
    pub embedding_base_url: String,

    /// Environment variable holding the embedding API key.
    #[serde(default = "RetrievalConfig::default_embedding_api_key_env")]
    pub embedding_api_key_env: String,

    /// Documents returned per query.
    #[serde(default = "RetrievalConfig::default_top_k")]
    pub top_k: usize,
}

impl RetrievalConfig {
    fn default_embedding_model() -> String {
        "text-embedding-ada-002".to_string()
    }

    fn default_embedding_base_url() -> String {
        OPENAI_BASE_URL.to_string()
    }

    fn default_embedding_api_key_env() -> String {
        "OPENAI_API_KEY".to_string()
    }

    fn default_top_k() -> usize {
        4
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            embedding_model: Self::default_embedding_model(),
            embedding_base_url: Self::default_embedding_base_url(),
            embedding_api_key_env: Self::default_embedding_api_key_env(),
            top_k: Self::default_top_k(),
        }
    }
}

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";

/// One entry of the model picker. Every provider is reached through its
/// OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelChoice {
    pub id: String,
    pub display_name: String,
    pub base_url: String,
    /// Model name sent to the provider.
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
}

impl ModelChoice {
    fn new(id: &str, display_name: &str, base_url: &str, model: &str, api_key_env: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            base_url: base_url.to_string(),
            model: model.to_string(),
            api_key_env: api_key_env.to_string(),
        }
    }
}

pub fn default_models() -> Vec<ModelChoice> {
    let openai = |id: &str, name: &str| ModelChoice::new(id, name, OPENAI_BASE_URL, id, "OPENAI_API_KEY");
    let gemini =
        |id: &str, name: &str| ModelChoice::new(id, name, GEMINI_BASE_URL, id, "GOOGLE_API_KEY");
    let claude = |id: &str, name: &str, model: &str| {
        ModelChoice::new(id, name, ANTHROPIC_BASE_URL, model, "ANTHROPIC_API_KEY")
    };

    vec![
        openai("gpt-5-mini", "GPT-5 mini"),
        openai("gpt-5", "GPT-5"),
        openai("gpt-4.1-mini", "GPT-4.1 mini"),
        openai("gpt-4.1", "GPT-4.1"),
        gemini("gemini-2.5-flash", "Gemini 2.5 Flash"),
        gemini("gemini-2.5-pro", "Gemini 2.5 Pro"),
        claude("claude-haiku-4.5", "Claude Haiku 4.5", "claude-haiku-4-5-20251001"),
        claude("claude-sonnet-4.5", "Claude Sonnet 4.5", "claude-sonnet-4-5-20250929"),
        claude("claude-opus-4.1", "Claude Opus 4.1", "claude-opus-4-1-20250805"),
        ModelChoice::new(
            "deepseek-chat",
            "DeepSeek V3",
            DEEPSEEK_BASE_URL,
            "deepseek-chat",
            "DEEPSEEK_API_KEY",
        ),
    ]
}
