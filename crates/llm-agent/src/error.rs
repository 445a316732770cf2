use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Model provider error: {0}")]
    Provider(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to decode provider response: {0}")]
    Decode(String),

    #[error("Agent produced no final response after {steps} steps")]
    NoFinalResponse { steps: u32 },

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Model {model} needs an API key in ${env}")]
    MissingApiKey { model: String, env: String },

    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    #[error("Failed to load index {path}: {message}")]
    Index { path: String, message: String },
}

pub type Result<T> = std::result::Result<T, AgentError>;
