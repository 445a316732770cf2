//! Tool-calling agents over OpenAI-compatible chat models.
//!
//! An [`Agent`] pairs a [`ChatModel`] with a system instruction and a
//! [`ToolSet`]. [`run_turn`] advances it step by step, executing requested
//! tools, until it answers with content, then records the turn in the
//! session's [`llmchat::ChatHistory`].

pub mod agent;
pub mod error;
pub mod orchestrator;
pub mod provider;
pub mod retrieval;
pub mod tools;
pub mod trace;

pub use agent::{Agent, AgentStep, COMPOSER_PROMPT, REFINER_PROMPT};
pub use error::{AgentError, Result};
pub use orchestrator::{refine_prompt, response_preview, run_turn, TurnOutcome};
pub use provider::{model_for, ChatModel, OpenAiCompatible};
pub use retrieval::{
    Document, Embedder, EmbeddingClient, IndexedDocument, Retriever, RetrieverTool, VectorIndex,
    VectorRetriever,
};
pub use tools::{Tool, ToolSet, ToolSpec};
