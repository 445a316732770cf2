use std::sync::Arc;

use llmchat::Message;

use crate::error::Result;
use crate::provider::ChatModel;
use crate::retrieval::Retriever;
use crate::retrieval::RetrieverTool;
use crate::tools::ToolSet;

/// System instruction for the composer: Thai music theory, workflow and
/// the notation output rules.
pub const COMPOSER_PROMPT: &str = include_str!("../prompts/composer.md");

/// System instruction for the prompt refiner.
pub const REFINER_PROMPT: &str = include_str!("../prompts/refiner.md");

/// What one model step produced.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentStep {
    /// The model wants tools run before it answers.
    ToolCalls(Message),
    /// A content-bearing answer.
    Final(Message),
    /// Neither content nor tool calls.
    Empty,
}

/// A chat model bound to a fixed instruction and toolset.
#[derive(Clone)]
pub struct Agent {
    pub name: String,
    pub model: Arc<dyn ChatModel>,
    pub instruction: String,
    pub tools: ToolSet,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("model", &self.model.name())
            .field("tools", &self.tools)
            .finish()
    }
}

impl Agent {
    pub fn new(
        name: &str,
        model: Arc<dyn ChatModel>,
        instruction: impl Into<String>,
        tools: ToolSet,
    ) -> Self {
        Self {
            name: name.to_string(),
            model,
            instruction: instruction.into(),
            tools,
        }
    }

    /// The composer, with both song-example and theory lookups.
    pub fn composer(
        model: Arc<dyn ChatModel>,
        examples: Arc<dyn Retriever>,
        theories: Arc<dyn Retriever>,
        top_k: usize,
    ) -> Self {
        let tools = ToolSet::new()
            .with(Arc::new(RetrieverTool::examples(examples, top_k)))
            .with(Arc::new(RetrieverTool::theories(theories, top_k)));
        Self::new("composer_agent", model, COMPOSER_PROMPT, tools)
    }

    /// The prompt refiner, which only consults theory.
    pub fn refiner(model: Arc<dyn ChatModel>, theories: Arc<dyn Retriever>, top_k: usize) -> Self {
        let tools = ToolSet::new().with(Arc::new(RetrieverTool::theories(theories, top_k)));
        Self::new("prompt_agent", model, REFINER_PROMPT, tools)
    }

    /// Ask the model for its next move over `transcript`.
    #[tracing::instrument(skip(self, transcript), fields(agent = %self.name, messages = transcript.len()))]
    pub async fn step(&self, transcript: &[Message]) -> Result<AgentStep> {
        let reply = self
            .model
            .complete(&self.instruction, transcript, &self.tools.specs())
            .await?;

        Ok(if reply.has_tool_calls() {
            AgentStep::ToolCalls(reply)
        } else if reply.has_content() {
            AgentStep::Final(reply)
        } else {
            AgentStep::Empty
        })
    }
}
