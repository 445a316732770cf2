//! One compose turn, from the user's words to playable files.

use std::path::Path;
use std::sync::Arc;

use abc::{check_contract, ContractReport, Feedback};
use llm_agent::{
    model_for, refine_prompt, run_turn, Agent, AgentError, ChatModel, EmbeddingClient,
    Retriever, VectorIndex, VectorRetriever,
};
use llmchat::ChatHistory;
use phlengconf::PhlengConfig;
use serde::Serialize;
use thiserror::Error;

use crate::extract::{extract_composition, Composition, ExtractError};
use crate::render::{AudioRenderer, RenderError, RenderedArtifacts, Renderer};

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("the composer never produced an answer ({steps} steps)")]
    NoFinalResponse { steps: u32 },

    #[error("the reply did not contain a fenced notation block")]
    MissingFence,

    #[error("the notation's second line is not a T: title ({line:?})")]
    MalformedHeader { line: String },

    #[error("the notation breaks the output rules: {}", join_feedback(.violations))]
    ContractViolation { violations: Vec<Feedback> },

    #[error("{0}")]
    NotationParse(RenderError),

    #[error("{0}")]
    Synthesis(RenderError),

    #[error("model gateway failed: {0}")]
    Gateway(AgentError),
}

fn join_feedback(feedback: &[Feedback]) -> String {
    feedback
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl TurnError {
    /// Stable identifier for clients.
    pub fn kind(&self) -> &'static str {
        match self {
            TurnError::NoFinalResponse { .. } => "no_final_response",
            TurnError::MissingFence => "missing_fence",
            TurnError::MalformedHeader { .. } => "malformed_header",
            TurnError::ContractViolation { .. } => "contract_violation",
            TurnError::NotationParse(_) => "notation_parse_error",
            TurnError::Synthesis(_) => "synthesis_error",
            TurnError::Gateway(_) => "gateway_error",
        }
    }
}

impl From<AgentError> for TurnError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::NoFinalResponse { steps } => TurnError::NoFinalResponse { steps },
            other => TurnError::Gateway(other),
        }
    }
}

impl From<ExtractError> for TurnError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::MissingFence => TurnError::MissingFence,
            ExtractError::MalformedHeader { line } => TurnError::MalformedHeader { line },
        }
    }
}

impl From<RenderError> for TurnError {
    fn from(err: RenderError) -> Self {
        if err.is_notation_error() {
            TurnError::NotationParse(err)
        } else {
            TurnError::Synthesis(err)
        }
    }
}

/// Everything a successful turn produced.
#[derive(Debug, Clone, Serialize)]
pub struct TurnResult {
    /// The composer's full reply text.
    pub reply: String,
    pub composition: Composition,
    /// What the composer was actually asked, when the refiner rewrote it.
    pub refined_prompt: Option<String>,
    pub contract: ContractReport,
    pub artifacts: RenderedArtifacts,
    pub steps: u32,
    pub tool_calls: usize,
}

/// A configured turn pipeline for one model choice.
pub struct ComposeTurn {
    composer: Agent,
    refiner: Option<Agent>,
    renderer: Arc<dyn Renderer>,
    max_steps: u32,
    strict_contract: bool,
}

impl ComposeTurn {
    pub fn new(composer: Agent, renderer: Arc<dyn Renderer>, max_steps: u32) -> Self {
        Self {
            composer,
            refiner: None,
            renderer,
            max_steps,
            strict_contract: false,
        }
    }

    pub fn with_refiner(mut self, refiner: Option<Agent>) -> Self {
        self.refiner = refiner;
        self
    }

    pub fn with_strict_contract(mut self, strict: bool) -> Self {
        self.strict_contract = strict;
        self
    }

    /// Run the turn. `history` gains the user message and the composer's
    /// reply only when every stage succeeds; on error it is unchanged.
    #[tracing::instrument(skip(self, history, user_text), fields(history.turns = history.turns()))]
    pub async fn run(
        &self,
        history: &mut ChatHistory,
        user_text: &str,
    ) -> Result<TurnResult, TurnError> {
        let refined_prompt = self.refine(history, user_text).await;
        let prompt = refined_prompt.as_deref().unwrap_or(user_text);

        let mut draft = history.clone();
        let outcome = run_turn(&self.composer, &mut draft, prompt, self.max_steps).await?;

        let content = outcome
            .reply
            .content
            .as_ref()
            .ok_or(TurnError::MissingFence)?;
        let composition = extract_composition(content)?;
        tracing::info!(title = %composition.title, "Composition extracted");

        let contract = check_contract(&composition.body);
        for finding in &contract.feedback {
            tracing::info!(%finding, "Contract check");
        }
        if self.strict_contract && !contract.is_satisfied() {
            return Err(TurnError::ContractViolation {
                violations: contract.violations().cloned().collect(),
            });
        }

        let artifacts = self
            .renderer
            .render(&composition.body, &composition.title)
            .await?;

        *history = draft;
        Ok(TurnResult {
            reply: outcome.reply.text().to_string(),
            composition,
            refined_prompt,
            contract,
            artifacts,
            steps: outcome.steps,
            tool_calls: outcome.tool_calls,
        })
    }

    /// Rewrite the opening message of a session. A refiner failure falls
    /// back to the user's own words.
    async fn refine(&self, history: &ChatHistory, user_text: &str) -> Option<String> {
        let refiner = self.refiner.as_ref()?;
        if history.turns() > 0 {
            return None;
        }
        match refine_prompt(refiner, user_text, self.max_steps).await {
            Ok(refined) if !refined.is_empty() => Some(refined),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Prompt refinement failed, using the original text");
                None
            }
        }
    }
}

/// Resolves a model id to a live client.
pub trait ModelSource: Send + Sync {
    fn model(&self, id: &str) -> Result<Arc<dyn ChatModel>, AgentError>;
}

/// Models from the `[[models]]` picker, keys from the environment.
pub struct ConfiguredModels {
    config: Arc<PhlengConfig>,
}

impl ConfiguredModels {
    pub fn new(config: Arc<PhlengConfig>) -> Self {
        Self { config }
    }
}

impl ModelSource for ConfiguredModels {
    fn model(&self, id: &str) -> Result<Arc<dyn ChatModel>, AgentError> {
        model_for(&self.config, id)
    }
}

/// Shared collaborators for building turns: models, retrieval, renderer.
pub struct Studio {
    pub config: Arc<PhlengConfig>,
    models: Arc<dyn ModelSource>,
    examples: Arc<dyn Retriever>,
    theories: Arc<dyn Retriever>,
    renderer: Arc<dyn Renderer>,
}

impl Studio {
    pub fn new(
        config: Arc<PhlengConfig>,
        models: Arc<dyn ModelSource>,
        examples: Arc<dyn Retriever>,
        theories: Arc<dyn Retriever>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self {
            config,
            models,
            examples,
            theories,
            renderer,
        }
    }

    /// Wire everything from configuration. Missing snapshots or keys are
    /// logged and leave retrieval empty rather than stopping startup.
    pub fn from_config(config: Arc<PhlengConfig>) -> Self {
        let retrieval = &config.retrieval;
        let embedder = match EmbeddingClient::from_config(retrieval) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(error = %e, "Embedding client has no key, retrieval calls will fail");
                EmbeddingClient::new(&retrieval.embedding_base_url, &retrieval.embedding_model, None)
            }
        };
        let embedder = Arc::new(embedder);

        let examples = Arc::new(VectorRetriever::new(
            Arc::new(load_index(&config.paths.examples_index)),
            embedder.clone(),
        ));
        let theories = Arc::new(VectorRetriever::new(
            Arc::new(load_index(&config.paths.theories_index)),
            embedder,
        ));

        Self::new(
            config.clone(),
            Arc::new(ConfiguredModels::new(config.clone())),
            examples,
            theories,
            Arc::new(AudioRenderer::from_config(&config.paths)),
        )
    }

    pub fn renderer(&self) -> Arc<dyn Renderer> {
        self.renderer.clone()
    }

    /// Build the turn pipeline for a model choice.
    pub fn compose_turn(&self, model_id: &str) -> Result<ComposeTurn, TurnError> {
        let agent_config = &self.config.agent;
        let top_k = self.config.retrieval.top_k;

        let composer = Agent::composer(
            self.models.model(model_id)?,
            self.examples.clone(),
            self.theories.clone(),
            top_k,
        );

        let refiner = if agent_config.refine_first_prompt {
            Some(Agent::refiner(
                self.models.model(&agent_config.prompt_model)?,
                self.theories.clone(),
                top_k,
            ))
        } else {
            None
        };

        Ok(ComposeTurn::new(composer, self.renderer.clone(), agent_config.max_steps)
            .with_refiner(refiner)
            .with_strict_contract(agent_config.strict_contract))
    }
}

fn load_index(path: &Path) -> VectorIndex {
    match VectorIndex::load(path) {
        Ok(index) => index,
        Err(e) => {
            tracing::warn!(error = %e, "Retrieval index unavailable, continuing without it");
            VectorIndex::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(TurnError::MissingFence.kind(), "missing_fence");
        assert_eq!(
            TurnError::from(AgentError::NoFinalResponse { steps: 25 }).kind(),
            "no_final_response"
        );
        assert_eq!(
            TurnError::from(AgentError::Provider("boom".into())).kind(),
            "gateway_error"
        );
        assert_eq!(
            TurnError::from(RenderError::Synthesis("no sf2".into())).kind(),
            "synthesis_error"
        );
        assert_eq!(
            TurnError::from(RenderError::NotationParse { feedback: vec![] }).kind(),
            "notation_parse_error"
        );
    }

    #[test]
    fn contract_violation_lists_findings() {
        let err = TurnError::ContractViolation {
            violations: vec![Feedback::error("Missing C: header", 0)],
        };
        assert!(err.to_string().contains("Missing C: header"));
    }
}
