#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use llm_agent::{AgentError, ChatModel, Document, Retriever, ToolSpec};
use llmchat::{Message, ToolCall};
use phleng::render::{artifact_name, notation_to_midi, samples_to_wav, SAMPLE_RATE};
use phleng::{ModelSource, RenderError, RenderedArtifacts, Renderer, Studio};
use phlengconf::PhlengConfig;
use serde_json::json;

pub const SONG: &str = "Here is a festive piece.\n```\nX: 1\nT: Ruen Roeng\nC: Composer Agent\nM: 2/4\nL: 1/8\nQ: 1/4=96\nK: C\nV: 1\nC2 D2| E2 G2| A2 G2| E4|\n\nG2 E2| D2 C2| D2 E2| C4|\n```";

/// Replies from a script shared by every model id.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Message>>,
    pub seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Message>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        _system: &str,
        messages: &[Message],
        _tools: &[ToolSpec],
    ) -> llm_agent::Result<Message> {
        self.seen.lock().unwrap().push(messages.to_vec());
        match self.replies.lock().unwrap().pop_front() {
            Some(reply) => Ok(reply),
            None => Err(AgentError::Provider("script exhausted".into())),
        }
    }
}

pub fn tool_request(tool: &str, query: &str) -> Message {
    Message::assistant_tool_calls(
        None,
        vec![ToolCall {
            id: format!("call_{tool}"),
            name: tool.to_string(),
            arguments: json!({ "query": query }),
        }],
    )
}

pub struct ScriptedModels(pub Arc<ScriptedModel>);

impl ModelSource for ScriptedModels {
    fn model(&self, id: &str) -> Result<Arc<dyn ChatModel>, AgentError> {
        if id.starts_with("missing") {
            return Err(AgentError::UnknownModel(id.to_string()));
        }
        if id.starts_with("nokey") {
            return Err(AgentError::MissingApiKey {
                model: id.to_string(),
                env: "NOKEY_API_KEY".to_string(),
            });
        }
        Ok(self.0.clone())
    }
}

pub struct StaticRetriever(pub &'static str);

#[async_trait]
impl Retriever for StaticRetriever {
    async fn retrieve(&self, _query: &str, _k: usize) -> llm_agent::Result<Vec<Document>> {
        Ok(vec![Document::new(self.0)])
    }
}

/// Writes real MIDI and a short silent WAV, or fails synthesis on demand.
pub struct SilentRenderer {
    pub dir: PathBuf,
    pub fail_synthesis: bool,
}

#[async_trait]
impl Renderer for SilentRenderer {
    async fn render(
        &self,
        notation: &str,
        base_name: &str,
    ) -> Result<RenderedArtifacts, RenderError> {
        let midi_bytes = notation_to_midi(notation, &abc::MidiParams::default())?;
        if self.fail_synthesis {
            return Err(RenderError::Synthesis("no instruments loaded".into()));
        }
        let midi = self.dir.join(artifact_name(base_name, "mid"));
        let wav = self.dir.join(artifact_name(base_name, "wav"));
        std::fs::write(&midi, midi_bytes).unwrap();
        std::fs::write(&wav, samples_to_wav(&[0.0; 64], &[0.0; 64], SAMPLE_RATE)?).unwrap();
        Ok(RenderedArtifacts { midi, wav })
    }
}

pub fn studio(
    config: PhlengConfig,
    model: Arc<ScriptedModel>,
    dir: PathBuf,
    fail_synthesis: bool,
) -> Studio {
    Studio::new(
        Arc::new(config),
        Arc::new(ScriptedModels(model)),
        Arc::new(StaticRetriever("Lao Duang Duean\nX: 1\nT: Lao Duang Duean")),
        Arc::new(StaticRetriever("Song Chan tempo class: 76-92 BPM")),
        Arc::new(SilentRenderer {
            dir,
            fail_synthesis,
        }),
    )
}
