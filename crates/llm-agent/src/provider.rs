//! OpenAI-compatible chat completions.
//!
//! Every provider in the model picker (OpenAI, Gemini, Anthropic, DeepSeek)
//! exposes a `/chat/completions` endpoint that speaks this dialect, so one
//! client covers them all.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use llmchat::{Content, Message, ToolCall};
use phlengconf::{AgentConfig, ModelChoice, PhlengConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::tools::ToolSpec;
use crate::trace::with_traceparent;

/// A chat-capable language model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// One completion over the system instruction plus transcript.
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<Message>;
}

pub struct OpenAiCompatible {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: Option<f32>,
}

impl OpenAiCompatible {
    pub fn new(base_url: &str, model: &str, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    /// Build from a picker entry, reading its key from the environment.
    pub fn from_choice(choice: &ModelChoice, agent: &AgentConfig) -> Result<Self> {
        let key = std::env::var(&choice.api_key_env).ok();
        Self::from_choice_with_key(choice, agent, key)
    }

    pub fn from_choice_with_key(
        choice: &ModelChoice,
        agent: &AgentConfig,
        api_key: Option<String>,
    ) -> Result<Self> {
        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AgentError::MissingApiKey {
                model: choice.id.clone(),
                env: choice.api_key_env.clone(),
            })?;

        let mut model = Self::new(&choice.base_url, &choice.model, Some(api_key))
            .with_temperature(agent.temperature);
        if let Some(secs) = agent.request_timeout_secs {
            model = model.with_timeout(Duration::from_secs(secs))?;
        }
        Ok(model)
    }
}

/// Resolve a model id from the configured picker.
pub fn model_for(config: &PhlengConfig, id: &str) -> Result<Arc<dyn ChatModel>> {
    let choice = config
        .model(id)
        .ok_or_else(|| AgentError::UnknownModel(id.to_string()))?;
    Ok(Arc::new(OpenAiCompatible::from_choice(choice, &config.agent)?))
}

#[async_trait]
impl ChatModel for OpenAiCompatible {
    fn name(&self) -> &str {
        &self.model
    }

    #[tracing::instrument(
        skip(self, system, messages, tools),
        fields(model = %self.model, messages = messages.len(), tools = tools.len())
    )]
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<Message> {
        let system = Message::system(system);
        let request = ChatRequest {
            model: &self.model,
            messages: std::iter::once(&system)
                .chain(messages)
                .map(WireMessage::from)
                .collect(),
            tools: tools.iter().map(WireTool::from).collect(),
            temperature: self.temperature,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = with_traceparent(builder).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Provider(format!(
                "{} returned {}: {}",
                self.model, status, body
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Decode(e.to_string()))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::Decode("response carried no choices".to_string()))?;

        tracing::debug!(
            finish_reason = choice.finish_reason.as_deref().unwrap_or("none"),
            tool_calls = choice.message.tool_calls.len(),
            "Completion received"
        );

        Ok(choice.message.into_message())
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

impl<'a> From<&'a Message> for WireMessage<'a> {
    fn from(message: &'a Message) -> Self {
        WireMessage {
            role: message.role.as_str(),
            content: message.content.as_ref(),
            tool_calls: message.tool_calls.iter().map(WireToolCall::from).collect(),
            tool_call_id: message.tool_call_id.as_deref(),
        }
    }
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolSpec,
}

impl<'a> From<&'a ToolSpec> for WireTool<'a> {
    fn from(spec: &'a ToolSpec) -> Self {
        WireTool {
            kind: "function",
            function: spec,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// JSON-encoded arguments object, as the provider sends it.
    #[serde(default)]
    arguments: String,
}

impl From<&ToolCall> for WireToolCall {
    fn from(call: &ToolCall) -> Self {
        WireToolCall {
            id: Some(call.id.clone()),
            kind: function_kind(),
            function: WireFunctionCall {
                name: call.name.clone(),
                arguments: call.arguments.to_string(),
            },
        }
    }
}

impl WireToolCall {
    fn into_tool_call(self) -> ToolCall {
        let raw = self.function.arguments;
        let arguments = if raw.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            // Malformed arguments reach the tool as a string so it can
            // report the problem back to the model.
            serde_json::from_str(&raw).unwrap_or(Value::String(raw))
        };

        ToolCall {
            id: self
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple())),
            name: self.function.name,
            arguments,
        }
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireReply,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireReply {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default, deserialize_with = "null_as_empty")]
    tool_calls: Vec<WireToolCall>,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<WireToolCall>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let calls: Option<Vec<WireToolCall>> = Option::deserialize(deserializer)?;
    Ok(calls.unwrap_or_default())
}

impl WireReply {
    fn into_message(self) -> Message {
        let calls: Vec<ToolCall> = self
            .tool_calls
            .into_iter()
            .map(WireToolCall::into_tool_call)
            .collect();

        if calls.is_empty() {
            match self.content {
                Some(content) => Message::assistant(content),
                None => Message::assistant_tool_calls(None, Vec::new()),
            }
        } else {
            Message::assistant_tool_calls(self.content, calls)
        }
    }
}
