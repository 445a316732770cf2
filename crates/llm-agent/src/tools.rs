use std::sync::Arc;

use async_trait::async_trait;
use llmchat::ToolCall;
use serde::Serialize;
use serde_json::Value;

/// A function the model may ask for.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object.
    fn parameters(&self) -> Value;

    async fn call(&self, arguments: Value) -> anyhow::Result<String>;
}

/// Declaration sent to the provider, in function-calling form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: Value,
}

/// The tools one agent declares, in declaration order.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.add(tool);
        self
    }

    /// Add a tool, replacing any earlier tool with the same name.
    pub fn add(&mut self, tool: Arc<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools
            .iter()
            .map(|tool| ToolSpec {
                name: tool.name().to_string(),
                description: Some(tool.description().to_string()),
                parameters: tool.parameters(),
            })
            .collect()
    }

    /// Run one requested call. Failures come back as text for the model
    /// to read, so a bad call never ends the turn.
    #[tracing::instrument(skip(self, call), fields(tool.name = %call.name, tool.call_id = %call.id))]
    pub async fn execute(&self, call: &ToolCall) -> String {
        let Some(tool) = self.get(&call.name) else {
            tracing::warn!("Model asked for an unknown tool");
            return format!("Error: {} is not a valid tool, try one of [{}].", call.name, self.names().join(", "));
        };

        match tool.call(call.arguments.clone()).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(error = %e, "Tool call failed");
                format!("Error: {e:#}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Repeats its input"
        }

        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }

        async fn call(&self, arguments: Value) -> anyhow::Result<String> {
            match arguments.get("text").and_then(Value::as_str) {
                Some(text) => Ok(text.to_string()),
                None => anyhow::bail!("missing text"),
            }
        }
    }

    fn call(name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            id: "call_0".into(),
            name: name.into(),
            arguments,
        }
    }

    #[tokio::test]
    async fn executes_known_tool() {
        let tools = ToolSet::new().with(Arc::new(Echo));
        assert_eq!(tools.execute(&call("echo", json!({"text": "hi"}))).await, "hi");
    }

    #[tokio::test]
    async fn failures_become_text() {
        let tools = ToolSet::new().with(Arc::new(Echo));

        let unknown = tools.execute(&call("compose", json!({}))).await;
        assert!(unknown.starts_with("Error: compose is not a valid tool"));
        assert!(unknown.contains("echo"));

        let failed = tools.execute(&call("echo", json!({}))).await;
        assert_eq!(failed, "Error: missing text");
    }

    #[test]
    fn specs_follow_declaration_order() {
        let tools = ToolSet::new().with(Arc::new(Echo)).with(Arc::new(Echo));
        assert_eq!(tools.len(), 1);
        let specs = tools.specs();
        assert_eq!(specs[0].name, "echo");
        assert_eq!(specs[0].description.as_deref(), Some("Repeats its input"));
    }
}
