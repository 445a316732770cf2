//! Similarity search over prebuilt document snapshots.
//!
//! A snapshot is a JSON array of `{ "content", "metadata", "embedding" }`
//! records produced offline. Queries are embedded through an
//! OpenAI-compatible `/embeddings` endpoint and ranked by cosine similarity.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use phlengconf::RetrievalConfig;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{AgentError, Result};
use crate::tools::Tool;
use crate::trace::with_traceparent;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

impl Document {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexedDocument {
    #[serde(flatten)]
    pub document: Document,
    pub embedding: Vec<f32>,
}

/// In-memory vector index.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    entries: Vec<IndexedDocument>,
}

impl VectorIndex {
    pub fn new(entries: Vec<IndexedDocument>) -> Self {
        Self { entries }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let index_error = |message: String| AgentError::Index {
            path: path.display().to_string(),
            message,
        };

        let bytes = std::fs::read(path).map_err(|e| index_error(e.to_string()))?;
        let entries: Vec<IndexedDocument> =
            serde_json::from_slice(&bytes).map_err(|e| index_error(e.to_string()))?;

        tracing::info!(path = %path.display(), documents = entries.len(), "Loaded retrieval index");
        Ok(Self::new(entries))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `k` documents closest to `query`, best first. Entries whose
    /// dimension differs from the query are skipped.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(f32, &Document)> {
        let mut scored: Vec<(f32, &Document)> = self
            .entries
            .iter()
            .filter(|e| e.embedding.len() == query.len())
            .map(|e| (cosine_similarity(query, &e.embedding), &e.document))
            .collect();

        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(k);
        scored
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

pub struct EmbeddingClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl EmbeddingClient {
    pub fn new(base_url: &str, model: &str, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        }
    }

    pub fn from_config(config: &RetrievalConfig) -> Result<Self> {
        let key = std::env::var(&config.embedding_api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| AgentError::MissingApiKey {
                model: config.embedding_model.clone(),
                env: config.embedding_api_key_env.clone(),
            })?;
        Ok(Self::new(
            &config.embedding_base_url,
            &config.embedding_model,
            Some(key),
        ))
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    #[tracing::instrument(skip(self, text), fields(model = %self.model))]
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);
        let mut builder = self.client.post(&url).json(&EmbeddingRequest {
            model: &self.model,
            input: text,
        });
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = with_traceparent(builder).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Retrieval(format!(
                "embedding request failed with status {status}: {body}"
            )));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Decode(e.to_string()))?;
        body.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| AgentError::Decode("embedding response carried no data".to_string()))
    }
}

/// Something that can find documents relevant to a query.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<Document>>;
}

pub struct VectorRetriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
}

impl VectorRetriever {
    pub fn new(index: Arc<VectorIndex>, embedder: Arc<dyn Embedder>) -> Self {
        Self { index, embedder }
    }
}

#[async_trait]
impl Retriever for VectorRetriever {
    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<Document>> {
        if self.index.is_empty() {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed(query).await?;
        Ok(self
            .index
            .search(&embedding, k)
            .into_iter()
            .map(|(_, doc)| doc.clone())
            .collect())
    }
}

const EXAMPLE_RAG_DESCRIPTION: &str = "Searches and returns traditional Thai songs in ABC notation, their motives, and their metadata from the database.";
const THEORY_RAG_DESCRIPTION: &str =
    "Searches and returns the knowledge of traditional Thai music theories from the database.";

/// Exposes a retriever to the model as a single-argument tool.
pub struct RetrieverTool {
    name: String,
    description: String,
    retriever: Arc<dyn Retriever>,
    top_k: usize,
}

impl RetrieverTool {
    pub fn new(
        name: &str,
        description: &str,
        retriever: Arc<dyn Retriever>,
        top_k: usize,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            retriever,
            top_k,
        }
    }

    /// Song examples: ABC transcriptions, motives and metadata.
    pub fn examples(retriever: Arc<dyn Retriever>, top_k: usize) -> Self {
        Self::new("example_rag", EXAMPLE_RAG_DESCRIPTION, retriever, top_k)
    }

    /// Thai music theory knowledge.
    pub fn theories(retriever: Arc<dyn Retriever>, top_k: usize) -> Self {
        Self::new("theory_rag", THEORY_RAG_DESCRIPTION, retriever, top_k)
    }
}

#[async_trait]
impl Tool for RetrieverTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "query to look up in retriever"
                }
            },
            "required": ["query"]
        })
    }

    #[tracing::instrument(skip(self, arguments), fields(tool.name = %self.name))]
    async fn call(&self, arguments: Value) -> anyhow::Result<String> {
        let query = match &arguments {
            Value::String(query) => query.as_str(),
            other => match other.get("query").and_then(Value::as_str) {
                Some(query) => query,
                None => anyhow::bail!("{} needs a string \"query\" argument", self.name),
            },
        };

        let documents = self.retriever.retrieve(query, self.top_k).await?;
        tracing::debug!(documents = documents.len(), "Retrieved documents");

        Ok(documents
            .iter()
            .map(|d| d.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n"))
    }
}
