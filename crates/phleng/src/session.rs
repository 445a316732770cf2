//! Per-session state for the presenters.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use llmchat::{ChatHistory, ConversationId, Role};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use crate::render::RenderedArtifacts;
use crate::turn::{TurnError, TurnResult};

/// What the user sees in the conversation pane. Kept apart from the model
/// history so failed turns can be shown without being fed back.
#[derive(Debug, Clone, Serialize)]
pub struct DisplayEntry {
    pub role: Role,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub midi: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wav: Option<String>,
    /// Error kind when the turn failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DisplayEntry {
    fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            title: None,
            midi: None,
            wav: None,
            error: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug)]
pub struct Session {
    pub model_id: String,
    pub history: ChatHistory,
    pub transcript: Vec<DisplayEntry>,
    /// Files rendered by this session's turns, oldest first.
    pub artifacts: Vec<RenderedArtifacts>,
}

impl Session {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            history: ChatHistory::new(),
            transcript: Vec::new(),
            artifacts: Vec::new(),
        }
    }

    pub fn id(&self) -> &ConversationId {
        &self.history.id
    }

    pub fn record_success(&mut self, user_text: &str, result: &TurnResult) {
        self.transcript.push(DisplayEntry::new(Role::User, user_text));
        self.transcript.push(DisplayEntry {
            title: Some(result.composition.title.clone()),
            midi: Some(result.artifacts.midi_name()),
            wav: Some(result.artifacts.wav_name()),
            ..DisplayEntry::new(Role::Assistant, format!("```\n{}\n```", result.composition.body))
        });
        self.artifacts.push(result.artifacts.clone());
    }

    pub fn record_failure(&mut self, user_text: &str, error: &TurnError) {
        self.transcript.push(DisplayEntry::new(Role::User, user_text));
        self.transcript.push(DisplayEntry {
            error: Some(error.kind().to_string()),
            ..DisplayEntry::new(Role::Assistant, error.to_string())
        });
    }
}

pub type SessionHandle = Arc<Mutex<Session>>;

/// All live sessions plus the files they produced. Each session sits
/// behind its own mutex, which serialises its turns.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<ConversationId, SessionHandle>>,
    artifacts: RwLock<HashMap<String, PathBuf>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, model_id: &str) -> (ConversationId, SessionHandle) {
        let session = Session::new(model_id);
        let id = session.id().clone();
        let handle = Arc::new(Mutex::new(session));
        self.sessions.write().await.insert(id.clone(), handle.clone());
        tracing::info!(session = %id, model = model_id, "Session created");
        (id, handle)
    }

    pub async fn get(&self, id: &ConversationId) -> Option<SessionHandle> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Remember rendered files so they can be served by name.
    pub async fn register(&self, artifacts: &RenderedArtifacts) {
        let mut known = self.artifacts.write().await;
        known.insert(artifacts.midi_name(), artifacts.midi.clone());
        known.insert(artifacts.wav_name(), artifacts.wav.clone());
    }

    /// Path of a file this process produced, if `name` is one.
    pub async fn artifact(&self, name: &str) -> Option<PathBuf> {
        self.artifacts.read().await.get(name).cloned()
    }
}
