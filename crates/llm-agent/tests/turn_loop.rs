use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use llm_agent::{
    run_turn, refine_prompt, Agent, AgentError, ChatModel, Document, Retriever, ToolSpec,
};
use llmchat::{ChatHistory, Content, ContentPart, Message, Role, ToolCall};
use pretty_assertions::assert_eq;
use serde_json::json;

/// Replies from a script and remembers every transcript it was shown.
#[derive(Default)]
struct ScriptedModel {
    replies: Mutex<VecDeque<Result<Message, String>>>,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    fn new(replies: Vec<Message>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().map(Ok).collect()),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::from([Err(message.to_string())])),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<Vec<Message>> {
        self.seen.lock().unwrap().clone()
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
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(AgentError::Provider(message)),
            // An exhausted script keeps asking for tools.
            None => Ok(tool_request("call_again", "example_rag", "more")),
        }
    }
}

struct StaticRetriever(Vec<&'static str>);

#[async_trait]
impl Retriever for StaticRetriever {
    async fn retrieve(&self, _query: &str, k: usize) -> llm_agent::Result<Vec<Document>> {
        Ok(self.0.iter().take(k).map(|c| Document::new(*c)).collect())
    }
}

fn tool_request(id: &str, tool: &str, query: &str) -> Message {
    Message::assistant_tool_calls(
        None,
        vec![ToolCall {
            id: id.to_string(),
            name: tool.to_string(),
            arguments: json!({ "query": query }),
        }],
    )
}

const SONG: &str = "Here you go.\n```\nX: 1\nT: Sabai Jai\nC: phleng\nM: 2/4\nL: 1/8\nQ: 1/4=80\nK: C\nV: 1\nC2 D2| E2 G2|\n```";

fn composer(model: Arc<ScriptedModel>) -> Agent {
    Agent::composer(
        model,
        Arc::new(StaticRetriever(vec!["Lao Duang Duean", "Khaek Mon Bang Khun Phrom"])),
        Arc::new(StaticRetriever(vec!["Thang Nai uses the pentatonic"])),
        4,
    )
}

#[tokio::test]
async fn tool_calls_then_answer_commits_two_messages() {
    let model = ScriptedModel::new(vec![
        tool_request("call_1", "example_rag", "happy festive"),
        Message::assistant(SONG),
    ]);
    let agent = composer(model.clone());
    let mut history = ChatHistory::new();

    let outcome = run_turn(&agent, &mut history, "a happy festive tune", 25)
        .await
        .unwrap();

    assert_eq!(outcome.steps, 2);
    assert_eq!(outcome.tool_calls, 1);
    assert_eq!(outcome.reply.text(), SONG);

    let roles: Vec<Role> = history.messages().iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant]);
    assert_eq!(history.messages()[0].text(), "a happy festive tune");

    // The second step saw the tool exchange; history never does.
    let seen = model.seen();
    assert_eq!(seen[1].len(), 3);
    assert_eq!(seen[1][2].role, Role::Tool);
    assert_eq!(
        seen[1][2].text(),
        "Lao Duang Duean\n\nKhaek Mon Bang Khun Phrom"
    );
}

#[tokio::test]
async fn tool_calls_forever_leave_history_untouched() {
    let model = ScriptedModel::new(vec![]);
    let agent = composer(model.clone());
    let mut history = ChatHistory::new();
    history.commit_turn(Message::user("earlier"), Message::assistant(SONG));

    let err = run_turn(&agent, &mut history, "again please", 3)
        .await
        .unwrap_err();

    assert!(matches!(err, AgentError::NoFinalResponse { steps: 3 }));
    assert_eq!(history.len(), 2);
    assert_eq!(model.seen().len(), 3);
}

#[tokio::test]
async fn empty_reply_is_no_final_response() {
    let model = ScriptedModel::new(vec![Message::assistant(Content::Parts(vec![]))]);
    let agent = composer(model);
    let mut history = ChatHistory::new();

    let err = run_turn(&agent, &mut history, "a calm tune", 25)
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::NoFinalResponse { steps: 1 }));
    assert!(history.is_empty());
}

#[tokio::test]
async fn tool_calls_take_precedence_over_content() {
    let mut thinking = tool_request("call_1", "theory_rag", "sad modes");
    thinking.content = Some(Content::Text("Let me look that up.".into()));

    let model = ScriptedModel::new(vec![thinking, Message::assistant(SONG)]);
    let agent = composer(model.clone());
    let mut history = ChatHistory::new();

    let outcome = run_turn(&agent, &mut history, "a sad tune", 25).await.unwrap();
    assert_eq!(outcome.steps, 2);
    assert_eq!(history.last().map(|m| m.text()), Some(SONG));
}

#[tokio::test]
async fn parts_content_ends_the_turn() {
    let reply = Message::assistant(Content::Parts(vec![ContentPart::text(SONG)]));
    let model = ScriptedModel::new(vec![reply]);
    let agent = composer(model);
    let mut history = ChatHistory::new();

    let outcome = run_turn(&agent, &mut history, "a tune", 25).await.unwrap();
    assert_eq!(outcome.reply.text(), SONG);
    assert_eq!(history.len(), 2);
}

#[tokio::test]
async fn unknown_tool_is_reported_to_the_model() {
    let model = ScriptedModel::new(vec![
        tool_request("call_1", "measure_validator", "X: 1"),
        Message::assistant(SONG),
    ]);
    let agent = composer(model.clone());
    let mut history = ChatHistory::new();

    run_turn(&agent, &mut history, "a tune", 25).await.unwrap();
    let tool_reply = &model.seen()[1][2];
    assert!(tool_reply.text().starts_with("Error: measure_validator is not a valid tool"));
}

#[tokio::test]
async fn provider_failure_leaves_history_untouched() {
    let agent = composer(ScriptedModel::failing("503 Service Unavailable"));
    let mut history = ChatHistory::new();

    let err = run_turn(&agent, &mut history, "a tune", 25).await.unwrap_err();
    assert!(matches!(err, AgentError::Provider(_)));
    assert!(history.is_empty());
}

#[tokio::test]
async fn follow_up_turn_sees_previous_exchange() {
    let model = ScriptedModel::new(vec![Message::assistant(SONG), Message::assistant(SONG)]);
    let agent = composer(model.clone());
    let mut history = ChatHistory::new();

    run_turn(&agent, &mut history, "a happy tune", 25).await.unwrap();
    run_turn(&agent, &mut history, "make it slower", 25).await.unwrap();

    let second = &model.seen()[1];
    assert_eq!(second.len(), 3);
    assert_eq!(second[0].text(), "a happy tune");
    assert_eq!(second[2].text(), "make it slower");
    assert_eq!(history.turns(), 2);
}

#[tokio::test]
async fn refiner_returns_trimmed_text_on_fresh_transcript() {
    let model = ScriptedModel::new(vec![
        tool_request("call_1", "theory_rag", "joyful"),
        Message::assistant("  Compose a lively Song Chan melody in Thang Nai.\n"),
    ]);
    let agent = Agent::refiner(
        model.clone(),
        Arc::new(StaticRetriever(vec!["Song Chan is the medium tempo class"])),
        4,
    );

    let refined = refine_prompt(&agent, "something joyful", 25).await.unwrap();
    assert_eq!(refined, "Compose a lively Song Chan melody in Thang Nai.");
    assert_eq!(model.seen()[0].len(), 1);
    assert_eq!(agent.tools.names(), vec!["theory_rag"]);
}
