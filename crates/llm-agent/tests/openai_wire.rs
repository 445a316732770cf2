use std::sync::Arc;

use llm_agent::{
    run_turn, Agent, AgentError, ChatModel, EmbeddingClient, IndexedDocument, OpenAiCompatible,
    VectorIndex, VectorRetriever,
};
use llmchat::{ChatHistory, Message, Role};
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn completion(message: serde_json::Value, finish_reason: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{"index": 0, "message": message, "finish_reason": finish_reason}]
    }))
}

fn index() -> Arc<VectorIndex> {
    let entries: Vec<IndexedDocument> = serde_json::from_value(json!([
        {"content": "X: 1\nT: Lao Duang Duean\nK: C", "embedding": [1.0, 0.0]},
        {"content": "Thang Nai mode notes", "embedding": [0.0, 1.0]}
    ]))
    .unwrap();
    Arc::new(VectorIndex::new(entries))
}

#[tokio::test]
async fn composer_turn_over_http() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"index": 0, "embedding": [0.9, 0.1]}]
        })))
        .mount(&server)
        .await;

    // Once the tool result is in the transcript, answer with the song.
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("\"tool_call_id\":\"call_rag\""))
        .respond_with(completion(
            json!({"role": "assistant", "content": "```\nX: 1\nT: Ruen Roeng\n```"}),
            "stop",
        ))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .respond_with(completion(
            json!({
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_rag",
                    "type": "function",
                    "function": {"name": "example_rag", "arguments": "{\"query\":\"festive\"}"}
                }]
            }),
            "tool_calls",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let model: Arc<dyn ChatModel> = Arc::new(OpenAiCompatible::new(
        &server.uri(),
        "gpt-5-mini",
        Some("test-key".to_string()),
    ));
    let embedder = Arc::new(EmbeddingClient::new(
        &server.uri(),
        "text-embedding-ada-002",
        Some("test-key".to_string()),
    ));
    let retriever = Arc::new(VectorRetriever::new(index(), embedder));
    let agent = Agent::composer(model, retriever.clone(), retriever, 1);

    let mut history = ChatHistory::new();
    let outcome = run_turn(&agent, &mut history, "a happy festive tune", 25)
        .await
        .unwrap();

    assert_eq!(outcome.reply.text(), "```\nX: 1\nT: Ruen Roeng\n```");
    assert_eq!(outcome.tool_calls, 1);
    assert_eq!(history.len(), 2);
    assert_eq!(history.messages()[1].role, Role::Assistant);

    // The tool result sent back was the closest snapshot document.
    let requests = server.received_requests().await.unwrap();
    let second_chat = requests
        .iter()
        .filter(|r| r.url.path() == "/chat/completions")
        .nth(1)
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&second_chat.body).unwrap();
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages[0]["role"], "system");
    assert_eq!(messages.last().unwrap()["role"], "tool");
    assert_eq!(
        messages.last().unwrap()["content"],
        "X: 1\nT: Lao Duang Duean\nK: C"
    );
    assert_eq!(body["tools"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn provider_error_status_surfaces() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
        .mount(&server)
        .await;

    let model = OpenAiCompatible::new(&server.uri(), "gpt-5", Some("k".into()));
    let err = model
        .complete("system", &[Message::user("hi")], &[])
        .await
        .unwrap_err();

    match err {
        AgentError::Provider(message) => {
            assert!(message.contains("429"));
            assert!(message.contains("rate limited"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn undecodable_body_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let model = OpenAiCompatible::new(&server.uri(), "gpt-5", None);
    let err = model
        .complete("system", &[Message::user("hi")], &[])
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::Decode(_)));
}
