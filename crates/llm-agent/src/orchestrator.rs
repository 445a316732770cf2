//! Drives an agent through one conversational turn.

use llmchat::{ChatHistory, Message};

use crate::agent::{Agent, AgentStep};
use crate::error::{AgentError, Result};

/// The result of a completed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// The content-bearing assistant message that ended the turn.
    pub reply: Message,
    /// Model steps taken, including the final one.
    pub steps: u32,
    /// Tool calls executed along the way.
    pub tool_calls: usize,
}

/// Run one turn of `agent` on top of `history`.
///
/// The model sees the history plus the new user message, and may call
/// tools any number of times within `max_steps`. Only when it answers with
/// content are the user message and that answer committed to `history`;
/// tool traffic stays in a scratch transcript. On any error the history is
/// left exactly as it was.
#[tracing::instrument(
    skip(agent, history, user_text),
    fields(agent = %agent.name, history.len = history.len(), steps = tracing::field::Empty)
)]
pub async fn run_turn(
    agent: &Agent,
    history: &mut ChatHistory,
    user_text: &str,
    max_steps: u32,
) -> Result<TurnOutcome> {
    let user = Message::user(user_text);
    let mut transcript = history.messages().to_vec();
    transcript.push(user.clone());

    let outcome = drive(agent, &mut transcript, max_steps).await?;
    tracing::Span::current().record("steps", outcome.steps);

    history.commit_turn(user, outcome.reply.clone());
    Ok(outcome)
}

/// Rewrite `text` with the prompt-refinement agent. Runs on a fresh
/// transcript and touches no session history.
#[tracing::instrument(skip(agent, text), fields(agent = %agent.name))]
pub async fn refine_prompt(agent: &Agent, text: &str, max_steps: u32) -> Result<String> {
    let mut transcript = vec![Message::user(text)];
    let outcome = drive(agent, &mut transcript, max_steps).await?;
    let refined = outcome.reply.text().trim().to_string();
    tracing::info!(refined = %refined, "Prompt refined");
    Ok(refined)
}

async fn drive(agent: &Agent, transcript: &mut Vec<Message>, max_steps: u32) -> Result<TurnOutcome> {
    let mut tool_calls = 0;

    for step in 1..=max_steps {
        tracing::debug!(step, "Advancing agent");

        match agent.step(transcript).await? {
            AgentStep::Final(reply) => {
                tracing::info!(step, tool_calls, "Agent answered");
                return Ok(TurnOutcome {
                    reply,
                    steps: step,
                    tool_calls,
                });
            }
            AgentStep::ToolCalls(request) => {
                let calls = request.tool_calls.clone();
                transcript.push(request);

                for call in &calls {
                    tracing::info!(tool = %call.name, arguments = %call.arguments, "Tool call");
                    let output = agent.tools.execute(call).await;
                    tracing::info!(tool = %call.name, "Tool response: {} ...", response_preview(&output));
                    transcript.push(Message::tool_result(call, output));
                    tool_calls += 1;
                }
            }
            AgentStep::Empty => {
                tracing::warn!(step, "Agent returned neither content nor tool calls");
                return Err(AgentError::NoFinalResponse { steps: step });
            }
        }
    }

    tracing::warn!(max_steps, "Agent hit the step limit without answering");
    Err(AgentError::NoFinalResponse { steps: max_steps })
}

/// First three lines of a tool response, flattened onto one line.
pub fn response_preview(output: &str) -> String {
    output.split('\n').take(3).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_keeps_three_lines() {
        assert_eq!(response_preview("a\nb\nc\nd"), "a b c");
        assert_eq!(response_preview("only"), "only");
        assert_eq!(response_preview(""), "");
    }
}
