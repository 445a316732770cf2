//! Line-oriented chat on a terminal.

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::session::Session;
use crate::turn::Studio;
use crate::web::VIEWER_URL;

/// Read one mood or revision request per line until EOF or an empty line,
/// composing after each.
pub async fn run_chat<R, W>(studio: &Studio, model_id: &str, input: R, mut output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let turn = studio.compose_turn(model_id)?;
    let mut session = Session::new(model_id);
    let mut lines = input.lines();

    output
        .write_all(b"Traditional Thai Melody Generation\nDescribe a mood, or ask for a revision. An empty line quits.\n")
        .await?;

    loop {
        output.write_all(b"> ").await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let text = line.trim();
        if text.is_empty() {
            break;
        }

        output.write_all(b"_Composing..._\n").await?;
        output.flush().await?;

        match turn.run(&mut session.history, text).await {
            Ok(result) => {
                let mut reply = String::new();
                if let Some(refined) = &result.refined_prompt {
                    reply.push_str(&format!("(asked the composer: {refined})\n"));
                }
                reply.push_str(&format!("```\n{}\n```\n", result.composition.body));
                for finding in &result.contract.feedback {
                    reply.push_str(&format!("note: {finding}\n"));
                }
                reply.push_str(&format!(
                    "MIDI: {}\nWAV:  {}\nTo view the sheet music, paste the notation into {}\n",
                    result.artifacts.midi.display(),
                    result.artifacts.wav.display(),
                    VIEWER_URL
                ));
                output.write_all(reply.as_bytes()).await?;
                session.record_success(text, &result);
            }
            Err(err) => {
                output
                    .write_all(format!("error [{}]: {}\n", err.kind(), err).as_bytes())
                    .await?;
                session.record_failure(text, &err);
            }
        }
    }

    output.flush().await?;
    tracing::info!(turns = session.history.turns(), "Chat ended");
    Ok(())
}
