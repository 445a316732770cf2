//! Pulls the composition out of the composer's reply.
//!
//! The reply is expected to carry exactly one triple-backtick block whose
//! second line is the `T:` title header. Nothing here judges the music;
//! see [`abc::check_contract`] for that.

use llmchat::Content;
use serde::Serialize;
use thiserror::Error;

const FENCE: &str = "```";
const TITLE_LABEL: &str = "T:";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("reply has no fenced notation block")]
    MissingFence,

    #[error("second line of the notation is not a title header: {line:?}")]
    MalformedHeader { line: String },
}

/// A titled piece of ABC notation with no blank lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Composition {
    pub title: String,
    pub body: String,
}

/// Extract from message content: the string itself, or the first part's
/// text when the provider returned a list of parts.
pub fn extract_composition(content: &Content) -> Result<Composition, ExtractError> {
    extract_from_text(content.primary_text())
}

pub fn extract_from_text(text: &str) -> Result<Composition, ExtractError> {
    let segments: Vec<&str> = text.split(FENCE).collect();
    if segments.len() < 3 {
        return Err(ExtractError::MissingFence);
    }
    if segments.len() > 3 {
        tracing::warn!(
            blocks = (segments.len() - 1) / 2,
            "Reply has more than one fenced block, using the first"
        );
    }

    let block = strip_info_string(segments[1]);
    let block = block.strip_prefix('\n').unwrap_or(block);
    let block = block.strip_suffix('\n').unwrap_or(block);

    let second = block.split('\n').nth(1).unwrap_or("");
    let title = second
        .strip_prefix(TITLE_LABEL)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ExtractError::MalformedHeader {
            line: second.to_string(),
        })?;

    Ok(Composition {
        title: title.to_string(),
        body: normalize_blank_lines(block),
    })
}

/// Drop a language tag such as `abc` written right after the opening fence.
fn strip_info_string(block: &str) -> &str {
    match block.split_once('\n') {
        Some((first, rest))
            if !first.trim().is_empty()
                && first.trim().chars().all(|c| c.is_ascii_alphanumeric() || c == '-') =>
        {
            rest
        }
        _ => block,
    }
}

/// Remove blank (empty or whitespace-only) lines. Idempotent.
pub fn normalize_blank_lines(text: &str) -> String {
    text.split('\n')
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
