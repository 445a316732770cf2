//! Chat messages and conversation history.
//!
//! Messages follow the OpenAI chat shape: a role, content that is either a
//! plain string or a list of typed parts, and optional tool-call requests.
//! [`ChatHistory`] is owned by one session and only grows a completed turn
//! at a time.

mod history;
mod types;

pub use history::ChatHistory;
pub use types::*;
