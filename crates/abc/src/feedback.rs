//! Diagnostics produced while reading notation.
//!
//! Parsing and contract checking never stop at the first problem: every
//! finding is collected with the line it belongs to so the whole list can
//! be shown to whoever asked for the tune.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub level: FeedbackLevel,
    pub message: String,
    /// 1-based line in the notation text; 0 when the finding is tune-wide.
    pub line: usize,
    pub suggestion: Option<String>,
}

impl Feedback {
    fn at(level: FeedbackLevel, message: impl Into<String>, line: usize) -> Self {
        Feedback {
            level,
            message: message.into(),
            line,
            suggestion: None,
        }
    }

    pub fn error(message: impl Into<String>, line: usize) -> Self {
        Self::at(FeedbackLevel::Error, message, line)
    }

    pub fn warning(message: impl Into<String>, line: usize) -> Self {
        Self::at(FeedbackLevel::Warning, message, line)
    }

    pub fn info(message: impl Into<String>, line: usize) -> Self {
        Self::at(FeedbackLevel::Info, message, line)
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl fmt::Display for Feedback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line > 0 {
            write!(f, "{} (line {}): {}", self.level, self.line, self.message)?;
        } else {
            write!(f, "{}: {}", self.level, self.message)?;
        }
        if let Some(suggestion) = &self.suggestion {
            write!(f, " ({suggestion})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackLevel {
    /// The text cannot be used as-is.
    Error,
    /// Usable, but probably not what the author meant.
    Warning,
    Info,
}

impl fmt::Display for FeedbackLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FeedbackLevel::Error => "error",
            FeedbackLevel::Warning => "warning",
            FeedbackLevel::Info => "info",
        })
    }
}

/// Accumulates findings against a moving line cursor.
#[derive(Debug)]
pub struct FeedbackCollector {
    feedback: Vec<Feedback>,
    line: usize,
}

impl Default for FeedbackCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedbackCollector {
    pub fn new() -> Self {
        FeedbackCollector {
            feedback: Vec::new(),
            line: 1,
        }
    }

    pub fn set_line(&mut self, line: usize) {
        self.line = line;
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.feedback.push(Feedback::error(message, self.line));
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.feedback.push(Feedback::warning(message, self.line));
    }

    pub fn warning_with_suggestion(
        &mut self,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) {
        self.feedback
            .push(Feedback::warning(message, self.line).with_suggestion(suggestion));
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.feedback.push(Feedback::info(message, self.line));
    }

    pub fn push(&mut self, feedback: Feedback) {
        self.feedback.push(feedback);
    }

    pub fn has_errors(&self) -> bool {
        self.feedback
            .iter()
            .any(|f| f.level == FeedbackLevel::Error)
    }

    pub fn into_feedback(self) -> Vec<Feedback> {
        self.feedback
    }
}

/// A value together with everything noticed while producing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseResult<T> {
    pub value: T,
    pub feedback: Vec<Feedback>,
}

impl<T> ParseResult<T> {
    pub fn new(value: T, feedback: Vec<Feedback>) -> Self {
        ParseResult { value, feedback }
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Feedback> {
        self.feedback
            .iter()
            .filter(|f| f.level == FeedbackLevel::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Feedback> {
        self.feedback
            .iter()
            .filter(|f| f.level == FeedbackLevel::Warning)
    }
}
