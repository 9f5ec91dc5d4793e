//! Suggestion engine interface.
//!
//! A suggestion engine turns the text before the cursor into a candidate
//! continuation. The wrapper core only sees the traits here; the concrete
//! backends live in submodules and are selected at startup by the `-e` flag.

pub mod codewhisperer;
pub mod openai;

use std::any::Any;

use async_trait::async_trait;

use crate::Result;

pub use codewhisperer::CodeWhispererEngine;
pub use openai::OpenAiEngine;

/// One candidate continuation of the current prompt.
///
/// Immutable once produced. Engines attach whatever backend state they need
/// to serve `top_suggestions` later (logprobs, sibling completions).
pub trait Suggestion: Send + Sync {
    /// The candidate text. May be empty.
    fn text(&self) -> &str;

    /// Downcast support, used by engines to recover their own suggestion
    /// type when asked for alternatives.
    fn as_any(&self) -> &dyn Any;
}

/// Producer of suggestions.
#[async_trait]
pub trait SuggestionEngine: Send + Sync {
    /// Produce a single suggestion for the prompt.
    ///
    /// Returns `Ok(None)` when the backend has nothing to offer. May block on
    /// network; callers run it on a dedicated task.
    async fn suggest(&self, prompt: &str) -> Result<Option<Box<dyn Suggestion>>>;

    /// Ranked alternatives to `current` for the same prompt.
    ///
    /// Only the completions overlay calls this. Each returned suggestion's
    /// text is a full continuation of `prompt`, directly substitutable for
    /// the current one.
    async fn top_suggestions(
        &self,
        prompt: &str,
        current: &dyn Suggestion,
    ) -> Result<Vec<Box<dyn Suggestion>>>;
}

/// Sink for user-facing messages emitted during engine setup, before the
/// wrapper owns the terminal (device-code authorization URLs and the like).
pub trait UserPrompt: Send + Sync {
    fn show_message(&self, message: &str);
}

/// Strip a provider's text down to a single line.
///
/// Suggestions are injected into a shell's input stream, so anything from
/// the first newline on would execute the command early.
pub(crate) fn single_line(text: &str) -> &str {
    match text.find('\n') {
        Some(idx) => &text[..idx],
        None => text,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_passes_through() {
        assert_eq!(single_line("echo hello"), "echo hello");
    }

    #[test]
    fn single_line_truncates_at_newline() {
        assert_eq!(single_line("echo hello\nrm -rf /"), "echo hello");
        assert_eq!(single_line("\nanything"), "");
    }
}
