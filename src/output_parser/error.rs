//! Error types for LLM output parsers.

/// Errors returned by output parsers.
///
/// Only [`ParseError::Unparseable`] carries the original model text, which
/// makes it the only recoverable variant: a prompt function may ask the
/// model once more to reformat that text.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    /// The LLM response was empty or whitespace-only.
    #[error("empty LLM response")]
    EmptyResponse,

    /// The text could not be turned into the expected format.
    #[error("could not parse {expected_format} from LLM response: {reason}")]
    Unparseable {
        /// The format the parser was trying to extract.
        expected_format: &'static str,
        /// Human-readable failure description.
        reason: String,
        /// The complete, unparsed model output.
        original: String,
        /// Whether a reformatting request must repeat the original prompt.
        needs_original_prompt: bool,
    },

    /// Any other parser failure. Never retried.
    #[error("{0}")]
    Invalid(String),
}

impl ParseError {
    /// Recoverable failure for `original` that does not need the prompt repeated.
    pub fn unparseable(
        expected_format: &'static str,
        reason: impl Into<String>,
        original: impl Into<String>,
    ) -> Self {
        ParseError::Unparseable {
            expected_format,
            reason: reason.into(),
            original: original.into(),
            needs_original_prompt: false,
        }
    }

    /// Mark a recoverable failure as needing the original prompt on retry.
    pub fn needing_prompt(self) -> Self {
        match self {
            ParseError::Unparseable {
                expected_format,
                reason,
                original,
                ..
            } => ParseError::Unparseable {
                expected_format,
                reason,
                original,
                needs_original_prompt: true,
            },
            other => other,
        }
    }

    /// The original text, present only on recoverable failures.
    pub fn original(&self) -> Option<&str> {
        match self {
            ParseError::Unparseable { original, .. } => Some(original),
            _ => None,
        }
    }

    pub fn needs_original_prompt(&self) -> bool {
        matches!(
            self,
            ParseError::Unparseable {
                needs_original_prompt: true,
                ..
            }
        )
    }
}

/// Truncate a string to at most `max_len` characters, appending "..." if truncated.
pub(crate) fn truncate(s: &str, max_len: usize) -> String {
    match s.char_indices().nth(max_len) {
        None => s.to_string(),
        Some((idx, _)) => format!("{}...", &s[..idx]),
    }
}
