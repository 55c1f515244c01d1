//! One-shot format recovery after a parse failure.
//!
//! When the output parser rejects a completion but still holds the original
//! text, the prompt function makes exactly one more model call asking to
//! reformat that text according to the parser's format instructions.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::Result;
use crate::output_parser::ParseError;
use crate::template::{TemplateDescriptor, TemplateFormat};

/// Prompt sent to the model to reformat an unparseable answer.
pub const RECOVERY_TEMPLATE: &str = "{original_prompt}This is our original response {original} but it's not in correct format, please convert it into following format:\n{format_instructions}\n\nIf the response doesn't seem to be relevant to the expected format instructions, return 'N/A'";

/// A parse failure that can be sent back to the model for reformatting.
#[derive(Debug, Clone, PartialEq)]
pub struct Recoverable {
    /// The unparsed model output.
    pub original: String,
    /// The recovery prompt must repeat the original prompt.
    pub needs_prompt: bool,
    pub error: ParseError,
}

/// Result of parsing one completion.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed(Value),
    NeedsRetry(Recoverable),
    /// Not recoverable.
    Failed(ParseError),
}

impl From<std::result::Result<Value, ParseError>> for ParseOutcome {
    fn from(result: std::result::Result<Value, ParseError>) -> Self {
        match result {
            Ok(value) => ParseOutcome::Parsed(value),
            Err(error) => match error.original() {
                Some(original) => ParseOutcome::NeedsRetry(Recoverable {
                    original: original.to_string(),
                    needs_prompt: error.needs_original_prompt(),
                    error,
                }),
                None => ParseOutcome::Failed(error),
            },
        }
    }
}

/// Build the recovery prompt. The original prompt is included only when given.
///
/// ```
/// use llm_prompt_fn::retry::recovery_prompt;
///
/// let prompt = recovery_prompt(None, "maybe", "Reply only with Yes or No.").unwrap();
/// assert!(prompt.starts_with("This is our original response maybe"));
/// ```
pub fn recovery_prompt(
    original_prompt: Option<&str>,
    original: &str,
    format_instructions: &str,
) -> Result<String> {
    let template = TemplateDescriptor::parse(RECOVERY_TEMPLATE, TemplateFormat::FString)?;
    let values = BTreeMap::from([
        (
            "original_prompt".to_string(),
            Value::String(original_prompt.unwrap_or_default().to_string()),
        ),
        ("original".to_string(), Value::String(original.to_string())),
        (
            "format_instructions".to_string(),
            Value::String(format_instructions.to_string()),
        ),
    ]);
    template.render(&values)
}
