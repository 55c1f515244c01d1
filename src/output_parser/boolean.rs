//! Yes/No answers.

use serde_json::Value;

use super::error::ParseError;
use super::extract::preprocess;
use super::OutputParser;

const TRUE_WORDS: &[&str] = &["yes", "true"];
const FALSE_WORDS: &[&str] = &["no", "false"];

/// Parses a clear Yes/No answer into a boolean.
///
/// The leading word decides when it is a yes/no word; otherwise the answer
/// is accepted only if exactly one polarity occurs as a whole word. An
/// ambiguous answer is recoverable, but the repair request needs the
/// original question, since "maybe" cannot be reformatted without it.
///
/// # Example
///
/// ```
/// use llm_prompt_fn::output_parser::{BooleanOutputParser, OutputParser};
/// use serde_json::json;
///
/// let parser = BooleanOutputParser::new();
/// assert_eq!(parser.parse("Yes, definitely.").unwrap(), json!(true));
/// assert!(parser.parse("maybe").unwrap_err().needs_original_prompt());
/// ```
#[derive(Debug, Clone, Default)]
pub struct BooleanOutputParser;

impl BooleanOutputParser {
    pub fn new() -> Self {
        Self
    }
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

impl OutputParser for BooleanOutputParser {
    fn name(&self) -> &'static str {
        "boolean"
    }

    fn parse(&self, text: &str) -> Result<Value, ParseError> {
        let cleaned = preprocess(text);
        if cleaned.is_empty() {
            return Err(ParseError::EmptyResponse);
        }

        let words = words(&cleaned);
        if let Some(first) = words.first() {
            if TRUE_WORDS.contains(&first.as_str()) {
                return Ok(Value::Bool(true));
            }
            if FALSE_WORDS.contains(&first.as_str()) {
                return Ok(Value::Bool(false));
            }
        }

        let has_true = words.iter().any(|w| TRUE_WORDS.contains(&w.as_str()));
        let has_false = words.iter().any(|w| FALSE_WORDS.contains(&w.as_str()));
        match (has_true, has_false) {
            (true, false) => Ok(Value::Bool(true)),
            (false, true) => Ok(Value::Bool(false)),
            _ => Err(ParseError::unparseable(
                "boolean",
                "expected a clear Yes or No",
                text,
            )
            .needing_prompt()),
        }
    }

    fn format_instructions(&self) -> Option<String> {
        Some("Reply only with Yes or No.".to_string())
    }
}
