//! Clean prose from LLM responses.

use serde_json::Value;

use super::error::ParseError;
use super::extract::preprocess;
use super::OutputParser;

/// Common boilerplate openers that models put in front of the answer.
const SIMPLE_PREFIXES: &[&str] = &[
    "Sure! ",
    "Sure, ",
    "Sure.\n",
    "Of course! ",
    "Of course, ",
    "Of course.\n",
    "Certainly! ",
    "Certainly, ",
    "Certainly.\n",
    "Absolutely! ",
    "Absolutely, ",
];

/// Openers that run up to the next newline or colon.
const LINE_PREFIXES: &[&str] = &["Here's ", "Here is "];

/// Returns the model output as a string with think blocks and boilerplate
/// openers ("Sure!", "Here's the answer:") removed.
///
/// # Example
///
/// ```
/// use llm_prompt_fn::output_parser::{OutputParser, TextOutputParser};
///
/// let parser = TextOutputParser::new();
/// assert_eq!(parser.parse("Sure! Paris is the capital.").unwrap(), "Paris is the capital.");
/// ```
#[derive(Debug, Clone, Default)]
pub struct TextOutputParser;

impl TextOutputParser {
    pub fn new() -> Self {
        Self
    }
}

fn strip_boilerplate(cleaned: &str) -> &str {
    for prefix in SIMPLE_PREFIXES {
        if let Some(rest) = cleaned.strip_prefix(prefix) {
            return rest;
        }
    }
    for prefix in LINE_PREFIXES {
        if let Some(rest) = cleaned.strip_prefix(prefix) {
            if let Some(pos) = rest.find(['\n', ':']) {
                return rest[pos + 1..].trim_start();
            }
        }
    }
    cleaned
}

impl OutputParser for TextOutputParser {
    fn name(&self) -> &'static str {
        "text"
    }

    fn parse(&self, text: &str) -> Result<Value, ParseError> {
        let cleaned = preprocess(text);
        let result = strip_boilerplate(&cleaned).trim();
        if result.is_empty() {
            return Err(ParseError::EmptyResponse);
        }
        Ok(Value::String(result.to_string()))
    }
}
