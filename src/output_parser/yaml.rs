//! YAML extraction from LLM responses (feature-gated behind `yaml`).

use serde_json::Value;

use super::error::{truncate, ParseError};
use super::extract::{code_block, preprocess};
use super::OutputParser;

/// Parses a YAML document (bare or fenced) and returns it as JSON.
///
/// ```
/// use llm_prompt_fn::output_parser::{OutputParser, YamlOutputParser};
///
/// let value = YamlOutputParser::new().parse("name: Josh\nage: 30").unwrap();
/// assert_eq!(value["age"], 30);
/// ```
#[derive(Debug, Clone, Default)]
pub struct YamlOutputParser;

impl YamlOutputParser {
    pub fn new() -> Self {
        Self
    }
}

impl OutputParser for YamlOutputParser {
    fn name(&self) -> &'static str {
        "yaml"
    }

    fn parse(&self, text: &str) -> Result<Value, ParseError> {
        let cleaned = preprocess(text);
        if cleaned.is_empty() {
            return Err(ParseError::EmptyResponse);
        }

        let candidates = [
            code_block(&cleaned, Some("yaml")),
            code_block(&cleaned, Some("yml")),
            code_block(&cleaned, None),
            Some(cleaned.as_str()),
        ];
        let mut last_err = None;
        for candidate in candidates.into_iter().flatten() {
            match serde_yaml::from_str::<Value>(candidate) {
                // a bare scalar means the text was prose, not a document
                Ok(value) if value.is_object() || value.is_array() => return Ok(value),
                Ok(_) => last_err = Some("not a YAML mapping or sequence".to_string()),
                Err(e) => last_err = Some(e.to_string()),
            }
        }

        Err(ParseError::unparseable(
            "yaml",
            format!(
                "{} (text: {})",
                last_err.unwrap_or_default(),
                truncate(&cleaned, 200)
            ),
            text,
        ))
    }

    fn format_instructions(&self) -> Option<String> {
        Some("Return the answer as a YAML document inside a ```yaml code block.".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_yaml() {
        let value = YamlOutputParser::new()
            .parse("Result:\n```yaml\nitems:\n  - a\n  - b\n```")
            .unwrap();
        assert_eq!(value["items"][1], "b");
    }

    #[test]
    fn test_prose_is_recoverable() {
        let err = YamlOutputParser::new().parse("no yaml here").unwrap_err();
        assert_eq!(err.original(), Some("no yaml here"));
    }
}
