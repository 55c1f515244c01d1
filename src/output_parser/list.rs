//! Bulleted / numbered list extraction.

use serde_json::Value;

use super::error::{truncate, ParseError};
use super::extract::{preprocess, strip_list_marker};
use super::OutputParser;

/// Parses a bulleted or numbered list into an array of strings.
///
/// Lines that are not list items (preamble, blank lines) are ignored. A bare
/// JSON array of strings is accepted as well.
///
/// # Example
///
/// ```
/// use llm_prompt_fn::output_parser::{ListOutputParser, OutputParser};
/// use serde_json::json;
///
/// let parser = ListOutputParser::new();
/// assert_eq!(parser.parse("- a\n- b").unwrap(), json!(["a", "b"]));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ListOutputParser;

impl ListOutputParser {
    pub fn new() -> Self {
        Self
    }
}

impl OutputParser for ListOutputParser {
    fn name(&self) -> &'static str {
        "list"
    }

    fn parse(&self, text: &str) -> Result<Value, ParseError> {
        let cleaned = preprocess(text);
        if cleaned.is_empty() {
            return Err(ParseError::EmptyResponse);
        }

        let items: Vec<Value> = cleaned
            .lines()
            .filter_map(strip_list_marker)
            .filter(|item| !item.is_empty())
            .map(|item| Value::String(item.trim_matches('"').to_string()))
            .collect();
        if !items.is_empty() {
            return Ok(Value::Array(items));
        }

        if let Ok(items) = serde_json::from_str::<Vec<String>>(&cleaned) {
            return Ok(Value::Array(items.into_iter().map(Value::String).collect()));
        }

        Err(ParseError::unparseable(
            "list",
            format!("no list items found in: {}", truncate(&cleaned, 200)),
            text,
        ))
    }

    fn format_instructions(&self) -> Option<String> {
        Some(
            "Return the result as a bulleted list, one item per line, each line starting with \"- \"."
                .to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bulleted_list_keeps_order() {
        let parser = ListOutputParser::new();
        assert_eq!(parser.parse("- a\n- b").unwrap(), json!(["a", "b"]));
    }

    #[test]
    fn test_numbered_list_with_preamble() {
        let parser = ListOutputParser::new();
        let value = parser
            .parse("Here are three colors:\n1. red\n2. green\n3) blue\n")
            .unwrap();
        assert_eq!(value, json!(["red", "green", "blue"]));
    }

    #[test]
    fn test_json_array_fallback() {
        let parser = ListOutputParser::new();
        assert_eq!(parser.parse(r#"["x", "y"]"#).unwrap(), json!(["x", "y"]));
    }

    #[test]
    fn test_prose_is_recoverable() {
        let parser = ListOutputParser::new();
        let err = parser.parse("I cannot list anything.").unwrap_err();
        assert_eq!(err.original(), Some("I cannot list anything."));
    }

    #[test]
    fn test_has_format_instructions() {
        assert!(ListOutputParser::new().format_instructions().is_some());
    }
}
