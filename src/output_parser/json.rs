//! JSON extraction from LLM responses.
//!
//! Candidates are tried in order: the whole (preprocessed) text, a
//! `` ```json `` block, any fenced block, the last `{...}` region, the last
//! `[...]` region. The first candidate that parses wins.

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::error::{truncate, ParseError};
use super::extract::{code_block, find_bracketed, preprocess};
use super::OutputParser;

/// Parses the model output as JSON.
///
/// # Example
///
/// ```
/// use llm_prompt_fn::output_parser::{JsonOutputParser, OutputParser};
///
/// let parser = JsonOutputParser::new();
/// let value = parser.parse("Here you go:\n```json\n{\"a\": 1}\n```").unwrap();
/// assert_eq!(value["a"], 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct JsonOutputParser {
    schema: Option<Value>,
}

impl JsonOutputParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Describe the expected shape with a JSON schema (used in format instructions).
    pub fn with_schema(schema: Value) -> Self {
        Self {
            schema: Some(schema),
        }
    }

    pub fn schema(&self) -> Option<&Value> {
        self.schema.as_ref()
    }
}

impl OutputParser for JsonOutputParser {
    fn name(&self) -> &'static str {
        "json"
    }

    fn parse(&self, text: &str) -> Result<Value, ParseError> {
        extract_json(text)
    }

    fn format_instructions(&self) -> Option<String> {
        let mut instructions = String::from(
            "Return the answer as a single valid JSON value inside a ```json code block. Do not add any commentary.",
        );
        if let Some(schema) = &self.schema {
            let pretty = serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
            instructions.push_str("\nThe JSON must conform to this schema:\n");
            instructions.push_str(&pretty);
        }
        Some(instructions)
    }
}

/// Parse an LLM response into a typed value.
///
/// # Examples
///
/// ```
/// use serde::Deserialize;
/// use llm_prompt_fn::output_parser::parse_json;
///
/// #[derive(Deserialize, Debug, PartialEq)]
/// struct Analysis {
///     sentiment: String,
///     confidence: f64,
/// }
///
/// let response = r#"<think>analyzing...</think>{"sentiment": "positive", "confidence": 0.92}"#;
/// let result: Analysis = parse_json(response).unwrap();
/// assert_eq!(result.sentiment, "positive");
/// ```
pub fn parse_json<T: DeserializeOwned>(response: &str) -> Result<T, ParseError> {
    let value = extract_json(response)?;
    serde_json::from_value(value).map_err(|e| {
        ParseError::unparseable("json", format!("deserialization failed: {}", e), response)
    })
}

pub(super) fn extract_json(response: &str) -> Result<Value, ParseError> {
    let cleaned = preprocess(response);
    if cleaned.is_empty() {
        return Err(ParseError::EmptyResponse);
    }

    let candidates = [
        Some(cleaned.as_str()),
        code_block(&cleaned, Some("json")),
        code_block(&cleaned, None),
        find_bracketed(&cleaned, '{', '}'),
        find_bracketed(&cleaned, '[', ']'),
    ];

    let mut last_err = None;
    for candidate in candidates.into_iter().flatten() {
        match serde_json::from_str::<Value>(candidate) {
            Ok(value) => return Ok(value),
            Err(e) => last_err = Some(e.to_string()),
        }
    }

    Err(ParseError::unparseable(
        "json",
        format!(
            "{} (text: {})",
            last_err.unwrap_or_else(|| "no JSON found".to_string()),
            truncate(&cleaned, 200)
        ),
        response,
    ))
}
