//! Structured output through native function calling.

use serde_json::Value;

use super::error::ParseError;
use super::json::extract_json;
use super::{OutputParser, ParserKind};
use crate::function::FunctionDefinition;

/// Asks the model to call a single function whose arguments are the
/// structured result, then validates those arguments.
///
/// The chain forces the call; the parser receives the arguments serialized
/// as JSON text.
///
/// ```
/// use llm_prompt_fn::output_parser::{FunctionsOutputParser, OutputParser, ParserKind};
/// use serde_json::json;
///
/// let parser = FunctionsOutputParser::new(
///     "Person",
///     json!({"type": "object", "properties": {"name": {"type": "string"}}, "required": ["name"]}),
/// );
/// assert_eq!(parser.kind(), ParserKind::FunctionCalling);
/// assert_eq!(parser.parse(r#"{"name": "Ada"}"#).unwrap()["name"], "Ada");
/// ```
#[derive(Debug, Clone)]
pub struct FunctionsOutputParser {
    definition: FunctionDefinition,
}

impl FunctionsOutputParser {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        let description = schema
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Self {
            definition: FunctionDefinition::new(name, description, schema),
        }
    }

    fn required_fields(&self) -> impl Iterator<Item = &str> {
        self.definition
            .parameters
            .get("required")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
    }
}

impl OutputParser for FunctionsOutputParser {
    fn name(&self) -> &'static str {
        "functions"
    }

    fn parse(&self, text: &str) -> Result<Value, ParseError> {
        let value = extract_json(text)?;
        let Some(object) = value.as_object() else {
            return Err(ParseError::unparseable(
                "function arguments",
                "arguments are not a JSON object",
                text,
            ));
        };
        let missing: Vec<&str> = self
            .required_fields()
            .filter(|field| !object.contains_key(*field))
            .collect();
        if !missing.is_empty() {
            return Err(ParseError::unparseable(
                "function arguments",
                format!("missing required field(s): {}", missing.join(", ")),
                text,
            ));
        }
        Ok(value)
    }

    fn format_instructions(&self) -> Option<String> {
        let schema = serde_json::to_string_pretty(&self.definition.parameters)
            .unwrap_or_else(|_| self.definition.parameters.to_string());
        Some(format!(
            "Return a JSON object for `{}` that conforms to this schema:\n{}",
            self.definition.name, schema
        ))
    }

    fn kind(&self) -> ParserKind {
        ParserKind::FunctionCalling
    }

    fn function_definition(&self) -> Option<FunctionDefinition> {
        Some(self.definition.clone())
    }
}
