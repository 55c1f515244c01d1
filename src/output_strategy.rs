//! How a prompt function chooses its output parser.
//!
//! [`OutputStrategy`] is resolved once, against the declared return type,
//! when the prompt function is built. The default (`Auto`) picks a parser
//! from the return type; `Str` and `NoParser` return the raw completion.

use std::str::FromStr;
use std::sync::Arc;

use crate::error::{PromptError, Result};
use crate::output_parser::{
    BooleanOutputParser, FunctionsOutputParser, JsonOutputParser, ListOutputParser,
    MarkdownStructureParser, OutputParser, TextOutputParser,
};
use crate::signature::ReturnType;

/// Output parser selection.
///
/// # Example
///
/// ```
/// use llm_prompt_fn::output_strategy::OutputStrategy;
/// use llm_prompt_fn::signature::ReturnType;
///
/// let parser = OutputStrategy::Auto.resolve(&ReturnType::List).unwrap().unwrap();
/// assert_eq!(parser.name(), "list");
///
/// let strategy: OutputStrategy = "markdown".parse().unwrap();
/// assert!(strategy.resolve(&ReturnType::Str).unwrap().is_some());
/// ```
#[derive(Clone, Default)]
pub enum OutputStrategy {
    /// Infer from the declared return type.
    #[default]
    Auto,
    /// Plain string output.
    Str,
    /// No parser; identical to `Str`.
    NoParser,
    List,
    Boolean,
    Json,
    Markdown,
    Text,
    /// Native function calling; needs a structured return type.
    Functions,
    #[cfg(feature = "yaml")]
    Yaml,
    /// Caller-provided parser.
    Custom(Arc<dyn OutputParser>),
}

impl OutputStrategy {
    pub fn custom(parser: impl OutputParser + 'static) -> Self {
        OutputStrategy::Custom(Arc::new(parser))
    }

    /// The parser for a function returning `return_type`, or `None` for raw text.
    pub fn resolve(&self, return_type: &ReturnType) -> Result<Option<Arc<dyn OutputParser>>> {
        let parser: Arc<dyn OutputParser> = match self {
            OutputStrategy::Auto => return Ok(auto_parser(return_type)),
            OutputStrategy::Str | OutputStrategy::NoParser => return Ok(None),
            OutputStrategy::List => Arc::new(ListOutputParser::new()),
            OutputStrategy::Boolean => Arc::new(BooleanOutputParser::new()),
            OutputStrategy::Json => json_parser(return_type),
            OutputStrategy::Markdown => Arc::new(MarkdownStructureParser::new()),
            OutputStrategy::Text => Arc::new(TextOutputParser::new()),
            OutputStrategy::Functions => match return_type {
                ReturnType::Structured { name, schema } => {
                    Arc::new(FunctionsOutputParser::new(name.clone(), schema.clone()))
                }
                other => {
                    return Err(PromptError::InvalidConfig(format!(
                        "the functions output parser needs a structured return type, got {:?}",
                        other
                    )))
                }
            },
            #[cfg(feature = "yaml")]
            OutputStrategy::Yaml => Arc::new(crate::output_parser::YamlOutputParser::new()),
            OutputStrategy::Custom(parser) => parser.clone(),
        };
        Ok(Some(parser))
    }
}

fn auto_parser(return_type: &ReturnType) -> Option<Arc<dyn OutputParser>> {
    match return_type {
        ReturnType::Unspecified | ReturnType::Str => None,
        ReturnType::List => Some(Arc::new(ListOutputParser::new())),
        ReturnType::Bool => Some(Arc::new(BooleanOutputParser::new())),
        ReturnType::Json | ReturnType::Structured { .. } => Some(json_parser(return_type)),
    }
}

fn json_parser(return_type: &ReturnType) -> Arc<dyn OutputParser> {
    match return_type {
        ReturnType::Structured { schema, .. } => Arc::new(JsonOutputParser::with_schema(schema.clone())),
        _ => Arc::new(JsonOutputParser::new()),
    }
}

impl FromStr for OutputStrategy {
    type Err = PromptError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "auto" => OutputStrategy::Auto,
            "str" => OutputStrategy::Str,
            "none" => OutputStrategy::NoParser,
            "list" => OutputStrategy::List,
            "boolean" => OutputStrategy::Boolean,
            "json" => OutputStrategy::Json,
            "markdown" => OutputStrategy::Markdown,
            "text" => OutputStrategy::Text,
            "functions" => OutputStrategy::Functions,
            #[cfg(feature = "yaml")]
            "yaml" => OutputStrategy::Yaml,
            other => {
                return Err(PromptError::InvalidConfig(format!(
                    "unsupported output parser: {}",
                    other
                )))
            }
        })
    }
}

impl std::fmt::Debug for OutputStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputStrategy::Auto => write!(f, "Auto"),
            OutputStrategy::Str => write!(f, "Str"),
            OutputStrategy::NoParser => write!(f, "NoParser"),
            OutputStrategy::List => write!(f, "List"),
            OutputStrategy::Boolean => write!(f, "Boolean"),
            OutputStrategy::Json => write!(f, "Json"),
            OutputStrategy::Markdown => write!(f, "Markdown"),
            OutputStrategy::Text => write!(f, "Text"),
            OutputStrategy::Functions => write!(f, "Functions"),
            #[cfg(feature = "yaml")]
            OutputStrategy::Yaml => write!(f, "Yaml"),
            OutputStrategy::Custom(parser) => write!(f, "Custom({})", parser.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output_parser::ParserKind;
    use serde_json::json;

    fn structured() -> ReturnType {
        ReturnType::Structured {
            name: "Person".into(),
            schema: json!({"type": "object", "properties": {"name": {"type": "string"}}}),
        }
    }

    fn name_of(strategy: OutputStrategy, rt: ReturnType) -> Option<&'static str> {
        strategy.resolve(&rt).unwrap().map(|p| p.name())
    }

    #[test]
    fn test_auto_follows_return_type() {
        assert_eq!(name_of(OutputStrategy::Auto, ReturnType::Unspecified), None);
        assert_eq!(name_of(OutputStrategy::Auto, ReturnType::Str), None);
        assert_eq!(name_of(OutputStrategy::Auto, ReturnType::List), Some("list"));
        assert_eq!(name_of(OutputStrategy::Auto, ReturnType::Bool), Some("boolean"));
        assert_eq!(name_of(OutputStrategy::Auto, ReturnType::Json), Some("json"));
        assert_eq!(name_of(OutputStrategy::Auto, structured()), Some("json"));
    }

    #[test]
    fn test_structured_json_mentions_schema() {
        let parser = OutputStrategy::Auto.resolve(&structured()).unwrap().unwrap();
        assert!(parser.format_instructions().unwrap().contains("\"name\""));
    }

    #[test]
    fn test_functions_needs_structured_type() {
        let parser = OutputStrategy::Functions.resolve(&structured()).unwrap().unwrap();
        assert_eq!(parser.kind(), ParserKind::FunctionCalling);
        assert_eq!(parser.function_definition().unwrap().name, "Person");

        let err = OutputStrategy::Functions.resolve(&ReturnType::Json).unwrap_err();
        assert!(matches!(err, PromptError::InvalidConfig(_)));
    }

    #[test]
    fn test_explicit_none_ignores_return_type() {
        assert_eq!(name_of(OutputStrategy::NoParser, ReturnType::List), None);
        assert_eq!(name_of(OutputStrategy::Str, ReturnType::Bool), None);
    }

    #[test]
    fn test_parse_names() {
        let s: OutputStrategy = "boolean".parse().unwrap();
        assert_eq!(format!("{:?}", s), "Boolean");
        assert!("pydantic".parse::<OutputStrategy>().is_err());
    }

    #[test]
    fn test_custom_parser() {
        let s = OutputStrategy::custom(TextOutputParser::new());
        assert_eq!(format!("{:?}", s), "Custom(text)");
        assert_eq!(name_of(s, ReturnType::List), Some("text"));
    }
}
