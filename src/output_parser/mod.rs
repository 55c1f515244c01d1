//! # Output parsers
//!
//! An [`OutputParser`] turns raw model text into a `serde_json::Value`, and
//! can describe the format it expects so the prompt (or a repair request)
//! can tell the model how to answer.
//!
//! ## Parsers Available
//!
//! | Parser | Output |
//! |--------|--------|
//! | [`JsonOutputParser`] | JSON value, optionally described by a schema |
//! | [`ListOutputParser`] | Array of strings from a bulleted/numbered list |
//! | [`BooleanOutputParser`] | `true` / `false` from a Yes/No answer |
//! | [`MarkdownStructureParser`] | Object keyed by markdown section headings |
//! | [`TextOutputParser`] | Clean prose with boilerplate stripped |
//! | [`FunctionsOutputParser`] | Native function-calling arguments |
//! | `YamlOutputParser` | YAML document as JSON (feature: `yaml`) |
//!
//! ## Shared Utilities
//!
//! | Function | Purpose |
//! |----------|---------|
//! | [`strip_think_tags`] | Remove `<think>` blocks from text |
//! | [`preprocess`] | Strip think blocks and trim |

pub mod boolean;
pub mod error;
pub mod extract;
pub mod functions;
pub mod json;
pub mod list;
pub mod markdown;
pub mod text;

#[cfg(feature = "yaml")]
pub mod yaml;

pub use boolean::BooleanOutputParser;
pub use error::ParseError;
pub use extract::{preprocess, strip_think_tags};
pub use functions::FunctionsOutputParser;
pub use json::{parse_json, JsonOutputParser};
pub use list::ListOutputParser;
pub use markdown::MarkdownStructureParser;
pub use text::TextOutputParser;

#[cfg(feature = "yaml")]
pub use yaml::YamlOutputParser;

use crate::function::FunctionDefinition;
use serde_json::Value;

/// How a parser expects the model to deliver its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserKind {
    /// Parses the text completion.
    Text,
    /// Parses the arguments of a native function call; the chain must be
    /// bound with the function-calling protocol.
    FunctionCalling,
}

/// Turns raw model output into a value.
pub trait OutputParser: Send + Sync {
    /// Stable identifier for logging and error messages.
    fn name(&self) -> &'static str;

    /// Parse the model output.
    fn parse(&self, text: &str) -> Result<Value, ParseError>;

    /// Instructions describing the expected output format, if the parser has any.
    fn format_instructions(&self) -> Option<String> {
        None
    }

    fn kind(&self) -> ParserKind {
        ParserKind::Text
    }

    /// The function the model must call, for [`ParserKind::FunctionCalling`] parsers.
    fn function_definition(&self) -> Option<FunctionDefinition> {
        None
    }
}

impl std::fmt::Debug for dyn OutputParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OutputParser({})", self.name())
    }
}
