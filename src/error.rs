use crate::output_parser::ParseError;
use thiserror::Error;

/// Errors produced by prompt functions and their collaborators.
#[derive(Error, Debug)]
pub enum PromptError {
    /// The call had the wrong shape (too many positional sources, a reserved
    /// keyword with the wrong type, ...).
    #[error("Invalid arguments for prompt function {function}: {message}")]
    InvalidArguments { function: String, message: String },

    /// Keyword inputs that the template does not declare.
    #[error("Unexpected inputs for prompt function {function}: {keys:?}. Valid inputs are: {valid:?}")]
    UnexpectedInput {
        function: String,
        keys: Vec<String>,
        valid: Vec<String>,
    },

    /// Declared template inputs that could not be resolved.
    #[error("{function}: missing required input(s): {keys:?}")]
    MissingInput { function: String, keys: Vec<String> },

    /// The output parser rejected the model output.
    #[error("Failed to parse output for {function}: {source}")]
    Parse {
        function: String,
        #[source]
        source: ParseError,
    },

    /// A parse retry was needed but the parser has no format instructions.
    #[error("Failed to get format instructions for {function} from output parser {parser}")]
    MissingFormatInstructions {
        function: String,
        parser: &'static str,
    },

    /// The model asked for a function that cannot be called.
    #[error("{function}: invalid function reference `{reference}`")]
    InvalidFunctionReference { function: String, reference: String },

    /// Malformed template syntax.
    #[error("Template error: {0}")]
    Template(String),

    /// Invalid configuration detected at build time.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Low-level HTTP transport failure (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON parsing failed at the serde level.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error with status code and response body.
    #[error("HTTP {status}: {body}")]
    HttpError {
        /// HTTP status code (e.g. 429, 500, 503).
        status: u16,
        /// Response body text.
        body: String,
    },

    /// The invocation was cancelled via the cancellation flag.
    #[error("Invocation was cancelled")]
    Cancelled,

    /// The language model reported a failure.
    #[error("Model error: {0}")]
    Model(String),

    /// A tool or bound function failed.
    #[error("Tool '{tool}' failed: {message}")]
    Tool { tool: String, message: String },

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl PromptError {
    /// The underlying parse error, if this is a parse failure.
    pub fn as_parse_error(&self) -> Option<&ParseError> {
        match self {
            PromptError::Parse { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for PromptError {
    fn from(err: anyhow::Error) -> Self {
        PromptError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PromptError>;
