//! Declared metadata of a prompt function.
//!
//! A [`FunctionSignature`] is everything the builder needs to know about the
//! function being turned into a prompt: its name, the docstring used as the
//! template source, its parameters (with optional default values), the
//! declared return type (drives `auto` output-parser selection) and whether
//! it is declared asynchronous. The function body is never run.

use serde_json::Value;

/// Declared return type of a prompt function.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ReturnType {
    /// No annotation.
    #[default]
    Unspecified,
    /// Plain string.
    Str,
    /// Sequence of strings.
    List,
    /// Boolean.
    Bool,
    /// Free-form JSON object/dict.
    Json,
    /// A structured type described by a JSON schema.
    Structured {
        /// Type name, used as the function name for native function calling.
        name: String,
        /// JSON schema of the type.
        schema: Value,
    },
}

/// A declared parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    /// Parameter name.
    pub name: String,
    /// Default value, if declared.
    pub default: Option<Value>,
}

/// Declared metadata of a prompt function.
///
/// # Example
///
/// ```
/// use llm_prompt_fn::signature::{FunctionSignature, ReturnType};
///
/// let sig = FunctionSignature::new("write_poem", "Write a poem about {topic} in {style} style.")
///     .in_module("poetry")
///     .param("topic")
///     .param_with_default("style", "haiku")
///     .returns(ReturnType::Str)
///     .asynchronous();
///
/// assert_eq!(sig.qualified_name(), "poetry.write_poem");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSignature {
    /// Function name.
    pub name: String,
    /// Module path; `None` for top-level functions.
    pub module: Option<String>,
    /// Docstring: the prompt template source.
    pub docstring: String,
    /// Declared parameters.
    pub params: Vec<Param>,
    /// Declared return type.
    pub return_type: ReturnType,
    /// Whether the function is declared asynchronous.
    pub is_async: bool,
}

impl FunctionSignature {
    pub fn new(name: impl Into<String>, docstring: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: None,
            docstring: docstring.into(),
            params: Vec::new(),
            return_type: ReturnType::Unspecified,
            is_async: false,
        }
    }

    pub fn in_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param {
            name: name.into(),
            default: None,
        });
        self
    }

    pub fn param_with_default(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.params.push(Param {
            name: name.into(),
            default: Some(default.into()),
        });
        self
    }

    pub fn returns(mut self, return_type: ReturnType) -> Self {
        self.return_type = return_type;
        self
    }

    /// Mark the function as declared asynchronous.
    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    /// `module.name`, or just `name` when there is no module.
    pub fn qualified_name(&self) -> String {
        match &self.module {
            Some(module) if !module.is_empty() => format!("{}.{}", module, self.name),
            _ => self.name.clone(),
        }
    }

    /// Parameters that declare a default value, as `(name, default)` pairs.
    pub fn defaults(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.params
            .iter()
            .filter_map(|p| p.default.as_ref().map(|d| (p.name.as_str(), d)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_qualified_name_without_module() {
        let sig = FunctionSignature::new("summarize", "Summarize {text}");
        assert_eq!(sig.qualified_name(), "summarize");
    }

    #[test]
    fn test_qualified_name_with_module() {
        let sig = FunctionSignature::new("summarize", "Summarize {text}").in_module("app.prompts");
        assert_eq!(sig.qualified_name(), "app.prompts.summarize");
    }

    #[test]
    fn test_defaults_only_lists_declared_defaults() {
        let sig = FunctionSignature::new("f", "{a} {b}")
            .param("a")
            .param_with_default("b", 3);
        let defaults: Vec<_> = sig.defaults().collect();
        assert_eq!(defaults, vec![("b", &json!(3))]);
    }

    #[test]
    fn test_default_return_type_is_unspecified() {
        let sig = FunctionSignature::new("f", "x");
        assert_eq!(sig.return_type, ReturnType::Unspecified);
        assert!(!sig.is_async);
    }
}
