//! Prompt templates built from docstrings.
//!
//! Two formats are supported:
//!
//! - `f-string`: `{name}` placeholders, `{{` and `}}` for literal braces.
//! - `f-string-extra` (default): f-string plus optional sections
//!   `{? ... ?}`. A section is dropped entirely when any placeholder inside
//!   it is missing, null or empty.
//!
//! ```text
//! Write a {style} poem about {topic}.{? Make it rhyme with "{rhyme}".?}
//!           ▲                 ▲                          ▲
//!        required          required             optional (section dropped
//!                                                when rhyme is not given)
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::{PromptError, Result};
use crate::output_parser::OutputParser;
use crate::output_strategy::OutputStrategy;
use crate::signature::FunctionSignature;

/// Template syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TemplateFormat {
    FString,
    #[default]
    FStringExtra,
}

impl FromStr for TemplateFormat {
    type Err = PromptError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "f-string" => Ok(TemplateFormat::FString),
            "f-string-extra" => Ok(TemplateFormat::FStringExtra),
            other => Err(PromptError::InvalidConfig(format!(
                "unsupported template format: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Var(String),
    Optional(Vec<Segment>),
}

/// Parse template text into segments.
fn parse(template: &str, format: TemplateFormat) -> Result<Vec<Segment>> {
    let mut root: Vec<Segment> = Vec::new();
    // segments of the open optional section, if any
    let mut section: Option<Vec<Segment>> = None;
    let mut literal = String::new();
    let mut chars = template.char_indices().peekable();

    fn target<'a>(
        section: &'a mut Option<Vec<Segment>>,
        root: &'a mut Vec<Segment>,
    ) -> &'a mut Vec<Segment> {
        match section {
            Some(inner) => inner,
            None => root,
        }
    }

    fn flush(literal: &mut String, out: &mut Vec<Segment>) {
        if !literal.is_empty() {
            out.push(Segment::Literal(std::mem::take(literal)));
        }
    }

    while let Some((pos, c)) = chars.next() {
        let next = chars.peek().map(|(_, n)| *n);
        match c {
            '{' if next == Some('{') => {
                chars.next();
                literal.push('{');
            }
            '{' if format == TemplateFormat::FStringExtra && next == Some('?') => {
                if section.is_some() {
                    return Err(template_error("optional sections cannot be nested", pos));
                }
                chars.next();
                flush(&mut literal, &mut root);
                section = Some(Vec::new());
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for (_, n) in chars.by_ref() {
                    if n == '}' {
                        closed = true;
                        break;
                    }
                    name.push(n);
                }
                if !closed {
                    return Err(template_error("unclosed '{'", pos));
                }
                let name = name.trim();
                if !is_identifier(name) {
                    return Err(template_error(
                        &format!("invalid placeholder '{{{}}}'", name),
                        pos,
                    ));
                }
                let out = target(&mut section, &mut root);
                flush(&mut literal, out);
                out.push(Segment::Var(name.to_string()));
            }
            '}' if next == Some('}') => {
                chars.next();
                literal.push('}');
            }
            '}' => return Err(template_error("single '}' encountered", pos)),
            '?' if next == Some('}') && section.is_some() => {
                chars.next();
                if let Some(mut inner) = section.take() {
                    flush(&mut literal, &mut inner);
                    root.push(Segment::Optional(inner));
                }
            }
            other => literal.push(other),
        }
    }

    if section.is_some() {
        return Err(PromptError::Template(
            "unclosed optional section '{?'".to_string(),
        ));
    }
    flush(&mut literal, &mut root);
    Ok(root)
}

fn template_error(message: &str, pos: usize) -> PromptError {
    PromptError::Template(format!("{} at byte {}", message, pos))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => chars.all(|c| c.is_alphanumeric() || c == '_'),
        _ => false,
    }
}

/// Render a value into prompt text.
fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        Some(_) => false,
    }
}

/// Strip the common leading whitespace of all non-blank lines, and the
/// blank lines around the text.
pub fn dedent(text: &str) -> String {
    let indent = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    let lines: Vec<&str> = text
        .lines()
        .map(|l| l.get(indent..).unwrap_or_else(|| l.trim_start()))
        .collect();
    let start = lines.iter().position(|l| !l.trim().is_empty()).unwrap_or(lines.len());
    let end = lines
        .iter()
        .rposition(|l| !l.trim().is_empty())
        .map_or(start, |i| i + 1);
    lines[start..end]
        .iter()
        .map(|l| l.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Per-function options passed to a [`TemplateResolver`].
#[derive(Debug, Clone)]
pub struct TemplateOptions {
    pub format: TemplateFormat,
    pub output_strategy: OutputStrategy,
    pub format_instructions_key: String,
    pub name: Option<String>,
    pub version: Option<String>,
    /// Name of the prompt-type profile, if any.
    pub prompt_type: Option<String>,
}

impl Default for TemplateOptions {
    fn default() -> Self {
        Self {
            format: TemplateFormat::default(),
            output_strategy: OutputStrategy::default(),
            format_instructions_key: "FORMAT_INSTRUCTIONS".to_string(),
            name: None,
            version: None,
            prompt_type: None,
        }
    }
}

/// A parsed prompt template with its inputs and output parser.
///
/// Immutable once resolved; shared by every invocation of a prompt function.
#[derive(Clone)]
pub struct TemplateDescriptor {
    template: String,
    format: TemplateFormat,
    segments: Vec<Segment>,
    /// Inputs used outside optional sections, in order of first use.
    pub input_names: Vec<String>,
    /// Inputs used only inside optional sections.
    pub optional_names: Vec<String>,
    /// Defaults for inputs, lowest precedence.
    pub default_values: BTreeMap<String, Value>,
    pub output_parser: Option<Arc<dyn OutputParser>>,
    pub name: Option<String>,
    pub version: Option<String>,
}

impl TemplateDescriptor {
    /// Parse `template`.
    ///
    /// ```
    /// use llm_prompt_fn::template::{TemplateDescriptor, TemplateFormat};
    /// use std::collections::BTreeMap;
    /// use serde_json::json;
    ///
    /// let t = TemplateDescriptor::parse("Hi {name}!{? You are {age}.?}", TemplateFormat::FStringExtra).unwrap();
    /// assert_eq!(t.input_names, vec!["name"]);
    /// assert_eq!(t.optional_names, vec!["age"]);
    ///
    /// let values = BTreeMap::from([("name".to_string(), json!("Ada"))]);
    /// assert_eq!(t.render(&values).unwrap(), "Hi Ada!");
    /// ```
    pub fn parse(template: &str, format: TemplateFormat) -> Result<Self> {
        let segments = parse(template, format)?;
        let mut input_names: Vec<String> = Vec::new();
        let mut optional_names: Vec<String> = Vec::new();
        for segment in &segments {
            match segment {
                Segment::Var(name) if !input_names.contains(name) => input_names.push(name.clone()),
                Segment::Optional(inner) => {
                    for s in inner {
                        if let Segment::Var(name) = s {
                            if !optional_names.contains(name) {
                                optional_names.push(name.clone());
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        optional_names.retain(|n| !input_names.contains(n));

        Ok(Self {
            template: template.to_string(),
            format,
            segments,
            input_names,
            optional_names,
            default_values: BTreeMap::new(),
            output_parser: None,
            name: None,
            version: None,
        })
    }

    pub fn with_output_parser(mut self, parser: Option<Arc<dyn OutputParser>>) -> Self {
        self.output_parser = parser;
        self
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn format(&self) -> TemplateFormat {
        self.format
    }

    /// Whether `name` is an input of this template (required or optional).
    pub fn accepts(&self, name: &str) -> bool {
        self.input_names.iter().chain(&self.optional_names).any(|n| n == name)
    }

    /// Every input name, required first.
    pub fn all_inputs(&self) -> Vec<String> {
        self.input_names.iter().chain(&self.optional_names).cloned().collect()
    }

    /// Render the prompt. Every required input must be present.
    pub fn render(&self, values: &BTreeMap<String, Value>) -> Result<String> {
        let mut out = String::with_capacity(self.template.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Var(name) => match values.get(name) {
                    Some(v) => out.push_str(&value_text(v)),
                    None => {
                        return Err(PromptError::Template(format!(
                            "missing value for '{}'",
                            name
                        )))
                    }
                },
                Segment::Optional(inner) => {
                    let complete = inner.iter().all(|s| match s {
                        Segment::Var(name) => !is_blank(values.get(name)),
                        _ => true,
                    });
                    if !complete {
                        continue;
                    }
                    for s in inner {
                        match s {
                            Segment::Literal(text) => out.push_str(text),
                            Segment::Var(name) => {
                                out.push_str(&values.get(name).map(value_text).unwrap_or_default())
                            }
                            Segment::Optional(_) => {}
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}

impl fmt::Debug for TemplateDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateDescriptor")
            .field("format", &self.format)
            .field("input_names", &self.input_names)
            .field("optional_names", &self.optional_names)
            .field("default_values", &self.default_values)
            .field("output_parser", &self.output_parser.as_ref().map(|p| p.name()))
            .field("name", &self.name)
            .finish()
    }
}

/// Turns a function signature into a [`TemplateDescriptor`].
pub trait TemplateResolver: Send + Sync {
    fn resolve(
        &self,
        signature: &FunctionSignature,
        options: &TemplateOptions,
    ) -> Result<TemplateDescriptor>;
}

/// Uses the dedented docstring as the template, the signature's parameter
/// defaults as default values, and the output strategy to pick the parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocstringResolver;

impl TemplateResolver for DocstringResolver {
    fn resolve(
        &self,
        signature: &FunctionSignature,
        options: &TemplateOptions,
    ) -> Result<TemplateDescriptor> {
        let text = dedent(&signature.docstring);
        let mut descriptor = TemplateDescriptor::parse(&text, options.format).map_err(|e| match e {
            PromptError::Template(msg) => {
                PromptError::Template(format!("{}: {}", signature.qualified_name(), msg))
            }
            other => other,
        })?;

        descriptor.default_values = signature
            .defaults()
            .filter(|(name, _)| descriptor.accepts(name))
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();
        descriptor.output_parser = options.output_strategy.resolve(&signature.return_type)?;
        descriptor.name = Some(options.name.clone().unwrap_or_else(|| signature.name.clone()));
        descriptor.version = options.version.clone();

        debug!(
            function = %signature.qualified_name(),
            inputs = ?descriptor.input_names,
            parser = descriptor.output_parser.as_ref().map(|p| p.name()).unwrap_or("none"),
            prompt_type = options.prompt_type.as_deref().unwrap_or("undefined"),
            "resolved prompt template"
        );
        Ok(descriptor)
    }
}
