//! Call arguments and their assembly into an invocation request.
//!
//! A prompt function is called with a [`CallArgs`]: keyword inputs, at most
//! one positional [`InputSource`] to look missing inputs up in, and the
//! reserved call controls (`capture_stream`, `callbacks`, `memory`,
//! `functions`, `llm_selector_rule_key`, `stop`).
//!
//! Assembly merges template defaults with keyword inputs, rejects unknown
//! keys, resolves what is still missing from the positional source, and
//! decides whether stream capture is really possible for this call.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{PromptError, Result};
use crate::events::EventHandler;
use crate::function::FunctionRef;
use crate::memory::Memory;
use crate::streaming_context::StreamingContext;
use crate::template::TemplateDescriptor;

pub const CAPTURE_STREAM: &str = "capture_stream";
pub const CALLBACKS: &str = "callbacks";
pub const MEMORY: &str = "memory";
pub const FUNCTIONS: &str = "functions";
pub const SELECTOR_RULE_KEY: &str = "llm_selector_rule_key";
pub const STOP: &str = "stop";

/// Keyword names reserved for call controls.
pub const RESERVED: [&str; 6] = [CAPTURE_STREAM, CALLBACKS, MEMORY, FUNCTIONS, SELECTOR_RULE_KEY, STOP];

/// Named values a prompt function can read its inputs from.
pub trait InputSource: Send + Sync {
    fn get(&self, name: &str) -> Option<Value>;

    /// Whether this source exposes named values at all.
    fn is_object(&self) -> bool {
        true
    }
}

impl InputSource for Value {
    fn get(&self, name: &str) -> Option<Value> {
        self.as_object().and_then(|o| o.get(name)).cloned()
    }

    fn is_object(&self) -> bool {
        Value::is_object(self)
    }
}

impl InputSource for serde_json::Map<String, Value> {
    fn get(&self, name: &str) -> Option<Value> {
        serde_json::Map::get(self, name).cloned()
    }
}

impl InputSource for HashMap<String, Value> {
    fn get(&self, name: &str) -> Option<Value> {
        HashMap::get(self, name).cloned()
    }
}

impl InputSource for BTreeMap<String, Value> {
    fn get(&self, name: &str) -> Option<Value> {
        BTreeMap::get(self, name).cloned()
    }
}

/// Any serializable struct used as an input source.
///
/// ```
/// use llm_prompt_fn::inputs::{InputSource, Serialized};
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct Article { title: String, words: u32 }
///
/// let source = Serialized::new(&Article { title: "Rust".into(), words: 900 }).unwrap();
/// assert_eq!(source.get("words").unwrap(), 900);
/// ```
#[derive(Debug, Clone)]
pub struct Serialized(Value);

impl Serialized {
    pub fn new<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self(serde_json::to_value(value)?))
    }
}

impl InputSource for Serialized {
    fn get(&self, name: &str) -> Option<Value> {
        InputSource::get(&self.0, name)
    }

    fn is_object(&self) -> bool {
        self.0.is_object()
    }
}

/// Arguments of one prompt function call.
///
/// ```
/// use llm_prompt_fn::inputs::CallArgs;
///
/// let args = CallArgs::new()
///     .arg("topic", "cats")
///     .arg("lines", 4)
///     .stop(["\n\n"])
///     .capture_stream(true);
/// ```
#[derive(Clone, Default)]
pub struct CallArgs {
    positional: Vec<Arc<dyn InputSource>>,
    kwargs: BTreeMap<String, Value>,
    callbacks: Vec<Arc<dyn EventHandler>>,
    memory: Option<Arc<dyn Memory>>,
    functions: Option<Vec<FunctionRef>>,
    cancellation: Option<Arc<AtomicBool>>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a positional input source. Only one is accepted per call.
    pub fn source(mut self, source: impl InputSource + 'static) -> Self {
        self.positional.push(Arc::new(source));
        self
    }

    /// Set a keyword argument.
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// Set several keyword arguments.
    pub fn args<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        self.kwargs
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn capture_stream(self, enabled: bool) -> Self {
        self.arg(CAPTURE_STREAM, enabled)
    }

    pub fn stop<S: Into<String>>(self, tokens: impl IntoIterator<Item = S>) -> Self {
        let tokens: Vec<Value> = tokens.into_iter().map(|t| Value::String(t.into())).collect();
        self.arg(STOP, tokens)
    }

    /// Override the prompt function's model-selection rule for this call.
    pub fn selector_rule_key(self, key: impl Into<String>) -> Self {
        self.arg(SELECTOR_RULE_KEY, key.into())
    }

    pub fn callback(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.callbacks.push(handler);
        self
    }

    pub fn memory(mut self, memory: Arc<dyn Memory>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Offer functions to the model; the call then returns a function-call result.
    pub fn functions(mut self, functions: Vec<FunctionRef>) -> Self {
        self.functions = Some(functions);
        self
    }

    /// Opaque cancellation flag handed to the model.
    pub fn cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancellation = Some(flag);
        self
    }
}

impl fmt::Debug for CallArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallArgs")
            .field("positional", &self.positional.len())
            .field("kwargs", &self.kwargs)
            .field("callbacks", &self.callbacks.len())
            .field("memory", &self.memory.as_ref().map(|m| m.memory_key().to_string()))
            .field("functions", &self.functions)
            .finish()
    }
}

/// A fully assembled call.
#[derive(Clone, Default)]
pub struct InvocationRequest {
    /// Value for every template input.
    pub inputs: BTreeMap<String, Value>,
    pub stop: Vec<String>,
    pub callbacks: Vec<Arc<dyn EventHandler>>,
    pub memory: Option<Arc<dyn Memory>>,
    pub functions: Option<Vec<FunctionRef>>,
    /// Receiver of captured stream tokens; set only when capture is active.
    pub stream_handler: Option<Arc<dyn EventHandler>>,
    pub selector_rule_key: Option<String>,
    pub cancellation: Option<Arc<AtomicBool>>,
}

impl InvocationRequest {
    pub fn capture_stream(&self) -> bool {
        self.stream_handler.is_some()
    }

    /// Caller functions, when a non-empty list was supplied.
    pub fn offered_functions(&self) -> Option<&[FunctionRef]> {
        self.functions.as_deref().filter(|f| !f.is_empty())
    }
}

impl fmt::Debug for InvocationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationRequest")
            .field("inputs", &self.inputs)
            .field("stop", &self.stop)
            .field("callbacks", &self.callbacks.len())
            .field("functions", &self.functions)
            .field("capture_stream", &self.capture_stream())
            .field("selector_rule_key", &self.selector_rule_key)
            .finish()
    }
}

/// What assembly needs to know about the prompt function.
pub(crate) struct Assembly<'a> {
    pub function: &'a str,
    pub descriptor: &'a TemplateDescriptor,
    pub format_instructions_key: &'a str,
    /// Decoration-time stop tokens; override the per-call `stop`.
    pub stop_tokens: &'a [String],
    pub capture_default: bool,
    /// The call blocks the current thread.
    pub blocking: bool,
}

impl Assembly<'_> {
    fn invalid(&self, message: impl Into<String>) -> PromptError {
        PromptError::InvalidArguments {
            function: self.function.to_string(),
            message: message.into(),
        }
    }

    /// Turn caller arguments into an [`InvocationRequest`].
    pub fn assemble(&self, args: CallArgs) -> Result<InvocationRequest> {
        let CallArgs {
            mut positional,
            mut kwargs,
            callbacks,
            memory,
            functions,
            cancellation,
        } = args;

        if positional.len() > 1 {
            return Err(self.invalid(format!(
                "only one positional argument (an object with named inputs) is supported, got {}",
                positional.len()
            )));
        }
        let source = positional.pop();
        if source.as_ref().is_some_and(|s| !s.is_object()) {
            return Err(self.invalid("the positional argument must be an object with named inputs"));
        }

        for name in [CALLBACKS, MEMORY, FUNCTIONS] {
            if kwargs.contains_key(name) {
                return Err(self.invalid(format!(
                    "`{}` is a reserved argument and must be set with CallArgs::{}",
                    name, name
                )));
            }
        }
        let capture_requested = match kwargs.remove(CAPTURE_STREAM) {
            None => self.capture_default,
            Some(Value::Bool(b)) => b,
            Some(other) => {
                return Err(self.invalid(format!(
                    "capture_stream is a reserved argument and must be a bool, got {}",
                    other
                )))
            }
        };
        let selector_rule_key = match kwargs.remove(SELECTOR_RULE_KEY) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(Value::String(s)) => Some(s),
            Some(other) => {
                return Err(self.invalid(format!(
                    "llm_selector_rule_key must be a string, got {}",
                    other
                )))
            }
        };
        let mut stop = match kwargs.remove(STOP) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(s)) => vec![s],
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s),
                    other => Err(self.invalid(format!("stop tokens must be strings, got {}", other))),
                })
                .collect::<Result<Vec<_>>>()?,
            Some(other) => {
                return Err(self.invalid(format!("stop must be a list of strings, got {}", other)))
            }
        };
        if !self.stop_tokens.is_empty() {
            stop = self.stop_tokens.to_vec();
        }

        let mut inputs = self.descriptor.default_values.clone();
        inputs.extend(kwargs);

        let unexpected: Vec<String> = inputs
            .keys()
            .filter(|k| !self.descriptor.accepts(k))
            .cloned()
            .collect();
        if !unexpected.is_empty() {
            return Err(PromptError::UnexpectedInput {
                function: self.function.to_string(),
                keys: unexpected,
                valid: self.descriptor.all_inputs(),
            });
        }

        let memory_key = memory.as_ref().map(|m| m.memory_key().to_string());
        let mut missing = Vec::new();
        for name in &self.descriptor.input_names {
            if inputs.contains_key(name) {
                continue;
            }
            if name == self.format_instructions_key {
                // filled from the output parser when the prompt is rendered
                inputs.insert(name.clone(), Value::Null);
                continue;
            }
            if memory_key.as_deref() == Some(name.as_str()) {
                continue;
            }
            match source.as_ref().and_then(|s| s.get(name)) {
                Some(value) => {
                    inputs.insert(name.clone(), value);
                }
                None => missing.push(name.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(PromptError::MissingInput {
                function: self.function.to_string(),
                keys: missing,
            });
        }
        if let Some(source) = &source {
            for name in &self.descriptor.optional_names {
                if !inputs.contains_key(name) {
                    if let Some(value) = source.get(name) {
                        inputs.insert(name.clone(), value);
                    }
                }
            }
        }

        let stream_handler = if !capture_requested {
            None
        } else if self.blocking {
            warn!(
                function = %self.function,
                "capture_stream is only supported for async invocations; ignoring it"
            );
            None
        } else {
            let handler = StreamingContext::current();
            if handler.is_none() {
                debug!(
                    function = %self.function,
                    "not inside a StreamingContext; ignoring capture_stream"
                );
            }
            handler
        };

        Ok(InvocationRequest {
            inputs,
            stop,
            callbacks,
            memory,
            functions,
            stream_handler,
            selector_rule_key,
            cancellation,
        })
    }
}
