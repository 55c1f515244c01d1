//! Functions offered to the model, and packaging of the call it chose.
//!
//! A caller may pass a list of [`FunctionRef`]s with an invocation. The
//! chain then uses the model's native function-calling protocol, and the
//! prompt function returns a [`FunctionCallResult`] instead of a plain
//! value. The result carries the chosen function already bound to the
//! model's arguments, so the caller decides whether (and how) to run it.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Result;
use crate::events::EventHandler;
use crate::model::{ChatMessage, FunctionCallInfo};
use crate::PromptError;

/// Argument name used by tools that take a single bare input.
pub const SINGLE_ARG_KEY: &str = "__arg1";

/// A function as described to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: Value,
}

impl FunctionDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Schema of a tool that takes one bare string input.
pub fn single_arg_schema() -> Value {
    json!({
        "type": "object",
        "properties": { SINGLE_ARG_KEY: { "type": "string" } },
        "required": [SINGLE_ARG_KEY],
    })
}

/// An agent-style tool.
///
/// Tools receive the verbosity flag and the caller's callbacks of the
/// invocation that selected them.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments; a single bare input by default.
    fn parameters(&self) -> Value {
        single_arg_schema()
    }

    fn run(
        &self,
        input: Value,
        verbose: bool,
        callbacks: &[Arc<dyn EventHandler>],
    ) -> anyhow::Result<Value>;

    async fn arun(
        &self,
        input: Value,
        verbose: bool,
        callbacks: &[Arc<dyn EventHandler>],
    ) -> anyhow::Result<Value> {
        self.run(input, verbose, callbacks)
    }
}

/// Plain synchronous function taking the arguments object.
pub type SyncFn = Arc<dyn Fn(Value) -> anyhow::Result<Value> + Send + Sync>;

/// Plain asynchronous function taking the arguments object.
pub type AsyncFn = Arc<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// A function the model may call.
#[derive(Clone)]
pub enum FunctionRef {
    Tool(Arc<dyn Tool>),
    Sync {
        definition: FunctionDefinition,
        func: SyncFn,
    },
    Async {
        definition: FunctionDefinition,
        func: AsyncFn,
    },
    /// Described to the model but not callable from here.
    Definition(FunctionDefinition),
}

impl FunctionRef {
    pub fn tool(tool: impl Tool + 'static) -> Self {
        FunctionRef::Tool(Arc::new(tool))
    }

    /// Wrap a synchronous function.
    ///
    /// ```
    /// use llm_prompt_fn::function::{FunctionDefinition, FunctionRef};
    /// use serde_json::json;
    ///
    /// let add = FunctionRef::sync(
    ///     FunctionDefinition::new("add", "Add two numbers", json!({"type": "object"})),
    ///     |args| Ok(json!(args["a"].as_i64().unwrap_or(0) + args["b"].as_i64().unwrap_or(0))),
    /// );
    /// assert_eq!(add.name(), "add");
    /// ```
    pub fn sync<F>(definition: FunctionDefinition, func: F) -> Self
    where
        F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        FunctionRef::Sync {
            definition,
            func: Arc::new(func),
        }
    }

    /// Wrap an asynchronous function.
    pub fn asynchronous<F, Fut>(definition: FunctionDefinition, func: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        FunctionRef::Async {
            definition,
            func: Arc::new(move |args| -> BoxFuture<'static, anyhow::Result<Value>> {
                Box::pin(func(args))
            }),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            FunctionRef::Tool(tool) => tool.name(),
            FunctionRef::Sync { definition, .. }
            | FunctionRef::Async { definition, .. }
            | FunctionRef::Definition(definition) => &definition.name,
        }
    }

    /// The description sent to the model.
    pub fn definition(&self) -> FunctionDefinition {
        match self {
            FunctionRef::Tool(tool) => {
                FunctionDefinition::new(tool.name(), tool.description(), tool.parameters())
            }
            FunctionRef::Sync { definition, .. }
            | FunctionRef::Async { definition, .. }
            | FunctionRef::Definition(definition) => definition.clone(),
        }
    }

    fn shape(&self) -> &'static str {
        match self {
            FunctionRef::Tool(_) => "tool",
            FunctionRef::Sync { .. } => "sync",
            FunctionRef::Async { .. } => "async",
            FunctionRef::Definition(_) => "definition",
        }
    }
}

impl fmt::Debug for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionRef::{}({})", self.shape(), self.name())
    }
}

/// A function already bound to the model's arguments.
pub type BoundFunction = Arc<dyn Fn() -> Result<Value> + Send + Sync>;

/// An asynchronous function already bound to the model's arguments.
pub type BoundAsyncFunction = Arc<dyn Fn() -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Result of an invocation that offered functions to the model.
///
/// When the model answered in plain text, every `function*` field is unset
/// and `output` holds the parsed text.
#[derive(Clone)]
pub struct FunctionCallResult {
    /// Parsed output, or the call arguments when the model chose a function.
    pub output: Value,
    /// Raw completion text.
    pub output_text: String,
    /// Raw assistant message.
    pub output_message: ChatMessage,
    /// Synchronous entry point of the chosen function.
    pub function: Option<BoundFunction>,
    /// Asynchronous entry point of the chosen function.
    pub function_async: Option<BoundAsyncFunction>,
    pub function_name: Option<String>,
    /// Arguments exactly as the model sent them.
    pub function_args: Option<Value>,
    /// Arguments as the bound function receives them (a single tool
    /// argument is unwrapped).
    pub function_arguments: Option<Value>,
}

impl FunctionCallResult {
    pub fn is_function_call(&self) -> bool {
        self.function_name.is_some()
    }

    /// Run the bound synchronous function.
    pub fn call_function(&self) -> Result<Value> {
        match &self.function {
            Some(f) => f(),
            None => Err(self.not_bound("synchronous")),
        }
    }

    /// Run the bound asynchronous function.
    pub async fn call_function_async(&self) -> Result<Value> {
        match &self.function_async {
            Some(f) => f().await,
            None => Err(self.not_bound("asynchronous")),
        }
    }

    fn not_bound(&self, mode: &str) -> PromptError {
        PromptError::Tool {
            tool: self.function_name.clone().unwrap_or_default(),
            message: format!("no {} function is bound", mode),
        }
    }
}

impl fmt::Debug for FunctionCallResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionCallResult")
            .field("output", &self.output)
            .field("output_text", &self.output_text)
            .field("function_name", &self.function_name)
            .field("function_args", &self.function_args)
            .field("function_arguments", &self.function_arguments)
            .field("function", &self.function.is_some())
            .field("function_async", &self.function_async.is_some())
            .finish()
    }
}

/// What the chain reported, ready to be packaged.
#[derive(Debug, Clone)]
pub(crate) struct FunctionCallPayload {
    pub output: Value,
    pub output_text: String,
    pub output_message: ChatMessage,
    pub function: Option<FunctionRef>,
    pub call: Option<FunctionCallInfo>,
}

impl FunctionCallPayload {
    /// Bind the chosen function to the model's arguments.
    pub fn package(
        self,
        prompt_name: &str,
        verbose: bool,
        callbacks: &[Arc<dyn EventHandler>],
    ) -> Result<FunctionCallResult> {
        let mut result = FunctionCallResult {
            output: self.output,
            output_text: self.output_text,
            output_message: self.output_message,
            function: None,
            function_async: None,
            function_name: None,
            function_args: None,
            function_arguments: None,
        };
        let Some(call) = self.call else {
            return Ok(result);
        };

        let mut bound_args = call.arguments.clone();
        match self.function {
            Some(FunctionRef::Tool(tool)) => {
                bound_args = unwrap_single_arg(&call.arguments);
                let callbacks: Vec<Arc<dyn EventHandler>> = callbacks.to_vec();
                result.function = Some(bind_tool_sync(
                    tool.clone(),
                    bound_args.clone(),
                    verbose,
                    callbacks.clone(),
                ));
                result.function_async =
                    Some(bind_tool_async(tool, bound_args.clone(), verbose, callbacks));
            }
            Some(FunctionRef::Sync { definition, func }) => {
                let args = call.arguments.clone();
                let name = definition.name;
                result.function = Some(Arc::new(move || {
                    func(args.clone()).map_err(|e| tool_error(&name, e))
                }));
            }
            Some(FunctionRef::Async { definition, func }) => {
                let args = call.arguments.clone();
                let name = definition.name;
                result.function_async = Some(Arc::new(move || -> BoxFuture<'static, Result<Value>> {
                    let fut = func(args.clone());
                    let name = name.clone();
                    Box::pin(async move { fut.await.map_err(|e| tool_error(&name, e)) })
                }));
            }
            Some(FunctionRef::Definition(definition)) => {
                return Err(PromptError::InvalidFunctionReference {
                    function: prompt_name.to_string(),
                    reference: format!("{} (declaration only)", definition.name),
                });
            }
            None => {
                return Err(PromptError::InvalidFunctionReference {
                    function: prompt_name.to_string(),
                    reference: call.name,
                });
            }
        }

        result.function_name = Some(call.name);
        result.function_args = Some(call.arguments);
        result.function_arguments = Some(bound_args);
        Ok(result)
    }
}

/// `{"__arg1": x}` becomes `x`; anything else is passed through.
fn unwrap_single_arg(arguments: &Value) -> Value {
    match arguments.as_object() {
        Some(map) if map.len() == 1 => match map.get(SINGLE_ARG_KEY) {
            Some(inner) => inner.clone(),
            None => arguments.clone(),
        },
        _ => arguments.clone(),
    }
}

fn tool_error(name: &str, err: anyhow::Error) -> PromptError {
    PromptError::Tool {
        tool: name.to_string(),
        message: err.to_string(),
    }
}

fn bind_tool_sync(
    tool: Arc<dyn Tool>,
    input: Value,
    verbose: bool,
    callbacks: Vec<Arc<dyn EventHandler>>,
) -> BoundFunction {
    Arc::new(move || {
        tool.run(input.clone(), verbose, &callbacks)
            .map_err(|e| tool_error(tool.name(), e))
    })
}

fn bind_tool_async(
    tool: Arc<dyn Tool>,
    input: Value,
    verbose: bool,
    callbacks: Vec<Arc<dyn EventHandler>>,
) -> BoundAsyncFunction {
    Arc::new(move || -> BoxFuture<'static, Result<Value>> {
        let tool = tool.clone();
        let input = input.clone();
        let callbacks = callbacks.clone();
        Box::pin(async move {
            tool.arun(input, verbose, &callbacks)
                .await
                .map_err(|e| tool_error(tool.name(), e))
        })
    })
}
