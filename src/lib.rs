//! # LLM Prompt Functions
//!
//! Turn a documented function signature into a callable LLM prompt.
//!
//! A [`PromptFunction`] uses the signature's docstring as its prompt
//! template and its return type to choose an output parser. Calling it
//! assembles the arguments, picks a model, runs the chain, parses the
//! output (asking the model once to reformat when parsing fails) and, when
//! the caller offered functions, returns a [`FunctionCallResult`] with the
//! chosen function bound to the model's arguments.
//!
//! ## Core Concepts
//!
//! - **[`PromptFunction`]**: the invocation orchestrator, built with
//!   [`PromptFunction::builder`]. [`call`](PromptFunction::call) blocks,
//!   [`invoke`](PromptFunction::invoke) is async.
//! - **[`CallArgs`]**: keyword inputs, an optional positional input
//!   source, and reserved call controls (stream capture, callbacks, memory,
//!   functions, stop sequences, selection rule key).
//! - **[`Settings`]**: default models, model selector, chain executor and
//!   template resolver, shared by many prompt functions.
//! - **[`LanguageModel`]**: the model collaborator; [`OllamaModel`] talks
//!   to Ollama, [`MockModel`] returns canned replies.
//! - **[`OutputParser`]**: list, boolean, JSON, markdown, text and native
//!   function-calling parsers.
//! - **[`StreamingContext`]**: ambient scope receiving captured tokens.
//!
//! ## Quick Start
//!
//! ```no_run
//! use llm_prompt_fn::signature::{FunctionSignature, ReturnType};
//! use llm_prompt_fn::{CallArgs, PromptFunction, Settings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::ollama("http://localhost:11434", "llama3");
//!
//!     let ideas = PromptFunction::builder(
//!         FunctionSignature::new(
//!             "ideas",
//!             "Suggest {count} names for a {thing}.\n{FORMAT_INSTRUCTIONS}",
//!         )
//!         .param("thing")
//!         .param_with_default("count", 3)
//!         .returns(ReturnType::List)
//!         .asynchronous(),
//!     )
//!     .settings(settings)
//!     .build()?;
//!
//!     let names = ideas.invoke(CallArgs::new().arg("thing", "coffee shop")).await?;
//!     println!("{:?}", names.value());
//!     Ok(())
//! }
//! ```

pub mod chain;
mod diagnostics;
pub mod error;
pub mod events;
pub mod function;
pub mod inputs;
pub mod memory;
pub mod model;
pub mod output_parser;
pub mod output_strategy;
pub mod prompt_fn;
pub mod retry;
pub mod selector;
pub mod settings;
pub mod signature;
pub mod streaming;
pub mod streaming_context;
pub mod template;

pub use chain::{ChainBinding, ChainExecutor, ChainOutput, ChainVariant, LlmChain};
pub use error::{PromptError, Result};
pub use events::{Event, EventHandler, EventRecorder, FnEventHandler};
pub use function::{FunctionCallResult, FunctionDefinition, FunctionRef, Tool};
pub use inputs::{CallArgs, InputSource, InvocationRequest, Serialized};
pub use memory::{BufferMemory, Memory};
pub use model::{LanguageModel, MockModel, MockReply, ModelConfig, OllamaModel};
pub use output_parser::{OutputParser, ParseError};
pub use output_strategy::OutputStrategy;
pub use prompt_fn::{InvocationResult, PromptFunction, PromptFunctionBuilder};
pub use selector::{ModelSelector, RuleKeySelector, SelectionConstraints};
pub use settings::{PromptType, Settings, SettingsBuilder};
pub use signature::{FunctionSignature, ReturnType};
pub use streaming::StreamingDecoder;
pub use streaming_context::StreamingContext;
pub use template::{TemplateDescriptor, TemplateFormat};
