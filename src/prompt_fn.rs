//! Prompt functions.
//!
//! A [`PromptFunction`] is built once from a [`FunctionSignature`]: the
//! docstring becomes the prompt template, parameter defaults become template
//! defaults and the return type picks the output parser. Each call then
//!
//! 1. assembles the caller's arguments into an [`InvocationRequest`],
//! 2. selects a model and binds the chain (plain or function calling),
//! 3. runs the chain and parses the output,
//! 4. on a recoverable parse failure, asks the model once to reformat,
//! 5. packages a [`FunctionCallResult`] when the caller offered functions.
//!
//! ```text
//! CallArgs ─► Assembly ─► select model ─► ChainExecutor ─► parse ─┬─► InvocationResult
//!                                                                  │
//!                                              NeedsRetry ─► recovery prompt ─► parse
//! ```
//!
//! [`PromptFunction::call`] blocks the current thread; [`PromptFunction::invoke`]
//! is the async entry point. Both reach the same result for the same model
//! replies.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::chain::{ChainBinding, ChainExecutor, ChainOutput, ChainVariant};
use crate::diagnostics::Diagnostics;
use crate::error::Result;
use crate::events::{emit, Event};
use crate::function::{FunctionCallPayload, FunctionCallResult, FunctionRef};
use crate::inputs::{Assembly, CallArgs, InvocationRequest};
use crate::model::LanguageModel;
use crate::output_parser::{OutputParser, ParseError, ParserKind};
use crate::output_strategy::OutputStrategy;
use crate::retry::{recovery_prompt, ParseOutcome, Recoverable};
use crate::selector::SelectionConstraints;
use crate::settings::{PromptType, Settings};
use crate::signature::FunctionSignature;
use crate::template::{TemplateDescriptor, TemplateFormat, TemplateOptions};
use crate::PromptError;

/// What a prompt function returns.
#[derive(Debug, Clone)]
pub enum InvocationResult {
    /// The parsed output, or the raw text when there is no parser.
    Value(Value),
    /// The caller offered functions to the model.
    FunctionCall(FunctionCallResult),
}

impl InvocationResult {
    pub fn value(&self) -> Option<&Value> {
        match self {
            InvocationResult::Value(v) => Some(v),
            InvocationResult::FunctionCall(_) => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            InvocationResult::Value(v) => Some(v),
            InvocationResult::FunctionCall(_) => None,
        }
    }

    pub fn function_call(&self) -> Option<&FunctionCallResult> {
        match self {
            InvocationResult::FunctionCall(r) => Some(r),
            InvocationResult::Value(_) => None,
        }
    }

    pub fn into_function_call(self) -> Option<FunctionCallResult> {
        match self {
            InvocationResult::FunctionCall(r) => Some(r),
            InvocationResult::Value(_) => None,
        }
    }

    /// Deserialize the output into a typed struct.
    ///
    /// For a function-call result this is its `output`.
    pub fn parse_as<T: DeserializeOwned>(&self) -> Result<T> {
        let value = match self {
            InvocationResult::Value(v) => v,
            InvocationResult::FunctionCall(r) => &r.output,
        };
        Ok(serde_json::from_value(value.clone())?)
    }
}

/// A prompt template bound to its parser, model choice and settings.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use llm_prompt_fn::model::MockModel;
/// use llm_prompt_fn::signature::FunctionSignature;
/// use llm_prompt_fn::{CallArgs, PromptFunction, Settings};
///
/// let settings = Settings::builder()
///     .default_model(Arc::new(MockModel::fixed("Cats are great.")))
///     .build();
/// let write_about = PromptFunction::builder(
///     FunctionSignature::new("write_about", "Write one sentence about {topic}.").param("topic"),
/// )
/// .settings(settings)
/// .build()
/// .unwrap();
///
/// let result = write_about.call(CallArgs::new().arg("topic", "cats")).unwrap();
/// assert_eq!(result.value().unwrap(), "Cats are great.");
/// ```
pub struct PromptFunction {
    name: String,
    signature: FunctionSignature,
    descriptor: Arc<TemplateDescriptor>,
    prompt_type: PromptType,
    stop_tokens: Vec<String>,
    capture_stream: bool,
    model: Option<Arc<dyn LanguageModel>>,
    format_instructions_key: String,
    retry_on_parse_error: bool,
    verbose: bool,
    expected_gen_tokens: Option<u32>,
    selector_rule_key: Option<String>,
    settings: Settings,
}

impl PromptFunction {
    pub fn builder(signature: FunctionSignature) -> PromptFunctionBuilder {
        PromptFunctionBuilder::new(signature)
    }

    /// Qualified name (`module.name`).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    pub fn descriptor(&self) -> &TemplateDescriptor {
        &self.descriptor
    }

    pub fn prompt_type(&self) -> &PromptType {
        &self.prompt_type
    }

    /// Run the prompt function, blocking the current thread.
    ///
    /// Stream capture is always disabled here. Inside a runtime context (for
    /// example on a `spawn_blocking` thread) the call runs on a scoped helper
    /// thread; async code should prefer [`invoke`](Self::invoke).
    pub fn call(&self, args: CallArgs) -> Result<InvocationResult> {
        let run = move || -> Result<InvocationResult> {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| PromptError::Other(format!("failed to start runtime: {}", e)))?;
            runtime.block_on(self.run(args, true))
        };
        if tokio::runtime::Handle::try_current().is_err() {
            return run();
        }
        debug!(function = %self.name, "blocking call inside a runtime context, running on a helper thread");
        std::thread::scope(|scope| match scope.spawn(run).join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        })
    }

    /// Run the prompt function.
    pub async fn invoke(&self, args: CallArgs) -> Result<InvocationResult> {
        self.run(args, false).await
    }

    async fn run(&self, args: CallArgs, blocking: bool) -> Result<InvocationResult> {
        let request = Assembly {
            function: &self.name,
            descriptor: &self.descriptor,
            format_instructions_key: &self.format_instructions_key,
            stop_tokens: &self.stop_tokens,
            capture_default: self.capture_stream,
            blocking,
        }
        .assemble(args)?;
        let model = self.select_model(&request)?;

        let diag = Diagnostics::new(
            &self.name,
            &self.prompt_type.name,
            self.prompt_type.log_level,
            self.verbose,
        );
        diag.entering(model.name());
        emit(
            &request.callbacks,
            Event::PromptStart {
                name: self.name.clone(),
                model: model.name().to_string(),
            },
        );

        let result = self.run_chain(model, &request, &diag).await;

        emit(
            &request.callbacks,
            Event::PromptEnd {
                name: self.name.clone(),
                ok: result.is_ok(),
            },
        );
        diag.finished(result.is_ok());
        result
    }

    fn select_model(&self, request: &InvocationRequest) -> Result<Arc<dyn LanguageModel>> {
        if let Some(model) = &self.model {
            if request.capture_stream() && !model.supports_streaming() {
                warn!(
                    function = %self.name,
                    model = model.name(),
                    "stream capture requested but the model does not support streaming"
                );
            }
            return Ok(model.clone());
        }

        let selector = self
            .prompt_type
            .selector
            .clone()
            .or_else(|| self.settings.selector());
        if let Some(selector) = &selector {
            let constraints = SelectionConstraints {
                rule_key: request
                    .selector_rule_key
                    .clone()
                    .or_else(|| self.selector_rule_key.clone()),
                expected_gen_tokens: self.expected_gen_tokens,
            };
            if let Some(model) = selector.select(&constraints) {
                debug!(function = %self.name, model = model.name(), ?constraints, "selected model");
                return Ok(model);
            }
        }

        let fallback = if request.capture_stream() && selector.is_none() {
            let streaming = self.settings.default_streaming_model();
            if streaming.is_none() {
                warn!(
                    function = %self.name,
                    "stream capture requested but no default streaming model is configured"
                );
            }
            streaming.or_else(|| self.settings.default_model())
        } else {
            self.settings.default_model()
        };
        fallback.ok_or_else(|| {
            PromptError::InvalidConfig(format!("{}: no model configured", self.name))
        })
    }

    fn parser(&self) -> Option<&Arc<dyn OutputParser>> {
        self.descriptor.output_parser.as_ref()
    }

    fn uses_function_parser(&self) -> bool {
        self.parser()
            .is_some_and(|p| p.kind() == ParserKind::FunctionCalling)
    }

    fn chain_variant(&self, request: &InvocationRequest) -> Result<ChainVariant> {
        if let Some(functions) = request.offered_functions() {
            return Ok(ChainVariant::FunctionCalling {
                functions: functions.to_vec(),
                forced: None,
            });
        }
        match self.parser() {
            Some(parser) if parser.kind() == ParserKind::FunctionCalling => {
                let definition = parser.function_definition().ok_or_else(|| {
                    PromptError::InvalidConfig(format!(
                        "{}: output parser {} declares no function",
                        self.name,
                        parser.name()
                    ))
                })?;
                Ok(ChainVariant::FunctionCalling {
                    forced: Some(definition.name.clone()),
                    functions: vec![FunctionRef::Definition(definition)],
                })
            }
            _ => Ok(ChainVariant::Plain),
        }
    }

    async fn run_chain(
        &self,
        model: Arc<dyn LanguageModel>,
        request: &InvocationRequest,
        diag: &Diagnostics<'_>,
    ) -> Result<InvocationResult> {
        let binding = ChainBinding {
            function: self.name.clone(),
            descriptor: self.descriptor.clone(),
            model,
            variant: self.chain_variant(request)?,
            format_instructions_key: self.format_instructions_key.clone(),
        };
        let executor = self.settings.executor();
        let output = executor.execute(&binding, request).await?;

        diag.result(&output.text);
        if let Some(call) = &output.function_call {
            diag.function_call(call);
            emit(
                &request.callbacks,
                Event::FunctionCall {
                    name: self.name.clone(),
                    function: call.name.clone(),
                    arguments: call.arguments.clone(),
                },
            );
        }

        let value = match ParseOutcome::from(self.parse_output(&output)) {
            ParseOutcome::Parsed(value) => value,
            ParseOutcome::NeedsRetry(retry) if self.retry_on_parse_error => {
                let value = self
                    .recover(executor.as_ref(), &binding, request, &output, retry, diag)
                    .await?;
                return Ok(InvocationResult::Value(value));
            }
            ParseOutcome::NeedsRetry(Recoverable { error, .. }) | ParseOutcome::Failed(error) => {
                return Err(self.parse_failure(error));
            }
        };

        if request.offered_functions().is_some() && !self.uses_function_parser() {
            let payload = FunctionCallPayload {
                output: value,
                output_text: output.text,
                output_message: output.message,
                function: output.function,
                call: output.function_call,
            };
            return payload
                .package(&self.name, self.verbose, &request.callbacks)
                .map(InvocationResult::FunctionCall);
        }
        Ok(InvocationResult::Value(value))
    }

    fn parse_output(&self, output: &ChainOutput) -> std::result::Result<Value, ParseError> {
        match (self.parser(), &output.function_call) {
            (Some(parser), Some(call)) if parser.kind() == ParserKind::FunctionCalling => {
                parser.parse(&call.arguments.to_string())
            }
            (_, Some(call)) => Ok(call.arguments.clone()),
            (Some(parser), None) if !output.text.is_empty() => parser.parse(&output.text),
            _ => Ok(Value::String(output.text.clone())),
        }
    }

    fn parse_failure(&self, source: ParseError) -> PromptError {
        PromptError::Parse {
            function: self.name.clone(),
            source,
        }
    }

    /// The single format-recovery attempt.
    async fn recover(
        &self,
        executor: &dyn ChainExecutor,
        binding: &ChainBinding,
        request: &InvocationRequest,
        output: &ChainOutput,
        retry: Recoverable,
        diag: &Diagnostics<'_>,
    ) -> Result<Value> {
        warn!(function = %self.name, error = %retry.error, "failed to parse output, asking the model to reformat");
        let Some(parser) = self.parser() else {
            return Err(self.parse_failure(retry.error));
        };
        if self.lacks_format_placeholder() {
            warn!(
                function = %self.name,
                key = %self.format_instructions_key,
                "the prompt template has no format instructions placeholder"
            );
        }
        let instructions = parser
            .format_instructions()
            .filter(|i| !i.is_empty())
            .ok_or_else(|| PromptError::MissingFormatInstructions {
                function: self.name.clone(),
                parser: parser.name(),
            })?;

        let original_prompt = retry.needs_prompt.then_some(output.prompt.as_str());
        let prompt = recovery_prompt(original_prompt, &retry.original, &instructions)?;
        let model = self
            .model
            .clone()
            .or_else(|| self.settings.default_model())
            .unwrap_or_else(|| binding.model.clone());

        emit(
            &request.callbacks,
            Event::RetryStart {
                name: self.name.clone(),
                reason: retry.error.to_string(),
            },
        );
        let text = match executor
            .predict(model, prompt, request.cancellation.clone())
            .await
        {
            Ok(text) => text,
            Err(e) => {
                self.retry_end(request, false);
                return Err(e);
            }
        };
        diag.retry_result(&text);

        let parsed = parser.parse(&text).map_err(|e| self.parse_failure(e));
        self.retry_end(request, parsed.is_ok());
        parsed
    }

    /// The template never names the format instructions slot.
    fn lacks_format_placeholder(&self) -> bool {
        !self.descriptor.accepts(&self.format_instructions_key)
    }

    fn retry_end(&self, request: &InvocationRequest, success: bool) {
        emit(
            &request.callbacks,
            Event::RetryEnd {
                name: self.name.clone(),
                success,
            },
        );
    }
}

impl std::fmt::Debug for PromptFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptFunction")
            .field("name", &self.name)
            .field("descriptor", &self.descriptor)
            .field("prompt_type", &self.prompt_type.name)
            .field("model", &self.model)
            .field("capture_stream", &self.capture_stream)
            .field("retry_on_parse_error", &self.retry_on_parse_error)
            .finish()
    }
}

/// Builder for [`PromptFunction`].
pub struct PromptFunctionBuilder {
    signature: FunctionSignature,
    prompt_type: Option<PromptType>,
    template_format: TemplateFormat,
    output_strategy: OutputStrategy,
    stop_tokens: Vec<String>,
    template_name: Option<String>,
    template_version: Option<String>,
    capture_stream: Option<bool>,
    model: Option<Arc<dyn LanguageModel>>,
    format_instructions_key: String,
    retry_on_parse_error: bool,
    verbose: Option<bool>,
    expected_gen_tokens: Option<u32>,
    selector_rule_key: Option<String>,
    settings: Option<Settings>,
}

impl PromptFunctionBuilder {
    pub fn new(signature: FunctionSignature) -> Self {
        Self {
            signature,
            prompt_type: None,
            template_format: TemplateFormat::default(),
            output_strategy: OutputStrategy::default(),
            stop_tokens: Vec::new(),
            template_name: None,
            template_version: None,
            capture_stream: None,
            model: None,
            format_instructions_key: TemplateOptions::default().format_instructions_key,
            retry_on_parse_error: true,
            verbose: None,
            expected_gen_tokens: None,
            selector_rule_key: None,
            settings: None,
        }
    }

    pub fn prompt_type(mut self, prompt_type: PromptType) -> Self {
        self.prompt_type = Some(prompt_type);
        self
    }

    pub fn template_format(mut self, format: TemplateFormat) -> Self {
        self.template_format = format;
        self
    }

    pub fn output_parser(mut self, strategy: OutputStrategy) -> Self {
        self.output_strategy = strategy;
        self
    }

    /// Stop sequences; these replace any `stop` passed per call.
    pub fn stop_tokens<S: Into<String>>(mut self, tokens: impl IntoIterator<Item = S>) -> Self {
        self.stop_tokens = tokens.into_iter().map(Into::into).collect();
        self
    }

    pub fn template_name(mut self, name: impl Into<String>) -> Self {
        self.template_name = Some(name.into());
        self
    }

    pub fn template_version(mut self, version: impl Into<String>) -> Self {
        self.template_version = Some(version.into());
        self
    }

    /// Capture the token stream by default. Only honored on async signatures.
    pub fn capture_stream(mut self, enabled: bool) -> Self {
        self.capture_stream = Some(enabled);
        self
    }

    /// Always use this model, bypassing selection.
    pub fn model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn format_instructions_key(mut self, key: impl Into<String>) -> Self {
        self.format_instructions_key = key.into();
        self
    }

    pub fn retry_on_parse_error(mut self, enabled: bool) -> Self {
        self.retry_on_parse_error = enabled;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = Some(verbose);
        self
    }

    pub fn expected_gen_tokens(mut self, tokens: u32) -> Self {
        self.expected_gen_tokens = Some(tokens);
        self
    }

    pub fn selector_rule_key(mut self, key: impl Into<String>) -> Self {
        self.selector_rule_key = Some(key.into());
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Resolve the template and output parser.
    pub fn build(self) -> Result<PromptFunction> {
        let settings = self.settings.unwrap_or_default();
        let name = self.signature.qualified_name();
        let verbose = self.verbose.unwrap_or_else(|| settings.verbose());
        let mut prompt_type = self.prompt_type.unwrap_or_default();
        if verbose {
            prompt_type = prompt_type.as_verbose();
        }

        let mut capture_stream = self
            .capture_stream
            .or(prompt_type.capture_stream)
            .unwrap_or(false);
        if capture_stream && !self.signature.is_async {
            warn!(
                function = %name,
                "stream capture is only supported for async prompt functions, disabling it"
            );
            capture_stream = false;
        }

        let options = TemplateOptions {
            format: self.template_format,
            output_strategy: self.output_strategy,
            format_instructions_key: self.format_instructions_key.clone(),
            name: self.template_name,
            version: self.template_version,
            prompt_type: Some(prompt_type.name.clone()),
        };
        let descriptor = settings.resolver().resolve(&self.signature, &options)?;

        Ok(PromptFunction {
            name,
            signature: self.signature,
            descriptor: Arc::new(descriptor),
            prompt_type,
            stop_tokens: self.stop_tokens,
            capture_stream,
            model: self.model,
            format_instructions_key: self.format_instructions_key,
            retry_on_parse_error: self.retry_on_parse_error,
            verbose,
            expected_gen_tokens: self.expected_gen_tokens,
            selector_rule_key: self.selector_rule_key,
            settings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventRecorder;
    use crate::function::FunctionDefinition;
    use crate::model::{MockModel, MockReply, ModelRequest, ModelResponse, TokenCallback};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use crate::selector::RuleKeySelector;
    use crate::signature::ReturnType;
    use crate::streaming_context::StreamingContext;
    use serde_json::json;

    fn settings_with(model: Arc<MockModel>) -> Settings {
        Settings::builder().default_model(model).build()
    }

    fn build(signature: FunctionSignature, model: Arc<MockModel>) -> PromptFunction {
        PromptFunction::builder(signature)
            .settings(settings_with(model))
            .build()
            .unwrap()
    }

    fn yes_no() -> FunctionSignature {
        FunctionSignature::new("is_true", "Is this true? {claim}\n{FORMAT_INSTRUCTIONS}")
            .in_module("facts")
            .param("claim")
            .returns(ReturnType::Bool)
    }

    /// Parser that always fails with a recoverable error, optionally without instructions.
    struct Stubborn {
        instructions: Option<String>,
    }

    impl OutputParser for Stubborn {
        fn name(&self) -> &'static str {
            "stubborn"
        }

        fn parse(&self, text: &str) -> std::result::Result<Value, ParseError> {
            Err(ParseError::unparseable("nothing", "never parses", text))
        }

        fn format_instructions(&self) -> Option<String> {
            self.instructions.clone()
        }
    }

    #[tokio::test]
    async fn test_plain_text_result() {
        let model = Arc::new(MockModel::fixed("Cats are great."));
        let f = build(
            FunctionSignature::new("write_about", "Write one sentence about {topic}.").param("topic"),
            model.clone(),
        );

        let result = f.invoke(CallArgs::new().arg("topic", "cats")).await.unwrap();
        assert_eq!(result.value().unwrap(), &json!("Cats are great."));
        assert_eq!(model.prompts(), vec!["Write one sentence about cats."]);
    }

    #[tokio::test]
    async fn test_list_parser_result() {
        let model = Arc::new(MockModel::fixed("- a\n- b"));
        let f = build(
            FunctionSignature::new("letters", "List {n} letters.")
                .param("n")
                .returns(ReturnType::List),
            model,
        );

        let result = f.invoke(CallArgs::new().arg("n", 2)).await.unwrap();
        assert_eq!(result.into_value().unwrap(), json!(["a", "b"]));
    }

    #[tokio::test]
    async fn test_retry_with_original_prompt() {
        let model = Arc::new(MockModel::new(vec!["maybe", "Yes"]));
        let f = build(yes_no(), model.clone());
        let recorder = EventRecorder::new();

        let result = f
            .invoke(
                CallArgs::new()
                    .arg("claim", "water is wet")
                    .callback(recorder.clone()),
            )
            .await
            .unwrap();
        assert_eq!(result.into_value().unwrap(), json!(true));

        let prompts = model.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].starts_with(&prompts[0]));
        assert!(prompts[1].contains("This is our original response maybe"));
        assert!(prompts[1].contains("Reply only with Yes or No."));

        let kinds: Vec<&str> = recorder
            .events()
            .iter()
            .map(|e| match e {
                Event::PromptStart { .. } => "start",
                Event::RetryStart { .. } => "retry_start",
                Event::RetryEnd { success: true, .. } => "retry_ok",
                Event::PromptEnd { ok: true, .. } => "end_ok",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["start", "retry_start", "retry_ok", "end_ok"]);
    }

    #[tokio::test]
    async fn test_retry_without_original_prompt() {
        let model = Arc::new(MockModel::new(vec!["not json", "{\"a\": 1}"]));
        let f = build(
            FunctionSignature::new("data", "Give me data about {x}.")
                .param("x")
                .returns(ReturnType::Json),
            model.clone(),
        );

        let result = f.invoke(CallArgs::new().arg("x", "y")).await.unwrap();
        assert_eq!(result.into_value().unwrap(), json!({"a": 1}));

        let prompts = model.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].starts_with("This is our original response not json"));
        assert!(!prompts[1].contains("Give me data"));
    }

    #[tokio::test]
    async fn test_retry_disabled_propagates() {
        let model = Arc::new(MockModel::fixed("maybe"));
        let f = PromptFunction::builder(yes_no())
            .settings(settings_with(model.clone()))
            .retry_on_parse_error(false)
            .build()
            .unwrap();

        let err = f.invoke(CallArgs::new().arg("claim", "x")).await.unwrap_err();
        assert_eq!(err.as_parse_error().unwrap().original(), Some("maybe"));
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn test_unrecoverable_parse_error_is_not_retried() {
        let model = Arc::new(MockModel::fixed("   "));
        let f = build(yes_no(), model.clone());

        let err = f.invoke(CallArgs::new().arg("claim", "x")).await.unwrap_err();
        assert_eq!(err.as_parse_error(), Some(&ParseError::EmptyResponse));
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn test_second_parse_failure_propagates() {
        let model = Arc::new(MockModel::new(vec!["maybe", "perhaps"]));
        let f = build(yes_no(), model.clone());

        let err = f.invoke(CallArgs::new().arg("claim", "x")).await.unwrap_err();
        assert!(matches!(err, PromptError::Parse { ref function, .. } if function == "facts.is_true"));
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn test_missing_format_instructions_is_config_error() {
        let model = Arc::new(MockModel::fixed("whatever"));
        let f = PromptFunction::builder(FunctionSignature::new("f", "Say something."))
            .settings(settings_with(model.clone()))
            .output_parser(OutputStrategy::custom(Stubborn { instructions: None }))
            .build()
            .unwrap();

        let err = f.invoke(CallArgs::new()).await.unwrap_err();
        assert!(matches!(
            err,
            PromptError::MissingFormatInstructions { parser: "stubborn", .. }
        ));
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn test_recovery_uses_fixed_model() {
        let default = Arc::new(MockModel::fixed("maybe").with_name("default"));
        let fixed = Arc::new(MockModel::new(vec!["maybe", "No"]).with_name("fixed"));
        let f = PromptFunction::builder(yes_no())
            .settings(settings_with(default.clone()))
            .model(fixed.clone())
            .build()
            .unwrap();

        let result = f.invoke(CallArgs::new().arg("claim", "x")).await.unwrap();
        assert_eq!(result.into_value().unwrap(), json!(false));
        assert_eq!(fixed.call_count(), 2);
        assert_eq!(default.call_count(), 0);
    }

    #[tokio::test]
    async fn test_stubborn_parser_fails_after_one_retry() {
        let model = Arc::new(MockModel::fixed("x"));
        let f = PromptFunction::builder(FunctionSignature::new("f", "Say something."))
            .settings(settings_with(model.clone()))
            .output_parser(OutputStrategy::custom(Stubborn {
                instructions: Some("Say it properly.".into()),
            }))
            .build()
            .unwrap();

        let err = f.invoke(CallArgs::new()).await.unwrap_err();
        assert!(err.as_parse_error().is_some());
        assert_eq!(model.call_count(), 2);
    }

    /// Answers unparseably and sets the caller's cancellation flag on the way out.
    struct CancelOnFirstReply {
        flag: Arc<AtomicBool>,
        requests: Mutex<Vec<ModelRequest>>,
    }

    #[async_trait]
    impl LanguageModel for CancelOnFirstReply {
        fn name(&self) -> &str {
            "cancelling"
        }

        async fn complete(
            &self,
            request: &ModelRequest,
            _on_token: Option<TokenCallback<'_>>,
        ) -> Result<ModelResponse> {
            self.requests.lock().unwrap().push(request.clone());
            if request.is_cancelled() {
                return Err(PromptError::Cancelled);
            }
            self.flag.store(true, Ordering::Relaxed);
            Ok(ModelResponse::text("maybe"))
        }
    }

    #[tokio::test]
    async fn test_cancellation_during_recovery() {
        let flag = Arc::new(AtomicBool::new(false));
        let model = Arc::new(CancelOnFirstReply {
            flag: flag.clone(),
            requests: Mutex::new(Vec::new()),
        });
        let f = PromptFunction::builder(yes_no())
            .model(model.clone())
            .build()
            .unwrap();
        let recorder = EventRecorder::new();

        let err = f
            .invoke(
                CallArgs::new()
                    .arg("claim", "x")
                    .cancellation(flag.clone())
                    .callback(recorder.clone()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PromptError::Cancelled));

        let requests = model.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        for request in requests.iter() {
            let sent = request.cancellation.as_ref().unwrap();
            assert!(Arc::ptr_eq(sent, &flag));
        }
        assert!(requests[1].prompt.contains("This is our original response maybe"));

        let events = recorder.events();
        assert!(events.contains(&Event::RetryEnd {
            name: "facts.is_true".into(),
            success: false,
        }));
        assert!(events.contains(&Event::PromptEnd {
            name: "facts.is_true".into(),
            ok: false,
        }));
    }

    #[test]
    fn test_format_placeholder_detection_ignores_spacing() {
        let model = Arc::new(MockModel::fixed("x"));
        let spaced = build(
            FunctionSignature::new("f", "Is this true? {claim}\n{ FORMAT_INSTRUCTIONS }")
                .param("claim")
                .returns(ReturnType::Bool),
            model.clone(),
        );
        assert!(!spaced.lacks_format_placeholder());

        let bare = build(
            FunctionSignature::new("g", "Is this true? {claim}")
                .param("claim")
                .returns(ReturnType::Bool),
            model,
        );
        assert!(bare.lacks_format_placeholder());
    }

    #[tokio::test]
    async fn test_retry_with_spaced_format_placeholder() {
        let model = Arc::new(MockModel::new(vec!["maybe", "No"]));
        let f = build(
            FunctionSignature::new("f", "Is this true? {claim}\n{ FORMAT_INSTRUCTIONS }")
                .param("claim")
                .returns(ReturnType::Bool),
            model.clone(),
        );

        let result = f.invoke(CallArgs::new().arg("claim", "x")).await.unwrap();
        assert_eq!(result.into_value().unwrap(), json!(false));
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn test_argument_errors_surface_before_model_call() {
        let model = Arc::new(MockModel::fixed("x"));
        let f = build(
            FunctionSignature::new("pair", "{a} and {b}")
                .param("a")
                .param_with_default("b", "two"),
            model.clone(),
        );

        let err = f.invoke(CallArgs::new()).await.unwrap_err();
        assert!(matches!(err, PromptError::MissingInput { ref keys, .. } if keys == &vec!["a".to_string()]));

        let err = f
            .invoke(CallArgs::new().arg("a", 1).arg("zeta", 2).arg("alpha", 3))
            .await
            .unwrap_err();
        assert!(
            matches!(err, PromptError::UnexpectedInput { ref keys, .. } if keys == &vec!["alpha".to_string(), "zeta".to_string()])
        );

        let err = f
            .invoke(CallArgs::new().source(json!({"a": 1})).source(json!({"a": 2})))
            .await
            .unwrap_err();
        assert!(matches!(err, PromptError::InvalidArguments { .. }));
        assert_eq!(model.call_count(), 0);

        let ok = f.invoke(CallArgs::new().arg("a", "one")).await.unwrap();
        assert_eq!(ok.into_value().unwrap(), json!("x"));
        assert_eq!(model.prompts(), vec!["one and two"]);
    }

    #[test]
    fn test_blocking_and_async_agree() {
        let replies = || {
            vec![
                MockReply::Text("maybe".into()),
                MockReply::Text("Yes".into()),
            ]
        };
        let blocking = build(yes_no(), Arc::new(MockModel::new(replies())));
        let suspending = build(yes_no(), Arc::new(MockModel::new(replies())));
        let args = CallArgs::new().arg("claim", "water is wet");

        let a = blocking.call(args.clone()).unwrap();
        let b = tokio_test::block_on(suspending.invoke(args)).unwrap();
        assert_eq!(a.into_value(), b.into_value());
    }

    #[test]
    fn test_blocking_and_async_agree_on_function_calls() {
        let reply = || {
            MockModel::new(vec![MockReply::FunctionCall {
                name: "add".into(),
                arguments: json!({"a": 1, "b": 2}),
                text: String::new(),
            }])
        };
        let add = FunctionRef::sync(
            FunctionDefinition::new("add", "add two numbers", json!({"type": "object"})),
            |args: Value| Ok(json!(args["a"].as_i64().unwrap_or(0) + args["b"].as_i64().unwrap_or(0))),
        );
        let sig = FunctionSignature::new("math", "Compute {expr}.").param("expr");
        let blocking = build(sig.clone(), Arc::new(reply()));
        let suspending = build(sig, Arc::new(reply()));
        let args = CallArgs::new().arg("expr", "1 + 2").functions(vec![add]);

        let a = blocking.call(args.clone()).unwrap().into_function_call().unwrap();
        let b = tokio_test::block_on(suspending.invoke(args))
            .unwrap()
            .into_function_call()
            .unwrap();
        assert_eq!(a.output, b.output);
        assert_eq!(a.function_name, b.function_name);
        assert_eq!(a.function_args, b.function_args);
        assert_eq!(a.function.is_some(), b.function.is_some());
        assert_eq!(a.function_async.is_some(), b.function_async.is_some());
        assert_eq!(a.call_function().unwrap(), json!(3));
    }

    #[tokio::test]
    async fn test_call_from_spawn_blocking() {
        let model = Arc::new(MockModel::new(vec!["maybe", "Yes"]));
        let f = Arc::new(build(yes_no(), model.clone()));

        let result = tokio::task::spawn_blocking(move || f.call(CallArgs::new().arg("claim", "x")))
            .await
            .unwrap();
        assert_eq!(result.unwrap().into_value().unwrap(), json!(true));
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn test_call_inside_runtime_runs_on_helper_thread() {
        let f = build(FunctionSignature::new("f", "Hi"), Arc::new(MockModel::fixed("x")));
        let result = f.call(CallArgs::new()).unwrap();
        assert_eq!(result.value().unwrap(), &json!("x"));
    }

    #[tokio::test]
    async fn test_functions_plain_text_answer() {
        let model = Arc::new(MockModel::fixed("No tool needed."));
        let f = build(FunctionSignature::new("chat", "Answer {q}").param("q"), model.clone());
        let tool = FunctionRef::Definition(FunctionDefinition::new("search", "", json!({})));

        let result = f
            .invoke(CallArgs::new().arg("q", "hi").functions(vec![tool]))
            .await
            .unwrap()
            .into_function_call()
            .unwrap();
        assert!(!result.is_function_call());
        assert_eq!(result.output, json!("No tool needed."));
        assert!(result.function.is_none() && result.function_async.is_none());
        assert_eq!(model.requests()[0].functions[0].name, "search");
    }

    #[tokio::test]
    async fn test_function_call_to_declaration_is_invalid() {
        let model = Arc::new(MockModel::new(vec![MockReply::FunctionCall {
            name: "search".into(),
            arguments: json!({"q": "rust"}),
            text: String::new(),
        }]));
        let f = build(FunctionSignature::new("chat", "Answer {q}").param("q"), model);
        let tool = FunctionRef::Definition(FunctionDefinition::new("search", "", json!({})));

        let err = f
            .invoke(CallArgs::new().arg("q", "hi").functions(vec![tool]))
            .await
            .unwrap_err();
        assert!(matches!(err, PromptError::InvalidFunctionReference { .. }));
    }

    #[tokio::test]
    async fn test_async_function_fills_async_slot() {
        let model = Arc::new(MockModel::new(vec![MockReply::FunctionCall {
            name: "echo".into(),
            arguments: json!({"text": "hi"}),
            text: String::new(),
        }]));
        let f = build(FunctionSignature::new("chat", "Answer {q}").param("q"), model);
        let echo = FunctionRef::asynchronous(
            FunctionDefinition::new("echo", "", json!({})),
            |args: Value| async move { Ok(args["text"].clone()) },
        );
        let recorder = EventRecorder::new();

        let result = f
            .invoke(
                CallArgs::new()
                    .arg("q", "hi")
                    .functions(vec![echo])
                    .callback(recorder.clone()),
            )
            .await
            .unwrap()
            .into_function_call()
            .unwrap();
        assert!(result.function.is_none());
        assert_eq!(result.call_function_async().await.unwrap(), json!("hi"));
        assert!(recorder
            .events()
            .iter()
            .any(|e| matches!(e, Event::FunctionCall { function, .. } if function == "echo")));
    }

    #[tokio::test]
    async fn test_functions_parser_forces_call() {
        let schema = json!({
            "type": "object",
            "description": "A person",
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        });
        let model = Arc::new(MockModel::new(vec![MockReply::FunctionCall {
            name: "Person".into(),
            arguments: json!({"name": "Ada"}),
            text: String::new(),
        }]));
        let f = PromptFunction::builder(
            FunctionSignature::new("describe", "Describe {who}.")
                .param("who")
                .returns(ReturnType::Structured {
                    name: "Person".into(),
                    schema,
                }),
        )
        .settings(settings_with(model.clone()))
        .output_parser(OutputStrategy::Functions)
        .build()
        .unwrap();

        let result = f.invoke(CallArgs::new().arg("who", "Ada")).await.unwrap();
        assert_eq!(result.value().unwrap(), &json!({"name": "Ada"}));
        let request = &model.requests()[0];
        assert_eq!(request.function_call.as_deref(), Some("Person"));
        assert_eq!(request.functions.len(), 1);
    }

    #[tokio::test]
    async fn test_capture_without_scope_is_silently_disabled() {
        let model = Arc::new(MockModel::fixed("one two").streaming(true));
        let f = build(FunctionSignature::new("f", "Go.").asynchronous(), model);
        let result = f.invoke(CallArgs::new().capture_stream(true)).await.unwrap();
        assert_eq!(result.into_value().unwrap(), json!("one two"));
        assert!(!StreamingContext::is_active());
    }

    #[tokio::test]
    async fn test_capture_inside_scope_streams_tokens() {
        let model = Arc::new(MockModel::fixed("one two three").streaming(true));
        let f = build(FunctionSignature::new("f", "Go.").asynchronous(), model);
        let recorder = EventRecorder::new();

        let result = StreamingContext::scope(recorder.clone(), f.invoke(CallArgs::new().capture_stream(true)))
            .await
            .unwrap();
        assert_eq!(result.into_value().unwrap(), json!("one two three"));
        assert_eq!(recorder.tokens(), vec!["one ", "two ", "three"]);
    }

    #[test]
    fn test_blocking_call_never_captures() {
        let model = Arc::new(MockModel::fixed("one two").streaming(true));
        let f = build(FunctionSignature::new("f", "Go.").asynchronous(), model);
        let recorder = EventRecorder::new();

        let result = StreamingContext::sync_scope(recorder.clone(), || {
            f.call(CallArgs::new().capture_stream(true))
        })
        .unwrap();
        assert_eq!(result.into_value().unwrap(), json!("one two"));
        assert!(recorder.tokens().is_empty());
    }

    #[test]
    fn test_capture_default_needs_async_signature() {
        let model = Arc::new(MockModel::fixed("x"));
        let sync_fn = PromptFunction::builder(FunctionSignature::new("f", "Go."))
            .settings(settings_with(model.clone()))
            .prompt_type(PromptType::agent_reasoning())
            .build()
            .unwrap();
        assert!(!sync_fn.capture_stream);

        let async_fn = PromptFunction::builder(FunctionSignature::new("f", "Go.").asynchronous())
            .settings(settings_with(model))
            .prompt_type(PromptType::agent_reasoning())
            .build()
            .unwrap();
        assert!(async_fn.capture_stream);
    }

    #[tokio::test]
    async fn test_capture_prefers_streaming_default() {
        let plain = Arc::new(MockModel::fixed("plain").with_name("plain"));
        let streaming = Arc::new(MockModel::fixed("streamed").streaming(true).with_name("streaming"));
        let settings = Settings::builder()
            .default_model(plain)
            .default_streaming_model(streaming)
            .build();
        let f = PromptFunction::builder(FunctionSignature::new("f", "Go.").asynchronous())
            .settings(settings)
            .build()
            .unwrap();
        let recorder = EventRecorder::new();

        let result = StreamingContext::scope(recorder.clone(), f.invoke(CallArgs::new().capture_stream(true)))
            .await
            .unwrap();
        assert_eq!(result.into_value().unwrap(), json!("streamed"));

        let result = f.invoke(CallArgs::new()).await.unwrap();
        assert_eq!(result.into_value().unwrap(), json!("plain"));
    }

    #[tokio::test]
    async fn test_selector_rule_key_per_call_overrides_decoration() {
        let selector = RuleKeySelector::new()
            .rule("fast", Arc::new(MockModel::fixed("fast answer")))
            .rule("deep", Arc::new(MockModel::fixed("deep answer")));
        let settings = Settings::builder().selector(Arc::new(selector)).build();
        let f = PromptFunction::builder(FunctionSignature::new("f", "Go."))
            .settings(settings)
            .selector_rule_key("fast")
            .build()
            .unwrap();

        let result = f.invoke(CallArgs::new()).await.unwrap();
        assert_eq!(result.into_value().unwrap(), json!("fast answer"));

        let result = f.invoke(CallArgs::new().selector_rule_key("deep")).await.unwrap();
        assert_eq!(result.into_value().unwrap(), json!("deep answer"));

        let err = f
            .invoke(CallArgs::new().selector_rule_key("unknown"))
            .await
            .unwrap_err();
        assert!(matches!(err, PromptError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_fixed_model_wins_over_settings() {
        let f = PromptFunction::builder(FunctionSignature::new("f", "Go."))
            .settings(settings_with(Arc::new(MockModel::fixed("default"))))
            .model(Arc::new(MockModel::fixed("fixed")))
            .build()
            .unwrap();
        let result = f.invoke(CallArgs::new()).await.unwrap();
        assert_eq!(result.into_value().unwrap(), json!("fixed"));
    }

    #[tokio::test]
    async fn test_model_errors_pass_through() {
        let model = Arc::new(MockModel::new(vec![MockReply::Error("overloaded".into())]));
        let f = build(FunctionSignature::new("f", "Go."), model.clone());
        let recorder = EventRecorder::new();

        let err = f
            .invoke(CallArgs::new().callback(recorder.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, PromptError::Model(ref m) if m == "overloaded"));
        assert_eq!(model.call_count(), 1);
        assert!(recorder
            .events()
            .contains(&Event::PromptEnd { name: "f".into(), ok: false }));
    }

    #[test]
    fn test_template_errors_surface_at_build() {
        let err = PromptFunction::builder(FunctionSignature::new("broken", "Hello {name"))
            .build()
            .unwrap_err();
        assert!(matches!(err, PromptError::Template(ref m) if m.starts_with("broken")));
    }

    #[tokio::test]
    async fn test_no_model_is_config_error() {
        let f = PromptFunction::builder(FunctionSignature::new("f", "Go."))
            .build()
            .unwrap();
        let err = f.invoke(CallArgs::new()).await.unwrap_err();
        assert!(matches!(err, PromptError::InvalidConfig(_)));
    }

    #[test]
    fn test_parse_as_typed() {
        #[derive(serde::Deserialize, PartialEq, Debug)]
        struct Point {
            x: i64,
            y: i64,
        }
        let result = InvocationResult::Value(json!({"x": 1, "y": 2}));
        assert_eq!(result.parse_as::<Point>().unwrap(), Point { x: 1, y: 2 });
    }
}
