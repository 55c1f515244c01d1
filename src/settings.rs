//! Process-wide defaults for prompt functions, and prompt type profiles.
//!
//! [`Settings`] carries the default models, the global model selector, the
//! chain executor and the template resolver. It is constructed once and
//! shared by every prompt function built with it; cloning is cheap.

use std::fmt;
use std::sync::Arc;

use tracing::Level;

use crate::chain::{ChainExecutor, LlmChain};
use crate::model::{LanguageModel, OllamaModel};
use crate::selector::ModelSelector;
use crate::template::{DocstringResolver, TemplateResolver};

/// Shared configuration for prompt functions.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use llm_prompt_fn::model::MockModel;
/// use llm_prompt_fn::Settings;
///
/// let settings = Settings::builder()
///     .default_model(Arc::new(MockModel::fixed("hi")))
///     .verbose(true)
///     .build();
/// assert!(settings.verbose());
/// ```
#[derive(Clone)]
pub struct Settings {
    inner: Arc<SettingsInner>,
}

struct SettingsInner {
    default_model: Option<Arc<dyn LanguageModel>>,
    default_streaming_model: Option<Arc<dyn LanguageModel>>,
    selector: Option<Arc<dyn ModelSelector>>,
    verbose: bool,
    executor: Arc<dyn ChainExecutor>,
    resolver: Arc<dyn TemplateResolver>,
}

impl Settings {
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::default()
    }

    /// Ollama-backed settings: `model` serves both plain and streaming calls.
    pub fn ollama(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let base_url = base_url.into();
        let model = model.into();
        Self::builder()
            .default_model(Arc::new(OllamaModel::new(base_url.clone(), model.clone())))
            .default_streaming_model(Arc::new(
                OllamaModel::new(base_url, model).with_streaming(true),
            ))
            .build()
    }

    pub fn default_model(&self) -> Option<Arc<dyn LanguageModel>> {
        self.inner.default_model.clone()
    }

    pub fn default_streaming_model(&self) -> Option<Arc<dyn LanguageModel>> {
        self.inner.default_streaming_model.clone()
    }

    pub fn selector(&self) -> Option<Arc<dyn ModelSelector>> {
        self.inner.selector.clone()
    }

    pub fn verbose(&self) -> bool {
        self.inner.verbose
    }

    pub fn executor(&self) -> Arc<dyn ChainExecutor> {
        self.inner.executor.clone()
    }

    pub fn resolver(&self) -> Arc<dyn TemplateResolver> {
        self.inner.resolver.clone()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("default_model", &self.inner.default_model)
            .field("default_streaming_model", &self.inner.default_streaming_model)
            .field("selector", &self.inner.selector.is_some())
            .field("verbose", &self.inner.verbose)
            .finish()
    }
}

/// Builder for [`Settings`].
#[derive(Default)]
pub struct SettingsBuilder {
    default_model: Option<Arc<dyn LanguageModel>>,
    default_streaming_model: Option<Arc<dyn LanguageModel>>,
    selector: Option<Arc<dyn ModelSelector>>,
    verbose: bool,
    executor: Option<Arc<dyn ChainExecutor>>,
    resolver: Option<Arc<dyn TemplateResolver>>,
}

impl SettingsBuilder {
    pub fn default_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.default_model = Some(model);
        self
    }

    /// Model used when a call captures its stream and no selector is configured.
    pub fn default_streaming_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.default_streaming_model = Some(model);
        self
    }

    pub fn selector(mut self, selector: Arc<dyn ModelSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Log results of every prompt function at INFO.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Replace the chain executor. Defaults to [`LlmChain`].
    pub fn executor(mut self, executor: Arc<dyn ChainExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Replace the template resolver. Defaults to [`DocstringResolver`].
    pub fn resolver(mut self, resolver: Arc<dyn TemplateResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn build(self) -> Settings {
        Settings {
            inner: Arc::new(SettingsInner {
                default_model: self.default_model,
                default_streaming_model: self.default_streaming_model,
                selector: self.selector,
                verbose: self.verbose,
                executor: self.executor.unwrap_or_else(|| Arc::new(LlmChain)),
                resolver: self.resolver.unwrap_or_else(|| Arc::new(DocstringResolver)),
            }),
        }
    }
}

/// Logging and selection profile for a family of prompt functions.
///
/// ```
/// use llm_prompt_fn::settings::PromptType;
/// use tracing::Level;
///
/// let reasoning = PromptType::agent_reasoning();
/// assert_eq!(reasoning.capture_stream, Some(true));
/// assert_eq!(PromptType::undefined().as_verbose().log_level, Level::INFO);
/// ```
#[derive(Clone)]
pub struct PromptType {
    pub name: String,
    /// Level for entry, exit and result logs.
    pub log_level: Level,
    /// Default for stream capture; a builder setting wins over it.
    pub capture_stream: Option<bool>,
    /// Overrides the global selector.
    pub selector: Option<Arc<dyn ModelSelector>>,
}

impl PromptType {
    pub fn new(name: impl Into<String>, log_level: Level) -> Self {
        Self {
            name: name.into(),
            log_level,
            capture_stream: None,
            selector: None,
        }
    }

    pub fn undefined() -> Self {
        Self::new("undefined", Level::DEBUG)
    }

    pub fn agent_reasoning() -> Self {
        Self::new("agent_reasoning", Level::INFO).with_capture_stream(true)
    }

    pub fn tool() -> Self {
        Self::new("tool", Level::INFO)
    }

    pub fn final_output() -> Self {
        Self::new("final_output", Level::INFO)
    }

    pub fn with_capture_stream(mut self, enabled: bool) -> Self {
        self.capture_stream = Some(enabled);
        self
    }

    pub fn with_selector(mut self, selector: Arc<dyn ModelSelector>) -> Self {
        self.selector = Some(selector);
        self
    }

    /// This profile, logging at INFO or louder.
    pub fn as_verbose(mut self) -> Self {
        if self.log_level > Level::INFO {
            self.log_level = Level::INFO;
        }
        self
    }
}

impl Default for PromptType {
    fn default() -> Self {
        Self::undefined()
    }
}

impl fmt::Debug for PromptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromptType")
            .field("name", &self.name)
            .field("log_level", &self.log_level)
            .field("capture_stream", &self.capture_stream)
            .field("selector", &self.selector.is_some())
            .finish()
    }
}
