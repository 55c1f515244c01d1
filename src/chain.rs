//! The chain: one rendered prompt, one model call.
//!
//! A prompt function binds its template, model and calling protocol into a
//! [`ChainBinding`] and hands it to a [`ChainExecutor`] together with the
//! assembled inputs. The executor renders the prompt, runs the model
//! (streaming chunks to the capture handler when one is active) and reports
//! the raw text plus any function call the model made.
//!
//! ```text
//! InvocationRequest ─► render ─► ModelRequest ─► LanguageModel ─► ChainOutput
//!        │                                            │
//!     memory.load                              Token events
//! ```

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::events::Event;
use crate::function::FunctionRef;
use crate::inputs::InvocationRequest;
use crate::model::{ChatMessage, FunctionCallInfo, LanguageModel, ModelRequest};
use crate::template::TemplateDescriptor;
use crate::PromptError;

/// Calling protocol for one invocation.
#[derive(Debug, Clone, Default)]
pub enum ChainVariant {
    /// Text completion.
    #[default]
    Plain,
    /// Native function calling with the given functions offered to the model.
    FunctionCalling {
        functions: Vec<FunctionRef>,
        /// Force a call to this function.
        forced: Option<String>,
    },
}

/// Everything the executor needs to know about the prompt function.
#[derive(Debug, Clone)]
pub struct ChainBinding {
    /// Qualified name of the prompt function.
    pub function: String,
    pub descriptor: Arc<TemplateDescriptor>,
    pub model: Arc<dyn LanguageModel>,
    pub variant: ChainVariant,
    pub format_instructions_key: String,
}

/// What one chain run produced.
#[derive(Debug, Clone)]
pub struct ChainOutput {
    /// The rendered prompt.
    pub prompt: String,
    /// The raw text completion.
    pub text: String,
    pub message: ChatMessage,
    /// The offered function matching the model's call.
    pub function: Option<FunctionRef>,
    pub function_call: Option<FunctionCallInfo>,
    /// Provider metadata, passed through unchanged.
    pub metadata: Option<Value>,
}

/// Runs a bound prompt against its model.
#[async_trait]
pub trait ChainExecutor: Send + Sync {
    async fn execute(&self, binding: &ChainBinding, request: &InvocationRequest) -> Result<ChainOutput>;

    /// Plain single-prompt completion, used by format recovery.
    async fn predict(
        &self,
        model: Arc<dyn LanguageModel>,
        prompt: String,
        cancellation: Option<Arc<AtomicBool>>,
    ) -> Result<String> {
        let mut request = ModelRequest::prompt(prompt);
        request.cancellation = cancellation;
        Ok(model.complete(&request, None).await?.text)
    }
}

/// The default [`ChainExecutor`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LlmChain;

impl LlmChain {
    pub fn new() -> Self {
        Self
    }
}

fn model_request(binding: &ChainBinding, request: &InvocationRequest, prompt: String) -> ModelRequest {
    let (functions, forced) = match &binding.variant {
        ChainVariant::Plain => (Vec::new(), None),
        ChainVariant::FunctionCalling { functions, forced } => (
            functions.iter().map(FunctionRef::definition).collect(),
            forced.clone(),
        ),
    };
    ModelRequest {
        prompt,
        stop: request.stop.clone(),
        functions,
        function_call: forced,
        cancellation: request.cancellation.clone(),
    }
}

#[async_trait]
impl ChainExecutor for LlmChain {
    async fn execute(&self, binding: &ChainBinding, request: &InvocationRequest) -> Result<ChainOutput> {
        let mut inputs = request.inputs.clone();
        if let Some(memory) = &request.memory {
            inputs.insert(memory.memory_key().to_string(), memory.load().await?);
        }
        if inputs
            .get(&binding.format_instructions_key)
            .is_some_and(Value::is_null)
        {
            let instructions = binding
                .descriptor
                .output_parser
                .as_ref()
                .and_then(|p| p.format_instructions())
                .unwrap_or_default();
            inputs.insert(
                binding.format_instructions_key.clone(),
                Value::String(instructions),
            );
        }

        let prompt = binding.descriptor.render(&inputs)?;
        let model_request = model_request(binding, request, prompt.clone());
        if model_request.is_cancelled() {
            return Err(PromptError::Cancelled);
        }
        debug!(
            function = %binding.function,
            model = binding.model.name(),
            functions = model_request.functions.len(),
            "running chain"
        );

        let response = match &request.stream_handler {
            Some(handler) => {
                let handler = handler.clone();
                let name = binding.function.clone();
                let mut on_token = move |chunk: String| {
                    handler.on_event(Event::Token {
                        name: name.clone(),
                        chunk,
                    });
                };
                binding
                    .model
                    .complete(&model_request, Some(&mut on_token))
                    .await?
            }
            None => binding.model.complete(&model_request, None).await?,
        };

        let function = match (&binding.variant, &response.function_call) {
            (ChainVariant::FunctionCalling { functions, .. }, Some(call)) => {
                functions.iter().find(|f| f.name() == call.name).cloned()
            }
            _ => None,
        };

        if let Some(memory) = &request.memory {
            let saved = match &response.function_call {
                Some(call) if response.text.is_empty() => serde_json::to_string(call)?,
                _ => response.text.clone(),
            };
            memory.save(&request.inputs, &saved).await?;
        }

        Ok(ChainOutput {
            prompt,
            message: response.message(),
            text: response.text,
            function,
            function_call: response.function_call,
            metadata: response.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventRecorder;
    use crate::function::FunctionDefinition;
    use crate::memory::{BufferMemory, Memory};
    use crate::model::{MockModel, MockReply};
    use crate::output_parser::{ListOutputParser, OutputParser};
    use crate::template::TemplateFormat;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn binding(template: &str, model: Arc<dyn LanguageModel>, variant: ChainVariant) -> ChainBinding {
        ChainBinding {
            function: "tests.f".into(),
            descriptor: Arc::new(TemplateDescriptor::parse(template, TemplateFormat::FStringExtra).unwrap()),
            model,
            variant,
            format_instructions_key: "FORMAT_INSTRUCTIONS".into(),
        }
    }

    fn request(pairs: &[(&str, Value)]) -> InvocationRequest {
        InvocationRequest {
            inputs: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_renders_and_returns_text() {
        let model = Arc::new(MockModel::fixed("Cats are great."));
        let b = binding("Write about {topic}.", model.clone(), ChainVariant::Plain);
        let mut req = request(&[("topic", json!("cats"))]);
        req.stop = vec!["\n\n".into()];

        let out = LlmChain.execute(&b, &req).await.unwrap();
        assert_eq!(out.prompt, "Write about cats.");
        assert_eq!(out.text, "Cats are great.");
        assert!(out.function_call.is_none());

        let sent = &model.requests()[0];
        assert_eq!(sent.stop, vec!["\n\n".to_string()]);
        assert!(sent.functions.is_empty());
    }

    #[tokio::test]
    async fn test_null_format_key_filled_from_parser() {
        let model = Arc::new(MockModel::fixed("a\nb"));
        let mut b = binding("List colors.\n{FORMAT_INSTRUCTIONS}", model.clone(), ChainVariant::Plain);
        b.descriptor = Arc::new(
            TemplateDescriptor::parse("List colors.\n{FORMAT_INSTRUCTIONS}", TemplateFormat::FString)
                .unwrap()
                .with_output_parser(Some(Arc::new(ListOutputParser::new()))),
        );
        let req = request(&[("FORMAT_INSTRUCTIONS", Value::Null)]);

        LlmChain.execute(&b, &req).await.unwrap();
        let expected = ListOutputParser::new().format_instructions().unwrap();
        assert_eq!(model.prompts()[0], format!("List colors.\n{}", expected));
    }

    #[tokio::test]
    async fn test_function_calling_matches_offered_function() {
        let model = Arc::new(MockModel::new(vec![MockReply::FunctionCall {
            name: "search".into(),
            arguments: json!({"q": "rust"}),
            text: String::new(),
        }]));
        let search = FunctionRef::Definition(FunctionDefinition::new("search", "web search", json!({})));
        let other = FunctionRef::Definition(FunctionDefinition::new("other", "", json!({})));
        let b = binding(
            "Find {q}",
            model.clone(),
            ChainVariant::FunctionCalling {
                functions: vec![other, search],
                forced: None,
            },
        );

        let out = LlmChain.execute(&b, &request(&[("q", json!("rust"))])).await.unwrap();
        assert_eq!(out.function.unwrap().name(), "search");
        assert_eq!(out.function_call.unwrap().arguments, json!({"q": "rust"}));
        assert_eq!(out.message.function_call.unwrap().name, "search");
        assert_eq!(model.requests()[0].functions.len(), 2);
    }

    #[tokio::test]
    async fn test_forced_function_is_sent() {
        let model = Arc::new(MockModel::fixed("{}"));
        let def = FunctionDefinition::new("Person", "", json!({}));
        let b = binding(
            "Describe {who}",
            model.clone(),
            ChainVariant::FunctionCalling {
                functions: vec![FunctionRef::Definition(def)],
                forced: Some("Person".into()),
            },
        );
        LlmChain.execute(&b, &request(&[("who", json!("Ada"))])).await.unwrap();
        assert_eq!(model.requests()[0].function_call.as_deref(), Some("Person"));
    }

    #[tokio::test]
    async fn test_stream_handler_receives_tokens() {
        let model = Arc::new(MockModel::fixed("one two three").streaming(true));
        let b = binding("Count.", model, ChainVariant::Plain);
        let recorder = EventRecorder::new();
        let mut req = request(&[]);
        req.stream_handler = Some(recorder.clone());

        let out = LlmChain.execute(&b, &req).await.unwrap();
        assert_eq!(recorder.tokens().concat(), out.text);
        assert_eq!(recorder.tokens().len(), 3);
    }

    #[tokio::test]
    async fn test_memory_loaded_and_saved() {
        let memory = Arc::new(BufferMemory::new());
        memory
            .save(&BTreeMap::from([("question".to_string(), json!("hi"))]), "hello")
            .await
            .unwrap();
        let model = Arc::new(MockModel::fixed("fine"));
        let b = binding("{history}\nHuman: {question}", model.clone(), ChainVariant::Plain);
        let mut req = request(&[("question", json!("how are you?"))]);
        req.memory = Some(memory.clone());

        LlmChain.execute(&b, &req).await.unwrap();
        assert_eq!(model.prompts()[0], "Human: hi\nAI: hello\nHuman: how are you?");
        assert_eq!(
            memory.load().await.unwrap(),
            json!("Human: hi\nAI: hello\nHuman: how are you?\nAI: fine")
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_model_call() {
        let model = Arc::new(MockModel::fixed("x"));
        let b = binding("Hi", model.clone(), ChainVariant::Plain);
        let mut req = request(&[]);
        req.cancellation = Some(Arc::new(AtomicBool::new(true)));

        let err = LlmChain.execute(&b, &req).await.unwrap_err();
        assert!(matches!(err, PromptError::Cancelled));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_predict_is_plain_completion() {
        let model: Arc<dyn LanguageModel> = Arc::new(MockModel::fixed("Yes"));
        let text = LlmChain.predict(model, "reformat".into(), None).await.unwrap();
        assert_eq!(text, "Yes");
    }
}
