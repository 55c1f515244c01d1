//! Language-model collaborator trait and normalized request/response types.
//!
//! The [`LanguageModel`] trait abstracts over providers. A prompt function
//! never talks HTTP itself: the chain renders a prompt into a
//! [`ModelRequest`], the model returns a [`ModelResponse`] holding either
//! text or a native function call.
//!
//! ```text
//! LlmChain ──► ModelRequest ──► LanguageModel::complete() ──► ModelResponse
//!                                        │
//!                             ┌──────────┴──────────┐
//!                         OllamaModel           MockModel
//!                         /api/chat             canned replies
//! ```

pub mod mock;
pub mod ollama;

pub use mock::{MockModel, MockReply};
pub use ollama::OllamaModel;

use crate::error::Result;
use crate::function::FunctionDefinition;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Callback receiving incremental output chunks, in delivery order.
pub type TokenCallback<'a> = &'a mut (dyn FnMut(String) + Send);

/// Generation settings for HTTP-backed models.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Temperature (0.0 = deterministic, 1.0 = creative).
    pub temperature: f64,

    /// Maximum tokens to generate.
    pub max_tokens: u32,

    /// Request JSON format output from the model.
    pub json_mode: bool,

    /// Custom options merged into the provider options object.
    pub options: Option<Value>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2048,
            json_mode: false,
            options: None,
        }
    }
}

impl ModelConfig {
    pub fn with_temperature(mut self, temp: f64) -> Self {
        self.temperature = temp;
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = tokens;
        self
    }

    pub fn with_json_mode(mut self, enabled: bool) -> Self {
        self.json_mode = enabled;
        self
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = Some(options);
        self
    }
}

/// The role of a chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// User input.
    User,
    /// Assistant (model) response.
    Assistant,
}

/// The name and arguments of a function the model asked to call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallInfo {
    pub name: String,
    /// Arguments, normally a JSON object.
    pub arguments: Value,
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCallInfo>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            function_call: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            function_call: None,
        }
    }
}

/// A normalized model request.
#[derive(Debug, Clone, Default)]
pub struct ModelRequest {
    /// The rendered prompt, sent as a single user message.
    pub prompt: String,

    /// Stop sequences.
    pub stop: Vec<String>,

    /// Functions offered to the model through native function calling.
    pub functions: Vec<FunctionDefinition>,

    /// Force a call to this function.
    pub function_call: Option<String>,

    /// Opaque cancellation flag from the caller.
    pub cancellation: Option<Arc<AtomicBool>>,
}

impl ModelRequest {
    /// A plain single-shot completion request.
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed))
    }
}

/// A normalized model response.
#[derive(Debug, Clone, Default)]
pub struct ModelResponse {
    /// The generated text content.
    pub text: String,

    /// Native function call, if the model made one.
    pub function_call: Option<FunctionCallInfo>,

    /// Provider-specific metadata (token counts, timing, model info).
    pub metadata: Option<Value>,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// The response as an assistant chat message.
    pub fn message(&self) -> ChatMessage {
        ChatMessage {
            role: Role::Assistant,
            content: self.text.clone(),
            function_call: self.function_call.clone(),
        }
    }
}

/// Abstraction over language-model providers.
///
/// This trait is object-safe and designed to be used as `Arc<dyn LanguageModel>`.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Human-readable name for logging and diagnostics.
    fn name(&self) -> &str;

    /// Whether [`complete`](Self::complete) delivers incremental chunks to `on_token`.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Run one completion. When `on_token` is given and the model streams,
    /// each chunk is passed to it as it arrives.
    async fn complete(
        &self,
        request: &ModelRequest,
        on_token: Option<TokenCallback<'_>>,
    ) -> Result<ModelResponse>;
}

impl std::fmt::Debug for dyn LanguageModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LanguageModel({})", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_cancellation_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let mut request = ModelRequest::prompt("hi");
        assert!(!request.is_cancelled());
        request.cancellation = Some(flag.clone());
        flag.store(true, Ordering::Relaxed);
        assert!(request.is_cancelled());
    }

    #[test]
    fn test_response_message_carries_function_call() {
        let response = ModelResponse {
            text: String::new(),
            function_call: Some(FunctionCallInfo {
                name: "search".into(),
                arguments: json!({"q": "rust"}),
            }),
            metadata: None,
        };
        let message = response.message();
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.function_call.unwrap().name, "search");
    }

    #[test]
    fn test_message_serializes_role_lowercase() {
        let value = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert_eq!(value, json!({"role": "user", "content": "hi"}));
    }
}
