//! Mock model for testing without a live LLM.
//!
//! [`MockModel`] returns pre-configured replies in order and records every
//! request it receives, so tests can assert on rendered prompts, stop
//! tokens and offered functions.
//!
//! # Example
//!
//! ```
//! use llm_prompt_fn::model::MockModel;
//!
//! let mock = MockModel::fixed("Hello, world!");
//! assert_eq!(mock.call_count(), 0);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::{FunctionCallInfo, LanguageModel, ModelRequest, ModelResponse, TokenCallback};
use crate::error::Result;
use crate::PromptError;

/// One canned reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Plain text completion.
    Text(String),
    /// Native function call, with optional accompanying text.
    FunctionCall {
        name: String,
        arguments: Value,
        text: String,
    },
    /// Fail with [`PromptError::Model`].
    Error(String),
}

impl From<&str> for MockReply {
    fn from(text: &str) -> Self {
        MockReply::Text(text.to_string())
    }
}

impl From<String> for MockReply {
    fn from(text: String) -> Self {
        MockReply::Text(text)
    }
}

/// A test model that returns canned replies in order.
///
/// Cycles back to the beginning when all replies have been consumed.
/// When streaming, each whitespace-separated word (with its trailing
/// space) is emitted as one chunk.
#[derive(Debug)]
pub struct MockModel {
    name: String,
    replies: Vec<MockReply>,
    index: AtomicUsize,
    streaming: bool,
    requests: Mutex<Vec<ModelRequest>>,
}

impl MockModel {
    /// Create a mock model with the given canned replies.
    pub fn new<R: Into<MockReply>>(replies: Vec<R>) -> Self {
        assert!(!replies.is_empty(), "MockModel requires at least one reply");
        Self {
            name: "mock".to_string(),
            replies: replies.into_iter().map(Into::into).collect(),
            index: AtomicUsize::new(0),
            streaming: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock that always returns the same text.
    pub fn fixed(response: impl Into<String>) -> Self {
        Self::new(vec![MockReply::Text(response.into())])
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Advertise (and perform) streaming.
    pub fn streaming(mut self, enabled: bool) -> Self {
        self.streaming = enabled;
        self
    }

    /// Number of completions served so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Copies of every request received, in order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Prompts of every request received, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.prompt).collect()
    }

    fn next_reply(&self) -> MockReply {
        let idx = self.index.fetch_add(1, Ordering::Relaxed) % self.replies.len();
        self.replies[idx].clone()
    }
}

fn chunks(text: &str) -> Vec<String> {
    text.split_inclusive(' ').map(str::to_string).collect()
}

#[async_trait]
impl LanguageModel for MockModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn complete(
        &self,
        request: &ModelRequest,
        on_token: Option<TokenCallback<'_>>,
    ) -> Result<ModelResponse> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if request.is_cancelled() {
            return Err(PromptError::Cancelled);
        }

        let response = match self.next_reply() {
            MockReply::Text(text) => ModelResponse::text(text),
            MockReply::FunctionCall {
                name,
                arguments,
                text,
            } => ModelResponse {
                text,
                function_call: Some(FunctionCallInfo { name, arguments }),
                metadata: None,
            },
            MockReply::Error(message) => return Err(PromptError::Model(message)),
        };

        if self.streaming {
            if let Some(on_token) = on_token {
                for chunk in chunks(&response.text) {
                    on_token(chunk);
                }
            }
        }
        Ok(response)
    }
}
