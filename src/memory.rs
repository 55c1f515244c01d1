//! Conversation memory for prompt functions.
//!
//! A [`Memory`] owns one template input (its `memory_key`). Before the
//! prompt is rendered the chain fills that input from [`Memory::load`];
//! after the model answers, the exchange is recorded with [`Memory::save`].

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::model::{ChatMessage, Role};

#[async_trait]
pub trait Memory: Send + Sync {
    /// The template input this memory provides.
    fn memory_key(&self) -> &str;

    /// Current value for the memory input.
    async fn load(&self) -> Result<Value>;

    /// Record one exchange.
    async fn save(&self, inputs: &BTreeMap<String, Value>, output: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;
}

/// Keeps the whole conversation and renders it as a `Human:` / `AI:` transcript.
///
/// The human side of an exchange is taken from `input_key` when set,
/// otherwise from the only input other than the memory key; with several
/// inputs they are joined as `key: value` lines.
///
/// ```
/// use llm_prompt_fn::memory::{BufferMemory, Memory};
///
/// let memory = BufferMemory::new().with_memory_key("chat_history").with_max_turns(10);
/// assert_eq!(memory.memory_key(), "chat_history");
/// ```
#[derive(Debug)]
pub struct BufferMemory {
    memory_key: String,
    human_prefix: String,
    ai_prefix: String,
    input_key: Option<String>,
    max_turns: Option<usize>,
    messages: Mutex<Vec<ChatMessage>>,
}

impl Default for BufferMemory {
    fn default() -> Self {
        Self {
            memory_key: "history".to_string(),
            human_prefix: "Human".to_string(),
            ai_prefix: "AI".to_string(),
            input_key: None,
            max_turns: None,
            messages: Mutex::new(Vec::new()),
        }
    }
}

impl BufferMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_memory_key(mut self, key: impl Into<String>) -> Self {
        self.memory_key = key.into();
        self
    }

    pub fn with_prefixes(mut self, human: impl Into<String>, ai: impl Into<String>) -> Self {
        self.human_prefix = human.into();
        self.ai_prefix = ai.into();
        self
    }

    /// Take the human message from this input.
    pub fn with_input_key(mut self, key: impl Into<String>) -> Self {
        self.input_key = Some(key.into());
        self
    }

    /// Keep only the most recent `turns` exchanges.
    pub fn with_max_turns(mut self, turns: usize) -> Self {
        self.max_turns = Some(turns);
        self
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }

    fn human_text(&self, inputs: &BTreeMap<String, Value>) -> String {
        if let Some(key) = &self.input_key {
            return inputs.get(key).map(value_text).unwrap_or_default();
        }
        let relevant: Vec<(&String, &Value)> = inputs
            .iter()
            .filter(|(k, v)| *k != &self.memory_key && !v.is_null())
            .collect();
        match relevant.as_slice() {
            [(_, only)] => value_text(only),
            many => many
                .iter()
                .map(|(k, v)| format!("{}: {}", k, value_text(v)))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    fn transcript(&self, messages: &[ChatMessage]) -> String {
        messages
            .iter()
            .map(|m| {
                let prefix = match m.role {
                    Role::Assistant => &self.ai_prefix,
                    _ => &self.human_prefix,
                };
                format!("{}: {}", prefix, m.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Memory for BufferMemory {
    fn memory_key(&self) -> &str {
        &self.memory_key
    }

    async fn load(&self) -> Result<Value> {
        let messages = self.messages();
        Ok(Value::String(self.transcript(&messages)))
    }

    async fn save(&self, inputs: &BTreeMap<String, Value>, output: &str) -> Result<()> {
        let human = self.human_text(inputs);
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(ChatMessage::user(human));
            messages.push(ChatMessage::assistant(output));
            if let Some(max) = self.max_turns {
                let excess = messages.len().saturating_sub(max * 2);
                messages.drain(..excess);
            }
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        if let Ok(mut messages) = self.messages.lock() {
            messages.clear();
        }
        Ok(())
    }
}
