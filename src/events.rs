//! Lifecycle and streaming hooks for prompt functions.
//!
//! Callers observe an invocation by passing [`EventHandler`]s as callbacks.
//! The same trait receives captured stream tokens when an invocation runs
//! inside a [`StreamingContext`](crate::streaming_context::StreamingContext).

use std::sync::Arc;

use serde_json::Value;

/// Events emitted while a prompt function runs.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// An invocation has started.
    PromptStart {
        /// Qualified name of the prompt function.
        name: String,
        /// Name of the model chosen for this invocation.
        model: String,
    },
    /// An output chunk arrived from a streaming model.
    Token {
        name: String,
        chunk: String,
    },
    /// An invocation has finished.
    PromptEnd {
        name: String,
        ok: bool,
    },
    /// The output could not be parsed; a format-recovery call is starting.
    RetryStart {
        name: String,
        /// The parse failure that triggered the retry.
        reason: String,
    },
    /// The format-recovery call has finished.
    RetryEnd {
        name: String,
        success: bool,
    },
    /// The model asked to call a function.
    FunctionCall {
        name: String,
        function: String,
        arguments: Value,
    },
}

impl Event {
    /// The prompt function the event belongs to.
    pub fn prompt_name(&self) -> &str {
        match self {
            Event::PromptStart { name, .. }
            | Event::Token { name, .. }
            | Event::PromptEnd { name, .. }
            | Event::RetryStart { name, .. }
            | Event::RetryEnd { name, .. }
            | Event::FunctionCall { name, .. } => name,
        }
    }
}

/// Receiver for prompt function events.
///
/// # Example
///
/// ```
/// use llm_prompt_fn::events::{Event, EventHandler};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: Event) {
///         match event {
///             Event::Token { chunk, .. } => print!("{}", chunk),
///             Event::PromptEnd { name, ok } => println!("[end] {} ok={}", name, ok),
///             _ => {}
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: Event);
}

/// Send an event to every handler, in order.
pub(crate) fn emit(handlers: &[Arc<dyn EventHandler>], event: Event) {
    match handlers {
        [] => {}
        [only] => only.on_event(event),
        many => {
            for h in many {
                h.on_event(event.clone());
            }
        }
    }
}

/// An [`EventHandler`] backed by a closure.
///
/// ```
/// use llm_prompt_fn::events::{Event, FnEventHandler};
/// use std::sync::Arc;
///
/// let handler = Arc::new(FnEventHandler(|event: Event| {
///     if let Event::Token { chunk, .. } = event {
///         print!("{}", chunk);
///     }
/// }));
/// ```
pub struct FnEventHandler<F: Fn(Event) + Send + Sync>(pub F);

impl<F: Fn(Event) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: Event) {
        (self.0)(event);
    }
}

/// Handler that records every event, for tests and demos.
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: std::sync::Mutex<Vec<Event>>,
}

impl EventRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Chunks of every recorded [`Event::Token`], in order.
    pub fn tokens(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Token { chunk, .. } => Some(chunk),
                _ => None,
            })
            .collect()
    }
}

impl EventHandler for EventRecorder {
    fn on_event(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
