//! Tracing output for prompt function invocations.
//!
//! Each invocation logs entry and exit at its prompt type's level. The raw
//! completion and any function-call payload are logged at the same level,
//! or at INFO when the prompt function is verbose.

use serde_json::Value;
use tracing::Level;

use crate::model::FunctionCallInfo;

/// Emit a tracing event at a level only known at runtime.
macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {{
        let level = $level;
        if level == tracing::Level::ERROR {
            tracing::error!($($arg)+)
        } else if level == tracing::Level::WARN {
            tracing::warn!($($arg)+)
        } else if level == tracing::Level::INFO {
            tracing::info!($($arg)+)
        } else if level == tracing::Level::DEBUG {
            tracing::debug!($($arg)+)
        } else {
            tracing::trace!($($arg)+)
        }
    }};
}

pub(crate) struct Diagnostics<'a> {
    function: &'a str,
    prompt_type: &'a str,
    level: Level,
    verbose: bool,
}

impl<'a> Diagnostics<'a> {
    pub fn new(function: &'a str, prompt_type: &'a str, level: Level, verbose: bool) -> Self {
        Self {
            function,
            prompt_type,
            level,
            verbose,
        }
    }

    /// Level for results and payloads.
    pub fn result_level(&self) -> Level {
        result_level(self.level, self.verbose)
    }

    pub fn entering(&self, model: &str) {
        log_at!(
            self.level,
            function = self.function,
            prompt_type = self.prompt_type,
            model,
            "entering prompt function"
        );
    }

    pub fn finished(&self, ok: bool) {
        log_at!(self.level, function = self.function, ok, "prompt function finished");
    }

    pub fn result(&self, text: &str) {
        log_at!(self.result_level(), function = self.function, "result: {}", text);
    }

    pub fn function_call(&self, call: &FunctionCallInfo) {
        log_at!(
            self.result_level(),
            function = self.function,
            "function call: {}\n{}",
            call.name,
            pretty(&call.arguments)
        );
    }

    pub fn retry_result(&self, text: &str) {
        log_at!(self.result_level(), function = self.function, "retry result: {}", text);
    }
}

fn result_level(level: Level, verbose: bool) -> Level {
    if verbose && level > Level::INFO {
        Level::INFO
    } else {
        level
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
