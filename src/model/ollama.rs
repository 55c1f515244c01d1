//! Model backed by Ollama's native `/api/chat` endpoint.
//!
//! Function calling uses Ollama's `tools` field; streaming uses NDJSON with
//! one `{"message": {"content": "token"}}` object per line.

use super::{
    FunctionCallInfo, LanguageModel, ModelConfig, ModelRequest, ModelResponse, TokenCallback,
};
use crate::error::Result;
use crate::streaming::StreamingDecoder;
use crate::PromptError;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

/// A [`LanguageModel`] talking to an Ollama server.
///
/// # Example
///
/// ```
/// use llm_prompt_fn::model::{ModelConfig, OllamaModel};
///
/// let model = OllamaModel::new("http://localhost:11434", "llama3.2:3b")
///     .with_config(ModelConfig::default().with_temperature(0.2))
///     .with_streaming(true);
/// ```
#[derive(Debug, Clone)]
pub struct OllamaModel {
    client: Client,
    base_url: String,
    model: String,
    config: ModelConfig,
    streaming: bool,
}

impl OllamaModel {
    /// Create a model using a default HTTP client with a 60 second timeout.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: normalize_base_url(&base_url.into()),
            model: model.into(),
            config: ModelConfig::default(),
            streaming: false,
        }
    }

    /// Use a custom HTTP client (its own timeout applies).
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_config(mut self, config: ModelConfig) -> Self {
        self.config = config;
        self
    }

    /// Enable token streaming when a token callback is supplied.
    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.streaming = enabled;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Build the Ollama `options` object from the config and stop tokens.
    fn build_options(&self, request: &ModelRequest) -> Value {
        let mut opts = json!({
            "temperature": self.config.temperature,
            "num_predict": self.config.max_tokens,
        });
        if !request.stop.is_empty() {
            opts["stop"] = json!(request.stop);
        }
        if let Some(ref custom) = self.config.options {
            if let (Some(base), Some(extra)) = (opts.as_object_mut(), custom.as_object()) {
                for (k, v) in extra {
                    base.insert(k.clone(), v.clone());
                }
            }
        }
        opts
    }

    /// Build the JSON body for `/api/chat`.
    fn build_body(&self, request: &ModelRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": request.prompt}],
            "stream": stream,
            "options": self.build_options(request),
        });

        // Ollama has no "force this function"; offering only that one is the closest
        let functions = request.functions.iter().filter(|f| {
            request
                .function_call
                .as_ref()
                .map_or(true, |forced| &f.name == forced)
        });
        let tools: Vec<Value> = functions
            .map(|f| {
                json!({
                    "type": "function",
                    "function": {
                        "name": f.name,
                        "description": f.description,
                        "parameters": f.parameters,
                    }
                })
            })
            .collect();
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools);
        }
        if self.config.json_mode {
            body["format"] = json!("json");
        }
        body
    }

    fn url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        let url = self.url();
        let resp = self.client.post(&url).json(body).send().await.map_err(|e| {
            warn!(url = %url, error = %e, "failed to reach Ollama");
            PromptError::Request(e)
        })?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(PromptError::HttpError { status, body: text });
        }
        Ok(resp)
    }

    /// Extract the first tool call from a chat message.
    fn extract_function_call(message: &Value) -> Option<FunctionCallInfo> {
        let call = message.get("tool_calls")?.as_array()?.first()?.get("function")?;
        let name = call.get("name")?.as_str()?.to_string();
        let arguments = match call.get("arguments") {
            // some servers send the arguments as a JSON string
            Some(Value::String(s)) => serde_json::from_str(s).unwrap_or(Value::String(s.clone())),
            Some(v) => v.clone(),
            None => json!({}),
        };
        Some(FunctionCallInfo { name, arguments })
    }

    /// Extract metadata fields from an Ollama response.
    fn extract_metadata(json_resp: &Value) -> Option<Value> {
        let meta: serde_json::Map<String, Value> = [
            "total_duration",
            "eval_count",
            "eval_duration",
            "prompt_eval_count",
            "model",
        ]
        .iter()
        .filter_map(|k| json_resp.get(*k).map(|v| (k.to_string(), v.clone())))
        .collect();
        if meta.is_empty() {
            None
        } else {
            Some(Value::Object(meta))
        }
    }

    async fn complete_streaming(
        &self,
        request: &ModelRequest,
        on_token: TokenCallback<'_>,
    ) -> Result<ModelResponse> {
        let resp = self.send(&self.build_body(request, true)).await?;
        let mut stream = resp.bytes_stream();
        let mut decoder = StreamingDecoder::new();
        let mut response = ModelResponse::default();

        let mut handle = |line: Value, response: &mut ModelResponse| {
            if let Some(message) = line.get("message") {
                if let Some(t) = message.get("content").and_then(|c| c.as_str()) {
                    if !t.is_empty() {
                        response.text.push_str(t);
                        on_token(t.to_string());
                    }
                }
                if response.function_call.is_none() {
                    response.function_call = Self::extract_function_call(message);
                }
            }
            if line.get("done").and_then(|v| v.as_bool()) == Some(true) {
                response.metadata = Self::extract_metadata(&line);
            }
        };

        while let Some(chunk) = stream.next().await {
            if request.is_cancelled() {
                return Err(PromptError::Cancelled);
            }
            let chunk = chunk.map_err(PromptError::Request)?;
            for line in decoder.decode(&chunk) {
                handle(line, &mut response);
            }
        }
        if let Some(line) = decoder.flush() {
            handle(line, &mut response);
        }
        Ok(response)
    }
}

#[async_trait]
impl LanguageModel for OllamaModel {
    fn name(&self) -> &str {
        &self.model
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn complete(
        &self,
        request: &ModelRequest,
        on_token: Option<TokenCallback<'_>>,
    ) -> Result<ModelResponse> {
        if request.is_cancelled() {
            return Err(PromptError::Cancelled);
        }

        if let (true, Some(on_token)) = (self.streaming, on_token) {
            return self.complete_streaming(request, on_token).await;
        }

        let resp = self.send(&self.build_body(request, false)).await?;
        let json_resp: Value = resp.json().await?;
        let message = json_resp.get("message").cloned().unwrap_or(Value::Null);
        let text = message
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        Ok(ModelResponse {
            text,
            function_call: Self::extract_function_call(&message),
            metadata: Self::extract_metadata(&json_resp),
        })
    }
}

/// Strip known path suffixes so `/api/chat` is not appended twice.
fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    for suffix in ["/api/chat", "/api/generate", "/api"] {
        if let Some(stripped) = trimmed.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::FunctionDefinition;

    fn model() -> OllamaModel {
        OllamaModel::new("http://localhost:11434", "llama3.2")
    }

    #[test]
    fn test_chat_body() {
        let mut request = ModelRequest::prompt("Why is the sky blue?");
        request.stop = vec!["\n\n".into()];
        let body = model().build_body(&request, false);

        assert_eq!(body["model"], "llama3.2");
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "Why is the sky blue?");
        assert_eq!(body["options"]["temperature"], 0.7);
        assert_eq!(body["options"]["stop"], json!(["\n\n"]));
        assert!(body.get("tools").is_none());
        assert!(body.get("format").is_none());
    }

    #[test]
    fn test_tools_and_forced_function() {
        let mut request = ModelRequest::prompt("x");
        request.functions = vec![
            FunctionDefinition::new("a", "first", json!({"type": "object"})),
            FunctionDefinition::new("b", "second", json!({"type": "object"})),
        ];
        let body = model().build_body(&request, false);
        assert_eq!(body["tools"].as_array().unwrap().len(), 2);

        request.function_call = Some("b".into());
        let body = model().build_body(&request, false);
        let tools = body["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["function"]["name"], "b");
    }

    #[test]
    fn test_custom_options_and_json_mode() {
        let m = model().with_config(
            ModelConfig::default()
                .with_json_mode(true)
                .with_options(json!({"seed": 42})),
        );
        let body = m.build_body(&ModelRequest::prompt("x"), true);
        assert_eq!(body["format"], "json");
        assert_eq!(body["options"]["seed"], 42);
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn test_extract_function_call_object_and_string_args() {
        let msg = json!({"tool_calls": [{"function": {"name": "f", "arguments": {"x": 1}}}]});
        let call = OllamaModel::extract_function_call(&msg).unwrap();
        assert_eq!(call.arguments["x"], 1);

        let msg = json!({"tool_calls": [{"function": {"name": "f", "arguments": "{\"x\": 2}"}}]});
        let call = OllamaModel::extract_function_call(&msg).unwrap();
        assert_eq!(call.arguments["x"], 2);

        assert!(OllamaModel::extract_function_call(&json!({"content": "hi"})).is_none());
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("http://localhost:11434/api/"), "http://localhost:11434");
        assert_eq!(normalize_base_url("http://localhost:11434/api/chat"), "http://localhost:11434");
        assert_eq!(normalize_base_url("http://localhost:11434"), "http://localhost:11434");
    }

    #[tokio::test]
    async fn test_cancelled_before_send() {
        use std::sync::atomic::AtomicBool;
        use std::sync::Arc;

        let mut request = ModelRequest::prompt("x");
        request.cancellation = Some(Arc::new(AtomicBool::new(true)));
        let err = OllamaModel::new("http://localhost:99999", "m")
            .complete(&request, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PromptError::Cancelled));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_request_error() {
        let err = OllamaModel::new("http://127.0.0.1:1", "m")
            .complete(&ModelRequest::prompt("x"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PromptError::Request(_)));
    }
}
