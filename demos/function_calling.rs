//! Example: offering functions to the model and running the one it picks.
//!
//! Run with: `cargo run --example function_calling`

use async_trait::async_trait;
use llm_prompt_fn::events::EventHandler;
use llm_prompt_fn::model::{MockModel, MockReply};
use llm_prompt_fn::signature::FunctionSignature;
use llm_prompt_fn::{CallArgs, FunctionDefinition, FunctionRef, PromptFunction, Settings, Tool};
use serde_json::{json, Value};
use std::sync::Arc;

/// Looks up the weather for a city (single string argument).
struct Weather;

#[async_trait]
impl Tool for Weather {
    fn name(&self) -> &str {
        "weather"
    }

    fn description(&self) -> &str {
        "Current weather for a city"
    }

    fn run(
        &self,
        input: Value,
        _verbose: bool,
        _callbacks: &[Arc<dyn EventHandler>],
    ) -> anyhow::Result<Value> {
        let city = input.as_str().unwrap_or("somewhere");
        Ok(json!(format!("Sunny and 22°C in {}", city)))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "llm_prompt_fn=info".into()),
        )
        .init();

    let model = MockModel::new(vec![
        MockReply::FunctionCall {
            name: "weather".into(),
            arguments: json!({"__arg1": "Lisbon"}),
            text: String::new(),
        },
        MockReply::FunctionCall {
            name: "convert".into(),
            arguments: json!({"celsius": 22}),
            text: String::new(),
        },
    ]);
    let settings = Settings::builder().default_model(Arc::new(model)).build();

    let assistant = PromptFunction::builder(
        FunctionSignature::new("assistant", "Answer the user: {question}")
            .param("question")
            .asynchronous(),
    )
    .settings(settings)
    .build()?;

    let convert = FunctionRef::sync(
        FunctionDefinition::new(
            "convert",
            "Convert Celsius to Fahrenheit",
            json!({
                "type": "object",
                "properties": {"celsius": {"type": "number"}},
                "required": ["celsius"]
            }),
        ),
        |args: Value| {
            let c = args["celsius"].as_f64().unwrap_or_default();
            Ok(json!(c * 9.0 / 5.0 + 32.0))
        },
    );
    let functions = vec![FunctionRef::tool(Weather), convert];

    for question in ["What's the weather in Lisbon?", "What is 22°C in Fahrenheit?"] {
        let result = assistant
            .invoke(
                CallArgs::new()
                    .arg("question", question)
                    .functions(functions.clone()),
            )
            .await?;
        let Some(call) = result.function_call() else {
            continue;
        };
        if !call.is_function_call() {
            println!("{} -> {}", question, call.output_text);
            continue;
        }
        let answer = match &call.function_async {
            Some(_) => call.call_function_async().await?,
            None => call.call_function()?,
        };
        println!(
            "{} -> {}({}) = {}",
            question,
            call.function_name.as_deref().unwrap_or_default(),
            call.function_arguments.clone().unwrap_or_default(),
            answer
        );
    }

    Ok(())
}
