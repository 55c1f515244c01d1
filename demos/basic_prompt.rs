//! Example: a prompt function with a list parser and a yes/no parser.
//!
//! Runs against Ollama when `OLLAMA_URL` is set, otherwise against canned
//! replies.
//!
//! Run with: `cargo run --example basic_prompt`

use llm_prompt_fn::model::MockModel;
use llm_prompt_fn::signature::{FunctionSignature, ReturnType};
use llm_prompt_fn::{CallArgs, PromptFunction, Settings};
use std::sync::Arc;

fn settings() -> Settings {
    match std::env::var("OLLAMA_URL") {
        Ok(url) => Settings::ollama(url, "llama3"),
        Err(_) => Settings::builder()
            .default_model(Arc::new(MockModel::new(vec![
                "- Bean There\n- Brew Haven\n- Daily Grind",
                "maybe",
                "Yes",
            ])))
            .verbose(true)
            .build(),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "llm_prompt_fn=info".into()),
        )
        .init();

    let settings = settings();

    let suggest_names = PromptFunction::builder(
        FunctionSignature::new(
            "suggest_names",
            r#"
            Suggest {count} names for a {business}.
            {? The owner likes {style} names.?}
            {FORMAT_INSTRUCTIONS}
            "#,
        )
        .in_module("demo")
        .param("business")
        .param("style")
        .param_with_default("count", 3)
        .returns(ReturnType::List),
    )
    .settings(settings.clone())
    .build()?;

    let names = suggest_names.call(CallArgs::new().arg("business", "coffee shop"))?;
    println!("Names: {}", names.value().cloned().unwrap_or_default());

    // "maybe" fails the boolean parser; the model is asked once to reformat.
    let is_catchy = PromptFunction::builder(
        FunctionSignature::new(
            "is_catchy",
            "Is \"{name}\" a catchy name for a coffee shop?\n{FORMAT_INSTRUCTIONS}",
        )
        .in_module("demo")
        .param("name")
        .returns(ReturnType::Bool),
    )
    .settings(settings)
    .build()?;

    let catchy = is_catchy.call(CallArgs::new().arg("name", "Bean There"))?;
    println!("Catchy: {}", catchy.value().cloned().unwrap_or_default());

    Ok(())
}
