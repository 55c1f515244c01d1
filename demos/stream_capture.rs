//! Example: capturing the token stream of a prompt function.
//!
//! Run with: `cargo run --example stream_capture`

use llm_prompt_fn::events::{Event, FnEventHandler};
use llm_prompt_fn::model::MockModel;
use llm_prompt_fn::signature::FunctionSignature;
use llm_prompt_fn::{CallArgs, PromptFunction, PromptType, Settings, StreamingContext};
use std::io::Write;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "llm_prompt_fn=warn".into()),
        )
        .init();

    let streaming = MockModel::fixed("A robot dipped its brush in blue and painted the sky it had never seen.")
        .streaming(true);
    let settings = Settings::builder()
        .default_streaming_model(Arc::new(streaming))
        .build();

    // agent_reasoning profiles capture the stream by default.
    let story = PromptFunction::builder(
        FunctionSignature::new("story", "Write a one-line story about {subject}.")
            .param("subject")
            .asynchronous(),
    )
    .prompt_type(PromptType::agent_reasoning())
    .settings(settings)
    .build()?;

    let printer = Arc::new(FnEventHandler(|event: Event| {
        if let Event::Token { chunk, .. } = event {
            print!("{}", chunk);
            let _ = std::io::stdout().flush();
        }
    }));

    let result = StreamingContext::scope(
        printer,
        story.invoke(CallArgs::new().arg("subject", "a robot learning to paint")),
    )
    .await?;
    println!();
    println!("\nFinal: {}", result.value().cloned().unwrap_or_default());

    Ok(())
}
