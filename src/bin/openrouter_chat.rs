//! OpenRouter-backed chat agent.
//!
//! The same adapter that talks to api.openai.com reaches any OpenRouter
//! model through the base-URL override; the run's token usage is reported
//! alongside the answer.

use std::env;
use std::error::Error;

use typed_agent::{Agent, OpenAiModel};

const DEFAULT_MODEL: &str = "deepseek/deepseek-chat:free";

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let model_name = env::var("OPENROUTER_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
    let model = OpenAiModel::openrouter_from_env(model_name)?;

    let mut agent = Agent::builder()
        .model(model)
        .system_prompt("Keep responses under 20 words.")
        .build()?;

    let answer = agent.query("Which model are you?").await?;
    println!("{answer}");

    let usage = agent.usage();
    println!(
        "tokens used: {} (input: {}, output: {})",
        usage.total(),
        usage.input_tokens,
        usage.output_tokens
    );

    Ok(())
}
