//! Structured-output extractor.
//!
//! The smallest structured run: no tools, no dependencies, just a declared
//! result schema the model must satisfy before anything is returned.

use std::env;
use std::error::Error;

use serde::Deserialize;
use serde_json::json;
use typed_agent::{Agent, OpenAiModel, OutputSpec, SchemaError};

#[derive(Debug, Deserialize)]
struct CityLocation {
    city: String,
    country: String,
}

fn city_output() -> Result<OutputSpec, SchemaError> {
    OutputSpec::new("The city and country the user is describing").with_schema(json!({
        "type": "object",
        "properties": {
            "city": {"type": "string"},
            "country": {"type": "string"}
        },
        "required": ["city", "country"],
        "additionalProperties": false
    }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let model_name = env::var("AGENT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
    println!("using model: {model_name}");

    let model = OpenAiModel::from_env(model_name)?;

    let mut agent = Agent::builder()
        .model(model)
        .output(city_output()?)
        .build()?;

    let location: CityLocation = agent.run("The windy city in the US of A").await?;
    println!("{}", location.country);
    println!("{}", location.city);

    Ok(())
}
