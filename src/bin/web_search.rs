//! Web-search assistant.
//!
//! One search tool against the Brave Search API: without a key it returns a
//! fixed placeholder so the example stays runnable, an empty result set asks
//! the model to rephrase, and the current date is interpolated into the
//! system prompt.

use std::env;
use std::error::Error;
use std::time::Duration;

use serde_json::{Value, json};
use typed_agent::{
    Agent, OpenAiModel, SchemaError, SideEffects, ToolError, ToolOutcome, ToolSpec,
};

const SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";
const KEYLESS_PLACEHOLDER: &str = "This is a test web search result. Please provide a valid \
                                   Brave API key to get real search results.";

#[derive(Clone, Debug)]
struct SearchDeps {
    client: reqwest::Client,
    brave_api_key: Option<String>,
}

fn search_web_tool() -> Result<ToolSpec, SchemaError> {
    Ok(ToolSpec::new(
        "search_web",
        "Search the web for the given query to answer the user's question.",
    )
    .with_schema(json!({
        "type": "object",
        "properties": {
            "web_query": {"type": "string"}
        },
        "required": ["web_query"],
        "additionalProperties": false
    }))?
    .with_side_effects(SideEffects::ReadOnlyNetwork)
    .with_handler(|args, deps| {
        let deps = deps.get::<SearchDeps>();
        async move {
            let deps = deps.ok_or(ToolError::MissingDependency("SearchDeps"))?;
            let web_query = args
                .get("web_query")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ToolError::Execution("web_query missing".to_string()))?
                .to_string();

            let Some(api_key) = deps.brave_api_key.clone() else {
                return Ok(ToolOutcome::Text(KEYLESS_PLACEHOLDER.to_string()));
            };

            // Free-tier rate limit.
            tokio::time::sleep(Duration::from_secs(1)).await;

            tracing::info!(%web_query, "calling Brave search API");
            let response = deps
                .client
                .get(SEARCH_URL)
                .query(&[
                    ("q", web_query.as_str()),
                    ("count", "3"),
                    ("text_decorations", "true"),
                    ("search_lang", "en"),
                ])
                .header("X-Subscription-Token", api_key)
                .header("Accept", "application/json")
                .send()
                .await
                .map_err(|err| ToolError::Execution(err.to_string()))?
                .error_for_status()
                .map_err(|err| ToolError::Execution(err.to_string()))?;
            let data: Value = response
                .json()
                .await
                .map_err(|err| ToolError::Execution(err.to_string()))?;

            match format_results(&data) {
                Some(results) => Ok(ToolOutcome::Text(results)),
                None => Ok(ToolOutcome::Retry(format!(
                    "no results found for the query '{web_query}'"
                ))),
            }
        }
    }))
}

/// Renders the top web results as title/summary/source blocks; `None` when
/// the response carries no usable result.
fn format_results(data: &Value) -> Option<String> {
    let web_results = data
        .get("web")
        .and_then(|web| web.get("results"))
        .and_then(Value::as_array)?;

    let mut results = Vec::new();
    for item in web_results.iter().take(3) {
        let title = item.get("title").and_then(Value::as_str).unwrap_or("");
        let description = item
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("");
        let url = item.get("url").and_then(Value::as_str).unwrap_or("");
        if !title.is_empty() && !description.is_empty() {
            results.push(format!(
                "Title: {title}\nSummary: {description}\nSource: {url}\n"
            ));
        }
    }

    if results.is_empty() {
        None
    } else {
        Some(results.join("\n"))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let model_name = env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
    let model = OpenAiModel::from_env(model_name)?;

    let today = chrono::Local::now().format("%Y-%m-%d");
    let mut agent = Agent::builder()
        .model(model)
        .system_prompt(format!(
            "You are an expert at researching the web to answer user questions. \
             The current date is: {today}"
        ))
        .tool(search_web_tool()?)
        .retries(2)
        .dependency(SearchDeps {
            client: reqwest::Client::new(),
            brave_api_key: env::var("BRAVE_API_KEY").ok(),
        })
        .build()?;

    let answer = agent
        .query("Give me some articles talking about Acra and Singapore")
        .await?;
    println!("Response: {answer}");

    Ok(())
}
