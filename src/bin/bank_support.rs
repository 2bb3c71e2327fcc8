//! Bank support assistant.
//!
//! A support agent with a stub customer database injected as a dependency,
//! a system prompt enriched with the customer's name, one balance tool, and
//! a structured verdict (`support_advice`, `block_card`, `risk` on a 0-10
//! scale) validated before it is surfaced.

use std::env;
use std::error::Error;

use serde::Deserialize;
use serde_json::json;
use typed_agent::{
    Agent, OpenAiModel, OutputSpec, SchemaError, ToolError, ToolOutcome, ToolSpec,
};

/// Stand-in for a real customer database. In reality this would be a
/// connection to an external store such as PostgreSQL.
#[derive(Clone, Debug)]
struct SupportDb;

impl SupportDb {
    async fn customer_name(&self, customer_id: i64) -> Option<String> {
        (customer_id == 123).then(|| "John".to_string())
    }

    async fn customer_balance(
        &self,
        customer_id: i64,
        include_pending: bool,
    ) -> Result<f64, ToolError> {
        if customer_id == 123 {
            let pending = if include_pending { 10.00 } else { 0.00 };
            Ok(123.45 + pending)
        } else {
            Err(ToolError::Execution("customer not found".to_string()))
        }
    }
}

#[derive(Clone, Debug)]
struct SupportDeps {
    customer_id: i64,
    db: SupportDb,
}

#[derive(Debug, Deserialize)]
struct SupportResult {
    support_advice: String,
    block_card: bool,
    risk: i64,
}

fn support_output() -> Result<OutputSpec, SchemaError> {
    OutputSpec::new("The structured support verdict for the customer's query").with_schema(json!({
        "type": "object",
        "properties": {
            "support_advice": {
                "type": "string",
                "description": "Advice returned to the customer"
            },
            "block_card": {
                "type": "boolean",
                "description": "Whether to block their card"
            },
            "risk": {
                "type": "integer",
                "description": "Risk level of query",
                "minimum": 0,
                "maximum": 10
            }
        },
        "required": ["support_advice", "block_card", "risk"],
        "additionalProperties": false
    }))
}

fn customer_balance_tool() -> Result<ToolSpec, SchemaError> {
    Ok(ToolSpec::new(
        "customer_balance",
        "Returns the customer's current account balance.",
    )
    .with_schema(json!({
        "type": "object",
        "properties": {
            "include_pending": {"type": "boolean"}
        },
        "required": ["include_pending"],
        "additionalProperties": false
    }))?
    .with_handler(|args, deps| {
        let deps = deps.get::<SupportDeps>();
        async move {
            let deps = deps.ok_or(ToolError::MissingDependency("SupportDeps"))?;
            let include_pending = args
                .get("include_pending")
                .and_then(|v| v.as_bool())
                .ok_or_else(|| ToolError::Execution("include_pending missing".to_string()))?;

            let balance = deps
                .db
                .customer_balance(deps.customer_id, include_pending)
                .await?;
            Ok(ToolOutcome::Text(format!("${balance:.2}")))
        }
    }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let model_name = env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
    let model = OpenAiModel::from_env(model_name)?;

    let mut agent = Agent::builder()
        .model(model)
        .system_prompt(
            "You are a support agent in our bank, give the customer support \
             and judge the risk level of their query. Reply using the customer's name.",
        )
        .system_prompt_fn(|deps| {
            let deps = deps.get::<SupportDeps>();
            async move {
                let deps = deps?;
                let name = deps.db.customer_name(deps.customer_id).await?;
                Some(format!("The customer's name is '{name}'"))
            }
        })
        .tool(customer_balance_tool()?)
        .output(support_output()?)
        .dependency(SupportDeps {
            customer_id: 123,
            db: SupportDb,
        })
        .build()?;

    let result: SupportResult = agent.run("What is my balance?").await?;
    print_result(&result);

    agent.clear_history();
    let result: SupportResult = agent.run("I just lost my card!").await?;
    print_result(&result);

    Ok(())
}

fn print_result(result: &SupportResult) {
    println!(
        "support_advice={:?} block_card={} risk={}",
        result.support_advice, result.block_card, result.risk
    );
}
