use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;

use super::*;
use crate::error::ProviderError;
use crate::output::OutputSpec;
use crate::tools::{ToolOutcome, ToolSpec};

struct MockModel {
    responses: Mutex<VecDeque<Result<ModelCompletion, ProviderError>>>,
    seen: Arc<Mutex<Vec<Vec<ModelMessage>>>>,
}

impl MockModel {
    fn with_responses(responses: Vec<Result<ModelCompletion, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from(responses)),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn seen_handle(&self) -> Arc<Mutex<Vec<Vec<ModelMessage>>>> {
        self.seen.clone()
    }
}

#[async_trait]
impl ChatModel for MockModel {
    async fn invoke(
        &self,
        messages: &[ModelMessage],
        _tools: &[ModelToolDefinition],
        _tool_choice: ModelToolChoice,
    ) -> Result<ModelCompletion, ProviderError> {
        self.seen
            .lock()
            .expect("lock poisoned")
            .push(messages.to_vec());

        let mut guard = self.responses.lock().expect("lock poisoned");
        guard.pop_front().unwrap_or_else(|| {
            Err(ProviderError::Response(
                "no more mock model responses".to_string(),
            ))
        })
    }
}

fn text_completion(text: &str) -> Result<ModelCompletion, ProviderError> {
    Ok(ModelCompletion {
        text: Some(text.to_string()),
        ..Default::default()
    })
}

fn tool_call_completion(id: &str, name: &str, arguments: serde_json::Value) -> Result<ModelCompletion, ProviderError> {
    Ok(ModelCompletion {
        tool_calls: vec![ModelToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }],
        ..Default::default()
    })
}

fn add_tool() -> ToolSpec {
    ToolSpec::new("add", "add two numbers")
        .with_schema(json!({
            "type": "object",
            "properties": {
                "a": {"type": "integer"},
                "b": {"type": "integer"}
            },
            "required": ["a", "b"],
            "additionalProperties": false
        }))
        .expect("valid schema")
        .with_handler(|args, _deps| async move {
            let a = args
                .get("a")
                .and_then(|v| v.as_i64())
                .ok_or_else(|| ToolError::Execution("a missing".to_string()))?;
            let b = args
                .get("b")
                .and_then(|v| v.as_i64())
                .ok_or_else(|| ToolError::Execution("b missing".to_string()))?;
            Ok(ToolOutcome::Text((a + b).to_string()))
        })
}

fn fail_tool() -> ToolSpec {
    ToolSpec::new("fail", "always fail")
        .with_schema(json!({
            "type": "object",
            "properties": {},
            "required": [],
            "additionalProperties": false
        }))
        .expect("valid schema")
        .with_handler(|_args, _deps| async move { Err(ToolError::Execution("boom".to_string())) })
}

/// Succeeds on every call after the first `misses`, like a lookup that only
/// finds data once the model rephrases its query.
fn flaky_lookup_tool(misses: u32) -> ToolSpec {
    let calls = Arc::new(Mutex::new(0_u32));
    ToolSpec::new("lookup", "look something up")
        .with_schema(json!({
            "type": "object",
            "properties": {"query": {"type": "string"}},
            "required": ["query"],
            "additionalProperties": false
        }))
        .expect("valid schema")
        .with_handler(move |_args, _deps| {
            let calls = calls.clone();
            async move {
                let mut guard = calls.lock().expect("lock poisoned");
                *guard += 1;
                if *guard <= misses {
                    Ok(ToolOutcome::Retry("no results found".to_string()))
                } else {
                    Ok(ToolOutcome::Text("found it".to_string()))
                }
            }
        })
}

fn support_output() -> OutputSpec {
    OutputSpec::new("The structured support verdict")
        .with_schema(json!({
            "type": "object",
            "properties": {
                "support_advice": {"type": "string"},
                "block_card": {"type": "boolean"},
                "risk": {"type": "integer", "minimum": 0, "maximum": 10}
            },
            "required": ["support_advice", "block_card", "risk"],
            "additionalProperties": false
        }))
        .expect("valid schema")
}

#[derive(Debug, Deserialize, PartialEq)]
struct SupportResult {
    support_advice: String,
    block_card: bool,
    risk: i64,
}

#[tokio::test]
async fn query_returns_no_tool_response() {
    let model = MockModel::with_responses(vec![text_completion("hello")]);

    let mut agent = Agent::builder().model(model).build().expect("agent builds");
    let response = agent.query("hi").await.expect("query succeeds");

    assert_eq!(response, "hello");
}

#[tokio::test]
async fn tool_call_then_final_response_flow() {
    let model = MockModel::with_responses(vec![
        tool_call_completion("call_1", "add", json!({"a": 2, "b": 3})),
        text_completion("all done"),
    ]);

    let mut agent = Agent::builder()
        .model(model)
        .tool(add_tool())
        .build()
        .expect("agent builds");

    let events = agent
        .query_stream("add")
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .expect("events ok");

    assert_eq!(events.len(), 4);
    assert!(matches!(events[0], AgentEvent::ToolCall { .. }));
    assert!(matches!(
        events[1],
        AgentEvent::ToolResult {
            is_error: false,
            ..
        }
    ));
    assert_eq!(
        events[2],
        AgentEvent::Text {
            content: "all done".to_string()
        }
    );
    assert_eq!(
        events[3],
        AgentEvent::FinalResponse {
            content: "all done".to_string()
        }
    );
}

#[tokio::test]
async fn structured_run_parses_validated_result() {
    let model = MockModel::with_responses(vec![tool_call_completion(
        "call_1",
        "final_result",
        json!({
            "support_advice": "Your balance is $133.45.",
            "block_card": false,
            "risk": 1
        }),
    )]);

    let mut agent = Agent::builder()
        .model(model)
        .output(support_output())
        .build()
        .expect("agent builds");

    let result: SupportResult = agent.run("What is my balance?").await.expect("run succeeds");
    assert_eq!(
        result,
        SupportResult {
            support_advice: "Your balance is $133.45.".to_string(),
            block_card: false,
            risk: 1,
        }
    );
}

#[tokio::test]
async fn out_of_bounds_result_is_retried_then_accepted() {
    let model = MockModel::with_responses(vec![
        tool_call_completion(
            "call_1",
            "final_result",
            json!({"support_advice": "ok", "block_card": true, "risk": 11}),
        ),
        tool_call_completion(
            "call_2",
            "final_result",
            json!({"support_advice": "ok", "block_card": true, "risk": 8}),
        ),
    ]);

    let mut agent = Agent::builder()
        .model(model)
        .output(support_output())
        .build()
        .expect("agent builds");

    let result: SupportResult = agent.run("I lost my card!").await.expect("run succeeds");
    assert_eq!(result.risk, 8);
}

#[tokio::test]
async fn persistently_invalid_result_exhausts_the_budget() {
    let invalid = json!({"support_advice": "ok", "block_card": true, "risk": 11});
    let model = MockModel::with_responses(vec![
        tool_call_completion("call_1", "final_result", invalid.clone()),
        tool_call_completion("call_2", "final_result", invalid.clone()),
        tool_call_completion("call_3", "final_result", invalid),
    ]);
    let seen = model.seen_handle();

    let mut agent = Agent::builder()
        .model(model)
        .output(support_output())
        .build()
        .expect("agent builds");

    let err = agent
        .run::<SupportResult>("I lost my card!")
        .await
        .expect_err("must fail");

    match err {
        AgentError::RetriesExhausted { attempts, reason } => {
            assert_eq!(attempts, 2);
            assert!(reason.contains("risk"));
        }
        other => panic!("unexpected error: {other}"),
    }

    // The third scripted answer was never requested.
    assert_eq!(seen.lock().expect("lock poisoned").len(), 2);
}

#[tokio::test]
async fn no_partial_result_survives_exhaustion() {
    let model = MockModel::with_responses(vec![tool_call_completion(
        "call_1",
        "final_result",
        json!({"support_advice": "ok"}),
    )]);

    let mut agent = Agent::builder()
        .model(model)
        .retries(0)
        .output(support_output())
        .build()
        .expect("agent builds");

    assert!(agent.run::<SupportResult>("hi").await.is_err());
}

#[tokio::test]
async fn tool_retry_signal_consumes_exactly_one_retry() {
    let model = MockModel::with_responses(vec![
        tool_call_completion("call_1", "lookup", json!({"query": "acra"})),
        tool_call_completion("call_2", "lookup", json!({"query": "acra singapore"})),
        text_completion("here you go"),
    ]);

    let mut agent = Agent::builder()
        .model(model)
        .tool(flaky_lookup_tool(1))
        .build()
        .expect("agent builds");

    let events = agent
        .query_stream("search")
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .expect("events ok");

    let retries = events
        .iter()
        .filter(|event| matches!(event, AgentEvent::RunRetry { .. }))
        .count();
    assert_eq!(retries, 1);
    assert_eq!(
        events.last(),
        Some(&AgentEvent::FinalResponse {
            content: "here you go".to_string()
        })
    );
}

#[tokio::test]
async fn persistent_no_results_exhausts_the_budget() {
    let model = MockModel::with_responses(vec![
        tool_call_completion("call_1", "lookup", json!({"query": "a"})),
        tool_call_completion("call_2", "lookup", json!({"query": "b"})),
        tool_call_completion("call_3", "lookup", json!({"query": "c"})),
    ]);

    let mut agent = Agent::builder()
        .model(model)
        .tool(flaky_lookup_tool(u32::MAX))
        .build()
        .expect("agent builds");

    let err = agent.query("search").await.expect_err("must fail");
    match err {
        AgentError::RetriesExhausted { attempts, reason } => {
            assert_eq!(attempts, 2);
            assert_eq!(reason, "no results found");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn plain_text_answer_is_reprompted_when_output_declared() {
    let model = MockModel::with_responses(vec![
        text_completion("your balance looks fine"),
        tool_call_completion(
            "call_1",
            "final_result",
            json!({"support_advice": "fine", "block_card": false, "risk": 0}),
        ),
    ]);

    let mut agent = Agent::builder()
        .model(model)
        .output(support_output())
        .build()
        .expect("agent builds");

    let result: SupportResult = agent.run("balance?").await.expect("run succeeds");
    assert!(!result.block_card);
}

#[tokio::test]
async fn invalid_tool_arguments_are_fed_back_as_retry() {
    let model = MockModel::with_responses(vec![
        tool_call_completion("call_1", "add", json!({"a": 2})),
        tool_call_completion("call_2", "add", json!({"a": 2, "b": 3})),
        text_completion("5"),
    ]);

    let mut agent = Agent::builder()
        .model(model)
        .tool(add_tool())
        .build()
        .expect("agent builds");

    let events = agent
        .query_stream("add")
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .expect("events ok");

    assert!(events.iter().any(|event| matches!(
        event,
        AgentEvent::RunRetry { reason, .. } if reason.contains("missing required field")
    )));
    assert_eq!(
        events.last(),
        Some(&AgentEvent::FinalResponse {
            content: "5".to_string()
        })
    );
}

#[tokio::test]
async fn tool_execution_error_fails_the_run() {
    let model = MockModel::with_responses(vec![tool_call_completion("call_1", "fail", json!({}))]);

    let mut agent = Agent::builder()
        .model(model)
        .tool(fail_tool())
        .build()
        .expect("agent builds");

    let err = agent.query("try").await.expect_err("must fail");
    assert!(matches!(
        err,
        AgentError::Tool(ToolError::Execution(ref message)) if message == "boom"
    ));
}

#[tokio::test]
async fn max_iterations_error_when_tool_loop_never_finishes() {
    let model = MockModel::with_responses(vec![tool_call_completion(
        "call_3",
        "add",
        json!({"a": 1, "b": 1}),
    )]);

    let mut agent = Agent::builder()
        .model(model)
        .tool(add_tool())
        .max_iterations(1)
        .build()
        .expect("agent builds");

    let err = agent.query("loop").await.expect_err("must fail");
    assert!(matches!(err, AgentError::MaxIterationsReached { .. }));
}

#[tokio::test]
async fn dependency_override_is_used_for_tool_execution() {
    let model = MockModel::with_responses(vec![
        tool_call_completion("call_5", "read_dep", json!({})),
        text_completion("done"),
    ]);

    let dep_tool = ToolSpec::new("read_dep", "read number")
        .with_schema(json!({
            "type": "object",
            "properties": {},
            "required": [],
            "additionalProperties": false
        }))
        .expect("valid schema")
        .with_handler(|_args, deps| {
            let value = deps.get::<u32>().map(|v| *v).unwrap_or(0);
            async move { Ok(ToolOutcome::Text(value.to_string())) }
        });

    let mut agent = Agent::builder()
        .model(model)
        .tool(dep_tool)
        .dependency(1_u32)
        .dependency_override(9_u32)
        .build()
        .expect("agent builds");

    let events = agent
        .query_stream("dep")
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .expect("events ok");

    assert!(events.iter().any(|event| {
        matches!(
            event,
            AgentEvent::ToolResult {
                result_text,
                is_error: false,
                ..
            } if result_text == "9"
        )
    }));
}

#[tokio::test]
async fn prompt_builders_enrich_the_system_message() {
    #[derive(Clone)]
    struct Customer {
        name: Option<String>,
    }

    let model = MockModel::with_responses(vec![text_completion("hello John")]);
    let seen = model.seen_handle();

    let mut agent = Agent::builder()
        .model(model)
        .system_prompt("You are a support agent in our bank.")
        .system_prompt_fn(|deps| {
            let customer = deps.get::<Customer>();
            async move {
                customer
                    .and_then(|customer| customer.name.clone())
                    .map(|name| format!("The customer's name is '{name}'"))
            }
        })
        .dependency(Customer {
            name: Some("John".to_string()),
        })
        .build()
        .expect("agent builds");

    agent.query("hi").await.expect("query succeeds");

    let invocations = seen.lock().expect("lock poisoned");
    let first_message = invocations[0].first().cloned();
    assert_eq!(
        first_message,
        Some(ModelMessage::System(
            "You are a support agent in our bank.\nThe customer's name is 'John'".to_string()
        ))
    );
}

#[tokio::test]
async fn prompt_builder_lookup_miss_degrades_gracefully() {
    #[derive(Clone)]
    struct Customer {
        name: Option<String>,
    }

    let model = MockModel::with_responses(vec![text_completion("hello")]);
    let seen = model.seen_handle();

    let mut agent = Agent::builder()
        .model(model)
        .system_prompt("You are a support agent in our bank.")
        .system_prompt_fn(|deps| {
            let customer = deps.get::<Customer>();
            async move {
                customer
                    .and_then(|customer| customer.name.clone())
                    .map(|name| format!("The customer's name is '{name}'"))
            }
        })
        .dependency(Customer { name: None })
        .build()
        .expect("agent builds");

    agent.query("hi").await.expect("query succeeds");

    let invocations = seen.lock().expect("lock poisoned");
    let first_message = invocations[0].first().cloned();
    assert_eq!(
        first_message,
        Some(ModelMessage::System(
            "You are a support agent in our bank.".to_string()
        ))
    );
}

#[tokio::test]
async fn identical_runs_produce_identical_results() {
    let responses = || {
        vec![tool_call_completion(
            "call_1",
            "final_result",
            json!({"support_advice": "ok", "block_card": false, "risk": 2}),
        )]
    };

    let mut first = Agent::builder()
        .model(MockModel::with_responses(responses()))
        .output(support_output())
        .build()
        .expect("agent builds");
    let mut second = Agent::builder()
        .model(MockModel::with_responses(responses()))
        .output(support_output())
        .build()
        .expect("agent builds");

    let a: SupportResult = first.run("q").await.expect("run succeeds");
    let b: SupportResult = second.run("q").await.expect("run succeeds");
    assert_eq!(a, b);
}

#[tokio::test]
async fn usage_accumulates_across_invocations() {
    let model = MockModel::with_responses(vec![
        Ok(ModelCompletion {
            tool_calls: vec![ModelToolCall {
                id: "call_1".to_string(),
                name: "add".to_string(),
                arguments: json!({"a": 1, "b": 2}),
            }],
            usage: Some(ModelUsage {
                input_tokens: 10,
                output_tokens: 5,
            }),
            ..Default::default()
        }),
        Ok(ModelCompletion {
            text: Some("3".to_string()),
            usage: Some(ModelUsage {
                input_tokens: 20,
                output_tokens: 7,
            }),
            ..Default::default()
        }),
    ]);

    let mut agent = Agent::builder()
        .model(model)
        .tool(add_tool())
        .build()
        .expect("agent builds");

    agent.query("add").await.expect("query succeeds");

    assert_eq!(
        agent.usage(),
        ModelUsage {
            input_tokens: 30,
            output_tokens: 12,
        }
    );
    assert_eq!(agent.usage().total(), 42);
}

#[tokio::test]
async fn query_rejects_structured_agents() {
    let model = MockModel::with_responses(vec![]);

    let mut agent = Agent::builder()
        .model(model)
        .output(support_output())
        .build()
        .expect("agent builds");

    assert!(matches!(
        agent.query("hi").await,
        Err(AgentError::Config(_))
    ));
}

#[tokio::test]
async fn reserved_output_tool_name_is_rejected_at_build() {
    let model = MockModel::with_responses(vec![]);

    let result = Agent::builder()
        .model(model)
        .output(support_output())
        .tool(ToolSpec::new("final_result", "collides"))
        .build();

    assert!(matches!(result, Err(AgentError::Config(_))));
}
