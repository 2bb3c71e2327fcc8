use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_stream::try_stream;
use futures_util::future::BoxFuture;
use futures_util::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{AgentError, ToolError};
use crate::llm::{
    ChatModel, ModelCompletion, ModelMessage, ModelToolCall, ModelToolChoice, ModelToolDefinition,
    ModelUsage,
};
use crate::output::{self, OutputSpec};
use crate::tools::{DependencyMap, ToolOutcome, ToolSpec};

/// Builder function for one dynamic system-prompt section. Returning `None`
/// omits the section; a failed lookup degrades the prompt, never the run.
type PromptBuilder =
    Arc<dyn Fn(&DependencyMap) -> BoxFuture<'static, Option<String>> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Budget of recoverable re-attempts: tool retry signals and final-result
    /// validation failures each consume one unit.
    pub retries: u32,
    /// Hard cap on model invocations, independent of the retry budget.
    pub max_iterations: u32,
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            retries: 1,
            max_iterations: 24,
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Thinking {
        content: String,
    },
    Text {
        content: String,
    },
    ToolCall {
        tool: String,
        args_json: Value,
        tool_call_id: String,
    },
    ToolResult {
        tool: String,
        result_text: String,
        tool_call_id: String,
        is_error: bool,
    },
    RunRetry {
        reason: String,
        attempt: u32,
    },
    FinalResponse {
        content: String,
    },
    FinalStructured {
        value: Value,
    },
}

pub struct AgentBuilder {
    model: Option<Arc<dyn ChatModel>>,
    tools: Vec<ToolSpec>,
    output: Option<OutputSpec>,
    config: AgentConfig,
    prompt_builders: Vec<PromptBuilder>,
    dependencies: DependencyMap,
    dependency_overrides: DependencyMap,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self {
            model: None,
            tools: Vec::new(),
            output: None,
            config: AgentConfig::default(),
            prompt_builders: Vec::new(),
            dependencies: DependencyMap::new(),
            dependency_overrides: DependencyMap::new(),
        }
    }
}

impl AgentBuilder {
    pub fn model<M>(mut self, model: M) -> Self
    where
        M: ChatModel + 'static,
    {
        self.model = Some(Arc::new(model));
        self
    }

    pub fn tool(mut self, tool: ToolSpec) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(system_prompt.into());
        self
    }

    /// Registers a dynamic system-prompt section evaluated once per run
    /// against the dependency bundle.
    pub fn system_prompt_fn<F, Fut>(mut self, builder: F) -> Self
    where
        F: Fn(&DependencyMap) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<String>> + Send + 'static,
    {
        self.prompt_builders
            .push(Arc::new(move |deps| Box::pin(builder(deps))));
        self
    }

    /// Declares the structured result the run must produce.
    pub fn output(mut self, output: OutputSpec) -> Self {
        self.output = Some(output);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.config.retries = retries;
        self
    }

    pub fn max_iterations(mut self, max_iterations: u32) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    pub fn dependency<T>(mut self, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.dependencies.insert(value);
        self
    }

    /// Test-time substitute that wins over the base dependency of the same
    /// type when the run executes.
    pub fn dependency_override<T>(mut self, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.dependency_overrides.insert(value);
        self
    }

    pub fn build(self) -> Result<Agent, AgentError> {
        let Some(model) = self.model else {
            return Err(AgentError::Config(
                "agent model must be configured via AgentBuilder::model(...)".to_string(),
            ));
        };

        let mut tool_map = HashMap::new();
        for tool in &self.tools {
            if tool.name() == output::FINAL_RESULT_TOOL {
                return Err(AgentError::Config(format!(
                    "tool name '{}' is reserved for the output schema",
                    output::FINAL_RESULT_TOOL
                )));
            }
            if tool_map
                .insert(tool.name().to_string(), tool.clone())
                .is_some()
            {
                return Err(AgentError::Config(format!(
                    "duplicate tool registered: {}",
                    tool.name()
                )));
            }
        }

        Ok(Agent {
            model,
            tools: self.tools,
            tool_map,
            output: self.output,
            config: self.config,
            prompt_builders: self.prompt_builders,
            dependencies: self.dependencies,
            dependency_overrides: self.dependency_overrides,
            history: Vec::new(),
            usage: ModelUsage::default(),
        })
    }
}

/// Orchestration unit for one conversational run: a prompt, an optional
/// result schema, a tool registry, and the dependency bundle they read.
pub struct Agent {
    model: Arc<dyn ChatModel>,
    tools: Vec<ToolSpec>,
    tool_map: HashMap<String, ToolSpec>,
    output: Option<OutputSpec>,
    config: AgentConfig,
    prompt_builders: Vec<PromptBuilder>,
    dependencies: DependencyMap,
    dependency_overrides: DependencyMap,
    history: Vec<ModelMessage>,
    usage: ModelUsage,
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::default()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn messages_len(&self) -> usize {
        self.history.len()
    }

    /// Token usage accumulated over every model invocation since the agent
    /// was built.
    pub fn usage(&self) -> ModelUsage {
        self.usage
    }

    /// Runs to a final text answer. Only valid for agents without a declared
    /// output schema; structured agents finish through [`Agent::run`].
    pub async fn query(&mut self, user_message: impl Into<String>) -> Result<String, AgentError> {
        if self.output.is_some() {
            return Err(AgentError::Config(
                "agent declares a structured output; use run(...) instead of query(...)"
                    .to_string(),
            ));
        }

        let stream = self.query_stream(user_message);
        futures_util::pin_mut!(stream);

        let mut final_response: Option<String> = None;

        while let Some(event) = stream.next().await {
            if let AgentEvent::FinalResponse { content } = event? {
                final_response = Some(content);
            }
        }

        final_response.ok_or(AgentError::MissingFinalResponse)
    }

    /// Runs to a validated structured result, deserialized into `T`.
    pub async fn run<T>(&mut self, user_message: impl Into<String>) -> Result<T, AgentError>
    where
        T: DeserializeOwned,
    {
        let value = self.run_structured(user_message).await?;
        Ok(output::parse_output(value)?)
    }

    /// Runs to a validated structured result as raw JSON.
    pub async fn run_structured(
        &mut self,
        user_message: impl Into<String>,
    ) -> Result<Value, AgentError> {
        if self.output.is_none() {
            return Err(AgentError::Config(
                "agent has no output schema; use query(...) for a text answer".to_string(),
            ));
        }

        let stream = self.query_stream(user_message);
        futures_util::pin_mut!(stream);

        let mut final_value: Option<Value> = None;

        while let Some(event) = stream.next().await {
            if let AgentEvent::FinalStructured { value } = event? {
                final_value = Some(value);
            }
        }

        final_value.ok_or(AgentError::MissingFinalResponse)
    }

    /// The run loop as an event stream.
    ///
    /// PROMPTING → TOOL_EXECUTING → back to PROMPTING with the result
    /// appended → VALIDATING once a final answer arrives → SUCCESS, or RETRY
    /// until the budget is exhausted.
    pub fn query_stream(
        &mut self,
        user_message: impl Into<String>,
    ) -> impl Stream<Item = Result<AgentEvent, AgentError>> + '_ {
        let user_message = user_message.into();

        try_stream! {
            if self.history.is_empty() {
                if let Some(system) = self.build_system_prompt().await {
                    self.history.push(ModelMessage::System(system));
                }
            }

            self.history.push(ModelMessage::User(user_message));

            let mut tool_definitions = self
                .tools
                .iter()
                .map(|tool| ModelToolDefinition {
                    name: tool.name().to_string(),
                    description: tool.description().to_string(),
                    parameters: tool.json_schema().clone(),
                })
                .collect::<Vec<_>>();

            if let Some(output) = &self.output {
                tool_definitions.push(ModelToolDefinition {
                    name: output.name().to_string(),
                    description: output.description().to_string(),
                    parameters: output.json_schema().clone(),
                });
            }

            let tool_choice = if tool_definitions.is_empty() {
                ModelToolChoice::None
            } else if self.output.is_some() && self.tools.is_empty() {
                ModelToolChoice::Required
            } else {
                ModelToolChoice::Auto
            };

            let mut attempts: u32 = 0;

            for iteration in 0..self.config.max_iterations {
                tracing::debug!(iteration, "requesting model completion");
                let completion = self
                    .model
                    .invoke(&self.history, &tool_definitions, tool_choice.clone())
                    .await?;

                if let Some(usage) = &completion.usage {
                    self.usage.accumulate(usage);
                }

                if let Some(thinking) = completion.thinking.clone() {
                    yield AgentEvent::Thinking { content: thinking };
                }

                self.append_assistant_message(&completion);

                if let Some(text) = completion.text.clone() {
                    if !text.is_empty() {
                        yield AgentEvent::Text { content: text };
                    }
                }

                if completion.tool_calls.is_empty() {
                    if self.output.is_none() {
                        yield AgentEvent::FinalResponse {
                            content: completion.text.unwrap_or_default(),
                        };
                        return;
                    }

                    // A plain answer cannot be validated against the output
                    // schema; spend one retry re-prompting for the tool call.
                    attempts += 1;
                    let reason = format!(
                        "plain text answers are not permitted, call the {} tool",
                        output::FINAL_RESULT_TOOL
                    );
                    if attempts > self.config.retries {
                        Err::<(), AgentError>(AgentError::RetriesExhausted {
                            attempts,
                            reason: reason.clone(),
                        })?;
                    }
                    tracing::warn!(attempt = attempts, %reason, "run retry");
                    yield AgentEvent::RunRetry {
                        reason: reason.clone(),
                        attempt: attempts,
                    };
                    self.history.push(ModelMessage::User(format!(
                        "Plain text responses are not permitted. Call the {} tool with your answer.",
                        output::FINAL_RESULT_TOOL
                    )));
                    continue;
                }

                for tool_call in completion.tool_calls {
                    yield AgentEvent::ToolCall {
                        tool: tool_call.name.clone(),
                        args_json: tool_call.arguments.clone(),
                        tool_call_id: tool_call.id.clone(),
                    };

                    if let Some(validation) = self.validate_final_result(&tool_call) {
                        match validation {
                            Ok(()) => {
                                self.history.push(ModelMessage::ToolResult {
                                    tool_call_id: tool_call.id.clone(),
                                    tool_name: tool_call.name.clone(),
                                    content: "Final result processed.".to_string(),
                                    is_error: false,
                                });
                                yield AgentEvent::ToolResult {
                                    tool: tool_call.name.clone(),
                                    result_text: "Final result processed.".to_string(),
                                    tool_call_id: tool_call.id.clone(),
                                    is_error: false,
                                };
                                yield AgentEvent::FinalStructured {
                                    value: tool_call.arguments,
                                };
                                return;
                            }
                            Err(err) => {
                                attempts += 1;
                                let reason = err.to_string();
                                let feedback = format!(
                                    "{reason}. Fix the errors and call {} again.",
                                    output::FINAL_RESULT_TOOL
                                );
                                self.history.push(ModelMessage::ToolResult {
                                    tool_call_id: tool_call.id.clone(),
                                    tool_name: tool_call.name.clone(),
                                    content: feedback.clone(),
                                    is_error: true,
                                });
                                yield AgentEvent::ToolResult {
                                    tool: tool_call.name.clone(),
                                    result_text: feedback,
                                    tool_call_id: tool_call.id.clone(),
                                    is_error: true,
                                };
                                if attempts > self.config.retries {
                                    Err::<(), AgentError>(AgentError::RetriesExhausted {
                                        attempts,
                                        reason: reason.clone(),
                                    })?;
                                }
                                tracing::warn!(attempt = attempts, %reason, "run retry");
                                yield AgentEvent::RunRetry {
                                    reason,
                                    attempt: attempts,
                                };
                                continue;
                            }
                        }
                    }

                    match self.dispatch_tool_call(&tool_call).await {
                        ToolDispatch::Success { result_text } => {
                            self.history.push(ModelMessage::ToolResult {
                                tool_call_id: tool_call.id.clone(),
                                tool_name: tool_call.name.clone(),
                                content: result_text.clone(),
                                is_error: false,
                            });
                            yield AgentEvent::ToolResult {
                                tool: tool_call.name.clone(),
                                result_text,
                                tool_call_id: tool_call.id.clone(),
                                is_error: false,
                            };
                        }
                        ToolDispatch::Retryable { reason } => {
                            attempts += 1;
                            let feedback = format!("{reason}. Please try again.");
                            self.history.push(ModelMessage::ToolResult {
                                tool_call_id: tool_call.id.clone(),
                                tool_name: tool_call.name.clone(),
                                content: feedback.clone(),
                                is_error: true,
                            });
                            yield AgentEvent::ToolResult {
                                tool: tool_call.name.clone(),
                                result_text: feedback,
                                tool_call_id: tool_call.id.clone(),
                                is_error: true,
                            };
                            if attempts > self.config.retries {
                                Err::<(), AgentError>(AgentError::RetriesExhausted {
                                    attempts,
                                    reason: reason.clone(),
                                })?;
                            }
                            tracing::warn!(attempt = attempts, %reason, "run retry");
                            yield AgentEvent::RunRetry {
                                reason,
                                attempt: attempts,
                            };
                        }
                        ToolDispatch::Fatal(err) => {
                            Err::<(), AgentError>(AgentError::Tool(err))?;
                        }
                    }
                }
            }

            Err::<(), AgentError>(AgentError::MaxIterationsReached {
                max_iterations: self.config.max_iterations,
            })?;
        }
    }

    /// `Some` when the call is addressed to the declared output schema's
    /// synthetic tool; the payload is then the candidate final result.
    fn validate_final_result(
        &self,
        tool_call: &ModelToolCall,
    ) -> Option<Result<(), crate::error::OutputError>> {
        self.output
            .as_ref()
            .filter(|output| tool_call.name == output.name())
            .map(|output| output.validate(&tool_call.arguments))
    }

    async fn build_system_prompt(&self) -> Option<String> {
        let mut sections: Vec<String> = Vec::new();
        if let Some(system_prompt) = &self.config.system_prompt {
            sections.push(system_prompt.clone());
        }

        let deps = self.dependencies.merged_with(&self.dependency_overrides);
        for builder in &self.prompt_builders {
            if let Some(text) = builder(&deps).await {
                sections.push(text);
            }
        }

        if sections.is_empty() {
            None
        } else {
            Some(sections.join("\n"))
        }
    }

    fn append_assistant_message(&mut self, completion: &ModelCompletion) {
        self.history.push(ModelMessage::Assistant {
            content: completion.text.clone(),
            tool_calls: completion.tool_calls.clone(),
        });
    }

    async fn dispatch_tool_call(&self, tool_call: &ModelToolCall) -> ToolDispatch {
        let Some(tool) = self.tool_map.get(&tool_call.name) else {
            return ToolDispatch::Retryable {
                reason: ToolError::NotFound(tool_call.name.clone()).to_string(),
            };
        };

        tracing::info!(
            tool = %tool_call.name,
            side_effects = ?tool.side_effects(),
            "executing tool"
        );
        let runtime_dependencies = self.dependencies.merged_with(&self.dependency_overrides);

        match tool
            .execute(tool_call.arguments.clone(), &runtime_dependencies)
            .await
        {
            Ok(ToolOutcome::Text(text)) => ToolDispatch::Success { result_text: text },
            Ok(ToolOutcome::Json(value)) => ToolDispatch::Success {
                result_text: value.to_string(),
            },
            Ok(ToolOutcome::Retry(reason)) => ToolDispatch::Retryable { reason },
            Err(err @ ToolError::InvalidArguments { .. }) => ToolDispatch::Retryable {
                reason: err.to_string(),
            },
            Err(err) => ToolDispatch::Fatal(err),
        }
    }
}

/// How one tool invocation affects the run: a result to append, a recoverable
/// retry, or a terminal failure.
enum ToolDispatch {
    Success { result_text: String },
    Retryable { reason: String },
    Fatal(ToolError),
}

#[cfg(test)]
mod tests;
