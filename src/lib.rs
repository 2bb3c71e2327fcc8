//! Typed agent harness for LLM tool-calling runs.
//!
//! Surface:
//! - `Agent` loop with a bounded retry budget for tool retry signals and
//!   result-schema validation failures
//! - `query`, `run`, and `query_stream` entry points
//! - Tool registry + JSON schema validation + dependency injection
//! - Declared result schemas (`OutputSpec`) enforced before a run succeeds
//! - OpenAI-compatible adapter via `OpenAiModel` (OpenAI, OpenRouter, Ollama)

pub mod agent;
pub mod error;
pub mod llm;
pub mod output;
pub mod schema;
pub mod tools;

pub use agent::{Agent, AgentBuilder, AgentConfig, AgentEvent};
pub use error::{AgentError, OutputError, ProviderError, SchemaError, ToolError};
pub use llm::{
    ChatModel, ModelCompletion, ModelMessage, ModelToolCall, ModelToolChoice, ModelToolDefinition,
    ModelUsage, OpenAiModel, OpenAiModelConfig,
};
pub use output::{FINAL_RESULT_TOOL, OutputSpec};
pub use tools::{DependencyMap, SideEffects, ToolOutcome, ToolSpec};
