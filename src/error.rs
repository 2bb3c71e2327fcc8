use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema must be a JSON object")]
    SchemaNotObject,
    #[error("schema must declare type=object")]
    RootTypeMustBeObject,
    #[error("required must be an array of strings")]
    InvalidRequired,
    #[error("bound on field '{0}' must be a number")]
    InvalidBound(String),
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),
    #[error("invalid tool arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },
    #[error("dependency missing: {0}")]
    MissingDependency(&'static str),
    #[error("tool execution failed: {0}")]
    Execution(String),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("final result must be a JSON object")]
    NotObject,
    #[error("missing required field: {0}")]
    MissingField(String),
    #[error("unknown field: {0}")]
    UnknownField(String),
    #[error("field '{field}' must be of type {expected}")]
    WrongType { field: String, expected: String },
    #[error("field '{field}' must be {bound}")]
    OutOfBounds { field: String, bound: String },
    #[error("final result does not match the declared output type: {0}")]
    Deserialize(String),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("provider response invalid: {0}")]
    Response(String),
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("retry budget exhausted after {attempts} attempts: {reason}")]
    RetriesExhausted { attempts: u32, reason: String },
    #[error("max iterations reached ({max_iterations})")]
    MaxIterationsReached { max_iterations: u32 },
    #[error("agent run ended without a final response")]
    MissingFinalResponse,
    #[error("agent configuration error: {0}")]
    Config(String),
}
