use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::error::{SchemaError, ToolError};
use crate::schema;

/// What a tool handler hands back to the run loop.
///
/// `Retry` is not an error: it tells the loop to feed the reason back to the
/// model and spend one unit of the run's retry budget, typically because an
/// external lookup came back empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToolOutcome {
    Text(String),
    Json(Value),
    Retry(String),
}

/// How a tool touches the outside world. Purely descriptive: the run loop
/// logs it, and cancellation safety relies on tools being read-only or
/// safely abandonable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SideEffects {
    #[default]
    None,
    ReadOnlyNetwork,
}

type DynDependency = Arc<dyn Any + Send + Sync>;
type ToolHandler = dyn Fn(Value, &DependencyMap) -> BoxFuture<'static, Result<ToolOutcome, ToolError>>
    + Send
    + Sync;

/// Per-run bundle of values (credentials, connection handles, identifiers)
/// available to prompt builders and tool handlers, keyed by type.
///
/// Populated while the agent is being built and sealed afterwards; the run
/// loop only ever reads it. An override map can be merged on top for tests.
#[derive(Clone, Default)]
pub struct DependencyMap {
    entries: HashMap<TypeId, DynDependency>,
}

impl std::fmt::Debug for DependencyMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyMap")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl DependencyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T>(&mut self, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.entries.insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn get<T>(&self) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let value = self.entries.get(&TypeId::of::<T>())?.clone();
        Arc::downcast::<T>(value).ok()
    }

    /// Returns a copy of `self` with every entry from `overrides` winning
    /// over the base entry of the same type.
    pub fn merged_with(&self, overrides: &DependencyMap) -> DependencyMap {
        let mut merged = self.clone();
        for (key, value) in &overrides.entries {
            merged.entries.insert(*key, value.clone());
        }
        merged
    }
}

/// A named, typed, asynchronous callback the model may invoke during a run.
#[derive(Clone)]
pub struct ToolSpec {
    name: String,
    description: String,
    json_schema: Value,
    side_effects: SideEffects,
    handler: Arc<ToolHandler>,
}

impl std::fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("json_schema", &self.json_schema)
            .field("side_effects", &self.side_effects)
            .finish()
    }
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            json_schema: serde_json::json!({
                "type": "object",
                "properties": {},
                "required": [],
                "additionalProperties": true,
            }),
            side_effects: SideEffects::default(),
            handler: Arc::new(|_args, _deps| {
                Box::pin(async {
                    Err(ToolError::Execution(
                        "tool handler not configured".to_string(),
                    ))
                })
            }),
        }
    }

    pub fn with_schema(mut self, json_schema: Value) -> Result<Self, SchemaError> {
        schema::validate_schema(&json_schema)?;
        self.json_schema = json_schema;
        Ok(self)
    }

    pub fn with_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Value, &DependencyMap) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutcome, ToolError>> + Send + 'static,
    {
        self.handler = Arc::new(move |args, deps| Box::pin(handler(args, deps)));
        self
    }

    pub fn with_side_effects(mut self, side_effects: SideEffects) -> Self {
        self.side_effects = side_effects;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn side_effects(&self) -> SideEffects {
        self.side_effects
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn json_schema(&self) -> &Value {
        &self.json_schema
    }

    /// Validates `args` against the declared schema, then runs the handler.
    pub async fn execute(
        &self,
        args: Value,
        dependencies: &DependencyMap,
    ) -> Result<ToolOutcome, ToolError> {
        schema::check_object(&self.json_schema, &args).map_err(|violation| {
            ToolError::InvalidArguments {
                tool: self.name.clone(),
                message: violation.message(),
            }
        })?;
        (self.handler)(args, dependencies).await
    }
}
