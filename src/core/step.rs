//! Step domain model

use crate::core::context::ExecutionContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single step attempt
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StepError {
    /// The work function returned an error
    #[error("{0}")]
    Execution(String),

    /// The attempt did not finish within its timeout
    #[error("Step timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The task running the step panicked
    #[error("Step panicked: {0}")]
    Panicked(String),
}

impl StepError {
    /// Shorthand for an execution failure with a message
    pub fn msg(message: impl Into<String>) -> Self {
        StepError::Execution(message.into())
    }
}

/// Value produced by a successful step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    /// The step's result payload
    pub value: Value,

    /// Model that produced the output, when the step called one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl StepOutput {
    pub fn new(value: Value) -> Self {
        Self { value, model: None }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

impl From<Value> for StepOutput {
    fn from(value: Value) -> Self {
        StepOutput::new(value)
    }
}

/// The work a step performs
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn execute(&self, input: Value, context: ExecutionContext)
        -> Result<StepOutput, StepError>;
}

/// Adapts an async closure into a [`StepHandler`]
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> StepHandler for FnHandler<F>
where
    F: Fn(Value, ExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StepOutput, StepError>> + Send + 'static,
{
    async fn execute(
        &self,
        input: Value,
        context: ExecutionContext,
    ) -> Result<StepOutput, StepError> {
        (self.0)(input, context).await
    }
}

/// What happens once a step has exhausted its attempts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnError {
    /// Record the step as failed; the pipeline fails
    #[default]
    Fail,
    /// Record the step as skipped with the captured error
    Skip,
    /// Same as skip, logged as a tolerated failure
    Continue,
}

pub type ContextFn<T> = Arc<dyn Fn(&ExecutionContext) -> T + Send + Sync>;

/// Input handed to a step's work function
#[derive(Clone)]
pub enum StepInput {
    /// A fixed value
    Static(Value),
    /// Computed from the context when the step is dispatched
    Derived(ContextFn<Value>),
}

impl StepInput {
    /// Resolve the input against the current context
    pub fn resolve(&self, context: &ExecutionContext) -> Value {
        match self {
            StepInput::Static(value) => value.clone(),
            StepInput::Derived(f) => f(context),
        }
    }
}

impl Default for StepInput {
    fn default() -> Self {
        StepInput::Static(Value::Null)
    }
}

impl fmt::Debug for StepInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepInput::Static(value) => f.debug_tuple("Static").field(value).finish(),
            StepInput::Derived(_) => f.write_str("Derived(..)"),
        }
    }
}

/// Lifecycle callbacks for a step
#[derive(Clone, Default)]
pub struct StepHooks {
    pub on_start: Option<ContextFn<()>>,
    pub on_complete: Option<Arc<dyn Fn(&StepOutput, &ExecutionContext) + Send + Sync>>,
    pub on_fail: Option<Arc<dyn Fn(&StepError, &ExecutionContext) + Send + Sync>>,
}

/// A single unit of work in a pipeline
#[derive(Clone)]
pub struct StepDefinition {
    /// Unique step identifier
    pub id: String,

    /// Display name (defaults to the id)
    pub name: String,

    /// The work function
    pub handler: Arc<dyn StepHandler>,

    pub input: StepInput,

    /// Step ids that must be terminal before this step runs
    pub dependencies: Vec<String>,

    /// Skip the step when this returns false
    pub condition: Option<ContextFn<bool>>,

    /// Extra attempts after the first
    pub retries: u32,

    /// Fixed delay between attempts; exponential backoff when unset
    pub retry_delay: Option<Duration>,

    /// Per-attempt timeout; the pipeline default when unset
    pub timeout: Option<Duration>,

    pub on_error: OnError,

    pub hooks: StepHooks,
}

impl StepDefinition {
    /// Create a step from an async closure
    pub fn new<F, Fut>(id: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value, ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StepOutput, StepError>> + Send + 'static,
    {
        Self::with_handler(id, Arc::new(FnHandler(f)))
    }

    /// Create a step from any [`StepHandler`]
    pub fn with_handler(id: impl Into<String>, handler: Arc<dyn StepHandler>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            handler,
            input: StepInput::default(),
            dependencies: Vec::new(),
            condition: None,
            retries: 0,
            retry_delay: None,
            timeout: None,
            on_error: OnError::default(),
            hooks: StepHooks::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn input(mut self, value: Value) -> Self {
        self.input = StepInput::Static(value);
        self
    }

    pub fn input_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&ExecutionContext) -> Value + Send + Sync + 'static,
    {
        self.input = StepInput::Derived(Arc::new(f));
        self
    }

    pub fn condition<F>(mut self, f: F) -> Self
    where
        F: Fn(&ExecutionContext) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(f));
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn on_error(mut self, policy: OnError) -> Self {
        self.on_error = policy;
        self
    }

    pub fn on_start<F>(mut self, f: F) -> Self
    where
        F: Fn(&ExecutionContext) + Send + Sync + 'static,
    {
        self.hooks.on_start = Some(Arc::new(f));
        self
    }

    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: Fn(&StepOutput, &ExecutionContext) + Send + Sync + 'static,
    {
        self.hooks.on_complete = Some(Arc::new(f));
        self
    }

    pub fn on_fail<F>(mut self, f: F) -> Self
    where
        F: Fn(&StepError, &ExecutionContext) + Send + Sync + 'static,
    {
        self.hooks.on_fail = Some(Arc::new(f));
        self
    }

    /// Total number of attempts allowed
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Delay before the attempt following `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32, backoff_base: Duration) -> Duration {
        match self.retry_delay {
            Some(delay) => delay,
            None if backoff_base.is_zero() => Duration::ZERO,
            // Doubles per attempt and saturates at Duration::MAX
            None => match 2u32.checked_pow(attempt.saturating_sub(1)) {
                Some(factor) => backoff_base.saturating_mul(factor),
                None => Duration::MAX,
            },
        }
    }

    /// Check if all dependencies are in the given set
    pub fn dependencies_met(&self, finished: &HashSet<String>) -> bool {
        self.dependencies.iter().all(|dep| finished.contains(dep))
    }
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("input", &self.input)
            .field("dependencies", &self.dependencies)
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .field("timeout", &self.timeout)
            .field("on_error", &self.on_error)
            .finish_non_exhaustive()
    }
}
