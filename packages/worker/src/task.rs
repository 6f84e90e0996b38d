//! Task definitions and the registry a worker dispatches on.
//!
//! A job's `task_path` is a dotted name such as `email.send`. Tasks are
//! registered under their full path, either directly or by nesting a
//! registry under a prefix.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{self, BoxFuture};
use lane_core::TaskError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::TaskConfig;
use crate::error::{WorkerError, WorkerResult};

/// Outcome of one task run.
pub type TaskOutput = Result<Value, TaskError>;

/// Future returned by a task handler.
pub type HandlerFuture = BoxFuture<'static, TaskOutput>;

/// Type-erased task body working on JSON payloads.
///
/// Implement this directly for handlers that want the raw payload; typed
/// handlers go through [`TaskDefinition::new`].
pub trait TaskHandler: Send + Sync + 'static {
    fn call(&self, input: Value) -> HandlerFuture;
}

/// Adapts `Fn(I) -> Future<Output = Result<O, TaskError>>` to [`TaskHandler`].
///
/// Decoding the input into `I` plays the role of an input schema and
/// encoding `O` that of an output schema.
struct TypedHandler<I, O, F> {
    handler: F,
    _types: PhantomData<fn(I) -> O>,
}

impl<I, O, F, Fut> TaskHandler for TypedHandler<I, O, F>
where
    I: DeserializeOwned + 'static,
    O: Serialize + Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, TaskError>> + Send + 'static,
{
    fn call(&self, input: Value) -> HandlerFuture {
        let input = match serde_json::from_value::<I>(input) {
            Ok(input) => input,
            Err(err) => {
                return future::ready(Err(TaskError::new(format!("Invalid task input: {err}"))))
                    .boxed();
            }
        };

        let running = (self.handler)(input);
        async move {
            let output = running.await?;
            serde_json::to_value(output)
                .map_err(|err| TaskError::new(format!("Invalid task output: {err}")))
        }
        .boxed()
    }
}

/// A runnable task with its configuration.
#[derive(Clone)]
pub struct TaskDefinition {
    handler: Arc<dyn TaskHandler>,
    config: TaskConfig,
}

impl TaskDefinition {
    /// Define a task from an async function of the decoded input.
    ///
    /// Tasks without input take `()`, which decodes from a `null` payload.
    pub fn new<I, O, F, Fut>(handler: F) -> Self
    where
        I: DeserializeOwned + 'static,
        O: Serialize + Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, TaskError>> + Send + 'static,
    {
        Self::from_handler(TypedHandler {
            handler,
            _types: PhantomData,
        })
    }

    pub fn from_handler<H: TaskHandler>(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
            config: TaskConfig::default(),
        }
    }

    pub fn with_config(mut self, config: TaskConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    /// Run the task on a JSON input.
    pub fn run(&self, input: Value) -> HandlerFuture {
        self.handler.call(input)
    }
}

impl std::fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Registry mapping dotted task paths to definitions.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, TaskDefinition>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `definition` under `path`.
    pub fn register(
        &mut self,
        path: impl Into<String>,
        definition: TaskDefinition,
    ) -> WorkerResult<()> {
        let path = path.into();
        validate_path(&path)?;
        if self.tasks.contains_key(&path) {
            return Err(WorkerError::DuplicateTask(path));
        }
        self.tasks.insert(path, definition);
        Ok(())
    }

    /// Register a typed handler under `path` with the default config.
    pub fn task<I, O, F, Fut>(&mut self, path: impl Into<String>, handler: F) -> WorkerResult<()>
    where
        I: DeserializeOwned + 'static,
        O: Serialize + Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, TaskError>> + Send + 'static,
    {
        self.register(path, TaskDefinition::new(handler))
    }

    /// Register every task of `tasks` under `prefix.<path>`.
    ///
    /// Nothing is registered if any resulting path is already taken.
    pub fn nest(&mut self, prefix: &str, tasks: TaskRegistry) -> WorkerResult<()> {
        validate_path(prefix)?;
        let nested: Vec<(String, TaskDefinition)> = tasks
            .tasks
            .into_iter()
            .map(|(path, definition)| (format!("{prefix}.{path}"), definition))
            .collect();

        if let Some((path, _)) = nested.iter().find(|(path, _)| self.tasks.contains_key(path)) {
            return Err(WorkerError::DuplicateTask(path.clone()));
        }
        self.tasks.extend(nested);
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<&TaskDefinition> {
        self.tasks.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.tasks.contains_key(path)
    }

    /// All registered paths, sorted.
    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.tasks.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

fn validate_path(path: &str) -> WorkerResult<()> {
    let valid = path.split('.').all(|segment| {
        !segment.is_empty() && !segment.chars().any(char::is_whitespace)
    });
    if valid {
        Ok(())
    } else {
        Err(WorkerError::InvalidTaskPath(path.to_string()))
    }
}
