//! # Executor Seam
//!
//! The server does not know what a method does. It asks an `Executor` for a
//! sequence of items and forwards whatever comes out.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream;
use futures::stream::BoxStream;
use muxrpc::RpcError;
use serde_json::Value;

/// Why an execution failed.
#[derive(Debug)]
pub enum ExecutionError {
    /// No method by this name.
    MethodNotFound(String),
    /// Sent to the caller as-is.
    Rpc(RpcError),
    /// Anything else; sent as a server error carrying the message.
    Failed(anyhow::Error),
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MethodNotFound(method) => write!(f, "method '{}' not found", method),
            Self::Rpc(e) => write!(f, "{}", e),
            Self::Failed(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ExecutionError {}

impl From<anyhow::Error> for ExecutionError {
    fn from(e: anyhow::Error) -> Self {
        Self::Failed(e)
    }
}

impl From<RpcError> for ExecutionError {
    fn from(e: RpcError) -> Self {
        Self::Rpc(e)
    }
}

/// A running call: zero or more items, ended by exhaustion (success) or an error.
///
/// Dropping it is how an execution is cancelled.
pub type Execution = BoxStream<'static, Result<Value, ExecutionError>>;

pub trait Executor: Send + Sync + 'static {
    /// Starts `method`. The returned stream is not polled until the execution is registered.
    fn execute(&self, method: &str, params: Value) -> Execution;

    /// Whether `method` exists at all; used to tell a missing method from a failing one.
    fn method_exists(&self, _method: &str) -> bool {
        true
    }
}

type Handler = Arc<dyn Fn(Value) -> Execution + Send + Sync>;

/// An executor backed by a table of closures.
#[derive(Default, Clone)]
pub struct FnExecutor {
    methods: HashMap<String, Handler>,
}

impl FnExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a method producing exactly one value.
    pub fn unary<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let handler: Handler = Arc::new(move |params| {
            let f = f.clone();
            // Deferred so nothing runs before the execution is registered.
            stream::once(async move { f(params).map_err(ExecutionError::from) }).boxed()
        });
        self.methods.insert(name.into(), handler);
        self
    }

    /// Registers a method producing a stream of values.
    pub fn streaming<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Execution + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Arc::new(f));
        self
    }
}

impl Executor for FnExecutor {
    fn execute(&self, method: &str, params: Value) -> Execution {
        match self.methods.get(method) {
            Some(handler) => handler(params),
            None => stream::once(futures::future::ready(Err(ExecutionError::MethodNotFound(method.to_string())))).boxed(),
        }
    }

    fn method_exists(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }
}
