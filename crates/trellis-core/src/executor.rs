//! Node executor contract and registry.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::definition::{NodeKind, NodeSettings};
use crate::error::{Result, TrellisError};
use crate::types::{ComponentPath, NodeInput, NodeOutput};

/// Everything an executor receives for one node invocation. Settings
/// arrive fully resolved: every template field has already been rendered
/// against the node's effective scope.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub path: ComponentPath,
    pub settings: NodeSettings,
    pub input: NodeInput,
    /// The node's effective variable scope, for executors that want raw
    /// access beyond the resolved settings.
    pub scope: HashMap<String, Value>,
}

/// Executes one kind of node. Implementations are registered with an
/// [`ExecutorRegistry`] and dispatched by `NodeKind`.
pub trait NodeExecutor: Send + Sync + 'static {
    /// The node kind this executor serves.
    fn kind(&self) -> NodeKind;

    fn execute(&self, request: ExecutionRequest) -> BoxFuture<'_, Result<NodeOutput>>;
}

/// Explicit executor registry, constructed by the run coordinator and
/// handed to the engine. There is no global registration.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<NodeKind, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor; replaces any previous one for the kind.
    pub fn register(&mut self, executor: Arc<dyn NodeExecutor>) {
        self.executors.insert(executor.kind(), executor);
    }

    pub fn get(&self, kind: NodeKind) -> Result<Arc<dyn NodeExecutor>> {
        self.executors
            .get(&kind)
            .cloned()
            .ok_or_else(|| TrellisError::ExecutorNotFound(kind.to_string()))
    }

    pub fn kinds(&self) -> Vec<NodeKind> {
        self.executors.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Outcome;

    struct EchoExecutor;

    impl NodeExecutor for EchoExecutor {
        fn kind(&self) -> NodeKind {
            NodeKind::Command
        }

        fn execute(&self, request: ExecutionRequest) -> BoxFuture<'_, Result<NodeOutput>> {
            Box::pin(async move {
                Ok(NodeOutput {
                    output: serde_json::json!({"path": request.path.as_str()}),
                    outcome: Outcome::text("done"),
                })
            })
        }
    }

    #[test]
    fn registry_dispatches_by_kind() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(EchoExecutor));
        assert!(registry.get(NodeKind::Command).is_ok());
        assert!(matches!(
            registry.get(NodeKind::Model),
            Err(TrellisError::ExecutorNotFound(_))
        ));
    }
}
