//! Shared types for trellis: workflow definitions, execution results,
//! the event channel, the node-executor contract, and the error
//! hierarchy.

pub mod definition;
pub mod error;
pub mod event;
pub mod executor;
pub mod types;

pub use definition::{
    CommandSettings, ComponentDefinition, CompositeDefinition, ConditionalBlock, Connection,
    ConnectionTrigger, FlowEntry, FolderScanSettings, LoopBlock, ModelSettings, NodeDefinition,
    NodeKind, NodeSettings,
};
pub use error::{Result, TrellisError};
pub use event::{
    handler_fn, DeferredResolver, DeferredValue, Event, EventChannel, EventHandler, EventKind,
};
pub use executor::{ExecutionRequest, ExecutorRegistry, NodeExecutor};
pub use types::{
    ComponentPath, ElementId, ExecutionResult, ExecutionStatus, FileReference, NodeInput,
    NodeOutput, Outcome, SharedResult,
};
