//! Persistence seams between the engine and a run store.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use trellis_core::error::Result;
use trellis_core::types::{ComponentPath, ExecutionResult, ExecutionStatus};

/// What gets persisted for one executed component: terminal status,
/// the settings as the executor saw them (templates resolved), and the
/// recorded result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub path: ComponentPath,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_settings: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ExecutionResult>,
}

/// Sink for component records, called once per terminal context.
pub trait ExecutionRecorder: Send + Sync {
    fn record(&self, record: &ComponentRecord) -> Result<()>;
}

/// Source of records from a previous run, used during resumption.
pub trait ResultHydrator: Send + Sync {
    /// Load the record at `path` and every record beneath it, ordered
    /// by recording time.
    fn load_subtree(&self, path: &ComponentPath) -> Result<Vec<ComponentRecord>>;
}
