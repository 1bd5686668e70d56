use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TrellisError};

/// Identifier of one element in a workflow tree. Unique among siblings;
/// dots are reserved for path joining.
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(String);

impl ElementId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(TrellisError::Definition("element id must not be empty".to_string()));
        }
        if id.contains('.') {
            return Err(TrellisError::Definition(format!(
                "element id '{}' must not contain '.'",
                id
            )));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(TrellisError::Definition(format!(
                "element id '{}' must be alphanumeric with '_' or '-'",
                id
            )));
        }
        Ok(Self(id))
    }

    /// Synthetic id for a loop iteration.
    pub fn iteration(index: usize) -> Self {
        Self(format!("iter_{}", index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Dot-joined path from the tree root, e.g. `agent.flow.node`.
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentPath(String);

impl ComponentPath {
    pub fn root(id: &ElementId) -> Self {
        Self(id.as_str().to_string())
    }

    pub fn child(&self, id: &ElementId) -> Self {
        Self(format!("{}.{}", self.0, id.as_str()))
    }

    pub fn parent(&self) -> Option<Self> {
        self.0.rsplit_once('.').map(|(head, _)| Self(head.to_string()))
    }

    pub fn leaf(&self) -> &str {
        self.0.rsplit_once('.').map(|(_, tail)| tail).unwrap_or(&self.0)
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Whether `self` is `other` or an ancestor of it.
    pub fn is_prefix_of(&self, other: &ComponentPath) -> bool {
        other.0 == self.0 || other.0.starts_with(&format!("{}.", self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ComponentPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ComponentPath {
    type Err = TrellisError;

    fn from_str(s: &str) -> Result<Self> {
        for seg in s.split('.') {
            ElementId::new(seg)?;
        }
        Ok(Self(s.to_string()))
    }
}

/// Lifecycle of one execution context. Transitions are monotonic
/// (Pending → Running → terminal) with one exception: a Running node may
/// move to WaitingForInput and back while a blocking input event is
/// outstanding. Terminal statuses never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    WaitingForInput,
    Completed,
    Skipped,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped | Self::Failed)
    }

    /// Whether a transition from `self` to `next` is allowed.
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        match (self, next) {
            _ if *self == next => true,
            (Self::Pending, Self::Running | Self::Skipped | Self::Failed) => true,
            (Self::Running, Self::WaitingForInput) => true,
            (Self::WaitingForInput, Self::Running) => true,
            (Self::Running | Self::WaitingForInput, s) if s.is_terminal() => true,
            _ => false,
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = TrellisError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "waiting_for_input" => Ok(Self::WaitingForInput),
            "completed" => Ok(Self::Completed),
            "skipped" => Ok(Self::Skipped),
            "failed" => Ok(Self::Failed),
            other => Err(TrellisError::Store(format!("unknown status '{}'", other))),
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::WaitingForInput => "waiting_for_input",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// A reference to a file produced by a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileReference {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// The template-addressable projection of a node's output. Downstream
/// components read `outcome.text`, `outcome.structured`, `outcome.files`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileReference>,
}

impl Outcome {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn structured(value: Value) -> Self {
        Self {
            structured: Some(value),
            ..Default::default()
        }
    }
}

/// Input delivered to a node before execution, either statically
/// registered or supplied by an input-event handler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInput {
    /// Overrides merged into the node's settings before template
    /// resolution (shallow, key by key).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_override: Option<Value>,
    /// Free-form payload passed through to the executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// What a node executor returns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeOutput {
    /// Raw executor output, persisted verbatim.
    pub output: Value,
    /// Template-addressable projection of the output.
    pub outcome: Outcome,
}

/// Record of one terminal execution. Created exactly once per context;
/// shared as `Arc` so repeated reads observe the identical object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub path: ComponentPath,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl ExecutionResult {
    /// View of the result that templates address: `status`, `output`,
    /// `outcome.*`, `error`.
    pub fn as_value(&self) -> Value {
        serde_json::json!({
            "status": self.status,
            "output": self.output,
            "outcome": self.outcome,
            "error": self.error,
        })
    }
}

pub type SharedResult = Arc<ExecutionResult>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_id_rejects_dots_and_empty() {
        assert!(ElementId::new("node_a").is_ok());
        assert!(ElementId::new("node-a").is_ok());
        assert!(ElementId::new("a.b").is_err());
        assert!(ElementId::new("").is_err());
        assert!(ElementId::new("a b").is_err());
    }

    #[test]
    fn path_parent_and_prefix() {
        let root = ComponentPath::root(&ElementId::new("agent").unwrap());
        let flow = root.child(&ElementId::new("flow").unwrap());
        let node = flow.child(&ElementId::new("node").unwrap());
        assert_eq!(node.as_str(), "agent.flow.node");
        assert_eq!(node.parent(), Some(flow.clone()));
        assert_eq!(root.parent(), None);
        assert!(root.is_prefix_of(&node));
        assert!(flow.is_prefix_of(&flow));
        assert!(!node.is_prefix_of(&flow));
        // "agent.flowX" is not under "agent.flow"
        let other = root.child(&ElementId::new("flowX").unwrap());
        assert!(!flow.is_prefix_of(&other));
    }

    #[test]
    fn status_transitions() {
        use ExecutionStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Skipped));
        assert!(Running.can_transition_to(WaitingForInput));
        assert!(WaitingForInput.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(WaitingForInput.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Pending.can_transition_to(WaitingForInput));
        assert!(!Failed.can_transition_to(Completed));
    }

    #[test]
    fn component_path_parses_and_validates() {
        let p: ComponentPath = "agent.flow.node_c".parse().unwrap();
        assert_eq!(p.leaf(), "node_c");
        assert!("agent..node".parse::<ComponentPath>().is_err());
    }
}
