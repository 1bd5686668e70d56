//! Workflow definitions: agents contain flows, flows contain nodes and
//! control blocks. Definitions are plain data (serde round-trippable)
//! and are validated eagerly before any execution starts.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TrellisError};
use crate::types::ElementId;

/// One component in a workflow tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "component", rename_all = "snake_case")]
pub enum ComponentDefinition {
    Node(NodeDefinition),
    Flow(CompositeDefinition),
    Agent(CompositeDefinition),
}

impl ComponentDefinition {
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Node(node) => node.validate(),
            Self::Flow(c) | Self::Agent(c) => c.validate(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Node(_) => "node",
            Self::Flow(_) => "flow",
            Self::Agent(_) => "agent",
        }
    }
}

/// Ordered body of a flow or agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompositeDefinition {
    pub entries: Vec<FlowEntry>,
    /// Explicit routing overrides; definition order applies where no
    /// connection matches.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub connections: Vec<Connection>,
    /// Variables bound into this component's scope, visible to every
    /// descendant unless shadowed.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, Value>,
}

impl CompositeDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_child(mut self, id: ElementId, definition: ComponentDefinition) -> Self {
        self.entries.push(FlowEntry::Child {
            id,
            definition: Box::new(definition),
        });
        self
    }

    pub fn with_conditional(mut self, block: ConditionalBlock) -> Self {
        self.entries.push(FlowEntry::Conditional(block));
        self
    }

    pub fn with_loop(mut self, block: LoopBlock) -> Self {
        self.entries.push(FlowEntry::Loop(block));
        self
    }

    pub fn with_connection(mut self, connection: Connection) -> Self {
        self.connections.push(connection);
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    /// Id of each entry, in definition order.
    pub fn entry_ids(&self) -> Vec<&ElementId> {
        self.entries.iter().map(FlowEntry::id).collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.entries.is_empty() {
            return Err(TrellisError::Definition(
                "composite body must not be empty".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for entry in &self.entries {
            if !seen.insert(entry.id().clone()) {
                return Err(TrellisError::Definition(format!(
                    "duplicate sibling id '{}'",
                    entry.id()
                )));
            }
            entry.validate()?;
        }

        let order: HashMap<&ElementId, usize> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id(), i))
            .collect();
        for conn in &self.connections {
            let from = order.get(&conn.from).ok_or_else(|| {
                TrellisError::Definition(format!("connection from unknown sibling '{}'", conn.from))
            })?;
            let to = order.get(&conn.to).ok_or_else(|| {
                TrellisError::Definition(format!("connection to unknown sibling '{}'", conn.to))
            })?;
            // Only forward routing; backward edges would reintroduce
            // unbounded cycles outside of loop blocks.
            if to <= from {
                return Err(TrellisError::Definition(format!(
                    "connection '{}' -> '{}' must point forward",
                    conn.from, conn.to
                )));
            }
        }
        Ok(())
    }
}

/// One entry in a composite body: a named child component or an inline
/// control block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
pub enum FlowEntry {
    Child {
        id: ElementId,
        definition: Box<ComponentDefinition>,
    },
    Conditional(ConditionalBlock),
    Loop(LoopBlock),
}

impl FlowEntry {
    pub fn id(&self) -> &ElementId {
        match self {
            Self::Child { id, .. } => id,
            Self::Conditional(block) => &block.id,
            Self::Loop(block) => &block.id,
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::Child { definition, .. } => definition.validate(),
            Self::Conditional(block) => block.validate(),
            Self::Loop(block) => block.validate(),
        }
    }
}

/// Guarded branch block. Exactly one branch executes per evaluation; the
/// non-taken branch never receives execution contexts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalBlock {
    pub id: ElementId,
    /// Template expression evaluated strictly in the enclosing scope.
    pub guard: String,
    pub true_branch: Vec<FlowEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub false_branch: Vec<FlowEntry>,
}

impl ConditionalBlock {
    pub fn new(id: ElementId, guard: impl Into<String>) -> Self {
        Self {
            id,
            guard: guard.into(),
            true_branch: Vec::new(),
            false_branch: Vec::new(),
        }
    }

    pub fn with_true(mut self, id: ElementId, definition: ComponentDefinition) -> Self {
        self.true_branch.push(FlowEntry::Child {
            id,
            definition: Box::new(definition),
        });
        self
    }

    pub fn with_false(mut self, id: ElementId, definition: ComponentDefinition) -> Self {
        self.false_branch.push(FlowEntry::Child {
            id,
            definition: Box::new(definition),
        });
        self
    }

    fn validate(&self) -> Result<()> {
        if self.guard.trim().is_empty() {
            return Err(TrellisError::Definition(format!(
                "conditional '{}' has an empty guard",
                self.id
            )));
        }
        if self.true_branch.is_empty() {
            return Err(TrellisError::Definition(format!(
                "conditional '{}' must have a non-empty true branch",
                self.id
            )));
        }
        validate_entries(&self.true_branch)?;
        validate_entries(&self.false_branch)
    }
}

/// Iteration block. The iterable expression is evaluated once; each
/// element runs the body in a fresh `iter_N` child context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopBlock {
    pub id: ElementId,
    /// Template expression yielding the list to iterate.
    pub items: String,
    pub body: Vec<FlowEntry>,
    #[serde(default = "default_item_var")]
    pub item_var: String,
    #[serde(default = "default_index_var")]
    pub index_var: String,
    /// Iterations beyond this cap are silently dropped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<usize>,
}

fn default_item_var() -> String {
    "item".to_string()
}

fn default_index_var() -> String {
    "index".to_string()
}

impl LoopBlock {
    pub fn new(id: ElementId, items: impl Into<String>) -> Self {
        Self {
            id,
            items: items.into(),
            body: Vec::new(),
            item_var: default_item_var(),
            index_var: default_index_var(),
            max_iterations: None,
        }
    }

    pub fn with_body(mut self, id: ElementId, definition: ComponentDefinition) -> Self {
        self.body.push(FlowEntry::Child {
            id,
            definition: Box::new(definition),
        });
        self
    }

    pub fn with_vars(mut self, item_var: impl Into<String>, index_var: impl Into<String>) -> Self {
        self.item_var = item_var.into();
        self.index_var = index_var.into();
        self
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = Some(max);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.items.trim().is_empty() {
            return Err(TrellisError::Definition(format!(
                "loop '{}' has an empty iterable expression",
                self.id
            )));
        }
        if self.body.is_empty() {
            return Err(TrellisError::Definition(format!(
                "loop '{}' must have a non-empty body",
                self.id
            )));
        }
        if self.max_iterations == Some(0) {
            return Err(TrellisError::Definition(format!(
                "loop '{}' max_iterations must be at least 1",
                self.id
            )));
        }
        if self.item_var == self.index_var {
            return Err(TrellisError::Definition(format!(
                "loop '{}' item_var and index_var must differ",
                self.id
            )));
        }
        validate_entries(&self.body)
    }
}

fn validate_entries(entries: &[FlowEntry]) -> Result<()> {
    let mut seen = HashSet::new();
    for entry in entries {
        if !seen.insert(entry.id().clone()) {
            return Err(TrellisError::Definition(format!(
                "duplicate sibling id '{}'",
                entry.id()
            )));
        }
        entry.validate()?;
    }
    Ok(())
}

/// Explicit routing edge between two siblings of a composite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub from: ElementId,
    pub to: ElementId,
    pub trigger: ConnectionTrigger,
}

impl Connection {
    pub fn on_success(from: ElementId, to: ElementId) -> Self {
        Self {
            from,
            to,
            trigger: ConnectionTrigger::OnSuccess,
        }
    }

    pub fn on_failure(from: ElementId, to: ElementId) -> Self {
        Self {
            from,
            to,
            trigger: ConnectionTrigger::OnFailure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionTrigger {
    OnSuccess,
    OnFailure,
}

/// A leaf node: settings plus input wiring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDefinition {
    #[serde(flatten)]
    pub settings: NodeSettings,
    /// When true the engine publishes a blocking `node_input_required`
    /// event before resolving settings.
    #[serde(default)]
    pub input_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, Value>,
}

impl NodeDefinition {
    pub fn new(settings: NodeSettings) -> Self {
        Self {
            settings,
            input_required: false,
            input_timeout_secs: None,
            variables: HashMap::new(),
        }
    }

    pub fn with_input_required(mut self, timeout_secs: Option<u64>) -> Self {
        self.input_required = true;
        self.input_timeout_secs = timeout_secs;
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn kind(&self) -> NodeKind {
        self.settings.kind()
    }

    fn validate(&self) -> Result<()> {
        if self.input_timeout_secs == Some(0) {
            return Err(TrellisError::Definition(
                "input_timeout_secs must be at least 1".to_string(),
            ));
        }
        self.settings.validate()
    }
}

/// Closed set of node kinds. Dispatch to executors is by kind; settings
/// shapes are fixed per kind and every string field is a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "settings", rename_all = "snake_case")]
pub enum NodeSettings {
    Model(ModelSettings),
    Command(CommandSettings),
    FolderScan(FolderScanSettings),
}

impl NodeSettings {
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Model(_) => NodeKind::Model,
            Self::Command(_) => NodeKind::Command,
            Self::FolderScan(_) => NodeKind::FolderScan,
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::Model(s) if s.prompt.trim().is_empty() => Err(TrellisError::Definition(
                "model node prompt must not be empty".to_string(),
            )),
            Self::Command(s) if s.command.trim().is_empty() => Err(TrellisError::Definition(
                "command node command must not be empty".to_string(),
            )),
            Self::FolderScan(s) if s.root.trim().is_empty() => Err(TrellisError::Definition(
                "folder_scan node root must not be empty".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Model,
    Command,
    FolderScan,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::Command => "command",
            Self::FolderScan => "folder_scan",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Settings for a model-invocation node. Prompt fields render leniently
/// (errors become inline markers); everything else resolves strictly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    pub model: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instructions: Option<String>,
    /// Word cap applied to the rendered prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_prompt_words: Option<usize>,
    /// Provider-specific options, passed through to the executor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

/// Settings for a shell-command node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSettings {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(default = "default_command_timeout")]
    pub timeout_secs: u64,
    /// Non-zero exit fails the node when set.
    #[serde(default = "default_true")]
    pub fail_on_nonzero: bool,
}

fn default_command_timeout() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

/// Settings for a directory-listing node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderScanSettings {
    pub root: String,
    /// Regex filter applied to paths relative to `root`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
    #[serde(default)]
    pub include_hidden: bool,
}
