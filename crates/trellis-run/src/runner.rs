//! Run lifecycle: id generation, run directory, input wiring, and the
//! drive from definition to terminal state.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use trellis_core::definition::{ComponentDefinition, FlowEntry, NodeKind};
use trellis_core::error::{Result, TrellisError};
use trellis_core::event::{handler_fn, Event, EventChannel, EventKind};
use trellis_core::executor::ExecutorRegistry;
use trellis_core::types::{ComponentPath, ElementId, ExecutionStatus, NodeInput, SharedResult};
use trellis_engine::{ComponentExecutor, ContextArena};
use trellis_expr::Scope;

use crate::store::{RunStore, StoreHydrator, StoreRecorder};

/// Outcome of one run, returned by [`Runner::start`].
#[derive(Debug)]
pub struct RunReport {
    pub run_id: String,
    pub status: ExecutionStatus,
    pub error: Option<String>,
    pub run_dir: PathBuf,
    pub results: Vec<(ComponentPath, SharedResult)>,
}

/// Coordinates one run of a workflow definition.
pub struct Runner {
    root_id: ElementId,
    definition: ComponentDefinition,
    registry: ExecutorRegistry,
    channel: Arc<EventChannel>,
    cancel: CancellationToken,
    run_root: PathBuf,
    variables: Scope,
    static_inputs: HashMap<ComponentPath, NodeInput>,
    deferred_inputs: Vec<(String, EventKind)>,
    previous_run_id: Option<String>,
    resume_from: Option<ComponentPath>,
}

impl Runner {
    pub fn new(
        root_id: ElementId,
        definition: ComponentDefinition,
        registry: ExecutorRegistry,
    ) -> Self {
        Self {
            root_id,
            definition,
            registry,
            channel: Arc::new(EventChannel::new()),
            cancel: CancellationToken::new(),
            run_root: PathBuf::from("runs"),
            variables: Scope::new(),
            static_inputs: HashMap::new(),
            deferred_inputs: Vec::new(),
            previous_run_id: None,
            resume_from: None,
        }
    }

    pub fn with_run_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.run_root = root.into();
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    /// Answer `node_input_required` for a specific node without a live
    /// handler.
    pub fn with_static_input(mut self, path: ComponentPath, input: NodeInput) -> Self {
        self.static_inputs.insert(path, input);
        self
    }

    /// Publish a deferred event at start; the value lands in the root
    /// scope under `binding` once a handler resolves it, and nodes await
    /// it only when their templates reference the binding.
    pub fn with_deferred_input(mut self, binding: impl Into<String>, kind: EventKind) -> Self {
        self.deferred_inputs.push((binding.into(), kind));
        self
    }

    /// Resume from a previous run: components before `resume_from` are
    /// rehydrated from that run's records.
    pub fn with_resume(mut self, previous_run_id: impl Into<String>, resume_from: ComponentPath) -> Self {
        self.previous_run_id = Some(previous_run_id.into());
        self.resume_from = Some(resume_from);
        self
    }

    /// The event channel, for registering handlers before `start`.
    pub fn channel(&self) -> Arc<EventChannel> {
        self.channel.clone()
    }

    /// Token that aborts the run when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Validate without executing anything.
    pub fn validate(&self) -> Result<()> {
        self.definition.validate()?;
        let registered: HashSet<NodeKind> = self.registry.kinds().into_iter().collect();
        let mut required = HashSet::new();
        collect_kinds(&self.definition, &mut required);
        for kind in required {
            if !registered.contains(&kind) {
                return Err(TrellisError::ExecutorNotFound(kind.to_string()));
            }
        }
        if let Some(target) = &self.resume_from {
            let root = ComponentPath::root(&self.root_id);
            if !root.is_prefix_of(target) {
                return Err(TrellisError::Definition(format!(
                    "resume path '{}' is not under root '{}'",
                    target, root
                )));
            }
        }
        Ok(())
    }

    /// Drive the run to a terminal state. Engine-level failures (child
    /// failed, abort) land in the report; infrastructure errors
    /// propagate.
    pub async fn start(self) -> Result<RunReport> {
        self.validate()?;

        let run_id = generate_run_id(self.resume_from.is_some());
        let run_dir = self.run_root.join(&run_id);
        std::fs::create_dir_all(&run_dir)?;

        let store = Arc::new(RunStore::open(&self.run_root.join("trellis.db"))?);
        store.create_run(&run_id)?;
        info!(run_id = %run_id, root = %self.root_id, "run started");

        if !self.static_inputs.is_empty() {
            register_static_inputs(&self.channel, self.static_inputs.clone());
        }

        let mut executor = ComponentExecutor::new(self.registry.clone(), self.channel.clone())
            .with_cancellation(self.cancel.clone())
            .with_recorder(Arc::new(StoreRecorder::new(store.clone(), run_id.clone())));

        if let (Some(previous), Some(target)) = (&self.previous_run_id, &self.resume_from) {
            if store.load_run(previous)?.is_none() {
                return Err(TrellisError::Store(format!(
                    "previous run '{}' not found in {}",
                    previous,
                    self.run_root.display()
                )));
            }
            executor = executor.with_resume(
                Arc::new(StoreHydrator::new(store.clone(), previous.clone())),
                target.clone(),
            );
        }

        let mut vars = self.variables.clone();
        vars.insert("run_id".to_string(), json!(run_id));
        vars.insert("run_dir".to_string(), json!(run_dir.display().to_string()));
        vars.insert(
            "run_root".to_string(),
            json!(self.run_root.display().to_string()),
        );

        let deferred = self
            .deferred_inputs
            .iter()
            .map(|(binding, kind)| {
                self.channel.publish_deferred(
                    binding.clone(),
                    Event::new(ComponentPath::root(&self.root_id), kind.clone()),
                )
            })
            .collect();

        let mut arena = ContextArena::new();
        let outcome = executor
            .execute_with_deferred(
                &mut arena,
                self.root_id.clone(),
                &self.definition,
                vars,
                deferred,
            )
            .await;

        let (status, error) = match outcome {
            Ok(status) => {
                let error = arena
                    .root()
                    .and_then(|root| arena.get(root).result())
                    .and_then(|r| r.error.clone());
                (status, error)
            }
            Err(TrellisError::Aborted) => {
                warn!(run_id = %run_id, "run aborted");
                (ExecutionStatus::Failed, Some("run aborted".to_string()))
            }
            Err(e) => {
                store.finish_run(&run_id, ExecutionStatus::Failed, Some(&e.to_string()))?;
                return Err(e);
            }
        };

        store.finish_run(&run_id, status, error.as_deref())?;
        let results = arena.results();
        write_completion_record(&run_dir, &run_id, status, error.as_deref(), &results)?;
        info!(run_id = %run_id, status = %status, "run finished");

        Ok(RunReport {
            run_id,
            status,
            error,
            run_dir,
            results,
        })
    }
}

/// `run_<YYYYmmdd_HHMMSS>_<hex6>`, with a `rerun_` prefix for resumed
/// runs.
fn generate_run_id(resumed: bool) -> String {
    let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let suffix = Uuid::new_v4().simple().to_string();
    let prefix = if resumed { "rerun" } else { "run" };
    format!("{}_{}_{}", prefix, stamp, &suffix[..6])
}

fn register_static_inputs(channel: &EventChannel, inputs: HashMap<ComponentPath, NodeInput>) {
    let inputs = Arc::new(inputs);
    channel.subscribe(
        EventKind::NodeInputRequired,
        handler_fn(move |event| {
            let inputs = inputs.clone();
            Box::pin(async move {
                if let Some(input) = inputs.get(&event.path) {
                    event.mark_handled(Some(serde_json::to_value(input)?));
                }
                Ok(())
            })
        }),
    );
}

fn collect_kinds(definition: &ComponentDefinition, kinds: &mut HashSet<NodeKind>) {
    match definition {
        ComponentDefinition::Node(node) => {
            kinds.insert(node.kind());
        }
        ComponentDefinition::Flow(c) | ComponentDefinition::Agent(c) => {
            collect_entry_kinds(&c.entries, kinds);
        }
    }
}

fn collect_entry_kinds(entries: &[FlowEntry], kinds: &mut HashSet<NodeKind>) {
    for entry in entries {
        match entry {
            FlowEntry::Child { definition, .. } => collect_kinds(definition, kinds),
            FlowEntry::Conditional(block) => {
                collect_entry_kinds(&block.true_branch, kinds);
                collect_entry_kinds(&block.false_branch, kinds);
            }
            FlowEntry::Loop(block) => collect_entry_kinds(&block.body, kinds),
        }
    }
}

/// Machine-readable completion record alongside the run's artifacts.
fn write_completion_record(
    run_dir: &Path,
    run_id: &str,
    status: ExecutionStatus,
    error: Option<&str>,
    results: &[(ComponentPath, SharedResult)],
) -> Result<()> {
    let components: Vec<Value> = results
        .iter()
        .map(|(path, result)| {
            json!({
                "path": path,
                "status": result.status,
                "elapsed_ms": result.elapsed_ms,
                "error": result.error,
            })
        })
        .collect();
    let record = json!({
        "run_id": run_id,
        "status": status,
        "error": error,
        "completed_at": chrono::Utc::now(),
        "components": components,
    });
    std::fs::write(
        run_dir.join("run.json"),
        serde_json::to_string_pretty(&record)?,
    )?;
    Ok(())
}
