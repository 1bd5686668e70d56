//! Component execution: nodes, composites, and control blocks.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use trellis_core::definition::{
    ComponentDefinition, CompositeDefinition, ConditionalBlock, Connection, ConnectionTrigger,
    FlowEntry, LoopBlock, NodeDefinition,
};
use trellis_core::error::{Result, TrellisError};
use trellis_core::event::{Event, EventChannel, EventKind};
use trellis_core::executor::{ExecutionRequest, ExecutorRegistry};
use trellis_core::types::{
    ComponentPath, ElementId, ExecutionResult, ExecutionStatus, NodeInput, Outcome,
};
use trellis_expr::{referenced_roots, truthy, Scope};

use crate::context::{ContextArena, ContextId};
use crate::lookup::ContextLookup;
use crate::record::{ComponentRecord, ExecutionRecorder, ResultHydrator};
use crate::settings::{merge_override, resolve_settings};

/// Drives one workflow tree to a terminal status.
///
/// The executor owns no contexts; the caller supplies a [`ContextArena`]
/// and keeps it afterwards for inspection.
pub struct ComponentExecutor {
    registry: ExecutorRegistry,
    channel: Arc<EventChannel>,
    cancel: CancellationToken,
    recorder: Option<Arc<dyn ExecutionRecorder>>,
    hydrator: Option<Arc<dyn ResultHydrator>>,
    resume_from: Option<ComponentPath>,
    resume_reached: AtomicBool,
}

impl ComponentExecutor {
    pub fn new(registry: ExecutorRegistry, channel: Arc<EventChannel>) -> Self {
        Self {
            registry,
            channel,
            cancel: CancellationToken::new(),
            recorder: None,
            hydrator: None,
            resume_from: None,
            resume_reached: AtomicBool::new(false),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn ExecutionRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Resume a previous run: components strictly before `resume_from`
    /// (in traversal order) are rehydrated from the hydrator instead of
    /// being executed.
    pub fn with_resume(
        mut self,
        hydrator: Arc<dyn ResultHydrator>,
        resume_from: ComponentPath,
    ) -> Self {
        self.hydrator = Some(hydrator);
        self.resume_from = Some(resume_from);
        self
    }

    /// Execute a definition as the root of a run. `vars` are seeded into
    /// the root scope on top of the definition's own variables.
    pub async fn execute(
        &self,
        arena: &mut ContextArena,
        id: ElementId,
        definition: &ComponentDefinition,
        vars: Scope,
    ) -> Result<ExecutionStatus> {
        self.execute_with_deferred(arena, id, definition, vars, Vec::new())
            .await
    }

    /// Like [`execute`](Self::execute), with deferred event values bound
    /// at the root so any descendant template can reference them.
    pub async fn execute_with_deferred(
        &self,
        arena: &mut ContextArena,
        id: ElementId,
        definition: &ComponentDefinition,
        vars: Scope,
        deferred: Vec<trellis_core::event::DeferredValue>,
    ) -> Result<ExecutionStatus> {
        let mut root_vars = component_variables(definition);
        root_vars.extend(vars);
        let ctx = arena.create_root(id, root_vars);
        for value in deferred {
            arena.bind_deferred(ctx, value);
        }

        match self.execute_component(arena, ctx, definition).await {
            Ok(status) => Ok(status),
            Err(TrellisError::Aborted) => {
                self.fail_live_contexts(arena);
                Err(TrellisError::Aborted)
            }
            Err(e) => Err(e),
        }
    }

    fn execute_component<'a>(
        &'a self,
        arena: &'a mut ContextArena,
        ctx: ContextId,
        definition: &'a ComponentDefinition,
    ) -> BoxFuture<'a, Result<ExecutionStatus>> {
        Box::pin(async move {
            if self.should_rehydrate(&arena.get(ctx).path) {
                return self.rehydrate(arena, ctx);
            }
            if self.cancel.is_cancelled() {
                return Err(TrellisError::Aborted);
            }
            match definition {
                ComponentDefinition::Node(node) => self.execute_node(arena, ctx, node).await,
                ComponentDefinition::Flow(c) | ComponentDefinition::Agent(c) => {
                    self.execute_composite(arena, ctx, c).await
                }
            }
        })
    }

    // ---- nodes ---------------------------------------------------------

    async fn execute_node(
        &self,
        arena: &mut ContextArena,
        ctx: ContextId,
        node: &NodeDefinition,
    ) -> Result<ExecutionStatus> {
        let path = arena.get(ctx).path.clone();
        let started_at = Utc::now();
        let started = Instant::now();
        arena.set_status(ctx, ExecutionStatus::Running)?;
        info!(path = %path, kind = %node.kind(), "node started");
        self.channel
            .publish(
                Event::new(path.clone(), EventKind::NodeExecutionStart)
                    .with_payload(json!({"kind": node.kind().as_str()})),
            )
            .await;

        let mut settings_value = serde_json::to_value(&node.settings)?;

        let input = if node.input_required {
            self.collect_input(arena, ctx, &path, node, &settings_value).await?
        } else {
            NodeInput::default()
        };

        if let Some(overrides) = &input.settings_override {
            merge_override(&mut settings_value, overrides);
        }

        self.await_referenced_deferred(arena, ctx, &settings_value).await?;

        let scope = arena.effective_scope(ctx);
        let raw_settings = settings_value.clone();
        let resolved = {
            let lookup = ContextLookup::new(arena, ctx);
            resolve_settings(settings_value, &scope, &lookup)
        };
        let resolved = match resolved {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %path, error = %e, "settings resolution failed");
                return self
                    .finish(
                        arena,
                        ctx,
                        ExecutionStatus::Failed,
                        Value::Null,
                        Outcome::default(),
                        Some(e.to_string()),
                        started_at,
                        started,
                        Some(raw_settings),
                    )
                    .await;
            }
        };
        let resolved_value = serde_json::to_value(&resolved)?;

        let executor = self.registry.get(resolved.kind())?;
        let request = ExecutionRequest {
            path: path.clone(),
            settings: resolved,
            input,
            scope,
        };

        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => Err(TrellisError::Aborted),
            res = executor.execute(request) => res,
        };

        match outcome {
            Ok(output) => {
                self.finish(
                    arena,
                    ctx,
                    ExecutionStatus::Completed,
                    output.output,
                    output.outcome,
                    None,
                    started_at,
                    started,
                    Some(resolved_value),
                )
                .await
            }
            Err(TrellisError::Aborted) => Err(TrellisError::Aborted),
            Err(e) => {
                warn!(path = %path, error = %e, "node failed");
                self.finish(
                    arena,
                    ctx,
                    ExecutionStatus::Failed,
                    Value::Null,
                    Outcome::default(),
                    Some(e.to_string()),
                    started_at,
                    started,
                    Some(resolved_value),
                )
                .await
            }
        }
    }

    /// Publish a blocking `node_input_required` event and wait for a
    /// handler to answer. Timeout and unhandled delivery both fall back
    /// to the node's own defaults.
    async fn collect_input(
        &self,
        arena: &mut ContextArena,
        ctx: ContextId,
        path: &ComponentPath,
        node: &NodeDefinition,
        settings_value: &Value,
    ) -> Result<NodeInput> {
        arena.set_status(ctx, ExecutionStatus::WaitingForInput)?;
        let event = Event::new(path.clone(), EventKind::NodeInputRequired).with_payload(json!({
            "kind": node.kind().as_str(),
            "settings": settings_value.get("settings").cloned().unwrap_or(Value::Null),
        }));
        let deadline = node.input_timeout_secs.map(Duration::from_secs);

        let input = tokio::select! {
            _ = self.cancel.cancelled() => return Err(TrellisError::Aborted),
            delivered = self.channel.publish_blocking(event, deadline) => match delivered {
                Ok(event) if event.is_handled() => {
                    match serde_json::from_value::<NodeInput>(event.payload.clone()) {
                        Ok(input) => input,
                        Err(e) => {
                            warn!(path = %path, error = %e, "malformed input payload, using defaults");
                            NodeInput::default()
                        }
                    }
                }
                Ok(_) => {
                    debug!(path = %path, "input event unhandled, using defaults");
                    NodeInput::default()
                }
                Err(TrellisError::EventTimeout { waited_ms, .. }) => {
                    warn!(path = %path, waited_ms, "input wait timed out, using defaults");
                    NodeInput::default()
                }
                Err(e) => return Err(e),
            },
        };
        arena.set_status(ctx, ExecutionStatus::Running)?;
        Ok(input)
    }

    /// Await only those deferred bindings the node's templates reference.
    async fn await_referenced_deferred(
        &self,
        arena: &mut ContextArena,
        ctx: ContextId,
        settings_value: &Value,
    ) -> Result<()> {
        let mut roots = HashSet::new();
        collect_template_roots(settings_value, &mut roots);

        for root in roots {
            let Some((owner, deferred)) = arena.take_deferred(ctx, &root) else {
                continue;
            };
            debug!(binding = %root, "awaiting deferred value");
            let value = tokio::select! {
                _ = self.cancel.cancelled() => return Err(TrellisError::Aborted),
                v = deferred.wait() => v,
            };
            match value {
                Ok(v) => arena.set_variable(owner, root, v),
                // Leave the binding unresolved; templates that need it
                // will report an unknown variable.
                Err(e) => warn!(binding = %root, error = %e, "deferred value lost"),
            }
        }
        Ok(())
    }

    // ---- composites ----------------------------------------------------

    async fn execute_composite(
        &self,
        arena: &mut ContextArena,
        ctx: ContextId,
        composite: &CompositeDefinition,
    ) -> Result<ExecutionStatus> {
        let path = arena.get(ctx).path.clone();
        let started_at = Utc::now();
        let started = Instant::now();
        arena.set_status(ctx, ExecutionStatus::Running)?;
        info!(path = %path, children = composite.entries.len(), "component started");
        self.channel
            .publish(Event::new(path.clone(), EventKind::ComponentExecutionStart))
            .await;

        let order: std::collections::HashMap<&ElementId, usize> = composite
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id(), i))
            .collect();

        let mut idx = 0;
        while idx < composite.entries.len() {
            let entry = &composite.entries[idx];
            let status = self.execute_entry(arena, ctx, entry).await?;

            if let Some(conn) = route(&composite.connections, entry.id(), status) {
                debug!(
                    path = %path,
                    from = %conn.from,
                    to = %conn.to,
                    child_status = %status,
                    "following connection"
                );
                idx = order[&conn.to];
                continue;
            }

            if status == ExecutionStatus::Failed {
                let error = format!("child '{}' failed", entry.id());
                return self
                    .finish(
                        arena,
                        ctx,
                        ExecutionStatus::Failed,
                        Value::Null,
                        Outcome::default(),
                        Some(error),
                        started_at,
                        started,
                        None,
                    )
                    .await;
            }
            idx += 1;
        }

        self.finish(
            arena,
            ctx,
            ExecutionStatus::Completed,
            Value::Null,
            Outcome::default(),
            None,
            started_at,
            started,
            None,
        )
        .await
    }

    fn execute_entry<'a>(
        &'a self,
        arena: &'a mut ContextArena,
        parent: ContextId,
        entry: &'a FlowEntry,
    ) -> BoxFuture<'a, Result<ExecutionStatus>> {
        Box::pin(async move {
            match entry {
                FlowEntry::Child { id, definition } => {
                    let ctx =
                        arena.create_child(parent, id.clone(), component_variables(definition));
                    self.execute_component(arena, ctx, definition).await
                }
                FlowEntry::Conditional(block) => self.execute_conditional(arena, parent, block).await,
                FlowEntry::Loop(block) => self.execute_loop(arena, parent, block).await,
            }
        })
    }

    // ---- control blocks ------------------------------------------------

    async fn execute_conditional(
        &self,
        arena: &mut ContextArena,
        parent: ContextId,
        block: &ConditionalBlock,
    ) -> Result<ExecutionStatus> {
        let ctx = arena.create_child(parent, block.id.clone(), Scope::new());
        if self.should_rehydrate(&arena.get(ctx).path) {
            return self.rehydrate(arena, ctx);
        }
        if self.cancel.is_cancelled() {
            return Err(TrellisError::Aborted);
        }

        let path = arena.get(ctx).path.clone();
        let started_at = Utc::now();
        let started = Instant::now();
        arena.set_status(ctx, ExecutionStatus::Running)?;

        let scope = arena.effective_scope(ctx);
        let guard = {
            let lookup = ContextLookup::new(arena, ctx);
            trellis_expr::evaluate(&block.guard, &scope, &lookup)
        };
        let taken = match guard {
            Ok(v) => truthy(&v),
            Err(e) => {
                warn!(path = %path, error = %e, "guard evaluation failed");
                return self
                    .finish(
                        arena,
                        ctx,
                        ExecutionStatus::Failed,
                        Value::Null,
                        Outcome::default(),
                        Some(e.to_string()),
                        started_at,
                        started,
                        None,
                    )
                    .await;
            }
        };
        info!(path = %path, guard = taken, "conditional evaluated");

        let (entries, branch_name) = if taken {
            (&block.true_branch, "is_true")
        } else {
            (&block.false_branch, "is_false")
        };

        // A missing branch leaves only the skip marker behind; the
        // non-taken branch never gets contexts at all.
        if entries.is_empty() {
            return self
                .finish(
                    arena,
                    ctx,
                    ExecutionStatus::Skipped,
                    json!({"guard": taken}),
                    Outcome::default(),
                    None,
                    started_at,
                    started,
                    None,
                )
                .await;
        }

        let branch_id = ElementId::new(branch_name).map_err(|e| {
            TrellisError::Definition(format!("internal branch id: {}", e))
        })?;
        let branch_ctx = arena.create_child(ctx, branch_id, Scope::new());
        let branch_status = self
            .execute_sequence(arena, branch_ctx, entries, started_at)
            .await?;

        let (block_status, error) = match branch_status {
            ExecutionStatus::Failed => (
                ExecutionStatus::Failed,
                Some(format!("branch '{}' failed", branch_name)),
            ),
            _ => (ExecutionStatus::Completed, None),
        };
        self.finish(
            arena,
            ctx,
            block_status,
            json!({"guard": taken, "branch": branch_name}),
            Outcome::default(),
            error,
            started_at,
            started,
            None,
        )
        .await
    }

    async fn execute_loop(
        &self,
        arena: &mut ContextArena,
        parent: ContextId,
        block: &LoopBlock,
    ) -> Result<ExecutionStatus> {
        let ctx = arena.create_child(parent, block.id.clone(), Scope::new());
        if self.should_rehydrate(&arena.get(ctx).path) {
            return self.rehydrate(arena, ctx);
        }
        if self.cancel.is_cancelled() {
            return Err(TrellisError::Aborted);
        }

        let path = arena.get(ctx).path.clone();
        let started_at = Utc::now();
        let started = Instant::now();
        arena.set_status(ctx, ExecutionStatus::Running)?;

        let scope = arena.effective_scope(ctx);
        let items = {
            let lookup = ContextLookup::new(arena, ctx);
            trellis_expr::evaluate(&block.items, &scope, &lookup)
        };
        let items = match items {
            Ok(Value::Array(items)) => items,
            Ok(other) => {
                let error = format!("loop iterable must be a list, got {}", value_kind(&other));
                return self
                    .finish(
                        arena,
                        ctx,
                        ExecutionStatus::Failed,
                        Value::Null,
                        Outcome::default(),
                        Some(error),
                        started_at,
                        started,
                        None,
                    )
                    .await;
            }
            Err(e) => {
                warn!(path = %path, error = %e, "loop iterable evaluation failed");
                return self
                    .finish(
                        arena,
                        ctx,
                        ExecutionStatus::Failed,
                        Value::Null,
                        Outcome::default(),
                        Some(e.to_string()),
                        started_at,
                        started,
                        None,
                    )
                    .await;
            }
        };

        let limit = block
            .max_iterations
            .map(|m| m.min(items.len()))
            .unwrap_or(items.len());
        if limit < items.len() {
            // Truncation is silent by contract; leave a trace only.
            debug!(path = %path, total = items.len(), limit, "loop truncated");
        }
        info!(path = %path, iterations = limit, "loop started");

        let mut loop_status = ExecutionStatus::Completed;
        for (i, item) in items.into_iter().take(limit).enumerate() {
            let vars: Scope = [
                (block.item_var.clone(), item),
                (block.index_var.clone(), json!(i)),
            ]
            .into();
            let iter_ctx = arena.create_child(ctx, ElementId::iteration(i), vars);
            let iter_status = self
                .execute_sequence(arena, iter_ctx, &block.body, started_at)
                .await?;
            if iter_status == ExecutionStatus::Failed {
                loop_status = ExecutionStatus::Failed;
                break;
            }
        }

        let error = match loop_status {
            ExecutionStatus::Failed => Some("loop iteration failed".to_string()),
            _ => None,
        };
        self.finish(
            arena,
            ctx,
            loop_status,
            json!({"iterations": limit}),
            Outcome::default(),
            error,
            started_at,
            started,
            None,
        )
        .await
    }

    /// Run a flat entry list under a container context (loop iteration
    /// or conditional branch). No connections apply here.
    async fn execute_sequence(
        &self,
        arena: &mut ContextArena,
        ctx: ContextId,
        entries: &[FlowEntry],
        started_at: chrono::DateTime<Utc>,
    ) -> Result<ExecutionStatus> {
        let started = Instant::now();
        arena.set_status(ctx, ExecutionStatus::Running)?;

        let mut status = ExecutionStatus::Completed;
        for entry in entries {
            let child_status = self.execute_entry(arena, ctx, entry).await?;
            if child_status == ExecutionStatus::Failed {
                status = ExecutionStatus::Failed;
                break;
            }
        }

        let error = match status {
            ExecutionStatus::Failed => Some("child failed".to_string()),
            _ => None,
        };
        self.finish(
            arena,
            ctx,
            status,
            Value::Null,
            Outcome::default(),
            error,
            started_at,
            started,
            None,
        )
        .await
    }

    // ---- bookkeeping ---------------------------------------------------

    /// Record a context's terminal result, persist it, and publish the
    /// completion event. Nodes publish `node_execution_complete`;
    /// everything else `component_execution_complete`, keyed on whether
    /// resolved settings exist.
    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        arena: &mut ContextArena,
        ctx: ContextId,
        status: ExecutionStatus,
        output: Value,
        outcome: Outcome,
        error: Option<String>,
        started_at: chrono::DateTime<Utc>,
        started: Instant,
        resolved_settings: Option<Value>,
    ) -> Result<ExecutionStatus> {
        let path = arena.get(ctx).path.clone();
        arena.set_status(ctx, status)?;
        let result = ExecutionResult {
            path: path.clone(),
            status,
            output,
            outcome,
            error,
            started_at,
            completed_at: Utc::now(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        let shared = arena.record_result(ctx, result)?;

        if let Some(recorder) = &self.recorder {
            recorder.record(&ComponentRecord {
                path: path.clone(),
                status,
                resolved_settings: resolved_settings.clone(),
                result: Some((*shared).clone()),
            })?;
        }

        let kind = if resolved_settings.is_some() {
            EventKind::NodeExecutionComplete
        } else {
            EventKind::ComponentExecutionComplete
        };
        self.channel
            .publish(Event::new(path.clone(), kind).with_payload(shared.as_value()))
            .await;
        info!(path = %path, status = %status, "finished");
        Ok(status)
    }

    fn fail_live_contexts(&self, arena: &mut ContextArena) {
        for ctx in arena.live_contexts() {
            let path = arena.get(ctx).path.clone();
            // Pending contexts were never entered; only started ones
            // get failed and recorded.
            if arena.get(ctx).status == ExecutionStatus::Pending {
                continue;
            }
            if arena.set_status(ctx, ExecutionStatus::Failed).is_err() {
                continue;
            }
            let now = Utc::now();
            let _ = arena.record_result(
                ctx,
                ExecutionResult {
                    path: path.clone(),
                    status: ExecutionStatus::Failed,
                    output: Value::Null,
                    outcome: Outcome::default(),
                    error: Some("run aborted".to_string()),
                    started_at: now,
                    completed_at: now,
                    elapsed_ms: 0,
                },
            );
            warn!(path = %path, "failed by abort");
        }
    }

    // ---- resumption ----------------------------------------------------

    fn should_rehydrate(&self, path: &ComponentPath) -> bool {
        let Some(target) = &self.resume_from else {
            return false;
        };
        if self.resume_reached.load(Ordering::SeqCst) {
            return false;
        }
        if path == target {
            self.resume_reached.store(true, Ordering::SeqCst);
            return false;
        }
        // Ancestors of the resume target run live so traversal reaches it.
        !path.is_prefix_of(target)
    }

    /// Reconstruct a finished subtree from persisted records without
    /// invoking any executor.
    fn rehydrate(&self, arena: &mut ContextArena, ctx: ContextId) -> Result<ExecutionStatus> {
        let path = arena.get(ctx).path.clone();
        let hydrator = self.hydrator.as_ref().ok_or_else(|| TrellisError::MissingRecord {
            path: path.clone(),
        })?;

        let mut records = hydrator.load_subtree(&path)?;
        // Parents before children so context creation can follow paths.
        records.sort_by_key(|r| r.path.segments().count());

        let mut own_status = None;
        for record in records {
            let target = if record.path == path {
                ctx
            } else {
                self.materialize(arena, ctx, &path, &record.path)?
            };
            apply_record_status(arena, target, record.status)?;
            if let Some(result) = record.result {
                arena.record_result(target, result)?;
            }
            if record.path == path {
                own_status = Some(record.status);
            }
        }

        let status = own_status.ok_or(TrellisError::MissingRecord { path: path.clone() })?;
        debug!(path = %path, status = %status, "rehydrated");
        Ok(status)
    }

    /// Create the context chain for a rehydrated descendant path.
    fn materialize(
        &self,
        arena: &mut ContextArena,
        base: ContextId,
        base_path: &ComponentPath,
        target: &ComponentPath,
    ) -> Result<ContextId> {
        let relative = target
            .as_str()
            .strip_prefix(&format!("{}.", base_path.as_str()))
            .ok_or_else(|| TrellisError::MissingRecord {
                path: target.clone(),
            })?;

        let mut cursor = base;
        for seg in relative.split('.') {
            cursor = match arena.get(cursor).child(seg) {
                Some(child) => child,
                None => arena.create_child(cursor, ElementId::new(seg)?, Scope::new()),
            };
        }
        Ok(cursor)
    }
}

/// Find the connection to follow after a child finishes with `status`.
fn route<'a>(
    connections: &'a [Connection],
    from: &ElementId,
    status: ExecutionStatus,
) -> Option<&'a Connection> {
    let trigger = match status {
        ExecutionStatus::Completed => ConnectionTrigger::OnSuccess,
        ExecutionStatus::Failed => ConnectionTrigger::OnFailure,
        _ => return None,
    };
    connections
        .iter()
        .find(|c| c.from == *from && c.trigger == trigger)
}

fn component_variables(definition: &ComponentDefinition) -> Scope {
    let vars = match definition {
        ComponentDefinition::Node(n) => &n.variables,
        ComponentDefinition::Flow(c) | ComponentDefinition::Agent(c) => &c.variables,
    };
    vars.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

/// Collect every identifier any template string in `value` references.
fn collect_template_roots(value: &Value, roots: &mut HashSet<String>) {
    match value {
        Value::String(s) if s.contains('$') => roots.extend(referenced_roots(s)),
        Value::Array(items) => items.iter().for_each(|v| collect_template_roots(v, roots)),
        Value::Object(map) => map.values().for_each(|v| collect_template_roots(v, roots)),
        _ => {}
    }
}

fn apply_record_status(
    arena: &mut ContextArena,
    ctx: ContextId,
    status: ExecutionStatus,
) -> Result<()> {
    match status {
        ExecutionStatus::Completed | ExecutionStatus::Failed => {
            arena.set_status(ctx, ExecutionStatus::Running)?;
            arena.set_status(ctx, status)
        }
        other => arena.set_status(ctx, other),
    }
}

fn value_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}
