//! End-to-end engine tests with a scripted command executor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::json;

use trellis_core::definition::{
    CommandSettings, ComponentDefinition, CompositeDefinition, ConditionalBlock, Connection,
    LoopBlock, NodeDefinition, NodeKind, NodeSettings,
};
use trellis_core::error::Result;
use trellis_core::event::{handler_fn, DeferredResolver, Event, EventChannel, EventKind};
use trellis_core::executor::{ExecutionRequest, ExecutorRegistry, NodeExecutor};
use trellis_core::types::{ElementId, ExecutionStatus, NodeOutput, Outcome};
use trellis_engine::{ComponentExecutor, ComponentRecord, ContextArena, ExecutionRecorder, ResultHydrator};
use trellis_expr::Scope;

/// Echoes the resolved command back as outcome text; a command containing
/// `boom` fails. Counts invocations so resume tests can assert executors
/// were not re-run.
struct ScriptedExecutor {
    calls: Arc<AtomicUsize>,
}

impl NodeExecutor for ScriptedExecutor {
    fn kind(&self) -> NodeKind {
        NodeKind::Command
    }

    fn execute(&self, request: ExecutionRequest) -> BoxFuture<'_, Result<NodeOutput>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            let NodeSettings::Command(settings) = &request.settings else {
                panic!("scripted executor only handles command nodes");
            };
            if settings.command.contains("boom") {
                return Err(trellis_core::TrellisError::Executor {
                    path: request.path.clone(),
                    message: "scripted failure".to_string(),
                });
            }
            Ok(NodeOutput {
                output: json!({"command": settings.command}),
                outcome: Outcome::text(settings.command.clone()),
            })
        })
    }
}

fn id(s: &str) -> ElementId {
    ElementId::new(s).unwrap()
}

fn command_node(cmd: &str) -> ComponentDefinition {
    ComponentDefinition::Node(NodeDefinition::new(NodeSettings::Command(CommandSettings {
        command: cmd.to_string(),
        working_dir: None,
        env: HashMap::new(),
        timeout_secs: 60,
        fail_on_nonzero: true,
    })))
}

struct Harness {
    executor: ComponentExecutor,
    calls: Arc<AtomicUsize>,
}

fn harness() -> Harness {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = ExecutorRegistry::new();
    registry.register(Arc::new(ScriptedExecutor { calls: calls.clone() }));
    Harness {
        executor: ComponentExecutor::new(registry, Arc::new(EventChannel::new())),
        calls,
    }
}

fn outcome_text(arena: &ContextArena, path: &str) -> Option<String> {
    let ctx = arena.find(&path.parse().unwrap())?;
    arena.get(ctx).result()?.outcome.text.clone()
}

#[tokio::test]
async fn flow_runs_nodes_in_order_with_sibling_references() {
    let flow = CompositeDefinition::new()
        .with_child(id("first"), command_node("echo one"))
        .with_child(id("second"), command_node("echo $expr{first.outcome.text}"));
    let definition = ComponentDefinition::Flow(flow);

    let h = harness();
    let mut arena = ContextArena::new();
    let status = h
        .executor
        .execute(&mut arena, id("flow"), &definition, Scope::new())
        .await
        .unwrap();

    assert_eq!(status, ExecutionStatus::Completed);
    assert_eq!(outcome_text(&arena, "flow.first").unwrap(), "echo one");
    assert_eq!(outcome_text(&arena, "flow.second").unwrap(), "echo echo one");
}

#[tokio::test]
async fn conditional_executes_exactly_one_branch() {
    let flow = CompositeDefinition::new()
        .with_variable("count", json!(5))
        .with_conditional(
            ConditionalBlock::new(id("check"), "$expr{count > 3}")
                .with_true(id("high"), command_node("echo high"))
                .with_false(id("low"), command_node("echo low")),
        );
    let definition = ComponentDefinition::Flow(flow);

    let h = harness();
    let mut arena = ContextArena::new();
    let status = h
        .executor
        .execute(&mut arena, id("flow"), &definition, Scope::new())
        .await
        .unwrap();

    assert_eq!(status, ExecutionStatus::Completed);
    assert_eq!(
        outcome_text(&arena, "flow.check.is_true.high").unwrap(),
        "echo high"
    );
    // The non-taken branch never received contexts.
    assert!(arena.find(&"flow.check.is_false".parse().unwrap()).is_none());
    assert!(arena.find(&"flow.check.is_false.low".parse().unwrap()).is_none());
    assert_eq!(h.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn conditional_without_false_branch_is_skipped() {
    let flow = CompositeDefinition::new()
        .with_variable("count", json!(1))
        .with_conditional(
            ConditionalBlock::new(id("check"), "$expr{count > 3}")
                .with_true(id("high"), command_node("echo high")),
        )
        .with_child(id("after"), command_node("echo after"));
    let definition = ComponentDefinition::Flow(flow);

    let h = harness();
    let mut arena = ContextArena::new();
    let status = h
        .executor
        .execute(&mut arena, id("flow"), &definition, Scope::new())
        .await
        .unwrap();

    // The skip marker is recorded; the flow itself still completes.
    assert_eq!(status, ExecutionStatus::Completed);
    let check = arena.find(&"flow.check".parse().unwrap()).unwrap();
    assert_eq!(arena.get(check).status, ExecutionStatus::Skipped);
    assert_eq!(outcome_text(&arena, "flow.after").unwrap(), "echo after");
    assert_eq!(h.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn loop_caps_iterations_silently_and_binds_indexes() {
    let body = command_node("process $var{element} at $var{i}");
    let flow = CompositeDefinition::new()
        .with_variable("items", json!(["a", "b", "c", "d", "e"]))
        .with_loop(
            LoopBlock::new(id("each"), "$var{items}")
                .with_vars("element", "i")
                .with_max_iterations(3)
                .with_body(id("work"), body),
        );
    let definition = ComponentDefinition::Flow(flow);

    let h = harness();
    let mut arena = ContextArena::new();
    let status = h
        .executor
        .execute(&mut arena, id("flow"), &definition, Scope::new())
        .await
        .unwrap();

    assert_eq!(status, ExecutionStatus::Completed);
    for (i, item) in ["a", "b", "c"].iter().enumerate() {
        let path = format!("flow.each.iter_{}.work", i);
        assert_eq!(
            outcome_text(&arena, &path).unwrap(),
            format!("process {} at {}", item, i)
        );
    }
    // Truncated iterations never ran.
    assert!(arena.find(&"flow.each.iter_3".parse().unwrap()).is_none());
    assert_eq!(h.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn failed_child_fails_composite_without_routing() {
    let flow = CompositeDefinition::new()
        .with_child(id("a"), command_node("boom"))
        .with_child(id("b"), command_node("echo never"));
    let definition = ComponentDefinition::Flow(flow);

    let h = harness();
    let mut arena = ContextArena::new();
    let status = h
        .executor
        .execute(&mut arena, id("flow"), &definition, Scope::new())
        .await
        .unwrap();

    assert_eq!(status, ExecutionStatus::Failed);
    // The successor after the failed node never ran.
    assert!(arena.find(&"flow.b".parse().unwrap()).is_none());
}

#[tokio::test]
async fn on_failure_connection_routes_to_error_handler() {
    let flow = CompositeDefinition::new()
        .with_child(id("a"), command_node("boom"))
        .with_child(id("skipped"), command_node("echo skipped"))
        .with_child(id("cleanup"), command_node("echo cleanup"))
        .with_connection(Connection::on_failure(id("a"), id("cleanup")));
    let definition = ComponentDefinition::Flow(flow);

    let h = harness();
    let mut arena = ContextArena::new();
    let status = h
        .executor
        .execute(&mut arena, id("flow"), &definition, Scope::new())
        .await
        .unwrap();

    // Routed around the failure; the jumped-over sibling never ran.
    assert_eq!(status, ExecutionStatus::Completed);
    assert!(arena.find(&"flow.skipped".parse().unwrap()).is_none());
    assert_eq!(outcome_text(&arena, "flow.cleanup").unwrap(), "echo cleanup");
}

#[tokio::test]
async fn on_success_connection_jumps_past_intermediates() {
    let flow = CompositeDefinition::new()
        .with_child(id("a"), command_node("echo a"))
        .with_child(id("middle"), command_node("echo middle"))
        .with_child(id("z"), command_node("echo z"))
        .with_connection(Connection::on_success(id("a"), id("z")));
    let definition = ComponentDefinition::Flow(flow);

    let h = harness();
    let mut arena = ContextArena::new();
    let status = h
        .executor
        .execute(&mut arena, id("flow"), &definition, Scope::new())
        .await
        .unwrap();

    assert_eq!(status, ExecutionStatus::Completed);
    assert!(arena.find(&"flow.middle".parse().unwrap()).is_none());
    assert_eq!(h.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn input_event_overrides_settings() {
    let node = NodeDefinition::new(NodeSettings::Command(CommandSettings {
        command: "echo default".to_string(),
        working_dir: None,
        env: HashMap::new(),
        timeout_secs: 60,
        fail_on_nonzero: true,
    }))
    .with_input_required(Some(5));
    let flow = CompositeDefinition::new().with_child(id("ask"), ComponentDefinition::Node(node));
    let definition = ComponentDefinition::Flow(flow);

    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = ExecutorRegistry::new();
    registry.register(Arc::new(ScriptedExecutor { calls }));

    let channel = Arc::new(EventChannel::new());
    channel.subscribe(
        EventKind::NodeInputRequired,
        handler_fn(|event| {
            Box::pin(async move {
                event.mark_handled(Some(json!({
                    "settings_override": {"command": "echo provided"}
                })));
                Ok(())
            })
        }),
    );

    let executor = ComponentExecutor::new(registry, channel);
    let mut arena = ContextArena::new();
    let status = executor
        .execute(&mut arena, id("flow"), &definition, Scope::new())
        .await
        .unwrap();

    assert_eq!(status, ExecutionStatus::Completed);
    assert_eq!(outcome_text(&arena, "flow.ask").unwrap(), "echo provided");
}

#[tokio::test]
async fn unanswered_input_falls_back_to_node_defaults() {
    let node = NodeDefinition::new(NodeSettings::Command(CommandSettings {
        command: "echo default".to_string(),
        working_dir: None,
        env: HashMap::new(),
        timeout_secs: 60,
        fail_on_nonzero: true,
    }))
    .with_input_required(Some(5));
    let flow = CompositeDefinition::new().with_child(id("ask"), ComponentDefinition::Node(node));
    let definition = ComponentDefinition::Flow(flow);

    // No subscriber anywhere: the event comes back unhandled and the
    // node runs with the settings it was defined with.
    let h = harness();
    let mut arena = ContextArena::new();
    let status = h
        .executor
        .execute(&mut arena, id("flow"), &definition, Scope::new())
        .await
        .unwrap();

    assert_eq!(status, ExecutionStatus::Completed);
    assert_eq!(outcome_text(&arena, "flow.ask").unwrap(), "echo default");
    assert_eq!(h.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn input_timeout_falls_back_to_node_defaults() {
    let node = NodeDefinition::new(NodeSettings::Command(CommandSettings {
        command: "echo default".to_string(),
        working_dir: None,
        env: HashMap::new(),
        timeout_secs: 60,
        fail_on_nonzero: true,
    }))
    .with_input_required(Some(1));
    let flow = CompositeDefinition::new().with_child(id("ask"), ComponentDefinition::Node(node));
    let definition = ComponentDefinition::Flow(flow);

    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = ExecutorRegistry::new();
    registry.register(Arc::new(ScriptedExecutor { calls: calls.clone() }));

    // The handler stalls well past the node's deadline and never answers.
    let channel = Arc::new(EventChannel::new());
    channel.subscribe(
        EventKind::NodeInputRequired,
        handler_fn(|_event| {
            Box::pin(async move {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                Ok(())
            })
        }),
    );

    let executor = ComponentExecutor::new(registry, channel);
    let mut arena = ContextArena::new();
    let status = executor
        .execute(&mut arena, id("flow"), &definition, Scope::new())
        .await
        .unwrap();

    // Timed-out input never fails the run.
    assert_eq!(status, ExecutionStatus::Completed);
    assert_eq!(outcome_text(&arena, "flow.ask").unwrap(), "echo default");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn deferred_binding_awaited_only_when_referenced() {
    let flow = CompositeDefinition::new()
        .with_child(id("use"), command_node("echo $var{answer}"));
    let definition = ComponentDefinition::Flow(flow);

    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = ExecutorRegistry::new();
    registry.register(Arc::new(ScriptedExecutor { calls }));
    let channel = Arc::new(EventChannel::new());

    // `answer` is resolved by its handler and referenced by the node.
    channel.subscribe(
        EventKind::Custom("fetch".to_string()),
        handler_fn(|event| {
            Box::pin(async move {
                if let Some(resolver) = event.take_resolver() {
                    resolver.resolve(json!("42"));
                }
                Ok(())
            })
        }),
    );
    // `ignored` is taken by a handler that parks its resolver forever.
    // Nothing references it, so the run must finish without waiting;
    // if the engine awaited it eagerly this test would hang.
    let parked: Arc<Mutex<Vec<DeferredResolver>>> = Arc::new(Mutex::new(Vec::new()));
    let parked_in_handler = parked.clone();
    channel.subscribe(
        EventKind::Custom("hold".to_string()),
        handler_fn(move |event| {
            let parked = parked_in_handler.clone();
            Box::pin(async move {
                if let Some(resolver) = event.take_resolver() {
                    parked.lock().unwrap().push(resolver);
                }
                Ok(())
            })
        }),
    );

    let answer = channel.publish_deferred(
        "answer",
        Event::new("flow".parse().unwrap(), EventKind::Custom("fetch".to_string())),
    );
    let ignored = channel.publish_deferred(
        "ignored",
        Event::new("flow".parse().unwrap(), EventKind::Custom("hold".to_string())),
    );

    let executor = ComponentExecutor::new(registry, channel);
    let mut arena = ContextArena::new();
    let status = executor
        .execute_with_deferred(
            &mut arena,
            id("flow"),
            &definition,
            Scope::new(),
            vec![answer, ignored],
        )
        .await
        .unwrap();

    assert_eq!(status, ExecutionStatus::Completed);
    assert_eq!(outcome_text(&arena, "flow.use").unwrap(), "echo 42");
    // The unreferenced binding is still parked, unresolved.
    assert_eq!(parked.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn failed_branch_fails_conditional_with_error_detail() {
    let flow = CompositeDefinition::new()
        .with_variable("flag", json!(true))
        .with_conditional(
            ConditionalBlock::new(id("check"), "$expr{flag}")
                .with_true(id("bad"), command_node("boom")),
        );
    let definition = ComponentDefinition::Flow(flow);

    let h = harness();
    let mut arena = ContextArena::new();
    let status = h
        .executor
        .execute(&mut arena, id("flow"), &definition, Scope::new())
        .await
        .unwrap();

    assert_eq!(status, ExecutionStatus::Failed);
    let check = arena.find(&"flow.check".parse().unwrap()).unwrap();
    let result = arena.get(check).result().unwrap();
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.error.as_deref(), Some("branch 'is_true' failed"));
}

#[derive(Default)]
struct MemoryStore {
    records: Mutex<Vec<ComponentRecord>>,
}

impl ExecutionRecorder for MemoryStore {
    fn record(&self, record: &ComponentRecord) -> Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

impl ResultHydrator for MemoryStore {
    fn load_subtree(&self, path: &trellis_core::ComponentPath) -> Result<Vec<ComponentRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| path.is_prefix_of(&r.path))
            .cloned()
            .collect())
    }
}

#[tokio::test]
async fn resume_rehydrates_earlier_components_without_reexecuting() {
    let flow = CompositeDefinition::new()
        .with_child(id("node_a"), command_node("echo a"))
        .with_child(id("node_b"), command_node("echo b"))
        .with_child(
            id("node_c"),
            command_node("echo c after $expr{node_a.outcome.text}"),
        );
    let definition = ComponentDefinition::Agent(
        CompositeDefinition::new().with_child(id("flow"), ComponentDefinition::Flow(flow)),
    );

    // First run records everything.
    let store = Arc::new(MemoryStore::default());
    let h1 = harness();
    let executor = h1.executor.with_recorder(store.clone());
    let mut arena = ContextArena::new();
    executor
        .execute(&mut arena, id("agent"), &definition, Scope::new())
        .await
        .unwrap();
    assert_eq!(h1.calls.load(Ordering::SeqCst), 3);

    // Second run resumes from node_c: a and b come back from the store.
    let h2 = harness();
    let executor = h2
        .executor
        .with_recorder(store.clone())
        .with_resume(store, "agent.flow.node_c".parse().unwrap());
    let mut arena = ContextArena::new();
    let status = executor
        .execute(&mut arena, id("agent"), &definition, Scope::new())
        .await
        .unwrap();

    assert_eq!(status, ExecutionStatus::Completed);
    assert_eq!(h2.calls.load(Ordering::SeqCst), 1);
    // Rehydrated results resolve for the resumed node's templates.
    assert_eq!(
        outcome_text(&arena, "agent.flow.node_c").unwrap(),
        "echo c after echo a"
    );
    assert_eq!(outcome_text(&arena, "agent.flow.node_a").unwrap(), "echo a");
}

#[tokio::test]
async fn resume_without_record_is_an_error() {
    let flow = CompositeDefinition::new()
        .with_child(id("node_a"), command_node("echo a"))
        .with_child(id("node_b"), command_node("echo b"));
    let definition = ComponentDefinition::Flow(flow);

    let store = Arc::new(MemoryStore::default());
    let h = harness();
    let executor = h
        .executor
        .with_resume(store, "flow.node_b".parse().unwrap());
    let mut arena = ContextArena::new();
    let err = executor
        .execute(&mut arena, id("flow"), &definition, Scope::new())
        .await
        .unwrap_err();
    assert!(matches!(err, trellis_core::TrellisError::MissingRecord { .. }));
}
