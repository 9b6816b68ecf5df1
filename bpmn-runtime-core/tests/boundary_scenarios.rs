//! Boundary routing scenarios driven through the public API.

use bpmn_runtime_core::{
    CancelType, ContainerScope, EngineConfig, EventSink, EventSpec, FlowError, ListenerToken,
    MemoryEventSink, NodeDefinition, NodeInstanceId, NodeInstanceKind, NodeInstanceState,
    ProcessDefinition, ProcessInstance, ProcessRuntime, ProcessState, RuntimeEvent, SignalOutcome,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

fn host_with_boundary(event_type: &str, cancel_activity: bool) -> ProcessInstance {
    let def = ProcessDefinition::builder("scenario")
        .node(NodeDefinition::activity("Task1"))
        .node(NodeDefinition::boundary(
            "Boundary1",
            "Task1",
            EventSpec::new(event_type),
            cancel_activity,
        ))
        .node(NodeDefinition::activity("Handler"))
        .node(NodeDefinition::activity("Filler"))
        .connect("Boundary1", "Handler")
        .build()
        .unwrap();
    ProcessInstance::new(Arc::new(def), BTreeMap::new())
}

fn boundary_for(pi: &ProcessInstance, host: NodeInstanceId) -> NodeInstanceId {
    pi.get_node_instances(true)
        .unwrap()
        .into_iter()
        .find(|n| {
            matches!(n.kind(), NodeInstanceKind::Boundary { host_instance: Some(h), .. } if *h == host)
        })
        .map(|n| n.id())
        .unwrap()
}

/// Every registered listener belongs to a node instance that is still active.
fn assert_no_dangling_listeners(pi: &ProcessInstance) {
    for event_type in pi.listeners().event_types() {
        for token in pi.listeners().listeners_for(&event_type) {
            let node = pi.node_instance(token.0).unwrap_or_else(|_| {
                panic!("listener {} on {event_type} outlived its node instance", token.0)
            });
            assert_eq!(node.state(), NodeInstanceState::Active);
        }
    }
}

fn outcome_of(outcomes: &[(NodeInstanceId, SignalOutcome)], id: NodeInstanceId) -> SignalOutcome {
    outcomes
        .iter()
        .find(|(n, _)| *n == id)
        .map(|(_, o)| *o)
        .unwrap()
}

// ─── Scenarios ────────────────────────────────────────────────

#[test]
fn error_on_active_host_fires_boundary() {
    let mut pi = host_with_boundary("Error-1", false);
    let host = pi.start_node("Task1", ContainerScope::Process).unwrap();
    let boundary = boundary_for(&pi, host);
    assert!(!pi.activating_node_ids().contains("Task1"));

    let outcomes = pi.signal_event("Error-1", json!(null)).unwrap();
    assert_eq!(outcomes, vec![(boundary, SignalOutcome::Fired)]);
    assert!(pi.node_instance(boundary).is_err());
    assert!(pi.completed_node_ids().contains("Boundary1"));
    assert!(pi
        .get_node_instances(false)
        .unwrap()
        .iter()
        .any(|n| n.node_id() == "Handler"));
    assert_no_dangling_listeners(&pi);
}

#[test]
fn error_after_host_completed_cancels_boundary() {
    let mut pi = host_with_boundary("Error-1", false);
    let host = pi.start_node("Task1", ContainerScope::Process).unwrap();
    // started on its own, so not bound to the host occurrence
    let boundary = pi.start_node("Boundary1", ContainerScope::Process).unwrap();
    pi.complete(host).unwrap();
    assert!(pi.completed_node_ids().contains("Task1"));
    assert_eq!(pi.state(), ProcessState::Active);

    let outcome = pi.signal_boundary(boundary, "Error-1", &json!(null)).unwrap();
    assert_eq!(outcome, SignalOutcome::Cancelled);
    assert!(pi.node_instance(boundary).is_err());
    assert!(!pi.completed_node_ids().contains("Boundary1"));
    assert!(pi.listeners().is_empty());
    // the teardown emptied the top level after a normal completion
    assert_eq!(pi.state(), ProcessState::Completed);
}

#[test]
fn compensation_after_host_completed_fires_boundary() {
    let mut pi = host_with_boundary("Compensation-Task1", false);
    // keeps the process running while compensation is requested
    pi.start_node("Filler", ContainerScope::Process).unwrap();
    let host = pi.start_node("Task1", ContainerScope::Process).unwrap();
    let boundary = boundary_for(&pi, host);
    pi.complete(host).unwrap();

    let outcomes = pi.signal_event("Compensation-Task1", json!(null)).unwrap();
    assert_eq!(outcomes, vec![(boundary, SignalOutcome::Fired)]);
    assert!(pi.completed_node_ids().contains("Boundary1"));
    assert_no_dangling_listeners(&pi);
}

#[test]
fn compensation_while_host_running_cancels_boundary() {
    let mut pi = host_with_boundary("Compensation-Task1", false);
    let host = pi.start_node("Task1", ContainerScope::Process).unwrap();
    let boundary = boundary_for(&pi, host);

    let outcomes = pi.signal_event("Compensation-Task1", json!(null)).unwrap();
    assert_eq!(outcomes, vec![(boundary, SignalOutcome::Cancelled)]);
    assert!(pi.node_instance(host).is_ok());
    assert!(!pi.completed_node_ids().contains("Boundary1"));
    assert!(pi.listeners().is_empty());
}

#[test]
fn timer_fires_only_for_its_own_host_occurrence() {
    let mut pi = host_with_boundary("Timer-99", true);
    for _ in 0..6 {
        pi.start_node("Filler", ContainerScope::Process).unwrap();
    }
    let first = pi.create_node_instance("Task1", ContainerScope::Process).unwrap();
    let second = pi.create_node_instance("Task1", ContainerScope::Process).unwrap();
    assert_eq!((first, second), (NodeInstanceId(7), NodeInstanceId(8)));
    pi.trigger(first).unwrap();
    pi.trigger(second).unwrap();
    let first_boundary = boundary_for(&pi, first);
    let second_boundary = boundary_for(&pi, second);

    let outcomes = pi.signal_event("Timer-99", json!(7)).unwrap();
    assert_eq!(outcome_of(&outcomes, first_boundary), SignalOutcome::Fired);
    assert_eq!(outcome_of(&outcomes, second_boundary), SignalOutcome::Ignored);

    // interrupting: only occurrence 7 is gone
    assert!(pi.node_instance(first).is_err());
    assert_eq!(
        pi.node_instance(second).unwrap().state(),
        NodeInstanceState::Active
    );
    assert!(pi
        .listeners()
        .is_registered("Timer-99", ListenerToken(second_boundary)));

    // payload naming the other occurrence, as a string
    let outcomes = pi.signal_event("Timer-99", json!("8")).unwrap();
    assert_eq!(outcomes, vec![(second_boundary, SignalOutcome::Fired)]);
    assert_no_dangling_listeners(&pi);
}

// ─── Process completion ───────────────────────────────────────

#[test]
fn host_completion_releases_boundary_and_completes_process() {
    let mut pi = host_with_boundary("Error-1", false);
    let host = pi.start_node("Task1", ContainerScope::Process).unwrap();
    let boundary = boundary_for(&pi, host);

    pi.complete(host).unwrap();
    assert!(pi.node_instance(boundary).is_err());
    assert!(pi.get_node_instances(true).unwrap().is_empty());
    assert!(pi.listeners().is_empty());
    assert_eq!(pi.state(), ProcessState::Completed);

    assert!(pi.signal_event("Error-1", json!(null)).unwrap().is_empty());
    assert_eq!(pi.state(), ProcessState::Completed);
}

#[test]
fn leftover_compensation_handler_does_not_block_completion() {
    let mut pi = host_with_boundary("Compensation-Task1", false);
    let host = pi.start_node("Task1", ContainerScope::Process).unwrap();
    let boundary = boundary_for(&pi, host);
    let filler = pi.start_node("Filler", ContainerScope::Process).unwrap();

    pi.complete(host).unwrap();
    // compensation stays armed while the process runs
    assert!(pi
        .listeners()
        .is_registered("Compensation-Task1", ListenerToken(boundary)));
    assert_eq!(pi.state(), ProcessState::Active);

    pi.complete(filler).unwrap();
    assert_eq!(pi.state(), ProcessState::Completed);
    assert!(pi.listeners().is_empty());
    let events = pi.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        RuntimeEvent::BoundaryCancelled { node_instance_id, .. } if *node_instance_id == boundary
    )));
    assert!(matches!(events.last(), Some(RuntimeEvent::ProcessCompleted)));
}

#[test]
fn abort_never_reports_completion() {
    let mut pi = host_with_boundary("Error-1", false);
    let first = pi.start_node("Filler", ContainerScope::Process).unwrap();
    pi.start_node("Task1", ContainerScope::Process).unwrap();
    pi.complete(first).unwrap();

    pi.abort().unwrap();
    assert_eq!(pi.state(), ProcessState::Aborted);
    let events = pi.drain_events();
    assert!(!events
        .iter()
        .any(|e| matches!(e, RuntimeEvent::ProcessCompleted)));
}

// ─── Properties ───────────────────────────────────────────────

#[test]
fn no_listener_survives_its_node_instance() {
    let def = ProcessDefinition::builder("mixed")
        .node(NodeDefinition::sub_process("Sub", &["Inner", "Wait"]))
        .node(NodeDefinition::activity("Inner"))
        .node(NodeDefinition::event("Wait", EventSpec::new("Message-go")))
        .node(NodeDefinition::boundary(
            "InnerTimer",
            "Inner",
            EventSpec::new("Timer-inner"),
            false,
        ))
        .node(NodeDefinition::boundary(
            "SubError",
            "Sub",
            EventSpec::new("Error-sub"),
            true,
        ))
        .node(NodeDefinition::activity("Outer"))
        .start_node("Sub")
        .start_node("Outer")
        .build()
        .unwrap();
    let mut pi = ProcessInstance::new(Arc::new(def), BTreeMap::new());
    pi.start().unwrap();
    assert_no_dangling_listeners(&pi);
    assert_eq!(pi.listeners().event_types().len(), 3);

    let inner = pi
        .get_node_instances(true)
        .unwrap()
        .into_iter()
        .find(|n| n.node_id() == "Inner")
        .map(|n| n.id())
        .unwrap();
    pi.complete(inner).unwrap();
    assert_no_dangling_listeners(&pi);

    pi.signal_event("Message-go", json!("x")).unwrap();
    assert_no_dangling_listeners(&pi);

    let outcomes = pi.signal_event("Error-sub", json!(null)).unwrap();
    assert_eq!(outcomes[0].1, SignalOutcome::Fired);
    assert_no_dangling_listeners(&pi);

    pi.abort().unwrap();
    assert!(pi.listeners().is_empty());
}

#[test]
fn boundary_on_cancelled_host_is_torn_down() {
    let def = ProcessDefinition::builder("cancelled")
        .node(NodeDefinition::activity("Task1"))
        .node(NodeDefinition::boundary(
            "OnError",
            "Task1",
            EventSpec::new("Error-1"),
            true,
        ))
        .node(NodeDefinition::boundary(
            "Undo",
            "Task1",
            EventSpec::new("Compensation-Task1"),
            false,
        ))
        .build()
        .unwrap();
    let mut pi = ProcessInstance::new(Arc::new(def), BTreeMap::new());
    let host = pi.start_node("Task1", ContainerScope::Process).unwrap();
    assert_eq!(pi.listeners().event_types().len(), 2);

    pi.cancel(host, CancelType::Aborted).unwrap();
    // a cancelled occurrence never completes, so nothing is left to compensate
    assert!(pi.listeners().is_empty());
    assert!(pi.get_node_instances(true).unwrap().is_empty());
    assert!(pi.signal_event("Error-1", json!(null)).unwrap().is_empty());
    assert_eq!(pi.state(), ProcessState::Active);
}

#[test]
fn nested_boundary_teardown_happens_once() {
    let def = ProcessDefinition::builder("nested")
        .node(NodeDefinition::sub_process("Outer", &["Middle"]))
        .node(NodeDefinition::sub_process("Middle", &["Task1"]))
        .node(NodeDefinition::activity("Task1"))
        .node(NodeDefinition::boundary(
            "Deep",
            "Task1",
            EventSpec::new("Error-deep"),
            false,
        ))
        .start_node("Outer")
        .build()
        .unwrap();
    let mut pi = ProcessInstance::new(Arc::new(def), BTreeMap::new());
    pi.start().unwrap();

    let deep = pi
        .get_node_instances(true)
        .unwrap()
        .into_iter()
        .find(|n| n.node_id() == "Deep")
        .map(|n| (n.id(), n.container()))
        .unwrap();
    let (boundary, scope) = deep;
    assert!(matches!(scope, ContainerScope::Composite(_)));

    pi.cancel(boundary, CancelType::Obsolete).unwrap();
    assert!(!pi.container(scope).unwrap().contains(boundary));
    assert_eq!(pi.listeners().registrations_of(ListenerToken(boundary)), 0);
    assert!(matches!(
        pi.cancel(boundary, CancelType::Obsolete),
        Err(FlowError::Inconsistent(_))
    ));

    // outer teardown does not revisit the boundary
    pi.abort().unwrap();
    let cancelled_boundaries = pi
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, RuntimeEvent::BoundaryCancelled { node_instance_id, .. } if *node_instance_id == boundary))
        .count();
    assert_eq!(cancelled_boundaries, 1);
}

// ─── Runtime ──────────────────────────────────────────────────

#[tokio::test]
async fn runtime_routes_boundary_and_records_audit_trail() {
    let sink = Arc::new(MemoryEventSink::new());
    let config = EngineConfig {
        worker_threads: 1,
        ..EngineConfig::default()
    };
    let runtime = ProcessRuntime::new(config, sink.clone()).unwrap();
    let def = ProcessDefinition::builder("audited")
        .node(NodeDefinition::activity("Task1"))
        .node(NodeDefinition::boundary(
            "Boundary1",
            "Task1",
            EventSpec::new("Error-1").with_mapping("event", "failure"),
            true,
        ))
        .node(NodeDefinition::activity("Handler"))
        .connect("Boundary1", "Handler")
        .start_node("Task1")
        .build()
        .unwrap();

    let id = runtime
        .start_process(Arc::new(def), BTreeMap::new())
        .await
        .unwrap();
    let outcomes = runtime
        .signal_event(id, "Error-1", json!({"code": 42}))
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].1, SignalOutcome::Fired);

    let failure = runtime
        .with_instance(id, |pi| Ok(pi.variable("failure").cloned()))
        .await
        .unwrap();
    assert_eq!(failure, Some(json!({"code": 42})));

    let events = sink.read_events(id, 0).await.unwrap();
    let fired = events
        .iter()
        .find_map(|(_, e)| match e {
            RuntimeEvent::BoundaryFired { interrupted, .. } => Some(*interrupted),
            _ => None,
        })
        .unwrap();
    assert!(fired.is_some());
    assert!(events.iter().any(|(_, e)| matches!(
        e,
        RuntimeEvent::NodeCancelled { node_id, cancel_type: CancelType::Obsolete, .. } if node_id == "Task1"
    )));
}

#[tokio::test]
async fn runtime_evicts_process_once_host_with_boundary_completes() {
    let sink = Arc::new(MemoryEventSink::new());
    let config = EngineConfig {
        worker_threads: 1,
        ..EngineConfig::default()
    };
    let runtime = ProcessRuntime::new(config, sink.clone()).unwrap();
    let def = ProcessDefinition::builder("finishing")
        .node(NodeDefinition::activity("Task1"))
        .node(NodeDefinition::boundary(
            "Boundary1",
            "Task1",
            EventSpec::new("Error-1"),
            false,
        ))
        .start_node("Task1")
        .build()
        .unwrap();

    let id = runtime
        .start_process(Arc::new(def), BTreeMap::new())
        .await
        .unwrap();
    let host = runtime
        .with_instance(id, |pi| {
            Ok(pi
                .get_node_instances(false)?
                .into_iter()
                .find(|n| n.node_id() == "Task1")
                .map(|n| n.id()))
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(runtime.evict_finished().await, 0);

    runtime.complete_node_instance(id, host).await.unwrap();
    assert_eq!(
        runtime.process_state(id).await.unwrap(),
        ProcessState::Completed
    );
    let events = sink.read_events(id, 0).await.unwrap();
    assert!(events
        .iter()
        .any(|(_, e)| matches!(e, RuntimeEvent::BoundaryCancelled { .. })));
    assert!(matches!(
        events.last(),
        Some((_, RuntimeEvent::ProcessCompleted))
    ));

    assert_eq!(runtime.evict_finished().await, 1);
    assert!(matches!(
        runtime.signal_event(id, "Error-1", json!(null)).await,
        Err(FlowError::UnknownProcessInstance(_))
    ));
}
