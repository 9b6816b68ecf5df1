//! Node-instance lifecycle and boundary-event signal routing for long-running
//! BPMN process instances.
//!
//! ## Layout
//! ProcessDefinition (static graph) -> ProcessInstance (arena of node
//! instances + listener registry) -> ProcessRuntime (async, one lock per
//! instance, audit events to an EventSink)
//!
//! ```rust,no_run
//! use bpmn_runtime_core::{EventSpec, NodeDefinition, ProcessDefinition, ProcessInstance};
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! let def = ProcessDefinition::builder("review")
//!     .node(NodeDefinition::activity("Task1"))
//!     .node(NodeDefinition::boundary("OnError", "Task1", EventSpec::new("Error-1"), true))
//!     .start_node("Task1")
//!     .build()?;
//! let mut pi = ProcessInstance::new(Arc::new(def), BTreeMap::new());
//! pi.start()?;
//! pi.signal_event("Error-1", serde_json::Value::Null)?;
//! # Ok::<(), bpmn_runtime_core::FlowError>(())
//! ```

// Shared identifiers and protocol constants
pub mod types;
pub mod error;

// Static process graph
pub mod definition;

// Per-instance runtime state
pub mod container;
pub mod listener;
pub mod node;
pub mod event;
pub mod boundary;
pub mod process;

// Audit trail
pub mod events;

// Async runtime and its ambient pieces
pub mod config;
pub mod engine;
pub mod telemetry;
pub mod worker;

pub use config::EngineConfig;
pub use container::NodeInstanceContainer;
pub use definition::{DataMapping, EventSpec, NodeDefinition, NodeKind, ProcessDefinition};
pub use engine::ProcessRuntime;
pub use error::{FlowError, Result};
pub use event::{EventSubscription, NodeScopeResolver, VarResolver};
pub use events::{EventSink, MemoryEventSink, RuntimeEvent};
pub use listener::ListenerRegistry;
pub use node::{NodeInstance, NodeInstanceKind};
pub use process::ProcessInstance;
pub use types::*;
pub use worker::{ThreadFactory, WorkerPool};
