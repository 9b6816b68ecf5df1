//! Process runtime: owns running process instances and serialises every
//! mutation of one instance behind its own lock. Distinct instances proceed
//! in parallel.

use crate::config::EngineConfig;
use crate::definition::ProcessDefinition;
use crate::error::{FlowError, Result};
use crate::events::EventSink;
use crate::process::ProcessInstance;
use crate::types::*;
use crate::worker::WorkerPool;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

pub struct ProcessRuntime {
    config: EngineConfig,
    instances: RwLock<HashMap<Uuid, Arc<Mutex<ProcessInstance>>>>,
    sink: Arc<dyn EventSink>,
    workers: WorkerPool,
}

impl ProcessRuntime {
    pub fn new(config: EngineConfig, sink: Arc<dyn EventSink>) -> Result<Self> {
        let workers = WorkerPool::new(&config)?;
        Ok(Self {
            config,
            instances: RwLock::new(HashMap::new()),
            sink,
            workers,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    /// Create a process instance, trigger its start nodes and register it.
    pub async fn start_process(
        &self,
        definition: Arc<ProcessDefinition>,
        variables: BTreeMap<String, Value>,
    ) -> Result<Uuid> {
        let mut instance = ProcessInstance::new(definition, variables);
        let id = instance.id();
        let started = instance.start();
        self.flush(&mut instance).await?;
        started?;

        self.instances
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(instance)));
        info!(process_instance = %id, "process instance registered");
        Ok(id)
    }

    async fn handle(&self, id: Uuid) -> Result<Arc<Mutex<ProcessInstance>>> {
        self.instances
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(FlowError::UnknownProcessInstance(id))
    }

    /// Run `f` inside the instance's critical section, then forward the audit
    /// events it produced. Events are flushed even when `f` fails.
    pub async fn with_instance<F, R>(&self, id: Uuid, f: F) -> Result<R>
    where
        F: FnOnce(&mut ProcessInstance) -> Result<R> + Send,
        R: Send,
    {
        let handle = self.handle(id).await?;
        let mut instance = handle.lock().await;
        let result = f(&mut instance);
        self.flush(&mut instance).await?;
        result
    }

    async fn flush(&self, instance: &mut ProcessInstance) -> Result<()> {
        let events = instance.drain_events();
        if !self.config.audit_enabled {
            return Ok(());
        }
        for event in &events {
            self.sink.append_event(instance.id(), event).await?;
        }
        Ok(())
    }

    /// Deliver `(event_type, payload)` to every subscribed node instance.
    pub async fn signal_event(
        &self,
        id: Uuid,
        event_type: &str,
        payload: Value,
    ) -> Result<Vec<(NodeInstanceId, SignalOutcome)>> {
        debug!(process_instance = %id, event_type, "signal received");
        self.with_instance(id, |pi| pi.signal_event(event_type, payload))
            .await
    }

    pub async fn complete_node_instance(&self, id: Uuid, node: NodeInstanceId) -> Result<()> {
        self.with_instance(id, |pi| pi.complete(node)).await
    }

    pub async fn cancel_node_instance(
        &self,
        id: Uuid,
        node: NodeInstanceId,
        cancel_type: CancelType,
    ) -> Result<()> {
        self.with_instance(id, |pi| pi.cancel(node, cancel_type))
            .await
    }

    pub async fn abort_process(&self, id: Uuid) -> Result<()> {
        self.with_instance(id, ProcessInstance::abort).await
    }

    pub async fn process_state(&self, id: Uuid) -> Result<ProcessState> {
        self.with_instance(id, |pi| Ok(pi.state())).await
    }

    /// Drop instances that reached a terminal state. Returns how many.
    ///
    /// No registry lock is held while waiting on an instance.
    pub async fn evict_finished(&self) -> usize {
        let snapshot: Vec<(Uuid, Arc<Mutex<ProcessInstance>>)> = self
            .instances
            .read()
            .await
            .iter()
            .map(|(id, handle)| (*id, Arc::clone(handle)))
            .collect();

        let mut finished = Vec::new();
        for (id, handle) in snapshot {
            if handle.lock().await.state() != ProcessState::Active {
                finished.push(id);
            }
        }
        if finished.is_empty() {
            return 0;
        }

        let mut instances = self.instances.write().await;
        for id in &finished {
            instances.remove(id);
        }
        debug!(evicted = finished.len(), "finished process instances evicted");
        finished.len()
    }

    /// Hand work off to the worker pool, outside any instance lock.
    pub fn offload<F, T>(&self, f: F) -> Result<oneshot::Receiver<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.workers.submit(f)
    }
}
