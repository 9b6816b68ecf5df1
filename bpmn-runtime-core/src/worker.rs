//! Background workers for work handed off by node instances.
//!
//! Threads are detached: nothing joins them, so they never hold up process
//! shutdown. Each pool names its threads `<prefix>-<n>` with `n` counting
//! up from 1.

use crate::config::EngineConfig;
use crate::error::{FlowError, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Spawns named, detached threads.
#[derive(Debug)]
pub struct ThreadFactory {
    counter: AtomicUsize,
    prefix: String,
}

impl ThreadFactory {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            counter: AtomicUsize::new(1),
            prefix: prefix.into(),
        }
    }

    pub fn spawn<F>(&self, f: F) -> Result<String>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = format!("{}-{}", self.prefix, self.counter.fetch_add(1, Ordering::SeqCst));
        thread::Builder::new()
            .name(name.clone())
            .spawn(f)
            .map_err(|e| FlowError::Worker(format!("failed to spawn {name}: {e}")))?;
        Ok(name)
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of long-lived workers draining a shared job queue.
pub struct WorkerPool {
    sender: mpsc::Sender<Job>,
    thread_names: Vec<String>,
}

impl WorkerPool {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let factory = ThreadFactory::new(&config.worker_thread_prefix);
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut thread_names = Vec::with_capacity(config.worker_threads);
        for _ in 0..config.worker_threads {
            let receiver = Arc::clone(&receiver);
            let name = factory.spawn(move || run_worker(receiver))?;
            debug!(worker = %name, "worker started");
            thread_names.push(name);
        }
        Ok(Self {
            sender,
            thread_names,
        })
    }

    pub fn thread_names(&self) -> &[String] {
        &self.thread_names
    }

    /// Run `f` on a worker; the receiver yields its result.
    pub fn submit<F, T>(&self, f: F) -> Result<oneshot::Receiver<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move || {
            // caller may have stopped waiting
            let _ = tx.send(f());
        });
        self.sender
            .send(job)
            .map_err(|_| FlowError::Worker("worker pool has shut down".into()))?;
        Ok(rx)
    }
}

fn run_worker(receiver: Arc<Mutex<mpsc::Receiver<Job>>>) {
    loop {
        let job = match receiver.lock() {
            Ok(guard) => guard.recv(),
            Err(_) => {
                warn!("worker queue lock poisoned, worker exiting");
                return;
            }
        };
        match job {
            Ok(job) => job(),
            // pool dropped
            Err(_) => return,
        }
    }
}
