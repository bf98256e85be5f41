//! A [`JobHandler`] whose behaviour is scripted per job id.
//!
//! ```ignore
//! let handler = ScriptedHandler::new();
//! handler.fail("train", "loss diverged");
//! handler.gate("eval");
//! // ... start the execution ...
//! handler.wait_entered("eval").await;
//! handler.release("eval");
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::sync::watch;
use trainflow::engine::{HandlerError, JobContext, JobHandler};
use trainflow::engine::handlers::HandlerFuture;

#[derive(Debug, Clone)]
enum Behaviour {
    Succeed(Value),
    Fail(String),
    Panic(String),
}

#[derive(Debug)]
struct Gate {
    entered: watch::Sender<bool>,
    released: watch::Sender<bool>,
}

#[derive(Debug, Default)]
struct Inner {
    runs: Mutex<Vec<(String, u32)>>,
    behaviours: Mutex<HashMap<String, Behaviour>>,
    gates: Mutex<HashMap<String, Arc<Gate>>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

/// Succeeds with `{"job": id}` unless told otherwise. Cheap to clone; clones
/// share their script and records.
#[derive(Debug, Clone, Default)]
pub struct ScriptedHandler {
    inner: Arc<Inner>,
}

impl ScriptedHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn succeed_with(&self, job_id: &str, value: Value) {
        self.set(job_id, Behaviour::Succeed(value));
    }

    pub fn fail(&self, job_id: &str, msg: &str) {
        self.set(job_id, Behaviour::Fail(msg.to_string()));
    }

    pub fn panic_on(&self, job_id: &str, msg: &str) {
        self.set(job_id, Behaviour::Panic(msg.to_string()));
    }

    fn set(&self, job_id: &str, behaviour: Behaviour) {
        self.inner
            .behaviours
            .lock()
            .unwrap()
            .insert(job_id.to_string(), behaviour);
    }

    /// Hold `job_id` inside the handler until [`release`](Self::release).
    pub fn gate(&self, job_id: &str) {
        let (entered, _) = watch::channel(false);
        let (released, _) = watch::channel(false);
        self.inner
            .gates
            .lock()
            .unwrap()
            .insert(job_id.to_string(), Arc::new(Gate { entered, released }));
    }

    fn gate_of(&self, job_id: &str) -> Arc<Gate> {
        self.inner
            .gates
            .lock()
            .unwrap()
            .get(job_id)
            .cloned()
            .unwrap_or_else(|| panic!("no gate for job '{job_id}'"))
    }

    /// Resolves once the gated job is running inside the handler.
    pub async fn wait_entered(&self, job_id: &str) {
        let gate = self.gate_of(job_id);
        let mut rx = gate.entered.subscribe();
        rx.wait_for(|entered| *entered).await.unwrap();
    }

    pub fn release(&self, job_id: &str) {
        self.gate_of(job_id).released.send_replace(true);
    }

    /// Job ids in the order the handler started them.
    pub fn runs(&self) -> Vec<String> {
        self.inner
            .runs
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn attempts(&self, job_id: &str) -> Vec<u32> {
        self.inner
            .runs
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == job_id)
            .map(|(_, attempt)| *attempt)
            .collect()
    }

    pub fn run_count(&self, job_id: &str) -> usize {
        self.attempts(job_id).len()
    }

    /// Highest number of jobs observed inside the handler at once.
    pub fn max_concurrent(&self) -> usize {
        self.inner.max_running.load(Ordering::SeqCst)
    }
}

impl JobHandler for ScriptedHandler {
    fn execute(&self, ctx: JobContext) -> HandlerFuture<'_> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let job_id = ctx.job.id.clone();
            inner.runs.lock().unwrap().push((job_id.clone(), ctx.attempt));
            let now = inner.running.fetch_add(1, Ordering::SeqCst) + 1;
            inner.max_running.fetch_max(now, Ordering::SeqCst);

            let gate = inner.gates.lock().unwrap().get(&job_id).cloned();
            if let Some(gate) = gate {
                gate.entered.send_replace(true);
                let mut rx = gate.released.subscribe();
                let _ = rx.wait_for(|released| *released).await;
            }

            inner.running.fetch_sub(1, Ordering::SeqCst);
            let behaviour = inner.behaviours.lock().unwrap().get(&job_id).cloned();
            match behaviour {
                None => Ok(json!({ "job": job_id })),
                Some(Behaviour::Succeed(value)) => Ok(value),
                Some(Behaviour::Fail(msg)) => Err(HandlerError::failed(msg)),
                Some(Behaviour::Panic(msg)) => panic!("{msg}"),
            }
        })
    }
}
