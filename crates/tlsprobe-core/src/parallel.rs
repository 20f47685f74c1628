//! Fixed-size worker pool for executing many states concurrently.
//!
//! Each worker runs one state to completion, including its own retry loop,
//! before it takes the next queued job. A failed execution is retried after
//! a linearly growing pause; running out of attempts fails the whole batch.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info};

use crate::config::ProbeConfig;
use crate::workflow::State;
use crate::ProbeError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Result of one submitted job.
pub struct TaskHandle<T> {
    rx: Receiver<Result<T, ProbeError>>,
}

impl<T> TaskHandle<T> {
    /// Block until the job has finished.
    pub fn wait(self) -> Result<T, ProbeError> {
        self.rx
            .recv()
            .map_err(|_| ProbeError::TaskFailed("worker dropped the result".into()))?
    }
}

pub struct ParallelExecutor {
    size: usize,
    reexecutions: u32,
    backoff: Duration,
    sender: Mutex<Option<Sender<Job>>>,
    workers: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for ParallelExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelExecutor")
            .field("size", &self.size)
            .field("reexecutions", &self.reexecutions)
            .field("backoff", &self.backoff)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl ParallelExecutor {
    /// Start `size` workers. Every state gets `reexecutions` extra attempts,
    /// waiting `backoff` more before each one than before the previous.
    pub fn new(size: usize, reexecutions: u32, backoff: Duration) -> Result<Self, ProbeError> {
        if size == 0 {
            return Err(ProbeError::Configuration(
                "parallel executor needs at least one worker".into(),
            ));
        }
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            let rx = Arc::clone(&rx);
            let handle = thread::Builder::new()
                .name(format!("tlsprobe-worker-{i}"))
                .spawn(move || worker_loop(&rx))?;
            workers.push(handle);
        }
        debug!(size, reexecutions, ?backoff, "parallel executor started");
        Ok(Self {
            size,
            reexecutions,
            backoff,
            sender: Mutex::new(Some(tx)),
            workers,
        })
    }

    pub fn from_config(config: &ProbeConfig) -> Result<Self, ProbeError> {
        Self::new(
            config.parallel_threads,
            config.reexecutions,
            config.retry_backoff,
        )
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn reexecutions(&self) -> u32 {
        self.reexecutions
    }

    pub fn is_shutdown(&self) -> bool {
        match self.sender.lock() {
            Ok(sender) => sender.is_none(),
            Err(_) => true,
        }
    }

    /// Queue an arbitrary job. A panic inside the job is reported as
    /// [`ProbeError::TaskFailed`] and does not take the worker down.
    pub fn submit<F, T>(&self, f: F) -> Result<TaskHandle<T>, ProbeError>
    where
        F: FnOnce() -> Result<T, ProbeError> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let job: Job = Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(f))
                .unwrap_or_else(|payload| Err(ProbeError::TaskFailed(panic_message(&*payload))));
            // The submitter may have stopped waiting.
            let _ = tx.send(result);
        });

        let sender = self
            .sender
            .lock()
            .map_err(|_| ProbeError::TaskFailed("executor lock poisoned".into()))?;
        match sender.as_ref() {
            Some(s) => s.send(job).map_err(|_| ProbeError::ExecutorShutdown)?,
            None => return Err(ProbeError::ExecutorShutdown),
        }
        Ok(TaskHandle { rx })
    }

    /// Queue one state for execution with retries.
    pub fn add_task(&self, mut state: State) -> Result<TaskHandle<State>, ProbeError> {
        let reexecutions = self.reexecutions;
        let backoff = self.backoff;
        self.submit(move || {
            execute_with_retries(&mut state, reexecutions, backoff)?;
            Ok(state)
        })
    }

    /// Execute every state and wait for all of them.
    ///
    /// Results come back in submission order. If any state ran out of
    /// attempts the batch fails with that error, after every other state has
    /// finished too.
    pub fn bulk_execute(&self, states: Vec<State>) -> Result<Vec<State>, ProbeError> {
        if self.is_shutdown() {
            return Err(ProbeError::ExecutorShutdown);
        }
        let count = states.len();
        let handles = states
            .into_iter()
            .map(|s| self.add_task(s))
            .collect::<Result<Vec<_>, _>>()?;
        let results: Vec<_> = handles.into_iter().map(TaskHandle::wait).collect();
        info!(count, "bulk execution finished");
        results.into_iter().collect()
    }

    /// Stop accepting jobs. Queued and running jobs still finish.
    pub fn shutdown(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            if sender.take().is_some() {
                debug!("parallel executor shut down");
            }
        }
    }
}

impl Drop for ParallelExecutor {
    fn drop(&mut self) {
        self.shutdown();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(rx: &Mutex<Receiver<Job>>) {
    loop {
        let job = {
            let guard = match rx.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.recv()
        };
        match job {
            Ok(job) => job(),
            Err(_) => break,
        }
    }
}

/// Run `state`, retrying on error up to `reexecutions` more times. The pause
/// before retry `n` is `n * backoff`. The state is reset before each retry.
pub fn execute_with_retries(
    state: &mut State,
    reexecutions: u32,
    backoff: Duration,
) -> Result<(), ProbeError> {
    let attempts = reexecutions.saturating_add(1);
    let mut sleep = Duration::ZERO;
    let mut last = None;
    for attempt in 1..=attempts {
        if !sleep.is_zero() {
            thread::sleep(sleep);
        }
        if attempt > 1 {
            state.reset();
        }
        match state.execute() {
            Ok(()) => return Ok(()),
            Err(e) => {
                debug!(attempt, attempts, error = %e, "execution failed");
                sleep += backoff;
                last = Some(e);
            }
        }
    }
    let last = last.unwrap_or_else(|| ProbeError::TaskFailed("state never executed".into()));
    error!(attempts, error = %last, "could not execute state");
    Err(ProbeError::RetriesExhausted {
        attempts,
        last: Box::new(last),
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}
