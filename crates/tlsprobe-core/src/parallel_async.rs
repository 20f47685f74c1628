//! Async entry point to the parallel executor.
//!
//! Workers block on sockets, so a batch runs on tokio's blocking pool and the
//! caller awaits the whole batch.

use std::sync::Arc;

use crate::parallel::ParallelExecutor;
use crate::workflow::State;
use crate::ProbeError;

/// Run [`ParallelExecutor::bulk_execute`] without blocking the async runtime.
pub async fn bulk_execute_async(
    executor: Arc<ParallelExecutor>,
    states: Vec<State>,
) -> Result<Vec<State>, ProbeError> {
    tokio::task::spawn_blocking(move || executor.bulk_execute(states))
        .await
        .map_err(|e| ProbeError::TaskFailed(format!("blocking batch did not finish: {e}")))?
}
