//! Sequential trace executor.
//!
//! Runs the actions of one trace, in order, against one context. Protocol
//! anomalies are recorded in the trace and context; only local failures
//! (the transport cannot be opened) are returned as errors. Retrying is left
//! to the caller.

use std::sync::Arc;

use tracing::{debug, warn};

use super::trace::{TraceState, WorkflowTrace};
use crate::context::TlsContext;
use crate::ProbeError;

/// Execute `trace` once against `context`.
pub fn execute_trace(trace: &mut WorkflowTrace, context: &mut TlsContext) -> Result<(), ProbeError> {
    trace.state = TraceState::Executing;
    let config = Arc::clone(&context.config);

    if config.workflow_executor_should_open {
        if let Err(e) = context.open() {
            warn!(target = %config.target(), error = %e, "could not open transport");
            trace.state = TraceState::Aborted;
            return Err(ProbeError::WorkflowExecution(format!(
                "cannot open connection to {}: {e}",
                config.target()
            )));
        }
    }

    let total = trace.actions.len();
    for (index, action) in trace.actions.iter_mut().enumerate() {
        action.execute(context);
        if config.stop_actions_after_fatal
            && (context.received_fatal_alert || context.sent_fatal_alert)
        {
            if index + 1 < total {
                debug!(
                    executed = index + 1,
                    total, "fatal alert seen, skipping remaining actions"
                );
            }
            break;
        }
    }

    context.snapshot_socket_state();
    if config.workflow_executor_should_close {
        context.close();
    }

    trace.state = if trace.all_actions_executed() {
        TraceState::Completed
    } else {
        TraceState::PartiallyCompleted
    };
    debug!(
        name = trace.name.as_deref().unwrap_or("-"),
        state = ?trace.state,
        socket = ?context.socket_state,
        "trace finished"
    );
    Ok(())
}
