//! Workflow traces and their execution.

pub mod action;
pub mod executor;
pub mod trace;

use std::sync::Arc;

pub use action::{Action, ReceiveAction, SendAction};
pub use executor::execute_trace;
pub use trace::{TraceState, WorkflowTrace};

use crate::config::ProbeConfig;
use crate::context::TlsContext;
use crate::transport::{Connector, TcpConnector, UdpConnector};
use crate::ProbeError;

/// A trace bound to the context it runs in.
///
/// This is the unit handed to the parallel executor. Once executed it holds
/// the observed records and messages and the final context.
#[derive(Debug)]
pub struct State {
    pub trace: WorkflowTrace,
    pub context: TlsContext,
}

impl State {
    pub fn new(config: Arc<ProbeConfig>, trace: WorkflowTrace, connector: Arc<dyn Connector>) -> Self {
        Self {
            trace,
            context: TlsContext::new(config, connector),
        }
    }

    /// A state that connects to the configured target over TCP, or UDP for
    /// datagram configurations.
    pub fn for_target(config: Arc<ProbeConfig>, trace: WorkflowTrace) -> Self {
        let connector: Arc<dyn Connector> = if config.datagram {
            Arc::new(UdpConnector::new(Arc::clone(&config)))
        } else {
            Arc::new(TcpConnector::new(Arc::clone(&config)))
        };
        Self::new(config, trace, connector)
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.context.config
    }

    /// Forget everything observed so the state can run again.
    pub fn reset(&mut self) {
        self.trace.reset();
        self.context.reset();
    }

    pub fn execute(&mut self) -> Result<(), ProbeError> {
        execute_trace(&mut self.trace, &mut self.context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageKind, ProtocolMessage};
    use crate::transport::memory::{Inbound, MemoryConnector, Responder};

    fn alert_peer() -> Arc<MemoryConnector> {
        Arc::new(MemoryConnector::new(|_| {
            Ok(Box::new(|_: &[u8]| vec![Inbound::Data(vec![21, 3, 3, 0, 2, 2, 20])]) as Responder)
        }))
    }

    fn state(connector: Arc<MemoryConnector>) -> State {
        let trace = WorkflowTrace::new()
            .send(vec![ProtocolMessage::ApplicationData(vec![1, 2, 3])])
            .receive(vec![MessageKind::Alert]);
        State::new(Arc::new(ProbeConfig::default()), trace, connector)
    }

    #[test]
    fn test_execute_and_reset() {
        let connector = alert_peer();
        let mut state = state(Arc::clone(&connector));
        state.execute().unwrap();
        assert_eq!(state.trace.state(), TraceState::Completed);
        assert_eq!(state.trace.last_receive_action().unwrap().messages.len(), 1);
        assert!(state.context.received_fatal_alert);

        state.reset();
        assert_eq!(state.trace.state(), TraceState::NotStarted);
        assert!(!state.context.received_fatal_alert);
        assert!(state
            .trace
            .last_receive_action()
            .unwrap()
            .messages
            .is_empty());

        state.execute().unwrap();
        assert_eq!(state.trace.state(), TraceState::Completed);
        assert_eq!(connector.connections(), 2);
    }

    #[test]
    fn test_last_sent_record_after_execution() {
        let mut state = state(alert_peer());
        state.execute().unwrap();
        let record = state.trace.last_sent_record().unwrap();
        assert_eq!(record.length, 3);
    }
}
