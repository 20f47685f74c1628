//! Ordered scripts of send and receive actions.

use serde::Serialize;

use super::action::{Action, ReceiveAction, SendAction};
use crate::message::{MessageKind, ProtocolMessage};
use crate::record::Record;

/// Execution state of a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum TraceState {
    #[default]
    NotStarted,
    Executing,
    /// Every action executed.
    Completed,
    /// Execution stopped early or some action did not execute.
    PartiallyCompleted,
    /// An unrecoverable local error, such as failing to open the transport.
    Aborted,
}

/// A workflow trace: the static script plus what was observed running it.
#[derive(Debug, Clone, Default)]
pub struct WorkflowTrace {
    pub name: Option<String>,
    pub actions: Vec<Action>,
    pub(crate) state: TraceState,
}

impl WorkflowTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn add_action(&mut self, action: Action) -> &mut Self {
        self.actions.push(action);
        self
    }

    pub fn send(mut self, messages: Vec<ProtocolMessage>) -> Self {
        self.actions.push(Action::send(messages));
        self
    }

    /// Send `messages` through the given record templates.
    pub fn send_records(mut self, messages: Vec<ProtocolMessage>, records: Vec<Record>) -> Self {
        self.actions
            .push(Action::Send(SendAction::with_records(messages, records)));
        self
    }

    pub fn receive(mut self, expected: Vec<MessageKind>) -> Self {
        self.actions.push(Action::receive(expected));
        self
    }

    pub fn state(&self) -> TraceState {
        self.state
    }

    /// Clear everything observed at runtime, keeping the script.
    pub fn reset(&mut self) {
        for action in &mut self.actions {
            action.reset();
        }
        self.state = TraceState::NotStarted;
    }

    pub fn all_actions_executed(&self) -> bool {
        self.actions.iter().all(Action::is_executed)
    }

    pub fn send_actions(&self) -> impl Iterator<Item = &SendAction> {
        self.actions.iter().filter_map(|a| match a {
            Action::Send(s) => Some(s),
            Action::Receive(_) => None,
        })
    }

    pub fn receive_actions(&self) -> impl Iterator<Item = &ReceiveAction> {
        self.actions.iter().filter_map(|a| match a {
            Action::Receive(r) => Some(r),
            Action::Send(_) => None,
        })
    }

    pub fn last_send_action(&self) -> Option<&SendAction> {
        self.send_actions().last()
    }

    pub fn last_receive_action(&self) -> Option<&ReceiveAction> {
        self.receive_actions().last()
    }

    /// The last record handed to the transport, if any.
    pub fn last_sent_record(&self) -> Option<&Record> {
        self.send_actions()
            .filter_map(|s| s.sent_records.last())
            .last()
    }
}
