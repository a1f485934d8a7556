use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::quote_request::QuoteRequestStatus;
use crate::domain::refund::RefundStatus;
use crate::domain::slot::SlotStatus;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowType {
    QuoteRequest,
    GuaranteeSlot,
    RefundRequest,
}

impl FlowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QuoteRequest => "quote_request",
            Self::GuaranteeSlot => "guarantee_slot",
            Self::RefundRequest => "refund_request",
        }
    }
}

/// States and events of a transition table: copyable values with a stable
/// storage label.
pub trait FlowLabel: Copy + Eq + fmt::Debug + 'static {
    fn label(&self) -> &'static str;
}

impl FlowLabel for QuoteRequestStatus {
    fn label(&self) -> &'static str {
        self.as_str()
    }
}

impl FlowLabel for SlotStatus {
    fn label(&self) -> &'static str {
        self.as_str()
    }
}

impl FlowLabel for RefundStatus {
    fn label(&self) -> &'static str {
        self.as_str()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FlowContext {
    pub missing_required_fields: Vec<String>,
}

impl FlowContext {
    pub fn missing<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { missing_required_fields: fields.into_iter().map(Into::into).collect() }
    }
}

/// Side effects a transition asks the engine to carry out inside the same
/// unit of work.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowAction {
    AssignDistributor,
    RecordFinalTerms,
    ClearFinalTerms,
    RecordRejection,
    ClearRejection,
    ScheduleExecution,
    CreateSlot,
    HoldFunds,
    RecordApproval,
    RecordCompletion,
    SettleEarlyCompletion,
    RecordCancellation,
    RecordDecision,
    ReleaseFunds,
    Notify,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome<S, E> {
    pub from: S,
    pub to: S,
    pub event: E,
    pub actions: Vec<FlowAction>,
}

impl<S: PartialEq, E> TransitionOutcome<S, E> {
    pub fn requires(&self, action: FlowAction) -> bool {
        self.actions.contains(&action)
    }

    /// A row that leaves the state as-is and carries no effects.
    pub fn is_noop(&self) -> bool {
        self.from == self.to && self.actions.is_empty()
    }
}
