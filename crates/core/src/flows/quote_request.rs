use serde::{Deserialize, Serialize};

use crate::domain::quote_request::QuoteRequestStatus;
use crate::flows::engine::{FlowDefinition, Transition};
use crate::flows::states::{FlowAction, FlowLabel, FlowType};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteRequestEvent {
    OpenNegotiation,
    Accept,
    Reject,
    UndoRejection,
    Expire,
    Purchase,
}

impl FlowLabel for QuoteRequestEvent {
    fn label(&self) -> &'static str {
        match self {
            Self::OpenNegotiation => "open_negotiation",
            Self::Accept => "accept",
            Self::Reject => "reject",
            Self::UndoRejection => "undo_rejection",
            Self::Expire => "expire",
            Self::Purchase => "purchase",
        }
    }
}

const fn row(
    from: QuoteRequestStatus,
    event: QuoteRequestEvent,
    to: QuoteRequestStatus,
    actions: &'static [FlowAction],
) -> Transition<QuoteRequestStatus, QuoteRequestEvent> {
    Transition { from, event, to, actions }
}

const QUOTE_REQUEST_TRANSITIONS: &[Transition<QuoteRequestStatus, QuoteRequestEvent>] = {
    use FlowAction::{
        AssignDistributor, ClearFinalTerms, CreateSlot, HoldFunds, Notify, RecordFinalTerms,
        RecordRejection, ScheduleExecution,
    };
    use QuoteRequestEvent::{Accept, Expire, OpenNegotiation, Purchase, Reject, UndoRejection};
    use QuoteRequestStatus::{Accepted, Expired, Negotiating, Purchased, Rejected, Requested};

    &[
        row(Requested, OpenNegotiation, Negotiating, &[AssignDistributor, Notify]),
        row(Negotiating, Accept, Accepted, &[RecordFinalTerms, Notify]),
        row(Requested, Reject, Rejected, &[AssignDistributor, RecordRejection, Notify]),
        row(Negotiating, Reject, Rejected, &[RecordRejection, Notify]),
        row(Rejected, UndoRejection, Negotiating, &[Notify]),
        row(Requested, Expire, Expired, &[Notify]),
        row(Negotiating, Expire, Expired, &[Notify]),
        row(Accepted, Expire, Expired, &[ClearFinalTerms, Notify]),
        row(Accepted, Purchase, Purchased, &[ScheduleExecution, CreateSlot, HoldFunds, Notify]),
    ]
};

#[derive(Clone, Debug, Default)]
pub struct QuoteRequestFlow;

impl FlowDefinition for QuoteRequestFlow {
    type State = QuoteRequestStatus;
    type Event = QuoteRequestEvent;

    fn flow_type(&self) -> FlowType {
        FlowType::QuoteRequest
    }

    fn initial_state(&self) -> QuoteRequestStatus {
        QuoteRequestStatus::Requested
    }

    fn transitions(&self) -> &'static [Transition<QuoteRequestStatus, QuoteRequestEvent>] {
        QUOTE_REQUEST_TRANSITIONS
    }
}
