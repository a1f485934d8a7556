use serde::{Deserialize, Serialize};

use crate::domain::refund::RefundStatus;
use crate::flows::engine::{FlowDefinition, Transition};
use crate::flows::states::{FlowAction, FlowLabel, FlowType};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundEvent {
    /// Distributor decision on a buyer-initiated request.
    Approve,
    Reject,
    /// Buyer decision on a distributor proposal.
    BuyerConfirm,
    BuyerDecline,
}

impl FlowLabel for RefundEvent {
    fn label(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::BuyerConfirm => "buyer_confirm",
            Self::BuyerDecline => "buyer_decline",
        }
    }
}

const fn row(
    from: RefundStatus,
    event: RefundEvent,
    to: RefundStatus,
    actions: &'static [FlowAction],
) -> Transition<RefundStatus, RefundEvent> {
    Transition { from, event, to, actions }
}

// Approving an approved refund matches a row with no actions, so the release
// never runs twice.
const REFUND_TRANSITIONS: &[Transition<RefundStatus, RefundEvent>] = {
    use FlowAction::{Notify, RecordDecision, ReleaseFunds};
    use RefundEvent::{Approve, BuyerConfirm, BuyerDecline, Reject};
    use RefundStatus::{Approved, Pending, PendingUserConfirmation, Rejected};

    &[
        row(Pending, Approve, Approved, &[RecordDecision, ReleaseFunds, Notify]),
        row(Approved, Approve, Approved, &[]),
        row(Pending, Reject, Rejected, &[RecordDecision, Notify]),
        row(
            PendingUserConfirmation,
            BuyerConfirm,
            Approved,
            &[RecordDecision, ReleaseFunds, Notify],
        ),
        row(Approved, BuyerConfirm, Approved, &[]),
        row(PendingUserConfirmation, BuyerDecline, Rejected, &[RecordDecision, Notify]),
    ]
};

#[derive(Clone, Debug, Default)]
pub struct RefundFlow;

impl FlowDefinition for RefundFlow {
    type State = RefundStatus;
    type Event = RefundEvent;

    fn flow_type(&self) -> FlowType {
        FlowType::RefundRequest
    }

    fn initial_state(&self) -> RefundStatus {
        RefundStatus::Pending
    }

    fn transitions(&self) -> &'static [Transition<RefundStatus, RefundEvent>] {
        REFUND_TRANSITIONS
    }
}
