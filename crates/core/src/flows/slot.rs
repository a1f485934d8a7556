use serde::{Deserialize, Serialize};

use crate::domain::slot::SlotStatus;
use crate::flows::engine::{FlowDefinition, Transition};
use crate::flows::states::{FlowAction, FlowLabel, FlowType};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotEvent {
    Approve,
    Reject,
    Complete,
    Cancel,
}

impl FlowLabel for SlotEvent {
    fn label(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Complete => "complete",
            Self::Cancel => "cancel",
        }
    }
}

const fn row(
    from: SlotStatus,
    event: SlotEvent,
    to: SlotStatus,
    actions: &'static [FlowAction],
) -> Transition<SlotStatus, SlotEvent> {
    Transition { from, event, to, actions }
}

const SLOT_TRANSITIONS: &[Transition<SlotStatus, SlotEvent>] = {
    use FlowAction::{
        Notify, RecordApproval, RecordCancellation, RecordCompletion, RecordRejection,
        ReleaseFunds, SettleEarlyCompletion,
    };
    use SlotEvent::{Approve, Cancel, Complete, Reject};
    use SlotStatus::{Active, Cancelled, Completed, Pending, Rejected};

    &[
        row(Pending, Approve, Active, &[RecordApproval, Notify]),
        row(Rejected, Approve, Active, &[RecordApproval, Notify]),
        row(Pending, Reject, Rejected, &[RecordRejection, Notify]),
        row(Active, Complete, Completed, &[RecordCompletion, SettleEarlyCompletion, Notify]),
        row(Pending, Cancel, Cancelled, &[RecordCancellation, ReleaseFunds, Notify]),
    ]
};

#[derive(Clone, Debug, Default)]
pub struct SlotFlow;

impl FlowDefinition for SlotFlow {
    type State = SlotStatus;
    type Event = SlotEvent;

    fn flow_type(&self) -> FlowType {
        FlowType::GuaranteeSlot
    }

    fn initial_state(&self) -> SlotStatus {
        SlotStatus::Pending
    }

    fn transitions(&self) -> &'static [Transition<SlotStatus, SlotEvent>] {
        SLOT_TRANSITIONS
    }
}
