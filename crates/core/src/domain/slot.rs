use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::actor::ActorId;
use crate::domain::quote_request::QuoteRequestId;
use crate::domain::{EntityKind, EntityRef};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
    Rejected,
}

impl SlotStatus {
    pub const ALL: [SlotStatus; 5] = [
        SlotStatus::Pending,
        SlotStatus::Active,
        SlotStatus::Completed,
        SlotStatus::Cancelled,
        SlotStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "completed" => Some(Self::Completed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// The executable contract created when a quote request is purchased.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuaranteeSlot {
    pub id: SlotId,
    pub request_id: QuoteRequestId,
    pub status: SlotStatus,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<ActorId>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<ActorId>,
    pub rejection_reason: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_by: Option<ActorId>,
    pub work_memo: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<ActorId>,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GuaranteeSlot {
    pub fn pending(
        id: SlotId,
        request_id: QuoteRequestId,
        start_date: NaiveDate,
        end_date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            request_id,
            status: SlotStatus::Pending,
            start_date,
            end_date,
            approved_at: None,
            approved_by: None,
            rejected_at: None,
            rejected_by: None,
            rejection_reason: None,
            completed_at: None,
            completed_by: None,
            work_memo: None,
            cancelled_at: None,
            cancelled_by: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn entity(&self) -> EntityRef {
        EntityRef::new(EntityKind::GuaranteeSlot, self.id.0.clone())
    }

    pub fn record_approval(&mut self, approver: ActorId, at: DateTime<Utc>) {
        self.approved_at = Some(at);
        self.approved_by = Some(approver);
        self.rejected_at = None;
        self.rejected_by = None;
        self.rejection_reason = None;
    }

    pub fn record_rejection(&mut self, rejector: ActorId, reason: String, at: DateTime<Utc>) {
        self.rejected_at = Some(at);
        self.rejected_by = Some(rejector);
        self.rejection_reason = Some(reason);
        self.approved_at = None;
        self.approved_by = None;
    }

    pub fn touch(&mut self, now: DateTime<Utc>) -> u32 {
        let expected = self.version;
        self.version = self.version.saturating_add(1);
        self.updated_at = now;
        expected
    }
}
