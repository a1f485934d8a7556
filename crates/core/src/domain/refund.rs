use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::actor::ActorId;
use crate::domain::slot::SlotId;
use crate::domain::{EntityKind, EntityRef};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RefundRequestId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    /// Buyer-initiated, awaiting the distributor.
    Pending,
    /// Distributor-initiated, awaiting the buyer.
    PendingUserConfirmation,
    Approved,
    Rejected,
}

impl RefundStatus {
    pub const ALL: [RefundStatus; 4] = [
        RefundStatus::Pending,
        RefundStatus::PendingUserConfirmation,
        RefundStatus::Approved,
        RefundStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::PendingUserConfirmation => "pending_user_confirmation",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "pending_user_confirmation" => Some(Self::PendingUserConfirmation),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::PendingUserConfirmation)
    }
}

/// Which path produced the refund record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundOrigin {
    Buyer,
    Distributor,
    EarlyCompletion,
    Cancellation,
}

impl RefundOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buyer => "buyer",
            Self::Distributor => "distributor",
            Self::EarlyCompletion => "early_completion",
            Self::Cancellation => "cancellation",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "buyer" => Some(Self::Buyer),
            "distributor" => Some(Self::Distributor),
            "early_completion" => Some(Self::EarlyCompletion),
            "cancellation" => Some(Self::Cancellation),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRequest {
    pub id: RefundRequestId,
    pub slot_id: SlotId,
    pub status: RefundStatus,
    pub origin: RefundOrigin,
    pub refund_reason: String,
    pub refund_amount: Decimal,
    pub requested_by: ActorId,
    pub request_date: DateTime<Utc>,
    pub approval_date: Option<DateTime<Utc>>,
    pub approval_notes: Option<String>,
    pub decided_by: Option<ActorId>,
    pub version: u32,
    pub updated_at: DateTime<Utc>,
}

impl RefundRequest {
    pub fn entity(&self) -> EntityRef {
        EntityRef::new(EntityKind::RefundRequest, self.id.0.clone())
    }

    pub fn touch(&mut self, now: DateTime<Utc>) -> u32 {
        let expected = self.version;
        self.version = self.version.saturating_add(1);
        self.updated_at = now;
        expected
    }
}

/// Total of approved refunds in `refunds`.
pub fn approved_total<'a>(refunds: impl IntoIterator<Item = &'a RefundRequest>) -> Decimal {
    refunds
        .into_iter()
        .filter(|refund| refund.status == RefundStatus::Approved)
        .map(|refund| refund.refund_amount)
        .sum()
}

/// The single unresolved refund for a slot, if any.
pub fn open_refund<'a>(
    refunds: impl IntoIterator<Item = &'a RefundRequest>,
) -> Option<&'a RefundRequest> {
    refunds.into_iter().find(|refund| refund.status.is_open())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{
        approved_total, open_refund, RefundOrigin, RefundRequest, RefundRequestId, RefundStatus,
    };
    use crate::domain::actor::ActorId;
    use crate::domain::slot::SlotId;

    fn refund(id: &str, status: RefundStatus, amount: i64) -> RefundRequest {
        RefundRequest {
            id: RefundRequestId(id.to_string()),
            slot_id: SlotId("SLOT-1".to_string()),
            status,
            origin: RefundOrigin::Buyer,
            refund_reason: "rank not reached".to_string(),
            refund_amount: Decimal::from(amount),
            requested_by: ActorId("buyer-1".to_string()),
            request_date: Utc::now(),
            approval_date: None,
            approval_notes: None,
            decided_by: None,
            version: 1,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn status_round_trips_from_storage_encoding() {
        for status in RefundStatus::ALL {
            assert_eq!(RefundStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn only_pending_statuses_are_open() {
        assert!(RefundStatus::Pending.is_open());
        assert!(RefundStatus::PendingUserConfirmation.is_open());
        assert!(!RefundStatus::Approved.is_open());
        assert!(!RefundStatus::Rejected.is_open());
    }

    #[test]
    fn approved_total_ignores_unresolved_and_rejected_refunds() {
        let refunds = vec![
            refund("RF-1", RefundStatus::Approved, 11_000),
            refund("RF-2", RefundStatus::Rejected, 50_000),
            refund("RF-3", RefundStatus::Approved, 22_000),
            refund("RF-4", RefundStatus::Pending, 7_000),
        ];

        assert_eq!(approved_total(&refunds), Decimal::from(33_000));
        assert_eq!(open_refund(&refunds).map(|r| r.id.0.as_str()), Some("RF-4"));
    }
}
