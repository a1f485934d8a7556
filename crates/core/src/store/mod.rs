//! Collaborator seams the engine persists through.
//!
//! A [`WorkflowTransaction`] is one atomicity boundary: request, slot,
//! refund, ledger and outbox writes made through it commit or roll back
//! together. Updates carry the version read inside the same transaction and
//! fail with [`StoreError::StaleWrite`] when another writer got there first.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::actor::ActorId;
use crate::domain::campaign::{CampaignId, CampaignMetadata};
use crate::domain::quote_request::{QuoteRequest, QuoteRequestId, QuoteRequestStatus};
use crate::domain::refund::{RefundRequest, RefundRequestId};
use crate::domain::slot::{GuaranteeSlot, SlotId};
use crate::domain::EntityRef;
use crate::errors::{Dependency, WorkflowError};
use crate::ledger::LedgerEntry;
use crate::notify::Notification;

pub mod memory;

pub use memory::InMemoryWorkflowStore;

/// Storage-level name of the "one open refund per slot" uniqueness rule.
pub const OPEN_REFUND_CONSTRAINT: &str = "idx_refund_request_open_slot";
pub const SLOT_PER_REQUEST_CONSTRAINT: &str = "guarantee_slot.request_id";
pub const LEDGER_REFERENCE_CONSTRAINT: &str = "idx_balance_ledger_reference";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("uniqueness conflict on `{constraint}`")]
    Conflict { constraint: String, entity: Option<EntityRef> },
    #[error("stale write on {entity}: expected version {expected}")]
    StaleWrite { entity: EntityRef, expected: u32 },
}

impl From<StoreError> for WorkflowError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::StaleWrite { entity, expected } => WorkflowError::InvalidTransition {
                entity,
                current: "modified concurrently".to_string(),
                required: vec![format!("version {expected}")],
            },
            StoreError::Conflict { constraint, entity: Some(slot) }
                if constraint == OPEN_REFUND_CONSTRAINT =>
            {
                WorkflowError::ConflictingRefundRequest { slot, open_refund: None }
            }
            other => WorkflowError::dependency(Dependency::Store, other.to_string()),
        }
    }
}

/// Which requests an actor's listing covers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestScopeFilter {
    All,
    Buyer(ActorId),
    /// Requests assigned to the distributor plus unassigned ones it may claim.
    Distributor(ActorId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestQuery {
    pub scope: RequestScopeFilter,
    pub statuses: Vec<QuoteRequestStatus>,
    pub updated_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl Default for RequestQuery {
    fn default() -> Self {
        Self {
            scope: RequestScopeFilter::All,
            statuses: Vec::new(),
            updated_before: None,
            limit: None,
        }
    }
}

impl RequestQuery {
    pub fn matches(&self, request: &QuoteRequest) -> bool {
        let in_scope = match &self.scope {
            RequestScopeFilter::All => true,
            RequestScopeFilter::Buyer(buyer) => &request.user_id == buyer,
            RequestScopeFilter::Distributor(distributor) => match &request.distributor_id {
                Some(assigned) => assigned == distributor,
                None => true,
            },
        };
        let status_ok = self.statuses.is_empty() || self.statuses.contains(&request.status);
        let age_ok = self.updated_before.map_or(true, |cutoff| request.updated_at < cutoff);
        in_scope && status_ok && age_ok
    }
}

#[async_trait]
pub trait WorkflowTransaction: Send {
    async fn load_request(&mut self, id: &QuoteRequestId)
        -> Result<Option<QuoteRequest>, StoreError>;
    async fn insert_request(&mut self, request: &QuoteRequest) -> Result<(), StoreError>;
    async fn update_request(
        &mut self,
        request: &QuoteRequest,
        expected_version: u32,
    ) -> Result<(), StoreError>;

    async fn load_slot(&mut self, id: &SlotId) -> Result<Option<GuaranteeSlot>, StoreError>;
    async fn find_slot_for_request(
        &mut self,
        request_id: &QuoteRequestId,
    ) -> Result<Option<GuaranteeSlot>, StoreError>;
    async fn insert_slot(&mut self, slot: &GuaranteeSlot) -> Result<(), StoreError>;
    async fn update_slot(
        &mut self,
        slot: &GuaranteeSlot,
        expected_version: u32,
    ) -> Result<(), StoreError>;

    async fn load_refund(&mut self, id: &RefundRequestId)
        -> Result<Option<RefundRequest>, StoreError>;
    async fn list_refunds(&mut self, slot_id: &SlotId) -> Result<Vec<RefundRequest>, StoreError>;
    async fn insert_refund(&mut self, refund: &RefundRequest) -> Result<(), StoreError>;
    async fn update_refund(
        &mut self,
        refund: &RefundRequest,
        expected_version: u32,
    ) -> Result<(), StoreError>;

    async fn record_ledger(&mut self, entry: &LedgerEntry) -> Result<(), StoreError>;
    async fn enqueue_notification(&mut self, notification: &Notification)
        -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn WorkflowTransaction>, StoreError>;

    async fn find_request(&self, id: &QuoteRequestId) -> Result<Option<QuoteRequest>, StoreError>;
    async fn list_requests(&self, query: &RequestQuery) -> Result<Vec<QuoteRequest>, StoreError>;
    async fn find_slot(&self, id: &SlotId) -> Result<Option<GuaranteeSlot>, StoreError>;
    async fn find_slot_for_request(
        &self,
        request_id: &QuoteRequestId,
    ) -> Result<Option<GuaranteeSlot>, StoreError>;
    async fn list_slots(&self) -> Result<Vec<GuaranteeSlot>, StoreError>;
    async fn find_refund(&self, id: &RefundRequestId) -> Result<Option<RefundRequest>, StoreError>;
    async fn list_refunds_for_slot(&self, slot_id: &SlotId)
        -> Result<Vec<RefundRequest>, StoreError>;
    async fn list_refunds(&self) -> Result<Vec<RefundRequest>, StoreError>;
    async fn ledger_entries(&self, user_id: Option<&ActorId>)
        -> Result<Vec<LedgerEntry>, StoreError>;

    async fn undelivered_notifications(&self, limit: usize)
        -> Result<Vec<Notification>, StoreError>;
    async fn mark_notifications_dispatched(
        &self,
        ids: &[String],
        dispatched_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Campaign metadata provider.
#[async_trait]
pub trait CampaignDirectory: Send + Sync {
    async fn campaign(&self, id: &CampaignId) -> Result<Option<CampaignMetadata>, StoreError>;
}

#[derive(Default)]
pub struct InMemoryCampaignDirectory {
    campaigns: RwLock<HashMap<String, CampaignMetadata>>,
}

impl InMemoryCampaignDirectory {
    pub fn new(campaigns: impl IntoIterator<Item = CampaignMetadata>) -> Self {
        Self {
            campaigns: RwLock::new(
                campaigns.into_iter().map(|campaign| (campaign.id.0.clone(), campaign)).collect(),
            ),
        }
    }

    pub async fn save(&self, campaign: CampaignMetadata) {
        let mut campaigns = self.campaigns.write().await;
        campaigns.insert(campaign.id.0.clone(), campaign);
    }
}

#[async_trait]
impl CampaignDirectory for InMemoryCampaignDirectory {
    async fn campaign(&self, id: &CampaignId) -> Result<Option<CampaignMetadata>, StoreError> {
        let campaigns = self.campaigns.read().await;
        Ok(campaigns.get(&id.0).cloned())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{
        CampaignDirectory, InMemoryCampaignDirectory, RequestQuery, RequestScopeFilter,
        StoreError, OPEN_REFUND_CONSTRAINT,
    };
    use crate::domain::actor::ActorId;
    use crate::domain::campaign::{CampaignId, CampaignMetadata, GuaranteeUnit, RefundSettings};
    use crate::domain::quote_request::{QuoteRequest, QuoteRequestId, QuoteRequestStatus};
    use crate::domain::{EntityKind, EntityRef};
    use crate::errors::WorkflowError;

    fn request(buyer: &str, distributor: Option<&str>, status: QuoteRequestStatus) -> QuoteRequest {
        let now = Utc::now();
        QuoteRequest {
            id: QuoteRequestId("QR-1".to_owned()),
            campaign_id: CampaignId("CMP-1".to_owned()),
            user_id: ActorId(buyer.to_owned()),
            distributor_id: distributor.map(|id| ActorId(id.to_owned())),
            target_rank: 1,
            guarantee_count: 10,
            guarantee_unit: GuaranteeUnit::Day,
            guarantee_period: None,
            initial_budget: None,
            final_daily_amount: None,
            final_budget_type: None,
            final_total_amount: None,
            start_date: None,
            end_date: None,
            status,
            rejection_reason: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn distributor_scope_includes_unassigned_requests() {
        let query = RequestQuery {
            scope: RequestScopeFilter::Distributor(ActorId("dist-1".to_owned())),
            ..RequestQuery::default()
        };
        assert!(query.matches(&request("buyer-1", None, QuoteRequestStatus::Requested)));
        let negotiating = QuoteRequestStatus::Negotiating;
        assert!(query.matches(&request("buyer-1", Some("dist-1"), negotiating)));
        assert!(!query.matches(&request("buyer-1", Some("dist-2"), negotiating)));
    }

    #[test]
    fn status_and_age_filters_combine() {
        let query = RequestQuery {
            scope: RequestScopeFilter::Buyer(ActorId("buyer-1".to_owned())),
            statuses: vec![QuoteRequestStatus::Requested],
            updated_before: Some(Utc::now() + Duration::minutes(1)),
            limit: None,
        };
        assert!(query.matches(&request("buyer-1", None, QuoteRequestStatus::Requested)));
        assert!(!query.matches(&request("buyer-1", None, QuoteRequestStatus::Purchased)));
        assert!(!query.matches(&request("buyer-2", None, QuoteRequestStatus::Requested)));

        let stale_only = RequestQuery {
            updated_before: Some(Utc::now() - Duration::days(14)),
            ..RequestQuery::default()
        };
        assert!(!stale_only.matches(&request("buyer-1", None, QuoteRequestStatus::Requested)));
    }

    #[test]
    fn store_errors_map_onto_workflow_taxonomy() {
        let slot = EntityRef::new(EntityKind::GuaranteeSlot, "SLOT-1");

        let stale: WorkflowError =
            StoreError::StaleWrite { entity: slot.clone(), expected: 3 }.into();
        assert!(matches!(stale, WorkflowError::InvalidTransition { .. }));

        let open: WorkflowError = StoreError::Conflict {
            constraint: OPEN_REFUND_CONSTRAINT.to_owned(),
            entity: Some(slot.clone()),
        }
        .into();
        assert!(matches!(open, WorkflowError::ConflictingRefundRequest { .. }));

        let database: WorkflowError = StoreError::Database("disk I/O error".to_owned()).into();
        assert!(database.is_retryable());
    }

    #[tokio::test]
    async fn in_memory_campaign_directory_serves_saved_campaigns() {
        let directory = InMemoryCampaignDirectory::default();
        directory
            .save(CampaignMetadata {
                id: CampaignId("CMP-9".to_owned()),
                guarantee_unit: GuaranteeUnit::Count,
                refund_settings: RefundSettings::default(),
            })
            .await;

        let found = directory.campaign(&CampaignId("CMP-9".to_owned())).await.expect("lookup");
        assert_eq!(found.map(|campaign| campaign.guarantee_unit), Some(GuaranteeUnit::Count));
        let missing = directory.campaign(&CampaignId("CMP-0".to_owned())).await.expect("lookup");
        assert!(missing.is_none());
    }
}
