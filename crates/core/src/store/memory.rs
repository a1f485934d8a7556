use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::actor::ActorId;
use crate::domain::quote_request::{QuoteRequest, QuoteRequestId};
use crate::domain::refund::{RefundRequest, RefundRequestId};
use crate::domain::slot::{GuaranteeSlot, SlotId};
use crate::domain::{EntityKind, EntityRef};
use crate::ledger::LedgerEntry;
use crate::notify::Notification;

use super::{
    RequestQuery, StoreError, WorkflowStore, WorkflowTransaction, LEDGER_REFERENCE_CONSTRAINT,
    OPEN_REFUND_CONSTRAINT, SLOT_PER_REQUEST_CONSTRAINT,
};

#[derive(Clone, Debug)]
struct OutboxRecord {
    notification: Notification,
    dispatched_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default)]
struct MemoryState {
    requests: BTreeMap<String, QuoteRequest>,
    slots: BTreeMap<String, GuaranteeSlot>,
    refunds: BTreeMap<String, RefundRequest>,
    ledger: Vec<LedgerEntry>,
    outbox: Vec<OutboxRecord>,
}

/// Transactional store kept in process memory. A transaction holds the store
/// lock for its whole lifetime and works on a copy that replaces the shared
/// state on commit.
#[derive(Clone, Default)]
pub struct InMemoryWorkflowStore {
    state: Arc<Mutex<MemoryState>>,
    fail_ledger_writes: Arc<AtomicBool>,
}

impl InMemoryWorkflowStore {
    /// Makes every ledger write fail until reset; used to exercise rollback.
    pub fn fail_ledger_writes(&self, fail: bool) {
        self.fail_ledger_writes.store(fail, Ordering::SeqCst);
    }
}

pub struct InMemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
    fail_ledger_writes: Arc<AtomicBool>,
}

#[async_trait]
impl WorkflowTransaction for InMemoryTransaction {
    async fn load_request(
        &mut self,
        id: &QuoteRequestId,
    ) -> Result<Option<QuoteRequest>, StoreError> {
        Ok(self.working.requests.get(&id.0).cloned())
    }

    async fn insert_request(&mut self, request: &QuoteRequest) -> Result<(), StoreError> {
        if self.working.requests.contains_key(&request.id.0) {
            return Err(StoreError::Conflict {
                constraint: "quote_request.id".to_string(),
                entity: Some(request.entity()),
            });
        }
        self.working.requests.insert(request.id.0.clone(), request.clone());
        Ok(())
    }

    async fn update_request(
        &mut self,
        request: &QuoteRequest,
        expected_version: u32,
    ) -> Result<(), StoreError> {
        match self.working.requests.get_mut(&request.id.0) {
            Some(stored) if stored.version == expected_version => {
                *stored = request.clone();
                Ok(())
            }
            _ => {
                Err(StoreError::StaleWrite { entity: request.entity(), expected: expected_version })
            }
        }
    }

    async fn load_slot(&mut self, id: &SlotId) -> Result<Option<GuaranteeSlot>, StoreError> {
        Ok(self.working.slots.get(&id.0).cloned())
    }

    async fn find_slot_for_request(
        &mut self,
        request_id: &QuoteRequestId,
    ) -> Result<Option<GuaranteeSlot>, StoreError> {
        Ok(self.working.slots.values().find(|slot| &slot.request_id == request_id).cloned())
    }

    async fn insert_slot(&mut self, slot: &GuaranteeSlot) -> Result<(), StoreError> {
        let duplicate = self.working.slots.contains_key(&slot.id.0)
            || self.working.slots.values().any(|existing| existing.request_id == slot.request_id);
        if duplicate {
            return Err(StoreError::Conflict {
                constraint: SLOT_PER_REQUEST_CONSTRAINT.to_string(),
                entity: Some(slot.entity()),
            });
        }
        self.working.slots.insert(slot.id.0.clone(), slot.clone());
        Ok(())
    }

    async fn update_slot(
        &mut self,
        slot: &GuaranteeSlot,
        expected_version: u32,
    ) -> Result<(), StoreError> {
        match self.working.slots.get_mut(&slot.id.0) {
            Some(stored) if stored.version == expected_version => {
                *stored = slot.clone();
                Ok(())
            }
            _ => Err(StoreError::StaleWrite { entity: slot.entity(), expected: expected_version }),
        }
    }

    async fn load_refund(
        &mut self,
        id: &RefundRequestId,
    ) -> Result<Option<RefundRequest>, StoreError> {
        Ok(self.working.refunds.get(&id.0).cloned())
    }

    async fn list_refunds(&mut self, slot_id: &SlotId) -> Result<Vec<RefundRequest>, StoreError> {
        Ok(refunds_for_slot(&self.working, slot_id))
    }

    async fn insert_refund(&mut self, refund: &RefundRequest) -> Result<(), StoreError> {
        let open_exists = refund.status.is_open()
            && self.working.refunds.values().any(|existing| {
                existing.slot_id == refund.slot_id && existing.status.is_open()
            });
        if open_exists {
            return Err(StoreError::Conflict {
                constraint: OPEN_REFUND_CONSTRAINT.to_string(),
                entity: Some(EntityRef::new(EntityKind::GuaranteeSlot, refund.slot_id.0.clone())),
            });
        }
        self.working.refunds.insert(refund.id.0.clone(), refund.clone());
        Ok(())
    }

    async fn update_refund(
        &mut self,
        refund: &RefundRequest,
        expected_version: u32,
    ) -> Result<(), StoreError> {
        match self.working.refunds.get_mut(&refund.id.0) {
            Some(stored) if stored.version == expected_version => {
                *stored = refund.clone();
                Ok(())
            }
            _ => {
                Err(StoreError::StaleWrite { entity: refund.entity(), expected: expected_version })
            }
        }
    }

    async fn record_ledger(&mut self, entry: &LedgerEntry) -> Result<(), StoreError> {
        if self.fail_ledger_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Database("ledger write rejected".to_string()));
        }
        let duplicate = self.working.ledger.iter().any(|existing| {
            existing.reference == entry.reference && existing.direction == entry.direction
        });
        if duplicate {
            return Err(StoreError::Conflict {
                constraint: LEDGER_REFERENCE_CONSTRAINT.to_string(),
                entity: Some(entry.reference.clone()),
            });
        }
        self.working.ledger.push(entry.clone());
        Ok(())
    }

    async fn enqueue_notification(
        &mut self,
        notification: &Notification,
    ) -> Result<(), StoreError> {
        self.working
            .outbox
            .push(OutboxRecord { notification: notification.clone(), dispatched_at: None });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemoryTransaction { mut guard, working, .. } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

fn refunds_for_slot(state: &MemoryState, slot_id: &SlotId) -> Vec<RefundRequest> {
    let mut refunds: Vec<RefundRequest> =
        state.refunds.values().filter(|refund| &refund.slot_id == slot_id).cloned().collect();
    refunds.sort_by(|left, right| left.request_date.cmp(&right.request_date));
    refunds
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn begin(&self) -> Result<Box<dyn WorkflowTransaction>, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTransaction {
            guard,
            working,
            fail_ledger_writes: Arc::clone(&self.fail_ledger_writes),
        }))
    }

    async fn find_request(&self, id: &QuoteRequestId) -> Result<Option<QuoteRequest>, StoreError> {
        Ok(self.state.lock().await.requests.get(&id.0).cloned())
    }

    async fn list_requests(&self, query: &RequestQuery) -> Result<Vec<QuoteRequest>, StoreError> {
        let state = self.state.lock().await;
        let mut requests: Vec<QuoteRequest> =
            state.requests.values().filter(|request| query.matches(request)).cloned().collect();
        requests.sort_by(|left, right| right.updated_at.cmp(&left.updated_at));
        if let Some(limit) = query.limit {
            requests.truncate(limit);
        }
        Ok(requests)
    }

    async fn find_slot(&self, id: &SlotId) -> Result<Option<GuaranteeSlot>, StoreError> {
        Ok(self.state.lock().await.slots.get(&id.0).cloned())
    }

    async fn find_slot_for_request(
        &self,
        request_id: &QuoteRequestId,
    ) -> Result<Option<GuaranteeSlot>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.slots.values().find(|slot| &slot.request_id == request_id).cloned())
    }

    async fn list_slots(&self) -> Result<Vec<GuaranteeSlot>, StoreError> {
        Ok(self.state.lock().await.slots.values().cloned().collect())
    }

    async fn find_refund(&self, id: &RefundRequestId) -> Result<Option<RefundRequest>, StoreError> {
        Ok(self.state.lock().await.refunds.get(&id.0).cloned())
    }

    async fn list_refunds_for_slot(
        &self,
        slot_id: &SlotId,
    ) -> Result<Vec<RefundRequest>, StoreError> {
        let state = self.state.lock().await;
        Ok(refunds_for_slot(&state, slot_id))
    }

    async fn list_refunds(&self) -> Result<Vec<RefundRequest>, StoreError> {
        Ok(self.state.lock().await.refunds.values().cloned().collect())
    }

    async fn ledger_entries(
        &self,
        user_id: Option<&ActorId>,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .ledger
            .iter()
            .filter(|entry| user_id.map_or(true, |user| &entry.user_id == user))
            .cloned()
            .collect())
    }

    async fn undelivered_notifications(
        &self,
        limit: usize,
    ) -> Result<Vec<Notification>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .outbox
            .iter()
            .filter(|record| record.dispatched_at.is_none())
            .take(limit)
            .map(|record| record.notification.clone())
            .collect())
    }

    async fn mark_notifications_dispatched(
        &self,
        ids: &[String],
        dispatched_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        for record in state.outbox.iter_mut() {
            if record.dispatched_at.is_none() && ids.contains(&record.notification.id) {
                record.dispatched_at = Some(dispatched_at);
            }
        }
        Ok(())
    }
}
