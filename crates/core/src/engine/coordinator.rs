use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use crate::authority::Operation;
use crate::clock::Clock;
use crate::domain::actor::ActorId;
use crate::domain::quote_request::{QuoteRequest, QuoteRequestId};
use crate::domain::refund::{RefundRequest, RefundRequestId};
use crate::domain::slot::{GuaranteeSlot, SlotId};
use crate::domain::{EntityKind, EntityRef};
use crate::errors::{Dependency, WorkflowError};
use crate::ledger::LedgerEntry;
use crate::notify::{Notification, NotificationDispatcher};
use crate::store::{StoreError, WorkflowStore, WorkflowTransaction};

use super::RequestContext;

/// One atomic unit: every write an operation makes goes through here and
/// lands in a single store transaction. Ledger movements and notifications
/// are remembered so they can be audited and dispatched once the unit
/// commits.
pub struct UnitOfWork {
    tx: Box<dyn WorkflowTransaction>,
    notifications: Vec<Notification>,
    ledger: Vec<LedgerEntry>,
}

impl UnitOfWork {
    pub async fn load_request(
        &mut self,
        id: &QuoteRequestId,
    ) -> Result<QuoteRequest, WorkflowError> {
        self.tx.load_request(id).await?.ok_or_else(|| WorkflowError::NotFound {
            entity: EntityRef::new(EntityKind::QuoteRequest, id.0.clone()),
        })
    }

    pub async fn load_slot(&mut self, id: &SlotId) -> Result<GuaranteeSlot, WorkflowError> {
        self.tx.load_slot(id).await?.ok_or_else(|| WorkflowError::NotFound {
            entity: EntityRef::new(EntityKind::GuaranteeSlot, id.0.clone()),
        })
    }

    pub async fn load_refund(
        &mut self,
        id: &RefundRequestId,
    ) -> Result<RefundRequest, WorkflowError> {
        self.tx.load_refund(id).await?.ok_or_else(|| WorkflowError::NotFound {
            entity: EntityRef::new(EntityKind::RefundRequest, id.0.clone()),
        })
    }

    /// The request a slot was purchased from. A slot without one means the
    /// store is corrupt, not that the caller asked for something missing.
    pub async fn request_for_slot(
        &mut self,
        slot: &GuaranteeSlot,
    ) -> Result<QuoteRequest, WorkflowError> {
        self.tx.load_request(&slot.request_id).await?.ok_or_else(|| {
            WorkflowError::dependency(
                Dependency::Store,
                format!("{} references missing request `{}`", slot.entity(), slot.request_id.0),
            )
        })
    }

    pub async fn find_slot_for_request(
        &mut self,
        request_id: &QuoteRequestId,
    ) -> Result<Option<GuaranteeSlot>, WorkflowError> {
        Ok(self.tx.find_slot_for_request(request_id).await?)
    }

    pub async fn refunds_for_slot(
        &mut self,
        slot_id: &SlotId,
    ) -> Result<Vec<RefundRequest>, WorkflowError> {
        Ok(self.tx.list_refunds(slot_id).await?)
    }

    pub async fn insert_request(&mut self, request: &QuoteRequest) -> Result<(), WorkflowError> {
        Ok(self.tx.insert_request(request).await?)
    }

    pub async fn update_request(
        &mut self,
        request: &QuoteRequest,
        expected_version: u32,
    ) -> Result<(), WorkflowError> {
        Ok(self.tx.update_request(request, expected_version).await?)
    }

    pub async fn insert_slot(&mut self, slot: &GuaranteeSlot) -> Result<(), WorkflowError> {
        Ok(self.tx.insert_slot(slot).await?)
    }

    pub async fn update_slot(
        &mut self,
        slot: &GuaranteeSlot,
        expected_version: u32,
    ) -> Result<(), WorkflowError> {
        Ok(self.tx.update_slot(slot, expected_version).await?)
    }

    pub async fn insert_refund(&mut self, refund: &RefundRequest) -> Result<(), WorkflowError> {
        Ok(self.tx.insert_refund(refund).await?)
    }

    pub async fn update_refund(
        &mut self,
        refund: &RefundRequest,
        expected_version: u32,
    ) -> Result<(), WorkflowError> {
        Ok(self.tx.update_refund(refund, expected_version).await?)
    }

    /// Takes `amount` from the buyer's balance against `reference`.
    pub async fn hold(
        &mut self,
        user_id: &ActorId,
        amount: Decimal,
        reference: EntityRef,
        at: DateTime<Utc>,
    ) -> Result<LedgerEntry, WorkflowError> {
        let entry = LedgerEntry::hold(user_id.clone(), amount, reference, at);
        self.record_ledger(entry).await
    }

    /// Returns `amount` to the buyer's balance against `reference`.
    pub async fn release(
        &mut self,
        user_id: &ActorId,
        amount: Decimal,
        reference: EntityRef,
        at: DateTime<Utc>,
    ) -> Result<LedgerEntry, WorkflowError> {
        let entry = LedgerEntry::release(user_id.clone(), amount, reference, at);
        self.record_ledger(entry).await
    }

    async fn record_ledger(&mut self, entry: LedgerEntry) -> Result<LedgerEntry, WorkflowError> {
        self.tx.record_ledger(&entry).await.map_err(|error| match error {
            StoreError::Conflict { entity: Some(reference), .. } => {
                WorkflowError::InvalidTransition {
                    entity: reference,
                    current: format!("{} already recorded", entry.direction.as_str()),
                    required: vec![format!("no prior {}", entry.direction.as_str())],
                }
            }
            other => WorkflowError::dependency(Dependency::Ledger, other.to_string()),
        })?;
        self.ledger.push(entry.clone());
        Ok(entry)
    }

    /// Writes `notification` to the outbox; delivery waits for commit.
    pub async fn notify(&mut self, notification: Notification) -> Result<(), WorkflowError> {
        self.tx.enqueue_notification(&notification).await?;
        self.notifications.push(notification);
        Ok(())
    }
}

pub struct ConsistencyCoordinator {
    store: Arc<dyn WorkflowStore>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
}

impl ConsistencyCoordinator {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, dispatcher, audit, clock }
    }

    pub async fn begin(&self) -> Result<UnitOfWork, WorkflowError> {
        let tx = self
            .store
            .begin()
            .await
            .map_err(|error| WorkflowError::dependency(Dependency::Store, error.to_string()))?;
        Ok(UnitOfWork { tx, notifications: Vec::new(), ledger: Vec::new() })
    }

    /// Commits `unit` when `result` is Ok, rolls it back otherwise. Ledger
    /// audit events and notification dispatch only happen after a commit.
    pub async fn finish<T>(
        &self,
        unit: UnitOfWork,
        context: &RequestContext,
        operation: Operation,
        result: Result<T, WorkflowError>,
    ) -> Result<T, WorkflowError> {
        let UnitOfWork { tx, notifications, ledger } = unit;

        let value = match result {
            Ok(value) => value,
            Err(failure) => {
                if let Err(rollback_error) = tx.rollback().await {
                    error!(
                        event_name = "workflow.rollback_failed",
                        correlation_id = %context.correlation_id,
                        operation = operation.as_str(),
                        error = %rollback_error,
                        "rollback failed after operation error"
                    );
                }
                self.record_failure(context, operation, &failure);
                return Err(failure);
            }
        };

        if let Err(commit_error) = tx.commit().await {
            let failure = WorkflowError::from(commit_error);
            self.record_failure(context, operation, &failure);
            return Err(failure);
        }

        info!(
            event_name = "workflow.operation_committed",
            correlation_id = %context.correlation_id,
            operation = operation.as_str(),
            actor_id = %context.actor.id,
            ledger_entries = ledger.len(),
            notifications = notifications.len(),
            "workflow operation committed"
        );

        for entry in &ledger {
            self.audit.emit(
                AuditEvent::new(
                    Some(entry.reference.clone()),
                    context.correlation_id.clone(),
                    format!("money.ledger_{}", entry.direction.as_str()),
                    AuditCategory::Money,
                    context.actor.id.0.clone(),
                    AuditOutcome::Success,
                )
                .with_metadata("user_id", entry.user_id.0.clone())
                .with_metadata("amount", entry.amount.to_string())
                .with_metadata("entry_id", entry.entry_id.clone()),
            );
        }

        self.dispatch(&notifications).await;
        Ok(value)
    }

    /// Re-sends outbox rows that were committed but never marked delivered.
    pub async fn redeliver(&self, limit: usize) -> Result<usize, WorkflowError> {
        let pending = self.store.undelivered_notifications(limit).await?;
        self.dispatch(&pending).await;
        Ok(pending.len())
    }

    async fn dispatch(&self, notifications: &[Notification]) {
        if notifications.is_empty() {
            return;
        }

        for notification in notifications {
            self.dispatcher.dispatch(notification);
        }

        let ids: Vec<String> =
            notifications.iter().map(|notification| notification.id.clone()).collect();
        let marked = self.store.mark_notifications_dispatched(&ids, self.clock.now()).await;
        if let Err(mark_error) = marked {
            warn!(
                event_name = "notification.mark_failed",
                notifications = ids.len(),
                error = %mark_error,
                "notifications delivered but left undelivered in outbox"
            );
        }
    }

    fn record_failure(
        &self,
        context: &RequestContext,
        operation: Operation,
        failure: &WorkflowError,
    ) {
        let entity = failure.entity().map(ToString::to_string).unwrap_or_default();
        if failure.is_retryable() {
            error!(
                event_name = "workflow.operation_failed",
                correlation_id = %context.correlation_id,
                operation = operation.as_str(),
                actor_id = %context.actor.id,
                error_kind = failure.kind(),
                entity = %entity,
                error = %failure,
                "workflow operation rolled back"
            );
        } else {
            warn!(
                event_name = "workflow.operation_rejected",
                correlation_id = %context.correlation_id,
                operation = operation.as_str(),
                actor_id = %context.actor.id,
                error_kind = failure.kind(),
                entity = %entity,
                error = %failure,
                "workflow operation rejected"
            );
        }

        let (category, outcome) = match failure {
            WorkflowError::PermissionDenied { .. } => {
                (AuditCategory::Authorization, AuditOutcome::Rejected)
            }
            WorkflowError::DependencyFailure { .. } => {
                (AuditCategory::Persistence, AuditOutcome::Failed)
            }
            _ => (AuditCategory::Flow, AuditOutcome::Rejected),
        };
        self.audit.emit(
            AuditEvent::new(
                failure.entity().cloned(),
                context.correlation_id.clone(),
                format!("workflow.{}_failed", operation.as_str()),
                category,
                context.actor.id.0.clone(),
                outcome,
            )
            .with_metadata("error_kind", failure.kind())
            .with_metadata("error", failure.to_string()),
        );
    }
}
