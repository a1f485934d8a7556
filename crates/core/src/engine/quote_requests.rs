use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::info;

use crate::authority::{AuthorizationFailure, Operation, PermissionLevel};
use crate::domain::actor::ActorId;
use crate::domain::campaign::CampaignId;
use crate::domain::quote_request::{
    BudgetType, FinalTerms, QuoteRequest, QuoteRequestId, QuoteRequestStatus,
};
use crate::domain::slot::{GuaranteeSlot, SlotId};
use crate::domain::{EntityKind, EntityRef};
use crate::errors::{Dependency, WorkflowError};
use crate::flows::{FlowAction, FlowContext, QuoteRequestEvent};
use crate::notify::NotificationKind;
use crate::store::{RequestQuery, RequestScopeFilter};

use super::payloads::non_blank;
use super::{
    new_id, parties, AcceptTerms, ExpirySweepReport, NewQuoteRequest, OpenNegotiation, Purchase,
    PurchaseReceipt, Rejection, RequestContext, UnitOfWork, WorkflowEngine,
};

impl WorkflowEngine {
    pub async fn create_request(
        &self,
        context: &RequestContext,
        payload: NewQuoteRequest,
    ) -> Result<QuoteRequest, WorkflowError> {
        self.permit(context, Operation::CreateRequest, None, None)?;

        if payload.target_rank == 0 {
            return Err(WorkflowError::validation(None, "target_rank", "must be a positive rank"));
        }
        if payload.guarantee_count == 0 {
            return Err(WorkflowError::validation(None, "guarantee_count", "must be positive"));
        }
        if payload.guarantee_period == Some(0) {
            return Err(WorkflowError::validation(None, "guarantee_period", "must be positive"));
        }
        if payload.initial_budget.is_some_and(|budget| budget.is_sign_negative()) {
            return Err(WorkflowError::validation(None, "initial_budget", "must not be negative"));
        }

        let campaign_id = CampaignId(payload.campaign_id.trim().to_string());
        let campaign = self
            .campaigns
            .campaign(&campaign_id)
            .await
            .map_err(|error| {
                WorkflowError::dependency(Dependency::CampaignDirectory, error.to_string())
            })?
            .ok_or_else(|| {
                WorkflowError::validation(
                    None,
                    "campaign_id",
                    format!("campaign `{}` does not exist", campaign_id.0),
                )
            })?;

        let now = self.clock.now();
        let request = QuoteRequest {
            id: QuoteRequestId(new_id("QR")),
            campaign_id,
            user_id: context.actor.id.clone(),
            distributor_id: None,
            target_rank: payload.target_rank,
            guarantee_count: payload.guarantee_count,
            guarantee_unit: campaign.guarantee_unit,
            guarantee_period: payload.guarantee_period,
            initial_budget: payload.initial_budget,
            final_daily_amount: None,
            final_budget_type: None,
            final_total_amount: None,
            start_date: None,
            end_date: None,
            status: QuoteRequestStatus::Requested,
            rejection_reason: None,
            version: 1,
            created_at: now,
            updated_at: now,
        };

        let mut unit = self.coordinator.begin().await?;
        let result = async {
            unit.insert_request(&request).await?;
            unit.notify(self.notification(
                context,
                NotificationKind::RequestCreated,
                request.entity(),
                [request.user_id.clone()],
                format!("quote request {} created", request.id.0),
            ))
            .await?;
            Ok::<_, WorkflowError>(request)
        }
        .await;
        self.coordinator.finish(unit, context, Operation::CreateRequest, result).await
    }

    pub async fn open_negotiation(
        &self,
        context: &RequestContext,
        id: &QuoteRequestId,
        payload: OpenNegotiation,
    ) -> Result<QuoteRequest, WorkflowError> {
        let mut unit = self.coordinator.begin().await?;
        let result = self.open_negotiation_in(&mut unit, context, id, payload).await;
        self.coordinator.finish(unit, context, Operation::OpenNegotiation, result).await
    }

    async fn open_negotiation_in(
        &self,
        unit: &mut UnitOfWork,
        context: &RequestContext,
        id: &QuoteRequestId,
        payload: OpenNegotiation,
    ) -> Result<QuoteRequest, WorkflowError> {
        let mut request = unit.load_request(id).await?;
        self.permit(context, Operation::OpenNegotiation, Some(&request), Some(request.entity()))?;
        let outcome = self.apply_flow(
            &self.request_flow,
            context,
            request.entity(),
            request.status,
            QuoteRequestEvent::OpenNegotiation,
            &FlowContext::default(),
        )?;

        if outcome.requires(FlowAction::AssignDistributor) {
            self.assign_distributor(context, &mut request, payload.distributor_id.as_deref());
        }
        request.status = outcome.to;
        let expected = request.touch(self.clock.now());
        unit.update_request(&request, expected).await?;

        unit.notify(self.notification(
            context,
            NotificationKind::RequestNegotiating,
            request.entity(),
            parties(&request),
            format!("negotiation opened on {}", request.id.0),
        ))
        .await?;
        Ok(request)
    }

    pub async fn accept_request(
        &self,
        context: &RequestContext,
        id: &QuoteRequestId,
        payload: AcceptTerms,
    ) -> Result<QuoteRequest, WorkflowError> {
        let mut unit = self.coordinator.begin().await?;
        let result = self.accept_request_in(&mut unit, context, id, payload).await;
        self.coordinator.finish(unit, context, Operation::AcceptRequest, result).await
    }

    async fn accept_request_in(
        &self,
        unit: &mut UnitOfWork,
        context: &RequestContext,
        id: &QuoteRequestId,
        payload: AcceptTerms,
    ) -> Result<QuoteRequest, WorkflowError> {
        let mut request = unit.load_request(id).await?;
        self.permit(context, Operation::AcceptRequest, Some(&request), Some(request.entity()))?;
        let outcome = self.apply_flow(
            &self.request_flow,
            context,
            request.entity(),
            request.status,
            QuoteRequestEvent::Accept,
            &FlowContext::missing(payload.missing_fields()),
        )?;

        let (Some(daily_amount), Some(total_amount)) =
            (payload.final_daily_amount, payload.final_total_amount)
        else {
            return Err(WorkflowError::validation(
                Some(request.entity()),
                "final_daily_amount",
                "final amounts are required before accepting",
            ));
        };
        for (field, amount) in
            [("final_daily_amount", daily_amount), ("final_total_amount", total_amount)]
        {
            if amount <= Decimal::ZERO {
                return Err(WorkflowError::validation(
                    Some(request.entity()),
                    field,
                    "must be greater than zero",
                ));
            }
        }
        self.contracted_total(&request, daily_amount)?;

        if outcome.requires(FlowAction::RecordFinalTerms) {
            request.record_final_terms(FinalTerms {
                daily_amount,
                budget_type: payload.final_budget_type.unwrap_or(BudgetType::Daily),
                total_amount,
            });
        }
        request.status = outcome.to;
        let expected = request.touch(self.clock.now());
        unit.update_request(&request, expected).await?;

        unit.notify(self.notification(
            context,
            NotificationKind::RequestAccepted,
            request.entity(),
            parties(&request),
            format!("quote {} accepted at {} per day", request.id.0, daily_amount),
        ))
        .await?;
        Ok(request)
    }

    pub async fn reject_request(
        &self,
        context: &RequestContext,
        id: &QuoteRequestId,
        payload: Rejection,
    ) -> Result<QuoteRequest, WorkflowError> {
        let mut unit = self.coordinator.begin().await?;
        let result = self.reject_request_in(&mut unit, context, id, payload).await;
        self.coordinator.finish(unit, context, Operation::RejectRequest, result).await
    }

    async fn reject_request_in(
        &self,
        unit: &mut UnitOfWork,
        context: &RequestContext,
        id: &QuoteRequestId,
        payload: Rejection,
    ) -> Result<QuoteRequest, WorkflowError> {
        let mut request = unit.load_request(id).await?;
        self.permit(context, Operation::RejectRequest, Some(&request), Some(request.entity()))?;
        let outcome = self.apply_flow(
            &self.request_flow,
            context,
            request.entity(),
            request.status,
            QuoteRequestEvent::Reject,
            &FlowContext::default(),
        )?;

        if outcome.requires(FlowAction::AssignDistributor) {
            self.assign_distributor(context, &mut request, None);
        }
        if outcome.requires(FlowAction::RecordRejection) {
            request.rejection_reason = non_blank(payload.reason.as_deref());
        }
        request.status = outcome.to;
        let expected = request.touch(self.clock.now());
        unit.update_request(&request, expected).await?;

        unit.notify(self.notification(
            context,
            NotificationKind::RequestRejected,
            request.entity(),
            parties(&request),
            format!("quote request {} rejected", request.id.0),
        ))
        .await?;
        Ok(request)
    }

    /// Undoes a rejection made in error; the request returns to negotiation.
    pub async fn reopen_request(
        &self,
        context: &RequestContext,
        id: &QuoteRequestId,
    ) -> Result<QuoteRequest, WorkflowError> {
        let mut unit = self.coordinator.begin().await?;
        let result = self.reopen_request_in(&mut unit, context, id).await;
        self.coordinator.finish(unit, context, Operation::ReopenRequest, result).await
    }

    async fn reopen_request_in(
        &self,
        unit: &mut UnitOfWork,
        context: &RequestContext,
        id: &QuoteRequestId,
    ) -> Result<QuoteRequest, WorkflowError> {
        let mut request = unit.load_request(id).await?;
        self.permit(context, Operation::ReopenRequest, Some(&request), Some(request.entity()))?;
        let outcome = self.apply_flow(
            &self.request_flow,
            context,
            request.entity(),
            request.status,
            QuoteRequestEvent::UndoRejection,
            &FlowContext::default(),
        )?;

        request.status = outcome.to;
        let expected = request.touch(self.clock.now());
        unit.update_request(&request, expected).await?;

        unit.notify(self.notification(
            context,
            NotificationKind::RequestReopened,
            request.entity(),
            parties(&request),
            format!("quote request {} back in negotiation", request.id.0),
        ))
        .await?;
        Ok(request)
    }

    pub async fn expire_request(
        &self,
        context: &RequestContext,
        id: &QuoteRequestId,
    ) -> Result<QuoteRequest, WorkflowError> {
        let mut unit = self.coordinator.begin().await?;
        let result = self.expire_request_in(&mut unit, context, id).await;
        self.coordinator.finish(unit, context, Operation::ExpireRequest, result).await
    }

    async fn expire_request_in(
        &self,
        unit: &mut UnitOfWork,
        context: &RequestContext,
        id: &QuoteRequestId,
    ) -> Result<QuoteRequest, WorkflowError> {
        let mut request = unit.load_request(id).await?;
        self.permit(context, Operation::ExpireRequest, Some(&request), Some(request.entity()))?;
        let outcome = self.apply_flow(
            &self.request_flow,
            context,
            request.entity(),
            request.status,
            QuoteRequestEvent::Expire,
            &FlowContext::default(),
        )?;

        if outcome.requires(FlowAction::ClearFinalTerms) {
            request.clear_final_terms();
        }
        request.status = outcome.to;
        let expected = request.touch(self.clock.now());
        unit.update_request(&request, expected).await?;

        unit.notify(self.notification(
            context,
            NotificationKind::RequestExpired,
            request.entity(),
            parties(&request),
            format!("quote request {} expired", request.id.0),
        ))
        .await?;
        Ok(request)
    }

    /// Expires every open request untouched since `cutoff`, one unit of work
    /// per request. A failure on one request does not stop the sweep.
    pub async fn expire_stale_requests(
        &self,
        context: &RequestContext,
        cutoff: DateTime<Utc>,
    ) -> Result<ExpirySweepReport, WorkflowError> {
        self.permit(context, Operation::ExpireRequest, None, None)?;

        let candidates = self
            .store
            .list_requests(&RequestQuery {
                scope: RequestScopeFilter::All,
                statuses: self.request_flow.accepted_states(QuoteRequestEvent::Expire),
                updated_before: Some(cutoff),
                limit: None,
            })
            .await?;

        let mut report = ExpirySweepReport::default();
        for request in candidates {
            match self.expire_request(context, &request.id).await {
                Ok(expired) => report.expired.push(expired.id),
                Err(error) => report.failed.push((request.id, error.to_string())),
            }
        }

        info!(
            event_name = "workflow.expiry_sweep_completed",
            correlation_id = %context.correlation_id,
            cutoff = %cutoff,
            expired = report.expired.len(),
            failed = report.failed.len(),
            "expiry sweep completed"
        );
        Ok(report)
    }

    /// Moves an accepted request to purchased and, in the same unit of work,
    /// schedules it, creates its pending slot and holds the contracted total.
    pub async fn purchase_request(
        &self,
        context: &RequestContext,
        id: &QuoteRequestId,
        payload: Purchase,
    ) -> Result<PurchaseReceipt, WorkflowError> {
        let mut unit = self.coordinator.begin().await?;
        let result = self.purchase_request_in(&mut unit, context, id, payload).await;
        self.coordinator.finish(unit, context, Operation::PurchaseRequest, result).await
    }

    async fn purchase_request_in(
        &self,
        unit: &mut UnitOfWork,
        context: &RequestContext,
        id: &QuoteRequestId,
        payload: Purchase,
    ) -> Result<PurchaseReceipt, WorkflowError> {
        let mut request = unit.load_request(id).await?;
        self.permit(context, Operation::PurchaseRequest, Some(&request), Some(request.entity()))?;
        let outcome = self.apply_flow(
            &self.request_flow,
            context,
            request.entity(),
            request.status,
            QuoteRequestEvent::Purchase,
            &FlowContext::default(),
        )?;

        let terms = request.final_terms().ok_or_else(|| {
            WorkflowError::validation(
                Some(request.entity()),
                "final_daily_amount",
                "accepted request carries no final terms",
            )
        })?;

        if let Some(existing) = unit.find_slot_for_request(&request.id).await? {
            return Err(WorkflowError::invalid_transition(
                existing.entity(),
                existing.status.as_str(),
                ["none"],
            ));
        }

        let now = self.clock.now();
        let today = self.clock.today();
        let start_date = payload.start_date.unwrap_or(today);
        if start_date < today {
            return Err(WorkflowError::validation(
                Some(request.entity()),
                "start_date",
                format!("{start_date} is in the past"),
            ));
        }
        let (start_date, end_date) = request.schedule_from(start_date).ok_or_else(|| {
            WorkflowError::validation(
                Some(request.entity()),
                "start_date",
                "execution window is out of calendar range",
            )
        })?;

        if outcome.requires(FlowAction::ScheduleExecution) {
            request.start_date = Some(start_date);
            request.end_date = Some(end_date);
        }
        request.status = outcome.to;
        let expected = request.touch(now);
        unit.update_request(&request, expected).await?;

        let slot = GuaranteeSlot::pending(
            SlotId(new_id("SLOT")),
            request.id.clone(),
            start_date,
            end_date,
            now,
        );
        unit.insert_slot(&slot).await?;

        let contracted = self.contracted_total(&request, terms.daily_amount)?;
        let hold = unit.hold(&request.user_id, contracted, slot.entity(), now).await?;

        unit.notify(self.notification(
            context,
            NotificationKind::RequestPurchased,
            slot.entity(),
            parties(&request),
            format!("{} purchased; slot {} awaits approval", request.id.0, slot.id.0),
        ))
        .await?;

        Ok(PurchaseReceipt { request, slot, hold })
    }

    pub async fn get_request(
        &self,
        context: &RequestContext,
        id: &QuoteRequestId,
    ) -> Result<QuoteRequest, WorkflowError> {
        let request = self.store.find_request(id).await?.ok_or_else(|| WorkflowError::NotFound {
            entity: EntityRef::new(EntityKind::QuoteRequest, id.0.clone()),
        })?;
        self.permit(context, Operation::ViewRequest, Some(&request), Some(request.entity()))?;
        Ok(request)
    }

    /// Requests visible to the caller: their own as a buyer, assigned or
    /// claimable ones as a distributor, everything as an admin.
    pub async fn list_requests(
        &self,
        context: &RequestContext,
        statuses: Vec<QuoteRequestStatus>,
        limit: Option<usize>,
    ) -> Result<Vec<QuoteRequest>, WorkflowError> {
        let actor = &context.actor;
        if !self.authority.authorize(actor, PermissionLevel::Member) {
            let failure = AuthorizationFailure::InsufficientRole {
                role: actor.role,
                required: PermissionLevel::Member,
            };
            return Err(WorkflowError::PermissionDenied {
                actor: actor.id.clone(),
                operation: Operation::ViewRequest,
                entity: None,
                reason: failure.reason(),
            });
        }

        let scope = if self.authority.is_admin(actor) {
            RequestScopeFilter::All
        } else if self.authority.is_distributor(actor) {
            RequestScopeFilter::Distributor(actor.id.clone())
        } else {
            RequestScopeFilter::Buyer(actor.id.clone())
        };

        Ok(self
            .store
            .list_requests(&RequestQuery { scope, statuses, updated_before: None, limit })
            .await?)
    }

    fn assign_distributor(
        &self,
        context: &RequestContext,
        request: &mut QuoteRequest,
        requested: Option<&str>,
    ) {
        if request.distributor_id.is_some() {
            return;
        }
        let assignee = match requested.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) if self.authority.is_admin(&context.actor) => ActorId(id.to_string()),
            _ => context.actor.id.clone(),
        };
        request.distributor_id = Some(assignee);
    }
}
