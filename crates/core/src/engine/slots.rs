use rust_decimal::Decimal;

use crate::authority::Operation;
use crate::domain::quote_request::{FinalTerms, QuoteRequest};
use crate::domain::refund::{
    approved_total, open_refund, RefundOrigin, RefundRequest, RefundRequestId, RefundStatus,
};
use crate::domain::slot::{GuaranteeSlot, SlotId};
use crate::domain::{EntityKind, EntityRef};
use crate::errors::{Dependency, WorkflowError};
use crate::flows::{FlowAction, FlowContext, SlotEvent};
use crate::notify::NotificationKind;
use crate::proration::{ProrationBreakdown, ProrationInput, RefundPolicy};

use super::payloads::non_blank;
use super::{
    amount_out_of_range, new_id, parties, Cancellation, Completion, Rejection, RequestContext,
    SettlementReceipt, UnitOfWork, WorkflowEngine,
};

impl WorkflowEngine {
    /// Activates a pending slot, or re-approves a rejected one.
    pub async fn approve_slot(
        &self,
        context: &RequestContext,
        slot_id: &SlotId,
    ) -> Result<GuaranteeSlot, WorkflowError> {
        let mut unit = self.coordinator.begin().await?;
        let result = self.approve_slot_in(&mut unit, context, slot_id).await;
        self.coordinator.finish(unit, context, Operation::ApproveSlot, result).await
    }

    async fn approve_slot_in(
        &self,
        unit: &mut UnitOfWork,
        context: &RequestContext,
        slot_id: &SlotId,
    ) -> Result<GuaranteeSlot, WorkflowError> {
        let mut slot = unit.load_slot(slot_id).await?;
        let request = unit.request_for_slot(&slot).await?;
        self.permit(context, Operation::ApproveSlot, Some(&request), Some(slot.entity()))?;
        let outcome = self.apply_flow(
            &self.slot_flow,
            context,
            slot.entity(),
            slot.status,
            SlotEvent::Approve,
            &FlowContext::default(),
        )?;

        let refunds = unit.refunds_for_slot(&slot.id).await?;
        refuse_open_refund(&slot, &refunds)?;

        let now = self.clock.now();
        if outcome.requires(FlowAction::RecordApproval) {
            slot.record_approval(context.actor.id.clone(), now);
        }
        slot.status = outcome.to;
        let expected = slot.touch(now);
        unit.update_slot(&slot, expected).await?;

        unit.notify(self.notification(
            context,
            NotificationKind::SlotActivated,
            slot.entity(),
            parties(&request),
            format!("slot {} is active from {}", slot.id.0, slot.start_date),
        ))
        .await?;
        Ok(slot)
    }

    pub async fn reject_slot(
        &self,
        context: &RequestContext,
        slot_id: &SlotId,
        payload: Rejection,
    ) -> Result<GuaranteeSlot, WorkflowError> {
        let mut unit = self.coordinator.begin().await?;
        let result = self.reject_slot_in(&mut unit, context, slot_id, payload).await;
        self.coordinator.finish(unit, context, Operation::RejectSlot, result).await
    }

    async fn reject_slot_in(
        &self,
        unit: &mut UnitOfWork,
        context: &RequestContext,
        slot_id: &SlotId,
        payload: Rejection,
    ) -> Result<GuaranteeSlot, WorkflowError> {
        let mut slot = unit.load_slot(slot_id).await?;
        let request = unit.request_for_slot(&slot).await?;
        self.permit(context, Operation::RejectSlot, Some(&request), Some(slot.entity()))?;

        let reason = non_blank(payload.reason.as_deref());
        let missing = if reason.is_none() { vec!["rejection_reason"] } else { Vec::new() };
        let outcome = self.apply_flow(
            &self.slot_flow,
            context,
            slot.entity(),
            slot.status,
            SlotEvent::Reject,
            &FlowContext::missing(missing),
        )?;

        let now = self.clock.now();
        if let Some(reason) = reason.filter(|_| outcome.requires(FlowAction::RecordRejection)) {
            slot.record_rejection(context.actor.id.clone(), reason, now);
        }
        slot.status = outcome.to;
        let expected = slot.touch(now);
        unit.update_slot(&slot, expected).await?;

        unit.notify(self.notification(
            context,
            NotificationKind::SlotRejected,
            slot.entity(),
            parties(&request),
            format!("slot {} rejected", slot.id.0),
        ))
        .await?;
        Ok(slot)
    }

    /// Completes an active slot. Finishing a day-based guarantee before its
    /// end date refunds the unearned days in the same unit of work unless the
    /// caller names an explicit amount.
    pub async fn complete_slot(
        &self,
        context: &RequestContext,
        slot_id: &SlotId,
        payload: Completion,
    ) -> Result<SettlementReceipt, WorkflowError> {
        let policy = self.policy_for_slot(slot_id).await?;
        let mut unit = self.coordinator.begin().await?;
        let result = self.complete_slot_in(&mut unit, context, slot_id, payload, &policy).await;
        self.coordinator.finish(unit, context, Operation::CompleteSlot, result).await
    }

    async fn complete_slot_in(
        &self,
        unit: &mut UnitOfWork,
        context: &RequestContext,
        slot_id: &SlotId,
        payload: Completion,
        policy: &RefundPolicy,
    ) -> Result<SettlementReceipt, WorkflowError> {
        let mut slot = unit.load_slot(slot_id).await?;
        let request = unit.request_for_slot(&slot).await?;
        self.permit(context, Operation::CompleteSlot, Some(&request), Some(slot.entity()))?;

        let work_memo = non_blank(payload.work_memo.as_deref());
        let missing = if work_memo.is_none() { vec!["work_memo"] } else { Vec::new() };
        let outcome = self.apply_flow(
            &self.slot_flow,
            context,
            slot.entity(),
            slot.status,
            SlotEvent::Complete,
            &FlowContext::missing(missing),
        )?;

        let refunds = unit.refunds_for_slot(&slot.id).await?;
        refuse_open_refund(&slot, &refunds)?;

        let breakdown = self.prorate(&request, &slot, &refunds, policy)?;
        let today = self.clock.today();
        let early = request.guarantee_unit.has_fixed_window() && today < slot.end_date;
        let refund_amount = match payload.refund_amount {
            Some(amount) => self.checked_refund_amount(&slot, amount, &breakdown)?,
            None if early && outcome.requires(FlowAction::SettleEarlyCompletion) => {
                breakdown.refund_amount
            }
            None => Decimal::ZERO,
        };

        let now = self.clock.now();
        if outcome.requires(FlowAction::RecordCompletion) {
            slot.completed_at = Some(now);
            slot.completed_by = Some(context.actor.id.clone());
            slot.work_memo = work_memo;
        }
        slot.status = outcome.to;
        let expected = slot.touch(now);
        unit.update_slot(&slot, expected).await?;

        let refund = if refund_amount > Decimal::ZERO {
            let refund = self.settled_refund(
                context,
                &slot,
                RefundOrigin::EarlyCompletion,
                format!(
                    "early completion after {} of {} days",
                    breakdown.elapsed_days, request.guarantee_count
                ),
                refund_amount,
            );
            unit.insert_refund(&refund).await?;
            unit.release(&request.user_id, refund.refund_amount, refund.entity(), now).await?;
            Some(refund)
        } else {
            None
        };

        let summary = match &refund {
            Some(refund) => {
                format!("slot {} completed; {} refunded", slot.id.0, refund.refund_amount)
            }
            None => format!("slot {} completed", slot.id.0),
        };
        unit.notify(self.notification(
            context,
            NotificationKind::SlotCompleted,
            slot.entity(),
            parties(&request),
            summary,
        ))
        .await?;

        Ok(SettlementReceipt { slot, refund })
    }

    /// Cancels a slot before execution starts and returns everything still
    /// held for it.
    pub async fn cancel_slot(
        &self,
        context: &RequestContext,
        slot_id: &SlotId,
        payload: Cancellation,
    ) -> Result<SettlementReceipt, WorkflowError> {
        let mut unit = self.coordinator.begin().await?;
        let result = self.cancel_slot_in(&mut unit, context, slot_id, payload).await;
        self.coordinator.finish(unit, context, Operation::CancelSlot, result).await
    }

    async fn cancel_slot_in(
        &self,
        unit: &mut UnitOfWork,
        context: &RequestContext,
        slot_id: &SlotId,
        payload: Cancellation,
    ) -> Result<SettlementReceipt, WorkflowError> {
        let mut slot = unit.load_slot(slot_id).await?;
        let request = unit.request_for_slot(&slot).await?;
        self.permit(context, Operation::CancelSlot, Some(&request), Some(slot.entity()))?;
        let outcome = self.apply_flow(
            &self.slot_flow,
            context,
            slot.entity(),
            slot.status,
            SlotEvent::Cancel,
            &FlowContext::default(),
        )?;

        let refunds = unit.refunds_for_slot(&slot.id).await?;
        refuse_open_refund(&slot, &refunds)?;

        let terms = settled_terms(&request)?;
        let contracted = self.contracted_total(&request, terms.daily_amount)?;
        let remaining = (contracted - approved_total(&refunds)).max(Decimal::ZERO);

        let now = self.clock.now();
        if outcome.requires(FlowAction::RecordCancellation) {
            slot.cancelled_at = Some(now);
            slot.cancelled_by = Some(context.actor.id.clone());
        }
        slot.status = outcome.to;
        let expected = slot.touch(now);
        unit.update_slot(&slot, expected).await?;

        let refund = if outcome.requires(FlowAction::ReleaseFunds) && remaining > Decimal::ZERO {
            let reason = non_blank(payload.reason.as_deref())
                .unwrap_or_else(|| "cancelled before execution".to_string());
            let refund =
                self.settled_refund(context, &slot, RefundOrigin::Cancellation, reason, remaining);
            unit.insert_refund(&refund).await?;
            unit.release(&request.user_id, refund.refund_amount, refund.entity(), now).await?;
            Some(refund)
        } else {
            None
        };

        unit.notify(self.notification(
            context,
            NotificationKind::SlotCancelled,
            slot.entity(),
            parties(&request),
            format!("slot {} cancelled; {} released", slot.id.0, remaining),
        ))
        .await?;

        Ok(SettlementReceipt { slot, refund })
    }

    pub async fn get_slot(
        &self,
        context: &RequestContext,
        slot_id: &SlotId,
    ) -> Result<GuaranteeSlot, WorkflowError> {
        let (slot, _) = self.visible_slot(context, slot_id).await?;
        Ok(slot)
    }

    pub async fn list_refunds(
        &self,
        context: &RequestContext,
        slot_id: &SlotId,
    ) -> Result<Vec<RefundRequest>, WorkflowError> {
        let (slot, _) = self.visible_slot(context, slot_id).await?;
        Ok(self.store.list_refunds_for_slot(&slot.id).await?)
    }

    /// What a refund requested today would come to, without writing anything.
    pub async fn preview_refund(
        &self,
        context: &RequestContext,
        slot_id: &SlotId,
    ) -> Result<ProrationBreakdown, WorkflowError> {
        let (slot, request) = self.visible_slot(context, slot_id).await?;
        let policy = self.refund_policy(&request.campaign_id).await?;
        let refunds = self.store.list_refunds_for_slot(&slot.id).await?;
        self.prorate(&request, &slot, &refunds, &policy)
    }

    async fn visible_slot(
        &self,
        context: &RequestContext,
        slot_id: &SlotId,
    ) -> Result<(GuaranteeSlot, QuoteRequest), WorkflowError> {
        let slot = self.store.find_slot(slot_id).await?.ok_or_else(|| WorkflowError::NotFound {
            entity: EntityRef::new(EntityKind::GuaranteeSlot, slot_id.0.clone()),
        })?;
        let request = self.store.find_request(&slot.request_id).await?.ok_or_else(|| {
            WorkflowError::dependency(
                Dependency::Store,
                format!("{} references missing request `{}`", slot.entity(), slot.request_id.0),
            )
        })?;
        self.permit(context, Operation::ViewRequest, Some(&request), Some(slot.entity()))?;
        Ok((slot, request))
    }

    /// Campaign refund policy for a slot, read before the unit of work opens
    /// so the store transaction never waits on the campaign directory.
    pub(super) async fn policy_for_slot(
        &self,
        slot_id: &SlotId,
    ) -> Result<RefundPolicy, WorkflowError> {
        let slot = self.store.find_slot(slot_id).await?.ok_or_else(|| WorkflowError::NotFound {
            entity: EntityRef::new(EntityKind::GuaranteeSlot, slot_id.0.clone()),
        })?;
        let request = self.store.find_request(&slot.request_id).await?.ok_or_else(|| {
            WorkflowError::dependency(
                Dependency::Store,
                format!("{} references missing request `{}`", slot.entity(), slot.request_id.0),
            )
        })?;
        self.refund_policy(&request.campaign_id).await
    }

    pub(super) fn prorate(
        &self,
        request: &QuoteRequest,
        slot: &GuaranteeSlot,
        refunds: &[RefundRequest],
        policy: &RefundPolicy,
    ) -> Result<ProrationBreakdown, WorkflowError> {
        let terms = settled_terms(request)?;
        let input = ProrationInput {
            final_daily_amount: terms.daily_amount,
            guarantee_count: request.guarantee_count,
            start_date: slot.start_date,
            today: self.clock.today(),
            already_refunded: approved_total(refunds),
        };
        self.calculator
            .breakdown(&input, policy)
            .map_err(|error| amount_out_of_range(request, error))
    }

    /// An explicitly chosen amount must stay within what is still unearned
    /// and within the campaign's refund cap.
    pub(super) fn checked_refund_amount(
        &self,
        slot: &GuaranteeSlot,
        amount: Decimal,
        breakdown: &ProrationBreakdown,
    ) -> Result<Decimal, WorkflowError> {
        if amount.is_sign_negative() {
            return Err(WorkflowError::validation(
                Some(slot.entity()),
                "refund_amount",
                "must not be negative",
            ));
        }
        if amount > breakdown.refundable_ceiling {
            return Err(WorkflowError::validation(
                Some(slot.entity()),
                "refund_amount",
                format!(
                    "{amount} exceeds the refundable {} \
                     (contracted {} minus earned {} minus refunded {})",
                    breakdown.refundable_ceiling,
                    breakdown.contracted_total,
                    breakdown.earned_to_date,
                    breakdown.already_refunded,
                ),
            ));
        }
        if let Some(cap) = breakdown.policy_cap.filter(|cap| amount > *cap) {
            return Err(WorkflowError::validation(
                Some(slot.entity()),
                "refund_amount",
                format!("{amount} exceeds the campaign refund cap of {cap}"),
            ));
        }
        Ok(amount)
    }

    /// A refund that is approved on creation, used by completion and
    /// cancellation settlements.
    fn settled_refund(
        &self,
        context: &RequestContext,
        slot: &GuaranteeSlot,
        origin: RefundOrigin,
        reason: String,
        amount: Decimal,
    ) -> RefundRequest {
        let now = self.clock.now();
        RefundRequest {
            id: RefundRequestId(new_id("RF")),
            slot_id: slot.id.clone(),
            status: RefundStatus::Approved,
            origin,
            refund_reason: reason,
            refund_amount: amount,
            requested_by: context.actor.id.clone(),
            request_date: now,
            approval_date: Some(now),
            approval_notes: None,
            decided_by: Some(context.actor.id.clone()),
            version: 1,
            updated_at: now,
        }
    }
}

pub(super) fn refuse_open_refund(
    slot: &GuaranteeSlot,
    refunds: &[RefundRequest],
) -> Result<(), WorkflowError> {
    match open_refund(refunds) {
        Some(open) => Err(WorkflowError::ConflictingRefundRequest {
            slot: slot.entity(),
            open_refund: Some(open.id.0.clone()),
        }),
        None => Ok(()),
    }
}

/// Final terms of a purchased request. Their absence means stored state is
/// corrupt, so it surfaces as a store failure.
pub(super) fn settled_terms(request: &QuoteRequest) -> Result<FinalTerms, WorkflowError> {
    request.final_terms().ok_or_else(|| {
        WorkflowError::dependency(
            Dependency::Store,
            format!("{} is `{}` without final terms", request.entity(), request.status.as_str()),
        )
    })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use crate::domain::quote_request::QuoteRequestStatus;
    use crate::domain::refund::{RefundOrigin, RefundStatus};
    use crate::domain::slot::SlotStatus;
    use crate::engine::fixtures::{
        admin, buyer, distributor, harness, harness_with_settings, other_buyer, other_distributor,
    };
    use crate::engine::{
        Cancellation, Completion, NewQuoteRequest, OpenNegotiation, Purchase, Rejection,
    };
    use crate::errors::WorkflowError;
    use crate::ledger::{LedgerBalance, LedgerDirection};
    use crate::notify::NotificationKind;
    use crate::store::WorkflowStore;

    fn memo() -> Completion {
        Completion { work_memo: Some("rank held".to_owned()), refund_amount: None }
    }

    #[tokio::test]
    async fn approving_a_pending_slot_activates_it() {
        let harness = harness();
        let receipt = harness.purchased().await;

        let slot = harness
            .engine
            .approve_slot(&distributor(), &receipt.slot.id)
            .await
            .expect("approve");
        assert_eq!(slot.status, SlotStatus::Active);
        assert_eq!(slot.approved_by.as_ref().map(|id| id.0.as_str()), Some("dist-1"));
        assert!(slot.approved_at.is_some());
        assert_eq!(harness.notifications.kinds().last(), Some(&NotificationKind::SlotActivated));
    }

    #[tokio::test]
    async fn activating_a_completed_slot_is_refused_and_leaves_it_unchanged() {
        let harness = harness();
        let receipt = harness.active().await;
        harness.clock.advance_days(10);
        let completed = harness
            .engine
            .complete_slot(&distributor(), &receipt.slot.id, memo())
            .await
            .expect("complete");

        let error = harness
            .engine
            .approve_slot(&distributor(), &receipt.slot.id)
            .await
            .expect_err("completed slots stay completed");
        assert!(matches!(
            error,
            WorkflowError::InvalidTransition { ref current, .. } if current == "completed"
        ));

        let stored = harness
            .store
            .find_slot(&receipt.slot.id)
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(stored, completed.slot);
    }

    #[tokio::test]
    async fn rejected_slot_can_be_re_approved_and_rejection_trail_clears() {
        let harness = harness();
        let receipt = harness.purchased().await;

        let missing = harness
            .engine
            .reject_slot(&distributor(), &receipt.slot.id, Rejection::default())
            .await
            .expect_err("reason required");
        assert!(matches!(
            missing,
            WorkflowError::Validation { ref field, .. } if field == "rejection_reason"
        ));

        let rejected = harness
            .engine
            .reject_slot(
                &distributor(),
                &receipt.slot.id,
                Rejection { reason: Some("keyword not eligible".to_owned()) },
            )
            .await
            .expect("reject");
        assert_eq!(rejected.status, SlotStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("keyword not eligible"));

        let active = harness
            .engine
            .approve_slot(&distributor(), &receipt.slot.id)
            .await
            .expect("re-approve");
        assert_eq!(active.status, SlotStatus::Active);
        assert!(active.rejected_at.is_none());
        assert!(active.rejected_by.is_none());
        assert!(active.rejection_reason.is_none());
    }

    #[tokio::test]
    async fn only_the_assigned_distributor_or_an_admin_approves() {
        let harness = harness();
        let receipt = harness.purchased().await;

        for context in [other_distributor(), buyer()] {
            let error = harness
                .engine
                .approve_slot(&context, &receipt.slot.id)
                .await
                .expect_err("not allowed");
            assert!(matches!(error, WorkflowError::PermissionDenied { .. }));
        }
        harness.engine.approve_slot(&admin(), &receipt.slot.id).await.expect("admin approves");
    }

    #[tokio::test]
    async fn early_completion_refunds_unearned_days_in_the_same_commit() {
        let harness = harness();
        let receipt = harness.active().await;
        harness.clock.advance_days(3);

        let settlement = harness
            .engine
            .complete_slot(&distributor(), &receipt.slot.id, memo())
            .await
            .expect("complete");
        assert_eq!(settlement.slot.status, SlotStatus::Completed);
        assert_eq!(settlement.slot.work_memo.as_deref(), Some("rank held"));

        let refund = settlement.refund.expect("early completion refund");
        assert_eq!(refund.status, RefundStatus::Approved);
        assert_eq!(refund.origin, RefundOrigin::EarlyCompletion);
        assert_eq!(refund.refund_amount, Decimal::from(77_000));

        let ledger = harness.store.ledger_entries(None).await.expect("ledger");
        let releases: Vec<_> =
            ledger.iter().filter(|entry| entry.direction == LedgerDirection::Release).collect();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].reference, refund.entity());
        assert_eq!(LedgerBalance::from_entries(&ledger).outstanding(), Decimal::from(33_000));
    }

    #[tokio::test]
    async fn completion_on_or_after_the_end_date_refunds_nothing() {
        let harness = harness();
        let receipt = harness.active().await;
        harness.clock.advance_days(12);

        let settlement = harness
            .engine
            .complete_slot(&distributor(), &receipt.slot.id, memo())
            .await
            .expect("complete");
        assert!(settlement.refund.is_none());
        assert!(harness.store.list_refunds().await.expect("refunds").is_empty());
    }

    #[tokio::test]
    async fn completion_requires_a_work_memo() {
        let harness = harness();
        let receipt = harness.active().await;

        let error = harness
            .engine
            .complete_slot(&distributor(), &receipt.slot.id, Completion::default())
            .await
            .expect_err("memo required");
        assert!(matches!(
            error,
            WorkflowError::Validation { ref field, .. } if field == "work_memo"
        ));

        let stored = harness
            .store
            .find_slot(&receipt.slot.id)
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(stored.status, SlotStatus::Active);
    }

    #[tokio::test]
    async fn explicit_completion_refund_is_bounded_by_the_unearned_amount() {
        let harness = harness();
        let receipt = harness.active().await;
        harness.clock.advance_days(3);

        let error = harness
            .engine
            .complete_slot(
                &distributor(),
                &receipt.slot.id,
                Completion { refund_amount: Some(Decimal::from(77_001)), ..memo() },
            )
            .await
            .expect_err("over the ceiling");
        assert!(matches!(
            error,
            WorkflowError::Validation { ref field, .. } if field == "refund_amount"
        ));

        let settlement = harness
            .engine
            .complete_slot(
                &distributor(),
                &receipt.slot.id,
                Completion { refund_amount: Some(Decimal::from(50_000)), ..memo() },
            )
            .await
            .expect("override");
        let refunded = settlement.refund.map(|refund| refund.refund_amount);
        assert_eq!(refunded, Some(Decimal::from(50_000)));
    }

    #[tokio::test]
    async fn campaign_policy_caps_early_completion_refunds() {
        let harness = harness_with_settings(json!({ "max_refund_amount": 40000 }));
        let receipt = harness.active().await;
        harness.clock.advance_days(3);

        let settlement = harness
            .engine
            .complete_slot(&distributor(), &receipt.slot.id, memo())
            .await
            .expect("complete");
        let refunded = settlement.refund.map(|refund| refund.refund_amount);
        assert_eq!(refunded, Some(Decimal::from(40_000)));
    }

    #[tokio::test]
    async fn explicit_completion_refunds_stay_within_the_campaign_cap() {
        let harness = harness_with_settings(json!({ "max_refund_amount": 10000 }));
        let receipt = harness.active().await;
        harness.clock.advance_days(3);

        let error = harness
            .engine
            .complete_slot(
                &distributor(),
                &receipt.slot.id,
                Completion { refund_amount: Some(Decimal::from(70_000)), ..memo() },
            )
            .await
            .expect_err("above the campaign cap");
        assert!(matches!(
            error,
            WorkflowError::Validation { ref field, .. } if field == "refund_amount"
        ));
        let stored =
            harness.store.find_slot(&receipt.slot.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, SlotStatus::Active);

        let settlement = harness
            .engine
            .complete_slot(
                &distributor(),
                &receipt.slot.id,
                Completion { refund_amount: Some(Decimal::from(10_000)), ..memo() },
            )
            .await
            .expect("at the cap");
        let refunded = settlement.refund.map(|refund| refund.refund_amount);
        assert_eq!(refunded, Some(Decimal::from(10_000)));
    }

    #[tokio::test]
    async fn count_based_guarantees_complete_without_proration() {
        let harness = harness();
        let request = harness
            .engine
            .create_request(
                &buyer(),
                NewQuoteRequest {
                    campaign_id: "CMP-COUNT".to_owned(),
                    target_rank: 5,
                    guarantee_count: 30,
                    guarantee_period: Some(15),
                    initial_budget: None,
                },
            )
            .await
            .expect("create");
        harness
            .engine
            .open_negotiation(&distributor(), &request.id, OpenNegotiation::default())
            .await
            .expect("negotiate");
        harness
            .engine
            .accept_request(&distributor(), &request.id, crate::engine::fixtures::terms())
            .await
            .expect("accept");
        let receipt = harness
            .engine
            .purchase_request(&buyer(), &request.id, Purchase::default())
            .await
            .expect("purchase");
        harness.engine.approve_slot(&distributor(), &receipt.slot.id).await.expect("approve");

        let settlement = harness
            .engine
            .complete_slot(&distributor(), &receipt.slot.id, memo())
            .await
            .expect("complete");
        assert!(settlement.refund.is_none());
    }

    #[tokio::test]
    async fn failed_ledger_release_rolls_back_the_completion() {
        let harness = harness();
        let receipt = harness.active().await;
        harness.clock.advance_days(3);
        let delivered_before = harness.notifications.delivered().len();
        harness.store.fail_ledger_writes(true);

        let error = harness
            .engine
            .complete_slot(&distributor(), &receipt.slot.id, memo())
            .await
            .expect_err("ledger down");
        assert!(error.is_retryable());

        let stored = harness
            .store
            .find_slot(&receipt.slot.id)
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(stored.status, SlotStatus::Active);
        assert!(harness.store.list_refunds().await.expect("refunds").is_empty());
        assert_eq!(harness.notifications.delivered().len(), delivered_before);
        assert!(!harness.audit.events_of_type("workflow.complete_slot_failed").is_empty());
    }

    #[tokio::test]
    async fn cancelling_a_pending_slot_releases_the_full_hold() {
        let harness = harness();
        let receipt = harness.purchased().await;

        let error = harness
            .engine
            .cancel_slot(&other_buyer(), &receipt.slot.id, Cancellation::default())
            .await
            .expect_err("not a participant");
        assert!(matches!(error, WorkflowError::PermissionDenied { .. }));

        let settlement = harness
            .engine
            .cancel_slot(&buyer(), &receipt.slot.id, Cancellation::default())
            .await
            .expect("cancel");
        assert_eq!(settlement.slot.status, SlotStatus::Cancelled);
        let refund = settlement.refund.expect("cancellation refund");
        assert_eq!(refund.origin, RefundOrigin::Cancellation);
        assert_eq!(refund.refund_amount, Decimal::from(110_000));

        let ledger = harness.store.ledger_entries(None).await.expect("ledger");
        assert_eq!(LedgerBalance::from_entries(&ledger).outstanding(), Decimal::ZERO);

        let request =
            harness.store.find_request(&receipt.request.id).await.expect("find").expect("exists");
        assert_eq!(request.status, QuoteRequestStatus::Purchased);
    }

    #[tokio::test]
    async fn active_slots_cannot_be_cancelled() {
        let harness = harness();
        let receipt = harness.active().await;
        let error = harness
            .engine
            .cancel_slot(&buyer(), &receipt.slot.id, Cancellation::default())
            .await
            .expect_err("already running");
        assert!(matches!(error, WorkflowError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn preview_reports_the_prorated_breakdown() {
        let harness = harness();
        let receipt = harness.active().await;
        harness.clock.advance_days(3);

        let breakdown = harness
            .engine
            .preview_refund(&buyer(), &receipt.slot.id)
            .await
            .expect("preview");
        assert_eq!(breakdown.elapsed_days, 3);
        assert_eq!(breakdown.contracted_total, Decimal::from(110_000));
        assert_eq!(breakdown.earned_to_date, Decimal::from(33_000));
        assert_eq!(breakdown.refund_amount, Decimal::from(77_000));

        let error = harness
            .engine
            .get_slot(&other_buyer(), &receipt.slot.id)
            .await
            .expect_err("foreign");
        assert!(matches!(error, WorkflowError::PermissionDenied { .. }));
    }
}
