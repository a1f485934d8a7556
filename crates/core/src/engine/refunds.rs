use rust_decimal::Decimal;

use crate::authority::Operation;
use crate::domain::quote_request::QuoteRequest;
use crate::domain::refund::{
    approved_total, RefundOrigin, RefundRequest, RefundRequestId, RefundStatus,
};
use crate::domain::slot::{GuaranteeSlot, SlotId, SlotStatus};
use crate::errors::{Dependency, WorkflowError};
use crate::flows::{FlowAction, FlowContext, RefundEvent};
use crate::notify::NotificationKind;
use crate::proration::RefundPolicy;

use super::payloads::non_blank;
use super::slots::{refuse_open_refund, settled_terms};
use super::{new_id, parties, Decision, RefundClaim, RequestContext, UnitOfWork, WorkflowEngine};

/// Who opened a refund request, which decides its first status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Claimant {
    Buyer,
    Distributor,
}

impl WorkflowEngine {
    /// Buyer asks for the prorated remainder of an active slot. The amount is
    /// always computed; buyers cannot name one.
    pub async fn request_refund(
        &self,
        context: &RequestContext,
        slot_id: &SlotId,
        payload: RefundClaim,
    ) -> Result<RefundRequest, WorkflowError> {
        let policy = self.policy_for_slot(slot_id).await?;
        let mut unit = self.coordinator.begin().await?;
        let result = self
            .open_refund_in(&mut unit, context, slot_id, payload, &policy, Claimant::Buyer)
            .await;
        self.coordinator.finish(unit, context, Operation::RequestRefund, result).await
    }

    /// Distributor proposes a refund the buyer then confirms or declines.
    pub async fn propose_refund(
        &self,
        context: &RequestContext,
        slot_id: &SlotId,
        payload: RefundClaim,
    ) -> Result<RefundRequest, WorkflowError> {
        let policy = self.policy_for_slot(slot_id).await?;
        let mut unit = self.coordinator.begin().await?;
        let result = self
            .open_refund_in(&mut unit, context, slot_id, payload, &policy, Claimant::Distributor)
            .await;
        self.coordinator.finish(unit, context, Operation::ProposeRefund, result).await
    }

    async fn open_refund_in(
        &self,
        unit: &mut UnitOfWork,
        context: &RequestContext,
        slot_id: &SlotId,
        payload: RefundClaim,
        policy: &RefundPolicy,
        claimant: Claimant,
    ) -> Result<RefundRequest, WorkflowError> {
        let operation = match claimant {
            Claimant::Buyer => Operation::RequestRefund,
            Claimant::Distributor => Operation::ProposeRefund,
        };

        let slot = unit.load_slot(slot_id).await?;
        let request = unit.request_for_slot(&slot).await?;
        self.permit(context, operation, Some(&request), Some(slot.entity()))?;

        if slot.status != SlotStatus::Active {
            return Err(WorkflowError::invalid_transition(
                slot.entity(),
                slot.status.as_str(),
                [SlotStatus::Active.as_str()],
            ));
        }
        let Some(reason) = non_blank(payload.refund_reason.as_deref()) else {
            return Err(WorkflowError::validation(
                Some(slot.entity()),
                "refund_reason",
                "a refund reason is required",
            ));
        };

        let refunds = unit.refunds_for_slot(&slot.id).await?;
        refuse_open_refund(&slot, &refunds)?;

        let breakdown = self.prorate(&request, &slot, &refunds, policy)?;
        let amount = match (claimant, payload.refund_amount) {
            (Claimant::Buyer, Some(_)) => {
                return Err(WorkflowError::validation(
                    Some(slot.entity()),
                    "refund_amount",
                    "buyers cannot choose a refund amount",
                ));
            }
            (Claimant::Distributor, Some(amount)) => {
                self.checked_refund_amount(&slot, amount, &breakdown)?
            }
            (_, None) => breakdown.refund_amount,
        };
        if amount <= Decimal::ZERO {
            return Err(WorkflowError::validation(
                Some(slot.entity()),
                "refund_amount",
                format!(
                    "nothing is refundable after {} of {} days",
                    breakdown.elapsed_days, request.guarantee_count
                ),
            ));
        }

        let now = self.clock.now();
        let (status, origin, kind) = match claimant {
            Claimant::Buyer => {
                (RefundStatus::Pending, RefundOrigin::Buyer, NotificationKind::RefundRequested)
            }
            Claimant::Distributor => (
                RefundStatus::PendingUserConfirmation,
                RefundOrigin::Distributor,
                NotificationKind::RefundProposed,
            ),
        };
        let refund = RefundRequest {
            id: RefundRequestId(new_id("RF")),
            slot_id: slot.id.clone(),
            status,
            origin,
            refund_reason: reason,
            refund_amount: amount,
            requested_by: context.actor.id.clone(),
            request_date: now,
            approval_date: None,
            approval_notes: None,
            decided_by: None,
            version: 1,
            updated_at: now,
        };
        unit.insert_refund(&refund).await?;

        unit.notify(self.notification(
            context,
            kind,
            refund.entity(),
            parties(&request),
            format!("refund of {} opened on slot {}", refund.refund_amount, slot.id.0),
        ))
        .await?;
        Ok(refund)
    }

    /// Approves a buyer-initiated refund and releases its amount. Approving
    /// an approved refund returns it unchanged.
    pub async fn approve_refund(
        &self,
        context: &RequestContext,
        refund_id: &RefundRequestId,
        payload: Decision,
    ) -> Result<RefundRequest, WorkflowError> {
        let operation = Operation::ApproveRefund;
        self.resolve_refund(context, refund_id, operation, RefundEvent::Approve, payload).await
    }

    pub async fn reject_refund(
        &self,
        context: &RequestContext,
        refund_id: &RefundRequestId,
        payload: Decision,
    ) -> Result<RefundRequest, WorkflowError> {
        let operation = Operation::RejectRefund;
        self.resolve_refund(context, refund_id, operation, RefundEvent::Reject, payload).await
    }

    /// Buyer accepts a distributor proposal; settles like an approval.
    pub async fn confirm_refund(
        &self,
        context: &RequestContext,
        refund_id: &RefundRequestId,
        payload: Decision,
    ) -> Result<RefundRequest, WorkflowError> {
        self.resolve_refund(
            context,
            refund_id,
            Operation::ConfirmRefund,
            RefundEvent::BuyerConfirm,
            payload,
        )
        .await
    }

    pub async fn decline_refund(
        &self,
        context: &RequestContext,
        refund_id: &RefundRequestId,
        payload: Decision,
    ) -> Result<RefundRequest, WorkflowError> {
        self.resolve_refund(
            context,
            refund_id,
            Operation::DeclineRefund,
            RefundEvent::BuyerDecline,
            payload,
        )
        .await
    }

    async fn resolve_refund(
        &self,
        context: &RequestContext,
        refund_id: &RefundRequestId,
        operation: Operation,
        event: RefundEvent,
        payload: Decision,
    ) -> Result<RefundRequest, WorkflowError> {
        let mut unit = self.coordinator.begin().await?;
        let result =
            self.resolve_refund_in(&mut unit, context, refund_id, operation, event, payload).await;
        self.coordinator.finish(unit, context, operation, result).await
    }

    async fn resolve_refund_in(
        &self,
        unit: &mut UnitOfWork,
        context: &RequestContext,
        refund_id: &RefundRequestId,
        operation: Operation,
        event: RefundEvent,
        payload: Decision,
    ) -> Result<RefundRequest, WorkflowError> {
        let mut refund = unit.load_refund(refund_id).await?;
        let (slot, request) = self.refund_parents(unit, &refund).await?;
        self.permit(context, operation, Some(&request), Some(refund.entity()))?;

        let notes = non_blank(payload.notes.as_deref());
        let missing = match (event, &notes) {
            (RefundEvent::Reject, None) => vec!["approval_notes"],
            _ => Vec::new(),
        };
        let outcome = self.apply_flow(
            &self.refund_flow,
            context,
            refund.entity(),
            refund.status,
            event,
            &FlowContext::missing(missing),
        )?;
        if outcome.is_noop() {
            return Ok(refund);
        }

        let releases = outcome.requires(FlowAction::ReleaseFunds);
        if releases {
            self.ensure_within_contract(unit, &slot, &request, &refund).await?;
        }

        let now = self.clock.now();
        if outcome.requires(FlowAction::RecordDecision) {
            refund.approval_date = Some(now);
            refund.approval_notes = notes;
            refund.decided_by = Some(context.actor.id.clone());
        }
        refund.status = outcome.to;
        let expected = refund.touch(now);
        unit.update_refund(&refund, expected).await?;

        if releases {
            unit.release(&request.user_id, refund.refund_amount, refund.entity(), now).await?;
        }

        let (kind, verb) = match refund.status {
            RefundStatus::Approved => (NotificationKind::RefundApproved, "approved"),
            _ => (NotificationKind::RefundRejected, "rejected"),
        };
        unit.notify(self.notification(
            context,
            kind,
            refund.entity(),
            parties(&request),
            format!("refund {} of {} {verb}", refund.id.0, refund.refund_amount),
        ))
        .await?;
        Ok(refund)
    }

    async fn refund_parents(
        &self,
        unit: &mut UnitOfWork,
        refund: &RefundRequest,
    ) -> Result<(GuaranteeSlot, QuoteRequest), WorkflowError> {
        let slot = unit.load_slot(&refund.slot_id).await.map_err(|error| match error {
            WorkflowError::NotFound { entity } => WorkflowError::dependency(
                Dependency::Store,
                format!("{} references missing {entity}", refund.entity()),
            ),
            other => other,
        })?;
        let request = unit.request_for_slot(&slot).await?;
        Ok((slot, request))
    }

    /// Approved refunds on a slot may never add up to more than was held.
    async fn ensure_within_contract(
        &self,
        unit: &mut UnitOfWork,
        slot: &GuaranteeSlot,
        request: &QuoteRequest,
        refund: &RefundRequest,
    ) -> Result<(), WorkflowError> {
        let terms = settled_terms(request)?;
        let contracted = self.contracted_total(request, terms.daily_amount)?;
        let refunds = unit.refunds_for_slot(&slot.id).await?;
        let already = approved_total(&refunds);
        if already + refund.refund_amount > contracted {
            return Err(WorkflowError::validation(
                Some(refund.entity()),
                "refund_amount",
                format!(
                    "{} on top of {already} already refunded exceeds the contracted {contracted}",
                    refund.refund_amount
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use crate::domain::campaign::{CampaignId, CampaignMetadata, GuaranteeUnit, RefundSettings};
    use crate::domain::refund::{RefundOrigin, RefundStatus};
    use crate::domain::slot::SlotStatus;
    use crate::engine::fixtures::{
        admin, buyer, distributor, harness, harness_with_settings, other_buyer,
    };
    use crate::engine::{Completion, Decision, RefundClaim};
    use crate::errors::WorkflowError;
    use crate::ledger::LedgerDirection;
    use crate::notify::NotificationKind;
    use crate::store::WorkflowStore;

    fn claim() -> RefundClaim {
        RefundClaim {
            refund_reason: Some("rank dropped after day 3".to_owned()),
            refund_amount: None,
        }
    }

    fn proposal(amount: i64) -> RefundClaim {
        RefundClaim {
            refund_reason: Some("partial delivery".to_owned()),
            refund_amount: Some(Decimal::from(amount)),
        }
    }

    fn notes(text: &str) -> Decision {
        Decision { notes: Some(text.to_owned()) }
    }

    async fn releases(harness: &crate::engine::fixtures::Harness) -> Vec<Decimal> {
        harness
            .store
            .ledger_entries(None)
            .await
            .expect("ledger")
            .into_iter()
            .filter(|entry| entry.direction == LedgerDirection::Release)
            .map(|entry| entry.amount)
            .collect()
    }

    #[tokio::test]
    async fn buyer_refund_is_prorated_and_pending() {
        let harness = harness();
        let receipt = harness.active().await;
        harness.clock.advance_days(3);

        let refund = harness
            .engine
            .request_refund(&buyer(), &receipt.slot.id, claim())
            .await
            .expect("request");
        assert_eq!(refund.status, RefundStatus::Pending);
        assert_eq!(refund.origin, RefundOrigin::Buyer);
        assert_eq!(refund.refund_amount, Decimal::from(77_000));
        assert!(releases(&harness).await.is_empty());
    }

    #[tokio::test]
    async fn second_open_refund_on_a_slot_conflicts() {
        let harness = harness();
        let receipt = harness.active().await;
        harness.clock.advance_days(3);
        let first = harness
            .engine
            .request_refund(&buyer(), &receipt.slot.id, claim())
            .await
            .expect("first");

        let error = harness
            .engine
            .request_refund(&buyer(), &receipt.slot.id, claim())
            .await
            .expect_err("one open refund per slot");
        assert!(matches!(
            error,
            WorkflowError::ConflictingRefundRequest { ref open_refund, .. }
                if open_refund.as_deref() == Some(first.id.0.as_str())
        ));
        assert_eq!(harness.store.list_refunds().await.expect("refunds").len(), 1);

        let error = harness
            .engine
            .complete_slot(
                &distributor(),
                &receipt.slot.id,
                Completion { work_memo: Some("done".to_owned()), refund_amount: None },
            )
            .await
            .expect_err("completion waits for the open refund");
        assert!(matches!(error, WorkflowError::ConflictingRefundRequest { .. }));
    }

    #[tokio::test]
    async fn buyers_cannot_name_an_amount_or_skip_the_reason() {
        let harness = harness();
        let receipt = harness.active().await;

        let error = harness
            .engine
            .request_refund(&buyer(), &receipt.slot.id, proposal(1_000))
            .await
            .expect_err("amount is computed");
        assert!(matches!(
            error,
            WorkflowError::Validation { ref field, .. } if field == "refund_amount"
        ));

        let error = harness
            .engine
            .request_refund(&buyer(), &receipt.slot.id, RefundClaim::default())
            .await
            .expect_err("reason required");
        assert!(matches!(
            error,
            WorkflowError::Validation { ref field, .. } if field == "refund_reason"
        ));
    }

    #[tokio::test]
    async fn refunds_need_an_active_slot() {
        let harness = harness();
        let receipt = harness.purchased().await;
        let error = harness
            .engine
            .request_refund(&buyer(), &receipt.slot.id, claim())
            .await
            .expect_err("slot still pending");
        assert!(matches!(
            error,
            WorkflowError::InvalidTransition { ref current, ref required, .. }
                if current == "pending" && required == &vec!["active".to_string()]
        ));
    }

    #[tokio::test]
    async fn regular_users_cannot_approve_refunds_on_someone_elses_slot() {
        let harness = harness();
        let receipt = harness.active().await;
        let refund = harness
            .engine
            .request_refund(&buyer(), &receipt.slot.id, claim())
            .await
            .expect("request");

        let error = harness
            .engine
            .approve_refund(&other_buyer(), &refund.id, Decision::default())
            .await
            .expect_err("regular user");
        assert!(matches!(error, WorkflowError::PermissionDenied { .. }));

        let stored = harness.store.find_refund(&refund.id).await.expect("find").expect("exists");
        assert_eq!(stored.status, RefundStatus::Pending);
    }

    #[tokio::test]
    async fn approving_twice_releases_exactly_once() {
        let harness = harness();
        let receipt = harness.active().await;
        harness.clock.advance_days(3);
        let refund = harness
            .engine
            .request_refund(&buyer(), &receipt.slot.id, claim())
            .await
            .expect("request");

        let approved = harness
            .engine
            .approve_refund(&distributor(), &refund.id, notes("ok"))
            .await
            .expect("approve");
        let again = harness
            .engine
            .approve_refund(&distributor(), &refund.id, notes("again"))
            .await
            .expect("no-op");

        assert_eq!(approved.status, RefundStatus::Approved);
        assert_eq!(again, approved);
        assert_eq!(again.approval_notes.as_deref(), Some("ok"));
        assert_eq!(releases(&harness).await, vec![Decimal::from(77_000)]);

        let approvals = harness
            .notifications
            .kinds()
            .into_iter()
            .filter(|kind| *kind == NotificationKind::RefundApproved)
            .count();
        assert_eq!(approvals, 1);

        let slot = harness.store.find_slot(&receipt.slot.id).await.expect("find").expect("exists");
        assert_eq!(slot.status, SlotStatus::Active);
        assert!(harness.store.undelivered_notifications(10).await.expect("outbox").is_empty());
    }

    #[tokio::test]
    async fn rejection_needs_notes_and_frees_the_slot_for_a_new_request() {
        let harness = harness();
        let receipt = harness.active().await;
        let refund = harness
            .engine
            .request_refund(&buyer(), &receipt.slot.id, claim())
            .await
            .expect("request");

        let error = harness
            .engine
            .reject_refund(&distributor(), &refund.id, Decision::default())
            .await
            .expect_err("notes required");
        assert!(matches!(
            error,
            WorkflowError::Validation { ref field, .. } if field == "approval_notes"
        ));

        let rejected = harness
            .engine
            .reject_refund(&distributor(), &refund.id, notes("rank verified"))
            .await
            .expect("reject");
        assert_eq!(rejected.status, RefundStatus::Rejected);
        assert_eq!(rejected.approval_notes.as_deref(), Some("rank verified"));
        assert!(releases(&harness).await.is_empty());

        harness
            .engine
            .request_refund(&buyer(), &receipt.slot.id, claim())
            .await
            .expect("new request");
    }

    #[tokio::test]
    async fn distributor_proposals_are_resolved_by_the_buyer_only() {
        let harness = harness();
        let receipt = harness.active().await;
        harness.clock.advance_days(3);

        let error = harness
            .engine
            .propose_refund(&distributor(), &receipt.slot.id, proposal(77_001))
            .await
            .expect_err("above contracted minus earned");
        assert!(matches!(error, WorkflowError::Validation { .. }));

        let proposed = harness
            .engine
            .propose_refund(&distributor(), &receipt.slot.id, proposal(30_000))
            .await
            .expect("propose");
        assert_eq!(proposed.status, RefundStatus::PendingUserConfirmation);
        assert_eq!(proposed.origin, RefundOrigin::Distributor);

        let error = harness
            .engine
            .approve_refund(&distributor(), &proposed.id, Decision::default())
            .await
            .expect_err("distributor cannot self-approve");
        assert!(matches!(error, WorkflowError::InvalidTransition { .. }));

        let error = harness
            .engine
            .confirm_refund(&admin(), &proposed.id, Decision::default())
            .await
            .expect_err("admins do not confirm for the buyer");
        assert!(matches!(error, WorkflowError::PermissionDenied { .. }));

        let confirmed = harness
            .engine
            .confirm_refund(&buyer(), &proposed.id, Decision::default())
            .await
            .expect("confirm");
        assert_eq!(confirmed.status, RefundStatus::Approved);
        harness
            .engine
            .confirm_refund(&buyer(), &proposed.id, Decision::default())
            .await
            .expect("no-op");
        assert_eq!(releases(&harness).await, vec![Decimal::from(30_000)]);
    }

    #[tokio::test]
    async fn declined_proposals_move_no_money() {
        let harness = harness();
        let receipt = harness.active().await;
        let proposed = harness
            .engine
            .propose_refund(&distributor(), &receipt.slot.id, proposal(10_000))
            .await
            .expect("propose");

        let declined = harness
            .engine
            .decline_refund(&buyer(), &proposed.id, notes("keep running"))
            .await
            .expect("decline");
        assert_eq!(declined.status, RefundStatus::Rejected);
        assert!(releases(&harness).await.is_empty());
    }

    #[tokio::test]
    async fn partial_refunds_never_exceed_the_contract() {
        let harness = harness();
        let receipt = harness.active().await;
        harness.clock.advance_days(3);

        let proposed = harness
            .engine
            .propose_refund(&distributor(), &receipt.slot.id, proposal(30_000))
            .await
            .expect("propose");
        harness
            .engine
            .confirm_refund(&buyer(), &proposed.id, Decision::default())
            .await
            .expect("confirm");

        let second = harness
            .engine
            .request_refund(&buyer(), &receipt.slot.id, claim())
            .await
            .expect("request");
        assert_eq!(second.refund_amount, Decimal::from(47_000));
        harness
            .engine
            .approve_refund(&distributor(), &second.id, Decision::default())
            .await
            .expect("approve");

        let total: Decimal = releases(&harness).await.into_iter().sum();
        assert_eq!(total, Decimal::from(77_000));
        assert!(total <= Decimal::from(110_000));

        let error = harness
            .engine
            .request_refund(&buyer(), &receipt.slot.id, claim())
            .await
            .expect_err("nothing left");
        assert!(matches!(error, WorkflowError::Validation { .. }));
    }

    #[tokio::test]
    async fn disabled_refund_policy_refuses_buyer_refunds() {
        let harness = harness_with_settings(json!({ "enabled": false }));
        let receipt = harness.active().await;
        let error = harness
            .engine
            .request_refund(&buyer(), &receipt.slot.id, claim())
            .await
            .expect_err("refunds disabled");
        assert!(matches!(
            error,
            WorkflowError::Validation { ref field, .. } if field == "refund_amount"
        ));
    }

    #[tokio::test]
    async fn proposals_follow_the_campaign_policy_in_force() {
        let harness = harness_with_settings(json!({ "enabled": false }));
        let receipt = harness.active().await;
        harness.clock.advance_days(3);

        let error = harness
            .engine
            .propose_refund(&distributor(), &receipt.slot.id, proposal(50_000))
            .await
            .expect_err("refunds disabled");
        assert!(matches!(
            error,
            WorkflowError::Validation { ref field, .. } if field == "refund_amount"
        ));
        let refunds = harness.store.list_refunds_for_slot(&receipt.slot.id).await.expect("list");
        assert!(refunds.is_empty());

        harness
            .campaigns
            .save(CampaignMetadata {
                id: CampaignId("CMP-DAY".to_owned()),
                guarantee_unit: GuaranteeUnit::Day,
                refund_settings: RefundSettings(json!({ "max_refund_amount": 20000 })),
            })
            .await;

        let error = harness
            .engine
            .propose_refund(&distributor(), &receipt.slot.id, proposal(30_000))
            .await
            .expect_err("above the new cap");
        assert!(matches!(error, WorkflowError::Validation { .. }));

        let proposed = harness
            .engine
            .propose_refund(&distributor(), &receipt.slot.id, proposal(20_000))
            .await
            .expect("within the cap");
        let confirmed = harness
            .engine
            .confirm_refund(&buyer(), &proposed.id, Decision::default())
            .await
            .expect("confirm");
        assert_eq!(confirmed.status, RefundStatus::Approved);
        assert_eq!(releases(&harness).await, vec![Decimal::from(20_000)]);
    }
}
