//! The quote-to-fulfillment workflow engine.
//!
//! Every mutating operation follows the same shape: open a unit of work,
//! load the entities it touches, check [`RoleAuthority`], run the flow table,
//! compute money with [`ProrationCalculator`], write through the unit, then
//! hand the result to [`ConsistencyCoordinator::finish`] which commits or
//! rolls back and dispatches notifications only after commit.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::audit::{AuditContext, AuditSink, TracingAuditSink};
use crate::authority::{Operation, RequestScope, RoleAuthority};
use crate::clock::{Clock, SystemClock};
use crate::domain::actor::{Actor, ActorId};
use crate::domain::campaign::CampaignId;
use crate::domain::quote_request::QuoteRequest;
use crate::domain::EntityRef;
use crate::errors::{Dependency, WorkflowError};
use crate::flows::{
    FlowContext, FlowDefinition, FlowEngine, QuoteRequestFlow, RefundFlow, SlotFlow,
    TransitionOutcome,
};
use crate::notify::{
    Notification, NotificationDispatcher, NotificationKind, TracingNotificationDispatcher,
};
use crate::proration::{ProrationCalculator, ProrationError, RefundPolicy};
use crate::store::{CampaignDirectory, WorkflowStore};

pub mod coordinator;
pub mod payloads;
mod quote_requests;
mod refunds;
mod slots;

pub use coordinator::{ConsistencyCoordinator, UnitOfWork};
pub use payloads::{
    AcceptTerms, Cancellation, Completion, Decision, ExpirySweepReport, NewQuoteRequest,
    OpenNegotiation, Purchase, PurchaseReceipt, RefundClaim, Rejection, SettlementReceipt,
};

/// Who is calling, plus the id that ties logs, audit events and
/// notifications for one call together.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestContext {
    pub actor: Actor,
    pub correlation_id: String,
}

impl RequestContext {
    pub fn new(actor: Actor) -> Self {
        Self { actor, correlation_id: format!("req-{}", Uuid::new_v4().simple()) }
    }

    pub fn with_correlation_id(actor: Actor, correlation_id: impl Into<String>) -> Self {
        Self { actor, correlation_id: correlation_id.into() }
    }

    fn audit(&self, entity: EntityRef) -> AuditContext {
        AuditContext::new(Some(entity), self.correlation_id.clone(), self.actor.id.0.clone())
    }
}

pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    campaigns: Arc<dyn CampaignDirectory>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    audit: Arc<dyn AuditSink>,
    clock: Arc<dyn Clock>,
    coordinator: ConsistencyCoordinator,
    authority: RoleAuthority,
    calculator: ProrationCalculator,
    request_flow: FlowEngine<QuoteRequestFlow>,
    slot_flow: FlowEngine<SlotFlow>,
    refund_flow: FlowEngine<RefundFlow>,
}

impl WorkflowEngine {
    pub fn new(store: Arc<dyn WorkflowStore>, campaigns: Arc<dyn CampaignDirectory>) -> Self {
        let dispatcher: Arc<dyn NotificationDispatcher> = Arc::new(TracingNotificationDispatcher);
        let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self::assemble(store, campaigns, dispatcher, audit, clock, ProrationCalculator::default())
    }

    fn assemble(
        store: Arc<dyn WorkflowStore>,
        campaigns: Arc<dyn CampaignDirectory>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        calculator: ProrationCalculator,
    ) -> Self {
        let coordinator = ConsistencyCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&dispatcher),
            Arc::clone(&audit),
            Arc::clone(&clock),
        );
        Self {
            store,
            campaigns,
            dispatcher,
            audit,
            clock,
            coordinator,
            authority: RoleAuthority,
            calculator,
            request_flow: FlowEngine::new(QuoteRequestFlow),
            slot_flow: FlowEngine::new(SlotFlow),
            refund_flow: FlowEngine::new(RefundFlow),
        }
    }

    fn rebuild(self) -> Self {
        Self::assemble(
            self.store,
            self.campaigns,
            self.dispatcher,
            self.audit,
            self.clock,
            self.calculator,
        )
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self.rebuild()
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self.rebuild()
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self.rebuild()
    }

    pub fn with_calculator(mut self, calculator: ProrationCalculator) -> Self {
        self.calculator = calculator;
        self
    }

    pub fn authority(&self) -> &RoleAuthority {
        &self.authority
    }

    pub fn calculator(&self) -> &ProrationCalculator {
        &self.calculator
    }

    pub fn coordinator(&self) -> &ConsistencyCoordinator {
        &self.coordinator
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// RoleAuthority gate shared by every operation.
    fn permit(
        &self,
        context: &RequestContext,
        operation: Operation,
        request: Option<&QuoteRequest>,
        entity: Option<EntityRef>,
    ) -> Result<(), WorkflowError> {
        let scope = request.map(RequestScope::of);
        self.authority.check(&context.actor, operation, scope.as_ref()).map_err(|failure| {
            WorkflowError::PermissionDenied {
                actor: context.actor.id.clone(),
                operation,
                entity,
                reason: failure.reason(),
            }
        })
    }

    fn apply_flow<F: FlowDefinition>(
        &self,
        flow: &FlowEngine<F>,
        context: &RequestContext,
        entity: EntityRef,
        current: F::State,
        event: F::Event,
        flow_context: &FlowContext,
    ) -> Result<TransitionOutcome<F::State, F::Event>, WorkflowError> {
        let audit_context = context.audit(entity.clone());
        flow.apply_with_audit(current, event, flow_context, self.audit.as_ref(), &audit_context)
            .map_err(|error| error.for_entity(entity))
    }

    /// Refund policy for the campaign behind `request`. Read outside the
    /// unit of work; campaign metadata is not engine-owned state.
    async fn refund_policy(&self, campaign_id: &CampaignId) -> Result<RefundPolicy, WorkflowError> {
        let campaign = self
            .campaigns
            .campaign(campaign_id)
            .await
            .map_err(|error| {
                WorkflowError::dependency(Dependency::CampaignDirectory, error.to_string())
            })?
            .ok_or_else(|| {
                WorkflowError::dependency(
                    Dependency::CampaignDirectory,
                    format!("campaign `{}` is not known", campaign_id.0),
                )
            })?;
        RefundPolicy::from_settings(&campaign.refund_settings).map_err(|error| {
            WorkflowError::dependency(
                Dependency::CampaignDirectory,
                format!("campaign `{}` refund settings: {error}", campaign_id.0),
            )
        })
    }

    /// Amount held at purchase for `request` at `daily_amount` per unit.
    fn contracted_total(
        &self,
        request: &QuoteRequest,
        daily_amount: Decimal,
    ) -> Result<Decimal, WorkflowError> {
        self.calculator
            .contracted_total(daily_amount, request.guarantee_count)
            .map_err(|error| amount_out_of_range(request, error))
    }

    fn notification(
        &self,
        context: &RequestContext,
        kind: NotificationKind,
        entity: EntityRef,
        recipients: impl IntoIterator<Item = ActorId>,
        summary: impl Into<String>,
    ) -> Notification {
        Notification::new(
            kind,
            entity,
            recipients,
            summary,
            context.correlation_id.clone(),
            self.clock.now(),
        )
    }
}

/// Parties a request-level notification goes to.
fn parties(request: &QuoteRequest) -> Vec<ActorId> {
    let mut recipients = vec![request.user_id.clone()];
    if let Some(distributor) = &request.distributor_id {
        recipients.push(distributor.clone());
    }
    recipients
}

/// Agreed terms whose totals cannot be represented are a client error.
fn amount_out_of_range(request: &QuoteRequest, error: ProrationError) -> WorkflowError {
    WorkflowError::validation(Some(request.entity()), "final_daily_amount", error.to_string())
}

fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::{
        AcceptTerms, NewQuoteRequest, OpenNegotiation, Purchase, RequestContext, WorkflowEngine,
    };
    use crate::audit::InMemoryAuditSink;
    use crate::clock::FixedClock;
    use crate::domain::actor::{Actor, Role};
    use crate::domain::campaign::{CampaignId, CampaignMetadata, GuaranteeUnit, RefundSettings};
    use crate::domain::quote_request::{BudgetType, QuoteRequest};
    use crate::engine::PurchaseReceipt;
    use crate::notify::InMemoryNotificationDispatcher;
    use crate::store::{InMemoryCampaignDirectory, InMemoryWorkflowStore};

    pub struct Harness {
        pub engine: WorkflowEngine,
        pub store: InMemoryWorkflowStore,
        pub campaigns: Arc<InMemoryCampaignDirectory>,
        pub clock: Arc<FixedClock>,
        pub audit: InMemoryAuditSink,
        pub notifications: InMemoryNotificationDispatcher,
    }

    pub fn buyer() -> RequestContext {
        RequestContext::with_correlation_id(Actor::new("buyer-1", Role::Advertiser), "req-buyer")
    }

    pub fn other_buyer() -> RequestContext {
        RequestContext::with_correlation_id(Actor::new("buyer-2", Role::Advertiser), "req-other")
    }

    pub fn distributor() -> RequestContext {
        RequestContext::with_correlation_id(Actor::new("dist-1", Role::Distributor), "req-dist")
    }

    pub fn other_distributor() -> RequestContext {
        RequestContext::with_correlation_id(Actor::new("dist-2", Role::Distributor), "req-dist-2")
    }

    pub fn admin() -> RequestContext {
        RequestContext::with_correlation_id(Actor::new("ops-1", Role::Operator), "req-admin")
    }

    pub fn harness() -> Harness {
        harness_with_settings(json!({}))
    }

    pub fn harness_with_settings(settings: serde_json::Value) -> Harness {
        let store = InMemoryWorkflowStore::default();
        let campaigns = Arc::new(InMemoryCampaignDirectory::new([
            CampaignMetadata {
                id: CampaignId("CMP-DAY".to_owned()),
                guarantee_unit: GuaranteeUnit::Day,
                refund_settings: RefundSettings(settings.clone()),
            },
            CampaignMetadata {
                id: CampaignId("CMP-COUNT".to_owned()),
                guarantee_unit: GuaranteeUnit::Count,
                refund_settings: RefundSettings(settings),
            },
        ]));
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).single().expect("fixed time"),
        ));
        let audit = InMemoryAuditSink::default();
        let notifications = InMemoryNotificationDispatcher::default();

        let engine = WorkflowEngine::new(Arc::new(store.clone()), campaigns.clone())
            .with_clock(clock.clone())
            .with_audit_sink(Arc::new(audit.clone()))
            .with_dispatcher(Arc::new(notifications.clone()));

        Harness { engine, store, campaigns, clock, audit, notifications }
    }

    pub fn day_request() -> NewQuoteRequest {
        NewQuoteRequest {
            campaign_id: "CMP-DAY".to_owned(),
            target_rank: 3,
            guarantee_count: 10,
            guarantee_period: None,
            initial_budget: Some(Decimal::from(120_000)),
        }
    }

    pub fn terms() -> AcceptTerms {
        AcceptTerms {
            final_daily_amount: Some(Decimal::from(10_000)),
            final_budget_type: Some(BudgetType::Daily),
            final_total_amount: Some(Decimal::from(100_000)),
        }
    }

    impl Harness {
        /// Request negotiated by `dist-1` and accepted with 10,000/day.
        pub async fn accepted_request(&self) -> QuoteRequest {
            let request =
                self.engine.create_request(&buyer(), day_request()).await.expect("create");
            self.engine
                .open_negotiation(&distributor(), &request.id, OpenNegotiation::default())
                .await
                .expect("negotiate");
            self.engine.accept_request(&distributor(), &request.id, terms()).await.expect("accept")
        }

        /// Purchased today, slot still pending.
        pub async fn purchased(&self) -> PurchaseReceipt {
            let request = self.accepted_request().await;
            self.engine
                .purchase_request(&buyer(), &request.id, Purchase::default())
                .await
                .expect("purchase")
        }

        /// Purchased and approved; the slot is active from today.
        pub async fn active(&self) -> PurchaseReceipt {
            let receipt = self.purchased().await;
            self.engine.approve_slot(&distributor(), &receipt.slot.id).await.expect("approve slot");
            receipt
        }
    }
}
