//! Recomputes the workflow's money and status invariants from stored state.
//!
//! Totals are rebuilt from refund rows and the ledger on every pass, so a
//! report only covers the snapshot it was given.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::quote_request::{QuoteRequest, QuoteRequestId, QuoteRequestStatus};
use crate::domain::refund::{approved_total, RefundRequest, RefundStatus};
use crate::domain::slot::{GuaranteeSlot, SlotId};
use crate::domain::{EntityKind, EntityRef};
use crate::ledger::{LedgerDirection, LedgerEntry};
use crate::proration::ProrationCalculator;
use crate::store::{RequestQuery, StoreError, WorkflowStore};

type LedgerKey = (EntityRef, LedgerDirection);

#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvariantViolation {
    #[error("slot `{slot}` has {approved} in approved refunds against {contracted} contracted")]
    RefundsExceedContract { slot: String, approved: Decimal, contracted: Decimal },
    #[error("slot `{slot}` has a contracted total out of range: {reason}")]
    ContractOutOfRange { slot: String, reason: String },
    #[error("slot `{slot}` has {} open refund requests", open.len())]
    MultipleOpenRefunds { slot: String, open: Vec<String> },
    #[error("request `{request}` is `{status}` but final terms present = {present}")]
    FinalTermsMismatch { request: String, status: String, present: bool },
    #[error("request `{request}` is `{status}` but execution dates present = {present}")]
    ExecutionDatesMismatch { request: String, status: String, present: bool },
    #[error("request `{request}` is `{status}` with {slots} slots")]
    SlotCountMismatch { request: String, status: String, slots: usize },
    #[error("slot `{slot}` dates differ from request `{request}`")]
    SlotDatesDiverge { slot: String, request: String },
    #[error("slot `{slot}` belongs to unknown request `{request}`")]
    OrphanSlot { slot: String, request: String },
    #[error("{reference}: expected {expected} {direction}, ledger holds {recorded}")]
    LedgerMismatch { reference: String, direction: String, expected: Decimal, recorded: Decimal },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct InvariantReport {
    pub requests_checked: usize,
    pub slots_checked: usize,
    pub refunds_checked: usize,
    pub violations: Vec<InvariantViolation>,
}

impl InvariantReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Stored state one pass runs over.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    pub requests: Vec<QuoteRequest>,
    pub slots: Vec<GuaranteeSlot>,
    pub refunds: Vec<RefundRequest>,
    pub ledger: Vec<LedgerEntry>,
}

impl Snapshot {
    pub async fn capture(store: &dyn WorkflowStore) -> Result<Self, StoreError> {
        Ok(Self {
            requests: store.list_requests(&RequestQuery::default()).await?,
            slots: store.list_slots().await?,
            refunds: store.list_refunds().await?,
            ledger: store.ledger_entries(None).await?,
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct InvariantChecker {
    calculator: ProrationCalculator,
}

impl InvariantChecker {
    pub fn new(calculator: ProrationCalculator) -> Self {
        Self { calculator }
    }

    pub async fn verify_store(
        &self,
        store: &dyn WorkflowStore,
    ) -> Result<InvariantReport, StoreError> {
        let snapshot = Snapshot::capture(store).await?;
        let report = self.check(&snapshot);
        if report.is_clean() {
            info!(
                event_name = "invariants.verified",
                requests = report.requests_checked,
                slots = report.slots_checked,
                refunds = report.refunds_checked,
                "workflow invariants hold"
            );
        }
        for violation in &report.violations {
            warn!(event_name = "invariants.violation", %violation, "invariant violated");
        }
        Ok(report)
    }

    pub fn check(&self, snapshot: &Snapshot) -> InvariantReport {
        let mut violations = Vec::new();

        let requests: HashMap<&QuoteRequestId, &QuoteRequest> =
            snapshot.requests.iter().map(|request| (&request.id, request)).collect();
        let mut refunds_by_slot: HashMap<&SlotId, Vec<&RefundRequest>> = HashMap::new();
        for refund in &snapshot.refunds {
            refunds_by_slot.entry(&refund.slot_id).or_default().push(refund);
        }
        let mut slots_by_request: HashMap<&QuoteRequestId, usize> = HashMap::new();
        for slot in &snapshot.slots {
            *slots_by_request.entry(&slot.request_id).or_default() += 1;
        }

        for request in &snapshot.requests {
            let slots = slots_by_request.get(&request.id).copied().unwrap_or_default();
            check_request(request, slots, &mut violations);
        }

        let mut expected_ledger: HashMap<LedgerKey, Decimal> = HashMap::new();
        for slot in &snapshot.slots {
            let Some(request) = requests.get(&slot.request_id) else {
                violations.push(InvariantViolation::OrphanSlot {
                    slot: slot.id.0.clone(),
                    request: slot.request_id.0.clone(),
                });
                continue;
            };
            let refunds = refunds_by_slot.get(&slot.id).map(Vec::as_slice).unwrap_or_default();
            self.check_slot(slot, request, refunds, &mut expected_ledger, &mut violations);
        }

        check_ledger(&snapshot.ledger, &expected_ledger, &mut violations);

        InvariantReport {
            requests_checked: snapshot.requests.len(),
            slots_checked: snapshot.slots.len(),
            refunds_checked: snapshot.refunds.len(),
            violations,
        }
    }

    fn check_slot(
        &self,
        slot: &GuaranteeSlot,
        request: &QuoteRequest,
        refunds: &[&RefundRequest],
        expected_ledger: &mut HashMap<LedgerKey, Decimal>,
        violations: &mut Vec<InvariantViolation>,
    ) {
        if request.start_date != Some(slot.start_date) || request.end_date != Some(slot.end_date) {
            violations.push(InvariantViolation::SlotDatesDiverge {
                slot: slot.id.0.clone(),
                request: request.id.0.clone(),
            });
        }

        let open: Vec<String> = refunds
            .iter()
            .filter(|refund| refund.status.is_open())
            .map(|refund| refund.id.0.clone())
            .collect();
        if open.len() > 1 {
            violations
                .push(InvariantViolation::MultipleOpenRefunds { slot: slot.id.0.clone(), open });
        }

        let Some(terms) = request.final_terms() else {
            return;
        };
        let contracted =
            match self.calculator.contracted_total(terms.daily_amount, request.guarantee_count) {
                Ok(contracted) => contracted,
                Err(error) => {
                    violations.push(InvariantViolation::ContractOutOfRange {
                        slot: slot.id.0.clone(),
                        reason: error.to_string(),
                    });
                    return;
                }
            };
        let approved = approved_total(refunds.iter().copied());
        if approved > contracted {
            violations.push(InvariantViolation::RefundsExceedContract {
                slot: slot.id.0.clone(),
                approved,
                contracted,
            });
        }

        expected_ledger.insert((slot.entity(), LedgerDirection::Hold), contracted);
        for refund in refunds.iter().filter(|refund| refund.status == RefundStatus::Approved) {
            expected_ledger
                .insert((refund.entity(), LedgerDirection::Release), refund.refund_amount);
        }
    }
}

fn check_request(request: &QuoteRequest, slots: usize, violations: &mut Vec<InvariantViolation>) {
    let status = request.status.as_str().to_string();

    let terms_present = request.final_daily_amount.is_some()
        || request.final_budget_type.is_some()
        || request.final_total_amount.is_some();
    let carries_terms = request.status.carries_final_terms();
    if (carries_terms && request.final_terms().is_none()) || (!carries_terms && terms_present) {
        violations.push(InvariantViolation::FinalTermsMismatch {
            request: request.id.0.clone(),
            status: status.clone(),
            present: terms_present,
        });
    }

    let purchased = request.status == QuoteRequestStatus::Purchased;
    let dates_present = request.start_date.is_some() || request.end_date.is_some();
    let dates_complete = request.start_date.is_some() && request.end_date.is_some();
    if (purchased && !dates_complete) || (!purchased && dates_present) {
        violations.push(InvariantViolation::ExecutionDatesMismatch {
            request: request.id.0.clone(),
            status: status.clone(),
            present: dates_present,
        });
    }

    if slots != usize::from(purchased) {
        violations.push(InvariantViolation::SlotCountMismatch {
            request: request.id.0.clone(),
            status,
            slots,
        });
    }
}

/// Each slot hold and approved-refund release is recorded once for the
/// right amount, and no other movement references a slot or refund.
fn check_ledger(
    ledger: &[LedgerEntry],
    expected: &HashMap<LedgerKey, Decimal>,
    violations: &mut Vec<InvariantViolation>,
) {
    let mut recorded: HashMap<LedgerKey, Decimal> = HashMap::new();
    for entry in ledger {
        *recorded.entry((entry.reference.clone(), entry.direction)).or_default() += entry.amount;
    }

    let mut keys: Vec<&LedgerKey> = expected.keys().collect();
    keys.extend(recorded.keys().filter(|key| !expected.contains_key(*key)));
    keys.sort_by_key(|(reference, direction)| (reference.to_string(), direction.as_str()));

    for key in keys {
        if !matches!(key.0.kind, EntityKind::GuaranteeSlot | EntityKind::RefundRequest) {
            continue;
        }
        let want = expected.get(key).copied().unwrap_or_default();
        let have = recorded.get(key).copied().unwrap_or_default();
        if want != have {
            violations.push(InvariantViolation::LedgerMismatch {
                reference: key.0.to_string(),
                direction: key.1.as_str().to_string(),
                expected: want,
                recorded: have,
            });
        }
    }
}
