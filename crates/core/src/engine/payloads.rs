//! Operation inputs and receipts.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::quote_request::{BudgetType, QuoteRequest, QuoteRequestId};
use crate::domain::refund::RefundRequest;
use crate::domain::slot::GuaranteeSlot;
use crate::ledger::LedgerEntry;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewQuoteRequest {
    pub campaign_id: String,
    pub target_rank: u32,
    pub guarantee_count: u32,
    #[serde(default)]
    pub guarantee_period: Option<u32>,
    #[serde(default)]
    pub initial_budget: Option<Decimal>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenNegotiation {
    /// Admins may hand the request to a specific distributor.
    #[serde(default)]
    pub distributor_id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptTerms {
    #[serde(default)]
    pub final_daily_amount: Option<Decimal>,
    #[serde(default)]
    pub final_budget_type: Option<BudgetType>,
    #[serde(default)]
    pub final_total_amount: Option<Decimal>,
}

impl AcceptTerms {
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.final_daily_amount.is_none() {
            missing.push("final_daily_amount");
        }
        if self.final_total_amount.is_none() {
            missing.push("final_total_amount");
        }
        missing
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    /// Defaults to today; past dates are refused.
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    #[serde(default)]
    pub work_memo: Option<String>,
    /// Overrides the prorated early-completion refund.
    #[serde(default)]
    pub refund_amount: Option<Decimal>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cancellation {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundClaim {
    #[serde(default)]
    pub refund_reason: Option<String>,
    /// Distributor proposals only.
    #[serde(default)]
    pub refund_amount: Option<Decimal>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PurchaseReceipt {
    pub request: QuoteRequest,
    pub slot: GuaranteeSlot,
    pub hold: LedgerEntry,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub slot: GuaranteeSlot,
    pub refund: Option<RefundRequest>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirySweepReport {
    pub expired: Vec<QuoteRequestId>,
    pub failed: Vec<(QuoteRequestId, String)>,
}

/// Trimmed text, or `None` when blank.
pub(crate) fn non_blank(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|value| !value.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::{non_blank, AcceptTerms, NewQuoteRequest};

    #[test]
    fn accept_terms_report_missing_amounts() {
        let terms = AcceptTerms {
            final_daily_amount: Some(Decimal::from(10_000)),
            ..AcceptTerms::default()
        };
        assert_eq!(terms.missing_fields(), vec!["final_total_amount"]);
    }

    #[test]
    fn new_request_deserializes_with_optional_fields_absent() {
        let payload: NewQuoteRequest = serde_json::from_value(json!({
            "campaign_id": "CMP-1",
            "target_rank": 3,
            "guarantee_count": 10
        }))
        .expect("payload");
        assert_eq!(payload.guarantee_period, None);
        assert_eq!(payload.initial_budget, None);
    }

    #[test]
    fn blank_text_is_treated_as_absent() {
        assert_eq!(non_blank(Some("   ")), None);
        assert_eq!(non_blank(Some(" memo ")), Some("memo".to_string()));
        assert_eq!(non_blank(None), None);
    }
}
