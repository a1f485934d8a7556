use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::actor::ActorId;
use crate::domain::campaign::{CampaignId, GuaranteeUnit};
use crate::domain::{EntityKind, EntityRef};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuoteRequestId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteRequestStatus {
    Requested,
    Negotiating,
    Accepted,
    Rejected,
    Expired,
    Purchased,
}

impl QuoteRequestStatus {
    pub const ALL: [QuoteRequestStatus; 6] = [
        QuoteRequestStatus::Requested,
        QuoteRequestStatus::Negotiating,
        QuoteRequestStatus::Accepted,
        QuoteRequestStatus::Rejected,
        QuoteRequestStatus::Expired,
        QuoteRequestStatus::Purchased,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Negotiating => "negotiating",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Purchased => "purchased",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "requested" => Some(Self::Requested),
            "negotiating" => Some(Self::Negotiating),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            "expired" => Some(Self::Expired),
            "purchased" => Some(Self::Purchased),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Expired | Self::Purchased)
    }

    /// Statuses in which the negotiated `final_*` fields must be present.
    pub fn carries_final_terms(&self) -> bool {
        matches!(self, Self::Accepted | Self::Purchased)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetType {
    Daily,
    Total,
}

impl BudgetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Total => "total",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "daily" => Some(Self::Daily),
            "total" => Some(Self::Total),
            _ => None,
        }
    }
}

/// Outcome of a concluded negotiation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalTerms {
    pub daily_amount: Decimal,
    pub budget_type: BudgetType,
    pub total_amount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub id: QuoteRequestId,
    pub campaign_id: CampaignId,
    pub user_id: ActorId,
    pub distributor_id: Option<ActorId>,
    pub target_rank: u32,
    pub guarantee_count: u32,
    pub guarantee_unit: GuaranteeUnit,
    pub guarantee_period: Option<u32>,
    pub initial_budget: Option<Decimal>,
    pub final_daily_amount: Option<Decimal>,
    pub final_budget_type: Option<BudgetType>,
    pub final_total_amount: Option<Decimal>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub status: QuoteRequestStatus,
    pub rejection_reason: Option<String>,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QuoteRequest {
    pub fn entity(&self) -> EntityRef {
        EntityRef::new(EntityKind::QuoteRequest, self.id.0.clone())
    }

    pub fn final_terms(&self) -> Option<FinalTerms> {
        Some(FinalTerms {
            daily_amount: self.final_daily_amount?,
            budget_type: self.final_budget_type?,
            total_amount: self.final_total_amount?,
        })
    }

    pub fn record_final_terms(&mut self, terms: FinalTerms) {
        self.final_daily_amount = Some(terms.daily_amount);
        self.final_budget_type = Some(terms.budget_type);
        self.final_total_amount = Some(terms.total_amount);
    }

    pub fn clear_final_terms(&mut self) {
        self.final_daily_amount = None;
        self.final_budget_type = None;
        self.final_total_amount = None;
    }

    /// Execution window for a purchase starting on `start_date`. Day-based
    /// guarantees cover `guarantee_count` calendar days; count-based ones
    /// cover `guarantee_period` days when one was agreed.
    pub fn schedule_from(&self, start_date: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
        let span = match self.guarantee_unit {
            GuaranteeUnit::Day => self.guarantee_count,
            GuaranteeUnit::Count => self.guarantee_period.unwrap_or(self.guarantee_count),
        };
        let end_date = start_date.checked_add_days(Days::new(u64::from(span.max(1) - 1)))?;
        Some((start_date, end_date))
    }

    /// Bumps the optimistic version and returns the version the store must
    /// still hold for the write to apply.
    pub fn touch(&mut self, now: DateTime<Utc>) -> u32 {
        let expected = self.version;
        self.version = self.version.saturating_add(1);
        self.updated_at = now;
        expected
    }
}
