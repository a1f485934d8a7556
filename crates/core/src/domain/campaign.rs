use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CampaignId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuaranteeUnit {
    Day,
    Count,
}

impl GuaranteeUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Count => "count",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "day" | "days" | "daily" => Some(Self::Day),
            "count" | "counts" | "use" | "uses" => Some(Self::Count),
            _ => None,
        }
    }

    /// Day-based guarantees run on a fixed calendar window, so finishing
    /// before `end_date` leaves unearned days behind.
    pub fn has_fixed_window(&self) -> bool {
        matches!(self, Self::Day)
    }
}

/// Campaign refund policy settings, carried through untouched. Only
/// [`crate::proration::RefundPolicy`] looks inside.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefundSettings(pub serde_json::Value);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CampaignMetadata {
    pub id: CampaignId,
    pub guarantee_unit: GuaranteeUnit,
    pub refund_settings: RefundSettings,
}
