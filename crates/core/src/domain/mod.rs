pub mod actor;
pub mod campaign;
pub mod quote_request;
pub mod refund;
pub mod slot;

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    QuoteRequest,
    GuaranteeSlot,
    RefundRequest,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QuoteRequest => "quote_request",
            Self::GuaranteeSlot => "guarantee_slot",
            Self::RefundRequest => "refund_request",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "quote_request" => Some(Self::QuoteRequest),
            "guarantee_slot" => Some(Self::GuaranteeSlot),
            "refund_request" => Some(Self::RefundRequest),
            _ => None,
        }
    }
}

/// Kind plus id of any engine-owned entity; used in errors, audit events and
/// ledger references.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} `{}`", self.kind.as_str(), self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::{EntityKind, EntityRef};

    #[test]
    fn entity_kind_round_trips_from_storage_encoding() {
        for kind in [EntityKind::QuoteRequest, EntityKind::GuaranteeSlot, EntityKind::RefundRequest]
        {
            assert_eq!(EntityKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EntityKind::parse("campaign"), None);
    }

    #[test]
    fn entity_ref_display_names_kind_and_id() {
        let entity = EntityRef::new(EntityKind::GuaranteeSlot, "SLOT-1");
        assert_eq!(entity.to_string(), "guarantee_slot `SLOT-1`");
    }
}
