use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::actor::ActorId;
use crate::domain::EntityRef;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerDirection {
    /// Money taken from the buyer's cash balance at purchase.
    Hold,
    /// Money returned to the buyer's cash balance by an approved refund.
    Release,
}

impl LedgerDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hold => "hold",
            Self::Release => "release",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hold" => Some(Self::Hold),
            "release" => Some(Self::Release),
            _ => None,
        }
    }
}

/// One balance movement. A `(reference, direction)` pair is written at most
/// once, which is what makes refund release exactly-once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: String,
    pub user_id: ActorId,
    pub direction: LedgerDirection,
    pub amount: Decimal,
    pub reference: EntityRef,
    pub recorded_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn hold(
        user_id: ActorId,
        amount: Decimal,
        reference: EntityRef,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self::new(user_id, LedgerDirection::Hold, amount, reference, recorded_at)
    }

    pub fn release(
        user_id: ActorId,
        amount: Decimal,
        reference: EntityRef,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self::new(user_id, LedgerDirection::Release, amount, reference, recorded_at)
    }

    fn new(
        user_id: ActorId,
        direction: LedgerDirection,
        amount: Decimal,
        reference: EntityRef,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entry_id: format!("LDG-{}", Uuid::new_v4().simple()),
            user_id,
            direction,
            amount,
            reference,
            recorded_at,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerBalance {
    pub held: Decimal,
    pub released: Decimal,
}

impl LedgerBalance {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> Self {
        entries.into_iter().fold(Self::default(), |mut balance, entry| {
            match entry.direction {
                LedgerDirection::Hold => balance.held += entry.amount,
                LedgerDirection::Release => balance.released += entry.amount,
            }
            balance
        })
    }

    /// Amount still held for the buyer after releases.
    pub fn outstanding(&self) -> Decimal {
        self.held - self.released
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{LedgerBalance, LedgerDirection, LedgerEntry};
    use crate::domain::actor::ActorId;
    use crate::domain::{EntityKind, EntityRef};

    #[test]
    fn direction_round_trips_from_storage_encoding() {
        for direction in [LedgerDirection::Hold, LedgerDirection::Release] {
            assert_eq!(LedgerDirection::parse(direction.as_str()), Some(direction));
        }
    }

    #[test]
    fn balance_nets_releases_against_holds() {
        let buyer = ActorId("buyer-1".to_string());
        let entries = vec![
            LedgerEntry::hold(
                buyer.clone(),
                Decimal::from(110_000),
                EntityRef::new(EntityKind::GuaranteeSlot, "SLOT-1"),
                Utc::now(),
            ),
            LedgerEntry::release(
                buyer,
                Decimal::from(77_000),
                EntityRef::new(EntityKind::RefundRequest, "RF-1"),
                Utc::now(),
            ),
        ];

        let balance = LedgerBalance::from_entries(&entries);
        assert_eq!(balance.held, Decimal::from(110_000));
        assert_eq!(balance.released, Decimal::from(77_000));
        assert_eq!(balance.outstanding(), Decimal::from(33_000));
    }
}
