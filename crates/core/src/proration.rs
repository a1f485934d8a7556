//! Pro-rata refund computation for guarantee slots.
//!
//! Contracted and earned amounts share one rounding function and one
//! surcharge factor, so earned-to-date never exceeds the contracted total
//! while elapsed days stay within the guarantee count.

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::campaign::RefundSettings;

pub const DEFAULT_SURCHARGE_RATE: Decimal = Decimal::from_parts(10, 0, 0, false, 2);
pub const DEFAULT_CURRENCY_SCALE: u32 = 0;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RefundPolicyError {
    #[error("refund setting `{key}` must be {expected}")]
    InvalidType { key: &'static str, expected: &'static str },
    #[error("refund setting `{key}` is out of range: {value}")]
    OutOfRange { key: &'static str, value: Decimal },
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ProrationError {
    #[error("{quantity} does not fit in a decimal amount")]
    Overflow { quantity: &'static str },
}

/// Campaign-level caps read from the opaque refund settings blob.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundPolicy {
    pub enabled: bool,
    pub max_refund_amount: Option<Decimal>,
    pub max_refund_rate: Option<Decimal>,
}

impl Default for RefundPolicy {
    fn default() -> Self {
        Self { enabled: true, max_refund_amount: None, max_refund_rate: None }
    }
}

impl RefundPolicy {
    /// Interprets the keys this engine understands; anything else in the blob
    /// is ignored.
    pub fn from_settings(settings: &RefundSettings) -> Result<Self, RefundPolicyError> {
        let Value::Object(map) = &settings.0 else {
            return Ok(Self::default());
        };

        let enabled = match map.get("enabled") {
            None | Some(Value::Null) => true,
            Some(Value::Bool(enabled)) => *enabled,
            Some(_) => {
                return Err(RefundPolicyError::InvalidType { key: "enabled", expected: "a boolean" })
            }
        };

        let max_refund_amount = decimal_setting(map.get("max_refund_amount"), "max_refund_amount")?;
        if let Some(amount) = max_refund_amount {
            if amount.is_sign_negative() {
                return Err(RefundPolicyError::OutOfRange {
                    key: "max_refund_amount",
                    value: amount,
                });
            }
        }

        let max_refund_rate = decimal_setting(map.get("max_refund_rate"), "max_refund_rate")?;
        if let Some(rate) = max_refund_rate {
            if rate.is_sign_negative() || rate > Decimal::ONE {
                return Err(RefundPolicyError::OutOfRange { key: "max_refund_rate", value: rate });
            }
        }

        Ok(Self { enabled, max_refund_amount, max_refund_rate })
    }

    /// Upper bound the policy places on a refund, if any.
    pub fn cap(
        &self,
        contracted_total: Decimal,
        currency_scale: u32,
    ) -> Result<Option<Decimal>, ProrationError> {
        if !self.enabled {
            return Ok(Some(Decimal::ZERO));
        }

        let by_rate = match self.max_refund_rate {
            Some(rate) => Some(
                contracted_total
                    .checked_mul(rate)
                    .ok_or(ProrationError::Overflow { quantity: "refund rate cap" })?
                    .round_dp_with_strategy(currency_scale, RoundingStrategy::ToZero),
            ),
            None => None,
        };

        Ok(match (self.max_refund_amount, by_rate) {
            (Some(amount), Some(rate)) => Some(amount.min(rate)),
            (Some(amount), None) => Some(amount),
            (None, Some(rate)) => Some(rate),
            (None, None) => None,
        })
    }
}

fn decimal_setting(
    value: Option<&Value>,
    key: &'static str,
) -> Result<Option<Decimal>, RefundPolicyError> {
    let invalid = RefundPolicyError::InvalidType { key, expected: "a decimal number" };
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => {
            let raw = number.to_string();
            raw.parse::<Decimal>()
                .or_else(|_| Decimal::from_scientific(&raw))
                .map(Some)
                .map_err(|_| invalid)
        }
        Some(Value::String(raw)) => raw.trim().parse::<Decimal>().map(Some).map_err(|_| invalid),
        Some(_) => Err(invalid),
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProrationInput {
    pub final_daily_amount: Decimal,
    pub guarantee_count: u32,
    pub start_date: NaiveDate,
    pub today: NaiveDate,
    pub already_refunded: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProrationBreakdown {
    pub elapsed_days: u32,
    pub contracted_total: Decimal,
    pub earned_to_date: Decimal,
    pub already_refunded: Decimal,
    /// `contracted - earned - already_refunded`, floored at zero. Explicit
    /// refund amounts may never exceed this.
    pub refundable_ceiling: Decimal,
    pub policy_cap: Option<Decimal>,
    pub refund_amount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProrationCalculator {
    surcharge_rate: Decimal,
    currency_scale: u32,
}

impl Default for ProrationCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_SURCHARGE_RATE, DEFAULT_CURRENCY_SCALE)
    }
}

impl ProrationCalculator {
    pub fn new(surcharge_rate: Decimal, currency_scale: u32) -> Self {
        Self { surcharge_rate, currency_scale }
    }

    pub fn currency_scale(&self) -> u32 {
        self.currency_scale
    }

    /// Rounds toward positive infinity at the smallest currency unit.
    pub fn round_up(&self, amount: Decimal) -> Decimal {
        amount.round_dp_with_strategy(self.currency_scale, RoundingStrategy::ToPositiveInfinity)
    }

    /// Whole calendar days between `start_date` and `today`, never negative.
    pub fn elapsed_days(start_date: NaiveDate, today: NaiveDate) -> u32 {
        let days = (today - start_date).num_days();
        u32::try_from(days.max(0)).unwrap_or(u32::MAX)
    }

    fn surcharged(
        &self,
        daily_amount: Decimal,
        days: u32,
        quantity: &'static str,
    ) -> Result<Decimal, ProrationError> {
        let factor = Decimal::ONE
            .checked_add(self.surcharge_rate)
            .ok_or(ProrationError::Overflow { quantity: "surcharge factor" })?;
        daily_amount
            .checked_mul(Decimal::from(days))
            .and_then(|gross| gross.checked_mul(factor))
            .map(|amount| self.round_up(amount))
            .ok_or(ProrationError::Overflow { quantity })
    }

    pub fn contracted_total(
        &self,
        daily_amount: Decimal,
        guarantee_count: u32,
    ) -> Result<Decimal, ProrationError> {
        self.surcharged(daily_amount, guarantee_count, "contracted total")
    }

    pub fn earned_to_date(
        &self,
        daily_amount: Decimal,
        elapsed_days: u32,
    ) -> Result<Decimal, ProrationError> {
        self.surcharged(daily_amount, elapsed_days, "earned to date")
    }

    pub fn breakdown(
        &self,
        input: &ProrationInput,
        policy: &RefundPolicy,
    ) -> Result<ProrationBreakdown, ProrationError> {
        let elapsed_days = Self::elapsed_days(input.start_date, input.today);
        let contracted_total =
            self.contracted_total(input.final_daily_amount, input.guarantee_count)?;
        let earned_to_date = self.earned_to_date(input.final_daily_amount, elapsed_days)?;

        let raw = contracted_total
            .checked_sub(earned_to_date)
            .and_then(|remaining| remaining.checked_sub(input.already_refunded))
            .ok_or(ProrationError::Overflow { quantity: "refundable amount" })?;
        let policy_cap = policy.cap(contracted_total, self.currency_scale)?;
        let capped = match policy_cap {
            Some(cap) => raw.min(cap),
            None => raw,
        };

        Ok(ProrationBreakdown {
            elapsed_days,
            contracted_total,
            earned_to_date,
            already_refunded: input.already_refunded,
            refundable_ceiling: raw.max(Decimal::ZERO),
            policy_cap,
            refund_amount: capped.max(Decimal::ZERO),
        })
    }
}
