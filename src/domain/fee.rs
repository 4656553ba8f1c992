use super::account::{Amount, Balance};
use crate::error::{Result, SettlementError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum ChargeType {
    Flat,
    Percentage,
}

/// One band of a fee schedule, covering `lower_bound <= amount < upper_bound`.
///
/// A missing `upper_bound` means the band is open-ended.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct FeeTier {
    pub lower_bound: Decimal,
    #[serde(default)]
    pub upper_bound: Option<Decimal>,
    pub charge_type: ChargeType,
    pub value: Decimal,
}

impl FeeTier {
    pub fn flat(lower_bound: Decimal, upper_bound: Option<Decimal>, value: Decimal) -> Self {
        Self {
            lower_bound,
            upper_bound,
            charge_type: ChargeType::Flat,
            value,
        }
    }

    pub fn percentage(lower_bound: Decimal, upper_bound: Option<Decimal>, value: Decimal) -> Self {
        Self {
            lower_bound,
            upper_bound,
            charge_type: ChargeType::Percentage,
            value,
        }
    }

    fn contains(&self, amount: Decimal) -> bool {
        self.lower_bound <= amount && self.upper_bound.is_none_or(|upper| amount < upper)
    }
}

/// An ordered list of fee tiers. The caller's configuration is used as given.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
#[serde(transparent)]
pub struct FeeSchedule(pub Vec<FeeTier>);

impl FeeSchedule {
    pub fn new(tiers: Vec<FeeTier>) -> Self {
        Self(tiers)
    }

    /// Fee for `amount` from the first tier whose band contains it.
    ///
    /// A schedule with no matching tier, or a tier producing a negative or
    /// unrepresentable fee, is a configuration bug and fails the calling operation.
    pub fn calculate(&self, amount: Amount) -> Result<Balance> {
        let amount = amount.value();
        let tier = self
            .0
            .iter()
            .find(|tier| tier.contains(amount))
            .ok_or_else(|| {
                SettlementError::InvalidFeeConfig(format!("no tier matches amount {}", amount))
            })?;

        let fee = match tier.charge_type {
            ChargeType::Flat => tier.value,
            ChargeType::Percentage => (tier.value / Decimal::ONE_HUNDRED)
                .checked_mul(amount)
                .ok_or_else(|| {
                    SettlementError::InvalidFeeConfig(format!(
                        "{}% of {} overflows",
                        tier.value, amount
                    ))
                })?,
        };

        if fee < Decimal::ZERO {
            return Err(SettlementError::InvalidFeeConfig(format!(
                "negative fee {} for amount {}",
                fee, amount
            )));
        }

        Ok(Balance::new(fee))
    }
}
