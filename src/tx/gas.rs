//! Fee bumping for replacement and cancellation transactions
//!
//! All arithmetic is done on `U256` wei amounts with an exact rational
//! factor. Results truncate toward zero.

use crate::error::{SubmitterError, SubmitterResult};
use crate::types::FeeParams;

use ethers::types::U256;
use std::fmt;

/// Multiplier used to bump fees, e.g. 120/100 for +20%
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdjustmentFactor {
    numerator: u64,
    denominator: u64,
}

impl AdjustmentFactor {
    pub const ONE: AdjustmentFactor = AdjustmentFactor {
        numerator: 1,
        denominator: 1,
    };

    pub fn new(numerator: u64, denominator: u64) -> SubmitterResult<Self> {
        if denominator == 0 {
            return Err(SubmitterError::Config(
                "adjustment factor denominator must be non-zero".to_string(),
            ));
        }
        Ok(Self {
            numerator,
            denominator,
        })
    }

    pub fn from_percent(percent: u64) -> Self {
        Self {
            numerator: percent,
            denominator: 100,
        }
    }

    /// Product of two factors, `self * other`
    pub fn compose(self, other: AdjustmentFactor) -> SubmitterResult<Self> {
        Ok(Self {
            numerator: self
                .numerator
                .checked_mul(other.numerator)
                .ok_or(SubmitterError::FeeOverflow)?,
            denominator: self
                .denominator
                .checked_mul(other.denominator)
                .ok_or(SubmitterError::FeeOverflow)?,
        })
    }

    pub fn apply(&self, amount: U256) -> SubmitterResult<U256> {
        amount
            .checked_mul(U256::from(self.numerator))
            .map(|scaled| scaled / U256::from(self.denominator))
            .ok_or(SubmitterError::FeeOverflow)
    }
}

impl fmt::Display for AdjustmentFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// Multiply every field of `baseline` by `factor`, keeping its shape
pub fn adjust(baseline: &FeeParams, factor: AdjustmentFactor) -> SubmitterResult<FeeParams> {
    match baseline {
        FeeParams::Legacy { gas_price } => Ok(FeeParams::Legacy {
            gas_price: factor.apply(*gas_price)?,
        }),
        FeeParams::Dynamic {
            max_priority_fee_per_gas,
            max_fee_per_gas,
        } => Ok(FeeParams::Dynamic {
            max_priority_fee_per_gas: factor.apply(*max_priority_fee_per_gas)?,
            max_fee_per_gas: factor.apply(*max_fee_per_gas)?,
        }),
    }
}

/// Worst-case cost of a transaction in wei
pub fn total_fee(fee: &FeeParams, gas_limit: U256) -> SubmitterResult<U256> {
    let per_gas = match fee {
        FeeParams::Legacy { gas_price } => *gas_price,
        FeeParams::Dynamic {
            max_fee_per_gas, ..
        } => *max_fee_per_gas,
    };
    gas_limit
        .checked_mul(per_gas)
        .ok_or(SubmitterError::FeeOverflow)
}

/// Fee for a transaction replacing `original`: each field is the larger of
/// the bumped original value and what the network currently asks for.
pub fn adjust_for_replacement(
    original: &FeeParams,
    network: &FeeParams,
    factor: AdjustmentFactor,
) -> SubmitterResult<FeeParams> {
    match (adjust(original, factor)?, network) {
        (FeeParams::Legacy { gas_price }, FeeParams::Legacy { gas_price: current }) => {
            Ok(FeeParams::Legacy {
                gas_price: gas_price.max(*current),
            })
        }
        (
            FeeParams::Dynamic {
                max_priority_fee_per_gas,
                max_fee_per_gas,
            },
            FeeParams::Dynamic {
                max_priority_fee_per_gas: current_priority,
                max_fee_per_gas: current_max,
            },
        ) => Ok(FeeParams::Dynamic {
            max_priority_fee_per_gas: max_priority_fee_per_gas.max(*current_priority),
            max_fee_per_gas: max_fee_per_gas.max(*current_max),
        }),
        (bumped, network) => Err(SubmitterError::UnsupportedFeeShape(format!(
            "cannot replace a {} fee with a {} network fee",
            bumped.shape(),
            network.shape()
        ))),
    }
}
