use primitive_types::U256;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;
use crate::types::{Address, RawDelta};

/// Highest scale a `Decimal` can carry.
pub const MAX_DECIMALS: u32 = 28;

/// Asset registry row.
///
/// The registry is the only place raw on-chain units are converted into the
/// decimal amounts the ledger stores. Rows are immutable once created and are
/// looked up by `(token, chain_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// Token contract address on its chain.
    pub token: Address,
    /// Chain the token lives on.
    pub chain_id: u64,
    /// Ledger symbol (e.g. "usdc").
    pub symbol: String,
    /// Number of decimals between raw units and the ledger amount.
    pub decimals: u32,
}

impl Asset {
    /// Create a new asset row, validating the decimals against `Decimal`'s range.
    pub fn new(
        token: Address,
        chain_id: u64,
        symbol: impl Into<String>,
        decimals: u32,
    ) -> Result<Self, CoreError> {
        let symbol = symbol.into().to_lowercase();
        if symbol.is_empty() {
            return Err(CoreError::ValidationError("asset symbol must not be empty".into()));
        }
        if decimals > MAX_DECIMALS {
            return Err(CoreError::ValidationError(format!(
                "asset {} has {} decimals, at most {} supported",
                symbol, decimals, MAX_DECIMALS
            )));
        }
        Ok(Self {
            token,
            chain_id,
            symbol,
            decimals,
        })
    }

    /// Convert a raw on-chain amount into its decimal ledger amount.
    pub fn to_decimal(&self, raw: U256) -> Result<Decimal, CoreError> {
        if raw > U256::from(i128::MAX as u128) {
            return Err(CoreError::AmountOutOfRange(format!(
                "raw amount {} of {} exceeds ledger precision",
                raw, self.symbol
            )));
        }
        let value = raw.as_u128() as i128;
        Decimal::try_from_i128_with_scale(value, self.decimals)
            .map(|d| d.normalize())
            .map_err(|e| CoreError::AmountOutOfRange(format!("{} {}: {}", raw, self.symbol, e)))
    }

    /// Convert a signed raw delta into a signed decimal ledger amount.
    pub fn delta_to_decimal(&self, delta: &RawDelta) -> Result<Decimal, CoreError> {
        let magnitude = self.to_decimal(delta.magnitude())?;
        Ok(match delta {
            RawDelta::Increase(_) => magnitude,
            RawDelta::Decrease(_) => -magnitude,
        })
    }

    /// Convert a decimal ledger amount into raw units, truncating sub-unit dust.
    ///
    /// Negative amounts are rejected.
    pub fn to_raw(&self, amount: Decimal) -> Result<U256, CoreError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(CoreError::InvalidAmount(format!(
                "cannot convert negative amount {} {} to raw units",
                amount, self.symbol
            )));
        }
        let factor = Decimal::try_from_i128_with_scale(10i128.pow(self.decimals), 0)
            .map_err(|e| CoreError::AmountOutOfRange(e.to_string()))?;
        let scaled = amount.checked_mul(factor).ok_or_else(|| {
            CoreError::AmountOutOfRange(format!("{} {} overflows raw units", amount, self.symbol))
        })?;
        let raw = scaled.trunc().to_u128().ok_or_else(|| {
            CoreError::AmountOutOfRange(format!("{} {} overflows raw units", amount, self.symbol))
        })?;
        Ok(U256::from(raw))
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.symbol, self.chain_id, self.token)
    }
}
