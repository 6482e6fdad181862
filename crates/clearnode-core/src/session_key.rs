use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::Address;

/// Per-asset spending cap of a session key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allowance {
    pub asset: String,
    pub amount: Decimal,
}

/// Delegated signing credential acting for a wallet up to per-asset caps.
///
/// One active key exists per `(wallet, app_name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKey {
    pub signer: Address,
    pub wallet: Address,
    pub app_name: String,
    pub app_address: Option<Address>,
    pub allowances: Vec<Allowance>,
    /// Cached spend per asset, refreshed after each successful spend.
    #[serde(default)]
    pub used_allowances: Vec<Allowance>,
    pub scope: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl SessionKey {
    /// Whether the key is expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Configured cap for an asset, if any.
    pub fn allowance_for(&self, asset: &str) -> Option<Decimal> {
        self.allowances
            .iter()
            .find(|a| a.asset.eq_ignore_ascii_case(asset))
            .map(|a| a.amount)
    }

    /// Record the spent figure for an asset in the cache column.
    pub fn set_used(&mut self, asset: &str, amount: Decimal) {
        match self
            .used_allowances
            .iter_mut()
            .find(|a| a.asset.eq_ignore_ascii_case(asset))
        {
            Some(used) => used.amount = amount,
            None => self.used_allowances.push(Allowance {
                asset: asset.to_lowercase(),
                amount,
            }),
        }
    }
}
