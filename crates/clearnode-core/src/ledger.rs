use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;
use crate::types::{AccountId, Address};

/// Immutable double-entry ledger row. Exactly one of `credit`/`debit` is non-zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: u64,
    /// Wallet whose ledger this row belongs to.
    pub owner: Address,
    pub account_id: AccountId,
    pub asset: String,
    pub credit: Decimal,
    pub debit: Decimal,
    /// Session key a debit is attributed to, for spend-cap accounting.
    pub session_key: Option<Address>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Signed amount: credit minus debit.
    pub fn signed_amount(&self) -> Decimal {
        self.credit - self.debit
    }
}

/// Kind of a ledger transaction audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Transfer,
    Deposit,
    Withdrawal,
    AppDeposit,
    AppWithdrawal,
}

impl TransactionKind {
    /// Stable numeric code used in the audit digest.
    pub fn code(&self) -> u16 {
        match self {
            Self::Transfer => 100,
            Self::Deposit => 201,
            Self::Withdrawal => 202,
            Self::AppDeposit => 301,
            Self::AppWithdrawal => 302,
        }
    }

    /// Inverse of [`TransactionKind::code`].
    pub fn from_code(code: u16) -> Result<Self, CoreError> {
        match code {
            100 => Ok(Self::Transfer),
            201 => Ok(Self::Deposit),
            202 => Ok(Self::Withdrawal),
            301 => Ok(Self::AppDeposit),
            302 => Ok(Self::AppWithdrawal),
            _ => Err(CoreError::ValidationError(format!(
                "unknown transaction kind code: {}",
                code
            ))),
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transfer => write!(f, "transfer"),
            Self::Deposit => write!(f, "deposit"),
            Self::Withdrawal => write!(f, "withdrawal"),
            Self::AppDeposit => write!(f, "app_deposit"),
            Self::AppWithdrawal => write!(f, "app_withdrawal"),
        }
    }
}

/// Immutable audit-log row describing a conceptual movement of funds.
///
/// `from_account`/`to_account` are semantic labels; for custody-boundary
/// crossings only one side has a matching ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: u64,
    pub kind: TransactionKind,
    pub from_account: AccountId,
    pub to_account: AccountId,
    pub asset: String,
    pub amount: Decimal,
    /// Hex keccak-256 digest of the other fields.
    pub hash: String,
    pub created_at: DateTime<Utc>,
}

/// Non-zero balance of one asset in one account bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub amount: Decimal,
}
