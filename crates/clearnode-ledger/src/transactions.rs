use chrono::{DateTime, Utc};
use clearnode_core::{AccountId, Decimal, LedgerTransaction, TransactionKind};
use clearnode_crypto::keccak256;
use clearnode_store::StoreTx;

use crate::error::LedgerError;

/// Deterministic audit digest of a transaction's fields, as `0x`-prefixed hex.
pub fn transaction_hash(
    id: u64,
    kind: TransactionKind,
    from: &AccountId,
    to: &AccountId,
    asset: &str,
    amount: Decimal,
    created_at: DateTime<Utc>,
) -> String {
    let mut buf = Vec::with_capacity(128);
    buf.extend_from_slice(&id.to_be_bytes());
    buf.extend_from_slice(&kind.code().to_be_bytes());
    for field in [from.as_str(), to.as_str(), asset, &amount.normalize().to_string()] {
        buf.extend_from_slice(&(field.len() as u32).to_be_bytes());
        buf.extend_from_slice(field.as_bytes());
    }
    buf.extend_from_slice(&created_at.timestamp_millis().to_be_bytes());
    format!("0x{}", hex::encode(keccak256(&buf)))
}

/// Append one audit row describing a movement of funds.
pub fn record_transaction(
    tx: &StoreTx<'_>,
    kind: TransactionKind,
    from: &AccountId,
    to: &AccountId,
    asset: &str,
    amount: Decimal,
) -> Result<LedgerTransaction, LedgerError> {
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(LedgerError::InvalidAmount(format!(
            "{} transaction amount {} is negative",
            kind, amount
        )));
    }
    let id = tx.next_transaction_id();
    let created_at = Utc::now();
    let asset = asset.to_lowercase();
    let hash = transaction_hash(id, kind, from, to, &asset, amount, created_at);
    let row = LedgerTransaction {
        id,
        kind,
        from_account: from.clone(),
        to_account: to.clone(),
        asset,
        amount,
        hash,
        created_at,
    };
    tx.insert_transaction(&row)?;

    tracing::debug!(
        tx_id = row.id,
        kind = %row.kind,
        from = %row.from_account,
        to = %row.to_account,
        asset = %row.asset,
        amount = %row.amount,
        "ledger transaction recorded"
    );
    Ok(row)
}

/// Filter for audit-log queries. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub account: Option<AccountId>,
    pub asset: Option<String>,
    pub kind: Option<TransactionKind>,
}

/// Read side of the audit log.
pub struct TransactionLog;

impl TransactionLog {
    /// Rows matching the filter, oldest first.
    pub fn query(
        tx: &StoreTx<'_>,
        filter: &TransactionFilter,
    ) -> Result<Vec<LedgerTransaction>, LedgerError> {
        let rows = match &filter.account {
            Some(account) => tx.transactions_for_account(account)?,
            None => tx.all_transactions()?,
        };
        let asset = filter.asset.as_ref().map(|a| a.to_lowercase());
        Ok(rows
            .into_iter()
            .filter(|t| asset.as_ref().map_or(true, |a| &t.asset == a))
            .filter(|t| filter.kind.map_or(true, |k| t.kind == k))
            .collect())
    }
}
