use chrono::Utc;
use clearnode_core::{AccountId, Address, Balance, Decimal, LedgerEntry};
use clearnode_store::StoreTx;

use crate::error::LedgerError;

/// Double-entry ledger bound to one store transaction.
///
/// Each bucket `(owner, account, asset)` keeps a materialized balance row next
/// to its append-only entries. The row is read with a lock before it is
/// rewritten, so two transactions touching the same bucket are serialized.
/// The ledger holds no state of its own and does not check conservation;
/// callers pair their entries.
pub struct Ledger<'t, 'a> {
    tx: &'t StoreTx<'a>,
}

impl<'t, 'a> Ledger<'t, 'a> {
    /// Create a ledger view over a transaction.
    pub fn new(tx: &'t StoreTx<'a>) -> Self {
        Self { tx }
    }

    /// Append one entry: a credit for a positive amount, a debit for a negative one.
    ///
    /// A zero amount writes nothing and returns `None`.
    pub fn record(
        &self,
        owner: &Address,
        account: &AccountId,
        asset: &str,
        amount: Decimal,
        session_key: Option<Address>,
    ) -> Result<Option<LedgerEntry>, LedgerError> {
        if amount.is_zero() {
            return Ok(None);
        }
        if asset.is_empty() {
            return Err(LedgerError::InvalidParams("asset must not be empty".into()));
        }
        let asset = asset.to_lowercase();

        let current = self.tx.get_balance_for_update(owner, account, &asset)?;
        let (credit, debit) = if amount.is_sign_positive() {
            (amount, Decimal::ZERO)
        } else {
            (Decimal::ZERO, -amount)
        };

        let entry = LedgerEntry {
            id: self.tx.next_entry_id(),
            owner: *owner,
            account_id: account.clone(),
            asset: asset.clone(),
            credit,
            debit,
            session_key,
            created_at: Utc::now(),
        };
        self.tx.insert_entry(&entry)?;
        self.tx.put_balance(owner, account, &asset, current + amount)?;

        tracing::trace!(
            entry_id = entry.id,
            owner = %owner,
            account = %account,
            asset = %asset,
            amount = %amount,
            "ledger entry recorded"
        );

        Ok(Some(entry))
    }

    /// Current balance of a bucket.
    pub fn balance(
        &self,
        owner: &Address,
        account: &AccountId,
        asset: &str,
    ) -> Result<Decimal, LedgerError> {
        Ok(self.tx.get_balance(owner, account, &asset.to_lowercase())?)
    }

    /// Current balance of a bucket, locking it until the transaction ends.
    ///
    /// Use this for every read that decides whether a debit may proceed.
    pub fn balance_for_update(
        &self,
        owner: &Address,
        account: &AccountId,
        asset: &str,
    ) -> Result<Decimal, LedgerError> {
        Ok(self
            .tx
            .get_balance_for_update(owner, account, &asset.to_lowercase())?)
    }

    /// Lock a bucket and fail unless it holds at least `required`.
    pub fn ensure_available(
        &self,
        owner: &Address,
        account: &AccountId,
        asset: &str,
        required: Decimal,
    ) -> Result<Decimal, LedgerError> {
        let available = self.balance_for_update(owner, account, asset)?;
        if available < required {
            return Err(LedgerError::InsufficientBalance {
                asset: asset.to_lowercase(),
                available,
                required,
            });
        }
        Ok(available)
    }

    /// Non-zero balances of one account bucket.
    pub fn balances_for(
        &self,
        owner: &Address,
        account: &AccountId,
    ) -> Result<Vec<Balance>, LedgerError> {
        Ok(self
            .tx
            .balances_in_bucket(owner, account)?
            .into_iter()
            .filter(|(_, amount)| !amount.is_zero())
            .map(|(asset, amount)| Balance { asset, amount })
            .collect())
    }

    /// Entries of a wallet, optionally narrowed by account and asset, oldest first.
    pub fn entries(
        &self,
        owner: &Address,
        account: Option<&AccountId>,
        asset: Option<&str>,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let asset = asset.map(str::to_lowercase);
        Ok(self.tx.entries(owner, account, asset.as_deref())?)
    }

    /// Sum of debits attributed to a session-key signer for an asset.
    pub fn spent_by(&self, signer: &Address, asset: &str) -> Result<Decimal, LedgerError> {
        Ok(self
            .tx
            .entries_by_signer(signer, &asset.to_lowercase())?
            .iter()
            .map(|e| e.debit)
            .sum())
    }

    /// Move an amount between two buckets as a matched debit/credit pair.
    #[allow(clippy::too_many_arguments)]
    pub fn move_funds(
        &self,
        from_owner: &Address,
        from_account: &AccountId,
        to_owner: &Address,
        to_account: &AccountId,
        asset: &str,
        amount: Decimal,
        session_key: Option<Address>,
    ) -> Result<(), LedgerError> {
        self.record(from_owner, from_account, asset, -amount, session_key)?;
        self.record(to_owner, to_account, asset, amount, None)?;
        Ok(())
    }
}
