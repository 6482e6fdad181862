use clearnode_core::{AccountId, Address, Balance, LedgerTransaction, TransactionKind};
use clearnode_store::StoreTx;
use std::collections::HashSet;

use crate::error::LedgerError;
use crate::guards::ensure_no_challenged_channels;
use crate::ledger::Ledger;
use crate::session_keys::SessionKeyRegistry;
use crate::transactions::record_transaction;

/// Off-chain transfer between two wallets' main buckets.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub from: Address,
    pub to: Address,
    /// Address that signed the request: the wallet itself or one of its delegates.
    pub signer: Address,
    pub allocations: Vec<Balance>,
}

/// Move main-bucket balance from one wallet to another, one audit row per asset.
pub fn transfer(
    tx: &StoreTx<'_>,
    registry: &SessionKeyRegistry,
    request: &TransferRequest,
) -> Result<Vec<LedgerTransaction>, LedgerError> {
    if request.from == request.to {
        return Err(LedgerError::InvalidParams("cannot transfer to self".into()));
    }
    if request.to.is_zero() {
        return Err(LedgerError::InvalidParams("destination is the zero address".into()));
    }
    if request.allocations.is_empty() {
        return Err(LedgerError::InvalidParams("no allocations to transfer".into()));
    }
    let mut seen = HashSet::new();
    for allocation in &request.allocations {
        if !allocation.amount.is_sign_positive() || allocation.amount.is_zero() {
            return Err(LedgerError::InvalidAmount(format!(
                "transfer amount {} {} must be positive",
                allocation.amount, allocation.asset
            )));
        }
        if !seen.insert(allocation.asset.to_lowercase()) {
            return Err(LedgerError::InvalidParams(format!(
                "asset {} listed twice",
                allocation.asset
            )));
        }
    }

    ensure_no_challenged_channels(tx, &request.from)?;

    let ledger = Ledger::new(tx);
    let from_account = AccountId::from(&request.from);
    let to_account = AccountId::from(&request.to);
    let mut rows = Vec::with_capacity(request.allocations.len());

    for allocation in &request.allocations {
        let asset = allocation.asset.to_lowercase();
        ledger.ensure_available(&request.from, &from_account, &asset, allocation.amount)?;
        let attributed =
            registry.validate_spending(tx, &request.signer, &asset, allocation.amount)?;

        ledger.move_funds(
            &request.from,
            &from_account,
            &request.to,
            &to_account,
            &asset,
            allocation.amount,
            attributed,
        )?;
        rows.push(record_transaction(
            tx,
            TransactionKind::Transfer,
            &from_account,
            &to_account,
            &asset,
            allocation.amount,
        )?);

        if let Some(signer) = attributed {
            registry.record_spend(tx, &signer, &asset)?;
        }
    }

    tracing::info!(
        from = %request.from,
        to = %request.to,
        assets = rows.len(),
        "transfer applied"
    );
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use clearnode_core::{Allowance, Decimal};
    use clearnode_store::testing::TempStore;

    use crate::session_keys::NewSessionKey;

    const A: Address = Address([1u8; 20]);
    const B: Address = Address([2u8; 20]);

    fn fund(tx: &StoreTx<'_>, wallet: Address, asset: &str, amount: i64) {
        Ledger::new(tx)
            .record(&wallet, &AccountId::from(&wallet), asset, Decimal::from(amount), None)
            .unwrap();
    }

    fn request(amount: i64) -> TransferRequest {
        TransferRequest {
            from: A,
            to: B,
            signer: A,
            allocations: vec![Balance {
                asset: "usdc".into(),
                amount: Decimal::from(amount),
            }],
        }
    }

    #[test]
    fn test_transfer_moves_funds() {
        let store = TempStore::new();
        let registry = SessionKeyRegistry::new();
        let tx = store.begin();
        fund(&tx, A, "usdc", 100);

        let rows = transfer(&tx, &registry, &request(40)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, TransactionKind::Transfer);

        let ledger = Ledger::new(&tx);
        assert_eq!(ledger.balance(&A, &AccountId::from(&A), "usdc").unwrap(), Decimal::from(60));
        assert_eq!(ledger.balance(&B, &AccountId::from(&B), "usdc").unwrap(), Decimal::from(40));
    }

    #[test]
    fn test_transfer_rejects_overdraft_and_self() {
        let store = TempStore::new();
        let registry = SessionKeyRegistry::new();
        let tx = store.begin();
        fund(&tx, A, "usdc", 10);
        assert!(matches!(
            transfer(&tx, &registry, &request(11)),
            Err(LedgerError::InsufficientBalance { .. })
        ));

        let mut to_self = request(1);
        to_self.to = A;
        assert!(transfer(&tx, &registry, &to_self).is_err());
        assert!(transfer(&tx, &registry, &request(0)).is_err());
    }

    #[test]
    fn test_transfer_by_session_key_is_capped() {
        let store = TempStore::new();
        let registry = SessionKeyRegistry::new();
        let tx = store.begin();
        fund(&tx, A, "usdc", 100);
        let delegate = Address([9u8; 20]);
        registry
            .add_session_key(
                &tx,
                NewSessionKey {
                    wallet: A,
                    signer: delegate,
                    app_name: "wallet".into(),
                    app_address: None,
                    scope: "transfer".into(),
                    allowances: vec![Allowance {
                        asset: "usdc".into(),
                        amount: Decimal::from(30),
                    }],
                    expires_at: Utc::now() + Duration::hours(1),
                },
            )
            .unwrap();

        let mut req = request(20);
        req.signer = delegate;
        transfer(&tx, &registry, &req).unwrap();
        assert!(matches!(
            transfer(&tx, &registry, &req),
            Err(LedgerError::AllowanceExceeded { .. })
        ));
        assert_eq!(Ledger::new(&tx).spent_by(&delegate, "usdc").unwrap(), Decimal::from(20));
    }
}
