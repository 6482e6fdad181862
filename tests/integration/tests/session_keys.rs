//! Integration test: one session-key spend cap shared by transfers and app sessions.

use chrono::{Duration, Utc};
use clearnode_app::{AppError, CreateAppSession};
use clearnode_core::{Address, Allowance, AppAllocation, AppDefinition, Balance};
use clearnode_integration_tests::{dec, Clearinghouse};
use clearnode_ledger::{transfer, LedgerError, NewSessionKey, TransferRequest};

const WALLET: Address = Address([0x01; 20]);
const PEER: Address = Address([0x02; 20]);
const KEY: Address = Address([0x5e; 20]);

fn add_key(node: &Clearinghouse, app_name: &str, cap: i64) {
    let tx = node.store.begin();
    let (key, replaced) = node
        .session_keys
        .add_session_key(
            &tx,
            NewSessionKey {
                wallet: WALLET,
                signer: KEY,
                app_name: app_name.into(),
                app_address: None,
                scope: "app".into(),
                allowances: vec![Allowance {
                    asset: "usdc".into(),
                    amount: dec(cap),
                }],
                expires_at: Utc::now() + Duration::hours(1),
            },
        )
        .unwrap();
    tx.commit().unwrap();
    node.session_keys.apply_added(&key, replaced.as_ref());
}

fn send(node: &Clearinghouse, amount: i64) -> Result<(), LedgerError> {
    let tx = node.store.begin();
    transfer(
        &tx,
        &node.session_keys,
        &TransferRequest {
            from: WALLET,
            to: PEER,
            signer: KEY,
            allocations: vec![Balance {
                asset: "usdc".into(),
                amount: dec(amount),
            }],
        },
    )?;
    tx.commit()?;
    Ok(())
}

fn open_session(node: &Clearinghouse, nonce: u64, amount: i64) -> Result<(), AppError> {
    node.apps
        .create(
            &node.store,
            CreateAppSession {
                definition: AppDefinition {
                    protocol: "nitroliterpc".into(),
                    application: "poker".into(),
                    participants: vec![WALLET, PEER],
                    weights: vec![1, 1],
                    quorum: 1,
                    challenge: 0,
                    nonce,
                },
                allocations: vec![AppAllocation::new(WALLET, "usdc", dec(amount))],
                session_data: None,
                signers: vec![KEY],
            },
        )
        .map(|_| ())
}

#[test]
fn test_cap_is_cumulative_across_operations() {
    let node = Clearinghouse::new();
    node.fund(WALLET, dec(1_000));
    add_key(&node, "poker", 100);

    send(&node, 30).unwrap();
    open_session(&node, 1, 50).unwrap();

    // 80 spent; 30 more would pass 100 on either path.
    assert!(matches!(
        send(&node, 30),
        Err(LedgerError::AllowanceExceeded { .. })
    ));
    assert!(matches!(
        open_session(&node, 2, 30),
        Err(AppError::Ledger(LedgerError::AllowanceExceeded { .. }))
    ));

    send(&node, 20).unwrap();
    assert_eq!(node.main_balance(WALLET), dec(900));
    assert_eq!(node.main_balance(PEER), dec(50));

    let tx = node.store.begin();
    let stored = tx.get_session_key(&KEY).unwrap().unwrap();
    assert_eq!(stored.used_allowances.len(), 1);
    assert_eq!(stored.used_allowances[0].amount, dec(100));
}

#[test]
fn test_key_for_other_application_cannot_fund_session() {
    let node = Clearinghouse::new();
    node.fund(WALLET, dec(1_000));
    add_key(&node, "chess", 500);

    let err = open_session(&node, 1, 10).unwrap_err();
    assert!(matches!(err, AppError::UnknownSigner(signer) if signer == KEY));
    assert_eq!(node.main_balance(WALLET), dec(1_000));

    // The same key still moves funds off-session.
    send(&node, 10).unwrap();
    assert_eq!(node.main_balance(PEER), dec(10));
}

#[test]
fn test_revoked_key_is_no_longer_resolved() {
    let node = Clearinghouse::new();
    node.fund(WALLET, dec(100));
    add_key(&node, "poker", 100);

    let tx = node.store.begin();
    let revoked = node.session_keys.revoke(&tx, &WALLET, &KEY).unwrap();
    tx.commit().unwrap();
    node.session_keys.apply_revoked(&revoked);

    let tx = node.store.begin();
    assert_eq!(node.session_keys.resolve_wallet(&tx, &KEY).unwrap(), None);
    drop(tx);
    assert!(open_session(&node, 1, 10).is_err());
}
