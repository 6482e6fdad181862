//! Integration test: app-session lifecycle over the unified ledger.
//!
//! Create, operate, a rejected operate and close on a two-party session,
//! checked against participants' main and session buckets.

use clearnode_app::{AppError, CloseAppSession, CreateAppSession, Intent, SubmitAppState};
use clearnode_core::{AccountId, Address, AppAllocation, AppDefinition, AppSessionStatus, Decimal};
use clearnode_integration_tests::{dec, Clearinghouse};

const A: Address = Address([0x0a; 20]);
const B: Address = Address([0x0b; 20]);

fn definition() -> AppDefinition {
    AppDefinition {
        protocol: "nitroliterpc".into(),
        application: "chess".into(),
        participants: vec![A, B],
        weights: vec![1, 1],
        quorum: 2,
        challenge: 86_400,
        nonce: 42,
    }
}

fn alloc(participant: Address, amount: i64) -> AppAllocation {
    AppAllocation::new(participant, "usdc", dec(amount))
}

fn entry_sum(node: &Clearinghouse, wallets: &[Address]) -> Decimal {
    let tx = node.store.begin();
    wallets
        .iter()
        .flat_map(|w| tx.entries(w, None, None).unwrap())
        .map(|e| e.credit - e.debit)
        .sum()
}

#[test]
fn test_full_session_lifecycle() {
    let node = Clearinghouse::new();
    node.fund(A, dec(500));
    node.fund(B, dec(500));
    let funded_total = entry_sum(&node, &[A, B]);

    // Create: A:100, B:200, both sign
    let session = node
        .apps
        .create(
            &node.store,
            CreateAppSession {
                definition: definition(),
                allocations: vec![alloc(A, 100), alloc(B, 200)],
                session_data: None,
                signers: vec![A, B],
            },
        )
        .expect("create should succeed");
    let bucket = AccountId::from(&session.session_id);
    assert_eq!(session.version, 1);
    assert_eq!(session.status, AppSessionStatus::Open);
    assert_eq!(node.main_balance(A), dec(400));
    assert_eq!(node.main_balance(B), dec(300));
    assert_eq!(node.balance(A, &bucket), dec(100));
    assert_eq!(node.balance(B, &bucket), dec(200));

    // Operate: A:150, B:150
    let session = node
        .apps
        .submit(
            &node.store,
            SubmitAppState {
                session_id: session.session_id,
                intent: Intent::Operate(vec![alloc(A, 150), alloc(B, 150)]),
                expected_version: 1,
                session_data: None,
                signers: vec![A, B],
            },
        )
        .expect("operate should succeed");
    assert_eq!(session.version, 2);
    assert_eq!(node.balance(A, &bucket), dec(150));
    assert_eq!(node.balance(B, &bucket), dec(150));

    // Operate that does not conserve the total
    let err = node
        .apps
        .submit(
            &node.store,
            SubmitAppState {
                session_id: session.session_id,
                intent: Intent::Operate(vec![alloc(A, 150), alloc(B, 100)]),
                expected_version: 2,
                session_data: None,
                signers: vec![A, B],
            },
        )
        .unwrap_err();
    assert!(matches!(err, AppError::ConservationViolated { .. }));
    let tx = node.store.begin();
    assert_eq!(tx.get_app_session(&session.session_id).unwrap().unwrap().version, 2);
    drop(tx);
    assert_eq!(node.balance(A, &bucket), dec(150));
    assert_eq!(node.balance(B, &bucket), dec(150));

    // Close: A:150, B:150
    let closed = node
        .apps
        .close(
            &node.store,
            CloseAppSession {
                session_id: session.session_id,
                expected_version: 2,
                allocations: vec![alloc(A, 150), alloc(B, 150)],
                session_data: None,
                signers: vec![A, B],
            },
        )
        .expect("close should succeed");
    assert_eq!(closed.status, AppSessionStatus::Closed);
    assert_eq!(closed.version, 3);
    assert_eq!(node.balance(A, &bucket), Decimal::ZERO);
    assert_eq!(node.balance(B, &bucket), Decimal::ZERO);
    assert_eq!(node.main_balance(A), dec(550));
    assert_eq!(node.main_balance(B), dec(450));

    // Every movement inside the session was a matched pair.
    assert_eq!(entry_sum(&node, &[A, B]), funded_total);

    let sessions = node.recorder.sessions.lock().unwrap().clone();
    assert_eq!(
        sessions,
        vec![(1, "open".into()), (2, "open".into()), (3, "closed".into())]
    );
}

#[test]
fn test_duplicate_signatures_never_reach_quorum() {
    let node = Clearinghouse::new();
    node.fund(A, dec(100));
    node.fund(B, dec(100));
    let session = node
        .apps
        .create(
            &node.store,
            CreateAppSession {
                definition: definition(),
                allocations: vec![alloc(A, 50), alloc(B, 50)],
                session_data: None,
                signers: vec![A, B],
            },
        )
        .unwrap();

    let submit = |signers: Vec<Address>| {
        node.apps.submit(
            &node.store,
            SubmitAppState {
                session_id: session.session_id,
                intent: Intent::Operate(vec![alloc(A, 100), alloc(B, 0)]),
                expected_version: 1,
                session_data: None,
                signers,
            },
        )
    };

    for signers in [vec![A], vec![A, A], vec![A, A, A, A]] {
        assert!(matches!(
            submit(signers),
            Err(AppError::QuorumNotMet { signed: 1, required: 2 })
        ));
    }
    assert_eq!(submit(vec![A, B, B]).unwrap().version, 2);
}

#[test]
fn test_failed_create_writes_nothing() {
    let node = Clearinghouse::new();
    node.fund(A, dec(100));
    node.fund(B, dec(10));

    let err = node
        .apps
        .create(
            &node.store,
            CreateAppSession {
                definition: definition(),
                allocations: vec![alloc(A, 100), alloc(B, 50)],
                session_data: None,
                signers: vec![A, B],
            },
        )
        .unwrap_err();
    assert!(matches!(err, AppError::Ledger(_)));
    assert_eq!(node.main_balance(A), dec(100));

    let tx = node.store.begin();
    assert!(tx.all_app_sessions().unwrap().is_empty());
    assert!(tx.all_transactions().unwrap().is_empty());
}

#[test]
fn test_concurrent_version_race_has_one_winner() {
    let node = Clearinghouse::new();
    node.fund(A, dec(100));
    node.fund(B, dec(100));
    let session = node
        .apps
        .create(
            &node.store,
            CreateAppSession {
                definition: definition(),
                allocations: vec![alloc(A, 50), alloc(B, 50)],
                session_data: None,
                signers: vec![A, B],
            },
        )
        .unwrap();

    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let node = &node;
                s.spawn(move || {
                    node.apps.submit(
                        &node.store,
                        SubmitAppState {
                            session_id: session.session_id,
                            intent: Intent::Operate(vec![alloc(A, 50 + i), alloc(B, 50 - i)]),
                            expected_version: 1,
                            session_data: None,
                            signers: vec![A, B],
                        },
                    )
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    let tx = node.store.begin();
    assert_eq!(tx.get_app_session(&session.session_id).unwrap().unwrap().version, 2);
}
