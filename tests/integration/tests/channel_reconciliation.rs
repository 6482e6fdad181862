//! Integration test: custody events driving the channel mirror and the ledger.

use clearnode_core::{
    AccountId, Address, Balance, ChannelId, ChannelStatus, Decimal, RawDelta, TransactionKind, U256,
};
use clearnode_integration_tests::{created_event, dec, Clearinghouse, CHAIN_ID};
use clearnode_ledger::{transfer, LedgerError, TransferRequest};
use clearnode_settlement::{
    ChannelChallenged, ChannelClosed, ChannelJoined, ChannelResized, CustodyEvent, Reconciled,
};

const WALLET: Address = Address([0x01; 20]);
const PEER: Address = Address([0x02; 20]);
const CHANNEL: ChannelId = ChannelId([0xc1; 32]);

fn joined(channel_id: ChannelId) -> CustodyEvent {
    CustodyEvent::Joined(ChannelJoined {
        chain_id: CHAIN_ID,
        channel_id,
        index: 1,
    })
}

fn challenged(state_version: u64) -> CustodyEvent {
    CustodyEvent::Challenged(ChannelChallenged {
        chain_id: CHAIN_ID,
        channel_id: CHANNEL,
        state_version,
        expiration: 0,
    })
}

#[test]
fn test_deposit_reaches_unified_balance_on_join() {
    let node = Clearinghouse::new();
    let escrow = AccountId::from(&CHANNEL);

    let created = node
        .reconciler
        .handle(&node.store, &created_event(CHANNEL, WALLET, node.broker.address(), 1_000_000))
        .unwrap();
    let Reconciled::Applied(channel) = created else {
        panic!("created event ignored");
    };
    assert_eq!(channel.status, ChannelStatus::Joining);
    assert_eq!(channel.version, 0);
    assert_eq!(node.balance(WALLET, &escrow), dec(1));
    assert_eq!(node.main_balance(WALLET), Decimal::ZERO);

    let Reconciled::Applied(channel) = node.reconciler.handle(&node.store, &joined(CHANNEL)).unwrap()
    else {
        panic!("joined event ignored");
    };
    assert_eq!(channel.status, ChannelStatus::Open);
    assert_eq!(channel.version, 0);
    assert_eq!(node.balance(WALLET, &escrow), Decimal::ZERO);
    assert_eq!(node.main_balance(WALLET), dec(1));

    let tx = node.store.begin();
    let log = tx.all_transactions().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].kind, TransactionKind::Deposit);
    assert_eq!(log[0].from_account, escrow);
    assert_eq!(log[0].to_account, AccountId::from(&WALLET));
    assert_eq!(log[0].amount, dec(1));
    drop(tx);

    assert_eq!(*node.recorder.balances.lock().unwrap(), vec![WALLET]);
    let statuses: Vec<_> = node.recorder.channels.lock().unwrap().iter().map(|(_, s)| *s).collect();
    assert_eq!(statuses, vec![ChannelStatus::Joining, ChannelStatus::Open]);
}

#[test]
fn test_unknown_channel_is_dropped_without_writes() {
    let node = Clearinghouse::new();
    let outcome = node
        .reconciler
        .handle(&node.store, &joined(ChannelId([0xee; 32])))
        .unwrap();
    assert!(matches!(outcome, Reconciled::Ignored(_)));

    let tx = node.store.begin();
    assert!(tx.all_channels().unwrap().is_empty());
    assert!(tx.all_transactions().unwrap().is_empty());
    assert!(node.recorder.channels.lock().unwrap().is_empty());
}

#[test]
fn test_resize_then_close_settles_unified_balance() {
    let node = Clearinghouse::new();
    node.open_channel(CHANNEL, WALLET, 1_000_000);

    let resized = CustodyEvent::Resized(ChannelResized {
        chain_id: CHAIN_ID,
        channel_id: CHANNEL,
        delta: RawDelta::Increase(U256::from(500_000u64)),
    });
    let Reconciled::Applied(channel) = node.reconciler.handle(&node.store, &resized).unwrap() else {
        panic!("resize ignored");
    };
    assert_eq!(channel.version, 1);
    assert_eq!(channel.raw_amount, U256::from(1_500_000u64));
    assert_eq!(node.main_balance(WALLET), Decimal::new(15, 1));

    let closed = CustodyEvent::Closed(ChannelClosed {
        chain_id: CHAIN_ID,
        channel_id: CHANNEL,
        final_allocation: U256::from(1_500_000u64),
    });
    let Reconciled::Applied(channel) = node.reconciler.handle(&node.store, &closed).unwrap() else {
        panic!("close ignored");
    };
    assert_eq!(channel.status, ChannelStatus::Closed);
    assert_eq!(channel.version, 2);
    assert_eq!(channel.raw_amount, U256::zero());
    assert_eq!(node.main_balance(WALLET), Decimal::ZERO);

    // A second close finds nothing to do.
    let again = node.reconciler.handle(&node.store, &closed).unwrap();
    assert!(matches!(again, Reconciled::Ignored(_)));
    assert_eq!(node.main_balance(WALLET), Decimal::ZERO);
}

#[test]
fn test_close_before_join_releases_escrow() {
    let node = Clearinghouse::new();
    let escrow = AccountId::from(&CHANNEL);
    node.reconciler
        .handle(&node.store, &created_event(CHANNEL, WALLET, node.broker.address(), 2_000_000))
        .unwrap();
    assert_eq!(node.balance(WALLET, &escrow), dec(2));

    let closed = CustodyEvent::Closed(ChannelClosed {
        chain_id: CHAIN_ID,
        channel_id: CHANNEL,
        final_allocation: U256::from(2_000_000u64),
    });
    let Reconciled::Applied(channel) = node.reconciler.handle(&node.store, &closed).unwrap() else {
        panic!("close ignored");
    };
    assert_eq!(channel.status, ChannelStatus::Closed);
    assert_eq!(node.balance(WALLET, &escrow), Decimal::ZERO);
    assert_eq!(node.main_balance(WALLET), Decimal::ZERO);
}

#[test]
fn test_challenge_before_join_still_releases_escrow() {
    let node = Clearinghouse::new();
    let escrow = AccountId::from(&CHANNEL);
    node.reconciler
        .handle(&node.store, &created_event(CHANNEL, WALLET, node.broker.address(), 1_000_000))
        .unwrap();

    let Reconciled::Applied(channel) = node.reconciler.handle(&node.store, &challenged(0)).unwrap()
    else {
        panic!("challenge ignored");
    };
    assert_eq!(channel.status, ChannelStatus::Challenged);
    assert!(matches!(
        node.reconciler.handle(&node.store, &joined(CHANNEL)).unwrap(),
        Reconciled::Ignored(_)
    ));

    let closed = CustodyEvent::Closed(ChannelClosed {
        chain_id: CHAIN_ID,
        channel_id: CHANNEL,
        final_allocation: U256::from(1_000_000u64),
    });
    let Reconciled::Applied(channel) = node.reconciler.handle(&node.store, &closed).unwrap() else {
        panic!("close ignored");
    };
    assert_eq!(channel.status, ChannelStatus::Closed);
    assert_eq!(node.balance(WALLET, &escrow), Decimal::ZERO);
    assert_eq!(node.main_balance(WALLET), Decimal::ZERO);
}

#[test]
fn test_challenge_freezes_wallet_until_close() {
    let node = Clearinghouse::new();
    node.open_channel(CHANNEL, WALLET, 3_000_000);

    let Reconciled::Applied(channel) = node.reconciler.handle(&node.store, &challenged(4)).unwrap()
    else {
        panic!("challenge ignored");
    };
    assert_eq!(channel.status, ChannelStatus::Challenged);
    assert_eq!(channel.version, 4);

    // A challenge older than the stored state changes nothing.
    let stale = node.reconciler.handle(&node.store, &challenged(2)).unwrap();
    assert!(matches!(stale, Reconciled::Ignored(_)));
    let tx = node.store.begin();
    assert_eq!(tx.get_channel(&CHANNEL).unwrap().unwrap().version, 4);

    let request = TransferRequest {
        from: WALLET,
        to: PEER,
        signer: WALLET,
        allocations: vec![Balance {
            asset: "usdc".into(),
            amount: dec(1),
        }],
    };
    let err = transfer(&tx, &node.session_keys, &request).unwrap_err();
    assert!(matches!(err, LedgerError::ChallengedChannel { .. }));
    tx.rollback().unwrap();
    assert_eq!(node.main_balance(WALLET), dec(3));

    let closed = CustodyEvent::Closed(ChannelClosed {
        chain_id: CHAIN_ID,
        channel_id: CHANNEL,
        final_allocation: U256::from(1_000_000u64),
    });
    node.reconciler.handle(&node.store, &closed).unwrap();
    assert_eq!(node.main_balance(WALLET), dec(2));

    let tx = node.store.begin();
    transfer(&tx, &node.session_keys, &request).unwrap();
    tx.commit().unwrap();
    assert_eq!(node.main_balance(PEER), dec(1));
}

#[test]
fn test_created_binds_custody_signer() {
    let node = Clearinghouse::new();
    let signer = Address([0x5a; 20]);
    let mut event = created_event(CHANNEL, WALLET, node.broker.address(), 1_000_000);
    if let CustodyEvent::Created(ref mut created) = event {
        created.participants[0] = signer;
    }
    node.reconciler.handle(&node.store, &event).unwrap();

    let tx = node.store.begin();
    assert_eq!(node.session_keys.resolve_wallet(&tx, &signer).unwrap(), Some(WALLET));
}
