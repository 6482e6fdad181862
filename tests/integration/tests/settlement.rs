//! Integration test: broker co-signed resize and close proposals.

use clearnode_core::{Address, ChannelId, RawDelta, U256};
use clearnode_crypto::recover_address;
use clearnode_integration_tests::{dec, Clearinghouse, CHAIN_ID, USDC_TOKEN};
use clearnode_settlement::{
    ChannelChallenged, ChannelState, CloseRequest, CustodyEvent, ResizeRequest, SettlementError,
    SettlementProposal, StateIntent,
};

const WALLET: Address = Address([0x01; 20]);
const CHANNEL: ChannelId = ChannelId([0xc2; 32]);

fn recovered_signer(proposal: &SettlementProposal) -> Address {
    let state = ChannelState {
        channel_id: proposal.channel_id,
        intent: proposal.intent,
        version: proposal.version,
        data: hex::decode(proposal.state_data.trim_start_matches("0x")).unwrap(),
        allocations: proposal.allocations.clone(),
    };
    assert_eq!(proposal.state_hash, format!("0x{}", hex::encode(state.hash())));
    recover_address(&state.hash(), &proposal.server_signature).unwrap()
}

fn close_request(signers: Vec<Address>) -> CloseRequest {
    CloseRequest {
        channel_id: CHANNEL,
        funds_destination: WALLET,
        signers,
    }
}

#[test]
fn test_close_after_resize_is_signed_by_broker() {
    let node = Clearinghouse::new();
    node.open_channel(CHANNEL, WALLET, 1_000_000);
    node.fund(WALLET, dec(2));

    // Unified balance (3.0) exceeds the channel (1.0): close must wait for a resize.
    let tx = node.store.begin();
    let err = node.cosigner.request_close(&tx, &close_request(vec![WALLET])).unwrap_err();
    assert!(matches!(err, SettlementError::ResizeRequired(id) if id == CHANNEL));

    let resize = node
        .cosigner
        .request_resize(
            &tx,
            &ResizeRequest {
                channel_id: CHANNEL,
                allocate_amount: Some(RawDelta::Increase(U256::from(2_000_000u64))),
                resize_amount: None,
                funds_destination: WALLET,
                signers: vec![WALLET],
            },
        )
        .unwrap();
    drop(tx);
    assert_eq!(resize.intent, StateIntent::Resize);
    assert_eq!(resize.version, 1);
    assert_eq!(resize.allocations[0].amount, U256::from(3_000_000u64));
    assert_eq!(resize.allocations[0].token, USDC_TOKEN);
    assert_eq!(resize.allocations[1].destination, node.broker.address());
    assert_eq!(recovered_signer(&resize), node.broker.address());

    // Proposals never touch the ledger.
    assert_eq!(node.main_balance(WALLET), dec(3));
}

#[test]
fn test_close_proposal_pays_balance_to_destination() {
    let node = Clearinghouse::new();
    node.open_channel(CHANNEL, WALLET, 5_000_000);

    // Spend part of the balance off-chain.
    node.fund(WALLET, dec(-2));

    let tx = node.store.begin();
    let proposal = node.cosigner.request_close(&tx, &close_request(vec![WALLET])).unwrap();
    assert_eq!(proposal.intent, StateIntent::Finalize);
    assert_eq!(proposal.version, 1);
    assert_eq!(proposal.allocations[0].destination, WALLET);
    assert_eq!(proposal.allocations[0].amount, U256::from(3_000_000u64));
    assert_eq!(proposal.allocations[1].amount, U256::from(2_000_000u64));
    assert_eq!(recovered_signer(&proposal), node.broker.address());
}

#[test]
fn test_requests_need_wallet_signature_and_open_channel() {
    let node = Clearinghouse::new();
    node.open_channel(CHANNEL, WALLET, 1_000_000);

    let tx = node.store.begin();
    let err = node
        .cosigner
        .request_close(&tx, &close_request(vec![Address([0x99; 20])]))
        .unwrap_err();
    assert!(matches!(err, SettlementError::MissingSignature(_)));

    let err = node
        .cosigner
        .request_resize(
            &tx,
            &ResizeRequest {
                channel_id: CHANNEL,
                allocate_amount: None,
                resize_amount: Some(RawDelta::Increase(U256::zero())),
                funds_destination: WALLET,
                signers: vec![WALLET],
            },
        )
        .unwrap_err();
    assert!(matches!(err, SettlementError::InvalidParams(_)));

    let err = node
        .cosigner
        .request_close(
            &tx,
            &CloseRequest {
                channel_id: ChannelId([0x01; 32]),
                funds_destination: WALLET,
                signers: vec![WALLET],
            },
        )
        .unwrap_err();
    assert!(matches!(err, SettlementError::NotFound(_)));
    drop(tx);

    let challenged = CustodyEvent::Challenged(ChannelChallenged {
        chain_id: CHAIN_ID,
        channel_id: CHANNEL,
        state_version: 1,
        expiration: 0,
    });
    node.reconciler.handle(&node.store, &challenged).unwrap();
    let tx = node.store.begin();
    let err = node.cosigner.request_close(&tx, &close_request(vec![WALLET])).unwrap_err();
    assert!(matches!(err, SettlementError::ChannelNotOpen { .. }));
}

#[test]
fn test_withdrawal_cannot_go_below_zero() {
    let node = Clearinghouse::new();
    node.open_channel(CHANNEL, WALLET, 1_000_000);

    let tx = node.store.begin();
    let err = node
        .cosigner
        .request_resize(
            &tx,
            &ResizeRequest {
                channel_id: CHANNEL,
                allocate_amount: None,
                resize_amount: Some(RawDelta::Decrease(U256::from(1_500_000u64))),
                funds_destination: WALLET,
                signers: vec![WALLET],
            },
        )
        .unwrap_err();
    assert!(matches!(err, SettlementError::NegativeChannelAmount));
}
