//! Fixtures shared by the cross-crate scenario tests.

use std::sync::{Arc, Mutex};

use clearnode_app::AppSessionEngine;
use clearnode_core::{
    AccountId, Address, AppSession, Asset, Channel, ChannelId, ChannelStatus, Decimal, Notifier,
    U256,
};
use clearnode_crypto::KeyPair;
use clearnode_ledger::{AssetRegistry, Ledger, SessionKeyRegistry};
use clearnode_settlement::{
    ChannelCoSigner, ChannelCreated, ChannelJoined, ChannelReconciler, CustodyEvent,
    EventAllocation,
};
use clearnode_store::testing::TempStore;

pub const CHAIN_ID: u64 = 11_155_111;
pub const USDC_TOKEN: Address = Address([0xaa; 20]);

/// Notifier that keeps everything it is told.
#[derive(Default)]
pub struct Recorder {
    pub channels: Mutex<Vec<(ChannelId, ChannelStatus)>>,
    pub balances: Mutex<Vec<Address>>,
    pub sessions: Mutex<Vec<(u64, String)>>,
}

impl Notifier for Recorder {
    fn channel_updated(&self, channel: &Channel) {
        if let Ok(mut v) = self.channels.lock() {
            v.push((channel.channel_id, channel.status));
        }
    }

    fn balance_updated(&self, wallet: &Address) {
        if let Ok(mut v) = self.balances.lock() {
            v.push(*wallet);
        }
    }

    fn app_session_updated(&self, session: &AppSession) {
        if let Ok(mut v) = self.sessions.lock() {
            v.push((session.version, session.status.to_string()));
        }
    }
}

/// Every service of a clearing node wired over one temporary store.
pub struct Clearinghouse {
    pub broker: Arc<KeyPair>,
    pub assets: Arc<AssetRegistry>,
    pub session_keys: Arc<SessionKeyRegistry>,
    pub recorder: Arc<Recorder>,
    pub reconciler: ChannelReconciler,
    pub apps: AppSessionEngine,
    pub cosigner: ChannelCoSigner,
    pub store: TempStore,
}

impl Clearinghouse {
    /// A node with `usdc` (6 decimals) registered.
    pub fn new() -> Self {
        let store = TempStore::new();
        let broker = Arc::new(KeyPair::generate());
        let assets = Arc::new(AssetRegistry::new());
        let tx = store.begin();
        assets
            .register(&tx, usdc())
            .unwrap_or_else(|e| panic!("asset registration failed: {}", e));
        tx.commit()
            .unwrap_or_else(|e| panic!("commit failed: {}", e));

        let session_keys = Arc::new(SessionKeyRegistry::new());
        let recorder = Arc::new(Recorder::default());
        let notifier: Arc<dyn Notifier> = recorder.clone();
        Self {
            reconciler: ChannelReconciler::new(
                broker.address(),
                assets.clone(),
                session_keys.clone(),
                notifier.clone(),
            ),
            apps: AppSessionEngine::new(session_keys.clone(), notifier),
            cosigner: ChannelCoSigner::new(broker.clone(), assets.clone()),
            broker,
            assets,
            session_keys,
            recorder,
            store,
        }
    }

    /// Credit a wallet's main bucket directly.
    pub fn fund(&self, wallet: Address, amount: Decimal) {
        let tx = self.store.begin();
        Ledger::new(&tx)
            .record(&wallet, &AccountId::from(&wallet), "usdc", amount, None)
            .unwrap_or_else(|e| panic!("funding failed: {}", e));
        tx.commit()
            .unwrap_or_else(|e| panic!("commit failed: {}", e));
    }

    /// `usdc` balance of one bucket.
    pub fn balance(&self, owner: Address, account: &AccountId) -> Decimal {
        let tx = self.store.begin();
        Ledger::new(&tx)
            .balance(&owner, account, "usdc")
            .unwrap_or_else(|e| panic!("balance read failed: {}", e))
    }

    pub fn main_balance(&self, wallet: Address) -> Decimal {
        self.balance(wallet, &AccountId::from(&wallet))
    }

    /// Open a channel for `wallet` through Created and Joined events.
    pub fn open_channel(&self, channel_id: ChannelId, wallet: Address, raw: u64) -> Channel {
        self.reconciler
            .handle(&self.store, &created_event(channel_id, wallet, self.broker.address(), raw))
            .unwrap_or_else(|e| panic!("created failed: {}", e));
        let joined = CustodyEvent::Joined(ChannelJoined {
            chain_id: CHAIN_ID,
            channel_id,
            index: 1,
        });
        match self.reconciler.handle(&self.store, &joined) {
            Ok(clearnode_settlement::Reconciled::Applied(channel)) => channel,
            other => panic!("join not applied: {:?}", other),
        }
    }
}

impl Default for Clearinghouse {
    fn default() -> Self {
        Self::new()
    }
}

pub fn usdc() -> Asset {
    Asset {
        token: USDC_TOKEN,
        chain_id: CHAIN_ID,
        symbol: "usdc".into(),
        decimals: 6,
    }
}

pub fn dec(value: i64) -> Decimal {
    Decimal::from(value)
}

/// A Created event for a channel between `wallet` and `broker`, funded by the wallet.
pub fn created_event(channel_id: ChannelId, wallet: Address, broker: Address, raw: u64) -> CustodyEvent {
    CustodyEvent::Created(ChannelCreated {
        chain_id: CHAIN_ID,
        channel_id,
        wallet,
        participants: vec![wallet, broker],
        adjudicator: Address([0xad; 20]),
        challenge: 86_400,
        nonce: 1,
        allocations: vec![
            EventAllocation {
                destination: wallet,
                token: USDC_TOKEN,
                amount: U256::from(raw),
            },
            EventAllocation {
                destination: broker,
                token: USDC_TOKEN,
                amount: U256::zero(),
            },
        ],
    })
}
